//! Bouquet sinks.
//!
//! The scan hands every produced bouquet to a [`BouquetSink`]. How the
//! bouquet is persisted or merged with an existing one is up to the sink.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::Local;
use log::info;
use serde::Serialize;

use crate::channel_list::Bouquet;
use crate::error::{Result, ScanError};

/// Receiver of the bouquets produced by a scan.
///
/// The scan calls `store` from tokio's blocking pool, so implementations may
/// do synchronous file or database I/O.
pub trait BouquetSink: Send {
    /// Store one bouquet.
    fn store(&mut self, bouquet: &Bouquet) -> Result<()>;
}

/// Collects bouquets in memory. Clones share the same storage.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    bouquets: Arc<Mutex<Vec<Bouquet>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bouquets stored so far.
    pub fn bouquets(&self) -> Vec<Bouquet> {
        match self.bouquets.lock() {
            Ok(bouquets) => bouquets.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl BouquetSink for MemorySink {
    fn store(&mut self, bouquet: &Bouquet) -> Result<()> {
        let mut bouquets = self
            .bouquets
            .lock()
            .map_err(|e| ScanError::Sink(e.to_string()))?;
        bouquets.push(bouquet.clone());
        Ok(())
    }
}

/// On-disk bouquet document.
#[derive(Serialize)]
struct BouquetDocument<'a> {
    generated_at: String,
    #[serde(flatten)]
    bouquet: &'a Bouquet,
}

/// Writes each bouquet as `<dir>/<file name>.json`.
#[derive(Debug, Clone)]
pub struct JsonBouquetWriter {
    dir: PathBuf,
}

impl JsonBouquetWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Path a bouquet is written to.
    pub fn path_for(&self, bouquet: &Bouquet) -> PathBuf {
        self.dir.join(format!("{}.json", bouquet.file_name))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl BouquetSink for JsonBouquetWriter {
    fn store(&mut self, bouquet: &Bouquet) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;

        let document = BouquetDocument {
            generated_at: Local::now().to_rfc3339(),
            bouquet,
        };
        let json =
            serde_json::to_string_pretty(&document).map_err(|e| ScanError::Sink(e.to_string()))?;

        let path = self.path_for(bouquet);
        std::fs::write(&path, json)?;
        info!(
            "Wrote {} channels to {}",
            bouquet.entries.len(),
            path.display()
        );
        Ok(())
    }
}
