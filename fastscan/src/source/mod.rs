//! Section sources feeding the scan.
//!
//! A scan reads raw sections either from a live frontend feed or from
//! recorded table files. Both are exposed as a [`SectionStream`].

mod file;
mod live;

use std::io;
use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use futures::Stream;

use crate::collector::DEFAULT_TABLE_TIMEOUT;

pub use file::{frame_sections, FileReplaySource, SectionFrameCodec};
pub use live::LiveSectionSource;

/// Default PID carrying the Fast Scan tables.
pub const DEFAULT_FASTSCAN_PID: u16 = 900;

/// A stream of raw sections.
pub type SectionStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

/// Subscription to one table on one PID.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableSpec {
    /// PID the table is broadcast on.
    pub pid: u16,
    /// Table ID.
    pub table_id: u8,
    /// Whether the section CRC is verified.
    pub check_crc: bool,
    /// Time to wait for the next new section.
    pub timeout: Duration,
}

impl TableSpec {
    pub fn new(pid: u16, table_id: u8) -> Self {
        Self {
            pid,
            table_id,
            check_crc: true,
            timeout: DEFAULT_TABLE_TIMEOUT,
        }
    }

    /// Returns true if `section` belongs to this table.
    pub fn matches(&self, section: &[u8]) -> bool {
        section.first() == Some(&self.table_id)
    }
}
