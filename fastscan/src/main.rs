//! fastscan: DVB Fast Scan channel list tool.
//!
//! Replays recorded Fast Scan tables into bouquet files, or dumps the
//! decoded contents of a recording.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use futures::StreamExt;
use log::{error, info, warn};

use fastscan::config::{self, ConfigFile, ScanOverrides};
use fastscan::source::{frame_sections, FileReplaySource};
use fastscan::{spawn_scan, FrontendPool, JsonBouquetWriter, ScanEvent, ScanSource};
use fastscan_protocol::{FastScanSection, Mpeg2Crc, SkipChecksum};

/// fastscan - DVB Fast Scan channel list tool
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short = 'f', long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Directory where log files are stored
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    /// Number of days to keep log files
    #[arg(long, global = true)]
    log_retention_days: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build bouquets from recorded network and services tables
    Replay {
        /// Recorded network table (0xBC sections)
        #[arg(long)]
        network: PathBuf,

        /// Recorded services table (0xBD sections)
        #[arg(long)]
        services: PathBuf,

        /// Provider label
        #[arg(short, long)]
        provider: Option<String>,

        /// Bouquet name used in the bouquet file names
        #[arg(short, long)]
        bouquet: Option<String>,

        /// Use the broadcast logical channel numbers
        #[arg(long)]
        original_numbering: bool,

        /// Keep service names and types fixed in the bouquet store
        #[arg(long)]
        fixed_service_info: bool,

        /// Skip section CRC verification
        #[arg(long)]
        no_crc: bool,

        /// Table timeout in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Output directory for bouquet files
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Decode and print every section of a recorded table file
    Dump {
        /// Recorded table file
        file: PathBuf,

        /// Skip section CRC verification
        #[arg(long)]
        no_crc: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Load config file: explicit path > auto-detect > default
    let file_config = match config::find_config(args.config.as_deref()) {
        Some(path) => match config::load_config(&path) {
            Ok(c) => {
                eprintln!("Loaded config from: {}", path.display());
                c
            }
            Err(e) => {
                eprintln!("Failed to load config file: {}", e);
                return Err(e.into());
            }
        },
        None => ConfigFile::default(),
    };

    // Command line takes precedence
    let log_dir = args
        .log_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from(file_config.logging.log_dir.as_deref().unwrap_or("logs")));
    let log_retention_days = args
        .log_retention_days
        .or(file_config.logging.retention_days)
        .unwrap_or(7);
    fastscan::logging::init_logging(
        &log_dir,
        log_retention_days,
        args.verbose,
        file_config.logging.level.as_deref(),
    )?;

    match args.command {
        Command::Replay {
            network,
            services,
            provider,
            bouquet,
            original_numbering,
            fixed_service_info,
            no_crc,
            timeout_ms,
            output,
        } => {
            let overrides = ScanOverrides {
                provider,
                bouquet,
                original_numbering: original_numbering.then_some(true),
                fixed_service_info: fixed_service_info.then_some(true),
                check_crc: no_crc.then_some(false),
                table_timeout_ms: timeout_ms,
                ..Default::default()
            };
            let options = file_config.scan_options(&overrides);
            let output_dir = file_config.output_dir(output);

            let code = replay(network, services, options, output_dir).await?;
            if code != 0 {
                std::process::exit(code);
            }
        }
        Command::Dump { file, no_crc } => dump(file, !no_crc).await?,
    }

    Ok(())
}

async fn replay(
    network: PathBuf,
    services: PathBuf,
    options: fastscan::ScanOptions,
    output_dir: PathBuf,
) -> Result<i32, Box<dyn std::error::Error>> {
    let sections = FileReplaySource::new([network, services]).open().await?;

    let pool = Arc::new(FrontendPool::new());
    pool.register(options.frontend).await;

    info!("Writing bouquets to {}", output_dir.display());
    let mut handle = spawn_scan(
        pool,
        options,
        ScanSource::Replay(sections),
        Box::new(JsonBouquetWriter::new(output_dir)),
    );

    let mut last_percent = None;
    while let Some(event) = handle.events().recv().await {
        match event {
            ScanEvent::Progress { done, total } if total > 0 => {
                let percent = done * 100 / total;
                if last_percent != Some(percent) {
                    println!("Progress: {}%", percent);
                    last_percent = Some(percent);
                }
            }
            ScanEvent::Progress { .. } => {}
            ScanEvent::Completed { status } => {
                println!("Completed with status {} ({:?})", status.code(), status);
            }
        }
    }

    let report = handle.join().await;
    if let Some(list) = &report.channel_list {
        println!("{}: {} channels", list.network_name, list.len());
    }
    Ok(report.status.map(|s| s.code()).unwrap_or(1))
}

async fn dump(file: PathBuf, check_crc: bool) -> Result<(), Box<dyn std::error::Error>> {
    let reader = tokio::fs::File::open(&file).await?;
    let mut frames = frame_sections(reader);

    let mut index = 0usize;
    let mut failed = 0usize;
    while let Some(frame) = frames.next().await {
        let frame = frame?;
        let decoded = if check_crc {
            FastScanSection::decode_with(&frame, &Mpeg2Crc)
        } else {
            FastScanSection::decode_with(&frame, &SkipChecksum)
        };

        match decoded {
            Ok(section) => println!("{}", serde_json::to_string_pretty(&section)?),
            Err(e) => {
                warn!("Frame {}: {}", index, e);
                failed += 1;
            }
        }
        index += 1;
    }

    if failed > 0 {
        error!("{} of {} frames failed to decode", failed, index);
    } else {
        info!("Decoded {} frames from {}", index, file.display());
    }
    Ok(())
}
