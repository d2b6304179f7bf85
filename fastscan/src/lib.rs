//! DVB Fast Scan table collection and channel list building.
//!
//! The scan reassembles the operator's network and services tables from a
//! live frontend or from recorded files, joins them into numbered TV and
//! radio bouquets, and hands those to a [`sink::BouquetSink`].
//!
//! Section decoding lives in the `fastscan-protocol` crate.

pub mod channel_list;
pub mod collector;
pub mod config;
pub mod error;
pub mod frontend;
pub mod logging;
pub mod scan;
pub mod sink;
pub mod source;

pub use channel_list::{build_channel_list, Bouquet, BouquetKind, BuildOptions, ChannelEntry, ChannelList};
pub use collector::{CollectorState, TableCollector, TableSection};
pub use error::{Result, ScanError};
pub use frontend::{FrontendGuard, FrontendPool};
pub use scan::{spawn_scan, ScanEvent, ScanHandle, ScanOptions, ScanReport, ScanSource, ScanState, ScanStatus};
pub use sink::{BouquetSink, JsonBouquetWriter, MemorySink};
