//! Multi-section table reassembly.
//!
//! A logical table is broadcast as a carousel of physical sections that may
//! arrive out of order, repeated, or corrupted. [`TableCollector`] tracks
//! which section numbers of the current table version have been accepted and
//! signals readiness once every declared section is present, or gives up
//! after a period without progress.

use std::collections::{BTreeSet, HashSet};
use std::time::Duration;

use fastscan_protocol::{
    table_id, ChecksumVerifier, DecodeError, Mpeg2Crc, NetworkSection, SectionHeader,
    ServicesSection, SkipChecksum,
};
use log::{debug, info, trace, warn};
use tokio::time::Instant;

use crate::error::ScanError;
use crate::source::TableSpec;

/// Default time to wait for the next new section of a table.
pub const DEFAULT_TABLE_TIMEOUT: Duration = Duration::from_millis(5000);

/// A table whose physical sections can be merged into one logical table.
pub trait TableSection: Sized {
    /// Table ID carried by every section of this table.
    const TABLE_ID: u8;

    /// Name used in log messages.
    const NAME: &'static str;

    /// Decode one physical section.
    fn decode_with(data: &[u8], verifier: &dyn ChecksumVerifier) -> Result<Self, DecodeError>;

    /// Append the records of a later section. Records whose key is already
    /// present are dropped.
    fn merge(&mut self, other: Self);
}

impl TableSection for ServicesSection {
    const TABLE_ID: u8 = table_id::SERVICES;
    const NAME: &'static str = "services";

    fn decode_with(data: &[u8], verifier: &dyn ChecksumVerifier) -> Result<Self, DecodeError> {
        ServicesSection::decode_with(data, verifier)
    }

    fn merge(&mut self, other: Self) {
        let mut keys: HashSet<_> = self.services.iter().map(|s| s.key()).collect();

        for service in other.services {
            if !keys.insert(service.key()) {
                debug!(
                    "services table: dropping duplicate service {} from section {}",
                    service.key(),
                    other.section_number
                );
                continue;
            }
            self.services.push(service);
        }
    }
}

impl TableSection for NetworkSection {
    const TABLE_ID: u8 = table_id::NETWORK;
    const NAME: &'static str = "network";

    fn decode_with(data: &[u8], verifier: &dyn ChecksumVerifier) -> Result<Self, DecodeError> {
        NetworkSection::decode_with(data, verifier)
    }

    fn merge(&mut self, other: Self) {
        if self.network_name.is_empty() {
            self.network_name = other.network_name;
        }

        let mut keys: HashSet<_> = self
            .transport_streams
            .iter()
            .map(|ts| (ts.original_network_id, ts.transport_stream_id))
            .collect();

        for ts in other.transport_streams {
            if !keys.insert((ts.original_network_id, ts.transport_stream_id)) {
                debug!(
                    "network table: dropping duplicate transport stream {:04x}:{:04x} from section {}",
                    ts.original_network_id, ts.transport_stream_id, other.section_number
                );
                continue;
            }
            self.transport_streams.push(ts);
        }
    }
}

/// Collector state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectorState {
    /// Waiting for more sections.
    Collecting,
    /// Every declared section was received.
    Ready,
    /// Gave up waiting; whatever was received is kept.
    TimedOut,
}

/// Sections received against sections declared.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Progress {
    pub seen: usize,
    pub expected: usize,
}

/// Result of submitting one raw section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// A new section was decoded and recorded.
    Accepted(Progress),
    /// The last missing section was recorded; the table is ready.
    Completed(Progress),
    /// The section number was already recorded for this version.
    Duplicate(Progress),
    /// The section carries a version older than the one being collected.
    Stale,
    /// The section was discarded.
    Rejected(DecodeError),
    /// The collector is no longer collecting.
    Ignored,
}

impl SubmitOutcome {
    /// Progress to report for this submission, if any.
    pub fn progress(&self) -> Option<Progress> {
        match self {
            SubmitOutcome::Accepted(p)
            | SubmitOutcome::Completed(p)
            | SubmitOutcome::Duplicate(p) => Some(*p),
            _ => None,
        }
    }
}

/// Reassembles one logical table from its physical sections.
pub struct TableCollector<S: TableSection> {
    check_crc: bool,
    timeout: Duration,
    state: CollectorState,
    /// Version of the sections in `seen`.
    version: Option<u8>,
    last_section_number: u8,
    seen: BTreeSet<u8>,
    table: Option<S>,
    deadline: Instant,
}

impl<S: TableSection> TableCollector<S> {
    /// Create a collector. Creation counts as progress for the timeout.
    pub fn new(check_crc: bool, timeout: Duration) -> Self {
        Self {
            check_crc,
            timeout,
            state: CollectorState::Collecting,
            version: None,
            last_section_number: 0,
            seen: BTreeSet::new(),
            table: None,
            deadline: Instant::now() + timeout,
        }
    }

    /// Create a collector for a subscription.
    pub fn from_spec(spec: &TableSpec) -> Self {
        Self::new(spec.check_crc, spec.timeout)
    }

    /// Submit a raw section received now.
    pub fn submit(&mut self, data: &[u8]) -> SubmitOutcome {
        self.submit_at(data, Instant::now())
    }

    /// Submit a raw section received at `now`.
    pub fn submit_at(&mut self, data: &[u8], now: Instant) -> SubmitOutcome {
        if self.state != CollectorState::Collecting {
            return SubmitOutcome::Ignored;
        }

        let header = match SectionHeader::parse(data) {
            Ok(header) => header,
            Err(e) => {
                debug!("{} table: discarding section: {}", S::NAME, e);
                return SubmitOutcome::Rejected(e);
            }
        };

        if header.table_id != S::TABLE_ID {
            return SubmitOutcome::Rejected(DecodeError::UnknownTableId(header.table_id));
        }

        let same_version = self.version == Some(header.version_number);
        if same_version && self.seen.contains(&header.section_number) {
            trace!(
                "{} table: duplicate section {} (version {})",
                S::NAME,
                header.section_number,
                header.version_number
            );
            return SubmitOutcome::Duplicate(self.progress());
        }

        if let Some(current) = self.version {
            if !same_version && !is_newer_version(header.version_number, current) {
                trace!(
                    "{} table: ignoring stale section {} (version {}, collecting {})",
                    S::NAME,
                    header.section_number,
                    header.version_number,
                    current
                );
                return SubmitOutcome::Stale;
            }
        }

        // Decode before touching state so that a corrupted section of a new
        // version cannot discard the current one.
        let section = match self.decode(data) {
            Ok(section) => section,
            Err(e) => {
                debug!(
                    "{} table: discarding section {}: {}",
                    S::NAME, header.section_number, e
                );
                return SubmitOutcome::Rejected(e);
            }
        };

        if !same_version {
            if let Some(old) = self.version {
                info!(
                    "{} table: version changed {} -> {}, restarting collection",
                    S::NAME, old, header.version_number
                );
            }
            self.version = Some(header.version_number);
            self.seen.clear();
            self.table = None;
        }

        self.last_section_number = header.last_section_number;
        self.seen.insert(header.section_number);
        match self.table.as_mut() {
            Some(table) => table.merge(section),
            None => self.table = Some(section),
        }
        self.deadline = now + self.timeout;

        let progress = self.progress();
        debug!(
            "{} table: section {} accepted ({}/{})",
            S::NAME, header.section_number, progress.seen, progress.expected
        );

        if progress.seen == progress.expected {
            self.state = CollectorState::Ready;
            info!("{} table: complete ({} sections)", S::NAME, progress.expected);
            SubmitOutcome::Completed(progress)
        } else {
            SubmitOutcome::Accepted(progress)
        }
    }

    /// Time out if no progress was made before `now`.
    ///
    /// Returns true if the collector transitioned to `TimedOut`.
    pub fn poll_timeout(&mut self, now: Instant) -> bool {
        if self.state == CollectorState::Collecting && now >= self.deadline {
            self.time_out();
            true
        } else {
            false
        }
    }

    /// Stop collecting immediately, keeping what was received.
    ///
    /// Returns true if the collector transitioned to `TimedOut`.
    pub fn force_timeout(&mut self) -> bool {
        if self.state == CollectorState::Collecting {
            self.time_out();
            true
        } else {
            false
        }
    }

    fn time_out(&mut self) {
        self.state = CollectorState::TimedOut;
        let progress = self.progress();
        warn!(
            "{} table: timed out with {}/{} sections",
            S::NAME, progress.seen, progress.expected
        );
    }

    fn decode(&self, data: &[u8]) -> Result<S, DecodeError> {
        if self.check_crc {
            S::decode_with(data, &Mpeg2Crc)
        } else {
            S::decode_with(data, &SkipChecksum)
        }
    }

    /// Current state.
    pub fn state(&self) -> CollectorState {
        self.state
    }

    /// Returns true once the collector is ready or timed out.
    pub fn is_finished(&self) -> bool {
        self.state != CollectorState::Collecting
    }

    /// Deadline of the current wait, while collecting.
    pub fn deadline(&self) -> Option<Instant> {
        (self.state == CollectorState::Collecting).then_some(self.deadline)
    }

    /// Received and declared section counts of the current version.
    ///
    /// Nothing is declared until the first section has been accepted.
    pub fn progress(&self) -> Progress {
        if self.version.is_none() {
            return Progress::default();
        }
        Progress {
            seen: self.seen.range(..=self.last_section_number).count(),
            expected: self.last_section_number as usize + 1,
        }
    }

    /// Version of the table being collected.
    pub fn version(&self) -> Option<u8> {
        self.version
    }

    /// Merged table received so far.
    pub fn table(&self) -> Option<&S> {
        self.table.as_ref()
    }

    /// Take the merged table.
    pub fn into_table(self) -> Option<S> {
        self.table
    }

    /// Timeout error describing a timed out collector.
    pub fn timeout_error(&self) -> Option<ScanError> {
        if self.state != CollectorState::TimedOut {
            return None;
        }
        let progress = self.progress();
        Some(ScanError::CollectorTimeout {
            table_id: S::TABLE_ID,
            seen: progress.seen,
            expected: progress.expected,
        })
    }
}

/// Returns true if `incoming` is ahead of `current` on the 5-bit version wheel.
fn is_newer_version(incoming: u8, current: u8) -> bool {
    matches!(incoming.wrapping_sub(current) & 0x1F, 1..=15)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fastscan_protocol::encode::{encode_network_section, encode_services_section, SectionParams};
    use fastscan_protocol::{FastScanService, ServiceDescriptor, TransportStream};

    fn service(sid: u16) -> FastScanService {
        FastScanService {
            original_network_id: 1,
            transport_stream_id: 2,
            service_id: sid,
            default_video_pid: 0x100,
            default_audio_pid: 0x101,
            default_video_ecm_pid: 0x1FFF,
            default_audio_ecm_pid: 0x1FFF,
            default_pcr_pid: 0x100,
            service_descriptor: Some(ServiceDescriptor {
                service_type: 0x01,
                provider_name: "P".to_string(),
                service_name: format!("S{}", sid),
            }),
        }
    }

    fn services_section(version: u8, number: u8, last: u8, sids: &[u16]) -> Vec<u8> {
        let services: Vec<_> = sids.iter().map(|&sid| service(sid)).collect();
        encode_services_section(&SectionParams::new(0x0100, version, number, last), &services)
            .to_vec()
    }

    fn collector() -> TableCollector<ServicesSection> {
        TableCollector::new(true, DEFAULT_TABLE_TIMEOUT)
    }

    #[test]
    fn test_ready_once_regardless_of_order() {
        let mut collector = collector();

        let first = collector.submit(&services_section(0, 2, 2, &[3]));
        assert_eq!(first, SubmitOutcome::Accepted(Progress { seen: 1, expected: 3 }));
        let second = collector.submit(&services_section(0, 0, 2, &[1]));
        assert_eq!(second, SubmitOutcome::Accepted(Progress { seen: 2, expected: 3 }));
        assert_eq!(collector.state(), CollectorState::Collecting);

        let third = collector.submit(&services_section(0, 1, 2, &[2]));
        assert_eq!(third, SubmitOutcome::Completed(Progress { seen: 3, expected: 3 }));
        assert_eq!(collector.state(), CollectorState::Ready);

        // Frozen after completion
        assert_eq!(collector.submit(&services_section(0, 1, 2, &[2])), SubmitOutcome::Ignored);
        assert!(collector.deadline().is_none());

        // Merged in arrival order
        let sids: Vec<_> = collector
            .table()
            .unwrap()
            .services
            .iter()
            .map(|s| s.service_id)
            .collect();
        assert_eq!(sids, vec![3, 1, 2]);
    }

    #[test]
    fn test_duplicate_does_not_change_progress() {
        let mut collector = collector();
        collector.submit(&services_section(0, 0, 1, &[1]));

        let outcome = collector.submit(&services_section(0, 0, 1, &[1]));
        assert_eq!(outcome, SubmitOutcome::Duplicate(Progress { seen: 1, expected: 2 }));
        assert_eq!(outcome.progress(), Some(Progress { seen: 1, expected: 2 }));
        assert_eq!(collector.table().unwrap().services.len(), 1);
    }

    #[test]
    fn test_corrupted_section_rejected() {
        let mut collector = collector();
        let mut data = services_section(0, 0, 1, &[1]);
        let last = data.len() - 1;
        data[last] ^= 0xFF;

        assert!(matches!(
            collector.submit(&data),
            SubmitOutcome::Rejected(DecodeError::ChecksumInvalid { .. })
        ));
        assert_eq!(collector.progress(), Progress::default());
        assert!(collector.table().is_none());

        // The intact copy is still accepted as new
        assert!(matches!(
            collector.submit(&services_section(0, 0, 1, &[1])),
            SubmitOutcome::Accepted(_)
        ));
    }

    #[test]
    fn test_crc_check_disabled() {
        let mut collector: TableCollector<ServicesSection> =
            TableCollector::new(false, DEFAULT_TABLE_TIMEOUT);
        let mut data = services_section(0, 0, 0, &[1]);
        let last = data.len() - 1;
        data[last] ^= 0xFF;

        assert!(matches!(collector.submit(&data), SubmitOutcome::Completed(_)));
    }

    #[test]
    fn test_wrong_table_id_rejected() {
        let mut collector = collector();
        let data = encode_network_section(
            &SectionParams::new(0x0100, 0, 0, 0),
            "Net",
            &[TransportStream::default()],
        );

        assert_eq!(
            collector.submit(&data),
            SubmitOutcome::Rejected(DecodeError::UnknownTableId(table_id::NETWORK))
        );
        assert_eq!(collector.state(), CollectorState::Collecting);
    }

    #[test]
    fn test_version_change_resets() {
        let mut collector = collector();
        collector.submit(&services_section(0, 0, 2, &[1]));
        collector.submit(&services_section(0, 1, 2, &[2]));
        assert_eq!(collector.progress().seen, 2);

        let outcome = collector.submit(&services_section(1, 1, 1, &[20]));
        assert_eq!(outcome, SubmitOutcome::Accepted(Progress { seen: 1, expected: 2 }));
        assert_eq!(collector.version(), Some(1));

        let table = collector.table().unwrap();
        assert_eq!(table.services.len(), 1);
        assert_eq!(table.services[0].service_id, 20);

        assert!(matches!(
            collector.submit(&services_section(1, 0, 1, &[10])),
            SubmitOutcome::Completed(_)
        ));
    }

    #[test]
    fn test_late_old_version_section_ignored() {
        let mut collector = collector();
        collector.submit(&services_section(1, 0, 1, &[10]));

        assert_eq!(collector.submit(&services_section(0, 0, 1, &[1])), SubmitOutcome::Stale);
        assert_eq!(collector.version(), Some(1));
        assert_eq!(collector.progress(), Progress { seen: 1, expected: 2 });

        assert_eq!(
            collector.submit(&services_section(1, 1, 1, &[11])),
            SubmitOutcome::Completed(Progress { seen: 2, expected: 2 })
        );
        let sids: Vec<_> = collector
            .table()
            .unwrap()
            .services
            .iter()
            .map(|s| s.service_id)
            .collect();
        assert_eq!(sids, vec![10, 11]);
    }

    #[test]
    fn test_version_wraps_around() {
        assert!(is_newer_version(0, 31));
        assert!(is_newer_version(5, 4));
        assert!(!is_newer_version(31, 0));
        assert!(!is_newer_version(4, 5));
        assert!(!is_newer_version(7, 7));

        let mut collector = collector();
        collector.submit(&services_section(31, 0, 1, &[1]));
        assert!(matches!(
            collector.submit(&services_section(0, 0, 1, &[2])),
            SubmitOutcome::Accepted(_)
        ));
        assert_eq!(collector.version(), Some(0));
    }

    #[test]
    fn test_corrupted_new_version_keeps_state() {
        let mut collector = collector();
        collector.submit(&services_section(0, 0, 1, &[1]));

        let mut data = services_section(1, 1, 1, &[2]);
        data[10] ^= 0x55;
        assert!(matches!(collector.submit(&data), SubmitOutcome::Rejected(_)));
        assert_eq!(collector.version(), Some(0));
        assert_eq!(collector.progress(), Progress { seen: 1, expected: 2 });
    }

    #[test]
    fn test_duplicate_key_across_sections_first_wins() {
        let mut collector = collector();
        collector.submit(&services_section(0, 0, 1, &[1, 2]));
        collector.submit(&services_section(0, 1, 1, &[2, 3]));

        let sids: Vec<_> = collector
            .table()
            .unwrap()
            .services
            .iter()
            .map(|s| s.service_id)
            .collect();
        assert_eq!(sids, vec![1, 2, 3]);
    }

    #[test]
    fn test_network_merge() {
        let mut collector: TableCollector<NetworkSection> =
            TableCollector::new(true, DEFAULT_TABLE_TIMEOUT);
        let ts = |tsid| TransportStream {
            transport_stream_id: tsid,
            original_network_id: 1,
            ..Default::default()
        };

        collector.submit(&encode_network_section(&SectionParams::new(1, 0, 0, 1), "", &[ts(1)]));
        collector.submit(&encode_network_section(
            &SectionParams::new(1, 0, 1, 1),
            "Operator",
            &[ts(1), ts(2)],
        ));

        let table = collector.into_table().unwrap();
        assert_eq!(table.network_name, "Operator");
        assert_eq!(table.transport_streams.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_from_last_progress() {
        let mut collector = collector();
        tokio::time::advance(Duration::from_millis(4000)).await;
        collector.submit(&services_section(0, 0, 2, &[1]));

        tokio::time::advance(Duration::from_millis(4000)).await;
        assert!(!collector.poll_timeout(Instant::now()));

        // Duplicates do not extend the wait
        collector.submit(&services_section(0, 0, 2, &[1]));
        tokio::time::advance(Duration::from_millis(1000)).await;
        assert!(collector.poll_timeout(Instant::now()));

        assert_eq!(collector.state(), CollectorState::TimedOut);
        assert_eq!(collector.table().unwrap().services.len(), 1);
        assert!(matches!(
            collector.timeout_error(),
            Some(ScanError::CollectorTimeout {
                table_id: 0xBD,
                seen: 1,
                expected: 3,
            })
        ));
        assert_eq!(collector.submit(&services_section(0, 1, 2, &[2])), SubmitOutcome::Ignored);
    }

    #[test]
    fn test_force_timeout() {
        let mut collector = collector();
        assert!(collector.force_timeout());
        assert!(!collector.force_timeout());
        assert!(collector.is_finished());
        assert!(collector.table().is_none());
    }
}
