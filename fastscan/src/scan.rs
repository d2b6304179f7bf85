//! Fast Scan orchestration.
//!
//! A scan acquires a frontend, collects the network and services tables from
//! a section source, builds the channel list once both tables are finished,
//! and hands the bouquets to a sink.
//!
//! # States
//!
//! ```text
//! Idle -> WaitingNetworkAndServices -> Translating -> Done
//!                                  \              \-> Failed
//!                                   \-> Cancelled
//! ```
//!
//! Progress and completion are reported on an unbounded channel. At most
//! one `Completed` event is sent, and none after cancellation.

use std::sync::Arc;
use std::time::Duration;

use fastscan_protocol::{table_id, NetworkSection, ServicesSection};
use futures::StreamExt;
use log::{debug, error, info, warn};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};

use crate::channel_list::{build_channel_list, Bouquet, BuildOptions, ChannelList};
use crate::collector::{CollectorState, TableCollector, DEFAULT_TABLE_TIMEOUT};
use crate::error::{Result, ScanError};
use crate::frontend::{FrontendGuard, FrontendPool};
use crate::sink::BouquetSink;
use crate::source::{SectionStream, TableSpec, DEFAULT_FASTSCAN_PID};

/// Scan configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanOptions {
    /// Frontend to acquire.
    pub frontend: u32,
    /// PID carrying both tables.
    pub pid: u16,
    /// Verify section CRCs.
    pub check_crc: bool,
    /// Time to wait for the next new section of a table.
    pub table_timeout: Duration,
    /// Channel list options.
    pub build: BuildOptions,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            frontend: 0,
            pid: DEFAULT_FASTSCAN_PID,
            check_crc: true,
            table_timeout: DEFAULT_TABLE_TIMEOUT,
            build: BuildOptions::default(),
        }
    }
}

impl ScanOptions {
    fn table_spec(&self, table: u8) -> TableSpec {
        TableSpec {
            pid: self.pid,
            table_id: table,
            check_crc: self.check_crc,
            timeout: self.table_timeout,
        }
    }

    /// Subscription for the network table.
    pub fn network_spec(&self) -> TableSpec {
        self.table_spec(table_id::NETWORK)
    }

    /// Subscription for the services table.
    pub fn services_spec(&self) -> TableSpec {
        self.table_spec(table_id::SERVICES)
    }
}

/// Where the scan reads its sections from.
pub enum ScanSource {
    /// The acquired frontend's section feed.
    Live,
    /// A pre-recorded section stream.
    Replay(SectionStream),
}

/// Scan state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    Idle,
    WaitingNetworkAndServices,
    Translating,
    Done,
    Failed,
    Cancelled,
}

impl ScanState {
    /// Returns true for states the scan never leaves.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ScanState::Done | ScanState::Failed | ScanState::Cancelled)
    }
}

/// Final scan status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanStatus {
    /// Both tables complete.
    Success,
    /// At least one table timed out; the channel list is partial.
    Partial,
    /// A table ended without a single decoded section.
    NoData,
    /// The frontend could not be acquired.
    ResourceUnavailable,
    /// The bouquet sink rejected the result.
    SinkFailed,
}

impl ScanStatus {
    /// Numeric status code (0 = success).
    pub fn code(&self) -> i32 {
        match self {
            ScanStatus::Success => 0,
            ScanStatus::Partial => 1,
            ScanStatus::NoData => 2,
            ScanStatus::ResourceUnavailable => 3,
            ScanStatus::SinkFailed => 4,
        }
    }

    pub fn is_success(&self) -> bool {
        *self == ScanStatus::Success
    }
}

/// Events observed by the scan's invoker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanEvent {
    /// Sections received against sections declared, across both tables.
    Progress { done: usize, total: usize },
    /// The scan finished.
    Completed { status: ScanStatus },
}

/// Outcome of a scan task.
#[derive(Debug, Clone)]
pub struct ScanReport {
    pub state: ScanState,
    /// `None` if the scan was cancelled.
    pub status: Option<ScanStatus>,
    pub channel_list: Option<ChannelList>,
}

impl ScanReport {
    fn cancelled() -> Self {
        Self {
            state: ScanState::Cancelled,
            status: None,
            channel_list: None,
        }
    }
}

/// Handle to a running scan.
pub struct ScanHandle {
    cancel_tx: mpsc::Sender<()>,
    events: mpsc::UnboundedReceiver<ScanEvent>,
    task: JoinHandle<ScanReport>,
}

impl ScanHandle {
    /// Stop the scan before it handles any further section.
    ///
    /// Dropping the handle has the same effect.
    pub fn cancel(&self) {
        let _ = self.cancel_tx.try_send(());
    }

    /// Scan events.
    pub fn events(&mut self) -> &mut mpsc::UnboundedReceiver<ScanEvent> {
        &mut self.events
    }

    /// Wait for the scan to finish.
    pub async fn join(self) -> ScanReport {
        let ScanHandle {
            cancel_tx: _cancel_tx,
            events: _events,
            task,
        } = self;

        match task.await {
            Ok(report) => report,
            Err(e) => {
                error!("Fast scan task failed: {}", e);
                ScanReport::cancelled()
            }
        }
    }
}

/// Spawn a scan.
pub fn spawn_scan(
    pool: Arc<FrontendPool>,
    options: ScanOptions,
    source: ScanSource,
    sink: Box<dyn BouquetSink>,
) -> ScanHandle {
    let (cancel_tx, cancel_rx) = mpsc::channel(1);
    let (events_tx, events_rx) = mpsc::unbounded_channel();

    let task = tokio::spawn(async move {
        let frontend = match pool.acquire(options.frontend).await {
            Ok(frontend) => frontend,
            Err(e) => {
                error!("Fast scan aborted: {}", e);
                let status = ScanStatus::ResourceUnavailable;
                let _ = events_tx.send(ScanEvent::Completed { status });
                return ScanReport {
                    state: ScanState::Failed,
                    status: Some(status),
                    channel_list: None,
                };
            }
        };

        let sections = match source {
            ScanSource::Live => frontend
                .subscribe(vec![options.network_spec(), options.services_spec()])
                .into_stream(),
            ScanSource::Replay(stream) => stream,
        };

        FastScan::new(options, frontend, events_tx, sink)
            .run(sections, cancel_rx)
            .await
    });

    ScanHandle {
        cancel_tx,
        events: events_rx,
        task,
    }
}

/// One scan in progress.
struct FastScan {
    options: ScanOptions,
    state: ScanState,
    network: TableCollector<NetworkSection>,
    services: TableCollector<ServicesSection>,
    frontend: Option<FrontendGuard>,
    events: mpsc::UnboundedSender<ScanEvent>,
    /// Taken when the bouquets are handed over.
    sink: Option<Box<dyn BouquetSink>>,
}

impl FastScan {
    fn new(
        options: ScanOptions,
        frontend: FrontendGuard,
        events: mpsc::UnboundedSender<ScanEvent>,
        sink: Box<dyn BouquetSink>,
    ) -> Self {
        Self {
            network: TableCollector::from_spec(&options.network_spec()),
            services: TableCollector::from_spec(&options.services_spec()),
            options,
            state: ScanState::Idle,
            frontend: Some(frontend),
            events,
            sink: Some(sink),
        }
    }

    async fn run(
        mut self,
        mut sections: SectionStream,
        mut cancel_rx: mpsc::Receiver<()>,
    ) -> ScanReport {
        info!(
            "Fast scan started: frontend={}, pid={}, provider={}",
            self.options.frontend, self.options.pid, self.options.build.provider
        );
        self.set_state(ScanState::WaitingNetworkAndServices);

        while !(self.network.is_finished() && self.services.is_finished()) {
            let deadline = [self.network.deadline(), self.services.deadline()]
                .into_iter()
                .flatten()
                .min()
                .unwrap_or_else(Instant::now);

            tokio::select! {
                biased;

                _ = cancel_rx.recv() => {
                    return self.cancel();
                }
                section = sections.next() => match section {
                    Some(Ok(data)) => self.handle_section(&data),
                    Some(Err(e)) => {
                        warn!("Section source failed: {}", e);
                        self.end_of_source();
                    }
                    None => self.end_of_source(),
                },
                _ = sleep_until(deadline) => {
                    let now = Instant::now();
                    self.network.poll_timeout(now);
                    self.services.poll_timeout(now);
                }
            }
        }

        self.translate().await
    }

    fn handle_section(&mut self, data: &[u8]) {
        let outcome = match data.first().copied() {
            Some(table_id::NETWORK) => self.network.submit(data),
            Some(table_id::SERVICES) => self.services.submit(data),
            other => {
                debug!("Ignoring section with table id {:02X?}", other);
                return;
            }
        };

        if outcome.progress().is_some() {
            let network = self.network.progress();
            let services = self.services.progress();
            let _ = self.events.send(ScanEvent::Progress {
                done: network.seen + services.seen,
                total: network.expected + services.expected,
            });
        }
    }

    fn end_of_source(&mut self) {
        info!("Section source ended");
        self.network.force_timeout();
        self.services.force_timeout();
    }

    async fn translate(mut self) -> ScanReport {
        self.set_state(ScanState::Translating);

        for err in [self.network.timeout_error(), self.services.timeout_error()]
            .into_iter()
            .flatten()
        {
            warn!("{}", err);
        }

        let channel_list = match (self.network.table(), self.services.table()) {
            (Some(network), Some(services)) => {
                Some(build_channel_list(network, services, &self.options.build))
            }
            _ => None,
        };

        let Some(channel_list) = channel_list else {
            warn!(
                "No data: network table {}, services table {}",
                describe(&self.network),
                describe(&self.services)
            );
            return self.complete(ScanState::Failed, ScanStatus::NoData, None);
        };

        let stored = match self.sink.take() {
            Some(sink) => store_bouquets(sink, channel_list.bouquets.clone()).await,
            None => Ok(()),
        };
        if let Err(e) = stored {
            error!("Bouquet sink failed: {}", e);
            return self.complete(ScanState::Failed, ScanStatus::SinkFailed, Some(channel_list));
        }

        let partial = self.network.state() == CollectorState::TimedOut
            || self.services.state() == CollectorState::TimedOut;
        let status = if partial {
            ScanStatus::Partial
        } else {
            ScanStatus::Success
        };
        self.complete(ScanState::Done, status, Some(channel_list))
    }

    fn complete(
        &mut self,
        state: ScanState,
        status: ScanStatus,
        channel_list: Option<ChannelList>,
    ) -> ScanReport {
        self.set_state(state);
        self.release_frontend();
        info!("Fast scan finished with status {}", status.code());
        let _ = self.events.send(ScanEvent::Completed { status });

        ScanReport {
            state,
            status: Some(status),
            channel_list,
        }
    }

    fn cancel(&mut self) -> ScanReport {
        info!("Fast scan cancelled");
        self.set_state(ScanState::Cancelled);
        self.release_frontend();
        ScanReport::cancelled()
    }

    fn release_frontend(&mut self) {
        if let Some(frontend) = self.frontend.take() {
            info!("Releasing frontend {}", frontend.id());
        }
    }

    fn set_state(&mut self, state: ScanState) {
        info!("Fast scan state {:?} -> {:?}", self.state, state);
        self.state = state;
    }
}

/// Hand every bouquet to the sink on the blocking pool, since sinks may do
/// file I/O.
async fn store_bouquets(mut sink: Box<dyn BouquetSink>, bouquets: Vec<Bouquet>) -> Result<()> {
    tokio::task::spawn_blocking(move || {
        bouquets.iter().try_for_each(|bouquet| {
            sink.store(bouquet).map_err(|e| {
                error!("Failed to store bouquet {}: {}", bouquet.file_name, e);
                e
            })
        })
    })
    .await
    .map_err(|e| ScanError::Sink(e.to_string()))?
}

fn describe<S: crate::collector::TableSection>(collector: &TableCollector<S>) -> &'static str {
    match (collector.state(), collector.table().is_some()) {
        (_, false) => "empty",
        (CollectorState::TimedOut, true) => "partial",
        _ => "complete",
    }
}
