//! Channel list construction.
//!
//! Joins the services table against the transport streams of the network
//! table and produces numbered TV and radio bouquets for the provider.

use std::collections::HashMap;

use fastscan_protocol::{
    is_radio_service_type, FastScanService, NetworkSection, SatelliteDeliveryDescriptor,
    ServiceKey, ServicesSection, TransportStream,
};
use log::{debug, info};
use serde::Serialize;

/// Options controlling the channel list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOptions {
    /// Provider label attached to every bouquet.
    pub provider: String,
    /// Bouquet name used for the bouquet file names.
    pub bouquet: String,
    /// Number channels with their broadcast logical channel numbers.
    pub original_numbering: bool,
    /// Mark service name/type as fixed for the downstream store.
    pub fixed_service_info: bool,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            provider: "FastScan".to_string(),
            bouquet: "fastscan".to_string(),
            original_numbering: false,
            fixed_service_info: false,
        }
    }
}

/// Satellite tuning parameters of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TuningParameters {
    pub frequency_khz: u32,
    pub symbol_rate: u32,
    /// Orbital position in tenths of a degree.
    pub orbital_position: u16,
    pub east: bool,
    pub polarization: u8,
    pub roll_off: u8,
    pub modulation_system: u8,
    pub modulation: u8,
    pub fec_inner: u8,
}

impl From<&SatelliteDeliveryDescriptor> for TuningParameters {
    fn from(desc: &SatelliteDeliveryDescriptor) -> Self {
        Self {
            frequency_khz: desc.frequency_khz(),
            symbol_rate: desc.symbol_rate_sps(),
            orbital_position: desc.orbital_position,
            east: desc.west_east_flag,
            polarization: desc.polarization,
            roll_off: desc.roll_off,
            modulation_system: desc.modulation_system,
            modulation: desc.modulation_type,
            fec_inner: desc.fec_inner,
        }
    }
}

/// Default PIDs passed through from the services table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ServicePids {
    pub video: u16,
    pub audio: u16,
    pub video_ecm: u16,
    pub audio_ecm: u16,
    pub pcr: u16,
}

impl From<&FastScanService> for ServicePids {
    fn from(service: &FastScanService) -> Self {
        Self {
            video: service.default_video_pid,
            audio: service.default_audio_pid,
            video_ecm: service.default_video_ecm_pid,
            audio_ecm: service.default_audio_ecm_pid,
            pcr: service.default_pcr_pid,
        }
    }
}

/// One channel of a bouquet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelEntry {
    pub key: ServiceKey,
    pub service_name: String,
    pub provider_name: String,
    pub service_type: u8,
    /// Assigned display number.
    pub number: u16,
    /// Visible flag from the logical channel descriptor.
    pub visible: bool,
    pub tuning: TuningParameters,
    pub pids: ServicePids,
    pub fixed_service_info: bool,
}

impl ChannelEntry {
    /// Returns true for radio services.
    pub fn is_radio(&self) -> bool {
        is_radio_service_type(self.service_type)
    }
}

/// Bouquet kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BouquetKind {
    Tv,
    Radio,
}

impl BouquetKind {
    /// File name extension of the bouquet.
    pub fn extension(&self) -> &'static str {
        match self {
            BouquetKind::Tv => "tv",
            BouquetKind::Radio => "radio",
        }
    }
}

/// An ordered, numbered collection of channels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Bouquet {
    /// Provider label.
    pub provider: String,
    /// Target file/collection name.
    pub file_name: String,
    pub kind: BouquetKind,
    pub entries: Vec<ChannelEntry>,
}

impl Bouquet {
    fn new(options: &BuildOptions, kind: BouquetKind) -> Self {
        Self {
            provider: options.provider.clone(),
            file_name: format!("userbouquet.{}.{}", options.bouquet, kind.extension()),
            kind,
            entries: Vec::new(),
        }
    }
}

/// Result of translating a scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelList {
    /// Network name of the operator.
    pub network_name: String,
    /// TV bouquet followed by the radio bouquet.
    pub bouquets: Vec<Bouquet>,
}

impl ChannelList {
    /// Bouquet of the given kind.
    pub fn bouquet(&self, kind: BouquetKind) -> Option<&Bouquet> {
        self.bouquets.iter().find(|b| b.kind == kind)
    }

    /// Every entry, TV first.
    pub fn entries(&self) -> impl Iterator<Item = &ChannelEntry> {
        self.bouquets.iter().flat_map(|b| b.entries.iter())
    }

    /// Total number of channels.
    pub fn len(&self) -> usize {
        self.bouquets.iter().map(|b| b.entries.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Build the channel list from the completed tables.
///
/// Transport streams are visited in network table order and services in the
/// order of each service list. Services missing from the services table and
/// transport streams without delivery parameters are skipped.
pub fn build_channel_list(
    network: &NetworkSection,
    services: &ServicesSection,
    options: &BuildOptions,
) -> ChannelList {
    let by_key: HashMap<ServiceKey, &FastScanService> =
        services.services.iter().map(|s| (s.key(), s)).collect();

    let mut tv = Bouquet::new(options, BouquetKind::Tv);
    let mut radio = Bouquet::new(options, BouquetKind::Radio);

    for ts in &network.transport_streams {
        let Some(delivery) = ts.delivery.as_ref() else {
            debug!(
                "Skipping transport stream {:04x}:{:04x} without delivery descriptor",
                ts.original_network_id, ts.transport_stream_id
            );
            continue;
        };
        let tuning = TuningParameters::from(delivery);

        for item in &ts.service_list {
            let key = ServiceKey::new(ts.original_network_id, ts.transport_stream_id, item.service_id);
            let Some(service) = by_key.get(&key) else {
                debug!("Service {} not in services table, skipping", key);
                continue;
            };

            let service_type = service.service_type().unwrap_or(item.service_type);
            let bouquet = if is_radio_service_type(service_type) {
                &mut radio
            } else {
                &mut tv
            };

            let entry = channel_entry(ts, service, service_type, tuning, bouquet.entries.len(), options);
            bouquet.entries.push(entry);
        }
    }

    info!(
        "Channel list for {}: {} TV, {} radio",
        options.provider,
        tv.entries.len(),
        radio.entries.len()
    );

    ChannelList {
        network_name: network.network_name.clone(),
        bouquets: vec![tv, radio],
    }
}

fn channel_entry(
    ts: &TransportStream,
    service: &FastScanService,
    service_type: u8,
    tuning: TuningParameters,
    position: usize,
    options: &BuildOptions,
) -> ChannelEntry {
    let lcn = ts.logical_channel(service.service_id);
    let sequential = (position + 1) as u16;

    let number = if options.original_numbering {
        lcn.map(|l| l.logical_channel_number).unwrap_or(sequential)
    } else {
        sequential
    };

    ChannelEntry {
        key: service.key(),
        service_name: service.service_name().unwrap_or_default().to_string(),
        provider_name: service.provider_name().unwrap_or_default().to_string(),
        service_type,
        number,
        visible: lcn.map(|l| l.visible).unwrap_or(true),
        tuning,
        pids: ServicePids::from(service),
        fixed_service_info: options.fixed_service_info,
    }
}
