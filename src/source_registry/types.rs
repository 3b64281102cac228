//! Source registry data types

use crate::detection_windower::DetectionWindow;
use crate::graph::{ElementId, GeoLocation, PadId};
use crate::inventory::SourceRecord;
use crate::source_bin::SourceBin;
use crate::state::{redact_uri, SourceSummary};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Stable token minted when a source is instantiated
///
/// Unlike the ingress element identity, it survives reconnects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceId(Uuid);

impl SourceId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SourceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// One active ingest source
#[derive(Debug)]
pub struct SourceEntry {
    pub source_id: SourceId,
    /// Inventory record id
    pub record_id: i64,
    pub display_name: String,
    pub uri: String,
    /// Current ingress element; replaced on every reconnect
    pub ingress: ElementId,
    pub retry_count: u32,
    pub window: DetectionWindow,
    pub location: GeoLocation,
    /// Sub-graph handles owned by this entry until released
    pub bin: SourceBin,
    /// Mux attachment slot, also the frame correlation key
    pub mux_slot: u32,
    pub mux_pad: PadId,
}

impl SourceEntry {
    pub fn new(record: &SourceRecord, bin: SourceBin, ingress: ElementId, mux_slot: u32, mux_pad: PadId) -> Self {
        Self {
            source_id: SourceId::new(),
            record_id: record.id,
            display_name: record.name.clone(),
            uri: record.uri.clone(),
            ingress,
            retry_count: 0,
            window: DetectionWindow::default(),
            location: record.location(),
            bin,
            mux_slot,
            mux_pad,
        }
    }

    pub fn summary(&self) -> SourceSummary {
        SourceSummary {
            source_id: self.source_id.to_string(),
            record_id: self.record_id,
            name: self.display_name.clone(),
            uri: redact_uri(&self.uri),
            mux_slot: self.mux_slot,
            retry_count: self.retry_count,
            latitude: self.location.latitude,
            longitude: self.location.longitude,
        }
    }
}
