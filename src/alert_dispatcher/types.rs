//! Alert dispatcher types

use crate::graph::GeoLocation;
use crate::source_registry::{SourceEntry, SourceId};
use serde::Serialize;

/// One outbound notification, snapshotted from a source entry
///
/// Workers never see the live entry; everything they need is copied here.
#[derive(Debug, Clone, PartialEq)]
pub struct AlertTask {
    pub source_id: SourceId,
    pub display_name: String,
    pub class_id: i32,
    pub location: GeoLocation,
}

impl AlertTask {
    pub fn from_entry(entry: &SourceEntry, class_id: i32) -> Self {
        Self {
            source_id: entry.source_id,
            display_name: entry.display_name.clone(),
            class_id,
            location: entry.location,
        }
    }

    pub fn payload(&self) -> AlertPayload<'_> {
        AlertPayload {
            camera: &self.display_name,
            class: self.class_id,
            lat: self.location.latitude,
            lon: self.location.longitude,
        }
    }
}

/// Wire body of an alert notification
#[derive(Debug, Serialize)]
pub struct AlertPayload<'a> {
    pub camera: &'a str,
    pub class: i32,
    pub lat: f64,
    pub lon: f64,
}

/// Delivery counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatcherStats {
    pub submitted: u64,
    pub delivered: u64,
    pub failed: u64,
}
