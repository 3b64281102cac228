//! Source inventory data types

use crate::graph::GeoLocation;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Operational status of an inventory record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceStatus {
    Up,
    Down,
    Maintenance,
}

impl From<&str> for SourceStatus {
    /// Anything unrecognised is treated as down
    fn from(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "up" => Self::Up,
            "maintenance" => Self::Maintenance,
            _ => Self::Down,
        }
    }
}

/// One inventory record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRecord {
    pub id: i64,
    pub name: String,
    pub uri: String,
    pub status: SourceStatus,
    pub latitude: f64,
    pub longitude: f64,
}

impl SourceRecord {
    pub fn location(&self) -> GeoLocation {
        GeoLocation {
            latitude: self.latitude,
            longitude: self.longitude,
        }
    }

    pub fn is_up(&self) -> bool {
        self.status == SourceStatus::Up
    }
}

/// Raw row as stored (status kept as VARCHAR)
#[derive(Debug, Clone, FromRow)]
pub(crate) struct SourceRow {
    pub id: i64,
    pub name: String,
    pub uri: String,
    pub status: String,
    pub latitude: f64,
    pub longitude: f64,
}

impl From<SourceRow> for SourceRecord {
    fn from(row: SourceRow) -> Self {
        Self {
            status: SourceStatus::from(row.status.as_str()),
            id: row.id,
            name: row.name,
            uri: row.uri,
            latitude: row.latitude,
            longitude: row.longitude,
        }
    }
}
