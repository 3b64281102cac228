//! Inventory - Source Inventory Provider
//!
//! ## Responsibilities
//!
//! - Load the ordered list of source records at startup
//! - Select the records that should be instantiated (`status = up`)
//!
//! Failure to load the inventory is fatal to startup.

mod repository;
mod types;

pub use repository::InventoryRepository;
pub use types::*;

use crate::error::{Error, Result};

/// Query interface over the source inventory
#[async_trait::async_trait]
pub trait SourceInventory: Send + Sync {
    /// All records, in inventory order
    async fn load_sources(&self) -> Result<Vec<SourceRecord>>;
}

/// Fixed in-memory inventory
#[derive(Debug, Clone, Default)]
pub struct StaticInventory {
    records: Vec<SourceRecord>,
}

impl StaticInventory {
    pub fn new(records: Vec<SourceRecord>) -> Self {
        Self { records }
    }
}

#[async_trait::async_trait]
impl SourceInventory for StaticInventory {
    async fn load_sources(&self) -> Result<Vec<SourceRecord>> {
        Ok(self.records.clone())
    }
}

/// Load the inventory and keep only records that are up
pub async fn load_active_sources(inventory: &dyn SourceInventory) -> Result<Vec<SourceRecord>> {
    let records = inventory
        .load_sources()
        .await
        .map_err(|e| Error::Inventory(e.to_string()))?;
    let total = records.len();

    let active: Vec<SourceRecord> = records
        .into_iter()
        .filter(|record| {
            if !record.is_up() {
                tracing::info!(
                    record_id = record.id,
                    name = %record.name,
                    status = ?record.status,
                    "Skipping source not marked up"
                );
            }
            record.is_up()
        })
        .collect();

    tracing::info!(total = total, active = active.len(), "Source inventory loaded");

    Ok(active)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: i64, name: &str, status: SourceStatus) -> SourceRecord {
        SourceRecord {
            id,
            name: name.to_string(),
            uri: format!("rtsp://10.0.0.{}/stream", id),
            status,
            latitude: 6.9,
            longitude: 79.8,
        }
    }

    struct FailingInventory;

    #[async_trait::async_trait]
    impl SourceInventory for FailingInventory {
        async fn load_sources(&self) -> Result<Vec<SourceRecord>> {
            Err(Error::Internal("connection refused".to_string()))
        }
    }

    #[test]
    fn test_status_parsing() {
        assert_eq!(SourceStatus::from("up"), SourceStatus::Up);
        assert_eq!(SourceStatus::from("UP "), SourceStatus::Up);
        assert_eq!(SourceStatus::from("maintenance"), SourceStatus::Maintenance);
        assert_eq!(SourceStatus::from("down"), SourceStatus::Down);
        assert_eq!(SourceStatus::from("retired"), SourceStatus::Down);
    }

    #[tokio::test]
    async fn test_only_up_records_are_active() {
        let inventory = StaticInventory::new(vec![
            record(1, "gate", SourceStatus::Up),
            record(2, "river", SourceStatus::Maintenance),
            record(3, "field", SourceStatus::Down),
            record(4, "road", SourceStatus::Up),
        ]);

        let active = load_active_sources(&inventory).await.unwrap();
        let ids: Vec<i64> = active.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![1, 4]);
    }

    #[tokio::test]
    async fn test_load_failure_is_inventory_error() {
        let result = load_active_sources(&FailingInventory).await;
        assert!(matches!(result, Err(Error::Inventory(_))));
    }
}
