//! Inventory repository
//!
//! Database access layer for the source inventory

use super::types::{SourceRecord, SourceRow};
use super::SourceInventory;
use crate::error::Result;
use sqlx::MySqlPool;

/// MySQL-backed source inventory
#[derive(Clone)]
pub struct InventoryRepository {
    pool: MySqlPool,
}

impl InventoryRepository {
    /// Create new repository
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }

    /// Get all source records in id order
    pub async fn get_all_sources(&self) -> Result<Vec<SourceRecord>> {
        let rows = sqlx::query_as::<_, SourceRow>(
            r#"
            SELECT CAST(id AS SIGNED) AS id, name, uri, status,
                   CAST(latitude AS DOUBLE) AS latitude,
                   CAST(longitude AS DOUBLE) AS longitude
            FROM cameras
            ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(SourceRecord::from).collect())
    }
}

#[async_trait::async_trait]
impl SourceInventory for InventoryRepository {
    async fn load_sources(&self) -> Result<Vec<SourceRecord>> {
        self.get_all_sources().await
    }
}
