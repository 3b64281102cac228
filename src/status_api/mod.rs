//! StatusApi - Read-only Fleet Endpoints
//!
//! ## Responsibilities
//!
//! - `GET /api/health`: liveness and headline counters
//! - `GET /api/sources`: active sources
//! - `GET /api/sources/{id}`: one source by its stable id
//!
//! Served from the latest published `FleetSnapshot`; handlers never touch
//! the supervisor itself.

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tower_http::trace::TraceLayer;

use crate::error::{Error, Result};
use crate::state::{SnapshotReceiver, SourceSummary};

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub running: bool,
    pub sources: usize,
    pub reconnects: u64,
    pub removals: u64,
    pub alerts_submitted: u64,
}

pub fn create_router(snapshots: SnapshotReceiver) -> Router {
    Router::new()
        .route("/api/health", get(health_check))
        .route("/api/sources", get(list_sources))
        .route("/api/sources/{id}", get(get_source))
        .layer(TraceLayer::new_for_http())
        .with_state(snapshots)
}

async fn health_check(State(snapshots): State<SnapshotReceiver>) -> impl IntoResponse {
    let snapshot = snapshots.borrow().clone();

    Json(HealthResponse {
        status: if snapshot.running { "ok" } else { "stopped" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        running: snapshot.running,
        sources: snapshot.sources.len(),
        reconnects: snapshot.reconnects,
        removals: snapshot.removals,
        alerts_submitted: snapshot.alerts_submitted,
    })
}

async fn list_sources(State(snapshots): State<SnapshotReceiver>) -> Json<Vec<SourceSummary>> {
    Json(snapshots.borrow().sources.clone())
}

async fn get_source(
    State(snapshots): State<SnapshotReceiver>,
    Path(id): Path<String>,
) -> Result<Json<SourceSummary>> {
    snapshots
        .borrow()
        .sources
        .iter()
        .find(|s| s.source_id == id)
        .cloned()
        .map(Json)
        .ok_or_else(|| Error::NotFound(format!("source {}", id)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::FleetSnapshot;
    use tokio::sync::watch;

    fn summary(id: &str) -> SourceSummary {
        SourceSummary {
            source_id: id.to_string(),
            record_id: 1,
            name: "yard".to_string(),
            uri: "rtsp://yard/live".to_string(),
            mux_slot: 0,
            retry_count: 2,
            latitude: 1.0,
            longitude: 2.0,
        }
    }

    #[tokio::test]
    async fn test_handlers_read_latest_snapshot() {
        let (tx, rx) = watch::channel(FleetSnapshot::default());
        tx.send_replace(FleetSnapshot {
            sources: vec![summary("abc")],
            reconnects: 2,
            running: true,
            ..Default::default()
        });

        let Json(sources) = list_sources(State(rx.clone())).await;
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].retry_count, 2);

        let Json(found) = get_source(State(rx.clone()), Path("abc".to_string())).await.unwrap();
        assert_eq!(found.name, "yard");

        let missing = get_source(State(rx), Path("nope".to_string())).await;
        assert!(matches!(missing, Err(Error::NotFound(_))));
    }

    #[test]
    fn test_router_builds() {
        let (_tx, rx) = watch::channel(FleetSnapshot::default());
        let _router = create_router(rx);
    }
}
