//! Ingest Supervisor Library
//!
//! Supervises a fleet of live RTSP ingest sources feeding one shared
//! mux -> inference -> sink graph.
//!
//! ## Architecture
//!
//! 1. SourceRegistry - Active sources, identity and slot correlation
//! 2. FailureRouter - Classifies bus signals against the registry
//! 3. RecoveryProtocol - Bounded reconnect, removal at the retry ceiling
//! 4. DetectionWindower - One alert per source per detection window
//! 5. AlertDispatcher - Bounded worker pool for outbound alerts
//! 6. FrameAnnotator - Geolocation on frames leaving the mux
//! 7. Supervisor - Single event-dispatch loop tying the above together
//! 8. StatusApi - Read-only fleet snapshot over HTTP
//!
//! ## Design Principles
//!
//! - Single owner: all registry and graph mutation happens on one task
//! - Deferred structural work: graph rebuilds run after the signal handler
//! - Stable tokens: sources are keyed by id, not by element or position

pub mod alert_dispatcher;
pub mod detection_windower;
pub mod error;
pub mod failure_router;
pub mod frame_annotator;
pub mod graph;
pub mod inventory;
pub mod pipeline;
pub mod recovery;
pub mod source_bin;
pub mod source_registry;
pub mod state;
pub mod status_api;
pub mod supervisor;

pub use error::{Error, Result};
pub use state::AppConfig;
