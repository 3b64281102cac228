//! FailureRouter - Bus Signal Classification
//!
//! ## Responsibilities
//!
//! - Correlate error/warning signals to a source by ingress identity
//! - Decide between recovery, abort and ignore for each signal
//! - Route pad announcements and buffer probes to their handlers
//!
//! ## Routing table
//!
//! | Signal | Origin | Decision |
//! |---|---|---|
//! | Error / Warning | current ingress of a source | `Recover` |
//! | Error | ingress retired by a reconnect or removal | `Stale` |
//! | Error | anything else | `Abort` |
//! | Warning | retired or unknown | `Ignore` |
//! | PadAdded / PadRemoved | current ingress | `LinkPad` / `UnlinkPad` |
//! | StateChanged / EndOfStream | any | `Log` |
//!
//! The router only reads the registry. Acting on a decision is up to the
//! supervisor.

use crate::graph::{ElementId, GraphSignal, PadId};
use crate::source_registry::{SourceId, SourceRegistry};
use std::collections::HashSet;

/// Signal severity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Error => f.write_str("error"),
            Severity::Warning => f.write_str("warning"),
        }
    }
}

/// What the supervisor should do with a signal
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteDecision {
    /// Source-scoped failure; run the recovery protocol
    Recover { source_id: SourceId, severity: Severity },
    /// Late error from an ingress element this process already replaced
    Stale,
    /// Systemic error; stop the run loop
    Abort { origin: String, message: String },
    Ignore,
    LinkPad { source_id: SourceId, pad: PadId },
    UnlinkPad { source_id: SourceId, pad: PadId },
    /// Mux-output probe
    Annotate,
    /// Inference-output probe
    Detect,
    Log,
}

/// Classifies bus signals against the registry
#[derive(Debug, Default)]
pub struct FailureRouter {
    /// Ingress identities replaced or removed during this run
    retired: HashSet<ElementId>,
}

impl FailureRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `element` no longer backs any source
    pub fn retire(&mut self, element: ElementId) {
        self.retired.insert(element);
    }

    pub fn is_retired(&self, element: ElementId) -> bool {
        self.retired.contains(&element)
    }

    pub fn route(&self, registry: &SourceRegistry, signal: &GraphSignal) -> RouteDecision {
        match signal {
            GraphSignal::Error {
                origin,
                origin_name,
                message,
                debug: debug_info,
            } => {
                if let Some(entry) = registry.lookup_by_identity(*origin) {
                    tracing::error!(
                        source = %entry.display_name,
                        element = %origin_name,
                        message = %message,
                        debug = ?debug_info,
                        retry = entry.retry_count,
                        "Source error"
                    );
                    return RouteDecision::Recover {
                        source_id: entry.source_id,
                        severity: Severity::Error,
                    };
                }
                if self.is_retired(*origin) {
                    tracing::debug!(element = %origin_name, message = %message, "Error from retired ingress ignored");
                    return RouteDecision::Stale;
                }
                tracing::error!(
                    element = %origin_name,
                    message = %message,
                    debug = ?debug_info,
                    "Ungrounded graph error"
                );
                RouteDecision::Abort {
                    origin: origin_name.clone(),
                    message: message.clone(),
                }
            }
            GraphSignal::Warning {
                origin,
                origin_name,
                message,
                ..
            } => match registry.lookup_by_identity(*origin) {
                Some(entry) => {
                    tracing::warn!(
                        source = %entry.display_name,
                        element = %origin_name,
                        message = %message,
                        retry = entry.retry_count,
                        "Source warning"
                    );
                    RouteDecision::Recover {
                        source_id: entry.source_id,
                        severity: Severity::Warning,
                    }
                }
                None => {
                    tracing::warn!(element = %origin_name, message = %message, "Unmatched graph warning ignored");
                    RouteDecision::Ignore
                }
            },
            GraphSignal::StateChanged {
                origin_name, old, new, ..
            } => {
                tracing::debug!(element = %origin_name, old = %old, new = %new, "State changed");
                RouteDecision::Log
            }
            GraphSignal::EndOfStream => {
                tracing::info!("End of stream received, continuing");
                RouteDecision::Log
            }
            GraphSignal::PadAdded { origin, pad } => match registry.lookup_by_identity(*origin) {
                Some(entry) => RouteDecision::LinkPad {
                    source_id: entry.source_id,
                    pad: *pad,
                },
                None => {
                    tracing::debug!(element = %origin, pad = %pad, "Pad added on unknown element");
                    RouteDecision::Ignore
                }
            },
            GraphSignal::PadRemoved { origin, pad } => match registry.lookup_by_identity(*origin) {
                Some(entry) => RouteDecision::UnlinkPad {
                    source_id: entry.source_id,
                    pad: *pad,
                },
                None => RouteDecision::Ignore,
            },
            GraphSignal::MuxOutput { .. } => RouteDecision::Annotate,
            GraphSignal::InferenceOutput { .. } => RouteDecision::Detect,
        }
    }
}
