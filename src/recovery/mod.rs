//! RecoveryProtocol - Reconnect / Remove
//!
//! ## Responsibilities
//!
//! - Choose reconnect or remove for a failed source against the retry ceiling
//! - Queue the structural graph work for the next turn of the run loop
//! - Execute queued work: replace the ingress, or release the whole source
//!
//! ## Ordering
//!
//! Failure handling only touches registry state and flushes the egress pad.
//! Anything that rebuilds or destroys elements is queued as `Deferred` and
//! runs strictly after the handler that queued it has returned.

use crate::failure_router::FailureRouter;
use crate::graph::{ElementId, GraphEngine, IngressConfig};
use crate::pipeline::CoreGraph;
use crate::source_bin::{release_source_bin, replace_ingress};
use crate::source_registry::{SourceEntry, SourceId, SourceRegistry};
use std::collections::VecDeque;

/// Structural work queued for the run loop
#[derive(Debug)]
pub enum Deferred {
    Reconnect(SourceId),
    /// The entry is already out of the registry; the op owns it
    Remove(SourceEntry),
}

/// Decision taken for a failed source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    Reconnect { retry: u32 },
    Remove,
}

/// Result of executing one deferred op
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeferredOutcome {
    Reconnected {
        source_id: SourceId,
        ingress: ElementId,
    },
    Removed {
        source_id: SourceId,
        teardown_failures: usize,
    },
    /// Replacement could not be built; the source was removed instead
    Escalated {
        source_id: SourceId,
        teardown_failures: usize,
    },
    /// Source vanished before the op ran
    Skipped(SourceId),
}

pub struct RecoveryProtocol {
    max_retries: u32,
    ingress: IngressConfig,
    pending: VecDeque<Deferred>,
}

impl RecoveryProtocol {
    pub fn new(max_retries: u32, ingress: IngressConfig) -> Self {
        Self {
            max_retries,
            ingress,
            pending: VecDeque::new(),
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Handle a matched failure for `source_id`
    ///
    /// Below the ceiling the retry count is bumped, the egress is flushed and
    /// a reconnect is queued. At the ceiling the entry leaves the registry
    /// here, so no later signal can match it, and its teardown is queued.
    pub fn on_failure(
        &mut self,
        registry: &mut SourceRegistry,
        router: &mut FailureRouter,
        engine: &mut dyn GraphEngine,
        source_id: SourceId,
    ) -> Option<RecoveryAction> {
        let entry = registry.get_mut(source_id)?;

        if entry.retry_count < self.max_retries {
            entry.retry_count += 1;
            let retry = entry.retry_count;

            if let Err(e) = engine.flush(entry.bin.egress) {
                tracing::warn!(source = %entry.display_name, error = %e, "Egress flush failed");
            }

            tracing::info!(
                source = %entry.display_name,
                retry = retry,
                max_retries = self.max_retries,
                "Scheduling reconnect"
            );
            self.pending.push_back(Deferred::Reconnect(source_id));
            return Some(RecoveryAction::Reconnect { retry });
        }

        let entry = registry.remove(source_id)?;
        router.retire(entry.ingress);
        tracing::warn!(
            source = %entry.display_name,
            retry = entry.retry_count,
            slot = entry.mux_slot,
            "Retry budget exhausted, removing source"
        );
        self.pending.push_back(Deferred::Remove(entry));
        Some(RecoveryAction::Remove)
    }

    /// Run every queued op, including ops queued while draining
    pub fn drain(
        &mut self,
        registry: &mut SourceRegistry,
        router: &mut FailureRouter,
        engine: &mut dyn GraphEngine,
        core: &CoreGraph,
    ) -> Vec<DeferredOutcome> {
        let mut outcomes = Vec::new();
        while let Some(op) = self.pending.pop_front() {
            let outcome = match op {
                Deferred::Reconnect(source_id) => self.reconnect(registry, router, engine, core, source_id),
                Deferred::Remove(entry) => {
                    let source_id = entry.source_id;
                    let teardown_failures = release(engine, core, entry);
                    DeferredOutcome::Removed {
                        source_id,
                        teardown_failures,
                    }
                }
            };
            outcomes.push(outcome);
        }
        outcomes
    }

    fn reconnect(
        &self,
        registry: &mut SourceRegistry,
        router: &mut FailureRouter,
        engine: &mut dyn GraphEngine,
        core: &CoreGraph,
        source_id: SourceId,
    ) -> DeferredOutcome {
        let Some(entry) = registry.get_mut(source_id) else {
            return DeferredOutcome::Skipped(source_id);
        };

        let old = entry.ingress;
        let config = self.ingress.for_uri(&entry.uri);
        let result = replace_ingress(engine, &entry.bin, old, &config);
        router.retire(old);

        match result {
            Ok(ingress) => {
                entry.ingress = ingress;
                tracing::info!(
                    source = %entry.display_name,
                    retry = entry.retry_count,
                    old = %old,
                    new = %ingress,
                    "Ingress replaced"
                );
                DeferredOutcome::Reconnected { source_id, ingress }
            }
            Err(e) => {
                tracing::error!(
                    source = %entry.display_name,
                    error = %e,
                    "Replacement ingress could not be built, removing source"
                );
                match registry.remove(source_id) {
                    Some(entry) => DeferredOutcome::Escalated {
                        source_id,
                        teardown_failures: release(engine, core, entry),
                    },
                    None => DeferredOutcome::Skipped(source_id),
                }
            }
        }
    }
}

/// Release a source that is already out of the registry
pub fn release(engine: &mut dyn GraphEngine, core: &CoreGraph, entry: SourceEntry) -> usize {
    let failures = release_source_bin(engine, core.pipeline, core.mux, &entry.bin, entry.mux_pad);
    tracing::info!(
        source = %entry.display_name,
        slot = entry.mux_slot,
        teardown_failures = failures,
        "Source released"
    );
    failures
}
