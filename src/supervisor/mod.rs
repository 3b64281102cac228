//! Supervisor - Fleet Event-Dispatch Loop
//!
//! ## Responsibilities
//!
//! - Build the shared pipeline and one source bin per active record
//! - Serialize every bus signal through one task
//! - Apply recovery decisions and drain deferred graph work between signals
//! - Publish a fleet snapshot whenever sources or counters change
//! - Shut down in order: alerts drained, pipeline stopped, sources released
//!
//! ## Design Principles
//!
//! - Single owner: the supervisor owns the registry, the engine handle and
//!   the deferred queue; nothing else mutates them
//! - Deferred work runs after the handler that queued it, never inside it

use crate::alert_dispatcher::{AlertDispatcher, AlertHandle, DispatcherStats};
use crate::detection_windower::DetectionWindower;
use crate::error::{Error, Result};
use crate::failure_router::{FailureRouter, RouteDecision};
use crate::frame_annotator::annotate;
use crate::graph::{ElementState, GraphEngine, GraphSignal};
use crate::inventory::SourceRecord;
use crate::pipeline::CoreGraph;
use crate::recovery::{self, DeferredOutcome, RecoveryAction, RecoveryProtocol};
use crate::source_bin::{link_ingress_pad, unlink_ingress_pad};
use crate::source_registry::SourceRegistry;
use crate::state::{redact_uri, FleetSnapshot, SnapshotReceiver, SupervisorConfig};
use std::future::Future;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

/// Whether the run loop keeps going after a signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopControl {
    Continue,
    Stop,
}

/// Why the run loop ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// External shutdown request
    Shutdown,
    /// Ungrounded graph error
    Aborted { origin: String, message: String },
    /// Signal channel closed by the engine
    BusClosed,
}

/// Counters reported at shutdown
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    pub alerts: DispatcherStats,
    pub sources_released: usize,
    pub teardown_failures: usize,
}

pub struct Supervisor {
    engine: Box<dyn GraphEngine>,
    core: CoreGraph,
    registry: SourceRegistry,
    router: FailureRouter,
    recovery: RecoveryProtocol,
    windower: DetectionWindower,
    snapshot: watch::Sender<FleetSnapshot>,
    started: Instant,
    reconnects: u64,
    removals: u64,
    alerts_submitted: u64,
    abort: Option<RunOutcome>,
    /// Registry or counters changed since the last publish
    dirty: bool,
}

impl Supervisor {
    /// Build the graph for `records` and start it playing
    ///
    /// Records not marked up are skipped. A source whose bin cannot be
    /// built or attached is logged and skipped; failures of the shared
    /// pipeline are startup errors.
    pub fn bootstrap(
        mut engine: Box<dyn GraphEngine>,
        records: &[SourceRecord],
        config: &SupervisorConfig,
        alerts: AlertHandle,
    ) -> Result<Self> {
        let core = CoreGraph::build(engine.as_mut(), config)?;
        let mut registry = SourceRegistry::new();

        let mut slot = 0u32;
        for record in records {
            if !record.is_up() {
                tracing::debug!(source = %record.name, status = ?record.status, "Record not up, not instantiated");
                continue;
            }
            // slots are never reused during a run
            let this_slot = slot;
            slot += 1;

            match core.attach_source(engine.as_mut(), record, this_slot, config) {
                Ok(entry) => {
                    registry.insert(entry)?;
                }
                Err(e) => {
                    tracing::error!(source = %record.name, uri = %redact_uri(&record.uri), error = %e, "Failed to attach source, skipping");
                }
            }
        }

        core.set_state(engine.as_mut(), ElementState::Playing)
            .map_err(|e| Error::Startup(e.to_string()))?;

        tracing::info!(
            sources = registry.len(),
            max_retries = config.max_retries,
            window_ms = config.window_ms,
            target_class_id = config.target_class_id,
            "Supervisor started"
        );

        let (snapshot, _) = watch::channel(FleetSnapshot::default());
        let supervisor = Self {
            engine,
            core,
            registry,
            router: FailureRouter::new(),
            recovery: RecoveryProtocol::new(config.max_retries, config.ingress.clone()),
            windower: DetectionWindower::new(config.window_ms, config.target_class_id, alerts),
            snapshot,
            started: Instant::now(),
            reconnects: 0,
            removals: 0,
            alerts_submitted: 0,
            abort: None,
            dirty: false,
        };
        supervisor.publish(true);

        Ok(supervisor)
    }

    pub fn registry(&self) -> &SourceRegistry {
        &self.registry
    }

    pub fn core(&self) -> &CoreGraph {
        &self.core
    }

    pub fn subscribe(&self) -> SnapshotReceiver {
        self.snapshot.subscribe()
    }

    fn now_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    // ========================================
    // Signal handling
    // ========================================

    /// Handle one signal, then run the deferred work it queued
    pub fn process(&mut self, signal: GraphSignal) -> LoopControl {
        let now_ms = self.now_ms();
        self.process_at(signal, now_ms)
    }

    /// Like `process`, with an explicit clock reading for the windower
    pub fn process_at(&mut self, signal: GraphSignal, now_ms: u64) -> LoopControl {
        let control = self.handle(signal, now_ms);

        for outcome in self
            .recovery
            .drain(&mut self.registry, &mut self.router, self.engine.as_mut(), &self.core)
        {
            if let DeferredOutcome::Escalated { .. } = outcome {
                self.removals += 1;
            }
            self.dirty = true;
        }

        if self.dirty {
            self.publish(control == LoopControl::Continue);
            self.dirty = false;
        }
        control
    }

    fn handle(&mut self, signal: GraphSignal, now_ms: u64) -> LoopControl {
        if self.abort.is_some() {
            tracing::debug!(kind = signal.kind(), "Run loop already stopping, signal dropped");
            return LoopControl::Stop;
        }

        let decision = self.router.route(&self.registry, &signal);
        match decision {
            RouteDecision::Recover { source_id, .. } => {
                match self.recovery.on_failure(
                    &mut self.registry,
                    &mut self.router,
                    self.engine.as_mut(),
                    source_id,
                ) {
                    Some(RecoveryAction::Reconnect { .. }) => self.reconnects += 1,
                    Some(RecoveryAction::Remove) => self.removals += 1,
                    None => return LoopControl::Continue,
                }
                self.dirty = true;
            }
            RouteDecision::Abort { origin, message } => {
                tracing::error!(element = %origin, message = %message, "Stopping run loop");
                self.abort = Some(RunOutcome::Aborted { origin, message });
                self.dirty = true;
                return LoopControl::Stop;
            }
            RouteDecision::LinkPad { source_id, pad } => {
                if let Some(entry) = self.registry.get(source_id) {
                    match link_ingress_pad(self.engine.as_mut(), &entry.bin, pad) {
                        Ok(()) => tracing::debug!(source = %entry.display_name, pad = %pad, "Ingress pad linked"),
                        Err(e) => tracing::error!(source = %entry.display_name, error = %e, "Failed to link ingress pad"),
                    }
                }
            }
            RouteDecision::UnlinkPad { source_id, pad } => {
                if let Some(entry) = self.registry.get(source_id) {
                    match unlink_ingress_pad(self.engine.as_mut(), &entry.bin, pad) {
                        Ok(true) => tracing::debug!(source = %entry.display_name, pad = %pad, "Ingress pad unlinked"),
                        Ok(false) => {}
                        Err(e) => tracing::warn!(source = %entry.display_name, error = %e, "Failed to unlink ingress pad"),
                    }
                }
            }
            RouteDecision::Annotate => {
                if let GraphSignal::MuxOutput { mut batch, reply } = signal {
                    annotate(&self.registry, &mut batch);
                    if reply.send(batch).is_err() {
                        tracing::debug!("Mux probe no longer waiting for batch");
                    }
                }
            }
            RouteDecision::Detect => {
                if let GraphSignal::InferenceOutput { batch } = signal {
                    let accepted = self.windower.observe(&mut self.registry, &batch, now_ms);
                    if accepted > 0 {
                        self.alerts_submitted += accepted as u64;
                        self.dirty = true;
                    }
                }
            }
            RouteDecision::Stale | RouteDecision::Ignore | RouteDecision::Log => {}
        }

        LoopControl::Continue
    }

    fn publish(&self, running: bool) {
        self.snapshot.send_replace(FleetSnapshot {
            sources: self.registry.summaries(),
            reconnects: self.reconnects,
            removals: self.removals,
            alerts_submitted: self.alerts_submitted,
            running,
            updated_at: Some(chrono::Utc::now()),
        });
    }

    // ========================================
    // Run loop
    // ========================================

    /// Consume bus signals until shutdown is requested, the bus closes, or
    /// an ungrounded error stops the loop
    pub async fn run<F>(&mut self, bus: &mut mpsc::UnboundedReceiver<GraphSignal>, shutdown: F) -> RunOutcome
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("Shutdown requested");
                    return RunOutcome::Shutdown;
                }
                signal = bus.recv() => {
                    let Some(signal) = signal else {
                        tracing::warn!("Graph bus closed");
                        return RunOutcome::BusClosed;
                    };
                    if self.process(signal) == LoopControl::Stop {
                        return self.abort.clone().unwrap_or(RunOutcome::Shutdown);
                    }
                }
            }
        }
    }

    /// Drain alerts, stop the pipeline, then release every remaining source
    pub async fn shutdown(mut self, dispatcher: AlertDispatcher) -> ShutdownReport {
        let alerts = dispatcher.shutdown().await;

        if let Err(e) = self.core.set_state(self.engine.as_mut(), ElementState::Null) {
            tracing::warn!(error = %e, "Failed to stop pipeline");
        }

        // normally empty; the queue is drained after every signal
        self.recovery
            .drain(&mut self.registry, &mut self.router, self.engine.as_mut(), &self.core);

        let mut report = ShutdownReport {
            alerts,
            ..Default::default()
        };
        for entry in self.registry.drain() {
            report.teardown_failures += recovery::release(self.engine.as_mut(), &self.core, entry);
            report.sources_released += 1;
        }

        if let Err(e) = self.engine.destroy(self.core.pipeline) {
            tracing::warn!(error = %e, "Failed to release pipeline");
        }

        self.publish(false);

        tracing::info!(
            sources_released = report.sources_released,
            teardown_failures = report.teardown_failures,
            reconnects = self.reconnects,
            removals = self.removals,
            "Supervisor stopped"
        );

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert_dispatcher::{AlertTask, AlertTransport};
    use crate::graph::memory::MemoryGraph;
    use crate::graph::{FrameBatch, FrameMeta};
    use crate::inventory::SourceStatus;
    use std::sync::Arc;

    struct NullTransport;

    #[async_trait::async_trait]
    impl AlertTransport for NullTransport {
        async fn send(&self, _task: &AlertTask) -> Result<()> {
            Ok(())
        }

        fn channel_name(&self) -> &str {
            "null"
        }
    }

    fn record(id: i64, status: SourceStatus) -> SourceRecord {
        SourceRecord {
            id,
            name: format!("cam-{}", id),
            uri: format!("rtsp://10.1.0.{}/live", id),
            status,
            latitude: 10.0 + id as f64,
            longitude: 20.0,
        }
    }

    #[tokio::test]
    async fn test_bootstrap_skips_records_not_up() {
        let (graph, _rx) = MemoryGraph::new();
        let dispatcher = AlertDispatcher::start(Arc::new(NullTransport), 1);
        let records = vec![record(1, SourceStatus::Up), record(2, SourceStatus::Down)];

        let supervisor = Supervisor::bootstrap(
            Box::new(graph.clone()),
            &records,
            &SupervisorConfig::default(),
            dispatcher.handle(),
        )
        .unwrap();

        assert_eq!(supervisor.registry().len(), 1);
        assert_eq!(graph.state_of(supervisor.core().pipeline), Some(ElementState::Playing));
        let snapshot = supervisor.subscribe().borrow().clone();
        assert!(snapshot.running);
        assert_eq!(snapshot.sources.len(), 1);

        supervisor.shutdown(dispatcher).await;
    }

    #[tokio::test]
    async fn test_signals_after_abort_are_dropped() {
        let (graph, _rx) = MemoryGraph::new();
        let dispatcher = AlertDispatcher::start(Arc::new(NullTransport), 1);
        let mut supervisor = Supervisor::bootstrap(
            Box::new(graph.clone()),
            &[record(1, SourceStatus::Up)],
            &SupervisorConfig::default(),
            dispatcher.handle(),
        )
        .unwrap();

        let mux = supervisor.core().mux;
        let error = GraphSignal::Error {
            origin: mux,
            origin_name: "stream-muxer".to_string(),
            message: "internal data stream error".to_string(),
            debug: None,
        };
        assert_eq!(supervisor.process(error), LoopControl::Stop);

        let batch = FrameBatch::new(vec![FrameMeta::new(0, 1).with_objects(&[0])]);
        let detect = GraphSignal::InferenceOutput { batch };
        assert_eq!(supervisor.process(detect), LoopControl::Stop);
        assert_eq!(dispatcher.stats().submitted, 0);

        supervisor.shutdown(dispatcher).await;
    }

    #[tokio::test]
    async fn test_snapshot_published_only_on_change() {
        let (graph, _rx) = MemoryGraph::new();
        let dispatcher = AlertDispatcher::start(Arc::new(NullTransport), 1);
        let mut supervisor = Supervisor::bootstrap(
            Box::new(graph.clone()),
            &[record(1, SourceStatus::Up)],
            &SupervisorConfig::default(),
            dispatcher.handle(),
        )
        .unwrap();
        let mut snapshots = supervisor.subscribe();
        let _ = snapshots.borrow_and_update();

        let (reply, _batch) = tokio::sync::oneshot::channel();
        let frames = GraphSignal::MuxOutput {
            batch: FrameBatch::new(vec![FrameMeta::new(0, 1)]),
            reply,
        };
        supervisor.process(frames);
        supervisor.process(GraphSignal::EndOfStream);
        assert!(!snapshots.has_changed().unwrap());

        let ingress = supervisor.registry().iter().next().unwrap().ingress;
        supervisor.process(GraphSignal::Error {
            origin: ingress,
            origin_name: "cam-1-rtsp-source".to_string(),
            message: "Could not read from resource".to_string(),
            debug: None,
        });
        assert!(snapshots.has_changed().unwrap());
        assert_eq!(snapshots.borrow_and_update().reconnects, 1);

        supervisor.shutdown(dispatcher).await;
    }

    #[tokio::test]
    async fn test_shutdown_releases_everything() {
        let (graph, _rx) = MemoryGraph::new();
        let dispatcher = AlertDispatcher::start(Arc::new(NullTransport), 2);
        let supervisor = Supervisor::bootstrap(
            Box::new(graph.clone()),
            &[record(1, SourceStatus::Up), record(2, SourceStatus::Up)],
            &SupervisorConfig::default(),
            dispatcher.handle(),
        )
        .unwrap();
        let core = *supervisor.core();
        let snapshots = supervisor.subscribe();

        let report = supervisor.shutdown(dispatcher).await;

        assert_eq!(report.sources_released, 2);
        assert_eq!(report.teardown_failures, 0);
        assert!(!graph.exists(core.pipeline));
        assert!(!graph.exists(core.mux));
        assert!(!snapshots.borrow().running);
        assert!(snapshots.borrow().sources.is_empty());
    }
}
