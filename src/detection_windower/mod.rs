//! DetectionWindower - One-Shot-Per-Window Alert Gate
//!
//! ## Responsibilities
//!
//! - Keep a fixed-length detection window per source
//! - Count target-class detections inside the current window
//! - Emit exactly one alert task per source per window
//!
//! The gate has no refill: once a window has fired, further detections in
//! it are counted but never alerted.

use crate::alert_dispatcher::{AlertHandle, AlertTask};
use crate::graph::FrameBatch;
use crate::source_registry::SourceRegistry;
use serde::Serialize;

/// Per-source window state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DetectionWindow {
    /// Open time; `None` until the first batch for the source
    pub start_ms: Option<u64>,
    pub count: u32,
}

impl DetectionWindow {
    /// Open a fresh window if none is open or the current one expired
    pub fn roll(&mut self, now_ms: u64, window_ms: u64) {
        let expired = match self.start_ms {
            None => true,
            Some(start) => now_ms.saturating_sub(start) >= window_ms,
        };
        if expired {
            self.start_ms = Some(now_ms);
            self.count = 0;
        }
    }

    /// Count one detection; true when it is the first in this window
    pub fn record(&mut self) -> bool {
        self.count = self.count.saturating_add(1);
        self.count == 1
    }
}

/// Windowed detection counter feeding the alert dispatcher
pub struct DetectionWindower {
    window_ms: u64,
    target_class_id: i32,
    alerts: AlertHandle,
}

impl DetectionWindower {
    pub fn new(window_ms: u64, target_class_id: i32, alerts: AlertHandle) -> Self {
        Self {
            window_ms,
            target_class_id,
            alerts,
        }
    }

    /// Compute the alert tasks an inference batch triggers at `now_ms`
    ///
    /// Frames whose slot no longer resolves are skipped.
    pub fn evaluate(&self, registry: &mut SourceRegistry, batch: &FrameBatch, now_ms: u64) -> Vec<AlertTask> {
        let mut tasks = Vec::new();

        for frame in &batch.frames {
            let Some(entry) = registry.resolve_slot_mut(frame.source_index) else {
                continue;
            };

            entry.window.roll(now_ms, self.window_ms);

            for object in frame.objects.iter().filter(|o| o.class_id == self.target_class_id) {
                if entry.window.record() {
                    tracing::info!(
                        source = %entry.display_name,
                        class_id = object.class_id,
                        window_start_ms = ?entry.window.start_ms,
                        "Detection window opened, raising alert"
                    );
                    tasks.push(AlertTask::from_entry(entry, object.class_id));
                }
            }
        }

        tasks
    }

    /// Evaluate a batch and hand the resulting tasks to the dispatcher;
    /// returns the number accepted
    pub fn observe(&self, registry: &mut SourceRegistry, batch: &FrameBatch, now_ms: u64) -> usize {
        let mut accepted = 0;
        for task in self.evaluate(registry, batch, now_ms) {
            match self.alerts.submit(task) {
                Ok(()) => accepted += 1,
                Err(e) => {
                    tracing::warn!(error = %e, "Alert task rejected");
                }
            }
        }
        accepted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert_dispatcher::{AlertDispatcher, AlertTransport};
    use crate::error::Result;
    use crate::graph::{ElementId, FrameMeta, PadId};
    use crate::inventory::{SourceRecord, SourceStatus};
    use crate::source_bin::SourceBin;
    use crate::source_registry::SourceEntry;
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

    fn registry_with(slots: &[u32]) -> SourceRegistry {
        let mut registry = SourceRegistry::new();
        for &slot in slots {
            let record = SourceRecord {
                id: slot as i64,
                name: format!("cam-{}", slot),
                uri: format!("rtsp://cam-{}/live", slot),
                status: SourceStatus::Up,
                latitude: 1.0,
                longitude: 2.0,
            };
            let base = slot as u64 * 10;
            let bin = SourceBin {
                bin: ElementId(base + 1),
                depay: ElementId(base + 2),
                depay_sink: PadId(base + 3),
                egress: PadId(base + 4),
            };
            registry
                .insert(SourceEntry::new(&record, bin, ElementId(base + 5), slot, PadId(base + 6)))
                .unwrap();
        }
        registry
    }

    fn detections(slot: u32, classes: &[i32]) -> FrameBatch {
        FrameBatch::new(vec![FrameMeta::new(slot, 0).with_objects(classes)])
    }

    #[test]
    fn test_window_roll_and_record() {
        let mut window = DetectionWindow::default();
        window.roll(100, 60);
        assert_eq!(window.start_ms, Some(100));
        assert!(window.record());
        assert!(!window.record());

        window.roll(159, 60);
        assert_eq!(window.count, 2);

        window.roll(160, 60);
        assert_eq!(window.start_ms, Some(160));
        assert_eq!(window.count, 0);
    }

    #[tokio::test]
    async fn test_one_alert_per_window() {
        let dispatcher = AlertDispatcher::start(Arc::new(NullTransport), 1);
        let windower = DetectionWindower::new(60, 0, dispatcher.handle());
        let mut registry = registry_with(&[0]);

        let mut total = 0;
        for t in [0, 10, 70] {
            total += windower.evaluate(&mut registry, &detections(0, &[0]), t).len();
        }

        assert_eq!(total, 2);
        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn test_many_detections_in_one_batch_alert_once() {
        let dispatcher = AlertDispatcher::start(Arc::new(NullTransport), 1);
        let windower = DetectionWindower::new(60_000, 0, dispatcher.handle());
        let mut registry = registry_with(&[0]);

        let tasks = windower.evaluate(&mut registry, &detections(0, &[0, 0, 0, 2]), 1_000);

        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].display_name, "cam-0");
        assert_eq!(tasks[0].class_id, 0);
        assert_eq!(registry.resolve_slot(0).unwrap().window.count, 3);
        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn test_non_target_classes_ignored() {
        let dispatcher = AlertDispatcher::start(Arc::new(NullTransport), 1);
        let windower = DetectionWindower::new(60_000, 0, dispatcher.handle());
        let mut registry = registry_with(&[0]);

        let tasks = windower.evaluate(&mut registry, &detections(0, &[1, 2, 7]), 0);

        assert!(tasks.is_empty());
        let window = registry.resolve_slot(0).unwrap().window;
        assert_eq!(window.start_ms, Some(0));
        assert_eq!(window.count, 0);
        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn test_windows_are_per_source() {
        let dispatcher = AlertDispatcher::start(Arc::new(NullTransport), 1);
        let windower = DetectionWindower::new(60_000, 0, dispatcher.handle());
        let mut registry = registry_with(&[0, 1]);

        let batch = FrameBatch::new(vec![
            FrameMeta::new(0, 1).with_objects(&[0]),
            FrameMeta::new(1, 1).with_objects(&[0]),
            FrameMeta::new(9, 1).with_objects(&[0]),
        ]);
        let tasks = windower.evaluate(&mut registry, &batch, 0);

        let names: Vec<_> = tasks.iter().map(|t| t.display_name.as_str()).collect();
        assert_eq!(names, vec!["cam-0", "cam-1"]);
        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn test_observe_submits_to_dispatcher() {
        let dispatcher = AlertDispatcher::start(Arc::new(NullTransport), 2);
        let windower = DetectionWindower::new(60_000, 0, dispatcher.handle());
        let mut registry = registry_with(&[0]);

        assert_eq!(windower.observe(&mut registry, &detections(0, &[0]), 0), 1);
        assert_eq!(windower.observe(&mut registry, &detections(0, &[0]), 5), 0);

        let stats = dispatcher.shutdown().await;
        assert_eq!(stats.submitted, 1);
        assert_eq!(stats.delivered, 1);
    }
}
