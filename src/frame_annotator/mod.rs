//! Frame annotator
//!
//! Attaches the geolocation of the originating source to every frame of a
//! mux-output batch. Frames from a slot that no longer resolves (the source
//! was removed while the batch was in flight) pass through unchanged.

use crate::graph::FrameBatch;
use crate::source_registry::SourceRegistry;

/// Annotate `batch` in place; returns the number of frames annotated
pub fn annotate(registry: &SourceRegistry, batch: &mut FrameBatch) -> usize {
    let mut annotated = 0;
    for frame in batch.frames.iter_mut() {
        match registry.resolve_slot(frame.source_index) {
            Some(entry) => {
                frame.location = Some(entry.location);
                annotated += 1;
            }
            None => {
                tracing::trace!(slot = frame.source_index, "Frame from unresolved slot left as is");
            }
        }
    }
    annotated
}
