//! SourceRegistry - Active Source Collection
//!
//! ## Responsibilities
//!
//! - Own every active `SourceEntry` in insertion order
//! - Correlate bus signals to entries by ingress identity
//! - Correlate frames to entries by mux slot
//!
//! ## Design Principles
//!
//! - Single owner: only the event-dispatch task mutates the registry, so
//!   there are no locks
//! - A removed source leaves no stale slot; its slot is never handed out again

mod types;

pub use types::*;

use crate::error::{Error, Result};
use crate::graph::ElementId;
use crate::state::SourceSummary;
use std::collections::HashMap;

/// Ordered collection of active sources
#[derive(Debug, Default)]
pub struct SourceRegistry {
    entries: Vec<SourceEntry>,
    /// mux slot -> source
    slots: HashMap<u32, SourceId>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SourceEntry> {
        self.entries.iter()
    }

    /// Append an entry; returns its positional index
    pub fn insert(&mut self, entry: SourceEntry) -> Result<usize> {
        if self.slots.contains_key(&entry.mux_slot) {
            return Err(Error::Internal(format!(
                "mux slot {} already bound",
                entry.mux_slot
            )));
        }
        self.slots.insert(entry.mux_slot, entry.source_id);
        self.entries.push(entry);
        Ok(self.entries.len() - 1)
    }

    pub fn get(&self, source_id: SourceId) -> Option<&SourceEntry> {
        self.entries.iter().find(|e| e.source_id == source_id)
    }

    pub fn get_mut(&mut self, source_id: SourceId) -> Option<&mut SourceEntry> {
        self.entries.iter_mut().find(|e| e.source_id == source_id)
    }

    /// Entry whose current ingress element is `element`; first match wins
    pub fn lookup_by_identity(&self, element: ElementId) -> Option<&SourceEntry> {
        self.entries.iter().find(|e| e.ingress == element)
    }

    /// Positional index; valid until the next removal
    pub fn index_of(&self, source_id: SourceId) -> Option<usize> {
        self.entries.iter().position(|e| e.source_id == source_id)
    }

    /// Entry attached to mux slot `slot`
    pub fn resolve_slot(&self, slot: u32) -> Option<&SourceEntry> {
        let source_id = self.slots.get(&slot)?;
        self.get(*source_id)
    }

    pub fn resolve_slot_mut(&mut self, slot: u32) -> Option<&mut SourceEntry> {
        let source_id = *self.slots.get(&slot)?;
        self.get_mut(source_id)
    }

    /// Detach an entry and hand ownership to the caller
    ///
    /// The slot mapping goes in the same call, so no later signal or frame
    /// can resolve to the removed source.
    pub fn remove(&mut self, source_id: SourceId) -> Option<SourceEntry> {
        let index = self.index_of(source_id)?;
        let entry = self.entries.remove(index);
        self.slots.remove(&entry.mux_slot);
        Some(entry)
    }

    /// Take every remaining entry (shutdown)
    pub fn drain(&mut self) -> Vec<SourceEntry> {
        self.slots.clear();
        std::mem::take(&mut self.entries)
    }

    pub fn summaries(&self) -> Vec<SourceSummary> {
        self.entries.iter().map(SourceEntry::summary).collect()
    }
}
