//! Graph - processing graph engine interface
//!
//! ## Responsibilities
//!
//! - Element/pad primitives the supervisor drives (construct, destroy, link,
//!   unlink, set-state, flush)
//! - Bus signal and buffer probe types delivered to the event-dispatch loop
//!
//! The engine itself (decode, batching, inference) is external. The
//! supervisor only relies on an ingress element with a configurable URI, a
//! fixed depayloader downstream of it, and a shared mux with per-source
//! request slots.

pub mod memory;
mod types;

pub use types::*;

/// Graph primitive failure
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GraphError {
    #[error("failed to create {kind} element '{name}'")]
    Construction { kind: &'static str, name: String },

    #[error("unknown element {0}")]
    UnknownElement(ElementId),

    #[error("unknown pad {0}")]
    UnknownPad(PadId),

    #[error("element {element} has no pad named '{name}'")]
    NoSuchPad { element: ElementId, name: String },

    #[error("failed to link {src} -> {sink}")]
    LinkFailed { src: String, sink: String },

    #[error("element {child} is not a child of {parent}")]
    NotChild { parent: ElementId, child: ElementId },

    #[error("element {element} could not change state to {state}")]
    StateChange {
        element: ElementId,
        state: ElementState,
    },
}

/// Graph primitive result
pub type GraphResult<T> = std::result::Result<T, GraphError>;

/// Primitives of the external graph engine
///
/// All calls are made from the single event-dispatch task. Structural
/// mutation of live sub-graphs is never issued from inside signal handling;
/// the supervisor defers it to the next turn of its loop.
pub trait GraphEngine: Send {
    /// Construct a new, parentless element
    fn create_element(&mut self, kind: ElementKind, name: &str) -> GraphResult<ElementId>;

    /// Human-readable element name, if the element still exists
    fn element_name(&self, element: ElementId) -> Option<String>;

    /// Add `child` to the bin/pipeline `parent`
    fn add_to(&mut self, parent: ElementId, child: ElementId) -> GraphResult<()>;

    /// Detach `child` from `parent`
    fn remove_from(&mut self, parent: ElementId, child: ElementId) -> GraphResult<()>;

    /// Release an element and everything it contains
    fn destroy(&mut self, element: ElementId) -> GraphResult<()>;

    /// Static link `src` element output to `sink` element input
    fn link_elements(&mut self, src: ElementId, sink: ElementId) -> GraphResult<()>;

    /// Look up an always-present pad
    fn static_pad(&self, element: ElementId, name: &str) -> GraphResult<PadId>;

    /// Expose `target` on `bin` under `name`
    fn add_ghost_pad(&mut self, bin: ElementId, name: &str, target: PadId) -> GraphResult<PadId>;

    /// Request a named attachment slot (e.g. `sink_0` on the mux)
    fn request_pad(&mut self, element: ElementId, name: &str) -> GraphResult<PadId>;

    /// Hand a requested slot back to its element
    fn release_request_pad(&mut self, element: ElementId, pad: PadId) -> GraphResult<()>;

    fn link_pads(&mut self, src: PadId, sink: PadId) -> GraphResult<()>;

    /// Unlink `src` from `sink`. Returns `Ok(false)` when they were not
    /// linked to each other; that case is a no-op, not a failure.
    fn unlink_pads(&mut self, src: PadId, sink: PadId) -> GraphResult<bool>;

    /// Current peer of `pad`
    fn peer(&self, pad: PadId) -> Option<PadId>;

    fn set_state(&mut self, element: ElementId, state: ElementState) -> GraphResult<()>;

    /// Bring `element` to the state of its parent
    fn sync_state_with_parent(&mut self, element: ElementId) -> GraphResult<()>;

    /// Flush-start followed by flush-stop on `pad`, discarding buffered data
    fn flush(&mut self, pad: PadId) -> GraphResult<()>;

    /// Route pad-added/pad-removed announcements of `ingress` onto the bus
    fn watch_pads(&mut self, ingress: ElementId) -> GraphResult<()>;

    /// Install buffer probes on the mux output and on the sink input
    fn install_probes(&mut self, mux_src: PadId, sink_input: PadId) -> GraphResult<()>;
}
