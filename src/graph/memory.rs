//! In-memory graph engine
//!
//! Keeps element/pad topology and states in a shared table and posts bus
//! signals onto an unbounded channel. Used by the test suite and by dry
//! runs of the supervisor without a media stack. Cloning the handle shares
//! the same graph, so a test can keep one clone for inspection while the
//! supervisor owns another.

use super::{ElementId, ElementKind, ElementState, FrameBatch, GraphEngine, GraphError, GraphResult, GraphSignal, PadId};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{mpsc, oneshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PadDirection {
    Src,
    Sink,
}

#[derive(Debug)]
struct ElementNode {
    name: String,
    kind: ElementKind,
    parent: Option<ElementId>,
    children: Vec<ElementId>,
    state: ElementState,
    pads: Vec<PadId>,
    watched: bool,
    dynamic_pads: u32,
}

#[derive(Debug)]
struct PadNode {
    owner: ElementId,
    name: String,
    direction: PadDirection,
    peer: Option<PadId>,
    requested: bool,
}

#[derive(Debug, Default)]
struct MemoryState {
    next_id: u64,
    elements: HashMap<ElementId, ElementNode>,
    pads: HashMap<PadId, PadNode>,
    flushes: HashMap<PadId, u32>,
    probes: Option<(PadId, PadId)>,
    failing_kinds: HashSet<&'static str>,
}

impl MemoryState {
    fn mint(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn add_pad(&mut self, owner: ElementId, name: &str, direction: PadDirection, requested: bool) -> PadId {
        let pad = PadId(self.mint());
        self.pads.insert(
            pad,
            PadNode {
                owner,
                name: name.to_string(),
                direction,
                peer: None,
                requested,
            },
        );
        if let Some(node) = self.elements.get_mut(&owner) {
            node.pads.push(pad);
        }
        pad
    }

    fn drop_pad(&mut self, pad: PadId) {
        if let Some(node) = self.pads.remove(&pad) {
            if let Some(peer) = node.peer {
                if let Some(peer_node) = self.pads.get_mut(&peer) {
                    peer_node.peer = None;
                }
            }
            if let Some(owner) = self.elements.get_mut(&node.owner) {
                owner.pads.retain(|p| *p != pad);
            }
        }
    }

    fn set_state_recursive(&mut self, element: ElementId, state: ElementState) {
        let children = match self.elements.get_mut(&element) {
            Some(node) => {
                node.state = state;
                node.children.clone()
            }
            None => return,
        };
        for child in children {
            self.set_state_recursive(child, state);
        }
    }

    fn destroy_recursive(&mut self, element: ElementId) {
        let Some(node) = self.elements.remove(&element) else {
            return;
        };
        for pad in node.pads {
            // owner already gone; only the peer needs detaching
            if let Some(pad_node) = self.pads.remove(&pad) {
                if let Some(peer) = pad_node.peer {
                    if let Some(peer_node) = self.pads.get_mut(&peer) {
                        peer_node.peer = None;
                    }
                }
            }
        }
        for child in node.children {
            self.destroy_recursive(child);
        }
        if let Some(parent) = node.parent {
            if let Some(parent_node) = self.elements.get_mut(&parent) {
                parent_node.children.retain(|c| *c != element);
            }
        }
    }

    fn pad_label(&self, pad: PadId) -> String {
        match self.pads.get(&pad) {
            Some(node) => {
                let owner = self
                    .elements
                    .get(&node.owner)
                    .map(|e| e.name.as_str())
                    .unwrap_or("?");
                format!("{}:{}", owner, node.name)
            }
            None => pad.to_string(),
        }
    }
}

/// Shared handle to an in-memory graph
#[derive(Clone)]
pub struct MemoryGraph {
    state: Arc<Mutex<MemoryState>>,
    bus: mpsc::UnboundedSender<GraphSignal>,
}

impl MemoryGraph {
    /// Create an empty graph and the receiving end of its bus
    pub fn new() -> (Self, mpsc::UnboundedReceiver<GraphSignal>) {
        let (bus, rx) = mpsc::unbounded_channel();
        let graph = Self {
            state: Arc::new(Mutex::new(MemoryState::default())),
            bus,
        };
        (graph, rx)
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn post(&self, signal: GraphSignal) {
        if self.bus.send(signal).is_err() {
            tracing::debug!("Bus receiver dropped, signal discarded");
        }
    }

    // ========================================
    // Inspection
    // ========================================

    pub fn exists(&self, element: ElementId) -> bool {
        self.lock().elements.contains_key(&element)
    }

    pub fn pad_exists(&self, pad: PadId) -> bool {
        self.lock().pads.contains_key(&pad)
    }

    pub fn state_of(&self, element: ElementId) -> Option<ElementState> {
        self.lock().elements.get(&element).map(|e| e.state)
    }

    pub fn parent_of(&self, element: ElementId) -> Option<ElementId> {
        self.lock().elements.get(&element).and_then(|e| e.parent)
    }

    pub fn children_of(&self, element: ElementId) -> Vec<ElementId> {
        self.lock()
            .elements
            .get(&element)
            .map(|e| e.children.clone())
            .unwrap_or_default()
    }

    pub fn kind_of(&self, element: ElementId) -> Option<ElementKind> {
        self.lock().elements.get(&element).map(|e| e.kind.clone())
    }

    pub fn find_by_name(&self, name: &str) -> Option<ElementId> {
        self.lock()
            .elements
            .iter()
            .find(|(_, node)| node.name == name)
            .map(|(id, _)| *id)
    }

    pub fn is_watched(&self, element: ElementId) -> bool {
        self.lock()
            .elements
            .get(&element)
            .map(|e| e.watched)
            .unwrap_or(false)
    }

    pub fn flush_count(&self, pad: PadId) -> u32 {
        self.lock().flushes.get(&pad).copied().unwrap_or(0)
    }

    pub fn probes(&self) -> Option<(PadId, PadId)> {
        self.lock().probes
    }

    /// Names of the request pads currently held by `element`
    pub fn request_pads(&self, element: ElementId) -> Vec<String> {
        let state = self.lock();
        let Some(node) = state.elements.get(&element) else {
            return Vec::new();
        };
        node.pads
            .iter()
            .filter_map(|p| state.pads.get(p))
            .filter(|p| p.requested)
            .map(|p| p.name.clone())
            .collect()
    }

    /// Make every later construction of `label` elements fail
    pub fn fail_construction(&self, label: &'static str) {
        self.lock().failing_kinds.insert(label);
    }

    pub fn allow_construction(&self, label: &'static str) {
        self.lock().failing_kinds.remove(label);
    }

    // ========================================
    // Bus emulation
    // ========================================

    /// Give `ingress` a new output pad and announce it if watched
    pub fn announce_pad(&self, ingress: ElementId) -> Option<PadId> {
        let (pad, watched) = {
            let mut state = self.lock();
            let index = {
                let node = state.elements.get_mut(&ingress)?;
                node.dynamic_pads += 1;
                node.dynamic_pads
            };
            let watched = state.elements.get(&ingress).map(|e| e.watched).unwrap_or(false);
            let pad = state.add_pad(ingress, &format!("recv_rtp_src_{}", index), PadDirection::Src, false);
            (pad, watched)
        };
        if watched {
            self.post(GraphSignal::PadAdded { origin: ingress, pad });
        }
        Some(pad)
    }

    /// Announce withdrawal of `pad`; the pad itself stays until destroyed
    pub fn withdraw_pad(&self, ingress: ElementId, pad: PadId) {
        if self.is_watched(ingress) {
            self.post(GraphSignal::PadRemoved { origin: ingress, pad });
        }
    }

    pub fn post_error(&self, origin: ElementId, message: &str) {
        let origin_name = self.element_name(origin).unwrap_or_default();
        self.post(GraphSignal::Error {
            origin,
            origin_name,
            message: message.to_string(),
            debug: None,
        });
    }

    pub fn post_warning(&self, origin: ElementId, message: &str) {
        let origin_name = self.element_name(origin).unwrap_or_default();
        self.post(GraphSignal::Warning {
            origin,
            origin_name,
            message: message.to_string(),
            debug: None,
        });
    }

    pub fn post_eos(&self) {
        self.post(GraphSignal::EndOfStream);
    }

    /// Run a batch through the mux-output probe; resolves to the batch as
    /// it leaves the probe
    pub fn push_mux_batch(&self, batch: FrameBatch) -> oneshot::Receiver<FrameBatch> {
        let (reply, rx) = oneshot::channel();
        self.post(GraphSignal::MuxOutput { batch, reply });
        rx
    }

    pub fn push_inference_batch(&self, batch: FrameBatch) {
        self.post(GraphSignal::InferenceOutput { batch });
    }
}

impl GraphEngine for MemoryGraph {
    fn create_element(&mut self, kind: ElementKind, name: &str) -> GraphResult<ElementId> {
        let mut state = self.lock();
        let label = kind.label();
        if state.failing_kinds.contains(label) {
            return Err(GraphError::Construction {
                kind: label,
                name: name.to_string(),
            });
        }

        let (has_sink, has_src) = match kind {
            ElementKind::Pipeline | ElementKind::Bin | ElementKind::RtspSource(_) => (false, false),
            ElementKind::StreamMux(_) => (false, true),
            ElementKind::FakeSink => (true, false),
            ElementKind::RtpH264Depay
            | ElementKind::H264Parse
            | ElementKind::Decoder
            | ElementKind::Queue(_)
            | ElementKind::Infer(_) => (true, true),
        };

        let id = ElementId(state.mint());
        state.elements.insert(
            id,
            ElementNode {
                name: name.to_string(),
                kind,
                parent: None,
                children: Vec::new(),
                state: ElementState::Null,
                pads: Vec::new(),
                watched: false,
                dynamic_pads: 0,
            },
        );
        if has_sink {
            state.add_pad(id, "sink", PadDirection::Sink, false);
        }
        if has_src {
            state.add_pad(id, "src", PadDirection::Src, false);
        }
        Ok(id)
    }

    fn element_name(&self, element: ElementId) -> Option<String> {
        self.lock().elements.get(&element).map(|e| e.name.clone())
    }

    fn add_to(&mut self, parent: ElementId, child: ElementId) -> GraphResult<()> {
        let mut state = self.lock();
        if !state.elements.contains_key(&parent) {
            return Err(GraphError::UnknownElement(parent));
        }
        let node = state
            .elements
            .get_mut(&child)
            .ok_or(GraphError::UnknownElement(child))?;
        node.parent = Some(parent);
        if let Some(parent_node) = state.elements.get_mut(&parent) {
            parent_node.children.push(child);
        }
        Ok(())
    }

    fn remove_from(&mut self, parent: ElementId, child: ElementId) -> GraphResult<()> {
        let mut state = self.lock();
        let node = state
            .elements
            .get_mut(&child)
            .ok_or(GraphError::UnknownElement(child))?;
        if node.parent != Some(parent) {
            return Err(GraphError::NotChild { parent, child });
        }
        node.parent = None;
        if let Some(parent_node) = state.elements.get_mut(&parent) {
            parent_node.children.retain(|c| *c != child);
        }
        Ok(())
    }

    fn destroy(&mut self, element: ElementId) -> GraphResult<()> {
        let mut state = self.lock();
        if !state.elements.contains_key(&element) {
            return Err(GraphError::UnknownElement(element));
        }
        state.destroy_recursive(element);
        Ok(())
    }

    fn link_elements(&mut self, src: ElementId, sink: ElementId) -> GraphResult<()> {
        let src_pad = self.static_pad(src, "src")?;
        let sink_pad = self.static_pad(sink, "sink")?;
        self.link_pads(src_pad, sink_pad)
    }

    fn static_pad(&self, element: ElementId, name: &str) -> GraphResult<PadId> {
        let state = self.lock();
        let node = state
            .elements
            .get(&element)
            .ok_or(GraphError::UnknownElement(element))?;
        node.pads
            .iter()
            .copied()
            .find(|p| state.pads.get(p).map(|n| n.name == name && !n.requested).unwrap_or(false))
            .ok_or_else(|| GraphError::NoSuchPad {
                element,
                name: name.to_string(),
            })
    }

    fn add_ghost_pad(&mut self, bin: ElementId, name: &str, target: PadId) -> GraphResult<PadId> {
        let mut state = self.lock();
        if !state.elements.contains_key(&bin) {
            return Err(GraphError::UnknownElement(bin));
        }
        let direction = state
            .pads
            .get(&target)
            .map(|p| p.direction)
            .ok_or(GraphError::UnknownPad(target))?;
        Ok(state.add_pad(bin, name, direction, false))
    }

    fn request_pad(&mut self, element: ElementId, name: &str) -> GraphResult<PadId> {
        let mut state = self.lock();
        let node = state
            .elements
            .get(&element)
            .ok_or(GraphError::UnknownElement(element))?;
        let taken = node
            .pads
            .iter()
            .any(|p| state.pads.get(p).map(|n| n.name == name).unwrap_or(false));
        if !matches!(node.kind, ElementKind::StreamMux(_)) || taken {
            return Err(GraphError::NoSuchPad {
                element,
                name: name.to_string(),
            });
        }
        Ok(state.add_pad(element, name, PadDirection::Sink, true))
    }

    fn release_request_pad(&mut self, element: ElementId, pad: PadId) -> GraphResult<()> {
        let mut state = self.lock();
        match state.pads.get(&pad) {
            Some(node) if node.owner == element && node.requested => {}
            Some(_) => {
                return Err(GraphError::NoSuchPad {
                    element,
                    name: pad.to_string(),
                })
            }
            None => return Err(GraphError::UnknownPad(pad)),
        }
        state.drop_pad(pad);
        Ok(())
    }

    fn link_pads(&mut self, src: PadId, sink: PadId) -> GraphResult<()> {
        let mut state = self.lock();
        let ok = match (state.pads.get(&src), state.pads.get(&sink)) {
            (Some(s), Some(k)) => {
                s.direction == PadDirection::Src
                    && k.direction == PadDirection::Sink
                    && s.peer.is_none()
                    && k.peer.is_none()
            }
            _ => false,
        };
        if !ok {
            return Err(GraphError::LinkFailed {
                src: state.pad_label(src),
                sink: state.pad_label(sink),
            });
        }
        if let Some(s) = state.pads.get_mut(&src) {
            s.peer = Some(sink);
        }
        if let Some(k) = state.pads.get_mut(&sink) {
            k.peer = Some(src);
        }
        Ok(())
    }

    fn unlink_pads(&mut self, src: PadId, sink: PadId) -> GraphResult<bool> {
        let mut state = self.lock();
        let linked = state.pads.get(&src).and_then(|p| p.peer) == Some(sink);
        if !linked {
            return Ok(false);
        }
        if let Some(s) = state.pads.get_mut(&src) {
            s.peer = None;
        }
        if let Some(k) = state.pads.get_mut(&sink) {
            k.peer = None;
        }
        Ok(true)
    }

    fn peer(&self, pad: PadId) -> Option<PadId> {
        self.lock().pads.get(&pad).and_then(|p| p.peer)
    }

    fn set_state(&mut self, element: ElementId, state: ElementState) -> GraphResult<()> {
        let mut graph = self.lock();
        if !graph.elements.contains_key(&element) {
            return Err(GraphError::StateChange { element, state });
        }
        graph.set_state_recursive(element, state);
        Ok(())
    }

    fn sync_state_with_parent(&mut self, element: ElementId) -> GraphResult<()> {
        let mut graph = self.lock();
        let parent_state = graph
            .elements
            .get(&element)
            .and_then(|e| e.parent)
            .and_then(|p| graph.elements.get(&p))
            .map(|p| p.state);
        match parent_state {
            Some(state) => {
                graph.set_state_recursive(element, state);
                Ok(())
            }
            None => Err(GraphError::StateChange {
                element,
                state: ElementState::Null,
            }),
        }
    }

    fn flush(&mut self, pad: PadId) -> GraphResult<()> {
        let mut state = self.lock();
        if !state.pads.contains_key(&pad) {
            return Err(GraphError::UnknownPad(pad));
        }
        *state.flushes.entry(pad).or_insert(0) += 1;
        Ok(())
    }

    fn watch_pads(&mut self, ingress: ElementId) -> GraphResult<()> {
        let mut state = self.lock();
        let node = state
            .elements
            .get_mut(&ingress)
            .ok_or(GraphError::UnknownElement(ingress))?;
        node.watched = true;
        Ok(())
    }

    fn install_probes(&mut self, mux_src: PadId, sink_input: PadId) -> GraphResult<()> {
        let mut state = self.lock();
        for pad in [mux_src, sink_input] {
            if !state.pads.contains_key(&pad) {
                return Err(GraphError::UnknownPad(pad));
            }
        }
        state.probes = Some((mux_src, sink_input));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unlink_unlinked_pads_is_noop() {
        let (mut graph, _rx) = MemoryGraph::new();
        let depay = graph.create_element(ElementKind::RtpH264Depay, "depay").unwrap();
        let parse = graph.create_element(ElementKind::H264Parse, "parse").unwrap();
        let src = graph.static_pad(depay, "src").unwrap();
        let sink = graph.static_pad(parse, "sink").unwrap();

        assert_eq!(graph.unlink_pads(src, sink), Ok(false));

        graph.link_pads(src, sink).unwrap();
        assert_eq!(graph.unlink_pads(src, sink), Ok(true));
        assert_eq!(graph.unlink_pads(src, sink), Ok(false));
    }

    #[test]
    fn test_link_rejects_already_linked_sink() {
        let (mut graph, _rx) = MemoryGraph::new();
        let a = graph.create_element(ElementKind::H264Parse, "a").unwrap();
        let b = graph.create_element(ElementKind::H264Parse, "b").unwrap();
        let c = graph.create_element(ElementKind::Decoder, "c").unwrap();

        graph.link_elements(a, c).unwrap();
        assert!(graph.link_elements(b, c).is_err());
    }

    #[test]
    fn test_destroy_detaches_peers_and_children() {
        let (mut graph, _rx) = MemoryGraph::new();
        let bin = graph.create_element(ElementKind::Bin, "bin").unwrap();
        let parse = graph.create_element(ElementKind::H264Parse, "parse").unwrap();
        let decoder = graph.create_element(ElementKind::Decoder, "decoder").unwrap();
        graph.add_to(bin, parse).unwrap();
        graph.link_elements(parse, decoder).unwrap();

        graph.destroy(bin).unwrap();

        assert!(!graph.exists(bin));
        assert!(!graph.exists(parse));
        let decoder_sink = graph.static_pad(decoder, "sink").unwrap();
        assert_eq!(graph.peer(decoder_sink), None);
    }

    #[test]
    fn test_request_pad_names_are_unique() {
        let (mut graph, _rx) = MemoryGraph::new();
        let mux = graph
            .create_element(ElementKind::StreamMux(Default::default()), "mux")
            .unwrap();
        let pad = graph.request_pad(mux, "sink_0").unwrap();
        assert!(graph.request_pad(mux, "sink_0").is_err());

        graph.release_request_pad(mux, pad).unwrap();
        assert!(graph.request_pads(mux).is_empty());
        assert!(graph.request_pad(mux, "sink_0").is_ok());
    }

    #[test]
    fn test_construction_failure_injection() {
        let (mut graph, _rx) = MemoryGraph::new();
        graph.fail_construction("rtspsrc");
        let result = graph.create_element(ElementKind::RtspSource(Default::default()), "src");
        assert!(matches!(result, Err(GraphError::Construction { kind: "rtspsrc", .. })));

        graph.allow_construction("rtspsrc");
        assert!(graph
            .create_element(ElementKind::RtspSource(Default::default()), "src")
            .is_ok());
    }

    #[test]
    fn test_announce_pad_posts_only_when_watched() {
        let (mut graph, mut rx) = MemoryGraph::new();
        let src = graph
            .create_element(ElementKind::RtspSource(Default::default()), "src")
            .unwrap();

        graph.announce_pad(src).unwrap();
        assert!(rx.try_recv().is_err());

        graph.watch_pads(src).unwrap();
        let pad = graph.announce_pad(src).unwrap();
        match rx.try_recv() {
            Ok(GraphSignal::PadAdded { origin, pad: announced }) => {
                assert_eq!(origin, src);
                assert_eq!(announced, pad);
            }
            other => panic!("unexpected signal: {:?}", other),
        }
    }
}
