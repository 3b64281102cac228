//! Source sub-graph construction
//!
//! Each source runs in its own bin:
//!
//! ```text
//! rtspsrc ~> rtph264depay -> h264parse -> decoder -> queue -> [ghost src] -> mux sink_N
//! ```
//!
//! `~>` is a dynamic link made when the ingress announces its output pad.
//! Everything here is a plain graph operation; when to run it is decided by
//! the recovery protocol.

use crate::graph::{
    ElementId, ElementKind, ElementState, GraphEngine, GraphError, GraphResult, IngressConfig, PadId,
    QueueConfig,
};

/// Graph-side handles of one source sub-graph
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceBin {
    pub bin: ElementId,
    /// Fixed element the ingress output links to
    pub depay: ElementId,
    pub depay_sink: PadId,
    /// Ghost pad the bin exposes towards the mux
    pub egress: PadId,
}

fn ingress_name(bin_name: &str) -> String {
    format!("{}-rtsp-source", bin_name)
}

/// Build a complete source bin; returns the bin handles and the ingress
///
/// On failure everything created so far is destroyed again.
pub fn build_source_bin(
    engine: &mut dyn GraphEngine,
    name: &str,
    ingress: &IngressConfig,
    queue: &QueueConfig,
) -> GraphResult<(SourceBin, ElementId)> {
    let specs = [
        (ElementKind::RtspSource(ingress.clone()), ingress_name(name)),
        (ElementKind::RtpH264Depay, format!("{}-rtp-h264-depay", name)),
        (ElementKind::H264Parse, format!("{}-h264-parse", name)),
        (ElementKind::Decoder, format!("{}-hw-decoder", name)),
        (ElementKind::Queue(queue.clone()), format!("{}-camera-queue", name)),
    ];

    let bin = engine.create_element(ElementKind::Bin, name)?;
    let mut children = Vec::with_capacity(specs.len());
    for (kind, element_name) in specs {
        match engine.create_element(kind, &element_name) {
            Ok(id) => children.push(id),
            Err(e) => {
                tracing::error!(bin = %name, error = %e, "Failed to create source bin element");
                for id in children {
                    let _ = engine.destroy(id);
                }
                let _ = engine.destroy(bin);
                return Err(e);
            }
        }
    }

    let assembled = assemble(engine, bin, &children);
    match assembled {
        Ok(handles) => Ok((handles, children[0])),
        Err(e) => {
            tracing::error!(bin = %name, error = %e, "Failed to assemble source bin");
            // children may or may not have been parented yet
            for id in children {
                let _ = engine.destroy(id);
            }
            let _ = engine.destroy(bin);
            Err(e)
        }
    }
}

fn assemble(engine: &mut dyn GraphEngine, bin: ElementId, children: &[ElementId]) -> GraphResult<SourceBin> {
    let (rtspsrc, depay, parse, decoder, queue) = match children {
        [a, b, c, d, e] => (*a, *b, *c, *d, *e),
        _ => {
            return Err(GraphError::Construction {
                kind: "bin",
                name: bin.to_string(),
            })
        }
    };

    for child in children {
        engine.add_to(bin, *child)?;
    }

    // static chain; rtspsrc -> depay is linked on pad-added
    engine.link_elements(depay, parse)?;
    engine.link_elements(parse, decoder)?;
    engine.link_elements(decoder, queue)?;

    engine.watch_pads(rtspsrc)?;

    let queue_src = engine.static_pad(queue, "src")?;
    let egress = engine.add_ghost_pad(bin, "src", queue_src)?;
    let depay_sink = engine.static_pad(depay, "sink")?;

    Ok(SourceBin {
        bin,
        depay,
        depay_sink,
        egress,
    })
}

/// Swap the ingress of `bin` for a freshly built, identically configured one
///
/// The old element is torn down first; teardown problems are logged and do
/// not stop the replacement. Returns the identity of the new ingress.
pub fn replace_ingress(
    engine: &mut dyn GraphEngine,
    bin: &SourceBin,
    old: ElementId,
    config: &IngressConfig,
) -> GraphResult<ElementId> {
    let bin_name = engine
        .element_name(bin.bin)
        .unwrap_or_else(|| bin.bin.to_string());

    if let Err(e) = engine.set_state(bin.bin, ElementState::Paused) {
        tracing::warn!(bin = %bin_name, error = %e, "Failed to pause source bin");
    }
    if let Err(e) = engine.set_state(old, ElementState::Null) {
        tracing::warn!(bin = %bin_name, error = %e, "Failed to stop old ingress");
    }
    if let Err(e) = engine.remove_from(bin.bin, old) {
        tracing::warn!(bin = %bin_name, error = %e, "Failed to detach old ingress");
    }
    if let Err(e) = engine.destroy(old) {
        tracing::warn!(bin = %bin_name, error = %e, "Failed to release old ingress");
    }

    let ingress = engine.create_element(ElementKind::RtspSource(config.clone()), &ingress_name(&bin_name))?;
    if let Err(e) = attach_ingress(engine, bin, ingress) {
        let _ = engine.destroy(ingress);
        return Err(e);
    }

    engine.set_state(bin.bin, ElementState::Playing)?;

    Ok(ingress)
}

fn attach_ingress(engine: &mut dyn GraphEngine, bin: &SourceBin, ingress: ElementId) -> GraphResult<()> {
    engine.add_to(bin.bin, ingress)?;
    engine.watch_pads(ingress)?;
    engine.sync_state_with_parent(ingress)?;
    engine.sync_state_with_parent(bin.bin)?;
    Ok(())
}

/// Link a newly announced ingress pad to the depayloader
///
/// A reused ingress may announce a pad while the previous link is still in
/// place, so any existing peer of the depayloader sink is unlinked first.
pub fn link_ingress_pad(engine: &mut dyn GraphEngine, bin: &SourceBin, pad: PadId) -> GraphResult<()> {
    if let Some(stale) = engine.peer(bin.depay_sink) {
        tracing::debug!(stale = %stale, "Depayloader already linked, unlinking");
        engine.unlink_pads(stale, bin.depay_sink)?;
    }
    engine.link_pads(pad, bin.depay_sink)
}

/// Unlink a withdrawn ingress pad; `Ok(false)` when it was not linked
pub fn unlink_ingress_pad(engine: &mut dyn GraphEngine, bin: &SourceBin, pad: PadId) -> GraphResult<bool> {
    if engine.peer(pad) != Some(bin.depay_sink) {
        return Ok(false);
    }
    engine.unlink_pads(pad, bin.depay_sink)
}

/// Release a source bin from the shared graph
///
/// Every step runs even if an earlier one failed. Returns the number of
/// failed steps.
pub fn release_source_bin(
    engine: &mut dyn GraphEngine,
    pipeline: ElementId,
    mux: ElementId,
    bin: &SourceBin,
    mux_pad: PadId,
) -> usize {
    let mut failures = 0;
    let mut step = |label: &str, result: GraphResult<()>| {
        if let Err(e) = result {
            failures += 1;
            tracing::warn!(bin = %bin.bin, step = label, error = %e, "Source teardown step failed");
        }
    };

    step("stop", engine.set_state(bin.bin, ElementState::Null));

    let unlinked = if engine.peer(bin.egress) == Some(mux_pad) {
        engine.unlink_pads(bin.egress, mux_pad).map(|_| ())
    } else {
        Ok(())
    };
    step("unlink", unlinked);

    step("release-slot", engine.release_request_pad(mux, mux_pad));
    step("detach", engine.remove_from(pipeline, bin.bin));
    step("destroy", engine.destroy(bin.bin));

    failures
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::memory::MemoryGraph;

    fn build(graph: &mut MemoryGraph) -> (SourceBin, ElementId) {
        build_source_bin(graph, "cam-1", &IngressConfig::default().for_uri("rtsp://cam-1"), &QueueConfig::default())
            .unwrap()
    }

    #[test]
    fn test_build_source_bin_layout() {
        let (mut graph, _rx) = MemoryGraph::new();
        let (bin, ingress) = build(&mut graph);

        assert_eq!(graph.children_of(bin.bin).len(), 5);
        assert_eq!(graph.parent_of(ingress), Some(bin.bin));
        assert!(graph.is_watched(ingress));
        assert_eq!(graph.find_by_name("cam-1-rtsp-source"), Some(ingress));
        match graph.kind_of(ingress) {
            Some(ElementKind::RtspSource(config)) => assert_eq!(config.uri, "rtsp://cam-1"),
            other => panic!("unexpected ingress kind: {:?}", other),
        }
        // dynamic link not made yet
        assert_eq!(graph.peer(bin.depay_sink), None);
    }

    #[test]
    fn test_build_failure_cleans_up() {
        let (mut graph, _rx) = MemoryGraph::new();
        graph.fail_construction("decoder");

        let result = build_source_bin(&mut graph, "cam-1", &IngressConfig::default(), &QueueConfig::default());
        assert!(result.is_err());
        assert!(graph.find_by_name("cam-1").is_none());
        assert!(graph.find_by_name("cam-1-rtsp-source").is_none());
        assert!(graph.find_by_name("cam-1-rtp-h264-depay").is_none());
    }

    #[test]
    fn test_link_ingress_pad_replaces_stale_link() {
        let (mut graph, _rx) = MemoryGraph::new();
        let (bin, ingress) = build(&mut graph);

        let first = graph.announce_pad(ingress).unwrap();
        link_ingress_pad(&mut graph, &bin, first).unwrap();
        assert_eq!(graph.peer(bin.depay_sink), Some(first));

        let second = graph.announce_pad(ingress).unwrap();
        link_ingress_pad(&mut graph, &bin, second).unwrap();
        assert_eq!(graph.peer(bin.depay_sink), Some(second));
        assert_eq!(graph.peer(first), None);
    }

    #[test]
    fn test_unlink_ingress_pad_is_idempotent() {
        let (mut graph, _rx) = MemoryGraph::new();
        let (bin, ingress) = build(&mut graph);
        let pad = graph.announce_pad(ingress).unwrap();

        assert_eq!(unlink_ingress_pad(&mut graph, &bin, pad), Ok(false));
        link_ingress_pad(&mut graph, &bin, pad).unwrap();
        assert_eq!(unlink_ingress_pad(&mut graph, &bin, pad), Ok(true));
        assert_eq!(unlink_ingress_pad(&mut graph, &bin, pad), Ok(false));
    }

    #[test]
    fn test_replace_ingress_keeps_configuration() {
        let (mut graph, _rx) = MemoryGraph::new();
        let pipeline = graph.create_element(ElementKind::Pipeline, "pipeline").unwrap();
        let config = IngressConfig::default().for_uri("rtsp://cam-1");
        let (bin, old) = build_source_bin(&mut graph, "cam-1", &config, &QueueConfig::default()).unwrap();
        graph.add_to(pipeline, bin.bin).unwrap();
        graph.set_state(pipeline, ElementState::Playing).unwrap();

        let new = replace_ingress(&mut graph, &bin, old, &config).unwrap();

        assert_ne!(new, old);
        assert!(!graph.exists(old));
        assert_eq!(graph.parent_of(new), Some(bin.bin));
        assert!(graph.is_watched(new));
        assert_eq!(graph.state_of(bin.bin), Some(ElementState::Playing));
        assert_eq!(graph.state_of(new), Some(ElementState::Playing));
        assert_eq!(graph.kind_of(new), Some(ElementKind::RtspSource(config)));
    }

    #[test]
    fn test_release_source_bin_frees_slot() {
        let (mut graph, _rx) = MemoryGraph::new();
        let pipeline = graph.create_element(ElementKind::Pipeline, "pipeline").unwrap();
        let mux = graph
            .create_element(ElementKind::StreamMux(Default::default()), "mux")
            .unwrap();
        let (bin, ingress) = build(&mut graph);
        graph.add_to(pipeline, bin.bin).unwrap();
        let slot = graph.request_pad(mux, "sink_0").unwrap();
        graph.link_pads(bin.egress, slot).unwrap();

        let failures = release_source_bin(&mut graph, pipeline, mux, &bin, slot);

        assert_eq!(failures, 0);
        assert!(!graph.exists(bin.bin));
        assert!(!graph.exists(ingress));
        assert!(graph.request_pads(mux).is_empty());
    }

    #[test]
    fn test_release_source_bin_continues_after_failure() {
        let (mut graph, _rx) = MemoryGraph::new();
        let pipeline = graph.create_element(ElementKind::Pipeline, "pipeline").unwrap();
        let mux = graph
            .create_element(ElementKind::StreamMux(Default::default()), "mux")
            .unwrap();
        let (bin, _) = build(&mut graph);
        // never attached: unlink is a no-op, release and detach fail
        let bogus_slot = PadId(9999);

        let failures = release_source_bin(&mut graph, pipeline, mux, &bin, bogus_slot);

        assert_eq!(failures, 2);
        assert!(!graph.exists(bin.bin));
    }
}
