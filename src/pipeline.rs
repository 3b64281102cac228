//! Shared processing graph
//!
//! ```text
//! source bins -> streammux -> infer -> fakesink
//!                     ^probe             ^probe
//! ```
//!
//! The core elements and their static links are mandatory; any failure here
//! is a startup failure.

use crate::error::{Error, Result};
use crate::graph::{ElementId, ElementKind, ElementState, GraphEngine, GraphError, PadId};
use crate::inventory::SourceRecord;
use crate::source_bin::{build_source_bin, release_source_bin};
use crate::source_registry::SourceEntry;
use crate::state::{redact_uri, SupervisorConfig};

/// Handles of the shared elements every source feeds into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoreGraph {
    pub pipeline: ElementId,
    pub mux: ElementId,
    pub infer: ElementId,
    pub sink: ElementId,
}

fn startup(e: GraphError) -> Error {
    Error::Startup(e.to_string())
}

impl CoreGraph {
    /// Build the pipeline, mux, inference stage and sink, link them and
    /// install the buffer probes
    pub fn build(engine: &mut dyn GraphEngine, config: &SupervisorConfig) -> Result<Self> {
        let pipeline = engine
            .create_element(ElementKind::Pipeline, "ingest-pipeline")
            .map_err(startup)?;
        let mux = engine
            .create_element(ElementKind::StreamMux(config.mux.clone()), "stream-muxer")
            .map_err(startup)?;
        let infer = engine
            .create_element(ElementKind::Infer(config.infer.clone()), "primary-inference")
            .map_err(startup)?;
        let sink = engine
            .create_element(ElementKind::FakeSink, "fake-sink")
            .map_err(startup)?;

        for element in [mux, infer, sink] {
            engine.add_to(pipeline, element).map_err(startup)?;
        }

        engine.link_elements(mux, infer).map_err(startup)?;
        engine.link_elements(infer, sink).map_err(startup)?;

        let mux_src = engine.static_pad(mux, "src").map_err(startup)?;
        let sink_input = engine.static_pad(sink, "sink").map_err(startup)?;
        engine.install_probes(mux_src, sink_input).map_err(startup)?;

        tracing::info!(
            batch_size = config.mux.batch_size,
            width = config.mux.width,
            height = config.mux.height,
            infer_config = %config.infer.config_file_path,
            "Core pipeline built"
        );

        Ok(Self {
            pipeline,
            mux,
            infer,
            sink,
        })
    }

    /// Build a source bin for `record` and attach it to mux slot `slot`
    ///
    /// Partially attached sources are released again on failure.
    pub fn attach_source(
        &self,
        engine: &mut dyn GraphEngine,
        record: &SourceRecord,
        slot: u32,
        config: &SupervisorConfig,
    ) -> Result<SourceEntry> {
        let name = format!("source-bin-{:02}", slot);
        let ingress_config = config.ingress.for_uri(&record.uri);
        let (bin, ingress) = build_source_bin(engine, &name, &ingress_config, &config.queue)?;

        if let Err(e) = engine.add_to(self.pipeline, bin.bin) {
            let _ = engine.destroy(bin.bin);
            return Err(e.into());
        }

        let mux_pad = match engine.request_pad(self.mux, &format!("sink_{}", slot)) {
            Ok(pad) => pad,
            Err(e) => {
                let _ = engine.remove_from(self.pipeline, bin.bin);
                let _ = engine.destroy(bin.bin);
                return Err(e.into());
            }
        };

        if let Err(e) = engine.link_pads(bin.egress, mux_pad) {
            release_source_bin(engine, self.pipeline, self.mux, &bin, mux_pad);
            return Err(e.into());
        }

        tracing::info!(
            source = %record.name,
            uri = %redact_uri(&record.uri),
            slot = slot,
            bin = %name,
            "Source attached"
        );

        Ok(SourceEntry::new(record, bin, ingress, slot, mux_pad))
    }

    pub fn set_state(&self, engine: &mut dyn GraphEngine, state: ElementState) -> Result<()> {
        engine.set_state(self.pipeline, state)?;
        Ok(())
    }

    /// Mux output pad, where frames are annotated
    pub fn mux_src(&self, engine: &dyn GraphEngine) -> Option<PadId> {
        engine.static_pad(self.mux, "src").ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::memory::MemoryGraph;
    use crate::inventory::SourceStatus;

    fn record() -> SourceRecord {
        SourceRecord {
            id: 1,
            name: "pier".to_string(),
            uri: "rtsp://pier/live".to_string(),
            status: SourceStatus::Up,
            latitude: 1.5,
            longitude: 2.5,
        }
    }

    #[test]
    fn test_build_links_core_and_installs_probes() {
        let (mut graph, _rx) = MemoryGraph::new();
        let core = CoreGraph::build(&mut graph, &SupervisorConfig::default()).unwrap();

        assert_eq!(graph.children_of(core.pipeline).len(), 3);
        let mux_src = core.mux_src(&graph).unwrap();
        let infer_sink = graph.static_pad(core.infer, "sink").unwrap();
        assert_eq!(graph.peer(mux_src), Some(infer_sink));

        let sink_input = graph.static_pad(core.sink, "sink").unwrap();
        assert_eq!(graph.probes(), Some((mux_src, sink_input)));
    }

    #[test]
    fn test_mandatory_element_failure_is_startup_error() {
        let (mut graph, _rx) = MemoryGraph::new();
        graph.fail_construction("infer");

        let result = CoreGraph::build(&mut graph, &SupervisorConfig::default());
        assert!(matches!(result, Err(Error::Startup(_))));
    }

    #[test]
    fn test_attach_source_links_to_requested_slot() {
        let (mut graph, _rx) = MemoryGraph::new();
        let config = SupervisorConfig::default();
        let core = CoreGraph::build(&mut graph, &config).unwrap();

        let entry = core.attach_source(&mut graph, &record(), 3, &config).unwrap();

        assert_eq!(entry.mux_slot, 3);
        assert_eq!(graph.request_pads(core.mux), vec!["sink_3".to_string()]);
        assert_eq!(graph.peer(entry.bin.egress), Some(entry.mux_pad));
        assert_eq!(graph.parent_of(entry.bin.bin), Some(core.pipeline));
        assert_eq!(entry.uri, "rtsp://pier/live");
    }

    #[test]
    fn test_attach_failure_leaves_nothing_behind() {
        let (mut graph, _rx) = MemoryGraph::new();
        let config = SupervisorConfig::default();
        let core = CoreGraph::build(&mut graph, &config).unwrap();
        // occupy the slot so the request fails
        graph.request_pad(core.mux, "sink_0").unwrap();

        let result = core.attach_source(&mut graph, &record(), 0, &config);

        assert!(matches!(result, Err(Error::Graph(_))));
        assert!(graph.find_by_name("source-bin-00").is_none());
        assert_eq!(graph.children_of(core.pipeline).len(), 3);
    }
}
