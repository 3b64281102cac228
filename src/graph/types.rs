//! Graph engine data types
//!
//! Element/pad handles, element catalog, per-frame metadata and bus signals.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::oneshot;

/// Opaque handle of a graph element, minted by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ElementId(pub u64);

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "element#{}", self.0)
    }
}

/// Opaque handle of a pad, minted by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PadId(pub u64);

impl fmt::Display for PadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pad#{}", self.0)
    }
}

/// Element running state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementState {
    Null,
    Ready,
    Paused,
    Playing,
}

impl Default for ElementState {
    fn default() -> Self {
        Self::Null
    }
}

impl fmt::Display for ElementState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ElementState::Null => "NULL",
            ElementState::Ready => "READY",
            ElementState::Paused => "PAUSED",
            ElementState::Playing => "PLAYING",
        };
        f.write_str(name)
    }
}

/// RTSP ingress connection parameters
///
/// A reconnect builds the replacement ingress from the same value, so the
/// replacement is configured identically to the element it replaces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngressConfig {
    pub uri: String,
    pub latency_ms: u32,
    pub drop_on_latency: bool,
    /// Engine-level retry count; reconnection is driven by the supervisor
    pub retry: u32,
    pub tcp_timeout_us: u64,
    pub keep_alive: bool,
    pub connection_speed: u64,
}

impl IngressConfig {
    /// Same connection parameters, different target
    pub fn for_uri(&self, uri: &str) -> Self {
        Self {
            uri: uri.to_string(),
            ..self.clone()
        }
    }
}

impl Default for IngressConfig {
    fn default() -> Self {
        Self {
            uri: String::new(),
            latency_ms: 2000,
            drop_on_latency: false,
            retry: 0,
            tcp_timeout_us: 0,
            keep_alive: true,
            connection_speed: 0,
        }
    }
}

/// Stream multiplexer settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MuxConfig {
    pub gpu_id: u32,
    pub live_source: bool,
    pub batch_size: u32,
    pub batched_push_timeout_us: i64,
    pub width: u32,
    pub height: u32,
    pub enable_padding: bool,
    pub memory_type: u32,
}

impl Default for MuxConfig {
    fn default() -> Self {
        Self {
            gpu_id: 0,
            live_source: true,
            batch_size: 2,
            batched_push_timeout_us: 40_000,
            width: 640,
            height: 640,
            enable_padding: false,
            memory_type: 0,
        }
    }
}

/// Inference stage settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferConfig {
    pub config_file_path: String,
    pub gpu_id: u32,
    pub batch_size: u32,
    pub interval: u32,
}

impl Default for InferConfig {
    fn default() -> Self {
        Self {
            config_file_path: "/workspace/config_infer_primary_yoloV8.txt".to_string(),
            gpu_id: 0,
            batch_size: 2,
            interval: 0,
        }
    }
}

/// Queue leak mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Leaky {
    No,
    Upstream,
    Downstream,
}

/// Per-source buffering queue settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueConfig {
    pub max_size_buffers: u32,
    pub leaky: Leaky,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_size_buffers: 4,
            leaky: Leaky::Downstream,
        }
    }
}

/// Element catalog this crate relies on
#[derive(Debug, Clone, PartialEq)]
pub enum ElementKind {
    Pipeline,
    Bin,
    RtspSource(IngressConfig),
    RtpH264Depay,
    H264Parse,
    Decoder,
    Queue(QueueConfig),
    StreamMux(MuxConfig),
    Infer(InferConfig),
    FakeSink,
}

impl ElementKind {
    /// Short factory-style label, used in logs and errors
    pub fn label(&self) -> &'static str {
        match self {
            ElementKind::Pipeline => "pipeline",
            ElementKind::Bin => "bin",
            ElementKind::RtspSource(_) => "rtspsrc",
            ElementKind::RtpH264Depay => "rtph264depay",
            ElementKind::H264Parse => "h264parse",
            ElementKind::Decoder => "decoder",
            ElementKind::Queue(_) => "queue",
            ElementKind::StreamMux(_) => "streammux",
            ElementKind::Infer(_) => "infer",
            ElementKind::FakeSink => "fakesink",
        }
    }
}

/// Geolocation of a source
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoLocation {
    pub latitude: f64,
    pub longitude: f64,
}

/// One detected object in a frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectMeta {
    pub class_id: i32,
    pub confidence: f32,
}

/// Per-frame metadata carried through the batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameMeta {
    /// Mux slot the frame entered through
    pub source_index: u32,
    pub frame_num: u64,
    #[serde(default)]
    pub objects: Vec<ObjectMeta>,
    /// Attached by the frame annotator
    #[serde(default)]
    pub location: Option<GeoLocation>,
}

impl FrameMeta {
    pub fn new(source_index: u32, frame_num: u64) -> Self {
        Self {
            source_index,
            frame_num,
            objects: Vec::new(),
            location: None,
        }
    }

    pub fn with_objects(mut self, class_ids: &[i32]) -> Self {
        self.objects = class_ids
            .iter()
            .map(|&class_id| ObjectMeta {
                class_id,
                confidence: 1.0,
            })
            .collect();
        self
    }
}

/// Batched frames as produced by the mux
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FrameBatch {
    pub frames: Vec<FrameMeta>,
}

impl FrameBatch {
    pub fn new(frames: Vec<FrameMeta>) -> Self {
        Self { frames }
    }
}

/// Asynchronous notification from the graph engine
#[derive(Debug)]
pub enum GraphSignal {
    Error {
        origin: ElementId,
        origin_name: String,
        message: String,
        debug: Option<String>,
    },
    Warning {
        origin: ElementId,
        origin_name: String,
        message: String,
        debug: Option<String>,
    },
    StateChanged {
        origin: ElementId,
        origin_name: String,
        old: ElementState,
        new: ElementState,
    },
    EndOfStream,
    /// An ingress element announced a new output pad
    PadAdded { origin: ElementId, pad: PadId },
    /// An ingress element withdrew an output pad
    PadRemoved { origin: ElementId, pad: PadId },
    /// Buffer probe on the mux output; the (annotated) batch goes back
    /// through `reply` before the buffer proceeds downstream
    MuxOutput {
        batch: FrameBatch,
        reply: oneshot::Sender<FrameBatch>,
    },
    /// Buffer probe on the sink input, carrying inference results
    InferenceOutput { batch: FrameBatch },
}

impl GraphSignal {
    /// Short kind label for logs
    pub fn kind(&self) -> &'static str {
        match self {
            GraphSignal::Error { .. } => "error",
            GraphSignal::Warning { .. } => "warning",
            GraphSignal::StateChanged { .. } => "state-changed",
            GraphSignal::EndOfStream => "eos",
            GraphSignal::PadAdded { .. } => "pad-added",
            GraphSignal::PadRemoved { .. } => "pad-removed",
            GraphSignal::MuxOutput { .. } => "mux-output",
            GraphSignal::InferenceOutput { .. } => "inference-output",
        }
    }
}
