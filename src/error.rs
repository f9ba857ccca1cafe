//! Error types for every fallible concern in the viewer.
//!
//! Graph wiring errors are programmer errors and are surfaced at construction
//! time. Asset and tile errors are non-fatal: the loader logs them and the
//! scene keeps rendering without the missing resource.

use std::path::PathBuf;

use crate::render_graph::{Channel, PassId};

/// Errors raised while assembling a render graph.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("pass {pass:?} references unknown pass {missing:?}")]
    UnknownPass { pass: String, missing: PassId },
    #[error("pass {pass:?} reads {channel:?} from {from:?}, which does not produce it")]
    MissingChannel {
        pass: String,
        from: PassId,
        channel: Channel,
    },
    #[error("pass {pass:?} reads from {from:?}, which is not an earlier pass")]
    ForwardReference { pass: String, from: PassId },
    #[error("input slot {slot:?} of pass {pass:?} is bound twice")]
    DuplicateSlot { pass: String, slot: &'static str },
    #[error("pass {pass:?} is missing required input slot {slot:?}")]
    MissingSlot { pass: String, slot: &'static str },
    #[error("pass {pass:?} has no input slot named {slot:?}")]
    UnexpectedSlot { pass: String, slot: &'static str },
    #[error("render graph has no passes")]
    Empty,
    #[error("graph output {0:?} does not belong to this graph")]
    ForeignOutput(PassId),
}

/// Errors raised by a render backend.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("no suitable GPU adapter found")]
    NoAdapter,
    #[error("failed to create surface: {0}")]
    Surface(#[from] wgpu::CreateSurfaceError),
    #[error("failed to request device: {0}")]
    Device(#[from] wgpu::RequestDeviceError),
    #[error("surface texture unavailable: {0}")]
    SurfaceTexture(#[from] wgpu::SurfaceError),
    #[error("pass {0:?} has no allocated resources")]
    Unallocated(PassId),
    #[error(transparent)]
    Graph(#[from] GraphError),
}

/// Errors raised while loading or decoding assets.
#[derive(Debug, thiserror::Error)]
pub enum AssetError {
    #[error("IO error reading {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("unknown asset format: {0:?}")]
    UnknownFormat(String),
    #[error("glTF error: {0}")]
    Gltf(#[from] gltf::Error),
    #[error("STL parse error: {0}")]
    Stl(String),
    #[error("image decode error: {0}")]
    Image(#[from] image::ImageError),
    #[error("unsupported primitive in {mesh:?}: {reason}")]
    Unsupported { mesh: String, reason: String },
    #[error("decoder has been disposed")]
    DecoderDisposed,
}

/// Errors raised by the tile streaming adapter.
#[derive(Debug, thiserror::Error)]
pub enum TilesError {
    #[error("plugin {plugin:?} requires {requires:?}, which is not registered before it")]
    MissingDependency {
        plugin: &'static str,
        requires: &'static str,
    },
    #[error("plugin {0:?} is already registered")]
    Duplicate(&'static str),
    #[error("tile {tile} could not be decoded: {reason}")]
    Decode { tile: String, reason: String },
}

/// Errors raised while reading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error reading {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Umbrella error for viewer-level operations.
#[derive(Debug, thiserror::Error)]
pub enum ViewerError {
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error(transparent)]
    Asset(#[from] AssetError),
    #[error(transparent)]
    Tiles(#[from] TilesError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("event loop error: {0}")]
    EventLoop(#[from] winit::error::EventLoopError),
    #[error("failed to create window: {0}")]
    Window(#[from] winit::error::OsError),
    #[error("failed to write {path:?}: {source}")]
    Output {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("viewer has been disposed")]
    Disposed,
}
