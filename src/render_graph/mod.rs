//! Typed render graphs for the post-processing pipeline.
//!
//! A graph is an ordered list of [`PassNode`]s. Each pass writes named
//! [`Channel`]s and binds earlier passes' channels to its input slots. The
//! builder validates every binding when the pass is added, so a graph that
//! builds is acyclic and fully resolved.
//!
//! # Architecture
//!
//! ```text
//!                 ┌──────────────┐
//!                 │ build_pipeline│  PipelineConfig → BuiltPipeline
//!                 └──────┬───────┘
//!                        ▼
//! ┌────────────┐   ┌──────────────┐   ┌────────────────┐
//! │ RenderGraph│──▶│PostProcessing│──▶│ RenderBackend  │
//! │  (passes)  │   │ (full / raw) │   │ wgpu | software│
//! └────────────┘   └──────────────┘   └────────────────┘
//! ```
//!
//! [`PostProcessing`] owns the installed graph, allocates one set of backend
//! resources per pass and decides each frame which output is presented.
//! Backends schedule only the passes that feed that output.

mod backend;
mod channel;
mod graph;
mod pass;
mod pipeline;
mod presenter;
mod software;
mod tonemap;

#[cfg(test)]
pub(crate) use backend::testing;
pub use backend::{FrameView, RenderBackend};
pub use channel::{Channel, ChannelRef, GraphId, PassId};
pub use graph::{RenderGraph, RenderGraphBuilder};
pub use pass::{
    AerialPerspectiveParams, BloomParams, CompositeParams, LensFlareParams, PassKind, PassNode,
    SsgiParams, SsrParams, TaaParams, ToneMapOperator, ToneMapParams,
};
pub use pipeline::{BuiltPipeline, PipelineConfig, build_pipeline};
pub use presenter::PostProcessing;
pub use software::{Image, SoftwareBackend};
pub use tonemap::{DisplayTransform, luminance, tone_map};
