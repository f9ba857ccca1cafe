//! The seam between graph bookkeeping and the code that executes passes.

use crate::camera::PerspectiveCamera;
use crate::error::RenderError;
use crate::scene::Scene;

use super::channel::{ChannelRef, PassId};
use super::graph::RenderGraph;
use super::pass::PassNode;
use super::tonemap::DisplayTransform;

/// Everything a backend needs to draw one frame.
pub struct FrameView<'a> {
    pub graph: &'a RenderGraph,
    /// The channel to present. Passes that do not feed it are skipped.
    pub output: ChannelRef,
    pub display: DisplayTransform,
    /// Whether shadow-casting lights render shadow maps.
    pub shadows: bool,
    pub scene: &'a Scene,
    pub camera: &'a PerspectiveCamera,
    /// Seconds since the viewer started.
    pub time: f32,
    pub delta: f32,
    pub frame_index: u64,
}

impl FrameView<'_> {
    /// The passes needed for this frame's output, in execution order.
    pub fn schedule(&self) -> Vec<&PassNode> {
        self.graph.schedule(self.output)
    }
}

/// Executes render graphs.
///
/// Resources are owned per pass: [`allocate`](Self::allocate) is called once
/// for every pass when a graph is installed, [`release`](Self::release) once
/// when it is disposed. [`render`](Self::render) must only touch passes that
/// are currently allocated.
pub trait RenderBackend {
    fn size(&self) -> (u32, u32);

    /// Resizes the surface and every size-dependent pass resource.
    fn resize(&mut self, width: u32, height: u32);

    fn allocate(&mut self, pass: &PassNode) -> Result<(), RenderError>;

    fn release(&mut self, pass: PassId);

    fn render(&mut self, frame: &FrameView<'_>) -> Result<(), RenderError>;

    /// Lets go of the presentation surface. Later `render` calls are no-ops.
    fn detach(&mut self);
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::HashMap;

    use super::*;

    /// Counts calls instead of drawing.
    #[derive(Default)]
    pub struct RecordingBackend {
        pub size: (u32, u32),
        pub allocations: HashMap<PassId, u32>,
        pub releases: HashMap<PassId, u32>,
        /// Presented output and scheduled pass count, per rendered frame.
        pub frames: Vec<(ChannelRef, usize)>,
        pub detached: u32,
        /// Fail allocation of the pass at this index.
        pub fail_at: Option<u32>,
    }

    impl RenderBackend for RecordingBackend {
        fn size(&self) -> (u32, u32) {
            self.size
        }

        fn resize(&mut self, width: u32, height: u32) {
            self.size = (width, height);
        }

        fn allocate(&mut self, pass: &PassNode) -> Result<(), RenderError> {
            if self.fail_at == Some(pass.id.index) {
                return Err(RenderError::Unallocated(pass.id));
            }
            *self.allocations.entry(pass.id).or_default() += 1;
            Ok(())
        }

        fn release(&mut self, pass: PassId) {
            *self.releases.entry(pass).or_default() += 1;
        }

        fn render(&mut self, frame: &FrameView<'_>) -> Result<(), RenderError> {
            for pass in frame.schedule() {
                if !self.allocations.contains_key(&pass.id) {
                    return Err(RenderError::Unallocated(pass.id));
                }
            }
            self.frames.push((frame.output, frame.schedule().len()));
            Ok(())
        }

        fn detach(&mut self) {
            self.detached += 1;
        }
    }
}
