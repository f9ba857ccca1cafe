//! Installs a pipeline on a backend and chooses which output is presented.

use crate::error::RenderError;

use super::backend::RenderBackend;
use super::channel::{ChannelRef, PassId};
use super::graph::RenderGraph;
use super::pass::PassKind;
use super::pipeline::BuiltPipeline;
use super::tonemap::DisplayTransform;

/// The active render graph of a viewer.
///
/// Switching between the full effect chain and the raw geometry color never
/// rebuilds anything: both outputs live in the same graph and the backend
/// simply schedules fewer passes. A switch requested with
/// [`set_effects_enabled`](Self::set_effects_enabled) is latched by the next
/// [`begin_frame`](Self::begin_frame), so a frame already in flight keeps the
/// output it started with.
pub struct PostProcessing {
    pipeline: BuiltPipeline,
    allocated: Vec<PassId>,
    effects_enabled: bool,
    pending: Option<bool>,
    disposed: bool,
}

impl PostProcessing {
    /// Allocates backend resources for every pass. If any allocation fails,
    /// the passes allocated so far are released before returning the error.
    pub fn install(
        pipeline: BuiltPipeline,
        backend: &mut dyn RenderBackend,
    ) -> Result<Self, RenderError> {
        let mut allocated = Vec::with_capacity(pipeline.graph.len());
        for pass in pipeline.graph.passes() {
            if let Err(err) = backend.allocate(pass) {
                tracing::warn!(pass = %pass.label, error = %err, "pass allocation failed");
                for id in allocated.drain(..).rev() {
                    backend.release(id);
                }
                return Err(err);
            }
            allocated.push(pass.id);
        }
        tracing::info!(passes = allocated.len(), "installed render graph");

        Ok(Self {
            pipeline,
            allocated,
            effects_enabled: true,
            pending: None,
            disposed: false,
        })
    }

    pub fn graph(&self) -> &RenderGraph {
        &self.pipeline.graph
    }

    pub fn pipeline(&self) -> &BuiltPipeline {
        &self.pipeline
    }

    /// Queues an output switch for the next frame boundary.
    pub fn set_effects_enabled(&mut self, enabled: bool) {
        self.pending = Some(enabled);
    }

    /// Whether the current frame presents the full effect chain.
    pub fn effects_enabled(&self) -> bool {
        self.effects_enabled
    }

    /// The value the next frame will present with.
    pub fn requested_effects_enabled(&self) -> bool {
        self.pending.unwrap_or(self.effects_enabled)
    }

    /// Applies a queued switch. Returns whether the presented output changed.
    pub fn begin_frame(&mut self) -> bool {
        let Some(enabled) = self.pending.take() else {
            return false;
        };
        if enabled == self.effects_enabled {
            return false;
        }
        self.effects_enabled = enabled;
        tracing::debug!(enabled, "presented output switched");
        true
    }

    pub fn output(&self) -> ChannelRef {
        if self.effects_enabled {
            self.pipeline.full
        } else {
            self.pipeline.raw
        }
    }

    /// Display transform for the presented output. An output that already
    /// went through a tone-map pass is shown as is.
    pub fn display(&self, renderer: DisplayTransform) -> DisplayTransform {
        if self.effects_enabled && self.pipeline.tone_mapped {
            DisplayTransform::IDENTITY
        } else {
            renderer
        }
    }

    /// Whether this frame's schedule wants a jittered projection.
    pub fn wants_jitter(&self) -> bool {
        self.graph().schedules_kind(self.output(), |kind| {
            matches!(kind, PassKind::TemporalAa(params) if params.jitter)
        })
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Releases every pass's resources exactly once, in reverse allocation
    /// order. Later calls do nothing.
    pub fn dispose(&mut self, backend: &mut dyn RenderBackend) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        for id in self.allocated.drain(..).rev() {
            backend.release(id);
        }
        tracing::debug!("render graph disposed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render_graph::backend::testing::RecordingBackend;
    use crate::render_graph::{PipelineConfig, build_pipeline};

    fn install(backend: &mut RecordingBackend) -> PostProcessing {
        let built = build_pipeline(&PipelineConfig::screen_space_effects()).unwrap();
        PostProcessing::install(built, backend).unwrap()
    }

    #[test]
    fn toggle_applies_at_next_frame_boundary() {
        let mut backend = RecordingBackend::default();
        let mut post = install(&mut backend);
        let full = post.output();

        post.set_effects_enabled(false);
        // Current frame is unaffected.
        assert_eq!(post.output(), full);
        assert!(post.effects_enabled());
        assert!(!post.requested_effects_enabled());

        assert!(post.begin_frame());
        assert_eq!(post.output(), post.pipeline().raw);
        assert!(!post.begin_frame());
    }

    #[test]
    fn repeated_toggles_within_a_frame_coalesce() {
        let mut backend = RecordingBackend::default();
        let mut post = install(&mut backend);
        post.set_effects_enabled(false);
        post.set_effects_enabled(true);
        assert!(!post.begin_frame());
        assert!(post.effects_enabled());
    }

    #[test]
    fn dispose_releases_each_pass_once() {
        let mut backend = RecordingBackend::default();
        let mut post = install(&mut backend);
        let count = post.graph().len();
        assert_eq!(backend.allocations.len(), count);

        post.dispose(&mut backend);
        post.dispose(&mut backend);

        assert!(post.is_disposed());
        assert_eq!(backend.releases.len(), count);
        assert!(backend.releases.values().all(|&n| n == 1));
        for pass in post.graph().passes() {
            assert_eq!(backend.releases.get(&pass.id), Some(&1));
        }
    }

    #[test]
    fn failed_install_releases_partial_allocations() {
        let mut backend = RecordingBackend {
            fail_at: Some(3),
            ..Default::default()
        };
        let built = build_pipeline(&PipelineConfig::screen_space_effects()).unwrap();
        assert!(PostProcessing::install(built, &mut backend).is_err());
        assert_eq!(backend.allocations.len(), 3);
        assert_eq!(backend.releases.len(), 3);
    }

    #[test]
    fn raw_output_skips_jitter_and_uses_renderer_display() {
        let mut backend = RecordingBackend::default();
        let built = build_pipeline(&PipelineConfig::atmosphere()).unwrap();
        let mut post = PostProcessing::install(built, &mut backend).unwrap();
        assert!(post.wants_jitter());
        assert_eq!(post.display(DisplayTransform::default()), DisplayTransform::IDENTITY);

        post.set_effects_enabled(false);
        post.begin_frame();
        assert!(!post.wants_jitter());
        assert_eq!(post.display(DisplayTransform::default()), DisplayTransform::default());
    }
}
