//! The render graph and its validating builder.

use crate::error::GraphError;

use super::channel::{ChannelRef, GraphId, PassId};
use super::pass::{PassKind, PassNode};

/// Builder for render graphs.
///
/// Passes are appended in execution order and may only read channels of
/// passes added before them, so every graph this builder produces is acyclic
/// by construction. Wiring mistakes are reported as [`GraphError`]s at the
/// call that introduces them.
///
/// # Example
///
/// ```
/// use uspace::render_graph::{Channel, PassKind, RenderGraphBuilder, TaaParams};
///
/// let mut builder = RenderGraphBuilder::new();
/// let scene = builder.add_pass("scene", PassKind::Geometry, &[]).unwrap();
/// let taa = builder
///     .add_pass(
///         "taa",
///         PassKind::TemporalAa(TaaParams::default()),
///         &[
///             ("color", scene.channel(Channel::Color)),
///             ("depth", scene.channel(Channel::Depth)),
///             ("velocity", scene.channel(Channel::Velocity)),
///         ],
///     )
///     .unwrap();
/// let graph = builder.build(taa.channel(Channel::Color)).unwrap();
/// assert_eq!(graph.len(), 2);
/// ```
pub struct RenderGraphBuilder {
    id: GraphId,
    passes: Vec<PassNode>,
}

impl RenderGraphBuilder {
    pub fn new() -> Self {
        Self {
            id: GraphId::next(),
            passes: Vec::new(),
        }
    }

    /// Appends a pass reading the given `(slot, channel)` bindings.
    pub fn add_pass(
        &mut self,
        label: impl Into<String>,
        kind: PassKind,
        inputs: &[(&'static str, ChannelRef)],
    ) -> Result<PassId, GraphError> {
        let label = label.into();
        let required = kind.required_slots();

        for (i, (slot, source)) in inputs.iter().enumerate() {
            if inputs[..i].iter().any(|(other, _)| other == slot) {
                return Err(GraphError::DuplicateSlot {
                    pass: label,
                    slot: *slot,
                });
            }
            if !required.contains(slot) {
                return Err(GraphError::UnexpectedSlot {
                    pass: label,
                    slot: *slot,
                });
            }
            self.check_source(&label, *source)?;
        }

        if let Some(missing) = required
            .iter()
            .find(|slot| !inputs.iter().any(|(bound, _)| bound == *slot))
        {
            return Err(GraphError::MissingSlot {
                pass: label,
                slot: *missing,
            });
        }

        let id = PassId {
            graph: self.id,
            index: self.passes.len() as u32,
        };
        self.passes.push(PassNode {
            id,
            label,
            kind,
            inputs: inputs.to_vec(),
        });
        Ok(id)
    }

    fn check_source(&self, label: &str, source: ChannelRef) -> Result<(), GraphError> {
        if source.pass.graph != self.id {
            return Err(GraphError::UnknownPass {
                pass: label.to_string(),
                missing: source.pass,
            });
        }
        let Some(producer) = self.passes.get(source.pass.index as usize) else {
            return Err(GraphError::ForwardReference {
                pass: label.to_string(),
                from: source.pass,
            });
        };
        if !producer.kind.produces(source.channel) {
            return Err(GraphError::MissingChannel {
                pass: label.to_string(),
                from: source.pass,
                channel: source.channel,
            });
        }
        Ok(())
    }

    /// Finalizes the graph with `output` as the presented channel.
    pub fn build(self, output: ChannelRef) -> Result<RenderGraph, GraphError> {
        if self.passes.is_empty() {
            return Err(GraphError::Empty);
        }
        if output.pass.graph != self.id {
            return Err(GraphError::ForeignOutput(output.pass));
        }
        self.check_source("output", output)?;
        Ok(RenderGraph {
            id: self.id,
            passes: self.passes,
            output,
        })
    }
}

impl Default for RenderGraphBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// An immutable, validated DAG of passes ending in one presentable channel.
#[derive(Debug)]
pub struct RenderGraph {
    id: GraphId,
    passes: Vec<PassNode>,
    output: ChannelRef,
}

impl RenderGraph {
    pub fn builder() -> RenderGraphBuilder {
        RenderGraphBuilder::new()
    }

    pub fn id(&self) -> GraphId {
        self.id
    }

    pub fn output(&self) -> ChannelRef {
        self.output
    }

    pub fn passes(&self) -> &[PassNode] {
        &self.passes
    }

    pub fn len(&self) -> usize {
        self.passes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }

    pub fn pass(&self, id: PassId) -> Option<&PassNode> {
        if id.graph != self.id {
            return None;
        }
        self.passes.get(id.index as usize)
    }

    /// Whether `channel` is produced inside this graph.
    pub fn resolves(&self, channel: ChannelRef) -> bool {
        self.pass(channel.pass)
            .is_some_and(|p| p.kind.produces(channel.channel))
    }

    /// The passes needed to produce `target`, in execution order.
    ///
    /// Passes that only feed other outputs are skipped, which is how a
    /// presenter showing the raw geometry output avoids running the effect
    /// chain at all.
    pub fn schedule(&self, target: ChannelRef) -> Vec<&PassNode> {
        if !self.resolves(target) {
            return Vec::new();
        }
        let mut needed = vec![false; self.passes.len()];
        needed[target.pass.index as usize] = true;
        for pass in self.passes.iter().rev() {
            if !needed[pass.id.index as usize] {
                continue;
            }
            for (_, source) in &pass.inputs {
                needed[source.pass.index as usize] = true;
            }
        }
        self.passes
            .iter()
            .filter(|p| needed[p.id.index as usize])
            .collect()
    }

    /// Whether any scheduled pass for `target` is of the kind matched by `f`.
    pub fn schedules_kind(&self, target: ChannelRef, f: impl Fn(&PassKind) -> bool) -> bool {
        self.schedule(target).iter().any(|p| f(&p.kind))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render_graph::{BloomParams, Channel, CompositeParams, SsgiParams};

    fn geometry(builder: &mut RenderGraphBuilder) -> PassId {
        builder.add_pass("scene", PassKind::Geometry, &[]).unwrap()
    }

    #[test]
    fn rejects_channel_the_source_does_not_produce() {
        let mut builder = RenderGraphBuilder::new();
        let scene = geometry(&mut builder);
        let err = builder
            .add_pass(
                "bloom",
                PassKind::Bloom(BloomParams::default()),
                &[("color", scene.channel(Channel::Gi))],
            )
            .unwrap_err();
        assert!(matches!(err, GraphError::MissingChannel { channel: Channel::Gi, .. }));
    }

    #[test]
    fn rejects_missing_required_slot() {
        let mut builder = RenderGraphBuilder::new();
        let scene = geometry(&mut builder);
        let err = builder
            .add_pass(
                "ssgi",
                PassKind::GlobalIllumination(SsgiParams::default()),
                &[
                    ("color", scene.channel(Channel::Color)),
                    ("depth", scene.channel(Channel::Depth)),
                ],
            )
            .unwrap_err();
        assert!(matches!(err, GraphError::MissingSlot { slot: "normal", .. }));
    }

    #[test]
    fn rejects_forward_and_foreign_references() {
        let mut other = RenderGraphBuilder::new();
        let foreign = geometry(&mut other);

        let mut builder = RenderGraphBuilder::new();
        let err = builder
            .add_pass(
                "bloom",
                PassKind::Bloom(BloomParams::default()),
                &[("color", foreign.channel(Channel::Color))],
            )
            .unwrap_err();
        assert!(matches!(err, GraphError::UnknownPass { .. }));

        let scene = geometry(&mut builder);
        let ahead = PassId {
            graph: scene.graph,
            index: 5,
        };
        let err = builder
            .add_pass(
                "bloom",
                PassKind::Bloom(BloomParams::default()),
                &[("color", ahead.channel(Channel::Color))],
            )
            .unwrap_err();
        assert!(matches!(err, GraphError::ForwardReference { .. }));
    }

    #[test]
    fn rejects_unexpected_and_duplicate_slots() {
        let mut builder = RenderGraphBuilder::new();
        let scene = geometry(&mut builder);
        let err = builder
            .add_pass(
                "composite",
                PassKind::Composite(CompositeParams::default()),
                &[
                    ("color", scene.channel(Channel::Color)),
                    ("bloom", scene.channel(Channel::Color)),
                ],
            )
            .unwrap_err();
        assert!(matches!(err, GraphError::UnexpectedSlot { slot: "bloom", .. }));

        let err = builder
            .add_pass(
                "composite",
                PassKind::Composite(CompositeParams::default()),
                &[
                    ("color", scene.channel(Channel::Color)),
                    ("color", scene.channel(Channel::Color)),
                ],
            )
            .unwrap_err();
        assert!(matches!(err, GraphError::DuplicateSlot { .. }));
    }

    #[test]
    fn empty_graph_is_an_error() {
        let builder = RenderGraphBuilder::new();
        let bogus = PassId {
            graph: builder.id,
            index: 0,
        };
        assert!(matches!(
            builder.build(bogus.channel(Channel::Color)),
            Err(GraphError::Empty)
        ));
    }

    #[test]
    fn schedule_skips_passes_not_feeding_the_target() {
        let mut builder = RenderGraphBuilder::new();
        let scene = geometry(&mut builder);
        let bloom = builder
            .add_pass(
                "bloom",
                PassKind::Bloom(BloomParams::default()),
                &[("color", scene.channel(Channel::Color))],
            )
            .unwrap();
        let composite = builder
            .add_pass(
                "composite",
                PassKind::Composite(CompositeParams {
                    bloom: true,
                    ..Default::default()
                }),
                &[
                    ("color", scene.channel(Channel::Color)),
                    ("bloom", bloom.channel(Channel::Bloom)),
                ],
            )
            .unwrap();
        let graph = builder.build(composite.channel(Channel::Color)).unwrap();

        let full: Vec<_> = graph.schedule(graph.output()).iter().map(|p| p.id).collect();
        assert_eq!(full, vec![scene, bloom, composite]);

        let raw: Vec<_> = graph
            .schedule(scene.channel(Channel::Color))
            .iter()
            .map(|p| p.id)
            .collect();
        assert_eq!(raw, vec![scene]);
    }
}
