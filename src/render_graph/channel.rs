//! Pass identifiers and the named channels that flow between passes.

use std::sync::atomic::{AtomicU64, Ordering};

/// A named output of a pass.
///
/// Channels are the edges of the render graph: a pass declares which channels
/// it writes, and downstream passes bind those channels to their input slots.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Channel {
    /// Lit scene color (rgb) with coverage (a).
    Color,
    /// Hardware depth in `[0, 1]`.
    Depth,
    /// View-space normal encoded as `n * 0.5 + 0.5`.
    Normal,
    /// Metalness in `r`, roughness in `g`.
    MetalRough,
    /// Screen-space motion in UV units (current minus previous).
    Velocity,
    /// Reflected color (rgb) with reflection confidence (a).
    Reflection,
    /// Indirect diffuse light.
    Gi,
    /// Ambient occlusion factor, 1 = unoccluded.
    Ao,
    /// Blurred highlights.
    Bloom,
}

impl Channel {
    pub const ALL: [Channel; 9] = [
        Channel::Color,
        Channel::Depth,
        Channel::Normal,
        Channel::MetalRough,
        Channel::Velocity,
        Channel::Reflection,
        Channel::Gi,
        Channel::Ao,
        Channel::Bloom,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Channel::Color => "color",
            Channel::Depth => "depth",
            Channel::Normal => "normal",
            Channel::MetalRough => "metalrough",
            Channel::Velocity => "velocity",
            Channel::Reflection => "reflection",
            Channel::Gi => "gi",
            Channel::Ao => "ao",
            Channel::Bloom => "bloom",
        }
    }
}

/// Identifies one render graph instance. Unique for the process lifetime, so
/// backend resources from a disposed graph can never be confused with a new one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GraphId(u64);

impl GraphId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// Identifies one pass inside one graph.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PassId {
    pub graph: GraphId,
    pub index: u32,
}

/// A reference to a channel produced by a specific pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ChannelRef {
    pub pass: PassId,
    pub channel: Channel,
}

impl ChannelRef {
    pub fn new(pass: PassId, channel: Channel) -> Self {
        Self { pass, channel }
    }
}

impl PassId {
    /// Shorthand for a reference to one of this pass's channels.
    pub fn channel(self, channel: Channel) -> ChannelRef {
        ChannelRef::new(self, channel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn graph_ids_are_unique() {
        let a = GraphId::next();
        let b = GraphId::next();
        assert_ne!(a, b);
    }

    #[test]
    fn channel_names_are_distinct() {
        let mut names: Vec<_> = Channel::ALL.iter().map(|c| c.name()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), Channel::ALL.len());
    }
}
