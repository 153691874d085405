//! Host-facing engine configuration (spec.md #6), mirroring
//! `seq-compiler::config::CompilerConfig`'s builder shape: a plain
//! struct built with `with_*` methods rather than named-argument
//! constructors, so adding a new knob later doesn't break callers.

use stil_core::{CancellationToken, ChannelMap, DenyList};

/// The output pattern format `convert` produces (spec.md #6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// The fixed-column 256-channel HTOL tester encoding (spec.md #4.4).
    Vct,
    /// The free-form GASC pattern text (spec.md #4.5).
    Gasc,
}

/// Construction-time parameters for one `convert` run. `channel_map`
/// only matters for `Target::Vct`; `Target::Gasc` ignores it (spec.md
/// #4.5: "No channel map is consulted").
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub target: Target,
    pub channel_map: ChannelMap,
    pub deny_list: DenyList,
    pub cancellation: CancellationToken,
}

impl EngineConfig {
    pub fn new(target: Target) -> Self {
        EngineConfig {
            target,
            channel_map: ChannelMap::new(),
            deny_list: DenyList::new(),
            cancellation: CancellationToken::new(),
        }
    }

    pub fn with_channel_map(mut self, channel_map: ChannelMap) -> Self {
        self.channel_map = channel_map;
        self
    }

    pub fn with_deny_list(mut self, deny_list: DenyList) -> Self {
        self.deny_list = deny_list;
        self
    }

    /// Share a cancellation flag with the host rather than relying on
    /// the fresh one `new` allocates -- the host needs its own clone
    /// to call `cancel()` on.
    pub fn with_cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = cancellation;
        self
    }
}
