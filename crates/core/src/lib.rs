//! Shared foundation for the STIL pattern-lowering engine.
//!
//! This crate holds the types that cross the core/host boundary of
//! spec.md #6 plus the data that both the lexer/parser and the
//! lowering engine need but that don't belong to either one alone:
//! the WFC alphabet, the error taxonomy, the event/cancellation
//! channel, the deny-list, and the channel map.
//!
//! # Modules
//!
//! - `source`: byte-offset source positions
//! - `wfc`: the Waveform Character alphabet
//! - `error`: the `StilError` taxonomy of spec.md #7
//! - `event`: the host event sink and cancellation token of spec.md #5
//! - `deny_list`: construction-time construct deny-listing
//! - `channel_map`: the VCT channel map and its import formats

pub mod channel_map;
pub mod deny_list;
pub mod error;
pub mod event;
pub mod source;
pub mod wfc;

pub use channel_map::{ChannelMap, CHANNEL_COUNT};
pub use deny_list::DenyList;
pub use error::StilError;
pub use event::{CancellationToken, ChannelEventSink, Event, EventSink, LogLevel, NullEventSink};
pub use source::SourceOffset;
pub use wfc::Wfc;
