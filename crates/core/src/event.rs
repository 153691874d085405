//! The host-facing event channel and cooperative cancellation flag of
//! spec.md #5/#6.

use crate::source::SourceOffset;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

/// One message on the one-way core-to-host event channel (spec.md #6).
///
/// Events are delivered in production order (spec.md #5's ordering
/// guarantee); a `Warning` is interleaved at the position of the
/// offending input rather than batched at the end.
#[derive(Debug, Clone)]
pub enum Event {
    /// Approximate progress through the source, emitted roughly every
    /// fixed byte count consumed (spec.md #5).
    Progress { percent: u8 },
    Log { level: LogLevel, message: String },
    /// A non-fatal, recoverable condition: an unrecognized top-level
    /// block, a deny-listed statement, a signal present in STIL but
    /// absent from the channel map, ... Never alters the emitted
    /// vector stream (spec.md #7).
    Warning {
        source_offset: SourceOffset,
        message: String,
    },
    /// The host's cancellation flag was observed; `last_address` is
    /// the last vector address actually emitted.
    Cancelled { last_address: u64 },
    Done { total_vectors: u64 },
}

/// The core's one-way channel to the host (spec.md #5: "a one-way
/// event channel ... from core to UI").
///
/// A trait rather than a concrete `mpsc::Sender` so a host can supply
/// any sink -- an in-process `mpsc` channel, a test-only `Vec`
/// collector, or something else entirely -- without the engine crate
/// depending on the host's channel choice. Mirrors how
/// `seq-compiler::config::CompilerConfig` lets a host plug in
/// `ExternalBuiltin`s without the compiler needing to know the host's
/// types.
pub trait EventSink: Send {
    fn emit(&self, event: Event);
}

/// An `EventSink` backed by `std::sync::mpsc`, the default wiring for
/// a host that just wants to read events off a channel on another
/// thread.
pub struct ChannelEventSink(pub Sender<Event>);

impl EventSink for ChannelEventSink {
    fn emit(&self, event: Event) {
        // A disconnected receiver means the host has stopped listening;
        // the core keeps running to completion rather than failing --
        // dropping events silently is the correct behavior when nobody
        // is watching.
        let _ = self.0.send(event);
    }
}

/// An `EventSink` that discards every event, for callers of `convert`
/// that only care about the return value.
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn emit(&self, _event: Event) {}
}

/// The single-bit cooperative cancellation flag of spec.md #5.
///
/// Cloning shares the same underlying flag: the host holds one clone
/// and calls `cancel()`; the core holds another and polls
/// `is_cancelled()` at statement boundaries and every fixed byte count
/// of input consumed, never mid-vector.
#[derive(Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        CancellationToken(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
