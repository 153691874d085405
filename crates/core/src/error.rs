//! The error taxonomy of spec.md #7.
//!
//! Modeled as a single closed enum with a hand-written `Display`/`Error`
//! impl, in the style of `seq-compiler`'s `codegen::CodeGenError` rather
//! than a derive-macro crate: every variant here is user-facing text the
//! host is expected to show verbatim, and the set is small and stable
//! enough that the boilerplate a derive would save isn't worth a new
//! dependency.

use crate::source::SourceOffset;
use std::fmt;
use std::io;

#[derive(Debug)]
pub enum StilError {
    /// Unterminated string literal or malformed `\rN C` repeat.
    Lex { offset: SourceOffset, message: String },
    /// Structural token-pairing violation (unbalanced `{`/`}`, missing
    /// statement terminator, undefined `Goto` label, ...).
    Parse {
        offset: SourceOffset,
        block: String,
        message: String,
    },
    /// Cyclic SignalGroup, Procedure, or MacroDef reference.
    MalformedSymbolTable { message: String },
    /// `V{...}` encountered before any `W` statement in scope.
    MissingWaveformContext { offset: SourceOffset },
    /// An assignment's expanded WFC string does not match its
    /// resolved signal list's length.
    VectorWidthError {
        offset: SourceOffset,
        expected: usize,
        found: usize,
    },
    /// A construct outside the enumerated grammar subset and not on
    /// the deny-list (loop depth > 4, loop body with 0 or >= 3 `V`
    /// statements, ...).
    UnsupportedConstruct { offset: SourceOffset, message: String },
    /// More than 8 distinct waveform tables referenced (VCT target only).
    TooManyWaveformTables { limit: usize },
    /// Two signals map to the same VCT channel index.
    ChannelMapConflict {
        channel: u16,
        first_signal: String,
        second_signal: String,
    },
    /// The channel-map source (tabular or JSON) could not be parsed.
    ChannelMapParseError { message: String },
    /// A VCT address would exceed `0xFFFFFF`.
    AddressOverflow { address: u64 },
    /// Any I/O failure reading the source or writing output.
    Io { message: String, source: io::Error },
    /// The host observed its cancellation token and the core stopped
    /// at `last_address`. Not a failure: a controlled termination.
    Cancelled { last_address: u64 },
}

impl fmt::Display for StilError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StilError::Lex { offset, message } => {
                write!(f, "lex error at {}: {}", offset, message)
            }
            StilError::Parse {
                offset,
                block,
                message,
            } => write!(f, "parse error in {} at {}: {}", block, offset, message),
            StilError::MalformedSymbolTable { message } => {
                write!(f, "malformed symbol table: {}", message)
            }
            StilError::MissingWaveformContext { offset } => write!(
                f,
                "vector at {} has no waveform table in scope (missing `W` statement)",
                offset
            ),
            StilError::VectorWidthError {
                offset,
                expected,
                found,
            } => write!(
                f,
                "vector at {} assigns {} WFCs to {} signals",
                offset, found, expected
            ),
            StilError::UnsupportedConstruct { offset, message } => {
                write!(f, "unsupported construct at {}: {}", offset, message)
            }
            StilError::TooManyWaveformTables { limit } => write!(
                f,
                "more than {} waveform tables referenced (VCT RRADR field is 0-{})",
                limit,
                limit - 1
            ),
            StilError::ChannelMapConflict {
                channel,
                first_signal,
                second_signal,
            } => write!(
                f,
                "channel {} is mapped to both '{}' and '{}'",
                channel, first_signal, second_signal
            ),
            StilError::ChannelMapParseError { message } => {
                write!(f, "channel map parse error: {}", message)
            }
            StilError::AddressOverflow { address } => write!(
                f,
                "vector address 0x{:06X} exceeds the 6-hex-digit VCT address field",
                address
            ),
            StilError::Io { message, source } => write!(f, "{}: {}", message, source),
            StilError::Cancelled { last_address } => {
                write!(f, "cancelled after address 0x{:06X}", last_address)
            }
        }
    }
}

impl std::error::Error for StilError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StilError::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl StilError {
    /// Whether this is the controlled-termination variant rather than
    /// a genuine failure (spec.md #7's "Controlled termination").
    pub fn is_cancellation(&self) -> bool {
        matches!(self, StilError::Cancelled { .. })
    }

    pub fn io(message: impl Into<String>, source: io::Error) -> Self {
        StilError::Io {
            message: message.into(),
            source,
        }
    }
}
