//! Waveform Characters (WFC): the alphabet driven/compared on a signal
//! for one tester cycle.

use std::fmt;

/// A single Waveform Character.
///
/// The documented alphabet is `0 1 L H X Z N` plus the sticky-fill
/// placeholder, but spec.md #9 treats any character outside that table
/// as pass-through rather than an error, so this type only rejects
/// whitespace and control characters at construction -- it does not
/// enumerate a closed set of variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Wfc(char);

impl Wfc {
    /// The default fill used for a signal with no declared default and
    /// no prior sticky value (spec.md #4.3.1, "the very first vector").
    pub const UNKNOWN: Wfc = Wfc('X');

    /// The unmapped-channel placeholder used by the VCT emitter
    /// (spec.md #4.4).
    pub const UNMAPPED: Wfc = Wfc('.');

    pub fn new(c: char) -> Result<Self, char> {
        if c.is_whitespace() || c.is_control() {
            Err(c)
        } else {
            Ok(Wfc(c))
        }
    }

    pub fn as_char(&self) -> char {
        self.0
    }
}

impl fmt::Display for Wfc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<char> for Wfc {
    type Error = char;

    fn try_from(c: char) -> Result<Self, char> {
        Wfc::new(c)
    }
}
