//! Byte-offset source positions.
//!
//! STIL sources are a single stream with no include graph, so a position
//! is just an offset into that stream rather than the (file, line) pair
//! a multi-file language needs.

use std::fmt;

/// A byte offset into the source being parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SourceOffset(pub u64);

impl SourceOffset {
    pub fn new(offset: u64) -> Self {
        SourceOffset(offset)
    }
}

impl fmt::Display for SourceOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "byte {}", self.0)
    }
}
