//! Block-level symbol-table entries and the Pattern Statement AST of
//! spec.md #3.

use stil_core::{SourceOffset, Wfc};
use std::collections::BTreeMap;

/// A signal's declared direction (spec.md #3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    In,
    Out,
    InOut,
    Supply,
    Pseudo,
}

impl Direction {
    pub fn parse(word: &str) -> Option<Direction> {
        match word {
            "In" => Some(Direction::In),
            "Out" => Some(Direction::Out),
            "InOut" => Some(Direction::InOut),
            "Supply" => Some(Direction::Supply),
            "Pseudo" => Some(Direction::Pseudo),
            _ => None,
        }
    }
}

/// A `Signals` block entry.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalDef {
    pub name: String,
    pub direction: Direction,
    pub default_wfc: Option<Wfc>,
}

/// A `SignalGroups` block entry, before member-name resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalGroupDef {
    pub name: String,
    pub members: Vec<String>,
    pub offset: SourceOffset,
}

/// A `Timing` block waveform table, `raw_wfc -> driven_wfc` per signal.
#[derive(Debug, Clone, PartialEq)]
pub struct WaveformTableDef {
    pub name: String,
    pub period: Option<u64>,
    /// signal name -> (raw WFC -> driven WFC)
    pub mapping: BTreeMap<String, BTreeMap<Wfc, Wfc>>,
}

/// A `Procedures`/`MacroDefs` block entry: a name and its pre-parsed
/// statement list (spec.md #3: "Procedures are pre-parsed to an
/// internal statement list").
#[derive(Debug, Clone, PartialEq)]
pub struct CallableDef {
    pub name: String,
    pub body: Vec<Statement>,
    pub offset: SourceOffset,
}

/// Free-form `key = "value";` pairs from the `Header` block, surfaced
/// to the emitters for file framing (spec.md #4.4's "header comment
/// block").
pub type HeaderInfo = BTreeMap<String, String>;

/// A single `(target, wfc_string)` assignment inside a `V{...}`
/// statement. `target` is a signal or signal-group name, resolved
/// against the symbol tables during lowering; `wfc_text` is the raw,
/// unexpanded WFC sequence straight from the lexer (may contain
/// `\rN C` repeats).
#[derive(Debug, Clone, PartialEq)]
pub struct VectorAssignment {
    pub target: String,
    pub wfc_text: String,
}

/// One Pattern Statement (spec.md #3), tagged by `StatementKind`.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub kind: StatementKind,
    pub offset: SourceOffset,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StatementKind {
    Vector(Vec<VectorAssignment>),
    SetWaveformTable(String),
    Loop { count: u32, body: Vec<Statement> },
    MatchLoop { count: u32, body: Vec<Statement> },
    Call(String),
    Macro(String),
    Stop,
    Goto(String),
    IddqTestPoint,
    Return,
    Label(String),
}
