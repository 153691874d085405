//! The Pattern Lowering Engine of spec.md #4.3 -- the heart of the
//! system. Consumes Pattern Statements pulled from a statement cursor
//! (the top-level `Pattern` body is streamed lazily; `Call`/`Macro`
//! targets and `Loop`/`MatchLoop` bodies are bounded and already
//! materialized, spec.md #4.2/#9) and drives a `VectorSink` (an
//! emitter) with `LoweredVector` events.

use crate::ast::{Statement, StatementKind, VectorAssignment};
use crate::pattern_parser::PatternStatementParser;
use crate::symbols::{CallableTable, SignalGroupTable, SignalTable, WaveformTableTable};
use stil_core::{CancellationToken, Event, EventSink, SourceOffset, StilError, Wfc};
use std::collections::HashMap;

const MAX_ADDRESS: u64 = 0xFFFFFF;
const PROGRESS_INTERVAL_BYTES: u64 = 4096;

/// A tester-engine opcode attached to a `LoweredVector` (spec.md
/// #4.3.5/#9).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MicroInstruction {
    Mssa,
    Adv,
    Rpt(u32),
    Li(u8, u32),
    Jni(u8),
    Imatch,
    Mbgn,
    Mend,
    Halt,
    Jump(String),
    /// Carried for completeness with spec.md #4.3.5's precedence
    /// table ("Call (when inlining disabled)"); this engine always
    /// inlines (spec.md #4.3.4), so this variant is never constructed.
    Call(String),
    Ret,
    Iddq,
}

/// The output of the lowering engine, consumed by an emitter
/// (spec.md #3, "Lowered Vector (event)").
#[derive(Debug, Clone)]
pub struct LoweredVector {
    pub address: u64,
    /// Resolved per-signal WFC, in the declared-signal order of
    /// `SignalTable::iter`.
    pub wfcs: Vec<Wfc>,
    pub micro: MicroInstruction,
    pub wft_name: Option<String>,
    pub wft_id: Option<u8>,
    pub labels: Vec<String>,
}

/// What an emitter needs to consume a lowered vector stream.
pub trait VectorSink {
    fn write_vector(&mut self, vector: &LoweredVector) -> Result<(), StilError>;
}

struct BufSink {
    items: Vec<LoweredVector>,
}

impl VectorSink for BufSink {
    fn write_vector(&mut self, vector: &LoweredVector) -> Result<(), StilError> {
        self.items.push(vector.clone());
        Ok(())
    }
}

struct WftIds {
    order: Vec<String>,
    index: HashMap<String, u8>,
    enforce_limit: bool,
}

impl WftIds {
    fn new(enforce_limit: bool) -> Self {
        WftIds {
            order: Vec::new(),
            index: HashMap::new(),
            enforce_limit,
        }
    }

    fn id_for(&mut self, name: &str) -> Result<u8, StilError> {
        if let Some(&id) = self.index.get(name) {
            return Ok(id);
        }
        let next = self.order.len();
        if self.enforce_limit && next >= 8 {
            return Err(StilError::TooManyWaveformTables { limit: 8 });
        }
        let id = next as u8;
        self.order.push(name.to_string());
        self.index.insert(name.to_string(), id);
        Ok(id)
    }
}

pub struct LoweringEngine<'doc> {
    signals: &'doc SignalTable,
    groups: &'doc SignalGroupTable,
    waveform_tables: &'doc WaveformTableTable,
    callables: &'doc CallableTable,
    event_sink: &'doc dyn EventSink,
    cancellation: CancellationToken,
    total_source_len: u64,

    current: HashMap<String, Wfc>,
    current_wft: Option<String>,
    wft_ids: WftIds,
    address: u64,
    first_emitted: bool,
    pending_labels: Vec<String>,
    last_progress_bytes: u64,
}

impl<'doc> LoweringEngine<'doc> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        signals: &'doc SignalTable,
        groups: &'doc SignalGroupTable,
        waveform_tables: &'doc WaveformTableTable,
        callables: &'doc CallableTable,
        event_sink: &'doc dyn EventSink,
        cancellation: CancellationToken,
        enforce_wft_limit: bool,
        total_source_len: u64,
    ) -> Self {
        let mut current = HashMap::new();
        for signal in signals.iter() {
            current.insert(signal.name.clone(), signal.default_wfc.unwrap_or(Wfc::UNKNOWN));
        }
        LoweringEngine {
            signals,
            groups,
            waveform_tables,
            callables,
            event_sink,
            cancellation,
            total_source_len,
            current,
            current_wft: None,
            wft_ids: WftIds::new(enforce_wft_limit),
            address: 0,
            first_emitted: true,
            pending_labels: Vec::new(),
            last_progress_bytes: 0,
        }
    }

    /// Drive `lazy` (the cursor over the `Pattern` body) to exhaustion,
    /// writing every produced vector to `sink`. Returns the total
    /// number of emitted vectors.
    pub fn run(
        mut self,
        mut lazy: PatternStatementParser<'doc, 'doc>,
        sink: &mut dyn VectorSink,
    ) -> Result<u64, StilError> {
        let mut stack: Vec<std::vec::IntoIter<Statement>> = Vec::new();
        loop {
            self.check_cancellation()?;
            self.maybe_report_progress(lazy.bytes_consumed());

            let stmt = loop {
                if let Some(frame) = stack.last_mut() {
                    match frame.next() {
                        Some(s) => break Some(s),
                        None => {
                            stack.pop();
                            continue;
                        }
                    }
                }
                break lazy.next_statement()?;
            };
            for (offset, message) in lazy.take_warnings() {
                self.event_sink.emit(Event::Warning {
                    source_offset: offset,
                    message,
                });
            }
            let stmt = match stmt {
                Some(s) => s,
                None => break,
            };
            let offset = stmt.offset;
            match stmt.kind {
                StatementKind::Call(name) => {
                    let def = self
                        .callables
                        .procedure(&name)
                        .ok_or_else(|| StilError::Parse {
                            offset,
                            block: "Pattern".to_string(),
                            message: format!("call to undefined procedure '{}'", name),
                        })?
                        .clone();
                    stack.push(def.body.into_iter());
                }
                StatementKind::Macro(name) => {
                    let def = self
                        .callables
                        .macro_def(&name)
                        .ok_or_else(|| StilError::Parse {
                            offset,
                            block: "Pattern".to_string(),
                            message: format!("call to undefined macro '{}'", name),
                        })?
                        .clone();
                    stack.push(def.body.into_iter());
                }
                kind => self.lower_statement(Statement { kind, offset }, 0, sink)?,
            }
        }
        Ok(self.address)
    }

    fn check_cancellation(&self) -> Result<(), StilError> {
        if self.cancellation.is_cancelled() {
            return Err(StilError::Cancelled {
                last_address: self.address.saturating_sub(1),
            });
        }
        Ok(())
    }

    fn maybe_report_progress(&mut self, bytes_consumed: u64) {
        if bytes_consumed.saturating_sub(self.last_progress_bytes) < PROGRESS_INTERVAL_BYTES {
            return;
        }
        self.last_progress_bytes = bytes_consumed;
        let percent = if self.total_source_len == 0 {
            100
        } else {
            ((bytes_consumed * 100) / self.total_source_len).min(100) as u8
        };
        self.event_sink.emit(Event::Progress { percent });
    }

    /// Replace every `Call`/`Macro` statement in a bounded statement
    /// list with the (recursively inlined) body of its target,
    /// textually splicing it in place (spec.md #4.3.4). Used for
    /// `Loop`/`MatchLoop` bodies, which are already fully materialized
    /// and small, unlike the top-level `Pattern` body.
    fn inline_flatten(&self, stmts: &[Statement]) -> Result<Vec<Statement>, StilError> {
        let mut out = Vec::with_capacity(stmts.len());
        for stmt in stmts {
            match &stmt.kind {
                StatementKind::Call(name) => {
                    let def = self.callables.procedure(name).ok_or_else(|| StilError::Parse {
                        offset: stmt.offset,
                        block: "Pattern".to_string(),
                        message: format!("call to undefined procedure '{}'", name),
                    })?;
                    out.extend(self.inline_flatten(&def.body)?);
                }
                StatementKind::Macro(name) => {
                    let def = self.callables.macro_def(name).ok_or_else(|| StilError::Parse {
                        offset: stmt.offset,
                        block: "Pattern".to_string(),
                        message: format!("call to undefined macro '{}'", name),
                    })?;
                    out.extend(self.inline_flatten(&def.body)?);
                }
                _ => out.push(stmt.clone()),
            }
        }
        Ok(out)
    }

    fn lower_statement(
        &mut self,
        stmt: Statement,
        depth: u8,
        sink: &mut dyn VectorSink,
    ) -> Result<(), StilError> {
        match stmt.kind {
            StatementKind::Vector(assignments) => self.lower_vector(assignments, stmt.offset, sink),
            StatementKind::SetWaveformTable(name) => self.set_waveform_table(name, stmt.offset),
            StatementKind::Loop { count, body } => {
                self.lower_loop(false, count, body, depth, stmt.offset, sink)
            }
            StatementKind::MatchLoop { count, body } => {
                self.lower_loop(true, count, body, depth, stmt.offset, sink)
            }
            StatementKind::Call(name) => Err(StilError::Parse {
                offset: stmt.offset,
                block: "Pattern".to_string(),
                message: format!("internal: unresolved Call '{}' reached lowering", name),
            }),
            StatementKind::Macro(name) => Err(StilError::Parse {
                offset: stmt.offset,
                block: "Pattern".to_string(),
                message: format!("internal: unresolved Macro '{}' reached lowering", name),
            }),
            StatementKind::Stop => self.emit_event(MicroInstruction::Halt, sink),
            StatementKind::Goto(label) => self.emit_event(MicroInstruction::Jump(label), sink),
            StatementKind::IddqTestPoint => self.emit_event(MicroInstruction::Iddq, sink),
            StatementKind::Return => self.emit_event(MicroInstruction::Ret, sink),
            StatementKind::Label(name) => {
                self.pending_labels.push(name);
                Ok(())
            }
        }
    }

    fn resolve_target(&self, target: &str, offset: SourceOffset) -> Result<Vec<String>, StilError> {
        if let Some(flat) = self.groups.resolve(target) {
            for name in flat {
                if !self.signals.contains(name) {
                    return Err(StilError::Parse {
                        offset,
                        block: "Pattern".to_string(),
                        message: format!("signal group member '{}' is not a declared signal", name),
                    });
                }
            }
            Ok(flat.to_vec())
        } else if self.signals.contains(target) {
            Ok(vec![target.to_string()])
        } else {
            Err(StilError::Parse {
                offset,
                block: "Pattern".to_string(),
                message: format!("'{}' is not a declared signal or signal group", target),
            })
        }
    }

    fn lower_vector(
        &mut self,
        assignments: Vec<VectorAssignment>,
        offset: SourceOffset,
        sink: &mut dyn VectorSink,
    ) -> Result<(), StilError> {
        for assignment in &assignments {
            let flat = self.resolve_target(&assignment.target, offset)?;
            let expanded = expand_wfc_text(&assignment.wfc_text, offset)?;
            let found = expanded.chars().count();
            if found != flat.len() {
                return Err(StilError::VectorWidthError {
                    offset,
                    expected: flat.len(),
                    found,
                });
            }
            let wft_name = self
                .current_wft
                .clone()
                .ok_or(StilError::MissingWaveformContext { offset })?;
            let wft = self
                .waveform_tables
                .get(&wft_name)
                .expect("set_waveform_table validates the name exists");
            for (name, raw_char) in flat.iter().zip(expanded.chars()) {
                let raw = Wfc::new(raw_char).map_err(|c| StilError::Parse {
                    offset,
                    block: "Pattern".to_string(),
                    message: format!("invalid WFC '{}'", c),
                })?;
                let driven = wft.drive(name, raw);
                self.current.insert(name.clone(), driven);
            }
        }
        self.emit_event(MicroInstruction::Adv, sink)
    }

    fn set_waveform_table(&mut self, name: String, offset: SourceOffset) -> Result<(), StilError> {
        if !self.waveform_tables.contains(&name) {
            return Err(StilError::Parse {
                offset,
                block: "Pattern".to_string(),
                message: format!("unknown waveform table '{}'", name),
            });
        }
        self.current_wft = Some(name);
        Ok(())
    }

    /// Lower a `Loop`/`MatchLoop` body, collapsing it per spec.md
    /// #4.3.2/#4.3.3: a body that is exactly one `V` (after inlining
    /// any `Call`/`Macro`) never touches the loop-state stack and
    /// collapses to a single `RPT`/`IMATCH` vector. A body that is
    /// exactly two `V`s, or that contains anything other than bare
    /// `V` statements (e.g. a nested `Loop`), uses the `LI<k>`/`JNI<k>`
    /// (or `MBGN`/`MEND`) pair and consumes one loop-stack slot. A body
    /// made up entirely of `V` statements but with a count of 0 or
    /// >= 3 is `UnsupportedConstruct`, per documented policy. The
    /// open micro-instruction merges onto the body's first lowered
    /// vector when that vector would otherwise carry the default
    /// `ADV` (as it does for a leading bare `V`); otherwise the open
    /// rides its own synthesized vector that repeats the current
    /// sticky signal state, matching a nested loop's `LI0`/`LI1` both
    /// getting their own address. The close instruction always rides
    /// its own synthesized vector.
    fn lower_loop(
        &mut self,
        is_match: bool,
        count: u32,
        body: Vec<Statement>,
        depth: u8,
        offset: SourceOffset,
        sink: &mut dyn VectorSink,
    ) -> Result<(), StilError> {
        let flattened = self.inline_flatten(&body)?;
        let all_vectors = !flattened.is_empty()
            && flattened
                .iter()
                .all(|s| matches!(s.kind, StatementKind::Vector(_)));

        if all_vectors && flattened.len() == 1 {
            let mut buf = BufSink { items: Vec::new() };
            let only = flattened.into_iter().next().expect("len == 1");
            self.lower_statement(only, depth, &mut buf)?;
            let mut vector = buf.items.pop().expect("lower_statement emits exactly one vector");
            vector.micro = if is_match {
                MicroInstruction::Imatch
            } else {
                MicroInstruction::Rpt(count)
            };
            return sink.write_vector(&vector);
        }

        if flattened.is_empty() || (all_vectors && flattened.len() != 2) {
            return Err(StilError::UnsupportedConstruct {
                offset,
                message: format!(
                    "loop body has {} V statement(s); only 1 or 2 are supported",
                    flattened.len()
                ),
            });
        }

        if depth >= 4 {
            return Err(StilError::UnsupportedConstruct {
                offset,
                message: "loop nesting exceeds the depth-4 stack limit".to_string(),
            });
        }

        self.validate_labels(&flattened)?;

        let open = if is_match {
            MicroInstruction::Mbgn
        } else {
            MicroInstruction::Li(depth, count)
        };
        let close = if is_match {
            MicroInstruction::Mend
        } else {
            MicroInstruction::Jni(depth)
        };

        // Whether `open` can ride the body's first vector (rather than a
        // synthesized vector of its own) depends only on the body's shape --
        // a leading bare `V` naturally lowers to `Adv` -- not on whatever
        // `emit_event` does with that `Adv` once it actually runs. Deciding
        // from `flattened[0].kind` here, before the body is lowered, keeps
        // this independent of the `first_emitted` -> `Mssa` rewrite, which
        // would otherwise corrupt a post-hoc check against the lowered
        // micro (and keeps every vector's address assigned in emission
        // order, never retroactively).
        let mergeable = matches!(flattened[0].kind, StatementKind::Vector(_));

        let mut buf = BufSink { items: Vec::new() };
        if mergeable {
            // `open` is about to overwrite the body's first micro outright,
            // so there's nothing for the `Mssa` override to apply to; clear
            // `first_emitted` before lowering so it doesn't get spent on a
            // vector we're discarding. It stays cleared afterward -- the
            // construct did just emit a real vector at address 0.
            self.first_emitted = false;
            for s in flattened {
                self.lower_statement(s, depth + 1, &mut buf)?;
            }
            if buf.items.is_empty() {
                return Err(StilError::UnsupportedConstruct {
                    offset,
                    message: "loop body produced no vectors".to_string(),
                });
            }
            buf.items[0].micro = open;
            for v in &buf.items {
                sink.write_vector(v)?;
            }
        } else {
            self.emit_event(open, sink)?;
            for s in flattened {
                self.lower_statement(s, depth + 1, &mut buf)?;
            }
            if buf.items.is_empty() {
                return Err(StilError::UnsupportedConstruct {
                    offset,
                    message: "loop body produced no vectors".to_string(),
                });
            }
            for v in &buf.items {
                sink.write_vector(v)?;
            }
        }
        self.emit_event(close, sink)
    }

    /// Check that every `Goto` directly in `stmts` targets a `Label`
    /// also directly in `stmts` (spec.md #4.3: label scope is lexical
    /// to the innermost enclosing statement list). `stmts` is expected
    /// to already have `Call`/`Macro` inlined (i.e. the output of
    /// `inline_flatten`), so this never descends into a nested
    /// `Loop`/`MatchLoop` body -- that's a separate scope, validated by
    /// its own `lower_loop` call.
    fn validate_labels(&self, stmts: &[Statement]) -> Result<(), StilError> {
        let labels: std::collections::HashSet<&str> = stmts
            .iter()
            .filter_map(|s| match &s.kind {
                StatementKind::Label(name) => Some(name.as_str()),
                _ => None,
            })
            .collect();
        for s in stmts {
            if let StatementKind::Goto(name) = &s.kind {
                if !labels.contains(name.as_str()) {
                    return Err(StilError::Parse {
                        offset: s.offset,
                        block: "Pattern".to_string(),
                        message: format!("undefined Goto label '{}'", name),
                    });
                }
            }
        }
        Ok(())
    }

    fn current_row(&self) -> Vec<Wfc> {
        self.signals
            .iter()
            .map(|s| *self.current.get(&s.name).expect("initialized for every declared signal"))
            .collect()
    }

    fn emit_event(&mut self, natural_micro: MicroInstruction, sink: &mut dyn VectorSink) -> Result<(), StilError> {
        if self.address > MAX_ADDRESS {
            return Err(StilError::AddressOverflow {
                address: self.address,
            });
        }
        let micro = if self.first_emitted && natural_micro == MicroInstruction::Adv {
            MicroInstruction::Mssa
        } else {
            natural_micro
        };
        self.first_emitted = false;

        let (wft_name, wft_id) = match &self.current_wft {
            Some(name) => {
                let id = self.wft_ids.id_for(name)?;
                (Some(name.clone()), Some(id))
            }
            None => (None, None),
        };

        let vector = LoweredVector {
            address: self.address,
            wfcs: self.current_row(),
            micro,
            wft_name,
            wft_id,
            labels: std::mem::take(&mut self.pending_labels),
        };
        sink.write_vector(&vector)?;
        self.address += 1;
        Ok(())
    }
}

/// Validate `Goto`/`Label` pairing for the top-level `Pattern` body
/// before lowering begins (spec.md #4.3: "labels are collected in a
/// first pass... a `Goto` to an undefined label is a `ParseError`
/// raised at lowering time once the whole pattern body has been
/// scanned"). Mirrors `LoweringEngine::run`'s `Call`/`Macro`-inlining
/// stack exactly, since a label's scope extends to everything textually
/// spliced into the same statement list -- but unlike `run`, never
/// descends into a `Loop`/`MatchLoop` body, which is its own lexical
/// scope and validated separately by `LoweringEngine::validate_labels`
/// when `lower_loop` handles it. Takes its own `PatternStatementParser`
/// (a fresh pass over a cloned `Lexer`) so this scan doesn't disturb
/// the cursor `run` later drives for the real lowering pass.
pub fn validate_top_level_labels<'a, 'd>(
    mut lazy: PatternStatementParser<'a, 'd>,
    callables: &CallableTable,
) -> Result<(), StilError> {
    let mut stack: Vec<std::vec::IntoIter<Statement>> = Vec::new();
    let mut labels = std::collections::HashSet::new();
    let mut gotos = Vec::new();
    loop {
        let stmt = loop {
            if let Some(frame) = stack.last_mut() {
                match frame.next() {
                    Some(s) => break Some(s),
                    None => {
                        stack.pop();
                        continue;
                    }
                }
            }
            break lazy.next_statement()?;
        };
        lazy.take_warnings();
        let stmt = match stmt {
            Some(s) => s,
            None => break,
        };
        match stmt.kind {
            StatementKind::Call(name) => {
                let def = callables.procedure(&name).ok_or_else(|| StilError::Parse {
                    offset: stmt.offset,
                    block: "Pattern".to_string(),
                    message: format!("call to undefined procedure '{}'", name),
                })?;
                stack.push(def.body.clone().into_iter());
            }
            StatementKind::Macro(name) => {
                let def = callables.macro_def(&name).ok_or_else(|| StilError::Parse {
                    offset: stmt.offset,
                    block: "Pattern".to_string(),
                    message: format!("call to undefined macro '{}'", name),
                })?;
                stack.push(def.body.clone().into_iter());
            }
            StatementKind::Label(name) => {
                labels.insert(name);
            }
            StatementKind::Goto(name) => gotos.push((name, stmt.offset)),
            _ => {}
        }
    }
    for (name, offset) in gotos {
        if !labels.contains(&name) {
            return Err(StilError::Parse {
                offset,
                block: "Pattern".to_string(),
                message: format!("undefined Goto label '{}'", name),
            });
        }
    }
    Ok(())
}

/// Expand every `\rN C` occurrence in an already lexer-validated WFC
/// string to `N` literal copies of `C` (spec.md #4.3.1). The lexer
/// guarantees the `\r{digits} {char}` shape; this re-walks it rather
/// than trusting it blindly, so a malformed string still surfaces a
/// `LexError` instead of panicking.
fn expand_wfc_text(text: &str, offset: SourceOffset) -> Result<String, StilError> {
    let mut out = String::new();
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        let malformed = || StilError::Lex {
            offset,
            message: "malformed repeat in vector assignment".to_string(),
        };
        if chars.next() != Some('r') {
            return Err(malformed());
        }
        let mut digits = String::new();
        while matches!(chars.peek(), Some(d) if d.is_ascii_digit()) {
            digits.push(chars.next().unwrap());
        }
        let n: u32 = digits.parse().map_err(|_| malformed())?;
        if chars.peek() == Some(&' ') {
            chars.next();
        }
        let repeated = chars.next().ok_or_else(malformed)?;
        for _ in 0..n {
            out.push(repeated);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Direction, SignalDef, SignalGroupDef, WaveformTableDef};
    use crate::lexer::Lexer;
    use crate::symbols::{CallableTable, SignalGroupTable, SignalTable, WaveformTableTable};
    use stil_core::{CancellationToken, DenyList, NullEventSink};
    use std::collections::BTreeMap;

    fn wfc(c: char) -> Wfc {
        Wfc::new(c).unwrap()
    }

    fn simple_fixture() -> (SignalTable, SignalGroupTable, WaveformTableTable, CallableTable) {
        let mut signals = SignalTable::new();
        signals
            .insert(SignalDef {
                name: "a".to_string(),
                direction: Direction::In,
                default_wfc: None,
            })
            .unwrap();
        let mut groups = SignalGroupTable::new();
        groups.finalize().unwrap();
        let mut waveform_tables = WaveformTableTable::new();
        let mut per_signal = BTreeMap::new();
        per_signal.insert(wfc('0'), wfc('D'));
        per_signal.insert(wfc('1'), wfc('U'));
        let mut mapping = BTreeMap::new();
        mapping.insert("a".to_string(), per_signal);
        waveform_tables
            .insert(WaveformTableDef {
                name: "w".to_string(),
                period: None,
                mapping,
            })
            .unwrap();
        let callables = CallableTable::new();
        (signals, groups, waveform_tables, callables)
    }

    struct RecordSink(Vec<LoweredVector>);
    impl VectorSink for RecordSink {
        fn write_vector(&mut self, vector: &LoweredVector) -> Result<(), StilError> {
            self.0.push(vector.clone());
            Ok(())
        }
    }

    fn run_source(src: &str) -> Vec<LoweredVector> {
        let (signals, groups, waveform_tables, callables) = simple_fixture();
        let sink_events = NullEventSink;
        let engine = LoweringEngine::new(
            &signals,
            &groups,
            &waveform_tables,
            &callables,
            &sink_events,
            CancellationToken::new(),
            true,
            src.len() as u64,
        );
        let deny = DenyList::new();
        let parser = PatternStatementParser::new(Lexer::new(src), &deny);
        let mut out = RecordSink(Vec::new());
        engine.run(parser, &mut out).unwrap();
        out.0
    }

    #[test]
    fn minimal_pattern_produces_three_vectors() {
        let vectors = run_source("W w; V{a=0;} V{a=1;} Stop;");
        assert_eq!(vectors.len(), 3);
        assert_eq!(vectors[0].micro, MicroInstruction::Mssa);
        assert_eq!(vectors[0].wfcs, vec![wfc('D')]);
        assert_eq!(vectors[1].micro, MicroInstruction::Adv);
        assert_eq!(vectors[1].wfcs, vec![wfc('U')]);
        assert_eq!(vectors[2].micro, MicroInstruction::Halt);
        assert_eq!(vectors[2].wfcs, vec![wfc('U')]);
        assert_eq!(vectors[0].address, 0);
        assert_eq!(vectors[2].address, 2);
    }

    #[test]
    fn single_v_loop_collapses_to_rpt() {
        let vectors = run_source("W w; Loop 50 { V{a=1;} }");
        assert_eq!(vectors.len(), 1);
        assert_eq!(vectors[0].micro, MicroInstruction::Rpt(50));
    }

    #[test]
    fn two_v_loop_emits_li_adv_jni() {
        let vectors = run_source("W w; Loop 3 { V{a=0;} V{a=1;} }");
        assert_eq!(vectors.len(), 3);
        assert_eq!(vectors[0].micro, MicroInstruction::Li(0, 3));
        assert_eq!(vectors[1].micro, MicroInstruction::Adv);
        assert_eq!(vectors[2].micro, MicroInstruction::Jni(0));
        assert_eq!(vectors[0].address, 0);
        assert_eq!(vectors[1].address, 1);
        assert_eq!(vectors[2].address, 2);
    }

    #[test]
    fn nested_loops_use_two_stack_slots() {
        let vectors = run_source("W w; Loop 2 { Loop 2 { V{a=0;} V{a=1;} } }");
        let micros: Vec<_> = vectors.iter().map(|v| v.micro.clone()).collect();
        assert_eq!(
            micros,
            vec![
                MicroInstruction::Li(0, 2),
                MicroInstruction::Li(1, 2),
                MicroInstruction::Adv,
                MicroInstruction::Jni(1),
                MicroInstruction::Jni(0),
            ]
        );
    }

    #[test]
    fn loop_depth_five_is_unsupported() {
        let src = "W w; Loop 2 { Loop 2 { Loop 2 { Loop 2 { Loop 2 { V{a=0;} V{a=1;} } } } } }";
        let (signals, groups, waveform_tables, callables) = simple_fixture();
        let sink_events = NullEventSink;
        let engine = LoweringEngine::new(
            &signals,
            &groups,
            &waveform_tables,
            &callables,
            &sink_events,
            CancellationToken::new(),
            true,
            src.len() as u64,
        );
        let deny = DenyList::new();
        let parser = PatternStatementParser::new(Lexer::new(src), &deny);
        let mut out = RecordSink(Vec::new());
        let err = engine.run(parser, &mut out).unwrap_err();
        assert!(matches!(err, StilError::UnsupportedConstruct { .. }));
    }

    #[test]
    fn repeat_expansion_widens_assignment() {
        let mut signals = SignalTable::new();
        for name in ["b0", "b1", "b2", "b3"] {
            signals
                .insert(SignalDef {
                    name: name.to_string(),
                    direction: Direction::In,
                    default_wfc: None,
                })
                .unwrap();
        }
        let mut groups = SignalGroupTable::new();
        groups
            .insert(SignalGroupDef {
                name: "bus".to_string(),
                members: vec!["b0".into(), "b1".into(), "b2".into(), "b3".into()],
                offset: SourceOffset::new(0),
            })
            .unwrap();
        groups.finalize().unwrap();
        let mut waveform_tables = WaveformTableTable::new();
        let mut per_signal = BTreeMap::new();
        per_signal.insert(wfc('0'), wfc('D'));
        let mut mapping = BTreeMap::new();
        for name in ["b0", "b1", "b2", "b3"] {
            mapping.insert(name.to_string(), per_signal.clone());
        }
        waveform_tables
            .insert(WaveformTableDef {
                name: "w".to_string(),
                period: None,
                mapping,
            })
            .unwrap();
        let callables = CallableTable::new();
        let sink_events = NullEventSink;
        let src = r"W w; V{bus=\r4 0;}";
        let engine = LoweringEngine::new(
            &signals,
            &groups,
            &waveform_tables,
            &callables,
            &sink_events,
            CancellationToken::new(),
            true,
            src.len() as u64,
        );
        let deny = DenyList::new();
        let parser = PatternStatementParser::new(Lexer::new(src), &deny);
        let mut out = RecordSink(Vec::new());
        engine.run(parser, &mut out).unwrap();
        assert_eq!(out.0.len(), 1);
        assert_eq!(out.0[0].wfcs, vec![wfc('D'), wfc('D'), wfc('D'), wfc('D')]);
    }

    #[test]
    fn vector_before_any_w_is_missing_waveform_context() {
        let src = "V{a=0;}";
        let (signals, groups, waveform_tables, callables) = simple_fixture();
        let sink_events = NullEventSink;
        let engine = LoweringEngine::new(
            &signals,
            &groups,
            &waveform_tables,
            &callables,
            &sink_events,
            CancellationToken::new(),
            true,
            src.len() as u64,
        );
        let deny = DenyList::new();
        let parser = PatternStatementParser::new(Lexer::new(src), &deny);
        let mut out = RecordSink(Vec::new());
        let err = engine.run(parser, &mut out).unwrap_err();
        assert!(matches!(err, StilError::MissingWaveformContext { .. }));
    }

    #[test]
    fn address_exactly_max_is_allowed_next_overflows() {
        let (signals, groups, waveform_tables, callables) = simple_fixture();
        let sink_events = NullEventSink;
        let mut engine = LoweringEngine::new(
            &signals,
            &groups,
            &waveform_tables,
            &callables,
            &sink_events,
            CancellationToken::new(),
            true,
            0,
        );
        engine.address = MAX_ADDRESS;
        engine.current_wft = Some("w".to_string());
        let mut out = RecordSink(Vec::new());
        engine.emit_event(MicroInstruction::Adv, &mut out).unwrap();
        assert_eq!(out.0[0].address, MAX_ADDRESS);
        let err = engine
            .emit_event(MicroInstruction::Adv, &mut out)
            .unwrap_err();
        match err {
            StilError::AddressOverflow { address } => assert_eq!(address, MAX_ADDRESS + 1),
            other => panic!("expected AddressOverflow, got {:?}", other),
        }
    }

    #[test]
    fn eight_distinct_waveform_tables_succeed_when_enforced() {
        let vectors = run_source_with_wft_count(8);
        assert_eq!(vectors.len(), 8);
    }

    #[test]
    fn ninth_distinct_waveform_table_exceeds_the_limit() {
        let (signals, groups, waveform_tables, callables) = wft_fixture(9);
        let src = pattern_switching_through(9);
        let sink_events = NullEventSink;
        let engine = LoweringEngine::new(
            &signals,
            &groups,
            &waveform_tables,
            &callables,
            &sink_events,
            CancellationToken::new(),
            true,
            src.len() as u64,
        );
        let deny = DenyList::new();
        let parser = PatternStatementParser::new(Lexer::new(&src), &deny);
        let mut out = RecordSink(Vec::new());
        let err = engine.run(parser, &mut out).unwrap_err();
        match err {
            StilError::TooManyWaveformTables { limit } => assert_eq!(limit, 8),
            other => panic!("expected TooManyWaveformTables, got {:?}", other),
        }
    }

    fn wft_fixture(
        count: usize,
    ) -> (SignalTable, SignalGroupTable, WaveformTableTable, CallableTable) {
        let mut signals = SignalTable::new();
        signals
            .insert(SignalDef {
                name: "a".to_string(),
                direction: Direction::In,
                default_wfc: None,
            })
            .unwrap();
        let mut groups = SignalGroupTable::new();
        groups.finalize().unwrap();
        let mut waveform_tables = WaveformTableTable::new();
        for i in 0..count {
            let mut per_signal = BTreeMap::new();
            per_signal.insert(wfc('0'), wfc('D'));
            let mut mapping = BTreeMap::new();
            mapping.insert("a".to_string(), per_signal);
            waveform_tables
                .insert(WaveformTableDef {
                    name: format!("w{}", i),
                    period: None,
                    mapping,
                })
                .unwrap();
        }
        (signals, groups, waveform_tables, CallableTable::new())
    }

    fn pattern_switching_through(count: usize) -> String {
        let mut src = String::new();
        for i in 0..count {
            src.push_str(&format!("W w{}; V{{a=0;}} ", i));
        }
        src
    }

    fn run_source_with_wft_count(count: usize) -> Vec<LoweredVector> {
        let (signals, groups, waveform_tables, callables) = wft_fixture(count);
        let src = pattern_switching_through(count);
        let sink_events = NullEventSink;
        let engine = LoweringEngine::new(
            &signals,
            &groups,
            &waveform_tables,
            &callables,
            &sink_events,
            CancellationToken::new(),
            true,
            src.len() as u64,
        );
        let deny = DenyList::new();
        let parser = PatternStatementParser::new(Lexer::new(&src), &deny);
        let mut out = RecordSink(Vec::new());
        engine.run(parser, &mut out).unwrap();
        out.0
    }

    #[test]
    fn validate_labels_accepts_forward_reference_within_same_list() {
        let (signals, groups, waveform_tables, callables) = simple_fixture();
        let sink_events = NullEventSink;
        let engine = LoweringEngine::new(
            &signals,
            &groups,
            &waveform_tables,
            &callables,
            &sink_events,
            CancellationToken::new(),
            true,
            0,
        );
        let stmts = vec![
            Statement {
                kind: StatementKind::Goto("x".to_string()),
                offset: SourceOffset::new(0),
            },
            Statement {
                kind: StatementKind::Label("x".to_string()),
                offset: SourceOffset::new(10),
            },
        ];
        assert!(engine.validate_labels(&stmts).is_ok());
    }

    #[test]
    fn validate_labels_rejects_undefined_goto() {
        let (signals, groups, waveform_tables, callables) = simple_fixture();
        let sink_events = NullEventSink;
        let engine = LoweringEngine::new(
            &signals,
            &groups,
            &waveform_tables,
            &callables,
            &sink_events,
            CancellationToken::new(),
            true,
            0,
        );
        let stmts = vec![Statement {
            kind: StatementKind::Goto("missing".to_string()),
            offset: SourceOffset::new(0),
        }];
        let err = engine.validate_labels(&stmts).unwrap_err();
        assert!(matches!(err, StilError::Parse { .. }));
    }

    #[test]
    fn loop_goto_cannot_target_a_label_declared_outside_the_loop() {
        let src = "W w; Label x; Loop 3 { V{a=0;} V{a=1;} Goto x; }";
        let (signals, groups, waveform_tables, callables) = simple_fixture();
        let sink_events = NullEventSink;
        let engine = LoweringEngine::new(
            &signals,
            &groups,
            &waveform_tables,
            &callables,
            &sink_events,
            CancellationToken::new(),
            true,
            src.len() as u64,
        );
        let deny = DenyList::new();
        let parser = PatternStatementParser::new(Lexer::new(src), &deny);
        let mut out = RecordSink(Vec::new());
        let err = engine.run(parser, &mut out).unwrap_err();
        assert!(matches!(err, StilError::Parse { .. }));
    }

    #[test]
    fn top_level_goto_to_a_later_label_is_valid() {
        let deny = DenyList::new();
        let src = "Goto x; Label x;";
        let parser = PatternStatementParser::new(Lexer::new(src), &deny);
        let callables = CallableTable::new();
        assert!(validate_top_level_labels(parser, &callables).is_ok());
    }

    #[test]
    fn top_level_goto_to_an_undefined_label_is_a_parse_error() {
        let deny = DenyList::new();
        let src = "Goto nowhere;";
        let parser = PatternStatementParser::new(Lexer::new(src), &deny);
        let callables = CallableTable::new();
        let err = validate_top_level_labels(parser, &callables).unwrap_err();
        assert!(matches!(err, StilError::Parse { .. }));
    }

    #[test]
    fn top_level_goto_resolves_through_an_inlined_call_body() {
        let deny = DenyList::new();
        let mut body_parser = PatternStatementParser::new(Lexer::new("Label inner;"), &deny);
        let body = body_parser.parse_statements_until_eof().unwrap();
        let mut callables = CallableTable::new();
        callables
            .insert_procedure(crate::ast::CallableDef {
                name: "p".to_string(),
                body,
                offset: SourceOffset::new(0),
            })
            .unwrap();
        let src = "Goto inner; Call p;";
        let parser = PatternStatementParser::new(Lexer::new(src), &deny);
        assert!(validate_top_level_labels(parser, &callables).is_ok());
    }

    #[test]
    fn procedure_call_inlines_and_preserves_wft() {
        let (signals, groups, waveform_tables, mut callables) = simple_fixture();
        let deny = DenyList::new();
        let mut body_parser = PatternStatementParser::new(Lexer::new("W w; V{a=0;} V{a=1;}"), &deny);
        let body = body_parser.parse_statements_until_eof().unwrap();
        callables
            .insert_procedure(crate::ast::CallableDef {
                name: "p".to_string(),
                body,
                offset: SourceOffset::new(0),
            })
            .unwrap();
        let src = "Call p; Stop;";
        let sink_events = NullEventSink;
        let engine = LoweringEngine::new(
            &signals,
            &groups,
            &waveform_tables,
            &callables,
            &sink_events,
            CancellationToken::new(),
            true,
            src.len() as u64,
        );
        let parser = PatternStatementParser::new(Lexer::new(src), &deny);
        let mut out = RecordSink(Vec::new());
        engine.run(parser, &mut out).unwrap();
        assert_eq!(out.0.len(), 3);
        assert_eq!(out.0[2].micro, MicroInstruction::Halt);
    }
}
