//! The top-level block parser of spec.md #4.2.
//!
//! Dispatches on the block keyword that opens each top-level `{...}`
//! construct (`STIL`, `Header`, `Signals`, `SignalGroups`, `Timing`,
//! `Procedures`, `MacroDefs`, `Pattern`), fully resolving every
//! non-`Pattern` block into the symbol tables of `symbols` before any
//! `Pattern` body is lowered. Unrecognized top-level blocks are
//! tolerated (warn + skip to the matching `}`); structural violations
//! -- unbalanced braces, a missing statement terminator -- are fatal.

use crate::ast::{CallableDef, Direction, HeaderInfo, SignalDef, SignalGroupDef, WaveformTableDef};
use crate::lexer::{parse_int, LexedToken, Lexer, Token};
use crate::pattern_parser::PatternStatementParser;
use crate::symbols::{CallableTable, SignalGroupTable, SignalTable, WaveformTableTable};
use stil_core::{DenyList, SourceOffset, StilError, Wfc};
use std::collections::BTreeMap;

/// The fully-resolved symbol tables built from every non-`Pattern`
/// block, plus the `Header` block's free-form metadata and the byte
/// offset at which the `Pattern` block's body begins (handed to the
/// lowering engine as a fresh `Lexer` + `PatternStatementParser`
/// rather than a materialized statement list, per spec.md #4.2).
pub struct ParsedDocument<'a> {
    pub header: HeaderInfo,
    pub signals: SignalTable,
    pub groups: SignalGroupTable,
    pub waveform_tables: WaveformTableTable,
    pub callables: CallableTable,
    pub pattern_name: Option<String>,
    pub pattern_body: Lexer<'a>,
    pub warnings: Vec<(SourceOffset, String)>,
}

struct Cursor<'a> {
    lexer: Lexer<'a>,
    lookahead: Option<LexedToken>,
}

impl<'a> Cursor<'a> {
    fn new(src: &'a str) -> Self {
        Cursor {
            lexer: Lexer::new(src),
            lookahead: None,
        }
    }

    fn peek(&mut self) -> Result<Option<&LexedToken>, StilError> {
        if self.lookahead.is_none() {
            self.lookahead = self.lexer.next_token()?;
        }
        Ok(self.lookahead.as_ref())
    }

    fn bump(&mut self) -> Result<Option<LexedToken>, StilError> {
        self.peek()?;
        Ok(self.lookahead.take())
    }

    fn offset(&mut self) -> SourceOffset {
        SourceOffset::new(self.lexer.bytes_consumed())
    }

    fn expect_symbol(&mut self, c: char, block: &str) -> Result<SourceOffset, StilError> {
        match self.bump()? {
            Some(LexedToken {
                token: Token::Symbol(s),
                offset,
            }) if s == c => Ok(offset),
            other => Err(StilError::Parse {
                offset: other.map(|t| t.offset).unwrap_or_else(|| self.offset()),
                block: block.to_string(),
                message: format!("expected '{}', found {:?}", c, other.map(|t| t.token)),
            }),
        }
    }

    fn expect_word(&mut self, block: &str) -> Result<(String, SourceOffset), StilError> {
        match self.bump()? {
            Some(LexedToken {
                token: Token::Word(w),
                offset,
            }) => Ok((w, offset)),
            other => Err(StilError::Parse {
                offset: other.map(|t| t.offset).unwrap_or_else(|| self.offset()),
                block: block.to_string(),
                message: format!("expected an identifier, found {:?}", other.map(|t| t.token)),
            }),
        }
    }

    fn expect_word_or_string(&mut self, block: &str) -> Result<(String, SourceOffset), StilError> {
        match self.bump()? {
            Some(LexedToken {
                token: Token::Word(w),
                offset,
            }) => Ok((w, offset)),
            Some(LexedToken {
                token: Token::Str(w),
                offset,
            }) => Ok((w, offset)),
            other => Err(StilError::Parse {
                offset: other.map(|t| t.offset).unwrap_or_else(|| self.offset()),
                block: block.to_string(),
                message: format!("expected a value, found {:?}", other.map(|t| t.token)),
            }),
        }
    }

    fn at_symbol(&mut self, c: char) -> Result<bool, StilError> {
        Ok(matches!(self.peek()?, Some(LexedToken{ token: Token::Symbol(s), .. }) if *s == c))
    }

    /// Skip a block whose opening `{` was already consumed, tracking
    /// nested braces, for the "unrecognized top-level block" tolerance
    /// of spec.md #4.2.
    fn skip_to_matching_brace(&mut self, block: &str) -> Result<(), StilError> {
        let mut depth = 1usize;
        while depth > 0 {
            match self.bump()? {
                Some(LexedToken {
                    token: Token::Symbol('{'),
                    ..
                }) => depth += 1,
                Some(LexedToken {
                    token: Token::Symbol('}'),
                    ..
                }) => depth -= 1,
                Some(_) => {}
                None => {
                    return Err(StilError::Parse {
                        offset: self.offset(),
                        block: block.to_string(),
                        message: "unexpected end of input skipping unrecognized block".to_string(),
                    })
                }
            }
        }
        Ok(())
    }
}

/// Parse every top-level block of `src` up to (but not through) the
/// `Pattern` block, then hand back a lazy cursor positioned right
/// after `Pattern <name> {` for the lowering engine to stream.
pub fn parse_document(src: &str, deny_list: &DenyList) -> Result<ParsedDocument<'_>, StilError> {
    let mut cursor = Cursor::new(src);
    let mut header = HeaderInfo::new();
    let mut signals = SignalTable::new();
    let mut groups = SignalGroupTable::new();
    let mut waveform_tables = WaveformTableTable::new();
    let mut callables = CallableTable::new();
    let mut warnings = Vec::new();

    loop {
        let (keyword, keyword_offset) = match cursor.bump()? {
            None => {
                return Err(StilError::Parse {
                    offset: cursor.offset(),
                    block: "STIL".to_string(),
                    message: "no Pattern block found".to_string(),
                })
            }
            Some(LexedToken {
                token: Token::Word(w),
                offset,
            }) => (w, offset),
            Some(other) => {
                return Err(StilError::Parse {
                    offset: other.offset,
                    block: "STIL".to_string(),
                    message: format!("expected a block keyword, found {:?}", other.token),
                })
            }
        };

        match keyword.as_str() {
            "STIL" => {
                // `STIL 7.0;` version pragma: optional version word then ';'.
                if !cursor.at_symbol(';')? {
                    cursor.bump()?;
                }
                cursor.expect_symbol(';', "STIL")?;
            }
            "Header" => {
                cursor.expect_symbol('{', "Header")?;
                parse_header(&mut cursor, &mut header)?;
            }
            "Signals" => {
                cursor.expect_symbol('{', "Signals")?;
                parse_signals(&mut cursor, &mut signals)?;
            }
            "SignalGroups" => {
                cursor.expect_symbol('{', "SignalGroups")?;
                parse_signal_groups(&mut cursor, &mut groups)?;
            }
            "Timing" => {
                cursor.expect_symbol('{', "Timing")?;
                parse_timing(&mut cursor, &mut waveform_tables)?;
            }
            "Procedures" => {
                cursor.expect_symbol('{', "Procedures")?;
                parse_callables(&mut cursor, &mut callables, deny_list, &mut warnings, true)?;
            }
            "MacroDefs" => {
                cursor.expect_symbol('{', "MacroDefs")?;
                parse_callables(&mut cursor, &mut callables, deny_list, &mut warnings, false)?;
            }
            "Pattern" => {
                let (pattern_name, _) = cursor.expect_word("Pattern")?;
                cursor.expect_symbol('{', "Pattern")?;
                groups.finalize()?;
                callables.check_acyclic()?;
                return Ok(ParsedDocument {
                    header,
                    signals,
                    groups,
                    waveform_tables,
                    callables,
                    pattern_name: Some(pattern_name),
                    pattern_body: cursor.lexer,
                    warnings,
                });
            }
            other => {
                warnings.push((
                    keyword_offset,
                    format!("skipping unrecognized top-level block '{}'", other),
                ));
                cursor.expect_symbol('{', other)?;
                cursor.skip_to_matching_brace(other)?;
            }
        }
    }
}

fn parse_header(cursor: &mut Cursor<'_>, header: &mut HeaderInfo) -> Result<(), StilError> {
    loop {
        if cursor.at_symbol('}')? {
            cursor.bump()?;
            return Ok(());
        }
        let (key, _) = cursor.expect_word("Header")?;
        cursor.expect_symbol('=', "Header")?;
        let (value, _) = cursor.expect_word_or_string("Header")?;
        cursor.expect_symbol(';', "Header")?;
        header.insert(key, value);
    }
}

fn parse_signals(cursor: &mut Cursor<'_>, signals: &mut SignalTable) -> Result<(), StilError> {
    loop {
        if cursor.at_symbol('}')? {
            cursor.bump()?;
            return Ok(());
        }
        let (name, offset) = cursor.expect_word("Signals")?;
        let (dir_word, _) = cursor.expect_word("Signals")?;
        let direction = Direction::parse(&dir_word).ok_or_else(|| StilError::Parse {
            offset,
            block: "Signals".to_string(),
            message: format!("unknown signal direction '{}'", dir_word),
        })?;
        let default_wfc = if cursor.at_symbol(';')? {
            None
        } else {
            let (wfc_word, wfc_offset) = cursor.expect_word("Signals")?;
            let mut chars = wfc_word.chars();
            let c = chars.next().ok_or_else(|| StilError::Parse {
                offset: wfc_offset,
                block: "Signals".to_string(),
                message: "empty default WFC".to_string(),
            })?;
            if chars.next().is_some() {
                return Err(StilError::Parse {
                    offset: wfc_offset,
                    block: "Signals".to_string(),
                    message: format!("default WFC must be a single character, found '{}'", wfc_word),
                });
            }
            Some(Wfc::new(c).map_err(|c| StilError::Parse {
                offset: wfc_offset,
                block: "Signals".to_string(),
                message: format!("invalid default WFC '{}'", c),
            })?)
        };
        cursor.expect_symbol(';', "Signals")?;
        signals.insert(SignalDef {
            name,
            direction,
            default_wfc,
        })?;
    }
}

fn parse_signal_groups(
    cursor: &mut Cursor<'_>,
    groups: &mut SignalGroupTable,
) -> Result<(), StilError> {
    loop {
        if cursor.at_symbol('}')? {
            cursor.bump()?;
            return Ok(());
        }
        let (name, offset) = cursor.expect_word("SignalGroups")?;
        cursor.expect_symbol('{', "SignalGroups")?;
        let mut members = Vec::new();
        loop {
            if cursor.at_symbol('}')? {
                cursor.bump()?;
                break;
            }
            let (member, _) = cursor.expect_word("SignalGroups")?;
            members.push(member);
            if cursor.at_symbol(',')? {
                cursor.bump()?;
            }
        }
        cursor.expect_symbol(';', "SignalGroups")?;
        groups.insert(SignalGroupDef {
            name,
            members,
            offset,
        })?;
    }
}

fn parse_timing(
    cursor: &mut Cursor<'_>,
    waveform_tables: &mut WaveformTableTable,
) -> Result<(), StilError> {
    loop {
        if cursor.at_symbol('}')? {
            cursor.bump()?;
            return Ok(());
        }
        let (name, _) = cursor.expect_word("Timing")?;
        cursor.expect_symbol('{', "Timing")?;
        let mut period = None;
        let mut mapping: BTreeMap<String, BTreeMap<Wfc, Wfc>> = BTreeMap::new();
        loop {
            if cursor.at_symbol('}')? {
                cursor.bump()?;
                break;
            }
            let (key, key_offset) = cursor.expect_word("Timing")?;
            if key == "Period" {
                let (value, _) = cursor.expect_word("Timing")?;
                period = Some(parse_int(&value).ok_or_else(|| StilError::Parse {
                    offset: key_offset,
                    block: "Timing".to_string(),
                    message: format!("invalid Period value '{}'", value),
                })?);
                cursor.expect_symbol(';', "Timing")?;
                continue;
            }
            // signal_name { raw -> driven; ... }
            cursor.expect_symbol('{', "Timing")?;
            let mut per_signal = BTreeMap::new();
            loop {
                if cursor.at_symbol('}')? {
                    cursor.bump()?;
                    break;
                }
                let (raw_word, raw_offset) = cursor.expect_word("Timing")?;
                let raw = single_wfc(&raw_word, raw_offset, "Timing")?;
                cursor.expect_symbol(':', "Timing")?;
                let (driven_word, driven_offset) = cursor.expect_word("Timing")?;
                let driven = single_wfc(&driven_word, driven_offset, "Timing")?;
                cursor.expect_symbol(';', "Timing")?;
                per_signal.insert(raw, driven);
            }
            mapping.insert(key, per_signal);
        }
        cursor.expect_symbol(';', "Timing")?;
        waveform_tables.insert(WaveformTableDef {
            name,
            period,
            mapping,
        })?;
    }
}

fn single_wfc(word: &str, offset: SourceOffset, block: &str) -> Result<Wfc, StilError> {
    let mut chars = word.chars();
    let c = chars.next().ok_or_else(|| StilError::Parse {
        offset,
        block: block.to_string(),
        message: "empty WFC".to_string(),
    })?;
    if chars.next().is_some() {
        return Err(StilError::Parse {
            offset,
            block: block.to_string(),
            message: format!("WFC must be a single character, found '{}'", word),
        });
    }
    Wfc::new(c).map_err(|c| StilError::Parse {
        offset,
        block: block.to_string(),
        message: format!("invalid WFC '{}'", c),
    })
}

fn parse_callables(
    cursor: &mut Cursor<'_>,
    callables: &mut CallableTable,
    deny_list: &DenyList,
    warnings: &mut Vec<(SourceOffset, String)>,
    is_procedure: bool,
) -> Result<(), StilError> {
    loop {
        if cursor.at_symbol('}')? {
            cursor.bump()?;
            return Ok(());
        }
        let (name, offset) = cursor.expect_word(if is_procedure { "Procedures" } else { "MacroDefs" })?;
        cursor.expect_symbol('{', if is_procedure { "Procedures" } else { "MacroDefs" })?;
        // Hand the block parser's own lexer to a `PatternStatementParser`
        // for the body, then reclaim it -- keeps absolute byte offsets
        // intact (no re-slicing/re-scanning from zero) while reusing the
        // same statement grammar as `Pattern` bodies.
        let lexer = cursor.take_lexer();
        let mut body_parser = PatternStatementParser::new(lexer, deny_list);
        let body = body_parser.parse_statements_until('}')?;
        warnings.extend(body_parser.take_warnings());
        cursor.restore_lexer(body_parser.into_lexer());
        let def = CallableDef { name, body, offset };
        if is_procedure {
            callables.insert_procedure(def)?;
        } else {
            callables.insert_macro(def)?;
        }
    }
}

impl<'a> Cursor<'a> {
    fn take_lexer(&mut self) -> Lexer<'a> {
        self.lookahead = None;
        std::mem::replace(&mut self.lexer, Lexer::new(""))
    }

    fn restore_lexer(&mut self, lexer: Lexer<'a>) {
        self.lexer = lexer;
    }
}
