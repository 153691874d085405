//! Parses Pattern Statements (spec.md #3) from a token stream.
//!
//! Used in two places: bounded, fully-materializing use inside
//! `Procedures`/`MacroDefs`/`Loop`/`MatchLoop` bodies (spec.md #4.2:
//! "Procedures are pre-parsed to an internal statement list"), and
//! unbounded, one-statement-at-a-time use for the top-level `Pattern`
//! body that `StatementCursor` streams (spec.md #4.2: "the parser
//! hands a statement cursor to the lowering engine -- it does not
//! materialize the pattern body into memory").

use crate::ast::{Statement, StatementKind, VectorAssignment};
use crate::lexer::{parse_int, LexedToken, Lexer, Token};
use stil_core::{DenyList, SourceOffset, StilError};

pub struct PatternStatementParser<'a, 'd> {
    lexer: Lexer<'a>,
    lookahead: Option<LexedToken>,
    deny_list: &'d DenyList,
    warnings: Vec<(SourceOffset, String)>,
}

impl<'a, 'd> PatternStatementParser<'a, 'd> {
    pub fn new(lexer: Lexer<'a>, deny_list: &'d DenyList) -> Self {
        PatternStatementParser {
            lexer,
            lookahead: None,
            deny_list,
            warnings: Vec::new(),
        }
    }

    /// Warnings accumulated (and not yet drained) from deny-listed
    /// statements skipped during parsing.
    pub fn take_warnings(&mut self) -> Vec<(SourceOffset, String)> {
        std::mem::take(&mut self.warnings)
    }

    pub fn bytes_consumed(&mut self) -> u64 {
        self.lexer.bytes_consumed()
    }

    /// Reclaim the underlying lexer, positioned wherever parsing left
    /// off. Lets a caller (the block parser, splicing a bounded
    /// `Procedures`/`MacroDefs` body parse into its own top-level
    /// token stream) resume scanning from exactly that point without
    /// losing the absolute byte-offset tracking `Lexer` keeps.
    pub fn into_lexer(self) -> Lexer<'a> {
        self.lexer
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

    fn current_offset(&mut self) -> SourceOffset {
        SourceOffset::new(self.lexer.bytes_consumed())
    }

    fn expect_symbol(&mut self, c: char) -> Result<SourceOffset, StilError> {
        match self.bump()? {
            Some(LexedToken {
                token: Token::Symbol(s),
                offset,
            }) if s == c => Ok(offset),
            other => Err(StilError::Parse {
                offset: other.map(|t| t.offset).unwrap_or_else(|| self.current_offset()),
                block: "Pattern".to_string(),
                message: format!("expected '{}', found {:?}", c, other.map(|t| t.token)),
            }),
        }
    }

    fn expect_word(&mut self) -> Result<(String, SourceOffset), StilError> {
        match self.bump()? {
            Some(LexedToken {
                token: Token::Word(w),
                offset,
            }) => Ok((w, offset)),
            other => Err(StilError::Parse {
                offset: other.map(|t| t.offset).unwrap_or_else(|| self.current_offset()),
                block: "Pattern".to_string(),
                message: format!("expected an identifier, found {:?}", other.map(|t| t.token)),
            }),
        }
    }

    fn expect_int(&mut self) -> Result<(u32, SourceOffset), StilError> {
        let (word, offset) = self.expect_word()?;
        let n = parse_int(&word).ok_or_else(|| StilError::Parse {
            offset,
            block: "Pattern".to_string(),
            message: format!("expected an integer count, found '{}'", word),
        })?;
        let n = u32::try_from(n).map_err(|_| StilError::Parse {
            offset,
            block: "Pattern".to_string(),
            message: format!("count '{}' is out of range", word),
        })?;
        Ok((n, offset))
    }

    /// Parse one statement, or `Ok(None)` if the next token closes the
    /// enclosing block (`}`) or the source is exhausted. The closing
    /// `}`, if any, is *not* consumed -- the caller decides whether it
    /// belongs to them.
    pub fn next_statement(&mut self) -> Result<Option<Statement>, StilError> {
        loop {
            match self.peek()? {
                None => return Ok(None),
                Some(LexedToken {
                    token: Token::Symbol('}'),
                    ..
                }) => return Ok(None),
                _ => {}
            }

            let (keyword, offset) = self.expect_word()?;
            match keyword.as_str() {
                "V" => return self.parse_vector(offset).map(Some),
                "W" => {
                    let (name, _) = self.expect_word()?;
                    self.expect_symbol(';')?;
                    return Ok(Some(Statement {
                        kind: StatementKind::SetWaveformTable(name),
                        offset,
                    }));
                }
                "Loop" => return self.parse_loop(offset, false).map(Some),
                "MatchLoop" => return self.parse_loop(offset, true).map(Some),
                "Call" => {
                    let (name, _) = self.expect_word()?;
                    self.expect_symbol(';')?;
                    return Ok(Some(Statement {
                        kind: StatementKind::Call(name),
                        offset,
                    }));
                }
                "Macro" => {
                    let (name, _) = self.expect_word()?;
                    self.expect_symbol(';')?;
                    return Ok(Some(Statement {
                        kind: StatementKind::Macro(name),
                        offset,
                    }));
                }
                "Stop" => {
                    self.expect_symbol(';')?;
                    return Ok(Some(Statement {
                        kind: StatementKind::Stop,
                        offset,
                    }));
                }
                "Goto" => {
                    let (label, _) = self.expect_word()?;
                    self.expect_symbol(';')?;
                    return Ok(Some(Statement {
                        kind: StatementKind::Goto(label),
                        offset,
                    }));
                }
                "IddqTestPoint" => {
                    self.expect_symbol(';')?;
                    return Ok(Some(Statement {
                        kind: StatementKind::IddqTestPoint,
                        offset,
                    }));
                }
                "Return" => {
                    self.expect_symbol(';')?;
                    return Ok(Some(Statement {
                        kind: StatementKind::Return,
                        offset,
                    }));
                }
                "Label" => {
                    let (name, _) = self.expect_word()?;
                    self.expect_symbol(';')?;
                    return Ok(Some(Statement {
                        kind: StatementKind::Label(name),
                        offset,
                    }));
                }
                other => {
                    if self.deny_list.contains(other) {
                        self.skip_unknown_statement()?;
                        self.warnings.push((
                            offset,
                            format!("skipped deny-listed construct '{}'", other),
                        ));
                        continue;
                    }
                    return Err(StilError::UnsupportedConstruct {
                        offset,
                        message: format!(
                            "'{}' is not in the supported grammar subset and is not deny-listed",
                            other
                        ),
                    });
                }
            }
        }
    }

    /// Parse all statements up to, and consuming, the matching `end`
    /// symbol (used for `Procedures`/`MacroDefs`/`Loop`/`MatchLoop`
    /// bodies, which are bounded and safe to fully materialize).
    pub fn parse_statements_until(&mut self, end: char) -> Result<Vec<Statement>, StilError> {
        let mut out = Vec::new();
        while let Some(stmt) = self.next_statement()? {
            out.push(stmt);
        }
        self.expect_symbol(end)?;
        Ok(out)
    }

    /// Parse all statements to the end of the source, with no
    /// enclosing `}` to consume. Used by tests and any caller handed a
    /// standalone statement list rather than a bounded block body.
    pub fn parse_statements_until_eof(&mut self) -> Result<Vec<Statement>, StilError> {
        let mut out = Vec::new();
        while let Some(stmt) = self.next_statement()? {
            out.push(stmt);
        }
        Ok(out)
    }

    fn parse_vector(&mut self, offset: SourceOffset) -> Result<Statement, StilError> {
        self.expect_symbol('{')?;
        let mut assignments = Vec::new();
        loop {
            if matches!(
                self.peek()?,
                Some(LexedToken {
                    token: Token::Symbol('}'),
                    ..
                })
            ) {
                self.bump()?;
                break;
            }
            let (target, _) = self.expect_word()?;
            self.expect_symbol('=')?;
            let (wfc_text, _) = self.expect_word()?;
            self.expect_symbol(';')?;
            assignments.push(VectorAssignment { target, wfc_text });
        }
        Ok(Statement {
            kind: StatementKind::Vector(assignments),
            offset,
        })
    }

    fn parse_loop(&mut self, offset: SourceOffset, is_match: bool) -> Result<Statement, StilError> {
        let (count, _) = self.expect_int()?;
        self.expect_symbol('{')?;
        let body = self.parse_statements_until('}')?;
        let kind = if is_match {
            StatementKind::MatchLoop { count, body }
        } else {
            StatementKind::Loop { count, body }
        };
        Ok(Statement { kind, offset })
    }

    /// Skip a deny-listed statement we don't otherwise understand: if
    /// it opens with `{`, skip to the matching `}`; otherwise skip to
    /// the next `;` (mirrors the block parser's "warn + skip to
    /// matching `}`" tolerance for unrecognized top-level blocks,
    /// spec.md #4.2).
    fn skip_unknown_statement(&mut self) -> Result<(), StilError> {
        if matches!(
            self.peek()?,
            Some(LexedToken {
                token: Token::Symbol('{'),
                ..
            })
        ) {
            self.bump()?;
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
                            offset: self.current_offset(),
                            block: "Pattern".to_string(),
                            message: "unexpected end of input skipping deny-listed construct"
                                .to_string(),
                        })
                    }
                }
            }
        } else {
            loop {
                match self.bump()? {
                    Some(LexedToken {
                        token: Token::Symbol(';'),
                        ..
                    }) => break,
                    Some(_) => {}
                    None => {
                        return Err(StilError::Parse {
                            offset: self.current_offset(),
                            block: "Pattern".to_string(),
                            message: "unexpected end of input skipping deny-listed construct"
                                .to_string(),
                        })
                    }
                }
            }
        }
        Ok(())
    }
}
