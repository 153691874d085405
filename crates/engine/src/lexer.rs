//! The STIL lexer of spec.md #4.1.
//!
//! Pure and restartable: `Lexer` holds nothing but a `Peekable` char
//! cursor over the source and a byte offset, and produces one token at
//! a time through `next_token`. It never buffers more than the single
//! character of lookahead `Peekable` gives it, and never materializes
//! the whole token stream into a `Vec` -- spec.md #1/#5 call STIL
//! sources out as "potentially very large," so the parser above this
//! pulls tokens on demand instead of the teacher's
//! `seq-compiler::parser::tokenize`, which eagerly tokenizes a whole
//! (small, single) `.seq` file into a `Vec<Token>`.
//!
//! Structural tokens (`{ } ; , = : '`) are returned as `Token::Symbol`;
//! everything else -- identifiers, decimal/hex integers, and WFC
//! sequences including `\rN C` repeats -- comes back as `Token::Word`,
//! since which of those three a given word *is* depends on where the
//! block/pattern parser is in the grammar, not on anything the lexer
//! alone can decide.

use stil_core::{SourceOffset, StilError};
use std::iter::Peekable;
use std::str::CharIndices;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Symbol(char),
    Word(String),
    Str(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct LexedToken {
    pub token: Token,
    pub offset: SourceOffset,
}

const SYMBOLS: &[char] = &['{', '}', ';', ',', '=', ':', '\''];

#[derive(Clone)]
pub struct Lexer<'a> {
    src: &'a str,
    chars: Peekable<CharIndices<'a>>,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str) -> Self {
        Lexer {
            src,
            chars: src.char_indices().peekable(),
        }
    }

    /// Byte offset consumed so far, for the host's progress events
    /// (spec.md #5: "a progress event approximately every fixed
    /// byte-count of input consumed").
    pub fn bytes_consumed(&mut self) -> u64 {
        match self.chars.peek() {
            Some((i, _)) => *i as u64,
            None => self.src.len() as u64,
        }
    }

    fn peek_char(&mut self) -> Option<char> {
        self.chars.peek().map(|&(_, c)| c)
    }

    fn bump(&mut self) -> Option<(usize, char)> {
        self.chars.next()
    }

    fn skip_whitespace_and_comments(&mut self) {
        loop {
            while matches!(self.peek_char(), Some(c) if c.is_whitespace()) {
                self.bump();
            }
            if self.peek_char() == Some('/') {
                let mut lookahead = self.chars.clone();
                lookahead.next();
                match lookahead.peek() {
                    Some(&(_, '/')) => {
                        while !matches!(self.peek_char(), Some('\n') | None) {
                            self.bump();
                        }
                        continue;
                    }
                    Some(&(_, '*')) => {
                        self.bump();
                        self.bump();
                        loop {
                            match self.bump() {
                                None => break,
                                Some((_, '*')) if self.peek_char() == Some('/') => {
                                    self.bump();
                                    break;
                                }
                                _ => {}
                            }
                        }
                        continue;
                    }
                    _ => {}
                }
            }
            break;
        }
    }

    fn scan_string(&mut self, start: usize) -> Result<LexedToken, StilError> {
        let mut value = String::new();
        loop {
            match self.bump() {
                Some((_, '"')) => {
                    return Ok(LexedToken {
                        token: Token::Str(value),
                        offset: SourceOffset::new(start as u64),
                    })
                }
                Some((_, c)) => value.push(c),
                None => {
                    return Err(StilError::Lex {
                        offset: SourceOffset::new(start as u64),
                        message: "unterminated string literal".to_string(),
                    })
                }
            }
        }
    }

    /// Scan a maximal run of non-whitespace, non-symbol, non-quote
    /// characters, validating any `\rN C` repeat escapes as it goes
    /// (spec.md #4.1: "malformed repeat ... is LexError").
    fn scan_word(&mut self, start: usize) -> Result<LexedToken, StilError> {
        let mut value = String::new();
        while let Some(c) = self.peek_char() {
            if c.is_whitespace() || SYMBOLS.contains(&c) || c == '"' {
                break;
            }
            if c == '/' {
                let mut lookahead = self.chars.clone();
                lookahead.next();
                if matches!(lookahead.peek(), Some(&(_, '/')) | Some(&(_, '*'))) {
                    break;
                }
            }
            if c == '\\' {
                value.push_str(&self.scan_repeat_escape(start)?);
                continue;
            }
            value.push(c);
            self.bump();
        }
        Ok(LexedToken {
            token: Token::Word(value),
            offset: SourceOffset::new(start as u64),
        })
    }

    /// Consume and validate one `\rN C` escape, returning its literal
    /// text (unexpanded -- expansion happens during vector lowering,
    /// spec.md #4.3.1).
    fn scan_repeat_escape(&mut self, word_start: usize) -> Result<String, StilError> {
        let escape_start = self.chars.peek().map(|&(i, _)| i).unwrap_or(word_start);
        self.bump(); // '\\'
        let malformed = || StilError::Lex {
            offset: SourceOffset::new(escape_start as u64),
            message: "malformed repeat: expected \\rN C (a positive count then a WFC char)"
                .to_string(),
        };

        if self.bump().map(|(_, c)| c) != Some('r') {
            return Err(malformed());
        }

        let mut digits = String::new();
        while matches!(self.peek_char(), Some(c) if c.is_ascii_digit()) {
            digits.push(self.bump().unwrap().1);
        }
        if digits.is_empty() || digits.parse::<u64>().map(|n| n == 0).unwrap_or(true) {
            return Err(malformed());
        }

        if self.peek_char() == Some(' ') {
            self.bump();
        }

        match self.bump() {
            Some((_, c)) if !c.is_whitespace() => {
                Ok(format!("\\r{}{}{}", digits, " ", c))
            }
            _ => Err(malformed()),
        }
    }

    /// Return the next token, or `None` at end of input.
    pub fn next_token(&mut self) -> Result<Option<LexedToken>, StilError> {
        self.skip_whitespace_and_comments();
        let (start, c) = match self.chars.peek().copied() {
            Some(pair) => pair,
            None => return Ok(None),
        };

        if SYMBOLS.contains(&c) {
            self.bump();
            return Ok(Some(LexedToken {
                token: Token::Symbol(c),
                offset: SourceOffset::new(start as u64),
            }));
        }
        if c == '"' {
            self.bump();
            return self.scan_string(start).map(Some);
        }

        self.scan_word(start).map(Some)
    }
}

/// Parse a decimal or `0x`-prefixed hexadecimal integer, as used for
/// `Loop`/`MatchLoop` counts and waveform table periods.
pub fn parse_int(word: &str) -> Option<u64> {
    if let Some(hex) = word.strip_prefix("0x").or_else(|| word.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).ok()
    } else {
        word.parse::<u64>().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(src: &str) -> Vec<Token> {
        let mut lexer = Lexer::new(src);
        let mut out = Vec::new();
        while let Some(t) = lexer.next_token().unwrap() {
            out.push(t.token);
        }
        out
    }

    #[test]
    fn symbols_and_words() {
        let toks = tokens("Signals{ a In; }");
        assert_eq!(
            toks,
            vec![
                Token::Word("Signals".to_string()),
                Token::Symbol('{'),
                Token::Word("a".to_string()),
                Token::Word("In".to_string()),
                Token::Symbol(';'),
                Token::Symbol('}'),
            ]
        );
    }

    #[test]
    fn quoted_string() {
        let toks = tokens(r#"date = "2026-07-28";"#);
        assert_eq!(
            toks,
            vec![
                Token::Word("date".to_string()),
                Token::Symbol('='),
                Token::Str("2026-07-28".to_string()),
                Token::Symbol(';'),
            ]
        );
    }

    #[test]
    fn unterminated_string_is_lex_error() {
        let mut lexer = Lexer::new(r#""unterminated"#);
        let err = lexer.next_token().unwrap_err();
        assert!(matches!(err, StilError::Lex { .. }));
    }

    #[test]
    fn line_and_block_comments_are_skipped() {
        let toks = tokens("a // line comment\n/* block\ncomment */ b");
        assert_eq!(
            toks,
            vec![Token::Word("a".to_string()), Token::Word("b".to_string())]
        );
    }

    #[test]
    fn valid_repeat_escape_is_kept_literal() {
        let toks = tokens(r"bus=\r4 0;");
        assert_eq!(
            toks,
            vec![
                Token::Word("bus".to_string()),
                Token::Symbol('='),
                Token::Word("\\r4 0".to_string()),
                Token::Symbol(';'),
            ]
        );
    }

    #[test]
    fn repeat_without_count_is_lex_error() {
        let mut lexer = Lexer::new(r"\r 0");
        let err = lexer.next_token().unwrap_err();
        assert!(matches!(err, StilError::Lex { .. }));
    }

    #[test]
    fn repeat_without_char_is_lex_error() {
        let mut lexer = Lexer::new("\\r4");
        let err = lexer.next_token().unwrap_err();
        assert!(matches!(err, StilError::Lex { .. }));
    }

    #[test]
    fn parse_int_handles_hex_and_decimal() {
        assert_eq!(parse_int("42"), Some(42));
        assert_eq!(parse_int("0x1A"), Some(26));
        assert_eq!(parse_int("nope"), None);
    }
}
