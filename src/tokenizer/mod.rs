//! Byte-driven SQL tokenizer.
//!
//! Lexes a PostgreSQL dump stream one byte at a time, grouping tokens into
//! statements terminated by `;`. Nested lexical contexts (dollar-quoted
//! strings and their tags, comments, quoted identifiers) are handled with an
//! explicit stack of `(state, accumulator)` frames rather than recursion, so
//! the tokenizer can suspend at any byte boundary and resume when more input
//! arrives.


use crate::error::{ExtractError, Result};
use smallvec::SmallVec;

/// A classified lexical unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Newline,
    /// Single-character punctuation: `. ; , ( )`
    Special,
    /// String literal content with quoting stripped and escapes resolved.
    String,
    /// Double-quoted identifier, escapes resolved.
    QuotedName,
    /// Maximal run of operator characters.
    Operator,
    /// Identifier or keyword, case as written.
    Name,
    /// Numeric literal, stored as written.
    Number,
}

impl Token {
    pub fn new(kind: TokenKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
        }
    }

    pub fn is_special(&self, text: &str) -> bool {
        self.kind == TokenKind::Special && self.text == text
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SqlState {
    Rest,
    Dollar1,
    DollarTag,
    DollarString,
    DollarStringEndTag,
    Dash1,
    Slash1,
    LineComment,
    Operator,
    NumberInteger,
    NumberDecimal,
    NumberExponent,
    Str,
    StrQuote,
    QuotedId,
    QuotedIdQuote,
    Name,
}

/// What the driver should do with the byte just dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// The byte was consumed; advance the stream cursor.
    Next,
    /// The byte must be reprocessed under the (possibly changed) state.
    Again,
}

/// Result of feeding one byte: the action to take, plus a completed statement
/// if this byte produced the statement terminator.
pub struct Step {
    pub action: Action,
    pub statement: Option<Vec<Token>>,
}

impl Step {
    fn next() -> Self {
        Step {
            action: Action::Next,
            statement: None,
        }
    }

    fn again() -> Self {
        Step {
            action: Action::Again,
            statement: None,
        }
    }

    fn completed(statement: Vec<Token>) -> Self {
        Step {
            action: Action::Next,
            statement: Some(statement),
        }
    }
}

struct Frame {
    state: SqlState,
    accum: Vec<u8>,
}

/// Characters that terminate a bare name when used as operators.
fn is_operator_char(b: u8) -> bool {
    matches!(
        b,
        b'+' | b'-'
            | b'*'
            | b'/'
            | b'<'
            | b'>'
            | b'='
            | b'~'
            | b'!'
            | b'@'
            | b'#'
            | b'%'
            | b'^'
            | b'&'
            | b'|'
            | b'`'
            | b'?'
    )
}

fn is_special_char(b: u8) -> bool {
    matches!(
        b,
        b'$' | b'(' | b')' | b'[' | b']' | b',' | b';' | b':' | b'*' | b'.'
    )
}

/// Characters that begin (and extend) an `Operator` token at dispatch.
fn is_operator_start(b: u8) -> bool {
    matches!(b, b'=' | b':' | b'*' | b'+')
}

pub struct Tokenizer {
    state: SqlState,
    accum: Vec<u8>,
    stack: SmallVec<[Frame; 4]>,
    /// Tag of the dollar-quoted string currently being read, if any.
    dollar_tag: Vec<u8>,
    /// Tokens of the statement being accumulated, in arrival order.
    statement: Vec<Token>,
}

impl Default for Tokenizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Tokenizer {
    pub fn new() -> Self {
        Self {
            state: SqlState::Rest,
            accum: Vec::new(),
            stack: SmallVec::new(),
            dollar_tag: Vec::new(),
            statement: Vec::new(),
        }
    }

    /// True when no partial token, statement, or nested context is pending.
    /// The stream may only end in this condition.
    pub fn is_idle(&self) -> bool {
        self.state == SqlState::Rest && self.stack.is_empty() && self.statement.is_empty()
    }

    fn push_state(&mut self, state: SqlState) {
        self.stack.push(Frame {
            state: self.state,
            accum: std::mem::take(&mut self.accum),
        });
        self.state = state;
    }

    fn pop_state(&mut self) -> Result<()> {
        let frame = self.stack.pop().ok_or_else(|| {
            ExtractError::protocol(format!("state stack underflow in {:?}", self.state))
        })?;
        self.state = frame.state;
        self.accum = frame.accum;
        Ok(())
    }

    /// Finish the token in the live accumulator and append it to the current
    /// statement. A `;` special token instead completes the statement, which
    /// is returned for recognition; the terminator itself is not part of it.
    /// Leading newlines are dropped so statements never start with noise.
    fn commit(&mut self, kind: TokenKind) -> Option<Vec<Token>> {
        let text = String::from_utf8_lossy(&self.accum).into_owned();

        if kind == TokenKind::Newline && self.statement.is_empty() {
            return None;
        }

        if kind == TokenKind::Special && text == ";" {
            return Some(std::mem::take(&mut self.statement));
        }

        self.statement.push(Token { kind, text });
        None
    }

    /// Dispatch one byte. `offset` is the byte's position in the original
    /// stream, used only for error reporting.
    pub fn feed(&mut self, chr: u8, offset: u64) -> Result<Step> {
        match self.state {
            SqlState::Rest => {
                self.accum.clear();

                if chr.is_ascii_alphabetic() || chr == b'_' {
                    self.push_state(SqlState::Name);
                    return Ok(Step::again());
                }

                if chr == b'\n' {
                    self.commit(TokenKind::Newline);
                    return Ok(Step::next());
                }

                if chr.is_ascii_whitespace() {
                    return Ok(Step::next());
                }

                if matches!(chr, b'.' | b';' | b',' | b'(' | b')') {
                    self.accum.push(chr);
                    return Ok(match self.commit(TokenKind::Special) {
                        Some(stmt) => Step::completed(stmt),
                        None => Step::next(),
                    });
                }

                if chr == b'$' {
                    self.push_state(SqlState::Dollar1);
                    return Ok(Step::next());
                }

                if chr == b'-' {
                    self.push_state(SqlState::Dash1);
                    return Ok(Step::next());
                }

                if chr == b'/' {
                    self.push_state(SqlState::Slash1);
                    return Ok(Step::next());
                }

                if is_operator_start(chr) {
                    self.push_state(SqlState::Operator);
                    return Ok(Step::again());
                }

                if chr.is_ascii_digit() {
                    self.push_state(SqlState::NumberInteger);
                    return Ok(Step::again());
                }

                if chr == b'\'' {
                    self.push_state(SqlState::Str);
                    return Ok(Step::next());
                }

                if chr == b'"' {
                    self.push_state(SqlState::QuotedId);
                    return Ok(Step::next());
                }

                Err(ExtractError::format(
                    offset,
                    format!("invalid character {:?}", chr as char),
                ))
            }

            SqlState::Dollar1 => {
                if chr == b'$' {
                    // Anonymous tag: `$$ ... $$`.
                    self.dollar_tag.clear();
                    self.state = SqlState::DollarString;
                    return Ok(Step::next());
                }

                // Any character is technically valid in a dollar-quote tag,
                // but dumps only produce letters and underscores.
                if chr == b'_' || chr.is_ascii_alphabetic() {
                    self.state = SqlState::DollarString;
                    self.push_state(SqlState::DollarTag);
                    return Ok(Step::again());
                }

                Err(ExtractError::format(
                    offset,
                    format!("invalid sequence \"${}\"", chr as char),
                ))
            }

            SqlState::DollarTag => {
                if chr == b'$' {
                    self.dollar_tag = self.accum.clone();
                    self.pop_state()?;
                    return Ok(Step::next());
                }

                if chr == b'_' || chr.is_ascii_alphabetic() {
                    self.accum.push(chr);
                    return Ok(Step::next());
                }

                Err(ExtractError::format(
                    offset,
                    format!(
                        "invalid sequence \"${}{}\"",
                        String::from_utf8_lossy(&self.accum),
                        chr as char
                    ),
                ))
            }

            SqlState::DollarString => {
                if chr == b'$' {
                    self.push_state(SqlState::DollarStringEndTag);
                    return Ok(Step::next());
                }

                if chr == b'\n' {
                    return Err(ExtractError::format(
                        offset,
                        format!(
                            "unterminated string \"{}\"",
                            String::from_utf8_lossy(&self.accum)
                        ),
                    ));
                }

                self.accum.push(chr);
                Ok(Step::next())
            }

            SqlState::DollarStringEndTag => {
                if chr == b'$' {
                    if self.accum == self.dollar_tag {
                        // End of the string. The literal body lives in the
                        // frame above us, which must be the DollarString
                        // frame; pop back to it, emit, then pop it too.
                        self.pop_state()?;
                        self.dollar_tag.clear();
                        let stmt = self.commit(TokenKind::String);
                        if self.state != SqlState::DollarString {
                            return Err(ExtractError::protocol(format!(
                                "dollar-quote end tag closed over {:?}",
                                self.state
                            )));
                        }
                        self.pop_state()?;
                        return Ok(match stmt {
                            Some(stmt) => Step::completed(stmt),
                            None => Step::next(),
                        });
                    }

                    // False alarm: the candidate tag, dollars included, is
                    // ordinary string content. Drain it into the enclosing
                    // accumulator.
                    let candidate = std::mem::take(&mut self.accum);
                    self.pop_state()?;
                    self.accum.push(b'$');
                    self.accum.extend_from_slice(&candidate);
                    self.accum.push(b'$');
                    return Ok(Step::next());
                }

                self.accum.push(chr);

                if self.accum.len() < self.dollar_tag.len() {
                    // Need more tag characters before we can decide.
                    return Ok(Step::next());
                }

                if self.accum == self.dollar_tag {
                    // This is the tag; now we need the closing dollar sign.
                    return Ok(Step::next());
                }

                // False alarm, no closing dollar seen yet.
                let candidate = std::mem::take(&mut self.accum);
                self.pop_state()?;
                self.accum.push(b'$');
                self.accum.extend_from_slice(&candidate);
                Ok(Step::next())
            }

            SqlState::QuotedId => {
                if chr == b'"' {
                    self.state = SqlState::QuotedIdQuote;
                    return Ok(Step::next());
                }

                if chr == b'\n' {
                    return Err(ExtractError::format(
                        offset,
                        format!(
                            "unterminated quoted identifier \"{}\"",
                            String::from_utf8_lossy(&self.accum)
                        ),
                    ));
                }

                self.accum.push(chr);
                Ok(Step::next())
            }

            SqlState::QuotedIdQuote => {
                if chr == b'"' {
                    // Doubled quote: escaped literal quote character.
                    self.accum.push(b'"');
                    self.state = SqlState::QuotedId;
                    return Ok(Step::next());
                }

                let stmt = self.commit(TokenKind::QuotedName);
                self.pop_state()?;
                Ok(Step {
                    action: Action::Again,
                    statement: stmt,
                })
            }

            SqlState::Str => {
                if chr == b'\'' {
                    self.state = SqlState::StrQuote;
                    return Ok(Step::next());
                }

                if chr == b'\n' {
                    return Err(ExtractError::format(
                        offset,
                        format!(
                            "unterminated string \"{}\"",
                            String::from_utf8_lossy(&self.accum)
                        ),
                    ));
                }

                self.accum.push(chr);
                Ok(Step::next())
            }

            SqlState::StrQuote => {
                if chr == b'\'' {
                    self.accum.push(b'\'');
                    self.state = SqlState::Str;
                    return Ok(Step::next());
                }

                let stmt = self.commit(TokenKind::String);
                self.pop_state()?;
                Ok(Step {
                    action: Action::Again,
                    statement: stmt,
                })
            }

            SqlState::Operator => {
                if is_operator_start(chr) {
                    self.accum.push(chr);
                    return Ok(Step::next());
                }

                let stmt = self.commit(TokenKind::Operator);
                self.pop_state()?;
                Ok(Step {
                    action: Action::Again,
                    statement: stmt,
                })
            }

            SqlState::Dash1 => {
                if chr == b'-' {
                    self.state = SqlState::LineComment;
                    return Ok(Step::next());
                }

                Err(ExtractError::format(
                    offset,
                    format!("invalid sequence \"-{}\"", chr as char),
                ))
            }

            SqlState::Slash1 => {
                if chr == b'/' {
                    self.state = SqlState::LineComment;
                    return Ok(Step::next());
                }

                Err(ExtractError::format(
                    offset,
                    format!("invalid sequence \"/{}\"", chr as char),
                ))
            }

            SqlState::LineComment => {
                if chr == b'\n' {
                    self.pop_state()?;
                }
                Ok(Step::next())
            }

            SqlState::Name => {
                if chr.is_ascii_alphanumeric() || chr == b'_' || chr == b'$' {
                    self.accum.push(chr);
                    return Ok(Step::next());
                }

                if chr.is_ascii_whitespace() || is_operator_char(chr) || is_special_char(chr) {
                    let stmt = self.commit(TokenKind::Name);
                    self.pop_state()?;
                    return Ok(Step {
                        action: Action::Again,
                        statement: stmt,
                    });
                }

                Err(ExtractError::format(
                    offset,
                    format!("invalid character {:?}", chr as char),
                ))
            }

            SqlState::NumberInteger => {
                if chr.is_ascii_digit() {
                    self.accum.push(chr);
                    return Ok(Step::next());
                }

                if chr == b'.' {
                    self.accum.push(chr);
                    self.state = SqlState::NumberDecimal;
                    return Ok(Step::next());
                }

                if chr == b'e' {
                    self.accum.push(chr);
                    self.state = SqlState::NumberExponent;
                    return Ok(Step::next());
                }

                let stmt = self.commit(TokenKind::Number);
                self.pop_state()?;
                Ok(Step {
                    action: Action::Again,
                    statement: stmt,
                })
            }

            SqlState::NumberDecimal => {
                if chr.is_ascii_digit() {
                    self.accum.push(chr);
                    return Ok(Step::next());
                }

                if chr == b'e' {
                    self.accum.push(chr);
                    self.state = SqlState::NumberExponent;
                    return Ok(Step::next());
                }

                let stmt = self.commit(TokenKind::Number);
                self.pop_state()?;
                Ok(Step {
                    action: Action::Again,
                    statement: stmt,
                })
            }

            SqlState::NumberExponent => {
                // A sign is only valid immediately after the `e`.
                if (chr == b'+' || chr == b'-') && self.accum.last() == Some(&b'e') {
                    self.accum.push(chr);
                    return Ok(Step::next());
                }

                if chr.is_ascii_digit() {
                    self.accum.push(chr);
                    return Ok(Step::next());
                }

                let stmt = self.commit(TokenKind::Number);
                self.pop_state()?;
                Ok(Step {
                    action: Action::Again,
                    statement: stmt,
                })
            }
        }
    }
}
