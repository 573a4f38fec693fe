//! COPY block data parser.
//!
//! Active only between a recognized `COPY ... FROM stdin` statement and its
//! `\.` end-of-data line. Decodes tab-delimited, backslash-escaped rows one
//! byte at a time and hands each completed row back to the driver.
//!
//! The null marker (`\N`) is probed speculatively, the same way the
//! tokenizer probes dollar-quote end tags: bytes that match the marker so
//! far are buffered, and on the first mismatch the buffer is handed back for
//! re-injection at the head of the byte stream to be re-read as ordinary
//! column content.

use crate::error::{ExtractError, Result};
use crate::statement::CopySpec;
use crate::tokenizer::Action;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CopyState {
    /// Expecting the newline that immediately follows the COPY statement.
    LineStart,
    /// Probing the accumulator against the null marker.
    NullCheck,
    /// Accumulating literal field bytes.
    Column,
    /// The byte after a backslash, appended literally.
    EscapedByte,
    /// Saw `\.` at the start of a row; a newline confirms end-of-data.
    MaybeEndOfData,
}

/// One decoded row: field values in column order, `None` for nulls.
pub type CopyRow = Vec<Option<String>>;

/// Result of feeding one byte to the COPY parser. At most one of `row`,
/// `reinject`, and `done` is set per step; all effects are applied by the
/// driver so the parser itself never touches the stream or the sink.
pub struct CopyOutcome {
    pub action: Action,
    pub row: Option<CopyRow>,
    pub reinject: Option<Vec<u8>>,
    pub done: bool,
}

impl CopyOutcome {
    fn next() -> Self {
        CopyOutcome {
            action: Action::Next,
            row: None,
            reinject: None,
            done: false,
        }
    }

    fn row(row: CopyRow) -> Self {
        CopyOutcome {
            action: Action::Next,
            row: Some(row),
            reinject: None,
            done: false,
        }
    }

    fn reinject(bytes: Vec<u8>) -> Self {
        CopyOutcome {
            action: Action::Again,
            row: None,
            reinject: Some(bytes),
            done: false,
        }
    }

    fn again() -> Self {
        CopyOutcome {
            action: Action::Again,
            row: None,
            reinject: None,
            done: false,
        }
    }

    fn done() -> Self {
        CopyOutcome {
            action: Action::Next,
            row: None,
            reinject: None,
            done: true,
        }
    }
}

pub struct CopyParser {
    spec: CopySpec,
    state: CopyState,
    accum: Vec<u8>,
    values: CopyRow,
    rows_emitted: u64,
}

impl CopyParser {
    pub fn new(spec: CopySpec) -> Self {
        Self {
            spec,
            state: CopyState::LineStart,
            accum: Vec::new(),
            values: Vec::new(),
            rows_emitted: 0,
        }
    }

    pub fn spec(&self) -> &CopySpec {
        &self.spec
    }

    pub fn rows_emitted(&self) -> u64 {
        self.rows_emitted
    }

    /// Record one completed field. For the last field of a row, validates the
    /// field count and returns the completed row.
    fn commit_field(
        &mut self,
        value: Option<String>,
        last: bool,
        offset: u64,
    ) -> Result<CopyOutcome> {
        if self.values.len() >= self.spec.column_names.len() {
            return Err(ExtractError::format(
                offset,
                format!("too many columns on COPY row for \"{}\"", self.spec.table_name),
            ));
        }

        self.values.push(value);
        self.accum.clear();
        self.state = CopyState::NullCheck;

        if !last {
            return Ok(CopyOutcome::next());
        }

        if self.values.len() != self.spec.column_names.len() {
            return Err(ExtractError::format(
                offset,
                format!("too few columns on COPY row for \"{}\"", self.spec.table_name),
            ));
        }

        self.rows_emitted += 1;
        Ok(CopyOutcome::row(std::mem::take(&mut self.values)))
    }

    fn take_field(&mut self) -> Option<String> {
        let bytes = std::mem::take(&mut self.accum);
        Some(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Dispatch one byte. `offset` is the byte's position in the original
    /// stream, used only for error reporting.
    pub fn feed(&mut self, chr: u8, offset: u64) -> Result<CopyOutcome> {
        match self.state {
            CopyState::LineStart => {
                if chr != b'\n' {
                    return Err(ExtractError::format(
                        offset,
                        "expected newline after COPY statement",
                    ));
                }
                self.state = CopyState::NullCheck;
                Ok(CopyOutcome::next())
            }

            CopyState::NullCheck => {
                let marker = self.spec.null_marker.as_bytes();
                let matched = self.accum.len();

                if matched < marker.len() && chr == marker[matched] {
                    self.accum.push(chr);
                    return Ok(CopyOutcome::next());
                }

                if matched == marker.len() {
                    // Full marker seen; the next byte decides whether it
                    // stands as a null field.
                    if chr == self.spec.delimiter {
                        return self.commit_field(None, false, offset);
                    }
                    if chr == b'\n' {
                        return self.commit_field(None, true, offset);
                    }
                }

                // Not the null marker after all. Hand the probed bytes back
                // to be re-read as literal column content.
                let probed = std::mem::take(&mut self.accum);
                self.state = CopyState::Column;
                Ok(CopyOutcome::reinject(probed))
            }

            CopyState::Column => {
                if chr == self.spec.delimiter {
                    let value = self.take_field();
                    return self.commit_field(value, false, offset);
                }

                if chr == b'\n' {
                    let value = self.take_field();
                    return self.commit_field(value, true, offset);
                }

                if chr == b'\\' {
                    self.state = CopyState::EscapedByte;
                } else {
                    self.accum.push(chr);
                }
                Ok(CopyOutcome::next())
            }

            CopyState::EscapedByte => {
                if chr == b'.' && self.values.is_empty() && self.accum.is_empty() {
                    // `\.` as the very first content of a row is a candidate
                    // end-of-data marker, kept as literal content in case the
                    // line turns out to carry more.
                    self.state = CopyState::MaybeEndOfData;
                    self.accum.push(b'\\');
                    self.accum.push(b'.');
                } else {
                    self.state = CopyState::Column;
                    self.accum.push(chr);
                }
                Ok(CopyOutcome::next())
            }

            CopyState::MaybeEndOfData => {
                if chr != b'\n' {
                    // False alarm; the `\.` already in the accumulator is
                    // field content and this byte is re-read under Column.
                    self.state = CopyState::Column;
                    return Ok(CopyOutcome::again());
                }

                Ok(CopyOutcome::done())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::ChunkBuffer;

    fn spec(cols: &[&str]) -> CopySpec {
        let tokens = {
            use crate::tokenizer::{Token, TokenKind};
            let mut t = vec![
                Token::new(TokenKind::Name, "COPY"),
                Token::new(TokenKind::Name, "t"),
                Token::new(TokenKind::Special, "("),
            ];
            for (i, c) in cols.iter().enumerate() {
                if i > 0 {
                    t.push(Token::new(TokenKind::Special, ","));
                }
                t.push(Token::new(TokenKind::Name, *c));
            }
            t.push(Token::new(TokenKind::Special, ")"));
            t.push(Token::new(TokenKind::Name, "FROM"));
            t.push(Token::new(TokenKind::Name, "stdin"));
            t
        };
        crate::statement::recognize(&tokens, 0).unwrap().unwrap()
    }

    /// Drive the parser over `data` the way the ingestion loop would,
    /// including re-injection. `data` must start with the newline that
    /// follows the COPY statement and contain a complete block.
    fn parse_block(spec: CopySpec, data: &[u8]) -> Result<(Vec<CopyRow>, u64)> {
        let mut parser = CopyParser::new(spec);
        let mut chunks = ChunkBuffer::new();
        chunks.push_back(data.to_vec());

        let mut rows = Vec::new();
        while let Some(chr) = chunks.peek_byte() {
            let outcome = parser.feed(chr, chunks.offset())?;
            if let Some(bytes) = outcome.reinject {
                chunks.push_front(bytes);
            }
            if let Some(row) = outcome.row {
                rows.push(row);
            }
            if outcome.action == Action::Next {
                chunks.advance();
            }
            if outcome.done {
                return Ok((rows, parser.rows_emitted()));
            }
        }
        panic!("block did not terminate");
    }

    fn s(v: &str) -> Option<String> {
        Some(v.to_string())
    }

    #[test]
    fn test_basic_rows() {
        let (rows, count) =
            parse_block(spec(&["id", "name"]), b"\n1\talice\n2\tbob\n\\.\n").unwrap();
        assert_eq!(rows, vec![vec![s("1"), s("alice")], vec![s("2"), s("bob")]]);
        assert_eq!(count, 2);
    }

    #[test]
    fn test_null_field() {
        let (rows, _) = parse_block(spec(&["a", "b"]), b"\n\\N\tfoo\n\\.\n").unwrap();
        assert_eq!(rows, vec![vec![None, s("foo")]]);
    }

    #[test]
    fn test_null_as_last_field() {
        let (rows, _) = parse_block(spec(&["a", "b"]), b"\nfoo\t\\N\n\\.\n").unwrap();
        assert_eq!(rows, vec![vec![s("foo"), None]]);
    }

    #[test]
    fn test_all_null_row() {
        let (rows, _) = parse_block(spec(&["a", "b", "c"]), b"\n\\N\t\\N\t\\N\n\\.\n").unwrap();
        assert_eq!(rows, vec![vec![None, None, None]]);
    }

    #[test]
    fn test_escaped_backslash_n_is_not_null() {
        // `\\N` is an escaped backslash followed by N: the literal string
        // `\N`, not the null marker. Exercises the re-injection path.
        let (rows, _) = parse_block(spec(&["a", "b"]), b"\n\\\\N\tfoo\n\\.\n").unwrap();
        assert_eq!(rows, vec![vec![s("\\N"), s("foo")]]);
    }

    #[test]
    fn test_null_prefix_backtracks_to_literal() {
        // A field starting with a backslash that diverges from the marker.
        let (rows, _) = parse_block(spec(&["a"]), b"\n\\x\n\\.\n").unwrap();
        assert_eq!(rows, vec![vec![s("x")]]);
    }

    #[test]
    fn test_full_marker_followed_by_content() {
        // `\Nx` matched the whole marker but the next byte is ordinary, so
        // the marker bytes replay through the escape path: `\N` decodes to
        // `N`, then `x` follows.
        let (rows, _) = parse_block(spec(&["a"]), b"\n\\Nx\n\\.\n").unwrap();
        assert_eq!(rows, vec![vec![s("Nx")]]);
    }

    #[test]
    fn test_empty_fields() {
        let (rows, _) = parse_block(spec(&["a", "b"]), b"\n\t\n\\.\n").unwrap();
        assert_eq!(rows, vec![vec![s(""), s("")]]);
    }

    #[test]
    fn test_escaped_bytes_appended_literally() {
        let (rows, _) = parse_block(spec(&["a"]), b"\nx\\ty\n\\.\n").unwrap();
        assert_eq!(rows, vec![vec![s("xty")]]);
    }

    #[test]
    fn test_escaped_delimiter_does_not_split() {
        // An escaped tab must not end the field.
        let (rows, _) = parse_block(spec(&["a"]), b"\n1\\\t2\n\\.\n").unwrap();
        assert_eq!(rows, vec![vec![s("1\t2")]]);
    }

    #[test]
    fn test_too_few_columns() {
        let err = parse_block(spec(&["a", "b", "c"]), b"\n1\t2\n\\.\n").unwrap_err();
        assert!(err.to_string().contains("too few columns"));
    }

    #[test]
    fn test_too_many_columns() {
        let err = parse_block(spec(&["a", "b"]), b"\n1\t2\t3\n\\.\n").unwrap_err();
        assert!(err.to_string().contains("too many columns"));
    }

    #[test]
    fn test_end_of_data_false_alarm() {
        // `\.abc` at row start is field content, not the terminator.
        let (rows, _) = parse_block(spec(&["a", "b"]), b"\n\\.abc\tx\n\\.\n").unwrap();
        assert_eq!(rows, vec![vec![s("\\.abc"), s("x")]]);
    }

    #[test]
    fn test_end_of_data_not_first_field() {
        // `\.` after the first delimiter is a plain escaped dot.
        let (rows, _) = parse_block(spec(&["a", "b"]), b"\nx\t\\.\n\\.\n").unwrap();
        assert_eq!(rows, vec![vec![s("x"), s(".")]]);
    }

    #[test]
    fn test_empty_block() {
        let (rows, count) = parse_block(spec(&["a"]), b"\n\\.\n").unwrap();
        assert!(rows.is_empty());
        assert_eq!(count, 0);
    }

    #[test]
    fn test_missing_leading_newline_is_fatal() {
        let err = parse_block(spec(&["a"]), b"x\n\\.\n").unwrap_err();
        assert!(err.to_string().contains("expected newline"));
    }
}
