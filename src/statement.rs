//! Statement recognition.
//!
//! The dump is assumed to contain only statements from a known set. Every
//! statement's leading keyword is checked against that set; the one shape we
//! care about, `COPY <table> (<columns>) FROM STDIN`, is parsed fully and
//! yields a [`CopySpec`]. Everything else is discarded unexamined.

use crate::error::{ExtractError, Result};
use crate::tokenizer::{Token, TokenKind};
use ahash::AHashSet;
use once_cell::sync::Lazy;

/// Keywords that may legally begin a statement in a PostgreSQL text dump.
static LEADING_KEYWORDS: Lazy<AHashSet<&'static str>> = Lazy::new(|| {
    [
        "abort",
        "alter",
        "analyze",
        "begin",
        "checkpoint",
        "close",
        "cluster",
        "comment",
        "commit",
        "copy",
        "create",
        "deallocate",
        "declare",
        "delete",
        "discard",
        "do",
        "drop",
        "end",
        "execute",
        "explain",
        "fetch",
        "grant",
        "insert",
        "listen",
        "load",
        "lock",
        "move",
        "notify",
        "prepare",
        "reassign",
        "reindex",
        "release",
        "reset",
        "revoke",
        "rollback",
        "savepoint",
        "security",
        "select",
        "set",
        "show",
        "start",
        "stderr",
        "stdin",
        "stdout",
        "truncate",
        "unlisten",
        "update",
        "vacuum",
        "values",
    ]
    .into_iter()
    .collect()
});

fn is_leading_keyword(name: &str) -> bool {
    LEADING_KEYWORDS.contains(name.to_ascii_lowercase().as_str())
}

/// Framing parameters for one bulk-load block. Immutable once produced;
/// delimiter and null marker are the text-format defaults, which is the only
/// framing a dump emits for `FROM stdin`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopySpec {
    pub table_name: String,
    pub column_names: Vec<String>,
    pub delimiter: u8,
    pub null_marker: String,
}

impl CopySpec {
    fn new(table_name: String, column_names: Vec<String>) -> Self {
        Self {
            table_name,
            column_names,
            delimiter: b'\t',
            null_marker: "\\N".to_string(),
        }
    }
}

enum CopyParseState {
    TableName,
    OpenParen,
    ColumnName,
    CommaOrClose,
    From,
    Source,
    End,
}

/// Classify one completed statement.
///
/// Returns `Ok(Some(spec))` for a recognized COPY statement, `Ok(None)` for
/// any other allow-listed statement (including the empty statement), and a
/// format error otherwise. `offset` is the stream position of the statement
/// terminator, for diagnostics.
pub fn recognize(tokens: &[Token], offset: u64) -> Result<Option<CopySpec>> {
    let Some(first) = tokens.first() else {
        // Empty statement (`;;`): a no-op, not an error.
        return Ok(None);
    };

    if first.kind != TokenKind::Name {
        return Err(ExtractError::format(
            offset,
            "statement did not start with an unquoted name",
        ));
    }

    if !is_leading_keyword(&first.text) {
        return Err(ExtractError::format(
            offset,
            format!("invalid leading keyword \"{}\"", first.text),
        ));
    }

    if first.text.eq_ignore_ascii_case("copy") {
        return recognize_copy(tokens, offset).map(Some);
    }

    Ok(None)
}

/// Parse the fixed COPY grammar:
/// `<table-name> "(" <column-name> ("," <column-name>)* ")" FROM STDIN`.
///
/// Newline tokens inside the statement carry no grammar weight and are
/// skipped. Any other deviation is fatal.
fn recognize_copy(tokens: &[Token], offset: u64) -> Result<CopySpec> {
    let mut table_name: Option<String> = None;
    let mut column_names: Vec<String> = Vec::new();
    let mut state = CopyParseState::TableName;

    // Skip the leading COPY keyword itself.
    for token in tokens[1..]
        .iter()
        .filter(|t| t.kind != TokenKind::Newline)
    {
        match state {
            CopyParseState::TableName => {
                match token.kind {
                    TokenKind::QuotedName => table_name = Some(token.text.clone()),
                    TokenKind::Name => {
                        if is_leading_keyword(&token.text) {
                            return Err(ExtractError::format(
                                offset,
                                format!("invalid table name \"{}\"", token.text),
                            ));
                        }
                        table_name = Some(token.text.clone());
                    }
                    _ => {
                        return Err(ExtractError::format(offset, "expected a table name"));
                    }
                }
                state = CopyParseState::OpenParen;
            }

            CopyParseState::OpenParen => {
                if !token.is_special("(") {
                    return Err(ExtractError::format(offset, "expected column name list"));
                }
                state = CopyParseState::ColumnName;
            }

            CopyParseState::ColumnName => {
                match token.kind {
                    TokenKind::QuotedName | TokenKind::Name => {
                        column_names.push(token.text.clone());
                    }
                    _ => {
                        return Err(ExtractError::format(offset, "expected a column name"));
                    }
                }
                state = CopyParseState::CommaOrClose;
            }

            CopyParseState::CommaOrClose => {
                if token.is_special(",") {
                    state = CopyParseState::ColumnName;
                } else if token.is_special(")") {
                    state = CopyParseState::From;
                } else {
                    return Err(ExtractError::format(offset, "invalid column name list"));
                }
            }

            CopyParseState::From => {
                if token.kind != TokenKind::Name || !token.text.eq_ignore_ascii_case("from") {
                    return Err(ExtractError::format(offset, "expected keyword FROM"));
                }
                state = CopyParseState::Source;
            }

            CopyParseState::Source => {
                if token.kind != TokenKind::Name || !token.text.eq_ignore_ascii_case("stdin") {
                    return Err(ExtractError::format(offset, "only STDIN source is supported"));
                }
                state = CopyParseState::End;
            }

            CopyParseState::End => {
                return Err(ExtractError::format(
                    offset,
                    format!("unexpected trailing token \"{}\" in COPY statement", token.text),
                ));
            }
        }
    }

    if !matches!(state, CopyParseState::End) {
        return Err(ExtractError::format(
            offset,
            "incomplete or invalid COPY statement",
        ));
    }

    if column_names.is_empty() {
        return Err(ExtractError::format(offset, "empty column list in COPY"));
    }

    let table_name = table_name
        .ok_or_else(|| ExtractError::protocol("COPY recognizer finished without a table name"))?;

    Ok(CopySpec::new(table_name, column_names))
}
