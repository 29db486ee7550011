//! Statement splitting and classification.
//!
//! Splits a submission on `;` while respecting quoted strings, quoted identifiers
//! and comments, so `INSERT INTO t VALUES ('a;b')` stays one statement.

/// Keywords whose statements return a row set.
const READ_KEYWORDS: &[&str] = &["SELECT", "SHOW", "DESCRIBE", "DESC", "EXPLAIN"];

/// How a statement's result should be collected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    /// Produces a row set; rendered as a table.
    Read,
    /// Produces an affected-row count; rendered as a summary.
    Write,
}

impl StatementKind {
    /// Classifies a statement by its leading keyword.
    pub fn of(statement: &str) -> Self {
        let keyword = leading_keyword(statement).to_ascii_uppercase();
        if READ_KEYWORDS.contains(&keyword.as_str()) {
            Self::Read
        } else {
            Self::Write
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Lexer {
    Normal,
    Quoted(u8),
    LineComment,
    BlockComment,
}

/// Splits a query into trimmed, non-empty statements in submission order.
///
/// Fragments that contain nothing but whitespace and comments are dropped.
/// MySQL executable comments (`/*! ... */`) and optimizer hints (`/*+ ... */`)
/// count as content.
pub fn split_statements(query: &str) -> Vec<&str> {
    let bytes = query.as_bytes();
    let mut statements = Vec::new();
    let mut state = Lexer::Normal;
    let mut start = 0;
    let mut has_content = false;
    let mut i = 0;

    let mut push = |from: usize, to: usize, has_content: bool| {
        let fragment = query[from..to].trim();
        if has_content && !fragment.is_empty() {
            statements.push(fragment);
        }
    };

    while i < bytes.len() {
        let b = bytes[i];
        match state {
            Lexer::Normal => match b {
                b';' => {
                    push(start, i, has_content);
                    start = i + 1;
                    has_content = false;
                }
                b'\'' | b'"' | b'`' => {
                    state = Lexer::Quoted(b);
                    has_content = true;
                }
                b'#' => state = Lexer::LineComment,
                b'-' if starts_line_comment(bytes, i) => {
                    state = Lexer::LineComment;
                    i += 1;
                }
                b'/' if bytes.get(i + 1) == Some(&b'*') => {
                    if matches!(bytes.get(i + 2), Some(b'!') | Some(b'+')) {
                        has_content = true;
                    }
                    state = Lexer::BlockComment;
                    i += 1;
                }
                _ if !b.is_ascii_whitespace() => has_content = true,
                _ => {}
            },
            Lexer::Quoted(quote) => {
                if b == b'\\' && quote != b'`' {
                    // Skip the escaped byte
                    i += 1;
                } else if b == quote {
                    if bytes.get(i + 1) == Some(&quote) {
                        // Doubled quote is a literal quote
                        i += 1;
                    } else {
                        state = Lexer::Normal;
                    }
                }
            }
            Lexer::LineComment => {
                if b == b'\n' {
                    state = Lexer::Normal;
                }
            }
            Lexer::BlockComment => {
                if b == b'*' && bytes.get(i + 1) == Some(&b'/') {
                    state = Lexer::Normal;
                    i += 1;
                }
            }
        }
        i += 1;
    }

    push(start, query.len(), has_content);
    statements
}

/// Replaces every comment with whitespace, the way the MySQL lexer sees it.
///
/// Quoted text is kept verbatim. The body of an executable comment
/// (`/*!50000 ... */`) is kept, since MySQL runs it; only its markers and version
/// number are removed. Optimizer hints (`/*+ ... */`) are ordinary comments here.
pub fn strip_comments(query: &str) -> String {
    let bytes = query.as_bytes();
    let mut out = String::with_capacity(query.len());
    let mut state = Lexer::Normal;
    let mut in_executable = false;
    let mut kept_from = 0;
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        match state {
            Lexer::Normal => match b {
                b'\'' | b'"' | b'`' => state = Lexer::Quoted(b),
                b'#' => {
                    out.push_str(&query[kept_from..i]);
                    state = Lexer::LineComment;
                }
                b'-' if starts_line_comment(bytes, i) => {
                    out.push_str(&query[kept_from..i]);
                    state = Lexer::LineComment;
                    i += 1;
                }
                b'/' if bytes.get(i + 1) == Some(&b'*') => {
                    out.push_str(&query[kept_from..i]);
                    out.push(' ');
                    if bytes.get(i + 2) == Some(&b'!') && !in_executable {
                        i += 3;
                        while bytes.get(i).is_some_and(u8::is_ascii_digit) {
                            i += 1;
                        }
                        kept_from = i;
                        in_executable = true;
                        continue;
                    }
                    state = Lexer::BlockComment;
                    i += 1;
                }
                b'*' if in_executable && bytes.get(i + 1) == Some(&b'/') => {
                    out.push_str(&query[kept_from..i]);
                    out.push(' ');
                    in_executable = false;
                    i += 2;
                    kept_from = i;
                    continue;
                }
                _ => {}
            },
            Lexer::Quoted(quote) => {
                if b == b'\\' && quote != b'`' {
                    i += 1;
                } else if b == quote {
                    if bytes.get(i + 1) == Some(&quote) {
                        i += 1;
                    } else {
                        state = Lexer::Normal;
                    }
                }
            }
            Lexer::LineComment => {
                if b == b'\n' {
                    // The newline itself separates the surrounding tokens
                    state = Lexer::Normal;
                    kept_from = i;
                }
            }
            Lexer::BlockComment => {
                if b == b'*' && bytes.get(i + 1) == Some(&b'/') {
                    state = Lexer::Normal;
                    i += 2;
                    kept_from = i;
                    continue;
                }
            }
        }
        i += 1;
    }

    if matches!(state, Lexer::Normal | Lexer::Quoted(_)) {
        out.push_str(&query[kept_from.min(query.len())..]);
    }
    out
}

/// MySQL only treats `--` as a comment when followed by whitespace or end of input.
fn starts_line_comment(bytes: &[u8], i: usize) -> bool {
    bytes.get(i + 1) == Some(&b'-')
        && bytes
            .get(i + 2)
            .map_or(true, |next| next.is_ascii_whitespace() || next.is_ascii_control())
}

/// Returns the first keyword of a statement, skipping whitespace, opening
/// parentheses and comments.
pub fn leading_keyword(statement: &str) -> &str {
    let bytes = statement.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b if b.is_ascii_whitespace() || b == b'(' => i += 1,
            b'#' => i = skip_line(bytes, i),
            b'-' if starts_line_comment(bytes, i) => i = skip_line(bytes, i),
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i = statement[i + 2..]
                    .find("*/")
                    .map_or(bytes.len(), |end| i + 2 + end + 2);
            }
            _ => break,
        }
    }

    let rest = &statement[i..];
    let end = rest
        .find(|c: char| !c.is_ascii_alphabetic())
        .unwrap_or(rest.len());
    &rest[..end]
}

fn skip_line(bytes: &[u8], i: usize) -> usize {
    bytes[i..]
        .iter()
        .position(|&b| b == b'\n')
        .map_or(bytes.len(), |offset| i + offset + 1)
}
