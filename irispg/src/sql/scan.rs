//! Literal and comment aware segmentation of SQL text.
//!
//! Every rewriter in the translation pipeline must leave string literals,
//! quoted identifiers and comments untouched; this module is the single
//! place that knows how to find them.

/// One region of an SQL string.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Segment<'a> {
    /// Plain code the rewriters may transform.
    Code(&'a str),
    /// A single-quoted string literal, quotes included. Doubled quotes
    /// (`''`) are part of the same literal.
    SingleQuoted(&'a str),
    /// A double-quoted identifier, quotes included.
    DoubleQuoted(&'a str),
    /// A `--` comment up to (not including) the newline.
    LineComment(&'a str),
    /// A `/* */` comment, nesting not supported (matching PostgreSQL's
    /// tokenizer would nest; the backend does not, so neither do we).
    BlockComment(&'a str),
}

impl<'a> Segment<'a> {
    pub fn as_str(&self) -> &'a str {
        match self {
            Segment::Code(s)
            | Segment::SingleQuoted(s)
            | Segment::DoubleQuoted(s)
            | Segment::LineComment(s)
            | Segment::BlockComment(s) => s,
        }
    }

    pub fn is_code(&self) -> bool {
        matches!(self, Segment::Code(_))
    }
}

/// Split `sql` into segments; concatenating the segment texts yields the
/// input unchanged.
pub fn segments(sql: &str) -> Vec<Segment<'_>> {
    let bytes = sql.as_bytes();
    let mut out = Vec::new();
    let mut start = 0;
    let mut i = 0;

    macro_rules! flush_code {
        ($upto:expr) => {
            if start < $upto {
                out.push(Segment::Code(&sql[start..$upto]));
            }
        };
    }

    while i < bytes.len() {
        match bytes[i] {
            b'\'' => {
                flush_code!(i);
                let end = scan_quoted(bytes, i, b'\'');
                out.push(Segment::SingleQuoted(&sql[i..end]));
                start = end;
                i = end;
            }
            b'"' => {
                flush_code!(i);
                let end = scan_quoted(bytes, i, b'"');
                out.push(Segment::DoubleQuoted(&sql[i..end]));
                start = end;
                i = end;
            }
            b'-' if bytes.get(i + 1) == Some(&b'-') => {
                flush_code!(i);
                let end = bytes[i..]
                    .iter()
                    .position(|b| *b == b'\n')
                    .map_or(bytes.len(), |p| i + p);
                out.push(Segment::LineComment(&sql[i..end]));
                start = end;
                i = end;
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                flush_code!(i);
                let end = find_block_comment_end(bytes, i + 2);
                out.push(Segment::BlockComment(&sql[i..end]));
                start = end;
                i = end;
            }
            _ => i += 1,
        }
    }
    flush_code!(bytes.len());
    out
}

/// Scan a quoted region starting at the opening quote; doubled quotes stay
/// inside. Returns the index one past the closing quote, or the end of
/// input for an unterminated region.
fn scan_quoted(bytes: &[u8], open: usize, quote: u8) -> usize {
    let mut i = open + 1;
    while i < bytes.len() {
        if bytes[i] == quote {
            if bytes.get(i + 1) == Some(&quote) {
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    bytes.len()
}

fn find_block_comment_end(bytes: &[u8], from: usize) -> usize {
    let mut i = from;
    while i + 1 < bytes.len() {
        if bytes[i] == b'*' && bytes[i + 1] == b'/' {
            return i + 2;
        }
        i += 1;
    }
    bytes.len()
}

/// Whether `b` can start an unquoted identifier.
pub fn is_ident_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_' || b == b'%'
}

/// Whether `b` can continue an unquoted identifier.
pub fn is_ident_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// Start offset of the operand token ending at the tail of `out`: a quoted
/// literal, a parenthesized group (with any abutting function name), a
/// possibly-qualified identifier or number, or a placeholder.
pub fn operand_start(out: &str) -> Option<usize> {
    let bytes = out.as_bytes();
    let end = bytes.len();
    if end == 0 {
        return None;
    }
    match bytes[end - 1] {
        b'\'' => {
            // quoted literal; walk back past doubled quotes
            let mut i = end - 1;
            loop {
                let open = bytes[..i].iter().rposition(|b| *b == b'\'')?;
                if open > 0 && bytes[open - 1] == b'\'' {
                    i = open - 1;
                    continue;
                }
                return Some(open);
            }
        }
        b')' => {
            let mut depth = 0i32;
            for i in (0..end).rev() {
                match bytes[i] {
                    b')' => depth += 1,
                    b'(' => {
                        depth -= 1;
                        if depth == 0 {
                            // include a function name if one abuts
                            let mut start = i;
                            while start > 0 && is_ident_char(bytes[start - 1]) {
                                start -= 1;
                            }
                            return Some(start);
                        }
                    }
                    _ => { }
                }
            }
            None
        }
        b if is_ident_char(b) || b == b'$' => {
            let mut start = end;
            while start > 0
                && (is_ident_char(bytes[start - 1])
                    || bytes[start - 1] == b'.'
                    || bytes[start - 1] == b'$')
            {
                start -= 1;
            }
            (start < end).then_some(start)
        }
        b'?' => Some(end - 1),
        _ => None,
    }
}

/// Split a simple-query batch into statements on top-level semicolons.
/// Separators inside literals, identifiers and comments do not count.
/// Empty statements are dropped.
pub fn split_statements(sql: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();

    for seg in segments(sql) {
        match seg {
            Segment::Code(code) => {
                let mut rest = code;
                while let Some(pos) = rest.find(';') {
                    current.push_str(&rest[..pos]);
                    if !current.trim().is_empty() {
                        out.push(std::mem::take(&mut current).trim().to_string());
                    } else {
                        current.clear();
                    }
                    rest = &rest[pos + 1..];
                }
                current.push_str(rest);
            }
            other => current.push_str(other.as_str()),
        }
    }
    if !current.trim().is_empty() {
        out.push(current.trim().to_string());
    }
    out
}

/// Rebuild an SQL string by mapping each code segment through `f` and
/// keeping every other segment byte-for-byte.
pub fn map_code(sql: &str, mut f: impl FnMut(&str) -> String) -> String {
    let mut out = String::with_capacity(sql.len());
    for seg in segments(sql) {
        match seg {
            Segment::Code(code) => out.push_str(&f(code)),
            other => out.push_str(other.as_str()),
        }
    }
    out
}

#[cfg(test)]
mod test {
    use super::*;

    fn roundtrip(sql: &str) -> String {
        segments(sql).iter().map(|s| s.as_str()).collect()
    }

    #[test]
    fn concat_is_identity() {
        for sql in [
            "SELECT 1",
            "SELECT 'a''b' FROM \"T\" -- c\nWHERE x /* y */ = 1",
            "SELECT 'unterminated",
            "",
        ] {
            assert_eq!(roundtrip(sql), sql);
        }
    }

    #[test]
    fn splits_string_literal() {
        let segs = segments("SELECT 'BEGIN' FROM t");
        assert_eq!(segs[1], Segment::SingleQuoted("'BEGIN'"));
        assert!(segs[0].is_code() && segs[2].is_code());
    }

    #[test]
    fn doubled_quote_stays_inside() {
        let segs = segments("SELECT 'o''clock', 2");
        assert_eq!(segs[1], Segment::SingleQuoted("'o''clock'"));
        assert_eq!(segs[2], Segment::Code(", 2"));
    }

    #[test]
    fn line_comment_to_newline() {
        let segs = segments("SELECT 1 -- 'not a literal'\n, 2");
        assert_eq!(segs[1], Segment::LineComment("-- 'not a literal'"));
    }

    #[test]
    fn block_comment() {
        let segs = segments("a /* 'x' \"y\" */ b");
        assert_eq!(segs[1], Segment::BlockComment("/* 'x' \"y\" */"));
    }

    #[test]
    fn quoted_identifier() {
        let segs = segments("SELECT \"MiXeD\" FROM t");
        assert_eq!(segs[1], Segment::DoubleQuoted("\"MiXeD\""));
    }

    #[test]
    fn split_batch() {
        assert_eq!(
            split_statements("SELECT 1; SELECT 2;"),
            vec!["SELECT 1", "SELECT 2"],
        );
    }

    #[test]
    fn split_ignores_literal_semicolons() {
        assert_eq!(
            split_statements("SELECT 'a;b'; SELECT 2"),
            vec!["SELECT 'a;b'", "SELECT 2"],
        );
    }

    #[test]
    fn split_empty_input() {
        assert!(split_statements("  ;; ").is_empty());
    }
}
