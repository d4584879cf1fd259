//! Placeholder surface conversion.
//!
//! PostgreSQL clients number their placeholders (`$1`, `$2`, …); the
//! backend takes positional `?` markers. The conversion records which
//! original parameter feeds each `?` so bound values can be reordered,
//! and duplicated when a `$n` appears more than once.
use super::scan::{self, Segment};

/// Outcome of converting `$n` placeholders to positional `?` markers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaceholderMap {
    /// SQL with every `$n` replaced by `?`.
    pub sql: String,
    /// For each `?` in order, the 0-based index of the original parameter.
    pub order: Vec<usize>,
    /// Highest `$n` seen; the statement's inferred parameter count.
    pub param_count: usize,
}

/// Convert `$n` placeholders outside literals and comments.
///
/// SQL with no placeholders converts to itself with an empty order.
pub fn convert(sql: &str) -> PlaceholderMap {
    let mut out = String::with_capacity(sql.len());
    let mut order = Vec::new();
    let mut max = 0usize;

    for seg in scan::segments(sql) {
        match seg {
            Segment::Code(code) => {
                let bytes = code.as_bytes();
                let mut i = 0;
                while i < bytes.len() {
                    if bytes[i] == b'$' && bytes.get(i + 1).is_some_and(u8::is_ascii_digit) {
                        let start = i + 1;
                        let mut end = start;
                        while end < bytes.len() && bytes[end].is_ascii_digit() {
                            end += 1;
                        }
                        let n: usize = code[start..end].parse().unwrap_or(0);
                        if n > 0 {
                            out.push('?');
                            order.push(n - 1);
                            max = max.max(n);
                            i = end;
                            continue;
                        }
                    }
                    // push the byte run up to the next '$'
                    let next = bytes[i..]
                        .iter()
                        .skip(1)
                        .position(|b| *b == b'$')
                        .map_or(bytes.len(), |p| i + 1 + p);
                    out.push_str(&code[i..next]);
                    i = next;
                }
            }
            other => out.push_str(other.as_str()),
        }
    }

    PlaceholderMap { sql: out, order, param_count: max }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn numbered_to_positional() {
        let m = convert("SELECT * FROM t WHERE a = $1 AND b = $2");
        assert_eq!(m.sql, "SELECT * FROM t WHERE a = ? AND b = ?");
        assert_eq!(m.order, vec![0, 1]);
        assert_eq!(m.param_count, 2);
    }

    #[test]
    fn reuse_duplicates_in_order() {
        let m = convert("WHERE a = $2 OR b = $1 OR c = $2");
        assert_eq!(m.sql, "WHERE a = ? OR b = ? OR c = ?");
        assert_eq!(m.order, vec![1, 0, 1]);
        assert_eq!(m.param_count, 2);
    }

    #[test]
    fn literal_dollar_untouched() {
        let m = convert("SELECT '$1', a FROM t WHERE b = $1");
        assert_eq!(m.sql, "SELECT '$1', a FROM t WHERE b = ?");
        assert_eq!(m.param_count, 1);
    }

    #[test]
    fn no_placeholders_identity() {
        let m = convert("SELECT 1");
        assert_eq!(m.sql, "SELECT 1");
        assert!(m.order.is_empty());
        assert_eq!(m.param_count, 0);
    }
}
