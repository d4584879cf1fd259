//! Date literal lifting.
//!
//! PostgreSQL clients compare date columns against bare `'YYYY-MM-DD'`
//! strings; IRIS needs an explicit conversion. A literal that is exactly
//! one ISO date becomes `TO_DATE('YYYY-MM-DD', 'YYYY-MM-DD')`.
use super::scan::{self, Segment};

/// Rewrite complete-token date literals, returning the new SQL and the
/// number of literals lifted. Invalid months or days leave the literal
/// untouched; literals inside comments are never considered.
pub fn lift(sql: &str) -> (String, usize) {
    let mut out = String::with_capacity(sql.len());
    let mut lifted = 0;

    for seg in scan::segments(sql) {
        match seg {
            Segment::SingleQuoted(lit) if is_date_literal(lit) && !follows_to_date(&out) => {
                out.push_str("TO_DATE(");
                out.push_str(lit);
                out.push_str(", 'YYYY-MM-DD')");
                lifted += 1;
            }
            other => out.push_str(other.as_str()),
        }
    }
    (out, lifted)
}

/// `'YYYY-MM-DD'` exactly, with a plausible month and day.
fn is_date_literal(lit: &str) -> bool {
    let bytes = lit.as_bytes();
    // quote + 10 chars + quote
    if bytes.len() != 12 || bytes[0] != b'\'' || bytes[11] != b'\'' {
        return false;
    }
    let inner = &bytes[1..11];
    let digits = |r: std::ops::Range<usize>| inner[r].iter().all(u8::is_ascii_digit);
    if !(digits(0..4) && inner[4] == b'-' && digits(5..7) && inner[7] == b'-' && digits(8..10)) {
        return false;
    }
    let month = (inner[5] - b'0') * 10 + (inner[6] - b'0');
    let day = (inner[8] - b'0') * 10 + (inner[9] - b'0');
    (1..=12).contains(&month) && (1..=31).contains(&day)
}

/// Whether the emitted SQL so far ends inside a `TO_DATE(` call, meaning
/// this literal is already someone's first argument.
fn follows_to_date(out: &str) -> bool {
    let trimmed = out.trim_end();
    let Some(head) = trimmed.strip_suffix('(') else { return false };
    let head = head.trim_end();
    head.len() >= 7 && head[head.len() - 7..].eq_ignore_ascii_case("TO_DATE")
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn lifts_complete_date_token() {
        let (sql, n) = lift("SELECT * FROM t WHERE d = '2024-01-15'");
        assert_eq!(sql, "SELECT * FROM t WHERE d = TO_DATE('2024-01-15', 'YYYY-MM-DD')");
        assert_eq!(n, 1);
    }

    #[test]
    fn invalid_month_untouched() {
        let (sql, n) = lift("WHERE d = '2024-13-01'");
        assert_eq!(sql, "WHERE d = '2024-13-01'");
        assert_eq!(n, 0);
    }

    #[test]
    fn invalid_day_untouched() {
        assert_eq!(lift("WHERE d = '2024-01-00'").1, 0);
        assert_eq!(lift("WHERE d = '2024-01-32'").1, 0);
    }

    #[test]
    fn embedded_date_untouched() {
        let (sql, n) = lift("SELECT 'from 2024-01-15 onwards'");
        assert_eq!(sql, "SELECT 'from 2024-01-15 onwards'");
        assert_eq!(n, 0);
    }

    #[test]
    fn comment_skipped() {
        let (sql, n) = lift("SELECT 1 -- '2024-01-15'\n");
        assert_eq!(sql, "SELECT 1 -- '2024-01-15'\n");
        assert_eq!(n, 0);
    }

    #[test]
    fn multiple_occurrences_counted() {
        let (_, n) = lift("WHERE a = '2020-02-02' AND b = '2021-03-03'");
        assert_eq!(n, 2);
    }

    #[test]
    fn already_wrapped_untouched() {
        let input = "WHERE d = TO_DATE('2024-01-15', 'YYYY-MM-DD')";
        let (sql, n) = lift(input);
        assert_eq!(sql, input);
        assert_eq!(n, 0);
    }
}
