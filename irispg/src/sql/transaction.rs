//! Transaction verb rewriting.
//!
//! IRIS opens transactions with `START TRANSACTION`; PostgreSQL clients
//! send `BEGIN`. The rewrite also classifies the verb so the session can
//! keep its transaction tag current.

/// Transaction verb at the head of a statement, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxVerb {
    Begin,
    Commit,
    Rollback,
    None,
}

/// Rewrite `BEGIN [TRANSACTION|WORK]` into `START TRANSACTION`, leaving
/// modifiers such as `ISOLATION LEVEL …` in place. `COMMIT` and
/// `ROLLBACK` pass through unchanged but are classified.
///
/// Only the leading token is inspected, so verbs inside string literals
/// or later in the statement are never touched.
pub fn translate(sql: &str) -> (String, TxVerb) {
    let head = skip_leading_trivia(sql);
    let rest = &sql[head..];

    let Some(word) = leading_word(rest) else {
        return (sql.to_string(), TxVerb::None);
    };

    if word.eq_ignore_ascii_case("BEGIN") {
        let mut tail = &rest[word.len()..];
        // swallow an optional TRANSACTION / WORK noise word
        let trimmed = tail.trim_start();
        if let Some(next) = leading_word(trimmed) {
            if next.eq_ignore_ascii_case("TRANSACTION") || next.eq_ignore_ascii_case("WORK") {
                tail = &trimmed[next.len()..];
            }
        }
        let mut out = String::with_capacity(sql.len() + 12);
        out.push_str(&sql[..head]);
        out.push_str("START TRANSACTION");
        out.push_str(tail);
        return (out, TxVerb::Begin);
    }

    let verb = if word.eq_ignore_ascii_case("COMMIT") {
        TxVerb::Commit
    } else if word.eq_ignore_ascii_case("ROLLBACK") {
        TxVerb::Rollback
    } else if word.eq_ignore_ascii_case("START") {
        TxVerb::Begin
    } else {
        TxVerb::None
    };
    (sql.to_string(), verb)
}

/// Offset past leading whitespace and comments.
fn skip_leading_trivia(sql: &str) -> usize {
    let bytes = sql.as_bytes();
    let mut i = 0;
    loop {
        while i < bytes.len() && bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        if bytes[i..].starts_with(b"--") {
            while i < bytes.len() && bytes[i] != b'\n' {
                i += 1;
            }
            continue;
        }
        if bytes[i..].starts_with(b"/*") {
            i += 2;
            while i + 1 < bytes.len() && !(bytes[i] == b'*' && bytes[i + 1] == b'/') {
                i += 1;
            }
            i = (i + 2).min(bytes.len());
            continue;
        }
        return i;
    }
}

fn leading_word(s: &str) -> Option<&str> {
    let end = s
        .bytes()
        .position(|b| !b.is_ascii_alphabetic())
        .unwrap_or(s.len());
    // a trailing identifier character means this is a longer identifier,
    // e.g. BEGIN2, not a verb
    if end == 0 || s.as_bytes().get(end).is_some_and(|b| super::scan::is_ident_char(*b)) {
        return None;
    }
    Some(&s[..end])
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn begin_becomes_start_transaction() {
        assert_eq!(translate("BEGIN").0, "START TRANSACTION");
        assert_eq!(translate("begin").0, "START TRANSACTION");
        assert_eq!(translate("Begin").0, "START TRANSACTION");
    }

    #[test]
    fn begin_transaction_noise_word() {
        assert_eq!(translate("BEGIN TRANSACTION").0, "START TRANSACTION");
        assert_eq!(translate("BEGIN WORK").0, "START TRANSACTION");
    }

    #[test]
    fn modifiers_preserved() {
        assert_eq!(
            translate("BEGIN ISOLATION LEVEL READ COMMITTED").0,
            "START TRANSACTION ISOLATION LEVEL READ COMMITTED",
        );
        assert_eq!(
            translate("BEGIN TRANSACTION ISOLATION LEVEL SERIALIZABLE").0,
            "START TRANSACTION ISOLATION LEVEL SERIALIZABLE",
        );
    }

    #[test]
    fn commit_rollback_unchanged() {
        assert_eq!(translate("COMMIT"), ("COMMIT".into(), TxVerb::Commit));
        assert_eq!(translate("ROLLBACK"), ("ROLLBACK".into(), TxVerb::Rollback));
    }

    #[test]
    fn literal_not_translated() {
        assert_eq!(translate("SELECT 'BEGIN'").0, "SELECT 'BEGIN'");
    }

    #[test]
    fn leading_comment_skipped() {
        let (sql, verb) = translate("/* open */ BEGIN");
        assert_eq!(sql, "/* open */ START TRANSACTION");
        assert_eq!(verb, TxVerb::Begin);
    }

    #[test]
    fn plain_select_is_none() {
        assert_eq!(translate("SELECT begin_time FROM t").1, TxVerb::None);
    }

    #[test]
    fn ident_prefix_not_matched() {
        // BEGINNING is not the BEGIN verb
        let (sql, verb) = translate("BEGINNING");
        assert_eq!(sql, "BEGINNING");
        assert_eq!(verb, TxVerb::None);
    }
}
