//! Identifier case normalization.
//!
//! IRIS stores unquoted identifiers upper case and resolves them case
//! sensitively, so unquoted identifiers are upper-cased on the way in.
//! Double-quoted identifiers keep their exact bytes, per the SQL standard.
use super::scan::{self, Segment};

/// SQL keywords; upper-cased like identifiers but not counted as one.
const KEYWORDS: &[&str] = &[
    "SELECT", "FROM", "WHERE", "INSERT", "UPDATE", "DELETE", "CREATE", "DROP",
    "TABLE", "INDEX", "VIEW", "INTO", "VALUES", "SET", "JOIN", "LEFT", "RIGHT",
    "INNER", "OUTER", "ON", "AND", "OR", "NOT", "NULL", "AS", "ORDER", "BY",
    "GROUP", "HAVING", "LIMIT", "OFFSET", "UNION", "INTERSECT", "EXCEPT",
    "PRIMARY", "KEY", "FOREIGN", "REFERENCES", "CONSTRAINT", "UNIQUE",
    "CHECK", "DEFAULT", "AUTO_INCREMENT", "SERIAL", "VARCHAR", "INT",
    "INTEGER", "BIGINT", "SMALLINT", "DECIMAL", "NUMERIC", "FLOAT", "DOUBLE",
    "DATE", "TIME", "TIMESTAMP", "BOOLEAN", "BOOL", "TEXT", "CHAR",
    "CASCADE", "RESTRICT", "NO", "ACTION", "BEGIN", "COMMIT", "ROLLBACK",
    "TRANSACTION", "CASE", "WHEN", "THEN", "ELSE", "END", "IF", "EXISTS",
    "IN", "BETWEEN", "LIKE", "IS", "DISTINCT", "ALL", "ANY", "SOME",
    "TRUE", "FALSE", "UNKNOWN", "CAST", "EXTRACT", "SUBSTRING", "POSITION",
    "TRIM", "UPPER", "LOWER", "COALESCE", "NULLIF", "GREATEST", "LEAST",
    "START", "TOP",
];

fn is_keyword(word: &str) -> bool {
    KEYWORDS.iter().any(|k| k.eq_ignore_ascii_case(word))
}

/// Normalize identifier case in `sql`.
///
/// `exempt` names (compared case-insensitively) are passed through
/// unchanged; the translator exempts the backend schema name so a mapped
/// `SQLUser.x` keeps the spelling the backend catalogs use.
///
/// Returns the rewritten SQL and the number of user identifiers seen.
/// Applying the function to its own output is a no-op.
pub fn normalize(sql: &str, exempt: &[&str]) -> (String, usize) {
    let mut count = 0;
    let mut out = String::with_capacity(sql.len());

    for seg in scan::segments(sql) {
        match seg {
            Segment::Code(code) => normalize_code(code, exempt, &mut out, &mut count),
            // quoted identifiers count but keep their exact bytes
            Segment::DoubleQuoted(s) => {
                count += 1;
                out.push_str(s);
            }
            other => out.push_str(other.as_str()),
        }
    }
    (out, count)
}

fn normalize_code(code: &str, exempt: &[&str], out: &mut String, count: &mut usize) {
    let bytes = code.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        let prev_is_word = i > 0 && (scan::is_ident_char(bytes[i - 1]) || bytes[i - 1] == b'$');

        if scan::is_ident_start(b) && !prev_is_word {
            let start = i;
            i += 1;
            while i < bytes.len() && scan::is_ident_char(bytes[i]) {
                i += 1;
            }
            let word = &code[start..i];

            // backend system names begin with '%'; leave them alone
            if word.starts_with('%') {
                out.push_str(word);
                continue;
            }
            if exempt.iter().any(|e| e.eq_ignore_ascii_case(word)) {
                out.push_str(word);
                continue;
            }
            if !is_keyword(word) {
                *count += 1;
            }
            out.push_str(&word.to_ascii_uppercase());
            continue;
        }

        // copy the run of bytes up to the next identifier start unchanged
        let start = i;
        i += 1;
        while i < bytes.len() {
            let prev = bytes[i - 1];
            if scan::is_ident_start(bytes[i]) && !(scan::is_ident_char(prev) || prev == b'$') {
                break;
            }
            i += 1;
        }
        out.push_str(&code[start..i]);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn norm(sql: &str) -> String {
        normalize(sql, &[]).0
    }

    #[test]
    fn unquoted_upper_cased() {
        assert_eq!(norm("SELECT id FROM users"), "SELECT ID FROM USERS");
    }

    #[test]
    fn quoted_preserved() {
        assert_eq!(
            norm(r#"SELECT "FirstName" FROM users"#),
            r#"SELECT "FirstName" FROM USERS"#,
        );
    }

    #[test]
    fn qualified_parts_each_normalized() {
        assert_eq!(norm("SELECT t.col FROM s.t"), "SELECT T.COL FROM S.T");
    }

    #[test]
    fn keywords_not_counted() {
        let (_, count) = normalize("SELECT id, name FROM users WHERE id = 1", &[]);
        // id, name, users, id
        assert_eq!(count, 4);
    }

    #[test]
    fn string_literal_untouched() {
        assert_eq!(
            norm("SELECT 'lower text' FROM t"),
            "SELECT 'lower text' FROM T",
        );
    }

    #[test]
    fn comment_untouched() {
        assert_eq!(norm("SELECT a -- keep me lower\n"), "SELECT A -- keep me lower\n");
    }

    #[test]
    fn numeric_exponent_not_an_identifier() {
        assert_eq!(norm("SELECT 1e5, 0x1f"), "SELECT 1e5, 0x1f");
    }

    #[test]
    fn placeholder_suffix_not_matched() {
        assert_eq!(norm("WHERE id = $1"), "WHERE ID = $1");
    }

    #[test]
    fn percent_names_preserved() {
        assert_eq!(norm("SELECT * FROM %Library.File"), "SELECT * FROM %Library.FILE");
    }

    #[test]
    fn exempt_name_preserved() {
        assert_eq!(
            normalize("SELECT * FROM SQLUser.vecs", &["SQLUser"]).0,
            "SELECT * FROM SQLUser.VECS",
        );
    }

    #[test]
    fn idempotent() {
        let once = norm("SELECT id, \"Keep\" FROM public.users");
        assert_eq!(norm(&once), once);
    }
}
