//! Routing of catalog-targeting SQL.
//!
//! Decides whether a statement reads the emulated `pg_catalog`, the
//! backend's real `INFORMATION_SCHEMA`, or neither; resolves `::regclass`
//! casts to deterministic OIDs; and lowers `ANY($n)` array bindings into
//! the `IN (…)` form the backend grammar accepts.
use crate::{
    sql::{BoundParam, scan::{self, Segment}},
    types::Value,
};

use super::{Snapshot, eval, oid::OidGenerator};

/// Where a statement should execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutePlan {
    /// Ordinary SQL; the backend runs it untouched by this module.
    NotCatalog,
    /// References emulated `pg_catalog` tables or functions; answered
    /// in-process when the shape allows.
    PgCatalog,
    /// References only `information_schema`, which the backend serves
    /// directly; rows need schema-column output translation.
    InformationSchema,
}

/// Catalog scalar functions recognized even without a table reference.
const CATALOG_FUNCTIONS: &[&str] = &[
    "format_type",
    "pg_get_constraintdef",
    "pg_get_indexdef",
    "pg_get_serial_sequence",
    "pg_get_viewdef",
];

/// Stateless router; all inputs arrive per call.
#[derive(Debug, Default)]
pub struct CatalogRouter;

impl CatalogRouter {
    /// Classify a statement. Detection is case-insensitive and ignores
    /// names inside string literals.
    pub fn plan(sql: &str) -> RoutePlan {
        let mut info_schema = false;
        for seg in scan::segments(sql) {
            let Segment::Code(code) = seg else { continue };
            let lower = code.to_ascii_lowercase();
            if contains_word(&lower, "pg_catalog") {
                return RoutePlan::PgCatalog;
            }
            for table in eval::CATALOG_TABLES {
                if contains_word(&lower, table) {
                    return RoutePlan::PgCatalog;
                }
            }
            for func in CATALOG_FUNCTIONS {
                if contains_word(&lower, func) {
                    return RoutePlan::PgCatalog;
                }
            }
            if contains_word(&lower, "information_schema") {
                info_schema = true;
            }
        }
        if info_schema {
            RoutePlan::InformationSchema
        } else {
            RoutePlan::NotCatalog
        }
    }

    /// The emulated catalog tables a statement references.
    pub fn extract_catalog_tables(sql: &str) -> Vec<&'static str> {
        let mut out = Vec::new();
        for seg in scan::segments(sql) {
            let Segment::Code(code) = seg else { continue };
            let lower = code.to_ascii_lowercase();
            for table in eval::CATALOG_TABLES {
                if contains_word(&lower, table) && !out.contains(table) {
                    out.push(*table);
                }
            }
        }
        out
    }

    /// Whether the statement compares against an `ANY(…)` array binding.
    pub fn has_array_param(sql: &str) -> bool {
        scan::segments(sql).iter().any(|seg| {
            let Segment::Code(code) = seg else { return false };
            let lower = code.to_ascii_lowercase();
            lower
                .find("any")
                .map(|pos| {
                    lower[pos + 3..]
                        .trim_start()
                        .strip_prefix('(')
                        .is_some_and(|rest| {
                            let rest = rest.trim_start();
                            rest.starts_with('$') || rest.starts_with('?')
                        })
                })
                .unwrap_or(false)
        })
    }

    /// Rewrite `ANY($n)` with an array-valued binding into an `IN (…)`
    /// list of text-encoded elements, dropping the consumed parameter.
    /// Parameters that are not arrays, and `ANY` over non-placeholders,
    /// stay untouched.
    pub fn rewrite_any(sql: &str, params: Vec<BoundParam>) -> (String, Vec<BoundParam>) {
        if !Self::has_array_param(sql) {
            return (sql.to_string(), params);
        }

        let mut consumed: Vec<bool> = vec![false; params.len()];
        let mut positional = 0usize;
        let mut out = String::with_capacity(sql.len());

        for seg in scan::segments(sql) {
            let Segment::Code(code) = seg else {
                out.push_str(seg.as_str());
                continue;
            };
            let mut rest = code;
            loop {
                let lower = rest.to_ascii_lowercase();
                let Some(any_at) = find_any_call(&lower) else {
                    out.push_str(rest);
                    break;
                };
                out.push_str(&rest[..any_at]);
                let after_any = &rest[any_at..];
                // ANY ( $n )
                let open = after_any.find('(').expect("checked by find_any_call");
                let inner = after_any[open + 1..].trim_start();

                let (idx, ph_len) = if let Some(tail) = inner.strip_prefix('$') {
                    let digits: String =
                        tail.chars().take_while(char::is_ascii_digit).collect();
                    match digits.parse::<usize>() {
                        Ok(n) if n > 0 => (n - 1, 1 + digits.len()),
                        _ => {
                            out.push_str(&after_any[..open + 1]);
                            rest = &after_any[open + 1..];
                            continue;
                        }
                    }
                } else if inner.starts_with('?') {
                    let i = positional;
                    positional += 1;
                    (i, 1)
                } else {
                    out.push_str(&after_any[..open + 1]);
                    rest = &after_any[open + 1..];
                    continue;
                };

                let elements = params
                    .get(idx)
                    .and_then(|p| match p {
                        BoundParam::Text(s) => parse_array_literal(s),
                        _ => None,
                    });
                let Some(elements) = elements else {
                    out.push_str(&after_any[..open + 1]);
                    rest = &after_any[open + 1..];
                    continue;
                };

                consumed[idx] = true;
                // `x = ANY(...)` reads `x IN (...)`; the comparison
                // operator goes away with the ANY
                let trimmed = out.trim_end().len();
                out.truncate(trimmed);
                if out.ends_with('=') {
                    out.pop();
                    let t = out.trim_end().len();
                    out.truncate(t);
                }
                out.push_str(" IN (");
                if elements.is_empty() {
                    // an empty array matches nothing
                    out.push_str("NULL");
                }
                for (i, el) in elements.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    out.push('\'');
                    out.push_str(&el.replace('\'', "''"));
                    out.push('\'');
                }
                out.push(')');

                // skip the placeholder and the ANY's closing paren
                let after_ph = &inner[ph_len..];
                let after_ph = after_ph.trim_start();
                rest = after_ph.strip_prefix(')').unwrap_or(after_ph);
            }
        }

        if !consumed.iter().any(|c| *c) {
            return (sql.to_string(), params);
        }

        // renumber surviving placeholders
        let mut new_index = vec![0usize; params.len()];
        let mut kept = Vec::new();
        for (i, used) in consumed.iter().enumerate() {
            if !used {
                new_index[i] = kept.len();
                kept.push(params[i].clone());
            }
        }
        let renumbered = renumber_placeholders(&out, &new_index, &consumed);
        (renumbered, kept)
    }

    /// Resolve `'name'::regclass` to the deterministic table oid and
    /// substitute the literal integer.
    pub fn resolve_regclass(sql: &str, generator: &OidGenerator, backend_schema: &str) -> String {
        let segs = scan::segments(sql);
        let mut out = String::with_capacity(sql.len());
        let mut pending_literal: Option<String> = None;

        for seg in segs {
            match seg {
                Segment::SingleQuoted(lit) => {
                    // hold the literal until we know whether ::regclass follows
                    if let Some(prev) = pending_literal.take() {
                        out.push_str(&prev);
                    }
                    pending_literal = Some(lit.to_string());
                }
                Segment::Code(code) => {
                    let stripped = code.trim_start();
                    let cast = stripped
                        .strip_prefix("::")
                        .map(|t| t.trim_start())
                        .filter(|t| {
                            t.len() >= 8 && t[..8].eq_ignore_ascii_case("regclass")
                        });
                    match (pending_literal.take(), cast) {
                        (Some(lit), Some(_)) => {
                            let name = lit.trim_matches('\'');
                            let name = name.rsplit('.').next().unwrap_or(name);
                            let oid = generator.get_table_oid(backend_schema, name);
                            out.push_str(&oid.to_string());
                            // drop the consumed `::regclass`
                            let leading_ws = code.len() - stripped.len();
                            out.push_str(&code[..leading_ws]);
                            let after = &stripped[2..].trim_start()["regclass".len()..];
                            out.push_str(after);
                        }
                        (Some(lit), None) => {
                            out.push_str(&lit);
                            out.push_str(code);
                        }
                        (None, _) => out.push_str(code),
                    }
                }
                other => {
                    if let Some(prev) = pending_literal.take() {
                        out.push_str(&prev);
                    }
                    out.push_str(other.as_str());
                }
            }
        }
        if let Some(lit) = pending_literal {
            out.push_str(&lit);
        }
        out
    }

    /// Inline every remaining placeholder as a quoted literal so the
    /// in-process evaluator sees a parameter-free statement.
    pub fn inline_params(sql: &str, params: &[BoundParam]) -> String {
        let mut positional = 0usize;
        let mut out = String::with_capacity(sql.len());

        for seg in scan::segments(sql) {
            let Segment::Code(code) = seg else {
                out.push_str(seg.as_str());
                continue;
            };
            let bytes = code.as_bytes();
            let mut i = 0;
            while i < bytes.len() {
                match bytes[i] {
                    b'?' => {
                        let idx = positional;
                        positional += 1;
                        push_literal(&mut out, params.get(idx));
                        i += 1;
                    }
                    b'$' if bytes.get(i + 1).is_some_and(u8::is_ascii_digit) => {
                        let mut end = i + 1;
                        while end < bytes.len() && bytes[end].is_ascii_digit() {
                            end += 1;
                        }
                        match code[i + 1..end].parse::<usize>() {
                            Ok(n) if n > 0 => push_literal(&mut out, params.get(n - 1)),
                            _ => out.push_str(&code[i..end]),
                        }
                        i = end;
                    }
                    _ => {
                        let next = bytes[i..]
                            .iter()
                            .skip(1)
                            .position(|b| matches!(b, b'?' | b'$'))
                            .map_or(bytes.len(), |p| i + 1 + p);
                        out.push_str(&code[i..next]);
                        i = next;
                    }
                }
            }
        }
        out
    }

    /// Try to answer a catalog statement from a snapshot.
    pub fn try_emulate(
        snap: &Snapshot,
        sql: &str,
        schema_names: (&str, &str),
    ) -> Option<(Vec<String>, Vec<Vec<Value>>)> {
        let query = eval::parse(sql)?;
        let out = eval::evaluate(snap, &query, schema_names)?;
        Some((out.columns, out.rows))
    }
}

fn push_literal(out: &mut String, param: Option<&BoundParam>) {
    match param {
        Some(BoundParam::Text(s)) => {
            out.push('\'');
            out.push_str(&s.replace('\'', "''"));
            out.push('\'');
        }
        Some(BoundParam::Binary(_)) | None => out.push_str("NULL"),
        Some(BoundParam::Null) => out.push_str("NULL"),
    }
}

/// Word-bounded containment over lowercased code text.
fn contains_word(haystack: &str, word: &str) -> bool {
    let bytes = haystack.as_bytes();
    let mut from = 0;
    while let Some(rel) = haystack[from..].find(word) {
        let pos = from + rel;
        let before_ok = pos == 0 || !scan::is_ident_char(bytes[pos - 1]);
        let after = pos + word.len();
        let after_ok = after >= bytes.len() || !scan::is_ident_char(bytes[after]);
        if before_ok && after_ok {
            return true;
        }
        from = pos + word.len();
    }
    false
}

/// Offset of a word-bounded `ANY` immediately followed by `(`.
fn find_any_call(lower: &str) -> Option<usize> {
    let bytes = lower.as_bytes();
    let mut from = 0;
    while let Some(rel) = lower[from..].find("any") {
        let pos = from + rel;
        from = pos + 3;
        let before_ok = pos == 0 || !scan::is_ident_char(bytes[pos - 1]);
        let after = &lower[pos + 3..];
        if before_ok && after.trim_start().starts_with('(') {
            return Some(pos);
        }
    }
    None
}

/// Parse `{a,b,c}` PostgreSQL array literal text into elements.
fn parse_array_literal(text: &str) -> Option<Vec<String>> {
    let inner = text.trim().strip_prefix('{')?.strip_suffix('}')?;
    if inner.is_empty() {
        return Some(Vec::new());
    }
    let mut out = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        match c {
            '"' => quoted = !quoted,
            '\\' if quoted => {
                if let Some(escaped) = chars.next() {
                    current.push(escaped);
                }
            }
            ',' if !quoted => {
                out.push(std::mem::take(&mut current));
            }
            _ => current.push(c),
        }
    }
    out.push(current);
    Some(out)
}

fn renumber_placeholders(sql: &str, new_index: &[usize], consumed: &[bool]) -> String {
    let mut out = String::with_capacity(sql.len());
    for seg in scan::segments(sql) {
        let Segment::Code(code) = seg else {
            out.push_str(seg.as_str());
            continue;
        };
        let bytes = code.as_bytes();
        let mut i = 0;
        while i < bytes.len() {
            if bytes[i] == b'$' && bytes.get(i + 1).is_some_and(u8::is_ascii_digit) {
                let mut end = i + 1;
                while end < bytes.len() && bytes[end].is_ascii_digit() {
                    end += 1;
                }
                match code[i + 1..end].parse::<usize>() {
                    Ok(n) if n > 0 && n <= new_index.len() && !consumed[n - 1] => {
                        out.push('$');
                        out.push_str(&(new_index[n - 1] + 1).to_string());
                    }
                    _ => out.push_str(&code[i..end]),
                }
                i = end;
            } else {
                let next = bytes[i..]
                    .iter()
                    .skip(1)
                    .position(|b| *b == b'$')
                    .map_or(bytes.len(), |p| i + 1 + p);
                out.push_str(&code[i..next]);
                i = next;
            }
        }
    }
    out
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn detects_pg_catalog_queries() {
        assert_eq!(
            CatalogRouter::plan("SELECT * FROM pg_catalog.pg_class WHERE relname = 'users'"),
            RoutePlan::PgCatalog,
        );
        assert_eq!(
            CatalogRouter::plan("SELECT attname FROM pg_attribute WHERE attrelid = 12345"),
            RoutePlan::PgCatalog,
        );
        assert_eq!(
            CatalogRouter::plan("SELECT * FROM PG_CLASS"),
            RoutePlan::PgCatalog,
        );
    }

    #[test]
    fn detects_information_schema() {
        assert_eq!(
            CatalogRouter::plan("SELECT * FROM information_schema.tables"),
            RoutePlan::InformationSchema,
        );
    }

    #[test]
    fn regular_sql_not_catalog() {
        assert_eq!(
            CatalogRouter::plan("SELECT * FROM users WHERE id = 1"),
            RoutePlan::NotCatalog,
        );
        // names inside literals do not count
        assert_eq!(
            CatalogRouter::plan("SELECT 'pg_class is a table'"),
            RoutePlan::NotCatalog,
        );
    }

    #[test]
    fn extracts_joined_tables() {
        let tables = CatalogRouter::extract_catalog_tables(
            "SELECT c.relname, a.attname FROM pg_class c \
             JOIN pg_attribute a ON a.attrelid = c.oid",
        );
        assert!(tables.contains(&"pg_class"));
        assert!(tables.contains(&"pg_attribute"));
    }

    #[test]
    fn detects_any_array_param() {
        assert!(CatalogRouter::has_array_param("SELECT * FROM pg_class WHERE oid = ANY($1)"));
        assert!(!CatalogRouter::has_array_param("SELECT * FROM pg_class WHERE oid = 1"));
        assert!(!CatalogRouter::has_array_param("SELECT * FROM t WHERE many($1)"));
    }

    #[test]
    fn rewrites_any_to_in() {
        let params = vec![BoundParam::Text("{16384,16385}".into())];
        let (sql, remaining) =
            CatalogRouter::rewrite_any("SELECT * FROM pg_class WHERE oid = ANY($1)", params);
        assert_eq!(sql, "SELECT * FROM pg_class WHERE oid IN ('16384', '16385')");
        assert!(remaining.is_empty());
    }

    #[test]
    fn any_rewrite_renumbers() {
        let params = vec![
            BoundParam::Text("{a,b}".into()),
            BoundParam::Text("r".into()),
        ];
        let (sql, remaining) = CatalogRouter::rewrite_any(
            "SELECT * FROM pg_class WHERE relname = ANY($1) AND relkind = $2",
            params,
        );
        assert!(sql.contains("IN ('a', 'b')"));
        assert!(sql.contains("relkind = $1"));
        assert_eq!(remaining, vec![BoundParam::Text("r".into())]);
    }

    #[test]
    fn quoted_array_elements() {
        assert_eq!(
            parse_array_literal(r#"{"with,comma",plain}"#).unwrap(),
            vec!["with,comma".to_string(), "plain".to_string()],
        );
        assert_eq!(parse_array_literal("{}").unwrap(), Vec::<String>::new());
    }

    #[test]
    fn resolves_regclass_to_oid() {
        let g = OidGenerator::new();
        let expected = g.get_table_oid("SQLUser", "users");
        let out = CatalogRouter::resolve_regclass(
            "SELECT * FROM pg_attribute WHERE attrelid = 'users'::regclass",
            &g,
            "SQLUser",
        );
        assert_eq!(
            out,
            format!("SELECT * FROM pg_attribute WHERE attrelid = {expected}"),
        );
    }

    #[test]
    fn regclass_with_schema_qualifier() {
        let g = OidGenerator::new();
        let expected = g.get_table_oid("SQLUser", "users");
        let out = CatalogRouter::resolve_regclass(
            "SELECT 'public.users'::regclass",
            &g,
            "SQLUser",
        );
        assert_eq!(out, format!("SELECT {expected}"));
    }

    #[test]
    fn plain_literals_survive_regclass_pass() {
        let g = OidGenerator::new();
        let sql = "SELECT 'hello', d FROM t WHERE n = 'x'";
        assert_eq!(CatalogRouter::resolve_regclass(sql, &g, "SQLUser"), sql);
    }

    #[test]
    fn inline_params_quotes_text() {
        let params = vec![BoundParam::Text("users".into()), BoundParam::Null];
        let out = CatalogRouter::inline_params(
            "SELECT * FROM pg_class WHERE relname = $1 AND relowner = $2",
            &params,
        );
        assert_eq!(
            out,
            "SELECT * FROM pg_class WHERE relname = 'users' AND relowner = NULL",
        );
    }
}
