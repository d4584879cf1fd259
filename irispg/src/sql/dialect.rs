//! PostgreSQL-only dialect constructs the backend grammar rejects.
//!
//! `LIMIT n` moves to `TOP n` behind the owning SELECT, `expr::type`
//! becomes `CAST(expr AS type)`, and `nextval('seq')` becomes
//! `NEXT VALUE FOR seq`.
use super::scan::{self, Segment};

/// Apply every dialect rewrite. Statements using none of the constructs
/// come back unchanged.
pub fn rewrite(sql: &str) -> String {
    let sql = rewrite_casts(sql);
    let sql = rewrite_nextval(&sql);
    rewrite_limit(&sql)
}

/// PostgreSQL type name → backend type name for CAST targets.
fn cast_target(pg: &str) -> Option<&'static str> {
    Some(match pg.to_ascii_lowercase().as_str() {
        "text" => "VARCHAR",
        "int2" | "smallint" => "SMALLINT",
        "int4" | "int" | "integer" => "INTEGER",
        "int8" | "bigint" => "BIGINT",
        "float4" | "real" => "REAL",
        "float8" => "DOUBLE",
        "numeric" | "decimal" => "NUMERIC",
        "bool" | "boolean" => "BIT",
        "varchar" => "VARCHAR",
        "char" | "bpchar" => "CHAR",
        "date" => "DATE",
        "time" => "TIME",
        "timestamp" | "timestamptz" => "TIMESTAMP",
        "bytea" => "VARBINARY",
        _ => return None,
    })
}

/// Casts dropped entirely: the operand already carries the information the
/// backend needs, and the type only exists in the PostgreSQL catalog.
fn cast_erased(pg: &str) -> bool {
    matches!(
        pg.to_ascii_lowercase().as_str(),
        "regclass" | "regtype" | "regproc" | "regnamespace" | "oid" | "name" | "unknown"
    )
}

/// Rewrite `operand::type` into `CAST(operand AS type)`.
///
/// The operand is the directly preceding literal, identifier, number,
/// placeholder, or parenthesized group.
fn rewrite_casts(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len());

    for seg in scan::segments(sql) {
        let Segment::Code(code) = seg else {
            out.push_str(seg.as_str());
            continue;
        };

        let bytes = code.as_bytes();
        let mut i = 0;
        while i < bytes.len() {
            let is_cast = bytes[i] == b':'
                && bytes.get(i + 1) == Some(&b':')
                && bytes.get(i + 2).copied().is_some_and(|b| scan::is_ident_start(b));
            if !is_cast {
                // copy up to the next ':' unchanged
                let next = bytes[i..]
                    .iter()
                    .skip(1)
                    .position(|b| *b == b':')
                    .map_or(bytes.len(), |p| i + 1 + p);
                out.push_str(&code[i..next]);
                i = next;
                continue;
            }

            // type name, optionally parameterized: varchar(10)
            let tstart = i + 2;
            let mut tend = tstart;
            while tend < bytes.len() && scan::is_ident_char(bytes[tend]) {
                tend += 1;
            }
            let mut suffix = "";
            if bytes.get(tend) == Some(&b'(') {
                if let Some(close) = code[tend..].find(')') {
                    suffix = &code[tend..tend + close + 1];
                    tend += close + 1;
                }
            }
            let type_name = &code[i + 2..i + 2 + (tend - (i + 2)) - suffix.len()];

            let Some(opstart) = scan::operand_start(&out) else {
                // nothing castable behind us; keep the text as written
                out.push_str(&code[i..tend]);
                i = tend;
                continue;
            };

            if cast_erased(type_name) {
                // drop the cast, keep the operand
                i = tend;
                continue;
            }

            let operand = out.split_off(opstart);
            out.push_str("CAST(");
            out.push_str(&operand);
            out.push_str(" AS ");
            match cast_target(type_name) {
                Some(mapped) => out.push_str(mapped),
                None => out.push_str(&type_name.to_ascii_uppercase()),
            }
            out.push_str(suffix);
            out.push(')');
            i = tend;
        }
    }
    out
}

/// Rewrite `nextval('seq')` to `NEXT VALUE FOR seq`, shedding any
/// `::regclass` decoration and schema qualifier inside the literal.
fn rewrite_nextval(sql: &str) -> String {
    let segs = scan::segments(sql);
    let mut out = String::with_capacity(sql.len());
    let mut skip_close = false;

    for seg in segs {
        match seg {
            Segment::Code(code) => {
                let mut code = code;
                if skip_close {
                    // drop the cast tail and closing paren of nextval(...)
                    if let Some(pos) = code.find(')') {
                        code = &code[pos + 1..];
                        skip_close = false;
                    } else {
                        continue;
                    }
                }
                let mut rest = code;
                loop {
                    let Some(pos) = find_nextval(rest) else {
                        out.push_str(rest);
                        break;
                    };
                    out.push_str(&rest[..pos]);
                    out.push_str("NEXT VALUE FOR ");
                    let after = &rest[pos..];
                    let open = after.find('(').map(|p| p + 1).unwrap_or(after.len());
                    rest = &after[open..];
                    if rest.is_empty() {
                        // literal follows in the next segment
                        skip_close = true;
                        break;
                    }
                }
            }
            Segment::SingleQuoted(lit) if skip_close => {
                let name = lit.trim_matches('\'');
                let name = name.rsplit('.').next().unwrap_or(name);
                out.push_str(&name.to_ascii_uppercase());
            }
            other => out.push_str(other.as_str()),
        }
    }
    out
}

fn find_nextval(code: &str) -> Option<usize> {
    let bytes = code.as_bytes();
    let upper = code.to_ascii_uppercase();
    let mut from = 0;
    while let Some(rel) = upper[from..].find("NEXTVAL") {
        let pos = from + rel;
        let bounded = (pos == 0 || !scan::is_ident_char(bytes[pos - 1]))
            && upper[pos + 7..].trim_start().starts_with('(');
        if bounded {
            return Some(pos);
        }
        from = pos + 7;
    }
    None
}

/// Move a trailing `LIMIT n` behind the owning SELECT as `TOP n`.
///
/// Only a LIMIT at parenthesis depth zero moves, attaching to the first
/// depth-zero SELECT; `LIMIT … OFFSET …` is left for the backend since
/// TOP cannot express the offset.
fn rewrite_limit(sql: &str) -> String {
    let segs = scan::segments(sql);

    // locate LIMIT and SELECT at depth zero in code segments, measuring
    // offsets against the original string
    let mut depth = 0i32;
    let mut offset = 0usize;
    let mut select_at: Option<usize> = None;
    let mut limit: Option<(usize, usize, String)> = None; // (start, end, argument)
    let mut has_offset = false;

    for seg in &segs {
        let text = seg.as_str();
        if let Segment::Code(code) = seg {
            let bytes = code.as_bytes();
            let mut i = 0;
            while i < bytes.len() {
                match bytes[i] {
                    b'(' => depth += 1,
                    b')' => depth -= 1,
                    b if scan::is_ident_start(b)
                        && (i == 0 || !scan::is_ident_char(bytes[i - 1])) =>
                    {
                        let start = i;
                        while i + 1 < bytes.len() && scan::is_ident_char(bytes[i + 1]) {
                            i += 1;
                        }
                        let word = &code[start..=i];
                        if depth == 0 {
                            if word.eq_ignore_ascii_case("SELECT") && select_at.is_none() {
                                select_at = Some(offset + start + word.len());
                            } else if word.eq_ignore_ascii_case("OFFSET") {
                                has_offset = true;
                            } else if word.eq_ignore_ascii_case("LIMIT") {
                                // argument: integer or placeholder
                                let tail = &code[i + 1..];
                                let arg_rel = tail.len() - tail.trim_start().len();
                                let arg = tail.trim_start();
                                let arg_len = arg
                                    .bytes()
                                    .position(|b| {
                                        !(b.is_ascii_digit() || b == b'$' || b == b'?')
                                    })
                                    .unwrap_or(arg.len());
                                if arg_len > 0 {
                                    let arg = &arg[..arg_len];
                                    let start_abs = offset + start;
                                    let end_abs = offset + i + 1 + arg_rel + arg_len;
                                    limit = Some((start_abs, end_abs, arg.to_string()));
                                }
                            }
                        }
                    }
                    _ => { }
                }
                i += 1;
            }
        }
        offset += text.len();
    }

    let (Some(select_end), Some((lstart, lend, arg)), false) = (select_at, limit, has_offset)
    else {
        return sql.to_string();
    };

    let mut out = String::with_capacity(sql.len());
    out.push_str(&sql[..select_end]);
    out.push_str(" TOP ");
    out.push_str(&arg);
    // everything between SELECT and LIMIT, then past the LIMIT clause
    let mid = sql[select_end..lstart].trim_end();
    out.push_str(mid);
    out.push_str(&sql[lend..]);
    out
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn limit_becomes_top() {
        assert_eq!(
            rewrite("SELECT id FROM t LIMIT 5"),
            "SELECT TOP 5 id FROM t",
        );
    }

    #[test]
    fn limit_with_order_by() {
        assert_eq!(
            rewrite("SELECT id FROM vecs ORDER BY d LIMIT 5"),
            "SELECT TOP 5 id FROM vecs ORDER BY d",
        );
    }

    #[test]
    fn limit_placeholder() {
        assert_eq!(
            rewrite("SELECT id FROM t LIMIT $2"),
            "SELECT TOP $2 id FROM t",
        );
    }

    #[test]
    fn limit_offset_left_alone() {
        let sql = "SELECT id FROM t LIMIT 5 OFFSET 10";
        assert_eq!(rewrite(sql), sql);
    }

    #[test]
    fn subquery_limit_untouched() {
        let sql = "SELECT * FROM (SELECT id FROM t LIMIT 5) u";
        assert_eq!(rewrite(sql), sql);
    }

    #[test]
    fn simple_cast() {
        assert_eq!(rewrite("SELECT id::text FROM t"), "SELECT CAST(id AS VARCHAR) FROM t");
    }

    #[test]
    fn literal_cast() {
        assert_eq!(rewrite("SELECT '5'::int4"), "SELECT CAST('5' AS INTEGER)");
    }

    #[test]
    fn parameterized_cast() {
        assert_eq!(
            rewrite("SELECT name::varchar(10) FROM t"),
            "SELECT CAST(name AS VARCHAR(10)) FROM t",
        );
    }

    #[test]
    fn regclass_cast_dropped() {
        assert_eq!(rewrite("SELECT 'users'::regclass"), "SELECT 'users'");
    }

    #[test]
    fn nextval_rewrite() {
        assert_eq!(
            rewrite("SELECT nextval('users_id_seq')"),
            "SELECT NEXT VALUE FOR USERS_ID_SEQ",
        );
    }

    #[test]
    fn nextval_with_schema_and_regclass() {
        assert_eq!(
            rewrite("SELECT nextval('public.users_id_seq'::regclass)"),
            "SELECT NEXT VALUE FOR USERS_ID_SEQ",
        );
    }

    #[test]
    fn no_dialect_identity() {
        let sql = "SELECT a, b FROM t WHERE c = 'x::y'";
        assert_eq!(rewrite(sql), sql);
    }
}
