//! pgvector compatibility rewriting.
//!
//! Clients ship pgvector syntax (`embedding <=> '[0.1,0.2]'`) or bind whole
//! vectors as parameters. IRIS wants `VECTOR_COSINE(embedding,
//! TO_VECTOR('[0.1,0.2]', FLOAT))`. The bracketed form of the literal is
//! load-bearing: stripping the brackets sends the backend SQL compiler into
//! a hang, so a validation pass rejects any rewrite that lost them before
//! the statement can leave the process.
use base64::Engine;
use bytes::Bytes;

use super::scan::{self, Segment};

/// Error from a vector rewrite whose output failed validation, carrying
/// the offending fragment. The statement is rejected before it reaches
/// the backend.
pub struct TranslationError {
    message: String,
}

impl TranslationError {
    pub(crate) fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

impl std::error::Error for TranslationError { }

impl std::fmt::Display for TranslationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "vector translation produced invalid SQL: {}", self.message)
    }
}

impl std::fmt::Debug for TranslationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "\"{self}\"")
    }
}

/// A parameter bound by the client, as the optimizer sees it.
#[derive(Debug, Clone, PartialEq)]
pub enum BoundParam {
    Null,
    Text(String),
    Binary(Bytes),
}

impl BoundParam {
    fn as_text(&self) -> Option<&str> {
        match self {
            BoundParam::Text(s) => Some(s),
            _ => None,
        }
    }
}

const OPERATORS: &[(&str, &str)] = &[
    ("<=>", "VECTOR_COSINE"),
    ("<->", "VECTOR_L2"),
    ("<#>", "VECTOR_DOT_PRODUCT"),
];

/// Rewrite pgvector operators in SQL text.
///
/// The right-hand side may be a bracketed literal, a bare comma list
/// literal (brackets are added), or a placeholder that a later
/// [`splice_params`] call will fill in. SQL without any pgvector operator
/// is returned unchanged.
///
/// `negate_inner_product` wraps `VECTOR_DOT_PRODUCT` in a negation to keep
/// pgvector's `<#>` ordering semantics; most clients already compensate
/// with `* -1`, so the default is off.
pub fn rewrite_operators(sql: &str, negate_inner_product: bool) -> (String, usize) {
    if !OPERATORS.iter().any(|(op, _)| sql.contains(op)) {
        return (sql.to_string(), 0);
    }

    let segs = scan::segments(sql);
    let mut out = String::with_capacity(sql.len() + 64);
    let mut rewrites = 0;
    // set when the operator's literal argument is the next segment
    let mut pending_close: Option<&'static str> = None;

    for seg in segs {
        match seg {
            Segment::Code(code) => {
                let mut rest = code;
                loop {
                    let Some((pos, op, func)) = find_operator(rest) else {
                        out.push_str(rest);
                        break;
                    };
                    out.push_str(&rest[..pos]);
                    let trimmed_len = out.trim_end().len();
                    out.truncate(trimmed_len);

                    let Some(lhs_start) = scan::operand_start(&out) else {
                        // no operand to attach to; emit the operator as-is
                        out.push_str(op);
                        rest = &rest[pos + op.len()..];
                        continue;
                    };

                    let lhs = out.split_off(lhs_start);
                    let neg = negate_inner_product && func == "VECTOR_DOT_PRODUCT";
                    if neg {
                        out.push('-');
                    }
                    out.push_str(func);
                    out.push('(');
                    out.push_str(&lhs);
                    out.push_str(", TO_VECTOR(");
                    rewrites += 1;

                    let after = rest[pos + op.len()..].trim_start();
                    if let Some(ph_len) = placeholder_len(after) {
                        out.push_str(&after[..ph_len]);
                        out.push_str(", FLOAT))");
                        rest = &after[ph_len..];
                        continue;
                    }
                    // literal lives in the next segment
                    pending_close = Some(", FLOAT))");
                    rest = after;
                    if !rest.is_empty() {
                        // something unexpected follows the operator; keep it
                        // after the close so validation can flag the result
                        out.push_str(", FLOAT))");
                        pending_close = None;
                        out.push_str(rest);
                    }
                    break;
                }
            }
            Segment::SingleQuoted(lit) if pending_close.is_some() => {
                out.push_str(&canonical_literal(lit));
                out.push_str(pending_close.take().unwrap());
            }
            other => out.push_str(other.as_str()),
        }
    }
    (out, rewrites)
}

fn find_operator(code: &str) -> Option<(usize, &'static str, &'static str)> {
    OPERATORS
        .iter()
        .filter_map(|(op, func)| code.find(op).map(|pos| (pos, *op, *func)))
        .min_by_key(|(pos, ..)| *pos)
}

fn placeholder_len(s: &str) -> Option<usize> {
    let bytes = s.as_bytes();
    match bytes.first()? {
        b'?' => Some(1),
        b'$' => {
            let digits = bytes[1..].iter().take_while(|b| b.is_ascii_digit()).count();
            (digits > 0).then_some(1 + digits)
        }
        _ => None,
    }
}

/// Quote a vector literal in canonical bracketed form.
fn canonical_literal(lit: &str) -> String {
    let inner = lit.trim_matches('\'');
    if inner.starts_with('[') {
        lit.to_string()
    } else {
        // bare comma list; brackets are mandatory downstream
        format!("'[{inner}]'")
    }
}

/// Inline vector-valued bound parameters whose placeholder sits inside a
/// `TO_VECTOR(` call, removing them from the outgoing parameter vector and
/// renumbering the survivors. Everything else passes through unchanged.
pub fn splice_params(
    sql: &str,
    params: &[BoundParam],
) -> (String, Vec<usize>) {
    let upper = sql.to_ascii_uppercase();
    if !upper.contains("TO_VECTOR") || params.is_empty() {
        return (sql.to_string(), (0..params.len()).collect());
    }

    // first pass: which parameter does each placeholder use, and is every
    // reference of that parameter inside TO_VECTOR(
    let mut positional = 0usize;
    let mut inline: Vec<bool> = vec![true; params.len()];
    let mut referenced: Vec<bool> = vec![false; params.len()];

    visit_placeholders(sql, |out_so_far, idx| {
        let idx = idx.unwrap_or_else(|| {
            let i = positional;
            positional += 1;
            i
        });
        if idx < params.len() {
            referenced[idx] = true;
            let vectorizable = parse_vector(&params[idx]).is_some();
            if !(vectorizable && inside_to_vector(out_so_far)) {
                inline[idx] = false;
            }
        }
        None
    });
    for (i, seen) in referenced.iter().enumerate() {
        if !seen {
            inline[i] = false;
        }
    }

    if !inline.iter().any(|b| *b) {
        return (sql.to_string(), (0..params.len()).collect());
    }

    // survivors keep their relative order under new numbering
    let mut new_index = vec![0usize; params.len()];
    let mut kept = Vec::new();
    for (i, inlined) in inline.iter().enumerate() {
        if !inlined {
            new_index[i] = kept.len();
            kept.push(i);
        }
    }

    let mut positional = 0usize;
    let out = rewrite_placeholders(sql, |_, idx| {
        let idx = idx.unwrap_or_else(|| {
            let i = positional;
            positional += 1;
            i
        });
        if idx < params.len() && inline[idx] {
            let floats = parse_vector(&params[idx]).expect("checked in first pass");
            Some(format!("'{}'", bracketed(&floats)))
        } else if idx < params.len() {
            Some(format!("${}", new_index[idx] + 1))
        } else {
            None
        }
    });

    (out, kept)
}

/// Walk `$n` / `?` placeholders in code segments; `f` receives the output
/// emitted so far and the 0-based parameter index (`None` for `?`).
fn visit_placeholders(sql: &str, mut f: impl FnMut(&str, Option<usize>) -> Option<String>) {
    rewrite_placeholders(sql, |out, idx| {
        f(out, idx);
        None
    });
}

/// Rebuild `sql`, replacing each placeholder with `f`'s output when it
/// returns `Some`.
fn rewrite_placeholders(
    sql: &str,
    mut f: impl FnMut(&str, Option<usize>) -> Option<String>,
) -> String {
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
                    match f(&out, None) {
                        Some(repl) => out.push_str(&repl),
                        None => out.push('?'),
                    }
                    i += 1;
                }
                b'$' if bytes.get(i + 1).is_some_and(u8::is_ascii_digit) => {
                    let mut end = i + 1;
                    while end < bytes.len() && bytes[end].is_ascii_digit() {
                        end += 1;
                    }
                    let n: usize = code[i + 1..end].parse().unwrap_or(0);
                    if n > 0 {
                        match f(&out, Some(n - 1)) {
                            Some(repl) => out.push_str(&repl),
                            None => out.push_str(&code[i..end]),
                        }
                    } else {
                        out.push_str(&code[i..end]);
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

/// Whether the emitted SQL ends with `TO_VECTOR(`, meaning the next token
/// is its vector argument.
fn inside_to_vector(out: &str) -> bool {
    let trimmed = out.trim_end();
    let Some(head) = trimmed.strip_suffix('(') else { return false };
    let head = head.trim_end();
    head.len() >= 9 && head[head.len() - 9..].eq_ignore_ascii_case("TO_VECTOR")
}

/// Decode a bound parameter into floats if it carries a vector in any
/// accepted surface form.
fn parse_vector(param: &BoundParam) -> Option<Vec<f32>> {
    let text = param.as_text()?;

    if let Some(b64) = text.strip_prefix("base64:") {
        let raw = base64::engine::general_purpose::STANDARD.decode(b64).ok()?;
        if raw.is_empty() || raw.len() % 4 != 0 {
            return None;
        }
        return Some(
            raw.chunks_exact(4)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect(),
        );
    }

    if text.starts_with('[') {
        let parsed: Vec<f32> = serde_json::from_str(text).ok()?;
        return (!parsed.is_empty()).then_some(parsed);
    }

    // bare comma separated floats
    if text.contains(',') {
        let parsed: Result<Vec<f32>, _> = text.split(',').map(|t| t.trim().parse()).collect();
        if let Ok(floats) = parsed {
            if !floats.is_empty() {
                return Some(floats);
            }
        }
    }
    None
}

fn bracketed(floats: &[f32]) -> String {
    let mut out = String::with_capacity(2 + floats.len() * 8);
    out.push('[');
    for (i, f) in floats.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(&f.to_string());
    }
    out.push(']');
    out
}

/// Post-rewrite validation: every `TO_VECTOR(` must take a bracketed
/// quoted literal (or a still-unbound placeholder) followed by a type
/// keyword. Counts the vector literals seen.
pub fn validate(sql: &str) -> Result<usize, TranslationError> {
    let upper = sql.to_ascii_uppercase();
    let mut count = 0;
    let mut from = 0;

    while let Some(rel) = upper[from..].find("TO_VECTOR") {
        let pos = from + rel;
        from = pos + "TO_VECTOR".len();
        let bounded = pos == 0 || !scan::is_ident_char(upper.as_bytes()[pos - 1]);
        if !bounded {
            continue;
        }
        let rest = sql[from..].trim_start();
        let Some(rest) = rest.strip_prefix('(') else { continue };
        let arg = rest.trim_start();

        if placeholder_len(arg).is_some() {
            count += 1;
            continue;
        }

        if !arg.starts_with("'[") {
            return Err(TranslationError::new(fragment(sql, pos)));
        }
        let Some(close) = arg[1..].find('\'') else {
            return Err(TranslationError::new(fragment(sql, pos)));
        };
        let literal = &arg[..close + 2];
        if !literal.ends_with("]'") {
            return Err(TranslationError::new(fragment(sql, pos)));
        }
        let after = arg[close + 2..].trim_start();
        let Some(after) = after.strip_prefix(',') else {
            return Err(TranslationError::new(fragment(sql, pos)));
        };
        let keyword: String = after
            .trim_start()
            .chars()
            .take_while(|c| c.is_ascii_alphabetic())
            .collect();
        let keyword = keyword.to_ascii_uppercase();
        if !matches!(keyword.as_str(), "FLOAT" | "DOUBLE" | "DECIMAL" | "INTEGER" | "INT") {
            return Err(TranslationError::new(fragment(sql, pos)));
        }
        count += 1;
    }
    Ok(count)
}

fn fragment(sql: &str, pos: usize) -> String {
    let end = (pos + 64).min(sql.len());
    format!("near `{}`", &sql[pos..end])
}
