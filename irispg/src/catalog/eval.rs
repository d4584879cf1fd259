//! In-process evaluation of catalog selects.
//!
//! Introspection queries are a narrow dialect: single tables or equijoins
//! over the six emulated catalogs, conjunctive filters on columns, and
//! catalog function calls in the projection. That dialect is evaluated
//! here without touching the backend; anything outside it makes the
//! parser return `None` and the router fall back.
use crate::{
    sql::scan::{self, Segment},
    types::Value,
};

use super::{Snapshot, functions, rows::{PgAttrdef, PgAttribute, PgClass, PgConstraint, PgIndex, PgNamespace}};

#[derive(Debug, Clone, PartialEq)]
pub(super) struct ColRef {
    pub qualifier: Option<String>,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub(super) enum Lit {
    Int(i64),
    Str(String),
    Bool(bool),
    Null,
}

#[derive(Debug, Clone, PartialEq)]
pub(super) enum Arg {
    Col(ColRef),
    Lit(Lit),
}

#[derive(Debug, Clone, PartialEq)]
pub(super) struct FuncCall {
    pub name: String,
    pub args: Vec<Arg>,
}

#[derive(Debug, Clone, PartialEq)]
pub(super) enum Proj {
    Star,
    /// `alias.*`
    TableStar(String),
    Column(ColRef, Option<String>),
    Call(FuncCall, Option<String>),
}

#[derive(Debug, Clone, PartialEq)]
pub(super) struct TableRef {
    pub table: String,
    pub alias: String,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(super) enum Op {
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
}

#[derive(Debug, Clone, PartialEq)]
pub(super) enum Filter {
    Cmp(ColRef, Op, Lit),
    In(ColRef, Vec<Lit>),
    Join(ColRef, ColRef),
}

#[derive(Debug, Clone, PartialEq)]
pub(super) struct CatalogQuery {
    pub projections: Vec<Proj>,
    pub tables: Vec<TableRef>,
    pub filters: Vec<Filter>,
    pub order_by: Vec<ColRef>,
}

// ---------- tokenizer ----------

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Word(String),
    Str(String),
    Int(i64),
    Punct(char),
}

fn tokenize(sql: &str) -> Option<Vec<Token>> {
    let mut out = Vec::new();
    for seg in scan::segments(sql) {
        match seg {
            Segment::SingleQuoted(lit) => {
                if lit.len() < 2 || !lit.ends_with('\'') {
                    return None;
                }
                let inner = &lit[1..lit.len() - 1];
                out.push(Token::Str(inner.replace("''", "'")));
            }
            Segment::DoubleQuoted(lit) => {
                if lit.len() < 2 || !lit.ends_with('"') {
                    return None;
                }
                let inner = &lit[1..lit.len() - 1];
                out.push(Token::Word(inner.to_string()));
            }
            Segment::LineComment(_) | Segment::BlockComment(_) => { }
            Segment::Code(code) => {
                let bytes = code.as_bytes();
                let mut i = 0;
                while i < bytes.len() {
                    let b = bytes[i];
                    if b.is_ascii_whitespace() {
                        i += 1;
                    } else if b.is_ascii_alphabetic() || b == b'_' {
                        let start = i;
                        while i < bytes.len()
                            && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_')
                        {
                            i += 1;
                        }
                        out.push(Token::Word(code[start..i].to_string()));
                    } else if b.is_ascii_digit()
                        || (b == b'-' && bytes.get(i + 1).is_some_and(u8::is_ascii_digit))
                    {
                        let start = i;
                        i += 1;
                        while i < bytes.len() && bytes[i].is_ascii_digit() {
                            i += 1;
                        }
                        out.push(Token::Int(code[start..i].parse().ok()?));
                    } else if matches!(b, b'*' | b'.' | b',' | b'(' | b')' | b'=' | b'>' | b'<' | b';') {
                        out.push(Token::Punct(b as char));
                        i += 1;
                    } else {
                        // anything else is outside the supported dialect
                        return None;
                    }
                }
            }
        }
    }
    Some(out)
}

// ---------- parser ----------

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn eat_word(&mut self, word: &str) -> bool {
        if let Some(Token::Word(w)) = self.peek() {
            if w.eq_ignore_ascii_case(word) {
                self.pos += 1;
                return true;
            }
        }
        false
    }

    fn eat_punct(&mut self, c: char) -> bool {
        if self.peek() == Some(&Token::Punct(c)) {
            self.pos += 1;
            return true;
        }
        false
    }

    fn word(&mut self) -> Option<String> {
        match self.next()? {
            Token::Word(w) => Some(w),
            _ => None,
        }
    }

    /// `name`, `qualifier.name`, or `schema.qualifier.name` (the schema
    /// part is dropped; pg_catalog is implied).
    fn col_ref(&mut self) -> Option<ColRef> {
        let first = self.word()?;
        if !self.eat_punct('.') {
            return Some(ColRef { qualifier: None, name: first });
        }
        let second = self.word()?;
        if !self.eat_punct('.') {
            return Some(ColRef { qualifier: Some(first), name: second });
        }
        let third = self.word()?;
        Some(ColRef { qualifier: Some(second), name: third })
    }

    fn lit(&mut self) -> Option<Lit> {
        match self.next()? {
            Token::Str(s) => Some(Lit::Str(s)),
            Token::Int(n) => Some(Lit::Int(n)),
            Token::Word(w) if w.eq_ignore_ascii_case("NULL") => Some(Lit::Null),
            Token::Word(w) if w.eq_ignore_ascii_case("TRUE") => Some(Lit::Bool(true)),
            Token::Word(w) if w.eq_ignore_ascii_case("FALSE") => Some(Lit::Bool(false)),
            _ => None,
        }
    }

    fn arg(&mut self) -> Option<Arg> {
        match self.peek()? {
            Token::Str(_) | Token::Int(_) => self.lit().map(Arg::Lit),
            Token::Word(w)
                if w.eq_ignore_ascii_case("NULL")
                    || w.eq_ignore_ascii_case("TRUE")
                    || w.eq_ignore_ascii_case("FALSE") =>
            {
                self.lit().map(Arg::Lit)
            }
            Token::Word(_) => self.col_ref().map(Arg::Col),
            _ => None,
        }
    }
}

/// Parse one catalog select; `None` means the shape is unsupported.
pub(super) fn parse(sql: &str) -> Option<CatalogQuery> {
    let tokens = tokenize(sql)?;
    let mut p = Parser { tokens, pos: 0 };

    if !p.eat_word("SELECT") {
        return None;
    }
    p.eat_word("DISTINCT");

    // projections
    let mut projections = Vec::new();
    loop {
        if p.eat_punct('*') {
            projections.push(Proj::Star);
        } else {
            let save = p.pos;
            let name = p.word()?;
            if p.eat_punct('(') {
                // scalar function call
                let mut args = Vec::new();
                if !p.eat_punct(')') {
                    loop {
                        args.push(p.arg()?);
                        if p.eat_punct(')') {
                            break;
                        }
                        if !p.eat_punct(',') {
                            return None;
                        }
                    }
                }
                let alias = parse_alias(&mut p);
                projections.push(Proj::Call(
                    FuncCall { name: name.to_lowercase(), args },
                    alias,
                ));
            } else if p.eat_punct('.') && p.eat_punct('*') {
                projections.push(Proj::TableStar(name));
            } else {
                p.pos = save;
                let col = p.col_ref()?;
                let alias = parse_alias(&mut p);
                projections.push(Proj::Column(col, alias));
            }
        }
        if !p.eat_punct(',') {
            break;
        }
    }

    // FROM list; a function-only select has none
    let mut tables = Vec::new();
    let mut filters = Vec::new();
    if p.eat_word("FROM") {
        loop {
            tables.push(parse_table(&mut p)?);
            if !p.eat_punct(',') {
                break;
            }
        }
        // JOIN ... ON a.c = b.c
        loop {
            let inner = p.eat_word("INNER");
            if inner || p.peek().is_some_and(|t| matches!(t, Token::Word(w) if w.eq_ignore_ascii_case("JOIN"))) {
                if !p.eat_word("JOIN") {
                    return None;
                }
                tables.push(parse_table(&mut p)?);
                if !p.eat_word("ON") {
                    return None;
                }
                let left = p.col_ref()?;
                if !p.eat_punct('=') {
                    return None;
                }
                let right = p.col_ref()?;
                filters.push(Filter::Join(left, right));
            } else {
                break;
            }
        }
    }

    if p.eat_word("WHERE") {
        loop {
            filters.push(parse_predicate(&mut p)?);
            if !p.eat_word("AND") {
                break;
            }
        }
    }

    let mut order_by = Vec::new();
    if p.eat_word("ORDER") {
        if !p.eat_word("BY") {
            return None;
        }
        loop {
            order_by.push(p.col_ref()?);
            p.eat_word("ASC");
            p.eat_word("DESC");
            if !p.eat_punct(',') {
                break;
            }
        }
    }

    p.eat_punct(';');
    if p.peek().is_some() {
        return None;
    }

    Some(CatalogQuery { projections, tables, filters, order_by })
}

fn parse_alias(p: &mut Parser) -> Option<String> {
    if p.eat_word("AS") {
        return p.word();
    }
    None
}

fn parse_table(p: &mut Parser) -> Option<TableRef> {
    let first = p.word()?;
    let name = if p.eat_punct('.') {
        // pg_catalog.pg_class
        p.word()?
    } else {
        first.clone()
    };
    let table = name.to_lowercase();

    // optional alias, but never a clause keyword
    let alias = match p.peek() {
        Some(Token::Word(w))
            if !matches!(
                w.to_ascii_uppercase().as_str(),
                "WHERE" | "JOIN" | "INNER" | "LEFT" | "ON" | "ORDER" | "AND" | "AS",
            ) =>
        {
            p.word()?
        }
        _ => {
            if p.eat_word("AS") {
                p.word()?
            } else {
                table.clone()
            }
        }
    };
    Some(TableRef { table, alias })
}

fn parse_predicate(p: &mut Parser) -> Option<Filter> {
    let col = p.col_ref()?;

    if p.eat_word("IN") {
        if !p.eat_punct('(') {
            return None;
        }
        let mut lits = Vec::new();
        loop {
            lits.push(p.lit()?);
            if p.eat_punct(')') {
                break;
            }
            if !p.eat_punct(',') {
                return None;
            }
        }
        return Some(Filter::In(col, lits));
    }

    let op = match p.next()? {
        Token::Punct('=') => Op::Eq,
        Token::Punct('>') => {
            if p.eat_punct('=') { Op::Ge } else { Op::Gt }
        }
        Token::Punct('<') => {
            if p.eat_punct('=') {
                Op::Le
            } else if p.eat_punct('>') {
                Op::Ne
            } else {
                Op::Lt
            }
        }
        _ => return None,
    };

    // either a literal or a join-style column reference
    match p.peek()? {
        Token::Word(w)
            if !w.eq_ignore_ascii_case("NULL")
                && !w.eq_ignore_ascii_case("TRUE")
                && !w.eq_ignore_ascii_case("FALSE") =>
        {
            let right = p.col_ref()?;
            (op == Op::Eq).then_some(Filter::Join(col, right))
        }
        _ => Some(Filter::Cmp(col, op, p.lit()?)),
    }
}

// ---------- evaluation ----------

/// The emulated tables this evaluator can read.
pub(super) const CATALOG_TABLES: &[&str] = &[
    "pg_namespace",
    "pg_class",
    "pg_attribute",
    "pg_attrdef",
    "pg_index",
    "pg_constraint",
];

fn table_data(snap: &Snapshot, table: &str) -> Option<(&'static [&'static str], Vec<Vec<Value>>)> {
    Some(match table {
        "pg_namespace" => (
            PgNamespace::COLUMNS,
            snap.namespaces.iter().map(PgNamespace::to_row).collect(),
        ),
        "pg_class" => (PgClass::COLUMNS, snap.classes.iter().map(PgClass::to_row).collect()),
        "pg_attribute" => (
            PgAttribute::COLUMNS,
            snap.attributes.iter().map(PgAttribute::to_row).collect(),
        ),
        "pg_attrdef" => (
            PgAttrdef::COLUMNS,
            snap.attrdefs.iter().map(PgAttrdef::to_row).collect(),
        ),
        "pg_index" => (PgIndex::COLUMNS, snap.indexes.iter().map(PgIndex::to_row).collect()),
        "pg_constraint" => (
            PgConstraint::COLUMNS,
            snap.constraints.iter().map(PgConstraint::to_row).collect(),
        ),
        _ => return None,
    })
}

struct Binding {
    alias: String,
    columns: &'static [&'static str],
    rows: Vec<Vec<Value>>,
}

/// A result set from in-process evaluation.
pub(super) struct Evaluated {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

/// Run a parsed query against a snapshot. `schema_names` is the
/// `(client, backend)` pair: literals naming either compare equal to the
/// emulator's client-visible rows.
pub(super) fn evaluate(
    snap: &Snapshot,
    query: &CatalogQuery,
    schema_names: (&str, &str),
) -> Option<Evaluated> {
    let mut bindings: Vec<Binding> = Vec::new();
    for t in &query.tables {
        let (columns, rows) = table_data(snap, &t.table)?;
        bindings.push(Binding { alias: t.alias.clone(), columns, rows });
    }

    // resolve a column reference to (binding index, column index)
    let resolve = |col: &ColRef| -> Option<(usize, usize)> {
        for (bi, b) in bindings.iter().enumerate() {
            if let Some(q) = &col.qualifier {
                if !q.eq_ignore_ascii_case(&b.alias) {
                    continue;
                }
            }
            if let Some(ci) = b
                .columns
                .iter()
                .position(|c| c.eq_ignore_ascii_case(&col.name))
            {
                return Some((bi, ci));
            }
            if col.qualifier.is_some() {
                return None;
            }
        }
        None
    };

    // cartesian walk with early filtering; catalog row counts are small
    let mut current: Vec<usize> = Vec::new();
    let mut results: Vec<Vec<&[Value]>> = Vec::new();
    cartesian(&bindings, &mut current, &mut results);

    let mut kept: Vec<Vec<&[Value]>> = Vec::new();
    'rows: for combo in results {
        for filter in &query.filters {
            let ok = match filter {
                Filter::Join(a, b) => {
                    let (ai, ac) = resolve(a)?;
                    let (bi, bc) = resolve(b)?;
                    values_equal(&combo[ai][ac], &combo[bi][bc])
                }
                Filter::Cmp(col, op, lit) => {
                    let (bi, ci) = resolve(col)?;
                    compare(&combo[bi][ci], *op, lit, schema_names)
                }
                Filter::In(col, lits) => {
                    let (bi, ci) = resolve(col)?;
                    lits.iter()
                        .any(|l| compare(&combo[bi][ci], Op::Eq, l, schema_names))
                }
            };
            if !ok {
                continue 'rows;
            }
        }
        kept.push(combo);
    }

    // projection
    let mut columns: Vec<String> = Vec::new();
    let mut emit: Vec<Emit> = Vec::new();
    for proj in &query.projections {
        match proj {
            Proj::Star => {
                for (bi, b) in bindings.iter().enumerate() {
                    for (ci, name) in b.columns.iter().enumerate() {
                        columns.push((*name).to_string());
                        emit.push(Emit::Cell(bi, ci));
                    }
                }
            }
            Proj::TableStar(alias) => {
                let bi = bindings
                    .iter()
                    .position(|b| b.alias.eq_ignore_ascii_case(alias))?;
                for (ci, name) in bindings[bi].columns.iter().enumerate() {
                    columns.push((*name).to_string());
                    emit.push(Emit::Cell(bi, ci));
                }
            }
            Proj::Column(col, alias) => {
                let (bi, ci) = resolve(col)?;
                columns.push(
                    alias
                        .clone()
                        .unwrap_or_else(|| col.name.to_lowercase()),
                );
                emit.push(Emit::Cell(bi, ci));
            }
            Proj::Call(call, alias) => {
                columns.push(alias.clone().unwrap_or_else(|| call.name.clone()));
                emit.push(Emit::Call(call.clone()));
            }
        }
    }

    // resolve the arguments of a projection function call against the
    // current joined row, if any
    let call_args = |call: &FuncCall, combo: Option<&Vec<&[Value]>>| -> Option<Vec<Value>> {
        call.args
            .iter()
            .map(|arg| match arg {
                Arg::Lit(Lit::Int(n)) => Some(Value::Int8(*n)),
                Arg::Lit(Lit::Str(s)) => Some(Value::Text(s.clone())),
                Arg::Lit(Lit::Bool(b)) => Some(Value::Bool(*b)),
                Arg::Lit(Lit::Null) => Some(Value::Null),
                Arg::Col(col) => {
                    let combo = combo?;
                    let (bi, ci) = resolve(col)?;
                    Some(combo[bi][ci].clone())
                }
            })
            .collect()
    };

    let mut rows = Vec::with_capacity(kept.len().max(1));
    if bindings.is_empty() {
        // function-only select: one row
        let mut row = Vec::with_capacity(emit.len());
        for e in &emit {
            match e {
                Emit::Cell(..) => return None,
                Emit::Call(call) => {
                    row.push(eval_call(snap, &call.name, &call_args(call, None)?)?);
                }
            }
        }
        rows.push(row);
    } else {
        for combo in &kept {
            let mut row = Vec::with_capacity(emit.len());
            for e in &emit {
                match e {
                    Emit::Cell(bi, ci) => row.push(combo[*bi][*ci].clone()),
                    Emit::Call(call) => {
                        row.push(eval_call(snap, &call.name, &call_args(call, Some(combo))?)?);
                    }
                }
            }
            rows.push(row);
        }
    }

    // ORDER BY, text ordering is enough for catalog listings
    if !query.order_by.is_empty() {
        let keys: Vec<usize> = query
            .order_by
            .iter()
            .filter_map(|col| {
                columns
                    .iter()
                    .position(|c| c.eq_ignore_ascii_case(&col.name))
            })
            .collect();
        rows.sort_by(|a, b| {
            for k in &keys {
                let av = a[*k].encode_text().unwrap_or_default();
                let bv = b[*k].encode_text().unwrap_or_default();
                match av.cmp(&bv) {
                    std::cmp::Ordering::Equal => continue,
                    other => return other,
                }
            }
            std::cmp::Ordering::Equal
        });
    }

    Some(Evaluated { columns, rows })
}

enum Emit {
    Cell(usize, usize),
    Call(FuncCall),
}

fn cartesian<'a>(
    bindings: &'a [Binding],
    current: &mut Vec<usize>,
    out: &mut Vec<Vec<&'a [Value]>>,
) {
    if current.len() == bindings.len() {
        out.push(
            current
                .iter()
                .enumerate()
                .map(|(bi, ri)| bindings[bi].rows[*ri].as_slice())
                .collect(),
        );
        return;
    }
    let bi = current.len();
    for ri in 0..bindings[bi].rows.len() {
        current.push(ri);
        cartesian(bindings, current, out);
        current.pop();
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    if a == b {
        return true;
    }
    match (value_as_int(a), value_as_int(b)) {
        (Some(x), Some(y)) => x == y,
        _ => false,
    }
}

fn value_as_int(v: &Value) -> Option<i64> {
    match v {
        Value::Int2(n) => Some(*n as i64),
        Value::Int4(n) => Some(*n as i64),
        Value::Int8(n) => Some(*n),
        Value::Text(s) | Value::Numeric(s) => s.parse().ok(),
        _ => None,
    }
}

fn compare(value: &Value, op: Op, lit: &Lit, schema_names: (&str, &str)) -> bool {
    use std::cmp::Ordering;

    let ord = match (lit, value_as_int(value)) {
        (Lit::Int(want), Some(have)) => have.cmp(want),
        (Lit::Null, _) => return matches!(value, Value::Null) && op == Op::Eq,
        (Lit::Bool(want), _) => match value {
            Value::Bool(have) => have.cmp(want),
            _ => return false,
        },
        (Lit::Str(want), _) => {
            let have = match value {
                Value::Text(s) => s.clone(),
                Value::Null => return false,
                other => String::from_utf8(
                    other.encode_text().map(|b| b.to_vec()).unwrap_or_default(),
                )
                .unwrap_or_default(),
            };
            let (client, backend) = schema_names;
            // a literal naming either side of the schema mapping matches
            // the emulator's client-visible rows
            if (want.eq_ignore_ascii_case(client) || want.eq_ignore_ascii_case(backend))
                && (have.eq_ignore_ascii_case(client) || have.eq_ignore_ascii_case(backend))
            {
                Ordering::Equal
            } else {
                have.cmp(want)
            }
        }
        (Lit::Int(_), None) => return false,
    };

    match op {
        Op::Eq => ord == Ordering::Equal,
        Op::Ne => ord != Ordering::Equal,
        Op::Gt => ord == Ordering::Greater,
        Op::Lt => ord == Ordering::Less,
        Op::Ge => ord != Ordering::Less,
        Op::Le => ord != Ordering::Greater,
    }
}

/// Dispatch a catalog scalar function over already-resolved arguments.
/// The set here mirrors what ORM introspection actually calls.
pub(super) fn eval_call(snap: &Snapshot, name: &str, args: &[Value]) -> Option<Value> {
    let int_arg = |i: usize| -> Option<i64> { args.get(i).and_then(value_as_int) };
    let text_arg = |i: usize| -> Option<String> {
        match args.get(i)? {
            Value::Text(s) => Some(s.clone()),
            other => other
                .encode_text()
                .and_then(|b| String::from_utf8(b.to_vec()).ok()),
        }
    };
    let opt = |s: Option<String>| s.map(Value::Text).unwrap_or(Value::Null);

    Some(match name {
        "format_type" => {
            let oid = int_arg(0)?;
            let typmod = int_arg(1).map(|m| m as i32);
            opt(functions::format_type(oid, typmod))
        }
        "pg_get_constraintdef" => opt(functions::constraint_def(snap, int_arg(0)?)),
        "pg_get_indexdef" => {
            let column = int_arg(1).map(|n| n as i32);
            opt(functions::index_def(snap, int_arg(0)?, column))
        }
        "pg_get_serial_sequence" => {
            opt(functions::serial_sequence(snap, &text_arg(0)?, &text_arg(1)?))
        }
        "pg_get_viewdef" => opt(functions::view_def(snap, int_arg(0)?)),
        _ => return None,
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::catalog::oid::OidGenerator;

    fn snapshot() -> (Snapshot, OidGenerator) {
        let g = OidGenerator::new();
        let mut snap = Snapshot {
            namespaces: PgNamespace::builtin(),
            ..Snapshot::default()
        };
        for (name, kind) in [("users", "BASE TABLE"), ("orders", "BASE TABLE"), ("v1", "VIEW")] {
            snap.classes.push(PgClass::from_iris_table(&g, "SQLUser", name, kind));
        }
        for (table, col, n) in [("users", "id", 1), ("users", "name", 2), ("orders", "id", 1)] {
            snap.attributes.push(PgAttribute::from_iris_column(
                &g, "SQLUser", table, col, n, "INTEGER", None, true, false, false,
            ));
        }
        (snap, g)
    }

    fn run(snap: &Snapshot, sql: &str) -> Evaluated {
        let q = parse(sql).expect("query should parse");
        evaluate(snap, &q, ("public", "SQLUser")).expect("query should evaluate")
    }

    #[test]
    fn select_star_from_namespace() {
        let (snap, _) = snapshot();
        let out = run(&snap, "SELECT * FROM pg_namespace");
        assert_eq!(out.rows.len(), 3);
        assert_eq!(out.columns[1], "nspname");
    }

    #[test]
    fn filter_by_relkind() {
        let (snap, _) = snapshot();
        let out = run(&snap, "SELECT relname FROM pg_class WHERE relkind = 'r'");
        assert_eq!(out.rows.len(), 2);
    }

    #[test]
    fn relkind_in_list() {
        let (snap, _) = snapshot();
        let out = run(&snap, "SELECT relname FROM pg_class WHERE relkind IN ('r','v')");
        assert_eq!(out.rows.len(), 3);
    }

    #[test]
    fn join_class_attribute_namespace() {
        let (snap, _) = snapshot();
        let out = run(
            &snap,
            "SELECT c.relname, a.attname FROM pg_class c \
             JOIN pg_namespace n ON n.oid = c.relnamespace \
             JOIN pg_attribute a ON a.attrelid = c.oid \
             WHERE n.nspname = 'public' AND c.relkind = 'r' AND a.attnum > 0",
        );
        assert_eq!(out.rows.len(), 3);
        assert_eq!(out.columns, vec!["relname", "attname"]);
    }

    #[test]
    fn schema_literal_matches_backend_spelling() {
        // the schema mapper may have rewritten 'public' before routing
        let (snap, _) = snapshot();
        let out = run(&snap, "SELECT nspname FROM pg_namespace WHERE nspname = 'SQLUser'");
        assert_eq!(out.rows.len(), 1);
        assert_eq!(out.rows[0][0], Value::Text("public".into()));
    }

    #[test]
    fn order_by_name() {
        let (snap, _) = snapshot();
        let out = run(&snap, "SELECT relname FROM pg_class WHERE relkind = 'r' ORDER BY relname");
        let names: Vec<String> = out
            .rows
            .iter()
            .map(|r| match &r[0] {
                Value::Text(s) => s.clone(),
                _ => panic!("expected text"),
            })
            .collect();
        assert_eq!(names, vec!["orders", "users"]);
    }

    #[test]
    fn function_only_select() {
        let (snap, _) = snapshot();
        let out = run(&snap, "SELECT format_type(23, NULL)");
        assert_eq!(out.rows[0][0], Value::Text("integer".into()));
    }

    #[test]
    fn uppercased_sql_still_parses() {
        // the identifier normalizer upper-cases catalog names on the way in
        let (snap, _) = snapshot();
        let out = run(&snap, "SELECT RELNAME FROM PG_CLASS WHERE RELKIND = 'r'");
        assert_eq!(out.rows.len(), 2);
    }

    #[test]
    fn unsupported_shape_is_none() {
        assert!(parse("SELECT count(*) FROM pg_class GROUP BY relkind").is_none());
        assert!(parse("WITH x AS (SELECT 1) SELECT * FROM x").is_none());
    }

    #[test]
    fn oid_filter_with_int() {
        let (snap, g) = snapshot();
        let oid = g.get_table_oid("SQLUser", "users");
        let out = run(&snap, &format!("SELECT relname FROM pg_class WHERE oid = {oid}"));
        assert_eq!(out.rows.len(), 1);
        assert_eq!(out.rows[0][0], Value::Text("users".into()));
    }
}
