//! Schema name mapping between the client-visible schema and the backend
//! schema.
//!
//! PostgreSQL clients live in `public`; IRIS user tables live in
//! `SQLUser`. Inbound SQL is rewritten before execution, outbound rows
//! are rewritten in schema-named columns only.
use std::sync::{Arc, Mutex};

use super::scan::{self, Segment};
use crate::types::Value;

/// Result columns whose values carry schema names.
const SCHEMA_COLUMNS: &[&str] = &["table_schema", "schema_name", "nspname"];

/// One client-schema/backend-schema pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaMapping {
    pub client: String,
    pub backend: String,
}

impl Default for SchemaMapping {
    fn default() -> Self {
        Self { client: "public".into(), backend: "SQLUser".into() }
    }
}

/// Process-wide schema mapper; reconfiguration swaps the mapping pointer
/// under a mutex so in-flight sessions keep a coherent pair.
#[derive(Debug)]
pub struct SchemaMapper {
    mapping: Mutex<Arc<SchemaMapping>>,
}

impl Default for SchemaMapper {
    fn default() -> Self {
        Self::new(SchemaMapping::default())
    }
}

impl SchemaMapper {
    pub fn new(mapping: SchemaMapping) -> Self {
        Self { mapping: Mutex::new(Arc::new(mapping)) }
    }

    /// The current mapping; cheap, clones an `Arc`.
    pub fn mapping(&self) -> Arc<SchemaMapping> {
        self.mapping.lock().unwrap().clone()
    }

    /// Atomically replace the mapping.
    pub fn reconfigure(&self, mapping: SchemaMapping) {
        *self.mapping.lock().unwrap() = Arc::new(mapping);
    }

    /// Rewrite client-schema references in inbound SQL to the backend
    /// schema: `public.x` qualifiers (bare or double-quoted) and `'public'`
    /// comparison literals. String literals elsewhere, comments, and
    /// `%`-prefixed backend system schemas are never rewritten.
    pub fn translate_input(&self, sql: &str) -> String {
        let m = self.mapping();
        let mut out = String::with_capacity(sql.len());
        let segs = scan::segments(sql);

        for (i, seg) in segs.iter().enumerate() {
            match seg {
                Segment::Code(code) => rewrite_qualifiers(code, &m, &mut out),
                Segment::SingleQuoted(lit) => {
                    let inner = lit.trim_matches('\'');
                    if inner.eq_ignore_ascii_case(&m.client) && in_comparison(&out) {
                        out.push('\'');
                        out.push_str(&m.backend);
                        out.push('\'');
                    } else {
                        out.push_str(lit);
                    }
                }
                Segment::DoubleQuoted(quoted) => {
                    let inner = quoted.trim_matches('"');
                    let next_is_dot = segs
                        .get(i + 1)
                        .is_some_and(|s| s.is_code() && s.as_str().trim_start().starts_with('.'));
                    if inner.eq_ignore_ascii_case(&m.client) && next_is_dot {
                        out.push_str(&m.backend);
                    } else {
                        out.push_str(quoted);
                    }
                }
                other => out.push_str(other.as_str()),
            }
        }
        out
    }

    /// Indices of result columns whose values carry schema names
    /// (case-insensitive match against the schema-column set).
    pub fn schema_column_targets<S: AsRef<str>>(&self, columns: &[S]) -> Vec<usize> {
        columns
            .iter()
            .enumerate()
            .filter(|(_, name)| {
                SCHEMA_COLUMNS.iter().any(|c| c.eq_ignore_ascii_case(name.as_ref()))
            })
            .map(|(i, _)| i)
            .collect()
    }

    /// Rewrite backend schema values to the client schema in one row, at
    /// the precomputed target indices.
    pub fn translate_row(&self, row: &mut [Value], targets: &[usize]) {
        if targets.is_empty() {
            return;
        }
        let m = self.mapping();
        for &i in targets {
            if let Some(Value::Text(v)) = row.get(i) {
                if v.eq_ignore_ascii_case(&m.backend) {
                    row[i] = Value::Text(m.client.clone());
                }
            }
        }
    }

    /// Rewrite backend schema values to the client schema, in columns
    /// whose name matches the schema-column set (case-insensitive).
    pub fn translate_output(&self, rows: &mut [Vec<Value>], columns: &[String]) {
        let targets = self.schema_column_targets(columns);
        for row in rows {
            self.translate_row(row, &targets);
        }
    }
}

/// Replace bare `client.` qualifiers inside one code segment.
fn rewrite_qualifiers(code: &str, m: &SchemaMapping, out: &mut String) {
    let bytes = code.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        let prev_is_word = i > 0 && (scan::is_ident_char(bytes[i - 1]) || bytes[i - 1] == b'.');

        if scan::is_ident_start(bytes[i]) && !prev_is_word {
            let start = i;
            i += 1;
            while i < bytes.len() && scan::is_ident_char(bytes[i]) {
                i += 1;
            }
            let word = &code[start..i];
            let qualifies = word.eq_ignore_ascii_case(&m.client)
                && bytes.get(i) == Some(&b'.')
                && !word.starts_with('%');
            if qualifies {
                out.push_str(&m.backend);
            } else {
                out.push_str(word);
            }
            continue;
        }
        let start = i;
        i += 1;
        while i < bytes.len() && !scan::is_ident_start(bytes[i]) {
            i += 1;
        }
        // the run may end mid-identifier (digit prefix); let the next pass
        // sort it out via prev_is_word
        out.push_str(&code[start..i]);
    }
}

/// Whether the SQL emitted so far puts the next literal in a comparison
/// position: after `=`, `(`, `,` or `IN`.
fn in_comparison(out: &str) -> bool {
    let trimmed = out.trim_end();
    trimmed.ends_with('=')
        || trimmed.ends_with('(')
        || trimmed.ends_with(',')
        || trimmed.to_ascii_uppercase().ends_with(" IN")
}

#[cfg(test)]
mod test {
    use super::*;

    fn mapper() -> SchemaMapper {
        SchemaMapper::default()
    }

    #[test]
    fn qualified_name_translated() {
        assert_eq!(
            mapper().translate_input("SELECT * FROM public.users"),
            "SELECT * FROM SQLUser.users",
        );
    }

    #[test]
    fn comparison_literal_translated() {
        let sql = "SELECT * FROM information_schema.tables WHERE table_schema = 'public'";
        let out = mapper().translate_input(sql);
        assert!(out.contains("table_schema = 'SQLUser'"));
        assert!(!out.contains("'public'"));
        // information_schema itself is untouched
        assert!(out.contains("information_schema.tables"));
    }

    #[test]
    fn case_insensitive_literal() {
        assert!(mapper().translate_input("WHERE table_schema = 'PUBLIC'").contains("'SQLUser'"));
        assert!(mapper().translate_input("WHERE table_schema = 'Public'").contains("'SQLUser'"));
    }

    #[test]
    fn backend_schema_not_double_mapped() {
        let out = mapper().translate_input("WHERE table_schema = 'SQLUser'");
        assert_eq!(out.matches("SQLUser").count(), 1);
    }

    #[test]
    fn system_schema_untouched() {
        let out = mapper().translate_input("WHERE table_schema = '%SYS'");
        assert!(out.contains("'%SYS'"));
    }

    #[test]
    fn literal_prose_untouched() {
        let out = mapper().translate_input("SELECT 'This is public data' AS label");
        assert!(out.contains("'This is public data'"));
    }

    #[test]
    fn multiple_references() {
        let out = mapper().translate_input(
            "SELECT 1 FROM public.tables t JOIN public.columns c ON t.id = c.id",
        );
        assert!(out.contains("SQLUser.tables"));
        assert!(out.contains("SQLUser.columns"));
        assert!(!out.contains("public."));
    }

    #[test]
    fn double_quoted_qualifier() {
        let out = mapper().translate_input("SELECT * FROM \"public\".users");
        assert!(out.contains("SQLUser"));
        assert!(!out.contains("\"public\""));
    }

    #[test]
    fn in_list_literals() {
        let out = mapper().translate_input("WHERE table_schema IN ('public', 'other')");
        assert!(out.contains("'SQLUser'"));
        assert!(out.contains("'other'"));
    }

    #[test]
    fn idempotent() {
        let m = mapper();
        let once = m.translate_input("SELECT * FROM public.users WHERE s = 'public'");
        assert_eq!(m.translate_input(&once), once);
    }

    #[test]
    fn output_schema_columns() {
        let m = mapper();
        let mut rows = vec![
            vec![Value::Text("SQLUser".into()), Value::Text("users".into())],
            vec![Value::Text("%SYS".into()), Value::Text("Config".into())],
        ];
        let cols = vec!["table_schema".to_string(), "table_name".to_string()];
        m.translate_output(&mut rows, &cols);
        assert_eq!(rows[0][0], Value::Text("public".into()));
        assert_eq!(rows[0][1], Value::Text("users".into()));
        assert_eq!(rows[1][0], Value::Text("%SYS".into()));
    }

    #[test]
    fn output_non_schema_column_untouched() {
        let m = mapper();
        let mut rows = vec![vec![Value::Text("SQLUser".into())]];
        let cols = vec!["some_column".to_string()];
        m.translate_output(&mut rows, &cols);
        assert_eq!(rows[0][0], Value::Text("SQLUser".into()));
    }

    #[test]
    fn output_case_insensitive_matching() {
        let m = mapper();
        let mut rows = vec![vec![Value::Text("SQLUSER".into()), Value::Int4(1)]];
        let cols = vec!["TABLE_SCHEMA".to_string(), "oid".to_string()];
        m.translate_output(&mut rows, &cols);
        assert_eq!(rows[0][0], Value::Text("public".into()));
        assert_eq!(rows[0][1], Value::Int4(1));
    }

    #[test]
    fn reconfigure_swaps_pair() {
        let m = mapper();
        m.reconfigure(SchemaMapping { client: "app".into(), backend: "AppSchema".into() });
        assert_eq!(
            m.translate_input("SELECT * FROM app.users"),
            "SELECT * FROM AppSchema.users",
        );
    }
}
