//! The SQL translation pipeline.
//!
//! Every statement a client sends passes through the same fixed rewrite
//! order, so later stages always see stable tokens:
//!
//! 1. transaction verbs (`BEGIN` → `START TRANSACTION`)
//! 2. schema mapping (`public` → backend schema)
//! 3. identifier case normalization
//! 4. date literal lifting
//! 5. dialect constructs (`LIMIT`→`TOP`, `::cast`, `nextval`)
//! 6. pgvector operator rewriting, then validation
//!
//! Parameter-bound vectors are spliced separately at bind time through
//! [`bind_parameters`], because only then are the values known.
use std::{sync::Arc, time::Instant};

pub mod scan;

mod dates;
mod dialect;
mod identifier;
mod params;
mod schema;
mod transaction;
pub mod vector;

pub use params::PlaceholderMap;
pub use schema::{SchemaMapper, SchemaMapping};
pub use transaction::TxVerb;
pub use vector::{BoundParam, TranslationError};

use crate::Result;

/// Per-statement translation metrics, reported through tracing and used
/// to police the translation latency budget.
#[derive(Debug, Clone, Default)]
pub struct TranslateMetrics {
    pub elapsed_ms: f64,
    pub identifier_count: usize,
    pub date_literal_count: usize,
    pub vector_rewrites: usize,
    pub sla_violated: bool,
}

/// A fully translated statement ready to prepare or execute.
#[derive(Debug, Clone)]
pub struct Translated {
    pub sql: String,
    pub verb: TxVerb,
    pub metrics: TranslateMetrics,
}

/// Translation latency budget in milliseconds; vector payloads get the
/// larger allowance.
const SLA_MS: f64 = 5.0;
const SLA_VECTOR_MS: f64 = 10.0;

/// The statement translator. One per process, shared by every session.
#[derive(Debug)]
pub struct SqlTranslator {
    schema: Arc<SchemaMapper>,
    oids: Arc<crate::catalog::OidGenerator>,
    negate_inner_product: bool,
}

impl SqlTranslator {
    pub fn new(
        schema: Arc<SchemaMapper>,
        oids: Arc<crate::catalog::OidGenerator>,
        negate_inner_product: bool,
    ) -> Self {
        Self { schema, oids, negate_inner_product }
    }

    pub fn schema(&self) -> &SchemaMapper {
        &self.schema
    }

    /// Translate one statement's text. Fails only when the vector rewrite
    /// produced SQL the validator rejects; the statement then never
    /// reaches the backend.
    pub fn translate(&self, sql: &str) -> Result<Translated> {
        let started = Instant::now();

        let (sql, verb) = transaction::translate(sql);
        let sql = self.schema.translate_input(&sql);
        let backend_schema = self.schema.mapping().backend.clone();
        let (sql, identifier_count) = identifier::normalize(&sql, &[&backend_schema]);
        let (sql, date_literal_count) = dates::lift(&sql);
        // regclass casts resolve to deterministic oids before the dialect
        // pass erases the cast syntax
        let sql = if sql.to_ascii_lowercase().contains("regclass") {
            crate::catalog::CatalogRouter::resolve_regclass(&sql, &self.oids, &backend_schema)
        } else {
            sql
        };
        let sql = dialect::rewrite(&sql);
        let (sql, vector_rewrites) = vector::rewrite_operators(&sql, self.negate_inner_product);

        if vector_rewrites > 0 {
            vector::validate(&sql)?;
        }

        let elapsed_ms = started.elapsed().as_secs_f64() * 1e3;
        let budget = if vector_rewrites > 0 { SLA_VECTOR_MS } else { SLA_MS };
        let sla_violated = elapsed_ms > budget;
        if sla_violated {
            tracing::warn!(elapsed_ms, budget, "statement translation exceeded budget");
        }
        tracing::debug!(
            elapsed_ms,
            identifier_count,
            date_literal_count,
            vector_rewrites,
            "translated statement",
        );

        Ok(Translated {
            sql,
            verb,
            metrics: TranslateMetrics {
                elapsed_ms,
                identifier_count,
                date_literal_count,
                vector_rewrites,
                sla_violated,
            },
        })
    }

    /// Splice vector-valued parameters into a translated statement and
    /// convert the remaining placeholders to the backend's positional
    /// form. Returns the final SQL and the parameter values to forward,
    /// in backend order.
    pub fn bind_parameters(
        &self,
        sql: &str,
        params: Vec<BoundParam>,
    ) -> Result<(String, Vec<BoundParam>)> {
        let (sql, kept) = vector::splice_params(sql, &params);
        if kept.len() != params.len() {
            // a vector went inline; re-check the final text
            vector::validate(&sql)
                .map_err(|e| crate::Error::from(e).context("vector parameter splice"))?;
        }

        let map = params::convert(&sql);
        let mut out = Vec::with_capacity(map.order.len());
        for &orig in &map.order {
            let Some(&idx) = kept.get(orig) else {
                return Err(TranslationError::new(format!(
                    "statement references parameter ${} but only {} remain after binding",
                    orig + 1,
                    kept.len(),
                ))
                .into());
            };
            out.push(params[idx].clone());
        }
        Ok((map.sql, out))
    }

    /// Number of parameters a statement expects, inferred from its
    /// placeholders: the highest `$n`, or the count of `?` markers on the
    /// pure-positional surface.
    pub fn parameter_count(sql: &str) -> usize {
        let map = params::convert(sql);
        if map.param_count > 0 {
            map.param_count
        } else {
            count_positional(sql)
        }
    }
}

fn count_positional(sql: &str) -> usize {
    scan::segments(sql)
        .iter()
        .filter(|s| s.is_code())
        .map(|s| s.as_str().bytes().filter(|b| *b == b'?').count())
        .sum()
}

#[cfg(test)]
mod test {
    use super::*;

    fn translator() -> SqlTranslator {
        SqlTranslator::new(
            Arc::new(SchemaMapper::default()),
            Arc::new(crate::catalog::OidGenerator::new()),
            false,
        )
    }

    #[test]
    fn full_vector_pipeline() {
        let t = translator();
        let out = t
            .translate("SELECT id FROM vecs ORDER BY embedding <=> '[0.1,0.2,0.3]' LIMIT 5")
            .unwrap();
        assert_eq!(
            out.sql,
            "SELECT TOP 5 ID FROM VECS ORDER BY \
             VECTOR_COSINE(EMBEDDING, TO_VECTOR('[0.1,0.2,0.3]', FLOAT))",
        );
    }

    #[test]
    fn schema_and_identifier_order() {
        let t = translator();
        // the mapped schema name keeps the backend's spelling while the
        // table part is normalized
        let out = t.translate("SELECT name FROM public.users").unwrap();
        assert_eq!(out.sql, "SELECT NAME FROM SQLUser.USERS");
    }

    #[test]
    fn begin_sets_verb() {
        let t = translator();
        let out = t.translate("BEGIN").unwrap();
        assert_eq!(out.sql, "START TRANSACTION");
        assert_eq!(out.verb, TxVerb::Begin);
    }

    #[test]
    fn plain_statement_untouched_except_case() {
        let t = translator();
        let out = t.translate("SELECT 1").unwrap();
        assert_eq!(out.sql, "SELECT 1");
        assert_eq!(out.metrics.vector_rewrites, 0);
    }

    #[test]
    fn bind_splices_vector_and_reorders() {
        let t = translator();
        let translated = t
            .translate("SELECT id FROM vecs ORDER BY embedding <=> $1 LIMIT $2")
            .unwrap();
        assert!(translated.sql.contains("TO_VECTOR($1, FLOAT)"));

        let params = vec![
            BoundParam::Text("[0.1,0.2]".into()),
            BoundParam::Text("5".into()),
        ];
        let (sql, forwarded) = t.bind_parameters(&translated.sql, params).unwrap();
        assert!(sql.contains("TO_VECTOR('[0.1,0.2]', FLOAT)"));
        assert!(sql.contains("TOP ?"));
        assert_eq!(forwarded, vec![BoundParam::Text("5".into())]);
    }

    #[test]
    fn bind_without_vectors_is_identity_modulo_placeholders() {
        let t = translator();
        let params = vec![BoundParam::Text("7".into())];
        let (sql, forwarded) = t
            .bind_parameters("SELECT * FROM T WHERE ID = $1", params.clone())
            .unwrap();
        assert_eq!(sql, "SELECT * FROM T WHERE ID = ?");
        assert_eq!(forwarded, params);
    }

    #[test]
    fn date_literal_counted() {
        let t = translator();
        let out = t.translate("SELECT * FROM t WHERE d = '2024-01-15'").unwrap();
        assert!(out.sql.contains("TO_DATE('2024-01-15', 'YYYY-MM-DD')"));
        assert_eq!(out.metrics.date_literal_count, 1);
    }
}
