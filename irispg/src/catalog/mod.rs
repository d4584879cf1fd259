//! PostgreSQL system catalog emulation.
//!
//! ORMs introspect schemas through `pg_catalog` and `information_schema`.
//! The backend has the latter but not the former, so pg_catalog tables are
//! materialized in memory from backend metadata, with deterministic OIDs.
use std::{
    num::NonZeroUsize,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use lru::LruCache;

use crate::{Result, executor::Handle};

pub mod functions;
pub mod oid;
pub mod rows;

mod eval;
mod introspect;
mod router;

pub use oid::{ObjectType, OidGenerator};
pub use router::{CatalogRouter, RoutePlan};

use rows::{PgAttrdef, PgAttribute, PgClass, PgConstraint, PgIndex, PgNamespace};

/// Unresolved regclass, unknown OID, or a catalog query the emulator
/// cannot satisfy.
pub struct CatalogError {
    message: String,
}

impl CatalogError {
    pub(crate) fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

impl std::error::Error for CatalogError { }

impl std::fmt::Display for CatalogError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "catalog error: {}", self.message)
    }
}

impl std::fmt::Debug for CatalogError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "\"{self}\"")
    }
}

/// Everything known about one backend namespace, materialized at a point
/// in time. Immutable once built; invalidation replaces the whole thing.
#[derive(Debug, Default)]
pub struct Snapshot {
    pub namespace: String,
    pub namespaces: Vec<PgNamespace>,
    pub classes: Vec<PgClass>,
    pub attributes: Vec<PgAttribute>,
    pub attrdefs: Vec<PgAttrdef>,
    pub indexes: Vec<PgIndex>,
    pub constraints: Vec<PgConstraint>,
}

impl Snapshot {
    pub fn class_by_oid(&self, oid: i64) -> Option<&PgClass> {
        self.classes.iter().find(|c| c.oid as i64 == oid)
    }

    pub fn class_by_name(&self, name: &str) -> Option<&PgClass> {
        self.classes.iter().find(|c| c.relname.eq_ignore_ascii_case(name))
    }

    pub fn attributes_of(&self, table_oid: i64) -> Vec<&PgAttribute> {
        let mut atts: Vec<&PgAttribute> = self
            .attributes
            .iter()
            .filter(|a| a.attrelid as i64 == table_oid)
            .collect();
        atts.sort_by_key(|a| a.attnum);
        atts
    }

    pub fn constraint_by_oid(&self, oid: i64) -> Option<&PgConstraint> {
        self.constraints.iter().find(|c| c.oid as i64 == oid)
    }

    pub fn index_by_relid(&self, indexrelid: i64) -> Option<&PgIndex> {
        self.indexes.iter().find(|i| i.indexrelid as i64 == indexrelid)
    }

    pub fn attrdef_for(&self, table_oid: i64, attnum: i16) -> Option<&PgAttrdef> {
        self.attrdefs
            .iter()
            .find(|d| d.adrelid as i64 == table_oid && d.adnum == attnum)
    }
}

const CACHE_NAMESPACES: usize = 16;

/// The process-wide catalog emulator: OID generator plus a TTL'd cache of
/// per-namespace snapshots.
pub struct Catalog {
    generator: Arc<OidGenerator>,
    cache: Mutex<LruCache<String, (Instant, Arc<Snapshot>)>>,
    ttl: Duration,
}

impl Catalog {
    pub fn new(ttl: Duration) -> Self {
        Self {
            generator: Arc::new(OidGenerator::new()),
            cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(CACHE_NAMESPACES).unwrap(),
            )),
            ttl,
        }
    }

    pub fn generator(&self) -> &Arc<OidGenerator> {
        &self.generator
    }

    /// The snapshot for `namespace`, loading through `handle` on a miss
    /// or after the TTL lapsed.
    pub async fn snapshot(&self, handle: &mut Handle, namespace: &str) -> Result<Arc<Snapshot>> {
        let key = namespace.to_lowercase();
        if let Some((loaded, snap)) = self.cache.lock().unwrap().get(&key) {
            if loaded.elapsed() < self.ttl {
                return Ok(snap.clone());
            }
        }

        let snap = Arc::new(introspect::load(handle, &self.generator, namespace).await?);
        self.cache
            .lock()
            .unwrap()
            .put(key, (Instant::now(), snap.clone()));
        tracing::debug!(
            namespace,
            tables = snap.classes.iter().filter(|c| c.relkind == 'r').count(),
            "catalog snapshot refreshed",
        );
        Ok(snap)
    }

    /// Drop the cached snapshot after a schema change report.
    pub fn invalidate(&self, namespace: &str) {
        self.cache.lock().unwrap().pop(&namespace.to_lowercase());
    }
}

impl std::fmt::Debug for Catalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Catalog").field("ttl", &self.ttl).finish()
    }
}
