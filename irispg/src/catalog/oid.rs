//! Deterministic OID generation.
//!
//! ORMs cache introspection results keyed by OID, so the same object must
//! map to the same OID on every instance of the server, forever. OIDs are
//! therefore a pure function of `(namespace, object type, name)` with a
//! small per-process memo.
use std::{
    collections::HashMap,
    sync::Mutex,
};

use crate::types::Oid;

/// `pg_catalog` namespace oid, fixed upstream.
pub const PG_CATALOG: Oid = 11;
/// `public` namespace oid, fixed upstream.
pub const PUBLIC: Oid = 2200;
/// `information_schema` namespace oid, fixed upstream.
pub const INFORMATION_SCHEMA: Oid = 11323;
/// First oid available for user objects.
pub const FIRST_USER_OID: Oid = 16384;

/// Object kinds that take part in oid derivation. The discriminant string
/// is part of the hash input and must never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectType {
    Table,
    Column,
    Index,
    Constraint,
    Default,
    Namespace,
}

impl ObjectType {
    fn tag(self) -> &'static str {
        match self {
            ObjectType::Table => "table",
            ObjectType::Column => "column",
            ObjectType::Index => "index",
            ObjectType::Constraint => "constraint",
            ObjectType::Default => "default",
            ObjectType::Namespace => "namespace",
        }
    }
}

/// FNV-1a, 32-bit. Stable by construction; never replace it.
fn stable_hash32(input: &str) -> u32 {
    let mut hash: u32 = 0x811c9dc5;
    for b in input.bytes() {
        hash ^= b as u32;
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash
}

/// The process-wide oid generator with a lookup memo.
#[derive(Debug, Default)]
pub struct OidGenerator {
    cache: Mutex<HashMap<String, Oid>>,
}

impl OidGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// The oid of `(namespace, type, name)`; identical inputs yield
    /// identical oids on any instance.
    pub fn generate(&self, namespace: &str, object_type: ObjectType, name: &str) -> Oid {
        let key = format!(
            "{}:{}:{}",
            namespace.to_lowercase(),
            object_type.tag(),
            name.to_lowercase(),
        );
        let mut cache = self.cache.lock().unwrap();
        if let Some(oid) = cache.get(&key) {
            return *oid;
        }
        let oid = stable_hash32(&key).max(FIRST_USER_OID);
        cache.insert(key, oid);
        oid
    }

    /// Oid of a fixed or user namespace.
    pub fn namespace_oid(&self, name: &str) -> Oid {
        match name.to_lowercase().as_str() {
            "pg_catalog" => PG_CATALOG,
            "public" => PUBLIC,
            "information_schema" => INFORMATION_SCHEMA,
            // the backend user schema is what clients see as public
            "sqluser" => PUBLIC,
            other => self.generate(other, ObjectType::Namespace, other),
        }
    }

    pub fn get_table_oid(&self, namespace: &str, table: &str) -> Oid {
        self.generate(namespace, ObjectType::Table, table)
    }

    /// Column oids derive from the `table.column` pair.
    pub fn get_column_oid(&self, namespace: &str, table: &str, column: &str) -> Oid {
        self.generate(namespace, ObjectType::Column, &format!("{table}.{column}"))
    }

    pub fn get_constraint_oid(&self, namespace: &str, constraint: &str) -> Oid {
        self.generate(namespace, ObjectType::Constraint, constraint)
    }

    pub fn get_index_oid(&self, namespace: &str, index: &str) -> Oid {
        self.generate(namespace, ObjectType::Index, index)
    }

    pub fn get_default_oid(&self, namespace: &str, table: &str, column: &str) -> Oid {
        self.generate(namespace, ObjectType::Default, &format!("{table}.{column}"))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn fixed_namespace_oids() {
        let g = OidGenerator::new();
        assert_eq!(g.namespace_oid("pg_catalog"), 11);
        assert_eq!(g.namespace_oid("public"), 2200);
        assert_eq!(g.namespace_oid("information_schema"), 11323);
        assert_eq!(g.namespace_oid("SQLUser"), 2200);
    }

    #[test]
    fn user_oids_start_at_16384() {
        let g = OidGenerator::new();
        assert!(g.get_table_oid("SQLUser", "users") >= FIRST_USER_OID);
        assert!(g.get_column_oid("SQLUser", "users", "id") >= FIRST_USER_OID);
    }

    #[test]
    fn case_insensitive() {
        let g = OidGenerator::new();
        assert_eq!(
            g.get_table_oid("SQLUser", "Users"),
            g.get_table_oid("sqluser", "USERS"),
        );
    }

    #[test]
    fn stable_across_instances() {
        let a = OidGenerator::new();
        let b = OidGenerator::new();
        assert_eq!(
            a.get_table_oid("SQLUser", "users"),
            b.get_table_oid("SQLUser", "users"),
        );
        assert_eq!(
            a.get_constraint_oid("SQLUser", "users_pkey"),
            b.get_constraint_oid("SQLUser", "users_pkey"),
        );
    }

    #[test]
    fn distinct_objects_distinct_oids() {
        let g = OidGenerator::new();
        let t = g.get_table_oid("SQLUser", "users");
        let i = g.get_index_oid("SQLUser", "users");
        let c = g.get_column_oid("SQLUser", "users", "id");
        assert_ne!(t, i);
        assert_ne!(t, c);
    }
}
