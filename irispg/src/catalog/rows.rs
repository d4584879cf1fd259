//! System catalog row records and their factories.
//!
//! Rows are immutable value records carrying the PostgreSQL-documented
//! columns. Only the subset ORMs actually read is derived from backend
//! metadata; the rest hold the documented defaults.
use crate::types::{Oid, Value, oid_of_iris_type};

use super::oid::{OidGenerator, PUBLIC};

/// A `pg_namespace` row.
#[derive(Debug, Clone, PartialEq)]
pub struct PgNamespace {
    pub oid: Oid,
    pub nspname: String,
    pub nspowner: Oid,
}

impl PgNamespace {
    pub const COLUMNS: &'static [&'static str] = &["oid", "nspname", "nspowner", "nspacl"];

    /// The three namespaces every client expects to see.
    pub fn builtin() -> Vec<PgNamespace> {
        vec![
            PgNamespace { oid: super::oid::PG_CATALOG, nspname: "pg_catalog".into(), nspowner: 10 },
            PgNamespace { oid: PUBLIC, nspname: "public".into(), nspowner: 10 },
            PgNamespace {
                oid: super::oid::INFORMATION_SCHEMA,
                nspname: "information_schema".into(),
                nspowner: 10,
            },
        ]
    }

    pub fn to_row(&self) -> Vec<Value> {
        vec![
            Value::Int8(self.oid as i64),
            Value::Text(self.nspname.clone()),
            Value::Int8(self.nspowner as i64),
            Value::Null,
        ]
    }
}

/// A `pg_class` row.
#[derive(Debug, Clone, PartialEq)]
pub struct PgClass {
    pub oid: Oid,
    pub relname: String,
    pub relnamespace: Oid,
    pub relowner: Oid,
    /// Access method: 403 (btree) for indexes, 2 (heap) for tables.
    pub relam: Oid,
    pub relpages: i32,
    pub reltuples: f32,
    pub relhasindex: bool,
    /// `p` permanent.
    pub relpersistence: char,
    /// `r` table, `v` view, `i` index.
    pub relkind: char,
    pub relnatts: i16,
    pub relchecks: i16,
    pub relhasrules: bool,
    pub relhastriggers: bool,
    pub relrowsecurity: bool,
    pub relispartition: bool,
}

impl PgClass {
    pub const COLUMNS: &'static [&'static str] = &[
        "oid", "relname", "relnamespace", "reltype", "reloftype", "relowner", "relam",
        "relfilenode", "reltablespace", "relpages", "reltuples", "relallvisible",
        "reltoastrelid", "relhasindex", "relisshared", "relpersistence", "relkind",
        "relnatts", "relchecks", "relhasrules", "relhastriggers", "relhassubclass",
        "relrowsecurity", "relforcerowsecurity", "relispopulated", "relreplident",
        "relispartition", "relrewrite", "relfrozenxid", "relminmxid", "relacl",
        "reloptions",
    ];

    /// Build from the backend's INFORMATION_SCHEMA.TABLES notion of a
    /// table: `table_type` is `BASE TABLE` or `VIEW`.
    pub fn from_iris_table(
        oid_gen: &OidGenerator,
        schema: &str,
        table_name: &str,
        table_type: &str,
    ) -> PgClass {
        let relkind = if table_type.eq_ignore_ascii_case("VIEW") { 'v' } else { 'r' };
        PgClass {
            oid: oid_gen.get_table_oid(schema, table_name),
            relname: table_name.to_lowercase(),
            relnamespace: oid_gen.namespace_oid(schema),
            relowner: 10,
            relam: if relkind == 'r' { 2 } else { 0 },
            relpages: 1,
            reltuples: -1.0,
            relhasindex: false,
            relpersistence: 'p',
            relkind,
            relnatts: 0,
            relchecks: 0,
            relhasrules: false,
            relhastriggers: false,
            relrowsecurity: false,
            relispartition: false,
        }
    }

    /// The pg_class entry an index carries alongside its pg_index row;
    /// `oid` here equals `pg_index.indexrelid`.
    pub fn index_entry(
        oid_gen: &OidGenerator,
        schema: &str,
        index_name: &str,
        num_columns: i16,
    ) -> PgClass {
        PgClass {
            oid: oid_gen.get_index_oid(schema, index_name),
            relname: index_name.to_lowercase(),
            relnamespace: oid_gen.namespace_oid(schema),
            relowner: 10,
            relam: 403, // btree
            relpages: 1,
            reltuples: -1.0,
            relhasindex: false,
            relpersistence: 'p',
            relkind: 'i',
            relnatts: num_columns,
            relchecks: 0,
            relhasrules: false,
            relhastriggers: false,
            relrowsecurity: false,
            relispartition: false,
        }
    }

    pub fn to_row(&self) -> Vec<Value> {
        vec![
            Value::Int8(self.oid as i64),
            Value::Text(self.relname.clone()),
            Value::Int8(self.relnamespace as i64),
            Value::Int4(0),                       // reltype
            Value::Int4(0),                       // reloftype
            Value::Int8(self.relowner as i64),
            Value::Int8(self.relam as i64),
            Value::Int8(self.oid as i64),         // relfilenode
            Value::Int4(0),                       // reltablespace
            Value::Int4(self.relpages),
            Value::Float4(self.reltuples),
            Value::Int4(0),                       // relallvisible
            Value::Int4(0),                       // reltoastrelid
            Value::Bool(self.relhasindex),
            Value::Bool(false),                   // relisshared
            Value::Text(self.relpersistence.to_string()),
            Value::Text(self.relkind.to_string()),
            Value::Int2(self.relnatts),
            Value::Int2(self.relchecks),
            Value::Bool(self.relhasrules),
            Value::Bool(self.relhastriggers),
            Value::Bool(false),                   // relhassubclass
            Value::Bool(self.relrowsecurity),
            Value::Bool(false),                   // relforcerowsecurity
            Value::Bool(true),                    // relispopulated
            Value::Text("d".into()),              // relreplident
            Value::Bool(self.relispartition),
            Value::Int4(0),                       // relrewrite
            Value::Int4(0),                       // relfrozenxid
            Value::Int4(0),                       // relminmxid
            Value::Null,                          // relacl
            Value::Null,                          // reloptions
        ]
    }
}

/// A `pg_attribute` row.
#[derive(Debug, Clone, PartialEq)]
pub struct PgAttribute {
    pub attrelid: Oid,
    pub attname: String,
    pub atttypid: Oid,
    pub attlen: i16,
    /// 1-based column position.
    pub attnum: i16,
    pub atttypmod: i32,
    pub attnotnull: bool,
    pub atthasdef: bool,
    pub attisdropped: bool,
    pub attidentity: char,
}

impl PgAttribute {
    pub const COLUMNS: &'static [&'static str] = &[
        "attrelid", "attname", "atttypid", "attstattarget", "attlen", "attnum",
        "attndims", "attcacheoff", "atttypmod", "attbyval", "attalign", "attstorage",
        "attcompression", "attnotnull", "atthasdef", "atthasmissing", "attidentity",
        "attgenerated", "attisdropped", "attislocal", "attinhcount", "attcollation",
        "attacl", "attoptions", "attfdwoptions", "attmissingval",
    ];

    /// Build from one INFORMATION_SCHEMA.COLUMNS row.
    #[allow(clippy::too_many_arguments)]
    pub fn from_iris_column(
        oid_gen: &OidGenerator,
        schema: &str,
        table: &str,
        column: &str,
        position: i16,
        data_type: &str,
        max_length: Option<i32>,
        nullable: bool,
        has_default: bool,
        is_identity: bool,
    ) -> PgAttribute {
        let atttypid = oid_of_iris_type(data_type);
        let atttypmod = match (atttypid, max_length) {
            // varlena headers count toward the stored typmod
            (t, Some(n)) if t == crate::types::oid::VARCHAR || t == crate::types::oid::BPCHAR => {
                n + 4
            }
            _ => -1,
        };
        PgAttribute {
            attrelid: oid_gen.get_table_oid(schema, table),
            attname: column.to_lowercase(),
            atttypid,
            attlen: crate::types::type_size(atttypid),
            attnum: position,
            atttypmod,
            attnotnull: !nullable,
            atthasdef: has_default,
            attisdropped: false,
            attidentity: if is_identity { 'd' } else { '\0' },
        }
    }

    pub fn to_row(&self) -> Vec<Value> {
        vec![
            Value::Int8(self.attrelid as i64),
            Value::Text(self.attname.clone()),
            Value::Int8(self.atttypid as i64),
            Value::Int4(-1),                      // attstattarget
            Value::Int2(self.attlen),
            Value::Int2(self.attnum),
            Value::Int4(0),                       // attndims
            Value::Int4(-1),                      // attcacheoff
            Value::Int4(self.atttypmod),
            Value::Bool(self.attlen > 0 && self.attlen <= 8),
            Value::Text("i".into()),              // attalign
            Value::Text(if self.attlen < 0 { "x" } else { "p" }.into()),
            Value::Null,                          // attcompression
            Value::Bool(self.attnotnull),
            Value::Bool(self.atthasdef),
            Value::Bool(false),                   // atthasmissing
            Value::Text(if self.attidentity == '\0' {
                String::new()
            } else {
                self.attidentity.to_string()
            }),
            Value::Text(String::new()),           // attgenerated
            Value::Bool(self.attisdropped),
            Value::Bool(true),                    // attislocal
            Value::Int2(0),                       // attinhcount
            Value::Int4(0),                       // attcollation
            Value::Null,                          // attacl
            Value::Null,                          // attoptions
            Value::Null,                          // attfdwoptions
            Value::Null,                          // attmissingval
        ]
    }
}

/// A `pg_attrdef` row: one column default expression.
#[derive(Debug, Clone, PartialEq)]
pub struct PgAttrdef {
    pub oid: Oid,
    pub adrelid: Oid,
    pub adnum: i16,
    /// The default expression in PostgreSQL's textual rendering.
    pub adbin: String,
}

impl PgAttrdef {
    pub const COLUMNS: &'static [&'static str] = &["oid", "adrelid", "adnum", "adbin"];

    /// Build from a backend column default. IRIS reports auto-increment
    /// with a `$IDENTITY`-style marker; clients expect the `nextval` form.
    pub fn from_iris_default(
        oid_gen: &OidGenerator,
        schema: &str,
        table: &str,
        column: &str,
        position: i16,
        default_value: &str,
    ) -> PgAttrdef {
        let identity = default_value.contains("$IDENTITY")
            || default_value.eq_ignore_ascii_case("AUTO_INCREMENT");
        let adbin = if identity {
            format!(
                "nextval('{}_{}_seq'::regclass)",
                table.to_lowercase(),
                column.to_lowercase(),
            )
        } else {
            default_value.to_string()
        };
        PgAttrdef {
            oid: oid_gen.get_default_oid(schema, table, column),
            adrelid: oid_gen.get_table_oid(schema, table),
            adnum: position,
            adbin,
        }
    }

    pub fn to_row(&self) -> Vec<Value> {
        vec![
            Value::Int8(self.oid as i64),
            Value::Int8(self.adrelid as i64),
            Value::Int2(self.adnum),
            Value::Text(self.adbin.clone()),
        ]
    }
}

/// A `pg_index` row.
#[derive(Debug, Clone, PartialEq)]
pub struct PgIndex {
    /// Equals the index's own pg_class oid.
    pub indexrelid: Oid,
    /// The indexed table's pg_class oid.
    pub indrelid: Oid,
    pub indnatts: i16,
    pub indisunique: bool,
    pub indisprimary: bool,
    /// 1-based column positions, 0 for an expression column.
    pub indkey: Vec<i16>,
}

impl PgIndex {
    pub const COLUMNS: &'static [&'static str] = &[
        "indexrelid", "indrelid", "indnatts", "indnkeyatts", "indisunique",
        "indisprimary", "indisexclusion", "indimmediate", "indisclustered",
        "indisvalid", "indcheckxmin", "indisready", "indislive", "indisreplident",
        "indkey", "indcollation", "indclass", "indoption", "indexprs", "indpred",
    ];

    pub fn from_iris_index(
        oid_gen: &OidGenerator,
        schema: &str,
        table: &str,
        index_name: &str,
        column_positions: Vec<i16>,
        unique: bool,
        primary: bool,
    ) -> PgIndex {
        PgIndex {
            indexrelid: oid_gen.get_index_oid(schema, index_name),
            indrelid: oid_gen.get_table_oid(schema, table),
            indnatts: column_positions.len() as i16,
            indisunique: unique || primary,
            indisprimary: primary,
            indkey: column_positions,
        }
    }

    pub fn to_row(&self) -> Vec<Value> {
        let indkey = self
            .indkey
            .iter()
            .map(|k| k.to_string())
            .collect::<Vec<_>>()
            .join(" ");
        vec![
            Value::Int8(self.indexrelid as i64),
            Value::Int8(self.indrelid as i64),
            Value::Int2(self.indnatts),
            Value::Int2(self.indnatts),           // indnkeyatts
            Value::Bool(self.indisunique),
            Value::Bool(self.indisprimary),
            Value::Bool(false),                   // indisexclusion
            Value::Bool(true),                    // indimmediate
            Value::Bool(false),                   // indisclustered
            Value::Bool(true),                    // indisvalid
            Value::Bool(false),                   // indcheckxmin
            Value::Bool(true),                    // indisready
            Value::Bool(true),                    // indislive
            Value::Bool(false),                   // indisreplident
            Value::Text(indkey),                  // int2vector renders space separated
            Value::Null,                          // indcollation
            Value::Null,                          // indclass
            Value::Null,                          // indoption
            Value::Null,                          // indexprs
            Value::Null,                          // indpred
        ]
    }
}

/// A `pg_constraint` row.
#[derive(Debug, Clone, PartialEq)]
pub struct PgConstraint {
    pub oid: Oid,
    pub conname: String,
    pub connamespace: Oid,
    /// `p` primary key, `f` foreign key, `u` unique, `c` check.
    pub contype: char,
    pub conrelid: Oid,
    /// Index backing the constraint, when any.
    pub conindid: Oid,
    /// Referenced table for foreign keys, zero otherwise.
    pub confrelid: Oid,
    /// Constrained column positions.
    pub conkey: Vec<i16>,
    /// Referenced column positions for foreign keys.
    pub confkey: Vec<i16>,
    /// FK match/update/delete action characters; `a` is NO ACTION.
    pub confupdtype: char,
    pub confdeltype: char,
}

impl PgConstraint {
    pub const COLUMNS: &'static [&'static str] = &[
        "oid", "conname", "connamespace", "contype", "condeferrable", "condeferred",
        "convalidated", "conrelid", "contypid", "conindid", "conparentid", "confrelid",
        "confupdtype", "confdeltype", "confmatchtype", "conislocal", "coninhcount",
        "connoinherit", "conkey", "confkey",
    ];

    #[allow(clippy::too_many_arguments)]
    pub fn from_iris_constraint(
        oid_gen: &OidGenerator,
        schema: &str,
        table: &str,
        constraint_name: &str,
        constraint_type: &str,
        column_positions: Vec<i16>,
        ref_table: Option<&str>,
        ref_column_positions: Vec<i16>,
        update_rule: Option<&str>,
        delete_rule: Option<&str>,
    ) -> PgConstraint {
        let contype = match constraint_type.to_ascii_uppercase().as_str() {
            "PRIMARY KEY" => 'p',
            "FOREIGN KEY" => 'f',
            "UNIQUE" => 'u',
            _ => 'c',
        };
        let confrelid = match (contype, ref_table) {
            ('f', Some(t)) => oid_gen.get_table_oid(schema, t),
            _ => 0,
        };
        PgConstraint {
            oid: oid_gen.get_constraint_oid(schema, constraint_name),
            conname: constraint_name.to_lowercase(),
            connamespace: oid_gen.namespace_oid(schema),
            contype,
            conrelid: oid_gen.get_table_oid(schema, table),
            conindid: match contype {
                'p' | 'u' => oid_gen.get_index_oid(schema, constraint_name),
                _ => 0,
            },
            confrelid,
            conkey: column_positions,
            confkey: if contype == 'f' { ref_column_positions } else { Vec::new() },
            confupdtype: rule_char(contype, update_rule),
            confdeltype: rule_char(contype, delete_rule),
        }
    }

    pub fn to_row(&self) -> Vec<Value> {
        vec![
            Value::Int8(self.oid as i64),
            Value::Text(self.conname.clone()),
            Value::Int8(self.connamespace as i64),
            Value::Text(self.contype.to_string()),
            Value::Bool(false),                   // condeferrable
            Value::Bool(false),                   // condeferred
            Value::Bool(true),                    // convalidated
            Value::Int8(self.conrelid as i64),
            Value::Int4(0),                       // contypid
            Value::Int8(self.conindid as i64),
            Value::Int4(0),                       // conparentid
            Value::Int8(self.confrelid as i64),
            Value::Text(self.confupdtype.to_string()),
            Value::Text(self.confdeltype.to_string()),
            Value::Text(if self.contype == 'f' { "s" } else { " " }.into()),
            Value::Bool(true),                    // conislocal
            Value::Int2(0),                       // coninhcount
            Value::Bool(false),                   // connoinherit
            Value::Text(int2_array(&self.conkey)),
            if self.contype == 'f' {
                Value::Text(int2_array(&self.confkey))
            } else {
                Value::Null
            },
        ]
    }
}

fn rule_char(contype: char, rule: Option<&str>) -> char {
    if contype != 'f' {
        return ' ';
    }
    match rule.map(str::to_ascii_uppercase).as_deref() {
        Some("CASCADE") => 'c',
        Some("SET NULL") => 'n',
        Some("SET DEFAULT") => 'd',
        Some("RESTRICT") => 'r',
        _ => 'a', // NO ACTION
    }
}

/// Render positions the way PostgreSQL prints an int2 array.
fn int2_array(v: &[i16]) -> String {
    let mut out = String::from("{");
    for (i, n) in v.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(&n.to_string());
    }
    out.push('}');
    out
}
