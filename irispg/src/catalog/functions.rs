//! Catalog scalar functions ORMs call during introspection.
use crate::types::{self, Oid};

use super::Snapshot;

/// `format_type(type_oid, typmod)`: the PostgreSQL type string, with the
/// parameterized forms reconstructed from the modifier.
pub fn format_type(type_oid: i64, typmod: Option<i32>) -> Option<String> {
    let oid = Oid::try_from(type_oid).ok()?;
    let name = types::type_name(oid)?;

    let Some(typmod) = typmod.filter(|m| *m >= 0) else {
        return Some(name.to_string());
    };

    Some(match oid {
        types::oid::VARCHAR | types::oid::BPCHAR => {
            format!("{name}({})", typmod - 4)
        }
        types::oid::NUMERIC => {
            let stripped = typmod - 4;
            let precision = (stripped >> 16) & 0xffff;
            let scale = stripped & 0xffff;
            format!("numeric({precision},{scale})")
        }
        types::oid::TIMESTAMP => format!("timestamp({typmod}) without time zone"),
        types::oid::TIMESTAMPTZ => format!("timestamp({typmod}) with time zone"),
        types::oid::BIT => format!("bit({typmod})"),
        _ => name.to_string(),
    })
}

/// `pg_get_constraintdef(constraint_oid)`: the constraint's definition
/// clause, or `None` for an unknown oid.
pub fn constraint_def(snap: &Snapshot, constraint_oid: i64) -> Option<String> {
    let con = snap.constraint_by_oid(constraint_oid)?;
    let column_names = |table_oid: i64, keys: &[i16]| -> String {
        let atts = snap.attributes_of(table_oid);
        keys.iter()
            .map(|k| {
                atts.iter()
                    .find(|a| a.attnum == *k)
                    .map(|a| a.attname.clone())
                    .unwrap_or_else(|| format!("${k}"))
            })
            .collect::<Vec<_>>()
            .join(", ")
    };

    let cols = column_names(con.conrelid as i64, &con.conkey);
    Some(match con.contype {
        'p' => format!("PRIMARY KEY ({cols})"),
        'u' => format!("UNIQUE ({cols})"),
        'f' => {
            let ref_name = snap
                .class_by_oid(con.confrelid as i64)
                .map(|c| c.relname.clone())
                .unwrap_or_else(|| con.confrelid.to_string());
            let ref_cols = column_names(con.confrelid as i64, &con.confkey);
            let mut def = format!("FOREIGN KEY ({cols}) REFERENCES {ref_name}({ref_cols})");
            if let Some(action) = action_clause(con.confupdtype) {
                def.push_str(" ON UPDATE ");
                def.push_str(action);
            }
            if let Some(action) = action_clause(con.confdeltype) {
                def.push_str(" ON DELETE ");
                def.push_str(action);
            }
            def
        }
        _ => format!("CHECK ({cols})"),
    })
}

fn action_clause(rule: char) -> Option<&'static str> {
    match rule {
        'c' => Some("CASCADE"),
        'n' => Some("SET NULL"),
        'd' => Some("SET DEFAULT"),
        'r' => Some("RESTRICT"),
        // NO ACTION is the default and is not printed
        _ => None,
    }
}

/// `pg_get_indexdef(index_oid[, column])`: the full CREATE INDEX text, or
/// a single column name when a 1-based column position is given. `None`
/// where backend metadata is insufficient.
pub fn index_def(snap: &Snapshot, index_oid: i64, column: Option<i32>) -> Option<String> {
    let index = snap.index_by_relid(index_oid)?;
    let table = snap.class_by_oid(index.indrelid as i64)?;
    let atts = snap.attributes_of(index.indrelid as i64);
    let name_of = |k: i16| {
        atts.iter()
            .find(|a| a.attnum == k)
            .map(|a| a.attname.clone())
    };

    if let Some(n) = column {
        if n <= 0 || n as usize > index.indkey.len() {
            return None;
        }
        return name_of(index.indkey[n as usize - 1]);
    }

    let index_name = snap.class_by_oid(index_oid).map(|c| c.relname.clone())?;
    let cols: Option<Vec<String>> = index.indkey.iter().map(|k| name_of(*k)).collect();
    let cols = cols?;
    Some(format!(
        "CREATE {}INDEX {} ON public.{} USING btree ({})",
        if index.indisunique { "UNIQUE " } else { "" },
        index_name,
        table.relname,
        cols.join(", "),
    ))
}

/// `pg_get_serial_sequence(table, column)`: the sequence name backing an
/// auto-increment column, `None` otherwise.
pub fn serial_sequence(snap: &Snapshot, table: &str, column: &str) -> Option<String> {
    // accept schema-qualified table names
    let table = table.rsplit('.').next().unwrap_or(table).trim_matches('"');
    let class = snap.class_by_name(table)?;
    let atts = snap.attributes_of(class.oid as i64);
    let att = atts.iter().find(|a| a.attname.eq_ignore_ascii_case(column))?;
    let def = snap.attrdef_for(class.oid as i64, att.attnum)?;
    def.adbin
        .to_lowercase()
        .contains("nextval")
        .then(|| format!("public.{}_{}_seq", class.relname, att.attname))
}

/// `pg_get_viewdef(view_oid)`: intentionally `None`; ORM introspection
/// does not require view bodies.
pub fn view_def(_snap: &Snapshot, _view_oid: i64) -> Option<String> {
    None
}
