//! Snapshot materialization from the backend's INFORMATION_SCHEMA.
use std::collections::HashMap;

use crate::{
    Result,
    executor::Handle,
    types::Value,
};

use super::{
    Snapshot,
    oid::OidGenerator,
    rows::{PgAttrdef, PgAttribute, PgClass, PgConstraint, PgIndex, PgNamespace},
};

fn text(v: Option<&Value>) -> String {
    match v {
        Some(Value::Text(s)) => s.clone(),
        Some(Value::Date(s)) | Some(Value::Timestamp(s)) | Some(Value::TimestampTz(s)) => {
            s.clone()
        }
        Some(Value::Numeric(s)) => s.clone(),
        Some(Value::Int2(n)) => n.to_string(),
        Some(Value::Int4(n)) => n.to_string(),
        Some(Value::Int8(n)) => n.to_string(),
        _ => String::new(),
    }
}

fn int(v: Option<&Value>) -> Option<i64> {
    match v {
        Some(Value::Int2(n)) => Some(*n as i64),
        Some(Value::Int4(n)) => Some(*n as i64),
        Some(Value::Int8(n)) => Some(*n),
        Some(Value::Numeric(s)) | Some(Value::Text(s)) => s.trim().parse().ok(),
        _ => None,
    }
}

async fn query(handle: &mut Handle, sql: &str) -> Result<Vec<Vec<Value>>> {
    let outcome = handle.execute(sql, &[]).await?;
    outcome.rows.collect().await
}

/// Load every catalog row for one namespace.
pub(super) async fn load(
    handle: &mut Handle,
    generator: &OidGenerator,
    namespace: &str,
) -> Result<Snapshot> {
    let mut snap = Snapshot {
        namespace: namespace.to_string(),
        namespaces: PgNamespace::builtin(),
        ..Snapshot::default()
    };

    // tables and views
    let tables = query(
        handle,
        &format!(
            "SELECT TABLE_NAME, TABLE_TYPE FROM INFORMATION_SCHEMA.TABLES \
             WHERE TABLE_SCHEMA = '{namespace}'",
        ),
    )
    .await?;
    for row in &tables {
        let name = text(row.first());
        if name.is_empty() {
            continue;
        }
        snap.classes.push(PgClass::from_iris_table(
            generator,
            namespace,
            &name,
            &text(row.get(1)),
        ));
    }

    // columns, defaults, identity markers
    let columns = query(
        handle,
        &format!(
            "SELECT TABLE_NAME, COLUMN_NAME, ORDINAL_POSITION, DATA_TYPE, \
             CHARACTER_MAXIMUM_LENGTH, IS_NULLABLE, COLUMN_DEFAULT, IS_IDENTITY \
             FROM INFORMATION_SCHEMA.COLUMNS WHERE TABLE_SCHEMA = '{namespace}' \
             ORDER BY TABLE_NAME, ORDINAL_POSITION",
        ),
    )
    .await?;
    let mut natts: HashMap<String, i16> = HashMap::new();
    for row in &columns {
        let table = text(row.first());
        let column = text(row.get(1));
        if table.is_empty() || column.is_empty() {
            continue;
        }
        let position = int(row.get(2)).unwrap_or(0) as i16;
        let default = text(row.get(6));
        let is_identity = text(row.get(7)).eq_ignore_ascii_case("YES");
        let has_default = is_identity || !default.is_empty();

        snap.attributes.push(PgAttribute::from_iris_column(
            generator,
            namespace,
            &table,
            &column,
            position,
            &text(row.get(3)),
            int(row.get(4)).map(|n| n as i32),
            text(row.get(5)).eq_ignore_ascii_case("YES"),
            has_default,
            is_identity,
        ));
        if has_default {
            let marker = if is_identity { "$IDENTITY" } else { default.as_str() };
            snap.attrdefs.push(PgAttrdef::from_iris_default(
                generator, namespace, &table, &column, position, marker,
            ));
        }
        *natts.entry(table.to_lowercase()).or_insert(0) += 1;
    }
    for class in &mut snap.classes {
        if let Some(n) = natts.get(&class.relname) {
            class.relnatts = *n;
        }
    }

    // constraints: type and table first, then member columns, then FK rules
    let constraints = query(
        handle,
        &format!(
            "SELECT CONSTRAINT_NAME, CONSTRAINT_TYPE, TABLE_NAME \
             FROM INFORMATION_SCHEMA.TABLE_CONSTRAINTS \
             WHERE TABLE_SCHEMA = '{namespace}'",
        ),
    )
    .await?;
    let key_columns = query(
        handle,
        &format!(
            "SELECT CONSTRAINT_NAME, TABLE_NAME, COLUMN_NAME, ORDINAL_POSITION \
             FROM INFORMATION_SCHEMA.KEY_COLUMN_USAGE \
             WHERE TABLE_SCHEMA = '{namespace}' ORDER BY ORDINAL_POSITION",
        ),
    )
    .await?;
    let referential = query(
        handle,
        &format!(
            "SELECT CONSTRAINT_NAME, UNIQUE_CONSTRAINT_NAME, UPDATE_RULE, DELETE_RULE \
             FROM INFORMATION_SCHEMA.REFERENTIAL_CONSTRAINTS \
             WHERE CONSTRAINT_SCHEMA = '{namespace}'",
        ),
    )
    .await?;

    // constraint name -> ordered member column names
    let mut members: HashMap<String, Vec<(String, String)>> = HashMap::new();
    for row in &key_columns {
        members
            .entry(text(row.first()).to_lowercase())
            .or_default()
            .push((text(row.get(1)), text(row.get(2))));
    }
    // constraint name -> (referenced constraint, update rule, delete rule)
    let mut fk_rules: HashMap<String, (String, String, String)> = HashMap::new();
    for row in &referential {
        fk_rules.insert(
            text(row.first()).to_lowercase(),
            (text(row.get(1)), text(row.get(2)), text(row.get(3))),
        );
    }
    // constraint name -> owning table, for resolving FK referents
    let mut owner: HashMap<String, String> = HashMap::new();
    for row in &constraints {
        owner.insert(text(row.first()).to_lowercase(), text(row.get(2)));
    }

    let position_of = |table: &str, column: &str| -> i16 {
        snap.attributes
            .iter()
            .find(|a| {
                a.attrelid == generator.get_table_oid(namespace, table)
                    && a.attname.eq_ignore_ascii_case(column)
            })
            .map(|a| a.attnum)
            .unwrap_or(0)
    };

    let mut built: Vec<PgConstraint> = Vec::new();
    let mut indexes: Vec<PgIndex> = Vec::new();
    let mut index_classes: Vec<PgClass> = Vec::new();

    for row in &constraints {
        let name = text(row.first());
        let ctype = text(row.get(1));
        let table = text(row.get(2));
        if name.is_empty() || table.is_empty() {
            continue;
        }

        let key = name.to_lowercase();
        let cols: Vec<i16> = members
            .get(&key)
            .map(|m| m.iter().map(|(t, c)| position_of(t, c)).collect())
            .unwrap_or_default();

        let (ref_table, ref_cols, update_rule, delete_rule) = match fk_rules.get(&key) {
            Some((unique_name, upd, del)) => {
                let ref_table = owner.get(&unique_name.to_lowercase()).cloned();
                let ref_cols: Vec<i16> = members
                    .get(&unique_name.to_lowercase())
                    .map(|m| m.iter().map(|(t, c)| position_of(t, c)).collect())
                    .unwrap_or_default();
                (ref_table, ref_cols, Some(upd.clone()), Some(del.clone()))
            }
            None => (None, Vec::new(), None, None),
        };

        let constraint = PgConstraint::from_iris_constraint(
            generator,
            namespace,
            &table,
            &name,
            &ctype,
            cols.clone(),
            ref_table.as_deref(),
            ref_cols,
            update_rule.as_deref(),
            delete_rule.as_deref(),
        );

        // key constraints surface as btree indexes too
        if matches!(constraint.contype, 'p' | 'u') {
            indexes.push(PgIndex::from_iris_index(
                generator,
                namespace,
                &table,
                &name,
                cols.clone(),
                true,
                constraint.contype == 'p',
            ));
            index_classes.push(PgClass::index_entry(
                generator,
                namespace,
                &name,
                cols.len() as i16,
            ));
        }
        built.push(constraint);
    }

    for class in &mut snap.classes {
        if indexes.iter().any(|i| i.indrelid == class.oid) {
            class.relhasindex = true;
        }
    }

    snap.constraints = built;
    snap.indexes = indexes;
    snap.classes.extend(index_classes);
    Ok(snap)
}
