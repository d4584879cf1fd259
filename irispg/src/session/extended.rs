//! Extended query protocol state: prepared statements and portals.
use std::collections::HashMap;

use bytes::{Buf, Bytes};

use crate::{
    executor::{CommandTag, RowStream},
    protocol::backend::FieldDescription,
    sql::{BoundParam, TxVerb},
    types::oid,
};

/// A parsed and translated statement template.
pub struct PreparedStatement {
    pub original_sql: String,
    pub translated_sql: String,
    /// Parameter type oids the client prespecified; zero entries mean
    /// unspecified.
    pub param_oids: Vec<u32>,
    /// Inferred from placeholders when the client did not prespecify.
    pub param_count: usize,
    pub verb: TxVerb,
    /// Output columns, filled by the first Describe or Execute.
    pub columns: Option<Vec<FieldDescription>>,
}

impl PreparedStatement {
    /// Parameter oids for ParameterDescription: explicit where given,
    /// unspecified elsewhere.
    pub fn described_param_oids(&self) -> Vec<u32> {
        let mut oids = self.param_oids.clone();
        if oids.len() < self.param_count {
            oids.resize(self.param_count, 0);
        }
        oids
    }
}

/// A bound portal, possibly mid-execution when a row limit suspended it.
pub struct Portal {
    pub statement_name: String,
    /// Backend-ready SQL: vectors spliced, placeholders positional.
    pub sql: String,
    /// Parameters to forward, in backend order.
    pub params: Vec<BoundParam>,
    pub result_formats: Vec<i16>,
    pub verb: TxVerb,
    /// Row stream left over from a size-limited Execute.
    pub suspended: Option<SuspendedExecution>,
}

pub struct SuspendedExecution {
    pub columns: Vec<FieldDescription>,
    pub rows: RowStream,
    pub tag: CommandTag,
    pub sent: u64,
}

impl Portal {
    /// Per-column output format for row encoding: the protocol allows
    /// zero (all text), one (uniform), or per-column codes.
    pub fn column_format(&self, index: usize) -> i16 {
        match self.result_formats.len() {
            0 => 0,
            1 => self.result_formats[0],
            _ => self.result_formats.get(index).copied().unwrap_or(0),
        }
    }
}

/// Named statement and portal tables. The unnamed entry ("") is
/// overwritten by each new Parse/Bind; named entries persist until Close.
#[derive(Default)]
pub struct ExtendedState {
    statements: HashMap<String, PreparedStatement>,
    portals: HashMap<String, Portal>,
}

impl ExtendedState {
    pub fn store_statement(&mut self, name: String, stmt: PreparedStatement) {
        self.statements.insert(name, stmt);
    }

    pub fn statement(&self, name: &str) -> Option<&PreparedStatement> {
        self.statements.get(name)
    }

    pub fn statement_mut(&mut self, name: &str) -> Option<&mut PreparedStatement> {
        self.statements.get_mut(name)
    }

    pub fn close_statement(&mut self, name: &str) {
        self.statements.remove(name);
        // portals over a closed statement die with it
        self.portals.retain(|_, p| p.statement_name != name);
    }

    pub fn store_portal(&mut self, name: String, portal: Portal) {
        self.portals.insert(name, portal);
    }

    pub fn portal(&self, name: &str) -> Option<&Portal> {
        self.portals.get(name)
    }

    pub fn portal_mut(&mut self, name: &str) -> Option<&mut Portal> {
        self.portals.get_mut(name)
    }

    pub fn close_portal(&mut self, name: &str) {
        self.portals.remove(name);
    }

    /// Sync and transaction end both discard every portal.
    pub fn clear_portals(&mut self) {
        self.portals.clear();
    }
}

/// Decode one Bind parameter according to its format code and declared
/// oid. Text parameters pass through; the binary encodings of the
/// integer and float families are decoded; anything else stays opaque.
pub fn decode_parameter(value: Option<Bytes>, format: i16, type_oid: u32) -> BoundParam {
    let Some(bytes) = value else { return BoundParam::Null };

    if format == 0 {
        return match std::str::from_utf8(&bytes) {
            Ok(text) => BoundParam::Text(text.to_string()),
            Err(_) => BoundParam::Binary(bytes),
        };
    }

    let mut buf = &bytes[..];
    match (type_oid, bytes.len()) {
        (oid::INT2, 2) => BoundParam::Text(buf.get_i16().to_string()),
        (oid::INT4, 4) => BoundParam::Text(buf.get_i32().to_string()),
        (oid::INT8, 8) => BoundParam::Text(buf.get_i64().to_string()),
        (oid::OID, 4) => BoundParam::Text(buf.get_u32().to_string()),
        (oid::FLOAT4, 4) => BoundParam::Text(buf.get_f32().to_string()),
        (oid::FLOAT8, 8) => BoundParam::Text(buf.get_f64().to_string()),
        (oid::BOOL, 1) => BoundParam::Text(if bytes[0] == 0 { "0" } else { "1" }.into()),
        // unknown oid but plausibly sized integers: psycopg sends int4/int8
        // with oid 0 when types were left unspecified
        (0, 2) => BoundParam::Text(buf.get_i16().to_string()),
        (0, 4) => BoundParam::Text(buf.get_i32().to_string()),
        (0, 8) => BoundParam::Text(buf.get_i64().to_string()),
        _ => BoundParam::Binary(bytes),
    }
}

/// The per-parameter format for Bind's format-code list.
pub fn parameter_format(formats: &[i16], index: usize) -> i16 {
    match formats.len() {
        0 => 0,
        1 => formats[0],
        _ => formats.get(index).copied().unwrap_or(0),
    }
}
