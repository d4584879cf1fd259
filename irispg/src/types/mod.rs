//! Type oids, the row [`Value`] union, and wire encodings.
mod value;

pub use value::Value;

/// Postgres object identifier.
///
/// The oid type is implemented as an unsigned four-byte integer.
///
/// <https://www.postgresql.org/docs/current/datatype-oid.html>
pub type Oid = u32;

macro_rules! oid_table {
    ($($name:ident = $oid:literal, $size:literal, $pgname:literal;)*) => {
        /// Well-known type oids mirrored from upstream PostgreSQL.
        pub mod oid {
            use super::Oid;
            $(
                #[doc = concat!("`", $pgname, "`")]
                pub const $name: Oid = $oid;
            )*
        }

        /// The pg_type.typlen of a well-known oid; negative denotes a
        /// variable-width type.
        pub const fn type_size(oid: Oid) -> i16 {
            match oid {
                $($oid => $size,)*
                _ => -1,
            }
        }

        /// The PostgreSQL type name of a well-known oid, or `None`.
        pub const fn type_name(oid: Oid) -> Option<&'static str> {
            match oid {
                $($oid => Some($pgname),)*
                _ => None,
            }
        }
    };
}

oid_table! {
    BOOL = 16, 1, "boolean";
    BYTEA = 17, -1, "bytea";
    CHAR = 18, 1, "\"char\"";
    NAME = 19, 64, "name";
    INT8 = 20, 8, "bigint";
    INT2 = 21, 2, "smallint";
    INT4 = 23, 4, "integer";
    REGCLASS = 2205, 4, "regclass";
    TEXT = 25, -1, "text";
    OID = 26, 4, "oid";
    FLOAT4 = 700, 4, "real";
    FLOAT8 = 701, 8, "double precision";
    UNKNOWN = 705, -2, "unknown";
    VARCHAR = 1043, -1, "character varying";
    BPCHAR = 1042, -1, "character";
    DATE = 1082, 4, "date";
    TIME = 1083, 8, "time without time zone";
    TIMESTAMP = 1114, 8, "timestamp without time zone";
    TIMESTAMPTZ = 1184, 8, "timestamp with time zone";
    INTERVAL = 1186, 16, "interval";
    BIT = 1560, -1, "bit";
    NUMERIC = 1700, -1, "numeric";
}

/// Map a backend (IRIS) column type name to the closest PostgreSQL oid.
///
/// Names arrive the way INFORMATION_SCHEMA reports them, upper case with
/// optional precision suffix already stripped by the caller.
pub fn oid_of_iris_type(name: &str) -> Oid {
    match name.to_ascii_uppercase().as_str() {
        "BIT" => oid::BOOL,
        "TINYINT" | "SMALLINT" => oid::INT2,
        "INTEGER" | "INT" | "MEDIUMINT" => oid::INT4,
        "BIGINT" => oid::INT8,
        "NUMERIC" | "DECIMAL" | "MONEY" | "SMALLMONEY" => oid::NUMERIC,
        "REAL" => oid::FLOAT4,
        "DOUBLE" | "DOUBLE PRECISION" | "FLOAT" => oid::FLOAT8,
        "DATE" => oid::DATE,
        "TIME" => oid::TIME,
        "TIMESTAMP" | "DATETIME" | "DATETIME2" | "POSIXTIME" => oid::TIMESTAMP,
        "TIMESTAMPTZ" | "TIMESTAMP WITH TIME ZONE" => oid::TIMESTAMPTZ,
        "VARCHAR" | "CHARACTER VARYING" | "NVARCHAR" => oid::VARCHAR,
        "CHAR" | "CHARACTER" | "NCHAR" => oid::BPCHAR,
        "LONGVARCHAR" | "TEXT" | "CLOB" => oid::TEXT,
        "BINARY" | "VARBINARY" | "LONGVARBINARY" | "BLOB" => oid::BYTEA,
        "OID" => oid::OID,
        // vectors have no upstream oid; text keeps every client working
        "VECTOR" | "EMBEDDING" => oid::TEXT,
        _ => oid::TEXT,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn upstream_oids_match_postgres() {
        assert_eq!(oid::INT4, 23);
        assert_eq!(oid::INT8, 20);
        assert_eq!(oid::TEXT, 25);
        assert_eq!(oid::VARCHAR, 1043);
        assert_eq!(oid::BOOL, 16);
        assert_eq!(oid::FLOAT4, 700);
        assert_eq!(oid::FLOAT8, 701);
        assert_eq!(oid::NUMERIC, 1700);
        assert_eq!(oid::DATE, 1082);
        assert_eq!(oid::TIMESTAMP, 1114);
        assert_eq!(oid::TIMESTAMPTZ, 1184);
        assert_eq!(oid::BYTEA, 17);
    }

    #[test]
    fn iris_type_mapping() {
        assert_eq!(oid_of_iris_type("VARCHAR"), oid::VARCHAR);
        assert_eq!(oid_of_iris_type("varchar"), oid::VARCHAR);
        assert_eq!(oid_of_iris_type("BIGINT"), oid::INT8);
        assert_eq!(oid_of_iris_type("VECTOR"), oid::TEXT);
        assert_eq!(oid_of_iris_type("SOMETHING ELSE"), oid::TEXT);
    }

    #[test]
    fn fixed_sizes() {
        assert_eq!(type_size(oid::INT4), 4);
        assert_eq!(type_size(oid::TEXT), -1);
        assert_eq!(type_size(424242), -1);
    }
}
