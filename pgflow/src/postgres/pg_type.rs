/// A postgres object id, as used to identify types, tables, etc.
pub type Oid = u32;

/// Well-known base type Oids (`SELECT oid, typname FROM pg_type`).
///
/// Only the subset referenced by the built-in [`Decode`](crate::Decode)/
/// [`Encode`](crate::Encode) implementations and by the default binary-format
/// Oid set is listed here; the crate does not attempt to be a full catalogue.
pub mod oid {
    use super::Oid;

    pub const BOOL: Oid = 16;
    pub const BYTEA: Oid = 17;
    pub const CHAR: Oid = 18;
    pub const INT8: Oid = 20;
    pub const INT2: Oid = 21;
    pub const INT4: Oid = 23;
    pub const TEXT: Oid = 25;
    pub const OID: Oid = 26;
    pub const FLOAT4: Oid = 700;
    pub const FLOAT8: Oid = 701;
    pub const VARCHAR: Oid = 1043;
    pub const DATE: Oid = 1082;
    pub const TIME: Oid = 1083;
    pub const TIMESTAMP: Oid = 1114;
    pub const TIMESTAMPTZ: Oid = 1184;
    pub const TIMETZ: Oid = 1266;
    pub const NUMERIC: Oid = 1700;
    pub const UUID: Oid = 2950;

    /// Oids postgres will accept binary format for by default (mirrors the
    /// JDBC driver's default binary-transfer set).
    pub const DEFAULT_BINARY: &[Oid] = &[
        BYTEA, INT2, INT4, INT8, FLOAT4, FLOAT8, NUMERIC, TIME, TIMETZ, TIMESTAMP, TIMESTAMPTZ,
        UUID,
    ];
}

/// A rust type that maps to a single, statically-known postgres Oid.
pub trait PgType {
    const OID: Oid;
}

impl PgType for () {
    const OID: Oid = 0;
}

impl PgType for bool {
    const OID: Oid = oid::BOOL;
}

impl PgType for i16 {
    const OID: Oid = oid::INT2;
}

impl PgType for i32 {
    const OID: Oid = oid::INT4;
}

impl PgType for i64 {
    const OID: Oid = oid::INT8;
}

impl PgType for f32 {
    const OID: Oid = oid::FLOAT4;
}

impl PgType for f64 {
    const OID: Oid = oid::FLOAT8;
}

impl PgType for str {
    const OID: Oid = oid::TEXT;
}

impl PgType for String {
    const OID: Oid = oid::TEXT;
}

impl PgType for [u8] {
    const OID: Oid = oid::BYTEA;
}

impl PgType for Vec<u8> {
    const OID: Oid = oid::BYTEA;
}
