use std::collections::BTreeMap;

use bytes::{Buf, Bytes};
use thiserror::Error;

use crate::common::ByteStr;
use crate::ext::BytesExt;

/// A failure to make sense of bytes that were supposed to carry a postgres
/// frontend/backend message.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("unexpected message: expected {expect:?}, found {found:?} ({phase})")]
    Unexpected { expect: u8, found: u8, phase: &'static str },

    #[error("unknown backend message type: {0:?}")]
    Unknown(u8),

    #[error("unknown authentication method: {0}")]
    UnknownAuth(u32),

    #[error("string field was not nul terminated")]
    UnterminatedString,

    #[error("string field was not valid utf8: {0}")]
    Utf8(#[from] std::str::Utf8Error),
}

impl ProtocolError {
    pub fn unknown(msgtype: u8) -> Self {
        Self::Unknown(msgtype)
    }

    pub fn unexpected(expect: u8, found: u8) -> Self {
        Self::Unexpected { expect, found, phase: "message" }
    }

    pub fn unexpected_phase(expect: u8, found: u8, phase: &'static str) -> Self {
        Self::Unexpected { expect, found, phase }
    }

    pub fn unknown_auth(auth: u32) -> Self {
        Self::UnknownAuth(auth)
    }
}

/// A `Byte1`-coded field from an `ErrorResponse`/`NoticeResponse` body.
///
/// <https://www.postgresql.org/docs/current/protocol-error-fields.html>
#[derive(Debug, Clone, Default)]
pub struct DatabaseError {
    fields: BTreeMap<u8, ByteStr>,
}

impl DatabaseError {
    pub(crate) fn parse(mut body: Bytes) -> Result<Self, ProtocolError> {
        let mut fields = BTreeMap::new();
        loop {
            let code = body.get_u8();
            if code == 0 {
                break;
            }
            let value = body.get_nul_bytestr()?;
            fields.insert(code, value);
        }
        Ok(Self { fields })
    }

    fn field(&self, code: u8) -> Option<&str> {
        self.fields.get(&code).map(|e| e.as_ref())
    }

    /// `SQLSTATE` error code, e.g. `"42P01"`.
    pub fn code(&self) -> &str {
        self.field(b'C').unwrap_or("")
    }

    pub fn severity(&self) -> &str {
        self.field(b'S').unwrap_or("")
    }

    pub fn message(&self) -> &str {
        self.field(b'M').unwrap_or("")
    }

    pub fn detail(&self) -> Option<&str> {
        self.field(b'D')
    }

    pub fn hint(&self) -> Option<&str> {
        self.field(b'H')
    }

    pub fn schema(&self) -> Option<&str> {
        self.field(b's')
    }

    pub fn table(&self) -> Option<&str> {
        self.field(b't')
    }

    pub fn column(&self) -> Option<&str> {
        self.field(b'c')
    }

    pub fn constraint(&self) -> Option<&str> {
        self.field(b'n')
    }

    /// Coarse categorization of [`code`][Self::code], used to drive retry,
    /// autosave, and statement-cache-flush decisions.
    pub fn code_class(&self) -> SqlStateClass {
        match self.code() {
            "57014" => SqlStateClass::QueryCanceled,
            "0A000" if self.message().contains("cached plan") => SqlStateClass::CachedPlanInvalidation,
            "25001" | "25002" | "25003" | "25004" | "25005" | "25006" | "25007" | "25008" => {
                SqlStateClass::InvalidTransactionState
            }
            "40001" | "40P01" => SqlStateClass::Serialization,
            code if code.starts_with("08") => SqlStateClass::Connection,
            code if code.starts_with("28") => SqlStateClass::Authentication,
            code if code.starts_with("23") => SqlStateClass::IntegrityConstraint,
            code if code.starts_with("22") || code.starts_with("42") => SqlStateClass::DataOrSyntax,
            _ => SqlStateClass::Other,
        }
    }
}

impl std::fmt::Display for DatabaseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code(), self.message())
    }
}

impl std::error::Error for DatabaseError {}

/// Coarse classification of a [`DatabaseError`] used by the query engine and
/// session layers to decide whether to retry, flush caches, or surface as-is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlStateClass {
    Connection,
    Authentication,
    InvalidTransactionState,
    IntegrityConstraint,
    DataOrSyntax,
    QueryCanceled,
    CachedPlanInvalidation,
    Serialization,
    Other,
}
