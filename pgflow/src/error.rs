//! Top-level error type returned from public connection/query APIs.
use std::backtrace::Backtrace;
use std::fmt;

use crate::decode::DecodeError;
use crate::postgres::{DatabaseError, ProtocolError};

/// Result alias used throughout the crate's public API.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Boxed, backtrace-carrying error returned by connection and query
/// operations.
///
/// Construction always goes through [`ErrorKind`] so callers can match on
/// the kind of failure without downcasting; the backtrace is captured at
/// construction time (a no-op unless `RUST_BACKTRACE` is set).
pub struct Error {
    kind: ErrorKind,
    context: Option<String>,
    backtrace: Backtrace,
}

/// The classified reason an operation failed.
#[derive(Debug)]
pub enum ErrorKind {
    /// I/O failure on the underlying socket.
    Io(std::io::Error),
    /// A frontend/backend message violated the wire protocol.
    Protocol(ProtocolError),
    /// The server returned `ErrorResponse`.
    Database(DatabaseError),
    /// Authentication was rejected, or the exchange itself failed.
    Authentication(String),
    /// The server requested an authentication mechanism this build has no
    /// provider for (e.g. GSSAPI without a configured [`crate::auth::GssProvider`]).
    UnsupportedAuth(&'static str),
    /// TLS handshake or certificate validation failure.
    Tls(String),
    /// A connection string, URL, or builder option was invalid.
    Config(String),
    /// The connection pool could not produce a connection (closed, timed out).
    Pool(String),
    /// A row or column was addressed that the result set does not contain,
    /// or a value could not be decoded into the requested type.
    Decode(DecodeError),
    /// The connection was closed, either by the peer or locally.
    Closed,
    /// `fetch_one`/`fetch_optional` expected a row and the result set was empty.
    RowNotFound,
    /// The executed string was empty (`EmptyQueryResponse`).
    EmptyQuery,
    /// A batch execution (§4.4 "Batch execution") failed partway through;
    /// `rows_affected` holds the affected-row count for each parameter set
    /// that completed before `source` aborted the rest of the pipeline.
    Batch { rows_affected: Vec<u64>, source: Box<Error> },
}

impl Error {
    fn new(kind: ErrorKind) -> Self {
        Self { kind, context: None, backtrace: Backtrace::capture() }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Config(msg.into()))
    }

    pub fn pool(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Pool(msg.into()))
    }

    pub fn closed() -> Self {
        Self::new(ErrorKind::Closed)
    }

    pub fn row_not_found() -> Self {
        Self::new(ErrorKind::RowNotFound)
    }

    pub fn empty_query() -> Self {
        Self::new(ErrorKind::EmptyQuery)
    }

    pub fn batch(rows_affected: Vec<u64>, source: Error) -> Self {
        Self::new(ErrorKind::Batch { rows_affected, source: Box::new(source) })
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    pub fn backtrace(&self) -> &Backtrace {
        &self.backtrace
    }

    /// Attaches a human-readable note describing what the caller was doing
    /// when the error occurred, without discarding the original `kind`.
    pub fn context(mut self, msg: impl Into<String>) -> Self {
        self.context = Some(msg.into());
        self
    }

    /// The `SQLSTATE` class, if this error originated from `ErrorResponse`.
    pub fn sqlstate_class(&self) -> Option<crate::postgres::SqlStateClass> {
        match &self.kind {
            ErrorKind::Database(e) => Some(e.code_class()),
            ErrorKind::Batch { source, .. } => source.sqlstate_class(),
            _ => None,
        }
    }

    /// The per-statement affected-row counts completed before a batch
    /// execution aborted, if this is [`ErrorKind::Batch`].
    pub fn batch_rows_affected(&self) -> Option<&[u64]> {
        match &self.kind {
            ErrorKind::Batch { rows_affected, .. } => Some(rows_affected),
            _ => None,
        }
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Self::new(kind)
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::new(ErrorKind::Io(e))
    }
}

impl From<ProtocolError> for Error {
    fn from(e: ProtocolError) -> Self {
        Self::new(ErrorKind::Protocol(e))
    }
}

impl From<DatabaseError> for Error {
    fn from(e: DatabaseError) -> Self {
        Self::new(ErrorKind::Database(e))
    }
}

impl From<DecodeError> for Error {
    fn from(e: DecodeError) -> Self {
        Self::new(ErrorKind::Decode(e))
    }
}

#[cfg(feature = "tls")]
impl From<rustls::Error> for Error {
    fn from(e: rustls::Error) -> Self {
        Self::new(ErrorKind::Tls(e.to_string()))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ErrorKind::Io(e) => write!(f, "i/o error: {e}")?,
            ErrorKind::Protocol(e) => write!(f, "protocol error: {e}")?,
            ErrorKind::Database(e) => write!(f, "database error: {e}")?,
            ErrorKind::Authentication(msg) => write!(f, "authentication failed: {msg}")?,
            ErrorKind::UnsupportedAuth(mechanism) => write!(f, "unsupported authentication mechanism: {mechanism}")?,
            ErrorKind::Tls(msg) => write!(f, "tls error: {msg}")?,
            ErrorKind::Config(msg) => write!(f, "invalid configuration: {msg}")?,
            ErrorKind::Pool(msg) => write!(f, "pool error: {msg}")?,
            ErrorKind::Decode(e) => write!(f, "decode error: {e}")?,
            ErrorKind::Closed => write!(f, "connection closed")?,
            ErrorKind::RowNotFound => write!(f, "no rows returned")?,
            ErrorKind::EmptyQuery => write!(f, "executed string was empty")?,
            ErrorKind::Batch { rows_affected, source } => {
                write!(f, "batch execution failed after {} statement(s): {source}", rows_affected.len())?
            }
        }
        if let Some(context) = &self.context {
            write!(f, " ({context})")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Error")
            .field("kind", &self.kind)
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.kind {
            ErrorKind::Io(e) => Some(e),
            ErrorKind::Protocol(e) => Some(e),
            ErrorKind::Database(e) => Some(e),
            ErrorKind::Decode(e) => Some(e),
            ErrorKind::Batch { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}
