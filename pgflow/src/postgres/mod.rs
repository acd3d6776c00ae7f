//! The PostgreSQL frontend/backend wire protocol, version 3.0.
//!
//! Every message is framed as `Byte1(type) Int32(length) Bytes(length-4)`,
//! except `StartupMessage`/`SSLRequest`/`GSSENCRequest`, which omit the type
//! byte. `length` includes itself but not the type byte.
//!
//! Two format codes exist for parameter values and result columns: `0` for
//! text, `1` for binary (see [`PgFormat`]).
pub(crate) mod backend;
mod error;
pub(crate) mod frontend;
mod pg_format;
mod pg_type;

pub use backend::{
    Authentication, BackendKeyData, BackendMessage, BackendProtocol, BindComplete, CloseComplete,
    CommandComplete, CopyBothResponse, CopyData, CopyDone, CopyInResponse, CopyOutResponse,
    DataRow, EmptyQueryResponse, ErrorResponse, FunctionCallResponse, NegotiateProtocolVersion,
    NoData, NoticeResponse, NotificationResponse, ParameterDescription, ParameterStatus,
    ParseComplete, PortalSuspended, ReadyForQuery, RowDescription,
};
pub use error::{DatabaseError, ProtocolError, SqlStateClass};
pub use frontend::{
    Bind, CancelRequest, Close, CopyData as FeCopyData, CopyDone as FeCopyDone,
    CopyFail, Describe, Execute, Flush, FrontendProtocol, GssEncRequest, Parse, PasswordMessage,
    Query, SaslInitialResponse, SaslResponse, SslRequest, Startup, Sync, Terminate, write,
};
pub use pg_format::PgFormat;
pub use pg_type::{Oid, PgType, oid};
