//! Postgres Backend Messages
//!
//! <https://www.postgresql.org/docs/current/protocol-message-formats.html>
use bytes::{Buf, Bytes};

use super::{DatabaseError, ProtocolError};
use crate::common::ByteStr;
use crate::ext::BytesExt;

/// A type that can be decoded from a postgres backend message.
pub trait BackendProtocol: Sized + std::fmt::Debug {
    /// Decode `body`, which is only the main body: msgtype and length have
    /// already been consumed by the transport.
    fn decode(msgtype: u8, body: Bytes) -> Result<Self, ProtocolError>;
}

/// Any postgres backend message.
#[derive(Debug)]
pub enum BackendMessage {
    Authentication(Authentication),
    BackendKeyData(BackendKeyData),
    BindComplete(BindComplete),
    CloseComplete(CloseComplete),
    CommandComplete(CommandComplete),
    CopyData(CopyData),
    CopyDone(CopyDone),
    CopyInResponse(CopyInResponse),
    CopyOutResponse(CopyOutResponse),
    CopyBothResponse(CopyBothResponse),
    DataRow(DataRow),
    ErrorResponse(ErrorResponse),
    EmptyQueryResponse(EmptyQueryResponse),
    FunctionCallResponse(FunctionCallResponse),
    NegotiateProtocolVersion(NegotiateProtocolVersion),
    NoData(NoData),
    NoticeResponse(NoticeResponse),
    NotificationResponse(NotificationResponse),
    ParameterDescription(ParameterDescription),
    ParameterStatus(ParameterStatus),
    ParseComplete(ParseComplete),
    PortalSuspended(PortalSuspended),
    ReadyForQuery(ReadyForQuery),
    RowDescription(RowDescription),
}

macro_rules! match_backend {
    ($($name:ident,)*) => {
        impl BackendMessage {
            pub const fn msgtype(&self) -> u8 {
                match self {
                    $(Self::$name(_) => $name::MSGTYPE,)*
                }
            }

            /// Returns `"Unknown"` for an unrecognized message type.
            pub const fn message_name(msgtype: u8) -> &'static str {
                match msgtype {
                    $($name::MSGTYPE => stringify!($name),)*
                    _ => "Unknown",
                }
            }
        }
        impl BackendProtocol for BackendMessage {
            fn decode(msgtype: u8, body: Bytes) -> Result<Self, ProtocolError> {
                let message = match msgtype {
                    $($name::MSGTYPE => Self::$name(<$name as BackendProtocol>::decode(msgtype, body)?),)*
                    _ => return Err(ProtocolError::unknown(msgtype)),
                };
                Ok(message)
            }
        }
    };
}

match_backend! {
    Authentication,
    BackendKeyData,
    BindComplete,
    CloseComplete,
    CommandComplete,
    CopyData,
    CopyDone,
    CopyInResponse,
    CopyOutResponse,
    CopyBothResponse,
    DataRow,
    ErrorResponse,
    EmptyQueryResponse,
    FunctionCallResponse,
    NegotiateProtocolVersion,
    NoData,
    NoticeResponse,
    NotificationResponse,
    ParameterDescription,
    ParameterStatus,
    ParseComplete,
    PortalSuspended,
    ReadyForQuery,
    RowDescription,
}

macro_rules! assert_msgtype {
    ($typ:ident) => {
        if Self::MSGTYPE != $typ {
            return Err(ProtocolError::unexpected(Self::MSGTYPE, $typ));
        }
    };
}

macro_rules! msgtype {
    ($me:ident, $ty:literal) => {
        impl $me {
            #[doc = concat!("`", stringify!($ty), "`")]
            pub const MSGTYPE: u8 = $ty;
        }
    };
}

/// Identifies the message as an authentication request.
#[derive(Debug)]
pub enum Authentication {
    Ok,
    KerberosV5,
    CleartextPassword,
    MD5Password { salt: [u8; 4] },
    GSS,
    GSSContinue { data: Bytes },
    SSPI,
    SASL { mechanisms: Bytes },
    SASLContinue { data: Bytes },
    SASLFinal { data: Bytes },
}

msgtype!(Authentication, b'R');

impl BackendProtocol for Authentication {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(msgtype);
        let code = body.get_u32();
        let auth = match code {
            0 => Self::Ok,
            2 => Self::KerberosV5,
            3 => Self::CleartextPassword,
            5 => Self::MD5Password { salt: body.get_u32().to_be_bytes() },
            7 => Self::GSS,
            8 => Self::GSSContinue { data: body },
            9 => Self::SSPI,
            10 => Self::SASL { mechanisms: body },
            11 => Self::SASLContinue { data: body },
            12 => Self::SASLFinal { data: body },
            other => return Err(ProtocolError::unknown_auth(other)),
        };
        Ok(auth)
    }
}

/// Identifies the message as cancellation key data.
pub struct BackendKeyData {
    pub process_id: u32,
    pub secret_key: u32,
}

msgtype!(BackendKeyData, b'K');

impl BackendProtocol for BackendKeyData {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(msgtype);
        Ok(Self { process_id: body.get_u32(), secret_key: body.get_u32() })
    }
}

/// Identifies the message as a run-time parameter status report.
#[derive(Debug)]
pub struct ParameterStatus {
    pub name: ByteStr,
    pub value: ByteStr,
}

msgtype!(ParameterStatus, b'S');

impl BackendProtocol for ParameterStatus {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(msgtype);
        Ok(Self { name: body.get_nul_bytestr()?, value: body.get_nul_bytestr()? })
    }
}

/// Identifies the message as a notice. Non-fatal by definition.
#[derive(Debug)]
pub struct NoticeResponse {
    pub error: DatabaseError,
}

msgtype!(NoticeResponse, b'N');

impl BackendProtocol for NoticeResponse {
    fn decode(msgtype: u8, body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(msgtype);
        Ok(Self { error: DatabaseError::parse(body)? })
    }
}

/// Identifies the message as an error. Ends the current query/transaction.
#[derive(Debug)]
pub struct ErrorResponse {
    pub error: DatabaseError,
}

msgtype!(ErrorResponse, b'E');

impl BackendProtocol for ErrorResponse {
    fn decode(msgtype: u8, body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(msgtype);
        Ok(Self { error: DatabaseError::parse(body)? })
    }
}

/// Identifies the message as a row description.
pub struct RowDescription {
    /// Raw undissected body; see [`crate::row::Fields`] for the parsed view.
    pub body: Bytes,
}

msgtype!(RowDescription, b'T');

impl BackendProtocol for RowDescription {
    fn decode(msgtype: u8, body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(msgtype);
        Ok(Self { body })
    }
}

/// Identifies the message as a data row.
pub struct DataRow {
    /// Raw row buffer; see [`crate::row::Row`] for the parsed view.
    pub body: Bytes,
}

msgtype!(DataRow, b'D');

impl BackendProtocol for DataRow {
    fn decode(msgtype: u8, body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(msgtype);
        Ok(Self { body })
    }
}

/// Identifies the message as a command-completed response.
#[derive(Debug)]
pub struct CommandComplete {
    pub tag: ByteStr,
}

msgtype!(CommandComplete, b'C');

impl BackendProtocol for CommandComplete {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(msgtype);
        Ok(Self { tag: body.get_nul_bytestr()? })
    }
}

/// Identifies the message as a protocol version negotiation message.
#[derive(Debug)]
pub struct NegotiateProtocolVersion {
    pub minor: u32,
    pub len: u32,
    pub opt_names: Bytes,
}

msgtype!(NegotiateProtocolVersion, b'v');

impl BackendProtocol for NegotiateProtocolVersion {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(msgtype);
        Ok(Self { minor: body.get_u32(), len: body.get_u32(), opt_names: body })
    }
}

/// Identifies the message as a parameter description.
#[derive(Debug)]
pub struct ParameterDescription {
    pub param_len: u16,
    pub oids: Bytes,
}

msgtype!(ParameterDescription, b't');

impl BackendProtocol for ParameterDescription {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(msgtype);
        Ok(Self { param_len: body.get_u16(), oids: body })
    }
}

impl ParameterDescription {
    /// Iterate the parameter type Oids.
    pub fn oids(&self) -> impl Iterator<Item = super::Oid> + '_ {
        let mut buf = self.oids.clone();
        (0..self.param_len).map(move |_| buf.get_u32())
    }
}

/// Sent whenever the backend is ready for a new query cycle.
pub struct ReadyForQuery {
    /// `'I'` idle, `'T'` in transaction, `'E'` in failed transaction.
    pub tx_status: u8,
}

msgtype!(ReadyForQuery, b'Z');

impl BackendProtocol for ReadyForQuery {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(msgtype);
        Ok(Self { tx_status: body.get_u8() })
    }
}

/// Identifies the message as asynchronous notification (`NOTIFY`/`LISTEN`).
#[derive(Debug)]
pub struct NotificationResponse {
    pub process_id: u32,
    pub channel: ByteStr,
    pub payload: ByteStr,
}

msgtype!(NotificationResponse, b'A');

impl BackendProtocol for NotificationResponse {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(msgtype);
        Ok(Self {
            process_id: body.get_u32(),
            channel: body.get_nul_bytestr()?,
            payload: body.get_nul_bytestr()?,
        })
    }
}

/// Identifies the message as copy data, in either direction.
pub struct CopyData {
    pub data: Bytes,
}

msgtype!(CopyData, b'd');

impl BackendProtocol for CopyData {
    fn decode(msgtype: u8, body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(msgtype);
        Ok(Self { data: body })
    }
}

/// Identifies the message as the result of a function call.
pub struct FunctionCallResponse {
    pub value: Option<Bytes>,
}

msgtype!(FunctionCallResponse, b'V');

impl BackendProtocol for FunctionCallResponse {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(msgtype);
        let len = body.get_i32();
        let value = if len < 0 { None } else { Some(body.split_to(len as usize)) };
        Ok(Self { value })
    }
}

macro_rules! copy_response {
    ($name:ident, $ty:literal) => {
        #[derive(Debug)]
        pub struct $name {
            pub overall_format: u8,
            pub column_formats: Vec<u16>,
        }

        msgtype!($name, $ty);

        impl BackendProtocol for $name {
            fn decode(msgtype: u8, mut body: Bytes) -> Result<Self, ProtocolError> {
                assert_msgtype!(msgtype);
                let overall_format = body.get_u8();
                let n = body.get_u16();
                let column_formats = (0..n).map(|_| body.get_u16()).collect();
                Ok(Self { overall_format, column_formats })
            }
        }
    };
}

copy_response!(CopyInResponse, b'G');
copy_response!(CopyOutResponse, b'H');
copy_response!(CopyBothResponse, b'W');

macro_rules! unit_msg {
    ($(
        $(#[$doc:meta])* struct $name:ident, $ty:literal;
    )*) => {$(
        $(#[$doc])*
        #[derive(Debug)]
        pub struct $name;

        msgtype!($name, $ty);

        impl BackendProtocol for $name {
            fn decode(msgtype: u8, _: Bytes) -> Result<Self, ProtocolError> {
                if $name::MSGTYPE != msgtype {
                    return Err(ProtocolError::unexpected(Self::MSGTYPE, msgtype));
                }
                Ok(Self)
            }
        }
    )*};
}

unit_msg! {
    /// Identifies the message as a Bind-complete indicator.
    struct BindComplete, b'2';

    /// Identifies the message as a Close-complete indicator.
    struct CloseComplete, b'3';

    /// Substitutes for CommandComplete when the query string was empty.
    struct EmptyQueryResponse, b'I';

    /// Identifies the message as a no-data indicator.
    struct NoData, b'n';

    /// Identifies the message as a Parse-complete indicator.
    struct ParseComplete, b'1';

    /// Sent only if an Execute message's row-count limit was reached.
    struct PortalSuspended, b's';

    /// Identifies the message as a Copy-done indicator.
    struct CopyDone, b'c';
}

// custom Debug impls for message kinds carrying secrets or opaque binary payloads.

impl std::fmt::Debug for BackendKeyData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendKeyData")
            .field("process_id", &self.process_id)
            .field("secret_key", &"<REDACTED>")
            .finish()
    }
}

impl std::fmt::Debug for ReadyForQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadyForQuery")
            .field("tx_status", &match self.tx_status {
                b'I' => "Idle(I)",
                b'T' => "Transaction(T)",
                b'E' => "FailedTx(E)",
                _ => "unknown",
            })
            .finish()
    }
}

impl std::fmt::Debug for RowDescription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RowDescription").field("body", &"<BINARY>").finish()
    }
}

impl std::fmt::Debug for DataRow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataRow").field("body", &"<BINARY>").finish()
    }
}

impl std::fmt::Debug for CopyData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CopyData").field("data", &"<BINARY>").finish()
    }
}

impl std::fmt::Debug for FunctionCallResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionCallResponse").field("value", &"<BINARY>").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::{BufMut, BytesMut};

    #[test]
    fn decode_ready_for_query() {
        let mut buf = BytesMut::new();
        buf.put_u8(b'T');
        let msg = ReadyForQuery::decode(b'Z', buf.freeze()).unwrap();
        assert_eq!(msg.tx_status, b'T');
    }

    #[test]
    fn decode_authentication_sasl() {
        let mut buf = BytesMut::new();
        buf.put_u32(10);
        buf.put_slice(b"SCRAM-SHA-256\0\0");
        let msg = Authentication::decode(b'R', buf.freeze()).unwrap();
        assert!(matches!(msg, Authentication::SASL { .. }));
    }

    #[test]
    fn unknown_authentication_is_an_error_not_a_panic() {
        let mut buf = BytesMut::new();
        buf.put_u32(999);
        let err = Authentication::decode(b'R', buf.freeze()).unwrap_err();
        assert!(matches!(err, ProtocolError::UnknownAuth(999)));
    }

    #[test]
    fn decode_error_response_fields() {
        let mut buf = BytesMut::new();
        buf.put_u8(b'C');
        buf.put_slice(b"42P01\0");
        buf.put_u8(b'M');
        buf.put_slice(b"relation does not exist\0");
        buf.put_u8(0);
        let msg = ErrorResponse::decode(b'E', buf.freeze()).unwrap();
        assert_eq!(msg.error.code(), "42P01");
        assert_eq!(msg.error.message(), "relation does not exist");
    }
}
