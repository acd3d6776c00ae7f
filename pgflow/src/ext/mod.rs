use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::common::ByteStr;
use crate::postgres::ProtocolError;

/// Integer signedness in postgres docs is awful.
pub trait UsizeExt {
    /// Length is usize in rust, while postgres sometimes wants u32.
    /// Panics on overflow instead of wrapping: messages this large would
    /// already be rejected by the server.
    fn to_u32(self) -> u32;
    /// Same as [`to_u32`][UsizeExt::to_u32] but for u16-sized fields.
    fn to_u16(self) -> u16;
}

impl UsizeExt for usize {
    fn to_u32(self) -> u32 {
        self.try_into().expect("message size too large for protocol")
    }

    fn to_u16(self) -> u16 {
        self.try_into().expect("message size too large for protocol")
    }
}

pub trait StrExt {
    /// postgres String must be nul terminated
    fn nul_string_len(&self) -> u32;
}

impl StrExt for str {
    fn nul_string_len(&self) -> u32 {
        self.len().to_u32() + 1 /* nul */
    }
}

pub trait BufMutExt {
    /// postgres String must be nul terminated
    fn put_nul_string(&mut self, string: &str);
}

impl<B: BufMut> BufMutExt for B {
    fn put_nul_string(&mut self, string: &str) {
        self.put(string.as_bytes());
        self.put_u8(b'\0');
    }
}

pub trait BytesExt {
    /// Split off everything up to (not including) the first nul byte, consuming the nul.
    ///
    /// Backend data is untrusted network input, so unlike the frontend-side
    /// invariant, a missing terminator is reported rather than panicked on.
    fn get_nul_bytes(&mut self) -> Result<Self, ProtocolError>
    where
        Self: Sized;

    fn get_nul_bytestr(&mut self) -> Result<ByteStr, ProtocolError>;
}

impl BytesExt for Bytes {
    fn get_nul_bytes(&mut self) -> Result<Self, ProtocolError> {
        let end = self
            .iter()
            .position(|e| *e == b'\0')
            .ok_or(ProtocolError::UnterminatedString)?;
        let me = self.split_to(end);
        Buf::advance(self, 1); // nul
        Ok(me)
    }

    fn get_nul_bytestr(&mut self) -> Result<ByteStr, ProtocolError> {
        Ok(ByteStr::from_utf8(self.get_nul_bytes()?)?)
    }
}

impl BytesExt for BytesMut {
    fn get_nul_bytes(&mut self) -> Result<Self, ProtocolError> {
        let end = self
            .iter()
            .position(|e| *e == b'\0')
            .ok_or(ProtocolError::UnterminatedString)?;
        let me = self.split_to(end);
        Buf::advance(self, 1); // nul
        Ok(me)
    }

    fn get_nul_bytestr(&mut self) -> Result<ByteStr, ProtocolError> {
        Ok(ByteStr::from_utf8(self.get_nul_bytes()?.freeze())?)
    }
}

pub trait BindParams: Buf {
    /// The length of the parameter value, in bytes (excluding itself).
    ///
    /// As a special case, -1 indicates a NULL parameter value, in which
    /// case no value bytes follow.
    fn size(&self) -> i32;
}
