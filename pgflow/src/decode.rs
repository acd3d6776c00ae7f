use thiserror::Error;

use crate::postgres::{Oid, PgFormat, oid};

/// Failure while turning a wire value into a rust type.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("column {0:?} not found in result")]
    ColumnNotFound(String),
    #[error("column index {0} out of bounds")]
    IndexOutOfBounds(usize),
    #[error("expected type oid {expected}, found {found}")]
    OidMismatch { expected: Oid, found: Oid },
    #[error("value was not valid utf8: {0}")]
    Utf8(#[from] std::str::Utf8Error),
    #[error("unexpected value length {0} for type")]
    InvalidLength(usize),
    #[error("unexpected NULL value")]
    UnexpectedNull,
}

/// Decode a single column value, given its transfer format and Oid.
///
/// Only a minimal scalar set is implemented in the core: integers, bool,
/// text, and bytea. Richer SQL types (date/time, numeric, json, arrays, ...)
/// are intentionally left to a higher-level adapter crate.
pub trait Decode: Sized {
    fn decode(value: Option<&[u8]>, format: PgFormat, type_oid: Oid) -> Result<Self, DecodeError>;
}

impl<T: Decode> Decode for Option<T> {
    fn decode(value: Option<&[u8]>, format: PgFormat, type_oid: Oid) -> Result<Self, DecodeError> {
        match value {
            None => Ok(None),
            Some(v) => T::decode(Some(v), format, type_oid).map(Some),
        }
    }
}

impl Decode for bool {
    fn decode(value: Option<&[u8]>, format: PgFormat, _: Oid) -> Result<Self, DecodeError> {
        let v = value.ok_or(DecodeError::UnexpectedNull)?;
        match format {
            PgFormat::Binary => Ok(v.first() == Some(&1)),
            PgFormat::Text => Ok(v == b"t"),
        }
    }
}

macro_rules! decode_int {
    ($ty:ty) => {
        impl Decode for $ty {
            fn decode(value: Option<&[u8]>, format: PgFormat, _: Oid) -> Result<Self, DecodeError> {
                let v = value.ok_or(DecodeError::UnexpectedNull)?;
                match format {
                    PgFormat::Binary => {
                        let bytes: [u8; size_of::<$ty>()] =
                            v.try_into().map_err(|_| DecodeError::InvalidLength(v.len()))?;
                        Ok(<$ty>::from_be_bytes(bytes))
                    }
                    PgFormat::Text => {
                        let s = std::str::from_utf8(v)?;
                        s.parse().map_err(|_| DecodeError::InvalidLength(v.len()))
                    }
                }
            }
        }
    };
}

decode_int!(i16);
decode_int!(i32);
decode_int!(i64);
decode_int!(f32);
decode_int!(f64);

impl Decode for String {
    fn decode(value: Option<&[u8]>, _: PgFormat, type_oid: Oid) -> Result<Self, DecodeError> {
        if type_oid != oid::TEXT && type_oid != oid::VARCHAR && type_oid != oid::CHAR {
            return Err(DecodeError::OidMismatch { expected: oid::TEXT, found: type_oid });
        }
        let v = value.ok_or(DecodeError::UnexpectedNull)?;
        Ok(std::str::from_utf8(v)?.to_owned())
    }
}

impl Decode for Vec<u8> {
    fn decode(value: Option<&[u8]>, _: PgFormat, _: Oid) -> Result<Self, DecodeError> {
        Ok(value.ok_or(DecodeError::UnexpectedNull)?.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_binary_i32() {
        let bytes = 42i32.to_be_bytes();
        let v = i32::decode(Some(&bytes), PgFormat::Binary, oid::INT4).unwrap();
        assert_eq!(v, 42);
    }

    #[test]
    fn decode_text_i32() {
        let v = i32::decode(Some(b"-7"), PgFormat::Text, oid::INT4).unwrap();
        assert_eq!(v, -7);
    }

    #[test]
    fn decode_null_into_option() {
        let v = Option::<i32>::decode(None, PgFormat::Binary, oid::INT4).unwrap();
        assert_eq!(v, None);
    }

    #[test]
    fn decode_null_into_non_option_errors() {
        let err = i32::decode(None, PgFormat::Binary, oid::INT4).unwrap_err();
        assert!(matches!(err, DecodeError::UnexpectedNull));
    }

    #[test]
    fn decode_string_rejects_non_text_oid() {
        let err = String::decode(Some(b"1"), PgFormat::Text, oid::INT4).unwrap_err();
        assert!(matches!(err, DecodeError::OidMismatch { .. }));
    }
}
