use crate::postgres::{Oid, PgType, oid};
use crate::value::ValueRef;

/// Encode a rust value as a bound parameter.
///
/// Binary format is used for every built-in implementation; text-format
/// parameters are only produced by raw SQL composed outside the core.
pub trait Encode {
    fn pg_oid(&self) -> Oid;

    fn encode(&self) -> ValueRef<'_>;
}

impl<T: Encode + ?Sized> Encode for &T {
    fn pg_oid(&self) -> Oid {
        (**self).pg_oid()
    }

    fn encode(&self) -> ValueRef<'_> {
        (**self).encode()
    }
}

impl<T: Encode> Encode for Option<T> {
    fn pg_oid(&self) -> Oid {
        self.as_ref().map(Encode::pg_oid).unwrap_or(0)
    }

    fn encode(&self) -> ValueRef<'_> {
        match self {
            Some(v) => v.encode(),
            None => ValueRef::Null,
        }
    }
}

impl Encode for bool {
    fn pg_oid(&self) -> Oid {
        <bool as PgType>::OID
    }

    fn encode(&self) -> ValueRef<'_> {
        ValueRef::inline(&[*self as u8])
    }
}

macro_rules! encode_int {
    ($ty:ty) => {
        impl Encode for $ty {
            fn pg_oid(&self) -> Oid {
                <$ty as PgType>::OID
            }

            fn encode(&self) -> ValueRef<'_> {
                ValueRef::inline(&self.to_be_bytes())
            }
        }
    };
}

encode_int!(i16);
encode_int!(i32);
encode_int!(i64);
encode_int!(f32);
encode_int!(f64);

impl Encode for str {
    fn pg_oid(&self) -> Oid {
        oid::TEXT
    }

    fn encode(&self) -> ValueRef<'_> {
        ValueRef::borrowed(self.as_bytes())
    }
}

impl Encode for String {
    fn pg_oid(&self) -> Oid {
        oid::TEXT
    }

    fn encode(&self) -> ValueRef<'_> {
        ValueRef::borrowed(self.as_bytes())
    }
}

impl Encode for [u8] {
    fn pg_oid(&self) -> Oid {
        oid::BYTEA
    }

    fn encode(&self) -> ValueRef<'_> {
        ValueRef::borrowed(self)
    }
}

impl Encode for Vec<u8> {
    fn pg_oid(&self) -> Oid {
        oid::BYTEA
    }

    fn encode(&self) -> ValueRef<'_> {
        ValueRef::borrowed(self)
    }
}

/// A parameter value with a pre-computed format/oid/byte view, boxed so a
/// [`Query`](crate::query::Query) builder can hold heterogeneous bound
/// parameters in one `Vec`.
#[derive(Clone)]
pub struct Encoded<'val> {
    pub oid: Oid,
    pub value: ValueRef<'val>,
}

impl<'val> Encoded<'val> {
    pub fn new(value: &'val (impl Encode + 'val)) -> Self {
        Self { oid: value.pg_oid(), value: value.encode() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ext::BindParams;
    use bytes::Buf;

    #[test]
    fn encode_none_is_null() {
        let v: Option<i32> = None;
        assert_eq!(v.encode().size(), -1);
    }

    #[test]
    fn encode_i32_is_four_bytes_big_endian() {
        let mut v = 300i32.encode();
        let mut out = Vec::new();
        while v.has_remaining() {
            let chunk = v.chunk().to_vec();
            out.extend_from_slice(&chunk);
            v.advance(chunk.len());
        }
        assert_eq!(out, 300i32.to_be_bytes());
    }
}
