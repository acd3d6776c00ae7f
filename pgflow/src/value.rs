use bytes::{Buf, Bytes};

use crate::ext::BindParams;

const INLINE_LEN: usize = 15;

/// A bound parameter value, small-value-optimized to avoid allocating for
/// the common case (integers, short strings) while still supporting owned
/// or borrowed buffers of any size.
#[derive(Clone)]
pub enum ValueRef<'a> {
    /// NULL parameter; size() reports -1 and nothing is copied.
    Null,
    Slice(&'a [u8]),
    Inline { offset: u8, value: [u8; INLINE_LEN] },
    Bytes(Bytes),
}

impl<'a> ValueRef<'a> {
    pub fn borrowed(value: &'a [u8]) -> Self {
        Self::Slice(value)
    }

    /// Copies `value` into an inline buffer.
    ///
    /// # Panics
    ///
    /// Panics if `value.len() > 15`; callers must fall back to
    /// [`ValueRef::owned`] or [`ValueRef::borrowed`] for larger values.
    pub fn inline(value: &[u8]) -> Self {
        assert!(value.len() <= INLINE_LEN, "value too large for inline storage");
        let mut buf = [0u8; INLINE_LEN];
        buf[..value.len()].copy_from_slice(value);
        Self::Inline { offset: 0, value: buf }
    }

    pub fn owned(value: impl Into<Bytes>) -> Self {
        Self::Bytes(value.into())
    }

    /// Picks inline storage for small values and an owned buffer otherwise.
    pub fn copy_from_slice(value: &[u8]) -> Self {
        if value.len() <= INLINE_LEN {
            Self::inline(value)
        } else {
            Self::Bytes(Bytes::copy_from_slice(value))
        }
    }

    fn remaining_inline(offset: u8, value: &[u8; INLINE_LEN]) -> &[u8] {
        &value[offset as usize..]
    }
}

impl Buf for ValueRef<'_> {
    fn remaining(&self) -> usize {
        match self {
            Self::Null => 0,
            Self::Slice(s) => s.remaining(),
            Self::Inline { offset, value } => Self::remaining_inline(*offset, value).len(),
            Self::Bytes(b) => b.remaining(),
        }
    }

    fn chunk(&self) -> &[u8] {
        match self {
            Self::Null => &[],
            Self::Slice(s) => s.chunk(),
            Self::Inline { offset, value } => Self::remaining_inline(*offset, value),
            Self::Bytes(b) => b.chunk(),
        }
    }

    fn advance(&mut self, cnt: usize) {
        match self {
            Self::Null => assert_eq!(cnt, 0),
            Self::Slice(s) => Buf::advance(s, cnt),
            Self::Inline { offset, .. } => *offset += cnt as u8,
            Self::Bytes(b) => b.advance(cnt),
        }
    }
}

impl BindParams for ValueRef<'_> {
    fn size(&self) -> i32 {
        match self {
            Self::Null => -1,
            other => other.remaining() as i32,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inline_roundtrip() {
        let v = ValueRef::inline(b"42");
        assert_eq!(v.size(), 2);
        let mut v = v;
        let mut out = Vec::new();
        out.extend_from_slice(v.chunk());
        v.advance(out.len());
        assert_eq!(out, b"42");
    }

    #[test]
    fn null_has_negative_one_size() {
        assert_eq!(ValueRef::Null.size(), -1);
    }

    #[test]
    #[should_panic]
    fn inline_rejects_oversized_value() {
        ValueRef::inline(&[0u8; 16]);
    }
}
