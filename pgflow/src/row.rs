use std::sync::Arc;

use bytes::{Buf, Bytes};

use crate::decode::{Decode, DecodeError};
use crate::postgres::{self, Oid, PgFormat, ProtocolError, RowDescription as WireRowDescription};

/// A single result column's metadata, parsed from `RowDescription`.
#[derive(Debug, Clone)]
pub struct FieldDescription {
    pub name: Box<str>,
    pub table_oid: u32,
    pub column_id: i16,
    pub type_oid: Oid,
    pub type_size: i16,
    pub type_modifier: i32,
    pub format: PgFormat,
}

/// The parsed column layout of a portal, shared (by `Arc`) across every row
/// produced by that portal's `Execute`.
#[derive(Debug, Clone, Default)]
pub struct RowDescription {
    fields: Arc<[FieldDescription]>,
}

impl RowDescription {
    pub fn parse(msg: WireRowDescription) -> Result<Self, ProtocolError> {
        let mut body = msg.body;
        let n = body.get_u16();
        let mut fields = Vec::with_capacity(n as usize);
        for _ in 0..n {
            let name = take_nul_str(&mut body)?;
            let table_oid = body.get_u32();
            let column_id = body.get_i16();
            let type_oid = body.get_u32();
            let type_size = body.get_i16();
            let type_modifier = body.get_i32();
            let format = PgFormat::from_code(body.get_u16());
            fields.push(FieldDescription {
                name,
                table_oid,
                column_id,
                type_oid,
                type_size,
                type_modifier,
                format,
            });
        }
        Ok(Self { fields: fields.into() })
    }

    pub fn fields(&self) -> &[FieldDescription] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

// small local helper so RowDescription::parse doesn't need the crate's
// `BytesExt` (which returns a `ByteStr`, not an owned `Box<str>`).
fn take_nul_str(body: &mut Bytes) -> Result<Box<str>, ProtocolError> {
    let end = body.iter().position(|b| *b == 0).ok_or(ProtocolError::UnterminatedString)?;
    let slice = body.split_to(end);
    body.advance(1);
    Ok(std::str::from_utf8(&slice)?.into())
}

/// One row of a result set: column values paired with the shared field
/// descriptions of their portal.
pub struct Row {
    fields: RowDescription,
    body: Bytes,
}

impl Row {
    pub fn new(fields: RowDescription, msg: postgres::DataRow) -> Self {
        Self { fields, body: msg.body }
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn into_iter(self) -> RowIter {
        let mut body = self.body;
        let declared = body.get_u16();
        debug_assert_eq!(declared as usize, self.fields.len());
        RowIter { fields: self.fields, body, index: 0 }
    }
}

impl IntoIterator for Row {
    type Item = Result<Column, DecodeError>;
    type IntoIter = RowIter;

    fn into_iter(self) -> Self::IntoIter {
        Row::into_iter(self)
    }
}

/// Iterates a [`Row`]'s columns in wire order.
pub struct RowIter {
    fields: RowDescription,
    body: Bytes,
    index: usize,
}

impl RowIter {
    /// Advance and decode the next column, failing with
    /// [`DecodeError::IndexOutOfBounds`] once exhausted (used by the
    /// tuple-struct `FromRow` derive).
    pub fn try_next(&mut self) -> Result<Column, DecodeError> {
        self.next().ok_or(DecodeError::IndexOutOfBounds(self.index))?
    }
}

impl Iterator for RowIter {
    type Item = Result<Column, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        let field = self.fields.fields().get(self.index)?;
        self.index += 1;
        let len = self.body.get_i32();
        let value = if len < 0 { None } else { Some(self.body.split_to(len as usize)) };
        Some(Ok(Column { field: field.clone(), value }))
    }
}

/// One decoded-on-demand column value.
pub struct Column {
    field: FieldDescription,
    value: Option<Bytes>,
}

impl Column {
    pub fn name(&self) -> &str {
        &self.field.name
    }

    pub fn type_oid(&self) -> Oid {
        self.field.type_oid
    }

    pub fn is_null(&self) -> bool {
        self.value.is_none()
    }

    pub fn decode<T: Decode>(&self) -> Result<T, DecodeError> {
        T::decode(self.value.as_deref(), self.field.format, self.field.type_oid)
    }
}

/// Deserializes a whole [`Row`] into a rust type, derivable via
/// `#[derive(pgflow::FromRow)]`.
pub trait FromRow: Sized {
    fn from_row(row: Row) -> Result<Self, DecodeError>;
}
