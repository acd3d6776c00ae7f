//! Simple Query protocol path, used for parameter-less statements when
//! `preferQueryMode=simple` (§4.4.1).
//!
//! The simple protocol has no notion of bound parameters, so this is only
//! ever reached for queries [`super::builder::Query`] was never `.bind()`ed
//! on; anything with parameters always goes through [`super::extended`].
use crate::error::Result;
use crate::postgres::{BackendMessage, frontend};
use crate::row::{Row, RowDescription};
use crate::transport::{PgTransport, PgTransportExt};

use super::cache::rows_affected;

pub(crate) struct SimpleQueryResult {
    pub rows: Vec<Row>,
    pub rows_affected: u64,
}

/// A simple-query string may contain several `;`-separated statements; the
/// server answers each with its own `RowDescription`/`DataRow*`/
/// `CommandComplete`, and the whole batch with one final `ReadyForQuery`.
/// Rows from every statement in the string are concatenated.
pub(crate) async fn simple_query<IO: PgTransport>(io: &mut IO, sql: &str) -> Result<SimpleQueryResult> {
    io.send(frontend::Query { sql });
    io.flush().await?;

    let mut rows = Vec::new();
    let mut fields = RowDescription::default();
    let mut total_affected = 0;

    loop {
        match io.recv::<BackendMessage>().await? {
            BackendMessage::RowDescription(rd) => fields = RowDescription::parse(rd)?,
            BackendMessage::DataRow(dr) => rows.push(Row::new(fields.clone(), dr)),
            BackendMessage::CommandComplete(cmd) => total_affected += rows_affected(&cmd.tag),
            BackendMessage::EmptyQueryResponse(_) => {}
            BackendMessage::ReadyForQuery(_) => break,
            other => {
                return Err(crate::postgres::ProtocolError::unexpected_phase(0, other.msgtype(), "simple query").into());
            }
        }
    }

    Ok(SimpleQueryResult { rows, rows_affected: total_affected })
}
