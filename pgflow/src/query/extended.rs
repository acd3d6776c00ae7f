//! Extended Query protocol: Parse/Bind/Describe/Execute/Sync pipelining,
//! `prepareThreshold`-gated statement caching, and portal row streaming (§4.4).
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use crate::encode::Encoded;
use crate::error::{Error, Result};
use crate::ext::UsizeExt;
use crate::postgres::{BackendMessage, Oid, PgFormat, SqlStateClass, backend, frontend};
use crate::row::{Row, RowDescription};
use crate::sql::Sql;
use crate::statement::{PortalName, StatementName};
use crate::transport::{PgTransport, PgTransportExt};

use super::cache::{hash_sql, rows_affected};
use super::simple::simple_query;

pub(super) struct Prepared {
    pub(super) stmt_name: StatementName,
}

/// Parses (if necessary) the statement, deciding between a fresh unnamed
/// statement and a cached named one based on `prepareThreshold`:
/// `threshold <= 0` never caches, otherwise the Nth execution of the same
/// SQL text upgrades it to a named, server-side cached statement.
pub(super) async fn prepare_statement<IO: PgTransport>(
    io: &mut IO,
    sql: &dyn Sql,
    param_oids: &[Oid],
    prepare_threshold: i32,
) -> Result<Prepared> {
    let text = sql.sql();

    if !sql.persistent() || prepare_threshold <= 0 {
        io.send(frontend::Parse {
            prepare_name: "",
            sql: text,
            oids_len: param_oids.len().to_u16(),
            oids: param_oids.iter().copied(),
        });
        io.send(frontend::Flush);
        io.flush().await?;
        io.recv::<backend::ParseComplete>().await?;
        return Ok(Prepared { stmt_name: StatementName::unnamed() });
    }

    let key = hash_sql(text);
    if let Some(stmt_name) = io.get_stmt(key) {
        return Ok(Prepared { stmt_name });
    }

    let seen = io.note_execution(key);
    if seen < prepare_threshold as u32 {
        io.send(frontend::Parse {
            prepare_name: "",
            sql: text,
            oids_len: param_oids.len().to_u16(),
            oids: param_oids.iter().copied(),
        });
        io.send(frontend::Flush);
        io.flush().await?;
        io.recv::<backend::ParseComplete>().await?;
        return Ok(Prepared { stmt_name: StatementName::unnamed() });
    }

    let stmt_name = StatementName::next();
    io.send(frontend::Parse {
        prepare_name: stmt_name.as_str(),
        sql: text,
        oids_len: param_oids.len().to_u16(),
        oids: param_oids.iter().copied(),
    });
    io.send(frontend::Flush);
    io.flush().await?;
    io.recv::<backend::ParseComplete>().await?;
    io.add_stmt(key, stmt_name);
    Ok(Prepared { stmt_name })
}

/// Caps how many rows a single `Execute` may return (§4.4 "Server cursor
/// streaming").
#[derive(Debug, Clone, Copy)]
pub enum RowLimit {
    /// `fetchSize=0`: run the portal to completion; `Sync` follows the
    /// first `Execute` immediately since no continuation is possible.
    Unbounded,
    /// JDBC-style fetch size: `Execute(portal, n)` may reply
    /// `PortalSuspended` instead of `CommandComplete`, in which case the
    /// same portal is re-`Execute`d for the next chunk. `Sync` is deferred
    /// until a true `CommandComplete` arrives.
    Chunked(u32),
    /// A hard cap on the whole result set (e.g. [`super::Query::fetch_optional`]'s
    /// `1`): wire-identical to `Chunked`, but a `PortalSuspended` here just
    /// ends the stream rather than continuing it.
    Capped(u32),
}

impl RowLimit {
    fn max_row(self) -> u32 {
        match self {
            RowLimit::Unbounded => 0,
            RowLimit::Chunked(n) | RowLimit::Capped(n) => n,
        }
    }
}

async fn bind_execute<IO: PgTransport>(
    io: &mut IO,
    prepared: &Prepared,
    portal_name: PortalName,
    params: Vec<Encoded<'_>>,
    row_limit: RowLimit,
) -> Result<()> {
    let params_size_hint = params.iter().map(|p| 4 + p.value.remaining().to_u32()).sum();
    let params_len = params.len().to_u16();

    io.send(frontend::Bind {
        portal_name: portal_name.as_str(),
        stmt_name: prepared.stmt_name.as_str(),
        param_formats_len: 1,
        param_formats: [PgFormat::Binary],
        params_len,
        params_size_hint,
        params: params.into_iter().map(|p| p.value),
        result_formats_len: 1,
        result_formats: [PgFormat::Binary],
    });
    io.send(frontend::Describe { kind: b'P', name: portal_name.as_str() });
    io.send(frontend::Execute { portal_name: portal_name.as_str(), max_row: row_limit.max_row() });

    if matches!(row_limit, RowLimit::Chunked(_)) {
        // Keep the portal open: the caller may need another Execute before
        // this pipeline's Sync boundary is reached.
        io.send(frontend::Flush);
    } else {
        io.send(frontend::Sync);
        io.ready_request();
    }
    io.flush().await?;
    Ok(())
}

pub(super) fn unexpected(found: &BackendMessage) -> Error {
    crate::postgres::ProtocolError::unexpected_phase(0, found.msgtype(), "executing a portal").into()
}

struct OpenedPortal {
    fields: RowDescription,
    portal_name: PortalName,
    chunk_size: Option<u32>,
}

/// Prepares (or reuses) `sql`, binds `params` to an unnamed portal, and
/// reads through to the portal's `RowDescription`/`NoData`.
async fn open_portal<IO: PgTransport>(
    io: &mut IO,
    sql: &dyn Sql,
    params: Vec<Encoded<'_>>,
    prepare_threshold: i32,
    row_limit: RowLimit,
) -> Result<OpenedPortal> {
    let param_oids: Vec<Oid> = params.iter().map(|p| p.oid).collect();
    let prepared = prepare_statement(io, sql, &param_oids, prepare_threshold).await?;
    let portal_name = PortalName::unnamed();
    bind_execute(io, &prepared, portal_name, params, row_limit).await?;

    io.recv::<backend::BindComplete>().await?;

    let fields = match io.recv::<BackendMessage>().await? {
        BackendMessage::RowDescription(rd) => RowDescription::parse(rd)?,
        BackendMessage::NoData(_) => RowDescription::default(),
        other => return Err(unexpected(&other)),
    };

    let chunk_size = match row_limit {
        RowLimit::Chunked(n) => Some(n),
        RowLimit::Unbounded | RowLimit::Capped(_) => None,
    };

    Ok(OpenedPortal { fields, portal_name, chunk_size })
}

/// Forgets every prepared statement, client- and server-side, after a
/// cached-plan-invalidation error: the server's own cached plans for every
/// named statement on this connection are suspect, not just the one that
/// just failed, so `DEALLOCATE ALL` clears all of them rather than just the
/// one by name.
pub(super) async fn recover_stale_plans<IO: PgTransport>(io: &mut IO) -> Result<()> {
    io.clear_stmts();
    simple_query(io, "DEALLOCATE ALL").await?;
    Ok(())
}

enum Phase {
    Rows,
    ReadyForQuery,
    Done,
}

/// A streaming result set from one portal `Execute`.
///
/// Borrows the connection for its lifetime: nothing else can be sent on it
/// until the stream is exhausted (or dropped, at the cost of the caller
/// having to drain/resync on the next operation).
pub struct RowStream<'io, IO> {
    io: &'io mut IO,
    fields: RowDescription,
    phase: Phase,
    last_command_tag: Option<String>,
    portal_name: PortalName,
    /// `Some(fetch_size)` while in `Chunked` mode: drives the re-`Execute`
    /// on `PortalSuspended` and the deferred `Sync` on `CommandComplete`.
    chunk_size: Option<u32>,
}

impl<'io, IO: PgTransport> RowStream<'io, IO> {
    /// Opens a portal over `sql`, retrying once if the server reports the
    /// plan it had cached for this statement is now invalid (typically a
    /// concurrent DDL change) — the one case where simply re-running the
    /// same `Bind`/`Execute` would just fail the same way again.
    pub(crate) async fn open(
        io: &'io mut IO,
        sql: &dyn Sql,
        params: Vec<Encoded<'_>>,
        prepare_threshold: i32,
        row_limit: RowLimit,
    ) -> Result<Self> {
        let retry_params = params.clone();
        let opened = match open_portal(io, sql, params, prepare_threshold, row_limit).await {
            Err(err) if err.sqlstate_class() == Some(SqlStateClass::CachedPlanInvalidation) => {
                recover_stale_plans(io).await?;
                open_portal(io, sql, retry_params, prepare_threshold, row_limit).await?
            }
            other => other?,
        };

        Ok(Self {
            io,
            fields: opened.fields,
            phase: Phase::Rows,
            last_command_tag: None,
            portal_name: opened.portal_name,
            chunk_size: opened.chunk_size,
        })
    }

    /// Rows affected/returned by the most recently completed command, once
    /// the stream has run to completion.
    pub(crate) fn rows_affected(&self) -> u64 {
        self.last_command_tag.as_deref().map(rows_affected).unwrap_or(0)
    }

    fn poll_next_row(&mut self, cx: &mut Context) -> Poll<Option<Result<Row>>> {
        loop {
            match self.phase {
                Phase::Rows => match ready!(self.io.poll_recv::<BackendMessage>(cx)?) {
                    BackendMessage::DataRow(dr) => {
                        return Poll::Ready(Some(Ok(Row::new(self.fields.clone(), dr))));
                    }
                    BackendMessage::CommandComplete(cmd) => {
                        self.last_command_tag = Some(cmd.tag.to_string());
                        if self.chunk_size.is_some() {
                            // Chunked mode deferred Sync until the portal
                            // actually ran to completion.
                            self.io.send(frontend::Sync);
                            self.io.ready_request();
                        }
                        self.phase = Phase::ReadyForQuery;
                    }
                    BackendMessage::PortalSuspended(_) => match self.chunk_size {
                        Some(fetch_size) => {
                            self.io.send(frontend::Execute {
                                portal_name: self.portal_name.as_str(),
                                max_row: fetch_size,
                            });
                            self.io.send(frontend::Flush);
                            // Stays in Phase::Rows; the next poll_recv flushes
                            // the re-Execute before waiting on its reply.
                        }
                        None => self.phase = Phase::ReadyForQuery,
                    },
                    BackendMessage::EmptyQueryResponse(_) => {
                        self.phase = Phase::Done;
                        return Poll::Ready(Some(Err(Error::empty_query())));
                    }
                    other => {
                        self.phase = Phase::Done;
                        return Poll::Ready(Some(Err(unexpected(&other))));
                    }
                },
                Phase::ReadyForQuery => {
                    ready!(self.io.poll_recv::<backend::ReadyForQuery>(cx)?);
                    self.phase = Phase::Done;
                    return Poll::Ready(None);
                }
                Phase::Done => return Poll::Ready(None),
            }
        }
    }

    /// `.await`-able single-step, used by the collecting adapters in
    /// [`super::builder`] so they don't need a `futures_core::Stream` bound.
    pub(crate) async fn try_next(&mut self) -> Result<Option<Row>> {
        std::future::poll_fn(|cx| self.poll_next_row(cx)).await.transpose()
    }
}

impl<IO> Unpin for RowStream<'_, IO> {}

impl<IO: PgTransport> futures_core::Stream for RowStream<'_, IO> {
    type Item = Result<Row>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().poll_next_row(cx)
    }
}
