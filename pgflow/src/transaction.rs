//! The [`Transaction`] RAII guard (§4.5).
use std::io;
use std::task::{Context, Poll};

use crate::config::{Autosave, ReadOnlyMode};
use crate::error::Result;
use crate::postgres::frontend::FrontendProtocol;
use crate::postgres::{BackendProtocol, backend, frontend};
use crate::query::{Query, QueryOptions, RowResult, RowStream};
use crate::row::FromRow;
use crate::session::{ReadOnlyScope, SessionState, read_only_statement, wants_savepoint};
use crate::sql::Sql;
use crate::statement::StatementName;
use crate::transport::{PgTransport, PgTransportExt};

/// A transaction scope opened with `BEGIN`.
///
/// Commit explicitly with [`Transaction::commit`]; dropping without
/// committing queues a `ROLLBACK` on the underlying transport (it can only
/// be queued, not awaited, from a synchronous `Drop`) so the next
/// asynchronous operation on that connection sends it.
pub struct Transaction<IO: PgTransport> {
    io: IO,
    committed: bool,
    autosave: Autosave,
    savepoint_depth: u32,
    opts: QueryOptions,
    /// Tracked from each statement's outcome rather than re-read off the
    /// wire (`Query`'s terminal methods already drain their own
    /// `ReadyForQuery`): `Ok` leaves it unchanged, `Err` without an autosave
    /// recovery moves it to `InFailedTransaction`, and a successful
    /// `ROLLBACK TO SAVEPOINT` moves it back to `InTransaction`.
    state: SessionState,
}

impl<IO: PgTransport> Transaction<IO> {
    pub(crate) fn new(io: IO, autosave: Autosave, opts: QueryOptions) -> Self {
        Self { io, committed: false, autosave, savepoint_depth: 0, opts, state: SessionState::InTransaction }
    }

    /// Opens a transaction, applying `readOnlyMode=transaction`'s
    /// `SET TRANSACTION READ ONLY` if configured.
    pub(crate) async fn begin(
        mut io: IO,
        autosave: Autosave,
        read_only: ReadOnlyMode,
        opts: QueryOptions,
    ) -> Result<Self> {
        io.send(frontend::Query { sql: "BEGIN" });
        io.flush().await?;
        io.recv::<backend::CommandComplete>().await?;
        let ready = io.recv::<backend::ReadyForQuery>().await?;
        debug_assert_eq!(SessionState::from_ready_for_query(&ready), SessionState::InTransaction);

        if let Some(sql) = read_only_statement(read_only, ReadOnlyScope::Transaction) {
            io.send(frontend::Query { sql });
            io.flush().await?;
            io.recv::<backend::CommandComplete>().await?;
            io.recv::<backend::ReadyForQuery>().await?;
        }

        Ok(Self::new(io, autosave, opts))
    }

    /// Opens a `SAVEPOINT` ahead of `sql` if [`wants_savepoint`] says this
    /// statement needs one under the current autosave policy.
    async fn autosave_guard(&mut self, sql: &str) -> Result<Option<u32>> {
        if wants_savepoint(self.autosave, self.state, sql) {
            Ok(Some(self.savepoint().await?))
        } else {
            Ok(None)
        }
    }

    /// Closes out a statement guarded by [`Transaction::autosave_guard`]:
    /// releases the savepoint on success, rolls back to it on failure (which
    /// recovers the transaction, so `self.state` goes back to
    /// `InTransaction`), and otherwise just records a failed transaction so
    /// later statements know not to run without first rolling back or
    /// dropping.
    async fn autosave_finish<T>(&mut self, guard: Option<u32>, result: Result<T>) -> Result<T> {
        match (guard, result) {
            (Some(depth), Ok(value)) => {
                self.release(depth).await?;
                Ok(value)
            }
            (Some(depth), Err(err)) => {
                self.rollback_to(depth).await?;
                self.state = SessionState::InTransaction;
                Err(err)
            }
            (None, Ok(value)) => Ok(value),
            (None, Err(err)) => {
                self.state = SessionState::InFailedTransaction;
                Err(err)
            }
        }
    }

    /// Runs a statement for its side effects, wrapped in autosave's
    /// `SAVEPOINT`/`RELEASE`/`ROLLBACK TO` recovery per [`Autosave`]'s policy.
    pub async fn query<SQL: Sql>(&mut self, query: Query<'_, SQL>) -> Result<RowResult> {
        let sql = query.sql_text().to_string();
        let guard = self.autosave_guard(&sql).await?;
        let result = query.execute(&mut self.io, self.opts).await;
        self.autosave_finish(guard, result).await
    }

    /// Collects every row, wrapped in autosave's recovery per [`Autosave`]'s policy.
    pub async fn fetch_all<SQL: Sql, R: FromRow>(&mut self, query: Query<'_, SQL>) -> Result<Vec<R>> {
        let sql = query.sql_text().to_string();
        let guard = self.autosave_guard(&sql).await?;
        let result = query.fetch_all(&mut self.io, self.opts).await;
        self.autosave_finish(guard, result).await
    }

    /// Like [`Transaction::fetch_optional`] but fails if the result set is empty.
    pub async fn fetch_one<SQL: Sql, R: FromRow>(&mut self, query: Query<'_, SQL>) -> Result<R> {
        let sql = query.sql_text().to_string();
        let guard = self.autosave_guard(&sql).await?;
        let result = query.fetch_one(&mut self.io, self.opts).await;
        self.autosave_finish(guard, result).await
    }

    /// Collects at most one row, wrapped in autosave's recovery per [`Autosave`]'s policy.
    pub async fn fetch_optional<SQL: Sql, R: FromRow>(&mut self, query: Query<'_, SQL>) -> Result<Option<R>> {
        let sql = query.sql_text().to_string();
        let guard = self.autosave_guard(&sql).await?;
        let result = query.fetch_optional(&mut self.io, self.opts).await;
        self.autosave_finish(guard, result).await
    }

    /// Streams rows lazily instead of collecting them.
    ///
    /// Not wrapped in autosave: a savepoint's `RELEASE`/`ROLLBACK TO` can
    /// only be decided once the statement is known to have succeeded or
    /// failed, but a lazily-consumed stream hands that decision to the
    /// caller, arbitrarily far in the future. Autosave-protected statements
    /// should go through [`Transaction::fetch_all`] instead.
    pub async fn fetch<SQL: Sql>(&mut self, query: Query<'_, SQL>) -> Result<RowStream<'_, IO>> {
        query.fetch(&mut self.io, self.opts).await
    }

    /// Issues a `SAVEPOINT`, returning a depth token [`release`][Self::release]
    /// or [`rollback_to`][Self::rollback_to] consumes to keep nesting
    /// balanced even if the caller drops it early.
    pub async fn savepoint(&mut self) -> Result<u32> {
        self.savepoint_depth += 1;
        let name = format!("pgflow_sp_{}", self.savepoint_depth);
        self.io.send(frontend::Query { sql: &format!("SAVEPOINT {name}") });
        self.io.flush().await?;
        self.io.recv::<backend::CommandComplete>().await?;
        self.io.recv::<backend::ReadyForQuery>().await?;
        Ok(self.savepoint_depth)
    }

    pub async fn release(&mut self, depth: u32) -> Result<()> {
        let name = format!("pgflow_sp_{depth}");
        self.io.send(frontend::Query { sql: &format!("RELEASE SAVEPOINT {name}") });
        self.io.flush().await?;
        self.io.recv::<backend::CommandComplete>().await?;
        self.io.recv::<backend::ReadyForQuery>().await?;
        Ok(())
    }

    pub async fn rollback_to(&mut self, depth: u32) -> Result<()> {
        let name = format!("pgflow_sp_{depth}");
        self.io.send(frontend::Query { sql: &format!("ROLLBACK TO SAVEPOINT {name}") });
        self.io.flush().await?;
        self.io.recv::<backend::CommandComplete>().await?;
        self.io.recv::<backend::ReadyForQuery>().await?;
        Ok(())
    }

    pub fn autosave(&self) -> Autosave {
        self.autosave
    }

    pub async fn commit(mut self) -> Result<()> {
        self.io.send(frontend::Query { sql: "COMMIT" });
        self.io.flush().await?;
        self.io.recv::<backend::CommandComplete>().await?;
        let ready = self.io.recv::<backend::ReadyForQuery>().await?;
        debug_assert_eq!(SessionState::from_ready_for_query(&ready), SessionState::Idle);
        self.committed = true;
        Ok(())
    }

    pub async fn rollback(mut self) -> Result<()> {
        self.io.send(frontend::Query { sql: "ROLLBACK" });
        self.io.flush().await?;
        self.io.recv::<backend::CommandComplete>().await?;
        self.io.recv::<backend::ReadyForQuery>().await?;
        self.committed = true;
        Ok(())
    }

}

impl<IO: PgTransport> Drop for Transaction<IO> {
    fn drop(&mut self) {
        if !self.committed {
            self.io.send(frontend::Query { sql: "ROLLBACK" });
            self.io.ready_request();
        }
    }
}

impl<IO: PgTransport> PgTransport for Transaction<IO> {
    fn poll_flush(&mut self, cx: &mut Context) -> Poll<io::Result<()>> {
        IO::poll_flush(&mut self.io, cx)
    }

    fn poll_recv<B: BackendProtocol>(&mut self, cx: &mut Context) -> Poll<Result<B>> {
        IO::poll_recv(&mut self.io, cx)
    }

    fn ready_request(&mut self) {
        IO::ready_request(&mut self.io)
    }

    fn send<F: FrontendProtocol>(&mut self, message: F) {
        IO::send(&mut self.io, message)
    }

    fn send_startup(&mut self, startup: frontend::Startup) {
        IO::send_startup(&mut self.io, startup)
    }

    fn get_stmt(&mut self, sql: u64) -> Option<StatementName> {
        IO::get_stmt(&mut self.io, sql)
    }

    fn add_stmt(&mut self, sql: u64, id: StatementName) {
        IO::add_stmt(&mut self.io, sql, id)
    }

    fn note_execution(&mut self, sql: u64) -> u32 {
        IO::note_execution(&mut self.io, sql)
    }

    fn clear_stmts(&mut self) {
        IO::clear_stmts(&mut self.io)
    }
}
