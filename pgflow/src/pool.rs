//! A pool of [`Connection`]s, handed out over an mpsc-actor worker task
//! (§A3).
mod config;
mod worker;

pub use config::PoolConfig;

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use crate::config::Config;
use crate::connection::Connection;
use crate::error::Result;
use crate::executor::Executor;
use crate::postgres::{BackendProtocol, FrontendProtocol};
use crate::query::{Query, RowResult, RowStream};
use crate::row::FromRow;
use crate::sql::Sql;
use crate::statement::StatementName;
use crate::transport::PgTransport;
use worker::{WorkerFuture, WorkerHandle};

/// A cheaply-cloneable handle to a pool of connections.
///
/// Cloning shares the same background worker task; dropping the last clone
/// (and the last [`PoolConnection`] checked out from it) ends the task.
#[derive(Clone)]
pub struct Pool {
    handle: WorkerHandle,
}

impl Pool {
    pub async fn connect(url: &str) -> Result<Self> {
        Self::connect_with(PoolConfig::new(Config::parse(url)?)).await
    }

    pub fn connect_lazy(url: &str) -> Result<Self> {
        Ok(Self::connect_lazy_with(PoolConfig::new(Config::parse(url)?)))
    }

    pub async fn connect_with(config: PoolConfig) -> Result<Self> {
        let pool = Self::connect_lazy_with(config);
        // surface a connect error eagerly instead of only on first acquire
        let conn = pool.acquire().await?;
        drop(conn);
        Ok(pool)
    }

    pub fn connect_lazy_with(config: PoolConfig) -> Self {
        let (handle, worker) = WorkerHandle::new(config);
        tokio::spawn(worker_task(worker));
        Self { handle }
    }

    pub async fn acquire(&self) -> Result<PoolConnection> {
        PoolConnect { pool: self.clone(), handle: self.handle.clone() }.await
    }
}

impl std::fmt::Debug for Pool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool").finish_non_exhaustive()
    }
}

async fn worker_task(worker: WorkerFuture) {
    worker.await
}

impl Executor for Pool {
    type Transport = PoolConnection;
    type Future = PoolConnect;

    fn connection(self) -> Self::Future {
        PoolConnect { handle: self.handle.clone(), pool: self }
    }
}

impl Executor for &Pool {
    type Transport = PoolConnection;
    type Future = PoolConnect;

    fn connection(self) -> Self::Future {
        PoolConnect { handle: self.handle.clone(), pool: self.clone() }
    }
}

impl Executor for &mut Pool {
    type Transport = PoolConnection;
    type Future = PoolConnect;

    fn connection(self) -> Self::Future {
        PoolConnect { handle: self.handle.clone(), pool: self.clone() }
    }
}

/// The [`Future`] returned by acquiring a connection from a [`Pool`].
pub struct PoolConnect {
    pool: Pool,
    handle: WorkerHandle,
}

impl Future for PoolConnect {
    type Output = Result<PoolConnection>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context) -> Poll<Self::Output> {
        let this = self.get_mut();
        this.handle.poll_acquire(cx).map_ok(|conn| PoolConnection { pool: this.pool.clone(), conn: Some(conn) })
    }
}

/// A connection checked out of a [`Pool`]. Released back to the pool's
/// worker on drop rather than closed.
pub struct PoolConnection {
    pool: Pool,
    conn: Option<Connection>,
}

impl PoolConnection {
    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    fn connection_mut(&mut self) -> &mut Connection {
        self.conn.as_mut().expect("connection taken before drop")
    }

    pub async fn query<SQL: Sql>(&mut self, query: Query<'_, SQL>) -> Result<RowResult> {
        self.connection_mut().query(query).await
    }

    pub async fn fetch_all<SQL: Sql, R: FromRow>(&mut self, query: Query<'_, SQL>) -> Result<Vec<R>> {
        self.connection_mut().fetch_all(query).await
    }

    pub async fn fetch_one<SQL: Sql, R: FromRow>(&mut self, query: Query<'_, SQL>) -> Result<R> {
        self.connection_mut().fetch_one(query).await
    }

    pub async fn fetch_optional<SQL: Sql, R: FromRow>(&mut self, query: Query<'_, SQL>) -> Result<Option<R>> {
        self.connection_mut().fetch_optional(query).await
    }

    pub async fn fetch<SQL: Sql>(&mut self, query: Query<'_, SQL>) -> Result<RowStream<'_, Connection>> {
        self.connection_mut().fetch(query).await
    }

    /// Ends an `autocommit=false` implicit transaction, if one is open.
    pub async fn commit(&mut self) -> Result<()> {
        self.connection_mut().commit().await
    }

    pub async fn rollback(&mut self) -> Result<()> {
        self.connection_mut().rollback().await
    }
}

impl Drop for PoolConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.handle.release(conn);
        }
    }
}

impl PgTransport for PoolConnection {
    fn poll_flush(&mut self, cx: &mut Context) -> Poll<io::Result<()>> {
        PgTransport::poll_flush(self.connection_mut(), cx)
    }

    fn poll_recv<B: BackendProtocol>(&mut self, cx: &mut Context) -> Poll<Result<B>> {
        PgTransport::poll_recv(self.connection_mut(), cx)
    }

    fn ready_request(&mut self) {
        PgTransport::ready_request(self.connection_mut())
    }

    fn send<F: FrontendProtocol>(&mut self, message: F) {
        PgTransport::send(self.connection_mut(), message)
    }

    fn send_startup(&mut self, startup: crate::postgres::frontend::Startup) {
        PgTransport::send_startup(self.connection_mut(), startup)
    }

    fn get_stmt(&mut self, sql: u64) -> Option<StatementName> {
        PgTransport::get_stmt(self.connection_mut(), sql)
    }

    fn add_stmt(&mut self, sql: u64, id: StatementName) {
        PgTransport::add_stmt(self.connection_mut(), sql, id)
    }

    fn note_execution(&mut self, sql: u64) -> u32 {
        PgTransport::note_execution(self.connection_mut(), sql)
    }

    fn clear_stmts(&mut self) {
        PgTransport::clear_stmts(self.connection_mut())
    }
}
