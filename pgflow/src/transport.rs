//! The [`PgTransport`] trait: the buffered send/recv boundary every
//! connection-level operation is written against (§4.1, §4.4).
use std::io;
use std::task::{Context, Poll};

use crate::error::Result;
use crate::postgres::{BackendProtocol, FrontendProtocol, frontend};
use crate::statement::StatementName;

/// A buffered stream that can send and receive postgres messages.
pub trait PgTransport: Unpin {
    /// Polls to flush buffered frontend messages to the underlying socket.
    fn poll_flush(&mut self, cx: &mut Context) -> Poll<io::Result<()>>;

    /// Polls to receive a backend message.
    ///
    /// Calling `poll_recv` also flushes any buffered messages first.
    /// Implementors handle `NoticeResponse` internally (logging it) rather
    /// than returning it, and turn `ErrorResponse` into `Err`.
    fn poll_recv<B: BackendProtocol>(&mut self, cx: &mut Context) -> Poll<Result<B>>;

    /// Marks that a `Sync` was sent and its `ReadyForQuery` reply is still
    /// outstanding; `poll_recv`/`poll_ready` drain these before doing
    /// anything else, so an error on one statement in a pipeline can't be
    /// silently attributed to the next one.
    fn ready_request(&mut self);

    /// Buffers `message` for the next flush.
    fn send<F: FrontendProtocol>(&mut self, message: F);

    /// Buffers the startup message, which (for historical reasons) carries
    /// no leading message-type byte and so isn't a [`FrontendProtocol`].
    fn send_startup(&mut self, startup: frontend::Startup);

    /// Looks up a cached server-side prepared statement by the hash of its
    /// SQL text.
    fn get_stmt(&mut self, sql: u64) -> Option<StatementName>;

    /// Records a newly prepared statement in the cache, evicting and
    /// closing the LRU victim if the cache is full.
    fn add_stmt(&mut self, sql: u64, id: StatementName);

    /// Counts one more execution of `sql`'s hash, returning the running
    /// total. Backs `prepareThreshold`: a statement is only worth naming
    /// and caching once it has been seen this many times.
    fn note_execution(&mut self, sql: u64) -> u32;

    /// Forgets every cached statement name and execution count, without
    /// sending anything. Used alongside a server-side `DEALLOCATE ALL` when
    /// a cached plan has been invalidated (e.g. by a DDL change) and every
    /// named statement this connection knows about is now stale.
    fn clear_stmts(&mut self);
}

impl<P> PgTransport for &mut P
where
    P: PgTransport,
{
    fn poll_flush(&mut self, cx: &mut Context) -> Poll<io::Result<()>> {
        P::poll_flush(self, cx)
    }

    fn poll_recv<B: BackendProtocol>(&mut self, cx: &mut Context) -> Poll<Result<B>> {
        P::poll_recv(self, cx)
    }

    fn ready_request(&mut self) {
        P::ready_request(self);
    }

    fn send<F: FrontendProtocol>(&mut self, message: F) {
        P::send(self, message);
    }

    fn send_startup(&mut self, startup: frontend::Startup) {
        P::send_startup(self, startup);
    }

    fn get_stmt(&mut self, sql: u64) -> Option<StatementName> {
        P::get_stmt(self, sql)
    }

    fn add_stmt(&mut self, sql: u64, id: StatementName) {
        P::add_stmt(self, sql, id);
    }

    fn note_execution(&mut self, sql: u64) -> u32 {
        P::note_execution(self, sql)
    }

    fn clear_stmts(&mut self) {
        P::clear_stmts(self);
    }
}

/// `async fn`-flavored wrappers over [`PgTransport`]'s poll methods.
pub trait PgTransportExt: PgTransport {
    fn flush(&mut self) -> impl Future<Output = io::Result<()>> {
        std::future::poll_fn(|cx| self.poll_flush(cx))
    }

    fn recv<B: BackendProtocol>(&mut self) -> impl Future<Output = Result<B>> {
        std::future::poll_fn(|cx| self.poll_recv(cx))
    }
}

impl<T> PgTransportExt for T where T: PgTransport {}
