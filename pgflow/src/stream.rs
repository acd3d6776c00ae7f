//! [`PgStream`]: the buffered, statement-caching [`PgTransport`] built on a
//! raw [`Socket`] (§4.1, §4.4.3).
use std::collections::HashMap;
use std::io;
use std::num::NonZeroUsize;
use std::task::{Context, Poll, ready};

use bytes::{Buf, Bytes, BytesMut};
use lru::LruCache;

use crate::error::{Error, ErrorKind, Result};
use crate::net::Socket;
use crate::postgres::{BackendProtocol, FrontendProtocol, backend, frontend};
use crate::statement::StatementName;
use crate::transport::PgTransport;

const DEFAULT_BUF_CAPACITY: usize = 1024;
const READ_GROWTH: usize = 1024;

/// A buffered postgres wire connection with a bounded server-side prepared
/// statement cache.
///
/// All eager buffering happens here: [`send`][PgTransport::send] only
/// appends to `write_buf`, [`poll_recv`][PgTransport::poll_recv] only reads
/// as many bytes off the socket as are needed to assemble the next whole
/// message, and `ErrorResponse`/`NoticeResponse` never escape as a decoded
/// backend message, they are turned into `Err` or logged respectively.
#[derive(Debug)]
pub struct PgStream {
    socket: Socket,
    read_buf: BytesMut,
    write_buf: BytesMut,
    stmts: LruCache<u64, StatementName>,
    exec_counts: HashMap<u64, u32>,
    sync_pending: usize,
}

impl PgStream {
    pub fn new(socket: Socket, cache_capacity: NonZeroUsize) -> Self {
        Self {
            socket,
            read_buf: BytesMut::with_capacity(DEFAULT_BUF_CAPACITY),
            write_buf: BytesMut::with_capacity(DEFAULT_BUF_CAPACITY),
            stmts: LruCache::new(cache_capacity),
            exec_counts: HashMap::new(),
            sync_pending: 0,
        }
    }

    /// Swaps the underlying socket (e.g. after a TLS upgrade during startup).
    pub fn replace_socket(&mut self, socket: Socket) {
        self.socket = socket;
    }

    pub fn socket(&self) -> &Socket {
        &self.socket
    }

    pub async fn shutdown(&mut self) -> io::Result<()> {
        self.send(frontend::Terminate);
        let _ = crate::transport::PgTransportExt::flush(self).await;
        self.socket.shutdown().await
    }

    /// Drains `ReadyForQuery`s for `Sync`s already sent, without yielding any
    /// decoded message to the caller. Used both standalone (connection pool
    /// health check) and as the first step of [`PgTransport::poll_recv`].
    pub(crate) fn poll_ready(&mut self, cx: &mut Context) -> Poll<Result<()>> {
        if !self.write_buf.is_empty() {
            ready!(self.poll_flush_inner(cx))?;
        }

        while self.sync_pending != 0 {
            let Some((msgtype, body)) = ready!(self.poll_next_message(cx))? else {
                return Poll::Ready(Err(Error::from(ErrorKind::Closed)));
            };

            match msgtype {
                backend::ErrorResponse::MSGTYPE => {
                    self.send(frontend::Sync);
                    self.ready_request();
                    let err = backend::ErrorResponse::decode(msgtype, body)?.error;
                    #[cfg(feature = "log")]
                    log::error!("{err}");
                    #[cfg(feature = "verbose")]
                    tracing::error!(%err, "server error during healthcheck");
                    let _ = err;
                }
                backend::NoticeResponse::MSGTYPE => {
                    let notice = backend::NoticeResponse::decode(msgtype, body)?.error;
                    #[cfg(feature = "log")]
                    log::warn!("{notice}");
                    #[cfg(feature = "verbose")]
                    tracing::warn!(%notice, "notice");
                }
                backend::ReadyForQuery::MSGTYPE => {
                    self.sync_pending -= 1;
                }
                _ => {}
            }
        }

        Poll::Ready(Ok(()))
    }

    fn poll_flush_inner(&mut self, cx: &mut Context) -> Poll<io::Result<()>> {
        crate::io::poll_write_all(&mut self.socket, &mut self.write_buf, cx)
    }

    /// Reads exactly one whole, framed message off the socket, growing
    /// `read_buf` as needed. Returns `Ok(None)` on a clean EOF with no bytes
    /// buffered.
    fn poll_next_message(&mut self, cx: &mut Context) -> Poll<io::Result<Option<(u8, Bytes)>>> {
        loop {
            let Some(mut header) = self.read_buf.get(..5) else {
                self.read_buf.reserve(READ_GROWTH);
                let n = ready!(crate::io::poll_read(&mut self.socket, &mut self.read_buf, cx))?;
                if n == 0 && self.read_buf.is_empty() {
                    return Poll::Ready(Ok(None));
                }
                continue;
            };

            let msgtype = header.get_u8();
            let len = header.get_i32() as usize;

            if self.read_buf.len() - 1 < len {
                self.read_buf.reserve(1 + len);
                ready!(crate::io::poll_read(&mut self.socket, &mut self.read_buf, cx))?;
                continue;
            }

            self.read_buf.advance(5);
            let body = self.read_buf.split_to(len - 4).freeze();
            return Poll::Ready(Ok(Some((msgtype, body))));
        }
    }
}

impl PgTransport for PgStream {
    fn poll_flush(&mut self, cx: &mut Context) -> Poll<io::Result<()>> {
        self.poll_flush_inner(cx)
    }

    fn poll_recv<B: BackendProtocol>(&mut self, cx: &mut Context) -> Poll<Result<B>> {
        ready!(self.poll_ready(cx)?);

        loop {
            let Some((msgtype, body)) = ready!(self.poll_next_message(cx)?) else {
                return Poll::Ready(Err(Error::from(ErrorKind::Closed)));
            };

            match msgtype {
                backend::ErrorResponse::MSGTYPE => {
                    self.send(frontend::Sync);
                    self.ready_request();
                    return Poll::Ready(Err(backend::ErrorResponse::decode(msgtype, body)?.error.into()));
                }
                backend::NoticeResponse::MSGTYPE => {
                    let notice = backend::NoticeResponse::decode(msgtype, body)?.error;
                    #[cfg(feature = "log")]
                    log::warn!("{notice}");
                    #[cfg(feature = "verbose")]
                    tracing::warn!(%notice, "notice");
                    continue;
                }
                _ => return Poll::Ready(Ok(B::decode(msgtype, body)?)),
            }
        }
    }

    fn ready_request(&mut self) {
        self.sync_pending += 1;
    }

    fn send<F: FrontendProtocol>(&mut self, message: F) {
        frontend::write(message, &mut self.write_buf);
    }

    fn send_startup(&mut self, startup: frontend::Startup) {
        startup.write(&mut self.write_buf);
    }

    fn get_stmt(&mut self, sql: u64) -> Option<StatementName> {
        self.stmts.get(&sql).cloned()
    }

    fn add_stmt(&mut self, sql: u64, name: StatementName) {
        if let Some((_, evicted)) = self.stmts.push(sql, name) {
            self.send(frontend::Close { variant: b'S', name: evicted.as_str() });
            self.send(frontend::Sync);
            self.ready_request();
        }
    }

    fn note_execution(&mut self, sql: u64) -> u32 {
        let count = self.exec_counts.entry(sql).or_insert(0);
        *count = count.saturating_add(1);
        *count
    }

    fn clear_stmts(&mut self) {
        self.stmts.clear();
        self.exec_counts.clear();
    }
}
