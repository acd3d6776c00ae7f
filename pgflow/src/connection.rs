//! [`Connection`]: socket connect, optional TLS upgrade, startup/auth, and
//! the transport a single connection is driven through (§4.1, §4.3, §4.6).
use std::io;

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::auth::GssProvider;
use crate::auth::scram::ChannelBinding;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::net::Socket;
use crate::postgres::frontend;
use crate::query::{Query, QueryOptions, RowResult, RowStream};
use crate::row::FromRow;
use crate::session::{ReadOnlyScope, read_only_statement, suppresses_implicit_begin};
use crate::sql::Sql;
use crate::startup::{self, StartupResponse};
use crate::stream::PgStream;
use crate::transaction::Transaction;
use crate::transport::PgTransport;

/// A single, unpooled connection to a postgres server.
///
/// Holds the config it was opened with and the cancellation key the server
/// handed back, so [`Connection::cancel_query`] can open a throwaway
/// connection and issue `CancelRequest` at any point, even while `self` is
/// busy waiting on a long-running statement.
pub struct Connection {
    stream: PgStream,
    config: Config,
    process_id: u32,
    secret_key: u32,
    /// Set while `autocommit=false` has an implicit transaction open
    /// (§4.5 "Autocommit off"). Tracked from what this connection has sent,
    /// not re-derived from `ReadyForQuery`, matching the simplification
    /// [`Transaction`]'s own `state` field documents.
    in_implicit_tx: bool,
}

impl Connection {
    pub async fn connect(url: &str) -> Result<Self> {
        Self::connect_with(Config::parse(url)?).await
    }

    pub async fn connect_with(config: Config) -> Result<Self> {
        Self::connect_with_gss(config, None).await
    }

    /// Like [`Connection::connect_with`], additionally accepting a
    /// [`GssProvider`] for servers that require GSSAPI/SSPI authentication.
    pub async fn connect_with_gss(config: Config, gss: Option<&mut dyn GssProvider>) -> Result<Self> {
        let host = config.hosts.first().ok_or_else(|| Error::config("no host configured"))?;

        let socket = connect_socket(&host.host, host.port).await?;
        let (socket, channel_binding) = negotiate_tls(socket, &host.host, &config).await?;

        let cache_capacity = std::num::NonZeroUsize::new(config.prepared_statement_cache_queries)
            .unwrap_or(std::num::NonZeroUsize::new(256).unwrap());
        let mut stream = PgStream::new(socket, cache_capacity);

        let StartupResponse { backend_key_data, .. } =
            startup::startup(&config, channel_binding, gss, &mut stream).await?;

        let mut conn = Self {
            stream,
            config,
            process_id: backend_key_data.process_id,
            secret_key: backend_key_data.secret_key,
            in_implicit_tx: false,
        };

        conn.apply_session_read_only().await?;

        Ok(conn)
    }

    async fn apply_session_read_only(&mut self) -> Result<()> {
        let Some(sql) = read_only_statement(self.config.read_only_mode, ReadOnlyScope::Session) else {
            return Ok(());
        };
        use crate::postgres::backend;
        use crate::transport::PgTransportExt;
        self.stream.send(frontend::Query { sql });
        self.stream.flush().await?;
        self.stream.recv::<backend::CommandComplete>().await?;
        self.stream.recv::<backend::ReadyForQuery>().await?;
        Ok(())
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn query_options(&self) -> QueryOptions {
        QueryOptions::from_config(&self.config)
    }

    /// Sends a `BEGIN` ahead of `sql` if `autocommit=false` and no implicit
    /// transaction is open yet, unless `sql` is itself a statement the
    /// suppress-begin flag exempts (§4.5).
    async fn maybe_implicit_begin(&mut self, sql: &str) -> Result<()> {
        if self.config.autocommit || self.in_implicit_tx || suppresses_implicit_begin(sql) {
            return Ok(());
        }
        use crate::postgres::backend;
        use crate::transport::PgTransportExt;
        self.stream.send(frontend::Query { sql: "BEGIN" });
        self.stream.flush().await?;
        self.stream.recv::<backend::CommandComplete>().await?;
        self.stream.recv::<backend::ReadyForQuery>().await?;
        self.in_implicit_tx = true;
        Ok(())
    }

    /// Ends the implicit transaction `autocommit=false` opened, if any.
    /// A no-op under `autocommit=true` or when nothing is open, matching
    /// the "no-op when the server already reports idle" rule (§4.5).
    pub async fn commit(&mut self) -> Result<()> {
        self.end_implicit_tx("COMMIT").await
    }

    pub async fn rollback(&mut self) -> Result<()> {
        self.end_implicit_tx("ROLLBACK").await
    }

    async fn end_implicit_tx(&mut self, sql: &'static str) -> Result<()> {
        if !self.in_implicit_tx {
            return Ok(());
        }
        use crate::postgres::backend;
        use crate::transport::PgTransportExt;
        self.stream.send(frontend::Query { sql });
        self.stream.flush().await?;
        self.stream.recv::<backend::CommandComplete>().await?;
        self.stream.recv::<backend::ReadyForQuery>().await?;
        self.in_implicit_tx = false;
        Ok(())
    }

    pub async fn query<SQL: Sql>(&mut self, query: Query<'_, SQL>) -> Result<RowResult> {
        self.maybe_implicit_begin(query.sql_text()).await?;
        let opts = self.query_options();
        query.execute(&mut self.stream, opts).await
    }

    pub async fn fetch_all<SQL: Sql, R: FromRow>(&mut self, query: Query<'_, SQL>) -> Result<Vec<R>> {
        self.maybe_implicit_begin(query.sql_text()).await?;
        let opts = self.query_options();
        query.fetch_all(&mut self.stream, opts).await
    }

    pub async fn fetch_one<SQL: Sql, R: FromRow>(&mut self, query: Query<'_, SQL>) -> Result<R> {
        self.maybe_implicit_begin(query.sql_text()).await?;
        let opts = self.query_options();
        query.fetch_one(&mut self.stream, opts).await
    }

    pub async fn fetch_optional<SQL: Sql, R: FromRow>(&mut self, query: Query<'_, SQL>) -> Result<Option<R>> {
        self.maybe_implicit_begin(query.sql_text()).await?;
        let opts = self.query_options();
        query.fetch_optional(&mut self.stream, opts).await
    }

    pub async fn fetch<SQL: Sql>(&mut self, query: Query<'_, SQL>) -> Result<RowStream<'_, PgStream>> {
        self.maybe_implicit_begin(query.sql_text()).await?;
        let opts = self.query_options();
        query.fetch(&mut self.stream, opts).await
    }

    /// Opens a transaction with `BEGIN`, applying `readOnlyMode=transaction`
    /// if configured.
    ///
    /// Not meant to be combined with `autocommit=false`: if an implicit
    /// transaction is already open, this sends a second `BEGIN`, which
    /// postgres accepts but answers with a "there is already a transaction
    /// in progress" warning rather than actually nesting.
    pub async fn begin(&mut self) -> Result<Transaction<&mut PgStream>> {
        let opts = self.query_options();
        Transaction::begin(&mut self.stream, self.config.autosave, self.config.read_only_mode, opts).await
    }

    /// Opens a throwaway connection to the same host and issues
    /// `CancelRequest` for the query currently running on `self`.
    ///
    /// Per protocol, the cancel request has no response: the server either
    /// cancels the in-flight query or silently ignores a request it can't
    /// match, and this returns as soon as the bytes are on the wire.
    pub async fn cancel_query(&self) -> Result<()> {
        let host = self.config.hosts.first().ok_or_else(|| Error::config("no host configured"))?;
        let mut socket = connect_socket(&host.host, host.port).await?;

        let mut buf = bytes::BytesMut::new();
        frontend::CancelRequest { process_id: self.process_id, secret_key: self.secret_key }.write(&mut buf);
        socket.write_all(&buf).await?;
        socket.shutdown().await?;
        Ok(())
    }

    pub async fn close(mut self) -> io::Result<()> {
        self.stream.shutdown().await
    }

    /// Drains any outstanding `Sync`/`ReadyForQuery` pairs without yielding a
    /// message, confirming the connection is actually still responsive.
    /// Used by the pool as a cheap health check before handing a connection
    /// back out.
    pub(crate) fn poll_ready(&mut self, cx: &mut std::task::Context) -> std::task::Poll<Result<()>> {
        self.stream.poll_ready(cx)
    }

    /// Queues `Terminate` and flushes it; the socket itself is closed when
    /// `self` is dropped. Used by the pool to retire a connection without an
    /// `async fn`, since the worker future can only poll.
    pub(crate) fn poll_shutdown(&mut self, cx: &mut std::task::Context) -> std::task::Poll<io::Result<()>> {
        self.send(frontend::Terminate);
        self.poll_flush(cx)
    }
}

impl PgTransport for Connection {
    fn poll_flush(&mut self, cx: &mut std::task::Context) -> std::task::Poll<io::Result<()>> {
        PgTransport::poll_flush(&mut self.stream, cx)
    }

    fn poll_recv<B: crate::postgres::BackendProtocol>(&mut self, cx: &mut std::task::Context) -> std::task::Poll<Result<B>> {
        PgTransport::poll_recv(&mut self.stream, cx)
    }

    fn ready_request(&mut self) {
        PgTransport::ready_request(&mut self.stream)
    }

    fn send<F: crate::postgres::FrontendProtocol>(&mut self, message: F) {
        PgTransport::send(&mut self.stream, message)
    }

    fn send_startup(&mut self, startup: frontend::Startup) {
        PgTransport::send_startup(&mut self.stream, startup)
    }

    fn get_stmt(&mut self, sql: u64) -> Option<crate::statement::StatementName> {
        PgTransport::get_stmt(&mut self.stream, sql)
    }

    fn add_stmt(&mut self, sql: u64, id: crate::statement::StatementName) {
        PgTransport::add_stmt(&mut self.stream, sql, id)
    }

    fn note_execution(&mut self, sql: u64) -> u32 {
        PgTransport::note_execution(&mut self.stream, sql)
    }

    fn clear_stmts(&mut self) {
        PgTransport::clear_stmts(&mut self.stream)
    }
}

/// Unix-socket-first, TCP-fallback connection establishment, mirroring
/// libpq: `localhost` tries `/run/postgresql/.s.PGSQL.{port}` (then
/// `/tmp/.s.PGSQL.{port}`) before falling back to a loopback TCP connection.
async fn connect_socket(host: &str, port: u16) -> Result<Socket> {
    if host == "localhost" {
        for dir in ["/run/postgresql", "/tmp"] {
            let path = format!("{dir}/.s.PGSQL.{port}");
            match Socket::connect_socket(&path).await {
                Ok(socket) => return Ok(socket),
                Err(_) => continue,
            }
        }
    }
    Ok(Socket::connect_tcp(host, port).await?)
}

/// Negotiates `SSLRequest` directly on the raw socket, before any
/// length-framed [`crate::transport::PgTransport`] traffic exists to send
/// it through. `SSLRequest`/`GSSENCRequest` are special-cased by the
/// protocol precisely so the client can probe encryption before committing
/// to `StartupMessage`.
async fn negotiate_tls(mut socket: Socket, host: &str, config: &Config) -> Result<(Socket, ChannelBinding)> {
    if !config.ssl_mode.wants_tls() {
        return Ok((socket, ChannelBinding::Unsupported));
    }

    #[cfg(feature = "tls")]
    {
        let mut buf = bytes::BytesMut::new();
        frontend::SslRequest::write(&mut buf);
        socket.write_all(&buf).await?;

        let response = socket.read_u8().await?;
        if response != b'S' {
            if config.ssl_mode.allows_plaintext_fallback() {
                return Ok((socket, ChannelBinding::Unsupported));
            }
            return Err(Error::config("server refused SSL and sslmode requires it"));
        }

        let Some(tcp) = socket.into_tcp_stream() else {
            return Err(Error::config("SSL upgrade attempted on a non-TCP socket"));
        };

        let connector = crate::tls::connector(config.ssl_mode, config.ssl_root_cert.as_deref())?;
        let server_name = rustls::pki_types::ServerName::try_from(host.to_string())
            .map_err(|_| Error::config(format!("invalid server name for TLS: {host}")))?;
        let tls = crate::tls::handshake(&connector, tcp, server_name).await?;

        let binding = match crate::tls::channel_binding(&tls) {
            Some(data) => ChannelBinding::TlsServerEndPoint(data),
            None => ChannelBinding::Unsupported,
        };

        Ok((Socket::from_tls(tls), binding))
    }

    #[cfg(not(feature = "tls"))]
    {
        let _ = host;
        if config.ssl_mode.allows_plaintext_fallback() {
            Ok((socket, ChannelBinding::Unsupported))
        } else {
            Err(Error::config("sslmode requires TLS but the `tls` feature is disabled"))
        }
    }
}
