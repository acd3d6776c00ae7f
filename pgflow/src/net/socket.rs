use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Either a plain TCP stream, a unix domain socket, or a TLS-wrapped TCP
/// stream, transparently implementing `AsyncRead`/`AsyncWrite`.
///
/// Requires the `tokio` feature; otherwise every constructor panics at
/// runtime rather than failing to compile, mirroring how this crate treats
/// "the async runtime is simply absent" elsewhere.
pub struct Socket {
    kind: Kind,
}

enum Kind {
    #[cfg(feature = "tokio")]
    Tcp(tokio::net::TcpStream),
    #[cfg(all(feature = "tokio", unix))]
    Unix(tokio::net::UnixStream),
    #[cfg(feature = "tls")]
    Tls(Box<tokio_rustls::client::TlsStream<tokio::net::TcpStream>>),
}

impl Socket {
    pub async fn connect_tcp(host: &str, port: u16) -> io::Result<Socket> {
        #[cfg(feature = "tokio")]
        {
            let socket = tokio::net::TcpStream::connect((host, port)).await?;
            socket.set_nodelay(true)?;
            #[cfg(feature = "log")]
            log::debug!("connected via tcp: {:?}", socket.local_addr());
            #[cfg(feature = "verbose")]
            tracing::debug!(host, port, "connected via tcp");
            Ok(Socket { kind: Kind::Tcp(socket) })
        }
        #[cfg(not(feature = "tokio"))]
        {
            let _ = (host, port);
            panic!("runtime disabled")
        }
    }

    #[cfg(unix)]
    pub async fn connect_socket(path: &str) -> io::Result<Socket> {
        #[cfg(all(feature = "tokio", unix))]
        {
            let socket = tokio::net::UnixStream::connect(path).await?;
            #[cfg(feature = "verbose")]
            tracing::debug!(path, "connected via unix socket");
            Ok(Socket { kind: Kind::Unix(socket) })
        }
        #[cfg(not(all(feature = "tokio", unix)))]
        {
            let _ = path;
            panic!("runtime disabled")
        }
    }

    #[cfg(not(unix))]
    pub async fn connect_socket(path: &str) -> io::Result<Socket> {
        let _ = path;
        Err(io::Error::new(io::ErrorKind::Unsupported, "unix sockets unavailable on this platform"))
    }

    /// Wraps an already-handshaken TLS stream, produced by consuming a bare
    /// TCP [`Socket`] via [`Socket::into_tcp_stream`].
    #[cfg(feature = "tls")]
    pub fn from_tls(tls: tokio_rustls::client::TlsStream<tokio::net::TcpStream>) -> Socket {
        Socket { kind: Kind::Tls(Box::new(tls)) }
    }

    /// Consumes a bare TCP socket, returning the inner stream so it can be
    /// handed to the TLS connector. Returns `None` for unix or already-TLS
    /// sockets — startup only ever upgrades a fresh TCP connection once.
    #[cfg(feature = "tls")]
    pub fn into_tcp_stream(self) -> Option<tokio::net::TcpStream> {
        match self.kind {
            Kind::Tcp(t) => Some(t),
            _ => None,
        }
    }

    pub async fn shutdown(&mut self) -> io::Result<()> {
        #[cfg(feature = "tokio")]
        {
            tokio::io::AsyncWriteExt::shutdown(self).await
        }
        #[cfg(not(feature = "tokio"))]
        {
            Ok(())
        }
    }
}

#[cfg(feature = "tokio")]
impl tokio::io::AsyncRead for Socket {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match &mut self.kind {
            Kind::Tcp(t) => Pin::new(t).poll_read(cx, buf),
            #[cfg(unix)]
            Kind::Unix(u) => Pin::new(u).poll_read(cx, buf),
            #[cfg(feature = "tls")]
            Kind::Tls(t) => Pin::new(&mut **t).poll_read(cx, buf),
        }
    }
}

#[cfg(feature = "tokio")]
impl tokio::io::AsyncWrite for Socket {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match &mut self.kind {
            Kind::Tcp(t) => Pin::new(t).poll_write(cx, buf),
            #[cfg(unix)]
            Kind::Unix(u) => Pin::new(u).poll_write(cx, buf),
            #[cfg(feature = "tls")]
            Kind::Tls(t) => Pin::new(&mut **t).poll_write(cx, buf),
        }
    }

    fn poll_write_vectored(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        match &mut self.kind {
            Kind::Tcp(t) => Pin::new(t).poll_write_vectored(cx, bufs),
            #[cfg(unix)]
            Kind::Unix(u) => Pin::new(u).poll_write_vectored(cx, bufs),
            #[cfg(feature = "tls")]
            Kind::Tls(t) => Pin::new(&mut **t).poll_write_vectored(cx, bufs),
        }
    }

    #[inline]
    fn is_write_vectored(&self) -> bool {
        true
    }

    fn poll_flush(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut self.kind {
            Kind::Tcp(t) => Pin::new(t).poll_shutdown(cx),
            #[cfg(unix)]
            Kind::Unix(u) => Pin::new(u).poll_shutdown(cx),
            #[cfg(feature = "tls")]
            Kind::Tls(t) => Pin::new(&mut **t).poll_shutdown(cx),
        }
    }
}

impl std::fmt::Debug for Socket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            #[cfg(feature = "tokio")]
            Kind::Tcp(tcp) => std::fmt::Debug::fmt(tcp, f),
            #[cfg(unix)]
            Kind::Unix(unix) => std::fmt::Debug::fmt(unix, f),
            #[cfg(feature = "tls")]
            Kind::Tls(_) => f.write_str("TlsStream(..)"),
        }
    }
}
