//! Low-level `poll_read`/`poll_write_all` helpers shared by [`crate::stream::PgStream`].
use std::io;
use std::task::{Context, Poll};

#[cfg(feature = "tokio")]
pub fn poll_read<R, B>(reader: &mut R, buf: &mut B, cx: &mut Context) -> Poll<io::Result<usize>>
where
    R: tokio::io::AsyncRead + Unpin + ?Sized,
    B: bytes::BufMut + ?Sized,
{
    use std::pin::Pin;
    use std::task::ready;
    use tokio::io::ReadBuf;

    if !buf.has_remaining_mut() {
        return Poll::Ready(Ok(0));
    }

    let n = {
        let dst = buf.chunk_mut();
        let dst = unsafe { dst.as_uninit_slice_mut() };
        let mut buf = ReadBuf::uninit(dst);
        let ptr = buf.filled().as_ptr();
        ready!(Pin::new(reader).poll_read(cx, &mut buf)?);
        assert_eq!(ptr, buf.filled().as_ptr());
        buf.filled().len()
    };

    // SAFETY: `n` is exactly the number of bytes `poll_read` reported initialized.
    unsafe {
        buf.advance_mut(n);
    }

    if n == 0 {
        return Poll::Ready(Err(io::ErrorKind::UnexpectedEof.into()));
    }

    Poll::Ready(Ok(n))
}

#[cfg(feature = "tokio")]
pub fn poll_write_all<W, B>(writer: &mut W, buf: &mut B, cx: &mut Context) -> Poll<io::Result<()>>
where
    W: tokio::io::AsyncWrite + Unpin + ?Sized,
    B: bytes::Buf + ?Sized,
{
    use std::io::IoSlice;
    use std::pin::Pin;
    use std::task::ready;

    const MAX_VECTOR_ELEMENTS: usize = 64;

    while buf.has_remaining() {
        let n = if writer.is_write_vectored() {
            let mut slices = [IoSlice::new(&[]); MAX_VECTOR_ELEMENTS];
            let cnt = buf.chunks_vectored(&mut slices);
            ready!(Pin::new(&mut *writer).poll_write_vectored(cx, &slices[..cnt]))?
        } else {
            ready!(Pin::new(&mut *writer).poll_write(cx, buf.chunk())?)
        };
        buf.advance(n);
        if n == 0 {
            return Poll::Ready(Err(io::ErrorKind::WriteZero.into()));
        }
    }

    Poll::Ready(Ok(()))
}

#[cfg(not(feature = "tokio"))]
pub fn poll_read<R, B>(_reader: &mut R, _buf: &mut B, _cx: &mut Context) -> Poll<io::Result<usize>> {
    panic!("the `tokio` feature is disabled")
}

#[cfg(not(feature = "tokio"))]
pub fn poll_write_all<W, B>(_writer: &mut W, _buf: &mut B, _cx: &mut Context) -> Poll<io::Result<()>> {
    panic!("the `tokio` feature is disabled")
}
