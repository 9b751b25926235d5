//! Replay buffer for sniffed streams
//!
//! [`ReplayStream`] keeps every byte read through [`ReplayStream::buffer_more`]
//! and hands those bytes back, in order, to the next reader before falling
//! through to the wrapped stream. Writes always go straight to the wrapped
//! stream.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, ReadBuf};

/// Bytes reserved per `buffer_more` call.
const READ_CHUNK: usize = 4 * 1024;

/// A stream whose already-consumed prefix is replayed to later readers
#[derive(Debug)]
pub struct ReplayStream<S> {
    inner: S,
    replay: BytesMut,
}

impl<S> ReplayStream<S> {
    /// Wrap `inner` with nothing to replay yet
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            replay: BytesMut::new(),
        }
    }

    /// Wrap `inner`, replaying `prefix` before any byte of `inner`
    pub fn with_prefix(inner: S, prefix: &[u8]) -> Self {
        Self {
            inner,
            replay: BytesMut::from(prefix),
        }
    }

    /// Bytes that will be replayed before the live stream resumes
    pub fn buffered(&self) -> &[u8] {
        &self.replay[..]
    }

    pub fn buffered_len(&self) -> usize {
        self.replay.len()
    }

    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut S {
        &mut self.inner
    }

    /// Returns the bytes not yet replayed and the wrapped stream.
    pub fn into_parts(self) -> (Bytes, S) {
        (self.replay.freeze(), self.inner)
    }
}

impl<S: AsyncRead + Unpin> ReplayStream<S> {
    /// Read more bytes from the wrapped stream into the replay buffer.
    ///
    /// Never grows the buffer beyond `limit` bytes. Returns the number of
    /// bytes added; `0` means end of stream or that `limit` is reached.
    pub async fn buffer_more(&mut self, limit: usize) -> io::Result<usize> {
        let max = limit.saturating_sub(self.replay.len());
        if max == 0 {
            return Ok(0);
        }
        self.replay.reserve(max.min(READ_CHUNK));
        (&mut self.inner)
            .take(max as u64)
            .read_buf(&mut self.replay)
            .await
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for ReplayStream<S> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        out: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if out.remaining() == 0 {
            Poll::Ready(Ok(()))
        } else if !self.replay.is_empty() {
            let n = self.replay.len().min(out.remaining());
            let chunk = self.replay.split_to(n);
            out.put_slice(&chunk);
            Poll::Ready(Ok(()))
        } else {
            Pin::new(&mut self.inner).poll_read(cx, out)
        }
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for ReplayStream<S> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        data: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, data)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}
