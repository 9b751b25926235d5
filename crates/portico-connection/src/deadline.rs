//! Deadline guard for public connections
//!
//! While a deadline is armed, every pending and future read or write on the
//! connection fails with [`io::ErrorKind::TimedOut`] once it elapses. The
//! listener arms it right after accept and clears it just before handing the
//! connection to a tunnel; from then on liveness is the tunnel session's job.

use std::fmt;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::time::{Instant, Sleep};
use tracing::trace;

/// Byte stream a [`PublicConnection`] can wrap
pub trait PublicIo: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> PublicIo for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

/// A connection accepted from the public internet
pub struct PublicConnection {
    io: Box<dyn PublicIo>,
    peer_addr: SocketAddr,
    deadline: Option<Pin<Box<Sleep>>>,
}

impl PublicConnection {
    pub fn new(io: impl PublicIo, peer_addr: SocketAddr) -> Self {
        Self {
            io: Box::new(io),
            peer_addr,
            deadline: None,
        }
    }

    /// Remote endpoint of the connection
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Arm a deadline `timeout` from now, replacing any previous one
    pub fn arm_deadline(&mut self, timeout: Duration) {
        self.set_deadline(Instant::now() + timeout);
    }

    /// Arm a deadline at an absolute instant, replacing any previous one
    pub fn set_deadline(&mut self, at: Instant) {
        trace!("Arming deadline for {}", self.peer_addr);
        match self.deadline.as_mut() {
            Some(sleep) => sleep.as_mut().reset(at),
            None => self.deadline = Some(Box::pin(tokio::time::sleep_until(at))),
        }
    }

    /// Remove the deadline; subsequent I/O may block indefinitely
    pub fn clear_deadline(&mut self) {
        if self.deadline.take().is_some() {
            trace!("Cleared deadline for {}", self.peer_addr);
        }
    }

    /// The currently armed deadline, if any
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline.as_ref().map(|sleep| sleep.deadline())
    }

    /// Whether an armed deadline has already passed
    pub fn is_expired(&self) -> bool {
        self.deadline
            .as_ref()
            .is_some_and(|sleep| sleep.is_elapsed())
    }

    /// Polls the deadline timer so the task is woken when it fires.
    fn poll_expired(&mut self, cx: &mut Context<'_>) -> bool {
        match self.deadline.as_mut() {
            Some(sleep) => sleep.is_elapsed() || sleep.as_mut().poll(cx).is_ready(),
            None => false,
        }
    }

    fn timed_out(&self) -> io::Error {
        io::Error::new(
            io::ErrorKind::TimedOut,
            format!("deadline exceeded for connection from {}", self.peer_addr),
        )
    }
}

impl fmt::Debug for PublicConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PublicConnection")
            .field("peer_addr", &self.peer_addr)
            .field("deadline", &self.deadline())
            .finish_non_exhaustive()
    }
}

impl AsyncRead for PublicConnection {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.poll_expired(cx) {
            return Poll::Ready(Err(this.timed_out()));
        }
        Pin::new(&mut this.io).poll_read(cx, buf)
    }
}

impl AsyncWrite for PublicConnection {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        data: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        if this.poll_expired(cx) {
            return Poll::Ready(Err(this.timed_out()));
        }
        Pin::new(&mut this.io).poll_write(cx, data)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.poll_expired(cx) {
            return Poll::Ready(Err(this.timed_out()));
        }
        Pin::new(&mut this.io).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        // Shutdown is always allowed so an expired connection can still be closed.
        Pin::new(&mut self.get_mut().io).poll_shutdown(cx)
    }
}
