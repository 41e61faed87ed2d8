//! Byte sinks used by the runner and the pipeline.
//!
//! - [`SharedBuffer`]: cloneable in-memory sink, readable after the writers finish.
//! - [`ConcurrentWriter`]: one sink shared by many tasks; each chunk is written
//!   whole under a lock so concurrent writers never interleave inside a chunk.
//! - [`Capture`]: in-memory buffer that also forwards to an optional user sink.
//!
//! For a discard sink use [`tokio::io::sink`]; for an empty source use
//! [`tokio::io::empty`].

use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{ready, Context, Poll};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub type BoxWriter = Box<dyn AsyncWrite + Send + Unpin>;
pub type BoxReader = Box<dyn AsyncRead + Send + Unpin>;

const COPY_CHUNK: usize = 8 * 1024;

#[derive(Debug, Clone, Default)]
pub struct SharedBuffer {
    inner: Arc<Mutex<Vec<u8>>>,
}

impl SharedBuffer {
    pub fn new() -> Self { Self::default() }

    pub fn contents(&self) -> Vec<u8> { self.lock().clone() }

    pub fn to_string_lossy(&self) -> String { String::from_utf8_lossy(&self.lock()).into_owned() }

    pub fn boxed(&self) -> BoxWriter { Box::new(self.clone()) }

    fn lock(&self) -> MutexGuard<'_, Vec<u8>> {
        // a poisoned buffer still holds valid bytes
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl AsyncWrite for SharedBuffer {
    fn poll_write(self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        self.lock().extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }
    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> { Poll::Ready(Ok(())) }
    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> { Poll::Ready(Ok(())) }
}

/// Serialized handle to a sink shared across tasks.
#[derive(Clone)]
pub struct ConcurrentWriter {
    inner: Arc<tokio::sync::Mutex<BoxWriter>>,
}

impl ConcurrentWriter {
    pub fn new(w: BoxWriter) -> Self { Self { inner: Arc::new(tokio::sync::Mutex::new(w)) } }

    /// Write `buf` whole; no other writer can land bytes inside it.
    pub async fn write_chunk(&self, buf: &[u8]) -> io::Result<()> {
        let mut w = self.inner.lock().await;
        w.write_all(buf).await?;
        w.flush().await
    }

    /// Read `r` to its end, writing each chunk through [`Self::write_chunk`].
    /// The lock is only taken once a chunk is in hand, never while reading.
    pub async fn copy_from<R: AsyncRead + Unpin>(&self, mut r: R) -> io::Result<u64> {
        let mut buf = vec![0u8; COPY_CHUNK];
        let mut total = 0u64;
        loop {
            let n = r.read(&mut buf).await?;
            if n == 0 { return Ok(total); }
            self.write_chunk(&buf[..n]).await?;
            total += n as u64;
        }
    }
}

/// Capture buffer with an optional user sink behind it.
///
/// Bytes reach the buffer only after the user sink accepted them, so the two
/// always hold the same prefix of the stream. With keeping off the buffer
/// stays empty and bytes only go to the user sink, or nowhere.
pub struct Capture {
    buf: Vec<u8>,
    user: Option<BoxWriter>,
    keep: bool,
}

impl Capture {
    pub fn new(user: Option<BoxWriter>) -> Self { Self { buf: Vec::new(), user, keep: true } }

    pub fn keep(mut self, on: bool) -> Self { self.keep = on; self }

    pub fn into_bytes(self) -> Vec<u8> { self.buf }
}

impl AsyncWrite for Capture {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, data: &[u8]) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        let n = match this.user.as_mut() {
            Some(w) => ready!(Pin::new(w).poll_write(cx, data))?,
            None => data.len(),
        };
        if this.keep { this.buf.extend_from_slice(&data[..n]); }
        Poll::Ready(Ok(n))
    }
    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut().user.as_mut() {
            Some(w) => Pin::new(w).poll_flush(cx),
            None => Poll::Ready(Ok(())),
        }
    }
    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut().user.as_mut() {
            Some(w) => Pin::new(w).poll_shutdown(cx),
            None => Poll::Ready(Ok(())),
        }
    }
}

/// Reader and writer that fail every call.
#[cfg(test)]
pub(crate) struct Broken;

#[cfg(test)]
impl Broken {
    fn err() -> io::Error { io::Error::new(io::ErrorKind::Other, "broken") }
}

#[cfg(test)]
impl AsyncRead for Broken {
    fn poll_read(self: Pin<&mut Self>, _cx: &mut Context<'_>, _buf: &mut tokio::io::ReadBuf<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Err(Self::err()))
    }
}

#[cfg(test)]
impl AsyncWrite for Broken {
    fn poll_write(self: Pin<&mut Self>, _cx: &mut Context<'_>, _buf: &[u8]) -> Poll<io::Result<usize>> {
        Poll::Ready(Err(Self::err()))
    }
    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> { Poll::Ready(Err(Self::err())) }
    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> { Poll::Ready(Ok(())) }
}
