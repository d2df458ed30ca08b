//! Plugin transports.
//!
//! Every plugin talks over one bidirectional byte stream, whatever it is
//! underneath: a TCP connection, a child process's stdio pipes, or the hub
//! process's own stdin/stdout for the main plugin. After acquisition the
//! plugin only ever sees a [`Transport`].

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::process::Child;

/// Byte stream a plugin can be opened on.
pub trait PluginStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> PluginStream for T {}

/// Boxed plugin stream.
pub type Transport = Box<dyn PluginStream>;

/// Read half and write half glued into one stream.
///
/// Optionally owns the child process behind the pipes; the child is killed
/// when the transport is dropped.
pub struct StdioTransport<R, W> {
    reader: R,
    writer: W,
    child: Option<Child>,
}

impl<R, W> std::fmt::Debug for StdioTransport<R, W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StdioTransport")
            .field("has_child", &self.child.is_some())
            .finish_non_exhaustive()
    }
}

impl<R, W> StdioTransport<R, W>
where
    R: AsyncRead + Send + Unpin + 'static,
    W: AsyncWrite + Send + Unpin + 'static,
{
    /// Join two halves.
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader,
            writer,
            child: None,
        }
    }

    /// Join two halves and tie the child's lifetime to the transport.
    pub fn with_child(reader: R, writer: W, child: Child) -> Self {
        Self {
            reader,
            writer,
            child: Some(child),
        }
    }

    /// Box into a [`Transport`].
    pub fn boxed(self) -> Transport {
        Box::new(self)
    }
}

/// The hub process's own stdin/stdout, used by the main plugin.
pub fn process_stdio() -> Transport {
    StdioTransport::new(tokio::io::stdin(), tokio::io::stdout()).boxed()
}

impl<R: AsyncRead + Unpin, W: Unpin> AsyncRead for StdioTransport<R, W> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.reader).poll_read(cx, buf)
    }
}

impl<R: Unpin, W: AsyncWrite + Unpin> AsyncWrite for StdioTransport<R, W> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.writer).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.writer).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.writer).poll_shutdown(cx)
    }
}
