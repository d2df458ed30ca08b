//! Framed TCP connection to the comment server.
//!
//! [`LiveConnection`] owns one socket. A single background read loop cuts
//! the stream into NUL-delimited frames and hands each one to the
//! caller's [`FrameHandler`] before reading further. Writes go through an
//! async mutex so concurrent senders never interleave bytes.
//!
//! # Lifecycle
//!
//! ```text
//! connect() ──dial (timeout, keepalive)──► read loop spawned
//!                                              │
//!        read error (temporary) ──► CommentErr, keep reading
//!        read error (permanent) ──► CommentErr, self-disconnect ──► CommentClose
//!                                              │
//! disconnect() ──cancel──► loop exits ──► socket closed ──► returns
//! ```
//!
//! Once `disconnect` returns, the frame handler and event receiver are
//! never called again by this connection.

use std::io;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Weak};

use socket2::{SockRef, TcpKeepalive};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpSocket, TcpStream};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use super::error::NicoError;
use super::event::{EventReceiver, NicoEvent};
use super::framing::{encode_frame, FrameDecoder};
use crate::constants::{CONNECTION_KEEPALIVE_PERIOD, CONNECTION_WRITE_DEADLINE, CONNECT_TIMEOUT};
use crate::logging::Logger;

/// Callback receiving each frame payload (delimiter stripped).
pub type FrameHandler = Box<dyn FnMut(String) + Send>;

const PHASE_OPEN: u8 = 0;
const PHASE_DISCONNECTING: u8 = 1;
const PHASE_CLOSED: u8 = 2;

/// Socket read buffer size.
const READ_BUFFER_SIZE: usize = 16 * 1024;

/// One framed connection to the comment server.
pub struct LiveConnection {
    addr: String,
    writer: Mutex<Option<OwnedWriteHalf>>,
    cancel: CancellationToken,
    /// Cancelled by the read loop when it exits.
    exited: CancellationToken,
    phase: AtomicU8,
    log: Logger,
}

impl std::fmt::Debug for LiveConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveConnection")
            .field("addr", &self.addr)
            .field("phase", &self.phase.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl LiveConnection {
    /// Dial `addr` and start the read loop.
    ///
    /// # Errors
    ///
    /// Returns [`NicoError::Network`] if the address cannot be resolved,
    /// the dial fails, or it does not complete within [`CONNECT_TIMEOUT`].
    /// Nothing is left running on failure.
    pub async fn connect(
        addr: &str,
        handler: FrameHandler,
        events: Arc<dyn EventReceiver>,
        log: Logger,
    ) -> Result<Arc<Self>, NicoError> {
        let stream = match tokio::time::timeout(CONNECT_TIMEOUT, dial(addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(NicoError::Network(format!("dial {addr}: {e}"))),
            Err(_) => return Err(NicoError::Network(format!("dial {addr}: timed out"))),
        };
        let (read_half, write_half) = stream.into_split();

        let conn = Arc::new(Self {
            addr: addr.to_string(),
            writer: Mutex::new(Some(write_half)),
            cancel: CancellationToken::new(),
            exited: CancellationToken::new(),
            phase: AtomicU8::new(PHASE_OPEN),
            log,
        });

        log::info!(target: conn.log.target(), "connected to {addr}");
        tokio::spawn(read_loop(
            Arc::downgrade(&conn),
            read_half,
            handler,
            events,
            conn.cancel.clone(),
            conn.exited.clone(),
            conn.log.clone(),
        ));

        Ok(conn)
    }

    /// Remote address this connection was dialed with.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Whether the connection is open and not being torn down.
    pub fn is_connected(&self) -> bool {
        self.phase.load(Ordering::SeqCst) == PHASE_OPEN
    }

    /// Write one frame (`payload` + delimiter) and flush it.
    ///
    /// # Errors
    ///
    /// Returns [`NicoError::SendComment`] if the connection is closed, the
    /// write fails, or it exceeds [`CONNECTION_WRITE_DEADLINE`].
    pub async fn send(&self, payload: &str) -> Result<(), NicoError> {
        let mut guard = self.writer.lock().await;
        let writer = guard
            .as_mut()
            .ok_or_else(|| NicoError::SendComment("connection is closed".to_string()))?;

        let frame = encode_frame(payload);
        let write = async {
            writer.write_all(&frame).await?;
            writer.flush().await
        };

        match tokio::time::timeout(CONNECTION_WRITE_DEADLINE, write).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(NicoError::SendComment(e.to_string())),
            Err(_) => Err(NicoError::SendComment("write deadline exceeded".to_string())),
        }
    }

    /// Stop the read loop, close the socket and wait for the loop to exit.
    ///
    /// Calling this on an already closed connection is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`NicoError::AlreadyDisconnecting`] if another disconnect is
    /// still running.
    pub async fn disconnect(&self) -> Result<(), NicoError> {
        match self.phase.compare_exchange(
            PHASE_OPEN,
            PHASE_DISCONNECTING,
            Ordering::SeqCst,
            Ordering::SeqCst,
        ) {
            Ok(_) => {}
            Err(PHASE_DISCONNECTING) => return Err(NicoError::AlreadyDisconnecting),
            Err(_) => return Ok(()),
        }

        self.cancel.cancel();
        if let Some(mut writer) = self.writer.lock().await.take() {
            if let Err(e) = writer.shutdown().await {
                log::debug!(target: self.log.target(), "shutdown of {} failed: {e}", self.addr);
            }
        }

        self.exited.cancelled().await;
        self.phase.store(PHASE_CLOSED, Ordering::SeqCst);
        log::info!(target: self.log.target(), "disconnected from {}", self.addr);
        Ok(())
    }
}

/// Resolve `addr` and dial each candidate with keepalive probes enabled.
async fn dial(addr: &str) -> io::Result<TcpStream> {
    let mut last_err = None;
    for socket_addr in tokio::net::lookup_host(addr).await? {
        let socket = if socket_addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        set_keepalive(&socket)?;
        match socket.connect(socket_addr).await {
            Ok(stream) => return Ok(stream),
            Err(e) => last_err = Some(e),
        }
    }
    Err(last_err.unwrap_or_else(|| {
        io::Error::new(io::ErrorKind::NotFound, format!("no address for {addr}"))
    }))
}

/// Probe an idle socket every [`CONNECTION_KEEPALIVE_PERIOD`].
fn set_keepalive(socket: &TcpSocket) -> io::Result<()> {
    let keepalive = TcpKeepalive::new()
        .with_time(CONNECTION_KEEPALIVE_PERIOD)
        .with_interval(CONNECTION_KEEPALIVE_PERIOD);
    SockRef::from(socket).set_tcp_keepalive(&keepalive)
}

fn is_temporary(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

/// Read loop. Cuts frames and forwards them until cancelled or broken.
async fn read_loop(
    conn: Weak<LiveConnection>,
    mut reader: OwnedReadHalf,
    mut handler: FrameHandler,
    events: Arc<dyn EventReceiver>,
    cancel: CancellationToken,
    exited: CancellationToken,
    log: Logger,
) {
    let _exit_guard = exited.drop_guard();
    let mut decoder = FrameDecoder::new();
    let mut buf = vec![0u8; READ_BUFFER_SIZE];

    let failure = loop {
        let read = tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            read = reader.read(&mut buf) => read,
        };

        match read {
            Ok(0) => break NicoError::Network("connection closed by peer".to_string()),
            Ok(n) => match decoder.feed(&buf[..n]) {
                Ok(frames) => {
                    for frame in frames {
                        if cancel.is_cancelled() {
                            return;
                        }
                        handler(frame);
                    }
                }
                Err(e) => {
                    log::warn!(target: log.target(), "dropping malformed data: {e}");
                    events.proceed_nico_event(NicoEvent::CommentErr(e));
                }
            },
            Err(e) if is_temporary(&e) => {
                log::warn!(target: log.target(), "temporary read error: {e}");
                events.proceed_nico_event(NicoEvent::CommentErr(e.into()));
            }
            Err(e) => break NicoError::Network(e.to_string()),
        }
    };

    if cancel.is_cancelled() {
        return;
    }

    log::warn!(target: log.target(), "read loop failed: {failure}");
    events.proceed_nico_event(NicoEvent::CommentErr(failure));

    let Some(conn) = conn.upgrade() else {
        return;
    };
    tokio::spawn(async move {
        match conn.disconnect().await {
            Ok(()) => events.proceed_nico_event(NicoEvent::CommentClose),
            Err(NicoError::AlreadyDisconnecting) => {}
            Err(e) => events.proceed_nico_event(NicoEvent::CommentErr(e)),
        }
    });
}
