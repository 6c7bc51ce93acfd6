//! Transport over nng `Pair0` sockets.
//!
//! For services exposed over nng's `tcp://` and `ipc://` transports. nng
//! preserves message boundaries, so every protocol frame travels as one nng
//! message. Each
//! connection gets its own socket and a blocking reader thread that feeds
//! the connection's event channel.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use ::nng::options::{Options, RecvMaxSize, RecvTimeout, SendTimeout};
use ::nng::{Message, PipeEvent, Protocol, Socket};
use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{Channel, CloseFrame, Link, Transport, TransportEvent};
use crate::error::{Error, Result};

/// How long the reader thread blocks before re-checking for shutdown.
const RECV_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Default send timeout.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(30);

static NEXT_SOCKET_ID: AtomicU64 = AtomicU64::new(1);

/// Transport that opens one nng `Pair0` socket per connection.
#[derive(Debug, Clone)]
pub struct NngTransport {
    max_message_size: usize,
    send_timeout: Duration,
}

impl NngTransport {
    pub fn new(max_message_size: usize) -> Self {
        Self {
            max_message_size,
            send_timeout: DEFAULT_SEND_TIMEOUT,
        }
    }

    /// Set the send timeout.
    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }
}

impl Default for NngTransport {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_MAX_MESSAGE_SIZE)
    }
}

#[async_trait]
impl Transport for NngTransport {
    async fn open(&self, address: &str) -> Result<Channel> {
        let transport = self.clone();
        let address = address.to_string();
        tokio::task::spawn_blocking(move || transport.dial(&address))
            .await
            .map_err(|e| Error::Internal(format!("dial task failed: {}", e)))?
    }
}

impl NngTransport {
    fn dial(&self, address: &str) -> Result<Channel> {
        let open_error = |reason: String| Error::TransportOpen {
            address: address.to_string(),
            reason,
        };

        let socket = Socket::new(Protocol::Pair0)
            .map_err(|e| open_error(format!("failed to create socket: {}", e)))?;

        socket
            .set_opt::<RecvMaxSize>(self.max_message_size)
            .map_err(|e| open_error(format!("failed to set max message size: {}", e)))?;
        socket
            .set_opt::<RecvTimeout>(Some(RECV_POLL_INTERVAL))
            .map_err(|e| open_error(format!("failed to set recv timeout: {}", e)))?;
        socket
            .set_opt::<SendTimeout>(Some(self.send_timeout))
            .map_err(|e| open_error(format!("failed to set send timeout: {}", e)))?;

        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            id: NEXT_SOCKET_ID.fetch_add(1, Ordering::Relaxed),
            open: AtomicBool::new(false),
            events: tx,
        });

        let notify = shared.clone();
        socket
            .pipe_notify(move |_pipe, event| {
                if let PipeEvent::RemovePost = event {
                    notify.mark_closed(CloseFrame::abnormal("peer disconnected"));
                }
            })
            .map_err(|e| open_error(format!("failed to register pipe notifications: {}", e)))?;

        socket
            .dial(address)
            .map_err(|e| open_error(e.to_string()))?;
        shared.open.store(true, Ordering::SeqCst);

        let reader_socket = socket.clone();
        let reader_shared = shared.clone();
        thread::Builder::new()
            .name(format!("sonic-nng-reader-{}", shared.id))
            .spawn(move || read_loop(reader_socket, reader_shared))
            .map_err(|e| open_error(format!("failed to spawn reader thread: {}", e)))?;

        tracing::debug!(socket = shared.id, address, "nng connection established");

        let link = Arc::new(NngLink { socket, shared });
        Ok(Channel::new(link, rx))
    }
}

/// State shared between the link, the reader thread and the pipe callback.
struct Shared {
    id: u64,
    open: AtomicBool,
    events: mpsc::UnboundedSender<TransportEvent>,
}

impl Shared {
    /// Emit the close event once, whoever notices first.
    fn mark_closed(&self, frame: CloseFrame) {
        if self.open.swap(false, Ordering::SeqCst) {
            tracing::debug!(socket = self.id, %frame, "nng connection closed");
            let _ = self.events.send(TransportEvent::Closed(frame));
        }
    }
}

fn read_loop(socket: Socket, shared: Arc<Shared>) {
    loop {
        match socket.recv() {
            Ok(msg) => {
                if shared
                    .events
                    .send(TransportEvent::Message(msg.as_slice().to_vec()))
                    .is_err()
                {
                    break;
                }
            }
            Err(::nng::Error::TimedOut) => {
                if !shared.open.load(Ordering::SeqCst) {
                    break;
                }
            }
            Err(::nng::Error::Closed) => {
                shared.mark_closed(CloseFrame::normal("socket closed"));
                break;
            }
            Err(e) => {
                let _ = shared.events.send(TransportEvent::Error {
                    message: e.to_string(),
                    fatal: false,
                });
                shared.mark_closed(CloseFrame::abnormal(e.to_string()));
                break;
            }
        }
    }
    socket.close();
}

struct NngLink {
    socket: Socket,
    shared: Arc<Shared>,
}

#[async_trait]
impl Link for NngLink {
    async fn send(&self, bytes: Vec<u8>) -> Result<()> {
        if !self.is_open() {
            return Err(Error::Transport("connection is closed".to_string()));
        }

        let socket = self.socket.clone();
        tokio::task::spawn_blocking(move || {
            socket
                .send(Message::from(bytes.as_slice()))
                .map_err(|(_, e)| Error::Transport(format!("failed to send: {}", e)))
        })
        .await
        .map_err(|e| Error::Internal(format!("send task failed: {}", e)))?
    }

    async fn ping(&self) -> Result<()> {
        // Pair sockets have no ping frame; a live pipe is the liveness signal.
        if self.is_open() {
            Ok(())
        } else {
            Err(Error::Transport("no live pipe".to_string()))
        }
    }

    fn close(&self, code: u16, reason: &str) {
        self.shared.mark_closed(CloseFrame::new(code, reason));
        self.socket.close();
    }

    fn is_open(&self) -> bool {
        self.shared.open.load(Ordering::SeqCst)
    }
}
