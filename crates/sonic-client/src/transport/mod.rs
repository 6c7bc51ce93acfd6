//! Message-socket transport abstraction.
//!
//! The protocol engine never talks to sockets directly. A [`Transport`]
//! opens [`Channel`]s; each channel pairs a [`Link`] used to send and close
//! with an event receiver delivering inbound messages, errors and the close
//! notification in the order the socket produced them.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::{Error, Result};

pub mod nng;
pub mod ws;

pub use self::nng::NngTransport;
pub use self::ws::WsTransport;

/// Close code for an orderly shutdown.
pub const CLOSE_NORMAL: u16 = 1000;

/// Close code reported when the peer's close frame carried no status.
pub const CLOSE_NO_STATUS: u16 = 1005;

/// Close code for a connection lost without a close handshake.
pub const CLOSE_ABNORMAL: u16 = 1006;

/// Code and reason attached to a close notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseFrame {
    pub code: u16,
    pub reason: String,
}

impl CloseFrame {
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    pub fn normal(reason: impl Into<String>) -> Self {
        Self::new(CLOSE_NORMAL, reason)
    }

    pub fn abnormal(reason: impl Into<String>) -> Self {
        Self::new(CLOSE_ABNORMAL, reason)
    }

    pub fn is_normal(&self) -> bool {
        self.code == CLOSE_NORMAL
    }
}

impl std::fmt::Display for CloseFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "close: code={}; reason={}", self.code, self.reason)
    }
}

/// Something that happened on a connection.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// One inbound message.
    Message(Vec<u8>),
    /// The socket reported an error. Non-fatal errors are usually followed
    /// by a `Closed` event carrying the authoritative reason.
    Error { message: String, fatal: bool },
    /// The socket closed. No further events follow.
    Closed(CloseFrame),
}

/// Sending half of an open connection.
#[async_trait]
pub trait Link: Send + Sync + 'static {
    /// Send one message. Resolves once the socket accepted it.
    async fn send(&self, bytes: Vec<u8>) -> Result<()>;

    /// Liveness check. Resolves once the peer is known to be reachable.
    async fn ping(&self) -> Result<()>;

    /// Close the connection. Idempotent.
    fn close(&self, code: u16, reason: &str);

    /// Whether the connection is open for sending.
    fn is_open(&self) -> bool;
}

/// An open connection as handed out by a [`Transport`].
pub struct Channel {
    pub link: Arc<dyn Link>,
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
}

impl Channel {
    pub fn new(link: Arc<dyn Link>, events: mpsc::UnboundedReceiver<TransportEvent>) -> Self {
        Self { link, events }
    }
}

/// Pick the transport for an address: WebSocket for `ws://` and `wss://`,
/// nng for everything else (`tcp://`, `ipc://`, ...).
pub fn transport_for(address: &str, max_message_size: usize) -> Arc<dyn Transport> {
    if address.starts_with("ws://") || address.starts_with("wss://") {
        Arc::new(WsTransport::new(max_message_size))
    } else {
        Arc::new(NngTransport::new(max_message_size))
    }
}

/// A link with no socket behind it. Sends fail and it reports closed.
pub(crate) struct DetachedLink;

#[async_trait]
impl Link for DetachedLink {
    async fn send(&self, _bytes: Vec<u8>) -> Result<()> {
        Err(Error::Transport("connection detached".into()))
    }

    async fn ping(&self) -> Result<()> {
        Err(Error::Transport("connection detached".into()))
    }

    fn close(&self, _code: u16, _reason: &str) {}

    fn is_open(&self) -> bool {
        false
    }
}

/// Factory for connections to a service address.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Open a connection. Fails with [`crate::Error::TransportOpen`].
    async fn open(&self, address: &str) -> Result<Channel>;
}
