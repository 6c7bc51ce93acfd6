//! Pooled transport connections.

use std::sync::Arc;

use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::mpsc::{self, UnboundedReceiver};

use crate::error::{Error, Result};
use crate::transport::{Channel, CloseFrame, DetachedLink, Link, TransportEvent, CLOSE_NORMAL};

/// Pool-assigned connection identifier.
pub type ConnectionId = u64;

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Open and usable.
    Open,
    /// Close requested locally, waiting for the socket to go away.
    Closing,
    /// Closed, by either side.
    Closed,
}

/// One transport connection plus the bookkeeping the pool needs.
///
/// A connection is owned by at most one exchange at a time; the session
/// borrows it mutably for the duration of the exchange.
pub struct Connection {
    id: ConnectionId,
    link: Arc<dyn Link>,
    events: UnboundedReceiver<TransportEvent>,
    state: ConnectionState,
    transport_error: Option<String>,
    close_frame: Option<CloseFrame>,
    destroy_on_release: bool,
}

impl Connection {
    pub(crate) fn new(id: ConnectionId, channel: Channel) -> Self {
        Self {
            id,
            link: channel.link,
            events: channel.events,
            state: ConnectionState::Open,
            transport_error: None,
            close_frame: None,
            destroy_on_release: false,
        }
    }

    /// Move the socket into a new value, leaving this one closed and inert.
    pub(crate) fn detach(&mut self) -> Connection {
        let inert: Arc<dyn Link> = Arc::new(DetachedLink);
        let (_, events) = mpsc::unbounded_channel();
        let detached = Connection {
            id: self.id,
            link: std::mem::replace(&mut self.link, inert),
            events: std::mem::replace(&mut self.events, events),
            state: self.state,
            transport_error: self.transport_error.take(),
            close_frame: self.close_frame.take(),
            destroy_on_release: self.destroy_on_release,
        };
        self.state = ConnectionState::Closed;
        detached
    }

    /// Get the connection id.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Get the current connection state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Check if the connection can carry an exchange.
    pub fn is_open(&self) -> bool {
        self.state == ConnectionState::Open && self.link.is_open()
    }

    /// Send one serialized frame.
    pub async fn send(&self, bytes: Vec<u8>) -> Result<()> {
        if self.state != ConnectionState::Open {
            return Err(Error::Transport(format!(
                "cannot send in state {:?}",
                self.state
            )));
        }
        self.link.send(bytes).await
    }

    /// Liveness check.
    pub async fn ping(&self) -> Result<()> {
        self.link.ping().await
    }

    /// Wait for the next transport event, tracking close notifications.
    ///
    /// Returns `None` once the transport dropped its event sender.
    pub async fn next_event(&mut self) -> Option<TransportEvent> {
        let event = self.events.recv().await;
        self.observe(event.as_ref());
        event
    }

    /// Consume events that arrived while the connection sat idle.
    ///
    /// Stray messages are dropped; errors and the close notification are
    /// recorded so validation sees them.
    pub fn drain_pending_events(&mut self) {
        loop {
            match self.events.try_recv() {
                Ok(event) => {
                    if let TransportEvent::Message(bytes) = &event {
                        tracing::debug!(
                            connection = self.id,
                            len = bytes.len(),
                            "discarding message received while idle"
                        );
                    }
                    self.observe(Some(&event));
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.observe(None);
                    break;
                }
            }
        }
    }

    fn observe(&mut self, event: Option<&TransportEvent>) {
        match event {
            Some(TransportEvent::Error { message, .. }) => {
                self.transport_error = Some(message.clone());
            }
            Some(TransportEvent::Closed(frame)) => {
                self.state = ConnectionState::Closed;
                self.close_frame = Some(frame.clone());
            }
            Some(TransportEvent::Message(_)) => {}
            None => self.state = ConnectionState::Closed,
        }
    }

    /// The most recent transport error recorded on this connection.
    pub fn transport_error(&self) -> Option<&str> {
        self.transport_error.as_deref()
    }

    /// The close notification, once the connection has closed.
    pub fn close_frame(&self) -> Option<&CloseFrame> {
        self.close_frame.as_ref()
    }

    /// Flag the connection so the pool closes it instead of reusing it.
    pub fn mark_for_destroy(&mut self) {
        self.destroy_on_release = true;
    }

    /// Check whether the connection is flagged for destruction.
    pub fn is_marked_for_destroy(&self) -> bool {
        self.destroy_on_release
    }

    /// Close the connection.
    pub fn close(&mut self, code: u16, reason: &str) {
        if self.state == ConnectionState::Open {
            self.state = ConnectionState::Closing;
            self.link.close(code, reason);
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close(CLOSE_NORMAL, "connection dropped");
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("transport_error", &self.transport_error)
            .field("destroy_on_release", &self.destroy_on_release)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::testing::RecordingLink;
    use crate::transport::CLOSE_ABNORMAL;

    #[tokio::test]
    async fn test_detach_moves_socket() {
        let (link, channel) = RecordingLink::channel();
        let mut conn = Connection::new(3, channel);
        conn.mark_for_destroy();

        let mut detached = conn.detach();
        assert_eq!(detached.id(), 3);
        assert!(detached.is_open());
        assert!(detached.is_marked_for_destroy());
        assert!(!conn.is_open());
        assert!(conn.send(b"{}".to_vec()).await.is_err());

        // Dropping the husk leaves the socket alone.
        drop(conn);
        assert!(link.is_open());

        detached.close(CLOSE_NORMAL, "done");
        assert!(!link.is_open());
    }

    #[tokio::test]
    async fn test_send_records_frame() {
        let (link, channel) = RecordingLink::channel();
        let conn = Connection::new(7, channel);

        assert_eq!(conn.id(), 7);
        assert!(conn.is_open());
        conn.send(br#"{"e":"A"}"#.to_vec()).await.unwrap();
        assert_eq!(link.sent_events(), vec!["A"]);
    }

    #[tokio::test]
    async fn test_idle_close_is_observed() {
        let (link, channel) = RecordingLink::channel();
        let mut conn = Connection::new(1, channel);

        link.push(TransportEvent::Error {
            message: "reset".into(),
            fatal: false,
        });
        link.close(CLOSE_ABNORMAL, "gone");
        conn.drain_pending_events();

        assert_eq!(conn.state(), ConnectionState::Closed);
        assert!(!conn.is_open());
        assert_eq!(conn.transport_error(), Some("reset"));
        assert_eq!(conn.close_frame().map(|f| f.code), Some(CLOSE_ABNORMAL));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (link, channel) = RecordingLink::channel();
        let mut conn = Connection::new(1, channel);

        conn.close(CLOSE_NORMAL, "bye");
        conn.close(CLOSE_NORMAL, "bye again");
        assert_eq!(conn.state(), ConnectionState::Closing);
        assert!(!link.is_open());
        assert!(conn.send(vec![]).await.is_err());
    }

    #[test]
    fn test_destroy_flag() {
        let (_link, channel) = RecordingLink::channel();
        let mut conn = Connection::new(1, channel);
        assert!(!conn.is_marked_for_destroy());
        conn.mark_for_destroy();
        assert!(conn.is_marked_for_destroy());
    }
}
