//! Ticket issuance and the running registry.
//!
//! Every accepted request gets a [`TicketId`]. Once its exchange holds a
//! connection the ticket is entered in the [`Registry`] together with the
//! connection id and a [`Canceller`]; it is removed when the exchange
//! reaches a terminal state. The registry is keyed by ticket id, so
//! connections never point back at tickets.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio::sync::mpsc;

use crate::connection::ConnectionId;
use crate::error::Result;
use crate::session::CancelRequest;

/// Identifier of one exchange. Unique for the lifetime of a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TicketId(u64);

impl TicketId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for TicketId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Requests cancellation of one exchange.
#[derive(Debug, Clone)]
pub struct Canceller {
    ticket: TicketId,
    requests: mpsc::UnboundedSender<CancelRequest>,
}

impl Canceller {
    /// Create a canceller and the receiving end its session listens on.
    pub fn new(ticket: TicketId) -> (Self, mpsc::UnboundedReceiver<CancelRequest>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { ticket, requests: tx }, rx)
    }

    pub fn ticket(&self) -> TicketId {
        self.ticket
    }

    /// Ask the service to stop the exchange.
    ///
    /// Resolves once the cancel frame was sent, or immediately if the
    /// exchange already finished. If the exchange is still waiting for a
    /// connection the request is held until its query has been sent. The
    /// exchange itself still ends through its normal completion.
    pub async fn cancel(&self) -> Result<()> {
        let (request, reply) = CancelRequest::new();
        if self.requests.send(request).is_err() {
            return Ok(());
        }
        // A dropped reply means the session ended first.
        reply.await.unwrap_or(Ok(()))
    }

    /// Queue a cancellation without waiting for it to be sent.
    pub fn cancel_detached(&self) {
        let _ = self.requests.send(CancelRequest::detached());
    }

    /// Whether the exchange has finished.
    pub fn is_finished(&self) -> bool {
        self.requests.is_closed()
    }
}

/// A running exchange.
#[derive(Debug, Clone)]
pub struct TicketEntry {
    pub connection: ConnectionId,
    pub canceller: Canceller,
}

/// Ticket id allocation plus the set of exchanges holding a connection.
#[derive(Debug)]
pub struct Registry {
    next_id: AtomicU64,
    running: DashMap<TicketId, TicketEntry>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            running: DashMap::new(),
        }
    }

    /// Allocate the next ticket id.
    pub fn next_ticket(&self) -> TicketId {
        TicketId(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    /// Record that an exchange now holds a connection.
    pub fn insert(&self, ticket: TicketId, connection: ConnectionId, canceller: Canceller) {
        debug_assert!(
            !self.running.iter().any(|e| e.value().connection == connection),
            "connection {} already owned by a running ticket",
            connection
        );
        self.running.insert(
            ticket,
            TicketEntry {
                connection,
                canceller,
            },
        );
    }

    /// Remove a finished exchange.
    pub fn remove(&self, ticket: TicketId) -> Option<TicketEntry> {
        self.running.remove(&ticket).map(|(_, entry)| entry)
    }

    /// Connection held by a running ticket.
    pub fn connection_of(&self, ticket: TicketId) -> Option<ConnectionId> {
        self.running.get(&ticket).map(|entry| entry.connection)
    }

    /// Running ticket ids in ascending order.
    pub fn running(&self) -> Vec<TicketId> {
        let mut tickets: Vec<TicketId> = self.running.iter().map(|e| *e.key()).collect();
        tickets.sort();
        tickets
    }

    /// Cancellers of every running ticket.
    pub fn cancellers(&self) -> Vec<Canceller> {
        self.running
            .iter()
            .map(|e| e.value().canceller.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.running.len()
    }

    pub fn is_empty(&self) -> bool {
        self.running.is_empty()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
