//! Sonic client API.
//!
//! This module provides the main `Client` struct: it issues tickets, runs
//! each exchange on a pooled connection, and owns the client-wide shutdown.

use std::sync::Arc;

use futures::future::join_all;
use serde_json::Value;
use sonic_proto::{AuthRequest, Frame, Query};
use tokio::sync::{mpsc, oneshot};

use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::execution::{CollectSink, Execution, ForwardSink, QueryStream, StreamEvent, TokenSink};
use crate::lifecycle::{ClientState, Lifecycle};
use crate::pool::{ConnectionPool, PoolStatus};
use crate::registry::{Canceller, Registry, TicketId};
use crate::session::{CancelRequest, ExchangeSession, ExchangeSink};
use crate::transport::{transport_for, Transport};

/// A client for the sonic query service.
///
/// Requests run concurrently, each on its own pooled connection. Methods
/// that submit work spawn onto the current tokio runtime.
///
/// # Example
///
/// ```ignore
/// use sonic_client::{Client, ClientConfig};
/// use sonic_proto::Query;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let client = Client::connect(ClientConfig::localhost()).await;
///
///     let query = Query::new("5").with_config(serde_json::json!({"class": "SyntheticSource"}));
///     let rows = client.run(query)?.await?;
///     println!("got {} rows", rows.len());
///
///     client.close().await?;
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    config: ClientConfig,
    pool: ConnectionPool,
    registry: Registry,
    lifecycle: Lifecycle,
}

impl Client {
    /// Create a client over the transport matching the configured address:
    /// WebSocket for `ws://`, nng otherwise.
    pub async fn connect(config: ClientConfig) -> Self {
        let transport = transport_for(&config.address, config.max_message_size);
        Self::new(config, transport).await
    }

    /// Create a client over the given transport.
    pub async fn new(config: ClientConfig, transport: Arc<dyn Transport>) -> Self {
        let pool = ConnectionPool::new(config.address.clone(), transport, config.pool.clone()).await;
        tracing::debug!(address = %config.address, pool = ?pool.status(), "client ready");

        Self {
            inner: Arc::new(ClientInner {
                config,
                pool,
                registry: Registry::new(),
                lifecycle: Lifecycle::new(),
            }),
        }
    }

    /// Run a query and collect its output batches in order.
    pub fn run(&self, query: Query) -> Result<Execution<Vec<Value>>> {
        self.submit(Frame::Query(query), CollectSink::default(), |sink| Ok(sink.rows))
    }

    /// Run a query and stream its events as they arrive.
    pub fn stream(&self, query: Query) -> Result<QueryStream> {
        let (ticket, canceller, cancels) = self.issue()?;
        let (tx, rx) = mpsc::unbounded_channel();

        let inner = self.inner.clone();
        let task_canceller = canceller.clone();
        tokio::spawn(async move {
            let mut sink = ForwardSink { events: tx };
            let result = inner
                .execute(ticket, Frame::Query(query), &mut sink, task_canceller, cancels)
                .await;
            let terminal = match result {
                Ok(()) => StreamEvent::Done,
                Err(e) => StreamEvent::Error(e),
            };
            let _ = sink.events.send(terminal);
        });

        Ok(QueryStream::new(canceller, rx))
    }

    /// Exchange a user name and API key for an auth token.
    pub fn authenticate(
        &self,
        user: impl Into<String>,
        api_key: impl Into<String>,
        trace_id: Option<String>,
    ) -> Result<Execution<String>> {
        let mut request = AuthRequest::new(user, api_key);
        request.trace_id = trace_id;
        self.submit(Frame::Auth(request), TokenSink::default(), |sink| {
            sink.token.ok_or(Error::MissingToken)
        })
    }

    /// Request cancellation of every running exchange.
    ///
    /// Resolves once each cancel attempt finished, returning the outcome of
    /// each cancel send. The exchanges themselves end on their own.
    pub async fn cancel(&self) -> Vec<(TicketId, Result<()>)> {
        let cancellers = self.inner.registry.cancellers();
        tracing::debug!(running = cancellers.len(), "cancelling running exchanges");
        join_all(cancellers.into_iter().map(|canceller| async move {
            (canceller.ticket(), canceller.cancel().await)
        }))
        .await
    }

    /// Shut the client down.
    ///
    /// Stops accepting requests, cancels everything running, waits for all
    /// connections to come back to the pool and closes them.
    pub async fn close(&self) -> Result<()> {
        self.inner.lifecycle.begin_closing()?;
        tracing::info!(running = self.inner.registry.len(), "closing client");

        for (ticket, result) in self.cancel().await {
            if let Err(e) = result {
                tracing::warn!(ticket = %ticket, error = %e, "failed to cancel exchange");
            }
        }

        self.inner.pool.drain().await;
        self.inner.lifecycle.finish_closing();
        tracing::info!("client closed");
        Ok(())
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ClientState {
        self.inner.lifecycle.state()
    }

    /// Tickets whose exchange currently holds a connection.
    pub fn running(&self) -> Vec<TicketId> {
        self.inner.registry.running()
    }

    /// Snapshot of the connection pool.
    pub fn pool_status(&self) -> PoolStatus {
        self.inner.pool.status()
    }

    /// Get the client configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Check the lifecycle and allocate a ticket.
    fn issue(
        &self,
    ) -> Result<(
        TicketId,
        Canceller,
        mpsc::UnboundedReceiver<CancelRequest>,
    )> {
        self.inner.lifecycle.check_accepting()?;
        let ticket = self.inner.registry.next_ticket();
        let (canceller, cancels) = Canceller::new(ticket);
        Ok((ticket, canceller, cancels))
    }

    /// Spawn an exchange whose result is read out of its sink.
    fn submit<S, T, F>(&self, request: Frame, mut sink: S, finish: F) -> Result<Execution<T>>
    where
        S: ExchangeSink + 'static,
        T: Send + 'static,
        F: FnOnce(S) -> Result<T> + Send + 'static,
    {
        let (ticket, canceller, cancels) = self.issue()?;
        let (tx, rx) = oneshot::channel();

        let inner = self.inner.clone();
        let task_canceller = canceller.clone();
        tokio::spawn(async move {
            let result = inner
                .execute(ticket, request, &mut sink, task_canceller, cancels)
                .await
                .and_then(|()| finish(sink));
            let _ = tx.send(result);
        });

        Ok(Execution::new(canceller, rx))
    }
}

impl ClientInner {
    /// Run one exchange from acquisition to release.
    async fn execute<S: ExchangeSink>(
        &self,
        ticket: TicketId,
        request: Frame,
        sink: &mut S,
        canceller: Canceller,
        mut cancels: mpsc::UnboundedReceiver<CancelRequest>,
    ) -> Result<()> {
        let mut conn = match self.pool.acquire().await {
            Ok(conn) => conn,
            Err(e) => {
                tracing::debug!(ticket = %ticket, error = %e, "failed to acquire connection");
                return Err(e);
            }
        };

        self.registry.insert(ticket, conn.id(), canceller.clone());
        if self.lifecycle.state() != ClientState::Initialized {
            // `close` may have snapshotted the registry before this insert.
            canceller.cancel_detached();
        }
        tracing::debug!(ticket = %ticket, connection = conn.id(), event = request.event(), "exchange started");

        let result = ExchangeSession::new(ticket, &mut *conn, sink)
            .with_debug(self.config.debug)
            .drive(&request, &mut cancels)
            .await;

        self.registry.remove(ticket);
        self.pool.release(conn);

        match &result {
            Ok(()) => tracing::debug!(ticket = %ticket, "exchange finished"),
            Err(e) => tracing::debug!(ticket = %ticket, error = %e, "exchange finished with error"),
        }
        result
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("address", &self.inner.config.address)
            .field("state", &self.state())
            .field("running", &self.inner.registry.len())
            .field("pool", &self.pool_status())
            .finish()
    }
}
