//! Per-exchange protocol state machine.
//!
//! An [`ExchangeSession`] owns one connection for the duration of one
//! exchange: it sends the request frame, dispatches inbound frames to an
//! [`ExchangeSink`], answers `Done` with an `Ack`, and resolves to a single
//! terminal result.
//!
//! ```text
//! Started ──send──▶ Active ──Done──▶ AwaitingAck ──ack sent──▶ Completed
//!    │                 │                  │
//!    └─────────────────┴──────────────────┴──────────────────▶ Failed
//! ```
//!
//! Cancellation sends a `Cancel` frame and lets the service finish the
//! exchange with its usual `Done`; it is not a separate way out.

use serde_json::Value;
use sonic_proto::{
    metadata_from_schema, ColumnMeta, Completion, Frame, ProgressInfo, CANCEL_FRAME, ACK_FRAME,
};
use tokio::sync::{mpsc, oneshot};

use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::registry::TicketId;
use crate::transport::{CloseFrame, TransportEvent};

/// Session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Request not yet sent.
    Started,
    /// Request sent, frames flowing.
    Active,
    /// `Done` received, acknowledgement in flight.
    AwaitingAck,
    /// Acknowledged; terminal.
    Completed,
    /// Transport failure; terminal.
    Failed,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Completed | SessionState::Failed)
    }
}

/// Receives the intermediate events of an exchange.
pub trait ExchangeSink: Send {
    fn on_progress(&mut self, _progress: ProgressInfo) {}
    fn on_metadata(&mut self, _columns: Vec<ColumnMeta>) {}
    /// Carries the service-assigned trace id.
    fn on_started(&mut self, _trace_id: Option<String>) {}
    fn on_output(&mut self, _data: Value) {}
}

/// A cancellation request for a running exchange.
#[derive(Debug)]
pub struct CancelRequest {
    reply: Option<oneshot::Sender<Result<()>>>,
}

impl CancelRequest {
    /// A request whose sender waits for the outcome of the cancel send.
    pub fn new() -> (Self, oneshot::Receiver<Result<()>>) {
        let (tx, rx) = oneshot::channel();
        (Self { reply: Some(tx) }, rx)
    }

    /// A request nobody waits on.
    pub fn detached() -> Self {
        Self { reply: None }
    }

    pub(crate) fn reply(self, result: Result<()>) {
        if let Some(tx) = self.reply {
            let _ = tx.send(result);
        }
    }
}

/// Drives one exchange over one connection.
pub struct ExchangeSession<'a, S: ExchangeSink> {
    ticket: TicketId,
    conn: &'a mut Connection,
    sink: &'a mut S,
    state: SessionState,
    completion: Option<Completion>,
    debug: bool,
}

impl<'a, S: ExchangeSink> ExchangeSession<'a, S> {
    pub fn new(ticket: TicketId, conn: &'a mut Connection, sink: &'a mut S) -> Self {
        Self {
            ticket,
            conn,
            sink,
            state: SessionState::Started,
            completion: None,
            debug: false,
        }
    }

    /// Log frames at `debug` instead of `trace`.
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Run the exchange to its terminal state.
    ///
    /// The returned result is the exchange's only terminal report. On
    /// transport failure the connection is flagged for destruction; the
    /// caller returns it to the pool either way.
    pub async fn drive(
        mut self,
        request: &Frame,
        cancels: &mut mpsc::UnboundedReceiver<CancelRequest>,
    ) -> Result<()> {
        let bytes = match request.encode() {
            Ok(bytes) => bytes,
            Err(e) => {
                // Nothing was sent; the connection is still clean.
                self.state = SessionState::Failed;
                return Err(e.into());
            }
        };

        self.log_frame("sending", request.event());
        if let Err(e) = self.conn.send(bytes).await {
            return self.fail(e);
        }
        self.state = SessionState::Active;

        let mut cancels_open = true;
        loop {
            tokio::select! {
                biased;

                event = self.conn.next_event() => {
                    let step = match event {
                        Some(TransportEvent::Message(bytes)) => self.on_message(&bytes).await,
                        Some(TransportEvent::Error { message, fatal }) => {
                            tracing::debug!(ticket = %self.ticket, error = %message, fatal, "transport error");
                            if fatal {
                                Some(self.fail(Error::Transport(message)))
                            } else {
                                None
                            }
                        }
                        Some(TransportEvent::Closed(frame)) => Some(self.on_closed(frame)),
                        None => Some(self.on_closed(CloseFrame::abnormal("transport went away"))),
                    };
                    if let Some(result) = step {
                        return result;
                    }
                }

                request = cancels.recv(), if cancels_open => match request {
                    Some(request) => self.on_cancel(request).await,
                    None => cancels_open = false,
                },
            }
        }
    }

    async fn on_message(&mut self, bytes: &[u8]) -> Option<Result<()>> {
        let frame = match Frame::decode(bytes) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(ticket = %self.ticket, error = %e, "ignoring undecodable frame");
                return None;
            }
        };
        self.log_frame("received", frame.event());

        match frame {
            Frame::Progress(payload) => self.sink.on_progress(ProgressInfo::from_payload(&payload)),
            Frame::Metadata(schema) => self.sink.on_metadata(metadata_from_schema(&schema)),
            Frame::Started(trace_id) => self.sink.on_started(trace_id),
            Frame::Output(data) => self.sink.on_output(data),
            Frame::Done(completion) => return Some(self.on_done(completion).await),
            // Unknown codes, and client-side codes echoed back, are ignored.
            _ => {}
        }
        None
    }

    async fn on_done(&mut self, completion: Completion) -> Result<()> {
        self.state = SessionState::AwaitingAck;
        self.completion = Some(completion);

        self.log_frame("sending", sonic_proto::event::ACK);
        if let Err(e) = self.conn.send(ACK_FRAME.to_vec()).await {
            // The outcome is already known; only the socket is suspect.
            tracing::debug!(ticket = %self.ticket, error = %e, "failed to acknowledge completion");
            self.conn.mark_for_destroy();
        }

        self.state = SessionState::Completed;
        match self.completion.take().unwrap_or_default() {
            Completion { error: None, .. } => {
                tracing::debug!(ticket = %self.ticket, "exchange completed");
                Ok(())
            }
            Completion {
                error: Some(message),
                trace_id,
            } => {
                tracing::debug!(ticket = %self.ticket, error = %message, "exchange failed on the service");
                Err(Error::Protocol { trace_id, message })
            }
        }
    }

    fn on_closed(&mut self, frame: CloseFrame) -> Result<()> {
        let err = match self.conn.transport_error() {
            Some(message) => Error::Transport(message.to_string()),
            None => Error::UnexpectedClose(frame),
        };
        self.fail(err)
    }

    async fn on_cancel(&mut self, request: CancelRequest) {
        if self.state != SessionState::Active || !self.conn.is_open() {
            request.reply(Ok(()));
            return;
        }

        tracing::debug!(ticket = %self.ticket, "sending cancel");
        let result = self.conn.send(CANCEL_FRAME.to_vec()).await;
        request.reply(result);
    }

    fn fail(&mut self, err: Error) -> Result<()> {
        tracing::debug!(ticket = %self.ticket, state = ?self.state, error = %err, "exchange failed");
        self.state = SessionState::Failed;
        self.conn.mark_for_destroy();
        Err(err)
    }

    fn log_frame(&self, direction: &str, event: &str) {
        if self.debug {
            tracing::debug!(ticket = %self.ticket, connection = self.conn.id(), event, "{} frame", direction);
        } else {
            tracing::trace!(ticket = %self.ticket, connection = self.conn.id(), event, "{} frame", direction);
        }
    }
}
