//! Caller-facing handles for running exchanges.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use serde_json::Value;
use sonic_proto::{ColumnMeta, ProgressInfo};
use tokio::sync::{mpsc, oneshot};

use crate::error::{Error, Result};
use crate::registry::{Canceller, TicketId};
use crate::session::ExchangeSink;

/// A submitted `run` or `authenticate` request.
///
/// Await it for the terminal result. [`cancel`](Self::cancel) asks the
/// service to stop early; the future still resolves through the normal
/// completion path.
pub struct Execution<T> {
    canceller: Canceller,
    result: oneshot::Receiver<Result<T>>,
}

impl<T> Execution<T> {
    pub(crate) fn new(canceller: Canceller, result: oneshot::Receiver<Result<T>>) -> Self {
        Self { canceller, result }
    }

    /// Ticket of this exchange.
    pub fn ticket(&self) -> TicketId {
        self.canceller.ticket()
    }

    /// Request cancellation. Resolves once the cancel frame was sent.
    pub async fn cancel(&self) -> Result<()> {
        self.canceller.cancel().await
    }

    /// A handle that can cancel this exchange from elsewhere.
    pub fn canceller(&self) -> Canceller {
        self.canceller.clone()
    }
}

impl<T> Unpin for Execution<T> {}

impl<T> Future for Execution<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.result).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(Error::Internal(
                "exchange task ended without a result".to_string(),
            ))),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Events yielded by a [`QueryStream`].
#[derive(Debug)]
pub enum StreamEvent {
    /// One output batch.
    Data(Value),
    Progress(ProgressInfo),
    Metadata(Vec<ColumnMeta>),
    /// Carries the service-assigned trace id.
    Started(Option<String>),
    /// The exchange succeeded. Always the last event.
    Done,
    /// The exchange failed. Always the last event.
    Error(Error),
}

impl StreamEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Done | StreamEvent::Error(_))
    }
}

/// A submitted `stream` request.
///
/// Yields intermediate events as they arrive, then exactly one of
/// [`StreamEvent::Done`] or [`StreamEvent::Error`], then ends.
pub struct QueryStream {
    canceller: Canceller,
    events: mpsc::UnboundedReceiver<StreamEvent>,
}

impl QueryStream {
    pub(crate) fn new(canceller: Canceller, events: mpsc::UnboundedReceiver<StreamEvent>) -> Self {
        Self { canceller, events }
    }

    /// Ticket of this exchange.
    pub fn ticket(&self) -> TicketId {
        self.canceller.ticket()
    }

    /// Request cancellation. Resolves once the cancel frame was sent.
    pub async fn cancel(&self) -> Result<()> {
        self.canceller.cancel().await
    }

    /// A handle that can cancel this exchange from elsewhere.
    pub fn canceller(&self) -> Canceller {
        self.canceller.clone()
    }

    /// Receive the next event.
    pub async fn next_event(&mut self) -> Option<StreamEvent> {
        self.events.recv().await
    }
}

impl Stream for QueryStream {
    type Item = StreamEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<StreamEvent>> {
        self.events.poll_recv(cx)
    }
}

/// Buffers output batches in arrival order.
#[derive(Debug, Default)]
pub(crate) struct CollectSink {
    pub rows: Vec<Value>,
}

impl ExchangeSink for CollectSink {
    fn on_output(&mut self, data: Value) {
        self.rows.push(data);
    }
}

/// Forwards every event to a stream.
pub(crate) struct ForwardSink {
    pub events: mpsc::UnboundedSender<StreamEvent>,
}

impl ForwardSink {
    fn forward(&self, event: StreamEvent) {
        // The caller may have dropped the stream; the exchange still runs to completion.
        let _ = self.events.send(event);
    }
}

impl ExchangeSink for ForwardSink {
    fn on_progress(&mut self, progress: ProgressInfo) {
        self.forward(StreamEvent::Progress(progress));
    }

    fn on_metadata(&mut self, columns: Vec<ColumnMeta>) {
        self.forward(StreamEvent::Metadata(columns));
    }

    fn on_started(&mut self, trace_id: Option<String>) {
        self.forward(StreamEvent::Started(trace_id));
    }

    fn on_output(&mut self, data: Value) {
        self.forward(StreamEvent::Data(data));
    }
}

/// Keeps the first element of the output batch as the issued token.
#[derive(Debug, Default)]
pub(crate) struct TokenSink {
    pub token: Option<String>,
}

impl ExchangeSink for TokenSink {
    fn on_output(&mut self, data: Value) {
        let first = match data {
            Value::Array(mut elems) if !elems.is_empty() => elems.swap_remove(0),
            Value::Array(_) => return,
            other => other,
        };
        self.token = match first {
            Value::String(token) => Some(token),
            Value::Null => None,
            other => Some(other.to_string()),
        };
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_collect_sink_keeps_order() {
        let mut sink = CollectSink::default();
        sink.on_output(json!([1]));
        sink.on_output(json!([2]));
        sink.on_progress(ProgressInfo::from_payload(&Default::default()));
        assert_eq!(sink.rows, vec![json!([1]), json!([2])]);
    }

    #[test]
    fn test_token_sink() {
        let mut sink = TokenSink::default();
        sink.on_output(json!(["tok-123", 42]));
        assert_eq!(sink.token.as_deref(), Some("tok-123"));

        let mut sink = TokenSink::default();
        sink.on_output(json!([]));
        assert!(sink.token.is_none());
    }

    #[tokio::test]
    async fn test_execution_reports_lost_task() {
        let (canceller, _rx) = Canceller::new(TicketId::new(4));
        let (tx, rx) = oneshot::channel::<Result<()>>();
        let execution = Execution::new(canceller, rx);
        assert_eq!(execution.ticket(), TicketId::new(4));

        drop(tx);
        assert!(matches!(execution.await, Err(Error::Internal(_))));
    }

    #[test]
    fn test_terminal_events() {
        assert!(StreamEvent::Done.is_terminal());
        assert!(StreamEvent::Error(Error::ClientClosed).is_terminal());
        assert!(!StreamEvent::Data(json!(1)).is_terminal());
    }
}
