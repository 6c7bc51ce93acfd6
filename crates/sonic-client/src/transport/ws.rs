//! Transport over plain WebSocket connections.
//!
//! Each protocol frame travels as one text message. A reader task feeds the
//! connection's event channel and a writer task owns the sending half of the
//! socket, so `Link::close` can stay synchronous. Liveness is a real
//! ping/pong round trip.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Notify};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame as WsCloseFrame, WebSocketConfig};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async_with_config, MaybeTlsStream, WebSocketStream};

use super::{Channel, CloseFrame, Link, Transport, TransportEvent, CLOSE_NO_STATUS};
use crate::error::{Error, Result};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

static NEXT_SOCKET_ID: AtomicU64 = AtomicU64::new(1);

/// Transport that opens one WebSocket per connection.
#[derive(Debug, Clone)]
pub struct WsTransport {
    max_message_size: usize,
}

impl WsTransport {
    pub fn new(max_message_size: usize) -> Self {
        Self { max_message_size }
    }
}

impl Default for WsTransport {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_MAX_MESSAGE_SIZE)
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn open(&self, address: &str) -> Result<Channel> {
        let mut config = WebSocketConfig::default();
        config.max_message_size = Some(self.max_message_size);

        let (socket, _response) = connect_async_with_config(address, Some(config), false)
            .await
            .map_err(|e| Error::TransportOpen {
                address: address.to_string(),
                reason: e.to_string(),
            })?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            id: NEXT_SOCKET_ID.fetch_add(1, Ordering::Relaxed),
            open: AtomicBool::new(true),
            events: events_tx,
            pong: Notify::new(),
        });

        let (sink, stream) = socket.split();
        tokio::spawn(write_loop(sink, outbound_rx));
        tokio::spawn(read_loop(stream, shared.clone()));

        tracing::debug!(socket = shared.id, address, "websocket connection established");

        let link = Arc::new(WsLink {
            outbound: outbound_tx,
            shared,
        });
        Ok(Channel::new(link, events_rx))
    }
}

enum Outbound {
    Message(Message, oneshot::Sender<Result<()>>),
    Close(WsCloseFrame<'static>),
}

/// State shared between the link and the reader task.
struct Shared {
    id: u64,
    open: AtomicBool,
    events: mpsc::UnboundedSender<TransportEvent>,
    pong: Notify,
}

impl Shared {
    fn deliver(&self, bytes: Vec<u8>) {
        if self.open.load(Ordering::SeqCst) {
            let _ = self.events.send(TransportEvent::Message(bytes));
        }
    }

    /// Emit the close event once, whoever notices first.
    fn mark_closed(&self, frame: CloseFrame) {
        if self.open.swap(false, Ordering::SeqCst) {
            tracing::debug!(socket = self.id, %frame, "websocket connection closed");
            let _ = self.events.send(TransportEvent::Closed(frame));
        }
    }
}

async fn write_loop(
    mut sink: SplitSink<WsStream, Message>,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
) {
    while let Some(command) = outbound.recv().await {
        match command {
            Outbound::Message(message, reply) => {
                let result = sink
                    .send(message)
                    .await
                    .map_err(|e| Error::Transport(format!("failed to send: {}", e)));
                let _ = reply.send(result);
            }
            Outbound::Close(frame) => {
                let _ = sink.send(Message::Close(Some(frame))).await;
                break;
            }
        }
    }
    let _ = sink.close().await;
}

async fn read_loop(mut stream: SplitStream<WsStream>, shared: Arc<Shared>) {
    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Text(text)) => shared.deliver(text.into_bytes()),
            Ok(Message::Binary(bytes)) => shared.deliver(bytes),
            Ok(Message::Pong(_)) => shared.pong.notify_waiters(),
            Ok(Message::Ping(_)) | Ok(Message::Frame(_)) => {}
            Ok(Message::Close(frame)) => {
                let frame = match frame {
                    Some(frame) => CloseFrame::new(u16::from(frame.code), frame.reason.into_owned()),
                    None => CloseFrame::new(CLOSE_NO_STATUS, ""),
                };
                shared.mark_closed(frame);
                return;
            }
            Err(e) => {
                if shared.open.load(Ordering::SeqCst) {
                    let _ = shared.events.send(TransportEvent::Error {
                        message: e.to_string(),
                        fatal: false,
                    });
                }
                shared.mark_closed(CloseFrame::abnormal(e.to_string()));
                return;
            }
        }
    }
    shared.mark_closed(CloseFrame::abnormal("connection lost"));
}

struct WsLink {
    outbound: mpsc::UnboundedSender<Outbound>,
    shared: Arc<Shared>,
}

impl WsLink {
    async fn write(&self, message: Message) -> Result<()> {
        if !self.is_open() {
            return Err(Error::Transport("connection is closed".to_string()));
        }
        let (reply_tx, reply_rx) = oneshot::channel();
        self.outbound
            .send(Outbound::Message(message, reply_tx))
            .map_err(|_| Error::Transport("writer has stopped".to_string()))?;
        reply_rx
            .await
            .map_err(|_| Error::Transport("writer has stopped".to_string()))?
    }
}

#[async_trait]
impl Link for WsLink {
    async fn send(&self, bytes: Vec<u8>) -> Result<()> {
        let message = match String::from_utf8(bytes) {
            Ok(text) => Message::Text(text),
            Err(e) => Message::Binary(e.into_bytes()),
        };
        self.write(message).await
    }

    async fn ping(&self) -> Result<()> {
        // Register before sending so a fast pong is not missed.
        let pong = self.shared.pong.notified();
        self.write(Message::Ping(Vec::new())).await?;
        pong.await;
        Ok(())
    }

    fn close(&self, code: u16, reason: &str) {
        self.shared.mark_closed(CloseFrame::new(code, reason));
        let _ = self.outbound.send(Outbound::Close(WsCloseFrame {
            code: CloseCode::from(code),
            reason: reason.to_string().into(),
        }));
    }

    fn is_open(&self) -> bool {
        self.shared.open.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    use super::*;

    /// Accept one connection and answer every text message with a done frame.
    async fn serve_once() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = format!("ws://{}/v1/query", listener.local_addr().unwrap());

        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut socket = accept_async(tcp).await.unwrap();
            while let Some(Ok(message)) = socket.next().await {
                match message {
                    Message::Text(text) if text.contains(r#""e":"Q""#) => {
                        socket
                            .send(Message::Text(r#"{"e":"D"}"#.to_string()))
                            .await
                            .unwrap();
                    }
                    Message::Text(text) if text.contains(r#""e":"H""#) => {
                        let frame = WsCloseFrame {
                            code: CloseCode::from(4000),
                            reason: "bye".into(),
                        };
                        socket.close(Some(frame)).await.unwrap();
                    }
                    _ => {}
                }
            }
        });

        address
    }

    async fn next_event(channel: &mut Channel) -> TransportEvent {
        tokio::time::timeout(Duration::from_secs(2), channel.events.recv())
            .await
            .expect("no event in time")
            .expect("event channel closed")
    }

    #[tokio::test]
    async fn test_send_and_receive() {
        let address = serve_once().await;
        let mut channel = WsTransport::default().open(&address).await.unwrap();

        assert!(channel.link.is_open());
        channel.link.send(br#"{"e":"Q","v":"1"}"#.to_vec()).await.unwrap();
        assert_eq!(
            next_event(&mut channel).await,
            TransportEvent::Message(br#"{"e":"D"}"#.to_vec())
        );
    }

    #[tokio::test]
    async fn test_ping_round_trip() {
        let address = serve_once().await;
        let channel = WsTransport::default().open(&address).await.unwrap();

        tokio::time::timeout(Duration::from_secs(2), channel.link.ping())
            .await
            .expect("no pong in time")
            .unwrap();
    }

    #[tokio::test]
    async fn test_server_close_carries_code_and_reason() {
        let address = serve_once().await;
        let mut channel = WsTransport::default().open(&address).await.unwrap();

        channel.link.send(br#"{"e":"H","v":"k"}"#.to_vec()).await.unwrap();
        assert_eq!(
            next_event(&mut channel).await,
            TransportEvent::Closed(CloseFrame::new(4000, "bye"))
        );
        assert!(!channel.link.is_open());
        assert!(channel.link.send(b"{}".to_vec()).await.is_err());
    }

    #[tokio::test]
    async fn test_local_close_emits_once() {
        let address = serve_once().await;
        let mut channel = WsTransport::default().open(&address).await.unwrap();

        channel.link.close(1000, "pool#destroy");
        channel.link.close(1000, "again");
        assert_eq!(
            next_event(&mut channel).await,
            TransportEvent::Closed(CloseFrame::normal("pool#destroy"))
        );
        assert!(channel.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_open_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = format!("ws://{}/v1/query", listener.local_addr().unwrap());
        drop(listener);

        let err = WsTransport::default().open(&address).await.unwrap_err();
        assert!(matches!(err, Error::TransportOpen { .. }));
    }
}
