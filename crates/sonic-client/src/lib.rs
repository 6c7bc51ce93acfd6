//! Sonic Client - pooled client for the sonic streaming query service.
//!
//! Every request runs as an exchange on its own pooled connection: the
//! request frame goes out, the service streams progress, metadata and
//! output frames back, and a final done frame is acknowledged before the
//! connection returns to the pool.
//!
//! # Quick Start
//!
//! ```ignore
//! use futures::StreamExt;
//! use sonic_client::{Client, ClientConfig, StreamEvent};
//! use sonic_proto::Query;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = Client::connect(ClientConfig::localhost()).await;
//!
//!     // Collect every output batch
//!     let query = Query::new("10").with_config(serde_json::json!({"class": "SyntheticSource"}));
//!     let rows = client.run(query.clone())?.await?;
//!     println!("{} rows", rows.len());
//!
//!     // Or consume events as they arrive
//!     let mut stream = client.stream(query)?;
//!     while let Some(event) = stream.next().await {
//!         if let StreamEvent::Data(row) = event {
//!             println!("{row}");
//!         }
//!     }
//!
//!     client.close().await?;
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod execution;
pub mod lifecycle;
pub mod pool;
pub mod registry;
pub mod session;
pub mod transport;

pub use client::Client;
pub use config::ClientConfig;
pub use connection::{Connection, ConnectionId, ConnectionState};
pub use error::{Error, Result};
pub use execution::{Execution, QueryStream, StreamEvent};
pub use lifecycle::ClientState;
pub use pool::{ConnectionPool, PoolConfig, PoolStatus, PooledConnection};
pub use registry::{Canceller, TicketId};
pub use session::{ExchangeSession, ExchangeSink, SessionState};
pub use transport::{
    transport_for, Channel, CloseFrame, Link, NngTransport, Transport, TransportEvent, WsTransport,
};

/// Re-export protocol types.
pub use sonic_proto as proto;
