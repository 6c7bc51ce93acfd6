//! Command-line arguments.

use std::time::Duration;

use clap::{Args as ClapArgs, Parser, Subcommand};
use serde_json::Value;
use sonic_client::config::DEFAULT_ADDRESS;
use sonic_client::pool::DEFAULT_MAX_CONNECTIONS;
use sonic_client::{ClientConfig, PoolConfig};
use sonic_proto::Query;

/// Sonic Command-Line Client
#[derive(Parser, Debug)]
#[command(name = "sonic")]
#[command(version, about = "Run queries against a sonic service")]
pub struct Args {
    #[command(flatten)]
    pub client: ClientArgs,

    #[command(subcommand)]
    pub command: Command,
}

/// Options shared by every command.
#[derive(ClapArgs, Debug)]
pub struct ClientArgs {
    /// Service address
    #[arg(short, long, default_value = DEFAULT_ADDRESS)]
    pub address: String,

    /// Maximum number of pooled connections
    #[arg(long, default_value_t = DEFAULT_MAX_CONNECTIONS)]
    pub max_pool: usize,

    /// How long to wait for a free connection, in milliseconds
    #[arg(long, default_value_t = 3000)]
    pub acquire_timeout: u64,

    /// Maximum message size in MB
    #[arg(long, default_value_t = 64)]
    pub max_message_mb: usize,

    /// Auth token attached to queries
    #[arg(long)]
    pub token: Option<String>,

    /// Log every frame at debug level
    #[arg(long)]
    pub debug: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a query and print its rows when it finishes
    Run(QueryArgs),
    /// Run a query and print rows and progress as they arrive
    Stream(QueryArgs),
    /// Exchange a user and API key for an auth token
    Auth {
        user: String,
        api_key: String,
        /// Trace id to tag the request with
        #[arg(long)]
        trace_id: Option<String>,
    },
}

#[derive(ClapArgs, Debug)]
pub struct QueryArgs {
    /// Query text
    pub query: String,

    /// Source configuration as a JSON object
    #[arg(short, long)]
    pub config: Option<String>,

    /// Trace id to tag the query with
    #[arg(long)]
    pub trace_id: Option<String>,
}

impl ClientArgs {
    /// Convert command-line arguments to client configuration.
    pub fn into_config(self) -> ClientConfig {
        let pool = PoolConfig::new()
            .with_max_connections(self.max_pool)
            .with_acquire_timeout(Duration::from_millis(self.acquire_timeout));

        ClientConfig::new(self.address)
            .with_pool(pool)
            .with_max_message_size(self.max_message_mb.saturating_mul(1024 * 1024))
            .with_debug(self.debug)
    }
}

impl QueryArgs {
    /// Build the query to submit.
    pub fn to_query(&self, token: Option<&str>) -> Result<Query, serde_json::Error> {
        let mut query = Query::new(&self.query);
        if let Some(config) = &self.config {
            query = query.with_config(serde_json::from_str::<Value>(config)?);
        }
        if let Some(token) = token {
            query = query.with_auth(token);
        }
        if let Some(trace_id) = &self.trace_id {
            query = query.with_trace_id(trace_id);
        }
        Ok(query)
    }
}
