//! Sonic Command-Line Client
//!
//! Runs or streams a single query, or trades an API key for a token.

mod args;

use clap::Parser;
use futures::StreamExt;
use sonic_client::{Client, StreamEvent};
use sonic_proto::ProgressInfo;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use args::{Args, Command, QueryArgs};

/// Filter used when `RUST_LOG` is not set.
const DEFAULT_DIRECTIVES: &str = "sonic_cli=info";

/// Added by `--debug` so frame logs from the client library show up.
const DEBUG_DIRECTIVE: &str = "sonic_client=debug";

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Initialize tracing
    let base =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVES));
    tracing_subscriber::registry()
        .with(log_filter(base, args.client.debug))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Err(e) = run(args).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn log_filter(base: EnvFilter, debug: bool) -> EnvFilter {
    if !debug {
        return base;
    }
    match DEBUG_DIRECTIVE.parse() {
        Ok(directive) => base.add_directive(directive),
        Err(_) => base,
    }
}

async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let token = args.client.token.clone();
    let config = args.client.into_config();
    tracing::debug!(address = %config.address, max_pool = config.pool.max_connections, "connecting");

    let client = Client::connect(config).await;

    // Ctrl+C cancels whatever is running; the command then finishes normally.
    let canceller = client.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("received interrupt, cancelling");
            for (ticket, result) in canceller.cancel().await {
                if let Err(e) = result {
                    tracing::warn!(ticket = %ticket, error = %e, "cancel failed");
                }
            }
        }
    });

    let result = match args.command {
        Command::Run(query) => run_query(&client, &query, token.as_deref()).await,
        Command::Stream(query) => stream_query(&client, &query, token.as_deref()).await,
        Command::Auth {
            user,
            api_key,
            trace_id,
        } => authenticate(&client, user, api_key, trace_id).await,
    };

    client.close().await?;
    result
}

async fn run_query(
    client: &Client,
    args: &QueryArgs,
    token: Option<&str>,
) -> Result<(), Box<dyn std::error::Error>> {
    let execution = client.run(args.to_query(token)?)?;
    tracing::debug!(ticket = %execution.ticket(), "query submitted");

    let rows = execution.await?;
    for row in &rows {
        println!("{}", row);
    }
    tracing::info!(rows = rows.len(), "query finished");
    Ok(())
}

async fn stream_query(
    client: &Client,
    args: &QueryArgs,
    token: Option<&str>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut stream = client.stream(args.to_query(token)?)?;
    tracing::debug!(ticket = %stream.ticket(), "query submitted");

    let mut rows = 0usize;
    while let Some(event) = stream.next().await {
        match event {
            StreamEvent::Data(row) => {
                rows += 1;
                println!("{}", row);
            }
            StreamEvent::Progress(progress) => eprintln!("{}", format_progress(&progress)),
            StreamEvent::Metadata(columns) => {
                let columns: Vec<String> = columns
                    .iter()
                    .map(|c| format!("{}: {}", c.name, c.type_tag.as_str()))
                    .collect();
                eprintln!("columns: {}", columns.join(", "));
            }
            StreamEvent::Started(trace_id) => {
                tracing::info!(trace_id = trace_id.as_deref().unwrap_or("-"), "query started");
            }
            StreamEvent::Done => {
                tracing::info!(rows, "query finished");
                break;
            }
            StreamEvent::Error(e) => return Err(e.into()),
        }
    }
    Ok(())
}

async fn authenticate(
    client: &Client,
    user: String,
    api_key: String,
    trace_id: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let token = client.authenticate(user, api_key, trace_id)?.await?;
    println!("{}", token);
    Ok(())
}

fn format_progress(progress: &ProgressInfo) -> String {
    let mut line = format!("[{}]", progress.status);
    if let Some(done) = progress.progress {
        line.push_str(&format!(" {}", done));
        if let Some(total) = progress.total {
            line.push_str(&format!("/{}", total));
        }
    }
    if let Some(units) = &progress.units {
        line.push_str(&format!(" {}", units));
    }
    line
}
