use clap::Parser;
use std::{net::SocketAddr, time::Duration};
use tokenscope_feed::{demo::run_demo, serve, FeedConfig, FeedState, DEFAULT_QUEUE_CAPACITY};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "tokenscope-feed", about = "Demo token analysis event stream")]
struct Args {
    #[arg(long, default_value = "127.0.0.1:8000")]
    addr: String,
    #[arg(long, default_value_t = 1500)]
    step_interval_ms: u64,
    #[arg(long, default_value_t = 30)]
    idle_heartbeat: u64,
    /// Serve the endpoint without publishing demo tokens.
    #[arg(long, default_value_t = false)]
    no_demo: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging();

    let addr: SocketAddr = match args.addr.parse() {
        Ok(value) => value,
        Err(err) => {
            error!(event = "invalid_addr", error = %err, addr = %args.addr);
            return;
        }
    };
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(value) => value,
        Err(err) => {
            error!(event = "feed_error", error = %err);
            return;
        }
    };

    let state = FeedState::new(FeedConfig {
        idle_heartbeat: Duration::from_secs(args.idle_heartbeat.max(1)),
        queue_capacity: DEFAULT_QUEUE_CAPACITY,
    });
    if !args.no_demo {
        tokio::spawn(run_demo(
            state.clone(),
            Duration::from_millis(args.step_interval_ms.max(1)),
        ));
    }

    info!(event = "feed_start", addr = %addr);
    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    if let Err(err) = serve(listener, state, shutdown).await {
        error!(event = "feed_error", error = %err);
    }
}

fn init_logging() {
    let level = std::env::var("TOKENSCOPE_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
