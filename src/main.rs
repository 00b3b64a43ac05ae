//! streamhub: real-time market-data distribution service.
//!
//! Connects to spot and futures combined-stream endpoints, normalizes and
//! caches every tick, and fans it out to WebSocket subscribers through the
//! Hub.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use clap::Parser;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use streamhub_backend::client::{self, ClientConfig};
use streamhub_backend::config::Config;
use streamhub_backend::supervisor::{NoopSink, Supervisor};

#[derive(Parser, Debug)]
#[command(name = "streamhub")]
#[command(about = "Real-time market-data distribution service")]
struct Args {
    /// Override the HTTP/WebSocket listen port.
    #[arg(long, env = "PORT")]
    port: Option<u16>,
}

#[derive(Clone)]
struct AppState {
    supervisor: Arc<Supervisor>,
    client_config: ClientConfig,
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "streamhub_backend=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let args = Args::parse();
    let mut config = Config::from_env().context("loading configuration")?;
    if let Some(port) = args.port {
        config.port = port;
    }

    info!(symbols = config.symbols.len(), port = config.port, "starting streamhub");

    let supervisor = Supervisor::spawn(&config, Arc::new(NoopSink));
    let client_config = ClientConfig::from_config(&config);
    let state = AppState { supervisor: supervisor.clone(), client_config };

    let app = Router::new()
        .route("/ws", get(ws_handler))
        .with_state(state)
        .merge(streamhub_backend::http::router(supervisor))
        .layer(CorsLayer::permissive())
        .layer(axum::middleware::from_fn(
            streamhub_backend::middleware::request_logging_simple,
        ));

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "listening");

    axum::serve(listener, app).await.context("server error")?;

    Ok(())
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| client::handle_socket(socket, state.supervisor, state.client_config))
}
