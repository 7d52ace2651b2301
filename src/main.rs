//! HTTP transport server.
//!
//! Serves one destination through axum. Without `--forward` every request is
//! echoed back; with it, requests are relayed to the upstream through an
//! `HttpConduit` and the upstream's answer is written to the back channel.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use clap::Parser;
use tokio::net::TcpListener;

use http_conduit::config::{load_config, ConfigWatcher, TransportConfig};
use http_conduit::destination::{server, BackChannel, HttpDestination};
use http_conduit::lifecycle::{signals, Shutdown};
use http_conduit::observability::{logging, metrics};
use http_conduit::{Delivery, HttpConduit, Message, MessageObserver};

#[derive(Parser)]
#[command(name = "http-conduit")]
#[command(about = "Serve an HTTP destination, echoing or relaying requests", long_about = None)]
struct Cli {
    /// TOML configuration file; defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Relay requests to this base URL instead of echoing them.
    #[arg(short, long)]
    forward: Option<String>,
}

/// Answers every request with its own body and content type.
struct EchoObserver;

#[async_trait]
impl MessageObserver for EchoObserver {
    async fn on_message(&self, mut message: Message) -> Delivery {
        let body = read_body(&mut message).await;
        let Some(mut channel) = back_channel(message) else {
            return Delivery::Completed;
        };
        let mut out = channel.create_out_message();
        out.content_type = channel.in_message().content_type.clone();
        finish(channel, &mut out, body).await;
        Delivery::Completed
    }
}

/// Relays every request to an upstream base URL.
struct RelayObserver {
    conduit: Arc<HttpConduit>,
    upstream: String,
}

#[async_trait]
impl MessageObserver for RelayObserver {
    async fn on_message(&self, mut message: Message) -> Delivery {
        let body = read_body(&mut message).await;

        let mut outbound = Message::request(&message.method_or_default(), self.upstream.clone());
        outbound.path_info = message.path_info.clone();
        outbound.query_string = message.query_string.clone();
        outbound.content_type = message.content_type.clone();
        outbound.flags.no_io_exceptions = true;
        let result = self.conduit.send(outbound, body).await;

        let Some(mut channel) = back_channel(message) else {
            return Delivery::Completed;
        };
        let mut out = channel.create_out_message();
        let body = match result {
            Ok(Some(mut response)) => {
                out.response_code = response.response_code;
                out.content_type = response.content_type.clone();
                read_body(&mut response).await
            }
            Ok(None) => {
                out.response_code = Some(202);
                Bytes::new()
            }
            Err(e) => {
                tracing::warn!(upstream = %self.upstream, error = %e, "Relay failed");
                out.response_code = Some(e.status().unwrap_or(502));
                Bytes::from(e.to_string())
            }
        };
        finish(channel, &mut out, body).await;
        Delivery::Completed
    }
}

async fn read_body(message: &mut Message) -> Bytes {
    let Some(body) = message.body.as_mut() else {
        return Bytes::new();
    };
    match body.read_to_end().await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(message_id = %message.id, error = %e, "Failed reading message body");
            Bytes::new()
        }
    }
}

fn back_channel(message: Message) -> Option<BackChannel> {
    match message.destination.clone() {
        Some(destination) => Some(destination.back_channel(message)),
        None => {
            tracing::error!(message_id = %message.id, "Inbound message has no destination");
            None
        }
    }
}

async fn finish(mut channel: BackChannel, out: &mut Message, body: Bytes) {
    if !body.is_empty() {
        if let Err(e) = channel.write(out, body).await {
            tracing::warn!(error = %e, "Failed writing response body");
        }
    }
    if let Err(e) = channel.close(out).await {
        tracing::warn!(error = %e, "Failed closing back channel");
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => TransportConfig::default(),
    };
    logging::init(&config.observability);

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "http-conduit starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        base_path = %config.listener.base_path,
        request_timeout_secs = config.listener.request_timeout_secs,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let conduit = cli
        .forward
        .as_ref()
        .map(|_| HttpConduit::from_config("relay", &config).build());
    let observer: Arc<dyn MessageObserver> = match (&conduit, &cli.forward) {
        (Some(conduit), Some(upstream)) => {
            tracing::info!(upstream = %upstream, "Relaying requests");
            Arc::new(RelayObserver {
                conduit: Arc::clone(conduit),
                upstream: upstream.clone(),
            })
        }
        _ => Arc::new(EchoObserver),
    };
    let destination = HttpDestination::from_listener(
        "http-conduit",
        &config.listener,
        config.server.clone(),
        observer,
    );

    // Hot reload of both policies
    let _watcher = match &cli.config {
        Some(path) => {
            let (watcher, mut updates) = ConfigWatcher::new(path, &config);
            let destination = destination.clone();
            let conduit = conduit.clone();
            tokio::spawn(async move {
                while let Some(update) = updates.recv().await {
                    if let Some(server) = update.server {
                        destination.set_server_policy(server);
                    }
                    if let (Some(client), Some(conduit)) = (update.client, &conduit) {
                        conduit.set_client_policy(client);
                    }
                }
            });
            match watcher.run() {
                Ok(watcher) => Some(watcher),
                Err(e) => {
                    tracing::error!(error = %e, "Failed to start config watcher");
                    None
                }
            }
        }
        None => None,
    };

    let shutdown = Shutdown::new();
    signals::spawn_signal_handler(shutdown.clone());

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    server::serve(listener, destination, &config.listener, shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
