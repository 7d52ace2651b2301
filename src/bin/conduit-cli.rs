use std::path::PathBuf;

use bytes::Bytes;
use clap::Parser;
use serde_json::json;

use http_conduit::config::{load_config, TransportConfig};
use http_conduit::http::Headers;
use http_conduit::observability::logging;
use http_conduit::{HttpConduit, Message};

#[derive(Parser)]
#[command(name = "conduit-cli")]
#[command(about = "Send one request through an HTTP conduit", long_about = None)]
struct Cli {
    /// Target URL
    url: String,

    #[arg(short = 'X', long, default_value = "GET")]
    method: String,

    /// Request body
    #[arg(short, long)]
    data: Option<String>,

    /// Extra request header, `Name: value`; may repeat
    #[arg(short = 'H', long = "header")]
    headers: Vec<String>,

    /// Content type of the request body
    #[arg(long)]
    content_type: Option<String>,

    /// TOML configuration supplying the client policy and credentials
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Follow redirects regardless of the configured policy
    #[arg(short = 'L', long)]
    location: bool,

    /// Print a JSON summary instead of the raw response
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => TransportConfig::default(),
    };
    if cli.location {
        config.client.auto_redirect = true;
    }
    logging::init(&config.observability);

    let conduit = HttpConduit::from_config("conduit-cli", &config).build();

    let mut message = Message::request(&cli.method, cli.url.clone());
    message.content_type = cli.content_type.clone();
    message.flags.no_io_exceptions = true;
    message.flags.set_http_response_message = true;
    {
        let mut headers = Headers::new(&mut message);
        for header in &cli.headers {
            match header.split_once(':') {
                Some((name, value)) => headers.protocol_headers().append(name.trim(), value.trim()),
                None => eprintln!("Ignoring malformed header '{}'", header),
            }
        }
    }
    let body = cli.data.map(Bytes::from).unwrap_or_default();

    let Some(mut response) = conduit.send(message, body).await? else {
        eprintln!("No response received");
        return Ok(());
    };

    let status = response.response_code.unwrap_or_default();
    let headers: Vec<(String, String)> = response
        .headers
        .as_ref()
        .map(|h| {
            h.iter()
                .flat_map(|(name, values)| values.iter().map(move |v| (name.to_string(), v.clone())))
                .collect()
        })
        .unwrap_or_default();
    let body = match response.body.as_mut() {
        Some(body) => body.read_to_end().await?,
        None => Bytes::new(),
    };
    conduit.close_message(&mut response).await;

    if cli.json {
        let summary = json!({
            "url": cli.url,
            "status": status,
            "reason": response.response_message,
            "encoding": response.encoding,
            "headers": headers,
            "body": String::from_utf8_lossy(&body),
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!("{} {}", status, response.response_message.as_deref().unwrap_or(""));
        for (name, value) in &headers {
            println!("{}: {}", name, value);
        }
        println!();
        println!("{}", String::from_utf8_lossy(&body));
    }
    Ok(())
}
