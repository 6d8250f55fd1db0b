//! Entry point for `rudp`.
//!
//! Parses CLI arguments and runs a server, a one-shot client, or the
//! in-process demo. Set `RUST_LOG` to control verbosity.

use std::net::SocketAddr;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use rudp_tokio::{Client, Endpoint, Method, RehandshakePolicy, RudpConfig, Server};

/// Reliable request/response over UDP.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(flatten)]
    protocol: ProtocolArgs,

    #[command(subcommand)]
    mode: Mode,
}

#[derive(Args)]
struct ProtocolArgs {
    /// Transmissions per packet before giving up
    #[arg(long, global = true, default_value_t = 5)]
    max_retries: u32,

    /// ACK wait per transmission, in milliseconds
    #[arg(long, global = true, default_value_t = 2000)]
    ack_timeout_ms: u64,

    /// Reply wait per handshake attempt, in milliseconds
    #[arg(long, global = true, default_value_t = 2000)]
    handshake_timeout_ms: u64,

    /// Evict connections idle this long, in seconds (0 disables eviction)
    #[arg(long, global = true, default_value_t = 300)]
    idle_timeout_secs: u64,

    /// Replace an established connection when its peer sends a new SYN
    #[arg(long, global = true)]
    reset_on_syn: bool,
}

impl ProtocolArgs {
    fn config(&self) -> RudpConfig {
        let idle_timeout =
            (self.idle_timeout_secs > 0).then(|| Duration::from_secs(self.idle_timeout_secs));
        let rehandshake = if self.reset_on_syn {
            RehandshakePolicy::Reset
        } else {
            RehandshakePolicy::Ignore
        };
        RudpConfig::new()
            .max_retries(self.max_retries)
            .ack_timeout(Duration::from_millis(self.ack_timeout_ms))
            .handshake_timeout(Duration::from_millis(self.handshake_timeout_ms))
            .idle_timeout(idle_timeout)
            .rehandshake(rehandshake)
    }
}

#[derive(Subcommand)]
enum Mode {
    /// Serve requests with the default handler
    Server {
        /// Local address to bind
        #[arg(short, long, default_value = "127.0.0.1:3000")]
        bind: SocketAddr,
    },
    /// Send one request and print the response
    Client {
        /// Server address
        #[arg(short, long, default_value = "127.0.0.1:3000")]
        server: SocketAddr,

        #[arg(short, long, default_value = "GET")]
        method: String,

        #[arg(short, long, default_value = "/")]
        path: String,

        #[arg(short = 'd', long, default_value = "")]
        body: String,

        /// Send `Connection: close` instead of keep-alive
        #[arg(long)]
        close: bool,
    },
    /// Run GET, POST, and DELETE against an in-process server
    Demo,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = cli.protocol.config();

    match cli.mode {
        Mode::Server { bind } => {
            let endpoint = Endpoint::bind(bind, config).await?;
            Server::new(endpoint).run().await?;
        }
        Mode::Client {
            server,
            method,
            path,
            body,
            close,
        } => {
            let client = Client::bind(server, config).await?;
            let response = client
                .send_request(Method::from(method.as_str()), &path, body.into(), !close)
                .await?;
            println!("{} {}", response.status, response.reason);
            println!("{}", response.body_text());
            client.close().await;
        }
        Mode::Demo => demo(config).await?,
    }
    Ok(())
}

/// The reference exchange: GET with keep-alive, POST with keep-alive, then
/// an unsupported method that the server answers with 405 and closes.
async fn demo(config: RudpConfig) -> Result<(), Box<dyn std::error::Error>> {
    let endpoint = Endpoint::bind(([127, 0, 0, 1], 0).into(), config.clone()).await?;
    let server_addr = *endpoint.local_addr();
    let (server_endpoint, server_task) = Server::new(endpoint).spawn();

    let client = Client::bind(server_addr, config).await?;
    let steps = [
        (Method::Get, "/", "", true),
        (Method::Post, "/", "This is the data sent via POST", true),
        (Method::Delete, "/", "", true),
    ];

    for (method, path, body, keep_alive) in steps {
        let response = client
            .send_request(method.clone(), path, body.into(), keep_alive)
            .await?;
        println!("{method} {path} -> {} {}", response.status, response.reason);
        println!("  {}", response.body_text());
        if let Some(session) = client.session().await {
            println!(
                "  next send {}, next expected {}",
                session.next_send(),
                session.next_expected()
            );
        }
    }

    let metrics = server_endpoint.metrics();
    println!(
        "server: {} handshakes, {} deliveries, {} retransmissions, {} tracked peers",
        metrics.handshakes_completed,
        metrics.deliveries_completed,
        metrics.retransmissions,
        server_endpoint.table().len().await
    );

    server_task.abort();
    Ok(())
}
