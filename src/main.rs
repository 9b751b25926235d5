//! Portico - public HTTP ingress for reverse tunnels
//!
//! Listens for public HTTP connections, routes each one by virtual host and
//! hands the raw connection to the tunnel registered for that host.

mod static_tunnel;

use anyhow::{Context, Result};
use clap::Parser;
use portico_http_auth::CredentialMatch;
use portico_router::{RouteKey, TunnelRegistry};
use portico_server_http::{HttpServer, HttpServerConfig, DEFAULT_MAX_HEAD_LEN};
use static_tunnel::{ForwardingTunnel, TunnelSpec};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Portico - route public HTTP connections into tunnels
#[derive(Parser, Debug)]
#[command(name = "portico")]
#[command(about = "Portico - route public HTTP connections into tunnels")]
#[command(version = env!("GIT_TAG"))]
#[command(long_version = concat!(env!("GIT_TAG"), "\nCommit: ", env!("GIT_HASH"), "\nBuilt: ", env!("BUILD_TIME")))]
struct Cli {
    /// Address to accept public HTTP connections on
    #[arg(long, env = "PORTICO_HTTP_ADDR", default_value = "0.0.0.0:80")]
    http_addr: SocketAddr,

    /// Scheme used in routing keys
    #[arg(long, env = "PORTICO_SCHEME", default_value = "http")]
    scheme: String,

    /// Seconds a client has to send its request head
    #[arg(long, env = "PORTICO_SNIFF_TIMEOUT", default_value = "10")]
    sniff_timeout: u64,

    /// Largest request head accepted, in bytes
    #[arg(long, env = "PORTICO_MAX_HEAD_LEN", default_value_t = DEFAULT_MAX_HEAD_LEN)]
    max_head_len: usize,

    /// Realm announced in Basic auth challenges
    #[arg(long, env = "PORTICO_REALM", default_value = "portico")]
    realm: String,

    /// Compare credentials by SHA-256 digest instead of plain equality
    #[arg(long, env = "PORTICO_DIGEST_AUTH")]
    digest_auth: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "PORTICO_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Static tunnel: HOST=BACKEND[,auth=USER:PASS] (repeatable)
    #[arg(long = "tunnel", env = "PORTICO_TUNNELS", value_delimiter = ' ')]
    tunnels: Vec<TunnelSpec>,
}

impl Cli {
    fn server_config(&self) -> HttpServerConfig {
        HttpServerConfig {
            bind_addr: self.http_addr,
            scheme: self.scheme.clone(),
            sniff_timeout: Duration::from_secs(self.sniff_timeout),
            max_head_len: self.max_head_len,
            realm: self.realm.clone(),
            credential_match: if self.digest_auth {
                CredentialMatch::Digest
            } else {
                CredentialMatch::Exact
            },
        }
    }
}

/// RUST_LOG takes precedence over --log-level
fn setup_logging(log_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(false))
        .with(filter)
        .init();
}

fn register_tunnels(registry: &TunnelRegistry, scheme: &str, specs: &[TunnelSpec]) -> Result<()> {
    for spec in specs {
        let key = RouteKey::new(scheme, &spec.host);
        registry
            .register(key.clone(), Arc::new(ForwardingTunnel::new(spec)))
            .with_context(|| format!("Failed to register tunnel for {}", spec.host))?;
        info!(
            "Tunnel {} -> {}{}",
            key,
            spec.backend,
            if spec.credential.is_empty() {
                ""
            } else {
                " (auth required)"
            }
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(&cli.log_level);

    info!("Portico starting...");

    let registry = Arc::new(TunnelRegistry::new());
    register_tunnels(&registry, &cli.scheme, &cli.tunnels)?;
    if registry.count() == 0 {
        info!("No tunnels configured, every request will get a 404");
    }

    let server = HttpServer::bind(cli.server_config(), registry.clone())
        .await
        .context("Failed to start HTTP listener")?;
    let server_task = server.spawn();

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
        }
        result = server_task => {
            if let Err(e) = result {
                error!("HTTP listener task failed: {}", e);
                return Err(e.into());
            }
        }
    }

    info!("Portico stopped");
    Ok(())
}
