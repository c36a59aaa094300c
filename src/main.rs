use consul_envoy::catalog::ConsulCatalog;
use consul_envoy::client::Client;
use consul_envoy::config::Settings;
use consul_envoy::engine::Engine;
use consul_envoy::resolve::SystemResolver;
use consul_envoy::{server, Error, Result};
use std::env;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    init_observability();

    let config_path = env::args().nth(1);
    let settings = Arc::new(Settings::load(config_path.as_deref())?);
    info!(consul = %settings.consul.address, "loaded settings");

    let client = Client::new(settings.consul.address.clone(), settings.consul.token.clone());
    let domain = match &settings.domain {
        Some(domain) => domain.trim_matches('.').to_string(),
        None => discover_domain(&client).await?,
    };
    info!(%domain, "using consul domain");

    let listen_ip: IpAddr = settings
        .server
        .listen_addr
        .parse()
        .map_err(|e| Error::InvalidConfig(format!("server.listen_addr: {}", e)))?;
    let addr = SocketAddr::new(listen_ip, settings.server.port);

    let catalog = Arc::new(ConsulCatalog::new(client, settings.watch.passing_only));
    let engine = Engine::start(catalog, Arc::new(SystemResolver), settings.clone(), domain);

    let shutdown = CancellationToken::new();
    tokio::spawn(wait_for_signal(shutdown.clone()));

    let served = server::serve(addr, engine.cache(), shutdown.clone()).await;
    shutdown.cancel();
    engine.shutdown().await;

    if let Err(e) = &served {
        error!(error = %e, "http server failed");
    }
    info!("exiting");
    served
}

async fn discover_domain(client: &Client) -> Result<String> {
    let agent = client.agent_self().await?;
    agent
        .dns_domain()
        .map(str::to_string)
        .ok_or_else(|| Error::Bootstrap("could not find consul domain in agent/self".into()))
}

async fn wait_for_signal(shutdown: CancellationToken) {
    let (mut sigint, mut sigterm) = match (
        signal(SignalKind::interrupt()),
        signal(SignalKind::terminate()),
    ) {
        (Ok(sigint), Ok(sigterm)) => (sigint, sigterm),
        (Err(e), _) | (_, Err(e)) => {
            error!(error = %e, "failed to install signal handlers");
            return;
        }
    };
    tokio::select! {
        _ = sigint.recv() => info!("SIGINT detected"),
        _ = sigterm.recv() => info!("SIGTERM detected"),
    }
    shutdown.cancel();
}

fn init_observability() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
