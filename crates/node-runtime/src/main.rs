//! The rill stream node binary.
//!
//! Single-node development wiring: in-memory storage and registry, the
//! node's own address as the only replica, HTTP surface on the
//! configured port, with the producer and cache-cleanup tickers
//! running in the background.

use anyhow::Context;
use node_runtime::adapters::{http, RecoveringEventVerifier, Secp256k1EventSigner};
use node_runtime::{NodeConfig, StreamService};
use rill_events::adapters::{InMemoryStreamRegistry, InMemoryStreamStorage};
use rill_events::ports::EventSigner;
use rill_events::{EngineParams, MiniblockProducer, StreamCache};
use rill_sync::{SyncHandler, UnreachableForwarder};
use rill_telemetry::{init_telemetry, TelemetryConfig};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let telemetry_config = TelemetryConfig::from_env();
    let _telemetry = init_telemetry(&telemetry_config).context("telemetry init failed")?;

    let config = NodeConfig::from_env();
    let signer = Arc::new(
        Secp256k1EventSigner::from_secret_bytes(&config.network.node_secret)
            .map_err(|e| anyhow::anyhow!("bad node secret: {e}"))?,
    );
    info!(
        node = %shared_types::short_hex(&signer.address()),
        rpc_port = config.network.rpc_port,
        "starting rill node"
    );

    let params = Arc::new(EngineParams {
        storage: Arc::new(InMemoryStreamStorage::new()),
        registry: Arc::new(InMemoryStreamRegistry::new(vec![signer.address()], 1)),
        signer,
        verifier: Arc::new(RecoveringEventVerifier),
        config: config.engine_config(),
    });
    let cache = Arc::new(StreamCache::new(params));
    let producer = Arc::new(MiniblockProducer::new(cache.clone()));
    let forwarder = Arc::new(UnreachableForwarder);
    let sync = Arc::new(SyncHandler::new(
        cache.clone(),
        forwarder.clone(),
        config.sync.clone(),
    ));
    let service = Arc::new(StreamService::new(
        cache.clone(),
        sync,
        producer.clone(),
        forwarder,
    ));

    spawn_producer_ticker(producer, config.stream.miniblock_interval);
    spawn_cleanup_ticker(
        cache,
        config.stream.cache_cleanup_interval,
        config.stream.eviction_ttl,
    );

    let router = http::router(service, Duration::from_secs(30));
    let addr = SocketAddr::from(([0, 0, 0, 0], config.network.rpc_port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("shut down cleanly");
    Ok(())
}

fn spawn_producer_ticker(producer: Arc<MiniblockProducer>, period: Duration) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            producer.tick().await;
        }
    });
}

fn spawn_cleanup_ticker(cache: Arc<StreamCache>, period: Duration, ttl: Duration) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            cache.cleanup_pass(ttl).await;
        }
    });
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
    }
}
