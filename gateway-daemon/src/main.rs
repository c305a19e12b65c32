mod args;
mod config_loader;

use actix_web::{web, App, HttpServer};
use anyhow::Context;
use clap::Parser;
use gateway_api::AppState;
use gateway_chain::ChainRegistry;
use gateway_dispatcher::CallbackDispatcher;
use gateway_engine::{GasHistory, GatewayServices};
use gateway_store::Store;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let args = args::DaemonArgs::parse();
    env_logger::Builder::new()
        .parse_filters(&args.log_filter)
        .init();

    if let Err(e) = run(args).await {
        log::error!("fatal: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}

async fn run(args: args::DaemonArgs) -> anyhow::Result<()> {
    let config = config_loader::load(&args)?;
    log::info!(
        "starting wallet gateway, {} chain(s) enabled, http on {}",
        config.chains.len(),
        config.http_bind_address
    );

    PrometheusBuilder::new()
        .with_http_listener(
            args.metrics_bind_address
                .parse::<std::net::SocketAddr>()
                .context("invalid --metrics-bind-address")?,
        )
        .install()
        .context("installing the Prometheus metrics recorder")?;

    let store = Store::open(&config.storage_path)
        .with_context(|| format!("opening store at {}", config.storage_path))?;
    let chains = ChainRegistry::build(&config).context("building chain registry")?;
    let dispatcher = CallbackDispatcher::new(
        config.shared_secret.as_bytes().to_vec(),
        format!("wallet-gateway/{}", env!("CARGO_PKG_VERSION")),
        config.callback_retry_delays.clone(),
    );
    let http_bind_address = config.http_bind_address.clone();

    let services = Arc::new(GatewayServices {
        store,
        chains: Arc::new(chains),
        dispatcher: Arc::new(dispatcher),
        config: Arc::new(config),
    });
    let gas_history = GasHistory::new();

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let engine_tasks = gateway_engine::spawn_all(services.clone(), gas_history.clone(), shutdown_rx);

    let state = web::Data::new(AppState {
        services,
        gas_history,
    });
    let http_server = HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .configure(gateway_api::configure)
    })
    .bind(http_bind_address.clone())
    .with_context(|| format!("binding HTTP surface to {http_bind_address}"))?
    .run();
    let http_handle = http_server.handle();
    let http_join = tokio::spawn(http_server);

    wait_for_shutdown_signal().await;
    log::info!("shutdown signal received, draining in-flight work");

    let _ = shutdown_tx.send(true);
    http_handle.stop(true).await;
    let _ = http_join.await;
    for task in engine_tasks {
        let _ = task.await;
    }

    log::info!("wallet gateway stopped cleanly");
    Ok(())
}

/// Waits for either Ctrl+C or, on unix, SIGTERM — whichever arrives first
/// (§5 "tasks observe a cancellation signal and exit at the next loop head").
async fn wait_for_shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(sig) => sig,
            Err(e) => {
                log::warn!("failed to install SIGTERM handler: {e}, falling back to Ctrl+C only");
                let _ = ctrl_c.await;
                return;
            }
        };
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}
