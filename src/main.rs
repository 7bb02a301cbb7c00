use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use snip::analytics::{build_locator, ClickAggregator, ClickEnricher};
use snip::cache::build_cache;
use snip::codegen::CodeGenerator;
use snip::config::Config;
use snip::resolver::{RedirectResolver, ResolverOptions};
use snip::{api, redirect, storage};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env()?;
    info!("Loaded configuration");

    let storage = storage::connect(&config.database).await?;
    let cache = build_cache(&config.cache).await?;
    let generator = CodeGenerator::new(Arc::clone(&storage), &config.codes)
        .context("invalid short code configuration")?;

    let aggregator = if config.analytics.enabled {
        let locator = build_locator(&config.analytics)?;
        let enricher = ClickEnricher::new(
            Arc::clone(&storage),
            locator,
            config.analytics.geo_timeout(),
            config.store_timeout(),
        );
        info!(provider = ?config.analytics.geo_provider, "Click analytics enabled");
        Some(Arc::new(ClickAggregator::start(enricher, &config.analytics)))
    } else {
        info!("Click analytics disabled");
        None
    };

    let resolver = Arc::new(RedirectResolver::new(
        Arc::clone(&storage),
        cache,
        generator,
        aggregator.clone(),
        ResolverOptions::from_config(&config),
    ));

    let api_router = api::create_api_router(Arc::clone(&resolver));
    let redirect_router =
        redirect::create_redirect_router(Arc::clone(&resolver), config.analytics.clone());

    let api_addr = format!("{}:{}", config.api_server.host, config.api_server.port);
    let api_listener = tokio::net::TcpListener::bind(&api_addr)
        .await
        .with_context(|| format!("failed to bind API server to {api_addr}"))?;
    info!("API server listening on http://{}", api_addr);

    let redirect_addr = format!(
        "{}:{}",
        config.redirect_server.host, config.redirect_server.port
    );
    let redirect_listener = tokio::net::TcpListener::bind(&redirect_addr)
        .await
        .with_context(|| format!("failed to bind redirect server to {redirect_addr}"))?;
    info!("Redirect server listening on http://{}", redirect_addr);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    tokio::try_join!(
        axum::serve(api_listener, api_router).with_graceful_shutdown(wait_for(shutdown_rx.clone())),
        axum::serve(
            redirect_listener,
            redirect_router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(wait_for(shutdown_rx)),
    )?;

    info!("Servers stopped");
    if let Some(aggregator) = aggregator {
        aggregator.shutdown().await;
        let dropped = aggregator.dropped();
        if dropped > 0 {
            warn!(dropped, "Clicks dropped due to a full analytics queue");
        }
    }

    Ok(())
}

async fn wait_for(mut shutdown: watch::Receiver<bool>) {
    while !*shutdown.borrow() {
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, stopping servers...");
}
