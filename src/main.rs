//! Quote Watch - live quote watcher
//!
//! Subscribes to the configured currencies, logs every quote emission and
//! refreshes them periodically.

use std::sync::Arc;

use anyhow::Context;
use futures::StreamExt;
use tokio::signal;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use live_cache::fetch::{MultiFetchParams, MultiFetcher};
use live_cache::quotes::{CurrencyId, HttpQuotesApi, QuoteParams, QuoteStatus, QuotesModule};
use live_cache::{spawn_refresh_task, CacheRegistry, Config, Status, Subscription};

/// Main entry point for the quote watcher.
///
/// # Startup Sequence
/// 1. Initialize tracing subscriber for logging
/// 2. Load configuration from environment variables
/// 3. Build the registry, the HTTP quotes client and the quotes module
/// 4. Subscribe to every watched currency and log emissions
/// 5. Fetch once, then start the periodic refresh task
/// 6. Handle graceful shutdown on SIGINT/SIGTERM
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing subscriber with env filter
    // Defaults to "info" level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "live_cache=info,quote_watch=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting quote watcher");

    // Load configuration from environment variables
    let config = Config::from_env();
    info!(
        "Configuration loaded: api={}, fiat={}, currencies={:?}, ttl={}s, refresh_interval={}s",
        config.quotes_api_url,
        config.fiat_currency,
        config.watch_currencies,
        config.quotes_ttl,
        config.refresh_interval
    );

    let registry = CacheRegistry::new();
    let api = HttpQuotesApi::new(config.quotes_api_url.clone())
        .context("Failed to build quotes HTTP client")?;
    let module = QuotesModule::new(Arc::new(api), registry.clone(), &config);

    let watchers: Vec<JoinHandle<()>> = config
        .watch_currencies
        .iter()
        .map(|id| spawn_watcher(module.get(&QuoteParams::new(id.as_str()))))
        .collect();
    info!("Watching {} currencies", watchers.len());

    let params = MultiFetchParams::new(
        config
            .watch_currencies
            .iter()
            .map(|id| CurrencyId::new(id.as_str())),
    );
    if let Err(error) = module.multi_fetcher().invoke(&params).await {
        warn!(%error, "Initial quotes fetch failed");
    }

    let refresh_handle = spawn_refresh_task(
        Arc::clone(module.multi_fetcher()),
        params,
        config.refresh_interval(),
    );
    info!("Background refresh task started");

    shutdown_signal().await?;

    refresh_handle.abort();
    for watcher in watchers {
        watcher.abort();
    }
    warn!("Background tasks aborted");

    let stats = registry.stats();
    info!(
        "Shutdown complete: executions={}, skipped={}, joined={}, failures={}",
        stats.executions, stats.skipped, stats.joined, stats.failures
    );
    Ok(())
}

/// Logs every emission of one quote stream.
fn spawn_watcher(mut quotes: Subscription<QuoteStatus>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(quote) = quotes.next().await {
            match &quote.status {
                Status::Empty => info!(currency = %quote.subject, "No quote yet"),
                Status::Data(entry) => info!(
                    currency = %quote.subject,
                    price = %entry.value.fiat_rate,
                    source = ?entry.source,
                    "Quote"
                ),
                Status::Error { reason, cached } => warn!(
                    currency = %quote.subject,
                    %reason,
                    cached = ?cached.as_ref().map(|entry| entry.value.fiat_rate.to_string()),
                    "Quote unavailable"
                ),
            }
        }
        if let Some(error) = quotes.termination() {
            error!(%error, "Quote stream ended");
        }
    })
}

/// Waits for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() -> anyhow::Result<()> {
    let ctrl_c = async { signal::ctrl_c().await.context("Failed to install Ctrl+C handler") };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .context("Failed to install SIGTERM handler")?
            .recv()
            .await;
        Ok::<(), anyhow::Error>(())
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<anyhow::Result<()>>();

    tokio::select! {
        result = ctrl_c => {
            result?;
            info!("Received Ctrl+C, initiating shutdown...");
        }
        result = terminate => {
            result?;
            info!("Received SIGTERM, initiating shutdown...");
        }
    }
    Ok(())
}
