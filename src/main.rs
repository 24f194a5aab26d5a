//! Application entry point for timeline-trigger.
//!
//! Initializes all components and keeps polling until Ctrl+C.

use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use dotenv::dotenv;
use log::debug;
use log::info;
use log::warn;
use timeline_trigger::callback::dispatcher::CallbackDispatcher;
use timeline_trigger::config::Config;
use timeline_trigger::fetcher::http_fetcher::HttpResourceFetcher;
use timeline_trigger::fetcher::http_fetcher::ProviderInfo;
use timeline_trigger::logging::setup_logging;
use timeline_trigger::model::CreateSubscriptionBuilder;
use timeline_trigger::model::UserIdentifier;
use timeline_trigger::service::subscription_registry::RegistryConfig;
use timeline_trigger::service::subscription_registry::SubscriptionRegistry;

/// Handle used to check provider connectivity at startup.
const PROBE_HANDLE: &str = "jack";

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();

    let init_start = Instant::now();
    let mut config = Config::new();
    config.load()?;
    let _log_guard = setup_logging(&config)?;
    info!("Starting timeline-trigger...");
    config.check_credentials()?;

    let fetcher = setup_fetcher(&config).await?;
    let dispatcher = Arc::new(CallbackDispatcher::new(
        config.callback_secret.clone(),
        config.request_timeout,
    )?);
    if config.callback_secret.is_none() {
        warn!("CALLBACK_SECRET is not set; callbacks will be sent unsigned.");
    }

    let registry = SubscriptionRegistry::new(fetcher, dispatcher, RegistryConfig::from_config(&config));
    setup_bootstrap_subscription(&config, &registry).await?;

    run(init_start).await?;
    registry.shutdown().await;
    Ok(())
}

async fn setup_fetcher(config: &Config) -> Result<Arc<HttpResourceFetcher>> {
    debug!("Setting up resource fetcher for {}...", config.provider_url);
    let fetcher = Arc::new(HttpResourceFetcher::new(ProviderInfo::from_config(config))?);

    match fetcher.verify(PROBE_HANDLE).await {
        Ok(_) => info!("Provider at {} is reachable.", config.provider_url),
        Err(e) => warn!("Provider check against {} failed: {e}", config.provider_url),
    }
    Ok(fetcher)
}

async fn setup_bootstrap_subscription(config: &Config, registry: &SubscriptionRegistry) -> Result<()> {
    let Some(callback_url) = &config.callback_url else {
        debug!("CALLBACK_URL not set; starting without subscriptions.");
        return Ok(());
    };

    let users: Vec<UserIdentifier> = config
        .watch_users
        .iter()
        .map(|raw| UserIdentifier::parse(raw))
        .collect();
    let params = CreateSubscriptionBuilder::default()
        .callback_url(callback_url.clone())
        .interval_ms(config.default_interval.as_millis() as u64)
        .deliver_backlog(config.deliver_backlog)
        .users(users)
        .build()?;

    let subscription = registry.subscribe(params).await?;
    info!(
        "Bootstrap subscription {} tracking {} user(s).",
        subscription.id,
        subscription.users.len()
    );
    Ok(())
}

async fn run(init_start: Instant) -> Result<()> {
    info!(
        "timeline-trigger is up in {:.2}s. Press Ctrl+C to stop.",
        init_start.elapsed().as_secs_f64()
    );

    tokio::signal::ctrl_c().await?;
    info!("Ctrl+C received, shutting down.");

    Ok(())
}
