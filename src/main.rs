// estate-client - Caching REST client for the estate portfolio API
// Author: kelexine (https://github.com/kelexine)

use anyhow::{Context, Result};
use clap::Parser;
use estate_client::api::PortfolioApi;
use estate_client::auth::{AuthToken, FileTokenStore, TokenStore};
use estate_client::cache::{ApiCache, FetchOptions};
use estate_client::cli::{Args, Command};
use estate_client::client::{ApiClient, Navigator, SessionRoute};
use estate_client::config::AppConfig;
use estate_client::error::ApiError;
use estate_client::metrics::gather_metrics;
use estate_client::utils::logging;
use estate_client::utils::retry::{with_retry, RetryPolicy};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let args = Args::parse();

    // Phase 1: Load configuration
    let config = AppConfig::load_from(args.config.as_deref())?;

    // Phase 2: Initialize logging
    logging::init(&config.logging)?;
    info!("Starting estate-client v{}", env!("CARGO_PKG_VERSION"));

    // Phase 3: Session storage and routing
    let store: Arc<dyn TokenStore> = Arc::new(FileTokenStore::new(&config.auth.storage_path));
    let route = Arc::new(SessionRoute::new(config.auth.initial_route.clone()));

    // Phase 4: Build the API client
    let client = ApiClient::builder(&config.api)
        .with_auth(store.clone(), route.clone(), &config.auth)
        .sanitize_logs(config.logging.sanitize_tokens)
        .build()?;

    // Phase 5: Run the command
    let outcome = run(args.command, &config, client, store).await;

    if route.navigations() > 0 {
        eprintln!(
            "Session expired: redirected to {}. Run `estate-client login --token <TOKEN>`.",
            route.current_route()
        );
    }
    if args.metrics {
        print!("{}", gather_metrics());
    }

    if let Err(e) = outcome {
        if let Some(api_error) = e.downcast_ref::<ApiError>() {
            eprintln!("{}", serde_json::to_string_pretty(&api_error.to_json())?);
        }
        return Err(e);
    }
    Ok(())
}

async fn run(
    command: Command,
    config: &AppConfig,
    client: ApiClient,
    store: Arc<dyn TokenStore>,
) -> Result<()> {
    match command {
        Command::Get { path, repeat, ttl_ms, retry } => {
            let cache: ApiCache<Value> = ApiCache::new(config.cache.clone());
            let policy = RetryPolicy::from(&config.retry);

            for round in 1..=repeat.max(1) {
                let client = client.clone();
                let fetch_path = path.clone();
                let policy = policy.clone();
                let mut options = FetchOptions::default();
                if let Some(ttl) = ttl_ms {
                    options = options.with_ttl(Duration::from_millis(ttl));
                }

                let value = cache
                    .fetch_with_cache(
                        &path,
                        move || async move {
                            if retry {
                                with_retry("cli get", &policy, || client.get::<Value>(&fetch_path)).await
                            } else {
                                client.get::<Value>(&fetch_path).await
                            }
                        },
                        options,
                    )
                    .await?;
                info!("Round {} served {}", round, path);

                if round == repeat.max(1) {
                    println!("{}", serde_json::to_string_pretty(value.as_ref())?);
                }
            }

            let stats = cache.stats();
            info!(
                "Cache: {} hits, {} misses, hit rate {:.2}",
                stats.hits, stats.misses, stats.hit_rate
            );
            cache.dispose();
        }
        Command::Estates { id } => {
            let api = PortfolioApi::new(client, &config.cache);
            match id {
                Some(id) => {
                    let estate = api.get_estate(&id).await?;
                    println!("{}", serde_json::to_string_pretty(estate.as_ref())?);
                }
                None => {
                    let estates = api.list_estates().await?;
                    println!("{}", serde_json::to_string_pretty(estates.as_ref())?);
                }
            }
            api.dispose();
        }
        Command::Plots { estate_id } => {
            let api = PortfolioApi::new(client, &config.cache);
            let plots = api.list_plots(&estate_id).await?;
            println!("{}", serde_json::to_string_pretty(plots.as_ref())?);
            api.dispose();
        }
        Command::Upload { file, estate_id } => {
            let bytes = tokio::fs::read(&file)
                .await
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let file_name = file
                .file_name()
                .map(|name| name.to_string_lossy().to_string())
                .unwrap_or_else(|| "upload.bin".to_string());

            let api = PortfolioApi::new(client, &config.cache);
            let document = api
                .upload_document(&file_name, bytes, estate_id.as_deref())
                .await?;
            println!("{}", serde_json::to_string_pretty(&document)?);
            api.dispose();
        }
        Command::Login { token } => {
            store.save(&AuthToken::new(token))?;
            info!("Session token stored");
        }
        Command::Logout => {
            store.clear()?;
            info!("Session token removed");
        }
        Command::Config => {
            print!("{}", config.to_toml()?);
        }
    }

    Ok(())
}
