use anyhow::Context;
use clap::{Parser, Subcommand};
use corr_screener::market_data::CryptoCompareClient;
use corr_screener::proxy::{self, ProxyState};
use corr_screener::registry::AssetRegistry;
use corr_screener::response_cache::ResponseCache;
use corr_screener::storage_utils::{AppConfig, AsyncStorageManager, JsonSymbolStore};
use corr_screener::{comfy_table, tui};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// Rolling correlation of the top crypto assets against Bitcoin.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Paired hourly returns per coefficient (overrides config.json).
    #[arg(long, global = true)]
    window: Option<usize>,

    /// Days of hourly history to fetch (overrides config.json).
    #[arg(long, global = true)]
    days: Option<u32>,

    /// Storage directory; defaults to `storage/` next to the binary.
    #[arg(long, global = true)]
    storage: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the correlation table once, or every SECS seconds with --watch.
    Table {
        #[arg(long, value_name = "SECS")]
        watch: Option<u64>,
    },
    /// Interactive terminal screen (default).
    Tui,
    /// Add a symbol to the saved set and show its correlation.
    Add { symbol: String },
    /// Remove a symbol from the saved set.
    Remove { symbol: String },
    /// List saved symbols.
    List,
    /// Serve the caching CryptoCompare proxy.
    Proxy {
        #[arg(long)]
        bind: Option<SocketAddr>,
    },
}

fn init_tracing(log_dir: Option<&std::path::Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match log_dir {
        // The TUI owns the terminal, so its logs go to a file.
        Some(dir) => {
            let appender = tracing_appender::rolling::never(dir, "corr-screener.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(writer)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
            None
        }
    }
}

async fn open_storage(dir: Option<PathBuf>) -> anyhow::Result<AsyncStorageManager> {
    match dir {
        Some(dir) => AsyncStorageManager::new_in(dir).await,
        None => AsyncStorageManager::new_relative("storage").await,
    }
}

async fn build_registry(
    config: AppConfig,
    cache: Arc<ResponseCache>,
    storage: &AsyncStorageManager,
) -> anyhow::Result<AssetRegistry> {
    let market = Arc::new(CryptoCompareClient::new(&config.base_url, &config.quote_symbol, cache)?);
    let store = Arc::new(JsonSymbolStore::new(storage.clone()));
    AssetRegistry::load(market, store, config).await
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Commands::Tui);

    let storage = open_storage(cli.storage).await?;
    let log_dir = matches!(command, Commands::Tui).then(|| storage.base_dir.clone());
    let _guard = init_tracing(log_dir.as_deref());

    let mut config: AppConfig = storage.load_or_init("config").await.context("loading config")?;
    if let Some(window) = cli.window {
        config.window = window;
    }
    if let Some(days) = cli.days {
        config.days = days;
    }

    let cache = Arc::new(ResponseCache::new(Duration::from_secs(config.cache_ttl_secs)));

    match command {
        Commands::Proxy { bind } => {
            let addr = match bind {
                Some(addr) => addr,
                None => config.proxy_bind.parse().context("invalid proxy_bind in config")?,
            };
            let state = Arc::new(ProxyState::new(&config.base_url, cache)?);
            proxy::serve(addr, state).await?;
        }
        Commands::Tui => {
            let registry = build_registry(config, cache, &storage).await?;
            tui::run_tui(registry).await?;
        }
        Commands::Table { watch } => {
            let mut registry = build_registry(config, cache, &storage).await?;
            let reference = registry.config().reference_symbol.clone();
            loop {
                match registry.refresh().await {
                    Ok(rows) => {
                        if watch.is_some() {
                            clearscreen::clear()?;
                        }
                        let now = chrono::Utc::now().timestamp_millis();
                        comfy_table::print(rows, &reference, now);
                    }
                    // A watch loop keeps going; a one-shot run reports the failure.
                    Err(e) if watch.is_some() => tracing::error!(error = %e, "refresh failed"),
                    Err(e) => return Err(e.into()),
                }
                let Some(secs) = watch else { break };
                tokio::time::sleep(Duration::from_secs(secs.max(1))).await;
            }
        }
        Commands::Add { symbol } => {
            let mut registry = build_registry(config, cache, &storage).await?;
            let row = registry.add(&symbol).await?;
            let now = chrono::Utc::now().timestamp_millis();
            comfy_table::print(
                std::slice::from_ref(&row),
                &registry.config().reference_symbol,
                now,
            );
        }
        Commands::Remove { symbol } => {
            let mut registry = build_registry(config, cache, &storage).await?;
            let symbol = symbol.trim().to_uppercase();
            if registry.remove(&symbol).await? {
                println!("Removed {}", symbol);
            } else {
                println!("{} was not saved", symbol);
            }
        }
        Commands::List => {
            let registry = build_registry(config, cache, &storage).await?;
            if registry.custom_symbols().is_empty() {
                println!("No saved symbols.");
            }
            for symbol in registry.custom_symbols() {
                println!("{}", symbol);
            }
        }
    }

    Ok(())
}
