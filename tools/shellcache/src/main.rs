//! Command-line host for the shellcache controller.
//!
//! Runs one controller version against a live origin, keeping cache
//! generations in a JSON snapshot between runs.
//!
//! ## Usage
//!
//! ```bash
//! # Install the configured version and reap older generations
//! shellcache --config admin.json --store cache.json install
//!
//! # Route one request the way the controller would
//! shellcache fetch https://shop.example.com/admin/orders.html --navigate
//!
//! # List cache generations
//! shellcache stores
//!
//! # Preview the notification a push payload produces
//! shellcache notify payload.json
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use shellcache_common::{init_logging, load_json, LogConfig, LogFormat};
use shellcache_net::{HttpNetwork, LoaderConfig, Network, Request};
use shellcache_sw::{
    CacheStorage, Controller, ControllerConfig, FetchDisposition, PrecacheOutcome, PushPayload,
    ServiceWorkerRegistration, WorkerEnvironment,
};
use tracing::debug;
use url::Url;

const SCRIPT_PATH: &str = "./sw.js";

#[derive(Parser)]
#[command(name = "shellcache")]
#[command(about = "Offline cache controller host")]
struct Cli {
    /// Controller configuration (JSON)
    #[arg(short, long, global = true, default_value = "shellcache.json")]
    config: PathBuf,

    /// Cache store snapshot
    #[arg(short, long, global = true, default_value = "shellcache-store.json")]
    store: PathBuf,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Install the configured version, activate it and reap older generations
    Install,

    /// Route one GET request through the controller
    Fetch {
        /// Absolute URL to request
        url: Url,
        /// Treat the request as a page navigation
        #[arg(long)]
        navigate: bool,
    },

    /// List cache generations and their entry counts
    Stores,

    /// Render a push payload into the notification it would show
    Notify {
        /// Push payload (JSON)
        payload: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let Cli {
        config,
        store,
        verbose,
        json,
        command,
    } = Cli::parse();

    let log = if verbose {
        LogConfig::debug()
    } else {
        LogConfig::default().with_filter("warn")
    };
    init_logging(if json { log.with_format(LogFormat::Json) } else { log });

    match command {
        Commands::Install => install(&config, &store, json).await,
        Commands::Fetch { url, navigate } => fetch(&config, &store, url, navigate, json).await,
        Commands::Stores => stores(&store, json).await,
        Commands::Notify { payload } => notify(&config, &payload, json).await,
    }
}

async fn load_config(path: &Path) -> Result<ControllerConfig> {
    load_json(path)
        .await
        .with_context(|| format!("loading controller config {}", path.display()))
}

async fn environment(store: &Path) -> Result<WorkerEnvironment> {
    let caches = CacheStorage::load_from(store)
        .await
        .with_context(|| format!("loading cache store {}", store.display()))?;
    let network: Arc<dyn Network> = Arc::new(HttpNetwork::new(LoaderConfig::default())?);
    Ok(WorkerEnvironment::with_caches(network, caches))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[derive(Serialize)]
struct InstallSummary {
    cache: String,
    precached: usize,
    skipped: Vec<(String, String)>,
    reaped: Vec<String>,
}

async fn install(config_path: &Path, store: &Path, json: bool) -> Result<()> {
    let config = load_config(config_path).await?;
    let script_url = config.scope.join(SCRIPT_PATH)?;
    let env = environment(store).await?;

    let controller = Arc::new(Controller::new(config, env.clone())?);
    let registration = ServiceWorkerRegistration::new(controller.scope().clone());
    let outcome = registration.install(script_url, controller).await?;
    env.caches.save_to(store).await?;

    let summary = InstallSummary {
        cache: outcome.precache.cache_name.clone(),
        precached: outcome.precache.cached().count(),
        skipped: outcome
            .precache
            .failed()
            .map(|item| match &item.outcome {
                PrecacheOutcome::Failed(e) => (item.url.to_string(), e.to_string()),
                PrecacheOutcome::Cached => (item.url.to_string(), String::new()),
            })
            .collect(),
        reaped: outcome
            .activated
            .map(|report| report.reaped.deleted)
            .unwrap_or_default(),
    };

    if json {
        return print_json(&summary);
    }
    println!(
        "Installed {}: {}/{} precached",
        summary.cache,
        summary.precached,
        outcome.precache.items.len()
    );
    for (url, reason) in &summary.skipped {
        println!("  skipped {url}: {reason}");
    }
    if !summary.reaped.is_empty() {
        println!("Reaped: {}", summary.reaped.join(", "));
    }
    Ok(())
}

#[derive(Serialize)]
struct FetchSummary {
    url: String,
    route: String,
    status: Option<u16>,
    source: Option<String>,
    bytes: Option<usize>,
    revalidated: Option<bool>,
}

async fn fetch(
    config_path: &Path,
    store: &Path,
    url: Url,
    navigate: bool,
    json: bool,
) -> Result<()> {
    let config = load_config(config_path).await?;
    let env = environment(store).await?;
    let controller = Controller::new(config, env.clone())?;

    let request = if navigate {
        Request::navigate(url.clone())
    } else {
        Request::get(url.clone())
    };

    let summary = match controller.on_fetch(request).await? {
        FetchDisposition::Passthrough(reason) => FetchSummary {
            url: url.to_string(),
            route: format!("passthrough ({reason:?})"),
            status: None,
            source: None,
            bytes: None,
            revalidated: None,
        },
        FetchDisposition::Respond(served) => {
            let revalidated = match served.revalidation {
                Some(revalidation) => Some(revalidation.settled().await.is_updated()),
                None => None,
            };
            FetchSummary {
                url: url.to_string(),
                route: if navigate { "network-first" } else { "stale-while-revalidate" }.to_string(),
                status: Some(served.response.status.as_u16()),
                source: Some(format!("{:?}", served.response.source)),
                bytes: Some(served.response.body.len()),
                revalidated,
            }
        }
    };
    env.caches.save_to(store).await?;
    debug!(url = %url, route = %summary.route, "Fetch complete");

    if json {
        return print_json(&summary);
    }
    println!("{} [{}]", summary.url, summary.route);
    if let (Some(status), Some(source), Some(bytes)) = (summary.status, &summary.source, summary.bytes) {
        println!("  {status} from {source}, {bytes} bytes");
    }
    if let Some(updated) = summary.revalidated {
        println!("  revalidation: {}", if updated { "updated" } else { "unchanged" });
    }
    Ok(())
}

#[derive(Serialize)]
struct StoreSummary {
    name: String,
    entries: usize,
}

async fn stores(store: &Path, json: bool) -> Result<()> {
    let caches = CacheStorage::load_from(store)
        .await
        .with_context(|| format!("loading cache store {}", store.display()))?;

    let mut summaries = Vec::new();
    for name in caches.keys().await {
        let entries = caches.open(&name).await.len().await;
        summaries.push(StoreSummary { name, entries });
    }

    if json {
        return print_json(&summaries);
    }
    if summaries.is_empty() {
        println!("No cache generations in {}", store.display());
    }
    for summary in &summaries {
        println!("{:<32} {:>5} entries", summary.name, summary.entries);
    }
    Ok(())
}

async fn notify(config_path: &Path, payload_path: &Path, json: bool) -> Result<()> {
    let config = load_config(config_path).await?;
    let payload: PushPayload = load_json(payload_path)
        .await
        .with_context(|| format!("loading push payload {}", payload_path.display()))?;

    let network: Arc<dyn Network> = Arc::new(HttpNetwork::new(LoaderConfig::default())?);
    let controller = Controller::new(config, WorkerEnvironment::new(network))?;
    let notification = controller.on_push(&payload).await;

    if json {
        return print_json(&notification);
    }
    println!("{}", notification.title);
    println!("  {}", notification.body);
    println!("  opens {}", controller.config().resolve(&notification.url)?);
    Ok(())
}
