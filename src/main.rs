use anyhow::{bail, Context, Result};
use clap::Parser;
use ligascraper::{
    cache::{FileStore, TimedCache},
    config::Config,
    fetch::{Fetcher, Origin},
    schema::Dataset,
};
use reqwest::Client;
use std::{collections::BTreeMap, path::PathBuf};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(author, version, about = "Fetch league datasets and print them as JSON")]
struct Args {
    /// YAML configuration file
    #[arg(long, env = "LIGASCRAPER_CONFIG", default_value = "ligascraper.yaml")]
    config: PathBuf,

    /// Dataset id to load (repeatable; default all)
    #[arg(long = "dataset")]
    datasets: Vec<String>,

    /// Skip the cache and go to the source
    #[arg(long)]
    force: bool,

    /// Drop cached copies of the selected datasets and exit
    #[arg(long)]
    clear: bool,

    /// Pretty-print the JSON output
    #[arg(long)]
    pretty: bool,
}

fn init_logging() {
    let env = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_from_env("LOG_LEVEL"))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    fmt::Subscriber::builder()
        .with_env_filter(env)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging();

    let config = match Config::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!(path = %args.config.display(), "{:#}", e);
            return Err(e);
        }
    };

    // ─── cache ───────────────────────────────────────────────────────
    let store = FileStore::new(&config.cache.dir)
        .with_context(|| format!("opening cache dir {}", config.cache.dir.display()))?;
    let cache = TimedCache::new(store, config.cache.prefix.clone());
    let purged = cache.purge_stale_versions();
    if purged > 0 {
        info!(purged, "removed entries from older cache versions");
    }

    // ─── datasets ────────────────────────────────────────────────────
    let parser = config.parser();
    let mut specs = config.dataset_specs(&parser);
    if !args.datasets.is_empty() {
        for id in &args.datasets {
            if !specs.iter().any(|s| &s.id == id) {
                bail!("unknown dataset `{}`", id);
            }
        }
        specs.retain(|s| args.datasets.contains(&s.id));
    }
    if specs.is_empty() {
        warn!("no datasets configured");
    }

    let fetcher = Fetcher::new(Client::new(), cache, parser, config.fetch_settings());

    if args.clear {
        for spec in &specs {
            fetcher.clear(&spec.id);
            info!(dataset = %spec.id, "cleared");
        }
        return Ok(());
    }

    // ─── load ────────────────────────────────────────────────────────
    let loaded = fetcher.load_all_detailed(&specs, args.force).await;
    let mut output: BTreeMap<String, Dataset> = BTreeMap::new();
    for (id, loaded) in loaded {
        match loaded.origin {
            Origin::Fresh => info!(dataset = %id, rows = loaded.dataset.len(), "fresh"),
            Origin::Cached { written_at } => {
                info!(dataset = %id, rows = loaded.dataset.len(), %written_at, "cached")
            }
            Origin::Stale { written_at } => {
                warn!(dataset = %id, rows = loaded.dataset.len(), %written_at, "stale")
            }
            Origin::Fallback => warn!(dataset = %id, rows = loaded.dataset.len(), "fallback"),
        }
        output.insert(id, loaded.dataset);
    }

    let json = if args.pretty {
        serde_json::to_string_pretty(&output)?
    } else {
        serde_json::to_string(&output)?
    };
    println!("{}", json);
    Ok(())
}
