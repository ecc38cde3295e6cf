mod config;
mod coordinator;
mod images;
mod jobs;
mod model;
mod parser;
mod scraper;
mod storage;
mod utils;

use config::{AppConfig, load_config};
use coordinator::Coordinator;
use images::ImageSink;
use jobs::{DetailJob, IndexJob, JobKind, SearchJob, VariantListJob};
use model::{CrawlError, RunReport};
use scraper::HttpFetcher;
use storage::SqliteStorage;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use url::Url;

const DEFAULT_CONFIG_PATH: &str = "config.json";

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Set panic hook to log details about any panic
    std::panic::set_hook(Box::new(|panic_info| {
        eprintln!("Panic occurred: {:?}", panic_info);
    }));

    let (config_path, requested) = match parse_args(std::env::args().skip(1)) {
        Ok(args) => args,
        Err(e) => {
            error!("{}", e);
            error!("usage: variants-crawler [config-path] [job...]");
            return ExitCode::FAILURE;
        }
    };

    // Load configuration from file; a missing default file means defaults
    let config = if config_path.is_none() && !PathBuf::from(DEFAULT_CONFIG_PATH).exists() {
        info!("{} not found, using defaults", DEFAULT_CONFIG_PATH);
        AppConfig::default()
    } else {
        let path = config_path.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
        match load_config(&path) {
            Ok(cfg) => cfg,
            Err(e) => {
                error!("Config load error: {}", e);
                return ExitCode::FAILURE;
            }
        }
    };
    let jobs = if requested.is_empty() {
        config.jobs.clone()
    } else {
        requested
    };

    let base = match config.base_url() {
        Ok(url) => url,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let fetcher = match HttpFetcher::new(&config.fetch, &base, config.crawl.workers) {
        Ok(f) => Arc::new(f),
        Err(e) => {
            error!("Failed to build HTTP client: {}", e);
            return ExitCode::FAILURE;
        }
    };

    // Initialize storage (SQLite) with async access (wrapped in a Mutex)
    let storage = match SqliteStorage::new(&config.database_path) {
        Ok(s) => Arc::new(Mutex::new(s)),
        Err(e) => {
            error!(
                "Failed to open storage {}: {}",
                config.database_path.display(),
                e
            );
            return ExitCode::FAILURE;
        }
    };

    let mut coordinator = Coordinator::new(fetcher, storage.clone(), config.crawl.clone());
    if let Some(dir) = &config.image_dir {
        info!("Writing images under {}", dir.display());
        coordinator = coordinator.with_image_sink(ImageSink::new(dir));
    }

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, finishing in-flight items...");
                cancel.cancel();
            }
        });
    }

    let mut exit = ExitCode::SUCCESS;
    for kind in jobs {
        if cancel.is_cancelled() {
            break;
        }
        info!("Starting job {}", kind);
        match run_job(&coordinator, kind, &config, &base, &cancel).await {
            Ok(report) => report.log_summary(),
            Err(e) => {
                if let CrawlError::Fatal { report, .. } = &e {
                    report.log_summary();
                }
                error!("{}", e);
                exit = ExitCode::FAILURE;
                break;
            }
        }
    }

    match storage.lock().await.table_counts() {
        Ok(counts) => info!(
            "Store totals: {} summary, {} variants, {} search results, {} details",
            counts.summary, counts.variants, counts.search_results, counts.details
        ),
        Err(e) => warn!("Could not read store totals: {}", e),
    }

    exit
}

/// Splits the command line into an optional config path and job names.
/// The first argument is a config path unless it names a job.
fn parse_args<I>(args: I) -> Result<(Option<PathBuf>, Vec<JobKind>), jobs::UnknownJob>
where
    I: IntoIterator<Item = String>,
{
    let mut args = args.into_iter().peekable();
    let config_path = match args.peek() {
        Some(first) if first.parse::<JobKind>().is_err() => args.next().map(PathBuf::from),
        _ => None,
    };
    let jobs = args
        .map(|a| a.parse::<JobKind>())
        .collect::<Result<Vec<_>, _>>()?;
    Ok((config_path, jobs))
}

async fn run_job(
    coordinator: &Coordinator,
    kind: JobKind,
    config: &AppConfig,
    base: &Url,
    cancel: &CancellationToken,
) -> Result<RunReport, CrawlError> {
    match kind {
        JobKind::Index => {
            let job = IndexJob::new(base.clone(), config.index_pages, &config.index_appendix_id);
            coordinator.run(&job, cancel).await
        }
        JobKind::VariantList => coordinator.run(&VariantListJob::new(base.clone()), cancel).await,
        JobKind::Search => coordinator.run(&SearchJob::new(base.clone()), cancel).await,
        JobKind::Standard => coordinator.run(&DetailJob::Standard, cancel).await,
        JobKind::Variant => coordinator.run(&DetailJob::Variant, cancel).await,
        JobKind::Appendix => coordinator.run(&DetailJob::Appendix, cancel).await,
    }
}
