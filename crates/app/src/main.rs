mod audit;
mod cleanup;
mod explorer;
mod pipeline;
mod sink;
mod stats;
mod supervisor;
mod tokens;

use anyhow::{Context, Result};
use std::env;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use whaleflow_classifier::{ClassificationEngine, ReceiptProvider};
use whaleflow_config::{load_from_env_or_default, AppConfig};
use whaleflow_core_types::Chain;
use whaleflow_enrichment::{
    EnrichmentService, ExplorerLabelClient, LabelProvider, PriceResolver,
};
use whaleflow_ingestion::{
    BoundedQueue, QueueOverflowPolicy, ReceiptPollerSource, SeenEvents, SourceContext,
    SourceTelemetry, TransferSource, WatermarkFile,
};
use whaleflow_registry::WhaleRegistry;
use whaleflow_storage::{SharedLabelStore, SqliteStore};

use crate::audit::AuditLog;
use crate::explorer::EtherscanClient;
use crate::pipeline::{run_pipeline, PipelineDeps};
use crate::stats::PipelineStats;

const DEFAULT_CONFIG_PATH: &str = "configs/whaleflow.toml";

const EXIT_USAGE: i32 = 1;
const EXIT_RUNTIME: i32 = 2;

#[derive(Debug, PartialEq)]
enum Command {
    Start,
    Stop,
    Stats,
    CleanupDuplicates { live: bool },
}

fn parse_command(args: &[String]) -> Result<Command, String> {
    let mut command = None;
    let mut live = false;
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "start" | "stop" | "stats" | "cleanup-duplicates" if command.is_none() => {
                command = Some(arg.clone());
            }
            "--dry-run" => live = false,
            "--live" => live = true,
            "--config" => {
                if iter.next().is_none() {
                    return Err("--config requires a path".to_string());
                }
            }
            other if other.starts_with("--config=") => {}
            other if command.is_none() => return Err(format!("unknown command: {other}")),
            other => return Err(format!("unexpected argument: {other}")),
        }
    }
    match command.as_deref() {
        Some("start") => Ok(Command::Start),
        Some("stop") => Ok(Command::Stop),
        Some("stats") => Ok(Command::Stats),
        Some("cleanup-duplicates") => Ok(Command::CleanupDuplicates { live }),
        _ => Err("missing command".to_string()),
    }
}

fn parse_config_arg(args: &[String]) -> Option<PathBuf> {
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if arg == "--config" {
            return iter.next().map(PathBuf::from);
        }
        if let Some(inline) = arg.strip_prefix("--config=") {
            return Some(PathBuf::from(inline));
        }
    }
    None
}

fn usage() -> &'static str {
    "usage: whaleflow <start|stop|stats|cleanup-duplicates [--dry-run|--live]> [--config PATH]"
}

fn init_tracing(log_level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    if json {
        tracing_subscriber::fmt()
            .with_target(false)
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_target(false)
            .with_env_filter(filter)
            .compact()
            .init();
    }
}

fn resolve_migrations_dir(config_path: &Path, configured: &str) -> PathBuf {
    let configured = PathBuf::from(configured);
    if configured.is_absolute() || configured.exists() {
        return configured;
    }
    if let Some(config_parent) = config_path.parent() {
        let sibling = config_parent.join(&configured);
        if sibling.exists() {
            return sibling;
        }
        if let Some(project_root) = config_parent.parent() {
            let root_candidate = project_root.join(&configured);
            if root_candidate.exists() {
                return root_candidate;
            }
        }
    }
    configured
}

#[tokio::main]
async fn main() {
    let args: Vec<String> = env::args().skip(1).collect();
    let command = match parse_command(&args) {
        Ok(command) => command,
        Err(error) => {
            eprintln!("{error}\n{usage}", usage = usage());
            std::process::exit(EXIT_USAGE);
        }
    };

    let default_path = parse_config_arg(&args).unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
    let (config, config_path) = match load_from_env_or_default(&default_path) {
        Ok(loaded) => loaded,
        Err(error) => {
            eprintln!("failed to load configuration: {error:#}");
            std::process::exit(EXIT_RUNTIME);
        }
    };

    let result = match command {
        Command::Start => {
            init_tracing(&config.system.log_level, config.system.log_json);
            info!(
                config_path = %config_path.display(),
                env = %config.system.env,
                "configuration loaded"
            );
            start(&config, &config_path).await
        }
        Command::Stop => stop(&config),
        Command::Stats => show_stats(&config),
        Command::CleanupDuplicates { live } => {
            init_tracing(&config.system.log_level, config.system.log_json);
            run_cleanup(&config, &config_path, live)
        }
    };

    if let Err(error) = result {
        eprintln!("error: {error:#}");
        std::process::exit(EXIT_RUNTIME);
    }
}

async fn start(config: &AppConfig, config_path: &Path) -> Result<()> {
    let sqlite_path = PathBuf::from(&config.sqlite.path);
    let mut store =
        SqliteStore::open(&sqlite_path).context("failed to initialize sqlite store")?;
    let migrations_dir = resolve_migrations_dir(config_path, &config.system.migrations_dir);
    let applied = store
        .run_migrations(&migrations_dir)
        .with_context(|| format!("failed to apply migrations in {}", migrations_dir.display()))?;
    info!(applied, "sqlite migrations applied");

    let registry = Arc::new(
        WhaleRegistry::load(Path::new(&config.registry.snapshot_path))
            .context("failed to load whale registry")?,
    );
    let stats = Arc::new(PipelineStats::default());
    let audit = Arc::new(
        AuditLog::open(Path::new(&config.system.audit_log_path))
            .context("failed to open audit log")?,
    );

    let label_store: Arc<dyn whaleflow_enrichment::LabelStore> =
        Arc::new(SharedLabelStore::new(store));
    let remote_labels = if config.labels.explorer_http_url.trim().is_empty() {
        None
    } else {
        Some(Arc::new(ExplorerLabelClient::new(
            &config.labels.explorer_http_url,
            &config.labels.explorer_api_key,
            Duration::from_millis(config.labels.lookup_timeout_ms.max(100)),
        )?) as Arc<dyn whaleflow_enrichment::RemoteLabelFetch>)
    };
    let labels = Arc::new(LabelProvider::new(
        &config.labels,
        Some(label_store),
        remote_labels,
    )?);
    let prices = Arc::new(PriceResolver::new(config.prices.staleness_seconds));
    let enrichment = Arc::new(EnrichmentService::new(
        labels,
        prices,
        Duration::from_millis(config.labels.lookup_timeout_ms.max(100) * 2),
    ));

    let token_book = tokens::build_token_book();
    let receipts = if config.ingestion.explorer_http_url.trim().is_empty() {
        None
    } else {
        Some(Arc::new(EtherscanClient::new(
            &config.ingestion.explorer_http_url,
            &config.labels.explorer_api_key,
            Duration::from_millis(config.classification.receipt_timeout_ms.max(100)),
        )?) as Arc<dyn ReceiptProvider>)
    };
    let engine = Arc::new(ClassificationEngine::new(
        config.classification.clone(),
        registry.clone(),
        receipts,
        None,
        Arc::new(token_book.clone()),
    ));

    // Fan-in shared by every source.
    let fanin = Arc::new(BoundedQueue::new(config.ingestion.fanin_queue_capacity));
    let policy = QueueOverflowPolicy::parse(&config.ingestion.queue_overflow_policy);
    let seen = Arc::new(Mutex::new(SeenEvents::new(
        config.ingestion.seen_events_limit,
        Duration::from_millis(config.ingestion.seen_events_ttl_ms.max(1_000)),
    )));
    let (shutdown_tx, _) = watch::channel(false);

    let mut sources: Vec<Arc<dyn TransferSource>> = Vec::new();
    if !config.ingestion.explorer_http_url.trim().is_empty() {
        let watermarks = WatermarkFile::load(&config.ingestion.watermark_path)
            .context("failed to load watermarks")?;
        let api = EtherscanClient::new(
            &config.ingestion.explorer_http_url,
            &config.labels.explorer_api_key,
            Duration::from_secs(10),
        )?;
        sources.push(Arc::new(ReceiptPollerSource::new(
            "eth-receipt-poller",
            Chain::Ethereum,
            Box::new(api),
            tokens::watched_contracts(&config.ingestion.watched_tokens),
            Duration::from_secs(config.ingestion.poll_interval_seconds.max(1)),
            watermarks,
        )));
    }
    if sources.is_empty() {
        warn!("no ingestion sources configured; set WHALEFLOW_EXPLORER_HTTP_URL or edit the config file");
    }

    let source_contexts: Vec<SourceContext> = sources
        .iter()
        .map(|_| {
            SourceContext::new(
                fanin.clone(),
                policy,
                Arc::new(SourceTelemetry::default()),
                seen.clone(),
                shutdown_tx.subscribe(),
            )
        })
        .collect();

    run_pipeline(
        config,
        PipelineDeps {
            sources,
            enrichment,
            engine,
            registry,
            audit,
            stats,
            fanin,
            source_contexts,
        },
        shutdown_tx,
    )
    .await
}

fn stop(config: &AppConfig) -> Result<()> {
    let stop_path = PathBuf::from(&config.supervisor.stop_file_path);
    if let Some(parent) = stop_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create stop dir: {}", parent.display()))?;
    }
    std::fs::write(&stop_path, b"stop\n")
        .with_context(|| format!("failed to write stop file: {}", stop_path.display()))?;
    println!("stop requested via {}", stop_path.display());
    Ok(())
}

fn show_stats(config: &AppConfig) -> Result<()> {
    let snapshot = stats::read_snapshot(Path::new(&config.supervisor.stats_snapshot_path))
        .context("no stats snapshot available; is the pipeline running?")?;
    print!("{}", stats::render_snapshot(&snapshot));
    Ok(())
}

fn run_cleanup(config: &AppConfig, config_path: &Path, live: bool) -> Result<()> {
    let mut store = SqliteStore::open(Path::new(&config.sqlite.path))
        .context("failed to open sqlite store")?;
    let migrations_dir = resolve_migrations_dir(config_path, &config.system.migrations_dir);
    store
        .run_migrations(&migrations_dir)
        .context("failed to apply migrations")?;
    let report = cleanup::cleanup_duplicates(&store, &config.dedup, live)?;
    print!("{}", cleanup::render_report(&report, live));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn commands_parse() {
        assert_eq!(parse_command(&args(&["start"])).unwrap(), Command::Start);
        assert_eq!(parse_command(&args(&["stop"])).unwrap(), Command::Stop);
        assert_eq!(parse_command(&args(&["stats"])).unwrap(), Command::Stats);
        assert_eq!(
            parse_command(&args(&["cleanup-duplicates"])).unwrap(),
            Command::CleanupDuplicates { live: false }
        );
        assert_eq!(
            parse_command(&args(&["cleanup-duplicates", "--live"])).unwrap(),
            Command::CleanupDuplicates { live: true }
        );
    }

    #[test]
    fn unknown_command_is_a_usage_error() {
        assert!(parse_command(&args(&["restart"])).is_err());
        assert!(parse_command(&args(&[])).is_err());
        assert!(parse_command(&args(&["start", "--bogus"])).is_err());
    }

    #[test]
    fn config_arg_forms_parse() {
        assert_eq!(
            parse_config_arg(&args(&["start", "--config", "a.toml"])),
            Some(PathBuf::from("a.toml"))
        );
        assert_eq!(
            parse_config_arg(&args(&["start", "--config=b.toml"])),
            Some(PathBuf::from("b.toml"))
        );
        assert_eq!(parse_config_arg(&args(&["start"])), None);
    }
}
