use anyhow::{Context, Result};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use super::env_parsing::{parse_csv_list, parse_env_bool, validate_thresholds};
use super::AppConfig;

pub fn load_from_path(path: impl AsRef<Path>) -> Result<AppConfig> {
    let path = path.as_ref();
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read config: {}", path.display()))?;
    let cfg: AppConfig = toml::from_str(&raw)
        .with_context(|| format!("failed to parse TOML: {}", path.display()))?;
    Ok(cfg)
}

/// Load config from `WHALEFLOW_CONFIG` or the given default path, then
/// apply environment overrides. Missing config file is not an error: the
/// built-in defaults are used so `whaleflow start` works out of the box.
pub fn load_from_env_or_default(default_path: &Path) -> Result<(AppConfig, PathBuf)> {
    let configured = env::var("WHALEFLOW_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| default_path.to_path_buf());
    let mut config = if configured.exists() {
        load_from_path(&configured)?
    } else {
        AppConfig::default()
    };

    apply_env_overrides(&mut config);
    validate_thresholds(&config)?;

    Ok((config, configured))
}

fn apply_env_overrides(config: &mut AppConfig) {
    // Documented plain-name knobs, kept stable for operators migrating
    // from the previous monitor deployment.
    if let Some(window) = env_f64("NEAR_DUPE_TIME_WINDOW") {
        config.dedup.time_window_seconds = window;
    }
    if let Some(usd) = env_f64("NEAR_DUPE_USD_THRESHOLD") {
        config.dedup.usd_threshold = usd;
    }
    if let Some(pct) = env_f64("NEAR_DUPE_PERCENTAGE_THRESHOLD") {
        config.dedup.percentage_threshold = pct;
    }
    if let Some(safeguard) = env_f64("NEAR_DUPE_SAFEGUARD_USD") {
        config.dedup.safeguard_usd = safeguard;
    }
    if let Some(high) = env_f64("CLASSIFICATION_HIGH") {
        config.classification.high_confidence = high;
    }
    if let Some(medium) = env_f64("CLASSIFICATION_MEDIUM") {
        config.classification.medium_confidence = medium;
    }
    if let Some(exit) = env_f64("CLASSIFICATION_EARLY_EXIT") {
        config.classification.early_exit = exit;
    }
    if let Some(ttl) = env_u64("LABEL_TTL_SECONDS") {
        config.labels.ttl_seconds = ttl;
    }
    if let Some(staleness) = env_u64("PRICE_STALENESS_SECONDS") {
        config.prices.staleness_seconds = staleness;
    }

    if let Ok(level) = env::var("WHALEFLOW_LOG_LEVEL") {
        let trimmed = level.trim();
        if !trimmed.is_empty() {
            config.system.log_level = trimmed.to_string();
        }
    }
    if let Some(json) = env::var("WHALEFLOW_LOG_JSON").ok().and_then(parse_env_bool) {
        config.system.log_json = json;
    }
    if let Ok(path) = env::var("WHALEFLOW_SQLITE_PATH") {
        if !path.trim().is_empty() {
            config.sqlite.path = path;
        }
    }
    if let Some(capacity) = env_usize("WHALEFLOW_FANIN_QUEUE_CAPACITY") {
        config.ingestion.fanin_queue_capacity = capacity;
    }
    if let Some(capacity) = env_usize("WHALEFLOW_ENRICHED_QUEUE_CAPACITY") {
        config.ingestion.enriched_queue_capacity = capacity;
    }
    if let Some(capacity) = env_usize("WHALEFLOW_CLASSIFIED_QUEUE_CAPACITY") {
        config.ingestion.classified_queue_capacity = capacity;
    }
    if let Some(capacity) = env_usize("WHALEFLOW_STORED_QUEUE_CAPACITY") {
        config.ingestion.stored_queue_capacity = capacity;
    }
    if let Ok(policy) = env::var("WHALEFLOW_QUEUE_OVERFLOW_POLICY") {
        let trimmed = policy.trim();
        if !trimmed.is_empty() {
            config.ingestion.queue_overflow_policy = trimmed.to_string();
        }
    }
    if let Some(workers) = env_usize("WHALEFLOW_ENRICHMENT_WORKERS") {
        config.ingestion.enrichment_workers = workers;
    }
    if let Some(workers) = env_usize("WHALEFLOW_CLASSIFICATION_WORKERS") {
        config.ingestion.classification_workers = workers;
    }
    if let Some(workers) = env_usize("WHALEFLOW_SINK_WORKERS") {
        config.ingestion.sink_workers = workers;
    }
    if let Ok(tokens_csv) = env::var("WHALEFLOW_WATCHED_TOKENS") {
        let tokens = parse_csv_list(&tokens_csv);
        if !tokens.is_empty() {
            config.ingestion.watched_tokens = tokens;
        }
    }
    if let Ok(url) = env::var("WHALEFLOW_EXPLORER_HTTP_URL") {
        if !url.trim().is_empty() {
            config.ingestion.explorer_http_url = url.clone();
            config.labels.explorer_http_url = url;
        }
    }
    if let Ok(key) = env::var("WHALEFLOW_EXPLORER_API_KEY") {
        if !key.trim().is_empty() {
            config.labels.explorer_api_key = key;
        }
    }
    if let Some(rps) = env_u64("WHALEFLOW_LABEL_EXPLORER_RPS") {
        config.labels.explorer_rps = rps;
    }
    if let Some(enabled) = env::var("WHALEFLOW_DEX_COVERAGE_MODE")
        .ok()
        .and_then(parse_env_bool)
    {
        config.classification.dex_coverage_mode = enabled;
    }
    if let Some(enabled) = env::var("WHALEFLOW_BRIDGE_DIRECTIONAL")
        .ok()
        .and_then(parse_env_bool)
    {
        config.classification.bridge_directional = enabled;
    }
    if let Some(enabled) = env::var("WHALEFLOW_MEGA_WHALE_ENABLED")
        .ok()
        .and_then(parse_env_bool)
    {
        config.classification.mega_whale_enabled = enabled;
    }
}

fn env_f64(name: &str) -> Option<f64> {
    env::var(name).ok().and_then(|value| value.trim().parse::<f64>().ok())
}

fn env_u64(name: &str) -> Option<u64> {
    env::var(name).ok().and_then(|value| value.trim().parse::<u64>().ok())
}

fn env_usize(name: &str) -> Option<usize> {
    env::var(name).ok().and_then(|value| value.trim().parse::<usize>().ok())
}
