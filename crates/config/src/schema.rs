use serde::Deserialize;

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub system: SystemConfig,
    pub sqlite: SqliteConfig,
    pub ingestion: IngestionConfig,
    pub labels: LabelConfig,
    pub prices: PriceConfig,
    pub classification: ClassificationConfig,
    pub dedup: DedupConfig,
    pub registry: RegistryConfig,
    pub supervisor: SupervisorConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    pub env: String,
    pub log_level: String,
    pub log_json: bool,
    pub heartbeat_seconds: u64,
    pub migrations_dir: String,
    pub state_dir: String,
    pub audit_log_path: String,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            env: "dev".to_string(),
            log_level: "info".to_string(),
            log_json: false,
            heartbeat_seconds: 30,
            migrations_dir: "migrations".to_string(),
            state_dir: "state".to_string(),
            audit_log_path: "state/audit.jsonl".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SqliteConfig {
    pub path: String,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            path: "state/whaleflow.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IngestionConfig {
    pub fanin_queue_capacity: usize,
    pub enriched_queue_capacity: usize,
    pub classified_queue_capacity: usize,
    pub stored_queue_capacity: usize,
    pub queue_overflow_policy: String,
    pub enrichment_workers: usize,
    pub classification_workers: usize,
    pub sink_workers: usize,
    pub poll_interval_seconds: u64,
    pub watermark_path: String,
    pub seen_events_limit: usize,
    pub seen_events_ttl_ms: u64,
    /// Symbols the receipt poller watches, uppercased.
    pub watched_tokens: Vec<String>,
    pub explorer_http_url: String,
    pub alert_min_usd: f64,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            fanin_queue_capacity: 1024,
            enriched_queue_capacity: 512,
            classified_queue_capacity: 512,
            stored_queue_capacity: 512,
            queue_overflow_policy: "block".to_string(),
            enrichment_workers: 4,
            classification_workers: 8,
            sink_workers: 2,
            poll_interval_seconds: 15,
            watermark_path: "state/watermarks.json".to_string(),
            seen_events_limit: 10_000,
            seen_events_ttl_ms: 10 * 60 * 1_000,
            watched_tokens: vec![
                "WETH".to_string(),
                "WBTC".to_string(),
                "USDC".to_string(),
                "USDT".to_string(),
                "LINK".to_string(),
                "UNI".to_string(),
                "PEPE".to_string(),
                "SHIB".to_string(),
            ],
            explorer_http_url: String::new(),
            alert_min_usd: 100_000.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LabelConfig {
    pub ttl_seconds: u64,
    pub negative_ttl_seconds: u64,
    pub cache_capacity: usize,
    pub lookup_timeout_ms: u64,
    pub explorer_rps: u64,
    pub explorer_http_url: String,
    pub explorer_api_key: String,
    /// Optional JSON file overlaying the embedded address registry.
    pub overlay_path: String,
}

impl Default for LabelConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: 3_600,
            negative_ttl_seconds: 60,
            cache_capacity: 100_000,
            lookup_timeout_ms: 2_000,
            explorer_rps: 5,
            explorer_http_url: String::new(),
            explorer_api_key: String::new(),
            overlay_path: String::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PriceConfig {
    pub staleness_seconds: u64,
}

impl Default for PriceConfig {
    fn default() -> Self {
        Self {
            staleness_seconds: 120,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClassificationConfig {
    pub high_confidence: f64,
    pub medium_confidence: f64,
    pub early_exit: f64,
    pub cex_phase_exit: f64,
    pub dex_phase_exit: f64,
    pub usd_boost_threshold: f64,
    pub usd_boost_amount: f64,
    pub cex_weight: f64,
    pub dex_weight: f64,
    pub chain_weight: f64,
    pub behavior_weight: f64,
    pub mega_whale_weight: f64,
    pub mega_whale_enabled: bool,
    /// User-to-router implies SELL even without a decoded swap. Unsound
    /// when swap logs are unavailable; off unless an operator opts in.
    pub dex_coverage_mode: bool,
    /// Treat L1->L2 bridge deposits as BUY and exits as SELL.
    pub bridge_directional: bool,
    pub receipt_timeout_ms: u64,
    pub phase_timeout_ms: u64,
}

impl Default for ClassificationConfig {
    fn default() -> Self {
        Self {
            high_confidence: 0.80,
            medium_confidence: 0.60,
            early_exit: 0.85,
            cex_phase_exit: 0.75,
            dex_phase_exit: 0.70,
            usd_boost_threshold: 100_000.0,
            usd_boost_amount: 0.15,
            cex_weight: 0.65,
            dex_weight: 0.60,
            chain_weight: 0.50,
            behavior_weight: 0.45,
            mega_whale_weight: 0.35,
            mega_whale_enabled: false,
            dex_coverage_mode: false,
            bridge_directional: false,
            receipt_timeout_ms: 5_000,
            phase_timeout_ms: 8_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    pub time_window_seconds: f64,
    pub usd_threshold: f64,
    pub percentage_threshold: f64,
    pub safeguard_usd: f64,
    pub memory_ring_size: usize,
    pub lookback_limit: usize,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            time_window_seconds: 10.0,
            usd_threshold: 5.0,
            percentage_threshold: 0.0015,
            safeguard_usd: 5_000_000.0,
            memory_ring_size: 50,
            lookback_limit: 200,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub snapshot_path: String,
    pub snapshot_seconds: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            snapshot_path: "state/whale_registry.json".to_string(),
            snapshot_seconds: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    pub health_timeout_seconds: u64,
    pub restart_initial_ms: u64,
    pub restart_max_ms: u64,
    pub circuit_error_threshold: u32,
    pub circuit_window_seconds: u64,
    pub circuit_half_open_seconds: u64,
    pub drain_timeout_seconds: u64,
    pub stop_file_path: String,
    pub stats_snapshot_path: String,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            health_timeout_seconds: 120,
            restart_initial_ms: 1_000,
            restart_max_ms: 60_000,
            circuit_error_threshold: 10,
            circuit_window_seconds: 60,
            circuit_half_open_seconds: 30,
            drain_timeout_seconds: 30,
            stop_file_path: "state/whaleflow.stop".to_string(),
            stats_snapshot_path: "state/stats.json".to_string(),
        }
    }
}
