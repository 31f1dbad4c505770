use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info};
use whaleflow_core_types::{ClassificationKind, WhaleStats};

const SHARD_COUNT: usize = 32;
const PROVEN_TRADE_COUNT: u64 = 5;
const PROVEN_TOTAL_USD: f64 = 250_000.0;
const ACTIVE_TRADE_COUNT: u64 = 10;
const ACTIVE_WINDOW_DAYS: i64 = 30;

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct RegistryReport {
    pub tracked_whales: u64,
    pub proven_whales: u64,
    pub total_trades: u64,
    pub total_volume_usd: f64,
}

/// Per-wallet cumulative stats, striped by address hash so the dedup
/// shard workers never contend on one lock. Snapshots clone each stripe
/// under its lock and write outside all locks.
pub struct WhaleRegistry {
    shards: Vec<Mutex<HashMap<String, WhaleStats>>>,
}

impl Default for WhaleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl WhaleRegistry {
    pub fn new() -> Self {
        Self {
            shards: (0..SHARD_COUNT).map(|_| Mutex::new(HashMap::new())).collect(),
        }
    }

    /// Rehydrate from the snapshot file, starting fresh if it is absent.
    pub fn load(path: &Path) -> Result<Self> {
        let registry = Self::new();
        if !path.exists() {
            info!(path = %path.display(), "no whale registry snapshot, starting fresh");
            return Ok(registry);
        }
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read registry snapshot: {}", path.display()))?;
        let stats: Vec<WhaleStats> = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse registry snapshot: {}", path.display()))?;
        let loaded = stats.len();
        for entry in stats {
            let shard = registry.shard_for(&entry.address);
            let mut guard = shard.lock().unwrap_or_else(|poison| poison.into_inner());
            guard.insert(entry.address.clone(), entry);
        }
        info!(whales = loaded, path = %path.display(), "whale registry rehydrated");
        Ok(registry)
    }

    fn shard_for(&self, address: &str) -> &Mutex<HashMap<String, WhaleStats>> {
        let digest = Sha256::digest(address.to_ascii_lowercase().as_bytes());
        let index = u64::from_be_bytes(digest[..8].try_into().expect("8 digest bytes"));
        &self.shards[(index % SHARD_COUNT as u64) as usize]
    }

    pub fn observe(
        &self,
        address: &str,
        kind: ClassificationKind,
        usd_value: f64,
        token_symbol: &str,
        now: DateTime<Utc>,
    ) {
        let address = address.to_ascii_lowercase();
        let shard = self.shard_for(&address);
        let mut guard = shard.lock().unwrap_or_else(|poison| poison.into_inner());
        let stats = guard
            .entry(address.clone())
            .or_insert_with(|| WhaleStats::new(&address, now));

        stats.trade_count += 1;
        stats.total_usd += usd_value.max(0.0);
        stats.last_seen = stats.last_seen.max(now);
        stats.first_seen = stats.first_seen.min(now);
        match kind {
            ClassificationKind::Buy | ClassificationKind::ModerateBuy => stats.buy_count += 1,
            ClassificationKind::Sell | ClassificationKind::ModerateSell => stats.sell_count += 1,
            _ => {}
        }
        let symbol = token_symbol.trim().to_ascii_uppercase();
        if !symbol.is_empty() {
            stats.tokens.insert(symbol);
        }

        stats.smart_money_score = smart_money_score(stats);
        if stats.trade_count >= PROVEN_TRADE_COUNT && stats.total_usd >= PROVEN_TOTAL_USD {
            stats.is_proven = true;
        }
    }

    pub fn lookup(&self, address: &str) -> Option<WhaleStats> {
        let address = address.to_ascii_lowercase();
        let shard = self.shard_for(&address);
        let guard = shard.lock().unwrap_or_else(|poison| poison.into_inner());
        guard.get(&address).cloned()
    }

    /// Behavioral confidence boost: proven whales 0.15, recently active
    /// traders 0.08, wallets with a little history 0.03.
    pub fn confidence_boost(&self, address: &str, now: DateTime<Utc>) -> f64 {
        let Some(stats) = self.lookup(address) else {
            return 0.0;
        };
        if stats.is_proven {
            return 0.15;
        }
        if stats.trade_count >= ACTIVE_TRADE_COUNT
            && now - stats.last_seen < Duration::days(ACTIVE_WINDOW_DAYS)
        {
            return 0.08;
        }
        if stats.trade_count >= 2 {
            return 0.03;
        }
        0.0
    }

    pub fn is_proven(&self, address: &str) -> bool {
        self.lookup(address).map(|stats| stats.is_proven).unwrap_or(false)
    }

    pub fn report(&self) -> RegistryReport {
        let mut report = RegistryReport::default();
        for shard in &self.shards {
            let guard = shard.lock().unwrap_or_else(|poison| poison.into_inner());
            for stats in guard.values() {
                report.tracked_whales += 1;
                report.total_trades += stats.trade_count;
                report.total_volume_usd += stats.total_usd;
                if stats.is_proven {
                    report.proven_whales += 1;
                }
            }
        }
        report
    }

    /// Write the snapshot from a copy of each stripe; writers are never
    /// blocked for longer than one stripe clone.
    pub fn snapshot(&self, path: &Path) -> Result<()> {
        let mut all: Vec<WhaleStats> = Vec::new();
        for shard in &self.shards {
            let cloned: Vec<WhaleStats> = {
                let guard = shard.lock().unwrap_or_else(|poison| poison.into_inner());
                guard.values().cloned().collect()
            };
            all.extend(cloned);
        }
        all.sort_by(|a, b| a.address.cmp(&b.address));

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create snapshot dir: {}", parent.display()))?;
        }
        let raw = serde_json::to_string_pretty(&all).context("failed to serialize registry")?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, raw)
            .with_context(|| format!("failed to write registry snapshot: {}", tmp.display()))?;
        fs::rename(&tmp, path)
            .with_context(|| format!("failed to replace registry snapshot: {}", path.display()))?;
        debug!(whales = all.len(), path = %path.display(), "whale registry snapshot written");
        Ok(())
    }
}

fn smart_money_score(stats: &WhaleStats) -> f64 {
    let mut score = 0.5;
    if stats.trade_count >= 20 {
        score += 0.2;
    }
    if stats.total_usd >= 1_000_000.0 {
        score += 0.2;
    }
    if stats.tokens.len() >= 10 {
        score += 0.1;
    }
    score
}

#[cfg(test)]
mod tests {
    use super::*;

    fn observe_n(registry: &WhaleRegistry, address: &str, n: u64, usd_each: f64) {
        let now = Utc::now();
        for index in 0..n {
            registry.observe(
                address,
                ClassificationKind::Buy,
                usd_each,
                &format!("TOK{index}"),
                now,
            );
        }
    }

    #[test]
    fn proven_transition_requires_both_thresholds() {
        let registry = WhaleRegistry::new();
        observe_n(&registry, "0xWhale", 4, 100_000.0);
        assert!(!registry.is_proven("0xwhale"), "4 trades is not enough");

        registry.observe("0xWhale", ClassificationKind::Sell, 100_000.0, "WETH", Utc::now());
        assert!(registry.is_proven("0xWHALE"), "5 trades over $250k is proven");

        let poor = WhaleRegistry::new();
        observe_n(&poor, "0xsmall", 10, 1_000.0);
        assert!(!poor.is_proven("0xsmall"), "volume threshold not met");
    }

    #[test]
    fn smart_money_score_matches_scoring_factors() {
        let registry = WhaleRegistry::new();
        observe_n(&registry, "0xabc", 20, 60_000.0);
        let stats = registry.lookup("0xabc").expect("stats");
        // 20 trades (+0.2), $1.2M (+0.2), 10+ tokens (+0.1)
        assert!((stats.smart_money_score - 1.0).abs() < 1e-9);

        let modest = WhaleRegistry::new();
        observe_n(&modest, "0xdef", 3, 10.0);
        let stats = modest.lookup("0xdef").expect("stats");
        assert!((stats.smart_money_score - 0.5).abs() < 1e-9);
    }

    #[test]
    fn confidence_boost_tiers() {
        let registry = WhaleRegistry::new();
        assert_eq!(registry.confidence_boost("0xnobody", Utc::now()), 0.0);

        observe_n(&registry, "0xpair", 2, 100.0);
        assert_eq!(registry.confidence_boost("0xpair", Utc::now()), 0.03);

        observe_n(&registry, "0xactive", 10, 100.0);
        assert_eq!(registry.confidence_boost("0xactive", Utc::now()), 0.08);

        observe_n(&registry, "0xproven", 5, 60_000.0);
        assert_eq!(registry.confidence_boost("0xproven", Utc::now()), 0.15);
    }

    #[test]
    fn stale_active_trader_loses_the_boost() {
        let registry = WhaleRegistry::new();
        let long_ago = Utc::now() - Duration::days(45);
        for _ in 0..12 {
            registry.observe("0xidle", ClassificationKind::Buy, 100.0, "WETH", long_ago);
        }
        assert_eq!(registry.confidence_boost("0xidle", Utc::now()), 0.0);
    }

    #[test]
    fn snapshot_round_trips_through_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("registry.json");

        let registry = WhaleRegistry::new();
        observe_n(&registry, "0xaaa", 6, 50_000.0);
        observe_n(&registry, "0xbbb", 1, 500.0);
        registry.snapshot(&path).expect("snapshot");

        let restored = WhaleRegistry::load(&path).expect("load");
        let stats = restored.lookup("0xaaa").expect("restored stats");
        assert_eq!(stats.trade_count, 6);
        assert!(stats.is_proven);
        assert_eq!(restored.report().tracked_whales, 2);
    }

    #[test]
    fn buy_and_sell_counts_tracked_separately() {
        let registry = WhaleRegistry::new();
        let now = Utc::now();
        registry.observe("0xw", ClassificationKind::Buy, 10.0, "A", now);
        registry.observe("0xw", ClassificationKind::ModerateSell, 10.0, "A", now);
        registry.observe("0xw", ClassificationKind::Transfer, 10.0, "A", now);
        let stats = registry.lookup("0xw").expect("stats");
        assert_eq!(stats.buy_count, 1);
        assert_eq!(stats.sell_count, 1);
        assert_eq!(stats.trade_count, 3);
    }
}
