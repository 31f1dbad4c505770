use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Per-stage pipeline counters plus per-token sentiment tallies. One
/// instance is shared across every worker; the heartbeat loop snapshots
/// it to disk for the `stats` command.
#[derive(Debug, Default)]
pub struct PipelineStats {
    pub received: AtomicU64,
    pub enriched: AtomicU64,
    pub classified: AtomicU64,
    pub stored: AtomicU64,
    pub merged: AtomicU64,
    pub suppressed: AtomicU64,
    pub dropped: AtomicU64,
    pub errors: AtomicU64,
    sentiment: Mutex<BTreeMap<String, TokenSentiment>>,
    circuits: Mutex<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenSentiment {
    pub buys: u64,
    pub sells: u64,
}

impl TokenSentiment {
    pub fn buy_pct(&self) -> Option<f64> {
        let total = self.buys + self.sells;
        if total == 0 {
            return None;
        }
        Some(self.buys as f64 / total as f64)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub taken_at: DateTime<Utc>,
    pub received: u64,
    pub enriched: u64,
    pub classified: u64,
    pub stored: u64,
    pub merged: u64,
    pub suppressed: u64,
    pub dropped: u64,
    pub errors: u64,
    pub sentiment: BTreeMap<String, TokenSentiment>,
    pub circuits: BTreeMap<String, String>,
}

impl PipelineStats {
    pub fn note_sentiment(&self, token_symbol: &str, is_buy: bool) {
        let mut guard = self
            .sentiment
            .lock()
            .unwrap_or_else(|poison| poison.into_inner());
        let entry = guard.entry(token_symbol.to_ascii_uppercase()).or_default();
        if is_buy {
            entry.buys += 1;
        } else {
            entry.sells += 1;
        }
    }

    pub fn set_circuit_state(&self, source_id: &str, state: &str) {
        let mut guard = self
            .circuits
            .lock()
            .unwrap_or_else(|poison| poison.into_inner());
        guard.insert(source_id.to_string(), state.to_string());
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            taken_at: Utc::now(),
            received: self.received.load(Ordering::Relaxed),
            enriched: self.enriched.load(Ordering::Relaxed),
            classified: self.classified.load(Ordering::Relaxed),
            stored: self.stored.load(Ordering::Relaxed),
            merged: self.merged.load(Ordering::Relaxed),
            suppressed: self.suppressed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            sentiment: self
                .sentiment
                .lock()
                .unwrap_or_else(|poison| poison.into_inner())
                .clone(),
            circuits: self
                .circuits
                .lock()
                .unwrap_or_else(|poison| poison.into_inner())
                .clone(),
        }
    }

    pub fn write_snapshot(&self, path: &Path) -> Result<()> {
        let snapshot = self.snapshot();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create stats dir: {}", parent.display()))?;
        }
        let raw =
            serde_json::to_string_pretty(&snapshot).context("failed to serialize stats snapshot")?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, raw)
            .with_context(|| format!("failed to write stats snapshot: {}", tmp.display()))?;
        fs::rename(&tmp, path)
            .with_context(|| format!("failed to replace stats snapshot: {}", path.display()))?;
        Ok(())
    }
}

pub fn read_snapshot(path: &Path) -> Result<StatsSnapshot> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read stats snapshot: {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse stats snapshot: {}", path.display()))
}

pub fn render_snapshot(snapshot: &StatsSnapshot) -> String {
    let mut out = String::new();
    out.push_str(&format!("pipeline stats as of {}\n", snapshot.taken_at.to_rfc3339()));
    out.push_str(&format!(
        "  received={} enriched={} classified={} stored={} merged={} suppressed={} dropped={} errors={}\n",
        snapshot.received,
        snapshot.enriched,
        snapshot.classified,
        snapshot.stored,
        snapshot.merged,
        snapshot.suppressed,
        snapshot.dropped,
        snapshot.errors,
    ));
    if !snapshot.circuits.is_empty() {
        out.push_str("  sources:\n");
        for (source_id, state) in &snapshot.circuits {
            out.push_str(&format!("    {source_id}: {state}\n"));
        }
    }
    if !snapshot.sentiment.is_empty() {
        out.push_str("  sentiment:\n");
        for (token, tally) in &snapshot.sentiment {
            match tally.buy_pct() {
                Some(pct) => out.push_str(&format!(
                    "    {token}: buys={} sells={} buy_pct={:.1}%\n",
                    tally.buys,
                    tally.sells,
                    pct * 100.0
                )),
                None => out.push_str(&format!("    {token}: no classified trades\n")),
            }
        }
    }
    out
}
