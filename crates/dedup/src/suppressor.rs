use anyhow::Result;
use chrono::DateTime;
use chrono::Utc;
use tracing::{debug, warn};
use whaleflow_config::DedupConfig;
use whaleflow_core_types::{SuppressionEvent, WhaleRecord};

use crate::memory::{DedupEntry, RecentRing};
use crate::predicate::{detect_pattern, is_usd_match};

/// Storage-side lookback: recent records for the same `(whale, token)`
/// key within the window around a timestamp. Each dedup shard queries
/// through its own store handle, so no Sync bound is needed.
pub trait RecentLookback {
    fn recent_for_key(
        &self,
        whale_address: &str,
        token_symbol: &str,
        around: DateTime<Utc>,
        window_seconds: f64,
        limit: usize,
    ) -> Result<Vec<DedupEntry>>;
}

#[derive(Debug, Clone)]
pub enum DedupDecision {
    /// No duplicate: store and remember in the ring.
    Store,
    /// Incoming loses to an existing record.
    Suppress(SuppressionEvent),
    /// Incoming wins: update the existing row in place, keeping its
    /// earlier block_time.
    Merge {
        existing_hash: String,
        event: SuppressionEvent,
    },
}

/// Two-layer near-duplicate detector owned by one dedup shard. Layer 1
/// is the in-memory ring; layer 2 is the storage lookback. A lookback
/// failure degrades to layer 1 only and never blocks ingestion.
pub struct Suppressor {
    config: DedupConfig,
    ring: RecentRing,
}

impl Suppressor {
    pub fn new(config: DedupConfig) -> Self {
        let ring = RecentRing::new(config.memory_ring_size);
        Self { config, ring }
    }

    pub fn check(&self, record: &WhaleRecord, lookback: Option<&dyn RecentLookback>) -> DedupDecision {
        let Some(key) = record.dedup_key() else {
            return DedupDecision::Store;
        };
        if self.is_safeguarded(record.usd_value, record.classification.is_protocol_interaction()) {
            return DedupDecision::Store;
        }

        let incoming = DedupEntry::from_record(record);
        if let Some(decision) = self.scan(&incoming, self.ring.recent(&key)) {
            return decision;
        }

        if let Some(lookback) = lookback {
            match lookback.recent_for_key(
                &key.0,
                &key.1,
                record.block_time,
                self.config.time_window_seconds,
                self.config.lookback_limit,
            ) {
                Ok(stored) => {
                    if let Some(decision) = self.scan(&incoming, stored.iter()) {
                        return decision;
                    }
                }
                Err(error) => {
                    warn!(%error, "dedup lookback failed, memory layer only");
                }
            }
        }

        DedupDecision::Store
    }

    fn scan<'a>(
        &self,
        incoming: &DedupEntry,
        candidates: impl Iterator<Item = &'a DedupEntry>,
    ) -> Option<DedupDecision> {
        for existing in candidates {
            if existing.tx_hash == incoming.tx_hash {
                continue;
            }
            if self.is_safeguarded(existing.usd_value, existing.kind.is_protocol_interaction()) {
                continue;
            }
            let time_diff = (incoming.block_time - existing.block_time)
                .num_milliseconds()
                .abs() as f64
                / 1_000.0;
            if time_diff > self.config.time_window_seconds {
                continue;
            }
            if !is_usd_match(
                incoming.usd_value,
                existing.usd_value,
                self.config.usd_threshold,
                self.config.percentage_threshold,
            ) {
                continue;
            }
            let Some(pattern) = detect_pattern(
                incoming.kind,
                existing.kind,
                incoming.counterparty_kind,
                existing.counterparty_kind,
                incoming.is_cex_transaction,
                existing.is_cex_transaction,
            ) else {
                continue;
            };

            let usd_diff = (incoming.usd_value - existing.usd_value).abs();
            debug!(
                incoming = %incoming.tx_hash,
                existing = %existing.tx_hash,
                pattern = pattern.as_str(),
                time_diff,
                "near-duplicate detected"
            );
            if incoming.confidence > existing.confidence {
                return Some(DedupDecision::Merge {
                    existing_hash: existing.tx_hash.clone(),
                    event: SuppressionEvent {
                        incoming_hash: incoming.tx_hash.clone(),
                        existing_hash: existing.tx_hash.clone(),
                        reason: "higher-confidence report merged over earlier record".to_string(),
                        pattern: pattern.as_str().to_string(),
                        time_diff_secs: time_diff,
                        usd_diff,
                    },
                });
            }
            return Some(DedupDecision::Suppress(SuppressionEvent {
                incoming_hash: incoming.tx_hash.clone(),
                existing_hash: existing.tx_hash.clone(),
                reason: "existing record has equal or higher confidence".to_string(),
                pattern: pattern.as_str().to_string(),
                time_diff_secs: time_diff,
                usd_diff,
            }));
        }
        None
    }

    fn is_safeguarded(&self, usd_value: f64, protocol_interaction: bool) -> bool {
        usd_value > self.config.safeguard_usd || protocol_interaction
    }

    /// Remember a stored record in the memory ring.
    pub fn note_stored(&mut self, record: &WhaleRecord) {
        if let Some(key) = record.dedup_key() {
            self.ring.record(key, DedupEntry::from_record(record));
        }
    }

    /// Reflect an in-place merge in the memory ring: the surviving row
    /// keeps its hash and block_time but adopts the incoming report's
    /// classification and confidence.
    pub fn note_merged(&mut self, existing_hash: &str, incoming: &WhaleRecord) {
        if let Some(key) = incoming.dedup_key() {
            let existing_time = self
                .ring
                .recent(&key)
                .find(|entry| entry.tx_hash == existing_hash)
                .map(|entry| entry.block_time);
            if let Some(block_time) = existing_time {
                let mut updated = DedupEntry::from_record(incoming);
                updated.tx_hash = existing_hash.to_string();
                updated.block_time = block_time.min(incoming.block_time);
                self.ring.replace(&key, updated);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use whaleflow_core_types::{Chain, ClassificationKind, LabelKind};

    fn record(
        hash: &str,
        kind: ClassificationKind,
        usd: f64,
        confidence: f64,
        offset_secs: i64,
    ) -> WhaleRecord {
        let base = Utc::now();
        WhaleRecord {
            chain: Chain::Ethereum,
            tx_hash: hash.to_string(),
            block_time: base + Duration::seconds(offset_secs),
            whale_address: Some("0xwhale".to_string()),
            counterparty_address: Some("0xcex".to_string()),
            counterparty_kind: LabelKind::Cex,
            is_cex_transaction: true,
            classification: kind,
            confidence,
            token_symbol: "USDC".to_string(),
            usd_value: usd,
            from_label: None,
            to_label: None,
            evidence: vec![],
            source_id: "test".to_string(),
            ingested_at: base,
        }
    }

    fn suppressor() -> Suppressor {
        Suppressor::new(DedupConfig::default())
    }

    #[test]
    fn mirror_pair_suppresses_the_lower_confidence_report() {
        let mut suppressor = suppressor();
        let stored = record("0xA", ClassificationKind::Buy, 100_000.0, 0.90, 0);
        suppressor.note_stored(&stored);

        let incoming = record("0xB", ClassificationKind::Sell, 100_000.0, 0.70, 3);
        match suppressor.check(&incoming, None) {
            DedupDecision::Suppress(event) => {
                assert_eq!(event.incoming_hash, "0xB");
                assert_eq!(event.existing_hash, "0xA");
                assert_eq!(event.pattern, "mirror_trade");
                assert!((event.time_diff_secs - 3.0).abs() < 0.1);
            }
            other => panic!("expected suppression, got {other:?}"),
        }
    }

    #[test]
    fn higher_confidence_incoming_merges_over_existing() {
        let mut suppressor = suppressor();
        suppressor.note_stored(&record("0xA", ClassificationKind::Transfer, 50_000.0, 0.40, 0));

        let incoming = record("0xB", ClassificationKind::Sell, 50_001.0, 0.92, 2);
        match suppressor.check(&incoming, None) {
            DedupDecision::Merge { existing_hash, event } => {
                assert_eq!(existing_hash, "0xA");
                assert_eq!(event.pattern, "transfer_shadow");
            }
            other => panic!("expected merge, got {other:?}"),
        }
    }

    #[test]
    fn safeguard_exempts_large_transactions() {
        let mut suppressor = suppressor();
        suppressor.note_stored(&record("0xA", ClassificationKind::Buy, 6_000_000.0, 0.90, 0));
        let incoming = record("0xB", ClassificationKind::Sell, 6_000_000.0, 0.70, 3);
        assert!(matches!(suppressor.check(&incoming, None), DedupDecision::Store));
    }

    #[test]
    fn protocol_interactions_are_never_suppressed() {
        let mut suppressor = suppressor();
        suppressor.note_stored(&record("0xA", ClassificationKind::Buy, 20_000.0, 0.90, 0));
        let incoming = record("0xB", ClassificationKind::Defi, 20_000.0, 0.60, 1);
        assert!(matches!(suppressor.check(&incoming, None), DedupDecision::Store));
    }

    #[test]
    fn outside_window_is_not_a_duplicate() {
        let mut suppressor = suppressor();
        suppressor.note_stored(&record("0xA", ClassificationKind::Buy, 100_000.0, 0.90, 0));
        let incoming = record("0xB", ClassificationKind::Sell, 100_000.0, 0.70, 11);
        assert!(matches!(suppressor.check(&incoming, None), DedupDecision::Store));
    }

    #[test]
    fn usd_gap_outside_tolerance_is_not_a_duplicate() {
        let mut suppressor = suppressor();
        suppressor.note_stored(&record("0xA", ClassificationKind::Buy, 100_000.0, 0.90, 0));
        let incoming = record("0xB", ClassificationKind::Sell, 101_000.0, 0.70, 3);
        assert!(matches!(suppressor.check(&incoming, None), DedupDecision::Store));
    }

    #[test]
    fn lookback_layer_catches_what_memory_misses() {
        struct FixedLookback(Vec<DedupEntry>);
        impl RecentLookback for FixedLookback {
            fn recent_for_key(
                &self,
                _whale: &str,
                _token: &str,
                _around: DateTime<Utc>,
                _window: f64,
                _limit: usize,
            ) -> Result<Vec<DedupEntry>> {
                Ok(self.0.clone())
            }
        }

        let suppressor = suppressor();
        let stored = record("0xA", ClassificationKind::Buy, 100_000.0, 0.90, 0);
        let lookback = FixedLookback(vec![DedupEntry::from_record(&stored)]);
        let incoming = record("0xB", ClassificationKind::Sell, 100_000.0, 0.70, 3);
        assert!(matches!(
            suppressor.check(&incoming, Some(&lookback)),
            DedupDecision::Suppress(_)
        ));
    }

    #[test]
    fn lookback_failure_degrades_to_memory_only() {
        struct FailingLookback;
        impl RecentLookback for FailingLookback {
            fn recent_for_key(
                &self,
                _whale: &str,
                _token: &str,
                _around: DateTime<Utc>,
                _window: f64,
                _limit: usize,
            ) -> Result<Vec<DedupEntry>> {
                Err(anyhow::anyhow!("db unavailable"))
            }
        }

        let suppressor = suppressor();
        let incoming = record("0xB", ClassificationKind::Sell, 100_000.0, 0.70, 3);
        assert!(matches!(
            suppressor.check(&incoming, Some(&FailingLookback)),
            DedupDecision::Store
        ));
    }

    #[test]
    fn records_without_whale_never_dedup() {
        let mut incoming = record("0xB", ClassificationKind::Sell, 100_000.0, 0.70, 0);
        incoming.whale_address = None;
        assert!(matches!(suppressor().check(&incoming, None), DedupDecision::Store));
    }
}
