use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use whaleflow_core_types::{ClassificationKind, LabelKind, WhaleRecord};

/// The slice of a stored record the match predicate needs.
#[derive(Debug, Clone, PartialEq)]
pub struct DedupEntry {
    pub tx_hash: String,
    pub block_time: DateTime<Utc>,
    pub usd_value: f64,
    pub kind: ClassificationKind,
    pub counterparty_kind: LabelKind,
    pub is_cex_transaction: bool,
    pub confidence: f64,
}

impl DedupEntry {
    pub fn from_record(record: &WhaleRecord) -> Self {
        Self {
            tx_hash: record.tx_hash.clone(),
            block_time: record.block_time,
            usd_value: record.usd_value,
            kind: record.classification,
            counterparty_kind: record.counterparty_kind,
            is_cex_transaction: record.is_cex_transaction,
            confidence: record.confidence,
        }
    }
}

/// Layer-1 cache: the last N stored records per `(whale, token)` key.
/// Each dedup shard owns one ring exclusively, so there is no lock; the
/// shard worker is the single writer.
#[derive(Debug)]
pub struct RecentRing {
    rings: HashMap<(String, String), VecDeque<DedupEntry>>,
    ring_size: usize,
}

impl RecentRing {
    pub fn new(ring_size: usize) -> Self {
        Self {
            rings: HashMap::new(),
            ring_size: ring_size.max(1),
        }
    }

    pub fn recent(&self, key: &(String, String)) -> impl Iterator<Item = &DedupEntry> {
        self.rings.get(key).into_iter().flatten()
    }

    pub fn record(&mut self, key: (String, String), entry: DedupEntry) {
        let ring = self.rings.entry(key).or_default();
        if ring.len() >= self.ring_size {
            let _ = ring.pop_front();
        }
        ring.push_back(entry);
    }

    /// Replace the cached entry for `tx_hash` after an in-place merge.
    pub fn replace(&mut self, key: &(String, String), updated: DedupEntry) {
        if let Some(ring) = self.rings.get_mut(key) {
            if let Some(slot) = ring.iter_mut().find(|entry| entry.tx_hash == updated.tx_hash) {
                *slot = updated;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(hash: &str, usd: f64) -> DedupEntry {
        DedupEntry {
            tx_hash: hash.to_string(),
            block_time: Utc::now(),
            usd_value: usd,
            kind: ClassificationKind::Buy,
            counterparty_kind: LabelKind::Cex,
            is_cex_transaction: true,
            confidence: 0.9,
        }
    }

    #[test]
    fn ring_is_bounded_per_key() {
        let mut ring = RecentRing::new(3);
        let key = ("0xwhale".to_string(), "USDC".to_string());
        for index in 0..5 {
            ring.record(key.clone(), entry(&format!("0x{index}"), 100.0));
        }
        let hashes: Vec<&str> = ring.recent(&key).map(|entry| entry.tx_hash.as_str()).collect();
        assert_eq!(hashes, vec!["0x2", "0x3", "0x4"]);
    }

    #[test]
    fn keys_are_isolated() {
        let mut ring = RecentRing::new(3);
        let key_a = ("0xwhale".to_string(), "USDC".to_string());
        let key_b = ("0xwhale".to_string(), "WETH".to_string());
        ring.record(key_a.clone(), entry("0xa", 100.0));
        assert_eq!(ring.recent(&key_b).count(), 0);
        assert_eq!(ring.recent(&key_a).count(), 1);
    }

    #[test]
    fn replace_updates_in_place() {
        let mut ring = RecentRing::new(3);
        let key = ("0xwhale".to_string(), "USDC".to_string());
        ring.record(key.clone(), entry("0xa", 100.0));
        let mut updated = entry("0xa", 100.0);
        updated.confidence = 0.95;
        ring.replace(&key, updated);
        assert_eq!(ring.recent(&key).next().unwrap().confidence, 0.95);
    }
}
