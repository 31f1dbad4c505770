use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

use crate::{Chain, ClassificationKind, LabelKind};

/// The stored result of the pipeline: one row per economic event, keyed
/// on `(chain, tx_hash)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhaleRecord {
    pub chain: Chain,
    pub tx_hash: String,
    pub block_time: DateTime<Utc>,
    pub whale_address: Option<String>,
    pub counterparty_address: Option<String>,
    pub counterparty_kind: LabelKind,
    pub is_cex_transaction: bool,
    pub classification: ClassificationKind,
    pub confidence: f64,
    pub token_symbol: String,
    pub usd_value: f64,
    pub from_label: Option<String>,
    pub to_label: Option<String>,
    pub evidence: Vec<String>,
    pub source_id: String,
    pub ingested_at: DateTime<Utc>,
}

impl WhaleRecord {
    /// Dedup key; records without a whale address never dedup against
    /// each other.
    pub fn dedup_key(&self) -> Option<(String, String)> {
        self.whale_address
            .as_ref()
            .map(|whale| (whale.clone(), self.token_symbol.to_ascii_uppercase()))
    }
}

/// Per-wallet cumulative stats maintained by the whale registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhaleStats {
    pub address: String,
    pub trade_count: u64,
    pub buy_count: u64,
    pub sell_count: u64,
    pub total_usd: f64,
    pub tokens: BTreeSet<String>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub smart_money_score: f64,
    pub is_proven: bool,
}

impl WhaleStats {
    pub fn new(address: &str, now: DateTime<Utc>) -> Self {
        Self {
            address: address.to_ascii_lowercase(),
            trade_count: 0,
            buy_count: 0,
            sell_count: 0,
            total_usd: 0.0,
            tokens: BTreeSet::new(),
            first_seen: now,
            last_seen: now,
            smart_money_score: 0.5,
            is_proven: false,
        }
    }
}

/// Structured event emitted whenever the suppressor drops or merges a
/// near-duplicate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuppressionEvent {
    pub incoming_hash: String,
    pub existing_hash: String,
    pub reason: String,
    pub pattern: String,
    pub time_diff_secs: f64,
    pub usd_diff: f64,
}

/// Line-delimited JSON audit record emitted by the sink after each
/// successful upsert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_id: Uuid,
    pub chain: Chain,
    pub tx_hash: String,
    pub classification: ClassificationKind,
    pub confidence: f64,
    pub token_symbol: String,
    pub usd_value: f64,
    pub whale_address: Option<String>,
    pub stored_at: DateTime<Utc>,
}

impl AuditEvent {
    pub fn for_record(record: &WhaleRecord) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            chain: record.chain,
            tx_hash: record.tx_hash.clone(),
            classification: record.classification,
            confidence: record.confidence,
            token_symbol: record.token_symbol.clone(),
            usd_value: record.usd_value,
            whale_address: record.whale_address.clone(),
            stored_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(whale: Option<&str>, symbol: &str) -> WhaleRecord {
        WhaleRecord {
            chain: Chain::Ethereum,
            tx_hash: "0xaaa".to_string(),
            block_time: Utc::now(),
            whale_address: whale.map(str::to_string),
            counterparty_address: None,
            counterparty_kind: LabelKind::Cex,
            is_cex_transaction: true,
            classification: ClassificationKind::Buy,
            confidence: 0.9,
            token_symbol: symbol.to_string(),
            usd_value: 50_000.0,
            from_label: None,
            to_label: None,
            evidence: vec![],
            source_id: "test".to_string(),
            ingested_at: Utc::now(),
        }
    }

    #[test]
    fn dedup_key_uppercases_symbol() {
        let key = record(Some("0xwhale"), "usdc").dedup_key().unwrap();
        assert_eq!(key, ("0xwhale".to_string(), "USDC".to_string()));
    }

    #[test]
    fn dedup_key_absent_without_whale() {
        assert!(record(None, "USDC").dedup_key().is_none());
    }
}
