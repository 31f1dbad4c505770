use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use rusqlite::params;
use whaleflow_core_types::{Chain, WhaleRecord};
use whaleflow_dedup::{DedupEntry, RecentLookback};

use crate::SqliteStore;

/// Slim row used by the offline duplicate-cleanup pass.
#[derive(Debug, Clone)]
pub struct StoredRecordSummary {
    pub chain: Chain,
    pub entry: DedupEntry,
    pub whale_address: Option<String>,
    pub token_symbol: String,
}

impl SqliteStore {
    /// Idempotent write keyed on `(chain, tx_hash)`. A conflicting row
    /// keeps the higher-confidence report; `ingested_at` of the first
    /// report survives.
    pub fn upsert_whale_record(&self, record: &WhaleRecord) -> Result<()> {
        self.execute_with_retry(|conn| {
            conn.execute(
                "INSERT INTO whale_transactions(
                    chain, tx_hash, block_time, whale_address, counterparty_address,
                    counterparty_kind, is_cex_transaction, classification, confidence,
                    token_symbol, usd_value, from_label, to_label, evidence, source_id,
                    ingested_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
                 ON CONFLICT(chain, tx_hash) DO UPDATE SET
                    classification = CASE
                        WHEN excluded.confidence > whale_transactions.confidence
                        THEN excluded.classification ELSE whale_transactions.classification END,
                    evidence = CASE
                        WHEN excluded.confidence > whale_transactions.confidence
                        THEN excluded.evidence ELSE whale_transactions.evidence END,
                    confidence = MAX(excluded.confidence, whale_transactions.confidence)",
                params![
                    record.chain.as_str(),
                    &record.tx_hash,
                    record.block_time.to_rfc3339(),
                    record.whale_address.as_deref(),
                    record.counterparty_address.as_deref(),
                    record.counterparty_kind.as_str(),
                    record.is_cex_transaction as i64,
                    record.classification.as_str(),
                    record.confidence,
                    &record.token_symbol,
                    record.usd_value,
                    record.from_label.as_deref(),
                    record.to_label.as_deref(),
                    record.evidence.join("\n"),
                    &record.source_id,
                    record.ingested_at.to_rfc3339(),
                ],
            )
        })
        .context("failed to upsert whale record")?;
        Ok(())
    }

    /// In-place merge after a near-duplicate match: the surviving row
    /// adopts the incoming report's classification but keeps whichever
    /// block_time is earliest.
    pub fn merge_whale_record(&self, existing_hash: &str, incoming: &WhaleRecord) -> Result<()> {
        let incoming_time = incoming.block_time.to_rfc3339();
        self.execute_with_retry(|conn| {
            conn.execute(
                "UPDATE whale_transactions SET
                    classification = ?1,
                    confidence = ?2,
                    counterparty_address = ?3,
                    counterparty_kind = ?4,
                    is_cex_transaction = ?5,
                    usd_value = ?6,
                    evidence = ?7,
                    block_time = MIN(block_time, ?8)
                 WHERE chain = ?9 AND tx_hash = ?10",
                params![
                    incoming.classification.as_str(),
                    incoming.confidence,
                    incoming.counterparty_address.as_deref(),
                    incoming.counterparty_kind.as_str(),
                    incoming.is_cex_transaction as i64,
                    incoming.usd_value,
                    incoming.evidence.join("\n"),
                    incoming_time,
                    incoming.chain.as_str(),
                    existing_hash,
                ],
            )
        })
        .context("failed to merge whale record")?;
        Ok(())
    }

    pub fn delete_whale_record(&self, chain: Chain, tx_hash: &str) -> Result<bool> {
        let deleted = self
            .execute_with_retry(|conn| {
                conn.execute(
                    "DELETE FROM whale_transactions WHERE chain = ?1 AND tx_hash = ?2",
                    params![chain.as_str(), tx_hash],
                )
            })
            .context("failed to delete whale record")?;
        Ok(deleted > 0)
    }

    pub fn count_whale_records(&self) -> Result<u64> {
        let count: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM whale_transactions", [], |row| row.get(0))
            .context("failed counting whale records")?;
        Ok(count.max(0) as u64)
    }

    pub fn get_record_confidence(&self, chain: Chain, tx_hash: &str) -> Result<Option<f64>> {
        use rusqlite::OptionalExtension;
        self.conn()
            .query_row(
                "SELECT confidence FROM whale_transactions WHERE chain = ?1 AND tx_hash = ?2",
                params![chain.as_str(), tx_hash],
                |row| row.get(0),
            )
            .optional()
            .context("failed reading record confidence")
    }

    /// All stored rows grouped for the cleanup pass: token first, then
    /// block time ascending.
    pub fn list_records_for_cleanup(&self) -> Result<Vec<StoredRecordSummary>> {
        let mut stmt = self
            .conn()
            .prepare(
                "SELECT chain, tx_hash, block_time, usd_value, classification,
                        counterparty_kind, is_cex_transaction, confidence,
                        whale_address, token_symbol
                 FROM whale_transactions
                 ORDER BY token_symbol ASC, block_time ASC",
            )
            .context("failed to prepare cleanup listing")?;
        let mut rows = stmt.query([]).context("failed querying cleanup listing")?;

        let mut summaries = Vec::new();
        while let Some(row) = rows.next().context("failed iterating cleanup listing")? {
            summaries.push(row_to_summary(row)?);
        }
        Ok(summaries)
    }

    fn query_recent_for_key(
        &self,
        whale_address: &str,
        token_symbol: &str,
        around: DateTime<Utc>,
        window_seconds: f64,
        limit: usize,
    ) -> Result<Vec<DedupEntry>> {
        let window = Duration::milliseconds((window_seconds * 1_000.0) as i64);
        let lower = (around - window).to_rfc3339();
        let upper = (around + window).to_rfc3339();
        let mut stmt = self
            .conn()
            .prepare(
                "SELECT chain, tx_hash, block_time, usd_value, classification,
                        counterparty_kind, is_cex_transaction, confidence,
                        whale_address, token_symbol
                 FROM whale_transactions
                 WHERE whale_address = ?1
                   AND token_symbol = ?2
                   AND block_time >= ?3
                   AND block_time <= ?4
                 ORDER BY block_time DESC
                 LIMIT ?5",
            )
            .context("failed to prepare dedup lookback query")?;
        let mut rows = stmt
            .query(params![
                whale_address,
                token_symbol,
                lower,
                upper,
                limit.max(1) as i64
            ])
            .context("failed querying dedup lookback")?;

        let mut entries = Vec::new();
        while let Some(row) = rows.next().context("failed iterating dedup lookback")? {
            entries.push(row_to_summary(row)?.entry);
        }
        Ok(entries)
    }
}

fn row_to_summary(row: &rusqlite::Row<'_>) -> Result<StoredRecordSummary> {
    let chain_raw: String = row.get(0).context("failed reading chain")?;
    let chain: Chain = chain_raw
        .parse()
        .map_err(|error: String| anyhow::anyhow!(error))?;
    let block_time_raw: String = row.get(2).context("failed reading block_time")?;
    let block_time = DateTime::parse_from_rfc3339(&block_time_raw)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("invalid block_time rfc3339 value: {block_time_raw}"))?;
    let classification_raw: String = row.get(4).context("failed reading classification")?;
    let counterparty_raw: String = row.get(5).context("failed reading counterparty_kind")?;
    let is_cex: i64 = row.get(6).context("failed reading is_cex_transaction")?;

    Ok(StoredRecordSummary {
        chain,
        entry: DedupEntry {
            tx_hash: row.get(1).context("failed reading tx_hash")?,
            block_time,
            usd_value: row.get(3).context("failed reading usd_value")?,
            kind: classification_raw
                .parse()
                .map_err(|error: String| anyhow::anyhow!(error))?,
            counterparty_kind: counterparty_raw
                .parse()
                .map_err(|error: String| anyhow::anyhow!(error))?,
            is_cex_transaction: is_cex != 0,
            confidence: row.get(7).context("failed reading confidence")?,
        },
        whale_address: row.get(8).context("failed reading whale_address")?,
        token_symbol: row.get(9).context("failed reading token_symbol")?,
    })
}

impl RecentLookback for SqliteStore {
    fn recent_for_key(
        &self,
        whale_address: &str,
        token_symbol: &str,
        around: DateTime<Utc>,
        window_seconds: f64,
        limit: usize,
    ) -> Result<Vec<DedupEntry>> {
        self.query_recent_for_key(whale_address, token_symbol, around, window_seconds, limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::open_migrated;
    use whaleflow_core_types::{ClassificationKind, LabelKind};

    fn record(hash: &str, confidence: f64, offset_secs: i64) -> WhaleRecord {
        let base = Utc::now();
        WhaleRecord {
            chain: Chain::Ethereum,
            tx_hash: hash.to_string(),
            block_time: base + Duration::seconds(offset_secs),
            whale_address: Some("0xwhale".to_string()),
            counterparty_address: Some("0xcex".to_string()),
            counterparty_kind: LabelKind::Cex,
            is_cex_transaction: true,
            classification: ClassificationKind::Buy,
            confidence,
            token_symbol: "USDC".to_string(),
            usd_value: 100_000.0,
            from_label: Some("binance".to_string()),
            to_label: None,
            evidence: vec!["CEX withdrawal from binance".to_string()],
            source_id: "test".to_string(),
            ingested_at: base,
        }
    }

    #[test]
    fn upsert_is_idempotent_and_keeps_max_confidence() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = open_migrated(&dir);

        store.upsert_whale_record(&record("0xaaa", 0.70, 0)).expect("first");
        store.upsert_whale_record(&record("0xaaa", 0.90, 0)).expect("second");
        store.upsert_whale_record(&record("0xaaa", 0.40, 0)).expect("third");

        assert_eq!(store.count_whale_records().unwrap(), 1);
        assert_eq!(
            store.get_record_confidence(Chain::Ethereum, "0xaaa").unwrap(),
            Some(0.90)
        );
    }

    #[test]
    fn lookback_finds_rows_inside_the_window() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = open_migrated(&dir);

        store.upsert_whale_record(&record("0xa", 0.9, 0)).expect("a");
        store.upsert_whale_record(&record("0xb", 0.8, 3)).expect("b");
        store.upsert_whale_record(&record("0xfar", 0.8, 120)).expect("far");

        let around = record("0xa", 0.9, 0).block_time;
        let entries = store
            .recent_for_key("0xwhale", "USDC", around, 10.0, 200)
            .expect("lookback");
        let hashes: Vec<&str> = entries.iter().map(|entry| entry.tx_hash.as_str()).collect();
        assert!(hashes.contains(&"0xa"));
        assert!(hashes.contains(&"0xb"));
        assert!(!hashes.contains(&"0xfar"));
    }

    #[test]
    fn merge_preserves_earliest_block_time() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = open_migrated(&dir);

        let original = record("0xa", 0.5, 0);
        store.upsert_whale_record(&original).expect("store");

        let mut incoming = record("0xb", 0.95, 5);
        incoming.classification = ClassificationKind::Sell;
        store.merge_whale_record("0xa", &incoming).expect("merge");

        let summaries = store.list_records_for_cleanup().expect("list");
        assert_eq!(summaries.len(), 1);
        let entry = &summaries[0].entry;
        assert_eq!(entry.tx_hash, "0xa");
        assert_eq!(entry.kind, ClassificationKind::Sell);
        assert_eq!(entry.confidence, 0.95);
        // rfc3339 strings compare lexicographically, earliest wins
        assert!(entry.block_time <= original.block_time + Duration::seconds(1));
    }

    #[test]
    fn delete_reports_whether_a_row_was_removed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = open_migrated(&dir);
        store.upsert_whale_record(&record("0xa", 0.5, 0)).expect("store");
        assert!(store.delete_whale_record(Chain::Ethereum, "0xa").unwrap());
        assert!(!store.delete_whale_record(Chain::Ethereum, "0xa").unwrap());
    }
}
