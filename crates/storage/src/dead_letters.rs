use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::params;
use whaleflow_core_types::WhaleRecord;

use crate::SqliteStore;

#[derive(Debug, Clone)]
pub struct DeadLetterRow {
    pub id: i64,
    pub payload: String,
    pub error: String,
    pub failed_at: DateTime<Utc>,
}

impl SqliteStore {
    /// Terminal sink failure: keep the full payload and the last error
    /// for operator replay.
    pub fn insert_dead_letter(&self, record: &WhaleRecord, error: &str) -> Result<()> {
        let payload =
            serde_json::to_string(record).context("failed to serialize dead-letter payload")?;
        self.execute_with_retry(|conn| {
            conn.execute(
                "INSERT INTO dead_letters(payload, error, failed_at)
                 VALUES (?1, ?2, ?3)",
                params![payload, error, Utc::now().to_rfc3339()],
            )
        })
        .context("failed to insert dead letter")?;
        Ok(())
    }

    pub fn list_dead_letters(&self, limit: u32) -> Result<Vec<DeadLetterRow>> {
        let mut stmt = self
            .conn()
            .prepare(
                "SELECT id, payload, error, failed_at
                 FROM dead_letters
                 ORDER BY id DESC
                 LIMIT ?1",
            )
            .context("failed to prepare dead-letter query")?;
        let mut rows = stmt
            .query(params![limit.max(1) as i64])
            .context("failed querying dead letters")?;

        let mut letters = Vec::new();
        while let Some(row) = rows.next().context("failed iterating dead letters")? {
            let failed_raw: String = row.get(3).context("failed reading failed_at")?;
            letters.push(DeadLetterRow {
                id: row.get(0).context("failed reading dead-letter id")?,
                payload: row.get(1).context("failed reading dead-letter payload")?,
                error: row.get(2).context("failed reading dead-letter error")?,
                failed_at: DateTime::parse_from_rfc3339(&failed_raw)
                    .map(|dt| dt.with_timezone(&Utc))
                    .with_context(|| format!("invalid failed_at: {failed_raw}"))?,
            });
        }
        Ok(letters)
    }

    pub fn count_dead_letters(&self) -> Result<u64> {
        let count: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM dead_letters", [], |row| row.get(0))
            .context("failed counting dead letters")?;
        Ok(count.max(0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::open_migrated;
    use whaleflow_core_types::{Chain, ClassificationKind, LabelKind};

    #[test]
    fn dead_letters_round_trip_with_payload() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = open_migrated(&dir);

        let record = WhaleRecord {
            chain: Chain::Solana,
            tx_hash: "sig-1".to_string(),
            block_time: Utc::now(),
            whale_address: Some("whalepubkey".to_string()),
            counterparty_address: None,
            counterparty_kind: LabelKind::Unknown,
            is_cex_transaction: false,
            classification: ClassificationKind::Transfer,
            confidence: 0.4,
            token_symbol: "SOL".to_string(),
            usd_value: 200_000.0,
            from_label: None,
            to_label: None,
            evidence: vec![],
            source_id: "sol-stream".to_string(),
            ingested_at: Utc::now(),
        };
        store
            .insert_dead_letter(&record, "disk I/O error")
            .expect("insert");

        let letters = store.list_dead_letters(10).expect("list");
        assert_eq!(letters.len(), 1);
        assert_eq!(letters[0].error, "disk I/O error");
        let parsed: WhaleRecord = serde_json::from_str(&letters[0].payload).expect("payload");
        assert_eq!(parsed.tx_hash, "sig-1");
        assert_eq!(store.count_dead_letters().unwrap(), 1);
    }
}
