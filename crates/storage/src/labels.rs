use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use whaleflow_core_types::{AddressLabel, Chain, LabelKind};
use whaleflow_enrichment::LabelStore;

use crate::SqliteStore;

impl SqliteStore {
    fn query_label(&self, address: &str, chain: Chain) -> Result<Option<AddressLabel>> {
        let row: Option<(String, Option<String>, f64, String)> = self
            .conn()
            .query_row(
                "SELECT kind, entity_name, confidence, updated_at
                 FROM address_labels
                 WHERE address = ?1 AND chain = ?2",
                params![address.to_ascii_lowercase(), chain.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .optional()
            .context("failed querying address label")?;

        row.map(|(kind_raw, entity_name, confidence, updated_raw)| {
            let kind: LabelKind = kind_raw
                .parse()
                .map_err(|error: String| anyhow::anyhow!(error))?;
            let updated_at = DateTime::parse_from_rfc3339(&updated_raw)
                .map(|dt| dt.with_timezone(&Utc))
                .with_context(|| format!("invalid label updated_at: {updated_raw}"))?;
            Ok(AddressLabel {
                address: address.to_ascii_lowercase(),
                chain,
                kind,
                entity_name,
                confidence,
                updated_at,
            })
        })
        .transpose()
    }

    fn write_label(&self, label: &AddressLabel) -> Result<()> {
        self.execute_with_retry(|conn| {
            conn.execute(
                "INSERT INTO address_labels(address, chain, kind, entity_name, confidence, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(address, chain) DO UPDATE SET
                    kind = CASE
                        WHEN excluded.confidence >= address_labels.confidence
                        THEN excluded.kind ELSE address_labels.kind END,
                    entity_name = CASE
                        WHEN excluded.confidence >= address_labels.confidence
                        THEN excluded.entity_name ELSE address_labels.entity_name END,
                    updated_at = CASE
                        WHEN excluded.confidence >= address_labels.confidence
                        THEN excluded.updated_at ELSE address_labels.updated_at END,
                    confidence = MAX(excluded.confidence, address_labels.confidence)",
                params![
                    label.address.to_ascii_lowercase(),
                    label.chain.as_str(),
                    label.kind.as_str(),
                    label.entity_name.as_deref(),
                    label.confidence,
                    label.updated_at.to_rfc3339(),
                ],
            )
        })
        .context("failed to upsert address label")?;
        Ok(())
    }
}

/// `LabelStore` adapter shared across enrichment workers. The sqlite
/// connection is Send but not Sync, so reads and writes serialize
/// through one mutex; label lookups are point queries and cheap.
pub struct SharedLabelStore {
    inner: std::sync::Mutex<SqliteStore>,
}

impl SharedLabelStore {
    pub fn new(store: SqliteStore) -> Self {
        Self {
            inner: std::sync::Mutex::new(store),
        }
    }
}

impl LabelStore for SharedLabelStore {
    fn get_label(&self, address: &str, chain: Chain) -> Result<Option<AddressLabel>> {
        let guard = self.inner.lock().unwrap_or_else(|poison| poison.into_inner());
        guard.query_label(address, chain)
    }

    fn upsert_label(&self, label: &AddressLabel) -> Result<()> {
        let guard = self.inner.lock().unwrap_or_else(|poison| poison.into_inner());
        guard.write_label(label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::open_migrated;

    fn label(kind: LabelKind, confidence: f64) -> AddressLabel {
        AddressLabel {
            address: "0xAABB".to_string(),
            chain: Chain::Ethereum,
            kind,
            entity_name: Some("binance".to_string()),
            confidence,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn label_round_trips_lowercased() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SharedLabelStore::new(open_migrated(&dir));
        store.upsert_label(&label(LabelKind::Cex, 0.95)).expect("write");

        let loaded = store
            .get_label("0xaabb", Chain::Ethereum)
            .expect("read")
            .expect("present");
        assert_eq!(loaded.kind, LabelKind::Cex);
        assert_eq!(loaded.entity_name.as_deref(), Some("binance"));
        assert!(store.get_label("0xaabb", Chain::Polygon).expect("read").is_none());
    }

    #[test]
    fn lower_confidence_write_does_not_clobber() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SharedLabelStore::new(open_migrated(&dir));
        store.upsert_label(&label(LabelKind::Cex, 0.95)).expect("strong");
        store.upsert_label(&label(LabelKind::Dex, 0.60)).expect("weak");

        let loaded = store
            .get_label("0xaabb", Chain::Ethereum)
            .expect("read")
            .expect("present");
        assert_eq!(loaded.kind, LabelKind::Cex, "weaker label must not win");
        assert_eq!(loaded.confidence, 0.95);
    }
}
