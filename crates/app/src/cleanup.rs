use anyhow::Result;
use std::collections::BTreeMap;
use tracing::info;
use whaleflow_config::DedupConfig;
use whaleflow_dedup::{detect_pattern, is_usd_match};
use whaleflow_storage::{SqliteStore, StoredRecordSummary};

#[derive(Debug, Default)]
pub struct CleanupReport {
    pub scanned: usize,
    pub duplicates_found: usize,
    pub deleted: usize,
    pub by_pattern: BTreeMap<String, usize>,
}

/// Offline sweep over already-stored rows, applying the same match
/// predicate the live suppressor uses. Grouping is per token so mirror
/// pairs reported under different whale addresses are still caught.
/// Keeps the higher-confidence row of each pair.
pub fn cleanup_duplicates(
    store: &SqliteStore,
    config: &DedupConfig,
    live: bool,
) -> Result<CleanupReport> {
    let mut report = CleanupReport::default();
    let records = store.list_records_for_cleanup()?;
    report.scanned = records.len();

    let mut groups: BTreeMap<String, Vec<StoredRecordSummary>> = BTreeMap::new();
    for record in records {
        groups
            .entry(record.token_symbol.to_ascii_uppercase())
            .or_default()
            .push(record);
    }

    let mut deletions: Vec<(StoredRecordSummary, &'static str, String)> = Vec::new();
    for summaries in groups.values() {
        collect_group_duplicates(summaries, config, &mut deletions);
    }

    for (victim, pattern, kept_hash) in deletions {
        report.duplicates_found += 1;
        *report.by_pattern.entry(pattern.to_string()).or_default() += 1;
        info!(
            delete = %victim.entry.tx_hash,
            keep = %kept_hash,
            pattern,
            usd = victim.entry.usd_value,
            live,
            "near-duplicate found"
        );
        if live && store.delete_whale_record(victim.chain, &victim.entry.tx_hash)? {
            report.deleted += 1;
        }
    }
    Ok(report)
}

fn collect_group_duplicates(
    summaries: &[StoredRecordSummary],
    config: &DedupConfig,
    deletions: &mut Vec<(StoredRecordSummary, &'static str, String)>,
) {
    let mut removed = vec![false; summaries.len()];
    for i in 0..summaries.len() {
        if removed[i] {
            continue;
        }
        let current = &summaries[i];
        if is_exempt(current, config) {
            continue;
        }
        for j in (i + 1)..summaries.len() {
            if removed[j] {
                continue;
            }
            let next = &summaries[j];
            let time_diff = (next.entry.block_time - current.entry.block_time)
                .num_milliseconds() as f64
                / 1_000.0;
            if time_diff > config.time_window_seconds {
                break;
            }
            if is_exempt(next, config) {
                continue;
            }
            if !is_usd_match(
                current.entry.usd_value,
                next.entry.usd_value,
                config.usd_threshold,
                config.percentage_threshold,
            ) {
                continue;
            }
            let Some(pattern) = detect_pattern(
                current.entry.kind,
                next.entry.kind,
                current.entry.counterparty_kind,
                next.entry.counterparty_kind,
                current.entry.is_cex_transaction,
                next.entry.is_cex_transaction,
            ) else {
                continue;
            };

            if next.entry.confidence > current.entry.confidence {
                deletions.push((current.clone(), pattern.as_str(), next.entry.tx_hash.clone()));
                removed[i] = true;
                break;
            }
            deletions.push((next.clone(), pattern.as_str(), current.entry.tx_hash.clone()));
            removed[j] = true;
        }
    }
}

fn is_exempt(summary: &StoredRecordSummary, config: &DedupConfig) -> bool {
    summary.entry.usd_value > config.safeguard_usd
        || summary.entry.kind.is_protocol_interaction()
}

pub fn render_report(report: &CleanupReport, live: bool) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "scanned {} records, found {} near-duplicates\n",
        report.scanned, report.duplicates_found
    ));
    for (pattern, count) in &report.by_pattern {
        out.push_str(&format!("  {pattern}: {count}\n"));
    }
    if live {
        out.push_str(&format!("deleted {} records\n", report.deleted));
    } else {
        out.push_str("dry run: no changes made (pass --live to delete)\n");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use std::path::Path;
    use whaleflow_core_types::{Chain, ClassificationKind, LabelKind, WhaleRecord};

    fn open_store(dir: &tempfile::TempDir) -> SqliteStore {
        let migrations = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../migrations");
        let mut store = SqliteStore::open(&dir.path().join("cleanup.db")).expect("open");
        store.run_migrations(&migrations).expect("migrate");
        store
    }

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

    #[test]
    fn dry_run_reports_without_deleting() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = open_store(&dir);
        store
            .upsert_whale_record(&record("0xa", ClassificationKind::Buy, 100_000.0, 0.9, 0))
            .expect("a");
        store
            .upsert_whale_record(&record("0xb", ClassificationKind::Sell, 100_000.0, 0.7, 3))
            .expect("b");

        let report = cleanup_duplicates(&store, &DedupConfig::default(), false).expect("dry run");
        assert_eq!(report.duplicates_found, 1);
        assert_eq!(report.deleted, 0);
        assert_eq!(store.count_whale_records().unwrap(), 2);
        assert_eq!(report.by_pattern.get("mirror_trade"), Some(&1));
    }

    #[test]
    fn live_run_deletes_the_lower_confidence_row() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = open_store(&dir);
        store
            .upsert_whale_record(&record("0xa", ClassificationKind::Buy, 100_000.0, 0.9, 0))
            .expect("a");
        store
            .upsert_whale_record(&record("0xb", ClassificationKind::Sell, 100_000.0, 0.7, 3))
            .expect("b");

        let report = cleanup_duplicates(&store, &DedupConfig::default(), true).expect("live");
        assert_eq!(report.deleted, 1);
        assert_eq!(store.count_whale_records().unwrap(), 1);
        assert_eq!(
            store.get_record_confidence(Chain::Ethereum, "0xa").unwrap(),
            Some(0.9),
            "the higher-confidence row survives"
        );
    }

    #[test]
    fn safeguarded_rows_are_untouched() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = open_store(&dir);
        store
            .upsert_whale_record(&record("0xa", ClassificationKind::Buy, 6_000_000.0, 0.9, 0))
            .expect("a");
        store
            .upsert_whale_record(&record("0xb", ClassificationKind::Sell, 6_000_000.0, 0.7, 3))
            .expect("b");

        let report = cleanup_duplicates(&store, &DedupConfig::default(), true).expect("live");
        assert_eq!(report.duplicates_found, 0);
        assert_eq!(store.count_whale_records().unwrap(), 2);
    }
}
