use anyhow::Result;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::time;
use tracing::{error, info, warn};
use whaleflow_core_types::{AuditEvent, ClassificationKind, WhaleRecord};
use whaleflow_ingestion::BoundedQueue;
use whaleflow_registry::WhaleRegistry;
use whaleflow_storage::{is_transient_storage_error, SqliteStore};

use crate::audit::AuditLog;
use crate::stats::PipelineStats;

const RETRY_BASE_MS: u64 = 200;
const RETRY_FACTOR: u64 = 2;
const RETRY_CAP_MS: u64 = 30_000;
const MAX_ATTEMPTS: u32 = 5;

/// Work accepted by the sink pool. Only the sink writes whale records;
/// the dedup shards send merges here instead of touching storage.
#[derive(Debug, Clone)]
pub enum SinkCommand {
    Upsert(WhaleRecord),
    Merge {
        existing_hash: String,
        record: WhaleRecord,
    },
}

pub async fn run_sink_worker(
    worker_id: usize,
    queue: Arc<BoundedQueue<SinkCommand>>,
    mut store: SqliteStore,
    registry: Arc<WhaleRegistry>,
    stats: Arc<PipelineStats>,
    audit: Arc<AuditLog>,
) {
    info!(worker_id, "sink worker started");
    while let Some(command) = queue.pop().await {
        match write_with_retry(&mut store, &command).await {
            Ok(()) => match &command {
                SinkCommand::Upsert(record) => {
                    stats.stored.fetch_add(1, Ordering::Relaxed);
                    note_stored(record, &registry, &stats, &audit);
                }
                SinkCommand::Merge { record, .. } => {
                    stats.merged.fetch_add(1, Ordering::Relaxed);
                    note_stored(record, &registry, &stats, &audit);
                }
            },
            Err(error) => {
                stats.errors.fetch_add(1, Ordering::Relaxed);
                let record = match &command {
                    SinkCommand::Upsert(record) | SinkCommand::Merge { record, .. } => record,
                };
                error!(
                    tx_hash = %record.tx_hash,
                    %error,
                    "sink write failed permanently, dead-lettering"
                );
                if let Err(dlq_error) = store.insert_dead_letter(record, &error.to_string()) {
                    error!(%dlq_error, "dead-letter write failed, record lost");
                }
            }
        }
    }
    info!(worker_id, "sink worker drained");
}

async fn write_with_retry(store: &mut SqliteStore, command: &SinkCommand) -> Result<()> {
    let mut delay_ms = RETRY_BASE_MS;
    for attempt in 1..=MAX_ATTEMPTS {
        let result = match command {
            SinkCommand::Upsert(record) => store.upsert_whale_record(record),
            SinkCommand::Merge {
                existing_hash,
                record,
            } => store.merge_whale_record(existing_hash, record),
        };
        match result {
            Ok(()) => return Ok(()),
            Err(error) if attempt < MAX_ATTEMPTS && is_transient_storage_error(&error) => {
                warn!(attempt, delay_ms, %error, "transient sink failure, retrying");
                time::sleep(Duration::from_millis(delay_ms)).await;
                delay_ms = (delay_ms * RETRY_FACTOR).min(RETRY_CAP_MS);
            }
            Err(error) => return Err(error),
        }
    }
    unreachable!("retry loop returns on success or terminal error");
}

fn note_stored(
    record: &WhaleRecord,
    registry: &Arc<WhaleRegistry>,
    stats: &Arc<PipelineStats>,
    audit: &Arc<AuditLog>,
) {
    match record.classification {
        ClassificationKind::Buy | ClassificationKind::ModerateBuy => {
            stats.note_sentiment(&record.token_symbol, true);
        }
        ClassificationKind::Sell | ClassificationKind::ModerateSell => {
            stats.note_sentiment(&record.token_symbol, false);
        }
        _ => {}
    }
    if let Some(whale) = &record.whale_address {
        registry.observe(
            whale,
            record.classification,
            record.usd_value,
            &record.token_symbol,
            record.block_time,
        );
    }
    if let Err(error) = audit.record_stored(&AuditEvent::for_record(record)) {
        warn!(%error, "audit append failed");
    }
}
