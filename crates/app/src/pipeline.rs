use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::{self, MissedTickBehavior};
use tracing::{info, warn};
use whaleflow_classifier::{
    perspectivize, ClassificationEngine, EngineOutcome, PerspectiveAction,
};
use whaleflow_config::{AppConfig, DEDUP_SHARDS};
use whaleflow_core_types::{EnrichedTransfer, RawTransfer, WhaleRecord};
use whaleflow_dedup::{DedupDecision, Suppressor};
use whaleflow_enrichment::EnrichmentService;
use whaleflow_ingestion::{BoundedQueue, QueueOverflowPolicy, TransferSource};
use whaleflow_registry::WhaleRegistry;
use whaleflow_storage::SqliteStore;

use crate::audit::AuditLog;
use crate::sink::{run_sink_worker, SinkCommand};
use crate::stats::PipelineStats;
use crate::supervisor::supervise_source;

/// How long a shard worker holds events to restore block-time order for
/// interleaved sources.
const REORDER_HOLD: Duration = Duration::from_millis(750);
const REORDER_TICK: Duration = Duration::from_millis(250);
const REORDER_MAX_BUFFER: usize = 256;

/// Buffer restoring per-shard block-time order. Events are released once
/// they have aged past the hold window; an over-full buffer flushes
/// early rather than blocking the shard.
pub struct ReorderHold {
    entries: Vec<(Instant, WhaleRecord)>,
    hold: Duration,
    max_buffer: usize,
}

impl ReorderHold {
    pub fn new(hold: Duration, max_buffer: usize) -> Self {
        Self {
            entries: Vec::new(),
            hold,
            max_buffer: max_buffer.max(1),
        }
    }

    pub fn push(&mut self, record: WhaleRecord) {
        self.entries.push((Instant::now(), record));
    }

    pub fn release_due(&mut self, now: Instant) -> Vec<WhaleRecord> {
        let over_capacity = self.entries.len() > self.max_buffer;
        let mut due: Vec<WhaleRecord> = Vec::new();
        let mut kept: Vec<(Instant, WhaleRecord)> = Vec::new();
        for (arrived, record) in self.entries.drain(..) {
            if over_capacity || now.duration_since(arrived) >= self.hold {
                due.push(record);
            } else {
                kept.push((arrived, record));
            }
        }
        self.entries = kept;
        due.sort_by_key(|record| record.block_time);
        due
    }

    pub fn drain_all(&mut self) -> Vec<WhaleRecord> {
        let mut rest: Vec<WhaleRecord> =
            self.entries.drain(..).map(|(_, record)| record).collect();
        rest.sort_by_key(|record| record.block_time);
        rest
    }
}

pub fn shard_for_whale(whale_address: &str) -> usize {
    let digest = Sha256::digest(whale_address.to_ascii_lowercase().as_bytes());
    let index = u64::from_be_bytes(digest[..8].try_into().expect("8 digest bytes"));
    (index % DEDUP_SHARDS as u64) as usize
}

pub struct PipelineDeps {
    pub sources: Vec<Arc<dyn TransferSource>>,
    pub enrichment: Arc<EnrichmentService>,
    pub engine: Arc<ClassificationEngine>,
    pub registry: Arc<WhaleRegistry>,
    pub audit: Arc<AuditLog>,
    pub stats: Arc<PipelineStats>,
    pub fanin: Arc<BoundedQueue<RawTransfer>>,
    pub source_contexts: Vec<whaleflow_ingestion::SourceContext>,
}

/// Stand up every stage, supervise the sources, and run until shutdown.
/// Stage queues close in order once the stage above has fully drained,
/// bounded by the configured drain timeout.
pub async fn run_pipeline(
    config: &AppConfig,
    deps: PipelineDeps,
    shutdown_tx: watch::Sender<bool>,
) -> Result<()> {
    let sqlite_path = PathBuf::from(&config.sqlite.path);
    let enriched: Arc<BoundedQueue<EnrichedTransfer>> =
        Arc::new(BoundedQueue::new(config.ingestion.enriched_queue_capacity));
    let shard_queues: Vec<Arc<BoundedQueue<WhaleRecord>>> = (0..DEDUP_SHARDS)
        .map(|_| Arc::new(BoundedQueue::new(config.ingestion.classified_queue_capacity)))
        .collect();
    let stored: Arc<BoundedQueue<SinkCommand>> =
        Arc::new(BoundedQueue::new(config.ingestion.stored_queue_capacity));

    let mut source_tasks = JoinSet::new();
    for (source, ctx) in deps.sources.iter().zip(deps.source_contexts.into_iter()) {
        source_tasks.spawn(supervise_source(
            source.clone(),
            ctx,
            config.supervisor.clone(),
            deps.stats.clone(),
            shutdown_tx.subscribe(),
        ));
    }

    let mut enrichment_tasks = JoinSet::new();
    for _ in 0..config.ingestion.enrichment_workers.clamp(2, 8) {
        let fanin = deps.fanin.clone();
        let enriched = enriched.clone();
        let service = deps.enrichment.clone();
        let stats = deps.stats.clone();
        enrichment_tasks.spawn(async move {
            while let Some(raw) = fanin.pop().await {
                stats.received.fetch_add(1, Ordering::Relaxed);
                let event = service.enrich(raw).await;
                stats.enriched.fetch_add(1, Ordering::Relaxed);
                if enriched.push(event, QueueOverflowPolicy::Block).await.is_none() {
                    break;
                }
            }
        });
    }

    let mut classification_tasks = JoinSet::new();
    for _ in 0..config.ingestion.classification_workers.clamp(4, 16) {
        let enriched = enriched.clone();
        let shard_queues = shard_queues.clone();
        let engine = deps.engine.clone();
        let stats = deps.stats.clone();
        classification_tasks.spawn(async move {
            while let Some(event) = enriched.pop().await {
                let outcome = engine.classify(&event).await;
                stats.classified.fetch_add(1, Ordering::Relaxed);
                let classification = match outcome {
                    EngineOutcome::Classified(classification) => classification,
                    EngineOutcome::Skip { reason } => {
                        stats.dropped.fetch_add(1, Ordering::Relaxed);
                        tracing::debug!(tx_hash = %event.raw.tx_hash, reason, "event dropped");
                        continue;
                    }
                };
                let view = match perspectivize(&event, &classification) {
                    PerspectiveAction::Store(view) => view,
                    PerspectiveAction::Drop { reason } => {
                        stats.dropped.fetch_add(1, Ordering::Relaxed);
                        tracing::debug!(tx_hash = %event.raw.tx_hash, reason, "event dropped");
                        continue;
                    }
                };

                let record = WhaleRecord {
                    chain: event.raw.chain,
                    tx_hash: event.raw.tx_hash.clone(),
                    block_time: event.raw.block_time,
                    whale_address: view.whale_address.clone(),
                    counterparty_address: view.counterparty_address,
                    counterparty_kind: view.counterparty_kind,
                    is_cex_transaction: view.is_cex_transaction,
                    classification: classification.kind,
                    confidence: classification.confidence,
                    token_symbol: event.symbol().to_string(),
                    usd_value: event.usd_value,
                    from_label: event
                        .from_label
                        .as_ref()
                        .and_then(|label| label.entity_name.clone()),
                    to_label: event
                        .to_label
                        .as_ref()
                        .and_then(|label| label.entity_name.clone()),
                    evidence: classification.evidence,
                    source_id: event.raw.source_id.clone(),
                    ingested_at: chrono::Utc::now(),
                };
                let shard = record
                    .whale_address
                    .as_deref()
                    .map(shard_for_whale)
                    .unwrap_or(0);
                if shard_queues[shard]
                    .push(record, QueueOverflowPolicy::Block)
                    .await
                    .is_none()
                {
                    break;
                }
            }
        });
    }

    let mut shard_tasks = JoinSet::new();
    for shard_queue in shard_queues.iter().cloned() {
        let stored = stored.clone();
        let stats = deps.stats.clone();
        let audit = deps.audit.clone();
        let dedup_config = config.dedup.clone();
        let sqlite_path = sqlite_path.clone();
        shard_tasks.spawn(async move {
            let lookback = match SqliteStore::open(&sqlite_path) {
                Ok(store) => Some(store),
                Err(error) => {
                    warn!(%error, "dedup shard running without storage lookback");
                    None
                }
            };
            let mut suppressor = Suppressor::new(dedup_config);
            let mut hold = ReorderHold::new(REORDER_HOLD, REORDER_MAX_BUFFER);
            let mut tick = time::interval(REORDER_TICK);
            tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    item = shard_queue.pop() => match item {
                        Some(record) => hold.push(record),
                        None => break,
                    },
                    _ = tick.tick() => {}
                }
                for record in hold.release_due(Instant::now()) {
                    // the decision is made synchronously so no borrow of
                    // the (non-Sync) store crosses the queue await
                    let command = decide(&mut suppressor, lookback.as_ref(), record, &stats, &audit);
                    if let Some(command) = command {
                        let _ = stored.push(command, QueueOverflowPolicy::Block).await;
                    }
                }
            }
            for record in hold.drain_all() {
                let command = decide(&mut suppressor, lookback.as_ref(), record, &stats, &audit);
                if let Some(command) = command {
                    let _ = stored.push(command, QueueOverflowPolicy::Block).await;
                }
            }
        });
    }

    let mut sink_tasks = JoinSet::new();
    for worker_id in 0..config.ingestion.sink_workers.clamp(2, 4) {
        let store = SqliteStore::open(&sqlite_path)
            .with_context(|| format!("failed opening sink store {}", sqlite_path.display()))?;
        sink_tasks.spawn(run_sink_worker(
            worker_id,
            stored.clone(),
            store,
            deps.registry.clone(),
            deps.stats.clone(),
            deps.audit.clone(),
        ));
    }

    // Housekeeping: stats snapshots, registry snapshots, stop-file poll.
    let mut heartbeat = time::interval(Duration::from_secs(config.system.heartbeat_seconds.max(1)));
    let mut registry_tick =
        time::interval(Duration::from_secs(config.registry.snapshot_seconds.max(1)));
    let mut stop_poll = time::interval(Duration::from_secs(2));
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Skip);
    registry_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let stats_path = PathBuf::from(&config.supervisor.stats_snapshot_path);
    let registry_path = PathBuf::from(&config.registry.snapshot_path);
    let stop_path = PathBuf::from(&config.supervisor.stop_file_path);
    let mut shutdown_rx = shutdown_tx.subscribe();

    loop {
        tokio::select! {
            _ = heartbeat.tick() => {
                if let Err(error) = deps.stats.write_snapshot(&stats_path) {
                    warn!(%error, "stats snapshot failed");
                }
                let registry_report = deps.registry.report();
                info!(
                    tracked_whales = registry_report.tracked_whales,
                    proven_whales = registry_report.proven_whales,
                    fanin_depth = deps.fanin.depth(),
                    enriched_depth = enriched.depth(),
                    stored_depth = stored.depth(),
                    "pipeline heartbeat"
                );
            }
            _ = registry_tick.tick() => {
                if let Err(error) = deps.registry.snapshot(&registry_path) {
                    warn!(%error, "registry snapshot failed");
                }
            }
            _ = stop_poll.tick() => {
                if stop_path.exists() {
                    info!(stop_file = %stop_path.display(), "stop file detected");
                    let _ = std::fs::remove_file(&stop_path);
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received");
                break;
            }
            _ = shutdown_rx.changed() => break,
        }
    }

    // Drain: sources stop accepting, each queue closes once the stage
    // above has fully drained into it.
    let _ = shutdown_tx.send(true);
    let drain_deadline = Duration::from_secs(config.supervisor.drain_timeout_seconds.max(1));
    let drained = time::timeout(drain_deadline, async {
        while source_tasks.join_next().await.is_some() {}
        deps.fanin.close().await;
        while enrichment_tasks.join_next().await.is_some() {}
        enriched.close().await;
        while classification_tasks.join_next().await.is_some() {}
        for shard_queue in &shard_queues {
            shard_queue.close().await;
        }
        while shard_tasks.join_next().await.is_some() {}
        stored.close().await;
        while sink_tasks.join_next().await.is_some() {}
    })
    .await;
    if drained.is_err() {
        warn!(
            timeout_secs = config.supervisor.drain_timeout_seconds,
            "drain timeout exceeded, abandoning in-flight events"
        );
    }

    deps.registry
        .snapshot(&registry_path)
        .context("final registry snapshot failed")?;
    deps.stats
        .write_snapshot(&stats_path)
        .context("final stats snapshot failed")?;
    info!("pipeline stopped");
    Ok(())
}

fn decide(
    suppressor: &mut Suppressor,
    lookback: Option<&SqliteStore>,
    record: WhaleRecord,
    stats: &Arc<PipelineStats>,
    audit: &Arc<AuditLog>,
) -> Option<SinkCommand> {
    let lookback_dyn = lookback.map(|store| store as &dyn whaleflow_dedup::RecentLookback);
    match suppressor.check(&record, lookback_dyn) {
        DedupDecision::Store => {
            suppressor.note_stored(&record);
            Some(SinkCommand::Upsert(record))
        }
        DedupDecision::Suppress(event) => {
            stats.suppressed.fetch_add(1, Ordering::Relaxed);
            info!(
                incoming = %event.incoming_hash,
                existing = %event.existing_hash,
                pattern = %event.pattern,
                time_diff = event.time_diff_secs,
                usd_diff = event.usd_diff,
                "near-duplicate suppressed"
            );
            if let Err(error) = audit.record_suppressed(&event) {
                warn!(%error, "audit append failed");
            }
            None
        }
        DedupDecision::Merge {
            existing_hash,
            event,
        } => {
            suppressor.note_merged(&existing_hash, &record);
            info!(
                incoming = %event.incoming_hash,
                existing = %event.existing_hash,
                pattern = %event.pattern,
                "near-duplicate merged in place"
            );
            if let Err(error) = audit.record_suppressed(&event) {
                warn!(%error, "audit append failed");
            }
            Some(SinkCommand::Merge {
                existing_hash,
                record,
            })
        }
    }
}
