use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use tracing::info;

/// Per-source ingestion counters. The supervisor reads `last_emit_ms`
/// for health probes; the stats command reads everything else.
#[derive(Debug, Default)]
pub struct SourceTelemetry {
    pub events_seen: AtomicU64,
    pub events_emitted: AtomicU64,
    pub events_backpressured: AtomicU64,
    pub events_replaced_oldest: AtomicU64,
    pub decode_errors: AtomicU64,
    pub duplicate_raw_events: AtomicU64,
    pub transient_errors: AtomicU64,
    last_emit_ms: AtomicI64,
}

impl SourceTelemetry {
    pub fn note_emitted(&self) {
        self.events_emitted.fetch_add(1, Ordering::Relaxed);
        self.last_emit_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    pub fn note_decode_error(&self) {
        self.decode_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn last_emit(&self) -> Option<DateTime<Utc>> {
        let millis = self.last_emit_ms.load(Ordering::Relaxed);
        if millis == 0 {
            return None;
        }
        DateTime::<Utc>::from_timestamp_millis(millis)
    }

    pub fn report(&self, source_id: &str, queue_depth: usize) {
        info!(
            source_id,
            events_seen = self.events_seen.load(Ordering::Relaxed),
            events_emitted = self.events_emitted.load(Ordering::Relaxed),
            events_backpressured = self.events_backpressured.load(Ordering::Relaxed),
            events_replaced_oldest = self.events_replaced_oldest.load(Ordering::Relaxed),
            decode_errors = self.decode_errors.load(Ordering::Relaxed),
            duplicate_raw_events = self.duplicate_raw_events.load(Ordering::Relaxed),
            transient_errors = self.transient_errors.load(Ordering::Relaxed),
            queue_depth,
            "ingestion source metrics"
        );
    }
}
