use anyhow::{anyhow, Result};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tracing::debug;
use whaleflow_core_types::RawTransfer;

use crate::normalize::{normalize_transfer, SeenEvents};
use crate::queue::{BoundedQueue, QueueOverflowPolicy, QueuePush};
use crate::telemetry::SourceTelemetry;
use crate::BoxFuture;

/// One ingestion source, run under supervision. `run` should loop until
/// shutdown; returning an error hands control back to the supervisor,
/// which restarts the source with backoff.
pub trait TransferSource: Send + Sync {
    fn source_id(&self) -> &str;
    fn run<'a>(&'a self, ctx: SourceContext) -> BoxFuture<'a, Result<()>>;
}

/// Shared fan-in handle given to every source.
#[derive(Clone)]
pub struct SourceContext {
    queue: Arc<BoundedQueue<RawTransfer>>,
    policy: QueueOverflowPolicy,
    telemetry: Arc<SourceTelemetry>,
    seen: Arc<Mutex<SeenEvents>>,
    shutdown: watch::Receiver<bool>,
}

impl SourceContext {
    pub fn new(
        queue: Arc<BoundedQueue<RawTransfer>>,
        policy: QueueOverflowPolicy,
        telemetry: Arc<SourceTelemetry>,
        seen: Arc<Mutex<SeenEvents>>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            queue,
            policy,
            telemetry,
            seen,
            shutdown,
        }
    }

    pub fn telemetry(&self) -> &Arc<SourceTelemetry> {
        &self.telemetry
    }

    pub fn queue_depth(&self) -> usize {
        self.queue.depth()
    }

    pub fn is_shutdown(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Wait out a poll interval, returning early on shutdown.
    pub async fn idle(&mut self, duration: Duration) {
        let sleep = tokio::time::sleep(duration);
        tokio::pin!(sleep);
        tokio::select! {
            _ = &mut sleep => {}
            _ = self.shutdown.changed() => {}
        }
    }

    /// Normalize and enqueue one decoded event. Decode rejects and raw
    /// duplicates are counted and swallowed; a closed queue surfaces as
    /// an error so the source loop exits.
    pub async fn emit(&self, transfer: RawTransfer) -> Result<()> {
        self.telemetry.events_seen.fetch_add(1, Ordering::Relaxed);
        let transfer = match normalize_transfer(transfer) {
            Ok(transfer) => transfer,
            Err(error) => {
                self.telemetry.note_decode_error();
                debug!(%error, "dropping undecodable event");
                return Ok(());
            }
        };

        let fresh = {
            let mut seen = self.seen.lock().unwrap_or_else(|poison| poison.into_inner());
            seen.insert(&transfer)
        };
        if !fresh {
            self.telemetry
                .duplicate_raw_events
                .fetch_add(1, Ordering::Relaxed);
            return Ok(());
        }

        match self.queue.push(transfer, self.policy).await {
            Some(QueuePush::Enqueued { backpressured }) => {
                if backpressured {
                    self.telemetry
                        .events_backpressured
                        .fetch_add(1, Ordering::Relaxed);
                }
                self.telemetry.note_emitted();
                Ok(())
            }
            Some(QueuePush::ReplacedOldest) => {
                self.telemetry
                    .events_replaced_oldest
                    .fetch_add(1, Ordering::Relaxed);
                self.telemetry.note_emitted();
                Ok(())
            }
            None => Err(anyhow!("fan-in queue closed")),
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use chrono::Utc;
    use whaleflow_core_types::Chain;

    pub(crate) fn context(
        capacity: usize,
    ) -> (SourceContext, Arc<BoundedQueue<RawTransfer>>, watch::Sender<bool>) {
        let queue = Arc::new(BoundedQueue::new(capacity));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let ctx = SourceContext::new(
            queue.clone(),
            QueueOverflowPolicy::Block,
            Arc::new(SourceTelemetry::default()),
            Arc::new(Mutex::new(SeenEvents::new(1_000, Duration::from_secs(600)))),
            shutdown_rx,
        );
        (ctx, queue, shutdown_tx)
    }

    pub(crate) fn raw_transfer(hash: &str) -> RawTransfer {
        RawTransfer {
            source_id: "test".to_string(),
            chain: Chain::Ethereum,
            tx_hash: hash.to_string(),
            log_index: Some(0),
            block_time: Utc::now(),
            from_addr: "0xFrom".to_string(),
            to_addr: "0xTo".to_string(),
            token_addr: None,
            symbol: Some("WETH".to_string()),
            amount: 1.0,
            decimals: Some(18),
            native_value: None,
            gas_price_gwei: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::{context, raw_transfer};
    use std::sync::atomic::Ordering;

    #[tokio::test]
    async fn emit_normalizes_and_enqueues() {
        let (ctx, queue, _shutdown) = context(8);
        ctx.emit(raw_transfer("0xabc")).await.expect("emit");
        let stored = queue.pop().await.expect("queued");
        assert_eq!(stored.from_addr, "0xfrom");
        assert_eq!(ctx.telemetry().events_emitted.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn emit_swallows_duplicates_across_calls() {
        let (ctx, queue, _shutdown) = context(8);
        ctx.emit(raw_transfer("0xabc")).await.expect("emit");
        ctx.emit(raw_transfer("0xabc")).await.expect("emit dup");
        assert_eq!(queue.depth(), 1);
        assert_eq!(
            ctx.telemetry().duplicate_raw_events.load(Ordering::Relaxed),
            1
        );
    }

    #[tokio::test]
    async fn emit_counts_decode_errors() {
        let (ctx, queue, _shutdown) = context(8);
        let mut bad = raw_transfer("0xabc");
        bad.tx_hash = String::new();
        ctx.emit(bad).await.expect("decode error is swallowed");
        assert_eq!(queue.depth(), 0);
        assert_eq!(ctx.telemetry().decode_errors.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn emit_errors_once_queue_closes() {
        let (ctx, queue, _shutdown) = context(8);
        queue.close().await;
        assert!(ctx.emit(raw_transfer("0xabc")).await.is_err());
    }
}
