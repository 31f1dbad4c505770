use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time;
use tracing::{error, info, warn};
use whaleflow_config::SupervisorConfig;
use whaleflow_ingestion::{SourceContext, TransferSource};

use crate::stats::PipelineStats;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

/// Per-source circuit breaker: opens after N consecutive errors inside
/// the rolling window, half-opens after the cool-down, and closes again
/// on the first success.
#[derive(Debug)]
pub struct CircuitBreaker {
    error_threshold: u32,
    window: ChronoDuration,
    half_open_after: ChronoDuration,
    consecutive_errors: u32,
    window_start: Option<DateTime<Utc>>,
    opened_at: Option<DateTime<Utc>>,
}

impl CircuitBreaker {
    pub fn new(config: &SupervisorConfig) -> Self {
        Self {
            error_threshold: config.circuit_error_threshold.max(1),
            window: ChronoDuration::seconds(config.circuit_window_seconds.max(1) as i64),
            half_open_after: ChronoDuration::seconds(config.circuit_half_open_seconds.max(1) as i64),
            consecutive_errors: 0,
            window_start: None,
            opened_at: None,
        }
    }

    pub fn state(&self, now: DateTime<Utc>) -> CircuitState {
        match self.opened_at {
            Some(opened_at) if now - opened_at >= self.half_open_after => CircuitState::HalfOpen,
            Some(_) => CircuitState::Open,
            None => CircuitState::Closed,
        }
    }

    pub fn note_success(&mut self) {
        self.consecutive_errors = 0;
        self.window_start = None;
        self.opened_at = None;
    }

    pub fn note_error(&mut self, now: DateTime<Utc>) {
        match self.window_start {
            Some(start) if now - start <= self.window => {
                self.consecutive_errors += 1;
            }
            _ => {
                self.window_start = Some(now);
                self.consecutive_errors = 1;
            }
        }
        if self.consecutive_errors >= self.error_threshold && self.opened_at.is_none() {
            self.opened_at = Some(now);
        }
    }
}

/// Run one source under supervision: restart with doubling backoff,
/// honor the circuit breaker, and probe emit health.
pub async fn supervise_source(
    source: Arc<dyn TransferSource>,
    ctx: SourceContext,
    config: SupervisorConfig,
    stats: Arc<PipelineStats>,
    mut shutdown: watch::Receiver<bool>,
) {
    let source_id = source.source_id().to_string();
    let mut breaker = CircuitBreaker::new(&config);
    let mut backoff_ms = config.restart_initial_ms.max(1);
    let health_timeout = ChronoDuration::seconds(config.health_timeout_seconds.max(1) as i64);
    let mut probe_tick = time::interval(Duration::from_secs(30));
    probe_tick.set_missed_tick_behavior(time::MissedTickBehavior::Skip);

    loop {
        if *shutdown.borrow() {
            break;
        }
        let now = Utc::now();
        let state = breaker.state(now);
        stats.set_circuit_state(&source_id, state.as_str());
        if state == CircuitState::Open {
            time::sleep(Duration::from_millis(500)).await;
            continue;
        }

        let mut run = source.run(ctx.clone());
        let result = loop {
            tokio::select! {
                result = &mut run => break Some(result),
                _ = shutdown.changed() => break None,
                _ = probe_tick.tick() => {
                    ctx.telemetry().report(&source_id, ctx.queue_depth());
                    if let Some(last_emit) = ctx.telemetry().last_emit() {
                        if Utc::now() - last_emit > health_timeout {
                            warn!(
                                source_id = %source_id,
                                last_emit = %last_emit.to_rfc3339(),
                                "source health probe: no emits within the health window"
                            );
                        }
                    }
                }
            }
        };

        match result {
            None => break,
            Some(Ok(())) => {
                breaker.note_success();
                stats.set_circuit_state(&source_id, CircuitState::Closed.as_str());
                if *shutdown.borrow() {
                    break;
                }
                // clean end of stream: reconnect after the base delay
                backoff_ms = config.restart_initial_ms.max(1);
                info!(source_id = %source_id, "source ended, reconnecting");
                time::sleep(Duration::from_millis(backoff_ms)).await;
            }
            Some(Err(source_error)) => {
                stats.errors.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                breaker.note_error(Utc::now());
                let state = breaker.state(Utc::now());
                stats.set_circuit_state(&source_id, state.as_str());
                error!(
                    source_id = %source_id,
                    error = %source_error,
                    backoff_ms,
                    circuit = state.as_str(),
                    "source failed, restarting with backoff"
                );
                time::sleep(Duration::from_millis(backoff_ms)).await;
                backoff_ms = (backoff_ms * 2).min(config.restart_max_ms.max(1));
            }
        }
    }
    info!(source_id = %source_id, "source supervisor stopped");
}
