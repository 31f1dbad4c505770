use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::info;
use whaleflow_core_types::{Chain, RawTransfer};

use crate::source::{SourceContext, TransferSource};
use crate::BoxFuture;

/// Firehose of pre-filtered large-value transactions. `Ok(None)` ends
/// the stream cleanly.
pub trait AlertTransport: Send + Sync {
    fn next_alert<'a>(&'a self) -> BoxFuture<'a, Result<Option<Value>>>;
}

/// Large-value alert source. Payloads already carry a USD amount, which
/// travels on `native_value` so enrichment can price the event even when
/// no feed price exists for the symbol.
pub struct AlertFeedSource {
    source_id: String,
    transport: Box<dyn AlertTransport>,
    min_usd: f64,
}

impl AlertFeedSource {
    pub fn new(source_id: impl Into<String>, transport: Box<dyn AlertTransport>, min_usd: f64) -> Self {
        Self {
            source_id: source_id.into(),
            transport,
            min_usd,
        }
    }

    fn decode(&self, alert: &Value) -> Result<RawTransfer> {
        let chain: Chain = alert
            .get("blockchain")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("alert missing blockchain"))?
            .parse()
            .map_err(|error| anyhow!("alert chain: {error}"))?;
        let tx_hash = alert
            .get("hash")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("alert missing hash"))?
            .to_string();
        let block_time = alert
            .get("timestamp")
            .and_then(Value::as_i64)
            .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
            .ok_or_else(|| anyhow!("alert missing timestamp"))?;
        let amount = alert
            .get("amount")
            .and_then(Value::as_f64)
            .ok_or_else(|| anyhow!("alert missing amount"))?;
        let amount_usd = alert.get("amount_usd").and_then(Value::as_f64);
        let symbol = alert
            .get("symbol")
            .and_then(Value::as_str)
            .map(ToString::to_string);
        let from_addr = endpoint_address(alert, "from").unwrap_or_default();
        let to_addr = endpoint_address(alert, "to").unwrap_or_default();

        Ok(RawTransfer {
            source_id: self.source_id.clone(),
            chain,
            tx_hash,
            log_index: None,
            block_time,
            from_addr,
            to_addr,
            token_addr: None,
            symbol,
            amount,
            decimals: None,
            native_value: amount_usd,
            gas_price_gwei: None,
        })
    }
}

fn endpoint_address(alert: &Value, side: &str) -> Option<String> {
    alert
        .get(side)?
        .get("address")
        .and_then(Value::as_str)
        .map(ToString::to_string)
}

impl TransferSource for AlertFeedSource {
    fn source_id(&self) -> &str {
        &self.source_id
    }

    fn run<'a>(&'a self, ctx: SourceContext) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            info!(source_id = %self.source_id, min_usd = self.min_usd, "alert feed source started");
            loop {
                if ctx.is_shutdown() {
                    return Ok(());
                }
                let alert = match self.transport.next_alert().await? {
                    Some(alert) => alert,
                    None => return Ok(()),
                };
                match self.decode(&alert) {
                    Ok(transfer) => {
                        if transfer.native_value.unwrap_or(f64::MAX) < self.min_usd {
                            continue;
                        }
                        ctx.emit(transfer).await?;
                    }
                    Err(_) => ctx.telemetry().note_decode_error(),
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::test_support::context;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct ScriptedAlerts {
        alerts: Mutex<VecDeque<Value>>,
    }

    impl AlertTransport for ScriptedAlerts {
        fn next_alert<'a>(&'a self) -> BoxFuture<'a, Result<Option<Value>>> {
            let next = self.alerts.lock().unwrap().pop_front();
            Box::pin(async move { Ok(next) })
        }
    }

    fn alert(usd: f64) -> Value {
        json!({
            "blockchain": "bitcoin",
            "symbol": "BTC",
            "hash": "abcd1234",
            "from": {"address": "BC1QFROM", "owner_type": "unknown"},
            "to": {"address": "bc1qto", "owner_type": "exchange"},
            "amount": 12.5,
            "amount_usd": usd,
            "timestamp": 1_760_000_000i64,
        })
    }

    #[tokio::test]
    async fn alerts_become_transfers_with_usd_on_native_value() {
        let source = AlertFeedSource::new(
            "whale-alerts",
            Box::new(ScriptedAlerts {
                alerts: Mutex::new(VecDeque::from([alert(750_000.0)])),
            }),
            100_000.0,
        );
        let (ctx, queue, _shutdown) = context(8);
        source.run(ctx).await.expect("run");

        let transfer = queue.pop().await.expect("emitted");
        assert_eq!(transfer.chain, Chain::Bitcoin);
        assert_eq!(transfer.native_value, Some(750_000.0));
        assert_eq!(transfer.from_addr, "bc1qfrom");
    }

    #[tokio::test]
    async fn below_threshold_alerts_are_skipped() {
        let source = AlertFeedSource::new(
            "whale-alerts",
            Box::new(ScriptedAlerts {
                alerts: Mutex::new(VecDeque::from([alert(50_000.0)])),
            }),
            100_000.0,
        );
        let (ctx, queue, _shutdown) = context(8);
        source.run(ctx).await.expect("run");
        assert_eq!(queue.depth(), 0);
    }
}
