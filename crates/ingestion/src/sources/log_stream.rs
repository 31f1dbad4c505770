use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::info;
use whaleflow_core_types::{Chain, RawTransfer};

use super::TokenBook;
use crate::evm::{parse_hex_u64, EvmLog, SWAP_V2_TOPIC, TRANSFER_TOPIC};
use crate::source::{SourceContext, TransferSource};
use crate::BoxFuture;

/// Push transport delivering one JSON log notification at a time.
/// `Ok(None)` means the stream ended cleanly; an error triggers a
/// supervised restart.
pub trait LogTransport: Send + Sync {
    fn next_event<'a>(&'a self) -> BoxFuture<'a, Result<Option<Value>>>;
}

/// Streaming source over chain transfer/swap logs.
pub struct LogStreamSource {
    source_id: String,
    chain: Chain,
    transport: Box<dyn LogTransport>,
    tokens: TokenBook,
}

impl LogStreamSource {
    pub fn new(
        source_id: impl Into<String>,
        chain: Chain,
        transport: Box<dyn LogTransport>,
        tokens: TokenBook,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            chain,
            transport,
            tokens,
        }
    }

    fn decode(&self, event: &Value) -> Result<RawTransfer> {
        let tx_hash = event
            .get("txHash")
            .or_else(|| event.get("transactionHash"))
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("missing transaction hash"))?
            .to_string();
        let block_time = event
            .get("blockTime")
            .and_then(Value::as_i64)
            .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
            .ok_or_else(|| anyhow!("missing block timestamp"))?;
        let gas_price_gwei = event
            .get("gasPrice")
            .and_then(Value::as_str)
            .and_then(parse_hex_u64)
            .map(|wei| wei as f64 / 1e9);

        let log_value = event.get("log").unwrap_or(event);
        let log = EvmLog::from_json(log_value).context("undecodable log payload")?;

        let (from_addr, to_addr) = match log.topic0() {
            TRANSFER_TOPIC => {
                let from = log
                    .address_topic(1)
                    .ok_or_else(|| anyhow!("transfer log missing sender topic"))?;
                let to = log
                    .address_topic(2)
                    .ok_or_else(|| anyhow!("transfer log missing recipient topic"))?;
                (from, to)
            }
            SWAP_V2_TOPIC => {
                let sender = log
                    .address_topic(1)
                    .ok_or_else(|| anyhow!("swap log missing sender topic"))?;
                let recipient = log.address_topic(2).unwrap_or_else(|| log.address.clone());
                (sender, recipient)
            }
            other => return Err(anyhow!("uninteresting topic {other}")),
        };

        let (symbol, decimals) = match self.tokens.get(&log.address) {
            Some((symbol, decimals)) => (Some(symbol.to_string()), decimals),
            None => (None, 18),
        };
        let amount = log.amount_word(0, decimals).unwrap_or(0.0);

        Ok(RawTransfer {
            source_id: self.source_id.clone(),
            chain: self.chain,
            tx_hash,
            log_index: log.log_index,
            block_time,
            from_addr,
            to_addr,
            token_addr: Some(log.address),
            symbol,
            amount,
            decimals: Some(decimals),
            native_value: None,
            gas_price_gwei,
        })
    }
}

impl TransferSource for LogStreamSource {
    fn source_id(&self) -> &str {
        &self.source_id
    }

    fn run<'a>(&'a self, ctx: SourceContext) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            info!(source_id = %self.source_id, chain = %self.chain, "log stream source started");
            loop {
                if ctx.is_shutdown() {
                    return Ok(());
                }
                let event = match self.transport.next_event().await? {
                    Some(event) => event,
                    None => return Ok(()),
                };
                match self.decode(&event) {
                    Ok(transfer) => ctx.emit(transfer).await?,
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

    struct ScriptedTransport {
        events: Mutex<VecDeque<Value>>,
    }

    impl LogTransport for ScriptedTransport {
        fn next_event<'a>(&'a self) -> BoxFuture<'a, Result<Option<Value>>> {
            let next = self.events.lock().unwrap().pop_front();
            Box::pin(async move { Ok(next) })
        }
    }

    fn usdc_transfer_event() -> Value {
        json!({
            "txHash": "0xfeed",
            "blockTime": 1_760_000_000i64,
            "gasPrice": "0x4a817c800",
            "log": {
                "address": "0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48",
                "topics": [
                    TRANSFER_TOPIC,
                    "0x00000000000000000000000028c6c06298d514db089934071355e5743bf21d60",
                    "0x000000000000000000000000abc0000000000000000000000000000000000123",
                ],
                "data": "0x0000000000000000000000000000000000000000000000000000000ba43b7400",
                "logIndex": "0x1",
            }
        })
    }

    #[tokio::test]
    async fn decodes_transfer_events_into_canonical_form() {
        let mut tokens = TokenBook::default();
        tokens.insert("0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48", "usdc", 6);
        let source = LogStreamSource::new(
            "eth-stream",
            Chain::Ethereum,
            Box::new(ScriptedTransport {
                events: Mutex::new(VecDeque::from([usdc_transfer_event()])),
            }),
            tokens,
        );
        let (ctx, queue, _shutdown) = context(8);
        source.run(ctx).await.expect("run to completion");

        let transfer = queue.pop().await.expect("one event");
        assert_eq!(transfer.tx_hash, "0xfeed");
        assert_eq!(transfer.symbol.as_deref(), Some("USDC"));
        assert_eq!(transfer.amount, 50_000.0);
        assert_eq!(
            transfer.from_addr,
            "0x28c6c06298d514db089934071355e5743bf21d60"
        );
        assert_eq!(transfer.gas_price_gwei, Some(20.0));
        assert_eq!(transfer.log_index, Some(1));
    }

    #[tokio::test]
    async fn undecodable_events_are_counted_not_fatal() {
        let source = LogStreamSource::new(
            "eth-stream",
            Chain::Ethereum,
            Box::new(ScriptedTransport {
                events: Mutex::new(VecDeque::from([json!({"garbage": true})])),
            }),
            TokenBook::default(),
        );
        let (ctx, queue, _shutdown) = context(8);
        let telemetry = ctx.telemetry().clone();
        source.run(ctx).await.expect("run");
        assert_eq!(queue.depth(), 0);
        assert_eq!(
            telemetry
                .decode_errors
                .load(std::sync::atomic::Ordering::Relaxed),
            1
        );
    }
}
