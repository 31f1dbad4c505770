use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::info;
use whaleflow_core_types::{Chain, RawTransfer};

use super::TokenBook;
use crate::evm::{parse_hex_u64, EvmLog, SWAP_V2_TOPIC, SWAP_V3_TOPIC, TRANSFER_TOPIC};
use crate::source::{SourceContext, TransferSource};
use crate::BoxFuture;

/// Feed of transaction hashes to decode, e.g. from a mempool watcher or
/// an operator backfill list. `Ok(None)` ends the feed.
pub trait TxHashFeed: Send + Sync {
    fn next_tx<'a>(&'a self) -> BoxFuture<'a, Result<Option<String>>>;
    fn fetch_receipt<'a>(&'a self, tx_hash: &'a str) -> BoxFuture<'a, Result<Option<Value>>>;
}

/// Decode every interesting log of a receipt into canonical transfers.
/// One `RawTransfer` per Transfer/Swap log; other topics are skipped.
pub fn decode_transfer_logs(
    source_id: &str,
    chain: Chain,
    receipt: &Value,
    tokens: &TokenBook,
) -> Result<Vec<RawTransfer>> {
    let tx_hash = receipt
        .get("transactionHash")
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow!("receipt missing transactionHash"))?
        .to_string();
    let block_time = receipt
        .get("blockTime")
        .and_then(Value::as_i64)
        .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
        .unwrap_or_else(Utc::now);
    let gas_price_gwei = receipt
        .get("effectiveGasPrice")
        .and_then(Value::as_str)
        .and_then(parse_hex_u64)
        .map(|wei| wei as f64 / 1e9);
    let logs = receipt
        .get("logs")
        .and_then(Value::as_array)
        .ok_or_else(|| anyhow!("receipt missing logs"))?;

    let mut transfers = Vec::new();
    for log_value in logs {
        let Ok(log) = EvmLog::from_json(log_value) else {
            continue;
        };
        let (from_addr, to_addr) = match log.topic0() {
            TRANSFER_TOPIC => {
                let (Some(from), Some(to)) = (log.address_topic(1), log.address_topic(2)) else {
                    continue;
                };
                (from, to)
            }
            SWAP_V2_TOPIC | SWAP_V3_TOPIC => {
                let Some(sender) = log.address_topic(1) else {
                    continue;
                };
                let recipient = log.address_topic(2).unwrap_or_else(|| log.address.clone());
                (sender, recipient)
            }
            _ => continue,
        };

        let (symbol, decimals) = match tokens.get(&log.address) {
            Some((symbol, decimals)) => (Some(symbol.to_string()), decimals),
            None => (None, 18),
        };
        let amount = log.amount_word(0, decimals).unwrap_or(0.0);
        transfers.push(RawTransfer {
            source_id: source_id.to_string(),
            chain,
            tx_hash: tx_hash.clone(),
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
        });
    }
    Ok(transfers)
}

/// On-demand receipt decoder: pulls tx hashes from a feed, fetches the
/// receipt, and emits one event per interesting log.
pub struct RpcLogParserSource {
    source_id: String,
    chain: Chain,
    feed: Box<dyn TxHashFeed>,
    tokens: TokenBook,
}

impl RpcLogParserSource {
    pub fn new(
        source_id: impl Into<String>,
        chain: Chain,
        feed: Box<dyn TxHashFeed>,
        tokens: TokenBook,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            chain,
            feed,
            tokens,
        }
    }
}

impl TransferSource for RpcLogParserSource {
    fn source_id(&self) -> &str {
        &self.source_id
    }

    fn run<'a>(&'a self, ctx: SourceContext) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            info!(source_id = %self.source_id, chain = %self.chain, "rpc log parser started");
            loop {
                if ctx.is_shutdown() {
                    return Ok(());
                }
                let tx_hash = match self.feed.next_tx().await? {
                    Some(tx_hash) => tx_hash,
                    None => return Ok(()),
                };
                let Some(receipt) = self.feed.fetch_receipt(&tx_hash).await? else {
                    continue;
                };
                match decode_transfer_logs(&self.source_id, self.chain, &receipt, &self.tokens) {
                    Ok(transfers) => {
                        for transfer in transfers {
                            ctx.emit(transfer).await?;
                        }
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
    use serde_json::json;

    fn receipt() -> Value {
        json!({
            "transactionHash": "0xreceipt",
            "blockTime": 1_760_000_000i64,
            "effectiveGasPrice": "0x12a05f200",
            "status": "0x1",
            "logs": [
                {
                    "address": "0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48",
                    "topics": [
                        TRANSFER_TOPIC,
                        "0x000000000000000000000000abc0000000000000000000000000000000000123",
                        "0x0000000000000000000000007a250d5630b4cf539739df2c5dacb4c659f2488d",
                    ],
                    "data": "0x0000000000000000000000000000000000000000000000000000000ba43b7400",
                    "logIndex": "0x0",
                },
                {
                    "address": "0xb4e16d0168e52d35cacd2c6185b44281ec28c9dc",
                    "topics": [
                        SWAP_V2_TOPIC,
                        "0x0000000000000000000000007a250d5630b4cf539739df2c5dacb4c659f2488d",
                        "0x000000000000000000000000abc0000000000000000000000000000000000123",
                    ],
                    "data": "0x0000000000000000000000000000000000000000000000000000000ba43b7400",
                    "logIndex": "0x1",
                },
                {
                    "address": "0xdeaddeaddeaddeaddeaddeaddeaddeaddeaddead",
                    "topics": ["0x1111111111111111111111111111111111111111111111111111111111111111"],
                    "data": "0x",
                    "logIndex": "0x2",
                }
            ]
        })
    }

    #[test]
    fn decodes_one_event_per_interesting_log() {
        let mut tokens = TokenBook::default();
        tokens.insert("0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48", "USDC", 6);
        let transfers =
            decode_transfer_logs("rpc", Chain::Ethereum, &receipt(), &tokens).expect("decode");
        assert_eq!(transfers.len(), 2, "third log has an unknown topic");
        assert_eq!(transfers[0].symbol.as_deref(), Some("USDC"));
        assert_eq!(transfers[0].amount, 50_000.0);
        assert_eq!(transfers[0].log_index, Some(0));
        assert_eq!(transfers[1].log_index, Some(1));
        assert_eq!(transfers[0].gas_price_gwei, Some(5.0));
    }

    #[test]
    fn receipt_without_logs_is_an_error() {
        let bad = json!({"transactionHash": "0xempty"});
        assert!(decode_transfer_logs("rpc", Chain::Ethereum, &bad, &TokenBook::default()).is_err());
    }
}
