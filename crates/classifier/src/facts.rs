use anyhow::Result;
use serde_json::Value;
use whaleflow_core_types::Chain;
use whaleflow_ingestion::evm::{
    EvmLog, BURN_V2_TOPIC, MINT_V2_TOPIC, SELECTOR_ADD_LIQUIDITY, SELECTOR_REMOVE_LIQUIDITY,
    SELECTOR_SWAP_EXACT_TOKENS, SWAP_V2_TOPIC, SWAP_V3_TOPIC, TRANSFER_TOPIC,
};
use whaleflow_ingestion::TokenBook;

use crate::BoxFuture;

/// Transaction receipt lookup. `Ok(None)` when the node has no receipt
/// for the hash (still pending, pruned, or wrong chain).
pub trait ReceiptProvider: Send + Sync {
    fn receipt<'a>(&'a self, chain: Chain, tx_hash: &'a str)
        -> BoxFuture<'a, Result<Option<Value>>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiquidityOp {
    Add,
    Remove,
}

/// What the receipt actually proves about the transaction, independent
/// of any address heuristics. Re-decoding the same receipt always yields
/// the same facts.
#[derive(Debug, Clone, Default)]
pub struct SwapFacts {
    /// Token symbols the sending wallet received.
    pub tokens_in: Vec<String>,
    /// Token symbols the sending wallet sent away.
    pub tokens_out: Vec<String>,
    pub has_swap_log: bool,
    pub liquidity: Option<LiquidityOp>,
    pub method: Option<&'static str>,
}

impl SwapFacts {
    pub fn decoded_swap(&self) -> bool {
        self.has_swap_log && !self.tokens_in.is_empty() && !self.tokens_out.is_empty()
    }
}

/// Decode receipt logs into swap facts for the given wallet. Returns
/// `None` for failed transactions so the phase abstains instead of
/// classifying a reverted trade.
pub(crate) fn decode_receipt(receipt: &Value, wallet: &str, tokens: &TokenBook) -> Option<SwapFacts> {
    let status_ok = receipt
        .get("status")
        .and_then(Value::as_str)
        .map(|status| status == "0x1" || status == "1")
        .unwrap_or(false);
    if !status_ok {
        return None;
    }

    let wallet = wallet.to_ascii_lowercase();
    let mut facts = SwapFacts::default();

    facts.method = receipt
        .get("input")
        .and_then(Value::as_str)
        .and_then(|input| {
            let selector = input.get(..10)?;
            match selector {
                SELECTOR_SWAP_EXACT_TOKENS => Some("swapExactTokensForTokens"),
                SELECTOR_ADD_LIQUIDITY => Some("addLiquidity"),
                SELECTOR_REMOVE_LIQUIDITY => Some("removeLiquidity"),
                _ => None,
            }
        });
    match facts.method {
        Some("addLiquidity") => facts.liquidity = Some(LiquidityOp::Add),
        Some("removeLiquidity") => facts.liquidity = Some(LiquidityOp::Remove),
        _ => {}
    }

    let logs = receipt.get("logs").and_then(Value::as_array)?;
    for log_value in logs {
        let Ok(log) = EvmLog::from_json(log_value) else {
            continue;
        };
        match log.topic0() {
            TRANSFER_TOPIC => {
                let symbol = tokens
                    .get(&log.address)
                    .map(|(symbol, _)| symbol.to_string())
                    .unwrap_or_else(|| log.address.clone());
                if log.address_topic(2).as_deref() == Some(wallet.as_str()) {
                    facts.tokens_in.push(symbol);
                } else if log.address_topic(1).as_deref() == Some(wallet.as_str()) {
                    facts.tokens_out.push(symbol);
                }
            }
            SWAP_V2_TOPIC | SWAP_V3_TOPIC => facts.has_swap_log = true,
            MINT_V2_TOPIC => facts.liquidity = Some(LiquidityOp::Add),
            BURN_V2_TOPIC => facts.liquidity = Some(LiquidityOp::Remove),
            _ => {}
        }
    }

    Some(facts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const WALLET: &str = "0xabc0000000000000000000000000000000000123";
    const WALLET_TOPIC: &str =
        "0x000000000000000000000000abc0000000000000000000000000000000000123";
    const POOL_TOPIC: &str = "0x000000000000000000000000b4e16d0168e52d35cacd2c6185b44281ec28c9dc";

    fn tokens() -> TokenBook {
        let mut book = TokenBook::default();
        book.insert("0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48", "USDC", 6);
        book.insert("0xc02aaa39b223fe8d0a0e5c4f27ead9083c756cc2", "WETH", 18);
        book
    }

    fn swap_receipt(status: &str) -> Value {
        json!({
            "transactionHash": "0xswap",
            "status": status,
            "input": "0x38ed1739aaaaaaaa",
            "logs": [
                // wallet sends USDC
                {
                    "address": "0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48",
                    "topics": [TRANSFER_TOPIC, WALLET_TOPIC, POOL_TOPIC],
                    "data": "0x0000000000000000000000000000000000000000000000000000000ba43b7400",
                    "logIndex": "0x0",
                },
                // wallet receives WETH
                {
                    "address": "0xc02aaa39b223fe8d0a0e5c4f27ead9083c756cc2",
                    "topics": [TRANSFER_TOPIC, POOL_TOPIC, WALLET_TOPIC],
                    "data": "0x0000000000000000000000000000000000000000000000008ac7230489e80000",
                    "logIndex": "0x1",
                },
                {
                    "address": "0xb4e16d0168e52d35cacd2c6185b44281ec28c9dc",
                    "topics": [SWAP_V2_TOPIC, POOL_TOPIC, WALLET_TOPIC],
                    "data": "0x",
                    "logIndex": "0x2",
                }
            ]
        })
    }

    #[test]
    fn successful_swap_decodes_in_and_out_tokens() {
        let facts = decode_receipt(&swap_receipt("0x1"), WALLET, &tokens()).expect("facts");
        assert!(facts.decoded_swap());
        assert_eq!(facts.tokens_out, vec!["USDC"]);
        assert_eq!(facts.tokens_in, vec!["WETH"]);
        assert_eq!(facts.method, Some("swapExactTokensForTokens"));
    }

    #[test]
    fn failed_transaction_yields_no_facts() {
        assert!(decode_receipt(&swap_receipt("0x0"), WALLET, &tokens()).is_none());
    }

    #[test]
    fn decoding_is_idempotent() {
        let receipt = swap_receipt("0x1");
        let first = decode_receipt(&receipt, WALLET, &tokens()).expect("facts");
        let second = decode_receipt(&receipt, WALLET, &tokens()).expect("facts");
        assert_eq!(first.tokens_in, second.tokens_in);
        assert_eq!(first.tokens_out, second.tokens_out);
        assert_eq!(first.has_swap_log, second.has_swap_log);
    }

    #[test]
    fn liquidity_selector_marks_liquidity_op() {
        let receipt = json!({
            "status": "0x1",
            "input": "0xe8e33700bbbb",
            "logs": [],
        });
        let facts = decode_receipt(&receipt, WALLET, &tokens()).expect("facts");
        assert_eq!(facts.liquidity, Some(LiquidityOp::Add));
        assert!(!facts.decoded_swap());
    }

    #[test]
    fn burn_log_marks_liquidity_remove() {
        let receipt = json!({
            "status": "0x1",
            "logs": [{
                "address": "0xb4e16d0168e52d35cacd2c6185b44281ec28c9dc",
                "topics": [BURN_V2_TOPIC, POOL_TOPIC],
                "data": "0x",
            }],
        });
        let facts = decode_receipt(&receipt, WALLET, &tokens()).expect("facts");
        assert_eq!(facts.liquidity, Some(LiquidityOp::Remove));
    }
}
