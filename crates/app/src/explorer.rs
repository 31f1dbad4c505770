use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use whaleflow_classifier::ReceiptProvider;
use whaleflow_core_types::Chain;
use whaleflow_ingestion::{BoxFuture, ExplorerApi, ExplorerTransfer};

/// Etherscan-style client backing both the receipt poller (`tokentx`)
/// and the classifier's receipt lookups (proxy RPC).
pub struct EtherscanClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl EtherscanClient {
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed building explorer HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.to_string(),
            api_key: api_key.to_string(),
        })
    }

    async fn get_json(&self, query: &[(&str, &str)]) -> Result<Value> {
        let mut query = query.to_vec();
        query.push(("apikey", self.api_key.as_str()));
        let response = self
            .client
            .get(&self.base_url)
            .query(&query)
            .send()
            .await
            .with_context(|| format!("explorer request failed: {}", self.base_url))?
            .error_for_status()
            .context("explorer returned error status")?
            .json::<Value>()
            .await
            .context("failed parsing explorer response body")?;
        Ok(response)
    }

    async fn fetch_token_transfers(
        &self,
        contract: &str,
        after_block: u64,
    ) -> Result<Vec<ExplorerTransfer>> {
        let start_block = (after_block + 1).to_string();
        let response = self
            .get_json(&[
                ("module", "account"),
                ("action", "tokentx"),
                ("contractaddress", contract),
                ("startblock", &start_block),
                ("endblock", "latest"),
                ("sort", "asc"),
            ])
            .await?;

        if response.get("status").and_then(Value::as_str) == Some("0") {
            let message = response
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown");
            // "No transactions found" is an empty page, not an error
            if message.eq_ignore_ascii_case("no transactions found") {
                return Ok(Vec::new());
            }
            return Err(anyhow!("explorer rejected tokentx query: {message}"));
        }

        let rows = response
            .get("result")
            .and_then(Value::as_array)
            .ok_or_else(|| anyhow!("tokentx result is not an array"))?;
        let mut transfers = Vec::with_capacity(rows.len());
        for row in rows {
            if let Some(transfer) = parse_tokentx_row(row, contract) {
                transfers.push(transfer);
            }
        }
        Ok(transfers)
    }

    async fn fetch_receipt(&self, tx_hash: &str) -> Result<Option<Value>> {
        let response = self
            .get_json(&[
                ("module", "proxy"),
                ("action", "eth_getTransactionReceipt"),
                ("txhash", tx_hash),
            ])
            .await?;
        Ok(response.get("result").filter(|value| !value.is_null()).cloned())
    }
}

fn parse_tokentx_row(row: &Value, contract: &str) -> Option<ExplorerTransfer> {
    let field = |name: &str| row.get(name).and_then(Value::as_str);
    let decimals: u8 = field("tokenDecimal")?.parse().ok()?;
    let raw_amount: f64 = field("value")?.parse().ok()?;
    let block_time = field("timeStamp")?
        .parse::<i64>()
        .ok()
        .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))?;
    Some(ExplorerTransfer {
        tx_hash: field("hash")?.to_string(),
        log_index: field("transactionIndex").and_then(|value| value.parse().ok()),
        block_number: field("blockNumber")?.parse().ok()?,
        block_time,
        from_addr: field("from")?.to_string(),
        to_addr: field("to")?.to_string(),
        token_addr: contract.to_string(),
        symbol: field("tokenSymbol")?.to_string(),
        decimals,
        amount: raw_amount / 10f64.powi(decimals as i32),
        gas_price_gwei: field("gasPrice")
            .and_then(|value| value.parse::<f64>().ok())
            .map(|wei| wei / 1e9),
    })
}

impl ExplorerApi for EtherscanClient {
    fn token_transfers<'a>(
        &'a self,
        contract: &'a str,
        after_block: u64,
    ) -> BoxFuture<'a, Result<Vec<ExplorerTransfer>>> {
        Box::pin(self.fetch_token_transfers(contract, after_block))
    }
}

impl ReceiptProvider for EtherscanClient {
    fn receipt<'a>(
        &'a self,
        chain: Chain,
        tx_hash: &'a str,
    ) -> whaleflow_classifier::BoxFuture<'a, Result<Option<Value>>> {
        Box::pin(async move {
            if !chain.is_evm() {
                return Ok(None);
            }
            self.fetch_receipt(tx_hash).await
        })
    }
}
