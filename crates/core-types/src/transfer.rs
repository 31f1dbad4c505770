use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::AddressLabel;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Chain {
    Ethereum,
    Polygon,
    Bsc,
    Solana,
    Bitcoin,
    Xrp,
}

impl Chain {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ethereum => "ethereum",
            Self::Polygon => "polygon",
            Self::Bsc => "bsc",
            Self::Solana => "solana",
            Self::Bitcoin => "bitcoin",
            Self::Xrp => "xrp",
        }
    }

    /// EVM chains share log-index raw identity and gas semantics.
    pub fn is_evm(self) -> bool {
        matches!(self, Self::Ethereum | Self::Polygon | Self::Bsc)
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Chain {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "ethereum" | "eth" => Ok(Self::Ethereum),
            "polygon" | "matic" => Ok(Self::Polygon),
            "bsc" | "binance-smart-chain" => Ok(Self::Bsc),
            "solana" | "sol" => Ok(Self::Solana),
            "bitcoin" | "btc" => Ok(Self::Bitcoin),
            "xrp" | "ripple" => Ok(Self::Xrp),
            other => Err(format!("unknown chain: {other}")),
        }
    }
}

/// One transfer as reported by an ingestion source, after normalization.
///
/// `(chain, tx_hash, log_index)` identifies a raw event across sources.
/// A source that cannot decode a field leaves it `None`; every consumer
/// downstream tolerates missing optionals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawTransfer {
    pub source_id: String,
    pub chain: Chain,
    pub tx_hash: String,
    pub log_index: Option<u32>,
    pub block_time: DateTime<Utc>,
    pub from_addr: String,
    pub to_addr: String,
    pub token_addr: Option<String>,
    pub symbol: Option<String>,
    pub amount: f64,
    pub decimals: Option<u8>,
    pub native_value: Option<f64>,
    pub gas_price_gwei: Option<f64>,
}

impl RawTransfer {
    pub fn raw_key(&self) -> (Chain, &str, u32) {
        (self.chain, self.tx_hash.as_str(), self.log_index.unwrap_or(0))
    }
}

/// A raw transfer plus everything the enrichment stage could resolve.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichedTransfer {
    pub raw: RawTransfer,
    pub usd_value: f64,
    pub price_missing: bool,
    pub from_label: Option<AddressLabel>,
    pub to_label: Option<AddressLabel>,
    pub token_age_days: Option<u32>,
    pub token_risk: Option<f64>,
    pub tags: BTreeSet<String>,
}

impl EnrichedTransfer {
    pub fn symbol(&self) -> &str {
        self.raw.symbol.as_deref().unwrap_or("UNKNOWN")
    }
}
