use anyhow::{anyhow, Result};
use serde_json::Value;

/// ERC-20 `Transfer(address,address,uint256)`.
pub const TRANSFER_TOPIC: &str =
    "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef";
/// Uniswap V2 `Swap(address,uint256,uint256,uint256,uint256,address)`.
pub const SWAP_V2_TOPIC: &str =
    "0xd78ad95fa46c994b6551d0da85fc275fe613ce37657fb8d5e3d130840159d822";
/// Uniswap V3 `Swap(address,address,int256,int256,uint160,uint128,int24)`.
pub const SWAP_V3_TOPIC: &str =
    "0xc42079f94a6350d7e6235f29174924f928cc2ac818eb64fed8004e115fbcca67";
/// Uniswap V2 `Mint(address,uint256,uint256)` — liquidity add.
pub const MINT_V2_TOPIC: &str =
    "0x4c209b5fc8ad50758f13e2e1088ba56a560dff690a1c6fef26394f4c03821c4f";
/// Uniswap V2 `Burn(address,uint256,uint256,address)` — liquidity remove.
pub const BURN_V2_TOPIC: &str =
    "0xdccd412f0b1252819cb1fd330b93224ca42612892bb3f4f789976e6d81936496";

/// Router method selectors recognized on transaction input data.
pub const SELECTOR_SWAP_EXACT_TOKENS: &str = "0x38ed1739";
pub const SELECTOR_ADD_LIQUIDITY: &str = "0xe8e33700";
pub const SELECTOR_REMOVE_LIQUIDITY: &str = "0xbaa2abde";

#[derive(Debug, Clone)]
pub struct EvmLog {
    pub address: String,
    pub topics: Vec<String>,
    pub data: String,
    pub log_index: Option<u32>,
}

impl EvmLog {
    pub fn from_json(value: &Value) -> Result<Self> {
        let address = value
            .get("address")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("log missing address"))?
            .to_ascii_lowercase();
        let topics = value
            .get("topics")
            .and_then(Value::as_array)
            .ok_or_else(|| anyhow!("log missing topics"))?
            .iter()
            .filter_map(Value::as_str)
            .map(|topic| topic.to_ascii_lowercase())
            .collect::<Vec<_>>();
        if topics.is_empty() {
            return Err(anyhow!("log has empty topics"));
        }
        let data = value
            .get("data")
            .and_then(Value::as_str)
            .unwrap_or("0x")
            .to_string();
        let log_index = value
            .get("logIndex")
            .and_then(Value::as_str)
            .and_then(parse_hex_u64)
            .map(|index| index as u32);
        Ok(Self {
            address,
            topics,
            data,
            log_index,
        })
    }

    pub fn topic0(&self) -> &str {
        &self.topics[0]
    }

    /// An indexed address topic is the last 20 bytes of the 32-byte slot.
    pub fn address_topic(&self, index: usize) -> Option<String> {
        let topic = self.topics.get(index)?;
        let hex = topic.strip_prefix("0x")?;
        if hex.len() != 64 {
            return None;
        }
        Some(format!("0x{}", &hex[24..]))
    }

    /// First 32-byte word of `data` as a scaled decimal amount.
    pub fn amount_word(&self, word: usize, decimals: u8) -> Option<f64> {
        let hex = self.data.strip_prefix("0x")?;
        let start = word * 64;
        let end = start + 64;
        if hex.len() < end {
            return None;
        }
        let raw = u128::from_str_radix(hex[start..end].trim_start_matches('0'), 16)
            .ok()
            .or_else(|| {
                // all-zero word trims to an empty string
                if hex[start..end].chars().all(|ch| ch == '0') {
                    Some(0)
                } else {
                    None
                }
            })?;
        Some(raw as f64 / 10f64.powi(decimals as i32))
    }
}

pub fn parse_hex_u64(value: &str) -> Option<u64> {
    let trimmed = value.trim().trim_start_matches("0x");
    if trimmed.is_empty() {
        return Some(0);
    }
    u64::from_str_radix(trimmed, 16).ok()
}
