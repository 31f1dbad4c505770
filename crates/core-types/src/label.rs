use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::Chain;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LabelKind {
    Cex,
    Dex,
    Bridge,
    Lending,
    Staking,
    Yield,
    Mev,
    Mixer,
    Whale,
    Eoa,
    Unknown,
}

impl LabelKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cex => "CEX",
            Self::Dex => "DEX",
            Self::Bridge => "BRIDGE",
            Self::Lending => "LENDING",
            Self::Staking => "STAKING",
            Self::Yield => "YIELD",
            Self::Mev => "MEV",
            Self::Mixer => "MIXER",
            Self::Whale => "WHALE",
            Self::Eoa => "EOA",
            Self::Unknown => "UNKNOWN",
        }
    }

    /// Kinds eligible for the "whale" role in the perspective transform.
    pub fn is_walletish(self) -> bool {
        matches!(self, Self::Eoa | Self::Unknown | Self::Whale)
    }
}

impl fmt::Display for LabelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for LabelKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "CEX" => Ok(Self::Cex),
            "DEX" => Ok(Self::Dex),
            "BRIDGE" => Ok(Self::Bridge),
            "LENDING" => Ok(Self::Lending),
            "STAKING" => Ok(Self::Staking),
            "YIELD" => Ok(Self::Yield),
            "MEV" => Ok(Self::Mev),
            "MIXER" => Ok(Self::Mixer),
            "WHALE" => Ok(Self::Whale),
            "EOA" => Ok(Self::Eoa),
            "UNKNOWN" => Ok(Self::Unknown),
            other => Err(format!("unknown label kind: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddressLabel {
    pub address: String,
    pub chain: Chain,
    pub kind: LabelKind,
    pub entity_name: Option<String>,
    pub confidence: f64,
    pub updated_at: DateTime<Utc>,
}

impl AddressLabel {
    pub fn unknown(address: &str, chain: Chain) -> Self {
        Self {
            address: address.to_ascii_lowercase(),
            chain,
            kind: LabelKind::Unknown,
            entity_name: None,
            confidence: 0.0,
            updated_at: Utc::now(),
        }
    }

    /// Precedence between two labels for the same address: higher
    /// confidence wins, ties broken by freshness.
    pub fn outranks(&self, other: &AddressLabel) -> bool {
        if self.confidence != other.confidence {
            return self.confidence > other.confidence;
        }
        self.updated_at > other.updated_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn label(confidence: f64, age_secs: i64) -> AddressLabel {
        AddressLabel {
            address: "0xabc".to_string(),
            chain: Chain::Ethereum,
            kind: LabelKind::Cex,
            entity_name: Some("binance".to_string()),
            confidence,
            updated_at: Utc::now() - Duration::seconds(age_secs),
        }
    }

    #[test]
    fn higher_confidence_outranks() {
        assert!(label(0.95, 100).outranks(&label(0.80, 0)));
        assert!(!label(0.60, 0).outranks(&label(0.80, 100)));
    }

    #[test]
    fn confidence_tie_broken_by_freshness() {
        assert!(label(0.80, 0).outranks(&label(0.80, 60)));
    }
}
