use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClassificationKind {
    Buy,
    Sell,
    Transfer,
    ModerateBuy,
    ModerateSell,
    Staking,
    Defi,
    Bridge,
    Liquidity,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Buy,
    Sell,
}

impl ClassificationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Buy => "BUY",
            Self::Sell => "SELL",
            Self::Transfer => "TRANSFER",
            Self::ModerateBuy => "MODERATE_BUY",
            Self::ModerateSell => "MODERATE_SELL",
            Self::Staking => "STAKING",
            Self::Defi => "DEFI",
            Self::Bridge => "BRIDGE",
            Self::Liquidity => "LIQUIDITY",
            Self::Unknown => "UNKNOWN",
        }
    }

    pub fn direction(self) -> Option<Direction> {
        match self {
            Self::Buy | Self::ModerateBuy => Some(Direction::Buy),
            Self::Sell | Self::ModerateSell => Some(Direction::Sell),
            _ => None,
        }
    }

    /// Non-directional kinds survive aggregation unchanged and are
    /// shielded from near-duplicate suppression.
    pub fn is_protocol_interaction(self) -> bool {
        matches!(self, Self::Defi | Self::Liquidity | Self::Bridge | Self::Staking)
    }
}

impl fmt::Display for ClassificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ClassificationKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "BUY" => Ok(Self::Buy),
            "SELL" => Ok(Self::Sell),
            "TRANSFER" => Ok(Self::Transfer),
            "MODERATE_BUY" => Ok(Self::ModerateBuy),
            "MODERATE_SELL" => Ok(Self::ModerateSell),
            "STAKING" => Ok(Self::Staking),
            "DEFI" => Ok(Self::Defi),
            "BRIDGE" => Ok(Self::Bridge),
            "LIQUIDITY" => Ok(Self::Liquidity),
            "UNKNOWN" => Ok(Self::Unknown),
            other => Err(format!("unknown classification kind: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Classification {
    pub kind: ClassificationKind,
    pub confidence: f64,
    pub evidence: Vec<String>,
    pub tags: BTreeSet<String>,
    pub should_alert: bool,
}

impl Classification {
    pub fn new(kind: ClassificationKind, confidence: f64) -> Self {
        Self {
            kind,
            confidence: confidence.clamp(0.0, 1.0),
            evidence: Vec::new(),
            tags: BTreeSet::new(),
            should_alert: true,
        }
    }

    pub fn with_evidence(mut self, line: impl Into<String>) -> Self {
        self.evidence.push(line.into());
        self
    }
}
