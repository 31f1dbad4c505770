use std::collections::BTreeSet;
use whaleflow_core_types::ClassificationKind;

pub const PHASE_CEX: &str = "cex";
pub const PHASE_DEX: &str = "dex_protocol";
pub const PHASE_CHAIN: &str = "chain_receipt";
pub const PHASE_MEGA_WHALE: &str = "mega_whale";

#[derive(Debug, Clone)]
pub struct PhaseResult {
    pub phase: &'static str,
    pub kind: ClassificationKind,
    pub confidence: f64,
    pub evidence: Vec<String>,
    pub tags: BTreeSet<String>,
}

impl PhaseResult {
    pub fn new(phase: &'static str, kind: ClassificationKind, confidence: f64) -> Self {
        Self {
            phase,
            kind,
            confidence: confidence.clamp(0.0, 1.0),
            evidence: Vec::new(),
            tags: BTreeSet::new(),
        }
    }

    pub fn with_evidence(mut self, line: impl Into<String>) -> Self {
        self.evidence.push(line.into());
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }
}

/// A phase either classifies, has nothing to say, or declares the whole
/// event uninteresting (internal exchange reshuffle).
#[derive(Debug, Clone)]
pub enum PhaseOutcome {
    Classified(PhaseResult),
    Abstain,
    SkipEvent { reason: String },
}
