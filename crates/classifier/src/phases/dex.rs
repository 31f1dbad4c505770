use whaleflow_config::ClassificationConfig;
use whaleflow_core_types::{ClassificationKind, EnrichedTransfer, LabelKind};
use whaleflow_enrichment::is_stablecoin;

use super::phase::{PhaseOutcome, PhaseResult, PHASE_DEX};
use crate::facts::{LiquidityOp, SwapFacts};

/// Symbols treated as majors for the crypto-to-crypto direction call:
/// low-cap inbound against a major reads as accumulation.
const MAJOR_SYMBOLS: [&str; 5] = ["WETH", "ETH", "WBTC", "BTC", "SOL"];

fn is_major(symbol: &str) -> bool {
    let upper = symbol.to_ascii_uppercase();
    is_stablecoin(&upper) || MAJOR_SYMBOLS.iter().any(|major| *major == upper)
}

/// Protocol routing phase. Token-to-router direction alone proves
/// nothing; a classification here requires decoded swap facts, a known
/// intent method, or a protocol-kind counterparty label. The optional
/// coverage-mode heuristic is the single exception.
pub(crate) fn evaluate(
    transfer: &EnrichedTransfer,
    facts: Option<&SwapFacts>,
    config: &ClassificationConfig,
) -> PhaseOutcome {
    if let Some(facts) = facts {
        if let Some(op) = facts.liquidity {
            let evidence = match op {
                LiquidityOp::Add => "Liquidity provision (addLiquidity)",
                LiquidityOp::Remove => "Liquidity withdrawal (removeLiquidity)",
            };
            return PhaseOutcome::Classified(
                PhaseResult::new(PHASE_DEX, ClassificationKind::Liquidity, 0.85)
                    .with_evidence(evidence),
            );
        }

        if facts.decoded_swap() {
            return classify_decoded_swap(facts);
        }
    }

    let from_kind = transfer.from_label.as_ref().map(|label| label.kind);
    let to_kind = transfer.to_label.as_ref().map(|label| label.kind);

    match (from_kind, to_kind) {
        (_, Some(LabelKind::Staking)) => PhaseOutcome::Classified(
            PhaseResult::new(PHASE_DEX, ClassificationKind::Staking, 0.85)
                .with_evidence("Deposit into staking protocol"),
        ),
        (Some(LabelKind::Staking), _) => PhaseOutcome::Classified(
            PhaseResult::new(PHASE_DEX, ClassificationKind::Transfer, 0.70)
                .with_evidence("Unstaking withdrawal")
                .with_tag("unstaking"),
        ),
        (_, Some(LabelKind::Bridge)) => bridge_outcome(config, true),
        (Some(LabelKind::Bridge), _) => bridge_outcome(config, false),
        (_, Some(LabelKind::Lending)) | (Some(LabelKind::Lending), _) => PhaseOutcome::Classified(
            PhaseResult::new(PHASE_DEX, ClassificationKind::Defi, 0.70)
                .with_evidence("Lending protocol interaction"),
        ),
        (_, Some(LabelKind::Yield)) | (Some(LabelKind::Yield), _) => PhaseOutcome::Classified(
            PhaseResult::new(PHASE_DEX, ClassificationKind::Defi, 0.70)
                .with_evidence("Yield vault interaction"),
        ),
        (_, Some(LabelKind::Dex)) => {
            if config.dex_coverage_mode {
                PhaseOutcome::Classified(
                    PhaseResult::new(PHASE_DEX, ClassificationKind::Sell, 0.60)
                        .with_evidence("Coverage-mode router heuristic: wallet -> router")
                        .with_tag("coverage_mode"),
                )
            } else {
                PhaseOutcome::Abstain
            }
        }
        _ => PhaseOutcome::Abstain,
    }
}

fn classify_decoded_swap(facts: &SwapFacts) -> PhaseOutcome {
    let acquired_stable = facts.tokens_in.iter().all(|symbol| is_stablecoin(symbol));
    let disposed_stable = facts.tokens_out.iter().all(|symbol| is_stablecoin(symbol));

    if acquired_stable && disposed_stable {
        return PhaseOutcome::Abstain;
    }
    if disposed_stable {
        return PhaseOutcome::Classified(
            PhaseResult::new(PHASE_DEX, ClassificationKind::Buy, 0.95).with_evidence(format!(
                "Swap: stables -> {}",
                facts.tokens_in.join("+")
            )),
        );
    }
    if acquired_stable {
        return PhaseOutcome::Classified(
            PhaseResult::new(PHASE_DEX, ClassificationKind::Sell, 0.95).with_evidence(format!(
                "Swap: {} -> stables",
                facts.tokens_out.join("+")
            )),
        );
    }

    // crypto-to-crypto: low-cap inbound against a major reads as a buy
    let inbound_low_cap = facts.tokens_in.iter().any(|symbol| !is_major(symbol));
    let outbound_major = facts.tokens_out.iter().all(|symbol| is_major(symbol));
    if inbound_low_cap && outbound_major {
        return PhaseOutcome::Classified(
            PhaseResult::new(PHASE_DEX, ClassificationKind::Buy, 0.80).with_evidence(format!(
                "Swap: {} -> {} (low-cap accumulation)",
                facts.tokens_out.join("+"),
                facts.tokens_in.join("+")
            )),
        );
    }
    PhaseOutcome::Classified(
        PhaseResult::new(PHASE_DEX, ClassificationKind::Defi, 0.70).with_evidence(format!(
            "Token swap: {} -> {}",
            facts.tokens_out.join("+"),
            facts.tokens_in.join("+")
        )),
    )
}

fn bridge_outcome(config: &ClassificationConfig, deposit: bool) -> PhaseOutcome {
    if config.bridge_directional {
        let (kind, confidence, evidence) = if deposit {
            (ClassificationKind::Buy, 0.70, "Bridge deposit L1 -> L2 (accumulation)")
        } else {
            (ClassificationKind::Sell, 0.65, "Bridge exit L2 -> L1")
        };
        PhaseOutcome::Classified(
            PhaseResult::new(PHASE_DEX, kind, confidence)
                .with_evidence(evidence)
                .with_tag("bridge"),
        )
    } else {
        PhaseOutcome::Classified(
            PhaseResult::new(PHASE_DEX, ClassificationKind::Bridge, 0.70)
                .with_evidence("Bridge interaction")
                .with_tag("bridge"),
        )
    }
}
