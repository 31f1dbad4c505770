use whaleflow_core_types::{AddressLabel, ClassificationKind, EnrichedTransfer, LabelKind};

use super::phase::{PhaseOutcome, PhaseResult, PHASE_CEX};

const CEX_BASE_CONFIDENCE: f64 = 0.90;

fn entity_of(label: &AddressLabel) -> String {
    label
        .entity_name
        .clone()
        .unwrap_or_else(|| label.address.clone())
}

/// Exchange hot-wallet matching. A withdrawal to a plain wallet reads as
/// accumulation (BUY), a deposit as distribution (SELL). Moves inside
/// one exchange are operational noise and skip the pipeline entirely.
pub(crate) fn evaluate(transfer: &EnrichedTransfer) -> PhaseOutcome {
    let (Some(from), Some(to)) = (&transfer.from_label, &transfer.to_label) else {
        return PhaseOutcome::Abstain;
    };

    match (from.kind, to.kind) {
        (LabelKind::Cex, LabelKind::Cex) => {
            let from_entity = entity_of(from);
            let to_entity = entity_of(to);
            if from_entity == to_entity {
                PhaseOutcome::SkipEvent {
                    reason: format!("internal {from_entity} wallet reshuffle"),
                }
            } else {
                PhaseOutcome::Classified(
                    PhaseResult::new(PHASE_CEX, ClassificationKind::Transfer, 0.85).with_evidence(
                        format!("Exchange-to-exchange move: {from_entity} -> {to_entity}"),
                    ),
                )
            }
        }
        (LabelKind::Cex, to_kind) if to_kind.is_walletish() => PhaseOutcome::Classified(
            PhaseResult::new(PHASE_CEX, ClassificationKind::Buy, CEX_BASE_CONFIDENCE)
                .with_evidence(format!("CEX withdrawal from {}", entity_of(from))),
        ),
        (from_kind, LabelKind::Cex) if from_kind.is_walletish() => PhaseOutcome::Classified(
            PhaseResult::new(PHASE_CEX, ClassificationKind::Sell, CEX_BASE_CONFIDENCE)
                .with_evidence(format!("CEX deposit to {}", entity_of(to))),
        ),
        _ => PhaseOutcome::Abstain,
    }
}
