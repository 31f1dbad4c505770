use chrono::Timelike;
use std::sync::Arc;
use whaleflow_config::ClassificationConfig;
use whaleflow_core_types::{EnrichedTransfer, LabelKind};
use whaleflow_registry::WhaleRegistry;

/// Peak trading window, UTC hours (inclusive start, exclusive end).
const PEAK_HOURS: (u32, u32) = (13, 21);

/// Behavioral boosts applied on top of the aggregated directional
/// confidence. Missing USD value simply skips the USD boost; nothing
/// here can fail.
pub(crate) fn compute_boosts(
    transfer: &EnrichedTransfer,
    registry: &Arc<WhaleRegistry>,
    config: &ClassificationConfig,
) -> (f64, Vec<String>) {
    let mut boost = 0.0;
    let mut evidence = Vec::new();

    if !transfer.price_missing && transfer.usd_value >= config.usd_boost_threshold {
        boost += config.usd_boost_amount;
        evidence.push(format!(
            "High-value transaction (${:.0})",
            transfer.usd_value
        ));
    }

    if let Some(gas_gwei) = transfer.raw.gas_price_gwei {
        if gas_gwei >= 100.0 {
            boost += 0.10;
            evidence.push(format!("Urgent gas price ({gas_gwei:.0} gwei)"));
        } else if gas_gwei >= 50.0 {
            boost += 0.05;
            evidence.push(format!("Elevated gas price ({gas_gwei:.0} gwei)"));
        }
    }

    if let Some(wallet) = wallet_side(transfer) {
        let registry_boost = registry.confidence_boost(wallet, transfer.raw.block_time);
        if registry_boost > 0.0 {
            boost += registry_boost;
            if registry.is_proven(wallet) {
                evidence.push("Proven whale wallet".to_string());
            } else {
                evidence.push("Recently active tracked wallet".to_string());
            }
        }
    }

    let hour = transfer.raw.block_time.hour();
    if hour >= PEAK_HOURS.0 && hour < PEAK_HOURS.1 {
        boost += 0.04;
        evidence.push(format!("Peak-hour trading ({hour:02}:00 UTC)"));
    }

    (boost, evidence)
}

/// The endpoint that could plausibly be the whale: prefer a walletish
/// sender, fall back to a walletish recipient.
fn wallet_side(transfer: &EnrichedTransfer) -> Option<&str> {
    let from_walletish = transfer
        .from_label
        .as_ref()
        .map(|label| label.kind.is_walletish())
        .unwrap_or(true);
    if from_walletish && !transfer.raw.from_addr.is_empty() {
        return Some(&transfer.raw.from_addr);
    }
    let to_walletish = transfer
        .to_label
        .as_ref()
        .map(|label| label.kind == LabelKind::Eoa || label.kind == LabelKind::Unknown)
        .unwrap_or(true);
    if to_walletish && !transfer.raw.to_addr.is_empty() {
        return Some(&transfer.raw.to_addr);
    }
    None
}
