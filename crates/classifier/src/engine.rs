use std::sync::Arc;
use std::time::Duration;
use tokio::time;
use tracing::debug;
use whaleflow_config::ClassificationConfig;
use whaleflow_core_types::{
    Classification, ClassificationKind, Direction, EnrichedTransfer, TAG_SCAM_TOKEN,
};
use whaleflow_ingestion::TokenBook;
use whaleflow_registry::WhaleRegistry;

use crate::aggregate::{stacked_confidence, DirectionalVote};
use crate::facts::{decode_receipt, ReceiptProvider, SwapFacts};
use crate::phases::phase::{PhaseOutcome, PhaseResult, PHASE_CHAIN};
use crate::phases::{behavior, cex, dex, mega_whale};
use crate::phases::mega_whale::AnalyticsBackend;

/// Tag an upstream token screen can set to veto alerting on thin books.
pub const TAG_THIN_LIQUIDITY: &str = "thin_liquidity";

const CONFLICT_COMPARABLE_DELTA: f64 = 0.10;

#[derive(Debug, Clone)]
pub enum EngineOutcome {
    Classified(Classification),
    /// Event is not worth a record at all (exchange-internal moves).
    Skip { reason: String },
}

/// Multi-phase classification: exchange matching, receipt facts,
/// protocol routing, then weighted aggregation with confidence stacking
/// and behavioral boosts. Phases abstain instead of erroring; the engine
/// itself never fails.
pub struct ClassificationEngine {
    config: ClassificationConfig,
    registry: Arc<WhaleRegistry>,
    receipts: Option<Arc<dyn ReceiptProvider>>,
    analytics: Option<Arc<dyn AnalyticsBackend>>,
    tokens: Arc<TokenBook>,
}

impl ClassificationEngine {
    pub fn new(
        config: ClassificationConfig,
        registry: Arc<WhaleRegistry>,
        receipts: Option<Arc<dyn ReceiptProvider>>,
        analytics: Option<Arc<dyn AnalyticsBackend>>,
        tokens: Arc<TokenBook>,
    ) -> Self {
        Self {
            config,
            registry,
            receipts,
            analytics,
            tokens,
        }
    }

    pub async fn classify(&self, transfer: &EnrichedTransfer) -> EngineOutcome {
        let cex_result = match cex::evaluate(transfer) {
            PhaseOutcome::SkipEvent { reason } => return EngineOutcome::Skip { reason },
            PhaseOutcome::Classified(result) => Some(result),
            PhaseOutcome::Abstain => None,
        };

        // Priority path: a confident exchange match is decisive on its
        // own confidence, no weighting.
        if let Some(result) = &cex_result {
            if result.kind.direction().is_some() && result.confidence >= self.config.cex_phase_exit {
                return self.finish_directional(transfer, result.clone(), Vec::new());
            }
        }

        let facts = self.gather_facts(transfer).await;
        let chain_result = facts.as_ref().and_then(verified_swap_vote);

        let dex_result = match dex::evaluate(transfer, facts.as_ref(), &self.config) {
            PhaseOutcome::Classified(result) => Some(result),
            _ => None,
        };

        if let Some(result) = &dex_result {
            if let Some(direction) = result.kind.direction() {
                let conflicting = cex_result
                    .as_ref()
                    .and_then(|cex| cex.kind.direction())
                    .is_some_and(|cex_direction| cex_direction != direction);
                if !conflicting && result.confidence >= self.config.dex_phase_exit {
                    let mut supporting = Vec::new();
                    if let Some(chain) = &chain_result {
                        supporting.extend(chain.evidence.clone());
                    }
                    return self.finish_directional(transfer, result.clone(), supporting);
                }
            }
        }

        let mut results: Vec<PhaseResult> = Vec::new();
        results.extend(cex_result.clone());
        results.extend(chain_result.clone());
        results.extend(dex_result.clone());

        let best_so_far = results
            .iter()
            .map(|result| result.confidence)
            .fold(0.0f64, f64::max);
        if best_so_far < self.config.early_exit && self.config.mega_whale_enabled {
            if let Some(analytics) = &self.analytics {
                let leading = leading_direction(&results);
                let vote = time::timeout(
                    Duration::from_millis(self.config.phase_timeout_ms.max(100)),
                    mega_whale::evaluate(
                        analytics.as_ref(),
                        &transfer.raw.from_addr,
                        transfer.raw.chain,
                        leading,
                    ),
                )
                .await
                .ok()
                .flatten();
                results.extend(vote);
            }
        }

        self.aggregate(transfer, results)
    }

    async fn gather_facts(&self, transfer: &EnrichedTransfer) -> Option<SwapFacts> {
        let receipts = self.receipts.as_ref()?;
        if !transfer.raw.chain.is_evm() {
            return None;
        }
        let fetched = time::timeout(
            Duration::from_millis(self.config.receipt_timeout_ms.max(100)),
            receipts.receipt(transfer.raw.chain, &transfer.raw.tx_hash),
        )
        .await;
        match fetched {
            Ok(Ok(Some(receipt))) => {
                decode_receipt(&receipt, &transfer.raw.from_addr, &self.tokens)
            }
            Ok(Ok(None)) => None,
            Ok(Err(error)) => {
                debug!(tx_hash = %transfer.raw.tx_hash, %error, "receipt fetch failed");
                None
            }
            Err(_) => {
                debug!(tx_hash = %transfer.raw.tx_hash, "receipt fetch timed out");
                None
            }
        }
    }

    fn aggregate(&self, transfer: &EnrichedTransfer, mut results: Vec<PhaseResult>) -> EngineOutcome {
        // A protocol interaction from the routing phase is the final
        // word; weak directional echoes do not overrule it.
        if let Some(protocol) = results
            .iter()
            .find(|result| result.kind.is_protocol_interaction())
            .cloned()
        {
            let mut classification = Classification::new(protocol.kind, protocol.confidence);
            for result in &results {
                classification.evidence.extend(result.evidence.clone());
                classification.tags.extend(result.tags.clone());
            }
            classification.tags.extend(transfer.tags.clone());
            apply_alert_policy(&mut classification);
            return EngineOutcome::Classified(classification);
        }

        if let Some(conflict) = self.resolve_priority_conflict(&results) {
            match conflict {
                ConflictResolution::KeepDirection(direction) => {
                    results.retain(|result| {
                        result.kind.direction().map(|d| d == direction).unwrap_or(true)
                    });
                }
                ConflictResolution::ForceTransfer => {
                    let mut classification = Classification::new(ClassificationKind::Transfer, 0.50)
                        .with_evidence("Conflicting exchange and protocol signals");
                    for result in &results {
                        classification.evidence.extend(result.evidence.clone());
                        classification.tags.extend(result.tags.clone());
                    }
                    classification.tags.extend(transfer.tags.clone());
                    apply_alert_policy(&mut classification);
                    return EngineOutcome::Classified(classification);
                }
            }
        }

        let votes_for = |direction: Direction| -> Vec<DirectionalVote> {
            results
                .iter()
                .filter(|result| result.kind.direction() == Some(direction))
                .map(|result| DirectionalVote {
                    weight: self.phase_weight(result.phase),
                    confidence: result.confidence,
                })
                .collect()
        };
        let buy_confidence = stacked_confidence(&votes_for(Direction::Buy));
        let sell_confidence = stacked_confidence(&votes_for(Direction::Sell));

        if buy_confidence <= 0.0 && sell_confidence <= 0.0 {
            // No directional signal anywhere: a distinct-entity exchange
            // transfer keeps its phase confidence, everything else is a
            // low-confidence transfer.
            let transfer_confidence = results
                .iter()
                .filter(|result| result.kind == ClassificationKind::Transfer)
                .map(|result| result.confidence)
                .fold(0.30f64, f64::max);
            let mut classification =
                Classification::new(ClassificationKind::Transfer, transfer_confidence);
            if results.is_empty() {
                classification.evidence.push("No classifying signals".to_string());
            }
            for result in &results {
                classification.evidence.extend(result.evidence.clone());
                classification.tags.extend(result.tags.clone());
            }
            classification.tags.extend(transfer.tags.clone());
            apply_alert_policy(&mut classification);
            return EngineOutcome::Classified(classification);
        }

        let (direction, stacked) = if buy_confidence >= sell_confidence {
            (Direction::Buy, buy_confidence)
        } else {
            (Direction::Sell, sell_confidence)
        };

        let kind = match direction {
            Direction::Buy => ClassificationKind::Buy,
            Direction::Sell => ClassificationKind::Sell,
        };
        let mut seed = PhaseResult::new("aggregate", kind, stacked);
        for result in &results {
            seed.evidence.extend(result.evidence.clone());
            seed.tags.extend(result.tags.clone());
        }
        self.finish_directional(transfer, seed, Vec::new())
    }

    /// Apply behavioral boosts to a directional result and map the final
    /// confidence onto an output kind.
    fn finish_directional(
        &self,
        transfer: &EnrichedTransfer,
        result: PhaseResult,
        supporting_evidence: Vec<String>,
    ) -> EngineOutcome {
        let direction = result
            .kind
            .direction()
            .expect("finish_directional requires a directional result");
        let (boost, boost_evidence) = behavior::compute_boosts(transfer, &self.registry, &self.config);
        let confidence = (result.confidence + boost).clamp(0.0, 1.0);

        let kind = if confidence >= self.config.high_confidence {
            match direction {
                Direction::Buy => ClassificationKind::Buy,
                Direction::Sell => ClassificationKind::Sell,
            }
        } else if confidence >= self.config.medium_confidence {
            match direction {
                Direction::Buy => ClassificationKind::ModerateBuy,
                Direction::Sell => ClassificationKind::ModerateSell,
            }
        } else {
            ClassificationKind::Transfer
        };

        let mut classification = Classification::new(kind, confidence);
        classification.evidence.extend(result.evidence);
        classification.evidence.extend(supporting_evidence);
        classification.evidence.extend(boost_evidence);
        classification.tags.extend(result.tags);
        classification.tags.extend(transfer.tags.clone());
        apply_alert_policy(&mut classification);
        EngineOutcome::Classified(classification)
    }

    fn phase_weight(&self, phase: &str) -> f64 {
        match phase {
            "cex" => self.config.cex_weight,
            "dex_protocol" => self.config.dex_weight,
            "chain_receipt" => self.config.chain_weight,
            "mega_whale" => self.config.mega_whale_weight,
            _ => self.config.behavior_weight,
        }
    }

    fn resolve_priority_conflict(&self, results: &[PhaseResult]) -> Option<ConflictResolution> {
        let cex = results.iter().find(|result| result.phase == "cex")?;
        let dex = results.iter().find(|result| result.phase == "dex_protocol")?;
        let cex_direction = cex.kind.direction()?;
        let dex_direction = dex.kind.direction()?;
        if cex_direction == dex_direction {
            return None;
        }
        if (cex.confidence - dex.confidence).abs() > CONFLICT_COMPARABLE_DELTA {
            return None;
        }
        let chain_direction = results
            .iter()
            .find(|result| result.phase == PHASE_CHAIN)
            .and_then(|result| result.kind.direction());
        Some(match chain_direction {
            Some(direction) => ConflictResolution::KeepDirection(direction),
            None => ConflictResolution::ForceTransfer,
        })
    }
}

enum ConflictResolution {
    KeepDirection(Direction),
    ForceTransfer,
}

fn apply_alert_policy(classification: &mut Classification) {
    if classification.tags.contains(TAG_SCAM_TOKEN) || classification.tags.contains(TAG_THIN_LIQUIDITY)
    {
        classification.should_alert = false;
    }
}

fn leading_direction(results: &[PhaseResult]) -> Option<Direction> {
    results
        .iter()
        .filter_map(|result| result.kind.direction().map(|direction| (direction, result.confidence)))
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(direction, _)| direction)
}

/// P3's own vote: a successfully decoded swap whose stable flow fixes
/// the direction.
fn verified_swap_vote(facts: &SwapFacts) -> Option<PhaseResult> {
    use whaleflow_enrichment::is_stablecoin;
    if !facts.decoded_swap() {
        return None;
    }
    let acquired_stable = facts.tokens_in.iter().all(|symbol| is_stablecoin(symbol));
    let disposed_stable = facts.tokens_out.iter().all(|symbol| is_stablecoin(symbol));
    if disposed_stable && !acquired_stable {
        return Some(
            PhaseResult::new(PHASE_CHAIN, ClassificationKind::Buy, 0.85)
                .with_evidence("Receipt-verified swap out of stables"),
        );
    }
    if acquired_stable && !disposed_stable {
        return Some(
            PhaseResult::new(PHASE_CHAIN, ClassificationKind::Sell, 0.85)
                .with_evidence("Receipt-verified swap into stables"),
        );
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::collections::BTreeSet;
    use whaleflow_core_types::{AddressLabel, Chain, LabelKind, RawTransfer};

    const BINANCE_HOT: &str = "0x28c6c06298d514db089934071355e5743bf21d60";
    const COINBASE_HOT: &str = "0x71660c4005ba85c37ccec55d0c4493e66fe775d3";

    fn label(address: &str, kind: LabelKind, entity: Option<&str>) -> AddressLabel {
        AddressLabel {
            address: address.to_string(),
            chain: Chain::Ethereum,
            kind,
            entity_name: entity.map(str::to_string),
            confidence: 0.95,
            updated_at: Utc::now(),
        }
    }

    fn engine() -> ClassificationEngine {
        ClassificationEngine::new(
            ClassificationConfig::default(),
            Arc::new(WhaleRegistry::new()),
            None,
            None,
            Arc::new(TokenBook::default()),
        )
    }

    fn transfer(
        from: AddressLabel,
        to: AddressLabel,
        symbol: &str,
        usd: f64,
        gas: Option<f64>,
    ) -> EnrichedTransfer {
        EnrichedTransfer {
            raw: RawTransfer {
                source_id: "test".to_string(),
                chain: Chain::Ethereum,
                tx_hash: "0xscenario".to_string(),
                log_index: Some(0),
                // 03:30 UTC, outside peak hours
                block_time: Utc.with_ymd_and_hms(2026, 3, 4, 3, 30, 0).unwrap(),
                from_addr: from.address.clone(),
                to_addr: to.address.clone(),
                token_addr: None,
                symbol: Some(symbol.to_string()),
                amount: 10.0,
                decimals: Some(18),
                native_value: None,
                gas_price_gwei: gas,
            },
            usd_value: usd,
            price_missing: usd == 0.0,
            from_label: Some(from),
            to_label: Some(to),
            token_age_days: None,
            token_risk: None,
            tags: BTreeSet::new(),
        }
    }

    fn expect_classified(outcome: EngineOutcome) -> Classification {
        match outcome {
            EngineOutcome::Classified(classification) => classification,
            EngineOutcome::Skip { reason } => panic!("unexpected skip: {reason}"),
        }
    }

    #[tokio::test]
    async fn cex_withdrawal_classifies_buy_at_base_confidence() {
        // Binance hot wallet -> fresh EOA, 50k USDC, calm gas
        let outcome = engine()
            .classify(&transfer(
                label(BINANCE_HOT, LabelKind::Cex, Some("binance")),
                label("0xabc123", LabelKind::Eoa, None),
                "USDC",
                50_000.0,
                Some(20.0),
            ))
            .await;
        let classification = expect_classified(outcome);
        assert_eq!(classification.kind, ClassificationKind::Buy);
        assert!((classification.confidence - 0.90).abs() < 1e-9);
        assert!(classification
            .evidence
            .iter()
            .any(|line| line.contains("CEX withdrawal from binance")));
    }

    #[tokio::test]
    async fn cex_deposit_with_urgent_gas_stacks_past_095() {
        // EOA -> Coinbase, $30k, 120 gwei
        let outcome = engine()
            .classify(&transfer(
                label("0xdef456", LabelKind::Eoa, None),
                label(COINBASE_HOT, LabelKind::Cex, Some("coinbase")),
                "ETH",
                30_000.0,
                Some(120.0),
            ))
            .await;
        let classification = expect_classified(outcome);
        assert_eq!(classification.kind, ClassificationKind::Sell);
        assert!(classification.confidence >= 0.95);
    }

    #[tokio::test]
    async fn internal_cex_move_is_skipped() {
        let outcome = engine()
            .classify(&transfer(
                label(BINANCE_HOT, LabelKind::Cex, Some("binance")),
                label("0x21a31ee1afc51d94c2efccaa2092ad1028285549", LabelKind::Cex, Some("binance")),
                "USDT",
                1_000_000.0,
                None,
            ))
            .await;
        assert!(matches!(outcome, EngineOutcome::Skip { .. }));
    }

    #[tokio::test]
    async fn unlabeled_wallets_fall_back_to_transfer() {
        let outcome = engine()
            .classify(&transfer(
                label("0xaaa", LabelKind::Unknown, None),
                label("0xbbb", LabelKind::Unknown, None),
                "WETH",
                5_000.0,
                None,
            ))
            .await;
        let classification = expect_classified(outcome);
        assert_eq!(classification.kind, ClassificationKind::Transfer);
        assert!(classification.confidence <= 0.60);
    }

    #[tokio::test]
    async fn moderate_band_via_usd_boost() {
        // Two concordant medium SELL signals below threshold, then the
        // USD boost lifts the result into the moderate band.
        let engine = engine();
        let low = transfer(
            label("0xaaa", LabelKind::Unknown, None),
            label("0xbbb", LabelKind::Unknown, None),
            "WETH",
            20_000.0,
            None,
        );
        let seed_votes = vec![
            PhaseResult::new("cex", ClassificationKind::Sell, 0.50),
            PhaseResult::new("dex_protocol", ClassificationKind::Sell, 0.45),
        ];
        let classification = expect_classified(engine.aggregate(&low, seed_votes.clone()));
        assert_eq!(classification.kind, ClassificationKind::Transfer);
        assert!(
            (classification.confidence - 0.46783).abs() < 1e-3,
            "stacked sell ~0.47, got {}",
            classification.confidence
        );

        let boosted = transfer(
            label("0xaaa", LabelKind::Unknown, None),
            label("0xbbb", LabelKind::Unknown, None),
            "WETH",
            150_000.0,
            None,
        );
        let classification = expect_classified(engine.aggregate(&boosted, seed_votes));
        assert_eq!(classification.kind, ClassificationKind::ModerateSell);
        assert!((0.60..0.80).contains(&classification.confidence));
    }

    #[tokio::test]
    async fn comparable_conflict_without_receipt_evidence_is_transfer() {
        let engine = engine();
        let event = transfer(
            label("0xaaa", LabelKind::Unknown, None),
            label("0xbbb", LabelKind::Unknown, None),
            "WETH",
            10_000.0,
            None,
        );
        let votes = vec![
            PhaseResult::new("cex", ClassificationKind::Buy, 0.65),
            PhaseResult::new("dex_protocol", ClassificationKind::Sell, 0.62),
        ];
        let classification = expect_classified(engine.aggregate(&event, votes));
        assert_eq!(classification.kind, ClassificationKind::Transfer);
    }

    #[tokio::test]
    async fn comparable_conflict_prefers_receipt_direction() {
        let engine = engine();
        let event = transfer(
            label("0xaaa", LabelKind::Unknown, None),
            label("0xbbb", LabelKind::Unknown, None),
            "WETH",
            10_000.0,
            None,
        );
        let votes = vec![
            PhaseResult::new("cex", ClassificationKind::Buy, 0.65),
            PhaseResult::new("dex_protocol", ClassificationKind::Sell, 0.62),
            PhaseResult::new(PHASE_CHAIN, ClassificationKind::Sell, 0.85),
        ];
        let classification = expect_classified(engine.aggregate(&event, votes));
        assert!(
            matches!(
                classification.kind,
                ClassificationKind::Sell | ClassificationKind::ModerateSell
            ),
            "receipt evidence decides: {:?}",
            classification.kind
        );
    }

    #[tokio::test]
    async fn scam_token_tag_disables_alert_but_keeps_kind() {
        let engine = engine();
        let mut event = transfer(
            label(BINANCE_HOT, LabelKind::Cex, Some("binance")),
            label("0xabc123", LabelKind::Eoa, None),
            "SCAMX",
            50_000.0,
            None,
        );
        event.tags.insert(TAG_SCAM_TOKEN.to_string());
        let classification = expect_classified(engine.classify(&event).await);
        assert_eq!(classification.kind, ClassificationKind::Buy);
        assert!(!classification.should_alert);
    }

    #[tokio::test]
    async fn failing_receipt_provider_never_blocks_classification() {
        struct FailingReceipts;
        impl crate::facts::ReceiptProvider for FailingReceipts {
            fn receipt<'a>(
                &'a self,
                _chain: Chain,
                _tx_hash: &'a str,
            ) -> crate::BoxFuture<'a, anyhow::Result<Option<serde_json::Value>>> {
                Box::pin(async { Err(anyhow::anyhow!("rpc unreachable")) })
            }
        }

        let engine = ClassificationEngine::new(
            ClassificationConfig::default(),
            Arc::new(WhaleRegistry::new()),
            Some(Arc::new(FailingReceipts)),
            None,
            Arc::new(TokenBook::default()),
        );
        let outcome = engine
            .classify(&transfer(
                label("0xaaa", LabelKind::Unknown, None),
                label("0xbbb", LabelKind::Unknown, None),
                "WETH",
                5_000.0,
                None,
            ))
            .await;
        let classification = expect_classified(outcome);
        assert_eq!(classification.kind, ClassificationKind::Transfer);
    }

    #[tokio::test]
    async fn missing_price_still_classifies() {
        let outcome = engine()
            .classify(&transfer(
                label(BINANCE_HOT, LabelKind::Cex, Some("binance")),
                label("0xabc123", LabelKind::Eoa, None),
                "NEWTOKEN",
                0.0,
                None,
            ))
            .await;
        let classification = expect_classified(outcome);
        assert_eq!(classification.kind, ClassificationKind::Buy);
        assert!((classification.confidence - 0.90).abs() < 1e-9, "no USD boost applied");
    }
}
