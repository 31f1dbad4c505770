use anyhow::Result;
use whaleflow_core_types::{Chain, ClassificationKind, Direction};

use super::phase::{PhaseResult, PHASE_MEGA_WHALE};
use crate::BoxFuture;

/// Opt-in analytical backend flagging wallets with a long history of
/// outsized positions.
pub trait AnalyticsBackend: Send + Sync {
    fn is_mega_whale<'a>(&'a self, address: &'a str, chain: Chain) -> BoxFuture<'a, Result<bool>>;
}

/// Mega-whale signal: a pro-direction vote only. Without a leading
/// direction there is nothing to reinforce, so the phase stays silent.
pub(crate) async fn evaluate(
    backend: &dyn AnalyticsBackend,
    address: &str,
    chain: Chain,
    leading: Option<Direction>,
) -> Option<PhaseResult> {
    let leading = leading?;
    match backend.is_mega_whale(address, chain).await {
        Ok(true) => {
            let kind = match leading {
                Direction::Buy => ClassificationKind::Buy,
                Direction::Sell => ClassificationKind::Sell,
            };
            Some(
                PhaseResult::new(PHASE_MEGA_WHALE, kind, 0.50)
                    .with_evidence("Historical mega-whale wallet"),
            )
        }
        Ok(false) => None,
        Err(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Always(bool);

    impl AnalyticsBackend for Always {
        fn is_mega_whale<'a>(&'a self, _address: &'a str, _chain: Chain) -> BoxFuture<'a, Result<bool>> {
            let hit = self.0;
            Box::pin(async move { Ok(hit) })
        }
    }

    #[tokio::test]
    async fn reinforces_leading_direction_only() {
        let result = evaluate(&Always(true), "0xw", Chain::Ethereum, Some(Direction::Sell))
            .await
            .expect("vote");
        assert_eq!(result.kind, ClassificationKind::Sell);
        assert_eq!(result.confidence, 0.50);

        assert!(evaluate(&Always(true), "0xw", Chain::Ethereum, None).await.is_none());
        assert!(evaluate(&Always(false), "0xw", Chain::Ethereum, Some(Direction::Buy))
            .await
            .is_none());
    }
}
