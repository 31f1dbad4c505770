use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time;
use whaleflow_core_types::{
    EnrichedTransfer, RawTransfer, TAG_ENRICHMENT_TIMEOUT, TAG_PRICE_MISSING,
};

use crate::prices::PriceResolver;
use crate::provider::LabelProvider;

/// Enrichment stage: resolves both address labels and the USD value of
/// the transfer. Lookups run under one deadline; a timeout produces a
/// tagged record with whatever resolved, never an error.
pub struct EnrichmentService {
    labels: Arc<LabelProvider>,
    prices: Arc<PriceResolver>,
    deadline: Duration,
}

impl EnrichmentService {
    pub fn new(labels: Arc<LabelProvider>, prices: Arc<PriceResolver>, deadline: Duration) -> Self {
        Self {
            labels,
            prices,
            deadline,
        }
    }

    pub fn prices(&self) -> &Arc<PriceResolver> {
        &self.prices
    }

    pub async fn enrich(&self, raw: RawTransfer) -> EnrichedTransfer {
        let mut tags = BTreeSet::new();

        // Alert feeds report their own USD amount; fold that back into
        // the price cache so neighboring events get priced too.
        if let (Some(symbol), Some(native)) = (raw.symbol.as_deref(), raw.native_value) {
            if raw.amount > 0.0 {
                self.prices.observe(symbol, native / raw.amount, raw.block_time);
            }
        }

        let labels = time::timeout(self.deadline, async {
            let from = self.labels.lookup(&raw.from_addr, raw.chain).await;
            let to = self.labels.lookup(&raw.to_addr, raw.chain).await;
            (from, to)
        })
        .await;
        let (from_label, to_label) = match labels {
            Ok((from, to)) => (Some(from), Some(to)),
            Err(_) => {
                tags.insert(TAG_ENRICHMENT_TIMEOUT.to_string());
                (None, None)
            }
        };

        let usd_value = raw
            .symbol
            .as_deref()
            .and_then(|symbol| self.prices.usd_value(symbol, raw.amount, raw.block_time))
            .or(raw.native_value);
        let price_missing = usd_value.is_none();
        if price_missing {
            tags.insert(TAG_PRICE_MISSING.to_string());
        }

        EnrichedTransfer {
            raw,
            usd_value: usd_value.unwrap_or(0.0).max(0.0),
            price_missing,
            from_label,
            to_label,
            token_age_days: None,
            token_risk: None,
            tags,
        }
    }
}
