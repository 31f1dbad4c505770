use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Mutex;

use crate::is_stablecoin;

#[derive(Debug, Clone, Copy)]
struct ObservedPrice {
    usd_per_unit: f64,
    observed_at: DateTime<Utc>,
}

/// Last-observed price cache with a staleness budget. Stablecoins are
/// answered from a fixed table; everything else must have been observed
/// within the budget or the caller proceeds with `usd_value = 0` and the
/// `price_missing` tag.
#[derive(Debug)]
pub struct PriceResolver {
    staleness: Duration,
    cache: Mutex<HashMap<String, ObservedPrice>>,
}

impl PriceResolver {
    pub fn new(staleness_seconds: u64) -> Self {
        Self {
            staleness: Duration::seconds(staleness_seconds.max(1) as i64),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Record a source-reported price (alert feeds carry USD amounts).
    pub fn observe(&self, symbol: &str, usd_per_unit: f64, at: DateTime<Utc>) {
        if !usd_per_unit.is_finite() || usd_per_unit <= 0.0 {
            return;
        }
        let key = symbol.trim().to_ascii_uppercase();
        if key.is_empty() {
            return;
        }
        let mut guard = self.cache.lock().unwrap_or_else(|poison| poison.into_inner());
        let entry = guard.entry(key).or_insert(ObservedPrice {
            usd_per_unit,
            observed_at: at,
        });
        if at >= entry.observed_at {
            *entry = ObservedPrice {
                usd_per_unit,
                observed_at: at,
            };
        }
    }

    pub fn price(&self, symbol: &str, at: DateTime<Utc>) -> Option<f64> {
        let key = symbol.trim().to_ascii_uppercase();
        if key.is_empty() {
            return None;
        }
        if is_stablecoin(&key) {
            return Some(1.0);
        }
        let guard = self.cache.lock().unwrap_or_else(|poison| poison.into_inner());
        let entry = guard.get(&key)?;
        if (at - entry.observed_at).abs() > self.staleness {
            return None;
        }
        Some(entry.usd_per_unit)
    }

    pub fn usd_value(&self, symbol: &str, amount: f64, at: DateTime<Utc>) -> Option<f64> {
        self.price(symbol, at)
            .map(|price| (price * amount).max(0.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stablecoins_are_pinned_to_one() {
        let resolver = PriceResolver::new(120);
        let now = Utc::now();
        for symbol in ["USDC", "usdt", "Dai", "FRAX"] {
            assert_eq!(resolver.price(symbol, now), Some(1.0), "{symbol}");
        }
    }

    #[test]
    fn observed_price_applies_within_staleness_budget() {
        let resolver = PriceResolver::new(120);
        let now = Utc::now();
        resolver.observe("WETH", 3_000.0, now);
        assert_eq!(resolver.price("weth", now + Duration::seconds(60)), Some(3_000.0));
        assert_eq!(resolver.usd_value("WETH", 2.0, now), Some(6_000.0));
    }

    #[test]
    fn stale_price_returns_none() {
        let resolver = PriceResolver::new(120);
        let now = Utc::now();
        resolver.observe("WETH", 3_000.0, now);
        assert_eq!(resolver.price("WETH", now + Duration::seconds(121)), None);
    }

    #[test]
    fn newer_observation_wins() {
        let resolver = PriceResolver::new(120);
        let now = Utc::now();
        resolver.observe("LINK", 20.0, now);
        resolver.observe("LINK", 21.0, now + Duration::seconds(5));
        // an out-of-order older report does not clobber the newer one
        resolver.observe("LINK", 19.0, now - Duration::seconds(5));
        assert_eq!(resolver.price("LINK", now + Duration::seconds(10)), Some(21.0));
    }

    #[test]
    fn junk_observations_are_ignored()  {
        let resolver = PriceResolver::new(120);
        let now = Utc::now();
        resolver.observe("PEPE", f64::NAN, now);
        resolver.observe("PEPE", -1.0, now);
        resolver.observe("", 5.0, now);
        assert_eq!(resolver.price("PEPE", now), None);
    }
}
