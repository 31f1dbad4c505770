use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use whaleflow_core_types::{AddressLabel, Chain};

use whaleflow_config::LABEL_CACHE_STRIPES;

#[derive(Debug, Clone)]
pub(crate) enum CachedLookup {
    Hit(AddressLabel),
    /// Failed remote lookup held briefly to stop a thundering herd.
    Negative,
}

#[derive(Debug)]
struct Entry {
    lookup: CachedLookup,
    cached_at: Instant,
}

#[derive(Debug, Default)]
struct Stripe {
    map: HashMap<(Chain, String), Entry>,
    order: VecDeque<((Chain, String), Instant)>,
}

/// Striped TTL cache over label lookups. Insertion order doubles as the
/// eviction queue; stale re-inserts are detected by comparing the stored
/// timestamp before removal.
#[derive(Debug)]
pub(crate) struct LabelCache {
    stripes: Vec<Mutex<Stripe>>,
    capacity_per_stripe: usize,
    ttl: Duration,
    negative_ttl: Duration,
}

impl LabelCache {
    pub(crate) fn new(capacity: usize, ttl: Duration, negative_ttl: Duration) -> Self {
        let stripes = (0..LABEL_CACHE_STRIPES)
            .map(|_| Mutex::new(Stripe::default()))
            .collect();
        Self {
            stripes,
            capacity_per_stripe: (capacity / LABEL_CACHE_STRIPES).max(1),
            ttl,
            negative_ttl,
        }
    }

    fn stripe_for(&self, chain: Chain, address: &str) -> &Mutex<Stripe> {
        let mut hasher = DefaultHasher::new();
        chain.as_str().hash(&mut hasher);
        address.hash(&mut hasher);
        &self.stripes[(hasher.finish() as usize) % self.stripes.len()]
    }

    fn ttl_for(&self, lookup: &CachedLookup) -> Duration {
        match lookup {
            CachedLookup::Hit(_) => self.ttl,
            CachedLookup::Negative => self.negative_ttl,
        }
    }

    pub(crate) fn get(&self, chain: Chain, address: &str) -> Option<CachedLookup> {
        let stripe = self.stripe_for(chain, address);
        let guard = stripe.lock().unwrap_or_else(|poison| poison.into_inner());
        let entry = guard.map.get(&(chain, address.to_string()))?;
        if entry.cached_at.elapsed() >= self.ttl_for(&entry.lookup) {
            return None;
        }
        Some(entry.lookup.clone())
    }

    pub(crate) fn insert(&self, chain: Chain, address: &str, lookup: CachedLookup) {
        let key = (chain, address.to_string());
        let stripe = self.stripe_for(chain, address);
        let mut guard = stripe.lock().unwrap_or_else(|poison| poison.into_inner());
        let now = Instant::now();
        guard.map.insert(
            key.clone(),
            Entry {
                lookup,
                cached_at: now,
            },
        );
        guard.order.push_back((key, now));
        self.prune(&mut guard, now);
    }

    fn prune(&self, stripe: &mut Stripe, now: Instant) {
        while let Some((key, inserted_at)) = stripe.order.front() {
            let expired = stripe
                .map
                .get(key)
                .map(|entry| now.duration_since(entry.cached_at) >= self.ttl_for(&entry.lookup))
                .unwrap_or(true);
            let over_capacity = stripe.order.len() > self.capacity_per_stripe;
            if !expired && !over_capacity {
                break;
            }
            let inserted_at = *inserted_at;
            let (key, _) = stripe.order.pop_front().expect("front exists");
            if stripe
                .map
                .get(&key)
                .is_some_and(|entry| entry.cached_at == inserted_at)
            {
                stripe.map.remove(&key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use whaleflow_core_types::LabelKind;

    fn label(address: &str) -> AddressLabel {
        AddressLabel {
            address: address.to_string(),
            chain: Chain::Ethereum,
            kind: LabelKind::Cex,
            entity_name: Some("binance".to_string()),
            confidence: 0.95,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn insert_then_get_round_trips() {
        let cache = LabelCache::new(1_000, Duration::from_secs(60), Duration::from_secs(1));
        cache.insert(Chain::Ethereum, "0xabc", CachedLookup::Hit(label("0xabc")));
        match cache.get(Chain::Ethereum, "0xabc") {
            Some(CachedLookup::Hit(hit)) => assert_eq!(hit.address, "0xabc"),
            other => panic!("expected hit, got {other:?}"),
        }
        assert!(cache.get(Chain::Polygon, "0xabc").is_none());
    }

    #[test]
    fn negative_entries_expire_first() {
        let cache = LabelCache::new(1_000, Duration::from_secs(60), Duration::ZERO);
        cache.insert(Chain::Ethereum, "0xdead", CachedLookup::Negative);
        assert!(cache.get(Chain::Ethereum, "0xdead").is_none());
    }

    #[test]
    fn capacity_evicts_oldest() {
        // capacity 16 -> one slot per stripe
        let cache = LabelCache::new(16, Duration::from_secs(60), Duration::from_secs(60));
        for index in 0..200 {
            let address = format!("0x{index:040x}");
            cache.insert(Chain::Ethereum, &address, CachedLookup::Hit(label(&address)));
        }
        let live: usize = cache
            .stripes
            .iter()
            .map(|stripe| stripe.lock().unwrap().map.len())
            .sum();
        assert!(live <= 2 * LABEL_CACHE_STRIPES, "live entries: {live}");
    }
}
