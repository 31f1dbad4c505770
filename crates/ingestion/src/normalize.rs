use anyhow::{anyhow, Result};
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};
use whaleflow_core_types::{Chain, RawTransfer};

/// Canonicalize a decoded transfer at the ingestion edge. Sources that
/// could not decode a field leave it empty; this only rejects events
/// that cannot be identified or routed at all.
pub fn normalize_transfer(mut transfer: RawTransfer) -> Result<RawTransfer> {
    transfer.tx_hash = transfer.tx_hash.trim().to_string();
    if transfer.tx_hash.is_empty() {
        return Err(anyhow!("missing transaction hash"));
    }
    transfer.from_addr = transfer.from_addr.trim().to_ascii_lowercase();
    transfer.to_addr = transfer.to_addr.trim().to_ascii_lowercase();
    if transfer.from_addr.is_empty() && transfer.to_addr.is_empty() {
        return Err(anyhow!("missing both endpoint addresses"));
    }
    transfer.token_addr = transfer
        .token_addr
        .map(|addr| addr.trim().to_ascii_lowercase())
        .filter(|addr| !addr.is_empty());
    transfer.symbol = transfer
        .symbol
        .map(|symbol| symbol.trim().to_ascii_uppercase())
        .filter(|symbol| !symbol.is_empty());
    if !transfer.amount.is_finite() || transfer.amount < 0.0 {
        return Err(anyhow!("invalid amount: {}", transfer.amount));
    }
    Ok(transfer)
}

#[derive(Debug)]
struct SeenEntry {
    key: (Chain, String, u32),
    seen_at: Instant,
}

/// Raw-identity dedup at the fan-in edge: the same `(chain, tx_hash,
/// log_index)` reported by two sources is dropped here, long before the
/// near-duplicate suppressor sees it. Bounded by count and TTL.
#[derive(Debug)]
pub struct SeenEvents {
    map: HashMap<(Chain, String, u32), Instant>,
    order: VecDeque<SeenEntry>,
    limit: usize,
    ttl: Duration,
}

impl SeenEvents {
    pub fn new(limit: usize, ttl: Duration) -> Self {
        Self {
            map: HashMap::new(),
            order: VecDeque::new(),
            limit: limit.max(1),
            ttl,
        }
    }

    /// Returns true the first time a raw identity is seen.
    pub fn insert(&mut self, transfer: &RawTransfer) -> bool {
        let (chain, hash, log_index) = transfer.raw_key();
        let key = (chain, hash.to_string(), log_index);
        let now = Instant::now();
        self.prune(now);
        if self
            .map
            .get(&key)
            .is_some_and(|seen_at| now.duration_since(*seen_at) < self.ttl)
        {
            return false;
        }
        self.map.insert(key.clone(), now);
        self.order.push_back(SeenEntry { key, seen_at: now });
        true
    }

    fn prune(&mut self, now: Instant) {
        while let Some(front) = self.order.front() {
            let expired = now.duration_since(front.seen_at) >= self.ttl;
            let over_capacity = self.order.len() > self.limit;
            if !expired && !over_capacity {
                break;
            }
            if let Some(removed) = self.order.pop_front() {
                if self
                    .map
                    .get(&removed.key)
                    .is_some_and(|seen_at| *seen_at == removed.seen_at)
                {
                    self.map.remove(&removed.key);
                }
            }
        }
    }
}
