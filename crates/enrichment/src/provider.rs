use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use reqwest::Client;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::time;
use tracing::{debug, warn};
use whaleflow_config::LabelConfig;
use whaleflow_core_types::{AddressLabel, Chain, LabelKind};

use crate::kind_inference::infer_kind;
use crate::label_cache::{CachedLookup, LabelCache};
use crate::rate_limit::TokenBucket;
use crate::static_registry::{embedded_labels, load_overlay};
use crate::BoxFuture;

/// Persistent registry the provider reads through and writes freshly
/// inferred labels back into. TTL is enforced here, not in the store.
pub trait LabelStore: Send + Sync {
    fn get_label(&self, address: &str, chain: Chain) -> Result<Option<AddressLabel>>;
    fn upsert_label(&self, label: &AddressLabel) -> Result<()>;
}

/// Remote explorer lookup returning the raw label string, if any.
pub trait RemoteLabelFetch: Send + Sync {
    fn fetch_label<'a>(&'a self, address: &'a str, chain: Chain)
        -> BoxFuture<'a, Result<Option<String>>>;
}

/// Address label resolution: embedded registry, striped TTL cache,
/// read-through store, then a rate-limited remote lookup. Never fails;
/// any error degrades to an UNKNOWN label.
pub struct LabelProvider {
    static_labels: HashMap<(Chain, String), AddressLabel>,
    cache: LabelCache,
    store: Option<Arc<dyn LabelStore>>,
    remote: Option<Arc<dyn RemoteLabelFetch>>,
    limiter: Option<Arc<TokenBucket>>,
    lookup_timeout: Duration,
    ttl: chrono::Duration,
}

impl LabelProvider {
    pub fn new(
        config: &LabelConfig,
        store: Option<Arc<dyn LabelStore>>,
        remote: Option<Arc<dyn RemoteLabelFetch>>,
    ) -> Result<Self> {
        let mut static_labels = HashMap::new();
        for label in embedded_labels() {
            static_labels.insert((label.chain, label.address.clone()), label);
        }
        if !config.overlay_path.trim().is_empty() {
            for label in load_overlay(Path::new(&config.overlay_path))? {
                let key = (label.chain, label.address.clone());
                match static_labels.get(&key) {
                    Some(existing) if existing.outranks(&label) => {}
                    _ => {
                        static_labels.insert(key, label);
                    }
                }
            }
        }

        Ok(Self {
            static_labels,
            cache: LabelCache::new(
                config.cache_capacity,
                Duration::from_secs(config.ttl_seconds.max(1)),
                Duration::from_secs(config.negative_ttl_seconds.max(1)),
            ),
            store,
            remote,
            limiter: TokenBucket::new(config.explorer_rps),
            lookup_timeout: Duration::from_millis(config.lookup_timeout_ms.max(100)),
            ttl: chrono::Duration::seconds(config.ttl_seconds.max(1) as i64),
        })
    }

    pub async fn lookup(&self, address: &str, chain: Chain) -> AddressLabel {
        let address = address.trim().to_ascii_lowercase();
        if address.is_empty() {
            return AddressLabel::unknown(&address, chain);
        }

        let mut best: Option<AddressLabel> = self
            .static_labels
            .get(&(chain, address.clone()))
            .cloned();

        match self.cache.get(chain, &address) {
            Some(CachedLookup::Hit(cached)) => {
                return match best {
                    Some(static_label) if static_label.outranks(&cached) => static_label,
                    _ => cached,
                };
            }
            Some(CachedLookup::Negative) => {
                return best.unwrap_or_else(|| AddressLabel::unknown(&address, chain));
            }
            None => {}
        }

        if let Some(store) = &self.store {
            match store.get_label(&address, chain) {
                Ok(Some(stored)) if Utc::now() - stored.updated_at < self.ttl => {
                    match &best {
                        Some(current) if current.outranks(&stored) => {}
                        _ => best = Some(stored),
                    }
                }
                Ok(_) => {}
                Err(error) => {
                    debug!(address = %address, %chain, %error, "label store read failed");
                }
            }
        }

        if let Some(label) = &best {
            if label.kind != LabelKind::Unknown {
                self.cache.insert(chain, &address, CachedLookup::Hit(label.clone()));
                return label.clone();
            }
        }

        if let Some(remote) = &self.remote {
            if let Some(limiter) = &self.limiter {
                limiter.acquire().await;
            }
            let fetched = time::timeout(self.lookup_timeout, remote.fetch_label(&address, chain)).await;
            match fetched {
                Ok(Ok(Some(raw_label))) => {
                    if let Some((kind, entity_name, confidence)) = infer_kind(&raw_label) {
                        let label = AddressLabel {
                            address: address.clone(),
                            chain,
                            kind,
                            entity_name,
                            confidence,
                            updated_at: Utc::now(),
                        };
                        if let Some(store) = &self.store {
                            if let Err(error) = store.upsert_label(&label) {
                                debug!(address = %address, %error, "label store write failed");
                            }
                        }
                        self.cache.insert(chain, &address, CachedLookup::Hit(label.clone()));
                        return label;
                    }
                    // Labeled contract with no recognizable category.
                    self.cache.insert(chain, &address, CachedLookup::Negative);
                }
                Ok(Ok(None)) => {
                    self.cache.insert(chain, &address, CachedLookup::Negative);
                }
                Ok(Err(error)) => {
                    warn!(address = %address, %chain, %error, "explorer label lookup failed");
                    self.cache.insert(chain, &address, CachedLookup::Negative);
                }
                Err(_) => {
                    warn!(address = %address, %chain, "explorer label lookup timed out");
                    self.cache.insert(chain, &address, CachedLookup::Negative);
                }
            }
        }

        best.unwrap_or_else(|| AddressLabel::unknown(&address, chain))
    }
}

/// Etherscan-style contract label lookup (`getsourcecode`).
pub struct ExplorerLabelClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl ExplorerLabelClient {
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed building explorer HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.to_string(),
            api_key: api_key.to_string(),
        })
    }

    async fn fetch(&self, address: &str, chain: Chain) -> Result<Option<String>> {
        if !chain.is_evm() {
            return Ok(None);
        }
        let response = self
            .client
            .get(&self.base_url)
            .query(&[
                ("module", "contract"),
                ("action", "getsourcecode"),
                ("address", address),
                ("apikey", self.api_key.as_str()),
            ])
            .send()
            .await
            .with_context(|| format!("explorer request failed for {address}"))?
            .error_for_status()
            .with_context(|| format!("explorer returned error status for {address}"))?
            .json::<Value>()
            .await
            .context("failed parsing explorer response body")?;

        if response.get("status").and_then(Value::as_str) != Some("1") {
            return Err(anyhow!(
                "explorer rejected label query: {}",
                response.get("message").and_then(Value::as_str).unwrap_or("unknown")
            ));
        }
        let name = response
            .get("result")
            .and_then(Value::as_array)
            .and_then(|rows| rows.first())
            .and_then(|row| row.get("ContractName"))
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(ToString::to_string);
        Ok(name)
    }
}

impl RemoteLabelFetch for ExplorerLabelClient {
    fn fetch_label<'a>(
        &'a self,
        address: &'a str,
        chain: Chain,
    ) -> BoxFuture<'a, Result<Option<String>>> {
        Box::pin(self.fetch(address, chain))
    }
}
