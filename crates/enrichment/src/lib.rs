mod kind_inference;
mod label_cache;
mod prices;
mod provider;
mod rate_limit;
mod service;
mod static_registry;

use std::future::Future;
use std::pin::Pin;

pub use kind_inference::infer_kind;
pub use prices::PriceResolver;
pub use provider::{ExplorerLabelClient, LabelProvider, LabelStore, RemoteLabelFetch};
pub use rate_limit::TokenBucket;
pub use service::EnrichmentService;
pub use static_registry::{embedded_labels, load_overlay};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Symbols pinned to $1.00 regardless of feed state.
pub const STABLECOINS: [&str; 8] = [
    "USDC", "USDT", "DAI", "BUSD", "TUSD", "FRAX", "USDP", "GUSD",
];

pub fn is_stablecoin(symbol: &str) -> bool {
    let upper = symbol.trim().to_ascii_uppercase();
    STABLECOINS.iter().any(|stable| *stable == upper)
}
