mod env_parsing;
mod loader;
mod schema;

pub use self::loader::{load_from_env_or_default, load_from_path};
pub use self::schema::{
    AppConfig, ClassificationConfig, DedupConfig, IngestionConfig, LabelConfig, PriceConfig,
    RegistryConfig, SqliteConfig, SupervisorConfig, SystemConfig,
};

/// Shard count for the perspective/dedup stage; the whale-registry
/// stripe count matches it so a wallet always lands on one lock.
pub const DEDUP_SHARDS: usize = 32;
pub const LABEL_CACHE_STRIPES: usize = 16;
