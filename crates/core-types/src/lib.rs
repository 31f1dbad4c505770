mod classify;
mod label;
mod record;
mod transfer;

pub use classify::{Classification, ClassificationKind, Direction};
pub use label::{AddressLabel, LabelKind};
pub use record::{AuditEvent, SuppressionEvent, WhaleRecord, WhaleStats};
pub use transfer::{Chain, EnrichedTransfer, RawTransfer};

/// Tag attached to enriched transfers whose USD value could not be
/// resolved within the staleness budget.
pub const TAG_PRICE_MISSING: &str = "price_missing";

/// Tag attached when a label or receipt lookup hit its deadline and the
/// event proceeded with partial data.
pub const TAG_ENRICHMENT_TIMEOUT: &str = "enrichment_timeout";

/// Tag set by upstream token intelligence; forces `should_alert = false`
/// without changing the classification kind.
pub const TAG_SCAM_TOKEN: &str = "scam_token";
