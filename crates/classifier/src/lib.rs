mod aggregate;
mod engine;
mod facts;
mod perspective;
mod phases;

use std::future::Future;
use std::pin::Pin;

pub use aggregate::{stacked_confidence, DirectionalVote};
pub use engine::{ClassificationEngine, EngineOutcome, TAG_THIN_LIQUIDITY};
pub use facts::{LiquidityOp, ReceiptProvider, SwapFacts};
pub use perspective::{perspectivize, PerspectiveAction, PerspectiveView};
pub use phases::mega_whale::AnalyticsBackend;
pub use phases::phase::{PhaseOutcome, PhaseResult};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
