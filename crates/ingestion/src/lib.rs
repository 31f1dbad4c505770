pub mod evm;
mod normalize;
mod queue;
mod source;
mod sources;
mod telemetry;
mod watermarks;

use std::future::Future;
use std::pin::Pin;

pub use normalize::{normalize_transfer, SeenEvents};
pub use queue::{BoundedQueue, QueueOverflowPolicy, QueuePush};
pub use source::{SourceContext, TransferSource};
pub use sources::alert_feed::{AlertFeedSource, AlertTransport};
pub use sources::log_stream::{LogStreamSource, LogTransport};
pub use sources::receipt_poller::{ExplorerApi, ExplorerTransfer, ReceiptPollerSource};
pub use sources::rpc_parser::{decode_transfer_logs, RpcLogParserSource, TxHashFeed};
pub use sources::TokenBook;
pub use telemetry::SourceTelemetry;
pub use watermarks::{SourceWatermark, WatermarkFile};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
