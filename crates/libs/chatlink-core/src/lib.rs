mod engine;
mod error;
mod ident;
mod queue;
mod registry;
mod transfer;
mod transport;
pub mod types;

pub use engine::{DispatchEngine, UnconfirmedOps};
pub use error::CoreError;
pub use ident::{CorrelationId, IdGenerator};
pub use queue::{MemoryQueueStore, QueueRecord, QueueStore};
pub use registry::{
    CallbackRegistry, DispatchOutcome, PendingKind, PendingOperation, PendingSnapshot,
};
pub use transfer::{
    CachedContent, DownloadStart, ProgressCallback, TransferAction, TransferController,
    TransferDirection, TransferHandle, TransferProgress, TransferSnapshot, TransferState,
};
pub use transport::Transport;
pub use types::{
    AckCallback, AckNotice, AckPhase, ControlBody, DurableBody, Durability, EditMessageBody,
    FileMessageBody, ForwardMessageBody, InboundKind, OperationOutcome, OutboundBody,
    OutboundRequest, RecordKind, ResultCallback, SendTicket, TextMessageBody, ThreadId,
    UploadFileBody, UploadImageBody,
};
