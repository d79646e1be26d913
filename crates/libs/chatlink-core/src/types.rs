use crate::error::CoreError;
use crate::ident::CorrelationId;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ThreadId(pub i64);

/// Delivery phase of an ack-tracked send. Phases only ever advance;
/// duplicate or out-of-order server notices are filtered out by the
/// registry, not re-delivered.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AckPhase {
    Pending,
    Sent,
    Delivered,
    Seen,
}

impl AckPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Seen => "seen",
        }
    }

    /// Whether moving to `next` is forward progress from this phase.
    pub fn advances_to(self, next: AckPhase) -> bool {
        next > self
    }
}

/// Event kinds the transport boundary can deliver for a correlation id.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InboundKind {
    Result,
    Sent,
    Delivered,
    Seen,
    Error,
}

impl InboundKind {
    /// The ack phase this event represents, if it is part of the
    /// send-acknowledgment family.
    pub fn phase(self) -> Option<AckPhase> {
        match self {
            Self::Sent => Some(AckPhase::Sent),
            Self::Delivered => Some(AckPhase::Delivered),
            Self::Seen => Some(AckPhase::Seen),
            Self::Result | Self::Error => None,
        }
    }
}

/// Terminal outcome delivered to a result callback: the server's response
/// payload, or the error that ended the operation (synchronous transport
/// rejection, server-side error event).
#[derive(Clone, Debug, PartialEq)]
pub enum OperationOutcome {
    Completed { payload: JsonValue },
    Failed { error: CoreError },
}

/// One delivery-phase notification for an ack-tracked send.
#[derive(Clone, Debug, PartialEq)]
pub struct AckNotice {
    pub id: CorrelationId,
    pub phase: AckPhase,
    pub payload: JsonValue,
}

pub type ResultCallback = Box<dyn FnOnce(OperationOutcome) + Send>;
pub type AckCallback = Box<dyn FnOnce(AckNotice) + Send>;

/// Outbound operation bodies that survive a crash: recorded in the durable
/// queue before the first transmission attempt and removed only on
/// confirmed success or explicit cancel. Field sets carry everything needed
/// to reconstruct and resend the original request.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DurableBody {
    Text(TextMessageBody),
    Edit(EditMessageBody),
    Forward(ForwardMessageBody),
    File(FileMessageBody),
    UploadImage(UploadImageBody),
    UploadFile(UploadFileBody),
}

impl DurableBody {
    pub fn kind(&self) -> RecordKind {
        match self {
            Self::Text(_) => RecordKind::Text,
            Self::Edit(_) => RecordKind::Edit,
            Self::Forward(_) => RecordKind::Forward,
            Self::File(_) => RecordKind::File,
            Self::UploadImage(_) => RecordKind::UploadImage,
            Self::UploadFile(_) => RecordKind::UploadFile,
        }
    }

    pub fn thread(&self) -> ThreadId {
        match self {
            Self::Text(body) => body.thread,
            Self::Edit(body) => body.thread,
            Self::Forward(body) => body.thread,
            Self::File(body) => body.thread,
            Self::UploadImage(body) => body.thread,
            Self::UploadFile(body) => body.thread,
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Text,
    Edit,
    Forward,
    File,
    UploadImage,
    UploadFile,
}

impl RecordKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Edit => "edit",
            Self::Forward => "forward",
            Self::File => "file",
            Self::UploadImage => "upload_image",
            Self::UploadFile => "upload_file",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TextMessageBody {
    pub thread: ThreadId,
    pub content: String,
    pub replied_to: Option<i64>,
    pub metadata: Option<JsonValue>,
    pub type_code: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct EditMessageBody {
    pub thread: ThreadId,
    pub message_id: i64,
    pub content: String,
    pub metadata: Option<JsonValue>,
    pub type_code: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ForwardMessageBody {
    pub thread: ThreadId,
    pub message_ids: Vec<i64>,
    pub metadata: Option<JsonValue>,
    pub type_code: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct FileMessageBody {
    pub thread: ThreadId,
    pub caption: Option<String>,
    pub file_name: String,
    pub mime_type: String,
    pub byte_len: u64,
    pub file_hash: Option<String>,
    pub replied_to: Option<i64>,
    pub metadata: Option<JsonValue>,
    pub type_code: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct UploadImageBody {
    pub thread: ThreadId,
    pub file_name: String,
    pub mime_type: String,
    #[serde(with = "serde_bytes")]
    pub bytes: Vec<u8>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct UploadFileBody {
    pub thread: ThreadId,
    pub file_name: String,
    pub mime_type: String,
    #[serde(with = "serde_bytes")]
    pub bytes: Vec<u8>,
}

/// Non-durable call/response operation (contact, thread, participant, role
/// calls and the rest of the operation catalog). Shaping the payload is the
/// caller's concern; the core only correlates it.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ControlBody {
    pub operation: String,
    pub payload: JsonValue,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum OutboundBody {
    Durable(DurableBody),
    Control(ControlBody),
}

impl OutboundBody {
    pub fn durable_part(&self) -> Option<&DurableBody> {
        match self {
            Self::Durable(body) => Some(body),
            Self::Control(_) => None,
        }
    }
}

/// One outbound operation handed to the dispatch engine. A caller-supplied
/// id makes the send an idempotent retry of an earlier attempt.
#[derive(Clone, Debug, PartialEq)]
pub struct OutboundRequest {
    pub id: Option<CorrelationId>,
    pub body: OutboundBody,
}

impl OutboundRequest {
    pub fn new(body: OutboundBody) -> Self {
        Self { id: None, body }
    }

    pub fn with_id(mut self, id: CorrelationId) -> Self {
        self.id = Some(id);
        self
    }
}

/// Whether the queue record for a send reached durable storage before the
/// transport handoff. `Degraded` means the at-least-once guarantee is
/// weakened to in-memory only for this operation.
#[derive(Clone, Debug, PartialEq)]
pub enum Durability {
    Durable,
    Volatile,
    Degraded { error: CoreError },
}

/// Immediate return of `DispatchEngine::send`; every later outcome arrives
/// through the registered callbacks.
#[derive(Clone, Debug, PartialEq)]
pub struct SendTicket {
    pub id: CorrelationId,
    pub durability: Durability,
}

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}
