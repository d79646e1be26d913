use crate::error::CoreError;
use crate::ident::{CorrelationId, IdGenerator};
use crate::queue::{QueueRecord, QueueStore};
use crate::registry::{CallbackRegistry, DispatchOutcome, PendingOperation, PendingSnapshot};
use crate::transfer::{
    CachedContent, DownloadStart, ProgressCallback, TransferAction, TransferController,
    TransferDirection, TransferHandle, TransferSnapshot,
};
use crate::transport::Transport;
use crate::types::{
    AckPhase, Durability, InboundKind, OutboundBody, OutboundRequest, RecordKind, SendTicket,
    ThreadId,
};
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::sync::Arc;

#[derive(Serialize)]
struct WireEnvelope<'a> {
    id: &'a CorrelationId,
    body: &'a OutboundBody,
}

/// Unsent work for one thread, partitioned by record kind. Each list keeps
/// queue insertion order, oldest first.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct UnconfirmedOps {
    pub text: Vec<QueueRecord>,
    pub edit: Vec<QueueRecord>,
    pub forward: Vec<QueueRecord>,
    pub file: Vec<QueueRecord>,
    pub upload_image: Vec<QueueRecord>,
    pub upload_file: Vec<QueueRecord>,
}

impl UnconfirmedOps {
    pub fn total(&self) -> usize {
        self.text.len()
            + self.edit.len()
            + self.forward.len()
            + self.file.len()
            + self.upload_image.len()
            + self.upload_file.len()
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

/// Orchestrates one connection's worth of outbound operations: allocates
/// correlation ids, persists durable work before the transport sees it,
/// registers callbacks, and routes inbound events back to them. All state
/// is instance-owned; two engines never share anything.
pub struct DispatchEngine<T: Transport, S: QueueStore> {
    transport: T,
    store: S,
    ids: IdGenerator,
    registry: CallbackRegistry,
    transfers: TransferController,
}

impl<T: Transport, S: QueueStore> DispatchEngine<T, S> {
    pub fn new(transport: T, store: S) -> Self {
        Self {
            transport,
            store,
            ids: IdGenerator,
            registry: CallbackRegistry::new(),
            transfers: TransferController::new(),
        }
    }

    /// Sends one operation. Never blocks on the network: the returned
    /// ticket carries the id and the durability actually achieved, and
    /// every later outcome arrives through the operation's callbacks.
    ///
    /// Durable bodies are written to the queue store before the transport
    /// handoff. A failing store degrades the ticket instead of aborting the
    /// send; a synchronous transport rejection resolves the operation's
    /// error channel immediately and keeps the queue record for a later
    /// retry.
    pub fn send(
        &self,
        request: OutboundRequest,
        op: PendingOperation,
    ) -> Result<SendTicket, CoreError> {
        let id = request.id.clone().unwrap_or_else(|| self.ids.new_id());

        // Registration comes first so a duplicate caller-supplied id fails
        // before the store is touched; enqueue is idempotent by id and a
        // rollback would otherwise purge the original send's record.
        self.registry.register(id.clone(), op)?;

        let durability = match request.body.durable_part() {
            Some(durable) => {
                let record = QueueRecord::new(id.clone(), durable.clone());
                match self.store.enqueue(&record) {
                    Ok(()) => Durability::Durable,
                    Err(error) => {
                        log::warn!("queue write for {id} failed, send degraded: {error}");
                        Durability::Degraded { error }
                    }
                }
            }
            None => Durability::Volatile,
        };

        let envelope = WireEnvelope {
            id: &id,
            body: &request.body,
        };
        let payload = match serde_json::to_vec(&envelope) {
            Ok(payload) => payload,
            Err(error) => {
                self.registry.cancel(&id);
                self.release_record(&id);
                return Err(CoreError::Serialization {
                    message: error.to_string(),
                });
            }
        };

        if let Err(error) = self.transport.send(&id, &payload) {
            log::debug!("transport rejected {id}: {error}");
            self.registry.fail(&id, error);
        }

        Ok(SendTicket { id, durability })
    }

    /// Entry point for everything the connection layer receives. Queue
    /// records are released on terminal success and on reaching
    /// `Delivered`; `Sent` only means the server accepted the bytes, so
    /// the record stays. Inbound errors resolve callbacks but keep the
    /// record as user-visible unconfirmed work.
    pub fn on_inbound_event(
        &self,
        id: &CorrelationId,
        kind: InboundKind,
        payload: JsonValue,
    ) -> DispatchOutcome {
        let outcome = self.registry.dispatch(id, kind, payload);
        match outcome {
            DispatchOutcome::Completed => self.release_record(id),
            DispatchOutcome::Advanced { phase, .. } if phase >= AckPhase::Delivered => {
                self.release_record(id)
            }
            _ => {}
        }
        outcome
    }

    /// Abandons a pending operation: registry entry and queue record are
    /// both removed, no callback fires. Safe to repeat.
    pub fn cancel(&self, id: &CorrelationId) -> bool {
        let registered = self.registry.cancel(id);
        let queued = match self.store.dequeue(id) {
            Ok(removed) => removed,
            Err(error) => {
                log::warn!("queue removal for canceled {id} failed: {error}");
                false
            }
        };
        registered || queued
    }

    pub fn pending(&self, id: &CorrelationId) -> Option<PendingSnapshot> {
        self.registry.resolve(id)
    }

    pub fn list_unconfirmed(&self, thread: ThreadId) -> Result<UnconfirmedOps, CoreError> {
        let mut ops = UnconfirmedOps::default();
        for record in self.store.list_by_thread(thread)? {
            match record.kind() {
                RecordKind::Text => ops.text.push(record),
                RecordKind::Edit => ops.edit.push(record),
                RecordKind::Forward => ops.forward.push(record),
                RecordKind::File => ops.file.push(record),
                RecordKind::UploadImage => ops.upload_image.push(record),
                RecordKind::UploadFile => ops.upload_file.push(record),
            }
        }
        Ok(ops)
    }

    pub fn start_upload(
        &self,
        id: CorrelationId,
        handle: Arc<dyn TransferHandle>,
        progress: Option<ProgressCallback>,
    ) -> Result<(), CoreError> {
        self.transfers
            .start(id, TransferDirection::Upload, handle, progress)
    }

    pub fn start_download(
        &self,
        id: CorrelationId,
        handle: Arc<dyn TransferHandle>,
        progress: Option<ProgressCallback>,
        cached: Option<CachedContent>,
    ) -> Result<DownloadStart, CoreError> {
        self.transfers.start_download(id, handle, progress, cached)
    }

    /// Suspend/resume delegate to the transfer's control handle. Cancel
    /// additionally removes the operation's registry entry and queue
    /// record, so one call retires the id everywhere it lives.
    pub fn act_on_transfer(
        &self,
        id: &CorrelationId,
        action: TransferAction,
    ) -> Result<bool, CoreError> {
        let affected = self.transfers.act(id, action)?;
        if action == TransferAction::Cancel {
            self.registry.cancel(id);
            if let Err(error) = self.store.dequeue(id) {
                log::warn!(
                    "queue removal for canceled transfer {id} failed, record left for reconcile: {error}"
                );
            }
        }
        Ok(affected)
    }

    pub fn transfer_progress(&self, id: &CorrelationId, done: u64, total: Option<u64>) {
        self.transfers.progress(id, done, total);
    }

    pub fn complete_transfer(&self, id: &CorrelationId) -> bool {
        self.transfers.complete(id)
    }

    pub fn fail_transfer(&self, id: &CorrelationId) -> bool {
        self.transfers.fail(id)
    }

    pub fn transfer(&self, id: &CorrelationId) -> Option<TransferSnapshot> {
        self.transfers.resolve(id)
    }

    fn release_record(&self, id: &CorrelationId) {
        if let Err(error) = self.store.dequeue(id) {
            log::warn!("queue removal for {id} failed, record left for reconcile: {error}");
        }
    }
}
