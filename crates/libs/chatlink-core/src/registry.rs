use crate::error::CoreError;
use crate::ident::CorrelationId;
use crate::types::{
    now_ms, AckCallback, AckNotice, AckPhase, InboundKind, OperationOutcome, ResultCallback,
};
use serde_json::Value as JsonValue;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Mutex;

const SHARD_COUNT: usize = 16;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PendingKind {
    /// One-shot call/response: the result callback fires exactly once and
    /// the entry is removed with it.
    Result,
    /// Ack-tracked send: up to three phase callbacks, monotonic
    /// `sent → delivered → seen`, entry removed at the terminal phase.
    SendAck,
}

/// A registered operation awaiting inbound events. Built with the
/// `with_*` methods; unset slots simply never fire.
pub struct PendingOperation {
    kind: PendingKind,
    result: Option<ResultCallback>,
    sent: Option<AckCallback>,
    delivered: Option<AckCallback>,
    seen: Option<AckCallback>,
    created_at_ms: u64,
}

impl PendingOperation {
    pub fn result(callback: ResultCallback) -> Self {
        Self {
            kind: PendingKind::Result,
            result: Some(callback),
            sent: None,
            delivered: None,
            seen: None,
            created_at_ms: now_ms(),
        }
    }

    pub fn send_ack() -> Self {
        Self {
            kind: PendingKind::SendAck,
            result: None,
            sent: None,
            delivered: None,
            seen: None,
            created_at_ms: now_ms(),
        }
    }

    /// Error channel for an ack-tracked send; a `Result`-kind operation
    /// already carries one.
    pub fn with_error_handler(mut self, callback: ResultCallback) -> Self {
        self.result = Some(callback);
        self
    }

    pub fn with_sent(mut self, callback: AckCallback) -> Self {
        self.sent = Some(callback);
        self
    }

    pub fn with_delivered(mut self, callback: AckCallback) -> Self {
        self.delivered = Some(callback);
        self
    }

    pub fn with_seen(mut self, callback: AckCallback) -> Self {
        self.seen = Some(callback);
        self
    }

    pub fn kind(&self) -> PendingKind {
        self.kind
    }
}

/// Non-destructive view of a live registry entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PendingSnapshot {
    pub kind: PendingKind,
    pub phase: AckPhase,
    pub created_at_ms: u64,
}

/// What `dispatch` did with an inbound event. The engine uses this to
/// decide when the durable queue record may be released.
#[derive(Clone, Debug, PartialEq)]
pub enum DispatchOutcome {
    /// Result-kind entry resolved and removed.
    Completed,
    /// Entry resolved through its error channel and removed.
    Failed,
    /// Ack phase advanced; `terminal` when the entry was removed with it.
    Advanced { phase: AckPhase, terminal: bool },
    /// Unknown id, stale phase, or kind mismatch; nothing fired.
    Ignored,
}

struct PendingEntry {
    op: PendingOperation,
    phase: AckPhase,
}

enum Planned {
    Complete(Option<ResultCallback>),
    Fail(Option<ResultCallback>, CoreError),
    Ack(Option<AckCallback>, AckPhase, bool),
}

/// Concurrent map from correlation id to pending operation. Sharded so
/// unrelated ids never serialize behind one lock; callbacks are always
/// invoked after the shard lock is released, so a callback may start a new
/// send (or cancel) without deadlocking. Taking the one-shot callback slot
/// under the lock is what makes double-fire impossible.
pub struct CallbackRegistry {
    shards: [Mutex<HashMap<CorrelationId, PendingEntry>>; SHARD_COUNT],
}

impl Default for CallbackRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self {
            shards: std::array::from_fn(|_| Mutex::new(HashMap::new())),
        }
    }

    fn shard(&self, id: &CorrelationId) -> &Mutex<HashMap<CorrelationId, PendingEntry>> {
        let mut hasher = DefaultHasher::new();
        id.hash(&mut hasher);
        &self.shards[hasher.finish() as usize % SHARD_COUNT]
    }

    /// Fails with `DuplicateId` when the id is already live. Given unique
    /// id generation this indicates a logic error, not a retryable race.
    pub fn register(&self, id: CorrelationId, op: PendingOperation) -> Result<(), CoreError> {
        let mut shard = self.shard(&id).lock().expect("registry shard mutex poisoned");
        if shard.contains_key(&id) {
            return Err(CoreError::duplicate_id(id.as_str()));
        }
        shard.insert(
            id,
            PendingEntry {
                op,
                phase: AckPhase::Pending,
            },
        );
        Ok(())
    }

    pub fn resolve(&self, id: &CorrelationId) -> Option<PendingSnapshot> {
        let shard = self.shard(id).lock().expect("registry shard mutex poisoned");
        shard.get(id).map(|entry| PendingSnapshot {
            kind: entry.op.kind,
            phase: entry.phase,
            created_at_ms: entry.op.created_at_ms,
        })
    }

    /// Routes one inbound event. Events for ids that are no longer live are
    /// dropped silently; a duplicate delivery notice racing local cleanup
    /// is normal operation, not an error.
    pub fn dispatch(
        &self,
        id: &CorrelationId,
        kind: InboundKind,
        payload: JsonValue,
    ) -> DispatchOutcome {
        let planned = {
            let mut shard = self.shard(id).lock().expect("registry shard mutex poisoned");
            let Some(entry) = shard.get_mut(id) else {
                log::debug!("dropping {kind:?} event for unknown id {id}");
                return DispatchOutcome::Ignored;
            };
            match kind {
                InboundKind::Error => {
                    let mut entry = shard.remove(id).expect("entry present under lock");
                    Planned::Fail(
                        entry.op.result.take(),
                        CoreError::remote(error_message(&payload)),
                    )
                }
                InboundKind::Result => match entry.op.kind {
                    PendingKind::Result => {
                        let mut entry = shard.remove(id).expect("entry present under lock");
                        Planned::Complete(entry.op.result.take())
                    }
                    PendingKind::SendAck => {
                        log::debug!("dropping result event for ack-tracked id {id}");
                        return DispatchOutcome::Ignored;
                    }
                },
                InboundKind::Sent | InboundKind::Delivered | InboundKind::Seen => {
                    let phase = kind.phase().expect("ack kinds map to a phase");
                    if entry.op.kind != PendingKind::SendAck {
                        log::debug!("dropping {} event for result-kind id {id}", phase.as_str());
                        return DispatchOutcome::Ignored;
                    }
                    if !entry.phase.advances_to(phase) {
                        log::debug!(
                            "dropping non-advancing {} event for id {id} at phase {}",
                            phase.as_str(),
                            entry.phase.as_str()
                        );
                        return DispatchOutcome::Ignored;
                    }
                    entry.phase = phase;
                    let callback = match phase {
                        AckPhase::Sent => entry.op.sent.take(),
                        AckPhase::Delivered => entry.op.delivered.take(),
                        AckPhase::Seen => entry.op.seen.take(),
                        AckPhase::Pending => None,
                    };
                    let terminal = phase == AckPhase::Seen;
                    if terminal {
                        shard.remove(id);
                    }
                    Planned::Ack(callback, phase, terminal)
                }
            }
        };

        match planned {
            Planned::Complete(callback) => {
                if let Some(callback) = callback {
                    callback(OperationOutcome::Completed { payload });
                }
                DispatchOutcome::Completed
            }
            Planned::Fail(callback, error) => {
                if let Some(callback) = callback {
                    callback(OperationOutcome::Failed { error });
                }
                DispatchOutcome::Failed
            }
            Planned::Ack(callback, phase, terminal) => {
                if let Some(callback) = callback {
                    callback(AckNotice {
                        id: id.clone(),
                        phase,
                        payload,
                    });
                }
                DispatchOutcome::Advanced { phase, terminal }
            }
        }
    }

    /// Resolves a live entry through its error channel and removes it.
    /// Returns `false` when the id was not live.
    pub fn fail(&self, id: &CorrelationId, error: CoreError) -> bool {
        let removed = {
            let mut shard = self.shard(id).lock().expect("registry shard mutex poisoned");
            shard.remove(id)
        };
        match removed {
            Some(mut entry) => {
                if let Some(callback) = entry.op.result.take() {
                    callback(OperationOutcome::Failed { error });
                }
                true
            }
            None => false,
        }
    }

    /// Removes an entry without invoking any callback. Canceling an absent
    /// or already-completed id is a no-op, tolerating the race between
    /// user-initiated cancellation and a just-arrived terminal event.
    pub fn cancel(&self, id: &CorrelationId) -> bool {
        let removed = {
            let mut shard = self.shard(id).lock().expect("registry shard mutex poisoned");
            shard.remove(id)
        };
        if removed.is_none() {
            log::debug!("cancel for id {id} found no live entry");
        }
        removed.is_some()
    }

    pub fn len(&self) -> usize {
        self.shards
            .iter()
            .map(|shard| shard.lock().expect("registry shard mutex poisoned").len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn error_message(payload: &JsonValue) -> String {
    match payload {
        JsonValue::String(message) => message.clone(),
        JsonValue::Null => "unspecified server error".to_owned(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    fn id(value: &str) -> CorrelationId {
        CorrelationId::from(value)
    }

    #[test]
    fn result_callback_fires_exactly_once_despite_duplicates() {
        let registry = CallbackRegistry::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        registry
            .register(
                id("r-1"),
                PendingOperation::result(Box::new(move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                })),
            )
            .expect("register");

        assert_eq!(
            registry.dispatch(&id("r-1"), InboundKind::Result, json!({"ok": true})),
            DispatchOutcome::Completed
        );
        for _ in 0..5 {
            assert_eq!(
                registry.dispatch(&id("r-1"), InboundKind::Result, json!({"ok": true})),
                DispatchOutcome::Ignored
            );
        }
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn register_rejects_duplicate_id() {
        let registry = CallbackRegistry::new();
        registry
            .register(id("dup"), PendingOperation::send_ack())
            .expect("first register");
        let err = registry
            .register(id("dup"), PendingOperation::send_ack())
            .expect_err("second register must fail");
        assert_eq!(err, CoreError::duplicate_id("dup"));
    }

    #[test]
    fn phases_advance_in_order_and_fire_each_slot_once() {
        let registry = CallbackRegistry::new();
        let seen_phases = Arc::new(Mutex::new(Vec::new()));
        let op = {
            let log = seen_phases.clone();
            let sent_log = log.clone();
            let delivered_log = log.clone();
            PendingOperation::send_ack()
                .with_sent(Box::new(move |notice| {
                    sent_log.lock().expect("log mutex").push(notice.phase);
                }))
                .with_delivered(Box::new(move |notice| {
                    delivered_log.lock().expect("log mutex").push(notice.phase);
                }))
                .with_seen(Box::new(move |notice| {
                    log.lock().expect("log mutex").push(notice.phase);
                }))
        };
        registry.register(id("a-1"), op).expect("register");

        assert_eq!(
            registry.dispatch(&id("a-1"), InboundKind::Sent, JsonValue::Null),
            DispatchOutcome::Advanced {
                phase: AckPhase::Sent,
                terminal: false
            }
        );
        // duplicate sent is dropped
        assert_eq!(
            registry.dispatch(&id("a-1"), InboundKind::Sent, JsonValue::Null),
            DispatchOutcome::Ignored
        );
        assert_eq!(
            registry.dispatch(&id("a-1"), InboundKind::Delivered, JsonValue::Null),
            DispatchOutcome::Advanced {
                phase: AckPhase::Delivered,
                terminal: false
            }
        );
        assert_eq!(
            registry.dispatch(&id("a-1"), InboundKind::Seen, JsonValue::Null),
            DispatchOutcome::Advanced {
                phase: AckPhase::Seen,
                terminal: true
            }
        );
        assert_eq!(
            *seen_phases.lock().expect("log mutex"),
            vec![AckPhase::Sent, AckPhase::Delivered, AckPhase::Seen]
        );
        assert!(registry.is_empty());
    }

    #[test]
    fn out_of_order_phases_only_fire_the_furthest() {
        let registry = CallbackRegistry::new();
        let fired = Arc::new(Mutex::new(Vec::new()));
        let op = {
            let sent_log = fired.clone();
            let delivered_log = fired.clone();
            let seen_log = fired.clone();
            PendingOperation::send_ack()
                .with_sent(Box::new(move |notice| {
                    sent_log.lock().expect("log mutex").push(notice.phase);
                }))
                .with_delivered(Box::new(move |notice| {
                    delivered_log.lock().expect("log mutex").push(notice.phase);
                }))
                .with_seen(Box::new(move |notice| {
                    seen_log.lock().expect("log mutex").push(notice.phase);
                }))
        };
        registry.register(id("ooo"), op).expect("register");

        assert_eq!(
            registry.dispatch(&id("ooo"), InboundKind::Seen, JsonValue::Null),
            DispatchOutcome::Advanced {
                phase: AckPhase::Seen,
                terminal: true
            }
        );
        assert_eq!(
            registry.dispatch(&id("ooo"), InboundKind::Sent, JsonValue::Null),
            DispatchOutcome::Ignored
        );
        assert_eq!(
            registry.dispatch(&id("ooo"), InboundKind::Delivered, JsonValue::Null),
            DispatchOutcome::Ignored
        );
        assert_eq!(*fired.lock().expect("log mutex"), vec![AckPhase::Seen]);
    }

    #[test]
    fn error_event_resolves_error_channel_and_removes_entry() {
        let registry = CallbackRegistry::new();
        let outcome = Arc::new(Mutex::new(None));
        let slot = outcome.clone();
        let op = PendingOperation::send_ack().with_error_handler(Box::new(move |result| {
            *slot.lock().expect("outcome mutex") = Some(result);
        }));
        registry.register(id("e-1"), op).expect("register");

        assert_eq!(
            registry.dispatch(&id("e-1"), InboundKind::Error, json!("thread is closed")),
            DispatchOutcome::Failed
        );
        assert!(registry.is_empty());
        let observed = outcome.lock().expect("outcome mutex").take().expect("outcome set");
        assert_eq!(
            observed,
            OperationOutcome::Failed {
                error: CoreError::remote("thread is closed")
            }
        );
    }

    #[test]
    fn cancel_is_idempotent_and_silent() {
        let registry = CallbackRegistry::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        registry
            .register(
                id("c-1"),
                PendingOperation::result(Box::new(move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                })),
            )
            .expect("register");

        assert!(registry.cancel(&id("c-1")));
        assert!(!registry.cancel(&id("c-1")));
        assert!(!registry.cancel(&id("never-registered")));
        assert_eq!(
            registry.dispatch(&id("c-1"), InboundKind::Result, JsonValue::Null),
            DispatchOutcome::Ignored
        );
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn resolve_is_non_destructive() {
        let registry = CallbackRegistry::new();
        registry
            .register(id("s-1"), PendingOperation::send_ack())
            .expect("register");
        registry.dispatch(&id("s-1"), InboundKind::Sent, JsonValue::Null);

        let snapshot = registry.resolve(&id("s-1")).expect("entry still live");
        assert_eq!(snapshot.kind, PendingKind::SendAck);
        assert_eq!(snapshot.phase, AckPhase::Sent);
        assert!(registry.resolve(&id("s-1")).is_some(), "resolve must not remove");
        assert!(registry.resolve(&id("missing")).is_none());
    }

    #[test]
    fn independent_ids_do_not_interfere() {
        let registry = Arc::new(CallbackRegistry::new());
        let fired = Arc::new(AtomicUsize::new(0));
        for index in 0..100 {
            let counter = fired.clone();
            registry
                .register(
                    id(&format!("id-{index}")),
                    PendingOperation::result(Box::new(move |_| {
                        counter.fetch_add(1, Ordering::SeqCst);
                    })),
                )
                .expect("register");
        }

        let mut workers = Vec::new();
        for worker in 0..4 {
            let registry = registry.clone();
            workers.push(std::thread::spawn(move || {
                for index in (worker..100).step_by(4) {
                    registry.dispatch(
                        &id(&format!("id-{index}")),
                        InboundKind::Result,
                        JsonValue::Null,
                    );
                }
            }));
        }
        for worker in workers {
            worker.join().expect("worker thread");
        }
        assert_eq!(fired.load(Ordering::SeqCst), 100);
        assert!(registry.is_empty());
    }
}
