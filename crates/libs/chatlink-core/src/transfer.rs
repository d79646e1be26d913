use crate::error::CoreError;
use crate::ident::CorrelationId;
use crate::types::now_ms;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransferDirection {
    Upload,
    Download,
}

/// Live states only. Completion, failure, and cancel remove the session
/// instead of parking it in a terminal state, so a finished id can never
/// be suspended or resumed by a late caller.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransferState {
    Active,
    Suspended,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransferAction {
    Suspend,
    Resume,
    Cancel,
}

/// Opaque control capability of the byte-moving layer (an HTTP task, a
/// chunked socket stream). The controller only ever delegates to it; it
/// never inspects it.
pub trait TransferHandle: Send + Sync {
    fn suspend(&self) -> Result<(), CoreError>;
    fn resume(&self) -> Result<(), CoreError>;
    fn cancel(&self) -> Result<(), CoreError>;
}

#[derive(Clone, Debug, PartialEq)]
pub struct TransferProgress {
    pub id: CorrelationId,
    pub done: u64,
    pub total: Option<u64>,
}

pub type ProgressCallback = Arc<dyn Fn(TransferProgress) + Send + Sync>;

/// Content already present in the local cache; a download that resolves to
/// one of these never opens a transfer session.
#[derive(Clone, Debug, PartialEq)]
pub struct CachedContent {
    pub file_path: String,
    pub byte_len: u64,
}

#[derive(Debug, PartialEq)]
pub enum DownloadStart {
    /// Served from the local cache; no session was created.
    Cached(CachedContent),
    Started,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TransferSnapshot {
    pub direction: TransferDirection,
    pub state: TransferState,
    pub started_at_ms: u64,
}

struct TransferSession {
    direction: TransferDirection,
    state: TransferState,
    handle: Arc<dyn TransferHandle>,
    progress: Option<ProgressCallback>,
    started_at_ms: u64,
}

/// Table of in-flight uploads and downloads, keyed by the same correlation
/// id as the operation's registry entry and queue record. Handle and
/// progress callbacks are invoked after the table lock is released.
#[derive(Default)]
pub struct TransferController {
    sessions: Mutex<HashMap<CorrelationId, TransferSession>>,
}

impl TransferController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(
        &self,
        id: CorrelationId,
        direction: TransferDirection,
        handle: Arc<dyn TransferHandle>,
        progress: Option<ProgressCallback>,
    ) -> Result<(), CoreError> {
        let mut sessions = self.sessions.lock().expect("transfer table mutex poisoned");
        if sessions.contains_key(&id) {
            return Err(CoreError::duplicate_id(id.as_str()));
        }
        sessions.insert(
            id,
            TransferSession {
                direction,
                state: TransferState::Active,
                handle,
                progress,
                started_at_ms: now_ms(),
            },
        );
        Ok(())
    }

    /// Download entry point with the cache-first short circuit: content
    /// already local is returned directly and no session is opened.
    pub fn start_download(
        &self,
        id: CorrelationId,
        handle: Arc<dyn TransferHandle>,
        progress: Option<ProgressCallback>,
        cached: Option<CachedContent>,
    ) -> Result<DownloadStart, CoreError> {
        if let Some(content) = cached {
            log::debug!("download {id} served from cache ({} bytes)", content.byte_len);
            return Ok(DownloadStart::Cached(content));
        }
        self.start(id, TransferDirection::Download, handle, progress)?;
        Ok(DownloadStart::Started)
    }

    /// Returns whether a live session was affected. `Suspend`/`Resume` on
    /// an unknown id fail with `NotFound`; repeating the current state is a
    /// no-op. `Cancel` of an unknown or already-finished id succeeds as a
    /// no-op; cancel is idempotent everywhere.
    pub fn act(&self, id: &CorrelationId, action: TransferAction) -> Result<bool, CoreError> {
        let (handle, call) = {
            let mut sessions = self.sessions.lock().expect("transfer table mutex poisoned");
            match action {
                TransferAction::Cancel => match sessions.remove(id) {
                    Some(session) => (session.handle, TransferAction::Cancel),
                    None => {
                        log::debug!("cancel for transfer {id} found no live session");
                        return Ok(false);
                    }
                },
                TransferAction::Suspend | TransferAction::Resume => {
                    let session = sessions
                        .get_mut(id)
                        .ok_or_else(|| CoreError::not_found(id.as_str()))?;
                    let target = if action == TransferAction::Suspend {
                        TransferState::Suspended
                    } else {
                        TransferState::Active
                    };
                    if session.state == target {
                        return Ok(false);
                    }
                    session.state = target;
                    (session.handle.clone(), action)
                }
            }
        };

        match call {
            TransferAction::Suspend => handle.suspend()?,
            TransferAction::Resume => handle.resume()?,
            TransferAction::Cancel => {
                // The session is already gone; a transport-level cancel
                // failure leaves nothing to retry against.
                if let Err(error) = handle.cancel() {
                    log::warn!("transport cancel for transfer {id} failed: {error}");
                }
            }
        }
        Ok(true)
    }

    /// Invoked by the byte-moving layer. Progress for an unknown id is
    /// dropped; a cancel racing an in-flight chunk is normal.
    pub fn progress(&self, id: &CorrelationId, done: u64, total: Option<u64>) {
        let callback = {
            let sessions = self.sessions.lock().expect("transfer table mutex poisoned");
            match sessions.get(id) {
                Some(session) => session.progress.clone(),
                None => {
                    log::debug!("progress for unknown transfer {id} dropped");
                    return;
                }
            }
        };
        if let Some(callback) = callback {
            callback(TransferProgress {
                id: id.clone(),
                done,
                total,
            });
        }
    }

    /// Terminal removal on successful completion.
    pub fn complete(&self, id: &CorrelationId) -> bool {
        self.remove(id)
    }

    /// Terminal removal on I/O failure.
    pub fn fail(&self, id: &CorrelationId) -> bool {
        self.remove(id)
    }

    fn remove(&self, id: &CorrelationId) -> bool {
        self.sessions
            .lock()
            .expect("transfer table mutex poisoned")
            .remove(id)
            .is_some()
    }

    pub fn resolve(&self, id: &CorrelationId) -> Option<TransferSnapshot> {
        let sessions = self.sessions.lock().expect("transfer table mutex poisoned");
        sessions.get(id).map(|session| TransferSnapshot {
            direction: session.direction,
            state: session.state,
            started_at_ms: session.started_at_ms,
        })
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().expect("transfer table mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct RecordingHandle {
        calls: StdMutex<Vec<&'static str>>,
        fail_cancel: bool,
    }

    impl RecordingHandle {
        fn failing_cancel() -> Self {
            Self {
                calls: StdMutex::new(Vec::new()),
                fail_cancel: true,
            }
        }

        fn calls(&self) -> Vec<&'static str> {
            self.calls.lock().expect("calls mutex").clone()
        }
    }

    impl TransferHandle for RecordingHandle {
        fn suspend(&self) -> Result<(), CoreError> {
            self.calls.lock().expect("calls mutex").push("suspend");
            Ok(())
        }

        fn resume(&self) -> Result<(), CoreError> {
            self.calls.lock().expect("calls mutex").push("resume");
            Ok(())
        }

        fn cancel(&self) -> Result<(), CoreError> {
            self.calls.lock().expect("calls mutex").push("cancel");
            if self.fail_cancel {
                return Err(CoreError::transport_rejected("stream already torn down"));
            }
            Ok(())
        }
    }

    fn id(value: &str) -> CorrelationId {
        CorrelationId::from(value)
    }

    #[test]
    fn duplicate_start_is_rejected() {
        let controller = TransferController::new();
        let handle = Arc::new(RecordingHandle::default());
        controller
            .start(id("t-1"), TransferDirection::Upload, handle.clone(), None)
            .expect("first start");
        let err = controller
            .start(id("t-1"), TransferDirection::Upload, handle, None)
            .expect_err("second start must fail");
        assert_eq!(err, CoreError::duplicate_id("t-1"));
    }

    #[test]
    fn suspend_and_resume_flip_state_and_delegate_once() {
        let controller = TransferController::new();
        let handle = Arc::new(RecordingHandle::default());
        controller
            .start(id("t-1"), TransferDirection::Download, handle.clone(), None)
            .expect("start");

        assert!(controller.act(&id("t-1"), TransferAction::Suspend).expect("suspend"));
        assert_eq!(
            controller.resolve(&id("t-1")).expect("live").state,
            TransferState::Suspended
        );
        // repeating the current state is a no-op and does not touch the handle
        assert!(!controller.act(&id("t-1"), TransferAction::Suspend).expect("repeat"));
        assert!(controller.act(&id("t-1"), TransferAction::Resume).expect("resume"));
        assert_eq!(
            controller.resolve(&id("t-1")).expect("live").state,
            TransferState::Active
        );
        assert_eq!(handle.calls(), vec!["suspend", "resume"]);
    }

    #[test]
    fn suspend_of_unknown_id_is_not_found() {
        let controller = TransferController::new();
        let err = controller
            .act(&id("missing"), TransferAction::Suspend)
            .expect_err("must fail");
        assert_eq!(err, CoreError::not_found("missing"));
    }

    #[test]
    fn cancel_is_idempotent_and_survives_a_failing_handle() {
        let controller = TransferController::new();
        let handle = Arc::new(RecordingHandle::failing_cancel());
        controller
            .start(id("t-1"), TransferDirection::Upload, handle.clone(), None)
            .expect("start");

        assert!(controller.act(&id("t-1"), TransferAction::Cancel).expect("cancel"));
        assert!(controller.resolve(&id("t-1")).is_none());
        assert!(!controller.act(&id("t-1"), TransferAction::Cancel).expect("repeat cancel"));
        assert_eq!(handle.calls(), vec!["cancel"]);

        let err = controller
            .act(&id("t-1"), TransferAction::Suspend)
            .expect_err("canceled transfer cannot be suspended");
        assert_eq!(err, CoreError::not_found("t-1"));
    }

    #[test]
    fn cached_download_short_circuits_without_a_session() {
        let controller = TransferController::new();
        let handle = Arc::new(RecordingHandle::default());
        let cached = CachedContent {
            file_path: "/tmp/cache/abc".to_owned(),
            byte_len: 2048,
        };
        let start = controller
            .start_download(id("d-1"), handle.clone(), None, Some(cached.clone()))
            .expect("cached download");
        assert_eq!(start, DownloadStart::Cached(cached));
        assert!(controller.is_empty());
        assert!(handle.calls().is_empty());
    }

    #[test]
    fn progress_reaches_the_callback_and_stops_after_completion() {
        let controller = TransferController::new();
        let delivered = Arc::new(AtomicUsize::new(0));
        let counter = delivered.clone();
        let progress: ProgressCallback = Arc::new(move |update: TransferProgress| {
            assert_eq!(update.id, CorrelationId::from("t-1"));
            counter.fetch_add(1, Ordering::SeqCst);
        });
        controller
            .start(
                id("t-1"),
                TransferDirection::Upload,
                Arc::new(RecordingHandle::default()),
                Some(progress),
            )
            .expect("start");

        controller.progress(&id("t-1"), 10, Some(100));
        controller.progress(&id("t-1"), 50, Some(100));
        assert!(controller.complete(&id("t-1")));
        controller.progress(&id("t-1"), 100, Some(100));
        assert_eq!(delivered.load(Ordering::SeqCst), 2);
        assert!(!controller.complete(&id("t-1")), "completion is terminal");
    }
}
