//! Request/response correlation for the shared worker pipe.
//!
//! Every caller goes through [`RequestCorrelator::submit`]. Calls are keyed by
//! the content digest of `(method, argument)`; while a call for a key is in
//! flight, further callers for the same key attach as extra waiters instead
//! of sending a second command. Replies are matched purely by key, so the
//! worker may answer in any order.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, Mutex as TokioMutex};

use super::ipc_types::{CorrelationKey, WorkerCommand, WorkerMethod};
use crate::web::error::WorkerError;
use crate::{sys_debug, sys_error, sys_warn};

/// Shared reference to the correlator.
pub type SharedCorrelator = Arc<RequestCorrelator>;

type Waiter = oneshot::Sender<Result<String, WorkerError>>;

/// A command that has been sent and not answered yet.
///
/// Presence in the registry means "pending"; resolution removes the entry
/// and notifies every waiter in one step.
struct PendingCall {
    command: WorkerCommand,
    waiters: Vec<Waiter>,
}

pub struct RequestCorrelator {
    /// Registry of in-flight calls. The lock is held across the
    /// check/register/send sequence so a key is never sent twice.
    pending: TokioMutex<HashMap<CorrelationKey, PendingCall>>,
    /// Commands for the stdin writer task.
    cmd_tx: mpsc::UnboundedSender<WorkerCommand>,
    broken: AtomicBool,
    timeout: Option<Duration>,
}

impl RequestCorrelator {
    pub fn new(cmd_tx: mpsc::UnboundedSender<WorkerCommand>, timeout: Option<Duration>) -> Self {
        Self {
            pending: TokioMutex::new(HashMap::new()),
            cmd_tx,
            broken: AtomicBool::new(false),
            timeout,
        }
    }

    /// Run `method argument` on the worker and wait for its result.
    pub async fn submit(&self, method: WorkerMethod, argument: &str) -> Result<String, WorkerError> {
        let command = WorkerCommand::new(method, argument)?;
        let key = command.key();
        let rx = self.register(command).await?;

        let Some(after) = self.timeout else {
            return receive(rx).await;
        };

        let outcome = tokio::time::timeout(after, receive(rx)).await;
        match outcome {
            Ok(result) => result,
            Err(_) => {
                self.abandon(&key).await;
                sys_warn!("[CORRELATOR] {method} {argument} timed out after {after:?}");
                Err(WorkerError::Timeout {
                    method: method.to_string(),
                    argument: argument.to_string(),
                    after,
                })
            }
        }
    }

    /// Attach to the in-flight call for this key, or register a new one and
    /// send its command.
    async fn register(
        &self,
        command: WorkerCommand,
    ) -> Result<oneshot::Receiver<Result<String, WorkerError>>, WorkerError> {
        let key = command.key();
        let (tx, rx) = oneshot::channel();

        let mut pending = self.pending.lock().await;
        if self.is_broken() {
            return Err(WorkerError::Unavailable);
        }

        if let Some(call) = pending.get_mut(&key) {
            call.waiters.push(tx);
            sys_debug!(
                "[CORRELATOR] Coalesced {} {} ({} waiters)",
                command.method,
                command.argument,
                call.waiters.len()
            );
            return Ok(rx);
        }

        self.forward(command.clone())?;
        sys_debug!("[CORRELATOR] Sent {} {}", command.method, command.argument);
        pending.insert(
            key,
            PendingCall {
                command,
                waiters: vec![tx],
            },
        );
        Ok(rx)
    }

    /// Hand a command to the stdin writer task.
    fn forward(&self, command: WorkerCommand) -> Result<(), WorkerError> {
        self.cmd_tx
            .send(command)
            .map_err(|_| WorkerError::Unavailable)
    }

    /// Drop waiters whose callers stopped listening. A call nobody waits for
    /// any more is forgotten so the next request sends a fresh command; a
    /// late reply for it then takes the stale path in [`resolve`](Self::resolve).
    async fn abandon(&self, key: &CorrelationKey) {
        let mut pending = self.pending.lock().await;
        if let Some(call) = pending.get_mut(key) {
            call.waiters.retain(|w| !w.is_closed());
            if call.waiters.is_empty() {
                pending.remove(key);
            }
        }
    }

    /// Deliver a worker result to every waiter registered under `key`.
    ///
    /// Returns the number of waiters notified; 0 means the reply was stale or
    /// duplicated and has been discarded.
    pub async fn resolve(&self, key: &CorrelationKey, result: &str) -> usize {
        let call = self.pending.lock().await.remove(key);
        let Some(call) = call else {
            sys_debug!("[CORRELATOR] No pending call for key {key}, discarding reply");
            return 0;
        };

        let mut delivered = 0;
        for waiter in call.waiters {
            if waiter.send(Ok(result.to_string())).is_ok() {
                delivered += 1;
            }
        }
        sys_debug!(
            "[CORRELATOR] Resolved {} {} for {delivered} waiter(s)",
            call.command.method,
            call.command.argument
        );
        delivered
    }

    /// The worker is gone: fail everything pending and refuse new calls.
    pub async fn mark_broken(&self) {
        if self.broken.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut pending = self.pending.lock().await;
        sys_error!(
            "[CORRELATOR] Worker unavailable, failing {} pending call(s)",
            pending.len()
        );
        for (_, call) in pending.drain() {
            for waiter in call.waiters {
                let _ = waiter.send(Err(WorkerError::Unavailable));
            }
        }
    }

    pub fn is_broken(&self) -> bool {
        self.broken.load(Ordering::SeqCst)
    }

    /// Number of distinct in-flight calls.
    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Number of callers waiting on the call for `key` (0 if none is pending).
    pub async fn waiter_count(&self, key: &CorrelationKey) -> usize {
        self.pending
            .lock()
            .await
            .get(key)
            .map_or(0, |call| call.waiters.len())
    }
}

async fn receive(rx: oneshot::Receiver<Result<String, WorkerError>>) -> Result<String, WorkerError> {
    match rx.await {
        Ok(outcome) => outcome,
        // Sender dropped without an answer: registry torn down.
        Err(_) => Err(WorkerError::Unavailable),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn correlator(
        timeout: Option<Duration>,
    ) -> (SharedCorrelator, mpsc::UnboundedReceiver<WorkerCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(RequestCorrelator::new(tx, timeout)), rx)
    }

    async fn wait_for_waiters(c: &RequestCorrelator, key: &CorrelationKey, n: usize) {
        while c.waiter_count(key).await < n {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_concurrent_identical_calls_share_one_command() {
        let (c, mut cmd_rx) = correlator(None);
        let key = CorrelationKey::new("classify", "X");

        let first = tokio::spawn({
            let c = c.clone();
            async move { c.submit(WorkerMethod::Classify, "X").await }
        });
        let second = tokio::spawn({
            let c = c.clone();
            async move { c.submit(WorkerMethod::Classify, "X").await }
        });

        let sent = cmd_rx.recv().await.unwrap();
        assert_eq!(sent.to_line(), "classify X\n");
        wait_for_waiters(&c, &key, 2).await;
        assert!(cmd_rx.try_recv().is_err(), "second command must not be sent");

        assert_eq!(c.resolve(&key, r#"{"COVID-19":0.5}"#).await, 2);
        assert_eq!(first.await.unwrap().unwrap(), r#"{"COVID-19":0.5}"#);
        assert_eq!(second.await.unwrap().unwrap(), r#"{"COVID-19":0.5}"#);
        assert_eq!(c.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_resolving_one_key_leaves_others_pending() {
        let (c, mut cmd_rx) = correlator(None);
        let key_a = CorrelationKey::new("classify", "A");
        let key_b = CorrelationKey::new("explain_lime", "B");

        let a = tokio::spawn({
            let c = c.clone();
            async move { c.submit(WorkerMethod::Classify, "A").await }
        });
        let b = tokio::spawn({
            let c = c.clone();
            async move { c.submit(WorkerMethod::ExplainLime, "B").await }
        });
        cmd_rx.recv().await.unwrap();
        cmd_rx.recv().await.unwrap();

        // Out of submission order.
        assert_eq!(c.resolve(&key_b, "lime_B.png").await, 1);
        assert_eq!(b.await.unwrap().unwrap(), "lime_B.png");
        assert_eq!(c.waiter_count(&key_a).await, 1);
        assert!(!a.is_finished());

        c.resolve(&key_a, "{}").await;
        assert_eq!(a.await.unwrap().unwrap(), "{}");
    }

    #[tokio::test]
    async fn test_stale_reply_is_discarded() {
        let (c, _cmd_rx) = correlator(None);
        let key = CorrelationKey::new("classify", "nobody");
        assert_eq!(c.resolve(&key, "{}").await, 0);
        assert_eq!(c.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_new_call_after_resolution_sends_again() {
        let (c, mut cmd_rx) = correlator(None);
        let key = CorrelationKey::new("classify", "R");

        let first = tokio::spawn({
            let c = c.clone();
            async move { c.submit(WorkerMethod::Classify, "R").await }
        });
        cmd_rx.recv().await.unwrap();
        wait_for_waiters(&c, &key, 1).await;
        c.resolve(&key, "1").await;
        assert_eq!(first.await.unwrap().unwrap(), "1");

        let second = tokio::spawn({
            let c = c.clone();
            async move { c.submit(WorkerMethod::Classify, "R").await }
        });
        assert_eq!(cmd_rx.recv().await.unwrap().argument, "R");
        wait_for_waiters(&c, &key, 1).await;
        c.resolve(&key, "2").await;
        assert_eq!(second.await.unwrap().unwrap(), "2");
    }

    #[tokio::test]
    async fn test_timeout_abandons_call_and_late_reply_is_dropped() {
        let (c, mut cmd_rx) = correlator(Some(Duration::from_millis(50)));
        let key = CorrelationKey::new("explain_gradcam", "slow");

        let err = c.submit(WorkerMethod::ExplainGradcam, "slow").await.unwrap_err();
        assert!(matches!(err, WorkerError::Timeout { .. }));
        assert_eq!(c.pending_count().await, 0);
        assert_eq!(c.resolve(&key, "late.png").await, 0);

        // The next request re-issues the command.
        cmd_rx.recv().await.unwrap();
        let retry = tokio::spawn({
            let c = c.clone();
            async move { c.submit(WorkerMethod::ExplainGradcam, "slow").await }
        });
        assert_eq!(cmd_rx.recv().await.unwrap().argument, "slow");
        wait_for_waiters(&c, &key, 1).await;
        c.resolve(&key, "gradcam.png").await;
        assert_eq!(retry.await.unwrap().unwrap(), "gradcam.png");
    }

    #[tokio::test]
    async fn test_broken_worker_fails_pending_and_future_calls() {
        let (c, mut cmd_rx) = correlator(None);
        let key = CorrelationKey::new("classify", "P");

        let waiting = tokio::spawn({
            let c = c.clone();
            async move { c.submit(WorkerMethod::Classify, "P").await }
        });
        cmd_rx.recv().await.unwrap();
        wait_for_waiters(&c, &key, 1).await;

        c.mark_broken().await;
        assert!(matches!(
            waiting.await.unwrap(),
            Err(WorkerError::Unavailable)
        ));
        assert!(matches!(
            c.submit(WorkerMethod::Classify, "Q").await,
            Err(WorkerError::Unavailable)
        ));
        assert!(cmd_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_closed_command_channel_is_unavailable() {
        let (c, cmd_rx) = correlator(None);
        drop(cmd_rx);
        assert!(matches!(
            c.submit(WorkerMethod::Classify, "Z").await,
            Err(WorkerError::Unavailable)
        ));
        assert_eq!(c.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_invalid_argument_never_reaches_worker() {
        let (c, mut cmd_rx) = correlator(None);
        assert!(matches!(
            c.submit(WorkerMethod::Classify, "a b").await,
            Err(WorkerError::InvalidCommand(_))
        ));
        assert!(cmd_rx.try_recv().is_err());
    }
}
