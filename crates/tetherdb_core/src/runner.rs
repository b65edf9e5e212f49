//! Transaction runner: the keep-alive loop over one short-lived
//! transaction.

use crate::completion::Completion;
use crate::config::RunnerConfig;
use crate::error::{CoreError, CoreResult};
use crate::types::TransactionId;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;
use std::thread;
use std::time::Instant;
use tetherdb_store::{StoreError, TransactionHandle};
use tetherdb_value::Value;

/// A caller-submitted operation, invoked on the runner thread with the
/// live transaction handle.
pub type Operation = Box<dyn FnOnce(&dyn TransactionHandle) + Send>;

/// Observer of runner-initiated events.
///
/// Called with `(aborted, error)`: `(false, None)` for an idle warning,
/// `(true, Some(error))` when the runner aborted itself (idle ttl
/// exceeded, or a failed keep-alive probe).
pub type IdleObserver = Arc<dyn Fn(bool, Option<&CoreError>) + Send + Sync>;

/// Owns one short-lived transaction handle and keeps it alive
/// indefinitely by issuing filler probe reads, while draining
/// caller-submitted operations in FIFO order.
///
/// State machine: `Active (idle timer) -> {Committing -> Committed |
/// Aborting -> Aborted}`. `active` is one-shot: once the runner leaves
/// the active state it never returns, and `active` and `aborted` are
/// never both set.
///
/// The handle lives on a dedicated keep-alive thread; the caller side
/// holds only the shared mailbox. Each loop turn (1) evaluates the idle
/// policy, (2) drains and executes every queued operation, (3) issues a
/// no-op read against the probe store so the underlying engine's
/// inactivity clock resets, and (4) loops while still active, or
/// performs a final drain and finalizes once commit or abort has been
/// requested. A failed probe outside an abort is fatal: logged and
/// converted into a forced abort.
pub struct TransactionRunner {
    id: TransactionId,
    shared: Arc<RunnerShared>,
}

struct RunnerShared {
    state: Mutex<RunnerState>,
    wake: Condvar,
}

struct RunnerState {
    active: bool,
    aborted: bool,
    queue: VecDeque<Operation>,
    idle_since: Option<Instant>,
    idle_warning_sent: bool,
    finish: Option<Finish>,
}

enum Finish {
    Commit(Completion<()>),
    Abort(Completion<()>),
    IdleAbort,
}

impl TransactionRunner {
    /// Starts a runner over a live transaction handle.
    ///
    /// `probe_store` names one object store reachable within the handle;
    /// it is used purely as the keep-alive probe target. The keep-alive
    /// loop starts immediately.
    pub fn new(
        handle: Box<dyn TransactionHandle>,
        probe_store: impl Into<String>,
        config: RunnerConfig,
        observer: Option<IdleObserver>,
    ) -> Self {
        let id = TransactionId::next();
        let shared = Arc::new(RunnerShared {
            state: Mutex::new(RunnerState {
                active: true,
                aborted: false,
                queue: VecDeque::new(),
                idle_since: None,
                idle_warning_sent: false,
                finish: None,
            }),
            wake: Condvar::new(),
        });

        let loop_shared = Arc::clone(&shared);
        let probe_store = probe_store.into();
        thread::spawn(move || {
            keep_alive_loop(id, handle, &probe_store, &config, &observer, &loop_shared);
        });

        Self { id, shared }
    }

    /// Returns this runner's transaction ID.
    #[must_use]
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// Whether the runner still accepts work.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.shared.state.lock().active
    }

    /// Whether the runner has been aborted (explicitly or by itself).
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.shared.state.lock().aborted
    }

    /// Appends an operation to the mailbox.
    ///
    /// The operation is invoked later, on the runner thread, with the
    /// live transaction handle. Operations execute in FIFO order
    /// relative to each other but may interleave with keep-alive probes.
    ///
    /// # Errors
    ///
    /// Fails with `InvalidState` once the runner is aborted or no longer
    /// active.
    pub fn queue_operation(&self, op: Operation) -> CoreResult<()> {
        let mut state = self.shared.state.lock();
        if !state.active || state.aborted {
            return Err(CoreError::invalid_state("runner is no longer active"));
        }
        state.queue.push_back(op);
        self.shared.wake.notify_one();
        Ok(())
    }

    /// Requests a commit.
    ///
    /// Marks the runner inactive; every operation queued strictly before
    /// this call is drained against the handle before the underlying
    /// commit is issued. The returned completion resolves with the
    /// handle's own close signal.
    ///
    /// # Errors
    ///
    /// Fails with `InvalidState` if the runner is aborted or no longer
    /// active.
    pub fn commit(&self) -> CoreResult<Completion<()>> {
        let mut state = self.shared.state.lock();
        if !state.active || state.aborted {
            return Err(CoreError::invalid_state(
                "cannot commit: runner is no longer active",
            ));
        }
        state.active = false;
        let completion = Completion::new();
        state.finish = Some(Finish::Commit(completion.clone()));
        self.shared.wake.notify_one();
        Ok(completion)
    }

    /// Requests an abort.
    ///
    /// Marks the runner aborted and inactive. The returned completion is
    /// guaranteed to fail: with an `Aborted` error on the expected path,
    /// or with `ProtocolViolation` if the underlying handle reports
    /// success after the abort request.
    ///
    /// # Errors
    ///
    /// Fails with `InvalidState` if the runner is already aborted or no
    /// longer active.
    pub fn abort(&self) -> CoreResult<Completion<()>> {
        let mut state = self.shared.state.lock();
        if !state.active || state.aborted {
            return Err(CoreError::invalid_state(
                "cannot abort: runner is no longer active",
            ));
        }
        state.active = false;
        state.aborted = true;
        let completion = Completion::new();
        state.finish = Some(Finish::Abort(completion.clone()));
        self.shared.wake.notify_one();
        Ok(completion)
    }
}

impl std::fmt::Debug for TransactionRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("TransactionRunner")
            .field("id", &self.id)
            .field("active", &state.active)
            .field("aborted", &state.aborted)
            .field("queued", &state.queue.len())
            .finish_non_exhaustive()
    }
}

fn notify(observer: &Option<IdleObserver>, aborted: bool, error: Option<&CoreError>) {
    if let Some(observer) = observer {
        observer(aborted, error);
    }
}

fn keep_alive_loop(
    id: TransactionId,
    handle: Box<dyn TransactionHandle>,
    probe_store: &str,
    config: &RunnerConfig,
    observer: &Option<IdleObserver>,
    shared: &RunnerShared,
) {
    loop {
        let mut warn = false;
        let (ops, finish) = {
            let mut state = shared.state.lock();
            if state.finish.is_none() && state.active {
                if state.queue.is_empty() {
                    let since = *state.idle_since.get_or_insert_with(Instant::now);
                    let idle_for = since.elapsed();
                    let expired = config.idle_ttl.map_or(false, |ttl| idle_for >= ttl);
                    if expired {
                        state.active = false;
                        state.aborted = true;
                        state.finish = Some(Finish::IdleAbort);
                    } else if let Some(warning) = config.idle_warning {
                        if idle_for >= warning && !state.idle_warning_sent {
                            state.idle_warning_sent = true;
                            warn = true;
                        }
                    }
                } else {
                    state.idle_since = None;
                    state.idle_warning_sent = false;
                }
            }
            let ops: Vec<Operation> = state.queue.drain(..).collect();
            (ops, state.finish.take())
        };

        if warn {
            tracing::warn!(%id, "transaction has been idle; notifying observer");
            notify(observer, false, None);
        }

        // Final drain happens here as well: once finish is taken, the
        // mailbox no longer accepts work, so this drain is complete.
        for op in ops {
            op(handle.as_ref());
        }

        match finish {
            Some(Finish::Commit(completion)) => {
                finalize_commit(id, handle.as_ref(), &completion);
                return;
            }
            Some(Finish::Abort(completion)) => {
                finalize_abort(id, handle.as_ref(), &completion);
                return;
            }
            Some(Finish::IdleAbort) => {
                tracing::warn!(%id, "idle ttl exceeded; aborting transaction");
                let error = finalize_idle_abort(id, handle.as_ref());
                notify(observer, true, Some(&error));
                return;
            }
            None => {}
        }

        // The keep-alive probe: a harmless read whose only purpose is to
        // reset the underlying engine's inactivity clock.
        if let Err(probe_error) = handle.get(probe_store, &Value::Integer(0)) {
            let (pending, finishing) = {
                let mut state = shared.state.lock();
                if state.finish.is_some() {
                    (Vec::new(), true)
                } else {
                    state.active = false;
                    state.aborted = true;
                    (state.queue.drain(..).collect::<Vec<Operation>>(), false)
                }
            };
            if finishing {
                // A commit/abort raced in; let its own path settle.
                continue;
            }
            // Operations that raced in still run against the dead
            // handle; each fails and settles its completion.
            for op in pending {
                op(handle.as_ref());
            }
            tracing::error!(%id, error = %probe_error, "keep-alive probe failed; forcing abort");
            let _ = handle.abort();
            let _ = handle.wait_closed();
            let error = CoreError::aborted(format!("keep-alive probe failed: {probe_error}"));
            notify(observer, true, Some(&error));
            return;
        }

        let mut state = shared.state.lock();
        if state.finish.is_none() && state.queue.is_empty() {
            shared.wake.wait_for(&mut state, config.keep_alive_interval);
        }
    }
}

fn finalize_commit(id: TransactionId, handle: &dyn TransactionHandle, completion: &Completion<()>) {
    let result = handle
        .commit()
        .and_then(|()| handle.wait_closed())
        .map_err(CoreError::from);
    match &result {
        Ok(()) => tracing::debug!(%id, "transaction committed"),
        Err(error) => tracing::warn!(%id, %error, "transaction commit failed"),
    }
    completion.settle(result);
}

fn finalize_abort(id: TransactionId, handle: &dyn TransactionHandle, completion: &Completion<()>) {
    if let Err(error) = handle.abort() {
        tracing::debug!(%id, %error, "abort request failed; awaiting close signal");
    }
    completion.settle(Err(abort_outcome(id, handle)));
}

fn finalize_idle_abort(id: TransactionId, handle: &dyn TransactionHandle) -> CoreError {
    if let Err(error) = handle.abort() {
        tracing::debug!(%id, %error, "abort request failed; awaiting close signal");
    }
    let outcome = abort_outcome(id, handle);
    if outcome.is_abort() {
        CoreError::aborted("idle ttl exceeded")
    } else {
        outcome
    }
}

/// Resolves the close signal after an abort request. Success here is a
/// protocol violation: a deliberately aborted transaction must not
/// report a successful close.
fn abort_outcome(id: TransactionId, handle: &dyn TransactionHandle) -> CoreError {
    match handle.wait_closed() {
        Ok(()) => {
            let violation = CoreError::protocol_violation(
                "underlying transaction closed successfully after abort was requested",
            );
            tracing::error!(%id, error = %violation, "collaborator broke the abort contract");
            violation
        }
        Err(StoreError::Aborted) => CoreError::aborted("transaction aborted"),
        Err(other) => CoreError::from(other),
    }
}
