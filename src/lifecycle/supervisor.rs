//! Task supervision.
//!
//! # Responsibilities
//! - Own the `JoinHandle` of every managed task incarnation
//! - Detect faults (returned `TaskFault` or panic via `JoinError::is_panic`)
//! - Recreate the task from its factory after a jittered exponential backoff
//! - Drive the audit clock and other periodic ticks
//! - Bounded wait for every task on shutdown, then abort stragglers
//!
//! # Data Flow
//! ```text
//! factory() → worker ──spawn──▶ incarnation ──exit──▶ classify
//!                                                      │
//!             ┌── shutdown? → stop                     │
//!             └── fault → record in task table → backoff → factory() again
//! ```
//!
//! # Design Decisions
//! - Each incarnation runs in its own tokio task so a panic unwinds only that
//!   task; the restart loop observing it never panics itself
//! - Backoff resets once an incarnation stayed up for `STABLE_RUN`

use std::any::Any;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::{AbortHandle, JoinError, JoinHandle};

use crate::config::schema::SupervisionConfig;
use crate::lifecycle::mailbox::{Mailbox, MailboxSender, Message};
use crate::lifecycle::shutdown::{Shutdown, ShutdownListener};
use crate::lifecycle::worker::{Incarnation, TaskFault, Worker};
use crate::observability::metrics;
use crate::resilience::backoff::calculate_backoff;
use crate::state::SharedState;

/// An incarnation running this long resets the restart backoff.
const STABLE_RUN: Duration = Duration::from_secs(30);

/// Owner of every managed task.
pub struct Supervisor {
    shared: Arc<SharedState>,
    shutdown: Shutdown,
    settings: SupervisionConfig,
    handles: Vec<(&'static str, JoinHandle<()>)>,
}

impl Supervisor {
    pub fn new(shared: Arc<SharedState>, shutdown: Shutdown) -> Self {
        let settings = shared.settings.supervision.clone();
        Self {
            shared,
            shutdown,
            settings,
            handles: Vec::new(),
        }
    }

    /// Start supervising the task that consumes `mailbox`.
    ///
    /// `factory` builds a fresh worker for every incarnation. The audit clock
    /// for the task starts along with it.
    pub fn spawn<W, F>(&mut self, mailbox: Mailbox<W::Drift, W::Command>, factory: F)
    where
        W: Worker,
        F: Fn() -> W + Send + Sync + 'static,
    {
        let audit_every = Duration::from_millis(self.settings.audit_interval_ms);
        self.schedule(mailbox.sender(), audit_every, || Message::Audit);

        let restart_loop = RestartLoop {
            shared: self.shared.clone(),
            shutdown: self.shutdown.subscribe(),
            base_delay_ms: self.settings.restart_base_delay_ms,
            max_delay_ms: self.settings.restart_max_delay_ms,
        };
        let handle = tokio::spawn(restart_loop.run(mailbox, factory));
        self.handles.push((W::NAME, handle));
    }

    /// Send `make()` to `sender` every `period` until shutdown.
    ///
    /// The first tick is sent after one full period.
    pub fn schedule<D, C, M>(&mut self, sender: MailboxSender<D, C>, period: Duration, make: M)
    where
        D: Send + 'static,
        C: Send + 'static,
        M: Fn() -> Message<D, C> + Send + 'static,
    {
        let mut shutdown = self.shutdown.subscribe();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = shutdown.wait() => break,
                    _ = ticker.tick() => {
                        if sender.is_closed() {
                            break;
                        }
                        sender.try_send(make());
                    }
                }
            }
        });
        self.handles.push(("clock", handle));
    }

    /// Wait for every task to observe shutdown, aborting those that do not
    /// finish within `shutdown_timeout_secs`.
    pub async fn join(self) {
        let deadline = Instant::now() + Duration::from_secs(self.settings.shutdown_timeout_secs);

        for (name, mut handle) in self.handles {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match tokio::time::timeout(remaining, &mut handle).await {
                Ok(_) => tracing::debug!(task = name, "Task stopped"),
                Err(_) => {
                    tracing::warn!(task = name, "Task did not stop in time, aborting");
                    handle.abort();
                }
            }
        }
    }
}

struct RestartLoop {
    shared: Arc<SharedState>,
    shutdown: ShutdownListener,
    base_delay_ms: u64,
    max_delay_ms: u64,
}

/// Aborts the incarnation if the restart loop itself is dropped or aborted.
struct AbortOnDrop(AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

impl RestartLoop {
    async fn run<W, F>(mut self, mailbox: Mailbox<W::Drift, W::Command>, factory: F)
    where
        W: Worker,
        F: Fn() -> W + Send + Sync + 'static,
    {
        let receiver = mailbox.receiver();
        let own = mailbox.sender();
        let mut attempt: u32 = 0;

        loop {
            if self.shutdown.is_triggered() {
                break;
            }

            let incarnation = self.shared.task_started(W::NAME);
            tracing::info!(task = W::NAME, incarnation, "Starting task");

            let worker = factory();
            let inbox = receiver.clone().lock_owned().await;
            let run = Incarnation::<W> {
                inbox,
                own: own.clone(),
                shutdown: self.shutdown.clone(),
            }
            .run(worker);

            let started = Instant::now();
            let handle = tokio::spawn(run);
            let _guard = AbortOnDrop(handle.abort_handle());
            let fault = match handle.await {
                Ok(Ok(())) if self.shutdown.is_triggered() => None,
                Ok(Ok(())) => Some(TaskFault::Exited),
                Ok(Err(fault)) => Some(fault),
                Err(err) => Some(classify_join_error(err)),
            };

            self.shared.task_stopped(W::NAME, fault.as_ref());
            let Some(fault) = fault else { break };
            if self.shutdown.is_triggered() {
                break;
            }

            if started.elapsed() >= STABLE_RUN {
                attempt = 0;
            }
            attempt = attempt.saturating_add(1);
            let delay = calculate_backoff(attempt, self.base_delay_ms, self.max_delay_ms);

            metrics::record_task_restart(W::NAME);
            tracing::error!(
                task = W::NAME,
                incarnation,
                error = %fault,
                delay_ms = delay.as_millis() as u64,
                "Task fault, restarting"
            );

            tokio::select! {
                _ = self.shutdown.wait() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        tracing::info!(task = W::NAME, "Task supervision ended");
    }
}

fn classify_join_error(err: JoinError) -> TaskFault {
    if err.is_panic() {
        TaskFault::Panicked(panic_message(err.into_panic()))
    } else {
        TaskFault::failed("cancelled")
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
