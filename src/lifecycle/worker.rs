//! Managed task contract and the message loop of one task incarnation.
//!
//! # Responsibilities
//! - Define what a supervised task implements (`Worker`)
//! - Run one incarnation: start, audit, then dispatch messages until
//!   shutdown, fault, or the queue closing
//!
//! # Data Flow
//! ```text
//! incarnation start
//!     → Worker::start()
//!     → Worker::audit()  → drift? → Update(drift) on own queue
//!     → loop: Audit | Update(drift) | Exec(command) | watchdog fault
//! ```
//!
//! # Design Decisions
//! - `audit` takes `&self`: it can only read, repairs go through `update`
//! - A returned `TaskFault` ends the incarnation like a panic does; the
//!   supervisor decides what happens next

use std::future::Future;

use thiserror::Error;

use crate::lifecycle::mailbox::{Inbox, MailboxSender, Message};
use crate::lifecycle::shutdown::ShutdownListener;

/// Why a task incarnation stopped without being asked to.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TaskFault {
    #[error("task failed: {0}")]
    Failed(String),

    #[error("task panicked: {0}")]
    Panicked(String),

    #[error("task exited unexpectedly")]
    Exited,
}

impl TaskFault {
    pub fn failed(reason: impl std::fmt::Display) -> Self {
        TaskFault::Failed(reason.to_string())
    }
}

/// A task owned by the supervisor.
///
/// One value of the implementing type is one incarnation. A new one is built
/// from a factory after each fault, so anything that must outlive a fault
/// belongs in shared state, not in the worker.
pub trait Worker: Send + Sync + 'static {
    /// Drift found by `audit`, repaired by `update`.
    type Drift: Send + 'static;

    /// Primary work requests.
    type Command: Send + 'static;

    /// Task name, used as key in the task table and in logs.
    const NAME: &'static str;

    /// Acquire per-incarnation resources (listeners, clients).
    fn start(&mut self) -> impl Future<Output = Result<(), TaskFault>> + Send {
        async { Ok(()) }
    }

    /// Compare shared state against its source of truth.
    fn audit(&self) -> impl Future<Output = Option<Self::Drift>> + Send;

    /// Repair a drift.
    fn update(&mut self, drift: Self::Drift) -> impl Future<Output = Result<(), TaskFault>> + Send;

    /// Perform a command.
    fn exec(&mut self, command: Self::Command) -> impl Future<Output = Result<(), TaskFault>> + Send;

    /// Let in-flight work finish after shutdown was signalled.
    fn drain(&mut self) -> impl Future<Output = ()> + Send {
        async {}
    }

    /// Resolves when a resource owned by the incarnation died on its own.
    fn watchdog(&mut self) -> impl Future<Output = TaskFault> + Send {
        std::future::pending()
    }
}

/// What a running incarnation needs besides its worker.
pub(crate) struct Incarnation<W: Worker> {
    pub inbox: Inbox<W::Drift, W::Command>,
    pub own: MailboxSender<W::Drift, W::Command>,
    pub shutdown: ShutdownListener,
}

enum Event<D, C> {
    Shutdown,
    Message(Option<Message<D, C>>),
    Fault(TaskFault),
}

impl<W: Worker> Incarnation<W> {
    /// Run `worker` until shutdown (`Ok`) or a fault (`Err`).
    pub async fn run(mut self, mut worker: W) -> Result<(), TaskFault> {
        worker.start().await?;
        self.audit(&worker).await;

        loop {
            let event = tokio::select! {
                biased;
                _ = self.shutdown.wait() => Event::Shutdown,
                message = self.inbox.recv() => Event::Message(message),
                fault = worker.watchdog() => Event::Fault(fault),
            };

            match event {
                Event::Shutdown => {
                    worker.drain().await;
                    return Ok(());
                }
                Event::Fault(fault) => return Err(fault),
                Event::Message(None) => return Err(TaskFault::Exited),
                Event::Message(Some(message)) => {
                    tracing::trace!(task = W::NAME, kind = message.kind(), "Dispatching message");
                    match message {
                        Message::Audit => self.audit(&worker).await,
                        Message::Update(drift) => worker.update(drift).await?,
                        Message::Exec(command) => worker.exec(command).await?,
                    }
                }
            }
        }
    }

    async fn audit(&self, worker: &W) {
        if let Some(drift) = worker.audit().await {
            tracing::debug!(task = W::NAME, "Audit found drift, scheduling update");
            self.own.try_send(Message::Update(drift));
        }
    }
}
