//! Per-task inbound queues carrying coordination messages.
//!
//! # Responsibilities
//! - Define the `Audit` / `Update` / `Exec` message protocol
//! - Bound each task queue so a stuck task cannot grow memory without limit
//! - Keep the receiving end alive across task restarts
//!
//! # Design Decisions
//! - The receiver lives behind an `Arc<Mutex<_>>` owned by the mailbox, not by
//!   the task incarnation. A restarted incarnation locks the same receiver, so
//!   messages queued while the task was down are delivered, each exactly once.
//! - Periodic senders (audit clock, probe timer) use `try_send`: a tick that
//!   finds the queue full is dropped, the next one will come.

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex, OwnedMutexGuard};

/// A coordination message for a managed task.
#[derive(Debug)]
pub enum Message<D, C> {
    /// Re-validate shared state. Read-only; may enqueue an `Update`.
    Audit,
    /// Repair a drift found by a previous audit. May mutate shared state.
    Update(D),
    /// Primary work of the task.
    Exec(C),
}

impl<D, C> Message<D, C> {
    /// Short label used in logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Audit => "audit",
            Message::Update(_) => "update",
            Message::Exec(_) => "exec",
        }
    }
}

/// Bounded inbound queue of one managed task.
pub struct Mailbox<D, C> {
    sender: MailboxSender<D, C>,
    receiver: Arc<Mutex<mpsc::Receiver<Message<D, C>>>>,
}

impl<D, C> Mailbox<D, C> {
    /// Create a mailbox for the named task.
    pub fn new(task: &'static str, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            sender: MailboxSender { task, tx },
            receiver: Arc::new(Mutex::new(rx)),
        }
    }

    /// A handle for sending to this task.
    pub fn sender(&self) -> MailboxSender<D, C> {
        self.sender.clone()
    }

    pub(crate) fn receiver(&self) -> Arc<Mutex<mpsc::Receiver<Message<D, C>>>> {
        self.receiver.clone()
    }
}

/// Exclusive access to a task queue, held by the running incarnation.
pub(crate) type Inbox<D, C> = OwnedMutexGuard<mpsc::Receiver<Message<D, C>>>;

/// Sending side of a [`Mailbox`].
pub struct MailboxSender<D, C> {
    task: &'static str,
    tx: mpsc::Sender<Message<D, C>>,
}

impl<D, C> Clone for MailboxSender<D, C> {
    fn clone(&self) -> Self {
        Self {
            task: self.task,
            tx: self.tx.clone(),
        }
    }
}

impl<D, C> MailboxSender<D, C> {
    /// Name of the receiving task.
    pub fn task(&self) -> &'static str {
        self.task
    }

    /// Whether the receiving side is gone.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Enqueue, waiting for room. Returns false once the mailbox is gone.
    pub async fn send(&self, message: Message<D, C>) -> bool {
        self.tx.send(message).await.is_ok()
    }

    /// Enqueue without waiting. A full queue drops the message.
    pub fn try_send(&self, message: Message<D, C>) -> bool {
        match self.tx.try_send(message) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(message)) => {
                tracing::debug!(task = self.task, kind = message.kind(), "Mailbox full, message dropped");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Shorthand for `try_send(Message::Audit)`.
    pub fn audit(&self) -> bool {
        self.try_send(Message::Audit)
    }

    /// Shorthand for `send(Message::Exec(command))`.
    pub async fn exec(&self, command: C) -> bool {
        self.send(Message::Exec(command)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn queue_survives_receiver_reacquire() {
        let mailbox: Mailbox<(), u32> = Mailbox::new("test", 4);
        let sender = mailbox.sender();
        assert!(sender.exec(1).await);

        {
            let mut inbox = mailbox.receiver().lock_owned().await;
            assert!(matches!(inbox.recv().await, Some(Message::Exec(1))));
        }

        assert!(sender.exec(2).await);
        let mut inbox = mailbox.receiver().lock_owned().await;
        assert!(matches!(inbox.recv().await, Some(Message::Exec(2))));
    }

    #[tokio::test]
    async fn full_queue_drops_ticks() {
        let mailbox: Mailbox<(), ()> = Mailbox::new("test", 1);
        let sender = mailbox.sender();
        assert!(sender.audit());
        assert!(!sender.audit());
    }
}
