//! Proxy front-end task.
//!
//! # Responsibilities
//! - Bind the proxy listener and the status API listener at start
//! - Fault (and get restarted) if a server stops on its own
//! - Close WebSocket sessions pinned to backends that are Down or gone
//!
//! # Design Decisions
//! - Servers are child tasks of the incarnation and aborted with it, so a
//!   restarted front-end can bind the same addresses again
//! - On shutdown servers stop accepting and finish in-flight calls, then
//!   drain waits (bounded) until every WebSocket session closed with 1001
//! - Session teardown for Down backends always runs here, requested through
//!   this task's mailbox by the health monitor and the request path

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::select_all;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::admin;
use crate::health::state::HealthState;
use crate::http::server::{build_router, AppState};
use crate::lifecycle::mailbox::MailboxSender;
use crate::lifecycle::shutdown::ShutdownListener;
use crate::lifecycle::worker::{TaskFault, Worker};
use crate::state::SharedState;

/// Work requests for the front-end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrontEndCommand {
    /// Close every session pinned to `alias`.
    CloseSessions { alias: String },
}

/// Sessions pinned to a backend that is Down, removed, or no longer open to traffic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionDrift {
    pub orphaned: Vec<(Uuid, String)>,
}

struct Server {
    name: &'static str,
    handle: JoinHandle<std::io::Result<()>>,
}

impl Drop for Server {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// The front-end task.
pub struct ProxyFrontEnd {
    shared: Arc<SharedState>,
    shutdown: ShutdownListener,
    /// Own mailbox, handed to request handlers.
    mailbox: MailboxSender<SessionDrift, FrontEndCommand>,
    servers: Vec<Server>,
}

impl ProxyFrontEnd {
    pub fn new(
        shared: Arc<SharedState>,
        shutdown: ShutdownListener,
        mailbox: MailboxSender<SessionDrift, FrontEndCommand>,
    ) -> Self {
        Self {
            shared,
            shutdown,
            mailbox,
            servers: Vec::new(),
        }
    }

    fn serve(&mut self, name: &'static str, listener: TcpListener, router: axum::Router) {
        let shutdown = self.shutdown.clone().signalled();
        let handle = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(shutdown)
                .await
        });
        self.servers.push(Server { name, handle });
    }

    async fn bind(&self, field: &'static str, address: &str) -> Result<TcpListener, TaskFault> {
        let listener = TcpListener::bind(address)
            .await
            .map_err(|e| TaskFault::failed(format!("cannot bind {field} {address}: {e}")))?;
        if let Ok(local) = listener.local_addr() {
            tracing::info!(address = %local, listener = field, "Listening for connections");
            self.shared.listeners.insert(field, local);
        }
        Ok(listener)
    }
}

impl Worker for ProxyFrontEnd {
    type Drift = SessionDrift;
    type Command = FrontEndCommand;

    const NAME: &'static str = "frontend";

    async fn start(&mut self) -> Result<(), TaskFault> {
        let settings = self.shared.settings.clone();

        let app = AppState::new(self.shared.clone(), self.mailbox.clone(), self.shutdown.clone())
            .map_err(TaskFault::failed)?;
        let listener = self.bind("proxy", &settings.listener.bind_address).await?;
        self.serve("proxy", listener, build_router(app));

        if settings.admin.enabled {
            let listener = self.bind("admin", &settings.admin.bind_address).await?;
            let router = admin::router(self.shared.clone(), settings.admin.api_key.clone());
            self.serve("admin", listener, router);
        }
        Ok(())
    }

    async fn audit(&self) -> Option<SessionDrift> {
        let pinned = self.shared.sessions.pinned();
        if pinned.is_empty() {
            return None;
        }

        let snapshot = self.shared.registry.current();
        let usable: HashSet<&str> = snapshot
            .enabled()
            .filter(|b| b.selectable && b.ws.is_some())
            .map(|b| b.alias.as_str())
            .collect();
        let health = self.shared.health.read().await;

        let orphaned: Vec<_> = pinned
            .into_iter()
            .filter(|(_, alias)| !usable.contains(alias.as_str()) || health.state(alias) == HealthState::Down)
            .collect();
        (!orphaned.is_empty()).then_some(SessionDrift { orphaned })
    }

    async fn update(&mut self, drift: SessionDrift) -> Result<(), TaskFault> {
        let ids: Vec<Uuid> = drift.orphaned.iter().map(|(id, _)| *id).collect();
        let closed = self.shared.sessions.close(&ids);
        if closed > 0 {
            tracing::info!(sessions = closed, "Closing sessions of unavailable backends");
        }
        Ok(())
    }

    async fn exec(&mut self, command: FrontEndCommand) -> Result<(), TaskFault> {
        match command {
            FrontEndCommand::CloseSessions { alias } => {
                let closed = self.shared.sessions.close_alias(&alias);
                if closed > 0 {
                    tracing::info!(backend = %alias, sessions = closed, "Closing sessions of backend marked down");
                }
            }
        }
        Ok(())
    }

    async fn drain(&mut self) {
        for server in &mut self.servers {
            let _ = (&mut server.handle).await;
        }

        // Upgraded connections outlive their server; each session closes
        // itself on the shutdown signal.
        let open = self.shared.sessions.len();
        if open > 0 {
            tracing::info!(sessions = open, "Waiting for WebSocket sessions to close");
            let limit = Duration::from_secs(self.shared.settings.supervision.shutdown_timeout_secs);
            if tokio::time::timeout(limit, self.shared.sessions.wait_empty()).await.is_err() {
                tracing::warn!(sessions = self.shared.sessions.len(), "WebSocket sessions still open after drain");
            }
        }
    }

    async fn watchdog(&mut self) -> TaskFault {
        if self.servers.is_empty() {
            return std::future::pending().await;
        }

        let names: Vec<&'static str> = self.servers.iter().map(|s| s.name).collect();
        let (result, index, _) = select_all(self.servers.iter_mut().map(|s| &mut s.handle)).await;
        let name = names[index];
        match result {
            Ok(Ok(())) => TaskFault::failed(format!("{name} server stopped")),
            Ok(Err(e)) => TaskFault::failed(format!("{name} server failed: {e}")),
            Err(e) => TaskFault::failed(format!("{name} server task failed: {e}")),
        }
    }
}
