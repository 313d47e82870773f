//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use link_proxy::config::{LinkConfig, ProxyConfig};
use link_proxy::http::{FrontEndCommand, ProxyFrontEnd, SessionDrift};
use link_proxy::lifecycle::{Mailbox, Shutdown, Supervisor};
use link_proxy::SharedState;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// A mock JSON-RPC backend that answers `{"result": <name>}` to every call.
pub struct MockBackend {
    pub addr: SocketAddr,
    pub calls: Arc<AtomicU32>,
}

impl MockBackend {
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

/// The JSON-RPC success body a mock named `name` answers with.
pub fn rpc_result(name: &str) -> String {
    format!(r#"{{"jsonrpc":"2.0","id":1,"result":"{}"}}"#, name)
}

/// Start a mock backend that always answers 200 with `rpc_result(name)`.
pub async fn start_mock_backend(name: &'static str) -> MockBackend {
    start_programmable_backend(move |_| async move { (200, rpc_result(name)) }).await
}

/// Start a programmable mock backend.
///
/// `f` receives the zero-based call number and returns status and body.
pub async fn start_programmable_backend<F, Fut>(f: F) -> MockBackend
where
    F: Fn(u32) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = (u16, String)> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let calls = Arc::new(AtomicU32::new(0));
    let f = Arc::new(f);

    let counter = calls.clone();
    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    let f = f.clone();
                    let counter = counter.clone();
                    tokio::spawn(async move {
                        if read_request(&mut socket).await.is_none() {
                            return;
                        }
                        let n = counter.fetch_add(1, Ordering::SeqCst);
                        let (status, body) = f(n).await;
                        let status_text = match status {
                            200 => "200 OK",
                            400 => "400 Bad Request",
                            404 => "404 Not Found",
                            429 => "429 Too Many Requests",
                            500 => "500 Internal Server Error",
                            502 => "502 Bad Gateway",
                            503 => "503 Service Unavailable",
                            _ => "200 OK",
                        };

                        let response = format!(
                            "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            status_text,
                            body.len(),
                            body
                        );
                        let _ = socket.write_all(response.as_bytes()).await;
                        let _ = socket.shutdown().await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    MockBackend { addr, calls }
}

/// Read one HTTP request (headers and `Content-Length` body).
async fn read_request(socket: &mut TcpStream) -> Option<()> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);

        let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") else {
            continue;
        };
        let head = String::from_utf8_lossy(&buf[..end]).to_ascii_lowercase();
        let length = head
            .lines()
            .find_map(|l| l.strip_prefix("content-length:"))
            .and_then(|v| v.trim().parse::<usize>().ok())
            .unwrap_or(0);
        if buf.len() >= end + 4 + length {
            return Some(());
        }
    }
}

/// An address nothing listens on.
pub async fn dead_address() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

/// Config with the given links and short timeouts, probes off.
pub fn test_config(links: Vec<LinkConfig>) -> ProxyConfig {
    let mut config = ProxyConfig::default();
    config.links = links;
    config.health_check.enabled = false;
    config.admin.enabled = false;
    config.timeouts.request_ms = 500;
    config.timeouts.connect_ms = 200;
    config
}

/// A supervised front-end serving the proxy on an ephemeral port.
pub struct TestProxy {
    pub addr: SocketAddr,
    pub shared: Arc<SharedState>,
    pub shutdown: Shutdown,
    supervisor: Supervisor,
}

impl TestProxy {
    /// Trigger shutdown and wait for the front-end to drain.
    pub async fn stop(self) {
        self.shutdown.trigger();
        self.supervisor.join().await;
    }
}

/// Run the proxy front-end task under a supervisor, bound to an ephemeral port.
pub async fn start_proxy(mut config: ProxyConfig) -> TestProxy {
    config.listener.bind_address = "127.0.0.1:0".to_string();
    let shared = Arc::new(SharedState::new(config, None).unwrap());

    let shutdown = Shutdown::new();
    let mut supervisor = Supervisor::new(shared.clone(), shutdown.clone());
    let frontend_box: Mailbox<SessionDrift, FrontEndCommand> = Mailbox::new("frontend", 16);
    {
        let shared = shared.clone();
        let listener = shutdown.subscribe();
        let frontend_tx = frontend_box.sender();
        supervisor.spawn(frontend_box, move || {
            ProxyFrontEnd::new(shared.clone(), listener.clone(), frontend_tx.clone())
        });
    }

    let bound = async {
        loop {
            if let Some(addr) = shared.listeners.get("proxy") {
                return *addr;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    };
    let addr = tokio::time::timeout(Duration::from_secs(2), bound)
        .await
        .expect("proxy listener bound");

    TestProxy {
        addr,
        shared,
        shutdown,
        supervisor,
    }
}

/// Client that never pools, so every call opens a fresh connection.
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap()
}

/// POST a JSON-RPC call with id 1 to the proxy.
pub async fn call(proxy: SocketAddr) -> reqwest::Response {
    client()
        .post(format!("http://{}/", proxy))
        .header("content-type", "application/json")
        .body(r#"{"jsonrpc":"2.0","id":1,"method":"sui_getChainIdentifier","params":[]}"#)
        .send()
        .await
        .expect("proxy unreachable")
}
