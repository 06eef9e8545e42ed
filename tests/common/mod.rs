//! Shared utilities for integration testing.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use tsgate::alb::{build_runtime, AlbRuntime, MechanismRegistry};
use tsgate::config::{BackendConfig, GatewayConfig, HealthCheckConfig};
use tsgate::http::HttpServer;
use tsgate::timeseries::ProviderRegistry;

/// One canned mock response.
#[derive(Clone)]
pub struct MockResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl MockResponse {
    pub fn ok(body: &str) -> Self {
        Self {
            status: 200,
            headers: Vec::new(),
            body: body.to_string(),
        }
    }

    #[allow(dead_code)]
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    #[allow(dead_code)]
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }
}

fn status_text(status: u16) -> &'static str {
    match status {
        200 => "200 OK",
        201 => "201 Created",
        404 => "404 Not Found",
        500 => "500 Internal Server Error",
        502 => "502 Bad Gateway",
        503 => "503 Service Unavailable",
        _ => "200 OK",
    }
}

async fn read_request_head(socket: &mut tokio::net::TcpStream) {
    let mut buf = [0u8; 4096];
    let mut head = Vec::new();
    loop {
        let read = tokio::time::timeout(Duration::from_secs(2), socket.read(&mut buf)).await;
        match read {
            Ok(Ok(n)) if n > 0 => {
                head.extend_from_slice(&buf[..n]);
                if head.windows(4).any(|w| w == b"\r\n\r\n") {
                    return;
                }
            }
            _ => return,
        }
    }
}

/// Start a mock backend serving responses produced by `f` per request.
/// Returns the bound address.
pub async fn start_backend<F, Fut>(f: F) -> SocketAddr
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = MockResponse> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let f = Arc::new(f);

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    let f = f.clone();
                    tokio::spawn(async move {
                        read_request_head(&mut socket).await;
                        let resp = f().await;
                        let mut headers = String::new();
                        for (k, v) in &resp.headers {
                            headers.push_str(&format!("{k}: {v}\r\n"));
                        }
                        let response_str = format!(
                            "HTTP/1.1 {}\r\nContent-Length: {}\r\n{}Connection: close\r\n\r\n{}",
                            status_text(resp.status),
                            resp.body.len(),
                            headers,
                            resp.body
                        );
                        let _ = socket.write_all(response_str.as_bytes()).await;
                        let _ = socket.shutdown().await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    addr
}

/// Start a mock backend that always serves the same response.
pub async fn start_static_backend(resp: MockResponse) -> SocketAddr {
    start_backend(move || {
        let resp = resp.clone();
        async move { resp }
    })
    .await
}

/// A backend entry with health checking disabled, so its pool status
/// stays Unknown (0) and the default healthy floor admits it.
#[allow(dead_code)]
pub fn unchecked_backend(name: &str, addr: SocketAddr) -> BackendConfig {
    BackendConfig {
        name: name.to_string(),
        origin_url: format!("http://{addr}"),
        description: String::new(),
        health_check: HealthCheckConfig {
            enabled: false,
            ..Default::default()
        },
    }
}

/// Build the runtime for `config` and serve it on an ephemeral port.
/// Returns the gateway's address and the swappable runtime handle.
pub async fn start_gateway_runtime(
    config: &GatewayConfig,
) -> (SocketAddr, Arc<ArcSwap<AlbRuntime>>) {
    let runtime = build_runtime(
        config,
        &MechanismRegistry::new(),
        &ProviderRegistry::new(),
        None,
    )
    .await
    .unwrap();
    let runtime = Arc::new(ArcSwap::from_pointee(runtime));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = HttpServer::new(&config.listener, runtime.clone());
    tokio::spawn(async move {
        let _ = server.run(listener).await;
    });
    (addr, runtime)
}

/// Build the runtime for `config` and serve it on an ephemeral port.
/// Returns the gateway's address.
#[allow(dead_code)]
pub async fn start_gateway(config: GatewayConfig) -> SocketAddr {
    start_gateway_runtime(&config).await.0
}

pub fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap()
}
