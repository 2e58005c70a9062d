//! Shared utilities for integration and load testing.

#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use mock_gateway::config::{AppConfig, FixedResponse, ServiceConfig, UpstreamConfig};
use mock_gateway::storage::Storage;
use mock_gateway::{HttpServer, Shutdown};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

/// Start a programmable upstream on an ephemeral port.
///
/// `f` is called once per connection and returns the status and body of a
/// JSON response.
pub async fn start_programmable_backend<F, Fut>(f: F) -> SocketAddr
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = (u16, String)> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let f = std::sync::Arc::new(f);

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    let f = f.clone();
                    tokio::spawn(async move {
                        // Drain the request head; bodies in these tests are small.
                        let mut buf = [0u8; 8192];
                        let _ = socket.read(&mut buf).await;

                        let (status, body) = f().await;
                        let status_text = match status {
                            200 => "200 OK",
                            201 => "201 Created",
                            404 => "404 Not Found",
                            429 => "429 Too Many Requests",
                            500 => "500 Internal Server Error",
                            502 => "502 Bad Gateway",
                            503 => "503 Service Unavailable",
                            _ => "200 OK",
                        };

                        let response_str = format!(
                            "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            status_text,
                            body.len(),
                            body
                        );
                        let _ = socket.write_all(response_str.as_bytes()).await;
                        let _ = socket.shutdown().await;
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    addr
}

/// Start a backend that always answers `status` with `body`.
pub async fn start_mock_backend(status: u16, body: &'static str) -> SocketAddr {
    start_programmable_backend(move || async move { (status, body.to_string()) }).await
}

/// A running gateway.
pub struct Gateway {
    pub addr: SocketAddr,
    pub shutdown: Shutdown,
    pub reload: mpsc::UnboundedSender<AppConfig>,
}

impl Gateway {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

impl Drop for Gateway {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

/// Start the gateway on an ephemeral port with in-memory storage.
pub async fn start_gateway(mut config: AppConfig) -> Gateway {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    config.listener.bind_address = addr.to_string();
    config.history.clear_interval = Duration::ZERO;

    let shutdown = Shutdown::new();
    let (reload, config_updates) = mpsc::unbounded_channel();
    let server = HttpServer::with_storage(config, Storage::memory());
    let server_shutdown = shutdown.subscribe();

    tokio::spawn(async move {
        let _ = server.run(listener, config_updates, server_shutdown).await;
    });

    Gateway {
        addr,
        shutdown,
        reload,
    }
}

/// A service answering every GET under `/` with `body`.
pub fn service(name: &str, body: &str) -> ServiceConfig {
    let mut service = ServiceConfig::named(name);
    service.responses = vec![
        FixedResponse {
            path: "/{a}".into(),
            body: body.into(),
            ..FixedResponse::default()
        },
        FixedResponse {
            path: "/{a}/{b}".into(),
            body: body.into(),
            ..FixedResponse::default()
        },
    ];
    service
}

pub fn with_upstream(mut service: ServiceConfig, addr: SocketAddr) -> ServiceConfig {
    service.upstream = Some(UpstreamConfig {
        url: format!("http://{addr}"),
        ..UpstreamConfig::default()
    });
    service
}

pub fn config_with(services: Vec<ServiceConfig>) -> AppConfig {
    AppConfig {
        services,
        ..AppConfig::default()
    }
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap()
}
