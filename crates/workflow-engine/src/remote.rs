//! HTTP node executor
//!
//! Sends each node to the runner service as JSON and decodes its answer.

use async_trait::async_trait;

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::executor::{ExecutionRequest, ExecutionResponse, NodeExecutor};

/// Executes nodes by POSTing them to a runner endpoint
pub struct HttpNodeExecutor {
    http_client: reqwest::Client,
    url: String,
}

impl HttpNodeExecutor {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            http_client: reqwest::Client::new(),
            url: url.into(),
        }
    }

    /// Use the runner URL from the engine configuration
    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.runner_url.clone())
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl NodeExecutor for HttpNodeExecutor {
    async fn execute(&self, request: ExecutionRequest) -> Result<ExecutionResponse> {
        log::debug!(
            "Backend call for '{}' ({}::{}) with {} inputs",
            request.node_id,
            request.package_name,
            request.node_name,
            request.inputs.len()
        );

        let response = self
            .http_client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| EngineError::backend(format!("Request to {} failed: {}", self.url, e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(EngineError::backend(format!(
                "Runner error {}: {}",
                status, body
            )));
        }

        response
            .json::<ExecutionResponse>()
            .await
            .map_err(|e| EngineError::backend(format!("Failed to parse response: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use super::*;

    fn request() -> ExecutionRequest {
        ExecutionRequest {
            node_id: "n1".to_string(),
            package_name: "pkg".to_string(),
            node_name: "op".to_string(),
            inputs: vec![],
        }
    }

    /// Serve a single canned HTTP response and return the endpoint URL
    async fn serve_once(response: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut received = Vec::new();
            let mut buf = [0u8; 1024];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                received.extend_from_slice(&buf[..n]);
                if let Some(end) = received.windows(4).position(|w| w == b"\r\n\r\n") {
                    let head = String::from_utf8_lossy(&received[..end]).to_lowercase();
                    let length = head
                        .lines()
                        .find_map(|line| line.strip_prefix("content-length:"))
                        .and_then(|v| v.trim().parse::<usize>().ok())
                        .unwrap_or(0);
                    if received.len() >= end + 4 + length {
                        break;
                    }
                }
            }
            socket.write_all(response.as_bytes()).await.unwrap();
            let _ = socket.shutdown().await;
        });

        format!("http://{}/execute", addr)
    }

    #[test]
    fn test_from_config_uses_runner_url() {
        let config = EngineConfig {
            runner_url: "http://runner:9000/execute".to_string(),
            ..Default::default()
        };
        assert_eq!(
            HttpNodeExecutor::from_config(&config).url(),
            "http://runner:9000/execute"
        );
    }

    #[tokio::test]
    async fn test_unreachable_runner_is_backend_error() {
        // Port 9 (discard) on localhost is not expected to serve HTTP
        let executor = HttpNodeExecutor::new("http://127.0.0.1:9/execute");

        let err = executor.execute(request()).await.unwrap_err();
        assert!(matches!(err, EngineError::Backend(_)));
    }

    #[tokio::test]
    async fn test_error_status_is_backend_error() {
        let url = serve_once(
            "HTTP/1.1 500 Internal Server Error\r\nContent-Length: 4\r\nConnection: close\r\n\r\nboom",
        )
        .await;
        let executor = HttpNodeExecutor::new(url);

        match executor.execute(request()).await.unwrap_err() {
            EngineError::Backend(msg) => {
                assert!(msg.contains("500"), "{msg}");
                assert!(msg.contains("boom"), "{msg}");
            }
            other => panic!("Expected backend error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_undecodable_body_is_backend_error() {
        let url = serve_once(
            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: 8\r\nConnection: close\r\n\r\nnot json",
        )
        .await;
        let executor = HttpNodeExecutor::new(url);

        match executor.execute(request()).await.unwrap_err() {
            EngineError::Backend(msg) => assert!(msg.starts_with("Failed to parse response"), "{msg}"),
            other => panic!("Expected backend error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_successful_response_is_decoded() {
        let url = serve_once(
            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: 29\r\nConnection: close\r\n\r\n{\"success\":true,\"outputs\":42}",
        )
        .await;
        let executor = HttpNodeExecutor::new(url);

        let response = executor.execute(request()).await.unwrap();
        assert!(response.success);
    }
}
