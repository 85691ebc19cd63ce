//! Canned HTTP responses for the network-backed sources.
//!
//! Serves one response per request path and counts how often each path was
//! requested. Unrouted paths answer 404.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::net::TcpStream;

#[derive(Clone, Default)]
pub(crate) struct MockHttp {
    routes: Arc<DashMap<String, (u16, Vec<u8>)>>,
    hits: Arc<DashMap<String, usize>>,
}

impl MockHttp {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Sets (or replaces) the response for `path`.
    pub(crate) fn route(&self, path: &str, status: u16, body: impl Into<Vec<u8>>) {
        self.routes.insert(path.to_string(), (status, body.into()));
    }

    pub(crate) fn unroute(&self, path: &str) {
        self.routes.remove(path);
    }

    pub(crate) fn hits(&self, path: &str) -> usize {
        self.hits.get(path).map_or(0, |n| *n)
    }

    /// Starts serving on an ephemeral local port and returns its base URL.
    pub(crate) async fn serve(&self) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = self.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let server = server.clone();
                tokio::spawn(async move {
                    let _ = server.answer(stream).await;
                });
            }
        });
        format!("http://{}", addr)
    }

    async fn answer(&self, mut stream: TcpStream) -> std::io::Result<()> {
        let mut head = Vec::new();
        let mut chunk = [0u8; 1024];
        while !head.windows(4).any(|w| w == b"\r\n\r\n") {
            let n = stream.read(&mut chunk).await?;
            if n == 0 {
                break;
            }
            head.extend_from_slice(&chunk[..n]);
        }

        let path = String::from_utf8_lossy(&head)
            .split_whitespace()
            .nth(1)
            .unwrap_or("/")
            .to_string();
        *self.hits.entry(path.clone()).or_default() += 1;

        let (status, body) = self
            .routes
            .get(&path)
            .map(|r| r.value().clone())
            .unwrap_or((404, b"not found".to_vec()));

        let header = format!(
            "HTTP/1.1 {} Canned\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            status,
            body.len()
        );
        stream.write_all(header.as_bytes()).await?;
        stream.write_all(&body).await?;
        stream.shutdown().await
    }
}

/// Client that talks to the local server directly, ignoring proxy settings.
pub(crate) fn client() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}
