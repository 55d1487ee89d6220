//! Integration tests for `HttpFetcher` against a local HTTP server.
//!
//! The server binds `127.0.0.1:0`, records each request head, and answers
//! every connection with the same canned response.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::net::SocketAddr;
use std::sync::Arc;

use reelcache_core::{
    CacheConfig, CacheStore, Error, HttpFetcher, VideoFetcher, key, request_headers,
};
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;

/// Serves one canned HTTP response to every connection.
struct CannedServer {
    addr: SocketAddr,
    requests: Arc<Mutex<Vec<String>>>,
}

impl CannedServer {
    async fn start(response: Vec<u8>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind canned server");
        let addr = listener.local_addr().expect("canned server addr");
        let requests = Arc::new(Mutex::new(Vec::new()));

        let log = requests.clone();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let head = read_head(&mut socket).await;
                log.lock().await.push(head);
                let _ = socket.write_all(&response).await;
                let _ = socket.shutdown().await;
            }
        });

        Self { addr, requests }
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    /// Request heads received so far, lowercased.
    async fn requests(&self) -> Vec<String> {
        self.requests.lock().await.clone()
    }
}

async fn read_head(socket: &mut TcpStream) -> String {
    let mut head = Vec::new();
    let mut buf = [0u8; 1024];
    loop {
        let n = socket.read(&mut buf).await.unwrap_or(0);
        if n == 0 {
            break;
        }
        head.extend_from_slice(&buf[..n]);
        if head.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
    }
    String::from_utf8_lossy(&head).to_lowercase()
}

/// Build a raw response. `content_length` may differ from the body to
/// simulate a truncated transfer.
fn response(status: &str, body: &[u8], content_length: usize) -> Vec<u8> {
    let mut raw = format!(
        "HTTP/1.1 {status}\r\nContent-Type: video/mp4\r\nContent-Length: {content_length}\r\nConnection: close\r\n\r\n"
    )
    .into_bytes();
    raw.extend_from_slice(body);
    raw
}

fn reason_of(result: reelcache_core::Result<u64>) -> String {
    match result {
        Err(Error::DownloadIncomplete { reason, .. }) => reason,
        other => panic!("expected DownloadIncomplete, got {other:?}"),
    }
}

#[tokio::test]
async fn test_fetch_sends_headers_and_writes_body() {
    let server = CannedServer::start(response("200 OK", &[9u8; 1000], 1000)).await;
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let dest = temp_dir.path().join("video.part");
    let fetcher = HttpFetcher::new().unwrap();

    let written = fetcher
        .fetch_to(&server.url("/reels/1.mp4"), &request_headers(Some("tok")), &dest)
        .await
        .unwrap();

    assert_eq!(written, 1000);
    assert_eq!(std::fs::read(&dest).unwrap(), vec![9u8; 1000]);

    let requests = server.requests().await;
    assert_eq!(requests.len(), 1);
    assert!(requests[0].starts_with("get /reels/1.mp4 "));
    assert!(requests[0].contains("authorization: bearer tok"));
    assert!(requests[0].contains("accept: video/*"));
}

#[tokio::test]
async fn test_fetch_without_token_sends_no_authorization() {
    let server = CannedServer::start(response("200 OK", &[1u8; 200], 200)).await;
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let fetcher = HttpFetcher::new().unwrap();

    fetcher
        .fetch_to(
            &server.url("/open.mp4"),
            &request_headers(None),
            &temp_dir.path().join("open.part"),
        )
        .await
        .unwrap();

    let requests = server.requests().await;
    assert!(!requests[0].contains("authorization:"));
    assert!(requests[0].contains("accept: video/*"));
}

#[tokio::test]
async fn test_unauthorized_and_forbidden_are_rejected() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let fetcher = HttpFetcher::new().unwrap();

    for status in ["401 Unauthorized", "403 Forbidden"] {
        let server = CannedServer::start(response(status, b"", 0)).await;
        let result = fetcher
            .fetch_to(
                &server.url("/private.mp4"),
                &request_headers(Some("expired")),
                &temp_dir.path().join("private.part"),
            )
            .await;

        let reason = reason_of(result);
        assert!(reason.contains("authorization rejected"), "{reason}");
        assert!(reason.contains(&status[..3]), "{reason}");
    }
}

#[tokio::test]
async fn test_error_status_is_incomplete_download() {
    let server = CannedServer::start(response("500 Internal Server Error", b"oops", 4)).await;
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let fetcher = HttpFetcher::new().unwrap();

    let result = fetcher
        .fetch_to(
            &server.url("/broken.mp4"),
            &request_headers(None),
            &temp_dir.path().join("broken.part"),
        )
        .await;

    let reason = reason_of(result);
    assert!(reason.contains("HTTP status 500"), "{reason}");
}

#[tokio::test]
async fn test_truncated_body_is_rejected() {
    let server = CannedServer::start(response("200 OK", &[3u8; 500], 1000)).await;
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let fetcher = HttpFetcher::new().unwrap();

    let result = fetcher
        .fetch_to(
            &server.url("/cut.mp4"),
            &request_headers(None),
            &temp_dir.path().join("cut.part"),
        )
        .await;

    assert!(matches!(result, Err(Error::DownloadIncomplete { .. })));
}

#[tokio::test]
async fn test_store_caches_http_download() {
    let server = CannedServer::start(response("200 OK", &[5u8; 2048], 2048)).await;
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let config = CacheConfig::new().with_cache_dir(temp_dir.path().join("video-cache"));
    let store = CacheStore::new(config, Arc::new(HttpFetcher::new().unwrap()));
    let url = server.url("/reels/7.mp4");
    let key = key::resolve(&url).unwrap();

    let path = store.write(&key, &url, &request_headers(None)).await.unwrap();

    assert!(store.is_fresh(&key).await.unwrap());
    assert_eq!(std::fs::metadata(&path).unwrap().len(), 2048);
    assert!(!key::partial_path_for(store.cache_dir(), &key).exists());
}

#[tokio::test]
async fn test_store_discards_failed_http_download() {
    let server = CannedServer::start(response("404 Not Found", b"", 0)).await;
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let config = CacheConfig::new().with_cache_dir(temp_dir.path().join("video-cache"));
    let store = CacheStore::new(config, Arc::new(HttpFetcher::new().unwrap()));
    let url = server.url("/reels/missing.mp4");
    let key = key::resolve(&url).unwrap();

    let result = store.write(&key, &url, &request_headers(None)).await;

    assert!(matches!(result, Err(Error::DownloadIncomplete { .. })));
    assert!(!store.path_for(&key).exists());
    assert!(!key::partial_path_for(store.cache_dir(), &key).exists());
}
