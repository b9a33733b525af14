//! Streaming downloads against a local HTTP server.

use axum::Router;
use axum::body::Body;
use axum::http::StatusCode;
use axum::routing::get;
use tempfile::TempDir;

use detprep_core::fetch::{Fetch, HttpFetcher};
use detprep_core::PrepError;

const BODY_LEN: usize = 256 * 1024;

/// One chunk, then the body fails and the connection is cut.
fn truncated_body() -> impl futures::Stream<Item = Result<Vec<u8>, std::io::Error>> {
    futures::stream::iter(vec![
        Ok(vec![1u8; 1024]),
        Err(std::io::Error::other("upstream went away")),
    ])
}

async fn serve() -> String {
    let app = Router::new()
        .route("/yolov8n.onnx", get(|| async { vec![7u8; BODY_LEN] }))
        .route("/gone.onnx", get(|| async { StatusCode::NOT_FOUND }))
        .route("/truncated.onnx", get(|| async { Body::from_stream(truncated_body()) }));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

fn fetcher() -> HttpFetcher {
    HttpFetcher::with_client(reqwest::Client::builder().no_proxy().build().unwrap())
}

#[tokio::test]
async fn test_download_streams_body_to_disk() {
    let base = serve().await;
    let dir = TempDir::new().unwrap();
    let dest = dir.path().join("cache").join("yolov8n.onnx");

    let written = fetcher()
        .download(&format!("{base}/yolov8n.onnx"), &dest)
        .await
        .unwrap();

    assert_eq!(written, BODY_LEN as u64);
    let body = std::fs::read(&dest).unwrap();
    assert_eq!(body.len(), BODY_LEN);
    assert!(body.iter().all(|b| *b == 7));
}

#[tokio::test]
async fn test_error_status_is_a_transfer_error() {
    let base = serve().await;
    let dir = TempDir::new().unwrap();
    let dest = dir.path().join("gone.onnx");

    let result = fetcher()
        .download(&format!("{base}/gone.onnx"), &dest)
        .await;

    match result {
        Err(PrepError::Transfer(msg)) => assert!(msg.contains("404")),
        other => panic!("unexpected result: {other:?}"),
    }
    assert!(!dest.exists());
}

#[tokio::test]
async fn test_dropped_connection_is_a_transfer_error() {
    let base = serve().await;
    let dir = TempDir::new().unwrap();
    let dest = dir.path().join("truncated.onnx");

    let result = fetcher()
        .download(&format!("{base}/truncated.onnx"), &dest)
        .await;

    assert!(matches!(result, Err(PrepError::Transfer(_))), "{result:?}");
    // the partial file is left for the caller to discard
    assert!(dest.exists());
    assert!(std::fs::metadata(&dest).unwrap().len() <= 1024);
    detprep_core::fetch::discard_partial(&dest).unwrap();
    assert!(!dest.exists());
}
