mod utils;

use reqwest::StatusCode;
use std::time::{Duration, Instant};
use utils::{TestServer, PROFILE};

#[tokio::test(flavor = "multi_thread")]
async fn profile_is_an_attachment_after_the_duration() {
    let server = TestServer::start().await;
    let start = Instant::now();
    let resp = reqwest::get(&server.url("/customprofile?seconds=1")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let headers = resp.headers();
    assert_eq!(headers["content-type"], "application/octet-stream");
    assert_eq!(headers["content-disposition"], r#"attachment; filename="profile""#);
    assert_eq!(headers["x-content-type-options"], "nosniff");

    let body = resp.bytes().await.unwrap();
    assert_eq!(&body[..], PROFILE);
    assert!(start.elapsed() >= Duration::from_secs(1));
    assert!(!server.profiler.is_active());
    assert_eq!((server.starts(), server.stops()), (1, 1));
}

#[tokio::test(flavor = "multi_thread")]
async fn too_large_duration_is_rejected_without_capturing() {
    let server = TestServer::start().await;
    let resp = reqwest::get(&server.url("/customprofile?seconds=5000")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(resp.text().await.unwrap(), "profile duration 5000s is too large");
    assert!(!server.profiler.is_active());
    assert_eq!(server.starts(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_request_is_refused_and_first_capture_survives() {
    let server = TestServer::start().await;
    let first = tokio::spawn(reqwest::get(server.url("/customprofile?seconds=2")));
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(server.profiler.is_active());

    let second = reqwest::get(&server.url("/customprofile?seconds=1")).await.unwrap();
    assert_eq!(second.status(), StatusCode::BAD_REQUEST);
    let text = second.text().await.unwrap();
    assert!(text.starts_with("Could not enable CPU profiling"), "{}", text);
    assert!(server.profiler.is_active());

    let first = first.await.unwrap().unwrap();
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(&first.bytes().await.unwrap()[..], PROFILE);
    assert_eq!(server.starts(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn disconnect_cancels_the_capture() {
    let server = TestServer::start().await;
    let resp = reqwest::get(&server.url("/customprofile?seconds=3600")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(server.profiler.is_active());
    drop(resp);

    server.wait_idle().await;
    assert_eq!(server.stops(), 1);

    let resp = reqwest::get(&server.url("/customprofile?seconds=1")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(&resp.bytes().await.unwrap()[..], PROFILE);
}

#[tokio::test(flavor = "multi_thread")]
async fn missing_seconds_starts_a_default_capture() {
    let server = TestServer::start().await;
    for query in &["", "?seconds=abc", "?seconds=-1"] {
        let url = server.url(&format!("/customprofile{}", query));
        let resp = reqwest::get(&url).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(server.profiler.is_active());
        drop(resp);
        server.wait_idle().await;
    }
    assert_eq!(server.starts(), 3);
}

#[tokio::test(flavor = "multi_thread")]
async fn debug_endpoints_share_the_profiler() {
    let server = TestServer::start().await;
    let flame = tokio::spawn(reqwest::get(server.url("/debug/pprof/flamegraph?seconds=1")));
    tokio::time::sleep(Duration::from_millis(300)).await;

    let busy = reqwest::get(&server.url("/debug/pprof/profile?seconds=1")).await.unwrap();
    assert_eq!(busy.status(), StatusCode::BAD_REQUEST);

    let flame = flame.await.unwrap().unwrap();
    assert_eq!(flame.status(), StatusCode::OK);
    assert_eq!(flame.headers()["content-type"], "image/svg+xml");
    assert!(!flame.bytes().await.unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn shutdown_cuts_a_running_capture_short() {
    let mut server = TestServer::start().await;
    let resp = reqwest::get(&server.url("/customprofile?seconds=3600")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(server.profiler.is_active());

    server.shutdown();
    server.wait_idle().await;
    assert_eq!(server.stops(), 1);
    assert!(resp.bytes().await.is_err());

    let handle = &mut server.handle;
    let stopped = tokio::time::timeout(Duration::from_secs(5), handle).await;
    assert!(stopped.expect("server kept draining").unwrap().is_ok());
}
