//! Binds one HTTP request to one profiling session.
//!
//! The response head is committed as soon as the session starts. The body is
//! a channel fed by a spawned task that waits for the requested duration, for
//! hyper to drop the body (client gone) or for server shutdown, whichever
//! comes first.

use crate::error::Error;
use crate::profiler::{Format, Profiler, Session};
use bytes::Bytes;
use hyper::header::{CONTENT_DISPOSITION, CONTENT_TYPE, X_CONTENT_TYPE_OPTIONS};
use hyper::{Body, Response, StatusCode};
use log::{error, info, warn};
use std::future;
use std::io;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::{task, time};
use tokio_stream::wrappers::ReceiverStream;

pub const DEFAULT_SECONDS: i64 = 30;
pub const MAX_SECONDS: i64 = 3600;
pub const CHUNK_SIZE: usize = 8 * 1024;

type Chunk = Result<Bytes, io::Error>;

/// Malformed, missing and non-positive values fall back to
/// [`DEFAULT_SECONDS`]; only values above [`MAX_SECONDS`] are rejected.
pub fn parse_seconds(value: Option<&str>) -> Result<Duration, Error> {
    let seconds = value
        .and_then(|value| value.parse::<i64>().ok())
        .filter(|seconds| *seconds > 0)
        .unwrap_or(DEFAULT_SECONDS);
    if seconds > MAX_SECONDS {
        return Err(Error::InvalidDuration { seconds });
    }
    Ok(Duration::from_secs(seconds as u64))
}

/// First value of `key` in a query string.
pub fn query_value(query: Option<&str>, key: &str) -> Option<String> {
    let pairs: Vec<(String, String)> = serde_urlencoded::from_str(query?).ok()?;
    pairs
        .into_iter()
        .find(|(name, _)| name == key)
        .map(|(_, value)| value)
}

pub fn handle_profile_request(
    query: Option<&str>,
    profiler: &Profiler,
    format: Format,
    shutdown: watch::Receiver<bool>,
) -> Result<Response<Body>, Error> {
    let seconds = query_value(query, "seconds");
    let duration = match parse_seconds(seconds.as_deref()) {
        Ok(duration) => duration,
        Err(err) => {
            warn!("Rejected profile request: {}", err);
            return bad_request(err.to_string());
        }
    };

    let head = Response::builder()
        .header(X_CONTENT_TYPE_OPTIONS, "nosniff")
        .header(CONTENT_TYPE, format.content_type())
        .header(CONTENT_DISPOSITION, format.content_disposition());

    let session = match profiler.try_start() {
        Ok(session) => session,
        Err(err) => {
            warn!("Could not enable CPU profiling: {}", err);
            return bad_request(format!("Could not enable CPU profiling: {}", err));
        }
    };

    let (tx, rx) = mpsc::channel::<Chunk>(4);
    let response = head.body(Body::wrap_stream(ReceiverStream::new(rx)))?;
    info!("CPU profiling started for {:?}", duration);
    tokio::spawn(capture(session, duration, format, tx, shutdown));
    Ok(response)
}

async fn capture(
    session: Session,
    duration: Duration,
    format: Format,
    tx: mpsc::Sender<Chunk>,
    shutdown: watch::Receiver<bool>,
) {
    tokio::select! {
        _ = time::sleep(duration) => {}
        _ = tx.closed() => {
            info!("CPU profiling cancelled: client went away");
            return;
        }
        _ = shutdown_requested(shutdown) => {
            warn!("CPU profiling cancelled: server is shutting down");
            let err = io::Error::new(io::ErrorKind::Interrupted, "server is shutting down");
            let _ = tx.try_send(Err(err));
            return;
        }
    }

    let profile = match task::spawn_blocking(move || session.finish(format)).await {
        Ok(Ok(profile)) => profile,
        Ok(Err(err)) => return abort(&tx, err.to_string()).await,
        Err(err) => return abort(&tx, err.to_string()).await,
    };
    info!("CPU profiling stopped, sending {} bytes", profile.len());

    let mut profile = Bytes::from(profile);
    while !profile.is_empty() {
        let chunk = profile.split_to(CHUNK_SIZE.min(profile.len()));
        if tx.send(Ok(chunk)).await.is_err() {
            warn!("Client went away before the profile was sent");
            break;
        }
    }
}

/// Resolves once `true` is published. A dropped sender means shutdown can
/// never be requested.
pub async fn shutdown_requested(mut shutdown: watch::Receiver<bool>) {
    while !*shutdown.borrow() {
        if shutdown.changed().await.is_err() {
            future::pending::<()>().await;
        }
    }
}

// The head is already out, so a failure can only cut the body short.
async fn abort(tx: &mpsc::Sender<Chunk>, reason: String) {
    error!("Can't build CPU profile: {}", reason);
    let err = io::Error::new(io::ErrorKind::Other, reason);
    let _ = tx.send(Err(err)).await;
}

fn bad_request(message: String) -> Result<Response<Body>, Error> {
    let response = Response::builder()
        .status(StatusCode::BAD_REQUEST)
        .header(X_CONTENT_TYPE_OPTIONS, "nosniff")
        .header(CONTENT_TYPE, "text/plain; charset=utf-8")
        .body(message.into())?;
    Ok(response)
}
