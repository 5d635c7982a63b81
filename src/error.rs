use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("profile duration {seconds}s is too large")]
    InvalidDuration { seconds: i64 },
    #[error("cpu profiling already in use")]
    Busy,
    #[error("profiler backend failed: {0}")]
    Backend(String),
    #[error("config error: {0}")]
    Config(String),
    #[error("worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Hyper(#[from] hyper::Error),
    #[error(transparent)]
    Http(#[from] hyper::http::Error),
}

impl From<pprof::Error> for Error {
    fn from(err: pprof::Error) -> Self {
        Error::Backend(err.to_string())
    }
}
