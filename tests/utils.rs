#![allow(dead_code)]

use compute_service::profiler::testing::FakeBackend;
use compute_service::profiler::Backend;
use compute_service::search::Search;
use compute_service::{server, Profiler, State};
use std::future::Future;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

pub use compute_service::profiler::testing::PROFILE;

pub struct TestServer {
    pub base: String,
    pub profiler: Profiler,
    pub backend: FakeBackend,
    pub handle: JoinHandle<Result<(), compute_service::Error>>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl TestServer {
    pub async fn start() -> Self {
        let backend = FakeBackend::default();
        Self::start_with(backend.clone(), backend)
    }

    /// Serves with `sampler`; `backend` only provides the counters.
    pub fn start_with<B: Backend>(sampler: B, backend: FakeBackend) -> Self {
        let profiler = Profiler::new(sampler);
        let state = State::new(profiler.clone()).with_search(Search {
            limit: 1_000,
            divisor: 1,
        });
        let (tx, rx) = oneshot::channel::<()>();
        let (base, handle) = spawn(state, async move {
            let _ = rx.await;
        });
        TestServer {
            base,
            profiler,
            backend,
            handle,
            shutdown: Some(tx),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    pub fn starts(&self) -> usize {
        self.backend.started.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.backend.stopped.load(Ordering::SeqCst)
    }

    pub fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }

    pub async fn wait_idle(&self) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while self.profiler.is_active() {
            assert!(Instant::now() < deadline, "profiler still capturing");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}

fn spawn<F>(state: State, shutdown: F) -> (String, JoinHandle<Result<(), compute_service::Error>>)
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = "127.0.0.1:0".parse().unwrap();
    let (addr, server) = server::bind(&addr, state, shutdown).unwrap();
    (format!("http://{}", addr), tokio::spawn(server))
}
