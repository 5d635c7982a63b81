//! The process-wide CPU profiling facility.
//!
//! A [`Profiler`] is `Idle` or `Capturing`. [`Profiler::try_start`] is the only
//! way into `Capturing` and hands back a [`Session`]; dropping that session is
//! the only way out, so every capture returns the facility to `Idle` exactly
//! once, whether it finished, was cancelled or unwound.

use crate::error::Error;
use pprof::protos::Message;
use pprof::{ProfilerGuard, ProfilerGuardBuilder};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub const DEFAULT_FREQUENCY: i32 = 100;

// Frames of the signal handler and unwinder, not of the profiled program.
const BLOCKLIST: &[&str] = &["libc", "libgcc", "pthread", "vdso"];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Format {
    /// Protobuf `profile.proto`, readable by `go tool pprof`.
    Protobuf,
    /// An SVG flame graph.
    Flamegraph,
}

impl Format {
    pub fn content_type(self) -> &'static str {
        match self {
            Format::Protobuf => "application/octet-stream",
            Format::Flamegraph => "image/svg+xml",
        }
    }

    pub fn content_disposition(self) -> &'static str {
        match self {
            Format::Protobuf => r#"attachment; filename="profile""#,
            Format::Flamegraph => "inline",
        }
    }
}

/// Something able to sample the CPU of this process.
pub trait Backend: Send + Sync + 'static {
    fn start(&self) -> Result<Box<dyn Recording>, Error>;
}

/// A running capture. Dropping it without calling `finish` stops sampling
/// and discards whatever was collected.
pub trait Recording: Send {
    fn finish(self: Box<Self>, format: Format) -> Result<Vec<u8>, Error>;
}

#[derive(Clone)]
pub struct Profiler {
    backend: Arc<dyn Backend>,
    active: Arc<AtomicBool>,
}

impl Profiler {
    pub fn new<B: Backend>(backend: B) -> Self {
        Profiler {
            backend: Arc::new(backend),
            active: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Fails fast with [`Error::Busy`] when another session is running.
    pub fn try_start(&self) -> Result<Session, Error> {
        if self
            .active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(Error::Busy);
        }
        // Owns the flag from here on: a failing backend drops it straight back to idle.
        let mut session = Session {
            recording: None,
            active: self.active.clone(),
        };
        session.recording = Some(self.backend.start()?);
        Ok(session)
    }
}

pub struct Session {
    recording: Option<Box<dyn Recording>>,
    active: Arc<AtomicBool>,
}

impl Session {
    /// Stops sampling and encodes what was captured.
    pub fn finish(mut self, format: Format) -> Result<Vec<u8>, Error> {
        let recording = self
            .recording
            .take()
            .ok_or_else(|| Error::Backend("no recording in progress".into()))?;
        recording.finish(format)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.recording.take();
        self.active.store(false, Ordering::Release);
    }
}

/// Signal-based sampler from the `pprof` crate.
pub struct PprofBackend {
    frequency: i32,
}

impl PprofBackend {
    pub fn new(frequency: i32) -> Self {
        PprofBackend { frequency }
    }
}

impl Default for PprofBackend {
    fn default() -> Self {
        PprofBackend::new(DEFAULT_FREQUENCY)
    }
}

impl Backend for PprofBackend {
    fn start(&self) -> Result<Box<dyn Recording>, Error> {
        let guard = ProfilerGuardBuilder::default()
            .frequency(self.frequency)
            .blocklist(BLOCKLIST)
            .build()?;
        Ok(Box::new(PprofRecording { guard }))
    }
}

struct PprofRecording {
    guard: ProfilerGuard<'static>,
}

impl Recording for PprofRecording {
    fn finish(self: Box<Self>, format: Format) -> Result<Vec<u8>, Error> {
        let report = self.guard.report().build()?;
        let mut buffer = Vec::new();
        match format {
            Format::Protobuf => {
                report
                    .pprof()?
                    .encode(&mut buffer)
                    .map_err(|err| Error::Backend(err.to_string()))?;
            }
            Format::Flamegraph => report.flamegraph(&mut buffer)?,
        }
        Ok(buffer)
    }
}

/// In-memory backend for tests.
#[cfg(any(test, feature = "testing"))]
pub mod testing {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    pub const PROFILE: &[u8] = b"fake cpu profile";

    /// Counts starts and stops and returns a fixed profile.
    #[derive(Clone, Default)]
    pub struct FakeBackend {
        pub started: Arc<AtomicUsize>,
        pub stopped: Arc<AtomicUsize>,
        pub fail: bool,
    }

    impl Backend for FakeBackend {
        fn start(&self) -> Result<Box<dyn Recording>, Error> {
            if self.fail {
                return Err(Error::Backend("sampler unavailable".into()));
            }
            self.started.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(FakeRecording {
                stopped: self.stopped.clone(),
            }))
        }
    }

    struct FakeRecording {
        stopped: Arc<AtomicUsize>,
    }

    impl Recording for FakeRecording {
        fn finish(self: Box<Self>, _format: Format) -> Result<Vec<u8>, Error> {
            Ok(PROFILE.to_vec())
        }
    }

    impl Drop for FakeRecording {
        fn drop(&mut self) {
            self.stopped.fetch_add(1, Ordering::SeqCst);
        }
    }
}
