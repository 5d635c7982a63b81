//! A microservice that burns CPU on demand and can profile itself while doing it.

pub mod capture;
pub mod config;
pub mod error;
pub mod profiler;
pub mod search;
pub mod server;

pub use crate::config::Config;
pub use crate::error::Error;
pub use crate::profiler::{Format, PprofBackend, Profiler};
pub use crate::server::State;
