//! Synthetic CPU load: draw random numbers until one is a multiple of
//! [`DIVISOR`] or the iteration limit runs out.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

pub const DIVISOR: u64 = 287_654_321;
pub const LIMIT: u64 = 4_000_000_000;

/// A generator shared by every request. Each draw takes the lock, so
/// concurrent searches contend on it.
#[derive(Clone)]
pub struct SharedRng(Arc<Mutex<StdRng>>);

impl SharedRng {
    pub fn from_entropy() -> Self {
        SharedRng(Arc::new(Mutex::new(StdRng::from_entropy())))
    }

    pub fn seed_from_u64(seed: u64) -> Self {
        SharedRng(Arc::new(Mutex::new(StdRng::seed_from_u64(seed))))
    }

    fn next_value(&self) -> u64 {
        let mut rng = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        non_negative(&mut *rng)
    }
}

pub enum Source {
    Shared(SharedRng),
    /// A private generator seeded from the current Unix time in microseconds.
    Seeded,
}

#[derive(Clone, Copy, Debug)]
pub struct Search {
    pub limit: u64,
    pub divisor: u64,
}

impl Default for Search {
    fn default() -> Self {
        Search {
            limit: LIMIT,
            divisor: DIVISOR,
        }
    }
}

#[derive(Debug)]
pub struct Outcome {
    pub found: Option<u64>,
    pub divisor: u64,
    pub elapsed: Duration,
}

impl Search {
    pub fn run(&self, source: &Source) -> Outcome {
        let start = Instant::now();
        match source {
            Source::Shared(shared) => self.scan(start, || shared.next_value()),
            Source::Seeded => {
                let mut rng = StdRng::seed_from_u64(unix_micros());
                self.scan(start, || non_negative(&mut rng))
            }
        }
    }

    fn scan<F>(&self, start: Instant, mut next: F) -> Outcome
    where
        F: FnMut() -> u64,
    {
        let divisor = self.divisor.max(1);
        for _ in 0..self.limit {
            let n = next();
            if n % divisor == 0 {
                return Outcome {
                    found: Some(n),
                    divisor,
                    elapsed: start.elapsed(),
                };
            }
        }
        Outcome {
            found: None,
            divisor,
            elapsed: start.elapsed(),
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.found {
            Some(n) => write!(
                f,
                "{} is a multiple of {}\n\nComputation took {:?}",
                n, self.divisor, self.elapsed
            ),
            None => write!(f, "Could not find a multiple of {}", self.divisor),
        }
    }
}

// 63-bit values, the same range a signed integer generator yields.
fn non_negative<R: Rng + ?Sized>(rng: &mut R) -> u64 {
    rng.gen::<u64>() >> 1
}

fn unix_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or_default()
}
