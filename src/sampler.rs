//! # Sampler
//!
//! Sampling reduces the volume of traces reported to the collector. The
//! decision is made once, at the local root of a trace, from the trace id
//! alone; descendants inherit it through their context. Spans that lose the
//! decision still carry identifiers downstream so the rest of the trace
//! stays consistent.

use std::fmt;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

/// Decides whether a trace with the given id is reported to the collector.
///
/// Implementations must be stateless or internally synchronized: the tracer
/// calls them from many threads. The decision must be stable for a given
/// trace id within one implementation so sibling processes agree.
pub trait Sampler: CloneSampler + Send + Sync + fmt::Debug {
    /// Returns true if the trace with the given id should be reported.
    fn is_sampled(&self, trace_id: u64) -> bool;
}

/// This trait should not be used directly; it exists so `Box<dyn Sampler>`
/// is cloneable.
pub trait CloneSampler {
    fn box_clone(&self) -> Box<dyn Sampler>;
}

impl<T> CloneSampler for T
where
    T: Sampler + Clone + 'static,
{
    fn box_clone(&self) -> Box<dyn Sampler> {
        Box::new(self.clone())
    }
}

impl Clone for Box<dyn Sampler> {
    fn clone(&self) -> Self {
        self.box_clone()
    }
}

/// Samples every trace. This is the default.
#[derive(Clone, Copy, Debug, Default)]
pub struct AlwaysSampler;

impl Sampler for AlwaysSampler {
    fn is_sampled(&self, _trace_id: u64) -> bool {
        true
    }
}

/// Samples no traces. Spans still propagate identifiers downstream.
#[derive(Clone, Copy, Debug, Default)]
pub struct NeverSampler;

impl Sampler for NeverSampler {
    fn is_sampled(&self, _trace_id: u64) -> bool {
        false
    }
}

/// Samples a fraction of traces, keyed on the trace id so every node in the
/// system makes the same decision for the same trace.
///
/// Rates >= 1.0 always sample; rates <= 0.0 never do.
#[derive(Clone, Copy, Debug)]
pub struct BoundarySampler {
    boundary: u64,
}

impl BoundarySampler {
    /// Create a sampler retaining approximately `rate` of traces.
    pub fn create(rate: f64) -> Self {
        let boundary = (rate.clamp(0.0, 1.0) * (1u64 << 63) as f64) as u64;
        BoundarySampler { boundary }
    }
}

impl Sampler for BoundarySampler {
    fn is_sampled(&self, trace_id: u64) -> bool {
        (trace_id >> 1) < self.boundary
    }
}

/// Samples at most a fixed number of traces per second, regardless of
/// traffic volume.
#[derive(Debug)]
pub struct RateLimitingSampler {
    traces_per_second: u32,
    state: Mutex<RateLimitState>,
}

#[derive(Debug, Default)]
struct RateLimitState {
    second: u64,
    taken: u32,
}

impl RateLimitingSampler {
    /// Create a sampler retaining up to `traces_per_second` traces.
    pub fn create(traces_per_second: u32) -> Self {
        RateLimitingSampler {
            traces_per_second,
            state: Mutex::new(RateLimitState::default()),
        }
    }

    fn now_seconds() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }
}

impl Sampler for RateLimitingSampler {
    fn is_sampled(&self, _trace_id: u64) -> bool {
        if self.traces_per_second == 0 {
            return false;
        }
        let now = Self::now_seconds();
        match self.state.lock() {
            Ok(mut state) => {
                if state.second != now {
                    state.second = now;
                    state.taken = 0;
                }
                if state.taken < self.traces_per_second {
                    state.taken += 1;
                    true
                } else {
                    false
                }
            }
            Err(_) => false,
        }
    }
}

impl Clone for RateLimitingSampler {
    fn clone(&self) -> Self {
        RateLimitingSampler::create(self.traces_per_second)
    }
}
