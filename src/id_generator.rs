//! Id Generator

use rand::{rngs, Rng, SeedableRng};
use std::cell::RefCell;
use std::fmt;

/// Interface for generating trace and span identifiers.
///
/// Identifiers must be non-zero: zero is the wire encoding for "absent".
pub trait IdGenerator: Send + Sync + fmt::Debug {
    /// Generate a new non-zero 64-bit id.
    fn next_id(&self) -> u64;
}

/// Default [`IdGenerator`] implementation.
///
/// Draws ids from a per-thread rng seeded from OS entropy, re-drawing on the
/// (rare) zero value.
#[derive(Clone, Debug, Default)]
pub struct RandomIdGenerator {
    _private: (),
}

impl IdGenerator for RandomIdGenerator {
    fn next_id(&self) -> u64 {
        CURRENT_RNG.with(|rng| {
            let mut rng = rng.borrow_mut();
            loop {
                let id = rng.gen::<u64>();
                if id != 0 {
                    return id;
                }
            }
        })
    }
}

thread_local! {
    /// Store random number generator for each thread
    static CURRENT_RNG: RefCell<rngs::StdRng> = RefCell::new(rngs::StdRng::from_entropy());
}
