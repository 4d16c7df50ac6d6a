//! Stamp bytes for [`FileId`](crate::FileId) disambiguation.

use std::sync::{Mutex, OnceLock};

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

/// Yields every byte value exactly once, in random order, then reshuffles.
///
/// Consecutive draws within one cycle never repeat, so successive mutations
/// of a file ID reach 256 distinct trailing bytes before any can recur.
pub struct StampGenerator {
    state: Mutex<ShuffleState>,
}

struct ShuffleState {
    rng: StdRng,
    order: [u8; 256],
    pos: usize,
}

impl ShuffleState {
    fn reshuffle(&mut self) {
        self.order.shuffle(&mut self.rng);
        self.pos = 0;
    }
}

impl StampGenerator {
    /// Create a generator from an explicit seed (reproducible sequences).
    pub fn with_seed(seed: u64) -> Self {
        Self::from_rng(StdRng::seed_from_u64(seed))
    }

    /// Create a generator seeded from OS entropy.
    pub fn from_entropy() -> Self {
        Self::from_rng(StdRng::from_entropy())
    }

    fn from_rng(rng: StdRng) -> Self {
        let mut order = [0u8; 256];
        for (i, slot) in order.iter_mut().enumerate() {
            *slot = i as u8;
        }
        let mut state = ShuffleState { rng, order, pos: 0 };
        state.reshuffle();
        Self {
            state: Mutex::new(state),
        }
    }

    /// Next byte of the current permutation.
    pub fn next_byte(&self) -> u8 {
        // The state is valid after any partial update, so a poisoned lock is
        // safe to reuse.
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.pos >= state.order.len() {
            state.reshuffle();
        }
        let byte = state.order[state.pos];
        state.pos += 1;
        byte
    }
}

impl std::fmt::Debug for StampGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StampGenerator").finish_non_exhaustive()
    }
}

/// Process-wide generator used by [`FileId::new`](crate::FileId::new).
pub fn next_stamp_byte() -> u8 {
    static GENERATOR: OnceLock<StampGenerator> = OnceLock::new();
    GENERATOR.get_or_init(StampGenerator::from_entropy).next_byte()
}
