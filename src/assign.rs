//! Strategies for placing observations that a split criterion left unclassified.
//!
//! When a partition is split into a "left" piece (kept) and a "right" piece
//! (extracted), the criterion may only speak about some observations. The
//! rest are handed to an [`ObsAssigner`]. The effect of the choice on
//! convergence and on the quality of the final model is not characterized;
//! the strategy is therefore a parameter rather than a fixed rule.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::reference::ObsId;

pub trait ObsAssigner {
    /// Returns `true` to keep `obs` in the left piece, `false` to extract it with the right piece.
    fn assign_left(&mut self, obs: ObsId) -> bool;
}

/// Uniform coin flip per observation, from a seedable generator.
///
/// Two assigners built with the same seed make the same choices.
#[derive(Debug, Clone)]
pub struct RandomAssigner {
    rng: ChaCha8Rng,
}

impl RandomAssigner {
    pub fn seeded(seed: u64) -> Self {
        RandomAssigner {
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }
}

impl ObsAssigner for RandomAssigner {
    fn assign_left(&mut self, _obs: ObsId) -> bool {
        self.rng.random_bool(0.5)
    }
}

/// Keeps every unclassified observation in the left piece.
#[derive(Debug, Default, Copy, Clone)]
pub struct KeepLeft;

impl ObsAssigner for KeepLeft {
    fn assign_left(&mut self, _obs: ObsId) -> bool {
        true
    }
}

impl<A: ObsAssigner + ?Sized> ObsAssigner for &mut A {
    fn assign_left(&mut self, obs: ObsId) -> bool {
        (**self).assign_left(obs)
    }
}
