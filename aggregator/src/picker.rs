//! Cheap random index draws for representative-sample selection.

use rand::{RngCore, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;

/// Draws uniform indexes from a xoshiro256++ stream seeded once from OS
/// entropy.
///
/// Every aggregation window needs one draw; going to the OS (or a shared
/// global generator) for each would stall the aggregator under load, so a
/// single 64-bit output is split into two 32-bit draws and the upper half
/// is kept for the next call.
#[derive(Debug)]
pub(crate) struct IndexPicker {
    rng: Xoshiro256PlusPlus,
    spare: Option<u32>,
}

impl IndexPicker {
    /// Seed the 256-bit state from the operating system.
    pub(crate) fn new() -> Self {
        Self {
            rng: Xoshiro256PlusPlus::from_entropy(),
            spare: None,
        }
    }

    fn next_u32(&mut self) -> u32 {
        match self.spare.take() {
            Some(v) => v,
            None => {
                let word = self.rng.next_u64();
                self.spare = Some((word >> 32) as u32);
                word as u32
            }
        }
    }

    /// A uniform index into a collection of `len` elements.
    ///
    /// # Panics
    ///
    /// Panics if `len` is zero.
    pub(crate) fn pick(&mut self, len: usize) -> usize {
        assert!(len > 0, "cannot pick from an empty collection");
        self.next_u32() as usize % len
    }
}
