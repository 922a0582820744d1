//! Random name generation for disposable resources.
//!
//! Overlay filenames and temporary logical volumes get randomized names so
//! they cannot collide with guest-defined ones. The source of names is a
//! trait so tests can supply a deterministic generator.

use rand::Rng;

/// Supplies short random names.
pub trait NameSource {
    /// Return `len` random lowercase ASCII letters.
    fn random_chars(&mut self, len: usize) -> String;
}

/// Production name source backed by the thread-local RNG.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomNames;

impl NameSource for RandomNames {
    fn random_chars(&mut self, len: usize) -> String {
        let mut rng = rand::thread_rng();
        (0..len)
            .map(|_| (b'a' + rng.gen_range(0..26u8)) as char)
            .collect()
    }
}
