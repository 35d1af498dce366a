//! Die roll generation
//!
//! The die outcome moves real money, so the production source draws from the
//! operating system CSPRNG with rejection sampling — never a PRNG seeded
//! from anything a client could observe. Deterministic sources exist for
//! reproducible tests.

use rand::rngs::OsRng;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;
use std::collections::VecDeque;

/// Source of single die rolls in `[1, 6]`. Always succeeds.
pub trait DiceSource: Send {
    fn roll(&mut self) -> u8;
}

/// Cryptographically secure die backed by the OS entropy source
#[derive(Debug, Default)]
pub struct SecureDice;

impl SecureDice {
    pub fn new() -> Self {
        SecureDice
    }
}

impl DiceSource for SecureDice {
    fn roll(&mut self) -> u8 {
        roll_uniform(&mut OsRng)
    }
}

/// Deterministic die for tests, seeded ChaCha20
#[derive(Debug, Clone)]
pub struct SeededDice {
    inner: ChaCha20Rng,
}

impl SeededDice {
    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self {
            inner: ChaCha20Rng::from_seed(seed),
        }
    }
}

impl DiceSource for SeededDice {
    fn roll(&mut self) -> u8 {
        roll_uniform(&mut self.inner)
    }
}

/// Fully scripted die for tests that need exact sequences. Panics when the
/// script runs dry, which in a test is the right failure.
#[derive(Debug, Clone, Default)]
pub struct ScriptedDice {
    rolls: VecDeque<u8>,
}

impl ScriptedDice {
    pub fn new(rolls: &[u8]) -> Self {
        debug_assert!(rolls.iter().all(|r| (1..=6).contains(r)));
        Self {
            rolls: rolls.iter().copied().collect(),
        }
    }

    pub fn push(&mut self, roll: u8) {
        self.rolls.push_back(roll);
    }

    pub fn remaining(&self) -> usize {
        self.rolls.len()
    }
}

impl DiceSource for ScriptedDice {
    fn roll(&mut self) -> u8 {
        self.rolls.pop_front().expect("scripted dice exhausted")
    }
}

// Rejection sampling keeps the distribution uniform; a bare modulo would
// bias low faces.
fn roll_uniform<R: RngCore>(rng: &mut R) -> u8 {
    let threshold = u64::MAX - (u64::MAX % 6);
    let mut value = rng.next_u64();
    while value >= threshold {
        value = rng.next_u64();
    }
    (value % 6) as u8 + 1
}
