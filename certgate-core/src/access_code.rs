//! Access code generation
//!
//! Codes are short, typed by hand and read aloud, so the alphabet leaves out
//! characters that are easy to confuse (`0`/`O`, `1`/`I`).

use std::sync::Mutex;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Characters an access code is drawn from
pub const ACCESS_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Number of characters in an access code
pub const ACCESS_CODE_LENGTH: usize = 8;

/// Generate an access code using the thread-local RNG
pub fn generate_access_code() -> String {
    generate_access_code_with(&mut rand::thread_rng())
}

/// Generate an access code from the given random source
pub fn generate_access_code_with<R: Rng + ?Sized>(rng: &mut R) -> String {
    (0..ACCESS_CODE_LENGTH)
        .map(|_| {
            let idx = rng.gen_range(0..ACCESS_CODE_ALPHABET.len());
            ACCESS_CODE_ALPHABET[idx] as char
        })
        .collect()
}

/// Normalize user input before comparing it with a stored code
pub fn normalize_access_code(input: &str) -> String {
    input.trim().to_uppercase()
}

/// Source of fresh access codes
pub trait CodeGenerator: Send + Sync {
    fn generate(&self) -> String;
}

/// Code generator backed by the thread-local RNG
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomCodeGenerator;

impl CodeGenerator for RandomCodeGenerator {
    fn generate(&self) -> String {
        generate_access_code()
    }
}

/// Deterministic code generator (for tests)
pub struct SeededCodeGenerator {
    rng: Mutex<StdRng>,
}

impl SeededCodeGenerator {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl CodeGenerator for SeededCodeGenerator {
    fn generate(&self) -> String {
        match self.rng.lock() {
            Ok(mut rng) => generate_access_code_with(&mut *rng),
            Err(poisoned) => generate_access_code_with(&mut *poisoned.into_inner()),
        }
    }
}
