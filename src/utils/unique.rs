//! Collision-checked random token generation.
//!
//! Session tokens identify peers on the wire, so two live peers must never
//! share one. The generator keeps a membership set of issued values and
//! re-rolls until it produces an unseen token; `free` returns a value to
//! the pool once its peer is gone.

use std::collections::HashSet;
use std::sync::Mutex;

use rand::distr::{Alphanumeric, SampleString};

/// Default token length, matching the reference deployment.
pub const DEFAULT_TOKEN_LENGTH: usize = 15;

/// Random alphanumeric string generator with a uniqueness guarantee over
/// the set of currently issued values.
#[derive(Debug)]
pub struct UniqueTokenGenerator {
    length: usize,
    issued: Mutex<HashSet<String>>,
}

impl UniqueTokenGenerator {
    /// Create a generator producing tokens of `length` characters.
    pub fn new(length: usize) -> Self {
        Self {
            length,
            issued: Mutex::new(HashSet::new()),
        }
    }

    /// Produce the next unique token.
    pub fn next(&self) -> String {
        let mut issued = match self.issued.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        loop {
            let token = Alphanumeric.sample_string(&mut rand::rng(), self.length);
            if issued.insert(token.clone()) {
                return token;
            }
        }
    }

    /// Return a token to the pool.
    pub fn free(&self, token: &str) {
        if let Ok(mut issued) = self.issued.lock() {
            issued.remove(token);
        }
    }

    /// Return every issued token to the pool.
    pub fn free_all(&self) {
        if let Ok(mut issued) = self.issued.lock() {
            issued.clear();
        }
    }

    /// Number of currently issued tokens.
    pub fn issued_count(&self) -> usize {
        self.issued.lock().map(|set| set.len()).unwrap_or(0)
    }
}

impl Default for UniqueTokenGenerator {
    fn default() -> Self {
        Self::new(DEFAULT_TOKEN_LENGTH)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_are_unique_and_sized() {
        let generator = UniqueTokenGenerator::new(15);
        let mut seen = HashSet::new();
        for _ in 0..256 {
            let token = generator.next();
            assert_eq!(token.len(), 15);
            assert!(seen.insert(token));
        }
        assert_eq!(generator.issued_count(), 256);
    }

    #[test]
    fn freed_tokens_leave_the_pool() {
        let generator = UniqueTokenGenerator::new(8);
        let token = generator.next();
        assert_eq!(generator.issued_count(), 1);
        generator.free(&token);
        assert_eq!(generator.issued_count(), 0);

        generator.next();
        generator.next();
        generator.free_all();
        assert_eq!(generator.issued_count(), 0);
    }
}
