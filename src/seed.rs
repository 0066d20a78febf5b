//! Seed policy for generation requests.
//!
//! A raw seed of `-1` asks for a random seed. The random value is drawn once
//! per submission, uniformly from `[0, MAX_SAFE_INTEGER)`, and then fixed for
//! that request so the user can reproduce it later.

use std::fmt;

use rand::Rng;

use crate::error::{AvatarError, AvatarResult};

/// Sentinel meaning "pick a random seed at submission time".
pub const RANDOM_SEED: i64 = -1;

/// Largest integer a JSON consumer can hold exactly in a double (2^53 - 1).
pub const MAX_SAFE_INTEGER: u64 = (1 << 53) - 1;

/// Requested seed for a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Seed {
    #[default]
    Random,
    Fixed(u64),
}

impl Seed {
    /// Interpret a raw user value: `-1` is random, other negatives are rejected.
    pub fn from_raw(raw: i64) -> AvatarResult<Self> {
        match raw {
            RANDOM_SEED => Ok(Seed::Random),
            n if n >= 0 => Ok(Seed::Fixed(n as u64)),
            n => Err(AvatarError::validation(
                "seed",
                format!("Seed must be -1 (random) or non-negative, got {}", n),
            )),
        }
    }

    /// The concrete seed for one request.
    pub fn resolve<R: Rng + ?Sized>(self, rng: &mut R) -> u64 {
        match self {
            Seed::Random => rng.random_range(0..MAX_SAFE_INTEGER),
            Seed::Fixed(seed) => seed,
        }
    }
}

impl fmt::Display for Seed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Seed::Random => write!(f, "random"),
            Seed::Fixed(seed) => write!(f, "{}", seed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn sentinel_is_random() {
        assert_eq!(Seed::from_raw(-1).unwrap(), Seed::Random);
    }

    #[test]
    fn fixed_seed_passes_through() {
        let mut rng = StdRng::seed_from_u64(1);
        let seed = Seed::from_raw(1234).unwrap();
        assert_eq!(seed.resolve(&mut rng), 1234);
        assert_eq!(seed.resolve(&mut rng), 1234);
        assert_eq!(Seed::from_raw(0).unwrap().resolve(&mut rng), 0);
    }

    #[test]
    fn other_negatives_are_rejected() {
        let err = Seed::from_raw(-5).unwrap_err();
        assert_eq!(err.category(), "validation");
    }

    #[test]
    fn random_seed_is_drawn_per_call_within_safe_range() {
        let mut rng = StdRng::seed_from_u64(99);
        let draws: Vec<u64> = (0..16).map(|_| Seed::Random.resolve(&mut rng)).collect();
        assert!(draws.iter().all(|&s| s < MAX_SAFE_INTEGER));
        let mut unique = draws.clone();
        unique.sort_unstable();
        unique.dedup();
        assert!(unique.len() > 1, "independent draws should differ");
    }
}
