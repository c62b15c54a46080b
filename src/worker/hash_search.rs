//! Blake2s nonce search
//!
//! Job payload: `<prefix>,<expected digest hex>,<difficulty>`. The answer is
//! the first nonce in `0..=difficulty * 100` for which
//! `blake2s(prefix ++ nonce)` equals the expected digest, or `0` when the
//! range holds no match. The range is capped at [`MAX_NONCE`].

use super::WorkFunction;
use crate::crypto::Blake2sHasher;
use crate::{Error, Job, Result};
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};

/// Nonces searched per unit of difficulty
const NONCES_PER_DIFFICULTY: u64 = 100;

/// Upper bound of the searched range, whatever the difficulty
pub const MAX_NONCE: u64 = 10_000_000;

/// Nonces hashed between cancellation checks
const CANCEL_CHECK_INTERVAL: u64 = 4096;

/// Default work function
#[derive(Debug, Clone, Default)]
pub struct HashSearch;

impl HashSearch {
    /// Create the work function
    pub fn new() -> Self {
        Self
    }

    fn parse(job: &Job) -> Result<(String, [u8; 32], u64)> {
        let fields = job.fields();
        if fields.len() < 3 {
            return Err(Error::worker(
                "hash-search",
                format!("expected 3 job fields, got {}", fields.len()),
            ));
        }

        let expected = hex::decode(fields[1].to_ascii_lowercase())
            .map_err(|e| Error::worker("hash-search", format!("invalid digest: {}", e)))?;
        let expected: [u8; 32] = expected.try_into().map_err(|bytes: Vec<u8>| {
            Error::worker(
                "hash-search",
                format!("digest must be 32 bytes, got {}", bytes.len()),
            )
        })?;

        let difficulty = fields[2]
            .parse::<u64>()
            .map_err(|e| Error::worker("hash-search", format!("invalid difficulty: {}", e)))?;

        Ok((fields[0].to_string(), expected, difficulty))
    }

    /// Last nonce searched for `difficulty`
    pub fn search_limit(difficulty: u64) -> u64 {
        difficulty
            .saturating_mul(NONCES_PER_DIFFICULTY)
            .min(MAX_NONCE)
    }
}

impl WorkFunction for HashSearch {
    fn name(&self) -> &'static str {
        "hash-search"
    }

    fn solve(&self, job: &Job, cancel: &CancellationToken) -> Result<String> {
        let (prefix, expected, difficulty) = Self::parse(job)?;
        let mut hasher = Blake2sHasher::new();
        let limit = Self::search_limit(difficulty);
        if limit < difficulty.saturating_mul(NONCES_PER_DIFFICULTY) {
            warn!(difficulty, limit, "Difficulty exceeds search cap");
        }

        for nonce in 0..=limit {
            if nonce % CANCEL_CHECK_INTERVAL == 0 && cancel.is_cancelled() {
                return Err(Error::cancelled("hash search"));
            }
            if hasher.hash_with_nonce(prefix.as_bytes(), nonce) == expected {
                trace!(nonce, "Nonce found");
                return Ok(nonce.to_string());
            }
        }

        trace!(limit, "No nonce in range");
        Ok("0".to_string())
    }
}
