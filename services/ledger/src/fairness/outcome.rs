//! Provably fair outcome derivation
//!
//! A round's server seed is generated and hash-committed before any bet is
//! accepted. After settlement the seed is revealed, and anyone can recompute
//! `derive_outcome("{server_seed}:{client_seed}:{nonce}")` to check the
//! result.

use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use shared::constants::SERVER_SEED_BYTES;

/// Derive the round's entropy from a random string.
///
/// SHA-256 of the UTF-8 bytes, first 8 bytes read big-endian.
pub fn derive_outcome(random: &str) -> u64 {
    let digest = Sha256::digest(random.as_bytes());
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(head)
}

/// Hex-encoded SHA-256 commitment of a server seed
pub fn commit_seed(server_seed: &str) -> String {
    hex::encode(Sha256::digest(server_seed.as_bytes()))
}

/// Check a revealed seed against its published commitment.
pub fn verify_commitment(server_seed: &str, server_seed_hash: &str) -> bool {
    commit_seed(server_seed).eq_ignore_ascii_case(server_seed_hash)
}

/// Published half of a [`SeedPair`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedCommitment {
    pub server_seed_hash: String,
    pub client_seed: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedPair {
    pub server_seed: String,
    pub server_seed_hash: String,
    pub client_seed: String,
}

impl SeedPair {
    /// Generate a fresh server seed and its commitment.
    pub fn generate(client_seed: impl Into<String>) -> Self {
        let mut bytes = [0u8; SERVER_SEED_BYTES];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self::from_server_seed(hex::encode(bytes), client_seed)
    }

    pub fn from_server_seed(server_seed: impl Into<String>, client_seed: impl Into<String>) -> Self {
        let server_seed = server_seed.into();
        Self {
            server_seed_hash: commit_seed(&server_seed),
            server_seed,
            client_seed: client_seed.into(),
        }
    }

    pub fn commitment(&self) -> SeedCommitment {
        SeedCommitment {
            server_seed_hash: self.server_seed_hash.clone(),
            client_seed: self.client_seed.clone(),
        }
    }

    pub fn verify(&self) -> bool {
        verify_commitment(&self.server_seed, &self.server_seed_hash)
    }

    /// True when this pair is the one committed to in `commitment`.
    ///
    /// A self-consistent pair with a different hash or client seed was not
    /// the published one and must not decide the round.
    pub fn is_committed_by(&self, commitment: &SeedCommitment) -> bool {
        self.verify()
            && self.server_seed_hash.eq_ignore_ascii_case(&commitment.server_seed_hash)
            && self.client_seed == commitment.client_seed
    }

    pub fn random_string(&self, nonce: u64) -> String {
        format!("{}:{}:{}", self.server_seed, self.client_seed, nonce)
    }

    pub fn outcome(&self, nonce: u64) -> u64 {
        derive_outcome(&self.random_string(nonce))
    }
}
