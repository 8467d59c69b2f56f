//! Client side of the signed-random provider
//!
//! The provider itself is external. This module owns the request-id
//! counter and turns the provider's random string into an outcome.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::outcome::{derive_outcome, SeedCommitment};
use crate::errors::{LedgerError, Result};

/// Random value returned by the provider, with its signature
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedRandom {
    pub random: String,
    pub signature: String,
}

#[async_trait]
pub trait RandomOracle: Send + Sync {
    async fn request(&self, request_id: u64, commitment: &SeedCommitment) -> Result<SignedRandom>;
}

/// Request ids increase by one and wrap at `modulus`
#[derive(Debug)]
pub struct RandomRequestCounter {
    next: AtomicU64,
    modulus: u64,
}

impl RandomRequestCounter {
    pub fn new(modulus: u64) -> Result<Self> {
        Self::starting_at(0, modulus)
    }

    pub fn starting_at(start: u64, modulus: u64) -> Result<Self> {
        if modulus == 0 {
            return Err(LedgerError::InvalidInput("request id modulus must be positive".to_string()));
        }
        Ok(Self {
            next: AtomicU64::new(start % modulus),
            modulus,
        })
    }

    pub fn next_id(&self) -> u64 {
        let modulus = self.modulus;
        self.next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                Some((current + 1) % modulus)
            })
            .unwrap_or_else(|current| current)
    }
}

/// A drawn outcome with the material needed to audit it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Draw {
    pub request_id: u64,
    pub signed: SignedRandom,
    pub outcome: u64,
}

pub struct RandomClient {
    oracle: Arc<dyn RandomOracle>,
    counter: RandomRequestCounter,
}

impl RandomClient {
    pub fn new(oracle: Arc<dyn RandomOracle>, request_id_modulus: u64) -> Result<Self> {
        Ok(Self {
            oracle,
            counter: RandomRequestCounter::new(request_id_modulus)?,
        })
    }

    pub async fn draw(&self, commitment: &SeedCommitment) -> Result<Draw> {
        let request_id = self.counter.next_id();
        let signed = self.oracle.request(request_id, commitment).await?;
        if signed.random.is_empty() {
            return Err(LedgerError::Internal(anyhow::anyhow!(
                "random provider returned an empty value for request {}",
                request_id
            )));
        }

        let outcome = derive_outcome(&signed.random);
        tracing::debug!(request_id, outcome, "Random outcome drawn");

        Ok(Draw {
            request_id,
            signed,
            outcome,
        })
    }
}
