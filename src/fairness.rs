//! Provably fair crash points.
//!
//! Each round commits to a fresh 32-byte server seed by publishing its SHA-256
//! hash before betting opens. The crash point is a pure function of the seed
//! and the round index, so once the seed is revealed anyone can recompute
//! both the hash and the crash point.
//!
//! The curve pays `1 - edge` on every fixed cash-out target:
//! `P(crash >= m) = (1 - edge) / m` for `m` below the cap.

use rand_core::{OsRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::round::{Multiplier, RoundId};

/// Domain separator mixed into every crash point derivation
pub const CRASH_POINT_DOMAIN: &[u8] = b"crash-round-v1";

const SEED_LEN: usize = 32;
const UNIFORM_BITS: u32 = 52;
const BPS_SCALE: u128 = 10_000;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FairnessError {
    #[error("Invalid server seed: {0}")]
    InvalidSeed(String),
}

/// Secret per-round seed. Only ever revealed after the round crashes.
#[derive(Clone, PartialEq, Eq)]
pub struct ServerSeed([u8; SEED_LEN]);

impl ServerSeed {
    pub fn from_bytes(bytes: [u8; SEED_LEN]) -> Self {
        Self(bytes)
    }

    /// Draw a seed from the operating system CSPRNG
    pub fn generate() -> Self {
        let mut bytes = [0u8; SEED_LEN];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_hex(encoded: &str) -> Result<Self, FairnessError> {
        let bytes = hex::decode(encoded.trim())
            .map_err(|e| FairnessError::InvalidSeed(e.to_string()))?;
        let bytes: [u8; SEED_LEN] = bytes.try_into().map_err(|v: Vec<u8>| {
            FairnessError::InvalidSeed(format!("expected {} bytes, got {}", SEED_LEN, v.len()))
        })?;
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; SEED_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Hex-encoded SHA-256 commitment published when the round opens
    pub fn commitment(&self) -> String {
        hex::encode(Sha256::digest(self.0))
    }
}

impl fmt::Debug for ServerSeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ServerSeed(<redacted>)")
    }
}

/// Published parameters of the crash point distribution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FairnessParams {
    pub house_edge_bps: u32,
    pub max_crash_point: Multiplier,
}

impl Default for FairnessParams {
    fn default() -> Self {
        Self {
            house_edge_bps: 100,
            max_crash_point: Multiplier::from_hundredths(1_000_000),
        }
    }
}

/// Derive the crash point for `round` from `seed`.
pub fn crash_point(seed: &ServerSeed, round: RoundId, params: &FairnessParams) -> Multiplier {
    let mut hasher = Sha256::new();
    hasher.update(CRASH_POINT_DOMAIN);
    hasher.update(seed.as_bytes());
    hasher.update(round.0.to_be_bytes());
    let digest = hasher.finalize();

    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    let r52 = (u64::from_be_bytes(head) >> (64 - UNIFORM_BITS)) as u128;

    // floor(100 * (1 - e) / (1 - X)) with X = r52 / 2^52, kept in integers
    let span = 1u128 << UNIFORM_BITS;
    let edge = (params.house_edge_bps as u128).min(BPS_SCALE - 1);
    let hundredths = ((BPS_SCALE - edge) * span) / (100 * (span - r52));

    let capped = hundredths
        .max(Multiplier::ONE.hundredths() as u128)
        .min(params.max_crash_point.hundredths() as u128);
    Multiplier::from_hundredths(capped as u64)
}

/// Source of fresh server seeds
pub trait SeedGenerator: Send + Sync {
    fn next_seed(&self) -> ServerSeed;
}

/// Production seed source backed by `OsRng`
#[derive(Debug, Default, Clone, Copy)]
pub struct OsSeedGenerator;

impl SeedGenerator for OsSeedGenerator {
    fn next_seed(&self) -> ServerSeed {
        ServerSeed::generate()
    }
}

/// Everything the round state machine needs to open a round
#[derive(Debug, Clone)]
pub struct RoundCommitment {
    pub seed: ServerSeed,
    pub seed_hash: String,
    pub crash_point: Multiplier,
}

/// Commits seeds and derives crash points for successive rounds
pub struct FairnessSource {
    params: FairnessParams,
    seeds: Box<dyn SeedGenerator>,
}

impl FairnessSource {
    pub fn new(params: FairnessParams) -> Self {
        Self::with_generator(params, Box::new(OsSeedGenerator))
    }

    pub fn with_generator(params: FairnessParams, seeds: Box<dyn SeedGenerator>) -> Self {
        Self { params, seeds }
    }

    pub fn params(&self) -> &FairnessParams {
        &self.params
    }

    pub fn commit(&self, round: RoundId) -> RoundCommitment {
        let seed = self.seeds.next_seed();
        let seed_hash = seed.commitment();
        let crash_point = crash_point(&seed, round, &self.params);
        RoundCommitment {
            seed,
            seed_hash,
            crash_point,
        }
    }
}

/// Result of recomputing a revealed round
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationReport {
    pub round_id: RoundId,
    pub server_seed: String,
    pub published_hash: String,
    pub computed_hash: String,
    pub hash_matches: bool,
    pub claimed_crash_point: Multiplier,
    pub computed_crash_point: Multiplier,
    pub crash_point_matches: bool,
    pub params: FairnessParams,
}

impl VerificationReport {
    pub fn is_valid(&self) -> bool {
        self.hash_matches && self.crash_point_matches
    }
}

/// Recompute the commitment and crash point of a revealed round.
pub fn verify(
    server_seed: &str,
    round: RoundId,
    published_hash: &str,
    claimed_crash_point: Multiplier,
    params: &FairnessParams,
) -> Result<VerificationReport, FairnessError> {
    let seed = ServerSeed::from_hex(server_seed)?;
    let computed_hash = seed.commitment();
    let computed_crash_point = crash_point(&seed, round, params);

    Ok(VerificationReport {
        round_id: round,
        server_seed: seed.to_hex(),
        published_hash: published_hash.to_string(),
        hash_matches: computed_hash.eq_ignore_ascii_case(published_hash.trim()),
        computed_hash,
        claimed_crash_point,
        computed_crash_point,
        crash_point_matches: computed_crash_point == claimed_crash_point,
        params: *params,
    })
}
