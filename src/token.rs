//! Idempotency tokens: time-ordered UUID v7 identifiers.
//!
//! A token is created by the caller (or generated here), passed into at most
//! one logical mutation, and never mutated. Its serialized form is exactly
//! the hyphenated UUID string; parsing rejects anything that is not a
//! well-formed UUID.
//!
//! Token bytes follow RFC 9562: a 48-bit big-endian unix-millisecond prefix,
//! version nibble `0x7`, RFC-4122 variant bits `10`, and 74 random bits. The
//! millisecond prefix makes tokens generated in sequence sort by creation
//! time.

use chrono::{DateTime, TimeZone, Utc};
use once_cell::sync::Lazy;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Environment variable selecting the random source for token generation.
///
/// `strong` (the default) draws from the operating system's entropy source;
/// `default` uses the thread-local generator. A diagnostic knob only.
pub const TOKEN_RNG_ENV: &str = "DCOUNTER_TOKEN_RNG";

/// Token errors
#[derive(Error, Debug)]
pub enum TokenError {
    #[error("malformed idempotency token: {0}")]
    Malformed(String),
}

/// Random source strength for token generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RngStrength {
    /// OS entropy source, falling back to the thread RNG on failure.
    Strong,
    /// Thread-local generator.
    Default,
}

impl RngStrength {
    /// Resolve the strength from [`TOKEN_RNG_ENV`]; `Strong` when unset or
    /// unrecognized.
    pub fn from_env() -> Self {
        match std::env::var(TOKEN_RNG_ENV) {
            Ok(value) if value.eq_ignore_ascii_case("default") => RngStrength::Default,
            _ => RngStrength::Strong,
        }
    }
}

/// An opaque, time-ordered identifier deduplicating retried mutations.
///
/// Two tokens are equal iff both the id and the generation instant are equal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdempotencyToken {
    id: Uuid,
    created_at: DateTime<Utc>,
}

impl IdempotencyToken {
    /// Generate a fresh token from the process-wide generator.
    pub fn generate() -> Self {
        GENERATOR.generate()
    }

    /// The token's UUID.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The instant the token was generated (or, for parsed non-v7 tokens,
    /// the parse instant).
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// The 48-bit millisecond prefix of the token's UUID.
    pub fn millis_prefix(&self) -> u64 {
        millis_prefix_of(&self.id)
    }
}

fn millis_prefix_of(id: &Uuid) -> u64 {
    let bytes = id.as_bytes();
    ((bytes[0] as u64) << 40)
        | ((bytes[1] as u64) << 32)
        | ((bytes[2] as u64) << 24)
        | ((bytes[3] as u64) << 16)
        | ((bytes[4] as u64) << 8)
        | (bytes[5] as u64)
}

impl fmt::Display for IdempotencyToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id.hyphenated())
    }
}

impl FromStr for IdempotencyToken {
    type Err = TokenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let id = Uuid::parse_str(s).map_err(|_| TokenError::Malformed(s.to_string()))?;
        // A v7 id carries its own creation instant; anything else gets the
        // parse instant.
        let created_at = if id.get_version_num() == 7 {
            Utc.timestamp_millis_opt(millis_prefix_of(&id) as i64)
                .single()
                .unwrap_or_else(Utc::now)
        } else {
            Utc::now()
        };
        Ok(IdempotencyToken { id, created_at })
    }
}

/// Generator assembling UUID v7 tokens.
pub struct TokenGenerator {
    strength: RngStrength,
}

impl TokenGenerator {
    /// Create a generator with an explicit random-source strength.
    pub fn new(strength: RngStrength) -> Self {
        Self { strength }
    }

    /// Create a generator configured from [`TOKEN_RNG_ENV`].
    pub fn from_env() -> Self {
        Self::new(RngStrength::from_env())
    }

    /// Generate a fresh token.
    pub fn generate(&self) -> IdempotencyToken {
        let now = Utc::now();
        let millis = now.timestamp_millis().max(0) as u64;
        let id = Uuid::from_bytes(self.v7_bytes(millis));
        // Millisecond precision, so a parsed serialization compares equal.
        let created_at = Utc
            .timestamp_millis_opt(millis as i64)
            .single()
            .unwrap_or(now);
        IdempotencyToken { id, created_at }
    }

    fn v7_bytes(&self, millis: u64) -> [u8; 16] {
        let mut random = [0u8; 10];
        self.fill_random(&mut random);

        let mut bytes = [0u8; 16];
        bytes[0] = (millis >> 40) as u8;
        bytes[1] = (millis >> 32) as u8;
        bytes[2] = (millis >> 24) as u8;
        bytes[3] = (millis >> 16) as u8;
        bytes[4] = (millis >> 8) as u8;
        bytes[5] = millis as u8;
        bytes[6] = 0x70 | (random[0] & 0x0f);
        bytes[7] = random[1];
        bytes[8] = 0x80 | (random[2] & 0x3f);
        bytes[9..16].copy_from_slice(&random[3..10]);
        bytes
    }

    fn fill_random(&self, buf: &mut [u8]) {
        match self.strength {
            RngStrength::Strong => {
                if OsRng.try_fill_bytes(buf).is_err() {
                    tracing::warn!("OS entropy source unavailable, falling back to thread RNG");
                    rand::thread_rng().fill_bytes(buf);
                }
            }
            RngStrength::Default => rand::thread_rng().fill_bytes(buf),
        }
    }
}

static GENERATOR: Lazy<TokenGenerator> = Lazy::new(TokenGenerator::from_env);
