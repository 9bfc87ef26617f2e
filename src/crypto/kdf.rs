//! # Key Derivation
//!
//! Deterministic, domain-separated key derivation for the correlation
//! subsystem.
//!
//! ## Derivation Scheme
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                 ROLE KEY DERIVATION (time-bucketed)                     │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  HKDF-SHA256(                                                           │
//! │    ikm  = domain_master(role),      ← role → domain is fixed policy    │
//! │    info = role ‖ scope ‖ window ‖ bucket_start                         │
//! │  ) → 32-byte role key                                                   │
//! │                                                                         │
//! │  bucket_start = now truncated to the window boundary (hour/day/week).  │
//! │  Identical (role, scope, window, bucket) always yields the same key;   │
//! │  changing any input changes the key. Keys derived in one time window   │
//! │  are useless in the next — forward secrecy by rotation.                │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Fingerprints
//!
//! `fingerprint(identity) = hex(SHA-256(identity ‖ salt)[..16])` — a
//! deterministic, salted, one-way 32-character digest. It is the only
//! cross-pseudonym identifier any correlation scope is ever shown; the real
//! identity string never leaves this module's callers.

use hkdf::Hkdf;
use sha2::{Digest, Sha256};

use super::domains::{Domain, DomainMasters};
use crate::error::{Error, Result};
use crate::keys::{KeyScope, RoleName};

/// Size of a derived role key in bytes (256 bits).
pub const ROLE_KEY_SIZE: usize = 32;

/// Number of digest bytes kept for fingerprints and pseudonym IDs
/// (32 hex characters).
pub const FINGERPRINT_BYTES: usize = 16;

// ============================================================================
// TIME WINDOWS
// ============================================================================

/// The rotation window for a time-bucketed role key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeWindow {
    /// Hourly rotation
    Hour,
    /// Daily rotation
    Day,
    /// Weekly rotation
    Week,
    /// 30-day rotation, used for provisioned role keys
    Month,
}

impl TimeWindow {
    /// Window length in seconds.
    pub fn seconds(&self) -> i64 {
        match self {
            TimeWindow::Hour => 60 * 60,
            TimeWindow::Day => 24 * 60 * 60,
            TimeWindow::Week => 7 * 24 * 60 * 60,
            TimeWindow::Month => 30 * 24 * 60 * 60,
        }
    }

    /// Label mixed into the derivation info so two windows that happen to
    /// share a bucket start still derive distinct keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeWindow::Hour => "hour",
            TimeWindow::Day => "day",
            TimeWindow::Week => "week",
            TimeWindow::Month => "month",
        }
    }

    /// Truncate a Unix timestamp to this window's bucket start.
    pub fn bucket_start(&self, instant: i64) -> i64 {
        instant - instant.rem_euclid(self.seconds())
    }
}

// ============================================================================
// KEY DERIVATION ENGINE
// ============================================================================

/// The key-derivation engine: domain masters plus fingerprint salt.
///
/// Derivation is pure and stateless given its inputs, so concurrent calls
/// with identical parameters are safe and yield identical results.
pub struct KeyDerivationEngine {
    masters: DomainMasters,
    salt: Vec<u8>,
    key_version: i32,
}

impl KeyDerivationEngine {
    /// Build an engine over a fixed master set.
    pub fn new(masters: DomainMasters, salt: impl Into<Vec<u8>>, key_version: i32) -> Self {
        Self {
            masters,
            salt: salt.into(),
            key_version,
        }
    }

    /// The key version stamped into rows this engine produces.
    pub fn key_version(&self) -> i32 {
        self.key_version
    }

    /// Derive the current time-bucketed key for a (role, scope, window).
    pub fn derive_role_key(
        &self,
        role: RoleName,
        scope: KeyScope,
        window: TimeWindow,
    ) -> Result<[u8; ROLE_KEY_SIZE]> {
        self.derive_role_key_at(role, scope, window, crate::time::now_timestamp())
    }

    /// Derive the key for the window bucket containing `instant`.
    ///
    /// Exposed so callers can re-derive a historical bucket's key and tests
    /// can pin the clock.
    pub fn derive_role_key_at(
        &self,
        role: RoleName,
        scope: KeyScope,
        window: TimeWindow,
        instant: i64,
    ) -> Result<[u8; ROLE_KEY_SIZE]> {
        let master = self.masters.master(role.domain());
        let bucket = window.bucket_start(instant);
        let info = format!(
            "{}:{}:{}:{}",
            role.as_str(),
            scope.as_str(),
            window.as_str(),
            bucket
        );

        let hkdf = Hkdf::<Sha256>::new(None, master);
        let mut key = [0u8; ROLE_KEY_SIZE];
        hkdf.expand(info.as_bytes(), &mut key)
            .map_err(|_| Error::KeyDerivationFailed(format!("HKDF expansion failed for {}", info)))?;

        Ok(key)
    }

    /// Deterministic salted fingerprint of a real identity.
    ///
    /// Same identity and salt always yield the same 32-hex-character string;
    /// it is never reversible without brute force over the identity space.
    pub fn fingerprint(&self, real_identity: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(real_identity.as_bytes());
        hasher.update(&self.salt);
        hex::encode(&hasher.finalize()[..FINGERPRINT_BYTES])
    }

    /// Deterministic pseudonym ID for a (user, context) pair.
    ///
    /// Derived from the pseudonym domain master, so pseudonym IDs cannot be
    /// predicted without it. Different contexts give the same user stable,
    /// unlinkable alternate personas; re-deriving with the same context
    /// converges on the same ID, which makes registration re-drivable.
    pub fn derive_pseudonym_id(&self, user_id: i64, context: &str) -> String {
        // Context entropy keeps short/guessable contexts from weakening the
        // separation between personas.
        let mut ctx = Sha256::new();
        ctx.update(context.as_bytes());
        ctx.update(&self.salt);
        let context_entropy = ctx.finalize();

        let mut hasher = Sha256::new();
        hasher.update(user_id.to_be_bytes());
        hasher.update(self.masters.master(Domain::UserPseudonyms));
        hasher.update(context_entropy);
        hex::encode(&hasher.finalize()[..FINGERPRINT_BYTES])
    }
}

// ============================================================================
// TESTS
// ============================================================================
