//! # Veilpost Core
//!
//! Pseudonymous-identity correlation core for the Veilpost platform:
//! domain-separated key derivation, capability-carrying role keys, and
//! encrypted fingerprint↔pseudonym mappings.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        VEILPOST CORE                                    │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │  correlation — capability-gated operations surface              │   │
//! │  └───────┬───────────────┬───────────────┬──────────────┬─────────┘   │
//! │          │               │               │              │             │
//! │          ▼               ▼               ▼              ▼             │
//! │  ┌──────────────┐ ┌─────────────┐ ┌────────────┐ ┌──────────────┐    │
//! │  │  keys        │ │  mapping    │ │  directory │ │  crypto      │    │
//! │  │  role keys + │ │  encrypted  │ │  users +   │ │  HKDF, AES-  │    │
//! │  │  capability  │ │  identity   │ │  pseudonym │ │  GCM, domain │    │
//! │  │  validation  │ │  links      │ │  records   │ │  masters     │    │
//! │  └──────┬───────┘ └──────┬──────┘ └─────┬──────┘ └──────────────┘    │
//! │         │                │              │                            │
//! │         └────────────────┴──────┬───────┘                            │
//! │                                 ▼                                    │
//! │                    ┌─────────────────────────┐                       │
//! │                    │  storage — SQLite       │                       │
//! │                    └─────────────────────────┘                       │
//! │                                                                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Privacy Model
//!
//! Users and pseudonyms live in unlinked tables. The only connection between
//! them is an identity mapping: a salted fingerprint of the real identity
//! stored next to an AES-256-GCM blob of the link, sealed under exactly one
//! role key. Listing, verification, and reverse resolution each require a
//! role key carrying the right capability, and reverse resolution must also
//! open the sealed blob — a key of the wrong scope fails the tag check and
//! learns nothing.
//!
//! ## Quick Start
//!
//! ```no_run
//! use veilpost_core::{build_correlation_service, CorrelationConfig, RoleName};
//!
//! # fn main() -> veilpost_core::Result<()> {
//! let service = build_correlation_service(CorrelationConfig::new("/var/lib/veilpost/keys"))?;
//!
//! let user_id = service.users().create_user("alice@example.com", &[])?;
//! let persona = service.create_pseudonym_with_identity_mapping(user_id, "alice")?;
//! assert!(service.verify_pseudonym_ownership(user_id, &persona.pseudonym_id, RoleName::User)?);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod correlation;
pub mod crypto;
pub mod directory;
pub mod error;
pub mod keys;
pub mod mapping;
pub mod storage;
pub mod time;

pub use correlation::CorrelationService;
pub use crypto::{Domain, DomainMasters, KeyDerivationEngine, TimeWindow};
pub use directory::{PseudonymDirectory, PseudonymRecord, UserDirectory, UserRecord};
pub use error::{Error, Result};
pub use keys::{Capability, KeyScope, RoleKey, RoleKeyStore, RoleName};
pub use mapping::{IdentityMapping, IdentityMappingStore};
pub use storage::Database;

use std::path::PathBuf;
use std::sync::Arc;

/// Configuration for assembling a [`CorrelationService`].
#[derive(Debug, Clone)]
pub struct CorrelationConfig {
    /// SQLite database path; `None` uses an in-memory database
    pub db_path: Option<String>,
    /// Directory holding the per-domain master key files
    pub master_key_dir: PathBuf,
    /// Salt mixed into identity fingerprints; changing it invalidates every
    /// stored fingerprint
    pub fingerprint_salt: String,
    /// Version stamped into derived keys and mapping rows
    pub key_version: i32,
}

impl CorrelationConfig {
    /// Configuration with defaults: in-memory database, v1 derivation.
    pub fn new(master_key_dir: impl Into<PathBuf>) -> Self {
        Self {
            db_path: None,
            master_key_dir: master_key_dir.into(),
            fingerprint_salt: "fingerprint_salt_v1".to_string(),
            key_version: 1,
        }
    }

    /// Use a file-backed database.
    pub fn with_db_path(mut self, path: impl Into<String>) -> Self {
        self.db_path = Some(path.into());
        self
    }
}

/// Assemble a [`CorrelationService`] from configuration.
///
/// Master secrets are loaded from `master_key_dir` if present; a fresh
/// deployment generates and persists them on first start. A partially
/// populated key directory is a configuration error, never cause for
/// regeneration — regenerating would orphan every existing mapping.
pub fn build_correlation_service(config: CorrelationConfig) -> Result<CorrelationService> {
    let first_key = config
        .master_key_dir
        .join(Domain::ALL[0].key_file_name());

    let masters = if first_key.exists() {
        DomainMasters::load_from_dir(&config.master_key_dir)?
    } else {
        tracing::info!(
            dir = %config.master_key_dir.display(),
            "No master secrets found; generating a fresh set"
        );
        let masters = DomainMasters::generate();
        masters.save_to_dir(&config.master_key_dir)?;
        masters
    };

    let engine = KeyDerivationEngine::new(masters, config.fingerprint_salt, config.key_version);
    let db = Database::open(config.db_path.as_deref())?;
    Ok(CorrelationService::new(db, Arc::new(engine)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_generates_then_reloads_masters() {
        let dir = tempfile::tempdir().unwrap();
        let config = CorrelationConfig::new(dir.path());

        let service = build_correlation_service(config.clone()).unwrap();
        let user_id = service.users().create_user("a@example.com", &[]).unwrap();
        let persona = service
            .create_pseudonym_with_identity_mapping(user_id, "alice")
            .unwrap();

        // A second service over the same key directory derives the same
        // pseudonym ID: the persisted masters were reloaded, not regenerated.
        let service2 = build_correlation_service(config).unwrap();
        let user2 = service2.users().create_user("a@example.com", &[]).unwrap();
        let persona2 = service2
            .create_pseudonym_with_identity_mapping(user2, "alice")
            .unwrap();

        // Both in-memory databases assign the same first user ID, so the
        // derived IDs must coincide.
        assert_eq!(user_id, user2);
        assert_eq!(persona.pseudonym_id, persona2.pseudonym_id);
    }

    #[test]
    fn test_build_rejects_partial_key_dir() {
        let dir = tempfile::tempdir().unwrap();
        // Only the first domain's key file exists.
        std::fs::write(
            dir.path().join(Domain::ALL[0].key_file_name()),
            hex::encode([1u8; 32]),
        )
        .unwrap();

        let err = build_correlation_service(CorrelationConfig::new(dir.path())).unwrap_err();
        assert!(matches!(err, Error::StorageReadError(_)));
    }
}
