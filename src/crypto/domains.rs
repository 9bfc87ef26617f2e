//! # Cryptographic Domains
//!
//! Five independent master secrets, one per functional area, so a leaked
//! master only threatens its own domain.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       DOMAIN SEPARATION                                 │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  user_pseudonyms_v1          ──► pseudonym-ID derivation               │
//! │  user_self_correlation_v1    ──► users verifying their own personas    │
//! │  moderator_correlation_v1    ──► moderator / subforum-owner keys       │
//! │  admin_correlation_v1        ──► platform-admin / trust & safety keys  │
//! │  legal_correlation_v1        ──► legal-compliance keys                 │
//! │                                                                         │
//! │  Each domain has its own 32-byte master secret. Role → domain is       │
//! │  fixed policy (see RoleName::domain), not runtime data.                │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Masters are the most sensitive in-memory state in the process: they are
//! loaded once at startup, never mutated afterward, and zeroized on drop.
//! At rest they live as hex-encoded `.key` files with owner-only permissions.

use std::fs;
use std::path::Path;

use rand::RngCore;
use zeroize::ZeroizeOnDrop;

use crate::error::{Error, Result};

/// Size of a domain master secret in bytes (256 bits).
pub const MASTER_SECRET_SIZE: usize = 32;

/// A policy-fixed partition of master-secret material.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Domain {
    /// Pseudonym-ID generation
    UserPseudonyms,
    /// User self-correlation
    UserCorrelation,
    /// Moderator correlation
    ModeratorCorrelation,
    /// Platform-admin / trust & safety correlation
    AdminCorrelation,
    /// Legal-compliance correlation
    LegalCorrelation,
}

impl Domain {
    /// All domains, in stable order. The order doubles as the index into
    /// [`DomainMasters`].
    pub const ALL: [Domain; 5] = [
        Domain::UserPseudonyms,
        Domain::UserCorrelation,
        Domain::ModeratorCorrelation,
        Domain::AdminCorrelation,
        Domain::LegalCorrelation,
    ];

    /// Versioned label, used as the on-disk key file stem and in derivation
    /// info strings.
    pub fn label(&self) -> &'static str {
        match self {
            Domain::UserPseudonyms => "user_pseudonyms_v1",
            Domain::UserCorrelation => "user_self_correlation_v1",
            Domain::ModeratorCorrelation => "moderator_correlation_v1",
            Domain::AdminCorrelation => "admin_correlation_v1",
            Domain::LegalCorrelation => "legal_correlation_v1",
        }
    }

    fn index(&self) -> usize {
        match self {
            Domain::UserPseudonyms => 0,
            Domain::UserCorrelation => 1,
            Domain::ModeratorCorrelation => 2,
            Domain::AdminCorrelation => 3,
            Domain::LegalCorrelation => 4,
        }
    }

    /// File name of this domain's key inside a master-secret directory.
    pub fn key_file_name(&self) -> String {
        format!("{}.key", self.label())
    }
}

/// The full set of domain master secrets.
///
/// Constructed once at startup and owned by the
/// [`KeyDerivationEngine`](super::KeyDerivationEngine); there is no ambient
/// or global access path, so tests can substitute fixed secrets freely.
#[derive(ZeroizeOnDrop)]
pub struct DomainMasters {
    masters: [[u8; MASTER_SECRET_SIZE]; 5],
}

impl DomainMasters {
    /// Generate a fresh random master for every domain.
    pub fn generate() -> Self {
        let mut masters = [[0u8; MASTER_SECRET_SIZE]; 5];
        for master in masters.iter_mut() {
            rand::rngs::OsRng.fill_bytes(master);
        }
        Self { masters }
    }

    /// Build from explicit per-domain secrets, validating length up front.
    ///
    /// Secrets must be supplied in [`Domain::ALL`] order.
    pub fn from_secrets(secrets: &[&[u8]; 5]) -> Result<Self> {
        let mut out = Self {
            masters: [[0u8; MASTER_SECRET_SIZE]; 5],
        };
        for (domain, secret) in Domain::ALL.iter().zip(secrets.iter()) {
            out.set_master(*domain, secret)?;
        }
        Ok(out)
    }

    /// Install one domain's master secret, rejecting wrong lengths at
    /// configuration time rather than at first use.
    pub fn set_master(&mut self, domain: Domain, secret: &[u8]) -> Result<()> {
        if secret.len() != MASTER_SECRET_SIZE {
            return Err(Error::InvalidMasterSecret(format!(
                "master for {} must be {} bytes, got {}",
                domain.label(),
                MASTER_SECRET_SIZE,
                secret.len()
            )));
        }
        self.masters[domain.index()].copy_from_slice(secret);
        Ok(())
    }

    /// The master secret for a domain.
    pub fn master(&self, domain: Domain) -> &[u8; MASTER_SECRET_SIZE] {
        &self.masters[domain.index()]
    }

    /// Load all five masters from a directory of hex-encoded `.key` files.
    ///
    /// Every domain's file must be present; a missing or malformed file is a
    /// configuration error, surfaced before any derivation happens.
    pub fn load_from_dir(dir: &Path) -> Result<Self> {
        let mut out = Self {
            masters: [[0u8; MASTER_SECRET_SIZE]; 5],
        };
        for domain in Domain::ALL {
            let path = dir.join(domain.key_file_name());
            let secret = load_master_secret(&path)?;
            out.set_master(domain, &secret)?;
        }
        Ok(out)
    }

    /// Persist all five masters as hex-encoded `.key` files with owner-only
    /// permissions.
    pub fn save_to_dir(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir)
            .map_err(|e| Error::StorageWriteError(format!("create {}: {}", dir.display(), e)))?;
        for domain in Domain::ALL {
            let path = dir.join(domain.key_file_name());
            fs::write(&path, hex::encode(self.master(domain)))
                .map_err(|e| Error::StorageWriteError(format!("write {}: {}", path.display(), e)))?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                fs::set_permissions(&path, fs::Permissions::from_mode(0o600)).map_err(|e| {
                    Error::StorageWriteError(format!("chmod {}: {}", path.display(), e))
                })?;
            }
        }
        tracing::info!(dir = %dir.display(), "Saved domain master secrets");
        Ok(())
    }
}

/// Load a single master secret from a hex-encoded key file.
///
/// The file must contain exactly 64 hex characters (32 bytes).
pub fn load_master_secret(path: &Path) -> Result<Vec<u8>> {
    let data = fs::read_to_string(path)
        .map_err(|e| Error::StorageReadError(format!("read {}: {}", path.display(), e)))?;
    let data = data.trim();
    if data.len() != MASTER_SECRET_SIZE * 2 {
        return Err(Error::InvalidMasterSecret(format!(
            "{} must contain exactly {} hex characters, got {}",
            path.display(),
            MASTER_SECRET_SIZE * 2,
            data.len()
        )));
    }
    hex::decode(data).map_err(|e| {
        Error::InvalidMasterSecret(format!("invalid hex in {}: {}", path.display(), e))
    })
}

// ============================================================================
// TESTS
// ============================================================================
