//! # Identity Mappings
//!
//! The encrypted fingerprint↔pseudonym link table.
//!
//! Each mapping row stores the identity fingerprint in the clear (it is
//! already a salted one-way digest) next to an AES-256-GCM blob of the same
//! link, sealed under exactly one role key. Plaintext columns support
//! correlation *discovery* — finding rows that share a fingerprint — while
//! the sealed blob is what an operation must successfully open to prove it
//! holds a key of the right scope.

use crate::error::Result;
use crate::keys::KeyScope;
use crate::storage::Database;
use crate::time::now_timestamp;

/// One encrypted fingerprint↔pseudonym link.
#[derive(Debug, Clone)]
pub struct IdentityMapping {
    /// Unique mapping identifier (UUID v4)
    pub mapping_id: String,
    /// Salted digest of the real identity, shared across a user's pseudonyms
    pub fingerprint: String,
    /// The pseudonym this mapping links to
    pub pseudonym_id: String,
    /// `nonce ‖ AES-256-GCM(fingerprint:pseudonym_id)` under one role key
    pub encrypted_real_identity: Vec<u8>,
    /// Scope of the key that sealed the blob
    pub key_scope: KeyScope,
    /// Derivation-parameter version of the sealing key
    pub key_version: i32,
    /// Owning user, for own-pseudonym listing
    pub user_id: i64,
    /// Soft-delete flag
    pub is_active: bool,
    /// Creation timestamp (Unix seconds)
    pub created_at: i64,
}

impl IdentityMapping {
    /// Build a mapping row ready for insertion.
    pub fn new(
        fingerprint: String,
        pseudonym_id: String,
        encrypted_real_identity: Vec<u8>,
        key_scope: KeyScope,
        key_version: i32,
        user_id: i64,
    ) -> Self {
        Self {
            mapping_id: uuid::Uuid::new_v4().to_string(),
            fingerprint,
            pseudonym_id,
            encrypted_real_identity,
            key_scope,
            key_version,
            user_id,
            is_active: true,
            created_at: now_timestamp(),
        }
    }
}

/// Store for encrypted identity mappings.
#[derive(Clone)]
pub struct IdentityMappingStore {
    db: Database,
}

impl IdentityMappingStore {
    /// Create a store over a database.
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Persist a mapping. At most one active mapping may exist per
    /// (pseudonym, key scope); violating that is a database error.
    pub fn create(&self, mapping: &IdentityMapping) -> Result<()> {
        self.db.insert_identity_mapping(mapping)
    }

    /// All active mappings sharing a fingerprint.
    pub fn by_fingerprint(&self, fingerprint: &str) -> Result<Vec<IdentityMapping>> {
        self.db.identity_mappings_by_fingerprint(fingerprint)
    }

    /// All active mappings for one pseudonym.
    pub fn by_pseudonym_id(&self, pseudonym_id: &str) -> Result<Vec<IdentityMapping>> {
        self.db.identity_mappings_by_pseudonym(pseudonym_id)
    }

    /// All active mappings created for one user.
    pub fn by_user_id(&self, user_id: i64) -> Result<Vec<IdentityMapping>> {
        self.db.identity_mappings_by_user(user_id)
    }

    /// Soft-delete a mapping. Returns whether a row was changed.
    pub fn deactivate(&self, mapping_id: &str) -> Result<bool> {
        self.db.deactivate_identity_mapping(mapping_id)
    }
}
