//! # Correlation Service
//!
//! The capability-gated operations surface.
//!
//! ## Operation Map
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     CORRELATION OPERATIONS                              │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  operation                         scope              capability       │
//! │  ───────────────────────────────   ────────────────   ───────────────  │
//! │  create_pseudonym_with_mapping     self_correlation   (system flow —   │
//! │                                    seals under key    provisions on    │
//! │                                                       demand)          │
//! │  pseudonyms_by_user_id             authentication     access_own_      │
//! │                                                       pseudonyms       │
//! │  default_pseudonym_by_user_id      authentication     access_own_      │
//! │                                                       pseudonyms       │
//! │  verify_pseudonym_ownership        self_correlation   verify_own_      │
//! │                                                       pseudonym_owner… │
//! │  pseudonyms_by_real_identity       correlation        access_all_      │
//! │                                                       pseudonyms       │
//! │  real_identity_by_pseudonym        correlation        cross_user_      │
//! │                                                       correlation      │
//! │                                                                         │
//! │  Every operation validates its (role, scope, capability) against the   │
//! │  key store before touching a single mapping row. Reverse resolution    │
//! │  additionally proves key possession by opening the sealed blob, and    │
//! │  discloses only the fingerprint, never the real identity.              │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::HashSet;
use std::sync::Arc;

use crate::crypto::{decrypt_identity_mapping, encrypt_identity_mapping, KeyDerivationEngine};
use crate::directory::{PseudonymDirectory, PseudonymRecord, UserDirectory};
use crate::error::{Error, Result};
use crate::keys::{Capability, KeyScope, RoleKey, RoleKeyStore, RoleName};
use crate::mapping::{IdentityMapping, IdentityMappingStore};
use crate::storage::Database;
use crate::time::now_timestamp;

/// The capability-gated correlation surface.
///
/// Cloneable; clones share the database handle and derivation engine.
#[derive(Clone)]
pub struct CorrelationService {
    db: Database,
    engine: Arc<KeyDerivationEngine>,
    keys: RoleKeyStore,
    mappings: IdentityMappingStore,
    users: UserDirectory,
    pseudonyms: PseudonymDirectory,
}

impl std::fmt::Debug for CorrelationService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CorrelationService").finish_non_exhaustive()
    }
}

impl CorrelationService {
    /// Assemble the service over a shared database and engine.
    pub fn new(db: Database, engine: Arc<KeyDerivationEngine>) -> Self {
        Self {
            keys: RoleKeyStore::new(db.clone(), engine.clone()),
            mappings: IdentityMappingStore::new(db.clone()),
            users: UserDirectory::new(db.clone()),
            pseudonyms: PseudonymDirectory::new(db.clone()),
            db,
            engine,
        }
    }

    /// The user directory.
    pub fn users(&self) -> &UserDirectory {
        &self.users
    }

    /// The pseudonym directory.
    pub fn pseudonyms(&self) -> &PseudonymDirectory {
        &self.pseudonyms
    }

    /// The role-key store.
    pub fn keys(&self) -> &RoleKeyStore {
        &self.keys
    }

    /// The identity-mapping store.
    pub fn mappings(&self) -> &IdentityMappingStore {
        &self.mappings
    }

    // ========================================================================
    // REGISTRATION
    // ========================================================================

    /// Create a pseudonym for a user together with its identity mappings.
    ///
    /// The pseudonym ID is derived deterministically from the user and
    /// display name, so re-running after a crash converges on the same
    /// pseudonym instead of minting a duplicate; if it already exists, the
    /// existing record is returned. A self-correlation mapping is always
    /// written; admin-class users additionally get a correlation-scope
    /// mapping so compliance operations can later resolve their personas.
    /// Pseudonym row and mappings land in one transaction.
    pub fn create_pseudonym_with_identity_mapping(
        &self,
        user_id: i64,
        display_name: &str,
    ) -> Result<PseudonymRecord> {
        let user = self.users.user_by_id(user_id)?;
        let role = user.primary_role();
        let fingerprint = self.engine.fingerprint(&user.email);
        let pseudonym_id = self.engine.derive_pseudonym_id(user_id, display_name);

        // Idempotent re-drive: the deterministic ID already exists.
        if let Some(existing) = self.db.pseudonym_by_id(&pseudonym_id)? {
            tracing::debug!(pseudonym_id = %pseudonym_id, "Pseudonym already provisioned");
            return Ok(existing);
        }

        let self_key =
            self.key_with_provisioning(role, KeyScope::SelfCorrelation, user_id)?;

        let mut mappings = vec![IdentityMapping::new(
            fingerprint.clone(),
            pseudonym_id.clone(),
            encrypt_identity_mapping(&fingerprint, &pseudonym_id, &self_key.key_data)?,
            KeyScope::SelfCorrelation,
            self_key.key_version,
            user_id,
        )];

        if role.is_admin_class() {
            let correlation_key =
                self.key_with_provisioning(role, KeyScope::Correlation, user_id)?;
            mappings.push(IdentityMapping::new(
                fingerprint.clone(),
                pseudonym_id.clone(),
                encrypt_identity_mapping(&fingerprint, &pseudonym_id, &correlation_key.key_data)?,
                KeyScope::Correlation,
                correlation_key.key_version,
                user_id,
            ));
        }

        let record = PseudonymRecord {
            pseudonym_id,
            display_name: display_name.to_string(),
            // First persona becomes the default.
            is_default: self.mappings.by_user_id(user_id)?.is_empty(),
            is_active: true,
            created_at: now_timestamp(),
            last_active_at: None,
        };

        self.db.create_pseudonym_with_mappings(&record, &mappings)?;
        tracing::info!(
            pseudonym_id = %record.pseudonym_id,
            is_default = record.is_default,
            "Created pseudonym"
        );
        Ok(record)
    }

    /// Fetch a (role, scope) key, provisioning the user's default keys and
    /// retrying once if none exists yet. Registration is the first flow a
    /// fresh deployment runs, so a missing key here means provisioning
    /// simply has not happened.
    fn key_with_provisioning(
        &self,
        role: RoleName,
        scope: KeyScope,
        user_id: i64,
    ) -> Result<RoleKey> {
        if let Some(key) = self.keys.get(role, scope)? {
            return Ok(key);
        }
        self.keys.ensure_default_keys(user_id)?;
        self.keys
            .get(role, scope)?
            .ok_or(Error::KeyNotFound { role, scope })
    }

    // ========================================================================
    // OWN-PSEUDONYM OPERATIONS
    // ========================================================================

    /// List a user's own active pseudonyms.
    ///
    /// Requires `access_own_pseudonyms` on the acting role's authentication
    /// key.
    pub fn pseudonyms_by_user_id(
        &self,
        user_id: i64,
        acting_role: RoleName,
    ) -> Result<Vec<PseudonymRecord>> {
        self.keys.key_for_operation(
            acting_role,
            KeyScope::Authentication,
            Capability::AccessOwnPseudonyms,
        )?;

        let user = self.users.user_by_id(user_id)?;
        let fingerprint = self.engine.fingerprint(&user.email);
        self.pseudonyms_for_fingerprint(&fingerprint)
    }

    /// A user's default pseudonym.
    ///
    /// Falls back to the oldest persona if no row carries the default flag,
    /// which can happen for accounts provisioned before defaults existed.
    pub fn default_pseudonym_by_user_id(
        &self,
        user_id: i64,
        acting_role: RoleName,
    ) -> Result<PseudonymRecord> {
        let personas = self.pseudonyms_by_user_id(user_id, acting_role)?;

        if let Some(default) = personas.iter().find(|p| p.is_default) {
            return Ok(default.clone());
        }
        match personas.into_iter().next() {
            Some(first) => {
                tracing::warn!(user_id, "User has no default pseudonym; using oldest");
                Ok(first)
            }
            None => Err(Error::PseudonymNotFound(format!(
                "no pseudonyms for user {}",
                user_id
            ))),
        }
    }

    /// Check that a pseudonym belongs to a user.
    ///
    /// A missing key or capability is an authorization error and propagates;
    /// every resolution failure past that point — unknown pseudonym, no
    /// mapping the key can open, fingerprint mismatch — collapses to
    /// `Ok(false)` so the result never doubles as an existence oracle.
    pub fn verify_pseudonym_ownership(
        &self,
        user_id: i64,
        pseudonym_id: &str,
        acting_role: RoleName,
    ) -> Result<bool> {
        let key = self.keys.key_for_operation(
            acting_role,
            KeyScope::SelfCorrelation,
            Capability::VerifyOwnPseudonymOwnership,
        )?;

        let user = match self.users.user_by_id(user_id) {
            Ok(user) => user,
            Err(_) => return Ok(false),
        };
        let expected_fingerprint = self.engine.fingerprint(&user.email);

        let candidates = self.mappings.by_pseudonym_id(pseudonym_id)?;
        for mapping in &candidates {
            match decrypt_identity_mapping(&mapping.encrypted_real_identity, &key.key_data) {
                Ok((fingerprint, sealed_pseudonym_id)) => {
                    return Ok(fingerprint == expected_fingerprint
                        && sealed_pseudonym_id == pseudonym_id);
                }
                // Not sealed under this key; keep trying candidates.
                Err(Error::DecryptionMismatch) => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(false)
    }

    // ========================================================================
    // CROSS-USER OPERATIONS
    // ========================================================================

    /// List every active pseudonym linked to a real identity.
    ///
    /// Requires `access_all_pseudonyms` on the acting role's correlation
    /// key — admin-class roles only. Discovery works over plaintext
    /// fingerprints, so it spans all scopes without opening any blob.
    pub fn pseudonyms_by_real_identity(
        &self,
        real_identity: &str,
        acting_role: RoleName,
    ) -> Result<Vec<PseudonymRecord>> {
        self.keys.key_for_operation(
            acting_role,
            KeyScope::Correlation,
            Capability::AccessAllPseudonyms,
        )?;

        let fingerprint = self.engine.fingerprint(real_identity);
        tracing::info!(
            role = %acting_role,
            fingerprint = %fingerprint,
            "Cross-user pseudonym listing"
        );
        self.pseudonyms_for_fingerprint(&fingerprint)
    }

    /// Resolve a pseudonym back to its identity fingerprint.
    ///
    /// Requires `cross_user_correlation` on the acting role's correlation
    /// key, and additionally proves possession by opening the sealed blob:
    /// a mapping sealed under another scope's key fails the tag check, so
    /// holding the capability alone is not enough. Only the fingerprint is
    /// ever disclosed; recovering the real identity requires a directory
    /// subpoena outside this subsystem.
    pub fn real_identity_by_pseudonym(
        &self,
        pseudonym_id: &str,
        acting_role: RoleName,
    ) -> Result<String> {
        let key = self.keys.key_for_operation(
            acting_role,
            KeyScope::Correlation,
            Capability::CrossUserCorrelation,
        )?;

        let candidates = self.mappings.by_pseudonym_id(pseudonym_id)?;
        if candidates.is_empty() {
            return Err(Error::MappingNotFound(pseudonym_id.to_string()));
        }

        for mapping in &candidates {
            match decrypt_identity_mapping(&mapping.encrypted_real_identity, &key.key_data) {
                Ok((fingerprint, _)) => {
                    tracing::info!(
                        role = %acting_role,
                        pseudonym_id = %pseudonym_id,
                        "Resolved pseudonym to fingerprint"
                    );
                    return Ok(fingerprint);
                }
                Err(Error::DecryptionMismatch) => continue,
                Err(e) => return Err(e),
            }
        }

        // Mappings exist but none opened under this key: wrong scope.
        tracing::warn!(
            role = %acting_role,
            pseudonym_id = %pseudonym_id,
            "Reverse resolution denied by scope isolation"
        );
        Err(Error::DecryptionMismatch)
    }

    // ========================================================================
    // HELPERS
    // ========================================================================

    /// Active pseudonym records for a fingerprint, deduplicated across the
    /// self-correlation and correlation mappings that reference the same
    /// persona.
    fn pseudonyms_for_fingerprint(&self, fingerprint: &str) -> Result<Vec<PseudonymRecord>> {
        let mut seen = HashSet::new();
        let mut records = Vec::new();

        for mapping in self.mappings.by_fingerprint(fingerprint)? {
            if !seen.insert(mapping.pseudonym_id.clone()) {
                continue;
            }
            if let Some(record) = self.db.pseudonym_by_id(&mapping.pseudonym_id)? {
                if record.is_active {
                    records.push(record);
                }
            }
        }

        records.sort_by_key(|r| r.created_at);
        Ok(records)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::DomainMasters;

    fn test_service() -> CorrelationService {
        let db = Database::open(None).unwrap();
        let engine = Arc::new(KeyDerivationEngine::new(
            DomainMasters::generate(),
            "fingerprint_salt_v1",
            1,
        ));
        CorrelationService::new(db, engine)
    }

    fn register(service: &CorrelationService, email: &str, roles: &[RoleName]) -> i64 {
        let user_id = service.users().create_user(email, roles).unwrap();
        service.keys().ensure_default_keys(user_id).unwrap();
        user_id
    }

    #[test]
    fn test_user_registration_creates_self_mapping_only() {
        let service = test_service();
        let user_id = register(&service, "a@example.com", &[]);

        let persona = service
            .create_pseudonym_with_identity_mapping(user_id, "alice")
            .unwrap();
        assert!(persona.is_default);
        assert_eq!(persona.pseudonym_id.len(), 32);

        let mappings = service.mappings().by_user_id(user_id).unwrap();
        assert_eq!(mappings.len(), 1);
        assert_eq!(mappings[0].key_scope, KeyScope::SelfCorrelation);
    }

    #[test]
    fn test_admin_registration_adds_correlation_mapping() {
        let service = test_service();
        let user_id = register(&service, "ts@example.com", &[RoleName::TrustSafety]);

        let persona = service
            .create_pseudonym_with_identity_mapping(user_id, "watcher")
            .unwrap();

        let mappings = service
            .mappings()
            .by_pseudonym_id(&persona.pseudonym_id)
            .unwrap();
        let scopes: Vec<_> = mappings.iter().map(|m| m.key_scope).collect();
        assert_eq!(mappings.len(), 2);
        assert!(scopes.contains(&KeyScope::SelfCorrelation));
        assert!(scopes.contains(&KeyScope::Correlation));
    }

    #[test]
    fn test_registration_is_idempotent() {
        let service = test_service();
        let user_id = register(&service, "a@example.com", &[]);

        let first = service
            .create_pseudonym_with_identity_mapping(user_id, "alice")
            .unwrap();
        let again = service
            .create_pseudonym_with_identity_mapping(user_id, "alice")
            .unwrap();

        assert_eq!(first.pseudonym_id, again.pseudonym_id);
        assert_eq!(service.mappings().by_user_id(user_id).unwrap().len(), 1);
    }

    #[test]
    fn test_registration_provisions_keys_on_demand() {
        let service = test_service();
        // No ensure_default_keys call: registration must self-provision.
        let user_id = service.users().create_user("a@example.com", &[]).unwrap();

        service
            .create_pseudonym_with_identity_mapping(user_id, "alice")
            .unwrap();
        assert!(service
            .keys()
            .get(RoleName::User, KeyScope::SelfCorrelation)
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_only_first_persona_is_default() {
        let service = test_service();
        let user_id = register(&service, "a@example.com", &[]);

        let first = service
            .create_pseudonym_with_identity_mapping(user_id, "alice")
            .unwrap();
        let second = service
            .create_pseudonym_with_identity_mapping(user_id, "alt")
            .unwrap();
        assert!(first.is_default);
        assert!(!second.is_default);

        let default = service
            .default_pseudonym_by_user_id(user_id, RoleName::User)
            .unwrap();
        assert_eq!(default.pseudonym_id, first.pseudonym_id);
    }

    #[test]
    fn test_own_pseudonym_listing() {
        let service = test_service();
        let user_id = register(&service, "a@example.com", &[]);
        let other_id = register(&service, "b@example.com", &[]);

        service
            .create_pseudonym_with_identity_mapping(user_id, "alice")
            .unwrap();
        service
            .create_pseudonym_with_identity_mapping(user_id, "alt")
            .unwrap();
        service
            .create_pseudonym_with_identity_mapping(other_id, "bob")
            .unwrap();

        // Listing sees both personas and never the other user's.
        let personas = service
            .pseudonyms_by_user_id(user_id, RoleName::User)
            .unwrap();
        assert_eq!(personas.len(), 2);

        let others = service
            .pseudonyms_by_user_id(other_id, RoleName::User)
            .unwrap();
        assert_eq!(others.len(), 1);
    }

    #[test]
    fn test_ownership_verification() {
        let service = test_service();
        let user_id = register(&service, "a@example.com", &[]);
        let other_id = register(&service, "b@example.com", &[]);

        let persona = service
            .create_pseudonym_with_identity_mapping(user_id, "alice")
            .unwrap();

        assert!(service
            .verify_pseudonym_ownership(user_id, &persona.pseudonym_id, RoleName::User)
            .unwrap());

        // Someone else's persona, an unknown persona, and an unknown user
        // all come back false, not as distinguishable errors.
        assert!(!service
            .verify_pseudonym_ownership(other_id, &persona.pseudonym_id, RoleName::User)
            .unwrap());
        assert!(!service
            .verify_pseudonym_ownership(user_id, "ffffffffffffffffffffffffffffffff", RoleName::User)
            .unwrap());
        assert!(!service
            .verify_pseudonym_ownership(404, &persona.pseudonym_id, RoleName::User)
            .unwrap());
    }

    #[test]
    fn test_cross_user_discovery_spans_all_personas() {
        let service = test_service();
        register(&service, "admin@example.com", &[RoleName::PlatformAdmin]);
        let user_id = register(&service, "a@example.com", &[]);

        service
            .create_pseudonym_with_identity_mapping(user_id, "alice")
            .unwrap();
        service
            .create_pseudonym_with_identity_mapping(user_id, "alt")
            .unwrap();

        let personas = service
            .pseudonyms_by_real_identity("a@example.com", RoleName::PlatformAdmin)
            .unwrap();
        assert_eq!(personas.len(), 2);

        // Unknown identity: empty, not an error.
        assert!(service
            .pseudonyms_by_real_identity("nobody@example.com", RoleName::PlatformAdmin)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_cross_user_operations_denied_without_correlation_key() {
        let service = test_service();
        let user_id = register(&service, "a@example.com", &[]);
        let persona = service
            .create_pseudonym_with_identity_mapping(user_id, "alice")
            .unwrap();

        // Plain users have no correlation-scope key at all.
        let err = service
            .pseudonyms_by_real_identity("a@example.com", RoleName::User)
            .unwrap_err();
        assert!(matches!(err, Error::KeyNotFound { .. }));

        let err = service
            .real_identity_by_pseudonym(&persona.pseudonym_id, RoleName::User)
            .unwrap_err();
        assert!(matches!(err, Error::KeyNotFound { .. }));
    }

    #[test]
    fn test_capability_denied_on_narrowed_key() {
        let service = test_service();
        let user_id = register(&service, "a@example.com", &[]);

        // A correlation key stripped down to compliance-only duty.
        service
            .keys()
            .create(
                RoleName::Moderator,
                KeyScope::Correlation,
                vec![Capability::Moderation],
                user_id,
            )
            .unwrap();

        let err = service
            .pseudonyms_by_real_identity("a@example.com", RoleName::Moderator)
            .unwrap_err();
        assert!(matches!(err, Error::CapabilityDenied { .. }));
        assert!(err.is_authorization());
    }

    #[test]
    fn test_reverse_resolution_discloses_fingerprint_only() {
        let service = test_service();
        let engine_fp;
        let admin_id = register(&service, "admin@example.com", &[RoleName::LegalTeam]);

        let persona = service
            .create_pseudonym_with_identity_mapping(admin_id, "counsel")
            .unwrap();

        {
            let user = service.users().user_by_id(admin_id).unwrap();
            engine_fp = service.engine.fingerprint(&user.email);
        }

        let resolved = service
            .real_identity_by_pseudonym(&persona.pseudonym_id, RoleName::LegalTeam)
            .unwrap();
        assert_eq!(resolved, engine_fp);
        // The fingerprint is a digest, never the email itself.
        assert_ne!(resolved, "admin@example.com");
    }

    #[test]
    fn test_scope_isolation_blocks_foreign_scope_resolution() {
        let service = test_service();
        register(&service, "admin@example.com", &[RoleName::PlatformAdmin]);
        let user_id = register(&service, "a@example.com", &[]);

        // A plain user's persona carries only a self_correlation mapping,
        // sealed under the user self key. The admin's correlation key holds
        // the capability but cannot open that blob.
        let persona = service
            .create_pseudonym_with_identity_mapping(user_id, "alice")
            .unwrap();

        let err = service
            .real_identity_by_pseudonym(&persona.pseudonym_id, RoleName::PlatformAdmin)
            .unwrap_err();
        assert!(matches!(err, Error::DecryptionMismatch));
    }

    #[test]
    fn test_reverse_resolution_unknown_pseudonym() {
        let service = test_service();
        register(&service, "admin@example.com", &[RoleName::PlatformAdmin]);

        let err = service
            .real_identity_by_pseudonym("ffffffffffffffffffffffffffffffff", RoleName::PlatformAdmin)
            .unwrap_err();
        assert!(matches!(err, Error::MappingNotFound(_)));
    }

    #[test]
    fn test_deactivated_pseudonym_drops_out_of_listings() {
        let service = test_service();
        let user_id = register(&service, "a@example.com", &[]);

        let persona = service
            .create_pseudonym_with_identity_mapping(user_id, "alice")
            .unwrap();
        service
            .create_pseudonym_with_identity_mapping(user_id, "alt")
            .unwrap();

        service.pseudonyms().deactivate(&persona.pseudonym_id).unwrap();

        let personas = service
            .pseudonyms_by_user_id(user_id, RoleName::User)
            .unwrap();
        assert_eq!(personas.len(), 1);
        assert_ne!(personas[0].pseudonym_id, persona.pseudonym_id);
    }
}
