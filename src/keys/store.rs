//! # Role Key Store
//!
//! Persisted role keys and capability enforcement.
//!
//! ## Key Lifecycle
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       ROLE KEY LIFECYCLE                                │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ensure_default_keys(user)                                              │
//! │      │                                                                  │
//! │      ├── for each of the user's roles:                                  │
//! │      │     (role, authentication)   key + login capabilities            │
//! │      │     (role, self_correlation) key + own-pseudonym capabilities    │
//! │      │     (role, correlation)      key — admin-class roles only        │
//! │      │                                                                  │
//! │      ├── existing active key → kept as-is; missing required             │
//! │      │   capabilities are unioned in, never replaced wholesale          │
//! │      └── missing key → derived (30-day bucket), stored, expires in 1y  │
//! │                                                                         │
//! │  validate_capability(role, scope, cap)                                  │
//! │      ├── no active, unexpired key          → KeyNotFound               │
//! │      └── key lacks the capability          → CapabilityDenied          │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;

use super::types::{Capability, KeyScope, RoleName};
use crate::crypto::{KeyDerivationEngine, TimeWindow};
use crate::error::{Error, Result};
use crate::storage::Database;
use crate::time::{now_timestamp, ONE_YEAR_SECS};

// ============================================================================
// ROLE KEY RECORD
// ============================================================================

/// A persisted role key row.
#[derive(Debug, Clone)]
pub struct RoleKey {
    /// Unique key identifier (UUID v4)
    pub key_id: String,
    /// The role this key belongs to
    pub role: RoleName,
    /// The key's purpose
    pub scope: KeyScope,
    /// Raw derived key bytes
    pub key_data: Vec<u8>,
    /// Derivation-parameter version stamped at creation
    pub key_version: i32,
    /// Operations this key permits
    pub capabilities: Vec<Capability>,
    /// Creation timestamp (Unix seconds)
    pub created_at: i64,
    /// Expiry timestamp; expired keys are never returned by lookups
    pub expires_at: i64,
    /// Soft-delete flag
    pub is_active: bool,
    /// User whose registration triggered provisioning
    pub created_by: i64,
}

impl RoleKey {
    /// Whether this key carries a capability.
    pub fn has_capability(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }
}

// ============================================================================
// DEFAULT CAPABILITY SETS
// ============================================================================

const AUTHENTICATION_CAPABILITIES: &[Capability] = &[
    Capability::AccessOwnPseudonyms,
    Capability::Login,
    Capability::SessionManagement,
];

const SELF_CORRELATION_CAPABILITIES: &[Capability] = &[
    Capability::VerifyOwnPseudonymOwnership,
    Capability::ManageOwnProfile,
];

const CORRELATION_CAPABILITIES: &[Capability] = &[
    Capability::AccessAllPseudonyms,
    Capability::CrossUserCorrelation,
    Capability::Moderation,
    Capability::Compliance,
    Capability::LegalRequests,
];

fn default_capabilities(scope: KeyScope) -> &'static [Capability] {
    match scope {
        KeyScope::Authentication => AUTHENTICATION_CAPABILITIES,
        KeyScope::SelfCorrelation => SELF_CORRELATION_CAPABILITIES,
        KeyScope::Correlation => CORRELATION_CAPABILITIES,
    }
}

// ============================================================================
// ROLE KEY STORE
// ============================================================================

/// Store for persisted role keys.
///
/// Wraps the database with capability validation and idempotent default-key
/// provisioning. Cloneable; clones share the database handle and engine.
#[derive(Clone)]
pub struct RoleKeyStore {
    db: Database,
    engine: Arc<KeyDerivationEngine>,
}

impl RoleKeyStore {
    /// Create a store over a database and derivation engine.
    pub fn new(db: Database, engine: Arc<KeyDerivationEngine>) -> Self {
        Self { db, engine }
    }

    /// Get the active, unexpired key for a (role, scope) pair.
    pub fn get(&self, role: RoleName, scope: KeyScope) -> Result<Option<RoleKey>> {
        self.db.active_role_key(role, scope)
    }

    /// Whether the (role, scope) key carries a capability.
    ///
    /// A missing key is an error, not `false`: callers distinguish "never
    /// provisioned" from "provisioned without this grant".
    pub fn validate_capability(
        &self,
        role: RoleName,
        scope: KeyScope,
        capability: Capability,
    ) -> Result<bool> {
        let key = self
            .get(role, scope)?
            .ok_or(Error::KeyNotFound { role, scope })?;
        Ok(key.has_capability(capability))
    }

    /// Fetch the key for a (role, scope) and require a capability on it.
    ///
    /// This is the single authorization gate every correlation operation
    /// passes through. Missing key and missing capability are distinct
    /// errors so callers can trigger provisioning on the former.
    pub fn key_for_operation(
        &self,
        role: RoleName,
        scope: KeyScope,
        capability: Capability,
    ) -> Result<RoleKey> {
        let key = self
            .get(role, scope)?
            .ok_or(Error::KeyNotFound { role, scope })?;

        if !key.has_capability(capability) {
            tracing::warn!(
                role = %role,
                scope = %scope,
                capability = %capability,
                "Capability denied"
            );
            return Err(Error::CapabilityDenied {
                role,
                scope,
                capability,
            });
        }

        Ok(key)
    }

    /// Derive and persist a new key for a (role, scope) pair.
    ///
    /// The key material is the engine's current 30-day-bucket derivation;
    /// the row expires one year out.
    pub fn create(
        &self,
        role: RoleName,
        scope: KeyScope,
        capabilities: Vec<Capability>,
        created_by: i64,
    ) -> Result<RoleKey> {
        let key_data = self.engine.derive_role_key(role, scope, TimeWindow::Month)?;
        let now = now_timestamp();

        let key = RoleKey {
            key_id: uuid::Uuid::new_v4().to_string(),
            role,
            scope,
            key_data: key_data.to_vec(),
            key_version: self.engine.key_version(),
            capabilities,
            created_at: now,
            expires_at: now + ONE_YEAR_SECS,
            is_active: true,
            created_by,
        };

        self.db.insert_role_key(&key)?;
        tracing::info!(role = %role, scope = %scope, key_id = %key.key_id, "Created role key");
        Ok(key)
    }

    /// Soft-delete a key. Returns whether a row was changed.
    pub fn deactivate(&self, key_id: &str) -> Result<bool> {
        self.db.deactivate_role_key(key_id)
    }

    /// List every active, unexpired key.
    pub fn active_keys(&self) -> Result<Vec<RoleKey>> {
        self.db.active_role_keys()
    }

    /// Ensure every default key a user's roles require exists.
    ///
    /// Idempotent: existing keys are kept, and re-running after a capability
    /// policy change unions the missing required capabilities into the
    /// existing row. Users with no roles are provisioned as plain users.
    /// Returns the number of keys created.
    pub fn ensure_default_keys(&self, user_id: i64) -> Result<usize> {
        let user = self
            .db
            .user_by_id(user_id)?
            .ok_or(Error::UserNotFound(user_id))?;
        let roles = user.effective_roles();

        let mut created = 0;
        for role in roles {
            created += self.ensure_key(role, KeyScope::Authentication, user_id)?;
            created += self.ensure_key(role, KeyScope::SelfCorrelation, user_id)?;
            if role.is_admin_class() {
                created += self.ensure_key(role, KeyScope::Correlation, user_id)?;
            }
        }

        if created > 0 {
            tracing::info!(user_id, created, "Provisioned default role keys");
        }
        Ok(created)
    }

    fn ensure_key(&self, role: RoleName, scope: KeyScope, created_by: i64) -> Result<usize> {
        let required = default_capabilities(scope);

        match self.get(role, scope)? {
            Some(existing) => {
                // Union in capabilities the policy now requires but the row
                // predates. Extra capabilities on the row are left alone.
                let missing: Vec<Capability> = required
                    .iter()
                    .copied()
                    .filter(|c| !existing.has_capability(*c))
                    .collect();
                if !missing.is_empty() {
                    let mut merged = existing.capabilities.clone();
                    merged.extend(missing.iter().copied());
                    self.db
                        .update_role_key_capabilities(&existing.key_id, &merged)?;
                    tracing::warn!(
                        role = %role,
                        scope = %scope,
                        added = ?missing,
                        "Repaired drifted capability set on existing key"
                    );
                }
                Ok(0)
            }
            None => {
                self.create(role, scope, required.to_vec(), created_by)?;
                Ok(1)
            }
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::DomainMasters;

    fn test_store() -> RoleKeyStore {
        let db = Database::open(None).unwrap();
        let engine = Arc::new(KeyDerivationEngine::new(
            DomainMasters::generate(),
            "fingerprint_salt_v1",
            1,
        ));
        RoleKeyStore::new(db, engine)
    }

    fn store_with_user(roles: &[RoleName]) -> (RoleKeyStore, i64) {
        let store = test_store();
        let user_id = store.db.insert_user("u@example.com", roles).unwrap();
        (store, user_id)
    }

    #[test]
    fn test_roleless_user_provisioned_as_plain_user() {
        let (store, user_id) = store_with_user(&[]);

        assert_eq!(store.ensure_default_keys(user_id).unwrap(), 2);
        assert!(store
            .get(RoleName::User, KeyScope::Authentication)
            .unwrap()
            .is_some());
        assert!(store
            .get(RoleName::User, KeyScope::SelfCorrelation)
            .unwrap()
            .is_some());
        assert!(store
            .get(RoleName::User, KeyScope::Correlation)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_admin_gets_correlation_key() {
        let (store, user_id) = store_with_user(&[RoleName::PlatformAdmin]);

        assert_eq!(store.ensure_default_keys(user_id).unwrap(), 3);
        let key = store
            .get(RoleName::PlatformAdmin, KeyScope::Correlation)
            .unwrap()
            .unwrap();
        assert!(key.has_capability(Capability::CrossUserCorrelation));
        assert!(key.has_capability(Capability::AccessAllPseudonyms));
    }

    #[test]
    fn test_provisioning_is_idempotent() {
        let (store, user_id) = store_with_user(&[RoleName::User, RoleName::PlatformAdmin]);

        assert_eq!(store.ensure_default_keys(user_id).unwrap(), 5);
        assert_eq!(store.ensure_default_keys(user_id).unwrap(), 0);

        let correlation_keys: Vec<_> = store
            .active_keys()
            .unwrap()
            .into_iter()
            .filter(|k| k.scope == KeyScope::Correlation)
            .collect();
        assert_eq!(correlation_keys.len(), 1);
    }

    #[test]
    fn test_capability_drift_is_repaired_by_union() {
        let (store, user_id) = store_with_user(&[]);

        // Key created under an older, narrower policy with one extra grant.
        store
            .create(
                RoleName::User,
                KeyScope::Authentication,
                vec![Capability::Login, Capability::Moderation],
                user_id,
            )
            .unwrap();

        assert_eq!(store.ensure_default_keys(user_id).unwrap(), 1);

        let key = store
            .get(RoleName::User, KeyScope::Authentication)
            .unwrap()
            .unwrap();
        // Required capabilities unioned in, extra grant untouched.
        assert!(key.has_capability(Capability::Login));
        assert!(key.has_capability(Capability::SessionManagement));
        assert!(key.has_capability(Capability::AccessOwnPseudonyms));
        assert!(key.has_capability(Capability::Moderation));
    }

    #[test]
    fn test_validate_capability_semantics() {
        let (store, user_id) = store_with_user(&[]);

        // Before provisioning: KeyNotFound, not a denial.
        let err = store
            .validate_capability(RoleName::User, KeyScope::Authentication, Capability::Login)
            .unwrap_err();
        assert!(matches!(err, Error::KeyNotFound { .. }));

        store.ensure_default_keys(user_id).unwrap();

        assert!(store
            .validate_capability(RoleName::User, KeyScope::Authentication, Capability::Login)
            .unwrap());
        // Present key without the capability: plain false.
        assert!(!store
            .validate_capability(
                RoleName::User,
                KeyScope::Authentication,
                Capability::CrossUserCorrelation,
            )
            .unwrap());
    }

    #[test]
    fn test_key_for_operation_gates() {
        let (store, user_id) = store_with_user(&[]);
        store.ensure_default_keys(user_id).unwrap();

        let key = store
            .key_for_operation(RoleName::User, KeyScope::Authentication, Capability::Login)
            .unwrap();
        assert_eq!(key.key_data.len(), 32);

        let err = store
            .key_for_operation(
                RoleName::User,
                KeyScope::Authentication,
                Capability::CrossUserCorrelation,
            )
            .unwrap_err();
        assert!(matches!(err, Error::CapabilityDenied { .. }));
        assert!(err.is_authorization());
    }

    #[test]
    fn test_ensure_default_keys_unknown_user() {
        let store = test_store();
        let err = store.ensure_default_keys(404).unwrap_err();
        assert!(matches!(err, Error::UserNotFound(404)));
    }

    #[test]
    fn test_deactivated_key_triggers_key_not_found() {
        let (store, user_id) = store_with_user(&[]);
        store.ensure_default_keys(user_id).unwrap();

        let key = store
            .get(RoleName::User, KeyScope::Authentication)
            .unwrap()
            .unwrap();
        assert!(store.deactivate(&key.key_id).unwrap());

        let err = store
            .key_for_operation(RoleName::User, KeyScope::Authentication, Capability::Login)
            .unwrap_err();
        assert!(matches!(err, Error::KeyNotFound { .. }));
    }
}
