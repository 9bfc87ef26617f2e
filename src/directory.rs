//! # User and Pseudonym Directories
//!
//! Thin directory layers over the `users` and `pseudonyms` tables. The two
//! tables share no foreign key; the only path from a pseudonym back to a
//! user runs through an encrypted identity mapping.

use crate::error::{Error, Result};
use crate::keys::RoleName;
use crate::storage::Database;

// ============================================================================
// RECORDS
// ============================================================================

/// A user row: the real identity and its assigned roles.
#[derive(Debug, Clone)]
pub struct UserRecord {
    /// Auto-assigned numeric ID
    pub user_id: i64,
    /// Real identity (login email)
    pub email: String,
    /// Assigned roles; may be empty
    pub roles: Vec<RoleName>,
    /// Creation timestamp (Unix seconds)
    pub created_at: i64,
}

impl UserRecord {
    /// The roles to provision and authorize against. A user with no
    /// assigned roles acts as a plain user.
    pub fn effective_roles(&self) -> Vec<RoleName> {
        if self.roles.is_empty() {
            vec![RoleName::User]
        } else {
            self.roles.clone()
        }
    }

    /// The role used when a single role must represent the user, e.g. when
    /// deciding whether registration also writes a correlation mapping.
    /// Admin-class roles win over ordinary ones.
    pub fn primary_role(&self) -> RoleName {
        let roles = self.effective_roles();
        roles
            .iter()
            .copied()
            .find(RoleName::is_admin_class)
            .unwrap_or(roles[0])
    }
}

/// A pseudonym row. Deliberately carries no user reference.
#[derive(Debug, Clone)]
pub struct PseudonymRecord {
    /// 32-hex-char ID derived per (user, context)
    pub pseudonym_id: String,
    /// Public display name
    pub display_name: String,
    /// Whether this is the user's default persona
    pub is_default: bool,
    /// Soft-delete flag; deactivation is final
    pub is_active: bool,
    /// Creation timestamp (Unix seconds)
    pub created_at: i64,
    /// Last activity timestamp, if any
    pub last_active_at: Option<i64>,
}

// ============================================================================
// DIRECTORIES
// ============================================================================

/// Directory of real users.
#[derive(Clone)]
pub struct UserDirectory {
    db: Database,
}

impl UserDirectory {
    /// Create a directory over a database.
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Register a user, returning the assigned ID.
    pub fn create_user(&self, email: &str, roles: &[RoleName]) -> Result<i64> {
        let user_id = self.db.insert_user(email, roles)?;
        tracing::info!(user_id, "Registered user");
        Ok(user_id)
    }

    /// Look up a user, erroring if absent.
    pub fn user_by_id(&self, user_id: i64) -> Result<UserRecord> {
        self.db
            .user_by_id(user_id)?
            .ok_or(Error::UserNotFound(user_id))
    }
}

/// Directory of pseudonyms.
#[derive(Clone)]
pub struct PseudonymDirectory {
    db: Database,
}

impl PseudonymDirectory {
    /// Create a directory over a database.
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Look up a pseudonym, erroring if absent.
    pub fn pseudonym_by_id(&self, pseudonym_id: &str) -> Result<PseudonymRecord> {
        self.db
            .pseudonym_by_id(pseudonym_id)?
            .ok_or_else(|| Error::PseudonymNotFound(pseudonym_id.to_string()))
    }

    /// Soft-delete a pseudonym; there is no re-activation path.
    pub fn deactivate(&self, pseudonym_id: &str) -> Result<()> {
        if !self.db.deactivate_pseudonym(pseudonym_id)? {
            return Err(Error::PseudonymNotFound(pseudonym_id.to_string()));
        }
        tracing::info!(pseudonym_id, "Deactivated pseudonym");
        Ok(())
    }

    /// Stamp the pseudonym's last-active time with the current clock.
    pub fn touch_last_active(&self, pseudonym_id: &str) -> Result<()> {
        if !self.db.touch_pseudonym_last_active(pseudonym_id)? {
            return Err(Error::PseudonymNotFound(pseudonym_id.to_string()));
        }
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::now_timestamp;

    #[test]
    fn test_effective_roles_default_to_user() {
        let user = UserRecord {
            user_id: 1,
            email: "a@example.com".into(),
            roles: vec![],
            created_at: 0,
        };
        assert_eq!(user.effective_roles(), vec![RoleName::User]);
        assert_eq!(user.primary_role(), RoleName::User);
    }

    #[test]
    fn test_primary_role_prefers_admin_class() {
        let user = UserRecord {
            user_id: 1,
            email: "a@example.com".into(),
            roles: vec![RoleName::User, RoleName::TrustSafety],
            created_at: 0,
        };
        assert_eq!(user.primary_role(), RoleName::TrustSafety);
    }

    #[test]
    fn test_directories_round_trip() {
        let db = Database::open(None).unwrap();
        let users = UserDirectory::new(db.clone());
        let pseudonyms = PseudonymDirectory::new(db.clone());

        let user_id = users
            .create_user("a@example.com", &[RoleName::Moderator])
            .unwrap();
        let user = users.user_by_id(user_id).unwrap();
        assert_eq!(user.roles, vec![RoleName::Moderator]);
        assert!(matches!(
            users.user_by_id(404).unwrap_err(),
            Error::UserNotFound(404)
        ));

        db.insert_pseudonym(&PseudonymRecord {
            pseudonym_id: "p1".into(),
            display_name: "display".into(),
            is_default: true,
            is_active: true,
            created_at: now_timestamp(),
            last_active_at: None,
        })
        .unwrap();

        pseudonyms.touch_last_active("p1").unwrap();
        assert!(pseudonyms
            .pseudonym_by_id("p1")
            .unwrap()
            .last_active_at
            .is_some());

        pseudonyms.deactivate("p1").unwrap();
        assert!(matches!(
            pseudonyms.deactivate("p1").unwrap_err(),
            Error::PseudonymNotFound(_)
        ));
    }
}
