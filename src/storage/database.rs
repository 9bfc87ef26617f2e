//! # Database
//!
//! SQLite persistence for the correlation core.
//!
//! ## Database Operations
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      DATABASE OPERATIONS                                │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────┐                      │
//! │  │  RoleKeyStore / IdentityMappingStore /       │                      │
//! │  │  UserDirectory / PseudonymDirectory          │   Domain layers      │
//! │  └───────────────────────┬──────────────────────┘                      │
//! │                          │                                             │
//! │                          ▼                                             │
//! │  ┌──────────────────────────────────────────────┐                      │
//! │  │  Database (this file)                        │   Row-level CRUD,    │
//! │  │                                              │   one transactional  │
//! │  │                                              │   provisioning op    │
//! │  └───────────────────────┬──────────────────────┘                      │
//! │                          │                                             │
//! │                          ▼                                             │
//! │  ┌──────────────────────────────────────────────┐                      │
//! │  │  rusqlite → SQLite (file or in-memory)       │                      │
//! │  └──────────────────────────────────────────────┘                      │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Row-level consistency comes from SQLite itself; the only multi-statement
//! sequence this subsystem needs atomic — pseudonym creation plus its
//! one-or-two mapping inserts — runs inside a single transaction here.

use parking_lot::Mutex;
use rusqlite::{params, Connection};
use std::sync::Arc;

use super::schema;
use crate::directory::{PseudonymRecord, UserRecord};
use crate::error::{Error, Result};
use crate::keys::{Capability, KeyScope, RoleKey, RoleName};
use crate::mapping::IdentityMapping;

/// The main database handle.
///
/// Wraps a SQLite connection and provides row-level methods for the four
/// correlation tables. Cloneable; all clones share one connection.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create a database.
    ///
    /// If path is None, creates an in-memory database (useful for testing).
    pub fn open(path: Option<&str>) -> Result<Self> {
        let conn = match path {
            Some(p) => Connection::open(p)
                .map_err(|e| Error::DatabaseError(format!("failed to open database: {}", e)))?,
            None => Connection::open_in_memory().map_err(|e| {
                Error::DatabaseError(format!("failed to create in-memory database: {}", e))
            })?,
        };

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.init_schema()?;
        Ok(db)
    }

    /// Initialize the database schema.
    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock();

        let version: Option<i32> = conn
            .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
                row.get(0)
            })
            .ok();

        match version {
            None => {
                conn.execute_batch(schema::CREATE_TABLES)
                    .map_err(|e| Error::DatabaseError(format!("failed to create tables: {}", e)))?;
                conn.execute(
                    "INSERT INTO schema_version (version) VALUES (?)",
                    params![schema::SCHEMA_VERSION],
                )
                .map_err(|e| {
                    Error::DatabaseError(format!("failed to set schema version: {}", e))
                })?;
                tracing::info!("Database schema created (version {})", schema::SCHEMA_VERSION);
            }
            Some(v) => {
                tracing::debug!("Database schema version: {}", v);
            }
        }

        Ok(())
    }

    // ========================================================================
    // USER OPERATIONS
    // ========================================================================

    /// Insert a user, returning the assigned user ID.
    pub fn insert_user(&self, email: &str, roles: &[RoleName]) -> Result<i64> {
        let conn = self.conn.lock();
        let roles_json = serde_json::to_string(roles)?;

        conn.execute(
            "INSERT INTO users (email, roles, created_at) VALUES (?, ?, ?)",
            params![email, roles_json, crate::time::now_timestamp()],
        )
        .map_err(|e| Error::DatabaseError(format!("failed to insert user: {}", e)))?;

        Ok(conn.last_insert_rowid())
    }

    /// Get a user by ID.
    pub fn user_by_id(&self, user_id: i64) -> Result<Option<UserRecord>> {
        let conn = self.conn.lock();

        let result = conn.query_row(
            "SELECT user_id, email, roles, created_at FROM users WHERE user_id = ?",
            params![user_id],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                ))
            },
        );

        match result {
            Ok((user_id, email, roles_json, created_at)) => Ok(Some(UserRecord {
                user_id,
                email,
                roles: serde_json::from_str(&roles_json)?,
                created_at,
            })),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(Error::DatabaseError(format!("failed to get user: {}", e))),
        }
    }

    // ========================================================================
    // PSEUDONYM OPERATIONS
    // ========================================================================

    /// Insert a pseudonym row.
    pub fn insert_pseudonym(&self, pseudonym: &PseudonymRecord) -> Result<()> {
        let conn = self.conn.lock();
        insert_pseudonym_row(&conn, pseudonym)
    }

    /// Get a pseudonym by ID.
    pub fn pseudonym_by_id(&self, pseudonym_id: &str) -> Result<Option<PseudonymRecord>> {
        let conn = self.conn.lock();

        let result = conn.query_row(
            "SELECT pseudonym_id, display_name, is_default, is_active, created_at, last_active_at
             FROM pseudonyms WHERE pseudonym_id = ?",
            params![pseudonym_id],
            pseudonym_from_row,
        );

        match result {
            Ok(record) => Ok(Some(record)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(Error::DatabaseError(format!(
                "failed to get pseudonym: {}",
                e
            ))),
        }
    }

    /// Soft-delete a pseudonym. Returns whether a row was changed.
    pub fn deactivate_pseudonym(&self, pseudonym_id: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn
            .execute(
                "UPDATE pseudonyms SET is_active = 0 WHERE pseudonym_id = ? AND is_active = 1",
                params![pseudonym_id],
            )
            .map_err(|e| Error::DatabaseError(format!("failed to deactivate pseudonym: {}", e)))?;
        Ok(rows > 0)
    }

    /// Update a pseudonym's last-active timestamp.
    pub fn touch_pseudonym_last_active(&self, pseudonym_id: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn
            .execute(
                "UPDATE pseudonyms SET last_active_at = ? WHERE pseudonym_id = ?",
                params![crate::time::now_timestamp(), pseudonym_id],
            )
            .map_err(|e| Error::DatabaseError(format!("failed to touch pseudonym: {}", e)))?;
        Ok(rows > 0)
    }

    // ========================================================================
    // ROLE KEY OPERATIONS
    // ========================================================================

    /// Insert a role key row.
    pub fn insert_role_key(&self, key: &RoleKey) -> Result<()> {
        let conn = self.conn.lock();
        let capabilities_json = serde_json::to_string(&key.capabilities)?;

        conn.execute(
            "INSERT INTO role_keys
             (key_id, role_name, scope, key_data, key_version, capabilities,
              created_at, expires_at, is_active, created_by)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                key.key_id,
                key.role,
                key.scope,
                key.key_data,
                key.key_version,
                capabilities_json,
                key.created_at,
                key.expires_at,
                key.is_active,
                key.created_by,
            ],
        )
        .map_err(|e| Error::DatabaseError(format!("failed to insert role key: {}", e)))?;

        Ok(())
    }

    /// Get the active, non-expired key for a (role, scope) pair.
    ///
    /// Deactivated and expired rows are never returned, even if present.
    pub fn active_role_key(&self, role: RoleName, scope: KeyScope) -> Result<Option<RoleKey>> {
        let conn = self.conn.lock();

        let result = conn.query_row(
            "SELECT key_id, role_name, scope, key_data, key_version, capabilities,
                    created_at, expires_at, is_active, created_by
             FROM role_keys
             WHERE role_name = ? AND scope = ? AND is_active = 1 AND expires_at > ?",
            params![role, scope, crate::time::now_timestamp()],
            role_key_from_row,
        );

        match result {
            Ok((mut key, caps_json)) => {
                key.capabilities = serde_json::from_str(&caps_json)?;
                Ok(Some(key))
            }
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(Error::DatabaseError(format!(
                "failed to get role key: {}",
                e
            ))),
        }
    }

    /// List every active, non-expired role key.
    pub fn active_role_keys(&self) -> Result<Vec<RoleKey>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT key_id, role_name, scope, key_data, key_version, capabilities,
                        created_at, expires_at, is_active, created_by
                 FROM role_keys
                 WHERE is_active = 1 AND expires_at > ?
                 ORDER BY role_name, scope",
            )
            .map_err(|e| Error::DatabaseError(format!("failed to prepare query: {}", e)))?;

        let rows = stmt
            .query_map(params![crate::time::now_timestamp()], role_key_from_row)
            .map_err(|e| Error::DatabaseError(format!("failed to query role keys: {}", e)))?;

        let mut keys = Vec::new();
        for row in rows {
            let (mut key, caps_json) =
                row.map_err(|e| Error::DatabaseError(format!("failed to read role key: {}", e)))?;
            key.capabilities = serde_json::from_str(&caps_json)?;
            keys.push(key);
        }
        Ok(keys)
    }

    /// Soft-delete a role key. Returns whether a row was changed.
    pub fn deactivate_role_key(&self, key_id: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn
            .execute(
                "UPDATE role_keys SET is_active = 0 WHERE key_id = ? AND is_active = 1",
                params![key_id],
            )
            .map_err(|e| Error::DatabaseError(format!("failed to deactivate role key: {}", e)))?;
        Ok(rows > 0)
    }

    /// Replace a role key's capability set.
    pub fn update_role_key_capabilities(
        &self,
        key_id: &str,
        capabilities: &[Capability],
    ) -> Result<bool> {
        let conn = self.conn.lock();
        let capabilities_json = serde_json::to_string(capabilities)?;
        let rows = conn
            .execute(
                "UPDATE role_keys SET capabilities = ? WHERE key_id = ?",
                params![capabilities_json, key_id],
            )
            .map_err(|e| {
                Error::DatabaseError(format!("failed to update key capabilities: {}", e))
            })?;
        Ok(rows > 0)
    }

    // ========================================================================
    // IDENTITY MAPPING OPERATIONS
    // ========================================================================

    /// Insert an identity mapping row.
    pub fn insert_identity_mapping(&self, mapping: &IdentityMapping) -> Result<()> {
        let conn = self.conn.lock();
        insert_mapping_row(&conn, mapping)
    }

    /// All active mappings sharing a fingerprint — the cross-pseudonym
    /// correlation primitive.
    pub fn identity_mappings_by_fingerprint(
        &self,
        fingerprint: &str,
    ) -> Result<Vec<IdentityMapping>> {
        self.query_mappings("fingerprint = ?", fingerprint)
    }

    /// All active mappings for one pseudonym (at most one per key scope).
    pub fn identity_mappings_by_pseudonym(
        &self,
        pseudonym_id: &str,
    ) -> Result<Vec<IdentityMapping>> {
        self.query_mappings("pseudonym_id = ?", pseudonym_id)
    }

    /// All active mappings created for one user.
    pub fn identity_mappings_by_user(&self, user_id: i64) -> Result<Vec<IdentityMapping>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT mapping_id, fingerprint, pseudonym_id, encrypted_real_identity,
                        key_scope, key_version, user_id, is_active, created_at
                 FROM identity_mappings WHERE user_id = ? AND is_active = 1",
            )
            .map_err(|e| Error::DatabaseError(format!("failed to prepare query: {}", e)))?;

        let rows = stmt
            .query_map(params![user_id], mapping_from_row)
            .map_err(|e| Error::DatabaseError(format!("failed to query mappings: {}", e)))?;

        collect_mappings(rows)
    }

    fn query_mappings(&self, predicate: &str, value: &str) -> Result<Vec<IdentityMapping>> {
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT mapping_id, fingerprint, pseudonym_id, encrypted_real_identity,
                    key_scope, key_version, user_id, is_active, created_at
             FROM identity_mappings WHERE {} AND is_active = 1",
            predicate
        );
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| Error::DatabaseError(format!("failed to prepare query: {}", e)))?;

        let rows = stmt
            .query_map(params![value], mapping_from_row)
            .map_err(|e| Error::DatabaseError(format!("failed to query mappings: {}", e)))?;

        collect_mappings(rows)
    }

    /// Soft-delete an identity mapping. Returns whether a row was changed.
    pub fn deactivate_identity_mapping(&self, mapping_id: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn
            .execute(
                "UPDATE identity_mappings SET is_active = 0 WHERE mapping_id = ? AND is_active = 1",
                params![mapping_id],
            )
            .map_err(|e| Error::DatabaseError(format!("failed to deactivate mapping: {}", e)))?;
        Ok(rows > 0)
    }

    // ========================================================================
    // TRANSACTIONAL PROVISIONING
    // ========================================================================

    /// Insert a pseudonym and its identity mappings atomically.
    ///
    /// Either the pseudonym row and every mapping land together or nothing
    /// does, so a crash mid-registration can never leave a pseudonym without
    /// its mapping.
    pub fn create_pseudonym_with_mappings(
        &self,
        pseudonym: &PseudonymRecord,
        mappings: &[IdentityMapping],
    ) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn
            .transaction()
            .map_err(|e| Error::DatabaseError(format!("failed to begin transaction: {}", e)))?;

        insert_pseudonym_row(&tx, pseudonym)?;
        for mapping in mappings {
            insert_mapping_row(&tx, mapping)?;
        }

        tx.commit()
            .map_err(|e| Error::DatabaseError(format!("failed to commit provisioning: {}", e)))?;

        tracing::debug!(
            pseudonym_id = %pseudonym.pseudonym_id,
            mapping_count = mappings.len(),
            "Created pseudonym with identity mappings"
        );
        Ok(())
    }
}

// ============================================================================
// ROW MAPPERS
// ============================================================================

fn insert_pseudonym_row(conn: &Connection, pseudonym: &PseudonymRecord) -> Result<()> {
    conn.execute(
        "INSERT INTO pseudonyms
         (pseudonym_id, display_name, is_default, is_active, created_at, last_active_at)
         VALUES (?, ?, ?, ?, ?, ?)",
        params![
            pseudonym.pseudonym_id,
            pseudonym.display_name,
            pseudonym.is_default,
            pseudonym.is_active,
            pseudonym.created_at,
            pseudonym.last_active_at,
        ],
    )
    .map_err(|e| Error::DatabaseError(format!("failed to insert pseudonym: {}", e)))?;
    Ok(())
}

fn insert_mapping_row(conn: &Connection, mapping: &IdentityMapping) -> Result<()> {
    conn.execute(
        "INSERT INTO identity_mappings
         (mapping_id, fingerprint, pseudonym_id, encrypted_real_identity,
          key_scope, key_version, user_id, is_active, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            mapping.mapping_id,
            mapping.fingerprint,
            mapping.pseudonym_id,
            mapping.encrypted_real_identity,
            mapping.key_scope,
            mapping.key_version,
            mapping.user_id,
            mapping.is_active,
            mapping.created_at,
        ],
    )
    .map_err(|e| Error::DatabaseError(format!("failed to insert identity mapping: {}", e)))?;
    Ok(())
}

fn pseudonym_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<PseudonymRecord> {
    Ok(PseudonymRecord {
        pseudonym_id: row.get(0)?,
        display_name: row.get(1)?,
        is_default: row.get(2)?,
        is_active: row.get(3)?,
        created_at: row.get(4)?,
        last_active_at: row.get(5)?,
    })
}

// Capabilities arrive as the raw JSON column; the caller parses it so JSON
// errors surface as SerializationError rather than a SQLite error.
fn role_key_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<(RoleKey, String)> {
    Ok((
        RoleKey {
            key_id: row.get(0)?,
            role: row.get(1)?,
            scope: row.get(2)?,
            key_data: row.get(3)?,
            key_version: row.get(4)?,
            capabilities: Vec::new(),
            created_at: row.get(6)?,
            expires_at: row.get(7)?,
            is_active: row.get(8)?,
            created_by: row.get(9)?,
        },
        row.get(5)?,
    ))
}

fn mapping_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<IdentityMapping> {
    Ok(IdentityMapping {
        mapping_id: row.get(0)?,
        fingerprint: row.get(1)?,
        pseudonym_id: row.get(2)?,
        encrypted_real_identity: row.get(3)?,
        key_scope: row.get(4)?,
        key_version: row.get(5)?,
        user_id: row.get(6)?,
        is_active: row.get(7)?,
        created_at: row.get(8)?,
    })
}

fn collect_mappings<'a>(
    rows: impl Iterator<Item = rusqlite::Result<IdentityMapping>> + 'a,
) -> Result<Vec<IdentityMapping>> {
    let mut mappings = Vec::new();
    for row in rows {
        mappings.push(row.map_err(|e| Error::DatabaseError(format!("failed to read mapping: {}", e)))?);
    }
    Ok(mappings)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn test_role_key(role: RoleName, scope: KeyScope, expires_at: i64) -> RoleKey {
        RoleKey {
            key_id: uuid::Uuid::new_v4().to_string(),
            role,
            scope,
            key_data: vec![7u8; 32],
            key_version: 1,
            capabilities: vec![Capability::Login, Capability::AccessOwnPseudonyms],
            created_at: crate::time::now_timestamp(),
            expires_at,
            is_active: true,
            created_by: 1,
        }
    }

    fn test_mapping(pseudonym_id: &str, scope: KeyScope, user_id: i64) -> IdentityMapping {
        IdentityMapping {
            mapping_id: uuid::Uuid::new_v4().to_string(),
            fingerprint: "aabbccddeeff00112233445566778899".into(),
            pseudonym_id: pseudonym_id.into(),
            encrypted_real_identity: vec![1, 2, 3],
            key_scope: scope,
            key_version: 1,
            user_id,
            is_active: true,
            created_at: crate::time::now_timestamp(),
        }
    }

    fn test_pseudonym(id: &str) -> PseudonymRecord {
        PseudonymRecord {
            pseudonym_id: id.into(),
            display_name: "display".into(),
            is_default: true,
            is_active: true,
            created_at: crate::time::now_timestamp(),
            last_active_at: None,
        }
    }

    #[test]
    fn test_user_round_trip() {
        let db = Database::open(None).unwrap();
        let id = db
            .insert_user("a@example.com", &[RoleName::User, RoleName::PlatformAdmin])
            .unwrap();

        let user = db.user_by_id(id).unwrap().unwrap();
        assert_eq!(user.email, "a@example.com");
        assert_eq!(user.roles, vec![RoleName::User, RoleName::PlatformAdmin]);

        assert!(db.user_by_id(9999).unwrap().is_none());
    }

    #[test]
    fn test_active_role_key_filters_expired_and_inactive() {
        let db = Database::open(None).unwrap();
        let now = crate::time::now_timestamp();

        // Expired key is never returned.
        let expired = test_role_key(RoleName::User, KeyScope::Authentication, now - 10);
        db.insert_role_key(&expired).unwrap();
        assert!(db
            .active_role_key(RoleName::User, KeyScope::Authentication)
            .unwrap()
            .is_none());

        // Live key is returned with its capability set intact.
        let live = test_role_key(RoleName::User, KeyScope::Authentication, now + 3600);
        db.insert_role_key(&live).unwrap();
        let found = db
            .active_role_key(RoleName::User, KeyScope::Authentication)
            .unwrap()
            .unwrap();
        assert_eq!(found.key_id, live.key_id);
        assert_eq!(found.capabilities, live.capabilities);

        // Deactivation hides it again.
        assert!(db.deactivate_role_key(&live.key_id).unwrap());
        assert!(db
            .active_role_key(RoleName::User, KeyScope::Authentication)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_mapping_queries() {
        let db = Database::open(None).unwrap();

        let m1 = test_mapping("pseudo-1", KeyScope::SelfCorrelation, 1);
        let m2 = test_mapping("pseudo-1", KeyScope::Correlation, 1);
        let m3 = test_mapping("pseudo-2", KeyScope::SelfCorrelation, 2);
        for m in [&m1, &m2, &m3] {
            db.insert_identity_mapping(m).unwrap();
        }

        assert_eq!(db.identity_mappings_by_pseudonym("pseudo-1").unwrap().len(), 2);
        assert_eq!(db.identity_mappings_by_user(2).unwrap().len(), 1);
        // All three share the fixture fingerprint.
        assert_eq!(
            db.identity_mappings_by_fingerprint("aabbccddeeff00112233445566778899")
                .unwrap()
                .len(),
            3
        );

        assert!(db.deactivate_identity_mapping(&m2.mapping_id).unwrap());
        assert_eq!(db.identity_mappings_by_pseudonym("pseudo-1").unwrap().len(), 1);
    }

    #[test]
    fn test_duplicate_scope_per_pseudonym_rejected() {
        let db = Database::open(None).unwrap();
        db.insert_identity_mapping(&test_mapping("pseudo-1", KeyScope::SelfCorrelation, 1))
            .unwrap();
        let err = db
            .insert_identity_mapping(&test_mapping("pseudo-1", KeyScope::SelfCorrelation, 1))
            .unwrap_err();
        assert!(matches!(err, Error::DatabaseError(_)));
    }

    #[test]
    fn test_transactional_creation_rolls_back() {
        let db = Database::open(None).unwrap();

        // Pre-existing mapping forces the second insert in the transaction
        // to violate the (pseudonym_id, key_scope) uniqueness constraint.
        db.insert_identity_mapping(&test_mapping("pseudo-1", KeyScope::SelfCorrelation, 1))
            .unwrap();

        let result = db.create_pseudonym_with_mappings(
            &test_pseudonym("pseudo-1"),
            &[test_mapping("pseudo-1", KeyScope::SelfCorrelation, 1)],
        );
        assert!(result.is_err());

        // The pseudonym row must not have survived the failed transaction.
        assert!(db.pseudonym_by_id("pseudo-1").unwrap().is_none());
    }

    #[test]
    fn test_pseudonym_lifecycle() {
        let db = Database::open(None).unwrap();
        let p = test_pseudonym("pseudo-1");
        db.insert_pseudonym(&p).unwrap();

        let found = db.pseudonym_by_id("pseudo-1").unwrap().unwrap();
        assert!(found.is_active);
        assert!(found.last_active_at.is_none());

        assert!(db.touch_pseudonym_last_active("pseudo-1").unwrap());
        let touched = db.pseudonym_by_id("pseudo-1").unwrap().unwrap();
        assert!(touched.last_active_at.is_some());

        assert!(db.deactivate_pseudonym("pseudo-1").unwrap());
        // No re-activation path exists; deactivating twice changes nothing.
        assert!(!db.deactivate_pseudonym("pseudo-1").unwrap());
    }
}
