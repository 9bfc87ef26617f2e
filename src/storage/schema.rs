//! # Database Schema
//!
//! SQL schema definitions for the correlation core.
//!
//! ## Schema Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         DATABASE SCHEMA                                 │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ┌─────────────────┐   ┌──────────────────┐   ┌────────────────────┐   │
//! │  │     users       │   │    pseudonyms    │   │     role_keys      │   │
//! │  ├─────────────────┤   ├──────────────────┤   ├────────────────────┤   │
//! │  │ user_id         │   │ pseudonym_id     │   │ key_id             │   │
//! │  │ email           │   │ display_name     │   │ role_name          │   │
//! │  │ roles (JSON)    │   │ is_default       │   │ scope              │   │
//! │  │ created_at      │   │ is_active        │   │ key_data           │   │
//! │  └─────────────────┘   │ created_at       │   │ key_version        │   │
//! │                        │ last_active_at   │   │ capabilities (JSON)│   │
//! │    NOTE: pseudonyms    └──────────────────┘   │ created_at         │   │
//! │    carry NO user_id —                         │ expires_at         │   │
//! │    linkage exists only                        │ is_active          │   │
//! │    inside encrypted                           │ created_by         │   │
//! │    identity_mappings.                         └────────────────────┘   │
//! │                                                                         │
//! │  ┌──────────────────────────┐                                          │
//! │  │     identity_mappings    │                                          │
//! │  ├──────────────────────────┤                                          │
//! │  │ mapping_id               │                                          │
//! │  │ fingerprint              │ ◄── cross-pseudonym correlation key      │
//! │  │ pseudonym_id             │                                          │
//! │  │ encrypted_real_identity  │ ◄── only the originating role key        │
//! │  │ key_scope                │     can open this blob                   │
//! │  │ key_version              │                                          │
//! │  │ user_id                  │                                          │
//! │  │ is_active                │                                          │
//! │  │ created_at               │                                          │
//! │  └──────────────────────────┘                                          │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

/// Current schema version
pub const SCHEMA_VERSION: i32 = 1;

/// SQL to create all tables
pub const CREATE_TABLES: &str = r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY
);

-- Users table (the user directory)
-- Real identities live here and nowhere else.
CREATE TABLE IF NOT EXISTS users (
    user_id INTEGER PRIMARY KEY AUTOINCREMENT,
    -- Real identity (login email)
    email TEXT NOT NULL UNIQUE,
    -- JSON array of role names, e.g. ["user","platform_admin"]
    roles TEXT NOT NULL DEFAULT '[]',
    created_at INTEGER NOT NULL
);

-- Pseudonyms table (the pseudonym directory)
-- Deliberately carries no user reference; the only path back to a user is
-- through an encrypted identity mapping.
CREATE TABLE IF NOT EXISTS pseudonyms (
    -- 32-hex-char ID derived per (user, context)
    pseudonym_id TEXT PRIMARY KEY,
    display_name TEXT NOT NULL,
    -- The user's default persona
    is_default INTEGER NOT NULL DEFAULT 0,
    -- Soft delete: created → active → deactivated, no re-activation
    is_active INTEGER NOT NULL DEFAULT 1,
    created_at INTEGER NOT NULL,
    last_active_at INTEGER
);

-- Role keys table
-- At most one active, non-expired row per (role_name, scope); deactivated
-- and expired rows are retained for audit and never returned by lookups.
CREATE TABLE IF NOT EXISTS role_keys (
    key_id TEXT PRIMARY KEY,
    role_name TEXT NOT NULL,
    scope TEXT NOT NULL,
    -- Raw derived key bytes
    key_data BLOB NOT NULL,
    key_version INTEGER NOT NULL DEFAULT 1,
    -- JSON array of capability tags
    capabilities TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    expires_at INTEGER NOT NULL,
    is_active INTEGER NOT NULL DEFAULT 1,
    -- User that triggered provisioning
    created_by INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_role_keys_role_scope
    ON role_keys(role_name, scope, is_active);

-- Identity mappings table
-- One encrypted fingerprint↔pseudonym link per (pseudonym, key scope).
CREATE TABLE IF NOT EXISTS identity_mappings (
    mapping_id TEXT PRIMARY KEY,
    -- Salted digest of the real identity; shared across all of a user's
    -- pseudonyms, which is what makes correlation discovery possible
    fingerprint TEXT NOT NULL,
    pseudonym_id TEXT NOT NULL,
    -- nonce || AES-256-GCM(fingerprint:pseudonym_id) under one role key
    encrypted_real_identity BLOB NOT NULL,
    key_scope TEXT NOT NULL,
    key_version INTEGER NOT NULL DEFAULT 1,
    user_id INTEGER NOT NULL,
    is_active INTEGER NOT NULL DEFAULT 1,
    created_at INTEGER NOT NULL,
    UNIQUE (pseudonym_id, key_scope)
);
CREATE INDEX IF NOT EXISTS idx_identity_mappings_fingerprint
    ON identity_mappings(fingerprint);
CREATE INDEX IF NOT EXISTS idx_identity_mappings_pseudonym
    ON identity_mappings(pseudonym_id);
CREATE INDEX IF NOT EXISTS idx_identity_mappings_user
    ON identity_mappings(user_id);
"#;
