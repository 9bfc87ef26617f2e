//! # Error Handling
//!
//! This module provides the error types for Veilpost Core.
//!
//! ## Error Hierarchy
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                           ERROR HIERARCHY                               │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Error (top-level)                                                     │
//! │  │                                                                      │
//! │  ├── Authorization Errors                                              │
//! │  │   ├── CapabilityDenied      - Role key lacks the capability         │
//! │  │   └── KeyNotFound           - No active, non-expired role key       │
//! │  │                                                                      │
//! │  ├── Crypto Errors                                                     │
//! │  │   ├── InvalidMasterSecret   - Wrong-length/-format master secret    │
//! │  │   ├── KeyDerivationFailed   - HKDF expansion failed                 │
//! │  │   ├── EncryptionFailed      - AES-GCM sealing failed                │
//! │  │   └── DecryptionMismatch    - Key does not match the ciphertext     │
//! │  │                                                                      │
//! │  ├── Lookup Errors                                                     │
//! │  │   ├── MappingNotFound       - No identity mapping for the subject   │
//! │  │   ├── UserNotFound          - No such user in the directory         │
//! │  │   └── PseudonymNotFound     - No such pseudonym                     │
//! │  │                                                                      │
//! │  └── Storage Errors                                                    │
//! │      ├── DatabaseError         - SQLite failure                        │
//! │      ├── StorageReadError      - Failed to read key material           │
//! │      ├── StorageWriteError     - Failed to persist key material        │
//! │      ├── StorageCorrupted      - Persisted data failed validation      │
//! │      └── SerializationError    - JSON column encode/decode failure     │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Capability denials and cryptographic mismatches are never retried: a
//! denied capability or wrong-key decryption cannot succeed on retry.
//! `DecryptionMismatch` is an expected outcome while iterating candidate
//! mappings and only surfaces when every candidate has failed.

use thiserror::Error;

use crate::keys::{Capability, KeyScope, RoleName};

/// Result type alias for Veilpost Core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for Veilpost Core
///
/// All errors are categorized by concern so the service layer can map them
/// to distinct, non-leaking responses (authorization vs. not-found vs.
/// infrastructure).
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Authorization Errors (100-199)
    // ========================================================================
    /// The role key for this (role, scope) does not carry the capability
    #[error("role key for {role}/{scope} does not carry capability '{capability}'")]
    CapabilityDenied {
        /// Role whose key was checked
        role: RoleName,
        /// Scope whose key was checked
        scope: KeyScope,
        /// The capability the operation required
        capability: Capability,
    },

    /// No active, non-expired key exists for this (role, scope)
    #[error("no active role key for {role}/{scope}")]
    KeyNotFound {
        /// Requested role
        role: RoleName,
        /// Requested scope
        scope: KeyScope,
    },

    // ========================================================================
    // Crypto Errors (200-299)
    // ========================================================================
    /// Master secret failed validation at configuration time
    #[error("invalid master secret: {0}")]
    InvalidMasterSecret(String),

    /// Key derivation failed
    #[error("failed to derive key: {0}")]
    KeyDerivationFailed(String),

    /// Encryption failed
    #[error("encryption failed: {0}")]
    EncryptionFailed(String),

    /// Decryption was attempted with a key that does not match the ciphertext
    #[error("decryption failed: key does not match ciphertext")]
    DecryptionMismatch,

    // ========================================================================
    // Lookup Errors (300-399)
    // ========================================================================
    /// No identity mapping exists for the pseudonym or fingerprint
    #[error("identity mapping not found: {0}")]
    MappingNotFound(String),

    /// User does not exist in the user directory
    #[error("user {0} not found")]
    UserNotFound(i64),

    /// Pseudonym does not exist
    #[error("pseudonym not found: {0}")]
    PseudonymNotFound(String),

    /// Unknown role name at a storage or parse boundary
    #[error("unknown role name: {0}")]
    UnknownRole(String),

    /// Unknown key scope at a storage or parse boundary
    #[error("unknown key scope: {0}")]
    UnknownScope(String),

    /// Unknown capability tag at a storage or parse boundary
    #[error("unknown capability: {0}")]
    UnknownCapability(String),

    // ========================================================================
    // Storage Errors (400-499)
    // ========================================================================
    /// Database error
    #[error("database error: {0}")]
    DatabaseError(String),

    /// Failed to read persisted key material or state
    #[error("failed to read from storage: {0}")]
    StorageReadError(String),

    /// Failed to write persisted key material or state
    #[error("failed to write to storage: {0}")]
    StorageWriteError(String),

    /// Persisted data failed validation after a successful read/decrypt
    #[error("data corruption detected: {0}")]
    StorageCorrupted(String),

    /// JSON column encode/decode failure
    #[error("serialization error: {0}")]
    SerializationError(String),
}

impl Error {
    /// Stable numeric code for the API layer.
    ///
    /// Codes are organized by category:
    /// - 100-199: Authorization
    /// - 200-299: Crypto
    /// - 300-399: Lookup
    /// - 400-499: Storage
    pub fn code(&self) -> i32 {
        match self {
            // Authorization (100-199)
            Error::CapabilityDenied { .. } => 100,
            Error::KeyNotFound { .. } => 101,

            // Crypto (200-299)
            Error::InvalidMasterSecret(_) => 200,
            Error::KeyDerivationFailed(_) => 201,
            Error::EncryptionFailed(_) => 202,
            Error::DecryptionMismatch => 203,

            // Lookup (300-399)
            Error::MappingNotFound(_) => 300,
            Error::UserNotFound(_) => 301,
            Error::PseudonymNotFound(_) => 302,
            Error::UnknownRole(_) => 303,
            Error::UnknownScope(_) => 304,
            Error::UnknownCapability(_) => 305,

            // Storage (400-499)
            Error::DatabaseError(_) => 400,
            Error::StorageReadError(_) => 401,
            Error::StorageWriteError(_) => 402,
            Error::StorageCorrupted(_) => 403,
            Error::SerializationError(_) => 404,
        }
    }

    /// Whether this error is an authorization failure.
    ///
    /// Authorization failures map to a 403-class response and are never
    /// retried.
    pub fn is_authorization(&self) -> bool {
        matches!(
            self,
            Error::CapabilityDenied { .. } | Error::KeyNotFound { .. }
        )
    }

    /// Whether this error is a plain not-found condition, distinct from a
    /// denied capability.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::MappingNotFound(_) | Error::UserNotFound(_) | Error::PseudonymNotFound(_)
        )
    }
}

// ============================================================================
// ERROR CONVERSIONS
// ============================================================================

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::DatabaseError(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::SerializationError(err.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::StorageReadError(err.to_string())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let denied = Error::CapabilityDenied {
            role: RoleName::User,
            scope: KeyScope::SelfCorrelation,
            capability: Capability::CrossUserCorrelation,
        };
        assert_eq!(denied.code(), 100);
        assert_eq!(Error::DecryptionMismatch.code(), 203);
        assert_eq!(Error::MappingNotFound("x".into()).code(), 300);
        assert_eq!(Error::DatabaseError("x".into()).code(), 400);
    }

    #[test]
    fn test_authorization_vs_not_found() {
        let denied = Error::CapabilityDenied {
            role: RoleName::User,
            scope: KeyScope::Authentication,
            capability: Capability::Login,
        };
        assert!(denied.is_authorization());
        assert!(!denied.is_not_found());

        let missing = Error::MappingNotFound("abc".into());
        assert!(missing.is_not_found());
        assert!(!missing.is_authorization());
    }
}
