//! # Role, Scope, and Capability Types
//!
//! Closed enums for the authorization vocabulary. The original data model
//! compared free-form strings at runtime; modeling these as sum types makes
//! an invalid (role, scope, capability) combination a construction-time
//! error instead of a silent string mismatch. String forms exist only at the
//! storage and serialization boundaries.

use std::fmt;
use std::str::FromStr;

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};

use crate::crypto::Domain;
use crate::error::Error;

// ============================================================================
// ROLE NAMES
// ============================================================================

/// A platform role.
///
/// Each role maps to exactly one cryptographic [`Domain`]; the mapping is
/// fixed policy, so a leaked master secret only threatens one domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleName {
    /// Ordinary platform user
    User,
    /// Subforum moderator
    Moderator,
    /// Subforum owner (moderation-class privileges)
    SubforumOwner,
    /// Platform administrator
    PlatformAdmin,
    /// Trust & safety staff
    TrustSafety,
    /// Legal compliance staff
    LegalTeam,
}

impl RoleName {
    /// The admin-class roles: the only roles eligible for a
    /// `correlation`-scoped key.
    pub const ADMIN_CLASS: [RoleName; 3] = [
        RoleName::PlatformAdmin,
        RoleName::TrustSafety,
        RoleName::LegalTeam,
    ];

    /// Canonical string form, as stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            RoleName::User => "user",
            RoleName::Moderator => "moderator",
            RoleName::SubforumOwner => "subforum_owner",
            RoleName::PlatformAdmin => "platform_admin",
            RoleName::TrustSafety => "trust_safety",
            RoleName::LegalTeam => "legal_team",
        }
    }

    /// Whether this role is eligible for a `correlation`-scoped key.
    pub fn is_admin_class(&self) -> bool {
        Self::ADMIN_CLASS.contains(self)
    }

    /// The cryptographic domain whose master secret backs this role's
    /// correlation keys.
    pub fn domain(&self) -> Domain {
        match self {
            RoleName::User => Domain::UserCorrelation,
            RoleName::Moderator | RoleName::SubforumOwner => Domain::ModeratorCorrelation,
            RoleName::PlatformAdmin | RoleName::TrustSafety => Domain::AdminCorrelation,
            RoleName::LegalTeam => Domain::LegalCorrelation,
        }
    }
}

impl fmt::Display for RoleName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RoleName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(RoleName::User),
            "moderator" => Ok(RoleName::Moderator),
            "subforum_owner" => Ok(RoleName::SubforumOwner),
            "platform_admin" => Ok(RoleName::PlatformAdmin),
            "trust_safety" => Ok(RoleName::TrustSafety),
            "legal_team" => Ok(RoleName::LegalTeam),
            other => Err(Error::UnknownRole(other.to_string())),
        }
    }
}

impl ToSql for RoleName {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(self.as_str().into())
    }
}

impl FromSql for RoleName {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let s = value.as_str()?;
        s.parse()
            .map_err(|e: Error| FromSqlError::Other(Box::new(e)))
    }
}

// ============================================================================
// KEY SCOPES
// ============================================================================

/// The purpose of a key within a role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyScope {
    /// Login and session operations
    Authentication,
    /// Verifying and managing one's own pseudonyms
    SelfCorrelation,
    /// Cross-user correlation (admin-class roles only)
    Correlation,
}

impl KeyScope {
    /// Canonical string form, as stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyScope::Authentication => "authentication",
            KeyScope::SelfCorrelation => "self_correlation",
            KeyScope::Correlation => "correlation",
        }
    }
}

impl fmt::Display for KeyScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeyScope {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "authentication" => Ok(KeyScope::Authentication),
            "self_correlation" => Ok(KeyScope::SelfCorrelation),
            "correlation" => Ok(KeyScope::Correlation),
            other => Err(Error::UnknownScope(other.to_string())),
        }
    }
}

impl ToSql for KeyScope {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(self.as_str().into())
    }
}

impl FromSql for KeyScope {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let s = value.as_str()?;
        s.parse()
            .map_err(|e: Error| FromSqlError::Other(Box::new(e)))
    }
}

// ============================================================================
// CAPABILITIES
// ============================================================================

/// A permitted operation carried by a role key.
///
/// Authorization flows through the key: an operation checks the key's
/// capability set, never the role name alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Authenticate a session
    Login,
    /// Create/refresh session state
    SessionManagement,
    /// List the caller's own pseudonyms
    AccessOwnPseudonyms,
    /// Verify ownership of one of the caller's own pseudonyms
    VerifyOwnPseudonymOwnership,
    /// Edit the caller's own profile
    ManageOwnProfile,
    /// List any user's pseudonyms by real identity
    AccessAllPseudonyms,
    /// Resolve a pseudonym back to its identity fingerprint
    CrossUserCorrelation,
    /// Moderation workflows
    Moderation,
    /// Compliance workflows
    Compliance,
    /// Legal-request workflows
    LegalRequests,
}

impl Capability {
    /// Canonical string form, as stored in the capabilities JSON column.
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Login => "login",
            Capability::SessionManagement => "session_management",
            Capability::AccessOwnPseudonyms => "access_own_pseudonyms",
            Capability::VerifyOwnPseudonymOwnership => "verify_own_pseudonym_ownership",
            Capability::ManageOwnProfile => "manage_own_profile",
            Capability::AccessAllPseudonyms => "access_all_pseudonyms",
            Capability::CrossUserCorrelation => "cross_user_correlation",
            Capability::Moderation => "moderation",
            Capability::Compliance => "compliance",
            Capability::LegalRequests => "legal_requests",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Capability {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "login" => Ok(Capability::Login),
            "session_management" => Ok(Capability::SessionManagement),
            "access_own_pseudonyms" => Ok(Capability::AccessOwnPseudonyms),
            "verify_own_pseudonym_ownership" => Ok(Capability::VerifyOwnPseudonymOwnership),
            "manage_own_profile" => Ok(Capability::ManageOwnProfile),
            "access_all_pseudonyms" => Ok(Capability::AccessAllPseudonyms),
            "cross_user_correlation" => Ok(Capability::CrossUserCorrelation),
            "moderation" => Ok(Capability::Moderation),
            "compliance" => Ok(Capability::Compliance),
            "legal_requests" => Ok(Capability::LegalRequests),
            other => Err(Error::UnknownCapability(other.to_string())),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
