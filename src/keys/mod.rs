//! # Keys Module
//!
//! The authorization vocabulary (roles, scopes, capabilities) and the
//! persisted role-key store that enforces it.

mod store;
mod types;

pub use store::{RoleKey, RoleKeyStore};
pub use types::{Capability, KeyScope, RoleName};
