//! # Cryptography Module
//!
//! The key-derivation engine: domain-separated master secrets, time-bucketed
//! role-key derivation, identity fingerprints, pseudonym-ID derivation, and
//! authenticated encryption of identity mappings.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    KEY DERIVATION ARCHITECTURE                          │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │  Domain Masters (five independent 32-byte secrets)              │   │
//! │  │  ───────────────────────────────────────────────                 │   │
//! │  │                                                                 │   │
//! │  │  user_pseudonyms_v1 ──────┐                                     │   │
//! │  │  user_self_correlation_v1 │   one master per functional domain  │   │
//! │  │  moderator_correlation_v1 ├── loaded once at startup, zeroized  │   │
//! │  │  admin_correlation_v1     │   on drop; a leak compromises only  │   │
//! │  │  legal_correlation_v1 ────┘   its own domain                    │   │
//! │  └───────────────────────────┬─────────────────────────────────────┘   │
//! │                              │                                          │
//! │          ┌───────────────────┼──────────────────────┐                  │
//! │          ▼                   ▼                      ▼                  │
//! │  ┌───────────────┐  ┌─────────────────┐  ┌──────────────────┐         │
//! │  │  Role keys    │  │  Pseudonym IDs  │  │  Fingerprints    │         │
//! │  │               │  │                 │  │                  │         │
//! │  │ HKDF-SHA256,  │  │ SHA-256 over    │  │ SHA-256 over     │         │
//! │  │ time-bucketed │  │ (user, context) │  │ (identity, salt) │         │
//! │  └───────┬───────┘  └─────────────────┘  └──────────────────┘         │
//! │          │                                                             │
//! │          ▼                                                             │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │  Identity-mapping encryption (AES-256-GCM)                      │   │
//! │  │  fingerprint:pseudonym_id sealed under one role key; any other  │   │
//! │  │  key fails the tag check — this is how scopes stay isolated     │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Despite the "identity-based" naming inherited from the platform's docs,
//! nothing here is pairing-based IBE: the whole scheme is symmetric,
//! domain-separated key derivation plus authenticated encryption.

mod domains;
mod encryption;
mod kdf;

pub use domains::{load_master_secret, Domain, DomainMasters, MASTER_SECRET_SIZE};
pub use encryption::{decrypt_identity_mapping, encrypt_identity_mapping, NONCE_SIZE};
pub use kdf::{KeyDerivationEngine, TimeWindow, FINGERPRINT_BYTES, ROLE_KEY_SIZE};
