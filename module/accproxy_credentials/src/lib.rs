//! Credential Store: presented secret -> `(tenant, plan, fingerprint)`.
//!
//! Fingerprinting is `SHA256(secret || salt)`; lookups consult a short-TTL in-memory cache in
//! front of a SQLite-backed authoritative table. A negative result is never cached so a
//! freshly provisioned credential is visible on the next request.

#![cfg_attr(not(feature = "enabled"), allow(unused))]

pub mod fingerprint;

#[cfg(feature = "enabled")]
pub mod store;
#[cfg(feature = "enabled")]
pub mod extractor;

#[cfg(feature = "enabled")]
pub use store::{ CredentialStore, ResolvedCredential };
#[cfg(feature = "enabled")]
pub use extractor::{ AuthenticatedTenant, CredentialAuthState };
