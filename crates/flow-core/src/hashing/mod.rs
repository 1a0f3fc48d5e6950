//! Canonical JSON and hashing helpers.
//!
//! Deterministic replay depends on canonical serialization: `to_canonical_json`
//! guarantees a stable key order for objects, and `hash_str`/`hash_value`
//! produce stable identifiers for artifacts and fingerprints.

pub mod canonical_json;
pub mod hash;

pub use canonical_json::to_canonical_json;
pub use hash::{hash_str, hash_value};
