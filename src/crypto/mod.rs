//! The crypto module wraps the cryptographic primitives the protocol rests
//! on: hashing (for commitments, key IDs, and fingerprints) and signing.
//!
//! Specific algorithms are wrapped in descriptive, algorithm-tagged
//! interfaces, allowing the cryptographic suite to expand without new
//! interfaces being built around the new primitives.

pub mod hash;
pub mod sign;

pub use hash::Hash;
pub use sign::{KeyID, SignKeypair, SignKeypairPublic, SignKeypairSignature};
