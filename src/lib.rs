//! Welcome to the Sigil core, a reference implementation of the Sigil
//! protocol.
//!
//! Sigil is a self-sovereign identity protocol built on blockchain
//! single-use seals. An identity is an ordered chain of key events (create,
//! re-key, revoke), and each event is bound to the chain by closing a seal:
//! spending a specific unspent output while embedding a commitment to the
//! event. The backing chain's own double-spend rule is what guarantees every
//! seal closes exactly once, so an identity's history can never fork and
//! never be rewritten, and anyone with chain access can replay it and arrive
//! at the same key set.
//!
//! There are no distinguished revocation keys and no central registry of
//! record. Authority over an identity is precisely the ability to spend its
//! current seal output, and revocation is just another sealed event. Because
//! every event is anchored at a position in chain history, signatures can
//! claim *when* they were made: a signature anchored before a key's
//! revocation stays verifiable forever, while anything claiming a later
//! anchor is rejected.
//!
//! The goals of this protocol are as follows:
//!
//! 1. To give a person a long-lived cryptographic identity whose history is
//! secured by a public blockchain rather than by any institution.
//! 1. To make key rotation and revocation first-class, ordered, and
//! non-repudiable.
//! 1. To let anyone verify an identity's key state and signatures from
//! public data alone.
//! 1. To keep event contents off-chain: the chain sees only opaque
//! commitments.
//! 1. To remain agnostic about the backing chain, speaking to it only
//! through narrow observer/submitter interfaces.

pub mod error;
pub mod util;
pub mod crypto;
pub mod chain;
pub mod codec;
pub mod event;
pub mod seal;
pub mod anchor;
pub mod state;
pub mod store;
pub mod verify;
pub mod registry;
