//! The commitment codec: turning key events into the fixed-size digests that
//! get embedded in chain outputs, and turning off-chain payloads back into
//! events.
//!
//! The on-chain side of an event is opaque (just a digest); the event's
//! actual content travels off-chain. Encoding is canonical DER followed by a
//! hash, which makes it deterministic and injective over well-formed events:
//! two distinct events never share a commitment short of a digest collision,
//! and a digest collision is a broken hash function, not a protocol state.
//! Decoding's whole job is to prove an off-chain payload really is the event
//! a given on-chain commitment committed to.

use crate::{
    crypto::hash::Hash,
    error::{Error, Result},
    event::KeyEvent,
    util::ser,
};
use rasn::{AsnType, Decode, Encode};
use serde_derive::{Deserialize, Serialize};

/// A fixed-length digest standing in for an off-chain key event, embedded
/// on-chain to prove the event existed and was ordered at that point without
/// revealing it.
#[derive(Debug, Clone, PartialEq, Eq, AsnType, Encode, Decode, Serialize, Deserialize)]
#[rasn(delegate)]
pub struct Commitment(Hash);

impl Commitment {
    /// Commit to a key event: canonical encoding, then digest. Fails on
    /// structurally invalid events; we never commit to garbage.
    pub fn commit(event: &KeyEvent) -> Result<Self> {
        event.verify_well_formed()?;
        let enc = ser::serialize(event)?;
        Ok(Self(Hash::new_blake3(&enc[..])))
    }

    /// The digest bytes.
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    /// Constant-time equality check against another commitment.
    pub fn verify(&self, other: &Commitment) -> bool {
        self.0.verify(&other.0)
    }
}

impl From<Hash> for Commitment {
    fn from(hash: Hash) -> Self {
        Self(hash)
    }
}

impl std::hash::Hash for Commitment {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.as_bytes().hash(state);
    }
}

impl std::fmt::Display for Commitment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<&str> for Commitment {
    type Error = Error;
    fn try_from(string: &str) -> std::result::Result<Self, Self::Error> {
        Ok(Self(Hash::try_from(string)?))
    }
}

/// Decode an off-chain event payload and prove it against its on-chain
/// commitment.
///
/// `context` is the prior event in the identity's chain (or `None` when
/// decoding a genesis): beyond the digest check, the decoded event must
/// actually link to that prior event, otherwise someone is feeding us a
/// payload from the wrong chain (or the wrong position in the right chain).
///
/// Failure modes, in the order they're checked:
/// - [Error::CodecMalformedPayload]: the bytes don't decode into a
///   structurally valid event
/// - [Error::CodecDigestMismatch]: the payload does not hash to `expected`.
///   Reject; never attempt repair.
/// - [Error::ChainOutOfOrder]: the payload is a real event, but not the
///   successor of `context`
pub fn decode_event(payload: &[u8], expected: &Commitment, context: Option<&KeyEvent>) -> Result<KeyEvent> {
    let event: KeyEvent = ser::deserialize(payload).map_err(|_| Error::CodecMalformedPayload)?;
    event.verify_well_formed().map_err(|_| Error::CodecMalformedPayload)?;
    let commitment = Commitment::commit(&event)?;
    if !commitment.verify(expected) {
        Err(Error::CodecDigestMismatch)?;
    }
    match context {
        Some(prior) => {
            let prior_commitment = Commitment::commit(prior)?;
            if event.prior().as_ref() != Some(&prior_commitment) {
                Err(Error::ChainOutOfOrder)?;
            }
        }
        None => {
            if event.prior().is_some() {
                Err(Error::ChainOutOfOrder)?;
            }
        }
    }
    Ok(event)
}
