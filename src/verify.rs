//! Anchored signatures and their verification.
//!
//! A signature here doesn't just claim "this key signed these bytes" — it
//! claims *when*, by naming an anchor position. The claimed anchor is bound
//! into the signed bytes, so it can't be peeled off and re-attached, and the
//! verification predicate checks the signing key against the key set that
//! was authoritative at that anchor. That's what makes revocation
//! retroactively safe: a signature anchored strictly before a key's
//! revocation stays valid forever, while one claiming a post-revocation
//! anchor is dead on arrival.

use crate::{
    chain::AnchorPosition,
    crypto::{
        hash::Hash,
        sign::{KeyID, SignKeypair, SignKeypairSignature},
    },
    error::{Error, Result},
    state::KeyState,
    util::{
        ser::{self, DeText, SerText, SerdeBinary},
        Timestamp,
    },
};
use getset::Getters;
use rasn::{AsnType, Decode, Encode};
use serde_derive::{Deserialize, Serialize};

/// The temporal claim a signature makes.
#[derive(Debug, Clone, PartialEq, Eq, AsnType, Encode, Decode, Serialize, Deserialize)]
#[rasn(choice)]
pub enum SignatureAnchor {
    /// Anchored to a chain position. Verification replays the identity's key
    /// set as of this position.
    #[rasn(tag(explicit(0)))]
    Position(AnchorPosition),
    /// Unanchored: just a wall-clock claim, with none of the chain's ordering
    /// guarantees. Verified against the identity's latest resolved key set.
    #[rasn(tag(explicit(1)))]
    Timestamp(Timestamp),
}

/// A detached, self-contained signature: payload digest, signing key ID,
/// temporal claim, and the signature bytes over all of the above. Anyone
/// holding this plus chain access can verify it; no side channel needed.
#[derive(Debug, Clone, PartialEq, Eq, AsnType, Encode, Decode, Serialize, Deserialize, Getters)]
#[getset(get = "pub")]
pub struct AnchoredSignature {
    /// Digest of the signed payload. We sign digests, not payloads: keeps
    /// the certificate small and the payload private.
    #[rasn(tag(explicit(0)))]
    payload: Hash,
    /// Which of the identity's keys signed
    #[rasn(tag(explicit(1)))]
    key_id: KeyID,
    /// The claimed anchor
    #[rasn(tag(explicit(2)))]
    anchor: SignatureAnchor,
    /// Signature over (payload, anchor)
    #[rasn(tag(explicit(3)))]
    signature: SignKeypairSignature,
}

impl AnchoredSignature {
    /// Sign a payload digest with the given keypair, binding in the claimed
    /// anchor.
    pub fn new(keypair: &SignKeypair, payload: Hash, anchor: SignatureAnchor) -> Result<Self> {
        let key_id = keypair.key_id()?;
        let message = signing_bytes(&payload, &anchor)?;
        let signature = keypair.sign(&message)?;
        Ok(Self {
            payload,
            key_id,
            anchor,
            signature,
        })
    }
}

impl SerdeBinary for AnchoredSignature {}
impl SerText for AnchoredSignature {}
impl DeText for AnchoredSignature {}

/// The bytes a signer actually signs: the canonical encoding of the payload
/// digest and the anchor claim, together.
fn signing_bytes(payload: &Hash, anchor: &SignatureAnchor) -> Result<Vec<u8>> {
    #[derive(AsnType, Encode)]
    struct SigningPreimage {
        #[rasn(tag(explicit(0)))]
        payload: Hash,
        #[rasn(tag(explicit(1)))]
        anchor: SignatureAnchor,
    }
    ser::serialize(&SigningPreimage {
        payload: payload.clone(),
        anchor: anchor.clone(),
    })
}

/// Verify an anchored signature against an identity's (fully replayed) key
/// state.
///
/// Checks, in order:
/// 1. the claimed key exists somewhere in the identity's history
///    ([Error::VerifyUnknownKey] otherwise);
/// 2. the key's validity window contains the claimed anchor
///    ([Error::VerifyKeyNotYetValid] / [Error::VerifyKeyRevoked]);
/// 3. the signature bytes verify over (payload, anchor) with that key
///    ([Error::VerifyCryptoMismatch]).
///
/// The state must be the full replay of the identity's chain — revoked
/// records and all — which is exactly what [KeyState::replay] produces.
pub fn verify_signature(signature: &AnchoredSignature, state: &KeyState) -> Result<()> {
    let record = state
        .key_by_id(signature.key_id())
        .ok_or(Error::VerifyUnknownKey)?;
    let claimed = match signature.anchor() {
        SignatureAnchor::Position(pos) => *pos,
        // unanchored signatures get no ordering guarantee: they verify
        // against the latest state we know
        SignatureAnchor::Timestamp(_) => *state.last_anchor(),
    };
    if record.valid_from() > &claimed {
        Err(Error::VerifyKeyNotYetValid)?;
    }
    if let Some(end) = record.valid_until() {
        if end <= &claimed {
            Err(Error::VerifyKeyRevoked)?;
        }
    }
    let message = signing_bytes(signature.payload(), signature.anchor())?;
    record
        .key()
        .verify(signature.signature(), &message)
        .map_err(|_| Error::VerifyCryptoMismatch)?;
    Ok(())
}
