//! Key events: the only three ways an identity's key state may ever change.
//!
//! An identity is an ordered chain of events. Each event (except genesis)
//! closes the single-use seal its predecessor defined, names its predecessor
//! by commitment, and defines a fresh seal for its successor. The chain's
//! strict linkage is what lets anyone replay an identity's history from
//! public data alone and arrive at the same key set.

use crate::{
    chain::{AnchorPosition, OutputRef},
    codec::Commitment,
    crypto::sign::{KeyID, SignKeypairPublic},
    error::{Error, Result},
    util::{
        ser::{self, Binary, SerText, SerdeBinary},
        Timestamp,
    },
};
use getset::{Getters, MutGetters};
use rasn::{AsnType, Decode, Encode};
use serde_derive::{Deserialize, Serialize};
use std::ops::Deref;

/// The payload of a key event: what the event actually does to the identity's
/// key set. Versioned per variant so the format can evolve without breaking
/// old chains.
#[derive(Debug, Clone, PartialEq, Eq, AsnType, Encode, Decode, Serialize, Deserialize)]
#[rasn(choice)]
pub enum KeyEventBody {
    /// Create a new identity with an initial key set. The commitment of this
    /// event becomes the identity's ID forever after.
    #[rasn(tag(explicit(0)))]
    GenesisV1 {
        #[rasn(tag(explicit(0)))]
        keys: Vec<SignKeypairPublic>,
    },
    /// Add keys to the identity. Existing keys are untouched.
    #[rasn(tag(explicit(1)))]
    ReKeyV1 {
        #[rasn(tag(explicit(0)))]
        keys: Vec<SignKeypairPublic>,
    },
    /// Close the validity of one or more keys. Revocation is by seal
    /// authority, not by any distinguished revocation key: whoever can close
    /// the chain's current seal can revoke.
    #[rasn(tag(explicit(2)))]
    RevokeV1 {
        #[rasn(tag(explicit(0)))]
        key_ids: Vec<KeyID>,
    },
}

/// A single entry in an identity's event chain.
#[derive(Debug, Clone, PartialEq, Eq, AsnType, Encode, Decode, Serialize, Deserialize, Getters, MutGetters)]
#[getset(get = "pub", get_mut = "pub(crate)")]
pub struct KeyEvent {
    /// Commitment of the event that came before this one. Absent only for
    /// genesis.
    #[rasn(tag(explicit(0)))]
    prior: Option<Commitment>,
    /// The output (seal) this event closes. Absent only for genesis, which
    /// closes nothing.
    #[rasn(tag(explicit(1)))]
    closes: Option<OutputRef>,
    /// The output the successor event must close. Absent only on a terminal
    /// revocation.
    #[rasn(tag(explicit(2)))]
    next_seal: Option<OutputRef>,
    /// When the holder created this event. Informational; the authoritative
    /// ordering is the anchor position, never this timestamp.
    #[rasn(tag(explicit(3)))]
    created: Timestamp,
    /// What the event does.
    #[rasn(tag(explicit(4)))]
    body: KeyEventBody,
}

impl KeyEvent {
    /// Create a genesis event: no predecessor, closes nothing, defines the
    /// identity's first seal.
    pub fn genesis<T: Into<Timestamp>>(keys: Vec<SignKeypairPublic>, next_seal: OutputRef, created: T) -> Self {
        Self {
            prior: None,
            closes: None,
            next_seal: Some(next_seal),
            created: created.into(),
            body: KeyEventBody::GenesisV1 { keys },
        }
    }

    /// Create a re-key event extending the chain whose tip is `prior`.
    pub fn rekey<T: Into<Timestamp>>(
        prior: Commitment,
        closes: OutputRef,
        next_seal: OutputRef,
        keys: Vec<SignKeypairPublic>,
        created: T,
    ) -> Self {
        Self {
            prior: Some(prior),
            closes: Some(closes),
            next_seal: Some(next_seal),
            created: created.into(),
            body: KeyEventBody::ReKeyV1 { keys },
        }
    }

    /// Create a revocation event. Passing `None` for `next_seal` makes this a
    /// terminal event: valid only when it revokes the identity's last open
    /// keys.
    pub fn revoke<T: Into<Timestamp>>(
        prior: Commitment,
        closes: OutputRef,
        next_seal: Option<OutputRef>,
        key_ids: Vec<KeyID>,
        created: T,
    ) -> Self {
        Self {
            prior: Some(prior),
            closes: Some(closes),
            next_seal,
            created: created.into(),
            body: KeyEventBody::RevokeV1 { key_ids },
        }
    }

    /// Check the event's internal structure. This is a local check only: it
    /// says nothing about whether the event fits any particular chain, just
    /// whether the event could fit *some* chain.
    pub fn verify_well_formed(&self) -> Result<()> {
        match self.body() {
            KeyEventBody::GenesisV1 { keys } => {
                if self.prior().is_some() || self.closes().is_some() {
                    Err(Error::CodecMalformedPayload)?;
                }
                if self.next_seal().is_none() || keys.is_empty() {
                    Err(Error::CodecMalformedPayload)?;
                }
            }
            KeyEventBody::ReKeyV1 { keys } => {
                if self.prior().is_none() || self.closes().is_none() || self.next_seal().is_none() {
                    Err(Error::CodecMalformedPayload)?;
                }
                if keys.is_empty() {
                    Err(Error::CodecMalformedPayload)?;
                }
            }
            KeyEventBody::RevokeV1 { key_ids } => {
                if self.prior().is_none() || self.closes().is_none() {
                    Err(Error::CodecMalformedPayload)?;
                }
                if key_ids.is_empty() {
                    Err(Error::CodecMalformedPayload)?;
                }
            }
        }
        Ok(())
    }

    /// Compute this event's commitment.
    pub fn commit(&self) -> Result<Commitment> {
        Commitment::commit(self)
    }
}

impl SerdeBinary for KeyEvent {}
impl SerText for KeyEvent {}

/// A key known to an identity, along with its validity window. Materialized
/// by the state machine when it applies an event; the window endpoints are
/// anchor positions, never wall-clock times.
#[derive(Debug, Clone, PartialEq, Eq, AsnType, Encode, Decode, Serialize, Deserialize, Getters, MutGetters)]
#[getset(get = "pub", get_mut = "pub(crate)")]
pub struct KeyRecord {
    /// The key's ID (hash of the public key)
    #[rasn(tag(explicit(0)))]
    key_id: KeyID,
    /// The public key itself
    #[rasn(tag(explicit(1)))]
    key: SignKeypairPublic,
    /// Anchor of the event that added this key. The key is valid from this
    /// position on.
    #[rasn(tag(explicit(2)))]
    valid_from: AnchorPosition,
    /// Anchor of the event that revoked this key, if any. Set exactly once,
    /// by a revocation, and never cleared.
    #[rasn(tag(explicit(3)))]
    valid_until: Option<AnchorPosition>,
}

impl KeyRecord {
    /// Create a new open-ended key record starting at the given anchor.
    pub(crate) fn new(key_id: KeyID, key: SignKeypairPublic, valid_from: AnchorPosition) -> Self {
        Self {
            key_id,
            key,
            valid_from,
            valid_until: None,
        }
    }

    /// Is this key in the identity's authoritative key set at position `pos`?
    /// True when `valid_from <= pos` and the validity window is still open at
    /// `pos` (revocation at `pos` itself excludes the key: a signature
    /// anchored at the revocation position is already too late).
    pub fn valid_at(&self, pos: &AnchorPosition) -> bool {
        &self.valid_from <= pos && self.valid_until.as_ref().map_or(true, |end| end > pos)
    }

    /// Has this key been revoked (at any position)?
    pub fn revoked(&self) -> bool {
        self.valid_until.is_some()
    }
}

/// An identity's stable handle: the commitment of its genesis event. The key
/// state evolves; this identifier never does.
#[derive(Debug, Clone, PartialEq, Eq, AsnType, Encode, Decode, Serialize, Deserialize)]
#[rasn(delegate)]
pub struct IdentityID(Commitment);

impl IdentityID {
    /// Derive a short human-readable fingerprint for this identity.
    pub fn fingerprint(&self) -> Fingerprint {
        let bytes = self.0.as_bytes();
        let mut arr = [0u8; 16];
        arr.copy_from_slice(&bytes[0..16]);
        Fingerprint(Binary::new(arr))
    }
}

impl From<Commitment> for IdentityID {
    fn from(commitment: Commitment) -> Self {
        Self(commitment)
    }
}

impl Deref for IdentityID {
    type Target = Commitment;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl std::hash::Hash for IdentityID {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.as_bytes().hash(state);
    }
}

impl std::fmt::Display for IdentityID {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.deref())
    }
}

impl TryFrom<&str> for IdentityID {
    type Error = Error;
    fn try_from(string: &str) -> std::result::Result<Self, Self::Error> {
        Ok(Self(Commitment::try_from(string)?))
    }
}

/// A short identifier for an identity, fit for humans to eyeball and compare:
/// the leading bytes of the genesis commitment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint(Binary<16>);

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", ser::base64_encode(self.0.deref()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{Layer1, TxId};
    use crate::crypto::sign::SignKeypair;
    use rand::rngs::OsRng;

    fn outputref(fill: u8) -> OutputRef {
        OutputRef::new(Layer1::Bitcoin, TxId::from_bytes([fill; 32]), 0)
    }

    fn pubkey() -> SignKeypairPublic {
        SignKeypair::new_ed25519(&mut OsRng).public()
    }

    #[test]
    fn genesis_well_formed() {
        let event = KeyEvent::genesis(vec![pubkey()], outputref(1), Timestamp::now());
        event.verify_well_formed().unwrap();
    }

    #[test]
    fn genesis_rejects_empty_keys() {
        let event = KeyEvent::genesis(vec![], outputref(1), Timestamp::now());
        assert_eq!(event.verify_well_formed(), Err(Error::CodecMalformedPayload));
    }

    #[test]
    fn genesis_rejects_prior() {
        let mut event = KeyEvent::genesis(vec![pubkey()], outputref(1), Timestamp::now());
        let fake_prior = KeyEvent::genesis(vec![pubkey()], outputref(2), Timestamp::now())
            .commit()
            .unwrap();
        *event.prior_mut() = Some(fake_prior);
        assert_eq!(event.verify_well_formed(), Err(Error::CodecMalformedPayload));
    }

    #[test]
    fn rekey_requires_linkage() {
        let genesis = KeyEvent::genesis(vec![pubkey()], outputref(1), Timestamp::now());
        let prior = genesis.commit().unwrap();
        let event = KeyEvent::rekey(prior, outputref(1), outputref(2), vec![pubkey()], Timestamp::now());
        event.verify_well_formed().unwrap();

        let mut broken = event.clone();
        *broken.closes_mut() = None;
        assert_eq!(broken.verify_well_formed(), Err(Error::CodecMalformedPayload));
    }

    #[test]
    fn revoke_allows_terminal() {
        let genesis = KeyEvent::genesis(vec![pubkey()], outputref(1), Timestamp::now());
        let prior = genesis.commit().unwrap();
        let key_id = pubkey().key_id().unwrap();
        let event = KeyEvent::revoke(prior, outputref(1), None, vec![key_id], Timestamp::now());
        event.verify_well_formed().unwrap();
    }

    #[test]
    fn key_record_validity_window() {
        let key = pubkey();
        let mut record = KeyRecord::new(key.key_id().unwrap(), key, AnchorPosition::new(100, 2, 0));
        assert!(!record.valid_at(&AnchorPosition::new(99, 0, 0)));
        assert!(record.valid_at(&AnchorPosition::new(100, 2, 0)));
        assert!(record.valid_at(&AnchorPosition::new(150, 0, 0)));
        assert!(!record.revoked());

        *record.valid_until_mut() = Some(AnchorPosition::new(200, 1, 0));
        assert!(record.valid_at(&AnchorPosition::new(190, 0, 0)));
        assert!(!record.valid_at(&AnchorPosition::new(200, 1, 0)));
        assert!(!record.valid_at(&AnchorPosition::new(205, 0, 0)));
        assert!(record.revoked());
    }

    #[test]
    fn identity_id_fingerprint_display() {
        let event = KeyEvent::genesis(vec![pubkey()], outputref(1), Timestamp::now());
        let id = IdentityID::from(event.commit().unwrap());
        let fp = format!("{}", id.fingerprint());
        assert!(!fp.is_empty());
        // fingerprint is a prefix of the full id's bytes, so two calls agree
        assert_eq!(fp, format!("{}", id.fingerprint()));
    }

    #[test]
    fn identity_id_string_round_trip() {
        let event = KeyEvent::genesis(vec![pubkey()], outputref(1), Timestamp::now());
        let id = IdentityID::from(event.commit().unwrap());
        let string = format!("{}", id);
        let id2 = IdentityID::try_from(string.as_str()).unwrap();
        assert_eq!(id, id2);
    }
}
