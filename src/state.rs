//! The key state machine: replaying an identity's event chain into its
//! authoritative key set.
//!
//! There is no snapshot format and no shortcut. The only way to know an
//! identity's keys is to start from genesis and apply every event in anchor
//! order, which is exactly what makes the state independently computable by
//! anyone with chain access. Caching the result is the registry's job;
//! computing it is ours.
//!
//! The chain is strictly linear: every event names its predecessor by
//! commitment, and an event whose `prior` doesn't match the current tip is
//! rejected as [Error::ChainOutOfOrder] whether it's an attempted fork or
//! just a gap in our knowledge. We never guess which.

use crate::{
    chain::{AnchorPosition, OutputRef},
    codec::Commitment,
    error::{Error, Result},
    event::{IdentityID, KeyEvent, KeyEventBody, KeyRecord},
};
use getset::Getters;
use rasn::{AsnType, Decode, Encode};
use serde_derive::{Deserialize, Serialize};

/// Where an identity is in its lifecycle. There is no `Uninitialized`
/// variant: an uninitialized identity is one with no state at all
/// (`Option<KeyState>::None`), and `Revoked` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsnType, Encode, Decode, Serialize, Deserialize)]
#[rasn(choice)]
pub enum IdentityStatus {
    /// All of the identity's keys are open.
    #[rasn(tag(explicit(0)))]
    Active,
    /// Some keys have been revoked, but at least one remains open.
    #[rasn(tag(explicit(1)))]
    PartiallyRevoked,
    /// Every key has been revoked. Terminal: no further events are accepted.
    #[rasn(tag(explicit(2)))]
    Revoked,
}

/// The computed state of an identity at a chain tip: its full key history
/// (revoked records stay, with their validity windows closed), the tip
/// event's commitment, and the seal the next event must close.
#[derive(Debug, Clone, PartialEq, Eq, AsnType, Encode, Decode, Serialize, Deserialize, Getters)]
#[getset(get = "pub")]
pub struct KeyState {
    /// The identity this state belongs to
    #[rasn(tag(explicit(0)))]
    id: IdentityID,
    /// Lifecycle status
    #[rasn(tag(explicit(1)))]
    status: IdentityStatus,
    /// Commitment of the last applied event (the chain tip)
    #[rasn(tag(explicit(2)))]
    last_event: Commitment,
    /// Anchor of the last applied event
    #[rasn(tag(explicit(3)))]
    last_anchor: AnchorPosition,
    /// The seal the next event must close, if the chain can still be extended
    #[rasn(tag(explicit(4)))]
    next_seal: Option<OutputRef>,
    /// Every key the identity has ever held, with validity windows
    #[rasn(tag(explicit(5)))]
    keys: Vec<KeyRecord>,
}

impl KeyState {
    /// Apply a key event to an identity's state, yielding the successor
    /// state. `None` is the uninitialized state and accepts only genesis.
    ///
    /// The anchor is the event's position in chain history: the position of
    /// the closing transaction, or for genesis the position of the output
    /// that backs its defined seal.
    pub fn apply(state: Option<KeyState>, event: &KeyEvent, anchor: &AnchorPosition) -> Result<KeyState> {
        event.verify_well_formed()?;
        let commitment = event.commit()?;
        match state {
            None => {
                let keys = match event.body() {
                    KeyEventBody::GenesisV1 { keys } => keys,
                    _ => Err(Error::ChainOutOfOrder)?,
                };
                let mut records: Vec<KeyRecord> = Vec::with_capacity(keys.len());
                for key in keys {
                    let key_id = key.key_id()?;
                    if records.iter().any(|r| r.key_id() == &key_id) {
                        Err(Error::StateKeyExists)?;
                    }
                    records.push(KeyRecord::new(key_id, key.clone(), *anchor));
                }
                Ok(KeyState {
                    id: IdentityID::from(commitment.clone()),
                    status: IdentityStatus::Active,
                    last_event: commitment,
                    last_anchor: *anchor,
                    next_seal: event.next_seal().clone(),
                    keys: records,
                })
            }
            Some(mut state) => {
                if matches!(state.status, IdentityStatus::Revoked) {
                    Err(Error::StateFullyRevoked)?;
                }
                if event.prior().as_ref() != Some(&state.last_event) {
                    Err(Error::ChainOutOfOrder)?;
                }
                if anchor <= &state.last_anchor {
                    Err(Error::ChainOutOfOrder)?;
                }
                let expected_seal = state.next_seal.as_ref().ok_or(Error::SealNotDefined)?;
                if event.closes().as_ref() != Some(expected_seal) {
                    Err(Error::SealWrongOutput)?;
                }
                match event.body() {
                    KeyEventBody::GenesisV1 { .. } => Err(Error::ChainOutOfOrder)?,
                    KeyEventBody::ReKeyV1 { keys } => {
                        for key in keys {
                            let key_id = key.key_id()?;
                            // a key id the identity has EVER held is off
                            // limits: re-adding a revoked key would undo its
                            // revocation
                            if state.keys.iter().any(|r| r.key_id() == &key_id) {
                                Err(Error::StateKeyExists)?;
                            }
                            state.keys.push(KeyRecord::new(key_id, key.clone(), *anchor));
                        }
                    }
                    KeyEventBody::RevokeV1 { key_ids } => {
                        for key_id in key_ids {
                            let record = state
                                .keys
                                .iter_mut()
                                .find(|r| r.key_id() == key_id)
                                .ok_or(Error::StateKeyNotFound)?;
                            if record.revoked() {
                                Err(Error::StateKeyAlreadyRevoked)?;
                            }
                            *record.valid_until_mut() = Some(*anchor);
                        }
                    }
                }
                state.status = if state.keys.iter().all(|r| r.revoked()) {
                    IdentityStatus::Revoked
                } else if state.keys.iter().any(|r| r.revoked()) {
                    IdentityStatus::PartiallyRevoked
                } else {
                    IdentityStatus::Active
                };
                state.last_event = commitment;
                state.last_anchor = *anchor;
                state.next_seal = event.next_seal().clone();
                Ok(state)
            }
        }
    }

    /// Replay a full event chain from genesis. The iterator must yield events
    /// in chain order, each with its anchor.
    pub fn replay<'a, I>(events: I) -> Result<KeyState>
    where
        I: IntoIterator<Item = (&'a KeyEvent, &'a AnchorPosition)>,
    {
        let mut state: Option<KeyState> = None;
        for (event, anchor) in events {
            state = Some(Self::apply(state, event, anchor)?);
        }
        state.ok_or(Error::ChainOutOfOrder)
    }

    /// The authoritative key set at position `pos`: every key whose validity
    /// window contains `pos`.
    pub fn keys_at(&self, pos: &AnchorPosition) -> Vec<&KeyRecord> {
        self.keys.iter().filter(|r| r.valid_at(pos)).collect()
    }

    /// The currently-open key set (as of the last applied event).
    pub fn current_keys(&self) -> Vec<&KeyRecord> {
        self.keys.iter().filter(|r| !r.revoked()).collect()
    }

    /// Find a key record (open or revoked) by ID.
    pub fn key_by_id(&self, key_id: &crate::crypto::sign::KeyID) -> Option<&KeyRecord> {
        self.keys.iter().find(|r| r.key_id() == key_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        chain::{Layer1, TxId},
        crypto::sign::{SignKeypair, SignKeypairPublic},
        util::Timestamp,
    };
    use rand::rngs::OsRng;

    fn outputref(fill: u8) -> OutputRef {
        OutputRef::new(Layer1::Bitcoin, TxId::from_bytes([fill; 32]), 0)
    }

    fn pubkey() -> SignKeypairPublic {
        SignKeypair::new_ed25519(&mut OsRng).public()
    }

    fn anchor(height: u64, tx_index: u32) -> AnchorPosition {
        AnchorPosition::new(height, tx_index, 0)
    }

    #[test]
    fn genesis_creates_active_identity() {
        let k1 = pubkey();
        let event = KeyEvent::genesis(vec![k1.clone()], outputref(1), Timestamp::now());
        let state = KeyState::apply(None, &event, &anchor(100, 2)).unwrap();
        assert_eq!(state.status(), &IdentityStatus::Active);
        assert_eq!(state.id(), &IdentityID::from(event.commit().unwrap()));
        assert_eq!(state.keys_at(&anchor(100, 2)).len(), 1);
        assert_eq!(state.keys_at(&anchor(99, 0)).len(), 0);
        assert_eq!(state.next_seal(), &Some(outputref(1)));
    }

    #[test]
    fn non_genesis_on_empty_state_rejected() {
        let gen = KeyEvent::genesis(vec![pubkey()], outputref(1), Timestamp::now());
        let rekey = KeyEvent::rekey(
            gen.commit().unwrap(),
            outputref(1),
            outputref(2),
            vec![pubkey()],
            Timestamp::now(),
        );
        assert_eq!(
            KeyState::apply(None, &rekey, &anchor(150, 0)),
            Err(Error::ChainOutOfOrder)
        );
    }

    #[test]
    fn genesis_on_existing_state_rejected() {
        let gen = KeyEvent::genesis(vec![pubkey()], outputref(1), Timestamp::now());
        let state = KeyState::apply(None, &gen, &anchor(100, 0)).unwrap();
        let gen2 = KeyEvent::genesis(vec![pubkey()], outputref(2), Timestamp::now());
        assert_eq!(
            KeyState::apply(Some(state), &gen2, &anchor(101, 0)),
            Err(Error::ChainOutOfOrder)
        );
    }

    #[test]
    fn rekey_extends_key_set() {
        let k1 = pubkey();
        let k2 = pubkey();
        let gen = KeyEvent::genesis(vec![k1.clone()], outputref(1), Timestamp::now());
        let state = KeyState::apply(None, &gen, &anchor(100, 2)).unwrap();
        let rekey = KeyEvent::rekey(
            gen.commit().unwrap(),
            outputref(1),
            outputref(2),
            vec![k2.clone()],
            Timestamp::now(),
        );
        let state = KeyState::apply(Some(state), &rekey, &anchor(150, 0)).unwrap();
        assert_eq!(state.status(), &IdentityStatus::Active);
        assert_eq!(state.keys_at(&anchor(160, 0)).len(), 2);
        // K2 wasn't valid before its anchor
        assert_eq!(state.keys_at(&anchor(120, 0)).len(), 1);
        assert_eq!(state.next_seal(), &Some(outputref(2)));
    }

    #[test]
    fn foreign_prior_commitment_rejected() {
        let gen = KeyEvent::genesis(vec![pubkey()], outputref(1), Timestamp::now());
        let state = KeyState::apply(None, &gen, &anchor(100, 2)).unwrap();
        let foreign_gen = KeyEvent::genesis(vec![pubkey()], outputref(9), Timestamp::now());
        let rekey = KeyEvent::rekey(
            foreign_gen.commit().unwrap(),
            outputref(1),
            outputref(2),
            vec![pubkey()],
            Timestamp::now(),
        );
        assert_eq!(
            KeyState::apply(Some(state), &rekey, &anchor(150, 0)),
            Err(Error::ChainOutOfOrder)
        );
    }

    #[test]
    fn anchors_must_strictly_advance() {
        let gen = KeyEvent::genesis(vec![pubkey()], outputref(1), Timestamp::now());
        let state = KeyState::apply(None, &gen, &anchor(100, 2)).unwrap();
        let rekey = KeyEvent::rekey(
            gen.commit().unwrap(),
            outputref(1),
            outputref(2),
            vec![pubkey()],
            Timestamp::now(),
        );
        assert_eq!(
            KeyState::apply(Some(state), &rekey, &anchor(100, 2)),
            Err(Error::ChainOutOfOrder)
        );
    }

    #[test]
    fn event_must_close_the_defined_seal() {
        let gen = KeyEvent::genesis(vec![pubkey()], outputref(1), Timestamp::now());
        let state = KeyState::apply(None, &gen, &anchor(100, 2)).unwrap();
        let rekey = KeyEvent::rekey(
            gen.commit().unwrap(),
            outputref(8), // not the seal genesis defined
            outputref(2),
            vec![pubkey()],
            Timestamp::now(),
        );
        assert_eq!(
            KeyState::apply(Some(state), &rekey, &anchor(150, 0)),
            Err(Error::SealWrongOutput)
        );
    }

    #[test]
    fn revoke_closes_validity_and_partial_status() {
        let k1 = pubkey();
        let k2 = pubkey();
        let gen = KeyEvent::genesis(vec![k1.clone(), k2.clone()], outputref(1), Timestamp::now());
        let state = KeyState::apply(None, &gen, &anchor(100, 2)).unwrap();
        let revoke = KeyEvent::revoke(
            gen.commit().unwrap(),
            outputref(1),
            Some(outputref(2)),
            vec![k1.key_id().unwrap()],
            Timestamp::now(),
        );
        let state = KeyState::apply(Some(state), &revoke, &anchor(200, 1)).unwrap();
        assert_eq!(state.status(), &IdentityStatus::PartiallyRevoked);
        // K1 valid strictly before the revocation anchor, not at or after
        assert!(state.key_by_id(&k1.key_id().unwrap()).unwrap().valid_at(&anchor(190, 0)));
        assert!(!state.key_by_id(&k1.key_id().unwrap()).unwrap().valid_at(&anchor(200, 1)));
        assert_eq!(state.keys_at(&anchor(205, 0)).len(), 1);
    }

    #[test]
    fn full_revocation_is_terminal() {
        let k1 = pubkey();
        let gen = KeyEvent::genesis(vec![k1.clone()], outputref(1), Timestamp::now());
        let state = KeyState::apply(None, &gen, &anchor(100, 0)).unwrap();
        let revoke = KeyEvent::revoke(
            gen.commit().unwrap(),
            outputref(1),
            None,
            vec![k1.key_id().unwrap()],
            Timestamp::now(),
        );
        let state = KeyState::apply(Some(state), &revoke, &anchor(200, 0)).unwrap();
        assert_eq!(state.status(), &IdentityStatus::Revoked);
        assert!(state.current_keys().is_empty());

        // nothing gets in after a full revocation
        let rekey = KeyEvent::rekey(
            revoke.commit().unwrap(),
            outputref(2),
            outputref(3),
            vec![pubkey()],
            Timestamp::now(),
        );
        assert_eq!(
            KeyState::apply(Some(state), &rekey, &anchor(300, 0)),
            Err(Error::StateFullyRevoked)
        );
    }

    #[test]
    fn revoked_key_cannot_be_readded() {
        let k1 = pubkey();
        let k2 = pubkey();
        let gen = KeyEvent::genesis(vec![k1.clone(), k2.clone()], outputref(1), Timestamp::now());
        let state = KeyState::apply(None, &gen, &anchor(100, 0)).unwrap();
        let revoke = KeyEvent::revoke(
            gen.commit().unwrap(),
            outputref(1),
            Some(outputref(2)),
            vec![k1.key_id().unwrap()],
            Timestamp::now(),
        );
        let state = KeyState::apply(Some(state), &revoke, &anchor(200, 0)).unwrap();
        let readd = KeyEvent::rekey(
            revoke.commit().unwrap(),
            outputref(2),
            outputref(3),
            vec![k1.clone()],
            Timestamp::now(),
        );
        assert_eq!(
            KeyState::apply(Some(state), &readd, &anchor(300, 0)),
            Err(Error::StateKeyExists)
        );
    }

    #[test]
    fn double_revoke_rejected() {
        let k1 = pubkey();
        let k2 = pubkey();
        let gen = KeyEvent::genesis(vec![k1.clone(), k2.clone()], outputref(1), Timestamp::now());
        let state = KeyState::apply(None, &gen, &anchor(100, 0)).unwrap();
        let revoke = KeyEvent::revoke(
            gen.commit().unwrap(),
            outputref(1),
            Some(outputref(2)),
            vec![k1.key_id().unwrap()],
            Timestamp::now(),
        );
        let state = KeyState::apply(Some(state), &revoke, &anchor(200, 0)).unwrap();
        let again = KeyEvent::revoke(
            revoke.commit().unwrap(),
            outputref(2),
            Some(outputref(3)),
            vec![k1.key_id().unwrap()],
            Timestamp::now(),
        );
        assert_eq!(
            KeyState::apply(Some(state), &again, &anchor(300, 0)),
            Err(Error::StateKeyAlreadyRevoked)
        );
    }

    #[test]
    fn replay_matches_incremental_application() {
        let k1 = pubkey();
        let k2 = pubkey();
        let gen = KeyEvent::genesis(vec![k1.clone()], outputref(1), Timestamp::now());
        let rekey = KeyEvent::rekey(
            gen.commit().unwrap(),
            outputref(1),
            outputref(2),
            vec![k2.clone()],
            Timestamp::now(),
        );
        let revoke = KeyEvent::revoke(
            rekey.commit().unwrap(),
            outputref(2),
            Some(outputref(3)),
            vec![k1.key_id().unwrap()],
            Timestamp::now(),
        );
        let anchors = [anchor(100, 2), anchor(150, 0), anchor(200, 1)];
        let events = [&gen, &rekey, &revoke];
        let replayed = KeyState::replay(events.iter().copied().zip(anchors.iter())).unwrap();

        let mut incremental: Option<KeyState> = None;
        for (event, pos) in events.iter().zip(anchors.iter()) {
            incremental = Some(KeyState::apply(incremental, event, pos).unwrap());
        }
        assert_eq!(replayed, incremental.unwrap());
        assert_eq!(replayed.status(), &IdentityStatus::PartiallyRevoked);
    }
}
