//! The identity registry: the stateful front door that ties the codec, the
//! seal engine, the anchor resolver, and the key state machine together into
//! identity lifecycle operations.
//!
//! The registry owns the bookkeeping the pure layers refuse to: which events
//! belong to which identity, which seals are awaiting closure, which closures
//! are awaiting confirmation, and what to do when the chain reorganizes one
//! of them away. Everything it knows is persisted through an opaque
//! key-value store as canonical byte blobs, so a registry can be torn down
//! and rehydrated elsewhere and arrive at the same answers.
//!
//! Writes to a single identity are serialized behind that identity's lock;
//! reads hit a generation-stamped cache that any write (or orphan recovery)
//! invalidates wholesale. Cross-identity operations never block each other.

use crate::{
    anchor::{AnchorResolver, FinalityPolicy},
    chain::{
        AnchorPosition, ChainObserver, ClosingWitness, OutputRef, OutputStatus, Resolution,
        TransactionSubmitter,
    },
    codec::Commitment,
    crypto::sign::{KeyID, SignKeypairPublic},
    error::{Error, Result},
    event::{IdentityID, KeyEvent},
    seal::SealEngine,
    state::KeyState,
    store::KeyValueStore,
    util::{ser::SerdeBinary, Timestamp},
    verify::{self, AnchoredSignature},
};
use getset::Getters;
use rasn::{AsnType, Decode, Encode};
use serde_derive::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

/// One link of an identity's persisted chain: the event itself, the witness
/// of the seal closure that anchored it (absent for genesis, and cleared if
/// the closure was orphaned), and the confirmed anchor position once the
/// closure settled to the registry's finality depth.
#[derive(Debug, Clone, PartialEq, Eq, AsnType, Encode, Decode, Serialize, Deserialize, Getters)]
#[getset(get = "pub")]
pub struct LogEntry {
    /// The event
    #[rasn(tag(explicit(0)))]
    event: KeyEvent,
    /// The closing that put this event on chain
    #[rasn(tag(explicit(1)))]
    witness: Option<ClosingWitness>,
    /// Where the closing settled, once it did
    #[rasn(tag(explicit(2)))]
    anchor: Option<AnchorPosition>,
}

impl SerdeBinary for LogEntry {}

/// An identity's in-memory event log, with a commitment index for fork
/// detection and reanchor lookups.
#[derive(Debug)]
struct IdentityLog {
    entries: Vec<LogEntry>,
    index: HashMap<Commitment, usize>,
}

impl IdentityLog {
    fn from_entries(entries: Vec<LogEntry>) -> Result<Self> {
        let mut log = Self {
            entries: Vec::with_capacity(entries.len()),
            index: HashMap::new(),
        };
        for entry in entries {
            log.push(entry)?;
        }
        Ok(log)
    }

    fn push(&mut self, entry: LogEntry) -> Result<()> {
        let commitment = entry.event().commit()?;
        if self.index.contains_key(&commitment) {
            Err(Error::ChainOutOfOrder)?;
        }
        self.index.insert(commitment, self.entries.len());
        self.entries.push(entry);
        Ok(())
    }

    /// Replay the whole log, confirmed and pending alike, assigning
    /// optimistic successor positions to entries the chain hasn't settled
    /// yet. This is the view append-time validation runs against; the
    /// authoritative state only ever comes from confirmed anchors.
    fn provisional_state(&self) -> Result<KeyState> {
        let mut state: Option<KeyState> = None;
        let mut prev = AnchorPosition::new(0, 0, 0);
        for entry in &self.entries {
            let anchor = entry
                .anchor
                .unwrap_or_else(|| AnchorPosition::new(prev.height() + 1, 0, 0));
            state = Some(KeyState::apply(state, entry.event(), &anchor)?);
            prev = anchor;
        }
        state.ok_or(Error::VerifyUnknownIdentity)
    }
}

/// An identity as the registry currently sees it: the authoritative key
/// state computed over the confirmed-to-finality prefix of the chain, plus
/// the tail of events still waiting on confirmation. Pending events carry no
/// authority; they're reported so callers can tell "settled" from "in
/// flight".
#[derive(Debug, Clone, PartialEq, Getters)]
#[getset(get = "pub")]
pub struct ResolvedIdentity {
    /// State over the confirmed prefix
    state: KeyState,
    /// Events submitted but not yet confirmed to finality, in chain order
    pending: Vec<KeyEvent>,
}

enum EventKind {
    ReKey(Vec<SignKeypairPublic>, OutputRef),
    Revoke(Vec<KeyID>, Option<OutputRef>),
}

/// The registry itself. Cheap to share behind an `Arc`; all methods take
/// `&self`.
pub struct IdentityRegistry {
    observer: Arc<dyn ChainObserver>,
    submitter: Arc<dyn TransactionSubmitter>,
    store: Arc<dyn KeyValueStore>,
    resolver: AnchorResolver,
    policy: FinalityPolicy,
    seals: Mutex<SealEngine>,
    identities: RwLock<HashMap<IdentityID, Arc<Mutex<IdentityLog>>>>,
    cache: RwLock<HashMap<IdentityID, (u64, ResolvedIdentity)>>,
    /// Bumped on every write and every orphan recovery; cache entries
    /// stamped with an older generation are dead.
    generation: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    mutex.lock().map_err(|_| Error::StoreIo(String::from("poisoned lock")))
}

impl IdentityRegistry {
    /// Create a registry over the given chain collaborators and store.
    pub fn new(
        observer: Arc<dyn ChainObserver>,
        submitter: Arc<dyn TransactionSubmitter>,
        store: Arc<dyn KeyValueStore>,
        policy: FinalityPolicy,
    ) -> Self {
        let resolver = AnchorResolver::new(observer.clone());
        Self {
            observer,
            submitter,
            store,
            resolver,
            policy,
            seals: Mutex::new(SealEngine::new()),
            identities: RwLock::new(HashMap::new()),
            cache: RwLock::new(HashMap::new()),
            generation: AtomicU64::new(0),
        }
    }

    /// Create a new identity: a genesis event holding the initial key set,
    /// its first seal defined over `seal_output` (which must be an unspent
    /// output the caller controls). The identity's ID is the genesis
    /// commitment, stable forever after.
    pub fn create_identity(&self, keys: Vec<SignKeypairPublic>, seal_output: OutputRef) -> Result<IdentityID> {
        match self.observer.output_status(&seal_output)? {
            OutputStatus::Unspent => {}
            _ => Err(Error::SealWrongOutput)?,
        }
        let event = KeyEvent::genesis(keys, seal_output.clone(), Timestamp::now());
        let commitment = event.commit()?;
        let id = IdentityID::from(commitment);
        lock(&self.seals)?.define(seal_output.clone())?;
        // the genesis anchor is the position of the output backing its seal,
        // if the chain has already settled it
        let anchor = self.funding_anchor(&seal_output)?;
        let log = IdentityLog::from_entries(vec![LogEntry {
            event,
            witness: None,
            anchor,
        }])?;
        {
            let mut identities = self
                .identities
                .write()
                .map_err(|_| Error::StoreIo(String::from("poisoned lock")))?;
            if identities.contains_key(&id) {
                Err(Error::SealAlreadyDefined)?;
            }
            let log = Arc::new(Mutex::new(log));
            self.persist(&id, &*lock(&log)?)?;
            identities.insert(id.clone(), log);
        }
        self.bump();
        log::info!("registry: created identity {} (seal {})", id.fingerprint(), seal_output);
        Ok(id)
    }

    /// Extend an identity with new keys. Closes the chain's current seal
    /// with the event's commitment and defines `next_seal` for the
    /// successor. Returns the appended event's commitment.
    pub fn rekey(&self, id: &IdentityID, keys: Vec<SignKeypairPublic>, next_seal: OutputRef) -> Result<Commitment> {
        self.append(id, EventKind::ReKey(keys, next_seal))
    }

    /// Revoke keys by ID. Passing `None` for `next_seal` makes this the
    /// identity's terminal event: valid only when it revokes the last open
    /// keys. Returns the appended event's commitment.
    pub fn revoke_keys(
        &self,
        id: &IdentityID,
        key_ids: Vec<KeyID>,
        next_seal: Option<OutputRef>,
    ) -> Result<Commitment> {
        self.append(id, EventKind::Revoke(key_ids, next_seal))
    }

    /// Resolve an identity to its current view: authoritative state over the
    /// confirmed prefix, pending tail alongside. Pure over stored anchors;
    /// call [IdentityRegistry::refresh] first to pull in fresh chain facts.
    pub fn resolve(&self, id: &IdentityID) -> Result<ResolvedIdentity> {
        let generation = self.generation.load(Ordering::Acquire);
        {
            let cache = self
                .cache
                .read()
                .map_err(|_| Error::StoreIo(String::from("poisoned lock")))?;
            if let Some((stamped, resolved)) = cache.get(id) {
                if *stamped == generation {
                    return Ok(resolved.clone());
                }
            }
        }
        let log_arc = self.log(id)?;
        let log = lock(&log_arc)?;
        let mut state: Option<KeyState> = None;
        let mut pending: Vec<KeyEvent> = Vec::new();
        for entry in &log.entries {
            match entry.anchor() {
                // once one event is unsettled, everything after it is too:
                // later anchors can't be trusted to order against a missing
                // predecessor
                Some(anchor) if pending.is_empty() => {
                    state = Some(KeyState::apply(state, entry.event(), anchor)?);
                }
                _ => pending.push(entry.event().clone()),
            }
        }
        let state = state.ok_or(Error::StateNotAnchored)?;
        let resolved = ResolvedIdentity { state, pending };
        let mut cache = self
            .cache
            .write()
            .map_err(|_| Error::StoreIo(String::from("poisoned lock")))?;
        cache.insert(id.clone(), (generation, resolved.clone()));
        Ok(resolved)
    }

    /// Ask the chain about every unsettled (and previously-settled) event of
    /// an identity, recording anchors that reached finality and recovering
    /// from orphaned closures.
    ///
    /// Orphan recovery: the orphaned event's witness and anchor are cleared,
    /// every later anchor is cleared too (ordering against a missing
    /// predecessor is meaningless), and the seal the event closed is
    /// reopened. The event itself stays in the log, awaiting
    /// [IdentityRegistry::reanchor].
    pub fn refresh(&self, id: &IdentityID) -> Result<()> {
        let log_arc = self.log(id)?;
        let mut log = lock(&log_arc)?;
        let mut changed = false;
        let mut orphaned_at: Option<usize> = None;
        for i in 0..log.entries.len() {
            let resolution = match log.entries[i].witness() {
                Some(witness) => self.resolver.resolve(witness),
                None if log.entries[i].event().prior().is_none() => {
                    let output = log.entries[i]
                        .event()
                        .next_seal()
                        .as_ref()
                        .ok_or(Error::SealNotDefined)?;
                    self.resolver.resolve_txid(output.txid())
                }
                // cleared by a previous orphan recovery; waiting on reanchor
                None => continue,
            };
            match resolution {
                Ok(resolution) if self.policy.is_final(&resolution) => {
                    if let Resolution::Confirmed { position, .. } = resolution {
                        if log.entries[i].anchor != Some(position) {
                            log.entries[i].anchor = Some(position);
                            changed = true;
                        }
                    }
                }
                // known but not settled deep enough yet; ask again later
                Ok(_) => {}
                Err(Error::ChainOrphaned) => {
                    orphaned_at = Some(i);
                    break;
                }
                Err(err) => return Err(err),
            }
        }
        if let Some(i) = orphaned_at {
            log::warn!(
                "registry: closure of event {} of identity {} was orphaned; awaiting reanchor",
                i,
                id.fingerprint()
            );
            log.entries[i].witness = None;
            log.entries[i].anchor = None;
            for entry in log.entries.iter_mut().skip(i + 1) {
                entry.anchor = None;
            }
            if let Some(output) = log.entries[i].event().closes().clone() {
                lock(&self.seals)?.reopen(&output)?;
            }
            changed = true;
        }
        if changed {
            self.persist(id, &log)?;
            self.bump();
        }
        Ok(())
    }

    /// Re-close the seal for an event whose original closing transaction was
    /// orphaned. The event and its commitment are unchanged; only the
    /// closing transaction is rebuilt and resubmitted.
    pub fn reanchor(&self, id: &IdentityID, commitment: &Commitment) -> Result<ClosingWitness> {
        let log_arc = self.log(id)?;
        let mut log = lock(&log_arc)?;
        let idx = log.index.get(commitment).copied().ok_or(Error::ChainOutOfOrder)?;
        if log.entries[idx].witness().is_some() {
            Err(Error::SealAlreadyClosed)?;
        }
        let closes = log.entries[idx]
            .event()
            .closes()
            .clone()
            .ok_or(Error::SealNotDefined)?;
        let witness = lock(&self.seals)?.close(&closes, commitment, self.submitter.as_ref())?;
        log.entries[idx].witness = Some(witness.clone());
        self.persist(id, &log)?;
        self.bump();
        log::info!("registry: reanchored event {} via tx {}", commitment, witness.txid());
        Ok(witness)
    }

    /// Verify an anchored signature against an identity's authoritative
    /// (confirmed) state. Pending events carry no authority and play no part
    /// here.
    pub fn verify_signature(&self, id: &IdentityID, signature: &AnchoredSignature) -> Result<()> {
        let resolved = self.resolve(id)?;
        verify::verify_signature(signature, resolved.state())
    }

    /// Load a persisted identity from the store into the registry,
    /// rebuilding its log and restoring its seals. The usual path for a
    /// registry picking up where a previous process left off.
    pub fn hydrate(&self, id: &IdentityID) -> Result<()> {
        let len_bytes = self
            .store
            .get(&format!("identity:{}:len", id))?
            .ok_or(Error::VerifyUnknownIdentity)?;
        let arr: [u8; 8] = len_bytes.as_slice().try_into().map_err(|_| Error::StoreCorrupt)?;
        let len = u64::from_be_bytes(arr);
        let mut entries = Vec::with_capacity(len as usize);
        for seq in 0..len {
            let blob = self
                .store
                .get(&format!("identity:{}:{}", id, seq))?
                .ok_or(Error::StoreCorrupt)?;
            entries.push(LogEntry::deserialize_binary(&blob)?);
        }
        let log = IdentityLog::from_entries(entries)?;
        {
            let mut seals = lock(&self.seals)?;
            for entry in &log.entries {
                match entry.witness() {
                    Some(witness) => seals.restore_closed(witness.clone()),
                    // a non-genesis entry with no witness had its closure
                    // orphaned; the seal it closes must come back open so
                    // reanchor can close it again
                    None => {
                        if let Some(output) = entry.event().closes() {
                            seals.restore_open(output.clone());
                        }
                    }
                }
            }
            if let Some(tip) = log.entries.last() {
                if let Some(next) = tip.event().next_seal() {
                    seals.restore_open(next.clone());
                }
            }
        }
        self.identities
            .write()
            .map_err(|_| Error::StoreIo(String::from("poisoned lock")))?
            .insert(id.clone(), Arc::new(Mutex::new(log)));
        self.bump();
        log::debug!("registry: hydrated identity {} ({} events)", id.fingerprint(), len);
        Ok(())
    }

    fn append(&self, id: &IdentityID, kind: EventKind) -> Result<Commitment> {
        let log_arc = self.log(id)?;
        let mut log = lock(&log_arc)?;
        let state = log.provisional_state()?;
        let closes = state.next_seal().clone().ok_or(Error::StateFullyRevoked)?;
        let event = match kind {
            EventKind::ReKey(keys, next_seal) => KeyEvent::rekey(
                state.last_event().clone(),
                closes.clone(),
                next_seal,
                keys,
                Timestamp::now(),
            ),
            EventKind::Revoke(key_ids, next_seal) => KeyEvent::revoke(
                state.last_event().clone(),
                closes.clone(),
                next_seal,
                key_ids,
                Timestamp::now(),
            ),
        };
        // dry-run the state transition before touching the chain; a doomed
        // event must not burn the seal
        let provisional = AnchorPosition::new(state.last_anchor().height() + 1, 0, 0);
        KeyState::apply(Some(state), &event, &provisional)?;
        if let Some(next) = event.next_seal() {
            match self.observer.output_status(next)? {
                OutputStatus::Unspent => {}
                _ => Err(Error::SealWrongOutput)?,
            }
        }
        let commitment = event.commit()?;
        {
            let mut seals = lock(&self.seals)?;
            if let Some(next) = event.next_seal() {
                if seals.get(next).is_some() {
                    Err(Error::SealAlreadyDefined)?;
                }
            }
            let witness = seals.close(&closes, &commitment, self.submitter.as_ref())?;
            if let Some(next) = event.next_seal() {
                seals.define(next.clone())?;
            }
            log.push(LogEntry {
                event,
                witness: Some(witness),
                anchor: None,
            })?;
        }
        self.persist(id, &log)?;
        self.bump();
        log::info!("registry: appended event {} to identity {}", commitment, id.fingerprint());
        Ok(commitment)
    }

    fn log(&self, id: &IdentityID) -> Result<Arc<Mutex<IdentityLog>>> {
        self.identities
            .read()
            .map_err(|_| Error::StoreIo(String::from("poisoned lock")))?
            .get(id)
            .cloned()
            .ok_or(Error::VerifyUnknownIdentity)
    }

    /// The chain position of the funding output backing a genesis seal, if
    /// it has settled to finality.
    fn funding_anchor(&self, output: &OutputRef) -> Result<Option<AnchorPosition>> {
        let resolution = self.resolver.resolve_txid(output.txid())?;
        if !self.policy.is_final(&resolution) {
            return Ok(None);
        }
        match resolution {
            Resolution::Confirmed { position, .. } => Ok(Some(position)),
            Resolution::Pending => Ok(None),
        }
    }

    fn persist(&self, id: &IdentityID, log: &IdentityLog) -> Result<()> {
        for (seq, entry) in log.entries.iter().enumerate() {
            let blob = entry.serialize_binary()?;
            self.store.put(&format!("identity:{}:{}", id, seq), &blob)?;
        }
        let len = log.entries.len() as u64;
        self.store.put(&format!("identity:{}:len", id), &len.to_be_bytes())?;
        Ok(())
    }

    fn bump(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
    }
}
