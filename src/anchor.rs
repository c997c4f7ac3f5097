//! The anchor resolver maps closing witnesses to their position in chain
//! history, and answers "how buried is this?" so callers can apply their own
//! finality policy.
//!
//! Resolution is deliberately side-effect free: polling an unconfirmed
//! transaction a hundred times costs nothing and changes nothing, which is
//! what makes caller-controlled retry safe. The two outcomes that are NOT
//! retryable — [Error::ChainOrphaned] and [Error::ChainTxNotFound] — are
//! protocol facts, not transient conditions, and we surface them untouched.

use crate::{
    chain::{ChainObserver, ClosingWitness, Resolution, TxId},
    error::{Error, Result},
};
use getset::Getters;
use std::sync::Arc;
use std::time::Duration;

/// How many confirmations a caller demands before treating an anchor as
/// settled. This is deployment policy, not protocol: a registry watching
/// high-value identities might want dozens, a test rig wants one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Getters)]
#[getset(get = "pub")]
pub struct FinalityPolicy {
    /// Minimum confirmation depth before an anchor counts as final.
    min_confirmations: u64,
}

impl FinalityPolicy {
    /// Create a policy with the given minimum depth.
    pub fn new(min_confirmations: u64) -> Self {
        Self { min_confirmations }
    }

    /// Does the given resolution satisfy this policy?
    pub fn is_final(&self, resolution: &Resolution) -> bool {
        match resolution {
            Resolution::Confirmed { confirmations, .. } => *confirmations >= self.min_confirmations,
            Resolution::Pending => false,
        }
    }
}

impl Default for FinalityPolicy {
    fn default() -> Self {
        Self { min_confirmations: 6 }
    }
}

/// Wraps the chain observer and resolves witnesses to anchor positions.
#[derive(Clone)]
pub struct AnchorResolver {
    observer: Arc<dyn ChainObserver>,
}

impl AnchorResolver {
    /// Create a resolver over the given observer.
    pub fn new(observer: Arc<dyn ChainObserver>) -> Self {
        Self { observer }
    }

    /// Resolve a closing witness to its chain position (or `Pending`).
    pub fn resolve(&self, witness: &ClosingWitness) -> Result<Resolution> {
        self.resolve_txid(witness.txid())
    }

    /// Resolve a bare transaction ID to its chain position. Used for the
    /// genesis anchor, which is the position of the output that backs the
    /// genesis seal rather than any spend.
    pub fn resolve_txid(&self, txid: &TxId) -> Result<Resolution> {
        self.observer.resolve_position(txid)
    }

    /// Resolve, retrying transient observer failures up to `attempts` times
    /// with a fixed `backoff` between tries. Only [Error::ChainObserverIo] is
    /// retried; protocol outcomes (pending, orphaned, not found) pass
    /// through on the first answer.
    pub fn resolve_with_retry(&self, witness: &ClosingWitness, attempts: u32, backoff: Duration) -> Result<Resolution> {
        let mut tries = 0;
        loop {
            match self.resolve(witness) {
                Err(Error::ChainObserverIo(msg)) => {
                    tries += 1;
                    if tries >= attempts {
                        return Err(Error::ChainObserverIo(msg));
                    }
                    log::debug!("anchor: observer failure ({}), retry {}/{}", msg, tries, attempts);
                    std::thread::sleep(backoff);
                }
                other => return other,
            }
        }
    }

    /// Poll a witness until it confirms to at least the given policy's depth,
    /// or until `attempts` polls have returned `Pending`. Polling is
    /// idempotent; on [Error::ChainPendingTimeout] the caller may simply call
    /// again later.
    pub fn await_confirmation(
        &self,
        witness: &ClosingWitness,
        policy: &FinalityPolicy,
        attempts: u32,
        backoff: Duration,
    ) -> Result<Resolution> {
        let mut tries = 0;
        loop {
            let resolution = self.resolve(witness)?;
            if policy.is_final(&resolution) {
                return Ok(resolution);
            }
            tries += 1;
            if tries >= attempts {
                return Err(Error::ChainPendingTimeout);
            }
            std::thread::sleep(backoff);
        }
    }

    /// The chain's current tip height.
    pub fn current_height(&self) -> Result<u64> {
        self.observer.current_height()
    }
}
