//! The single-use seal engine.
//!
//! A seal binds a commitment slot to a specific unspent chain output. While
//! the output is unspent, the seal is open; spending the output while
//! embedding a commitment closes the seal, exactly once, forever. The chain's
//! own double-spend rule is what enforces "exactly once" — we observe it, we
//! don't re-implement it. What the engine adds on top is bookkeeping (which
//! outputs already back seals) and the close/verify choreography.
//!
//! Authority over an identity is exactly the capability to close its current
//! seal. There is no role system and no distinguished revocation key; if you
//! can spend the output, you speak for the identity.

use crate::{
    chain::{ClosingWitness, OutputRef, SpendTx, TransactionSubmitter},
    codec::Commitment,
    error::{Error, Result},
    util::ser::SerdeBinary,
};
use getset::Getters;
use rasn::{AsnType, Decode, Encode};
use serde_derive::{Deserialize, Serialize};
use std::collections::HashMap;

/// Where a seal is in its lifecycle. The only transition is Open → Closed,
/// taken exactly once.
#[derive(Debug, Clone, PartialEq, Eq, AsnType, Encode, Decode, Serialize, Deserialize)]
#[rasn(choice)]
pub enum SealStatus {
    /// The bound output is (as far as we know) unspent.
    #[rasn(tag(explicit(0)))]
    Open,
    /// The bound output was spent by the witnessed transaction.
    #[rasn(tag(explicit(1)))]
    Closed(ClosingWitness),
}

/// A single-use seal: a specific unspent chain output and what we know about
/// its fate.
#[derive(Debug, Clone, PartialEq, Eq, AsnType, Encode, Decode, Serialize, Deserialize, Getters)]
#[getset(get = "pub")]
pub struct Seal {
    /// The output this seal is bound to
    #[rasn(tag(explicit(0)))]
    output: OutputRef,
    /// Open or closed (with the closing witness)
    #[rasn(tag(explicit(1)))]
    status: SealStatus,
}

impl Seal {
    /// Define a new, open seal over the given output.
    pub(crate) fn new(output: OutputRef) -> Self {
        Self {
            output,
            status: SealStatus::Open,
        }
    }

    /// Is this seal still open?
    pub fn is_open(&self) -> bool {
        matches!(self.status, SealStatus::Open)
    }

    /// The closing witness, if this seal has been closed.
    pub fn witness(&self) -> Option<&ClosingWitness> {
        match &self.status {
            SealStatus::Open => None,
            SealStatus::Closed(witness) => Some(witness),
        }
    }
}

impl SerdeBinary for Seal {}

/// Tracks the lifecycle of every seal this process has defined, keyed by the
/// bound output. One output backs at most one logical seal, ever.
#[derive(Debug, Default)]
pub struct SealEngine {
    seals: HashMap<OutputRef, Seal>,
}

impl SealEngine {
    /// Create a new, empty seal engine.
    pub fn new() -> Self {
        Self::default()
    }

    /// Define a new seal bound to the given unspent output. Fails with
    /// [Error::SealAlreadyDefined] if that output already backs a seal we
    /// track, open or closed.
    pub fn define(&mut self, output: OutputRef) -> Result<()> {
        if self.seals.contains_key(&output) {
            Err(Error::SealAlreadyDefined)?;
        }
        log::debug!("seal: defined over output {}", output);
        self.seals.insert(output.clone(), Seal::new(output));
        Ok(())
    }

    /// Look up a tracked seal by its bound output.
    pub fn get(&self, output: &OutputRef) -> Option<&Seal> {
        self.seals.get(output)
    }

    /// Close a seal: build a spend of its bound output embedding
    /// `commitment`, hand it to the submitter, and record the witness. Blocks
    /// only until the submitter acknowledges acceptance into the unconfirmed
    /// pool; confirmation is the anchor resolver's separate, retryable
    /// business.
    ///
    /// A second close on the same seal fails with [Error::SealAlreadyClosed]
    /// and leaves the original witness untouched; closing a seal we never
    /// defined fails with [Error::SealNotDefined].
    pub fn close(
        &mut self,
        output: &OutputRef,
        commitment: &Commitment,
        submitter: &dyn TransactionSubmitter,
    ) -> Result<ClosingWitness> {
        let seal = self.seals.get(output).ok_or(Error::SealNotDefined)?;
        if !seal.is_open() {
            Err(Error::SealAlreadyClosed)?;
        }
        let tx = SpendTx::new(output.clone(), commitment.clone())?;
        submitter.submit(&tx)?;
        let witness = ClosingWitness::from(&tx);
        log::debug!("seal: closed {} via tx {}", output, witness.txid());
        // only mark closed after the submitter accepted; a rejected submit
        // leaves the seal open for another attempt
        let seal = self.seals.get_mut(output).ok_or(Error::SealNotDefined)?;
        seal.status = SealStatus::Closed(witness.clone());
        Ok(witness)
    }

    /// Re-open a closed seal after its closing transaction was orphaned in a
    /// reorganization. The original close never made it into chain history,
    /// so as far as the protocol is concerned it never happened. Reopening a
    /// seal that is already open is a no-op.
    pub(crate) fn reopen(&mut self, output: &OutputRef) -> Result<()> {
        let seal = self.seals.get_mut(output).ok_or(Error::SealNotDefined)?;
        if seal.is_open() {
            return Ok(());
        }
        log::warn!("seal: reopening {} after orphaned close", output);
        seal.status = SealStatus::Open;
        Ok(())
    }

    /// Restore an open seal when reloading an identity from storage.
    /// Idempotent, and never downgrades a closed seal back to open.
    pub(crate) fn restore_open(&mut self, output: OutputRef) {
        self.seals.entry(output.clone()).or_insert_with(|| Seal::new(output));
    }

    /// Restore a closed seal from its persisted witness when reloading an
    /// identity from storage.
    pub(crate) fn restore_closed(&mut self, witness: ClosingWitness) {
        let output = witness.closes().clone();
        let seal = Seal {
            output: output.clone(),
            status: SealStatus::Closed(witness),
        };
        self.seals.insert(output, seal);
    }

    /// Check a closing witness against expectations, without trusting whoever
    /// produced it: does it spend the given seal output, and does it embed
    /// the expected commitment? The witness itself should come from (or be
    /// checked against) the chain observer; this function checks the
    /// *meaning* of the spend, not its presence on chain.
    pub fn verify(witness: &ClosingWitness, seal_output: &OutputRef, expected: &Commitment) -> bool {
        witness.closes() == seal_output && witness.commitment().verify(expected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        chain::{Layer1, TxId},
        crypto::hash::Hash,
        util::test::MockChain,
    };

    fn outputref(fill: u8) -> OutputRef {
        OutputRef::new(Layer1::Bitcoin, TxId::from_bytes([fill; 32]), 0)
    }

    fn commitment(msg: &[u8]) -> Commitment {
        Commitment::from(Hash::new_blake3(msg))
    }

    #[test]
    fn define_rejects_duplicate_output() {
        let mut engine = SealEngine::new();
        engine.define(outputref(1)).unwrap();
        assert_eq!(engine.define(outputref(1)), Err(Error::SealAlreadyDefined));
        // a different vout on the same tx is a different output
        engine
            .define(OutputRef::new(Layer1::Bitcoin, TxId::from_bytes([1; 32]), 1))
            .unwrap();
    }

    #[test]
    fn close_embeds_commitment_and_spends_output() {
        let chain = MockChain::new();
        let output = outputref(1);
        chain.fund_output(&output);
        let mut engine = SealEngine::new();
        engine.define(output.clone()).unwrap();
        let com = commitment(b"first event");
        let witness = engine.close(&output, &com, &chain).unwrap();
        assert_eq!(witness.closes(), &output);
        assert_eq!(witness.commitment(), &com);
        assert!(SealEngine::verify(&witness, &output, &com));
        assert!(!engine.get(&output).unwrap().is_open());
    }

    #[test]
    fn double_close_fails_and_witness_is_stable() {
        let chain = MockChain::new();
        let output = outputref(1);
        chain.fund_output(&output);
        let mut engine = SealEngine::new();
        engine.define(output.clone()).unwrap();
        let witness = engine.close(&output, &commitment(b"one"), &chain).unwrap();
        // second close fails even with a different commitment
        assert_eq!(
            engine.close(&output, &commitment(b"two"), &chain),
            Err(Error::SealAlreadyClosed)
        );
        assert_eq!(engine.get(&output).unwrap().witness(), Some(&witness));
    }

    #[test]
    fn close_undefined_seal_fails() {
        let chain = MockChain::new();
        let mut engine = SealEngine::new();
        assert_eq!(
            engine.close(&outputref(9), &commitment(b"x"), &chain),
            Err(Error::SealNotDefined)
        );
    }

    #[test]
    fn rejected_submit_leaves_seal_open() {
        let chain = MockChain::new();
        let output = outputref(1);
        // no fund_output: the mock rejects spends of unknown outputs
        let mut engine = SealEngine::new();
        engine.define(output.clone()).unwrap();
        let res = engine.close(&output, &commitment(b"x"), &chain);
        assert!(matches!(res, Err(Error::SealSubmitRejected(_))));
        assert!(engine.get(&output).unwrap().is_open());
    }

    #[test]
    fn verify_rejects_wrong_output_or_commitment() {
        let chain = MockChain::new();
        let output = outputref(1);
        chain.fund_output(&output);
        let mut engine = SealEngine::new();
        engine.define(output.clone()).unwrap();
        let com = commitment(b"the real deal");
        let witness = engine.close(&output, &com, &chain).unwrap();
        assert!(!SealEngine::verify(&witness, &outputref(2), &com));
        assert!(!SealEngine::verify(&witness, &output, &commitment(b"imposter")));
    }

    #[test]
    fn reopen_requires_definition_and_is_idempotent() {
        let chain = MockChain::new();
        let output = outputref(1);
        chain.fund_output(&output);
        let mut engine = SealEngine::new();
        assert_eq!(engine.reopen(&output), Err(Error::SealNotDefined));
        engine.define(output.clone()).unwrap();
        // reopening an already-open seal changes nothing
        engine.reopen(&output).unwrap();
        assert!(engine.get(&output).unwrap().is_open());
        engine.close(&output, &commitment(b"x"), &chain).unwrap();
        engine.reopen(&output).unwrap();
        assert!(engine.get(&output).unwrap().is_open());
        engine.reopen(&output).unwrap();
        assert!(engine.get(&output).unwrap().is_open());
    }
}
