//! Types and interfaces for talking about the backing chain.
//!
//! The protocol never talks to a blockchain directly. It consumes two
//! collaborator interfaces: a read-only [ChainObserver] for asking about
//! outputs and confirmations, and an opaque [TransactionSubmitter] for
//! handing off spending transactions. Everything else in this module is the
//! vocabulary those interfaces speak: output references, anchor positions,
//! and closing witnesses.
//!
//! As far as this library is concerned the chain is a black-box ordered
//! append-only ledger of spendable outputs. We observe its double-spend rule,
//! we do not re-implement it.

use crate::{
    codec::Commitment,
    error::{Error, Result},
    util::ser::{self, Binary, SerdeBinary},
};
use getset::Getters;
use rasn::{AsnType, Decode, Encode};
use serde_derive::{Deserialize, Serialize};
use std::ops::Deref;
use std::str::FromStr;

/// Which layer-1 ledger an output lives on. Seals on different deployments
/// must never collide, so the chain tag is part of the output reference and
/// therefore part of every commitment that mentions it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, AsnType, Encode, Decode, Serialize, Deserialize)]
#[rasn(choice)]
pub enum Layer1 {
    #[rasn(tag(explicit(0)))]
    Bitcoin,
    #[rasn(tag(explicit(1)))]
    Liquid,
}

impl std::fmt::Display for Layer1 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bitcoin => write!(f, "bitcoin"),
            Self::Liquid => write!(f, "liquid"),
        }
    }
}

/// A chain transaction ID.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, AsnType, Encode, Decode, Serialize, Deserialize)]
#[rasn(delegate)]
pub struct TxId(Binary<32>);

impl TxId {
    /// Create a transaction ID from raw bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(Binary::new(bytes))
    }

    /// The raw bytes of this transaction ID.
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_ref()
    }
}

impl std::hash::Hash for TxId {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.deref().hash(state);
    }
}

impl std::fmt::Display for TxId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", ser::base64_encode(self.0.deref()))
    }
}

impl TryFrom<&str> for TxId {
    type Error = Error;
    fn try_from(string: &str) -> std::result::Result<Self, Self::Error> {
        let vec = ser::base64_decode(string)?;
        let arr: [u8; 32] = vec.as_slice().try_into().map_err(|_| Error::BadLength)?;
        Ok(Self(Binary::new(arr)))
    }
}

/// Points at a single spendable output on the backing chain. This is what a
/// seal binds to.
///
/// Displays as `<chain>:<txid>:<vout>` and parses the same, with the chain
/// prefix defaulting to bitcoin when omitted.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, AsnType, Encode, Decode, Serialize, Deserialize, Getters)]
#[getset(get = "pub")]
pub struct OutputRef {
    /// The ledger this output lives on
    #[rasn(tag(explicit(0)))]
    chain: Layer1,
    /// The transaction that created the output
    #[rasn(tag(explicit(1)))]
    txid: TxId,
    /// The output's index within that transaction
    #[rasn(tag(explicit(2)))]
    vout: u32,
}

impl OutputRef {
    /// Create a new output reference.
    pub fn new(chain: Layer1, txid: TxId, vout: u32) -> Self {
        Self { chain, txid, vout }
    }
}

impl std::fmt::Display for OutputRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.chain, self.txid, self.vout)
    }
}

impl FromStr for OutputRef {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (chain, rest) = if let Some(rest) = s.strip_prefix("bitcoin:") {
            (Layer1::Bitcoin, rest)
        } else if let Some(rest) = s.strip_prefix("liquid:") {
            (Layer1::Liquid, rest)
        } else {
            (Layer1::Bitcoin, s)
        };
        let (txid_str, vout_str) = rest
            .rsplit_once(':')
            .ok_or_else(|| Error::SealParse(String::from(s)))?;
        let txid = TxId::try_from(txid_str).map_err(|_| Error::SealParse(String::from(s)))?;
        let vout = vout_str
            .parse::<u32>()
            .map_err(|_| Error::SealParse(String::from(s)))?;
        Ok(Self::new(chain, txid, vout))
    }
}

/// The ledger-ordering coordinate at which a transaction (and therefore a
/// seal closure) became part of chain history. This is the protocol's notion
/// of a trusted timestamp.
///
/// Positions order by `(height, tx_index)`; the output index disambiguates
/// multiple outputs within a transaction but never changes relative order
/// between distinct transactions. Confirmation depth is deliberately NOT part
/// of a position: depth changes with every block, positions don't. Depth is
/// reported alongside the position in [Resolution::Confirmed].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, AsnType, Encode, Decode, Serialize, Deserialize, Getters)]
#[getset(get = "pub")]
pub struct AnchorPosition {
    /// Block height
    #[rasn(tag(explicit(0)))]
    height: u64,
    /// Index of the transaction within its block
    #[rasn(tag(explicit(1)))]
    tx_index: u32,
    /// Index of the output within its transaction
    #[rasn(tag(explicit(2)))]
    output_index: u32,
}

impl AnchorPosition {
    /// Create a new anchor position.
    pub fn new(height: u64, tx_index: u32, output_index: u32) -> Self {
        Self {
            height,
            tx_index,
            output_index,
        }
    }
}

impl std::fmt::Display for AnchorPosition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {}, {})", self.height, self.tx_index, self.output_index)
    }
}

/// The minimal shape of a seal-closing transaction: it spends exactly the
/// seal's bound output and embeds exactly one commitment. How the submitter
/// dresses this up into a real chain transaction (fees, change, output
/// scripts) is its own business; the contract is that the accepted
/// transaction spends `spends` and carries `commitment`, under this `txid`.
#[derive(Debug, Clone, PartialEq, Eq, AsnType, Encode, Decode, Serialize, Deserialize, Getters)]
#[getset(get = "pub")]
pub struct SpendTx {
    /// This transaction's ID
    #[rasn(tag(explicit(0)))]
    txid: TxId,
    /// The single output this transaction spends
    #[rasn(tag(explicit(1)))]
    spends: OutputRef,
    /// The commitment embedded in the spend
    #[rasn(tag(explicit(2)))]
    commitment: Commitment,
}

impl SpendTx {
    /// Build a spending transaction for the given output, embedding the given
    /// commitment. The transaction ID is derived from the canonical encoding
    /// of the spend, so rebuilding the same spend yields the same ID.
    pub fn new(spends: OutputRef, commitment: Commitment) -> Result<Self> {
        let preimage = SpendTxPreimage {
            spends: spends.clone(),
            commitment: commitment.clone(),
        };
        let enc = ser::serialize(&preimage)?;
        let digest = blake3::hash(&enc[..]);
        Ok(Self {
            txid: TxId::from_bytes(*digest.as_bytes()),
            spends,
            commitment,
        })
    }
}

#[derive(AsnType, Encode, Decode)]
struct SpendTxPreimage {
    #[rasn(tag(explicit(0)))]
    spends: OutputRef,
    #[rasn(tag(explicit(1)))]
    commitment: Commitment,
}

/// Proof that a seal was closed: a reference to the on-chain transaction that
/// spent the seal's output, along with the output it spent and the commitment
/// it carried. Anyone with chain access can check a witness against the chain
/// without trusting whoever handed it to them.
#[derive(Debug, Clone, PartialEq, Eq, AsnType, Encode, Decode, Serialize, Deserialize, Getters)]
#[getset(get = "pub")]
pub struct ClosingWitness {
    /// The transaction that performed the close
    #[rasn(tag(explicit(0)))]
    txid: TxId,
    /// The output it spent (the seal's bound output)
    #[rasn(tag(explicit(1)))]
    closes: OutputRef,
    /// The commitment embedded in the spend
    #[rasn(tag(explicit(2)))]
    commitment: Commitment,
}

impl ClosingWitness {
    /// Create a new closing witness.
    pub fn new(txid: TxId, closes: OutputRef, commitment: Commitment) -> Self {
        Self {
            txid,
            closes,
            commitment,
        }
    }
}

impl From<&SpendTx> for ClosingWitness {
    fn from(tx: &SpendTx) -> Self {
        Self::new(tx.txid().clone(), tx.spends().clone(), tx.commitment().clone())
    }
}

impl SerdeBinary for ClosingWitness {}

/// What the chain observer knows about an output.
#[derive(Debug, Clone, PartialEq)]
pub enum OutputStatus {
    /// The output exists and is unspent (a seal bound to it is open)
    Unspent,
    /// The output was spent by the given transaction (the seal is closed)
    Spent(ClosingWitness),
    /// The observer has no record of this output
    Unknown,
}

/// Where a transaction sits in chain history, as reported by the observer.
/// Orphaned transactions are reported as [Error::ChainOrphaned], not as a
/// variant here: an orphan is never a state to build on.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// The transaction is confirmed at the given position, currently buried
    /// under `confirmations` blocks. Whether that depth is "final" is the
    /// caller's policy, not ours.
    Confirmed {
        position: AnchorPosition,
        confirmations: u64,
    },
    /// The transaction is known but not yet confirmed into a block.
    Pending,
}

/// Read-only view onto the backing chain. Implementations wrap a chain node,
/// an indexer, an SPV client... we don't care, as long as the answers are
/// honest.
///
/// Transient failures (timeouts and the like) should surface as
/// [Error::ChainObserverIo]; callers retry those under their own backoff.
pub trait ChainObserver: Send + Sync {
    /// What does the chain say about this output?
    fn output_status(&self, output: &OutputRef) -> Result<OutputStatus>;

    /// Where is this transaction in chain history? Errors with
    /// [Error::ChainOrphaned] if the transaction was dropped in a
    /// reorganization, [Error::ChainTxNotFound] if the observer has never
    /// heard of it.
    fn resolve_position(&self, txid: &TxId) -> Result<Resolution>;

    /// The current chain tip height.
    fn current_height(&self) -> Result<u64>;
}

/// Hands a spending transaction off to the chain for broadcast. `submit`
/// returns once the transaction is accepted into the unconfirmed pool; it
/// never waits for confirmation. Rejections surface as
/// [Error::SealSubmitRejected].
pub trait TransactionSubmitter: Send + Sync {
    /// Submit a spending transaction for broadcast.
    fn submit(&self, tx: &SpendTx) -> Result<()>;
}
