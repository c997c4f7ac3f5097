//! The main error enum for the project lives here, and documents the various
//! conditions that can arise while interacting with the system.

use thiserror::Error;

/// This is our error enum. It contains an entry for any part of the system in
/// which an expectation is not met or a problem occurs.
#[derive(Error, Debug)]
pub enum Error {
    /// A byte slice was the wrong length for the thing it was being turned
    /// into.
    #[error("bad byte length")]
    BadLength,

    /// The chain observer reported a transaction as dropped from the chain,
    /// generally after a reorganization. Any state derived from this witness
    /// must be thrown out, and the seal closed again with a fresh transaction.
    /// Never retried automatically.
    #[error("closing witness was orphaned by the chain")]
    ChainOrphaned,

    /// A transient failure talking to the chain observer (timeout, connection
    /// loss, etc). Retryable with caller-controlled backoff.
    #[error("chain observer failure: {0}")]
    ChainObserverIo(String),

    /// An event's prior-event commitment does not match the current tip of the
    /// identity's chain. This signals either an attempted fork or a missing
    /// intermediate event that must be fetched before retrying. We never guess
    /// which.
    #[error("event is out of order with the identity's chain")]
    ChainOutOfOrder,

    /// We polled for a confirmation and ran out of attempts. The caller may
    /// re-poll later; polling has no side effects.
    #[error("timed out waiting for chain confirmation")]
    ChainPendingTimeout,

    /// The chain observer has no record of the requested transaction.
    #[error("transaction not found on chain")]
    ChainTxNotFound,

    /// An off-chain payload does not hash to the on-chain commitment it claims
    /// to back. Reject, do not attempt repair.
    #[error("payload does not match its on-chain commitment")]
    CodecDigestMismatch,

    /// The payload failed structural decoding.
    #[error("malformed event payload")]
    CodecMalformedPayload,

    /// Tried to hash/encode with mismatched algorithms.
    #[error("cryptographic algorithm mismatch")]
    CryptoAlgoMismatch,

    /// Bad key.
    #[error("key is invalid")]
    CryptoBadKey,

    /// A key is missing from a crypto operation (eg signing with a keypair
    /// that only holds the public half).
    #[error("crypto key missing")]
    CryptoKeyMissing,

    /// A signature failed to verify.
    #[error("the given signature/public key/data combo does not verify")]
    CryptoSignatureVerificationFailed,

    /// An error while decoding from the canonical binary format.
    #[error("ASN.1 decoding error: {0}")]
    DecodeAsn(String),

    /// An error while engaging in base64 decoding.
    #[error("base64 decoding error")]
    DecodeBase64(#[from] base64::DecodeError),

    /// An error while encoding to the canonical binary format.
    #[error("ASN.1 encoding error: {0}")]
    EncodeAsn(String),

    /// The seal has already been closed. Closing is once-only and
    /// irreversible.
    #[error("seal has already been closed")]
    SealAlreadyClosed,

    /// The output backing this seal already backs another seal tracked by this
    /// engine. No two logical seals may share an output.
    #[error("an open or closed seal already exists for this output")]
    SealAlreadyDefined,

    /// Tried to close (or look up) a seal this engine never defined.
    #[error("seal is not defined")]
    SealNotDefined,

    /// A seal output string couldn't be parsed.
    #[error("malformed seal reference: {0}")]
    SealParse(String),

    /// The transaction submitter refused our spending transaction.
    #[error("spending transaction rejected by submitter: {0}")]
    SealSubmitRejected(String),

    /// An event tried to close a different output than the seal its
    /// predecessor defined.
    #[error("event closes the wrong seal for this chain")]
    SealWrongOutput,

    /// An error while engaging in yaml serialization.
    #[error("yaml serialization error")]
    SerializeYaml(#[from] serde_yaml::Error),

    /// The identity is fully revoked. Revocation is terminal; no further
    /// events are accepted.
    #[error("identity is fully revoked")]
    StateFullyRevoked,

    /// Tried to revoke a key that was already revoked. Revocation is final.
    #[error("key is already revoked")]
    StateKeyAlreadyRevoked,

    /// Tried to add a key the identity already holds (open or revoked).
    /// Re-adding a revoked key would silently undo its revocation.
    #[error("identity already holds this key")]
    StateKeyExists,

    /// A key referenced by an event wasn't found in the identity's key set.
    #[error("key not found in identity")]
    StateKeyNotFound,

    /// The identity exists but none of its events have confirmed to the
    /// required finality depth, so there is no authoritative state to report
    /// yet.
    #[error("identity has no anchored events yet")]
    StateNotAnchored,

    /// A stored record was missing or truncated.
    #[error("stored record missing or corrupt")]
    StoreCorrupt,

    /// An error raised by the backing key-value store.
    #[error("storage error: {0}")]
    StoreIo(String),

    /// A timestamp value fell outside the representable range.
    #[error("timestamp out of range")]
    TimestampOutOfRange,

    /// The signature bytes do not verify against the payload digest and the
    /// claimed key.
    #[error("signature does not verify cryptographically")]
    VerifyCryptoMismatch,

    /// The signing key's validity starts after the signature's claimed anchor.
    #[error("signing key was not yet valid at the claimed anchor")]
    VerifyKeyNotYetValid,

    /// The signing key was revoked at or before the signature's claimed
    /// anchor. Signatures anchored strictly before the revocation remain
    /// valid.
    #[error("signing key was revoked at the claimed anchor")]
    VerifyKeyRevoked,

    /// The identity the signature claims is unknown to us.
    #[error("unknown identity")]
    VerifyUnknownIdentity,

    /// The claimed signing key does not appear anywhere in the identity's
    /// history.
    #[error("unknown signing key for this identity")]
    VerifyUnknownKey,
}

impl PartialEq for Error {
    fn eq(&self, other: &Self) -> bool {
        // some of our wrapped error types are not eq-able, so we compare debug
        // representations instead.
        format!("{:?}", self) == format!("{:?}", other)
    }
}

/// Wraps `std::result::Result` around our `Error` enum
pub type Result<T> = std::result::Result<T, Error>;
