//! Asymmetric signing keys, wrapped in algorithm-tagged enums so new
//! cryptographic suites can be added later without changing any interfaces.
//!
//! Key custody is the caller's problem (see the crate docs): we hold secret
//! halves in memory only long enough to sign, and zero them on drop. Nothing
//! here encrypts keys at rest.

use crate::{
    crypto::hash::Hash,
    error::{Error, Result},
    util::ser::{self, Binary, BinarySecret},
};
use rand::{CryptoRng, RngCore};
use rasn::{AsnType, Decode, Encode};
use serde_derive::{Deserialize, Serialize};
use std::ops::Deref;

/// A signature derived from a signing keypair.
#[derive(Debug, Clone, PartialEq, Eq, AsnType, Encode, Decode, Serialize, Deserialize)]
#[rasn(choice)]
pub enum SignKeypairSignature {
    #[rasn(tag(explicit(0)))]
    Ed25519(Binary<64>),
}

impl AsRef<[u8]> for SignKeypairSignature {
    fn as_ref(&self) -> &[u8] {
        match self {
            Self::Ed25519(sig) => sig.as_ref(),
        }
    }
}

/// The public half of a signing keypair. This is what gets embedded in key
/// events and published on the identity.
#[derive(Debug, Clone, PartialEq, Eq, AsnType, Encode, Decode, Serialize, Deserialize)]
#[rasn(choice)]
pub enum SignKeypairPublic {
    /// Ed25519 verification key
    #[rasn(tag(explicit(0)))]
    Ed25519(Binary<32>),
}

impl SignKeypairPublic {
    /// Verify a detached signature on a message.
    pub fn verify(&self, signature: &SignKeypairSignature, data: &[u8]) -> Result<()> {
        match (self, signature) {
            (Self::Ed25519(ref pubkey_bytes), SignKeypairSignature::Ed25519(ref sig_bytes)) => {
                let pubkey = ed25519_consensus::VerificationKey::try_from(*pubkey_bytes.deref())
                    .map_err(|_| Error::CryptoBadKey)?;
                let sig = ed25519_consensus::Signature::from(*sig_bytes.deref());
                pubkey
                    .verify(&sig, data)
                    .map_err(|_| Error::CryptoSignatureVerificationFailed)?;
                Ok(())
            }
        }
    }

    /// Derive this key's ID: the hash of the key's canonical encoding.
    pub fn key_id(&self) -> Result<KeyID> {
        let ser = ser::serialize(self)?;
        Ok(KeyID(Hash::new_blake3(&ser[..])))
    }
}

/// An asymmetric signing keypair.
#[derive(Debug)]
pub enum SignKeypair {
    /// Ed25519 signing keypair
    Ed25519 {
        public: Binary<32>,
        secret: Option<BinarySecret<32>>,
    },
}

impl Clone for SignKeypair {
    fn clone(&self) -> Self {
        match self {
            Self::Ed25519 { public, secret } => Self::Ed25519 {
                public: public.clone(),
                secret: secret.clone(),
            },
        }
    }
}

impl SignKeypair {
    /// Create a new ed25519 keypair
    pub fn new_ed25519<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let mut randbuf = [0u8; 32];
        rng.fill_bytes(&mut randbuf);
        let secret = ed25519_consensus::SigningKey::from(randbuf);
        let public = secret.verification_key();
        Self::Ed25519 {
            public: Binary::new(public.to_bytes()),
            secret: Some(BinarySecret::new(secret.to_bytes())),
        }
    }

    /// Create an ed25519 keypair from a cryptographic seed
    pub fn new_ed25519_from_bytes(secret_bytes: [u8; 32]) -> Self {
        let secret = ed25519_consensus::SigningKey::from(secret_bytes);
        let public = secret.verification_key();
        Self::Ed25519 {
            public: Binary::new(public.to_bytes()),
            secret: Some(BinarySecret::new(secret.to_bytes())),
        }
    }

    /// Sign a message with this keypair's secret half.
    pub fn sign(&self, data: &[u8]) -> Result<SignKeypairSignature> {
        match self {
            Self::Ed25519 { secret, .. } => {
                let secret = secret.as_ref().ok_or(Error::CryptoKeyMissing)?;
                let seckey = ed25519_consensus::SigningKey::from(*secret.expose_secret());
                let sig = seckey.sign(data);
                Ok(SignKeypairSignature::Ed25519(Binary::new(sig.to_bytes())))
            }
        }
    }

    /// Grab the public half of this keypair.
    pub fn public(&self) -> SignKeypairPublic {
        match self {
            Self::Ed25519 { public, .. } => SignKeypairPublic::Ed25519(public.clone()),
        }
    }

    /// Derive this keypair's ID (the ID of its public half).
    pub fn key_id(&self) -> Result<KeyID> {
        self.public().key_id()
    }
}

/// A unique identifier for a signing key: the hash of the public key's
/// canonical encoding. Events reference keys by ID, never by raw key bytes.
#[derive(Debug, Clone, PartialEq, Eq, AsnType, Encode, Decode, Serialize, Deserialize)]
#[rasn(delegate)]
pub struct KeyID(Hash);

impl Deref for KeyID {
    type Target = Hash;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<Hash> for KeyID {
    fn from(hash: Hash) -> Self {
        Self(hash)
    }
}

impl std::hash::Hash for KeyID {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.deref().hash(state);
    }
}

impl std::fmt::Display for KeyID {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.deref())
    }
}
