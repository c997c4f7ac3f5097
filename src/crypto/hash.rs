//! Cryptographic hashing, used for commitment digests, key IDs, and identity
//! fingerprints.

use crate::{
    error::{Error, Result},
    util::ser::{self, Binary},
};
use rasn::{AsnType, Decode, Encode};
use serde_derive::{Deserialize, Serialize};
use std::ops::Deref;
use subtle::ConstantTimeEq;

/// A cryptographic hash. By defining this as an enum, we allow expansion of
/// hash algorithms in the future.
///
/// When stringified, the hash is in the format `base64([<hash bytes>|<u8 tag>])`
/// where the `tag` is the specific hash algorithm we use. This allows the hash
/// to shine on its own without the tag getting in the way.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, AsnType, Encode, Decode, Serialize, Deserialize)]
#[rasn(choice)]
pub enum Hash {
    /// Blake3 256bit hash
    #[rasn(tag(explicit(0)))]
    Blake3(Binary<32>),
}

impl Hash {
    /// Create a new blake3 (256 bit) hash from a message
    pub fn new_blake3(message: &[u8]) -> Self {
        Self::Blake3(Binary::new(*blake3::hash(message).as_bytes()))
    }

    /// Return the byte slice representing this hash.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Blake3(bin) => bin.deref(),
        }
    }

    /// Compare two hashes in constant time.
    pub fn verify(&self, other: &Hash) -> bool {
        bool::from(self.as_bytes().ct_eq(other.as_bytes()))
    }
}

impl std::hash::Hash for Hash {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.as_bytes().hash(state);
    }
}

impl TryFrom<&Hash> for String {
    type Error = Error;

    fn try_from(hash: &Hash) -> std::result::Result<Self, Self::Error> {
        let enc = match hash {
            Hash::Blake3(bin) => {
                let mut vec = Vec::from(bin.deref().as_slice());
                vec.push(0);
                vec
            }
        };
        Ok(ser::base64_encode(&enc[..]))
    }
}

impl TryFrom<&str> for Hash {
    type Error = Error;

    fn try_from(string: &str) -> std::result::Result<Self, Self::Error> {
        let dec = ser::base64_decode(string)?;
        let tag = *dec.last().ok_or(Error::BadLength)?;
        let bytes = &dec[0..dec.len() - 1];
        let hash = match tag {
            0 => {
                let arr: [u8; 32] = bytes.try_into().map_err(|_| Error::BadLength)?;
                Self::Blake3(Binary::new(arr))
            }
            _ => Err(Error::CryptoAlgoMismatch)?,
        };
        Ok(hash)
    }
}

impl std::fmt::Display for Hash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", String::try_from(self).map_err(|_| std::fmt::Error)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_blake3_deterministic() {
        let msg = b"get in the water. the seal commands it.";
        let hash1 = Hash::new_blake3(&msg[..]);
        let hash2 = Hash::new_blake3(&msg[..]);
        assert_eq!(hash1, hash2);
        assert_eq!(hash1.as_bytes().len(), 32);
    }

    #[test]
    fn hash_blake3_distinct_messages() {
        let hash1 = Hash::new_blake3(b"message one");
        let hash2 = Hash::new_blake3(b"message two");
        assert!(hash1 != hash2);
        assert!(!hash1.verify(&hash2));
        assert!(hash1.verify(&hash1));
    }

    #[test]
    fn hash_string_round_trip() {
        let hash = Hash::new_blake3(b"what a lovely day for a hash");
        let string = String::try_from(&hash).unwrap();
        let hash2 = Hash::try_from(string.as_str()).unwrap();
        assert_eq!(hash, hash2);
    }

    #[test]
    fn hash_string_rejects_unknown_tag() {
        let hash = Hash::new_blake3(b"tagged");
        let string = String::try_from(&hash).unwrap();
        let mut bytes = ser::base64_decode(&string).unwrap();
        *bytes.last_mut().unwrap() = 99;
        let mangled = ser::base64_encode(&bytes);
        assert_eq!(Hash::try_from(mangled.as_str()), Err(Error::CryptoAlgoMismatch));
    }

    #[test]
    fn hash_der_round_trip() {
        let hash = Hash::new_blake3(b"round and round we go");
        let bytes = ser::serialize(&hash).unwrap();
        let hash2: Hash = ser::deserialize(&bytes).unwrap();
        assert_eq!(hash, hash2);
    }
}
