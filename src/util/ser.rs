//! Helpful serialization tools.
//!
//! Everything that crosses a trust boundary in this library (event payloads,
//! commitments, certificates) is serialized with ASN.1 DER. DER is canonical:
//! a given value has exactly one encoding, which is what makes our commitment
//! digests deterministic and injective over well-formed values. Human-readable
//! (yaml) serialization is also provided for exporting objects, but is never
//! used for anything a digest is computed over.

use crate::error::{Error, Result};
use base64::Engine;
use rasn::{AsnType, Decode, Decoder, Encode, Encoder, Tag, types::Constraints};
use serde::{de::DeserializeOwned, Serialize};
use std::ops::Deref;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Serialize an object into its canonical (DER) byte representation.
pub(crate) fn serialize<T: Encode>(obj: &T) -> Result<Vec<u8>> {
    rasn::der::encode(obj).map_err(|e| Error::EncodeAsn(format!("{}", e)))
}

/// Deserialize an object from its canonical (DER) byte representation.
pub(crate) fn deserialize<T: Decode>(bytes: &[u8]) -> Result<T> {
    rasn::der::decode(bytes).map_err(|e| Error::DecodeAsn(format!("{}", e)))
}

/// Serialize an object into a human-readable format.
pub(crate) fn serialize_human<T: Serialize>(obj: &T) -> Result<String> {
    Ok(serde_yaml::to_string(obj)?)
}

/// Deserialize an object from a human-readable format.
#[allow(dead_code)]
pub(crate) fn deserialize_human<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    Ok(serde_yaml::from_slice(bytes)?)
}

/// Convert bytes to base64
pub fn base64_encode<T: AsRef<[u8]>>(bytes: T) -> String {
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes.as_ref())
}

/// Convert base64 to bytes
pub fn base64_decode<T: AsRef<[u8]>>(bytes: T) -> Result<Vec<u8>> {
    Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.decode(bytes.as_ref())?)
}

/// A default implementation for (de)serializing an object to or from canonical
/// binary format.
pub trait SerdeBinary: Encode + Decode {
    /// Serialize this object into canonical bytes
    fn serialize_binary(&self) -> Result<Vec<u8>> {
        serialize(self)
    }

    /// Deserialize this object from canonical bytes
    fn deserialize_binary(slice: &[u8]) -> Result<Self> {
        deserialize(slice)
    }
}

/// Export an object in a human-readable text format. Useful for publishing
/// identity certificates and detached signatures in places where binary blobs
/// are awkward.
pub trait SerText: Serialize + Sized {
    /// Serialize this object into human-readable text
    fn serialize_text(&self) -> Result<String> {
        serialize_human(self)
    }
}

/// Export an object from a human-readable text format.
pub trait DeText: DeserializeOwned {
    /// Deserialize this object from human-readable text
    fn deserialize_text(slice: &[u8]) -> Result<Self> {
        deserialize_human(slice)
    }
}

/// A fixed-length byte container that gives us abstractions over arrays that
/// serde and rasn are willing to work with.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Binary<const N: usize>([u8; N]);

impl<const N: usize> Binary<N> {
    /// Create a new fixed-length binary container.
    pub fn new(inner: [u8; N]) -> Self {
        Self(inner)
    }
}

impl<const N: usize> Deref for Binary<N> {
    type Target = [u8; N];
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<const N: usize> AsRef<[u8]> for Binary<N> {
    fn as_ref(&self) -> &[u8] {
        &self.0[..]
    }
}

impl<const N: usize> std::fmt::Debug for Binary<N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Binary({})", base64_encode(&self.0[..]))
    }
}

impl<const N: usize> TryFrom<&[u8]> for Binary<N> {
    type Error = Error;
    fn try_from(slice: &[u8]) -> std::result::Result<Self, Self::Error> {
        let arr: [u8; N] = slice.try_into().map_err(|_| Error::BadLength)?;
        Ok(Self(arr))
    }
}

impl<const N: usize> AsnType for Binary<N> {
    const TAG: Tag = Tag::OCTET_STRING;
}

impl<const N: usize> Encode for Binary<N> {
    fn encode_with_tag_and_constraints<E: Encoder>(
        &self,
        encoder: &mut E,
        tag: Tag,
        constraints: Constraints,
    ) -> std::result::Result<(), E::Error> {
        encoder.encode_octet_string(tag, constraints, &self.0[..]).map(|_| ())
    }
}

impl<const N: usize> Decode for Binary<N> {
    fn decode_with_tag_and_constraints<D: Decoder>(
        decoder: &mut D,
        tag: Tag,
        constraints: Constraints,
    ) -> std::result::Result<Self, D::Error> {
        let codec = decoder.codec();
        let bytes = decoder.decode_octet_string(tag, constraints)?;
        let arr: [u8; N] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| rasn::de::Error::custom("invalid octet string length", codec))?;
        Ok(Self(arr))
    }
}

impl<const N: usize> serde::Serialize for Binary<N> {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        if serializer.is_human_readable() {
            serializer.serialize_str(&base64_encode(&self.0[..]))
        } else {
            serializer.serialize_bytes(&self.0[..])
        }
    }
}

impl<'de, const N: usize> serde::Deserialize<'de> for Binary<N> {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct BinVisitor<const N: usize>;
        impl<'de, const N: usize> serde::de::Visitor<'de> for BinVisitor<N> {
            type Value = Binary<N>;

            fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{} bytes (raw or base64)", N)
            }

            fn visit_bytes<E: serde::de::Error>(self, v: &[u8]) -> std::result::Result<Self::Value, E> {
                Binary::try_from(v).map_err(|_| E::custom("bad byte length"))
            }

            fn visit_str<E: serde::de::Error>(self, v: &str) -> std::result::Result<Self::Value, E> {
                let vec = base64_decode(v).map_err(|_| E::custom("bad base64"))?;
                Binary::try_from(vec.as_slice()).map_err(|_| E::custom("bad byte length"))
            }
        }
        if deserializer.is_human_readable() {
            deserializer.deserialize_str(BinVisitor)
        } else {
            deserializer.deserialize_bytes(BinVisitor)
        }
    }
}

/// A fixed-length byte container for secret material. Never serialized, never
/// displayed, zeroed on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct BinarySecret<const N: usize>([u8; N]);

impl<const N: usize> BinarySecret<N> {
    /// Create a new secret container.
    pub fn new(inner: [u8; N]) -> Self {
        Self(inner)
    }

    /// Grab the secret bytes. Handle with care.
    pub fn expose_secret(&self) -> &[u8; N] {
        &self.0
    }
}

impl<const N: usize> Clone for BinarySecret<N> {
    fn clone(&self) -> Self {
        Self(self.0)
    }
}

impl<const N: usize> std::fmt::Debug for BinarySecret<N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "BinarySecret(<{} bytes hidden>)", N)
    }
}
