//! Utilities. OBVIOUSLY.

use crate::error::{Error, Result};
use chrono::{DateTime, TimeZone, Utc};
use rasn::{AsnType, Decode, Decoder, Encode, Encoder, Tag, types::Constraints};
use serde_derive::{Deserialize, Serialize};
use std::ops::Deref;

pub mod ser;

/// A library-local representation of a time. Wrapping the underlying datetime
/// type means the canonical (DER) encoding lives in exactly one place, and if
/// the underlying datetime crate ever needs to change we change it here
/// instead of in fifty places.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Create a new Timestamp from the current date/time.
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Create a Timestamp from a unix timestamp (seconds).
    pub fn from_unix(seconds: i64) -> Result<Self> {
        Utc.timestamp_opt(seconds, 0)
            .single()
            .map(Self)
            .ok_or(Error::TimestampOutOfRange)
    }
}

impl Deref for Timestamp {
    type Target = DateTime<Utc>;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(date: DateTime<Utc>) -> Self {
        Self(date)
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}

impl AsnType for Timestamp {
    const TAG: Tag = Tag::GENERALIZED_TIME;
}

impl Encode for Timestamp {
    fn encode_with_tag_and_constraints<E: Encoder>(
        &self,
        encoder: &mut E,
        tag: Tag,
        _constraints: Constraints,
    ) -> std::result::Result<(), E::Error> {
        encoder
            .encode_generalized_time(tag, &self.0.fixed_offset())
            .map(|_| ())
    }
}

impl Decode for Timestamp {
    fn decode_with_tag_and_constraints<D: Decoder>(
        decoder: &mut D,
        tag: Tag,
        _constraints: Constraints,
    ) -> std::result::Result<Self, D::Error> {
        let fixed = decoder.decode_generalized_time(tag)?;
        Ok(Self(fixed.with_timezone(&Utc)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::ser;

    #[test]
    fn timestamp_der_round_trip() {
        let ts = Timestamp::from_unix(1_500_000_000).unwrap();
        let bytes = ser::serialize(&ts).unwrap();
        let ts2: Timestamp = ser::deserialize(&bytes).unwrap();
        assert_eq!(ts, ts2);
    }

    #[test]
    fn timestamp_from_unix_rejects_out_of_range() {
        assert!(Timestamp::from_unix(1_500_000_000).is_ok());
        assert_eq!(Timestamp::from_unix(i64::MAX), Err(Error::TimestampOutOfRange));
    }

    #[test]
    fn timestamp_ordering() {
        let a = Timestamp::from_unix(100).unwrap();
        let b = Timestamp::from_unix(200).unwrap();
        assert!(a < b);
    }
}
