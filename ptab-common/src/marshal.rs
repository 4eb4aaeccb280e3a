//! # Marshals
//!
//! Per-type serialization to and from opaque byte strings. Three strategies
//! cover the workloads this framework targets:
//!
//! 1. `FixedMarshal`: little-endian raw copy for fixed-width numerics, the
//!    fast path for numeric keys and float values.
//! 2. `StringMarshal`: raw UTF-8 bytes; record framing supplies the length.
//! 3. `BincodeMarshal`: schema-based encoding for structured keys such as
//!    `(site, page)` pairs.
//!
//! Marshals are stateless and shared by `Arc` from the table descriptor, so
//! the byte-oriented message loop and the typed kernel API go through the
//! same objects.

use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Errors raised at the encode/decode boundary.
///
/// A decode failure indicates schema drift between peers and is fatal.
#[derive(Debug, Error)]
pub enum MarshalError {
    /// The payload is shorter or longer than the fixed-width type requires.
    #[error("truncated value: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    /// The payload could not be decoded into the target type.
    #[error("malformed value: {0}")]
    Malformed(String),
}

/// A pair of per-type operations over opaque byte strings.
pub trait Marshal<T>: Send + Sync {
    /// Appends the encoded form of `value` to `out`.
    fn encode(&self, value: &T, out: &mut Vec<u8>) -> Result<(), MarshalError>;

    /// Decodes one value from `bytes`, consuming the whole slice.
    fn decode(&self, bytes: &[u8]) -> Result<T, MarshalError>;

    /// Stable tag of the concrete type, recorded in checkpoint headers so a
    /// restore can reject files written under a different schema.
    fn type_tag(&self) -> &'static str {
        std::any::type_name::<T>()
    }
}

/// Raw little-endian copy for fixed-width numeric types.
pub struct FixedMarshal;

macro_rules! fixed_marshal {
    ($($ty:ty),* $(,)?) => {$(
        impl Marshal<$ty> for FixedMarshal {
            fn encode(&self, value: &$ty, out: &mut Vec<u8>) -> Result<(), MarshalError> {
                out.extend_from_slice(&value.to_le_bytes());
                Ok(())
            }

            fn decode(&self, bytes: &[u8]) -> Result<$ty, MarshalError> {
                let raw: [u8; std::mem::size_of::<$ty>()] =
                    bytes.try_into().map_err(|_| MarshalError::Truncated {
                        expected: std::mem::size_of::<$ty>(),
                        actual: bytes.len(),
                    })?;
                Ok(<$ty>::from_le_bytes(raw))
            }
        }
    )*};
}

fixed_marshal!(u32, u64, i32, i64, f32, f64);

/// UTF-8 bytes for string values.
pub struct StringMarshal;

impl Marshal<String> for StringMarshal {
    fn encode(&self, value: &String, out: &mut Vec<u8>) -> Result<(), MarshalError> {
        out.extend_from_slice(value.as_bytes());
        Ok(())
    }

    fn decode(&self, bytes: &[u8]) -> Result<String, MarshalError> {
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|err| MarshalError::Malformed(err.to_string()))
    }
}

/// Schema-based encoding for any serde-serializable type.
pub struct BincodeMarshal<T>(PhantomData<fn() -> T>);

impl<T> BincodeMarshal<T> {
    pub fn new() -> Self {
        BincodeMarshal(PhantomData)
    }
}

impl<T> Default for BincodeMarshal<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Marshal<T> for BincodeMarshal<T>
where
    T: Serialize + DeserializeOwned,
{
    fn encode(&self, value: &T, out: &mut Vec<u8>) -> Result<(), MarshalError> {
        bincode::serialize_into(&mut *out, value)
            .map_err(|err| MarshalError::Malformed(err.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> Result<T, MarshalError> {
        bincode::deserialize(bytes).map_err(|err| MarshalError::Malformed(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_roundtrip() {
        let mut buf = Vec::new();
        Marshal::<u32>::encode(&FixedMarshal, &0xdead_beef, &mut buf).unwrap();
        assert_eq!(buf.len(), 4);
        let back: u32 = FixedMarshal.decode(&buf).unwrap();
        assert_eq!(back, 0xdead_beef);
    }

    #[test]
    fn fixed_rejects_truncated() {
        let err = Marshal::<u64>::decode(&FixedMarshal, &[1, 2, 3]).unwrap_err();
        assert!(matches!(
            err,
            MarshalError::Truncated {
                expected: 8,
                actual: 3
            }
        ));
    }

    #[test]
    fn fixed_float_roundtrip() {
        let mut buf = Vec::new();
        Marshal::<f32>::encode(&FixedMarshal, &0.25, &mut buf).unwrap();
        let back: f32 = FixedMarshal.decode(&buf).unwrap();
        assert_eq!(back, 0.25);
    }

    #[test]
    fn string_roundtrip_and_utf8_check() {
        let mut buf = Vec::new();
        StringMarshal
            .encode(&"tävla".to_string(), &mut buf)
            .unwrap();
        assert_eq!(StringMarshal.decode(&buf).unwrap(), "tävla");

        let err = StringMarshal.decode(&[0xff, 0xfe]).unwrap_err();
        assert!(matches!(err, MarshalError::Malformed(_)));
    }

    #[test]
    fn bincode_roundtrip() {
        #[derive(Debug, PartialEq, serde::Serialize, serde::Deserialize)]
        struct Pair {
            site: u32,
            page: u32,
        }

        let marshal = BincodeMarshal::<Pair>::new();
        let mut buf = Vec::new();
        marshal.encode(&Pair { site: 3, page: 9 }, &mut buf).unwrap();
        assert_eq!(marshal.decode(&buf).unwrap(), Pair { site: 3, page: 9 });

        assert!(marshal.decode(&buf[..2]).is_err());
    }
}
