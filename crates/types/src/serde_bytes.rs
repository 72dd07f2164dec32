//! Serde support for fixed-size byte arrays longer than 32 bytes
//! (signatures and compressed public keys), hex-encoded in
//! human-readable formats.
//!
//! Annotate fields with `#[serde(with = "conductor_types::serde_bytes_array")]`.

use serde::de::{Error, SeqAccess, Visitor};
use serde::{Deserializer, Serializer};

/// Serialize a fixed-size byte array.
pub fn serialize<S: Serializer, const N: usize>(
    bytes: &[u8; N],
    serializer: S,
) -> Result<S::Ok, S::Error> {
    if serializer.is_human_readable() {
        serializer.serialize_str(&hex::encode(bytes))
    } else {
        serializer.serialize_bytes(bytes)
    }
}

/// Deserialize a fixed-size byte array.
pub fn deserialize<'de, D: Deserializer<'de>, const N: usize>(
    deserializer: D,
) -> Result<[u8; N], D::Error> {
    struct ByteArrayVisitor<const N: usize>;

    impl<'de, const N: usize> Visitor<'de> for ByteArrayVisitor<N> {
        type Value = [u8; N];

        fn expecting(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(formatter, "{} bytes", N)
        }

        fn visit_str<E: Error>(self, value: &str) -> Result<Self::Value, E> {
            let bytes = hex::decode(value.trim_start_matches("0x"))
                .map_err(|e| E::custom(format!("invalid hex: {e}")))?;
            bytes
                .as_slice()
                .try_into()
                .map_err(|_| E::custom(format!("expected {} bytes, got {}", N, bytes.len())))
        }

        fn visit_bytes<E: Error>(self, value: &[u8]) -> Result<Self::Value, E> {
            value
                .try_into()
                .map_err(|_| E::custom(format!("expected {} bytes, got {}", N, value.len())))
        }

        fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
            let mut bytes = [0u8; N];
            for (i, slot) in bytes.iter_mut().enumerate() {
                *slot = seq
                    .next_element()?
                    .ok_or_else(|| Error::invalid_length(i, &self))?;
            }
            Ok(bytes)
        }
    }

    if deserializer.is_human_readable() {
        deserializer.deserialize_str(ByteArrayVisitor::<N>)
    } else {
        deserializer.deserialize_bytes(ByteArrayVisitor::<N>)
    }
}

#[cfg(test)]
mod tests {
    #[derive(serde::Serialize, serde::Deserialize, PartialEq, Debug)]
    struct Wrapper {
        #[serde(with = "crate::serde_bytes_array")]
        signature: [u8; 96],
    }

    #[test]
    fn test_human_readable_round_trip() {
        let original = Wrapper {
            signature: [7u8; 96],
        };
        let json = serde_json::to_string(&original).unwrap();
        assert!(json.contains(&hex::encode([7u8; 96])));

        let restored: Wrapper = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, original);
    }

    #[test]
    fn test_wrong_length_rejected() {
        let short = format!("{{\"signature\":\"{}\"}}", hex::encode([7u8; 32]));
        assert!(serde_json::from_str::<Wrapper>(&short).is_err());
    }
}
