use std::{fmt, str::FromStr};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::ParseError;

/// A 65-byte recoverable ECDSA signature, `R (32) ‖ S (32) ‖ V (1)`.
///
/// `V` is stored as the raw recovery id (`0` or `1`); the electrum form with
/// 27 added is normalized away while parsing so both encodings are accepted
/// on the wire.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Signature([u8; 65]);

impl Signature {
    pub fn from_bytes(mut bytes: [u8; 65]) -> Self {
        if bytes[64] >= 27 {
            bytes[64] -= 27;
        }

        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 65] {
        &self.0
    }

    pub fn r(&self) -> &[u8] {
        &self.0[..32]
    }

    pub fn s(&self) -> &[u8] {
        &self.0[32..64]
    }

    /// Recovery id, `0` or `1`.
    pub fn v(&self) -> u8 {
        self.0[64]
    }

    /// The 65-byte form with `27` added to `V`, as the EVM expects it.
    pub fn to_electrum(&self) -> [u8; 65] {
        let mut bytes = self.0;
        bytes[64] += 27;

        bytes
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({})", self)
    }
}

impl FromStr for Signature {
    type Err = ParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let hex_value = match value.len() {
            132 => &value[2..],
            130 => value,
            _ => return Err(ParseError::InvalidLength("signature")),
        };

        let mut bytes = [0_u8; 65];
        hex::decode_to_slice(hex_value, &mut bytes)?;

        Ok(Self::from_bytes(bytes))
    }
}

impl Serialize for Signature {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Signature {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;

        value.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn electrum_v_is_normalized() {
        let mut bytes = [0x11_u8; 65];
        bytes[64] = 28;

        let signature = Signature::from_bytes(bytes);
        assert_eq!(1, signature.v());
        assert_eq!(28, signature.to_electrum()[64]);
    }

    #[test]
    fn parses_prefixed_hex() {
        let hex_sig = format!("0x{}", "22".repeat(64) + "01");
        let signature: Signature = hex_sig.parse().expect("valid signature");

        assert_eq!(1, signature.v());
        assert_eq!(hex_sig, signature.to_string());
        assert_eq!(132, signature.to_string().len());
    }

    #[test]
    fn rejects_wrong_lengths() {
        assert_eq!(
            Err(ParseError::InvalidLength("signature")),
            "0x1234".parse::<Signature>()
        );
    }
}
