use std::{fmt, str::FromStr};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::{keccak256, ParseError};

/// A 20-byte EVM account address.
///
/// Comparison is always on the raw bytes, so the mixed-case checksum form and
/// the lowercased form of the same address are equal. [`fmt::Display`] renders
/// the EIP-55 checksum form; ledger rows use [`Address::to_lowercase_string`].
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address([u8; 20]);

impl Address {
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    pub fn to_bytes(self) -> [u8; 20] {
        self.0
    }

    pub fn from_slice(slice: &[u8]) -> Option<Self> {
        let bytes: [u8; 20] = slice.try_into().ok()?;

        Some(Self(bytes))
    }

    /// `0x`-prefixed lowercase hex, the form stored in ledger rows.
    pub fn to_lowercase_string(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }

    /// EIP-55 mixed-case checksum encoding.
    pub fn to_checksum(&self) -> String {
        let lowercase = hex::encode(self.0);
        let hash = hex::encode(keccak256(lowercase.as_bytes()));

        lowercase
            .char_indices()
            .fold(String::from("0x"), |mut acc, (index, c)| {
                // every nibble of the hash decides the case of the same position
                let nibble = u16::from_str_radix(&hash[index..index + 1], 16)
                    .expect("keccak output is valid hex");

                if nibble > 7 {
                    acc.extend(c.to_uppercase());
                } else {
                    acc.push(c);
                }

                acc
            })
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_checksum())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self.to_lowercase_string())
    }
}

impl From<[u8; 20]> for Address {
    fn from(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for Address {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl FromStr for Address {
    type Err = ParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let hex_value = match value.len() {
            42 => &value[2..],
            40 => value,
            _ => return Err(ParseError::InvalidLength("address")),
        };

        let mut bytes = [0_u8; 20];
        hex::decode_to_slice(hex_value, &mut bytes)?;

        Ok(Self(bytes))
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_checksum())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;

        value.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parses_both_hex_forms_and_checksums() {
        let expected = "0xce07CbB7e054514D590a0262C93070D838bFBA2e";

        let from_lower: Address = expected.to_lowercase().parse().expect("valid address");
        let from_checksum: Address = expected.parse().expect("valid address");

        assert_eq!(from_lower, from_checksum);
        assert_eq!(expected, from_lower.to_checksum());
        assert_eq!(
            "0xce07cbb7e054514d590a0262c93070d838bfba2e",
            from_lower.to_lowercase_string()
        );
    }

    #[test]
    fn rejects_wrong_lengths() {
        assert_eq!(
            Err(ParseError::InvalidLength("address")),
            "0x1234".parse::<Address>()
        );
        assert!("not 40 chars of hex but 42 characters!!!!!!!"
            .parse::<Address>()
            .is_err());
    }

    #[test]
    fn serde_round_trip() {
        let address: Address = "0xce07CbB7e054514D590a0262C93070D838bFBA2e"
            .parse()
            .expect("valid address");

        let json = serde_json::to_string(&address).expect("serializes");
        assert_eq!(r#""0xce07CbB7e054514D590a0262C93070D838bFBA2e""#, json);

        let back: Address = serde_json::from_str(&json).expect("deserializes");
        assert_eq!(address, back);
    }
}
