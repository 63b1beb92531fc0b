use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use parse_display::{Display, FromStr};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::{Address, ChainId, ParseError};

/// The keccak fingerprint identifying an on-chain deposit channel.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelId([u8; 32]);

impl ChannelId {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_bytes(self) -> [u8; 32] {
        self.0
    }
}

impl From<[u8; 32]> for ChannelId {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for ChannelId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChannelId({})", self)
    }
}

impl FromStr for ChannelId {
    type Err = ParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let hex_value = match value.len() {
            66 => &value[2..],
            64 => value,
            _ => return Err(ParseError::InvalidLength("channel id")),
        };

        let mut bytes = [0_u8; 32];
        hex::decode_to_slice(hex_value, &mut bytes)?;

        Ok(Self(bytes))
    }
}

impl Serialize for ChannelId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ChannelId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;

        value.parse().map_err(serde::de::Error::custom)
    }
}

/// Lifecycle of a channel row.
///
/// `joining` rows were observed in a `Created` event and await the broker's
/// on-chain join; `open` channels back the participant's ledger balance;
/// `closed` is terminal.
#[derive(Debug, Display, FromStr, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[display(style = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ChannelStatus {
    Joining,
    Open,
    Closed,
}

/// A bilateral on-chain deposit channel between a participant and the broker.
///
/// `amount` is the total on-chain deposit in token base units; `version`
/// increments with every on-chain mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub channel_id: ChannelId,
    pub participant: Address,
    pub status: ChannelStatus,
    pub token: Address,
    #[serde(rename = "network_id")]
    pub chain_id: ChainId,
    pub adjudicator: Address,
    pub amount: u64,
    pub nonce: u64,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn channel_id_round_trips_through_hex() {
        let id: ChannelId = "0x000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f"
            .parse()
            .expect("valid channel id");

        assert_eq!(
            "0x000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f",
            id.to_string()
        );
        assert_eq!(id, id.to_string().parse().expect("round trips"));
    }

    #[test]
    fn status_strings() {
        assert_eq!("joining", ChannelStatus::Joining.to_string());
        assert_eq!("open", ChannelStatus::Open.to_string());
        assert_eq!(
            ChannelStatus::Closed,
            "closed".parse().expect("parses status")
        );
        assert!("pending".parse::<ChannelStatus>().is_err());
    }
}
