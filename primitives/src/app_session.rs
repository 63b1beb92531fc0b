use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use parse_display::{Display, FromStr};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use crate::{keccak256, Address, ParseError};

/// Identifier of a virtual application session: the keccak fingerprint of the
/// canonical JSON of its [`AppDefinition`].
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId([u8; 32]);

impl SessionId {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl From<[u8; 32]> for SessionId {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionId({})", self)
    }
}

impl FromStr for SessionId {
    type Err = ParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let hex_value = match value.len() {
            66 => &value[2..],
            64 => value,
            _ => return Err(ParseError::InvalidLength("session id")),
        };

        let mut bytes = [0_u8; 32];
        hex::decode_to_slice(hex_value, &mut bytes)?;

        Ok(Self(bytes))
    }
}

impl Serialize for SessionId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for SessionId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;

        value.parse().map_err(serde::de::Error::custom)
    }
}

/// The agreed terms of a virtual application, fixed at creation time.
///
/// `participants` and `weights` are parallel lists; `quorum` is the minimum
/// summed weight of distinct signers required to close the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppDefinition {
    pub protocol: String,
    pub participants: Vec<Address>,
    pub weights: Vec<i64>,
    pub quorum: u64,
    pub challenge: u64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub nonce: u64,
}

fn is_zero(nonce: &u64) -> bool {
    *nonce == 0
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DefinitionError {
    #[error("a session needs at least two participants")]
    TooFewParticipants,
    #[error("weights must be provided for every participant")]
    WeightsLengthMismatch,
    #[error("allocations must be provided for every participant")]
    AllocationsLengthMismatch,
    #[error("no combination of positive weights can reach the quorum")]
    UnreachableQuorum,
}

impl AppDefinition {
    /// Checks the structural invariants against the creation request's
    /// allocation count. A definition that passes can always be closed by
    /// some set of signers.
    pub fn validate(&self, allocations: usize) -> Result<(), DefinitionError> {
        if self.participants.len() < 2 {
            return Err(DefinitionError::TooFewParticipants);
        }
        if self.weights.len() != self.participants.len() {
            return Err(DefinitionError::WeightsLengthMismatch);
        }
        if allocations != self.participants.len() {
            return Err(DefinitionError::AllocationsLengthMismatch);
        }

        let achievable: i64 = self.weights.iter().filter(|weight| **weight > 0).sum();
        if achievable < self.quorum as i64 {
            return Err(DefinitionError::UnreachableQuorum);
        }

        Ok(())
    }

    /// Derives the session id from the canonical JSON of the definition.
    pub fn session_id(&self) -> SessionId {
        let canonical = serde_json::to_vec(self).expect("definition serialization cannot fail");

        SessionId(keccak256(&canonical))
    }

    /// Weight of `address` in this definition, if it is a participant.
    pub fn weight_of(&self, address: &Address) -> Option<i64> {
        self.participants
            .iter()
            .position(|participant| participant == address)
            .map(|index| self.weights[index])
    }
}

#[derive(Debug, Display, FromStr, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[display(style = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Open,
    Closed,
}

/// A stored virtual application session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppSession {
    pub session_id: SessionId,
    pub protocol: String,
    pub participants: Vec<Address>,
    pub weights: Vec<i64>,
    pub quorum: u64,
    pub challenge: u64,
    pub nonce: u64,
    pub version: u64,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AppSession {
    pub fn definition(&self) -> AppDefinition {
        AppDefinition {
            protocol: self.protocol.clone(),
            participants: self.participants.clone(),
            weights: self.weights.clone(),
            quorum: self.quorum,
            challenge: self.challenge,
            nonce: self.nonce,
        }
    }

    pub fn weight_of(&self, address: &Address) -> Option<i64> {
        self.participants
            .iter()
            .position(|participant| participant == address)
            .map(|index| self.weights[index])
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test_util::{ALICE, BOB};

    fn definition() -> AppDefinition {
        AppDefinition {
            protocol: "nitro-rpc".to_string(),
            participants: vec![*ALICE, *BOB],
            weights: vec![1, 1],
            quorum: 2,
            challenge: 86400,
            nonce: 1_700_000_000,
        }
    }

    #[test]
    fn session_id_is_deterministic_and_nonce_sensitive() {
        let a = definition();
        let b = definition();
        assert_eq!(a.session_id(), b.session_id());

        let mut c = definition();
        c.nonce += 1;
        assert_ne!(a.session_id(), c.session_id());
    }

    #[test]
    fn validate_catches_structural_problems() {
        assert_eq!(Ok(()), definition().validate(2));

        let mut too_few = definition();
        too_few.participants = vec![*ALICE];
        too_few.weights = vec![1];
        assert_eq!(
            Err(DefinitionError::TooFewParticipants),
            too_few.validate(1)
        );

        let mut uneven = definition();
        uneven.weights = vec![1];
        assert_eq!(
            Err(DefinitionError::WeightsLengthMismatch),
            uneven.validate(2)
        );

        assert_eq!(
            Err(DefinitionError::AllocationsLengthMismatch),
            definition().validate(3)
        );

        let mut unreachable = definition();
        unreachable.weights = vec![1, -5];
        assert_eq!(
            Err(DefinitionError::UnreachableQuorum),
            unreachable.validate(2)
        );
    }

    #[test]
    fn weight_lookup() {
        let definition = definition();

        assert_eq!(Some(1), definition.weight_of(&ALICE));
        assert_eq!(None, definition.weight_of(&crate::test_util::CHARLIE));
    }
}
