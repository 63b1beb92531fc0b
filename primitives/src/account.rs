use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{Address, ChannelId, SessionId};

/// Opaque ledger account identifier.
///
/// Three id families share the namespace: a participant's own account (their
/// lowercased address), a channel account (the channel's keccak id) and an
/// app-session account (the session's keccak id). The family is only visible
/// in how the id was constructed; no code may branch on it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(String);

impl AccountId {
    /// The participant's off-channel account.
    pub fn participant(address: &Address) -> Self {
        Self(address.to_lowercase_string())
    }

    /// The account holding the deposit attributable to one channel.
    pub fn channel(channel_id: &ChannelId) -> Self {
        Self(channel_id.to_string())
    }

    /// The pooled account of a virtual application session.
    pub fn session(session_id: &SessionId) -> Self {
        Self(session_id.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for AccountId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for AccountId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test_util::ALICE;

    #[test]
    fn participant_ids_are_lowercased() {
        let id = AccountId::participant(&ALICE);

        assert_eq!(id.as_str(), id.as_str().to_lowercase());
        assert!(id.as_str().starts_with("0x"));
        assert_eq!(42, id.as_str().len());
    }

    #[test]
    fn channel_and_session_ids_share_the_namespace_shape() {
        let channel: ChannelId =
            "0x000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f"
                .parse()
                .expect("valid id");
        let session: SessionId =
            "0x000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f"
                .parse()
                .expect("valid id");

        assert_eq!(
            AccountId::channel(&channel).as_str(),
            AccountId::session(&session).as_str()
        );
    }
}
