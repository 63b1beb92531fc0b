//! The per-connection authentication state machine:
//!
//! ```text
//! Unauthenticated --auth_request--> Challenged(challenge, expires_at)
//! Challenged --auth_verify(signed, fresh)--> Authenticated(address)
//! ```
//!
//! Every step requires a signature over the request's canonical bytes that
//! recovers the claimed address; the challenge is a UUID with a bounded TTL,
//! and expiry exactly at the deadline already rejects.

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use primitives::{
    rpc::{AuthChallengeResponse, AuthRequestParams, AuthVerifyParams, AuthVerifyResponse, Message},
    Address,
};

use crate::{handlers::require_signature_from, HandlerError};

#[derive(Debug, Clone, PartialEq, Eq)]
enum State {
    Unauthenticated,
    Challenged {
        address: Address,
        challenge: String,
        expires_at: DateTime<Utc>,
    },
    Authenticated {
        address: Address,
    },
}

#[derive(Debug)]
pub struct AuthState {
    state: State,
    ttl: Duration,
}

impl AuthState {
    pub fn new(ttl_secs: u64) -> Self {
        Self {
            state: State::Unauthenticated,
            ttl: Duration::seconds(ttl_secs as i64),
        }
    }

    pub fn authenticated(&self) -> Option<Address> {
        match &self.state {
            State::Authenticated { address } => Some(*address),
            _ => None,
        }
    }

    /// Handles `auth_request`: issues a fresh challenge for the claimed
    /// address. Re-requesting before verification replaces the outstanding
    /// challenge; an authenticated connection stays authenticated.
    pub fn handle_auth_request(
        &mut self,
        message: &Message,
        now: DateTime<Utc>,
    ) -> Result<AuthChallengeResponse, HandlerError> {
        if matches!(self.state, State::Authenticated { .. }) {
            return Err(HandlerError::Conflict(
                "connection is already authenticated".to_string(),
            ));
        }

        let params: AuthRequestParams = message.payload.named_params()?;

        require_signature_from(message, &params.address)?;

        let challenge = Uuid::new_v4().to_string();
        self.state = State::Challenged {
            address: params.address,
            challenge: challenge.clone(),
            expires_at: now + self.ttl,
        };

        Ok(AuthChallengeResponse {
            challenge_message: challenge,
        })
    }

    /// Handles `auth_verify`: checks the signature, the challenge and its
    /// freshness, then marks the connection authenticated.
    pub fn handle_auth_verify(
        &mut self,
        message: &Message,
        now: DateTime<Utc>,
    ) -> Result<AuthVerifyResponse, HandlerError> {
        let params: AuthVerifyParams = message.payload.named_params()?;

        let (address, challenge, expires_at) = match &self.state {
            State::Challenged {
                address,
                challenge,
                expires_at,
            } => (*address, challenge.clone(), *expires_at),
            _ => {
                return Err(HandlerError::InvalidSignature);
            }
        };

        if params.address != address || params.challenge != challenge {
            return Err(HandlerError::InvalidSignature);
        }
        if now >= expires_at {
            self.state = State::Unauthenticated;
            return Err(HandlerError::InvalidSignature);
        }

        require_signature_from(message, &address)?;

        self.state = State::Authenticated { address };

        Ok(AuthVerifyResponse {
            address,
            success: true,
        })
    }
}
