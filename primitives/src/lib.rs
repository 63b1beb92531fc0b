#![deny(rust_2018_idioms)]
#![deny(clippy::all)]

pub mod account;
pub mod address;
pub mod app_session;
pub mod asset;
pub mod chain;
pub mod channel;
pub mod config;
pub mod postgres;
pub mod rpc;
pub mod sig;

pub mod test_util;

pub use self::account::AccountId;
pub use self::address::Address;
pub use self::app_session::{AppDefinition, AppSession, SessionId, SessionStatus};
pub use self::asset::Asset;
pub use self::chain::{Chain, ChainId};
pub use self::channel::{Channel, ChannelId, ChannelStatus};
pub use self::config::Config;
pub use self::sig::Signature;

use thiserror::Error;

/// Error raised when parsing one of the hex-encoded domain identifiers.
#[derive(Debug, Error, PartialEq)]
pub enum ParseError {
    #[error("invalid length for {0}")]
    InvalidLength(&'static str),
    #[error("invalid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),
}

pub(crate) fn keccak256(bytes: &[u8]) -> [u8; 32] {
    use tiny_keccak::{Hasher, Keccak};

    let mut hasher = Keccak::v256();
    let mut output = [0_u8; 32];
    hasher.update(bytes);
    hasher.finalize(&mut output);

    output
}
