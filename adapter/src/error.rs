use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid broker private key: {0}")]
    InvalidKey(String),
    #[error("ECDSA: {0}")]
    Ecdsa(#[from] k256::ecdsa::Error),
    #[error("web3 transport: {0}")]
    Web3(#[from] web3::Error),
    #[error("contract interaction: {0}")]
    Contract(#[from] web3::contract::Error),
    #[error("ABI: {0}")]
    Abi(#[from] web3::ethabi::Error),
    #[error("malformed on-chain value: {0}")]
    Decode(String),
}
