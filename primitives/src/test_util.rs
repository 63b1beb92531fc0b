//! Deterministic fixtures shared across the workspace's tests.
//!
//! The three participant addresses belong to the first three well-known
//! hardhat development accounts, so signer fixtures elsewhere can use the
//! matching private keys.

use once_cell::sync::Lazy;

use crate::Address;

/// hardhat account #0
pub const ALICE_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
/// hardhat account #1
pub const BOB_KEY: &str = "0x59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690d";
/// hardhat account #2
pub const CHARLIE_KEY: &str =
    "0x5de4111afa1a4b94908f83103eb1f1706367c2e68ca870fc3fb9a804cdab365a";

pub static ALICE: Lazy<Address> = Lazy::new(|| {
    "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266"
        .parse()
        .expect("failed to parse ALICE address")
});

pub static BOB: Lazy<Address> = Lazy::new(|| {
    "0x70997970C51812dc3A010C7d01b50e0d17dc79C8"
        .parse()
        .expect("failed to parse BOB address")
});

pub static CHARLIE: Lazy<Address> = Lazy::new(|| {
    "0x3C44CdDdB6a900fa2b585dd299e03d12FA4293BC"
        .parse()
        .expect("failed to parse CHARLIE address")
});

pub static TOKEN_USDC: Lazy<Address> = Lazy::new(|| {
    "0xe7f1725E7734CE288F8367e1Bb143E90bb3F0512"
        .parse()
        .expect("failed to parse USDC token address")
});
