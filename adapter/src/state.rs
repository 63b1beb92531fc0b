//! ABI encoding of the channel states the broker signs.
//!
//! A state is `abi_encode(channel_id, intent, version, state_data,
//! allocations)`; the contract recovers the broker from an ECDSA signature
//! over the keccak256 of that encoding.

use web3::{
    ethabi::Token,
    types::{H160, U256},
};

use primitives::{Address, ChannelId};

use crate::keccak256;

/// Which transition a signed state authorizes on the custody contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Intent {
    Initialize = 0,
    Finalize = 1,
    Resize = 2,
}

impl Intent {
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// One destination's share of the channel deposit, in token base units.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateAllocation {
    pub destination: Address,
    pub token: Address,
    pub amount: U256,
}

impl StateAllocation {
    fn to_token(&self) -> Token {
        Token::Tuple(vec![
            Token::Address(H160(self.destination.to_bytes())),
            Token::Address(H160(self.token.to_bytes())),
            Token::Uint(self.amount),
        ])
    }
}

pub fn encode_state(
    channel_id: &ChannelId,
    intent: Intent,
    version: u64,
    state_data: &[u8],
    allocations: &[StateAllocation],
) -> Vec<u8> {
    web3::ethabi::encode(&[
        Token::FixedBytes(channel_id.as_bytes().to_vec()),
        Token::Uint(U256::from(intent.as_u8())),
        Token::Uint(U256::from(version)),
        Token::Bytes(state_data.to_vec()),
        Token::Array(
            allocations
                .iter()
                .map(StateAllocation::to_token)
                .collect(),
        ),
    ])
}

pub fn state_hash(
    channel_id: &ChannelId,
    intent: Intent,
    version: u64,
    state_data: &[u8],
    allocations: &[StateAllocation],
) -> [u8; 32] {
    keccak256(&encode_state(
        channel_id,
        intent,
        version,
        state_data,
        allocations,
    ))
}

/// Encodes the `int256[]` of per-index resize amounts carried as the state
/// data of a RESIZE intent.
pub fn encode_resize_amounts(amounts: &[i128]) -> Vec<u8> {
    web3::ethabi::encode(&[Token::Array(
        amounts
            .iter()
            .map(|amount| Token::Int(i128_to_u256(*amount)))
            .collect(),
    )])
}

/// Two's-complement widening of an `i128` into the EVM's 256-bit word.
pub fn i128_to_u256(value: i128) -> U256 {
    if value >= 0 {
        U256::from(value as u128)
    } else {
        // sign-extend: -x == !x + 1 over 256 bits
        let positive = U256::from((-value) as u128);
        (!positive).overflowing_add(U256::one()).0
    }
}

/// Narrowing counterpart of [`i128_to_u256`]; `None` when the word does not
/// fit an `i128`.
pub fn u256_to_i128(value: U256) -> Option<i128> {
    let negative = value.bit(255);

    if negative {
        let magnitude = (!value).overflowing_add(U256::one()).0;
        let magnitude: u128 = magnitude.try_into().ok()?;
        if magnitude > i128::MAX as u128 + 1 {
            return None;
        }

        Some((magnitude as i128).wrapping_neg())
    } else {
        let magnitude: u128 = value.try_into().ok()?;

        i128::try_from(magnitude).ok()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use primitives::test_util::{ALICE, TOKEN_USDC};

    fn channel_id() -> ChannelId {
        "0x000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f"
            .parse()
            .expect("valid channel id")
    }

    #[test]
    fn i128_round_trips_through_the_evm_word() {
        for value in [0_i128, 1, -1, 42, -42, i128::MAX, i128::MIN] {
            assert_eq!(Some(value), u256_to_i128(i128_to_u256(value)));
        }

        assert_eq!(U256::MAX, i128_to_u256(-1));
        // 2^200 does not fit an i128
        assert_eq!(None, u256_to_i128(U256::one() << 200));
    }

    #[test]
    fn state_hash_matches_the_reference_encoding() {
        let allocations = [
            StateAllocation {
                destination: *ALICE,
                token: *TOKEN_USDC,
                amount: U256::from(100_000_000_u64),
            },
            StateAllocation {
                destination: *ALICE,
                token: *TOKEN_USDC,
                amount: U256::zero(),
            },
        ];

        let hash = state_hash(&channel_id(), Intent::Resize, 3, &[], &allocations);

        assert_eq!(
            "61250387d0b6eb8ce902407bcd5f60e8f93a838f16215bd0d152a3b82c1a5e64",
            hex::encode(hash)
        );
    }

    #[test]
    fn encoding_is_sensitive_to_every_field() {
        let allocations = [StateAllocation {
            destination: *ALICE,
            token: *TOKEN_USDC,
            amount: U256::from(7_u64),
        }];

        let base = state_hash(&channel_id(), Intent::Finalize, 1, &[], &allocations);

        assert_ne!(
            base,
            state_hash(&channel_id(), Intent::Resize, 1, &[], &allocations)
        );
        assert_ne!(
            base,
            state_hash(&channel_id(), Intent::Finalize, 2, &[], &allocations)
        );
        assert_ne!(
            base,
            state_hash(&channel_id(), Intent::Finalize, 1, &[0x01], &allocations)
        );
        assert_ne!(
            base,
            state_hash(&channel_id(), Intent::Finalize, 1, &[], &[])
        );
    }

    #[test]
    fn resize_amounts_encode_as_int256_array() {
        let encoded = encode_resize_amounts(&[0, -100_000_000]);

        // offset word + length word + two value words
        assert_eq!(32 * 4, encoded.len());
        assert_eq!(U256::from(2), U256::from_big_endian(&encoded[32..64]));
        assert_eq!(
            i128_to_u256(-100_000_000),
            U256::from_big_endian(&encoded[96..128])
        );
    }
}
