#![deny(rust_2018_idioms)]
#![deny(clippy::all)]

//! The broker's cryptographic identity and its view of the custody contracts.
//!
//! Signatures in the protocol are plain recoverable ECDSA over the keccak256
//! digest of the signed bytes; no EIP-191 prefix is involved, so the same
//! scheme serves both RPC payloads and on-chain state hashes.

use k256::{
    ecdsa::{RecoveryId, SigningKey, VerifyingKey},
    elliptic_curve::sec1::ToEncodedPoint,
};
use sha3::{Digest, Keccak256};

use primitives::{Address, Signature};

pub mod error;
pub mod ethereum;
pub mod state;

pub use error::Error;
pub use ethereum::{AccountInfo, Custody, CustodyEvent, EventPosition};

/// Holder of the broker's secp256k1 key.
pub struct Signer {
    key: SigningKey,
    secret: [u8; 32],
    address: Address,
}

impl std::fmt::Debug for Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // never expose key material through Debug
        write!(f, "Signer({})", self.address)
    }
}

impl Signer {
    pub fn from_hex(hex_key: &str) -> Result<Self, Error> {
        let hex_key = hex_key.strip_prefix("0x").unwrap_or(hex_key);

        let mut secret = [0_u8; 32];
        hex::decode_to_slice(hex_key, &mut secret)
            .map_err(|err| Error::InvalidKey(err.to_string()))?;

        let key = SigningKey::from_slice(&secret)
            .map_err(|err| Error::InvalidKey(err.to_string()))?;
        let address = address_of(key.verifying_key());

        Ok(Self {
            key,
            secret,
            address,
        })
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// Raw key bytes, needed to sign chain transactions.
    pub fn secret_bytes(&self) -> [u8; 32] {
        self.secret
    }

    /// Signs the keccak256 digest of `data`.
    pub fn sign(&self, data: &[u8]) -> Result<Signature, Error> {
        self.sign_digest(keccak256(data))
    }

    /// Signs a precomputed 32-byte digest.
    pub fn sign_digest(&self, digest: [u8; 32]) -> Result<Signature, Error> {
        let (signature, recovery_id) = self.key.sign_prehash_recoverable(&digest)?;

        let mut bytes = [0_u8; 65];
        bytes[..64].copy_from_slice(&signature.to_bytes());
        bytes[64] = recovery_id.to_byte();

        Ok(Signature::from_bytes(bytes))
    }
}

/// Recovers the signer address of a signature made over `keccak256(data)`.
pub fn recover(data: &[u8], signature: &Signature) -> Result<Address, Error> {
    recover_digest(keccak256(data), signature)
}

/// Recovers the signer address from a precomputed 32-byte digest.
pub fn recover_digest(digest: [u8; 32], signature: &Signature) -> Result<Address, Error> {
    let recovery_id = RecoveryId::try_from(signature.v())?;
    let parsed = k256::ecdsa::Signature::from_slice(&signature.as_bytes()[..64])?;

    let verifying_key = VerifyingKey::recover_from_prehash(&digest, &parsed, recovery_id)?;

    Ok(address_of(&verifying_key))
}

/// Checks that `signature` over `data` recovers to `expected`.
pub fn verify(data: &[u8], signature: &Signature, expected: &Address) -> bool {
    recover(data, signature)
        .map(|recovered| recovered == *expected)
        .unwrap_or(false)
}

fn address_of(key: &VerifyingKey) -> Address {
    let encoded = key.to_encoded_point(false);
    // drop the 0x04 SEC1 tag, hash the raw 64-byte public key
    let hash = keccak256(&encoded.as_bytes()[1..]);

    let mut bytes = [0_u8; 20];
    bytes.copy_from_slice(&hash[12..]);

    Address::from(bytes)
}

pub(crate) fn keccak256(data: &[u8]) -> [u8; 32] {
    Keccak256::digest(data).into()
}

#[cfg(test)]
mod test {
    use super::*;
    use primitives::test_util::{ALICE, ALICE_KEY, BOB, BOB_KEY};

    #[test]
    fn derives_the_known_address_from_the_key() {
        let signer = Signer::from_hex(ALICE_KEY).expect("valid key");
        assert_eq!(*ALICE, signer.address());

        let signer = Signer::from_hex(BOB_KEY).expect("valid key");
        assert_eq!(*BOB, signer.address());
    }

    #[test]
    fn rejects_malformed_keys() {
        assert!(Signer::from_hex("0x1234").is_err());
        assert!(Signer::from_hex(&"00".repeat(32)).is_err());
    }

    #[test]
    fn produces_the_expected_deterministic_signature() {
        let signer = Signer::from_hex(ALICE_KEY).expect("valid key");
        let payload = br#"[1,"ping",[],1700000000]"#;

        let signature = signer.sign(payload).expect("signs");

        let expected = "0x7680274bb1fbbc1296303557f46bbc323627117024bc0bc0aacb5734280956a8\
                        4299ff97cfe8136ac29b8d572d5c007f4e5ae4560892b00db6cead020543149f00"
            .replace(char::is_whitespace, "");
        assert_eq!(expected, signature.to_string());
    }

    #[test]
    fn sign_and_recover_round_trip() {
        let signer = Signer::from_hex(ALICE_KEY).expect("valid key");
        let payload = br#"[5,"close_app_session",[{"app_session_id":"0x00"}],1700000000]"#;

        let signature = signer.sign(payload).expect("signs");
        let recovered = recover(payload, &signature).expect("recovers");

        assert_eq!(signer.address(), recovered);
        assert!(verify(payload, &signature, &signer.address()));
        assert!(!verify(payload, &signature, &BOB));
        // a single flipped byte must not recover the same address
        let mut tampered = *payload;
        tampered[1] ^= 0x01;
        assert!(!verify(&tampered, &signature, &signer.address()));
    }

    #[test]
    fn recovers_from_the_electrum_v_form() {
        let signer = Signer::from_hex(BOB_KEY).expect("valid key");
        let payload = b"clearnode";

        let signature = signer.sign(payload).expect("signs");
        let electrum = Signature::from_bytes(signature.to_electrum());

        assert_eq!(
            signer.address(),
            recover(payload, &electrum).expect("recovers")
        );
    }
}
