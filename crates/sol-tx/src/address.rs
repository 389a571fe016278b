//! Solana addresses and keypairs.
//!
//! A Solana address is the Base58 encoding of a raw 32-byte Ed25519 public
//! key. No hashing is applied, the public key bytes ARE the address bytes.

use std::fmt;
use std::str::FromStr;

use ed25519_dalek::{Signer, SigningKey};
use rand_core::CryptoRngCore;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use zeroize::Zeroize;

use crate::error::TxError;

/// A 32-byte account address.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Pubkey([u8; 32]);

impl Pubkey {
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        self.0
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Build an address from an arbitrary slice, failing unless it is
    /// exactly 32 bytes long.
    pub fn try_from_slice(bytes: &[u8]) -> Result<Self, TxError> {
        let arr: [u8; 32] = bytes.try_into().map_err(|_| {
            TxError::InvalidAddress(format!("expected 32 bytes, got {}", bytes.len()))
        })?;
        Ok(Self(arr))
    }
}

impl FromStr for Pubkey {
    type Err = TxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = bs58::decode(s)
            .into_vec()
            .map_err(|e| TxError::InvalidAddress(format!("base58 decode failed: {e}")))?;
        Self::try_from_slice(&bytes)
    }
}

impl fmt::Display for Pubkey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&bs58::encode(self.0).into_string())
    }
}

impl fmt::Debug for Pubkey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pubkey({self})")
    }
}

impl From<[u8; 32]> for Pubkey {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl Serialize for Pubkey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Pubkey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// An Ed25519 signing keypair.
///
/// The secret half is zeroized on drop by `ed25519-dalek`.
pub struct Keypair {
    signing_key: SigningKey,
}

impl Keypair {
    /// Build a keypair from a 32-byte seed.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(seed),
        }
    }

    /// Build a keypair from the 64-byte `secret || public` layout used by
    /// Solana keypair files. The public half must match the secret half.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TxError> {
        if bytes.len() != 64 {
            return Err(TxError::InvalidKeypair(format!(
                "expected 64 bytes, got {}",
                bytes.len()
            )));
        }
        let mut raw = [0u8; 64];
        raw.copy_from_slice(bytes);
        let result = SigningKey::from_keypair_bytes(&raw)
            .map_err(|e| TxError::InvalidKeypair(format!("public key mismatch: {e}")));
        raw.zeroize();
        Ok(Self {
            signing_key: result?,
        })
    }

    /// Generate a fresh random keypair.
    pub fn generate<R: CryptoRngCore + ?Sized>(rng: &mut R) -> Self {
        Self {
            signing_key: SigningKey::generate(rng),
        }
    }

    pub fn pubkey(&self) -> Pubkey {
        Pubkey(self.signing_key.verifying_key().to_bytes())
    }

    /// Sign arbitrary bytes, returning the 64-byte signature.
    pub fn sign_message(&self, message: &[u8]) -> [u8; 64] {
        self.signing_key.sign(message).to_bytes()
    }
}

impl fmt::Debug for Keypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keypair")
            .field("pubkey", &self.pubkey())
            .finish_non_exhaustive()
    }
}
