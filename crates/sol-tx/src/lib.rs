//! Solana wire-format primitives for the GIF portal client.
//!
//! Addresses, keypairs, instructions and transactions are modelled by hand
//! on top of `ed25519-dalek` and `bs58`, without `solana-sdk`. The portal
//! only needs legacy messages with a handful of accounts, so the compact
//! binary layout is implemented directly.

pub mod address;
pub mod error;
pub mod transaction;

pub use address::{Keypair, Pubkey};
pub use error::TxError;
pub use transaction::{
    encode_compact_u16, AccountMeta, CompiledInstruction, Instruction,
    Message, Transaction, SYSTEM_PROGRAM_ID,
};
