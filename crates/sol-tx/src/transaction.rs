//! Legacy Solana transaction wire format with multi-signer support.
//!
//! ```text
//! Transaction:
//!   num_signatures          compact-u16
//!   signatures              64 bytes * num_signatures
//!   message:
//!     num_required_sigs     u8
//!     num_readonly_signed   u8
//!     num_readonly_unsigned u8
//!     num_accounts          compact-u16
//!     account_keys          32 bytes * num_accounts
//!     recent_blockhash      32 bytes
//!     num_instructions      compact-u16
//!     instructions[]
//!
//! Instruction:
//!   program_id_index        u8
//!   num_accounts            compact-u16
//!   account_indices         u8 * num_accounts
//!   data_len                compact-u16
//!   data                    u8 * data_len
//! ```
//!
//! Signature slots line up with the first `num_required_sigs` account keys.
//! A transaction is built unsigned (all-zero slots) and each signer fills
//! its own slot, so the board keypair and the wallet can sign independently.

use ed25519_dalek::{Signature, Verifier, VerifyingKey};

use crate::address::{Keypair, Pubkey};
use crate::error::TxError;

/// The System Program: 32 zero bytes, `11111111111111111111111111111111`.
pub const SYSTEM_PROGRAM_ID: Pubkey = Pubkey::new([0u8; 32]);

const EMPTY_SIGNATURE: [u8; 64] = [0u8; 64];

// ---------------------------------------------------------------------------
// Compact-u16 encoding
// ---------------------------------------------------------------------------

/// Encode a `u16` value in Solana's compact-u16 format.
///
/// - Values 0..0x7f       -> 1 byte
/// - Values 0x80..0x3fff  -> 2 bytes
/// - Values 0x4000..      -> 3 bytes
pub fn encode_compact_u16(value: u16) -> Vec<u8> {
    let mut val = value as u32;
    let mut out = Vec::with_capacity(3);

    loop {
        let mut byte = (val & 0x7f) as u8;
        val >>= 7;
        if val > 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if val == 0 {
            break;
        }
    }

    out
}

fn compact_len(len: usize, what: &str) -> Result<Vec<u8>, TxError> {
    let len = u16::try_from(len)
        .map_err(|_| TxError::SerializationError(format!("too many {what}: {len}")))?;
    Ok(encode_compact_u16(len))
}

// ---------------------------------------------------------------------------
// Instructions
// ---------------------------------------------------------------------------

/// A single account reference in an instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountMeta {
    pub pubkey: Pubkey,
    pub is_signer: bool,
    pub is_writable: bool,
}

impl AccountMeta {
    pub fn new(pubkey: Pubkey, is_signer: bool, is_writable: bool) -> Self {
        Self {
            pubkey,
            is_signer,
            is_writable,
        }
    }
}

/// An instruction before it is compiled into a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub program_id: Pubkey,
    pub accounts: Vec<AccountMeta>,
    pub data: Vec<u8>,
}

/// An instruction whose account references are indices into
/// [`Message::account_keys`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledInstruction {
    pub program_id_index: u8,
    pub account_indices: Vec<u8>,
    pub data: Vec<u8>,
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// The signed portion of a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub num_required_signatures: u8,
    pub num_readonly_signed: u8,
    pub num_readonly_unsigned: u8,
    /// Canonical order: writable signers (fee payer first), read-only
    /// signers, writable non-signers, read-only non-signers.
    pub account_keys: Vec<Pubkey>,
    pub recent_blockhash: [u8; 32],
    pub instructions: Vec<CompiledInstruction>,
}

impl Message {
    /// Compile instructions into a message paid for by `fee_payer`.
    pub fn compile(
        instructions: &[Instruction],
        fee_payer: &Pubkey,
        recent_blockhash: [u8; 32],
    ) -> Result<Self, TxError> {
        if instructions.is_empty() {
            return Err(TxError::TransactionBuildError(
                "message needs at least one instruction".into(),
            ));
        }

        let mut entries: Vec<AccountMeta> = Vec::new();
        let mut upsert = |pubkey: Pubkey, signer: bool, writable: bool| {
            if let Some(entry) = entries.iter_mut().find(|e| e.pubkey == pubkey) {
                entry.is_signer |= signer;
                entry.is_writable |= writable;
            } else {
                entries.push(AccountMeta::new(pubkey, signer, writable));
            }
        };

        upsert(*fee_payer, true, true);
        for ix in instructions {
            for meta in &ix.accounts {
                upsert(meta.pubkey, meta.is_signer, meta.is_writable);
            }
            upsert(ix.program_id, false, false);
        }

        // Stable sort keeps insertion order inside each class, which pins the
        // fee payer at index 0.
        entries.sort_by_key(|e| match (e.is_signer, e.is_writable) {
            (true, true) => 0u8,
            (true, false) => 1,
            (false, true) => 2,
            (false, false) => 3,
        });

        if entries.len() > u8::MAX as usize {
            return Err(TxError::TransactionBuildError(format!(
                "too many accounts: {}",
                entries.len()
            )));
        }

        let count = |f: fn(&AccountMeta) -> bool| entries.iter().filter(|e| f(e)).count() as u8;
        let num_required_signatures = count(|e| e.is_signer);
        let num_readonly_signed = count(|e| e.is_signer && !e.is_writable);
        let num_readonly_unsigned = count(|e| !e.is_signer && !e.is_writable);

        let account_keys: Vec<Pubkey> = entries.iter().map(|e| e.pubkey).collect();
        let index_of = |key: &Pubkey| -> Result<u8, TxError> {
            account_keys
                .iter()
                .position(|k| k == key)
                .map(|i| i as u8)
                .ok_or_else(|| TxError::TransactionBuildError(format!("{key} not in account keys")))
        };

        let mut compiled = Vec::with_capacity(instructions.len());
        for ix in instructions {
            compiled.push(CompiledInstruction {
                program_id_index: index_of(&ix.program_id)?,
                account_indices: ix
                    .accounts
                    .iter()
                    .map(|meta| index_of(&meta.pubkey))
                    .collect::<Result<_, _>>()?,
                data: ix.data.clone(),
            });
        }

        Ok(Self {
            num_required_signatures,
            num_readonly_signed,
            num_readonly_unsigned,
            account_keys,
            recent_blockhash,
            instructions: compiled,
        })
    }

    /// Accounts whose signatures are required, in slot order.
    pub fn signer_keys(&self) -> &[Pubkey] {
        let n = (self.num_required_signatures as usize).min(self.account_keys.len());
        &self.account_keys[..n]
    }

    pub fn fee_payer(&self) -> Option<&Pubkey> {
        self.account_keys.first()
    }

    /// Resolve an instruction's account indices back to addresses.
    pub fn instruction_accounts(&self, ix: &CompiledInstruction) -> Vec<Pubkey> {
        ix.account_indices
            .iter()
            .filter_map(|&i| self.account_keys.get(i as usize).copied())
            .collect()
    }

    pub fn program_id(&self, ix: &CompiledInstruction) -> Option<&Pubkey> {
        self.account_keys.get(ix.program_id_index as usize)
    }

    /// Serialize the message (the bytes that get signed).
    pub fn serialize(&self) -> Result<Vec<u8>, TxError> {
        let mut buf = Vec::with_capacity(256);

        buf.push(self.num_required_signatures);
        buf.push(self.num_readonly_signed);
        buf.push(self.num_readonly_unsigned);

        buf.extend_from_slice(&compact_len(self.account_keys.len(), "account keys")?);
        for key in &self.account_keys {
            buf.extend_from_slice(key.as_bytes());
        }

        buf.extend_from_slice(&self.recent_blockhash);

        buf.extend_from_slice(&compact_len(self.instructions.len(), "instructions")?);
        for ix in &self.instructions {
            buf.push(ix.program_id_index);
            buf.extend_from_slice(&compact_len(ix.account_indices.len(), "instruction accounts")?);
            buf.extend_from_slice(&ix.account_indices);
            buf.extend_from_slice(&compact_len(ix.data.len(), "instruction data bytes")?);
            buf.extend_from_slice(&ix.data);
        }

        Ok(buf)
    }
}

// ---------------------------------------------------------------------------
// Transaction
// ---------------------------------------------------------------------------

/// A message plus one signature slot per required signer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub signatures: Vec<[u8; 64]>,
    pub message: Message,
}

impl Transaction {
    pub fn new_unsigned(message: Message) -> Self {
        let slots = message.num_required_signatures as usize;
        Self {
            signatures: vec![EMPTY_SIGNATURE; slots],
            message,
        }
    }

    /// Fill the signature slot belonging to `keypair`.
    ///
    /// Fails if the keypair is not one of the message's required signers.
    pub fn partial_sign(&mut self, keypair: &Keypair) -> Result<(), TxError> {
        let pubkey = keypair.pubkey();
        let slot = self
            .message
            .signer_keys()
            .iter()
            .position(|k| *k == pubkey)
            .ok_or_else(|| TxError::SigningError(format!("{pubkey} is not a required signer")))?;

        let message_bytes = self.message.serialize()?;
        let signature = keypair.sign_message(&message_bytes);
        let target = self
            .signatures
            .get_mut(slot)
            .ok_or_else(|| TxError::SigningError(format!("no signature slot for {pubkey}")))?;
        *target = signature;
        Ok(())
    }

    fn signature_of(&self, pubkey: &Pubkey) -> Option<&[u8; 64]> {
        let slot = self.message.signer_keys().iter().position(|k| k == pubkey)?;
        self.signatures.get(slot)
    }

    pub fn is_signed_by(&self, pubkey: &Pubkey) -> bool {
        self.signature_of(pubkey)
            .map(|sig| *sig != EMPTY_SIGNATURE)
            .unwrap_or(false)
    }

    pub fn is_fully_signed(&self) -> bool {
        self.signatures.len() == self.message.signer_keys().len()
            && self.signatures.iter().all(|s| *s != EMPTY_SIGNATURE)
    }

    /// Check the signature slot belonging to `pubkey`.
    pub fn verify_signer(&self, pubkey: &Pubkey) -> Result<(), TxError> {
        let sig = self
            .signature_of(pubkey)
            .ok_or_else(|| TxError::SigningError(format!("no signature slot for {pubkey}")))?;
        verify_one(&self.message.serialize()?, pubkey, sig)
    }

    /// Check every signature slot against its signer's public key.
    pub fn verify(&self) -> Result<(), TxError> {
        let signers = self.message.signer_keys();
        if self.signatures.len() != signers.len() {
            return Err(TxError::SigningError(format!(
                "{} signatures for {} signers",
                self.signatures.len(),
                signers.len()
            )));
        }
        let message_bytes = self.message.serialize()?;
        for (key, sig) in signers.iter().zip(&self.signatures) {
            verify_one(&message_bytes, key, sig)?;
        }
        Ok(())
    }

    /// The first signature in Base58; this is the transaction id the ledger
    /// reports statuses under.
    pub fn id(&self) -> String {
        let first = self.signatures.first().copied().unwrap_or(EMPTY_SIGNATURE);
        bs58::encode(first).into_string()
    }

    /// Serialize into the wire format submitted via `sendTransaction`.
    pub fn serialize(&self) -> Result<Vec<u8>, TxError> {
        let message_bytes = self.message.serialize()?;
        let mut wire = Vec::with_capacity(3 + 64 * self.signatures.len() + message_bytes.len());
        wire.extend_from_slice(&compact_len(self.signatures.len(), "signatures")?);
        for sig in &self.signatures {
            wire.extend_from_slice(sig);
        }
        wire.extend_from_slice(&message_bytes);
        Ok(wire)
    }
}

fn verify_one(message_bytes: &[u8], key: &Pubkey, sig: &[u8; 64]) -> Result<(), TxError> {
    let verifying_key = VerifyingKey::from_bytes(key.as_bytes())
        .map_err(|e| TxError::SigningError(format!("{key}: {e}")))?;
    verifying_key
        .verify(message_bytes, &Signature::from_bytes(sig))
        .map_err(|_| TxError::SigningError(format!("bad signature for {key}")))
}
