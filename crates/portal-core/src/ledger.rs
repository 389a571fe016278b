//! Ledger transport: the RPC capability and the connection that wraps it.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use sol_tx::{Pubkey, Transaction};
use thiserror::Error;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

use crate::config::{Commitment, PortalConfig};

/// Identifies a submitted transaction (its first signature, Base58).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TxHandle(pub String);

impl fmt::Display for TxHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Why the ledger refused or failed a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxFailure {
    /// An instruction failed; `code` is set for program-defined errors.
    Instruction {
        index: u8,
        code: Option<u32>,
        detail: String,
    },
    InsufficientFundsForFee,
    AccountInUse,
    BlockhashNotFound,
    Other(String),
}

impl TxFailure {
    /// Parse the `err` value of a signature status or a preflight failure,
    /// e.g. `{"InstructionError":[0,{"Custom":6000}]}` or
    /// `"InsufficientFundsForFee"`.
    pub fn from_rpc_value(value: &Value) -> Self {
        match value {
            Value::String(s) => match s.as_str() {
                "InsufficientFundsForFee" => TxFailure::InsufficientFundsForFee,
                "AccountInUse" => TxFailure::AccountInUse,
                "BlockhashNotFound" => TxFailure::BlockhashNotFound,
                other => TxFailure::Other(other.to_string()),
            },
            Value::Object(map) => match map.get("InstructionError").and_then(Value::as_array) {
                Some(parts) if parts.len() == 2 => {
                    let index = parts[0]
                        .as_u64()
                        .and_then(|i| u8::try_from(i).ok())
                        .unwrap_or(u8::MAX);
                    let code = parts[1]
                        .get("Custom")
                        .and_then(Value::as_u64)
                        .and_then(|c| u32::try_from(c).ok());
                    TxFailure::Instruction {
                        index,
                        code,
                        detail: parts[1].to_string(),
                    }
                }
                _ => TxFailure::Other(value.to_string()),
            },
            other => TxFailure::Other(other.to_string()),
        }
    }
}

impl fmt::Display for TxFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TxFailure::Instruction { index, detail, .. } => {
                write!(f, "instruction {index} failed: {detail}")
            }
            TxFailure::InsufficientFundsForFee => f.write_str("insufficient funds for fee"),
            TxFailure::AccountInUse => f.write_str("account in use"),
            TxFailure::BlockhashNotFound => f.write_str("blockhash not found"),
            TxFailure::Other(s) => f.write_str(s),
        }
    }
}

/// Status of a submitted transaction as last seen by the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureStatus {
    pub commitment: Commitment,
    pub err: Option<TxFailure>,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("not confirmed within {0:?}")]
    Timeout(Duration),

    #[error("rejected by ledger: {0}")]
    Rejected(TxFailure),
}

/// Raw ledger RPC, as consumed by the client.
#[async_trait]
pub trait LedgerRpc: Send + Sync {
    async fn latest_blockhash(&self, commitment: Commitment) -> Result<[u8; 32], LedgerError>;

    async fn send_transaction(
        &self,
        tx: &Transaction,
        commitment: Commitment,
    ) -> Result<TxHandle, LedgerError>;

    /// `None` when the ledger has not seen the transaction (yet).
    async fn signature_status(
        &self,
        handle: &TxHandle,
    ) -> Result<Option<SignatureStatus>, LedgerError>;

    /// `None` when the account does not exist.
    async fn account_data(
        &self,
        address: &Pubkey,
        commitment: Commitment,
    ) -> Result<Option<Vec<u8>>, LedgerError>;
}

/// Endpoint plus commitment level used for every read and write.
#[derive(Clone)]
pub struct LedgerConnection {
    rpc: Arc<dyn LedgerRpc>,
    commitment: Commitment,
    confirm_timeout: Duration,
    poll_interval: Duration,
}

impl LedgerConnection {
    pub fn new(rpc: Arc<dyn LedgerRpc>, commitment: Commitment) -> Self {
        let defaults = PortalConfig::default();
        Self {
            rpc,
            commitment,
            confirm_timeout: defaults.confirm_timeout(),
            poll_interval: defaults.poll_interval(),
        }
    }

    pub fn from_config(rpc: Arc<dyn LedgerRpc>, config: &PortalConfig) -> Self {
        Self::new(rpc, config.commitment)
            .with_confirm_timing(config.confirm_timeout(), config.poll_interval())
    }

    pub fn with_confirm_timing(mut self, timeout: Duration, poll_interval: Duration) -> Self {
        self.confirm_timeout = timeout;
        self.poll_interval = poll_interval;
        self
    }

    pub fn commitment(&self) -> Commitment {
        self.commitment
    }

    pub async fn latest_blockhash(&self) -> Result<[u8; 32], LedgerError> {
        self.rpc.latest_blockhash(self.commitment).await
    }

    pub async fn submit(&self, tx: &Transaction) -> Result<TxHandle, LedgerError> {
        let handle = self.rpc.send_transaction(tx, self.commitment).await?;
        debug!(signature = %handle, "transaction submitted");
        Ok(handle)
    }

    /// Poll until the transaction reaches this connection's commitment, the
    /// ledger reports it failed, or the timeout passes.
    pub async fn confirm(&self, handle: &TxHandle) -> Result<(), LedgerError> {
        let deadline = Instant::now() + self.confirm_timeout;
        loop {
            if let Some(status) = self.rpc.signature_status(handle).await? {
                if let Some(failure) = status.err {
                    return Err(LedgerError::Rejected(failure));
                }
                if status.commitment >= self.commitment {
                    debug!(signature = %handle, commitment = %status.commitment, "transaction confirmed");
                    return Ok(());
                }
            }
            if Instant::now() >= deadline {
                warn!(signature = %handle, timeout = ?self.confirm_timeout, "confirmation timed out");
                return Err(LedgerError::Timeout(self.confirm_timeout));
            }
            sleep(self.poll_interval).await;
        }
    }

    /// Raw account bytes, or `None` if the account does not exist.
    pub async fn fetch_account(&self, address: &Pubkey) -> Result<Option<Vec<u8>>, LedgerError> {
        self.rpc.account_data(address, self.commitment).await
    }
}

impl fmt::Debug for LedgerConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LedgerConnection")
            .field("commitment", &self.commitment)
            .field("confirm_timeout", &self.confirm_timeout)
            .field("poll_interval", &self.poll_interval)
            .finish_non_exhaustive()
    }
}
