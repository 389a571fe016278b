use thiserror::Error;

/// Wire-format and signing errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TxError {
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("invalid keypair: {0}")]
    InvalidKeypair(String),

    #[error("transaction build error: {0}")]
    TransactionBuildError(String),

    #[error("signing error: {0}")]
    SigningError(String),

    #[error("serialization error: {0}")]
    SerializationError(String),
}
