use thiserror::Error;

/// Every failure the portal core reports to its caller.
///
/// The core classifies failures; wording shown to users is up to the
/// presentation layer. Nothing here is retried automatically.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PortalError {
    #[error("no wallet extension found")]
    NoWalletFound,

    #[error("wallet has not trusted this client yet")]
    NotTrusted,

    #[error("no connected wallet to sign with")]
    SigningUnavailable,

    #[error("request rejected by the user")]
    UserRejected,

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("encoding error: {0}")]
    Encoding(String),

    #[error("decoding error: {0}")]
    Decoding(String),

    #[error("no GIF at the requested index")]
    IndexOutOfRange,

    #[error("insufficient funds")]
    InsufficientFunds,

    #[error("board account already initialized")]
    AlreadyInitialized,

    #[error("network failure: {0}")]
    NetworkFailure(String),

    #[error("transaction failed: {0}")]
    Unknown(String),

    #[error("configuration error: {0}")]
    Config(String),
}

/// Coarse classification of [`PortalError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    WalletUnavailable,
    UserRejected,
    InvalidInput,
    EncodingError,
    DecodingError,
    IndexOutOfRange,
    InsufficientFunds,
    AlreadyInitialized,
    NetworkFailure,
    Unknown,
    Configuration,
}

impl PortalError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PortalError::NoWalletFound
            | PortalError::NotTrusted
            | PortalError::SigningUnavailable => ErrorKind::WalletUnavailable,
            PortalError::UserRejected => ErrorKind::UserRejected,
            PortalError::InvalidInput(_) => ErrorKind::InvalidInput,
            PortalError::Encoding(_) => ErrorKind::EncodingError,
            PortalError::Decoding(_) => ErrorKind::DecodingError,
            PortalError::IndexOutOfRange => ErrorKind::IndexOutOfRange,
            PortalError::InsufficientFunds => ErrorKind::InsufficientFunds,
            PortalError::AlreadyInitialized => ErrorKind::AlreadyInitialized,
            PortalError::NetworkFailure(_) => ErrorKind::NetworkFailure,
            PortalError::Unknown(_) => ErrorKind::Unknown,
            PortalError::Config(_) => ErrorKind::Configuration,
        }
    }
}

impl From<sol_tx::TxError> for PortalError {
    fn from(e: sol_tx::TxError) -> Self {
        PortalError::Encoding(format!("SOL: {e}"))
    }
}
