//! Wallet session: who is connected, and how transactions get signed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use sol_tx::{Keypair, Pubkey, Transaction};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::PortalError;

/// An external signer, such as a browser wallet extension.
#[async_trait]
pub trait WalletExtension: Send + Sync {
    fn is_available(&self) -> bool;

    /// Whether the user has previously approved this client.
    fn is_trusted(&self) -> bool;

    /// Connect, optionally prompting the user for approval.
    async fn connect(&self, prompt_user: bool) -> Result<Pubkey, PortalError>;

    /// Add the wallet's signature to `tx`.
    async fn sign_transaction(&self, tx: Transaction) -> Result<Transaction, PortalError>;

    async fn disconnect(&self) {}
}

/// The connected signer's identity and lifecycle.
///
/// Identity is only ever set by a successful `connect` or `try_restore`.
pub struct WalletSession {
    extension: Option<Arc<dyn WalletExtension>>,
    identity: watch::Sender<Option<Pubkey>>,
}

impl WalletSession {
    pub fn new(extension: Option<Arc<dyn WalletExtension>>) -> Self {
        let (identity, _) = watch::channel(None);
        Self {
            extension,
            identity,
        }
    }

    fn available_extension(&self) -> Result<&Arc<dyn WalletExtension>, PortalError> {
        self.extension
            .as_ref()
            .filter(|ext| ext.is_available())
            .ok_or(PortalError::NoWalletFound)
    }

    /// Reconnect without prompting, if the wallet already trusts us.
    pub async fn try_restore(&self) -> Result<Pubkey, PortalError> {
        let ext = self.available_extension()?;
        if !ext.is_trusted() {
            debug!("wallet present but not trusted, skipping silent connect");
            return Err(PortalError::NotTrusted);
        }
        let identity = ext.connect(false).await?;
        info!(wallet = %identity, "wallet session restored");
        self.identity.send_replace(Some(identity));
        Ok(identity)
    }

    /// Ask the user to connect.
    pub async fn connect(&self) -> Result<Pubkey, PortalError> {
        let ext = self.available_extension()?;
        let identity = ext.connect(true).await.map_err(|e| {
            warn!(error = %e, "wallet connect failed");
            e
        })?;
        info!(wallet = %identity, "wallet connected");
        self.identity.send_replace(Some(identity));
        Ok(identity)
    }

    pub async fn disconnect(&self) {
        if let Some(ext) = &self.extension {
            ext.disconnect().await;
        }
        if self.identity.send_replace(None).is_some() {
            info!("wallet disconnected");
        }
    }

    pub fn identity(&self) -> Option<Pubkey> {
        *self.identity.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Pubkey>> {
        self.identity.subscribe()
    }

    /// Have the connected wallet sign `tx`.
    ///
    /// The wallet must hand back the same message with a valid signature
    /// from the session identity.
    pub async fn sign(&self, tx: Transaction) -> Result<Transaction, PortalError> {
        let identity = self.identity().ok_or(PortalError::SigningUnavailable)?;
        let ext = self
            .extension
            .as_ref()
            .ok_or(PortalError::SigningUnavailable)?;
        let message = tx.message.clone();
        let signed = ext.sign_transaction(tx).await?;
        if signed.message != message {
            warn!(wallet = %identity, "wallet altered the transaction message");
            return Err(PortalError::Unknown(
                "wallet returned a different transaction message".into(),
            ));
        }
        if signed.signatures.len() != message.signer_keys().len() {
            return Err(PortalError::Unknown(format!(
                "wallet returned {} signatures for {} signers",
                signed.signatures.len(),
                message.signer_keys().len()
            )));
        }
        signed.verify_signer(&identity).map_err(|e| {
            PortalError::Unknown(format!("wallet signature from {identity} is invalid: {e}"))
        })?;
        Ok(signed)
    }
}

impl std::fmt::Debug for WalletSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalletSession")
            .field("has_extension", &self.extension.is_some())
            .field("identity", &self.identity())
            .finish()
    }
}

/// A wallet backed by a local keypair.
///
/// It behaves like an extension that has to be approved once: silent
/// reconnects are refused until the first explicit `connect`, unless it was
/// created as already trusted.
#[derive(Debug)]
pub struct KeypairWallet {
    keypair: Keypair,
    trusted: AtomicBool,
}

impl KeypairWallet {
    pub fn new(keypair: Keypair, trusted: bool) -> Self {
        Self {
            keypair,
            trusted: AtomicBool::new(trusted),
        }
    }

    pub fn pubkey(&self) -> Pubkey {
        self.keypair.pubkey()
    }
}

#[async_trait]
impl WalletExtension for KeypairWallet {
    fn is_available(&self) -> bool {
        true
    }

    fn is_trusted(&self) -> bool {
        self.trusted.load(Ordering::SeqCst)
    }

    async fn connect(&self, prompt_user: bool) -> Result<Pubkey, PortalError> {
        if !prompt_user && !self.is_trusted() {
            return Err(PortalError::NotTrusted);
        }
        self.trusted.store(true, Ordering::SeqCst);
        Ok(self.keypair.pubkey())
    }

    async fn sign_transaction(&self, mut tx: Transaction) -> Result<Transaction, PortalError> {
        tx.partial_sign(&self.keypair)?;
        Ok(tx)
    }
}
