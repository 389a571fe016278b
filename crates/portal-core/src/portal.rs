//! The surface a presentation layer drives.

use std::sync::Arc;

use sol_tx::Pubkey;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::cache::BoardStateCache;
use crate::config::{Deployment, PortalConfig};
use crate::coordinator::{TransactionCoordinator, TxReceipt};
use crate::error::PortalError;
use crate::ledger::{LedgerConnection, LedgerRpc};
use crate::program::ProgramClient;
use crate::types::{BoardState, Session};
use crate::wallet::{WalletExtension, WalletSession};

/// Wallet session, board cache and transaction coordinator wired to one
/// deployment.
#[derive(Debug)]
pub struct GifPortal {
    deployment: Arc<Deployment>,
    program: Arc<ProgramClient>,
    cache: Arc<BoardStateCache>,
    coordinator: TransactionCoordinator,
}

impl GifPortal {
    pub fn new(
        deployment: Arc<Deployment>,
        connection: LedgerConnection,
        extension: Option<Arc<dyn WalletExtension>>,
        tip_lamports: u64,
    ) -> Self {
        let wallet = Arc::new(WalletSession::new(extension));
        let program = Arc::new(ProgramClient::new(
            deployment.program_id(),
            deployment.idl().clone(),
            connection,
            wallet,
        ));
        let cache = Arc::new(BoardStateCache::new(
            program.clone(),
            deployment.board_address(),
        ));
        let coordinator = TransactionCoordinator::new(
            program.clone(),
            cache.clone(),
            deployment.clone(),
            tip_lamports,
        );
        Self {
            deployment,
            program,
            cache,
            coordinator,
        }
    }

    pub fn from_config(
        config: &PortalConfig,
        deployment: Arc<Deployment>,
        rpc: Arc<dyn LedgerRpc>,
        extension: Option<Arc<dyn WalletExtension>>,
    ) -> Self {
        Self::new(
            deployment,
            LedgerConnection::from_config(rpc, config),
            extension,
            config.tip_lamports,
        )
    }

    pub fn deployment(&self) -> &Arc<Deployment> {
        &self.deployment
    }

    pub fn wallet(&self) -> &Arc<WalletSession> {
        self.program.wallet()
    }

    pub fn cache(&self) -> &Arc<BoardStateCache> {
        &self.cache
    }

    /// Silently restore a trusted wallet and, if that works, load the board.
    ///
    /// A missing or untrusted wallet is not an error here; the returned
    /// session simply has no identity. As with `connect`, a failed board load
    /// is logged and the restored identity stands.
    pub async fn start(&self) -> Result<Session, PortalError> {
        match self.wallet().try_restore().await {
            Ok(_) => {
                if let Err(e) = self.cache.refresh().await {
                    warn!(error = %e, "board load after restore failed");
                }
            }
            Err(e @ (PortalError::NoWalletFound | PortalError::NotTrusted)) => {
                info!(reason = %e, "starting without a wallet session");
            }
            Err(e) => return Err(e),
        }
        Ok(self.session())
    }

    /// Prompt the wallet to connect, then load the board.
    ///
    /// A failed board load is logged and leaves the board absent; the
    /// connection itself still stands.
    pub async fn connect(&self) -> Result<Pubkey, PortalError> {
        let identity = self.wallet().connect().await?;
        if let Err(e) = self.cache.refresh().await {
            warn!(error = %e, "board load after connect failed");
        }
        Ok(identity)
    }

    pub async fn disconnect(&self) {
        self.wallet().disconnect().await;
        self.cache.clear();
    }

    pub async fn refresh(&self) -> Result<BoardState, PortalError> {
        self.cache.refresh().await
    }

    pub async fn initialize_board(&self) -> Result<TxReceipt, PortalError> {
        self.coordinator.initialize_board().await
    }

    pub async fn add_gif(&self, link: &str) -> Result<TxReceipt, PortalError> {
        self.coordinator.add_gif(link).await
    }

    pub async fn upvote_gif(&self, index: u64) -> Result<TxReceipt, PortalError> {
        self.coordinator.upvote_gif(index).await
    }

    /// Tip `recipient` the configured amount.
    pub async fn send_sol(&self, recipient: Pubkey) -> Result<TxReceipt, PortalError> {
        self.coordinator.send_sol(recipient).await
    }

    pub fn session(&self) -> Session {
        Session {
            identity: self.wallet().identity(),
            board: self.cache.state(),
        }
    }

    pub fn subscribe_identity(&self) -> watch::Receiver<Option<Pubkey>> {
        self.wallet().subscribe()
    }

    pub fn subscribe_board(&self) -> watch::Receiver<Option<BoardState>> {
        self.cache.subscribe()
    }
}
