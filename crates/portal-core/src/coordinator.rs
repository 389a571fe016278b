//! Build, sign, submit and confirm the four board mutations.

use std::fmt;
use std::sync::Arc;

use sol_tx::{Instruction, Keypair, Message, Pubkey, Transaction, SYSTEM_PROGRAM_ID};
use tracing::{debug, info, warn};

use crate::cache::BoardStateCache;
use crate::codec::IdlValue;
use crate::config::Deployment;
use crate::error::PortalError;
use crate::idl::Idl;
use crate::ledger::{LedgerConnection, LedgerError, TxFailure, TxHandle};
use crate::program::ProgramClient;
use crate::types::{BoardState, Operation};

/// Name the program uses for an out-of-range upvote.
const INDEX_OUT_OF_RANGE: &str = "IndexOutOfRange";

/// System program `Custom` codes surfaced through `create_account`/`transfer`.
const SYSTEM_ACCOUNT_ALREADY_IN_USE: u32 = 0;
const SYSTEM_RESULT_WITH_NEGATIVE_LAMPORTS: u32 = 1;

/// Where a single submission currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxPhase {
    Building,
    Signing,
    Submitted,
    Confirming,
    Confirmed,
    Failed,
}

impl TxPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TxPhase::Confirmed | TxPhase::Failed)
    }

    /// Allowed moves: forward one step, or to `Failed` from any
    /// non-terminal phase.
    pub fn can_advance_to(&self, next: TxPhase) -> bool {
        use TxPhase::*;
        match (self, next) {
            (from, Failed) => !from.is_terminal(),
            (Building, Signing)
            | (Signing, Submitted)
            | (Submitted, Confirming)
            | (Confirming, Confirmed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for TxPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TxPhase::Building => "building",
            TxPhase::Signing => "signing",
            TxPhase::Submitted => "submitted",
            TxPhase::Confirming => "confirming",
            TxPhase::Confirmed => "confirmed",
            TxPhase::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Tracks and logs one invocation's phase transitions.
#[derive(Debug)]
struct PhaseTracker {
    operation: Operation,
    phase: TxPhase,
    history: Vec<TxPhase>,
}

impl PhaseTracker {
    fn start(operation: Operation) -> Self {
        debug!(%operation, phase = %TxPhase::Building, "transaction started");
        Self {
            operation,
            phase: TxPhase::Building,
            history: vec![TxPhase::Building],
        }
    }

    fn advance(&mut self, next: TxPhase) {
        if !self.phase.can_advance_to(next) {
            warn!(operation = %self.operation, from = %self.phase, to = %next, "unexpected phase transition");
        }
        debug!(operation = %self.operation, from = %self.phase, to = %next, "phase transition");
        self.phase = next;
        self.history.push(next);
    }

    fn fail(&mut self, error: PortalError) -> PortalError {
        warn!(operation = %self.operation, phase = %self.phase, path = ?self.history, error = %error, "transaction failed");
        self.advance(TxPhase::Failed);
        error
    }
}

/// Outcome of a confirmed mutation.
///
/// The refresh that follows confirmation can fail on its own; that failure
/// is reported in `board` and does not undo the confirmed transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxReceipt {
    pub operation: Operation,
    pub signature: TxHandle,
    pub board: Result<BoardState, PortalError>,
}

/// Map a ledger failure of `operation` onto the portal's error taxonomy.
///
/// System program codes only mean something for the operations that go
/// through the system program: account creation in `initialize` and the
/// transfer in `sendSol`.
pub fn classify(error: &LedgerError, idl: &Idl, operation: Operation) -> PortalError {
    let creates_account = operation == Operation::InitializeBoard;
    let uses_system_program = creates_account || operation == Operation::SendSol;
    match error {
        LedgerError::Transport(msg) => PortalError::NetworkFailure(msg.clone()),
        LedgerError::Timeout(_) => PortalError::NetworkFailure(error.to_string()),
        LedgerError::Rejected(failure) => match failure {
            TxFailure::InsufficientFundsForFee => PortalError::InsufficientFunds,
            TxFailure::AccountInUse if creates_account => PortalError::AlreadyInitialized,
            TxFailure::Instruction {
                code: Some(code), ..
            } => match idl.error(*code) {
                Some(e) if e.name == INDEX_OUT_OF_RANGE => PortalError::IndexOutOfRange,
                Some(e) => PortalError::Unknown(format!(
                    "{} ({}): {}",
                    e.name,
                    e.code,
                    e.msg.as_deref().unwrap_or("program error")
                )),
                None if creates_account && *code == SYSTEM_ACCOUNT_ALREADY_IN_USE => {
                    PortalError::AlreadyInitialized
                }
                None if uses_system_program && *code == SYSTEM_RESULT_WITH_NEGATIVE_LAMPORTS => {
                    PortalError::InsufficientFunds
                }
                None => PortalError::Unknown(failure.to_string()),
            },
            other => PortalError::Unknown(other.to_string()),
        },
    }
}

/// Submit a signed transaction and wait for confirmation. The tracker is
/// `Submitted` before the ledger sees anything, so a refused submission
/// fails out of that phase.
async fn submit_and_confirm(
    tracker: &mut PhaseTracker,
    connection: &LedgerConnection,
    idl: &Idl,
    tx: &Transaction,
) -> Result<TxHandle, PortalError> {
    let operation = tracker.operation;
    tracker.advance(TxPhase::Submitted);
    let handle = match connection.submit(tx).await {
        Ok(handle) => handle,
        Err(e) => return Err(tracker.fail(classify(&e, idl, operation))),
    };

    tracker.advance(TxPhase::Confirming);
    if let Err(e) = connection.confirm(&handle).await {
        return Err(tracker.fail(classify(&e, idl, operation)));
    }
    tracker.advance(TxPhase::Confirmed);
    Ok(handle)
}

/// Runs mutations against the board on behalf of the connected wallet.
#[derive(Debug)]
pub struct TransactionCoordinator {
    program: Arc<ProgramClient>,
    cache: Arc<BoardStateCache>,
    deployment: Arc<Deployment>,
    tip_lamports: u64,
}

impl TransactionCoordinator {
    pub fn new(
        program: Arc<ProgramClient>,
        cache: Arc<BoardStateCache>,
        deployment: Arc<Deployment>,
        tip_lamports: u64,
    ) -> Self {
        Self {
            program,
            cache,
            deployment,
            tip_lamports,
        }
    }

    fn caller(&self) -> Result<Pubkey, PortalError> {
        self.program
            .wallet()
            .identity()
            .ok_or(PortalError::SigningUnavailable)
    }

    /// Create the board account. The base keypair co-signs as the new
    /// account; the caller pays.
    pub async fn initialize_board(&self) -> Result<TxReceipt, PortalError> {
        let user = self.caller()?;
        let ix = self.program.encode_call(
            Operation::InitializeBoard.instruction(),
            &[],
            &[
                ("baseAccount", self.deployment.board_address()),
                ("user", user),
                ("systemProgram", SYSTEM_PROGRAM_ID),
            ],
        )?;
        self.execute(
            Operation::InitializeBoard,
            user,
            ix,
            Some(self.deployment.base_account()),
        )
        .await
    }

    /// Append a GIF attributed to the caller.
    pub async fn add_gif(&self, link: &str) -> Result<TxReceipt, PortalError> {
        if link.trim().is_empty() {
            return Err(PortalError::InvalidInput("GIF link is empty".into()));
        }
        let user = self.caller()?;
        let ix = self.program.encode_call(
            Operation::AddGif.instruction(),
            &[
                IdlValue::String(link.to_string()),
                IdlValue::PublicKey(user),
            ],
            &[("baseAccount", self.deployment.board_address())],
        )?;
        self.execute(Operation::AddGif, user, ix, None).await
    }

    /// Upvote the entry at `index`. Bounds are checked by the program.
    pub async fn upvote_gif(&self, index: u64) -> Result<TxReceipt, PortalError> {
        let user = self.caller()?;
        let ix = self.program.encode_call(
            Operation::UpvoteGif.instruction(),
            &[IdlValue::U64(index)],
            &[("baseAccount", self.deployment.board_address())],
        )?;
        self.execute(Operation::UpvoteGif, user, ix, None).await
    }

    /// Send the configured tip from the caller to `recipient`.
    pub async fn send_sol(&self, recipient: Pubkey) -> Result<TxReceipt, PortalError> {
        let user = self.caller()?;
        let ix = self.program.encode_call(
            Operation::SendSol.instruction(),
            &[IdlValue::U64(self.tip_lamports)],
            &[
                ("from", user),
                ("to", recipient),
                ("systemProgram", SYSTEM_PROGRAM_ID),
            ],
        )?;
        self.execute(Operation::SendSol, user, ix, None).await
    }

    async fn execute(
        &self,
        operation: Operation,
        payer: Pubkey,
        ix: Instruction,
        co_signer: Option<&Keypair>,
    ) -> Result<TxReceipt, PortalError> {
        let mut tracker = PhaseTracker::start(operation);
        let connection = self.program.connection();
        let idl = self.program.idl();

        let blockhash = match connection.latest_blockhash().await {
            Ok(hash) => hash,
            Err(e) => return Err(tracker.fail(classify(&e, idl, operation))),
        };
        let mut tx = match Message::compile(&[ix], &payer, blockhash) {
            Ok(message) => Transaction::new_unsigned(message),
            Err(e) => return Err(tracker.fail(e.into())),
        };
        if let Some(keypair) = co_signer {
            if let Err(e) = tx.partial_sign(keypair) {
                return Err(tracker.fail(e.into()));
            }
        }

        tracker.advance(TxPhase::Signing);
        let tx = match self.program.wallet().sign(tx).await {
            Ok(signed) => signed,
            Err(e) => return Err(tracker.fail(e)),
        };

        let handle = submit_and_confirm(&mut tracker, connection, idl, &tx).await?;
        info!(%operation, signature = %handle, "transaction confirmed");

        let board = self.cache.refresh().await;
        if let Err(e) = &board {
            warn!(%operation, error = %e, "refresh after confirmation failed");
        }
        Ok(TxReceipt {
            operation,
            signature: handle,
            board,
        })
    }
}
