//! In-memory mirror of the board account.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use sol_tx::Pubkey;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::PortalError;
use crate::program::ProgramClient;
use crate::types::{BoardState, FetchOutcome};

/// Board state as last read from the ledger.
///
/// Refreshes may overlap. Each one draws a sequence token when its fetch
/// completes, and a result is applied only if its token is not behind the
/// last applied one, so the cache always ends up holding the read that
/// finished last. `clear` starts a new generation; reads begun in an earlier
/// generation are never applied.
pub struct BoardStateCache {
    program: Arc<ProgramClient>,
    board_address: Pubkey,
    completions: AtomicU64,
    applied: Mutex<Applied>,
    state: watch::Sender<Option<BoardState>>,
}

#[derive(Debug, Default)]
struct Applied {
    generation: u64,
    token: u64,
}

impl BoardStateCache {
    pub fn new(program: Arc<ProgramClient>, board_address: Pubkey) -> Self {
        let (state, _) = watch::channel(None);
        Self {
            program,
            board_address,
            completions: AtomicU64::new(0),
            applied: Mutex::new(Applied::default()),
            state,
        }
    }

    pub fn board_address(&self) -> Pubkey {
        self.board_address
    }

    /// Current board state; `None` until the first successful refresh, after
    /// a decode failure, or after `clear`.
    pub fn state(&self) -> Option<BoardState> {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<BoardState>> {
        self.state.subscribe()
    }

    /// Fetch and decode the board account, then update the cache.
    ///
    /// Transport failures leave the cache untouched.
    pub async fn refresh(&self) -> Result<BoardState, PortalError> {
        let generation = self.lock_applied().generation;
        let raw = self
            .program
            .connection()
            .fetch_account(&self.board_address)
            .await
            .map_err(|e| {
                warn!(error = %e, "board fetch failed");
                PortalError::NetworkFailure(e.to_string())
            })?;
        let token = self.completions.fetch_add(1, Ordering::SeqCst) + 1;

        let outcome = match raw {
            None => FetchOutcome::Uninitialized,
            Some(bytes) => match self.program.decode_board(&bytes) {
                Ok(entries) => FetchOutcome::Decoded(entries),
                Err(e) => FetchOutcome::DecodeFailed(e),
            },
        };
        self.apply(generation, token, outcome)
    }

    fn lock_applied(&self) -> std::sync::MutexGuard<'_, Applied> {
        self.applied.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn apply(
        &self,
        generation: u64,
        token: u64,
        outcome: FetchOutcome,
    ) -> Result<BoardState, PortalError> {
        let (next, result) = match outcome {
            FetchOutcome::Uninitialized => (
                Some(BoardState::Uninitialized),
                Ok(BoardState::Uninitialized),
            ),
            FetchOutcome::Decoded(entries) => {
                let board = BoardState::Ready(entries);
                (Some(board.clone()), Ok(board))
            }
            FetchOutcome::DecodeFailed(e) => (None, Err(e)),
        };

        let mut applied = self.lock_applied();
        if generation != applied.generation {
            debug!(token, "discarding board refresh started before clear");
            return result;
        }
        if token < applied.token {
            debug!(token, applied = applied.token, "discarding stale board refresh");
            return result;
        }
        applied.token = token;
        match &next {
            Some(BoardState::Ready(entries)) => {
                info!(token, entries = entries.len(), "board refreshed")
            }
            Some(BoardState::Uninitialized) => info!(token, "board account not initialized"),
            None => warn!(token, "board account could not be decoded, cache cleared"),
        }
        self.state.send_replace(next);
        result
    }

    /// Drop the cached state, e.g. when the session ends. Refreshes already
    /// in flight are not applied.
    pub fn clear(&self) {
        let mut applied = self.lock_applied();
        applied.generation += 1;
        self.state.send_replace(None);
    }
}

impl std::fmt::Debug for BoardStateCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoardStateCache")
            .field("board_address", &self.board_address)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
