use serde::{Deserialize, Serialize};
use sol_tx::Pubkey;

use crate::error::PortalError;

/// One shared GIF on the board.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GifEntry {
    pub link: String,
    pub author: Pubkey,
    pub upvotes: u64,
}

/// Mirror of the board account.
///
/// `Uninitialized` means the account does not exist on-chain yet, which is
/// not the same thing as an initialized board with no entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BoardState {
    Uninitialized,
    Ready(Vec<GifEntry>),
}

impl BoardState {
    pub fn entries(&self) -> &[GifEntry] {
        match self {
            BoardState::Uninitialized => &[],
            BoardState::Ready(entries) => entries,
        }
    }

    pub fn is_initialized(&self) -> bool {
        matches!(self, BoardState::Ready(_))
    }
}

/// Result of fetching and decoding the board account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum FetchOutcome {
    Uninitialized,
    Decoded(Vec<GifEntry>),
    DecodeFailed(PortalError),
}

/// Snapshot of what the presentation layer renders from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    pub identity: Option<Pubkey>,
    pub board: Option<BoardState>,
}

/// The four state-mutating requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    InitializeBoard,
    AddGif,
    UpvoteGif,
    SendSol,
}

impl Operation {
    /// Instruction name in the IDL.
    pub fn instruction(&self) -> &'static str {
        match self {
            Operation::InitializeBoard => "initialize",
            Operation::AddGif => "addGif",
            Operation::UpvoteGif => "upvoteGif",
            Operation::SendSol => "sendSol",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.instruction())
    }
}
