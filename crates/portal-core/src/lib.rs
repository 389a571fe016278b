//! Client core for the GIF portal program: wallet session, ledger
//! connection, IDL-driven program client, board cache and transaction
//! coordinator.

pub mod cache;
pub mod codec;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod idl;
pub mod ledger;
pub mod portal;
pub mod program;
pub mod rpc;
pub mod types;
pub mod wallet;

pub use cache::BoardStateCache;
pub use codec::IdlValue;
pub use config::{load_keypair_file, Commitment, Deployment, PortalConfig};
pub use coordinator::{classify, TransactionCoordinator, TxPhase, TxReceipt};
pub use error::{ErrorKind, PortalError};
pub use idl::Idl;
pub use ledger::{LedgerConnection, LedgerError, LedgerRpc, SignatureStatus, TxFailure, TxHandle};
pub use portal::GifPortal;
pub use program::{decode_board, encode_board, ProgramClient};
pub use rpc::HttpLedgerRpc;
pub use types::{BoardState, GifEntry, Operation, Session};
pub use wallet::{KeypairWallet, WalletExtension, WalletSession};
