#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use portal_core::codec::decode_value;
use portal_core::idl::instruction_discriminator;
use portal_core::{
    encode_board, Commitment, Deployment, GifEntry, GifPortal, Idl, IdlValue, LedgerConnection,
    LedgerError, LedgerRpc, PortalError, SignatureStatus, TxFailure, TxHandle, WalletExtension,
};
use sol_tx::{Keypair, Pubkey, Transaction};

pub const BOARD_SPACE: usize = 9000;
pub const PROGRAM_ID: Pubkey = Pubkey::new([0x42; 32]);

pub fn idl() -> Idl {
    Idl::from_json(include_str!("../../idl/gif_portal.json")).unwrap()
}

pub fn random_keypair() -> Keypair {
    Keypair::generate(&mut rand::rngs::OsRng)
}

#[derive(Default)]
struct Chain {
    board: Option<Vec<GifEntry>>,
    balances: HashMap<Pubkey, u64>,
    statuses: HashMap<String, SignatureStatus>,
}

/// In-memory ledger running the GIF program's rules.
///
/// Transactions execute on submission; their outcome shows up in the
/// signature status, so failures surface while confirming.
pub struct SimulatedLedger {
    idl: Idl,
    board_address: Pubkey,
    chain: Mutex<Chain>,
    pub calls: AtomicUsize,
    pub submissions: AtomicUsize,
    pub never_confirm: AtomicBool,
    pub fetch_offline: AtomicBool,
    pub corrupt_board: AtomicBool,
}

impl SimulatedLedger {
    pub fn new(board_address: Pubkey) -> Self {
        Self {
            idl: idl(),
            board_address,
            chain: Mutex::new(Chain::default()),
            calls: AtomicUsize::new(0),
            submissions: AtomicUsize::new(0),
            never_confirm: AtomicBool::new(false),
            fetch_offline: AtomicBool::new(false),
            corrupt_board: AtomicBool::new(false),
        }
    }

    pub fn fund(&self, account: Pubkey, lamports: u64) {
        self.chain.lock().unwrap().balances.insert(account, lamports);
    }

    pub fn balance(&self, account: &Pubkey) -> u64 {
        self.chain
            .lock()
            .unwrap()
            .balances
            .get(account)
            .copied()
            .unwrap_or(0)
    }

    pub fn seed_board(&self, entries: Vec<GifEntry>) {
        self.chain.lock().unwrap().board = Some(entries);
    }

    pub fn board(&self) -> Option<Vec<GifEntry>> {
        self.chain.lock().unwrap().board.clone()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn submissions(&self) -> usize {
        self.submissions.load(Ordering::SeqCst)
    }

    fn execute(&self, tx: &Transaction) -> Result<(), TxFailure> {
        let message = &tx.message;
        let mut chain = self.chain.lock().unwrap();
        for (index, ix) in message.instructions.iter().enumerate() {
            let index = index as u8;
            let fail = |code: u32| TxFailure::Instruction {
                index,
                code: Some(code),
                detail: format!(r#"{{"Custom":{code}}}"#),
            };
            if message.program_id(ix) != Some(&PROGRAM_ID) {
                return Err(TxFailure::Other("unsupported program".into()));
            }
            let accounts = message.instruction_accounts(ix);
            let (name, args) = self.decode(&ix.data).ok_or_else(|| fail(101))?;

            match name.as_str() {
                "initialize" => {
                    if accounts.first() != Some(&self.board_address) {
                        return Err(fail(2006));
                    }
                    if chain.board.is_some() {
                        return Err(fail(0));
                    }
                    chain.board = Some(Vec::new());
                }
                "addGif" => {
                    let board = chain.board.as_mut().ok_or_else(|| fail(3012))?;
                    match (&args[0], &args[1]) {
                        (IdlValue::String(link), IdlValue::PublicKey(author)) => {
                            board.push(GifEntry {
                                link: link.clone(),
                                author: *author,
                                upvotes: 0,
                            })
                        }
                        _ => return Err(fail(102)),
                    }
                }
                "upvoteGif" => {
                    let board = chain.board.as_mut().ok_or_else(|| fail(3012))?;
                    let index = match args[0] {
                        IdlValue::U64(i) => i as usize,
                        _ => return Err(fail(102)),
                    };
                    let entry = board.get_mut(index).ok_or_else(|| fail(6000))?;
                    entry.upvotes += 1;
                }
                "sendSol" => {
                    let amount = match args[0] {
                        IdlValue::U64(a) => a,
                        _ => return Err(fail(102)),
                    };
                    let (from, to) = (accounts[0], accounts[1]);
                    let available = chain.balances.get(&from).copied().unwrap_or(0);
                    if available < amount {
                        return Err(fail(1));
                    }
                    chain.balances.insert(from, available - amount);
                    *chain.balances.entry(to).or_insert(0) += amount;
                }
                _ => return Err(fail(101)),
            }
        }
        Ok(())
    }

    fn decode(&self, data: &[u8]) -> Option<(String, Vec<IdlValue>)> {
        let ix = self
            .idl
            .instructions
            .iter()
            .find(|ix| data.len() >= 8 && data[..8] == instruction_discriminator(&ix.name))?;
        let mut rest = &data[8..];
        let args = ix
            .args
            .iter()
            .map(|arg| decode_value(&self.idl, &arg.ty, &mut rest).ok())
            .collect::<Option<Vec<_>>>()?;
        Some((ix.name.clone(), args))
    }
}

#[async_trait]
impl LedgerRpc for SimulatedLedger {
    async fn latest_blockhash(&self, _: Commitment) -> Result<[u8; 32], LedgerError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) as u64;
        let mut blockhash = [7u8; 32];
        blockhash[..8].copy_from_slice(&n.to_le_bytes());
        Ok(blockhash)
    }

    async fn send_transaction(
        &self,
        tx: &Transaction,
        _: Commitment,
    ) -> Result<TxHandle, LedgerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.submissions.fetch_add(1, Ordering::SeqCst);
        tx.verify()
            .map_err(|_| LedgerError::Rejected(TxFailure::Other("SignatureFailure".into())))?;

        let outcome = self.execute(tx);
        let handle = TxHandle(tx.id());
        self.chain.lock().unwrap().statuses.insert(
            handle.0.clone(),
            SignatureStatus {
                commitment: Commitment::Finalized,
                err: outcome.err(),
            },
        );
        Ok(handle)
    }

    async fn signature_status(
        &self,
        handle: &TxHandle,
    ) -> Result<Option<SignatureStatus>, LedgerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.never_confirm.load(Ordering::SeqCst) {
            return Ok(None);
        }
        Ok(self.chain.lock().unwrap().statuses.get(&handle.0).cloned())
    }

    async fn account_data(
        &self,
        address: &Pubkey,
        _: Commitment,
    ) -> Result<Option<Vec<u8>>, LedgerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fetch_offline.load(Ordering::SeqCst) {
            return Err(LedgerError::Transport("connection refused".into()));
        }
        if *address != self.board_address {
            return Ok(None);
        }
        let board = self.chain.lock().unwrap().board.clone();
        match board {
            None => Ok(None),
            Some(_) if self.corrupt_board.load(Ordering::SeqCst) => Ok(Some(vec![0xAB; BOARD_SPACE])),
            Some(entries) => encode_board(&self.idl, &entries, BOARD_SPACE)
                .map(Some)
                .map_err(|e| LedgerError::Transport(e.to_string())),
        }
    }
}

/// Scriptable stand-in for a wallet extension.
pub struct FakeWallet {
    keypair: Keypair,
    pub available: AtomicBool,
    pub trusted: AtomicBool,
    pub reject_connect: AtomicBool,
    pub reject_sign: AtomicBool,
    pub sign_requests: AtomicUsize,
}

impl FakeWallet {
    pub fn new(keypair: Keypair) -> Self {
        Self {
            keypair,
            available: AtomicBool::new(true),
            trusted: AtomicBool::new(false),
            reject_connect: AtomicBool::new(false),
            reject_sign: AtomicBool::new(false),
            sign_requests: AtomicUsize::new(0),
        }
    }

    pub fn pubkey(&self) -> Pubkey {
        self.keypair.pubkey()
    }
}

#[async_trait]
impl WalletExtension for FakeWallet {
    fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    fn is_trusted(&self) -> bool {
        self.trusted.load(Ordering::SeqCst)
    }

    async fn connect(&self, prompt_user: bool) -> Result<Pubkey, PortalError> {
        if !prompt_user && !self.is_trusted() {
            return Err(PortalError::NotTrusted);
        }
        if prompt_user && self.reject_connect.load(Ordering::SeqCst) {
            return Err(PortalError::UserRejected);
        }
        self.trusted.store(true, Ordering::SeqCst);
        Ok(self.keypair.pubkey())
    }

    async fn sign_transaction(&self, mut tx: Transaction) -> Result<Transaction, PortalError> {
        self.sign_requests.fetch_add(1, Ordering::SeqCst);
        if self.reject_sign.load(Ordering::SeqCst) {
            return Err(PortalError::UserRejected);
        }
        tx.partial_sign(&self.keypair)?;
        Ok(tx)
    }
}

pub struct Harness {
    pub portal: GifPortal,
    pub ledger: Arc<SimulatedLedger>,
    pub wallet: Arc<FakeWallet>,
    pub deployment: Arc<Deployment>,
}

pub const TIP: u64 = 5_000;

/// A portal over a fresh simulated deployment with a funded, not yet
/// connected wallet.
pub fn harness() -> Harness {
    let base = random_keypair();
    let deployment = Arc::new(Deployment::new(PROGRAM_ID, base, idl()));
    let ledger = Arc::new(SimulatedLedger::new(deployment.board_address()));
    let wallet = Arc::new(FakeWallet::new(random_keypair()));
    ledger.fund(wallet.pubkey(), 1_000_000_000);

    let connection = LedgerConnection::new(ledger.clone(), Commitment::Processed)
        .with_confirm_timing(Duration::from_millis(100), Duration::from_millis(1));
    let portal = GifPortal::new(
        deployment.clone(),
        connection,
        Some(wallet.clone() as Arc<dyn WalletExtension>),
        TIP,
    );
    Harness {
        portal,
        ledger,
        wallet,
        deployment,
    }
}
