mod common;

use std::sync::Arc;

use async_trait::async_trait;
use common::{idl, PROGRAM_ID};
use portal_core::{
    encode_board, BoardState, BoardStateCache, Commitment, GifEntry, LedgerConnection, LedgerError,
    LedgerRpc, ProgramClient, SignatureStatus, TxHandle, WalletSession,
};
use sol_tx::{Pubkey, Transaction};
use tokio::sync::{mpsc, oneshot};

type Reply = oneshot::Sender<Result<Option<Vec<u8>>, LedgerError>>;

/// Holds every account read until the test answers it.
struct GatedLedger {
    requests: mpsc::UnboundedSender<Reply>,
}

#[async_trait]
impl LedgerRpc for GatedLedger {
    async fn latest_blockhash(&self, _: Commitment) -> Result<[u8; 32], LedgerError> {
        Err(LedgerError::Transport("reads only".into()))
    }

    async fn send_transaction(
        &self,
        _: &Transaction,
        _: Commitment,
    ) -> Result<TxHandle, LedgerError> {
        Err(LedgerError::Transport("reads only".into()))
    }

    async fn signature_status(
        &self,
        _: &TxHandle,
    ) -> Result<Option<SignatureStatus>, LedgerError> {
        Err(LedgerError::Transport("reads only".into()))
    }

    async fn account_data(
        &self,
        _: &Pubkey,
        _: Commitment,
    ) -> Result<Option<Vec<u8>>, LedgerError> {
        let (tx, rx) = oneshot::channel();
        self.requests
            .send(tx)
            .map_err(|_| LedgerError::Transport("test gone".into()))?;
        rx.await
            .map_err(|_| LedgerError::Transport("reply dropped".into()))?
    }
}

fn board_with(link: &str) -> Vec<u8> {
    let entries = vec![GifEntry {
        link: link.into(),
        author: Pubkey::new([5u8; 32]),
        upvotes: 0,
    }];
    encode_board(&idl(), &entries, 512).unwrap()
}

fn gated_cache() -> (Arc<BoardStateCache>, mpsc::UnboundedReceiver<Reply>) {
    let (requests, rx) = mpsc::unbounded_channel();
    let connection = LedgerConnection::new(Arc::new(GatedLedger { requests }), Commitment::Processed);
    let program = Arc::new(ProgramClient::new(
        PROGRAM_ID,
        Arc::new(idl()),
        connection,
        Arc::new(WalletSession::new(None)),
    ));
    (
        Arc::new(BoardStateCache::new(program, Pubkey::new([9u8; 32]))),
        rx,
    )
}

fn links(state: Option<BoardState>) -> Vec<String> {
    state
        .map(|s| s.entries().iter().map(|e| e.link.clone()).collect())
        .unwrap_or_default()
}

#[tokio::test]
async fn refresh_finishing_last_wins_even_if_started_first() {
    let (cache, mut requests) = gated_cache();

    let a = tokio::spawn({
        let cache = cache.clone();
        async move { cache.refresh().await }
    });
    let reply_a = requests.recv().await.unwrap();

    let b = tokio::spawn({
        let cache = cache.clone();
        async move { cache.refresh().await }
    });
    let reply_b = requests.recv().await.unwrap();

    reply_b.send(Ok(Some(board_with("b")))).unwrap();
    b.await.unwrap().unwrap();
    assert_eq!(links(cache.state()), vec!["b"]);

    reply_a.send(Ok(Some(board_with("a")))).unwrap();
    a.await.unwrap().unwrap();
    assert_eq!(links(cache.state()), vec!["a"]);
}

#[tokio::test]
async fn refresh_finishing_last_wins_in_start_order() {
    let (cache, mut requests) = gated_cache();

    let a = tokio::spawn({
        let cache = cache.clone();
        async move { cache.refresh().await }
    });
    let reply_a = requests.recv().await.unwrap();
    let b = tokio::spawn({
        let cache = cache.clone();
        async move { cache.refresh().await }
    });
    let reply_b = requests.recv().await.unwrap();

    reply_a.send(Ok(Some(board_with("a")))).unwrap();
    a.await.unwrap().unwrap();
    reply_b.send(Ok(None)).unwrap();
    b.await.unwrap().unwrap();

    assert_eq!(cache.state(), Some(BoardState::Uninitialized));
}

#[tokio::test]
async fn failed_refresh_does_not_disturb_a_later_one() {
    let (cache, mut requests) = gated_cache();

    let a = tokio::spawn({
        let cache = cache.clone();
        async move { cache.refresh().await }
    });
    let reply_a = requests.recv().await.unwrap();
    let b = tokio::spawn({
        let cache = cache.clone();
        async move { cache.refresh().await }
    });
    let reply_b = requests.recv().await.unwrap();

    reply_b.send(Ok(Some(board_with("b")))).unwrap();
    b.await.unwrap().unwrap();
    reply_a
        .send(Err(LedgerError::Transport("reset".into())))
        .unwrap();
    assert!(a.await.unwrap().is_err());

    assert_eq!(links(cache.state()), vec!["b"]);
}

#[tokio::test]
async fn clear_drops_the_board() {
    let (cache, mut requests) = gated_cache();
    let mut watch = cache.subscribe();

    let a = tokio::spawn({
        let cache = cache.clone();
        async move { cache.refresh().await }
    });
    requests
        .recv()
        .await
        .unwrap()
        .send(Ok(Some(board_with("a"))))
        .unwrap();
    a.await.unwrap().unwrap();
    watch.changed().await.unwrap();

    cache.clear();
    watch.changed().await.unwrap();
    assert_eq!(*watch.borrow(), None);
    assert_eq!(cache.state(), None);
}

#[tokio::test]
async fn clear_discards_refresh_in_flight() {
    let (cache, mut requests) = gated_cache();

    let stale = tokio::spawn({
        let cache = cache.clone();
        async move { cache.refresh().await }
    });
    let reply = requests.recv().await.unwrap();

    cache.clear();
    reply.send(Ok(Some(board_with("stale")))).unwrap();
    stale.await.unwrap().unwrap();
    assert_eq!(cache.state(), None);

    let fresh = tokio::spawn({
        let cache = cache.clone();
        async move { cache.refresh().await }
    });
    requests
        .recv()
        .await
        .unwrap()
        .send(Ok(Some(board_with("fresh"))))
        .unwrap();
    fresh.await.unwrap().unwrap();
    assert_eq!(links(cache.state()), vec!["fresh"]);
}
