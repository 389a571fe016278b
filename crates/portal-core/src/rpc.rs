//! Solana JSON-RPC implementation of [`LedgerRpc`].

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use sol_tx::{Pubkey, Transaction};
use tracing::{debug, info};

use crate::config::Commitment;
use crate::ledger::{LedgerError, LedgerRpc, SignatureStatus, TxFailure, TxHandle};

/// JSON-RPC response envelope.
#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorDetail {
    code: i64,
    message: String,
    #[serde(default)]
    data: Option<Value>,
}

/// Responses wrapped in `{ context, value }`.
#[derive(Debug, Deserialize)]
struct WithContext<T> {
    value: T,
}

#[derive(Debug, Deserialize)]
struct BlockhashValue {
    blockhash: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusValue {
    confirmation_status: Option<Commitment>,
    err: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct AccountValue {
    /// `[base64_data, "base64"]`
    data: (String, String),
}

/// Talks to a Solana RPC node over HTTP.
#[derive(Debug, Clone)]
pub struct HttpLedgerRpc {
    client: Client,
    rpc_url: String,
}

impl HttpLedgerRpc {
    pub fn new(rpc_url: impl Into<String>) -> Self {
        let rpc_url = rpc_url.into();
        info!("Initializing ledger RPC client for {}", rpc_url);
        Self {
            client: Client::new(),
            rpc_url,
        }
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, LedgerError> {
        debug!(method, "rpc request");
        let response = self
            .client
            .post(&self.rpc_url)
            .json(&json!({
                "jsonrpc": "2.0",
                "id": 1,
                "method": method,
                "params": params,
            }))
            .send()
            .await
            .map_err(|e| LedgerError::Transport(format!("{method}: {e}")))?;

        let body: RpcResponse<T> = response
            .json()
            .await
            .map_err(|e| LedgerError::Transport(format!("{method}: malformed response: {e}")))?;

        if let Some(error) = body.error {
            return Err(classify_rpc_error(method, error));
        }
        body.result
            .ok_or_else(|| LedgerError::Transport(format!("{method}: response has no result")))
    }
}

/// Preflight failures carry the transaction error in `data.err`; anything
/// else is a transport-level problem.
fn classify_rpc_error(method: &str, error: RpcErrorDetail) -> LedgerError {
    match error.data.as_ref().and_then(|d| d.get("err")) {
        Some(err) if !err.is_null() => LedgerError::Rejected(TxFailure::from_rpc_value(err)),
        _ => LedgerError::Transport(format!("{method}: rpc error {}: {}", error.code, error.message)),
    }
}

#[async_trait]
impl LedgerRpc for HttpLedgerRpc {
    async fn latest_blockhash(&self, commitment: Commitment) -> Result<[u8; 32], LedgerError> {
        let resp: WithContext<BlockhashValue> = self
            .call(
                "getLatestBlockhash",
                json!([{ "commitment": commitment.as_str() }]),
            )
            .await?;
        let bytes = bs58::decode(&resp.value.blockhash)
            .into_vec()
            .map_err(|e| LedgerError::Transport(format!("bad blockhash: {e}")))?;
        bytes
            .try_into()
            .map_err(|_| LedgerError::Transport("blockhash is not 32 bytes".into()))
    }

    async fn send_transaction(
        &self,
        tx: &Transaction,
        commitment: Commitment,
    ) -> Result<TxHandle, LedgerError> {
        let wire = tx
            .serialize()
            .map_err(|e| LedgerError::Transport(format!("serializing transaction: {e}")))?;
        let signature: String = self
            .call(
                "sendTransaction",
                json!([
                    base64::encode(wire),
                    { "encoding": "base64", "preflightCommitment": commitment.as_str() }
                ]),
            )
            .await?;
        Ok(TxHandle(signature))
    }

    async fn signature_status(
        &self,
        handle: &TxHandle,
    ) -> Result<Option<SignatureStatus>, LedgerError> {
        let resp: WithContext<Vec<Option<StatusValue>>> = self
            .call("getSignatureStatuses", json!([[handle.0]]))
            .await?;
        Ok(resp
            .value
            .into_iter()
            .next()
            .flatten()
            .map(|status| SignatureStatus {
                commitment: status.confirmation_status.unwrap_or(Commitment::Processed),
                err: status
                    .err
                    .filter(|e| !e.is_null())
                    .map(|e| TxFailure::from_rpc_value(&e)),
            }))
    }

    async fn account_data(
        &self,
        address: &Pubkey,
        commitment: Commitment,
    ) -> Result<Option<Vec<u8>>, LedgerError> {
        let resp: WithContext<Option<AccountValue>> = self
            .call(
                "getAccountInfo",
                json!([
                    address.to_string(),
                    { "encoding": "base64", "commitment": commitment.as_str() }
                ]),
            )
            .await?;
        resp.value
            .map(|account| {
                base64::decode(&account.data.0)
                    .map_err(|e| LedgerError::Transport(format!("bad account data: {e}")))
            })
            .transpose()
    }
}
