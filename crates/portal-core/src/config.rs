//! Runtime configuration and the immutable deployment identities.

use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sol_tx::{Keypair, Pubkey};
use tracing::info;
use zeroize::Zeroize;

use crate::error::PortalError;
use crate::idl::Idl;

pub const DEVNET_URL: &str = "https://api.devnet.solana.com";

/// Tip sent by `send_sol`, in lamports.
pub const DEFAULT_TIP_LAMPORTS: u64 = 5_000;

/// How many confirmations a read or write needs before it counts as final.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Commitment {
    #[default]
    Processed,
    Confirmed,
    Finalized,
}

impl Commitment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Commitment::Processed => "processed",
            Commitment::Confirmed => "confirmed",
            Commitment::Finalized => "finalized",
        }
    }
}

impl fmt::Display for Commitment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Commitment {
    type Err = PortalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "processed" => Ok(Commitment::Processed),
            "confirmed" => Ok(Commitment::Confirmed),
            "finalized" => Ok(Commitment::Finalized),
            other => Err(PortalError::Config(format!("unknown commitment `{other}`"))),
        }
    }
}

/// Client configuration. Every field has a default so a partial JSON file
/// is enough.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortalConfig {
    pub rpc_url: String,
    pub commitment: Commitment,
    pub confirm_timeout_ms: u64,
    pub poll_interval_ms: u64,
    pub tip_lamports: u64,
    pub idl_path: PathBuf,
    pub base_keypair_path: PathBuf,
    /// Overrides the program address embedded in the IDL.
    pub program_id: Option<Pubkey>,
    /// Signer used by the local keypair wallet.
    pub wallet_keypair_path: Option<PathBuf>,
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            rpc_url: DEVNET_URL.to_string(),
            commitment: Commitment::Processed,
            confirm_timeout_ms: 30_000,
            poll_interval_ms: 500,
            tip_lamports: DEFAULT_TIP_LAMPORTS,
            idl_path: PathBuf::from("idl.json"),
            base_keypair_path: PathBuf::from("keypair.json"),
            program_id: None,
            wallet_keypair_path: None,
        }
    }
}

impl PortalConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, PortalError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .map_err(|e| PortalError::Config(format!("reading {}: {e}", path.display())))?;
        serde_json::from_str(&contents)
            .map_err(|e| PortalError::Config(format!("parsing {}: {e}", path.display())))
    }

    /// Apply `GIF_PORTAL_*` environment overrides.
    pub fn with_env_overrides(self) -> Result<Self, PortalError> {
        self.with_overrides(|key| env::var(key).ok())
    }

    fn with_overrides<F>(mut self, lookup: F) -> Result<Self, PortalError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("GIF_PORTAL_RPC_URL") {
            self.rpc_url = v;
        }
        if let Some(v) = lookup("GIF_PORTAL_COMMITMENT") {
            self.commitment = v.parse()?;
        }
        if let Some(v) = lookup("GIF_PORTAL_CONFIRM_TIMEOUT_MS") {
            self.confirm_timeout_ms = parse_number("GIF_PORTAL_CONFIRM_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = lookup("GIF_PORTAL_POLL_INTERVAL_MS") {
            self.poll_interval_ms = parse_number("GIF_PORTAL_POLL_INTERVAL_MS", &v)?;
        }
        if let Some(v) = lookup("GIF_PORTAL_TIP_LAMPORTS") {
            self.tip_lamports = parse_number("GIF_PORTAL_TIP_LAMPORTS", &v)?;
        }
        if let Some(v) = lookup("GIF_PORTAL_IDL") {
            self.idl_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("GIF_PORTAL_BASE_KEYPAIR") {
            self.base_keypair_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("GIF_PORTAL_PROGRAM_ID") {
            self.program_id = Some(v.parse()?);
        }
        if let Some(v) = lookup("GIF_PORTAL_WALLET_KEYPAIR") {
            self.wallet_keypair_path = Some(PathBuf::from(v));
        }
        Ok(self)
    }

    pub fn confirm_timeout(&self) -> Duration {
        Duration::from_millis(self.confirm_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

fn parse_number(key: &str, value: &str) -> Result<u64, PortalError> {
    value
        .trim()
        .parse()
        .map_err(|e| PortalError::Config(format!("{key}={value}: {e}")))
}

/// Program and board identities for one deployment.
///
/// Loaded once at startup and shared behind `Arc`; nothing here changes at
/// runtime.
#[derive(Debug)]
pub struct Deployment {
    program_id: Pubkey,
    base_account: Keypair,
    idl: Arc<Idl>,
}

impl Deployment {
    pub fn new(program_id: Pubkey, base_account: Keypair, idl: Idl) -> Self {
        Self {
            program_id,
            base_account,
            idl: Arc::new(idl),
        }
    }

    /// Load the IDL and the base-account keypair named by `config`.
    pub fn load(config: &PortalConfig) -> Result<Arc<Self>, PortalError> {
        let idl = Idl::from_file(&config.idl_path)?;
        let program_id = config
            .program_id
            .or_else(|| idl.program_address())
            .ok_or_else(|| {
                PortalError::Config("IDL has no metadata.address and no program_id is set".into())
            })?;
        let base_account = load_keypair_file(&config.base_keypair_path)?;

        info!(
            program = %program_id,
            board = %base_account.pubkey(),
            idl = %idl.name,
            "deployment loaded"
        );
        Ok(Arc::new(Self::new(program_id, base_account, idl)))
    }

    pub fn program_id(&self) -> Pubkey {
        self.program_id
    }

    /// Address of the singleton board account.
    pub fn board_address(&self) -> Pubkey {
        self.base_account.pubkey()
    }

    pub fn base_account(&self) -> &Keypair {
        &self.base_account
    }

    pub fn idl(&self) -> &Arc<Idl> {
        &self.idl
    }
}

/// Read a keypair file.
///
/// Accepts the Solana CLI layout (a JSON array of 64 bytes) and the web3.js
/// export layout (`{"_keypair": {"secretKey": {"0": n, "1": n, ...}}}`).
pub fn load_keypair_file<P: AsRef<Path>>(path: P) -> Result<Keypair, PortalError> {
    let path = path.as_ref();
    let mut contents = fs::read_to_string(path)
        .map_err(|e| PortalError::Config(format!("reading keypair {}: {e}", path.display())))?;
    let parsed = parse_keypair_json(&contents);
    contents.zeroize();
    parsed.map_err(|e| PortalError::Config(format!("keypair {}: {e}", path.display())))
}

pub fn parse_keypair_json(json: &str) -> Result<Keypair, String> {
    let value: Value = serde_json::from_str(json).map_err(|e| e.to_string())?;
    let mut bytes = match &value {
        Value::Array(items) => byte_list(items.iter())?,
        Value::Object(_) => {
            let secret = value
                .pointer("/_keypair/secretKey")
                .ok_or("missing _keypair.secretKey")?;
            match secret {
                Value::Array(items) => byte_list(items.iter())?,
                Value::Object(map) => {
                    let mut indexed = map
                        .iter()
                        .map(|(k, v)| {
                            k.parse::<usize>()
                                .map(|i| (i, v))
                                .map_err(|_| format!("non-numeric secretKey index `{k}`"))
                        })
                        .collect::<Result<Vec<_>, _>>()?;
                    indexed.sort_by_key(|(i, _)| *i);
                    if indexed.iter().enumerate().any(|(pos, (i, _))| pos != *i) {
                        return Err("secretKey indices are not contiguous".into());
                    }
                    byte_list(indexed.into_iter().map(|(_, v)| v))?
                }
                _ => return Err("secretKey must be an array or object".into()),
            }
        }
        _ => return Err("expected a JSON array or object".into()),
    };
    let keypair = Keypair::from_bytes(&bytes).map_err(|e| e.to_string());
    bytes.zeroize();
    keypair
}

fn byte_list<'a>(items: impl Iterator<Item = &'a Value>) -> Result<Vec<u8>, String> {
    items
        .map(|v| {
            v.as_u64()
                .and_then(|n| u8::try_from(n).ok())
                .ok_or_else(|| format!("not a byte: {v}"))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn keypair_bytes() -> (Keypair, Vec<u8>) {
        let kp = Keypair::from_seed(&[3u8; 32]);
        let mut bytes = vec![3u8; 32];
        bytes.extend_from_slice(kp.pubkey().as_bytes());
        (kp, bytes)
    }

    #[test]
    fn partial_file_uses_defaults() {
        let cfg: PortalConfig =
            serde_json::from_str(r#"{ "commitment": "confirmed", "tip_lamports": 42 }"#).unwrap();
        assert_eq!(cfg.commitment, Commitment::Confirmed);
        assert_eq!(cfg.tip_lamports, 42);
        assert_eq!(cfg.rpc_url, DEVNET_URL);
        assert_eq!(cfg.confirm_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn env_overrides_apply() {
        let vars: HashMap<&str, &str> = [
            ("GIF_PORTAL_RPC_URL", "http://localhost:8899"),
            ("GIF_PORTAL_COMMITMENT", "Finalized"),
            ("GIF_PORTAL_TIP_LAMPORTS", "7"),
        ]
        .into_iter()
        .collect();

        let cfg = PortalConfig::default()
            .with_overrides(|k| vars.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(cfg.rpc_url, "http://localhost:8899");
        assert_eq!(cfg.commitment, Commitment::Finalized);
        assert_eq!(cfg.tip_lamports, 7);
    }

    #[test]
    fn bad_env_override_is_config_error() {
        let err = PortalConfig::default()
            .with_overrides(|k| (k == "GIF_PORTAL_POLL_INTERVAL_MS").then(|| "soon".to_string()))
            .unwrap_err();
        assert!(matches!(err, PortalError::Config(_)));
    }

    #[test]
    fn commitment_levels_are_ordered() {
        assert!(Commitment::Processed < Commitment::Confirmed);
        assert!(Commitment::Confirmed < Commitment::Finalized);
        assert_eq!("confirmed".parse::<Commitment>().unwrap(), Commitment::Confirmed);
        assert!("fast".parse::<Commitment>().is_err());
    }

    #[test]
    fn cli_keypair_format() {
        let (kp, bytes) = keypair_bytes();
        let json = serde_json::to_string(&bytes).unwrap();
        assert_eq!(parse_keypair_json(&json).unwrap().pubkey(), kp.pubkey());
    }

    #[test]
    fn web3_export_keypair_format() {
        let (kp, bytes) = keypair_bytes();
        let secret: serde_json::Map<String, Value> = bytes
            .iter()
            .enumerate()
            .rev()
            .map(|(i, b)| (i.to_string(), Value::from(*b)))
            .collect();
        let json = serde_json::json!({
            "_keypair": { "publicKey": {}, "secretKey": secret }
        });
        assert_eq!(
            parse_keypair_json(&json.to_string()).unwrap().pubkey(),
            kp.pubkey()
        );
    }

    #[test]
    fn keypair_with_gap_is_rejected() {
        let json = r#"{ "_keypair": { "secretKey": { "0": 1, "2": 3 } } }"#;
        assert!(parse_keypair_json(json).is_err());
    }

    #[test]
    fn keypair_with_non_byte_is_rejected() {
        assert!(parse_keypair_json("[256]").is_err());
    }
}
