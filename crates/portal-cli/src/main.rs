use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use portal_core::{
    load_keypair_file, Commitment, Deployment, GifPortal, HttpLedgerRpc,
    KeypairWallet, PortalConfig, Session, TxReceipt, WalletExtension,
};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "gif-portal", author, version, about, long_about = None)]
struct Args {
    /// JSON config file; defaults apply when omitted
    #[arg(long, env = "GIF_PORTAL_CONFIG")]
    config: Option<PathBuf>,

    /// Ledger RPC endpoint
    #[arg(long)]
    rpc_url: Option<String>,

    /// processed, confirmed or finalized
    #[arg(long)]
    commitment: Option<Commitment>,

    /// Keypair file used as the connected wallet
    #[arg(long)]
    wallet: Option<PathBuf>,

    /// Program IDL
    #[arg(long)]
    idl: Option<PathBuf>,

    /// Keypair of the board account
    #[arg(long)]
    base_keypair: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show the connected wallet and the board
    Status,
    /// Create the board account
    Init,
    /// Add a GIF link to the board
    Add { link: String },
    /// Upvote the GIF at INDEX
    Upvote { index: u64 },
    /// Tip the author of the GIF at INDEX
    Tip { index: usize },
}

fn init_logging() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("portal_core=info,gif_portal=info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(args: &Args) -> Result<PortalConfig> {
    let config = match &args.config {
        Some(path) => PortalConfig::from_file(path)?,
        None => PortalConfig::default(),
    };
    let mut config = config
        .with_env_overrides()
        .context("applying GIF_PORTAL_* overrides")?;

    if let Some(url) = &args.rpc_url {
        config.rpc_url = url.clone();
    }
    if let Some(commitment) = args.commitment {
        config.commitment = commitment;
    }
    if let Some(wallet) = &args.wallet {
        config.wallet_keypair_path = Some(wallet.clone());
    }
    if let Some(idl) = &args.idl {
        config.idl_path = idl.clone();
    }
    if let Some(base) = &args.base_keypair {
        config.base_keypair_path = base.clone();
    }
    Ok(config)
}

fn print_session(deployment: &Deployment, session: &Session) {
    println!("program: {}", deployment.program_id());
    println!("board account: {}", deployment.board_address());
    match session.identity {
        Some(id) => println!("wallet: {id}"),
        None => println!("wallet: not connected"),
    }
    match &session.board {
        None => println!("board: not loaded"),
        Some(board) if !board.is_initialized() => {
            println!("board: not initialized (run `init`)")
        }
        Some(board) if board.entries().is_empty() => println!("board: empty"),
        Some(board) => {
            let entries = board.entries();
            println!("board: {} GIFs", entries.len());
            for (i, entry) in entries.iter().enumerate() {
                println!(
                    "  [{i}] {} by {} ({} upvotes)",
                    entry.link, entry.author, entry.upvotes
                );
            }
        }
    }
}

fn print_receipt(receipt: &TxReceipt) {
    println!("{} confirmed: {}", receipt.operation, receipt.signature);
    if let Err(e) = &receipt.board {
        println!("board refresh failed: {e}");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let args = Args::parse();
    let config = load_config(&args)?;
    debug!(?config, "configuration loaded");

    let deployment = Deployment::load(&config).context("loading deployment")?;
    let extension = match &config.wallet_keypair_path {
        Some(path) => {
            let keypair = load_keypair_file(path)
                .with_context(|| format!("loading wallet keypair {}", path.display()))?;
            Some(Arc::new(KeypairWallet::new(keypair, true)) as Arc<dyn WalletExtension>)
        }
        None => None,
    };
    let rpc = Arc::new(HttpLedgerRpc::new(config.rpc_url.clone()));
    let portal = GifPortal::from_config(&config, deployment, rpc, extension);

    let session = portal.start().await?;
    if session.identity.is_none() && !matches!(args.command, Command::Status) {
        return Err(anyhow!("no wallet configured; pass --wallet or set GIF_PORTAL_WALLET_KEYPAIR"));
    }

    match args.command {
        Command::Status => {
            if session.board.is_none() {
                portal.refresh().await?;
            }
            print_session(portal.deployment(), &portal.session());
        }
        Command::Init => print_receipt(&portal.initialize_board().await?),
        Command::Add { link } => print_receipt(&portal.add_gif(&link).await?),
        Command::Upvote { index } => print_receipt(&portal.upvote_gif(index).await?),
        Command::Tip { index } => {
            let board = portal.refresh().await?;
            let author = board
                .entries()
                .get(index)
                .map(|entry| entry.author)
                .ok_or_else(|| anyhow!("no GIF at index {index}"))?;
            info!(%author, lamports = config.tip_lamports, "sending tip");
            print_receipt(&portal.send_sol(author).await?);
        }
    }
    Ok(())
}
