//! IDL-driven client for the GIF program.

use std::sync::Arc;

use sol_tx::{AccountMeta, Instruction, Pubkey};
use tracing::debug;

use crate::codec::{decode_value, encode_value, IdlValue};
use crate::error::PortalError;
use crate::idl::{account_discriminator, instruction_discriminator, Idl, IdlType, BOARD_ACCOUNT};
use crate::ledger::LedgerConnection;
use crate::types::GifEntry;
use crate::wallet::WalletSession;

/// Binds the program id and IDL to a ledger connection and wallet session.
#[derive(Debug)]
pub struct ProgramClient {
    program_id: Pubkey,
    idl: Arc<Idl>,
    connection: LedgerConnection,
    wallet: Arc<WalletSession>,
}

impl ProgramClient {
    pub fn new(
        program_id: Pubkey,
        idl: Arc<Idl>,
        connection: LedgerConnection,
        wallet: Arc<WalletSession>,
    ) -> Self {
        Self {
            program_id,
            idl,
            connection,
            wallet,
        }
    }

    pub fn program_id(&self) -> Pubkey {
        self.program_id
    }

    pub fn idl(&self) -> &Idl {
        &self.idl
    }

    pub fn connection(&self) -> &LedgerConnection {
        &self.connection
    }

    pub fn wallet(&self) -> &Arc<WalletSession> {
        &self.wallet
    }

    /// Encode a call to instruction `name`.
    ///
    /// `args` must match the IDL arguments in order and type. `accounts`
    /// names every account the instruction declares; roles come from the
    /// IDL and the resulting metas follow IDL order.
    pub fn encode_call(
        &self,
        name: &str,
        args: &[IdlValue],
        accounts: &[(&str, Pubkey)],
    ) -> Result<Instruction, PortalError> {
        let ix = self
            .idl
            .instruction(name)
            .ok_or_else(|| PortalError::Encoding(format!("unknown instruction `{name}`")))?;

        if ix.args.len() != args.len() {
            return Err(PortalError::Encoding(format!(
                "`{name}` takes {} arguments, got {}",
                ix.args.len(),
                args.len()
            )));
        }

        let discriminator = instruction_discriminator(name);
        let mut data = discriminator.to_vec();
        for (arg, value) in ix.args.iter().zip(args) {
            encode_value(&self.idl, &arg.ty, value, &mut data).map_err(|e| match e {
                PortalError::Encoding(m) => PortalError::Encoding(format!("`{name}.{}`: {m}", arg.name)),
                other => other,
            })?;
        }

        let metas = ix
            .accounts
            .iter()
            .map(|item| {
                accounts
                    .iter()
                    .find(|(n, _)| *n == item.name)
                    .map(|(_, key)| AccountMeta::new(*key, item.is_signer, item.is_mut))
                    .ok_or_else(|| {
                        PortalError::Encoding(format!("`{name}` needs account `{}`", item.name))
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        if let Some((extra, _)) = accounts
            .iter()
            .find(|(n, _)| !ix.accounts.iter().any(|item| item.name == *n))
        {
            return Err(PortalError::Encoding(format!(
                "`{name}` has no account named `{extra}`"
            )));
        }

        debug!(
            instruction = name,
            discriminator = %hex::encode(discriminator),
            data_len = data.len(),
            "encoded instruction"
        );
        Ok(Instruction {
            program_id: self.program_id,
            accounts: metas,
            data,
        })
    }

    /// Decode raw board-account bytes into its GIF list.
    pub fn decode_board(&self, data: &[u8]) -> Result<Vec<GifEntry>, PortalError> {
        decode_board(&self.idl, data)
    }
}

/// Decode the board account: discriminator, then the IDL `BaseAccount`
/// layout. Bytes after the decoded value are allocation padding.
pub fn decode_board(idl: &Idl, data: &[u8]) -> Result<Vec<GifEntry>, PortalError> {
    let expected = account_discriminator(BOARD_ACCOUNT);
    let (disc, mut rest) = data.split_at(data.len().min(8));
    if disc != expected.as_slice() {
        return Err(PortalError::Decoding(format!(
            "account discriminator {} is not {BOARD_ACCOUNT}",
            hex::encode(disc)
        )));
    }

    let board = decode_value(
        idl,
        &IdlType::Defined {
            defined: BOARD_ACCOUNT.into(),
        },
        &mut rest,
    )?;

    let list = match board.field("gifList") {
        Some(IdlValue::Vec(items)) => items,
        _ => return Err(PortalError::Decoding("board account has no gifList".into())),
    };
    list.iter().map(gif_entry).collect()
}

fn gif_entry(item: &IdlValue) -> Result<GifEntry, PortalError> {
    match (
        item.field("gifLink"),
        item.field("userAddress"),
        item.field("gifUpvotes"),
    ) {
        (
            Some(IdlValue::String(link)),
            Some(IdlValue::PublicKey(author)),
            Some(IdlValue::U64(upvotes)),
        ) => Ok(GifEntry {
            link: link.clone(),
            author: *author,
            upvotes: *upvotes,
        }),
        _ => Err(PortalError::Decoding(format!(
            "unexpected GIF item layout: {item:?}"
        ))),
    }
}

/// Encode a board account the way the program stores it. Used to seed
/// simulated ledgers.
pub fn encode_board(idl: &Idl, entries: &[GifEntry], space: usize) -> Result<Vec<u8>, PortalError> {
    let items = entries
        .iter()
        .map(|e| {
            IdlValue::Struct(vec![
                ("gifLink".into(), IdlValue::String(e.link.clone())),
                ("userAddress".into(), IdlValue::PublicKey(e.author)),
                ("gifUpvotes".into(), IdlValue::U64(e.upvotes)),
            ])
        })
        .collect();
    let board = IdlValue::Struct(vec![
        ("totalGifs".into(), IdlValue::U64(entries.len() as u64)),
        ("gifList".into(), IdlValue::Vec(items)),
    ]);

    let mut data = account_discriminator(BOARD_ACCOUNT).to_vec();
    encode_value(
        idl,
        &IdlType::Defined {
            defined: BOARD_ACCOUNT.into(),
        },
        &board,
        &mut data,
    )?;
    if data.len() > space {
        return Err(PortalError::Encoding(format!(
            "board needs {} bytes but the account holds {space}",
            data.len()
        )));
    }
    data.resize(space, 0);
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Commitment;
    use crate::ledger::{LedgerError, LedgerRpc, SignatureStatus, TxHandle};
    use async_trait::async_trait;
    use sol_tx::{Transaction, SYSTEM_PROGRAM_ID};

    struct Offline;

    #[async_trait]
    impl LedgerRpc for Offline {
        async fn latest_blockhash(&self, _: Commitment) -> Result<[u8; 32], LedgerError> {
            Err(LedgerError::Transport("offline".into()))
        }
        async fn send_transaction(
            &self,
            _: &Transaction,
            _: Commitment,
        ) -> Result<TxHandle, LedgerError> {
            Err(LedgerError::Transport("offline".into()))
        }
        async fn signature_status(
            &self,
            _: &TxHandle,
        ) -> Result<Option<SignatureStatus>, LedgerError> {
            Err(LedgerError::Transport("offline".into()))
        }
        async fn account_data(
            &self,
            _: &Pubkey,
            _: Commitment,
        ) -> Result<Option<Vec<u8>>, LedgerError> {
            Err(LedgerError::Transport("offline".into()))
        }
    }

    fn client() -> ProgramClient {
        let idl = Idl::from_json(include_str!("../idl/gif_portal.json")).unwrap();
        ProgramClient::new(
            Pubkey::new([0x11; 32]),
            Arc::new(idl),
            LedgerConnection::new(Arc::new(Offline), Commitment::Processed),
            Arc::new(WalletSession::new(None)),
        )
    }

    #[test]
    fn initialize_accounts_follow_idl_roles() {
        let board = Pubkey::new([1u8; 32]);
        let user = Pubkey::new([2u8; 32]);
        let ix = client()
            .encode_call(
                "initialize",
                &[],
                &[
                    ("user", user),
                    ("systemProgram", SYSTEM_PROGRAM_ID),
                    ("baseAccount", board),
                ],
            )
            .unwrap();

        assert_eq!(ix.program_id, Pubkey::new([0x11; 32]));
        assert_eq!(ix.data, instruction_discriminator("initialize").to_vec());
        assert_eq!(
            ix.accounts,
            vec![
                AccountMeta::new(board, true, true),
                AccountMeta::new(user, true, true),
                AccountMeta::new(SYSTEM_PROGRAM_ID, false, false),
            ]
        );
    }

    #[test]
    fn add_gif_data_layout() {
        let author = Pubkey::new([7u8; 32]);
        let ix = client()
            .encode_call(
                "addGif",
                &[
                    IdlValue::String("https://x/a.gif".into()),
                    IdlValue::PublicKey(author),
                ],
                &[("baseAccount", Pubkey::new([1u8; 32]))],
            )
            .unwrap();

        let (disc, rest) = ix.data.split_at(8);
        assert_eq!(disc, &instruction_discriminator("addGif")[..]);
        assert_eq!(&rest[..4], &15u32.to_le_bytes());
        assert_eq!(&rest[4..19], b"https://x/a.gif");
        assert_eq!(&rest[19..], author.as_bytes());
    }

    #[test]
    fn argument_type_mismatch_is_encoding_error() {
        let err = client()
            .encode_call(
                "upvoteGif",
                &[IdlValue::String("3".into())],
                &[("baseAccount", Pubkey::new([1u8; 32]))],
            )
            .unwrap_err();
        assert!(matches!(err, PortalError::Encoding(ref m) if m.contains("index")));
    }

    #[test]
    fn missing_or_unknown_accounts_are_rejected() {
        let c = client();
        assert!(c
            .encode_call("upvoteGif", &[IdlValue::U64(0)], &[])
            .is_err());
        assert!(c
            .encode_call(
                "upvoteGif",
                &[IdlValue::U64(0)],
                &[
                    ("baseAccount", Pubkey::new([1u8; 32])),
                    ("user", Pubkey::new([2u8; 32]))
                ],
            )
            .is_err());
        assert!(c.encode_call("deleteGif", &[], &[]).is_err());
    }

    #[test]
    fn board_decodes_through_padding() {
        let c = client();
        let entries = vec![
            GifEntry {
                link: "https://example.com/a.gif".into(),
                author: Pubkey::new([3u8; 32]),
                upvotes: 0,
            },
            GifEntry {
                link: "https://example.com/b.gif".into(),
                author: Pubkey::new([4u8; 32]),
                upvotes: 12,
            },
        ];
        let data = encode_board(c.idl(), &entries, 9000).unwrap();
        assert_eq!(data.len(), 9000);
        assert_eq!(c.decode_board(&data).unwrap(), entries);
    }

    #[test]
    fn empty_board_is_an_empty_list() {
        let c = client();
        let data = encode_board(c.idl(), &[], 64).unwrap();
        assert_eq!(c.decode_board(&data).unwrap(), vec![]);
    }

    #[test]
    fn foreign_account_is_decoding_error() {
        let c = client();
        let mut data = encode_board(c.idl(), &[], 64).unwrap();
        data[0] ^= 0xff;
        assert!(matches!(
            c.decode_board(&data),
            Err(PortalError::Decoding(_))
        ));
        assert!(matches!(
            c.decode_board(&[1, 2, 3]),
            Err(PortalError::Decoding(_))
        ));
    }
}
