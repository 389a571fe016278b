//! Anchor-style interface description of the GIF program.
//!
//! The IDL is loaded once at startup. It drives argument layout and account
//! roles for every instruction, the layout of the board account, and the
//! mapping of program error codes to names.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sol_tx::Pubkey;

use crate::error::PortalError;

/// Instructions and types the client relies on. A description missing any
/// of these is rejected at load time.
pub const REQUIRED_INSTRUCTIONS: [&str; 4] = ["initialize", "addGif", "upvoteGif", "sendSol"];
pub const BOARD_ACCOUNT: &str = "BaseAccount";
pub const GIF_ITEM: &str = "ItemStruct";

/// Top-level IDL document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Idl {
    pub version: String,
    pub name: String,
    pub instructions: Vec<IdlInstruction>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub accounts: Vec<IdlTypeDef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub types: Vec<IdlTypeDef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<IdlErrorCode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<IdlMetadata>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdlInstruction {
    pub name: String,
    pub accounts: Vec<IdlAccountItem>,
    pub args: Vec<IdlField>,
}

/// An account expected by an instruction, with its role.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdlAccountItem {
    pub name: String,
    #[serde(default)]
    pub is_mut: bool,
    #[serde(default)]
    pub is_signer: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdlField {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: IdlType,
}

/// Type representation in the IDL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IdlType {
    Primitive(String),
    Vec { vec: Box<IdlType> },
    Option { option: Box<IdlType> },
    Defined { defined: String },
}

/// Named struct definition, used for both `accounts` and `types`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdlTypeDef {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: IdlStruct,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdlStruct {
    pub kind: String,
    #[serde(default)]
    pub fields: Vec<IdlField>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdlErrorCode {
    pub code: u32,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdlMetadata {
    pub address: Pubkey,
}

impl Idl {
    /// Read and validate an IDL file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, PortalError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .map_err(|e| PortalError::Config(format!("reading IDL {}: {e}", path.display())))?;
        Self::from_json(&contents)
    }

    /// Parse and validate an IDL document.
    pub fn from_json(json: &str) -> Result<Self, PortalError> {
        let idl: Idl = serde_json::from_str(json)
            .map_err(|e| PortalError::Config(format!("malformed IDL: {e}")))?;
        idl.validate()?;
        Ok(idl)
    }

    fn validate(&self) -> Result<(), PortalError> {
        for name in REQUIRED_INSTRUCTIONS {
            if self.instruction(name).is_none() {
                return Err(PortalError::Config(format!(
                    "IDL {} has no `{name}` instruction",
                    self.name
                )));
            }
        }
        if self.account(BOARD_ACCOUNT).is_none() {
            return Err(PortalError::Config(format!(
                "IDL {} has no `{BOARD_ACCOUNT}` account",
                self.name
            )));
        }
        for def in self.accounts.iter().chain(&self.types) {
            if def.ty.kind != "struct" {
                return Err(PortalError::Config(format!(
                    "type `{}` has unsupported kind `{}`",
                    def.name, def.ty.kind
                )));
            }
            for field in &def.ty.fields {
                self.check_type(&field.ty)?;
            }
        }
        for ix in &self.instructions {
            for arg in &ix.args {
                self.check_type(&arg.ty)?;
            }
        }
        Ok(())
    }

    fn check_type(&self, ty: &IdlType) -> Result<(), PortalError> {
        match ty {
            IdlType::Primitive(p) => match p.as_str() {
                "bool" | "u8" | "u16" | "u32" | "u64" | "i64" | "string" | "publicKey" => Ok(()),
                other => Err(PortalError::Config(format!("unsupported IDL primitive `{other}`"))),
            },
            IdlType::Vec { vec } => self.check_type(vec),
            IdlType::Option { option } => self.check_type(option),
            IdlType::Defined { defined } => self
                .type_def(defined)
                .map(|_| ())
                .ok_or_else(|| PortalError::Config(format!("undefined IDL type `{defined}`"))),
        }
    }

    pub fn instruction(&self, name: &str) -> Option<&IdlInstruction> {
        self.instructions.iter().find(|ix| ix.name == name)
    }

    pub fn account(&self, name: &str) -> Option<&IdlTypeDef> {
        self.accounts.iter().find(|a| a.name == name)
    }

    /// Look up a named type among `types`, falling back to `accounts`.
    pub fn type_def(&self, name: &str) -> Option<&IdlTypeDef> {
        self.types
            .iter()
            .chain(&self.accounts)
            .find(|t| t.name == name)
    }

    pub fn error(&self, code: u32) -> Option<&IdlErrorCode> {
        self.errors.iter().find(|e| e.code == code)
    }

    pub fn program_address(&self) -> Option<Pubkey> {
        self.metadata.as_ref().map(|m| m.address)
    }
}

/// Anchor instruction discriminator: `sha256("global:<snake_name>")[..8]`.
pub fn instruction_discriminator(name: &str) -> [u8; 8] {
    discriminator(&format!("global:{}", to_snake_case(name)))
}

/// Anchor account discriminator: `sha256("account:<Name>")[..8]`.
pub fn account_discriminator(name: &str) -> [u8; 8] {
    discriminator(&format!("account:{name}"))
}

fn discriminator(preimage: &str) -> [u8; 8] {
    let digest = Sha256::digest(preimage.as_bytes());
    let mut out = [0u8; 8];
    out.copy_from_slice(&digest[..8]);
    out
}

/// `addGif` -> `add_gif`.
pub fn to_snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for (i, ch) in name.chars().enumerate() {
        if ch.is_ascii_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.push(ch.to_ascii_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}
