//! Borsh-layout encoding of IDL-typed values.
//!
//! Layout per type:
//! - integers: little-endian, fixed width; `bool` is one byte (0 or 1)
//! - `string`: u32 LE byte length, then UTF-8 bytes
//! - `publicKey`: 32 raw bytes
//! - `vec<T>`: u32 LE element count, then elements
//! - `option<T>`: one tag byte (0 = none, 1 = some), then the value
//! - defined structs: fields in declaration order

use sol_tx::Pubkey;

use crate::error::PortalError;
use crate::idl::{Idl, IdlType};

/// A value shaped by an [`IdlType`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdlValue {
    Bool(bool),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    I64(i64),
    String(String),
    PublicKey(Pubkey),
    Vec(Vec<IdlValue>),
    Option(Option<Box<IdlValue>>),
    Struct(Vec<(String, IdlValue)>),
}

impl IdlValue {
    /// Look up a struct field by name.
    pub fn field(&self, name: &str) -> Option<&IdlValue> {
        match self {
            IdlValue::Struct(fields) => fields.iter().find(|(n, _)| n == name).map(|(_, v)| v),
            _ => None,
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            IdlValue::Bool(_) => "bool",
            IdlValue::U8(_) => "u8",
            IdlValue::U16(_) => "u16",
            IdlValue::U32(_) => "u32",
            IdlValue::U64(_) => "u64",
            IdlValue::I64(_) => "i64",
            IdlValue::String(_) => "string",
            IdlValue::PublicKey(_) => "publicKey",
            IdlValue::Vec(_) => "vec",
            IdlValue::Option(_) => "option",
            IdlValue::Struct(_) => "struct",
        }
    }
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

/// Append the encoding of `value` as `ty` to `out`.
pub fn encode_value(
    idl: &Idl,
    ty: &IdlType,
    value: &IdlValue,
    out: &mut Vec<u8>,
) -> Result<(), PortalError> {
    match (ty, value) {
        (IdlType::Primitive(p), _) => encode_primitive(p, value, out),
        (IdlType::Vec { vec }, IdlValue::Vec(items)) => {
            out.extend_from_slice(&len_prefix(items.len())?);
            for item in items {
                encode_value(idl, vec, item, out)?;
            }
            Ok(())
        }
        (IdlType::Option { .. }, IdlValue::Option(None)) => {
            out.push(0);
            Ok(())
        }
        (IdlType::Option { option }, IdlValue::Option(Some(inner))) => {
            out.push(1);
            encode_value(idl, option, inner, out)
        }
        (IdlType::Defined { defined }, IdlValue::Struct(fields)) => {
            let def = idl
                .type_def(defined)
                .ok_or_else(|| PortalError::Encoding(format!("undefined type `{defined}`")))?;
            if def.ty.fields.len() != fields.len() {
                return Err(PortalError::Encoding(format!(
                    "`{defined}` has {} fields, got {}",
                    def.ty.fields.len(),
                    fields.len()
                )));
            }
            for (field, (name, v)) in def.ty.fields.iter().zip(fields) {
                if field.name != *name {
                    return Err(PortalError::Encoding(format!(
                        "`{defined}` expected field `{}`, got `{name}`",
                        field.name
                    )));
                }
                encode_value(idl, &field.ty, v, out)?;
            }
            Ok(())
        }
        _ => Err(mismatch(ty, value)),
    }
}

fn encode_primitive(prim: &str, value: &IdlValue, out: &mut Vec<u8>) -> Result<(), PortalError> {
    match (prim, value) {
        ("bool", IdlValue::Bool(b)) => out.push(u8::from(*b)),
        ("u8", IdlValue::U8(v)) => out.push(*v),
        ("u16", IdlValue::U16(v)) => out.extend_from_slice(&v.to_le_bytes()),
        ("u32", IdlValue::U32(v)) => out.extend_from_slice(&v.to_le_bytes()),
        ("u64", IdlValue::U64(v)) => out.extend_from_slice(&v.to_le_bytes()),
        ("i64", IdlValue::I64(v)) => out.extend_from_slice(&v.to_le_bytes()),
        ("string", IdlValue::String(s)) => {
            out.extend_from_slice(&len_prefix(s.len())?);
            out.extend_from_slice(s.as_bytes());
        }
        ("publicKey", IdlValue::PublicKey(k)) => out.extend_from_slice(k.as_bytes()),
        _ => {
            return Err(PortalError::Encoding(format!(
                "expected {prim}, got {}",
                value.type_name()
            )))
        }
    }
    Ok(())
}

fn len_prefix(len: usize) -> Result<[u8; 4], PortalError> {
    u32::try_from(len)
        .map(u32::to_le_bytes)
        .map_err(|_| PortalError::Encoding(format!("length {len} does not fit in u32")))
}

fn mismatch(ty: &IdlType, value: &IdlValue) -> PortalError {
    PortalError::Encoding(format!("expected {ty:?}, got {}", value.type_name()))
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// Decode one value of type `ty` from the front of `input`, advancing it.
pub fn decode_value(idl: &Idl, ty: &IdlType, input: &mut &[u8]) -> Result<IdlValue, PortalError> {
    match ty {
        IdlType::Primitive(p) => decode_primitive(p, input),
        IdlType::Vec { vec } => {
            let len = read_u32(input)? as usize;
            // Each element takes at least one byte.
            if len > input.len() {
                return Err(PortalError::Decoding(format!(
                    "vec length {len} exceeds remaining {} bytes",
                    input.len()
                )));
            }
            let mut items = Vec::with_capacity(len);
            for _ in 0..len {
                items.push(decode_value(idl, vec, input)?);
            }
            Ok(IdlValue::Vec(items))
        }
        IdlType::Option { option } => match take(input, 1)?[0] {
            0 => Ok(IdlValue::Option(None)),
            1 => Ok(IdlValue::Option(Some(Box::new(decode_value(
                idl, option, input,
            )?)))),
            tag => Err(PortalError::Decoding(format!("invalid option tag {tag}"))),
        },
        IdlType::Defined { defined } => {
            let def = idl
                .type_def(defined)
                .ok_or_else(|| PortalError::Decoding(format!("undefined type `{defined}`")))?;
            let mut fields = Vec::with_capacity(def.ty.fields.len());
            for field in &def.ty.fields {
                fields.push((field.name.clone(), decode_value(idl, &field.ty, input)?));
            }
            Ok(IdlValue::Struct(fields))
        }
    }
}

fn decode_primitive(prim: &str, input: &mut &[u8]) -> Result<IdlValue, PortalError> {
    Ok(match prim {
        "bool" => match take(input, 1)?[0] {
            0 => IdlValue::Bool(false),
            1 => IdlValue::Bool(true),
            b => return Err(PortalError::Decoding(format!("invalid bool byte {b}"))),
        },
        "u8" => IdlValue::U8(take(input, 1)?[0]),
        "u16" => IdlValue::U16(u16::from_le_bytes(take_array(input)?)),
        "u32" => IdlValue::U32(read_u32(input)?),
        "u64" => IdlValue::U64(u64::from_le_bytes(take_array(input)?)),
        "i64" => IdlValue::I64(i64::from_le_bytes(take_array(input)?)),
        "string" => {
            let len = read_u32(input)? as usize;
            let bytes = take(input, len)?;
            let s = std::str::from_utf8(bytes)
                .map_err(|e| PortalError::Decoding(format!("string is not UTF-8: {e}")))?;
            IdlValue::String(s.to_owned())
        }
        "publicKey" => IdlValue::PublicKey(Pubkey::new(take_array(input)?)),
        other => return Err(PortalError::Decoding(format!("unsupported primitive `{other}`"))),
    })
}

fn take<'a>(input: &mut &'a [u8], n: usize) -> Result<&'a [u8], PortalError> {
    if input.len() < n {
        return Err(PortalError::Decoding(format!(
            "unexpected end of data: wanted {n} bytes, {} left",
            input.len()
        )));
    }
    let (head, rest) = input.split_at(n);
    *input = rest;
    Ok(head)
}

fn take_array<const N: usize>(input: &mut &[u8]) -> Result<[u8; N], PortalError> {
    let mut arr = [0u8; N];
    arr.copy_from_slice(take(input, N)?);
    Ok(arr)
}

fn read_u32(input: &mut &[u8]) -> Result<u32, PortalError> {
    Ok(u32::from_le_bytes(take_array(input)?))
}
