//! Length-prefixed recursive byte-string/list codec (RLP)
//!
//! Attestations travel as RLP: nested lists whose leaves are byte strings.
//! `RlpItem` keeps the undecoded tree so callers can re-encode any prefix
//! byte-exactly before interpreting the leaves.

use crate::error::{VesError, VesResult};

use rlp::{Decodable, DecoderError, Encodable, Rlp, RlpStream};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// One RLP value: a byte string or a list of values
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RlpItem {
    Bytes(Vec<u8>),
    List(Vec<RlpItem>),
}

impl RlpItem {
    pub fn bytes(data: impl Into<Vec<u8>>) -> Self {
        RlpItem::Bytes(data.into())
    }

    pub fn list(items: Vec<RlpItem>) -> Self {
        RlpItem::List(items)
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            RlpItem::Bytes(b) => Some(b),
            RlpItem::List(_) => None,
        }
    }

    pub fn as_list(&self) -> Option<&[RlpItem]> {
        match self {
            RlpItem::List(items) => Some(items),
            RlpItem::Bytes(_) => None,
        }
    }

    /// Borrow as a list of exactly `arity` items
    pub fn expect_list(&self, arity: usize, what: &str) -> VesResult<&[RlpItem]> {
        let items = self
            .as_list()
            .ok_or_else(|| VesError::DecodeFail(format!("{} must be a list", what)))?;
        if items.len() != arity {
            return Err(VesError::DecodeFail(format!(
                "{} must have {} fields, but got a length of {}",
                what,
                arity,
                items.len()
            )));
        }
        Ok(items)
    }

    /// Borrow as a byte string
    pub fn expect_bytes(&self, what: &str) -> VesResult<&[u8]> {
        self.as_bytes()
            .ok_or_else(|| VesError::DecodeFail(format!("{} must be a byte string", what)))
    }
}

impl Encodable for RlpItem {
    fn rlp_append(&self, s: &mut RlpStream) {
        match self {
            // the enclosing `append` counts this item; writing through a
            // nested `append` would count it twice
            RlpItem::Bytes(data) => s.encoder().encode_value(data),
            RlpItem::List(items) => {
                s.begin_list(items.len());
                for item in items {
                    s.append(item);
                }
            }
        }
    }
}

impl Decodable for RlpItem {
    fn decode(rlp: &Rlp) -> Result<Self, DecoderError> {
        if rlp.is_list() {
            let items = rlp
                .iter()
                .map(|child| RlpItem::decode(&child))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(RlpItem::List(items))
        } else {
            Ok(RlpItem::Bytes(rlp.data()?.to_vec()))
        }
    }
}

/// Encode an item tree to its canonical bytes
pub fn encode(item: &RlpItem) -> Vec<u8> {
    rlp::encode(item).to_vec()
}

/// Decode a complete buffer into an item tree.
///
/// Trailing bytes after the first item are rejected.
pub fn decode(bytes: &[u8]) -> VesResult<RlpItem> {
    let rlp = Rlp::new(bytes);
    let info = rlp
        .payload_info()
        .map_err(|e| VesError::DecodeFail(format!("malformed rlp: {:?}", e)))?;
    let total = info.header_len + info.value_len;
    if total != bytes.len() {
        return Err(VesError::DecodeFail(format!(
            "expected {} bytes of rlp, got {}",
            total,
            bytes.len()
        )));
    }
    RlpItem::decode(&rlp).map_err(|e| VesError::DecodeFail(format!("malformed rlp: {:?}", e)))
}

/// Minimal big-endian encoding; zero is the empty string
pub fn encode_uint(value: u64) -> Vec<u8> {
    let raw = value.to_be_bytes();
    let first = raw.iter().position(|b| *b != 0).unwrap_or(raw.len());
    raw[first..].to_vec()
}

/// Big-endian decoding, tolerant of leading zero bytes
pub fn decode_uint(bytes: &[u8]) -> VesResult<u64> {
    let first = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    let significant = &bytes[first..];
    if significant.len() > 8 {
        return Err(VesError::DecodeFail(format!(
            "integer of {} bytes overflows u64",
            significant.len()
        )));
    }
    Ok(significant
        .iter()
        .fold(0u64, |acc, b| (acc << 8) | u64::from(*b)))
}

/// Rebuild a JSON value with every object's keys in sorted order
pub fn canonical_json(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<&String, Value> =
                map.iter().map(|(k, v)| (k, canonical_json(v))).collect();
            let mut out = Map::new();
            for (k, v) in sorted {
                out.insert(k.clone(), v);
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonical_json).collect()),
        other => other.clone(),
    }
}
