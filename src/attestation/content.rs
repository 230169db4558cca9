//! Attestation content: `[executable transaction, state, session id, transaction id]`

use crate::codec::{canonical_json, decode_uint, encode_uint, RlpItem};
use crate::error::{VesError, VesResult};
use crate::session::SessionId;
use crate::state::StateType;

use serde_json::Value;

/// Number of fields in encoded content
pub const CONTENT_FIELDS: usize = 4;

/// The attested statement
#[derive(Debug, Clone, PartialEq)]
pub struct Content {
    /// Executable transaction as a JSON document. Not validated here.
    pub transaction: Value,
    pub state: StateType,
    pub session_id: SessionId,
    pub transaction_id: u64,
}

impl Content {
    pub fn new(
        transaction: Value,
        state: StateType,
        session_id: SessionId,
        transaction_id: u64,
    ) -> Self {
        Self {
            transaction,
            state,
            session_id,
            transaction_id,
        }
    }

    /// Same statement in a different lifecycle state
    pub fn with_state(&self, state: StateType) -> Self {
        Self {
            state,
            ..self.clone()
        }
    }

    /// Encode to the 4-field list. Object keys come out sorted.
    pub fn encode(&self) -> VesResult<RlpItem> {
        let transaction = serde_json::to_vec(&canonical_json(&self.transaction))?;
        Ok(RlpItem::list(vec![
            RlpItem::bytes(transaction),
            RlpItem::bytes(vec![self.state.as_byte()]),
            RlpItem::bytes(encode_uint(u64::from(self.session_id))),
            RlpItem::bytes(encode_uint(self.transaction_id)),
        ]))
    }

    /// Decode the 4-field list; any field of the wrong type is `DecodeFail`
    pub fn decode(item: &RlpItem) -> VesResult<Self> {
        let fields = item.expect_list(CONTENT_FIELDS, "content [T, State, Sid, Tid]")?;

        let transaction = serde_json::from_slice(fields[0].expect_bytes("transaction")?)
            .map_err(|e| {
                VesError::DecodeFail(format!("failed when recovering content, {}", e))
            })?;
        let state = StateType::try_from(decode_uint(fields[1].expect_bytes("state")?)?)?;
        let session_id = decode_uint(fields[2].expect_bytes("session id")?)?;
        let session_id = SessionId::try_from(session_id).map_err(|_| {
            VesError::DecodeFail(format!("session id {} out of range", session_id))
        })?;
        let transaction_id = decode_uint(fields[3].expect_bytes("transaction id")?)?;

        Ok(Self {
            transaction,
            state,
            session_id,
            transaction_id,
        })
    }
}
