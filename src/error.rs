//! Error types for the verifiable execution system

use crate::state::StateType;
use thiserror::Error;

/// Main error type for the VES
#[derive(Error, Debug)]
pub enum VesError {
    /// An Op-intent is malformed: missing attribute, unknown op_type,
    /// or both/neither of contract_addr and contract_code.
    #[error("Initialize error: {0}")]
    Initialize(String),

    /// Transaction intent generation failed (unknown intent name,
    /// unsupported chain type, unsupported dependency relation).
    #[error("Generation error: {0}")]
    Generation(String),

    #[error("Decode failed: {0}")]
    DecodeFail(String),

    #[error("Signature {index} verification failed: claimed {claimed}, recovered {recovered}")]
    Verification {
        index: usize,
        claimed: String,
        recovered: String,
    },

    #[error("Signing error: {0}")]
    Signing(String),

    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: StateType },

    #[error("State conflict on transaction {tx_index} of session {session_id}: expected {expected}, found {found}")]
    StateConflict {
        session_id: u32,
        tx_index: u64,
        expected: String,
        found: String,
    },

    #[error("Attestation does not match request: {0}")]
    AttestationMismatch(String),

    #[error("Session {session_id} not found")]
    SessionNotFound { session_id: u32 },

    #[error("Transaction {tx_index} not found in session {session_id}")]
    TransactionNotFound { session_id: u32, tx_index: u64 },

    #[error("Session {session_id} has not been approved")]
    SessionNotApproved { session_id: u32 },

    #[error("Transaction {tx_index} of session {session_id} is waiting on {waiting_on}")]
    DependencyPending {
        session_id: u32,
        tx_index: u64,
        waiting_on: String,
    },

    #[error("Session id space exhausted after {attempts} attempts")]
    SessionAllocation { attempts: u32 },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Chain connection error for chain {chain_id}: {message}")]
    ChainConnection { chain_id: String, message: String },

    #[error("unlock failed for {account}. wrong password?")]
    UnlockFailed { account: String },

    #[error("Ledger error: {0}")]
    Ledger(String),

    #[error("Timeout waiting for {operation}")]
    Timeout { operation: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl VesError {
    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            VesError::ChainConnection { .. } | VesError::Timeout { .. }
        )
    }

    /// Errors that invalidate the integrity of received data
    pub fn is_integrity_failure(&self) -> bool {
        matches!(
            self,
            VesError::DecodeFail(_)
                | VesError::Verification { .. }
                | VesError::AttestationMismatch(_)
        )
    }
}

impl From<serde_json::Error> for VesError {
    fn from(e: serde_json::Error) -> Self {
        VesError::Internal(e.to_string())
    }
}

/// Result type for VES operations
pub type VesResult<T> = Result<T, VesError>;
