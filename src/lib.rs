//! Verifiable execution system (VES)
//!
//! Compiles declarative op intents into chain-specific transaction intents
//! and drives each transaction through a signed, cumulatively countersigned
//! attestation lifecycle inside a session.

pub mod api;
pub mod attestation;
pub mod chain;
pub mod codec;
pub mod config;
pub mod error;
pub mod intent;
pub mod metrics;
pub mod session;
pub mod state;

pub use attestation::{Attestation, Content, SignatureEntry};
pub use error::{VesError, VesResult};
pub use intent::{IntentCompiler, OpIntentsDocument, TransactionIntents};
pub use session::{Session, SessionId, SessionRegistry, INVALID_SESSION};
pub use state::StateType;
