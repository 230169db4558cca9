//! Transaction lifecycle state machine
//!
//! Every transaction intent of a session moves through
//! `inited -> open -> opened -> closed`. The current state is carried in
//! field 1 of an attestation's content, so each state gets its own
//! attestation and its own signature chain.

mod machine;

pub use machine::{describe, StateType, TransactionState};
