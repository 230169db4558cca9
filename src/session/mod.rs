//! Session registry (VES)
//!
//! Owns every live session: allocates ids, compiles the submitted op
//! intents, tracks per-transaction lifecycle progress and accepts verified
//! attestations.

mod record;
mod registry;

pub use record::Session;
pub use registry::{RegistryOptions, SessionRegistry};

/// Session identifier
pub type SessionId = u32;

/// Reserved id that never names a real session
pub const INVALID_SESSION: SessionId = 0;
