//! Intent layer
//!
//! Parses dApp op intents, resolves names through the chain DNS and
//! compiles them into named, chain-specific transaction intents with
//! precedence edges.

mod compiler;
mod dns;
mod op_intent;
mod transaction;

pub use compiler::{Dependency, IntentCompiler, TransactionIntents, DEFAULT_DEPLOY_GAS};
pub use dns::{ChainDns, StaticChainDns};
pub use op_intent::{
    ChainDomain, ChainType, ContractInvocation, ContractTarget, DependencyDecl, Endpoint,
    OpIntent, OpIntentsDocument, Payment,
};
pub use transaction::{ContractRef, TransactionIntent, TransactionKind};
