//! Op-intent to transaction-intent compilation
//!
//! Each op intent expands, in input order, into one to three synthetic
//! transactions named `T1, T2, ...`. Multi-transaction expansions are
//! chained internally; declared dependencies then add the cross product of
//! the two intents' transactions.

use super::dns::ChainDns;
use super::op_intent::{
    ContractInvocation, ContractTarget, DependencyDecl, OpIntent, OpIntentsDocument, Payment,
};
use super::transaction::{ContractRef, TransactionIntent, TransactionKind};
use crate::codec::canonical_json;
use crate::error::{VesError, VesResult};

use serde_json::{json, Value};
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, info, warn};

/// Gas used when an inline contract is deployed before being invoked
pub const DEFAULT_DEPLOY_GAS: &str = "0x30d40";

/// Edge `from -> to`: `to` must not be attested or executed before `from`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Dependency {
    pub from: String,
    pub to: String,
}

impl Dependency {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}", self.from, self.to)
    }
}

/// Compiled transactions plus their precedence edges
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransactionIntents {
    pub intents: Vec<TransactionIntent>,
    pub dependencies: Vec<Dependency>,
}

impl TransactionIntents {
    pub fn len(&self) -> usize {
        self.intents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.intents.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&TransactionIntent> {
        self.intents.get(index)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.intents.iter().position(|tx| tx.name == name)
    }

    /// Names of transactions that must precede `name`
    pub fn predecessors<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.dependencies
            .iter()
            .filter(move |dep| dep.to == name)
            .map(|dep| dep.from.as_str())
    }

    pub fn dictize(&self) -> Value {
        json!({
            "intents": self.intents.iter().map(TransactionIntent::to_json).collect::<Vec<_>>(),
            "dependencies": self.dependencies.iter().map(ToString::to_string).collect::<Vec<_>>(),
        })
    }

    /// Pretty JSON with sorted keys, for logging and transmission
    pub fn jsonize(&self) -> VesResult<String> {
        let mut out = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut ser = serde_json::Serializer::with_formatter(&mut out, formatter);
        serde::Serialize::serialize(&canonical_json(&self.dictize()), &mut ser)?;
        String::from_utf8(out).map_err(|e| VesError::Internal(e.to_string()))
    }
}

/// Working state of one compilation
#[derive(Default)]
struct Generation {
    intents: Vec<TransactionIntent>,
    dependencies: Vec<Dependency>,
    /// op intent name -> generated transaction names, entry first
    expansions: HashMap<String, Vec<String>>,
}

impl Generation {
    fn push(&mut self, kind: TransactionKind) -> String {
        let name = format!("T{}", self.intents.len() + 1);
        self.intents.push(TransactionIntent::new(name.clone(), kind));
        name
    }

    /// Record an expansion and chain its transactions in generation order
    fn expand(&mut self, op_name: &str, names: Vec<String>) {
        for pair in names.windows(2) {
            self.dependencies.push(Dependency::new(&pair[0], &pair[1]));
        }
        self.expansions.insert(op_name.to_string(), names);
    }

    fn lookup(&self, op_name: &str) -> VesResult<&[String]> {
        self.expansions
            .get(op_name)
            .map(Vec::as_slice)
            .ok_or_else(|| VesError::Generation(format!("unknown op intent: {}", op_name)))
    }
}

/// Compiles op intents against a chain DNS
pub struct IntentCompiler<'a> {
    dns: &'a dyn ChainDns,
    deploy_gas: String,
}

impl<'a> IntentCompiler<'a> {
    pub fn new(dns: &'a dyn ChainDns) -> Self {
        Self {
            dns,
            deploy_gas: DEFAULT_DEPLOY_GAS.to_string(),
        }
    }

    pub fn with_deploy_gas(mut self, gas: impl Into<String>) -> Self {
        self.deploy_gas = gas.into();
        self
    }

    pub fn compile_document(&self, document: &OpIntentsDocument) -> VesResult<TransactionIntents> {
        self.compile(&document.op_intents, &document.dependencies)
    }

    /// All-or-nothing: any failure discards the partial result
    pub fn compile(
        &self,
        op_intents: &[OpIntent],
        dependencies: &[DependencyDecl],
    ) -> VesResult<TransactionIntents> {
        let mut gen = Generation::default();

        for op_intent in op_intents {
            if gen.expansions.contains_key(op_intent.name()) {
                return Err(VesError::Generation(format!(
                    "duplicate op intent name: {}",
                    op_intent.name()
                )));
            }
            match op_intent {
                OpIntent::Payment(payment) => self.payment(&mut gen, payment)?,
                OpIntent::ContractInvocation(invocation) => {
                    self.invocation(&mut gen, invocation)?
                }
            }
        }

        for decl in dependencies {
            let (left, right) = match (&decl.left, &decl.right) {
                (Some(left), Some(right)) => (left, right),
                _ => {
                    return Err(VesError::Generation(
                        "attribute left/right missing".to_string(),
                    ))
                }
            };
            let (from, to) = match decl.dep.as_deref() {
                None | Some("before") => (gen.lookup(left)?, gen.lookup(right)?),
                Some("after") => (gen.lookup(right)?, gen.lookup(left)?),
                Some(other) => {
                    return Err(VesError::Generation(format!(
                        "unsupported dependency-type: {}",
                        other
                    )))
                }
            };
            let edges: Vec<Dependency> = from
                .iter()
                .flat_map(|u| to.iter().map(move |v| Dependency::new(u, v)))
                .collect();
            gen.dependencies.extend(edges);
        }

        info!(
            "Compiled {} op intents into {} transaction intents with {} dependencies",
            op_intents.len(),
            gen.intents.len(),
            gen.dependencies.len()
        );
        crate::metrics::record_intents_compiled(gen.intents.len());

        Ok(TransactionIntents {
            intents: gen.intents,
            dependencies: gen.dependencies,
        })
    }

    /// Source-side transfer into the relay, then destination-side transfer
    /// out of the relay
    fn payment(&self, gen: &mut Generation, payment: &Payment) -> VesResult<()> {
        let src_type = payment.src.domain.supported_type()?;
        let dst_type = payment.dst.domain.supported_type()?;
        let unit = payment.unit()?;

        let src_user = self.dns.check_user(&payment.src.domain, &payment.src.user_name)?;
        let src_relay = self.dns.check_relay(&payment.src.domain)?;
        let first = gen.push(TransactionKind::Transfer {
            chain_type: src_type,
            chain_id: payment.src.domain.chain_id.clone(),
            src: src_user,
            dst: src_relay,
            fund: payment.amount,
            fund_unit: unit.clone(),
        });

        let dst_relay = self.dns.check_relay(&payment.dst.domain)?;
        let dst_user = self.dns.check_user(&payment.dst.domain, &payment.dst.user_name)?;
        let second = gen.push(TransactionKind::Transfer {
            chain_type: dst_type,
            chain_id: payment.dst.domain.chain_id.clone(),
            src: dst_relay,
            dst: dst_user,
            fund: payment.amount,
            fund_unit: unit,
        });

        debug!("Payment {} -> [{}, {}]", payment.name, first, second);
        gen.expand(&payment.name, vec![first, second]);
        Ok(())
    }

    fn invocation(&self, gen: &mut Generation, invocation: &ContractInvocation) -> VesResult<()> {
        let chain = &invocation.contract_domain;
        let chain_type = chain.supported_type()?;
        let invoker = self.dns.check_user(chain, &invocation.invoker)?;

        let names = match (&invocation.target, &invocation.func) {
            (ContractTarget::Address(address), Some(func)) => {
                vec![gen.push(TransactionKind::Invoke {
                    chain_type,
                    chain_id: chain.chain_id.clone(),
                    src: invoker,
                    dst: ContractRef::Address(*address),
                    func: func.clone(),
                    parameters: invocation.parameters.clone(),
                    parameters_description: invocation.parameters_description.clone(),
                })]
            }
            (ContractTarget::Address(_), None) => {
                warn!(
                    "transaction T{} has no effect: {} names a deployed contract but no function",
                    gen.intents.len() + 1,
                    invocation.name
                );
                vec![gen.push(TransactionKind::Void)]
            }
            (ContractTarget::Code(code), Some(func)) => {
                let deploy = gen.push(TransactionKind::Deploy {
                    chain_type,
                    chain_id: chain.chain_id.clone(),
                    code: code.clone(),
                    gas: self.deploy_gas.clone(),
                });
                let invoke = gen.push(TransactionKind::Invoke {
                    chain_type,
                    chain_id: chain.chain_id.clone(),
                    src: invoker,
                    dst: ContractRef::DeployOutput(deploy.clone()),
                    func: func.clone(),
                    parameters: invocation.parameters.clone(),
                    parameters_description: invocation.parameters_description.clone(),
                });
                vec![deploy, invoke]
            }
            (ContractTarget::Code(code), None) => {
                vec![gen.push(TransactionKind::Deploy {
                    chain_type,
                    chain_id: chain.chain_id.clone(),
                    code: code.clone(),
                    gas: invocation
                        .gas
                        .clone()
                        .unwrap_or_else(|| self.deploy_gas.clone()),
                })]
            }
        };

        debug!("ContractInvocation {} -> {:?}", invocation.name, names);
        gen.expand(&invocation.name, names);
        Ok(())
    }
}
