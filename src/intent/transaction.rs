//! Chain-specific transaction intents produced by the compiler

use super::op_intent::{ChainDomain, ChainType};

use ethers::types::{Address, U256};
use ethers::utils::to_checksum;
use serde_json::{json, Map, Value};
use std::fmt;

/// Target of an invoke: a known address, or the output of an earlier deploy
#[derive(Debug, Clone, PartialEq)]
pub enum ContractRef {
    Address(Address),
    /// `@T<n>.address`, resolved only once `T<n>` has executed
    DeployOutput(String),
}

impl ContractRef {
    /// Parse the JSON form back: `@T<n>.address` or a plain address
    pub fn parse(text: &str) -> Option<Self> {
        if let Some(rest) = text.strip_prefix('@') {
            return rest
                .strip_suffix(".address")
                .filter(|name| !name.is_empty())
                .map(|name| ContractRef::DeployOutput(name.to_string()));
        }
        text.parse().ok().map(ContractRef::Address)
    }
}

impl fmt::Display for ContractRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContractRef::Address(addr) => f.write_str(&to_checksum(addr, None)),
            ContractRef::DeployOutput(name) => write!(f, "@{}.address", name),
        }
    }
}

/// Kind-specific payload of a transaction intent
#[derive(Debug, Clone, PartialEq)]
pub enum TransactionKind {
    Transfer {
        chain_type: ChainType,
        chain_id: String,
        src: Address,
        dst: Address,
        fund: U256,
        fund_unit: String,
    },
    Invoke {
        chain_type: ChainType,
        chain_id: String,
        src: Address,
        dst: ContractRef,
        func: String,
        parameters: Option<Value>,
        parameters_description: Option<Value>,
    },
    Deploy {
        chain_type: ChainType,
        chain_id: String,
        code: String,
        gas: String,
    },
    /// Explicit no-op
    Void,
}

impl TransactionKind {
    pub fn trans_type(&self) -> &'static str {
        match self {
            TransactionKind::Transfer { .. } => "transfer",
            TransactionKind::Invoke { .. } => "invoke",
            TransactionKind::Deploy { .. } => "deploy",
            TransactionKind::Void => "void",
        }
    }

    /// Chain the transaction executes on; `None` for void
    pub fn chain(&self) -> Option<ChainDomain> {
        match self {
            TransactionKind::Transfer {
                chain_type,
                chain_id,
                ..
            }
            | TransactionKind::Invoke {
                chain_type,
                chain_id,
                ..
            }
            | TransactionKind::Deploy {
                chain_type,
                chain_id,
                ..
            } => Some(ChainDomain::new(chain_type.as_str(), chain_id.clone())),
            TransactionKind::Void => None,
        }
    }
}

/// One executable, ledger-specific transaction
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionIntent {
    /// Synthetic `T<n>` name, 1-indexed in generation order
    pub name: String,
    pub kind: TransactionKind,
}

impl TransactionIntent {
    pub fn new(name: impl Into<String>, kind: TransactionKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }

    /// JSON form carried in attestation content and the compiled document
    pub fn to_json(&self) -> Value {
        let mut obj = Map::new();
        obj.insert("name".to_string(), json!(self.name));
        obj.insert("trans_type".to_string(), json!(self.kind.trans_type()));

        match &self.kind {
            TransactionKind::Transfer {
                chain_type,
                chain_id,
                src,
                dst,
                fund,
                fund_unit,
            } => {
                obj.insert("chain_type".to_string(), json!(chain_type.as_str()));
                obj.insert("chain_id".to_string(), json!(chain_id));
                obj.insert("src".to_string(), json!(to_checksum(src, None)));
                obj.insert("dst".to_string(), json!(to_checksum(dst, None)));
                obj.insert("fund".to_string(), amount_json(fund));
                obj.insert("fund_unit".to_string(), json!(fund_unit));
            }
            TransactionKind::Invoke {
                chain_type,
                chain_id,
                src,
                dst,
                func,
                parameters,
                parameters_description,
            } => {
                obj.insert("chain_type".to_string(), json!(chain_type.as_str()));
                obj.insert("chain_id".to_string(), json!(chain_id));
                obj.insert("src".to_string(), json!(to_checksum(src, None)));
                obj.insert("dst".to_string(), json!(dst.to_string()));
                obj.insert("func".to_string(), json!(func));
                obj.insert(
                    "parameters".to_string(),
                    parameters.clone().unwrap_or(Value::Null),
                );
                obj.insert(
                    "parameters_description".to_string(),
                    parameters_description.clone().unwrap_or(Value::Null),
                );
            }
            TransactionKind::Deploy {
                chain_type,
                chain_id,
                code,
                gas,
            } => {
                obj.insert("chain_type".to_string(), json!(chain_type.as_str()));
                obj.insert("chain_id".to_string(), json!(chain_id));
                obj.insert("code".to_string(), json!(code));
                obj.insert("gas".to_string(), json!(gas));
            }
            TransactionKind::Void => {}
        }

        Value::Object(obj)
    }
}

/// Integers stay JSON numbers while they fit in u64
fn amount_json(amount: &U256) -> Value {
    if *amount <= U256::from(u64::MAX) {
        json!(amount.as_u64())
    } else {
        json!(amount.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contract_ref_forms() {
        let forward = ContractRef::DeployOutput("T3".to_string());
        assert_eq!(forward.to_string(), "@T3.address");
        assert_eq!(ContractRef::parse("@T3.address"), Some(forward));

        let addr = Address::repeat_byte(0xab);
        let literal = ContractRef::Address(addr);
        assert_eq!(ContractRef::parse(&literal.to_string()), Some(literal));

        assert_eq!(ContractRef::parse("@.address"), None);
        assert_eq!(ContractRef::parse("@T1"), None);
    }

    #[test]
    fn test_transfer_json() {
        let tx = TransactionIntent::new(
            "T1",
            TransactionKind::Transfer {
                chain_type: ChainType::Ethereum,
                chain_id: "chain1".to_string(),
                src: Address::repeat_byte(1),
                dst: Address::repeat_byte(2),
                fund: U256::from(20),
                fund_unit: "wei".to_string(),
            },
        );
        let value = tx.to_json();
        assert_eq!(value["name"], "T1");
        assert_eq!(value["trans_type"], "transfer");
        assert_eq!(value["fund"], 20);
        assert_eq!(value["chain_type"], "Ethereum");
        assert_eq!(tx.kind.chain(), Some(ChainDomain::new("Ethereum", "chain1")));
    }

    #[test]
    fn test_void_json_is_minimal() {
        let value = TransactionIntent::new("T4", TransactionKind::Void).to_json();
        assert_eq!(value, json!({"name": "T4", "trans_type": "void"}));
        assert_eq!(TransactionKind::Void.chain(), None);
    }

    #[test]
    fn test_large_amount_is_string() {
        let big = U256::from(u64::MAX) + U256::from(1);
        assert_eq!(amount_json(&big), json!("18446744073709551616"));
    }
}
