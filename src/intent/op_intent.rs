//! Declarative operation intents as submitted by dApps

use crate::error::{VesError, VesResult};

use ethers::types::{Address, U256};
use serde::{de, Deserialize, Deserializer};
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

/// Ledger families the compiler can generate transactions for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChainType {
    Ethereum,
}

impl ChainType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChainType::Ethereum => "Ethereum",
        }
    }

    /// Currency unit used when a payment names none
    pub fn default_unit(&self) -> &'static str {
        match self {
            ChainType::Ethereum => "wei",
        }
    }
}

impl FromStr for ChainType {
    type Err = VesError;

    fn from_str(s: &str) -> VesResult<Self> {
        match s {
            "Ethereum" => Ok(ChainType::Ethereum),
            other => Err(VesError::Generation(format!(
                "unsupported chain-type: {}",
                other
            ))),
        }
    }
}

impl fmt::Display for ChainType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `<chain_type>://<chain_id>`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChainDomain {
    pub chain_type: String,
    pub chain_id: String,
}

impl ChainDomain {
    pub fn new(chain_type: impl Into<String>, chain_id: impl Into<String>) -> Self {
        Self {
            chain_type: chain_type.into(),
            chain_id: chain_id.into(),
        }
    }

    /// Resolve the chain family, failing for anything unsupported
    pub fn supported_type(&self) -> VesResult<ChainType> {
        self.chain_type.parse()
    }
}

impl FromStr for ChainDomain {
    type Err = VesError;

    fn from_str(s: &str) -> VesResult<Self> {
        match s.split_once("://") {
            Some((chain_type, chain_id)) if !chain_type.is_empty() && !chain_id.is_empty() => {
                Ok(Self::new(chain_type, chain_id))
            }
            _ => Err(VesError::Initialize(format!(
                "domain must look like <chain_type>://<chain_id>, got {:?}",
                s
            ))),
        }
    }
}

impl fmt::Display for ChainDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.chain_type, self.chain_id)
    }
}

impl<'de> Deserialize<'de> for ChainDomain {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(de::Error::custom)
    }
}

/// An account on a specific chain, named for the chain DNS
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Endpoint {
    pub domain: ChainDomain,
    pub user_name: String,
}

/// Value transfer from `src` to `dst`
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Payment {
    pub name: String,
    #[serde(deserialize_with = "deserialize_amount")]
    pub amount: U256,
    pub src: Endpoint,
    pub dst: Endpoint,
    /// `None` falls back to the source chain's default unit
    #[serde(default)]
    pub unit: Option<String>,
}

impl Payment {
    pub fn unit(&self) -> VesResult<String> {
        match &self.unit {
            Some(unit) => Ok(unit.clone()),
            None => Ok(self.src.domain.supported_type()?.default_unit().to_string()),
        }
    }
}

/// Where the invoked contract lives: already deployed, or deployed inline
#[derive(Debug, Clone, PartialEq)]
pub enum ContractTarget {
    Address(Address),
    Code(String),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "RawInvocation")]
pub struct ContractInvocation {
    pub name: String,
    pub invoker: String,
    pub contract_domain: ChainDomain,
    pub func: Option<String>,
    pub parameters: Option<Value>,
    pub parameters_description: Option<Value>,
    pub target: ContractTarget,
    /// Gas for a deploy-only invocation
    pub gas: Option<String>,
}

/// Wire shape of a contract invocation; JSON `null` counts as absent
#[derive(Deserialize)]
struct RawInvocation {
    name: String,
    invoker: String,
    contract_domain: ChainDomain,
    #[serde(default)]
    func: Option<String>,
    #[serde(default)]
    parameters: Option<Value>,
    #[serde(default)]
    parameters_description: Option<Value>,
    #[serde(default)]
    contract_addr: Option<Address>,
    #[serde(default)]
    contract_code: Option<String>,
    #[serde(default)]
    gas: Option<String>,
}

impl TryFrom<RawInvocation> for ContractInvocation {
    type Error = VesError;

    fn try_from(raw: RawInvocation) -> VesResult<Self> {
        let target = match (raw.contract_addr, raw.contract_code) {
            (Some(address), None) => ContractTarget::Address(address),
            (None, Some(code)) => ContractTarget::Code(code),
            (Some(_), Some(_)) => {
                return Err(VesError::Initialize(
                    "only one of contract_addr and contract_code can be in the ContractInvocation intent"
                        .to_string(),
                ))
            }
            (None, None) => {
                return Err(VesError::Initialize(
                    "either contract_addr or contract_code must be in the ContractInvocation intent"
                        .to_string(),
                ))
            }
        };

        Ok(Self {
            name: raw.name,
            invoker: raw.invoker,
            contract_domain: raw.contract_domain,
            func: raw.func,
            parameters: raw.parameters,
            parameters_description: raw.parameters_description,
            target,
            gas: raw.gas,
        })
    }
}

/// One high-level operation, tagged by `op_type`
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "op_type")]
pub enum OpIntent {
    Payment(Payment),
    ContractInvocation(ContractInvocation),
}

impl OpIntent {
    pub fn name(&self) -> &str {
        match self {
            OpIntent::Payment(p) => &p.name,
            OpIntent::ContractInvocation(c) => &c.name,
        }
    }

    pub fn op_type(&self) -> &'static str {
        match self {
            OpIntent::Payment(_) => "Payment",
            OpIntent::ContractInvocation(_) => "ContractInvocation",
        }
    }

    /// Build an intent from its JSON object, checking every required field
    pub fn from_json(value: &Value) -> VesResult<Self> {
        OpIntent::deserialize(value).map_err(invalid_intent)
    }
}

fn invalid_intent(e: serde_json::Error) -> VesError {
    VesError::Initialize(format!("invalid Op intent: {}", e))
}

fn deserialize_amount<'de, D: Deserializer<'de>>(deserializer: D) -> Result<U256, D::Error> {
    let value = Value::deserialize(deserializer)?;
    parse_amount(&value).map_err(de::Error::custom)
}

/// Amounts are JSON integers or decimal / `0x` hex strings
fn parse_amount(value: &Value) -> VesResult<U256> {
    let parsed = match value {
        Value::Number(n) => n.as_u64().map(U256::from),
        Value::String(s) => match s.strip_prefix("0x") {
            Some(hex) => U256::from_str_radix(hex, 16).ok(),
            None => U256::from_dec_str(s).ok(),
        },
        _ => None,
    };
    parsed.ok_or_else(|| {
        VesError::Initialize(format!(
            "amount must be a non-negative integer, got {}",
            value
        ))
    })
}

/// A `{left, right, dep?}` declaration, validated during generation
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct DependencyDecl {
    pub left: Option<String>,
    pub right: Option<String>,
    pub dep: Option<String>,
}

/// The whole `{"Op-intents": [...], "dependencies": [...]}` document
#[derive(Debug, Clone, PartialEq)]
pub struct OpIntentsDocument {
    pub op_intents: Vec<OpIntent>,
    pub dependencies: Vec<DependencyDecl>,
}

impl OpIntentsDocument {
    pub fn from_json(value: &Value) -> VesResult<Self> {
        let raw_intents = value.get("Op-intents").ok_or_else(|| {
            VesError::Initialize("the document must carry an Op-intents list".to_string())
        })?;
        let op_intents = Vec::<OpIntent>::deserialize(raw_intents).map_err(invalid_intent)?;

        let mut seen = HashSet::new();
        for intent in &op_intents {
            if !seen.insert(intent.name()) {
                return Err(VesError::Initialize(format!(
                    "duplicate Op intent name: {}",
                    intent.name()
                )));
            }
        }

        let dependencies = match value.get("dependencies") {
            Some(deps) => Option::<Vec<DependencyDecl>>::deserialize(deps)
                .map_err(|e| {
                    VesError::Generation(format!("malformed dependency declaration: {}", e))
                })?
                .unwrap_or_default(),
            None => Vec::new(),
        };

        Ok(Self {
            op_intents,
            dependencies,
        })
    }

    pub fn parse(text: &str) -> VesResult<Self> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| VesError::Initialize(format!("Op intents are not JSON: {}", e)))?;
        Self::from_json(&value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payment_json() -> Value {
        json!({
            "name": "op1",
            "op_type": "Payment",
            "amount": 20,
            "src": {"domain": "Ethereum://chain1", "user_name": "a1"},
            "dst": {"domain": "Ethereum://chain2", "user_name": "a2"}
        })
    }

    #[test]
    fn test_payment_defaults_unit() {
        let intent = OpIntent::from_json(&payment_json()).unwrap();
        match intent {
            OpIntent::Payment(p) => {
                assert_eq!(p.amount, U256::from(20));
                assert_eq!(p.unit, None);
                assert_eq!(p.unit().unwrap(), "wei");
                assert_eq!(p.src.domain, ChainDomain::new("Ethereum", "chain1"));
            }
            other => panic!("unexpected intent {:?}", other),
        }
    }

    #[test]
    fn test_payment_explicit_unit_kept() {
        let mut value = payment_json();
        value["unit"] = json!("ether");
        let OpIntent::Payment(p) = OpIntent::from_json(&value).unwrap() else {
            panic!("expected payment");
        };
        assert_eq!(p.unit().unwrap(), "ether");
    }

    #[test]
    fn test_missing_attributes() {
        for key in ["name", "op_type", "amount", "src", "dst"] {
            let mut value = payment_json();
            value.as_object_mut().unwrap().remove(key);
            assert!(
                matches!(OpIntent::from_json(&value), Err(VesError::Initialize(_))),
                "missing {} should fail",
                key
            );
        }
    }

    #[test]
    fn test_unknown_op_type() {
        let mut value = payment_json();
        value["op_type"] = json!("Teleport");
        let err = OpIntent::from_json(&value).unwrap_err();
        assert!(matches!(err, VesError::Initialize(_)));
        assert!(err.to_string().contains("Teleport"));
    }

    #[test]
    fn test_invocation_exactly_one_target() {
        let base = json!({
            "name": "op2",
            "op_type": "ContractInvocation",
            "invoker": "a1",
            "contract_domain": "Ethereum://chain1",
            "func": "deposit"
        });

        let mut both = base.clone();
        both["contract_addr"] = json!("0x7c7b26fa65e091f7b9f23db77ad5f714f1dae5ea");
        both["contract_code"] = json!("0x6080");
        assert!(matches!(OpIntent::from_json(&both), Err(VesError::Initialize(_))));

        assert!(matches!(OpIntent::from_json(&base), Err(VesError::Initialize(_))));

        // null counts as absent
        let mut addr_with_null_code = base.clone();
        addr_with_null_code["contract_addr"] = json!("0x7c7b26fa65e091f7b9f23db77ad5f714f1dae5ea");
        addr_with_null_code["contract_code"] = Value::Null;
        let OpIntent::ContractInvocation(c) = OpIntent::from_json(&addr_with_null_code).unwrap()
        else {
            panic!("expected invocation");
        };
        assert!(matches!(c.target, ContractTarget::Address(_)));
        assert_eq!(c.func.as_deref(), Some("deposit"));
    }

    #[test]
    fn test_invocation_field_types() {
        let value = json!({
            "name": "op3",
            "op_type": "ContractInvocation",
            "invoker": "a1",
            "contract_domain": "Ethereum://chain1",
            "contract_addr": "not-an-address",
            "func": "deposit"
        });
        assert!(matches!(OpIntent::from_json(&value), Err(VesError::Initialize(_))));

        let mut deploy_only = value.clone();
        deploy_only["contract_addr"] = Value::Null;
        deploy_only["contract_code"] = json!("0x6080");
        deploy_only["func"] = Value::Null;
        deploy_only["parameters"] = Value::Null;
        deploy_only["gas"] = json!("0x5208");
        let OpIntent::ContractInvocation(c) = OpIntent::from_json(&deploy_only).unwrap() else {
            panic!("expected invocation");
        };
        assert_eq!(c.target, ContractTarget::Code("0x6080".to_string()));
        assert_eq!(c.func, None);
        assert_eq!(c.parameters, None);
        assert_eq!(c.gas.as_deref(), Some("0x5208"));

        let mut numeric_func = value;
        numeric_func["contract_addr"] = json!("0x7c7b26fa65e091f7b9f23db77ad5f714f1dae5ea");
        numeric_func["func"] = json!(7);
        assert!(matches!(OpIntent::from_json(&numeric_func), Err(VesError::Initialize(_))));
    }

    #[test]
    fn test_payment_amount_as_string() {
        let mut value = payment_json();
        value["amount"] = json!("0x14");
        let OpIntent::Payment(p) = OpIntent::from_json(&value).unwrap() else {
            panic!("expected payment");
        };
        assert_eq!(p.amount, U256::from(20));

        value["amount"] = json!(-3);
        assert!(matches!(OpIntent::from_json(&value), Err(VesError::Initialize(_))));
    }

    #[test]
    fn test_bad_domain() {
        let mut value = payment_json();
        value["src"]["domain"] = json!("Ethereum-chain1");
        assert!(matches!(OpIntent::from_json(&value), Err(VesError::Initialize(_))));
    }

    #[test]
    fn test_amount_forms() {
        assert_eq!(parse_amount(&json!("0x14")).unwrap(), U256::from(20));
        assert_eq!(
            parse_amount(&json!("20000000000000000000")).unwrap(),
            U256::from_dec_str("20000000000000000000").unwrap()
        );
        assert!(parse_amount(&json!(-1)).is_err());
        assert!(parse_amount(&json!(1.5)).is_err());
    }

    #[test]
    fn test_document_parsing() {
        let doc = OpIntentsDocument::from_json(&json!({
            "Op-intents": [payment_json()],
            "dependencies": [{"left": "op1", "right": "op1", "dep": "after"}]
        }))
        .unwrap();
        assert_eq!(doc.op_intents.len(), 1);
        assert_eq!(doc.dependencies[0].dep.as_deref(), Some("after"));

        let no_deps = OpIntentsDocument::from_json(&json!({"Op-intents": []})).unwrap();
        assert!(no_deps.dependencies.is_empty());

        let dup = OpIntentsDocument::from_json(&json!({
            "Op-intents": [payment_json(), payment_json()]
        }));
        assert!(matches!(dup, Err(VesError::Initialize(_))));
    }

    #[test]
    fn test_chain_type_support() {
        assert_eq!("Ethereum".parse::<ChainType>().unwrap(), ChainType::Ethereum);
        assert!(matches!(
            "Tendermint".parse::<ChainType>(),
            Err(VesError::Generation(_))
        ));
    }
}
