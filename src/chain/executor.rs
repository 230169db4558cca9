//! Executes compiled transaction intents against their ledgers

use super::ledger::{wait_for_receipt, LedgerRpc};
use crate::error::{VesError, VesResult};
use crate::intent::{
    ChainDns, ChainDomain, ContractRef, TransactionIntent, TransactionIntents, TransactionKind,
};
use crate::metrics;

use ethers::abi::param_type::Reader;
use ethers::abi::token::{LenientTokenizer, Tokenizer};
use ethers::abi::Token;
use ethers::types::{Address, Bytes, TransactionRequest, H256, U256};
use ethers::utils::{id, parse_units};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct ExecutorOptions {
    pub poll_interval: Duration,
    pub receipt_timeout: Duration,
    pub unlock_duration_secs: u64,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(1000),
            receipt_timeout: Duration::from_secs(120),
            unlock_duration_secs: 20,
        }
    }
}

/// Result of executing one transaction intent
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionOutcome {
    pub name: String,
    /// `None` for skipped `void` intents
    pub tx_hash: Option<H256>,
    /// Set for deploys
    pub contract_address: Option<Address>,
}

/// Sends transaction intents to the ledger of their chain
pub struct TransactionExecutor {
    ledgers: HashMap<ChainDomain, Arc<dyn LedgerRpc>>,
    dns: Arc<dyn ChainDns>,
    passphrases: HashMap<Address, String>,
    options: ExecutorOptions,
    /// `T<n>` -> address of the contract it deployed
    deployed: HashMap<String, Address>,
}

impl TransactionExecutor {
    pub fn new(dns: Arc<dyn ChainDns>, options: ExecutorOptions) -> Self {
        Self {
            ledgers: HashMap::new(),
            dns,
            passphrases: HashMap::new(),
            options,
            deployed: HashMap::new(),
        }
    }

    pub fn with_ledger(mut self, chain: ChainDomain, ledger: Arc<dyn LedgerRpc>) -> Self {
        self.ledgers.insert(chain, ledger);
        self
    }

    pub fn with_passphrase(mut self, account: Address, passphrase: impl Into<String>) -> Self {
        self.passphrases.insert(account, passphrase.into());
        self
    }

    /// Address deployed by an executed `T<n>`
    pub fn deployed(&self, name: &str) -> Option<Address> {
        self.deployed.get(name).copied()
    }

    fn ledger(&self, chain: &ChainDomain) -> VesResult<&Arc<dyn LedgerRpc>> {
        self.ledgers.get(chain).ok_or_else(|| VesError::ChainConnection {
            chain_id: chain.chain_id.clone(),
            message: format!("no ledger configured for {}", chain),
        })
    }

    fn resolve(&self, target: &ContractRef) -> VesResult<Address> {
        match target {
            ContractRef::Address(addr) => Ok(*addr),
            ContractRef::DeployOutput(name) => self.deployed(name).ok_or_else(|| {
                VesError::Generation(format!("unresolved reference {}", target))
            }),
        }
    }

    /// Sender plus request for an intent, `None` for `void`
    fn build_request(
        &self,
        intent: &TransactionIntent,
    ) -> VesResult<Option<(ChainDomain, Address, TransactionRequest)>> {
        let Some(chain) = intent.kind.chain() else {
            return Ok(None);
        };

        let (sender, request) = match &intent.kind {
            TransactionKind::Transfer {
                src,
                dst,
                fund,
                fund_unit,
                ..
            } => {
                let value: U256 = parse_units(fund.to_string(), fund_unit.as_str())
                    .map_err(|e| {
                        VesError::Generation(format!("bad amount {} {}: {}", fund, fund_unit, e))
                    })?
                    .into();
                (*src, TransactionRequest::new().from(*src).to(*dst).value(value))
            }
            TransactionKind::Invoke {
                src,
                dst,
                func,
                parameters,
                parameters_description,
                ..
            } => {
                let contract = self.resolve(dst)?;
                let data = encode_call(
                    func,
                    parameters.as_ref(),
                    parameters_description.as_ref(),
                )?;
                (
                    *src,
                    TransactionRequest::new().from(*src).to(contract).data(data),
                )
            }
            TransactionKind::Deploy { code, gas, .. } => {
                let deployer = self.dns.check_relay(&chain)?;
                let code = hex::decode(code.trim_start_matches("0x"))
                    .map_err(|e| VesError::Generation(format!("contract code is not hex: {}", e)))?;
                let gas = U256::from_str_radix(gas.trim_start_matches("0x"), 16)
                    .map_err(|e| VesError::Generation(format!("bad gas {}: {}", gas, e)))?;
                (
                    deployer,
                    TransactionRequest::new()
                        .from(deployer)
                        .data(Bytes::from(code))
                        .gas(gas),
                )
            }
            TransactionKind::Void => return Ok(None),
        };

        Ok(Some((chain, sender, request)))
    }

    /// Execute one intent and wait for its receipt
    pub async fn execute(&mut self, intent: &TransactionIntent) -> VesResult<ExecutionOutcome> {
        let Some((chain, sender, request)) = self.build_request(intent)? else {
            debug!("Skipping void transaction {}", intent.name);
            return Ok(ExecutionOutcome {
                name: intent.name.clone(),
                tx_hash: None,
                contract_address: None,
            });
        };

        let ledger = self.ledger(&chain)?.clone();
        if let Some(passphrase) = self.passphrases.get(&sender) {
            ledger
                .unlock_account(sender, passphrase.clone(), self.options.unlock_duration_secs)
                .await?;
        }

        let started = Instant::now();
        let tx_hash = ledger.send_transaction(request).await?;
        info!("Sent {} on {}: {:?}", intent.name, chain, tx_hash);

        let receipt = wait_for_receipt(
            ledger.as_ref(),
            tx_hash,
            self.options.poll_interval,
            self.options.receipt_timeout,
        )
        .await?;
        metrics::record_receipt_latency(&chain.chain_id, started.elapsed().as_secs_f64());

        if receipt.status == Some(0u64.into()) {
            return Err(VesError::Ledger(format!(
                "{} reverted in {:?}",
                intent.name, tx_hash
            )));
        }

        let contract_address = match &intent.kind {
            TransactionKind::Deploy { .. } => {
                let address = receipt.contract_address.ok_or_else(|| {
                    VesError::Ledger(format!("deploy {} returned no contract address", intent.name))
                })?;
                self.deployed.insert(intent.name.clone(), address);
                Some(address)
            }
            _ => None,
        };

        metrics::record_tx_executed(&chain.chain_id, intent.kind.trans_type());
        Ok(ExecutionOutcome {
            name: intent.name.clone(),
            tx_hash: Some(tx_hash),
            contract_address,
        })
    }

    /// Execute every intent in an order that honours the dependency edges
    pub async fn execute_all(
        &mut self,
        intents: &TransactionIntents,
    ) -> VesResult<Vec<ExecutionOutcome>> {
        let mut outcomes = Vec::with_capacity(intents.len());
        for idx in execution_order(intents)? {
            outcomes.push(self.execute(&intents.intents[idx]).await?);
        }
        Ok(outcomes)
    }
}

/// Topological order over the dependency edges, ties broken by index
pub fn execution_order(intents: &TransactionIntents) -> VesResult<Vec<usize>> {
    let n = intents.len();
    let mut indegree = vec![0usize; n];
    let mut successors: Vec<Vec<usize>> = vec![Vec::new(); n];

    for dep in &intents.dependencies {
        let (Some(from), Some(to)) = (intents.index_of(&dep.from), intents.index_of(&dep.to))
        else {
            return Err(VesError::Generation(format!("dangling dependency {}", dep)));
        };
        successors[from].push(to);
        indegree[to] += 1;
    }

    let mut ready: VecDeque<usize> = (0..n).filter(|&i| indegree[i] == 0).collect();
    let mut order = Vec::with_capacity(n);
    while let Some(idx) = ready.pop_front() {
        order.push(idx);
        let mut next: Vec<usize> = Vec::new();
        for &succ in &successors[idx] {
            indegree[succ] -= 1;
            if indegree[succ] == 0 {
                next.push(succ);
            }
        }
        next.sort_unstable();
        ready.extend(next);
    }

    if order.len() != n {
        warn!("Dependency cycle among transaction intents");
        return Err(VesError::Generation(
            "dependency cycle among transaction intents".to_string(),
        ));
    }
    Ok(order)
}

/// Calldata for `func(types...)`; types come from `parameters_description`
fn encode_call(
    func: &str,
    parameters: Option<&Value>,
    description: Option<&Value>,
) -> VesResult<Bytes> {
    let values = match parameters {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(values)) => values.clone(),
        Some(single) => vec![single.clone()],
    };
    let types: Vec<String> = match description {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(types)) => types
            .iter()
            .map(|t| {
                t.as_str().map(str::to_string).ok_or_else(|| {
                    VesError::Generation(format!("parameter type {} is not a string", t))
                })
            })
            .collect::<VesResult<_>>()?,
        Some(other) => {
            return Err(VesError::Generation(format!(
                "parameters_description must be a list of types, got {}",
                other
            )))
        }
    };
    if types.len() != values.len() {
        return Err(VesError::Generation(format!(
            "{} takes {} parameters, {} given",
            func,
            types.len(),
            values.len()
        )));
    }

    let mut tokens: Vec<Token> = Vec::with_capacity(values.len());
    for (ty, value) in types.iter().zip(&values) {
        let param = Reader::read(ty)
            .map_err(|e| VesError::Generation(format!("bad parameter type {}: {}", ty, e)))?;
        let text = match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        let token = LenientTokenizer::tokenize(&param, &text)
            .map_err(|e| VesError::Generation(format!("bad {} value {}: {}", ty, text, e)))?;
        tokens.push(token);
    }

    let signature = format!("{}({})", func, types.join(","));
    let mut data = id(&signature).to_vec();
    data.extend(ethers::abi::encode(&tokens));
    Ok(Bytes::from(data))
}

#[cfg(test)]
mod tests {
    use super::super::ledger::MockLedgerRpc;
    use super::*;
    use crate::intent::{ChainType, Dependency, StaticChainDns};
    use ethers::types::TransactionReceipt;
    use mockall::predicate::eq;
    use serde_json::json;

    fn chain() -> ChainDomain {
        ChainDomain::new("Ethereum", "chain1")
    }

    fn dns() -> Arc<dyn ChainDns> {
        Arc::new(StaticChainDns::new().with_relay(chain(), Address::repeat_byte(0x91)))
    }

    fn options() -> ExecutorOptions {
        ExecutorOptions {
            poll_interval: Duration::from_millis(1),
            receipt_timeout: Duration::from_secs(1),
            unlock_duration_secs: 20,
        }
    }

    fn mined(contract: Option<Address>) -> TransactionReceipt {
        TransactionReceipt {
            status: Some(1u64.into()),
            contract_address: contract,
            ..Default::default()
        }
    }

    fn deploy(name: &str) -> TransactionIntent {
        TransactionIntent::new(
            name,
            TransactionKind::Deploy {
                chain_type: ChainType::Ethereum,
                chain_id: "chain1".to_string(),
                code: "0x6080".to_string(),
                gas: "0x30d40".to_string(),
            },
        )
    }

    fn invoke(name: &str, dst: ContractRef) -> TransactionIntent {
        TransactionIntent::new(
            name,
            TransactionKind::Invoke {
                chain_type: ChainType::Ethereum,
                chain_id: "chain1".to_string(),
                src: Address::repeat_byte(0x11),
                dst,
                func: "deposit".to_string(),
                parameters: Some(json!([10])),
                parameters_description: Some(json!(["uint256"])),
            },
        )
    }

    #[tokio::test]
    async fn test_deploy_then_invoke_resolves_forward_reference() {
        let contract = Address::repeat_byte(0xcc);
        let mut ledger = MockLedgerRpc::new();
        ledger
            .expect_send_transaction()
            .times(2)
            .returning(|_| Ok(H256::repeat_byte(1)));
        ledger
            .expect_get_transaction_receipt()
            .returning(move |_| Ok(Some(mined(Some(contract)))));
        ledger
            .expect_unlock_account()
            .with(eq(Address::repeat_byte(0x11)), eq("pw".to_string()), eq(20u64))
            .times(1)
            .returning(|_, _, _| Ok(()));

        let mut executor = TransactionExecutor::new(dns(), options())
            .with_ledger(chain(), Arc::new(ledger))
            .with_passphrase(Address::repeat_byte(0x11), "pw");

        let intents = TransactionIntents {
            intents: vec![deploy("T1"), invoke("T2", ContractRef::DeployOutput("T1".into()))],
            dependencies: vec![Dependency::new("T1", "T2")],
        };
        let outcomes = executor.execute_all(&intents).await.unwrap();

        assert_eq!(outcomes[0].contract_address, Some(contract));
        assert_eq!(outcomes[1].contract_address, None);
        assert_eq!(executor.deployed("T1"), Some(contract));
    }

    #[tokio::test]
    async fn test_unresolved_reference() {
        let ledger = MockLedgerRpc::new();
        let mut executor =
            TransactionExecutor::new(dns(), options()).with_ledger(chain(), Arc::new(ledger));
        let err = executor
            .execute(&invoke("T2", ContractRef::DeployOutput("T1".into())))
            .await
            .unwrap_err();
        assert!(matches!(err, VesError::Generation(ref m) if m.contains("@T1.address")));
    }

    #[tokio::test]
    async fn test_void_is_skipped() {
        let mut executor = TransactionExecutor::new(dns(), options());
        let outcome = executor
            .execute(&TransactionIntent::new("T1", TransactionKind::Void))
            .await
            .unwrap();
        assert_eq!(outcome.tx_hash, None);
    }

    #[tokio::test]
    async fn test_unlock_failure_surfaces() {
        let mut ledger = MockLedgerRpc::new();
        ledger.expect_unlock_account().returning(|account, _, _| {
            Err(VesError::UnlockFailed {
                account: format!("{:?}", account),
            })
        });
        ledger.expect_send_transaction().never();

        let mut executor = TransactionExecutor::new(dns(), options())
            .with_ledger(chain(), Arc::new(ledger))
            .with_passphrase(Address::repeat_byte(0x11), "wrong");
        let err = executor
            .execute(&invoke("T1", ContractRef::Address(Address::repeat_byte(0xcc))))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("unlock failed"));
    }

    #[tokio::test]
    async fn test_reverted_transaction() {
        let mut ledger = MockLedgerRpc::new();
        ledger
            .expect_send_transaction()
            .returning(|_| Ok(H256::repeat_byte(2)));
        ledger.expect_get_transaction_receipt().returning(|_| {
            Ok(Some(TransactionReceipt {
                status: Some(0u64.into()),
                ..Default::default()
            }))
        });

        let mut executor =
            TransactionExecutor::new(dns(), options()).with_ledger(chain(), Arc::new(ledger));
        let err = executor.execute(&deploy("T1")).await.unwrap_err();
        assert!(matches!(err, VesError::Ledger(_)));
        assert_eq!(executor.deployed("T1"), None);
    }

    #[test]
    fn test_execution_order_follows_edges() {
        let intents = TransactionIntents {
            intents: vec![
                TransactionIntent::new("T1", TransactionKind::Void),
                TransactionIntent::new("T2", TransactionKind::Void),
                TransactionIntent::new("T3", TransactionKind::Void),
            ],
            dependencies: vec![
                Dependency::new("T1", "T2"),
                Dependency::new("T3", "T1"),
                Dependency::new("T3", "T2"),
            ],
        };
        assert_eq!(execution_order(&intents).unwrap(), vec![2, 0, 1]);

        let mut cyclic = intents.clone();
        cyclic.dependencies.push(Dependency::new("T2", "T3"));
        assert!(matches!(
            execution_order(&cyclic),
            Err(VesError::Generation(_))
        ));
    }

    #[test]
    fn test_encode_call_selector() {
        let data = encode_call("deposit", Some(&json!([10])), Some(&json!(["uint256"]))).unwrap();
        assert_eq!(&data[..4], &id("deposit(uint256)")[..]);
        assert_eq!(data.len(), 4 + 32);
        assert_eq!(data[35], 10);

        assert!(encode_call("deposit", Some(&json!([1, 2])), Some(&json!(["uint256"]))).is_err());
        let bare = encode_call("ping", None, None).unwrap();
        assert_eq!(bare.len(), 4);
    }
}
