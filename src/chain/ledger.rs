//! Ledger RPC seam and receipt polling

use crate::error::{VesError, VesResult};

use async_trait::async_trait;
use ethers::types::{Address, TransactionReceipt, TransactionRequest, H256};
use std::time::Duration;
use tokio::time::timeout;
use tracing::debug;

/// Calls the core makes against a ledger node
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LedgerRpc: Send + Sync {
    /// Raw storage slot of a contract, used to read chain state and proofs
    async fn get_storage_at(&self, address: Address, slot: H256) -> VesResult<H256>;

    /// Submit a transaction from an account the node holds
    async fn send_transaction(&self, tx: TransactionRequest) -> VesResult<H256>;

    /// Receipt if the transaction is mined, `None` otherwise
    async fn get_transaction_receipt(&self, tx_hash: H256)
        -> VesResult<Option<TransactionReceipt>>;

    /// Unlock a node-held account for `duration_secs`
    async fn unlock_account(
        &self,
        account: Address,
        passphrase: String,
        duration_secs: u64,
    ) -> VesResult<()>;
}

async fn poll_receipt<L: LedgerRpc + ?Sized>(
    ledger: &L,
    tx_hash: H256,
    poll_interval: Duration,
) -> VesResult<TransactionReceipt> {
    loop {
        if let Some(receipt) = ledger.get_transaction_receipt(tx_hash).await? {
            return Ok(receipt);
        }
        debug!("Receipt for {:?} not yet available", tx_hash);
        tokio::time::sleep(poll_interval).await;
    }
}

/// Poll for a receipt every `poll_interval`, giving up after `limit`
pub async fn wait_for_receipt<L: LedgerRpc + ?Sized>(
    ledger: &L,
    tx_hash: H256,
    poll_interval: Duration,
    limit: Duration,
) -> VesResult<TransactionReceipt> {
    timeout(limit, poll_receipt(ledger, tx_hash, poll_interval))
        .await
        .map_err(|_| VesError::Timeout {
            operation: format!("receipt of {:?}", tx_hash),
        })?
}
