//! A single compiled session and its per-transaction progress

use super::SessionId;
use crate::attestation::Content;
use crate::error::{VesError, VesResult};
use crate::intent::{TransactionIntent, TransactionIntents};
use crate::state::{describe, StateType, TransactionState};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

/// Compiled transactions of one session plus where each one stands
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    intents: TransactionIntents,
    progress: Vec<Mutex<TransactionState>>,
    approved: AtomicBool,
    /// Insurance contract data, keyed by field name
    insurance: DashMap<String, Value>,
    created_at: DateTime<Utc>,
}

impl Session {
    pub fn new(id: SessionId, intents: TransactionIntents) -> Self {
        let progress = intents
            .intents
            .iter()
            .map(|_| Mutex::new(TransactionState::new()))
            .collect();
        Self {
            id,
            intents,
            progress,
            approved: AtomicBool::new(false),
            insurance: DashMap::new(),
            created_at: Utc::now(),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn intents(&self) -> &TransactionIntents {
        &self.intents
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn is_approved(&self) -> bool {
        self.approved.load(Ordering::Acquire)
    }

    pub(crate) fn approve(&self) {
        self.approved.store(true, Ordering::Release);
    }

    pub fn transaction(&self, tx_index: u64) -> VesResult<&TransactionIntent> {
        usize::try_from(tx_index)
            .ok()
            .and_then(|idx| self.intents.get(idx))
            .ok_or(VesError::TransactionNotFound {
                session_id: self.id,
                tx_index,
            })
    }

    /// Content a party signs to move `tx_index` into `state`
    pub fn content_for(&self, tx_index: u64, state: StateType) -> VesResult<Content> {
        let transaction = self.transaction(tx_index)?.to_json();
        Ok(Content::new(transaction, state, self.id, tx_index))
    }

    pub fn state_of(&self, tx_index: u64) -> VesResult<Option<StateType>> {
        self.transaction(tx_index)?;
        Ok(self.lock(tx_index as usize)?.current())
    }

    /// Every transaction has reached `closed`
    pub fn is_complete(&self) -> VesResult<bool> {
        for idx in 0..self.progress.len() {
            if self.lock(idx)?.current() != Some(StateType::Closed) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Compare-and-set the tracked state of `tx_index` from the immediate
    /// predecessor of `to`. Entering `inited` additionally requires every
    /// dependency predecessor to be `closed`.
    pub fn advance(&self, tx_index: u64, to: StateType) -> VesResult<StateType> {
        let name = self.transaction(tx_index)?.name.clone();
        let idx = tx_index as usize;

        if to == StateType::initial() {
            self.check_predecessors(tx_index, &name)?;
        }

        let mut state = self.lock(idx)?;
        let found = state.current();
        state
            .advance(to)
            .map_err(|_| VesError::StateConflict {
                session_id: self.id,
                tx_index,
                expected: describe(to.previous()),
                found: describe(found),
            })?;

        debug!(
            "Session {} transaction {} ({}) advanced {} -> {}",
            self.id,
            tx_index,
            name,
            describe(found),
            to
        );
        Ok(to)
    }

    fn check_predecessors(&self, tx_index: u64, name: &str) -> VesResult<()> {
        for pred in self.intents.predecessors(name) {
            let Some(pred_idx) = self.intents.index_of(pred) else {
                return Err(VesError::Internal(format!(
                    "dependency names unknown transaction {}",
                    pred
                )));
            };
            if self.lock(pred_idx)?.current() != Some(StateType::Closed) {
                return Err(VesError::DependencyPending {
                    session_id: self.id,
                    tx_index,
                    waiting_on: pred.to_string(),
                });
            }
        }
        Ok(())
    }

    fn lock(&self, idx: usize) -> VesResult<MutexGuard<'_, TransactionState>> {
        self.progress
            .get(idx)
            .ok_or(VesError::TransactionNotFound {
                session_id: self.id,
                tx_index: idx as u64,
            })?
            .lock()
            .map_err(|_| VesError::Internal(format!("session {} progress poisoned", self.id)))
    }

    pub fn set_insurance_data(&self, key: impl Into<String>, value: Value) {
        self.insurance.insert(key.into(), value);
    }

    pub fn insurance_data(&self, key: &str) -> Option<Value> {
        self.insurance.get(key).map(|entry| entry.value().clone())
    }

    /// JSON snapshot for the HTTP surface
    pub fn summary(&self) -> VesResult<Value> {
        let mut states = Vec::with_capacity(self.progress.len());
        for (idx, intent) in self.intents.intents.iter().enumerate() {
            let current = self.lock(idx)?.current();
            states.push(json!({
                "name": intent.name,
                "state": current.map(StateType::as_str),
            }));
        }
        Ok(json!({
            "session_id": self.id,
            "approved": self.is_approved(),
            "created_at": self.created_at.to_rfc3339(),
            "transaction_intents": self.intents.dictize(),
            "states": states,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intent::{Dependency, TransactionKind};
    use std::sync::Arc;

    fn session(deps: Vec<Dependency>) -> Session {
        let intents = TransactionIntents {
            intents: vec![
                TransactionIntent::new("T1", TransactionKind::Void),
                TransactionIntent::new("T2", TransactionKind::Void),
            ],
            dependencies: deps,
        };
        Session::new(7, intents)
    }

    fn run_to_closed(session: &Session, tx_index: u64) {
        for state in StateType::ALL {
            session.advance(tx_index, state).unwrap();
        }
    }

    #[test]
    fn test_advance_in_order() {
        let session = session(vec![]);
        assert_eq!(session.state_of(0).unwrap(), None);
        run_to_closed(&session, 0);
        assert_eq!(session.state_of(0).unwrap(), Some(StateType::Closed));
        assert!(!session.is_complete().unwrap());
        run_to_closed(&session, 1);
        assert!(session.is_complete().unwrap());
    }

    #[test]
    fn test_skip_is_state_conflict() {
        let session = session(vec![]);
        session.advance(0, StateType::Inited).unwrap();
        match session.advance(0, StateType::Opened).unwrap_err() {
            VesError::StateConflict { expected, found, .. } => {
                assert_eq!(expected, "open");
                assert_eq!(found, "inited");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_dependency_blocks_inited() {
        let session = session(vec![Dependency::new("T1", "T2")]);
        let err = session.advance(1, StateType::Inited).unwrap_err();
        assert!(matches!(err, VesError::DependencyPending { ref waiting_on, .. } if waiting_on == "T1"));

        run_to_closed(&session, 0);
        session.advance(1, StateType::Inited).unwrap();
    }

    #[test]
    fn test_unknown_transaction() {
        let session = session(vec![]);
        assert!(matches!(
            session.advance(5, StateType::Inited),
            Err(VesError::TransactionNotFound { tx_index: 5, .. })
        ));
    }

    #[test]
    fn test_concurrent_advance_single_winner() {
        let session = Arc::new(session(vec![]));
        session.advance(0, StateType::Inited).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let session = session.clone();
                std::thread::spawn(move || session.advance(0, StateType::Open).is_ok())
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();

        assert_eq!(winners, 1);
        assert_eq!(session.state_of(0).unwrap(), Some(StateType::Open));
    }

    #[test]
    fn test_content_and_insurance() {
        let session = session(vec![]);
        let content = session.content_for(1, StateType::Inited).unwrap();
        assert_eq!(content.session_id, 7);
        assert_eq!(content.transaction_id, 1);
        assert_eq!(content.transaction["name"], "T2");

        session.set_insurance_data("premium", json!(10));
        assert_eq!(session.insurance_data("premium"), Some(json!(10)));
        assert_eq!(session.insurance_data("missing"), None);

        let summary = session.summary().unwrap();
        assert_eq!(summary["states"][0]["state"], Value::Null);
        assert_eq!(summary["approved"], false);
    }
}
