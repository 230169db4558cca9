//! Session id allocation and attestation intake

use super::{Session, SessionId, INVALID_SESSION};
use crate::attestation::Attestation;
use crate::config::VesConfig;
use crate::error::{VesError, VesResult};
use crate::intent::{ChainDns, IntentCompiler, OpIntentsDocument, DEFAULT_DEPLOY_GAS};
use crate::metrics;
use crate::state::StateType;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rand::Rng;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What an id in the table is bound to
#[derive(Debug, Clone)]
enum Slot {
    /// Placeholder: the sentinel, or an id reserved while its session compiles
    Invalid,
    Active(Arc<Session>),
}

/// Tunables of the registry
#[derive(Debug, Clone)]
pub struct RegistryOptions {
    /// Largest id handed out; ids are drawn from `1..=session_id_max`
    pub session_id_max: u32,
    pub max_allocation_attempts: u32,
    pub deploy_gas: String,
}

impl Default for RegistryOptions {
    fn default() -> Self {
        Self {
            session_id_max: u32::MAX,
            max_allocation_attempts: 64,
            deploy_gas: DEFAULT_DEPLOY_GAS.to_string(),
        }
    }
}

impl RegistryOptions {
    pub fn from_config(config: &VesConfig, deploy_gas: &str) -> Self {
        Self {
            session_id_max: config.session_id_max,
            max_allocation_attempts: config.max_allocation_attempts,
            deploy_gas: deploy_gas.to_string(),
        }
    }
}

/// Registry of live sessions
pub struct SessionRegistry {
    dns: Arc<dyn ChainDns>,
    options: RegistryOptions,
    sessions: DashMap<SessionId, Slot>,
}

impl SessionRegistry {
    pub fn new(dns: Arc<dyn ChainDns>, options: RegistryOptions) -> Self {
        let sessions = DashMap::new();
        sessions.insert(INVALID_SESSION, Slot::Invalid);
        Self {
            dns,
            options,
            sessions,
        }
    }

    /// Number of live sessions, placeholders excluded
    pub fn len(&self) -> usize {
        self.sessions
            .iter()
            .filter(|entry| matches!(entry.value(), Slot::Active(_)))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reserve an unused id by rejection sampling
    fn allocate(&self) -> VesResult<SessionId> {
        let max = self.options.session_id_max.max(1);
        let mut rng = rand::thread_rng();

        for _ in 0..self.options.max_allocation_attempts {
            let id: SessionId = rng.gen_range(1..=max);
            if let Entry::Vacant(slot) = self.sessions.entry(id) {
                slot.insert(Slot::Invalid);
                return Ok(id);
            }
        }

        Err(VesError::SessionAllocation {
            attempts: self.options.max_allocation_attempts,
        })
    }

    fn evict(&self, session_id: SessionId, reason: &str) {
        if session_id == INVALID_SESSION {
            return;
        }
        if self.sessions.remove(&session_id).is_some() {
            warn!("Evicted session {}: {}", session_id, reason);
            metrics::record_session_evicted();
        }
    }

    /// Drop `session` only if its id still maps to that same session
    fn remove_active(&self, session: &Arc<Session>) -> bool {
        self.sessions
            .remove_if(&session.id(), |_, slot| {
                matches!(slot, Slot::Active(live) if Arc::ptr_eq(live, session))
            })
            .is_some()
    }

    /// Allocate an id, compile the op-intent document and register the
    /// result. On failure the reserved id is released.
    pub fn open_session(&self, document: &Value) -> VesResult<Arc<Session>> {
        let session_id = self.allocate()?;
        debug!("Reserved session id {}", session_id);

        let compiled = OpIntentsDocument::from_json(document).and_then(|doc| {
            IntentCompiler::new(self.dns.as_ref())
                .with_deploy_gas(self.options.deploy_gas.clone())
                .compile_document(&doc)
        });

        match compiled {
            Ok(intents) => {
                let session = Arc::new(Session::new(session_id, intents));
                self.sessions
                    .insert(session_id, Slot::Active(session.clone()));
                info!(
                    "Opened session {} with {} transaction intents",
                    session_id,
                    session.intents().len()
                );
                metrics::record_session_opened();
                Ok(session)
            }
            Err(e) => {
                self.evict(session_id, &e.to_string());
                Err(e)
            }
        }
    }

    /// Settle setup: an approved session accepts attestations, a rejected
    /// one is evicted
    pub fn approve_session(&self, session_id: SessionId, approved: bool) -> VesResult<()> {
        let session = self.session(session_id)?;
        if approved {
            session.approve();
            info!("Session {} approved", session_id);
        } else {
            self.evict(session_id, "not approved");
        }
        Ok(())
    }

    pub fn session(&self, session_id: SessionId) -> VesResult<Arc<Session>> {
        match self.sessions.get(&session_id).map(|entry| entry.value().clone()) {
            Some(Slot::Active(session)) => Ok(session),
            _ => Err(VesError::SessionNotFound { session_id }),
        }
    }

    /// Tear a session down, dropping its insurance data with it
    pub fn close_session(&self, session_id: SessionId) -> VesResult<()> {
        let session = self.session(session_id)?;
        if !self.remove_active(&session) {
            return Err(VesError::SessionNotFound { session_id });
        }
        info!(
            "Closed session {} (complete: {})",
            session_id,
            session.is_complete().unwrap_or(false)
        );
        Ok(())
    }

    /// Accept an attestation for `tx_index` in `state`.
    ///
    /// The bytes are decoded, checked against the request and the compiled
    /// transaction, fully verified, and only then is the transaction's
    /// tracked state advanced. The caller countersigns when
    /// [`StateType::requires_countersign`] holds.
    pub fn receive(
        &self,
        bytes: &[u8],
        session_id: SessionId,
        tx_index: u64,
        state: StateType,
    ) -> VesResult<Attestation> {
        let session = self.session(session_id)?;
        if !session.is_approved() {
            return Err(VesError::SessionNotApproved { session_id });
        }

        let attestation = Attestation::decode(bytes)?;
        let content = attestation.content();
        if content.session_id != session_id {
            return Err(VesError::AttestationMismatch(format!(
                "session id {} != {}",
                content.session_id, session_id
            )));
        }
        if content.transaction_id != tx_index {
            return Err(VesError::AttestationMismatch(format!(
                "transaction id {} != {}",
                content.transaction_id, tx_index
            )));
        }
        if content.state != state {
            return Err(VesError::AttestationMismatch(format!(
                "state {} != {}",
                content.state, state
            )));
        }
        if content.transaction != session.transaction(tx_index)?.to_json() {
            return Err(VesError::AttestationMismatch(format!(
                "transaction body differs from compiled intent {}",
                tx_index
            )));
        }

        attestation.verify()?;
        session.advance(tx_index, state)?;
        metrics::record_attestation_received(state);

        debug!(
            "Accepted {} attestation for session {} tx {} with {} signatures",
            state,
            session_id,
            tx_index,
            attestation.signatures().len()
        );
        Ok(attestation)
    }
}
