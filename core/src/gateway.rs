//! Payment channel gateway boundary.
//!
//! The engine never implements a payment network protocol; it submits
//! through this trait with an idempotency key and interprets the
//! outcome. Gateways must support idempotent replay: resubmitting a
//! key already processed reports `AlreadyProcessed`, never a second
//! transfer.

use crate::error::EngineResult;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// The channel accepted the transfer.
    Accepted,
    /// The key was seen before; funds already moved. Treated as success.
    AlreadyProcessed,
    /// The channel refused. `permanent` distinguishes compliance-style
    /// rejections (straight to manual review) from transient ones.
    Rejected { reason: String, permanent: bool },
}

/// One payment channel. Implementations own their transport and
/// timeouts; an `Err` from `submit` is a transport failure and is
/// treated as transient.
pub trait PaymentGateway: Send + Sync {
    fn channel_id(&self) -> &str;

    fn submit(
        &self,
        idempotency_key: &str,
        destination: &str,
        amount: Decimal,
        currency: &str,
    ) -> EngineResult<SubmitOutcome>;
}

/// A record of one successful transfer through [`ScriptedGateway`].
#[derive(Debug, Clone)]
pub struct RecordedTransfer {
    pub idempotency_key: String,
    pub destination: String,
    pub amount: Decimal,
    pub currency: String,
}

#[derive(Default)]
struct ScriptedState {
    processed: HashSet<String>,
    transfers: Vec<RecordedTransfer>,
    transient_failures: HashMap<String, u32>,
    permanent_rejects: HashSet<String>,
}

/// An in-process gateway with scripted failures, used by the runner
/// and the executor tests. Honors idempotent replay: a key that has
/// already moved funds reports `AlreadyProcessed`.
pub struct ScriptedGateway {
    channel_id: String,
    state: Mutex<ScriptedState>,
}

impl ScriptedGateway {
    pub fn new(channel_id: &str) -> Self {
        Self {
            channel_id: channel_id.to_string(),
            state: Mutex::new(ScriptedState::default()),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, ScriptedState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Fail the next `count` submissions of `key` with a transient
    /// rejection before letting it through.
    pub fn fail_transiently(&self, key: &str, count: u32) {
        self.state()
            .transient_failures.insert(key.to_string(), count);
    }

    /// Permanently reject `key` (invalid destination, compliance block).
    pub fn reject_permanently(&self, key: &str) {
        self.state()
            .permanent_rejects.insert(key.to_string());
    }

    /// Successful fund movements recorded so far.
    pub fn transfers(&self) -> Vec<RecordedTransfer> {
        self.state().transfers.clone()
    }

    pub fn transfer_count(&self) -> usize {
        self.state().transfers.len()
    }
}

impl PaymentGateway for ScriptedGateway {
    fn channel_id(&self) -> &str {
        &self.channel_id
    }

    fn submit(
        &self,
        idempotency_key: &str,
        destination: &str,
        amount: Decimal,
        currency: &str,
    ) -> EngineResult<SubmitOutcome> {
        let mut state = self.state();

        if state.processed.contains(idempotency_key) {
            return Ok(SubmitOutcome::AlreadyProcessed);
        }
        if state.permanent_rejects.contains(idempotency_key) {
            return Ok(SubmitOutcome::Rejected {
                reason: "destination blocked".to_string(),
                permanent: true,
            });
        }
        if let Some(remaining) = state.transient_failures.get_mut(idempotency_key) {
            if *remaining > 0 {
                *remaining -= 1;
                return Ok(SubmitOutcome::Rejected {
                    reason: "temporary channel failure".to_string(),
                    permanent: false,
                });
            }
        }

        state.processed.insert(idempotency_key.to_string());
        state.transfers.push(RecordedTransfer {
            idempotency_key: idempotency_key.to_string(),
            destination: destination.to_string(),
            amount,
            currency: currency.to_string(),
        });
        Ok(SubmitOutcome::Accepted)
    }
}
