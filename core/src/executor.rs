//! Payout executor: dispatches an approved batch's payouts to their
//! payment channels.
//!
//! Concurrency model: one worker pool per channel, channels fully
//! concurrent with each other, bounded in-flight workers inside each
//! pool. Workers block only on gateway calls and ledger writes. Every
//! ledger transition is optimistic: a version mismatch means another
//! worker got there first and is retried immediately, bounded.
//!
//! Submission always carries the payout's idempotency key, and a
//! gateway's `AlreadyProcessed` is success; that is what makes
//! delivery at-most-once across retries and process restarts.

use crate::{
    config::{ChannelConfig, ExecutorConfig},
    error::{EngineError, EngineResult},
    event::{EngineEvent, EventLogEntry},
    gateway::{PaymentGateway, SubmitOutcome},
    store::{LedgerStore, PayoutRow},
    types::{BatchStatus, ChannelId, PayoutStatus},
};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Outcome summary of one batch execution pass.
#[derive(Debug, Clone)]
pub struct BatchExecutionReport {
    pub batch_id: String,
    pub status: BatchStatus,
    pub completed: i64,
    pub manual_review: i64,
}

pub struct PayoutExecutor {
    config: ExecutorConfig,
}

impl PayoutExecutor {
    pub fn new(config: ExecutorConfig) -> Self {
        Self { config }
    }

    /// Execute every unfinished payout in an Approved batch.
    ///
    /// Refuses batches in any other state except `Executing`; the
    /// approval gate is enforced here, not merely upstream. An
    /// `Executing` batch is a resume pass: a prior run crashed or a
    /// worker errored out, and payouts stranded in `Submitted` are
    /// re-driven through the gateway under their idempotency keys so
    /// `AlreadyProcessed` settles anything the channel already did.
    pub fn execute_batch(
        &self,
        store: &Mutex<LedgerStore>,
        batch_id: &str,
        gateways: &HashMap<ChannelId, Arc<dyn PaymentGateway>>,
        channels: &[ChannelConfig],
    ) -> EngineResult<BatchExecutionReport> {
        let (batch_seq, pending) = {
            let ledger = lock(store)?;
            let batch = ledger.get_batch(batch_id)?;
            match batch.status {
                BatchStatus::Approved => {
                    ledger.transition_batch(batch_id, BatchStatus::Executing)?;
                }
                BatchStatus::Executing => {
                    log::info!("batch {batch_id} resuming an interrupted execution");
                }
                status => {
                    return Err(EngineError::ApprovalState {
                        batch_id: batch_id.to_string(),
                        status,
                        required: BatchStatus::Approved,
                    });
                }
            }
            let mut pending = ledger.payouts_with_status(batch_id, PayoutStatus::Pending)?;
            pending.extend(ledger.payouts_with_status(batch_id, PayoutStatus::Submitted)?);
            (batch.batch_seq, pending)
        };

        // One queue per channel; all channels must have a gateway
        // before any work starts.
        let mut grouped: HashMap<ChannelId, VecDeque<PayoutRow>> = HashMap::new();
        for payout in pending {
            if !gateways.contains_key(&payout.channel) {
                return Err(anyhow::anyhow!(
                    "no gateway registered for channel '{}'",
                    payout.channel
                )
                .into());
            }
            grouped
                .entry(payout.channel.clone())
                .or_default()
                .push_back(payout);
        }
        let queues: Vec<(ChannelId, Mutex<VecDeque<PayoutRow>>)> = grouped
            .into_iter()
            .map(|(channel, queue)| (channel, Mutex::new(queue)))
            .collect();

        let worker_errors: Mutex<Vec<EngineError>> = Mutex::new(Vec::new());
        std::thread::scope(|scope| {
            for (channel, queue) in &queues {
                let gateway = Arc::clone(&gateways[channel]);
                let pool_size = channels
                    .iter()
                    .find(|c| &c.channel_id == channel)
                    .map(|c| c.max_in_flight.max(1))
                    .unwrap_or(1);
                for _ in 0..pool_size {
                    let gateway = Arc::clone(&gateway);
                    let errors = &worker_errors;
                    scope.spawn(move || loop {
                        let payout = match queue.lock() {
                            Ok(mut q) => q.pop_front(),
                            Err(_) => None,
                        };
                        let Some(payout) = payout else { break };
                        if let Err(e) =
                            self.process_payout(store, gateway.as_ref(), &payout, batch_seq)
                        {
                            log::error!("payout {} worker error: {e}", payout.payout_id);
                            if let Ok(mut errs) = errors.lock() {
                                errs.push(e);
                            }
                        }
                    });
                }
            }
        });

        let mut errors = worker_errors
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if !errors.is_empty() {
            return Err(errors.remove(0));
        }

        self.finalize_batch(store, batch_id)
    }

    /// Drive a single payout to a terminal-for-this-pass state.
    fn process_payout(
        &self,
        store: &Mutex<LedgerStore>,
        gateway: &dyn PaymentGateway,
        payout: &PayoutRow,
        batch_seq: i64,
    ) -> EngineResult<()> {
        let payout_id = &payout.payout_id;
        loop {
            let row = {
                let ledger = lock(store)?;
                ledger.get_payout(payout_id)?
            };
            let (claimed_version, attempt) = match row.status {
                PayoutStatus::Pending => {
                    // Claim: Pending -> Submitted. A conflict means the
                    // row moved under us; re-read with the fresh version.
                    match lock(store)?.claim_payout(payout_id, row.version) {
                        Ok(()) => {}
                        Err(EngineError::VersionConflict { .. }) => continue,
                        Err(e) => return Err(e),
                    }
                    (row.version + 1, row.attempt_count + 1)
                }
                // A claim stranded by an interrupted run. The attempt
                // was already counted; re-drive the same submission and
                // let the idempotency key settle what the channel did.
                PayoutStatus::Submitted => (row.version, row.attempt_count),
                // Finished by an earlier pass.
                _ => return Ok(()),
            };

            let outcome = gateway.submit(
                &row.idempotency_key,
                &row.partner_id,
                row.net_amount,
                &row.currency,
            );

            match outcome {
                Ok(SubmitOutcome::Accepted) | Ok(SubmitOutcome::AlreadyProcessed) => {
                    match self.with_lock_retry(|| {
                        lock(store)?.complete_payout(payout_id, claimed_version, batch_seq)
                    }) {
                        Ok(()) => {}
                        Err(EngineError::OrderingViolation { last_applied, .. }) => {
                            // Funds moved but a later batch already
                            // applied to this partner. Park it for a
                            // human instead of wedging the batch.
                            let reason = format!(
                                "completed out of order: batch seq {batch_seq} after {last_applied}"
                            );
                            self.with_lock_retry(|| {
                                lock(store)?.fail_payout(payout_id, claimed_version, &reason, false)
                            })?;
                            self.record_manual_review(store, payout_id, &row.partner_id, &reason)?;
                            log::warn!("payout {payout_id} {reason}");
                            return Ok(());
                        }
                        Err(e) => return Err(e),
                    }
                    lock(store)?.append_event(&EventLogEntry::for_event(
                        "executor",
                        &EngineEvent::PayoutCompleted {
                            payout_id: payout_id.clone(),
                            partner_id: row.partner_id.clone(),
                            net_amount: row.net_amount,
                            attempts: attempt,
                        },
                    )?)?;
                    log::debug!("payout {payout_id} completed on attempt {attempt}");
                    return Ok(());
                }
                Ok(SubmitOutcome::Rejected { reason, permanent: true }) => {
                    self.with_lock_retry(|| {
                        lock(store)?.fail_payout(payout_id, claimed_version, &reason, false)
                    })?;
                    self.record_manual_review(store, payout_id, &row.partner_id, &reason)?;
                    log::warn!("payout {payout_id} permanently rejected: {reason}");
                    return Ok(());
                }
                Ok(SubmitOutcome::Rejected { reason, permanent: false }) => {
                    if self.record_transient_failure(store, &row, claimed_version, attempt, &reason)? {
                        return Ok(());
                    }
                }
                Err(transport) => {
                    let reason = transport.to_string();
                    if self.record_transient_failure(store, &row, claimed_version, attempt, &reason)? {
                        return Ok(());
                    }
                }
            }

            self.backoff(attempt);
        }
    }

    /// Record a transient failure; returns true when the retry budget
    /// is exhausted and the payout parked in ManualReview.
    fn record_transient_failure(
        &self,
        store: &Mutex<LedgerStore>,
        payout: &PayoutRow,
        claimed_version: i64,
        attempt: u32,
        reason: &str,
    ) -> EngineResult<bool> {
        let payout_id = &payout.payout_id;
        let will_retry = attempt < self.config.max_attempts;
        self.with_lock_retry(|| {
            lock(store)?.fail_payout(payout_id, claimed_version, reason, will_retry)
        })?;
        if will_retry {
            log::debug!("payout {payout_id} attempt {attempt} failed, retrying: {reason}");
            Ok(false)
        } else {
            self.record_manual_review(store, payout_id, &payout.partner_id, reason)?;
            log::warn!("payout {payout_id} exhausted {attempt} attempts, manual review: {reason}");
            Ok(true)
        }
    }

    fn record_manual_review(
        &self,
        store: &Mutex<LedgerStore>,
        payout_id: &str,
        partner_id: &str,
        reason: &str,
    ) -> EngineResult<()> {
        lock(store)?.append_event(&EventLogEntry::for_event(
            "executor",
            &EngineEvent::PayoutManualReview {
                payout_id: payout_id.to_string(),
                partner_id: partner_id.to_string(),
                reason: reason.to_string(),
            },
        )?)
    }

    /// Optimistic-lock conflicts are expected under concurrency, not
    /// true failures; retry immediately, bounded.
    fn with_lock_retry(&self, mut op: impl FnMut() -> EngineResult<()>) -> EngineResult<()> {
        let mut remaining = self.config.lock_retry_limit;
        loop {
            match op() {
                Err(EngineError::VersionConflict { payout_id }) if remaining > 0 => {
                    remaining -= 1;
                    log::trace!("version conflict on {payout_id}, retrying");
                }
                other => return other,
            }
        }
    }

    fn backoff(&self, attempt: u32) {
        if self.config.retry_base_delay_ms == 0 {
            return;
        }
        let factor = 1u64 << (attempt.saturating_sub(1)).min(10);
        let delay = self.config.retry_base_delay_ms.saturating_mul(factor);
        std::thread::sleep(Duration::from_millis(delay));
    }

    /// Settle the batch status once no automated transitions remain.
    fn finalize_batch(
        &self,
        store: &Mutex<LedgerStore>,
        batch_id: &str,
    ) -> EngineResult<BatchExecutionReport> {
        let ledger = lock(store)?;
        let counts = ledger.payout_status_counts(batch_id)?;
        let count = |s: PayoutStatus| counts.get(&s).copied().unwrap_or(0);

        let completed = count(PayoutStatus::Completed) + count(PayoutStatus::Disputed);
        let manual_review = count(PayoutStatus::ManualReview);
        let in_flight =
            count(PayoutStatus::Pending) + count(PayoutStatus::Submitted) + count(PayoutStatus::Failed);

        let status = if in_flight > 0 {
            // Workers errored out with payouts unresolved; the batch
            // stays Executing and a later execute_batch resumes it.
            BatchStatus::Executing
        } else if manual_review > 0 {
            ledger.transition_batch(batch_id, BatchStatus::PartiallyCompleted)?;
            BatchStatus::PartiallyCompleted
        } else {
            ledger.transition_batch(batch_id, BatchStatus::Completed)?;
            BatchStatus::Completed
        };

        log::info!(
            "batch {batch_id} execution finished: status={} completed={completed} manual_review={manual_review}",
            status.as_str()
        );
        Ok(BatchExecutionReport {
            batch_id: batch_id.to_string(),
            status,
            completed,
            manual_review,
        })
    }
}

fn lock<'a>(store: &'a Mutex<LedgerStore>) -> EngineResult<MutexGuard<'a, LedgerStore>> {
    store
        .lock()
        .map_err(|_| anyhow::anyhow!("ledger store lock poisoned").into())
}
