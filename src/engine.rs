//! TicketEngine — the core facade callers poll
//!
//! Owns trait-object handles to the four collaborators and exposes the two
//! operations of the engine: [`TicketEngine::reconcile`] (batch merge of
//! externally-submitted tickets) and [`TicketEngine::distribute`] (one
//! agent's prioritized pull). Each invocation is an independent stateless
//! pass: read a snapshot, plan pure transformations, commit best-effort
//! through guarded bulk writes. No internal retries — callers resubmit.

use crate::config::EngineConfig;
use crate::distribute::plan_distribution;
use crate::reconcile::{plan_batch, ReconcileOutcome};
use crate::store::{AgentDirectory, ClosedTicketLog, StoreError, TicketHistory, TicketStore};
use crate::types::{AgentId, CandidateTicket, Ticket};
use chrono::Utc;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tracing::{info, warn};

/// Structured errors returned to callers. Every failure carries kind and
/// message; the UI layer surfaces them and may resubmit manually.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("reconciliation exceeded {budget_ms} ms budget after {processed} candidates")]
    Timeout { budget_ms: u64, processed: usize },
    #[error("not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// The ticket escalation and distribution engine.
pub struct TicketEngine {
    store: Arc<dyn TicketStore>,
    closed_log: Arc<dyn ClosedTicketLog>,
    agents: Arc<dyn AgentDirectory>,
    history: Arc<dyn TicketHistory>,
    config: EngineConfig,
    rng: Mutex<StdRng>,
}

impl TicketEngine {
    pub fn new(
        store: Arc<dyn TicketStore>,
        closed_log: Arc<dyn ClosedTicketLog>,
        agents: Arc<dyn AgentDirectory>,
        history: Arc<dyn TicketHistory>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            closed_log,
            agents,
            history,
            config,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Replace the random source with a seeded generator, making the
    /// initial spread reproducible. Intended for tests.
    pub fn with_seeded_rng(mut self, seed: u64) -> Self {
        self.rng = Mutex::new(StdRng::seed_from_u64(seed));
        self
    }

    /// Merge a batch of externally-submitted tickets into the store.
    ///
    /// Validates the whole batch up front, fetches the existing tickets in
    /// one read, plans transitions under the wall-clock budget, then
    /// commits closed-log entries and staged ops. A budget overrun
    /// discards everything staged for this request.
    pub fn reconcile(
        &self,
        candidates: &[CandidateTicket],
    ) -> Result<ReconcileOutcome, EngineError> {
        for candidate in candidates {
            if candidate.incident_id.trim().is_empty() {
                return Err(EngineError::Validation(
                    "candidate is missing an incident id".to_string(),
                ));
            }
            if candidate.ttr.is_none() {
                return Err(EngineError::Validation(format!(
                    "candidate '{}' is missing a TTR",
                    candidate.incident_id
                )));
            }
        }

        let ids: Vec<String> = candidates.iter().map(|c| c.incident_id.clone()).collect();
        let existing: HashMap<String, Ticket> = self
            .store
            .fetch(&ids)?
            .into_iter()
            .map(|t| (t.incident_id.clone(), t))
            .collect();

        let budget_ms = self.config.reconcile_budget_ms;
        let deadline = Instant::now() + std::time::Duration::from_millis(budget_ms);
        let now = Utc::now();

        let plan = plan_batch(&existing, candidates, now, deadline).map_err(|e| {
            warn!(
                processed = e.processed,
                total = candidates.len(),
                budget_ms,
                "Reconciliation budget exceeded, discarding staged operations"
            );
            EngineError::Timeout {
                budget_ms,
                processed: e.processed,
            }
        })?;

        for entry in &plan.closed_entries {
            self.closed_log.append(entry)?;
        }
        let summary = self.store.bulk_apply(&plan.ops)?;

        info!(
            candidates = candidates.len(),
            inserted = plan.outcome.inserted,
            modified = plan.outcome.modified,
            closed = plan.outcome.closed,
            backend = self.store.backend_name(),
            "Reconciliation committed"
        );
        if !summary.conflicts.is_empty() {
            warn!(
                conflicts = summary.conflicts.len(),
                "Reconciliation hit write conflicts"
            );
        }

        Ok(plan.outcome)
    }

    /// Run one scheduling pass for `requester` and return their queue.
    ///
    /// Fails with `NotFound` when the agent is not in the logged-in set.
    pub fn distribute(&self, requester: &str) -> Result<Vec<Ticket>, EngineError> {
        let logged_in = self.agents.list_logged_in()?;
        if !logged_in.iter().any(|a| a == requester) {
            return Err(EngineError::NotFound(format!(
                "agent '{requester}' is not logged in"
            )));
        }

        let snapshot = self.store.list_active()?;

        let mut history: HashMap<String, HashSet<AgentId>> = HashMap::new();
        for ticket in &snapshot {
            let touched = self.history.touched_by(&ticket.incident_id)?;
            if !touched.is_empty() {
                history.insert(ticket.incident_id.clone(), touched);
            }
        }

        let now = Utc::now();
        let plan = {
            let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
            plan_distribution(
                snapshot,
                &logged_in,
                requester,
                &history,
                now,
                self.config.redistribution_interval(),
                &mut *rng,
            )
        };

        let summary = self.store.bulk_apply(&plan.ops)?;

        // Claims that lost their guard never happened: the winning caller
        // owns the ticket, so the loser gets neither a history touch nor
        // the ticket in their queue.
        let lost: HashSet<&String> = summary.conflicts.iter().collect();
        for (incident_id, agent) in &plan.assignments {
            if lost.contains(incident_id) {
                continue;
            }
            self.history.record_touch(incident_id, agent)?;
        }
        let queue: Vec<Ticket> = plan
            .requester_queue
            .into_iter()
            .filter(|t| !lost.contains(&t.incident_id))
            .collect();

        info!(
            requester,
            reescalated = plan.stats.reescalated,
            reclaimed = plan.stats.reclaimed,
            spread = plan.stats.spread,
            claimed = plan.stats.claimed,
            conflicts = summary.conflicts.len(),
            queue = queue.len(),
            "Distribution pass complete"
        );

        Ok(queue)
    }
}
