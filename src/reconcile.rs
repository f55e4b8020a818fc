//! Reconciliation planning — merge a candidate batch into the store
//!
//! Pure pass over an owned snapshot: (existing tickets, candidates) →
//! staged store ops + closed-log entries + outcome counts. Nothing is
//! written here; the engine commits the plan in one best-effort batch
//! after the whole pass succeeds, so an aborted request flushes nothing.

use crate::escalation::{plan_transition, Transition};
use crate::store::{StoreOp, WriteGuard};
use crate::types::{CandidateTicket, ClosedEntry, Ticket};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Instant;
use tracing::debug;

/// Counts returned to the reconciliation caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct ReconcileOutcome {
    pub inserted: usize,
    pub modified: usize,
    pub closed: usize,
}

/// Everything staged by one reconciliation pass.
#[derive(Debug, Default)]
pub struct ReconcilePlan {
    pub ops: Vec<StoreOp>,
    pub closed_entries: Vec<ClosedEntry>,
    pub outcome: ReconcileOutcome,
}

/// The per-request wall-clock budget ran out mid-batch. Staged work is
/// dropped with the plan; the caller decides whether to resubmit.
#[derive(Debug, Clone, Copy)]
pub struct BudgetExceeded {
    /// Candidates processed before the deadline hit.
    pub processed: usize,
}

/// Run every candidate through the level state machine against the
/// fetched snapshot, staging one op per material change.
///
/// A refresh that changes nothing but `last_updated` is skipped entirely,
/// which is what makes identical resubmission idempotent.
pub fn plan_batch(
    existing: &HashMap<String, Ticket>,
    candidates: &[CandidateTicket],
    now: DateTime<Utc>,
    deadline: Instant,
) -> Result<ReconcilePlan, BudgetExceeded> {
    let mut plan = ReconcilePlan::default();

    for (processed, candidate) in candidates.iter().enumerate() {
        if Instant::now() > deadline {
            return Err(BudgetExceeded { processed });
        }

        let current = existing.get(&candidate.incident_id);

        match plan_transition(current, candidate, now) {
            Transition::Insert(ticket) => {
                debug!(incident_id = %ticket.incident_id, level = ?ticket.level, "Staging insert");
                plan.ops.push(StoreOp::Insert(ticket));
                plan.outcome.inserted += 1;
            }
            Transition::Reescalate(ticket) => {
                debug!(
                    incident_id = %ticket.incident_id,
                    level = ?ticket.level,
                    "Staging re-escalation"
                );
                plan.ops.push(StoreOp::Update {
                    ticket,
                    guard: WriteGuard::None,
                });
                plan.outcome.modified += 1;
            }
            Transition::Close(entry) => {
                debug!(incident_id = %entry.incident_id, "Staging closure");
                plan.ops.push(StoreOp::Delete {
                    incident_id: entry.incident_id.clone(),
                });
                plan.closed_entries.push(entry);
                plan.outcome.closed += 1;
            }
            Transition::Refresh(ticket) => {
                // Idempotence: ignore the timestamp-only difference.
                let unchanged = current.is_some_and(|stored| {
                    let mut probe = stored.clone();
                    probe.last_updated = ticket.last_updated;
                    probe == ticket
                });
                if unchanged {
                    continue;
                }
                plan.ops.push(StoreOp::Update {
                    ticket,
                    guard: WriteGuard::None,
                });
                plan.outcome.modified += 1;
            }
        }
    }

    Ok(plan)
}

// ============================================================================
// Tests
// ============================================================================
