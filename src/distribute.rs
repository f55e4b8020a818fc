//! Distribution scheduler planning — one agent pull over a store snapshot
//!
//! The four steps, in order, over an owned snapshot (no hidden aliasing;
//! all store mutation happens when the engine commits the returned plan):
//!
//! 1. Re-escalate Completed tickets below their category maximum
//!    (exactly once per invocation).
//! 2. Reclaim assignments staler than the redistribution interval.
//! 3. Initial spread: unassigned tickets untouched by steps 1–2 go to a
//!    uniformly random logged-in agent outside the ticket's history, so
//!    fresh tickets benefit every agent and not just whichever one
//!    called first.
//! 4. Targeted claim: remaining unassigned tickets the requester has
//!    never worked, sorted by severity, all claimed for the requester.
//!
//! The random source is injected so tests can assert spread behavior
//! deterministically with a seeded generator.

use crate::escalation::{escalate, is_at_max_level};
use crate::store::{StoreOp, WriteGuard};
use crate::types::{AgentId, Ticket, TicketStatus};
use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Everything staged by one scheduling pass.
#[derive(Debug, Default)]
pub struct DistributionPlan {
    /// Guarded upserts for every ticket the pass mutated.
    pub ops: Vec<StoreOp>,
    /// (incident, agent) pairs to record in the ticket history.
    pub assignments: Vec<(String, AgentId)>,
    /// Tickets now held by the requesting agent, severity-ordered.
    pub requester_queue: Vec<Ticket>,
    pub stats: DistributionStats,
}

/// Per-pass counters, logged by the engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DistributionStats {
    pub reescalated: usize,
    pub reclaimed: usize,
    pub spread: usize,
    pub claimed: usize,
}

/// Run the four scheduler steps for `requester` over `snapshot`.
///
/// `history` maps incident id → agents that ever worked it; `logged_in`
/// is the current directory snapshot and must contain the requester
/// (the engine checks before planning).
pub fn plan_distribution<R: Rng>(
    mut snapshot: Vec<Ticket>,
    logged_in: &[AgentId],
    requester: &str,
    history: &HashMap<String, HashSet<AgentId>>,
    now: DateTime<Utc>,
    redistribution_interval: Duration,
    rng: &mut R,
) -> DistributionPlan {
    let mut stats = DistributionStats::default();
    let mut assignments: Vec<(String, AgentId)> = Vec::new();
    // Tickets mutated this pass, and the subset touched by steps 1-2
    // (those are excluded from the random spread).
    let mut mutated: HashSet<String> = HashSet::new();
    let mut touched_early: HashSet<String> = HashSet::new();
    // Claims made this pass get the conditional-write guard.
    let mut claimed_now: HashSet<String> = HashSet::new();
    // The conditional guard protects against a concurrent caller claiming
    // a ticket that was unassigned at read time. Tickets this pass itself
    // unassigns (re-escalation, stale reclaim) still look assigned in the
    // store, so their re-claim must write unguarded.
    let unassigned_at_read: HashSet<String> = snapshot
        .iter()
        .filter(|t| !t.is_assigned())
        .map(|t| t.incident_id.clone())
        .collect();

    // Step 1: re-escalate Completed tickets below their category maximum.
    for ticket in snapshot.iter_mut() {
        if ticket.status == TicketStatus::Completed && !is_at_max_level(ticket) {
            ticket.status = TicketStatus::Active;
            ticket.level = Some(escalate(ticket.level, ticket.category));
            ticket.clear_assignment();
            ticket.last_updated = Some(now);
            mutated.insert(ticket.incident_id.clone());
            touched_early.insert(ticket.incident_id.clone());
            stats.reescalated += 1;
            debug!(incident_id = %ticket.incident_id, level = ?ticket.level, "Re-escalated");
        }
    }

    // Step 2: reclaim stale assignments.
    for ticket in snapshot.iter_mut() {
        if ticket.status == TicketStatus::Completed {
            continue;
        }
        let stale = ticket
            .last_assigned_time
            .is_some_and(|t| now - t >= redistribution_interval);
        if stale {
            ticket.clear_assignment();
            ticket.last_updated = Some(now);
            mutated.insert(ticket.incident_id.clone());
            touched_early.insert(ticket.incident_id.clone());
            stats.reclaimed += 1;
            debug!(incident_id = %ticket.incident_id, "Reclaimed stale assignment");
        }
    }

    // Step 3: spread untouched unassigned tickets uniformly across the
    // logged-in agents that have never worked them. Runs regardless of
    // who initiated the request, so fresh tickets are never hoarded by
    // whichever agent calls first.
    if !logged_in.is_empty() {
        for ticket in snapshot.iter_mut() {
            if ticket.is_assigned()
                || ticket.status == TicketStatus::Completed
                || touched_early.contains(&ticket.incident_id)
            {
                continue;
            }
            let worked = history.get(&ticket.incident_id);
            let eligible: Vec<&AgentId> = logged_in
                .iter()
                .filter(|a| !worked.is_some_and(|agents| agents.contains(*a)))
                .collect();
            if eligible.is_empty() {
                continue;
            }
            let agent = eligible[rng.gen_range(0..eligible.len())].clone();
            ticket.assign(agent.clone(), now);
            mutated.insert(ticket.incident_id.clone());
            claimed_now.insert(ticket.incident_id.clone());
            assignments.push((ticket.incident_id.clone(), agent.clone()));
            stats.spread += 1;
            debug!(incident_id = %ticket.incident_id, agent = %agent, "Spread to random agent");
        }
    }

    // Step 4: claim the remaining unassigned tickets the requester has
    // never worked, highest severity first.
    let mut claim_idx: Vec<usize> = snapshot
        .iter()
        .enumerate()
        .filter(|(_, t)| {
            !t.is_assigned()
                && t.status != TicketStatus::Completed
                && !history
                    .get(&t.incident_id)
                    .is_some_and(|agents| agents.contains(requester))
        })
        .map(|(i, _)| i)
        .collect();
    claim_idx.sort_by_key(|&i| snapshot[i].priority_key());

    for i in claim_idx {
        let ticket = &mut snapshot[i];
        ticket.assign(requester.to_string(), now);
        mutated.insert(ticket.incident_id.clone());
        claimed_now.insert(ticket.incident_id.clone());
        assignments.push((ticket.incident_id.clone(), requester.to_string()));
        stats.claimed += 1;
    }

    // Commit set: one guarded upsert per mutated ticket. Claims of
    // tickets that were unassigned at read time carry the if-unassigned
    // guard so a concurrent scheduler cannot double-assign them.
    let ops = snapshot
        .iter()
        .filter(|t| mutated.contains(&t.incident_id))
        .map(|t| StoreOp::Update {
            ticket: t.clone(),
            guard: if claimed_now.contains(&t.incident_id)
                && unassigned_at_read.contains(&t.incident_id)
            {
                WriteGuard::IfUnassigned
            } else {
                WriteGuard::None
            },
        })
        .collect();

    let mut requester_queue: Vec<Ticket> = snapshot
        .into_iter()
        .filter(|t| t.assigned_to.as_deref() == Some(requester))
        .collect();
    requester_queue.sort_by_key(Ticket::priority_key);

    DistributionPlan {
        ops,
        assignments,
        requester_queue,
        stats,
    }
}

// ============================================================================
// Tests
// ============================================================================
