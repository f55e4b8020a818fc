//! Escalation calculator and level state machine
//!
//! Pure rules, no I/O:
//! - [`assign_level`]: (category, TTR) → escalation level
//! - [`escalate`]: advance one level, clamped at the category maximum
//! - [`is_at_max_level`] / [`should_close`]: lifecycle predicates
//! - [`plan_transition`]: the status state machine
//!   (Open → Active → Completed, Completed → Active on re-escalation,
//!   removal to the closed log as the terminal step)
//!
//! The reconciliation engine and the distribution scheduler both build on
//! these rules; all store mutation happens elsewhere.

use crate::types::{Category, CandidateTicket, ClosedEntry, Level, Ticket, TicketStatus, Ttr};
use chrono::{DateTime, Utc};

// ============================================================================
// TTR Thresholds
// ============================================================================

// Minutes, strictly greater-than, evaluated descending. A TTR of exactly a
// threshold does not reach that level.
const K1_THRESHOLDS: [(f64, Level); 7] = [
    (540.0, Level::L7),
    (360.0, Level::L6),
    (240.0, Level::L5),
    (150.0, Level::L4),
    (90.0, Level::L3),
    (60.0, Level::L2),
    (30.0, Level::L1),
];

const K2_THRESHOLDS: [(f64, Level); 3] = [
    (90.0, Level::L3),
    (60.0, Level::L2),
    (30.0, Level::L1),
];

const K3_THRESHOLDS: [(f64, Level); 2] = [(60.0, Level::L2), (30.0, Level::L1)];

/// Closing rule thresholds: an *existing* ticket whose TTR exceeds the
/// category's terminal threshold is removed from the active store.
const K2_CLOSE_MINUTES: f64 = 90.0;
const K3_CLOSE_MINUTES: f64 = 60.0;

// ============================================================================
// Escalation Calculator
// ============================================================================

/// Compute the escalation level from category and elapsed resolution time.
///
/// Returns `None` (Unknown) when either input is absent. Otherwise the
/// first strictly-exceeded threshold wins; below every threshold the level
/// defaults to L1. The result is always within the category's allowed range.
pub fn assign_level(category: Option<Category>, ttr: Option<Ttr>) -> Option<Level> {
    let (category, ttr) = (category?, ttr?);
    let minutes = ttr.total_minutes();

    let thresholds: &[(f64, Level)] = match category {
        Category::K1 => &K1_THRESHOLDS,
        Category::K2 => &K2_THRESHOLDS,
        Category::K3 => &K3_THRESHOLDS,
    };

    for (threshold, level) in thresholds {
        if minutes > *threshold {
            return Some(*level);
        }
    }

    Some(Level::L1)
}

/// Advance one escalation step, clamped at the category maximum.
///
/// An unknown current level escalates to L1 (the lowest known level), and
/// an unknown category clamps only at L7.
pub fn escalate(level: Option<Level>, category: Option<Category>) -> Level {
    let next = match level {
        Some(l) => l.next(),
        None => Level::L1,
    };
    match category {
        Some(c) => next.min(c.max_level()),
        None => next,
    }
}

/// Whether the ticket sits at (or, for malformed data, beyond) its
/// category's maximum escalation level. Unknown category or level is
/// never at max.
pub fn is_at_max_level(ticket: &Ticket) -> bool {
    match (ticket.category, ticket.level) {
        (Some(category), Some(level)) => level >= category.max_level(),
        _ => false,
    }
}

/// The closing rule: K2 with TTR strictly over 90 minutes, or K3 strictly
/// over 60 minutes. Applies only to tickets that already exist in the
/// store — a brand-new ticket is never closed on first sight.
pub fn should_close(candidate: &CandidateTicket, existing: Option<&Ticket>) -> bool {
    if existing.is_none() {
        return false;
    }

    let (Some(category), Some(ttr)) = (candidate.category, candidate.ttr) else {
        return false;
    };

    match category {
        Category::K1 => false,
        Category::K2 => ttr.total_minutes() > K2_CLOSE_MINUTES,
        Category::K3 => ttr.total_minutes() > K3_CLOSE_MINUTES,
    }
}

// ============================================================================
// Level State Machine
// ============================================================================

/// Outcome of running one candidate through the state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// Ticket not in store: create it Open and unassigned.
    Insert(Ticket),
    /// Completed ticket below its category maximum: back to Active, one
    /// level up, assignment cleared for redistribution.
    Reescalate(Ticket),
    /// Closing rule met: remove from the active store, log terminally.
    Close(ClosedEntry),
    /// Plain refresh: recompute level, merge incoming non-null fields.
    Refresh(Ticket),
}

/// Apply the transition rules of the escalation lifecycle to one candidate.
///
/// Rule order matches the lifecycle: re-escalation of a Completed ticket
/// takes precedence over closing, which takes precedence over refresh.
pub fn plan_transition(
    existing: Option<&Ticket>,
    candidate: &CandidateTicket,
    now: DateTime<Utc>,
) -> Transition {
    let Some(existing) = existing else {
        let mut ticket = Ticket::new(candidate.incident_id.clone());
        ticket.category = candidate.category;
        ticket.ttr = candidate.ttr;
        ticket.level = assign_level(candidate.category, candidate.ttr);
        ticket.status = TicketStatus::Open;
        ticket.last_updated = Some(now);
        return Transition::Insert(ticket);
    };

    if existing.status == TicketStatus::Completed && !is_at_max_level(existing) {
        let mut ticket = existing.clone();
        ticket.status = TicketStatus::Active;
        ticket.level = Some(escalate(existing.level, existing.category));
        ticket.clear_assignment();
        ticket.last_updated = Some(now);
        return Transition::Reescalate(ticket);
    }

    if should_close(candidate, Some(existing)) {
        return Transition::Close(ClosedEntry::closed(candidate.incident_id.clone(), now));
    }

    // Refresh: recompute the level from the freshly supplied TTR; incoming
    // non-null assignment/status fields win over stored values.
    let mut ticket = existing.clone();
    ticket.category = candidate.category.or(existing.category);
    ticket.ttr = candidate.ttr.or(existing.ttr);
    ticket.level = assign_level(ticket.category, candidate.ttr);
    if let Some(status) = candidate.status {
        ticket.status = status;
    }
    if let Some(agent) = &candidate.assigned_to {
        ticket.assigned_to = Some(agent.clone());
        ticket.last_assigned_time = candidate.last_assigned_time.or(existing.last_assigned_time);
    }
    ticket.last_updated = Some(now);
    Transition::Refresh(ticket)
}

// ============================================================================
// Tests
// ============================================================================
