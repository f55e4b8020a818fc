//! Engine Integration Tests
//!
//! Exercises reconciliation and distribution end-to-end through
//! `TicketEngine` over the in-memory backend, asserting the lifecycle
//! properties: level bounds, idempotence, strict threshold boundaries,
//! the closing rule, re-escalation, no-repeat assignment, and priority
//! ordering.

use eskala::config::EngineConfig;
use eskala::engine::{EngineError, TicketEngine};
use eskala::store::{BulkSummary, InMemoryStore, StoreError, StoreOp, TicketHistory, TicketStore};
use eskala::types::{CandidateTicket, Category, Level, Ticket, TicketStatus, Ttr};
use std::sync::Arc;

fn ttr(s: &str) -> Ttr {
    s.parse().expect("valid ttr")
}

/// Engine over a shared in-memory store, with a seeded random source so
/// the initial spread is reproducible.
fn build_engine(config: EngineConfig) -> (TicketEngine, Arc<InMemoryStore>) {
    let store = Arc::new(InMemoryStore::new());
    let engine = TicketEngine::new(
        store.clone(),
        store.clone(),
        store.clone(),
        store.clone(),
        config,
    )
    .with_seeded_rng(7);
    (engine, store)
}

fn default_engine() -> (TicketEngine, Arc<InMemoryStore>) {
    build_engine(EngineConfig::default())
}

fn find<'a>(tickets: &'a [Ticket], id: &str) -> &'a Ticket {
    tickets
        .iter()
        .find(|t| t.incident_id == id)
        .unwrap_or_else(|| panic!("ticket {id} not found"))
}

// ============================================================================
// Reconciliation
// ============================================================================

#[test]
fn reconcile_creates_open_unassigned_tickets() {
    let (engine, store) = default_engine();

    let outcome = engine
        .reconcile(&[
            CandidateTicket::new("INC1", Category::K1, ttr("02:00:00")),
            CandidateTicket::new("INC2", Category::K3, ttr("00:10:00")),
        ])
        .expect("reconcile");

    assert_eq!(outcome.inserted, 2);
    assert_eq!(outcome.modified, 0);
    assert_eq!(outcome.closed, 0);

    let tickets = store.list_active().expect("list");
    let inc1 = find(&tickets, "INC1");
    assert_eq!(inc1.status, TicketStatus::Open);
    assert_eq!(inc1.level, Some(Level::L3));
    assert!(!inc1.is_assigned());
}

#[test]
fn reconcile_is_idempotent_for_identical_input() {
    let (engine, store) = default_engine();
    let batch = vec![
        CandidateTicket::new("INC1", Category::K1, ttr("02:00:00")),
        CandidateTicket::new("INC2", Category::K2, ttr("00:45:00")),
    ];

    engine.reconcile(&batch).expect("first reconcile");
    let before = store.list_active().expect("list");

    let second = engine.reconcile(&batch).expect("second reconcile");
    assert_eq!(second.inserted, 0);
    assert_eq!(second.modified, 0);
    assert_eq!(second.closed, 0);
    assert_eq!(store.list_active().expect("list"), before);
}

#[test]
fn threshold_boundary_is_exclusive() {
    let (engine, store) = default_engine();

    engine
        .reconcile(&[
            CandidateTicket::new("AT", Category::K1, ttr("01:30:00")),
            CandidateTicket::new("PAST", Category::K1, ttr("01:30:01")),
        ])
        .expect("reconcile");

    let tickets = store.list_active().expect("list");
    assert_eq!(find(&tickets, "AT").level, Some(Level::L2));
    assert_eq!(find(&tickets, "PAST").level, Some(Level::L3));
}

#[test]
fn closing_rule_removes_existing_ticket_and_logs_it() {
    let (engine, store) = default_engine();

    engine
        .reconcile(&[CandidateTicket::new("INC1", Category::K3, ttr("00:30:00"))])
        .expect("insert pass");

    // Resubmitted one second past the K3 terminal threshold.
    let outcome = engine
        .reconcile(&[CandidateTicket::new("INC1", Category::K3, ttr("01:00:01"))])
        .expect("closing pass");

    assert_eq!(outcome.closed, 1);
    assert!(store.list_active().expect("list").is_empty());

    let closed = eskala::store::ClosedTicketLog::recent(store.as_ref(), 10).expect("closed log");
    assert_eq!(closed.len(), 1);
    assert_eq!(closed[0].incident_id, "INC1");
}

#[test]
fn closing_rule_spares_exact_threshold_and_new_tickets() {
    let (engine, store) = default_engine();

    engine
        .reconcile(&[CandidateTicket::new("INC1", Category::K3, ttr("00:30:00"))])
        .expect("insert pass");
    engine
        .reconcile(&[CandidateTicket::new("INC1", Category::K3, ttr("01:00:00"))])
        .expect("exactly at threshold");
    assert_eq!(store.list_active().expect("list").len(), 1);

    // A brand-new ticket past the threshold is inserted, not closed.
    let outcome = engine
        .reconcile(&[CandidateTicket::new("INC2", Category::K3, ttr("05:00:00"))])
        .expect("new ticket");
    assert_eq!(outcome.inserted, 1);
    assert_eq!(outcome.closed, 0);
}

#[test]
fn reconcile_rejects_missing_incident_id_and_ttr() {
    let (engine, _store) = default_engine();

    let mut no_id = CandidateTicket::new("", Category::K1, ttr("01:00:00"));
    no_id.incident_id = "  ".to_string();
    assert!(matches!(
        engine.reconcile(&[no_id]),
        Err(EngineError::Validation(_))
    ));

    let mut no_ttr = CandidateTicket::new("INC1", Category::K1, ttr("01:00:00"));
    no_ttr.ttr = None;
    assert!(matches!(
        engine.reconcile(&[no_ttr]),
        Err(EngineError::Validation(_))
    ));
}

#[test]
fn exhausted_budget_fails_without_partial_writes() {
    let (engine, store) = build_engine(EngineConfig {
        reconcile_budget_ms: 0,
        ..EngineConfig::default()
    });

    let batch: Vec<CandidateTicket> = (0..50)
        .map(|i| CandidateTicket::new(format!("INC{i}"), Category::K1, ttr("01:00:00")))
        .collect();

    let err = engine.reconcile(&batch).expect_err("budget exhausted");
    assert!(matches!(err, EngineError::Timeout { budget_ms: 0, .. }));
    // Nothing staged for the aborted request reached the store.
    assert!(store.list_active().expect("list").is_empty());
}

#[test]
fn levels_never_exceed_category_maximum() {
    let (engine, store) = default_engine();

    let ttrs = [
        "00:05:00", "00:30:00", "00:30:01", "01:00:01", "01:30:01", "02:30:01", "04:00:01",
        "06:00:01", "09:00:01", "48:00:00",
    ];
    // K2/K3 tickets past their closing thresholds get closed rather than
    // capped, so only pre-closing TTRs keep them in the store; K1 never
    // closes and must cap at L7.
    let mut batch = Vec::new();
    for (i, t) in ttrs.iter().enumerate() {
        batch.push(CandidateTicket::new(
            format!("K1-{i}"),
            Category::K1,
            ttr(t),
        ));
    }
    batch.push(CandidateTicket::new("K2-a", Category::K2, ttr("01:30:00")));
    batch.push(CandidateTicket::new("K3-a", Category::K3, ttr("01:00:00")));

    engine.reconcile(&batch).expect("reconcile");

    for ticket in store.list_active().expect("list") {
        let (category, level) = (
            ticket.category.expect("category"),
            ticket.level.expect("level"),
        );
        assert!(
            level <= category.max_level(),
            "{} at {level} exceeds {category} max",
            ticket.incident_id
        );
    }
}

// ============================================================================
// Distribution
// ============================================================================

#[test]
fn distribute_rejects_agents_not_logged_in() {
    let (engine, store) = default_engine();
    store.log_in("agent-b");

    assert!(matches!(
        engine.distribute("agent-a"),
        Err(EngineError::NotFound(_))
    ));
}

#[test]
fn completed_ticket_reescalates_but_stays_unassigned_for_past_worker() {
    let (engine, store) = default_engine();
    store.log_in("agent-a");

    let mut completed = Ticket::new("INC1");
    completed.category = Some(Category::K2);
    completed.level = Some(Level::L2);
    completed.status = TicketStatus::Completed;
    store.put_ticket(completed);

    // agent-a already worked INC1, so after re-escalation nobody may
    // claim it and it stays unassigned.
    store.record_touch("INC1", "agent-a").expect("touch");

    let queue = engine.distribute("agent-a").expect("distribute");
    assert!(queue.is_empty());

    let tickets = store.list_active().expect("list");
    let inc1 = find(&tickets, "INC1");
    assert_eq!(inc1.status, TicketStatus::Active);
    assert_eq!(inc1.level, Some(Level::L3));
    assert!(!inc1.is_assigned());
    assert!(inc1.last_assigned_time.is_none());
}

#[test]
fn reescalated_ticket_is_claimable_by_a_new_agent() {
    let (engine, store) = default_engine();
    store.log_in("agent-a");

    let mut completed = Ticket::new("INC1");
    completed.category = Some(Category::K2);
    completed.level = Some(Level::L2);
    completed.status = TicketStatus::Completed;
    store.put_ticket(completed);

    let queue = engine.distribute("agent-a").expect("distribute");
    assert_eq!(queue.len(), 1);
    assert_eq!(queue[0].incident_id, "INC1");
    assert_eq!(queue[0].status, TicketStatus::Active);
    assert_eq!(queue[0].level, Some(Level::L3));
    assert_eq!(queue[0].assigned_to.as_deref(), Some("agent-a"));
}

#[test]
fn completed_at_max_level_is_terminal_within_store() {
    let (engine, store) = default_engine();
    store.log_in("agent-a");

    let mut completed = Ticket::new("INC1");
    completed.category = Some(Category::K3);
    completed.level = Some(Level::L2);
    completed.status = TicketStatus::Completed;
    store.put_ticket(completed);

    let queue = engine.distribute("agent-a").expect("distribute");
    assert!(queue.is_empty());

    let tickets = store.list_active().expect("list");
    assert_eq!(find(&tickets, "INC1").status, TicketStatus::Completed);
}

#[test]
fn touched_incident_is_never_returned_to_the_same_agent() {
    let (engine, store) = default_engine();
    store.log_in("agent-a");

    let mut ticket = Ticket::new("INC1");
    ticket.category = Some(Category::K1);
    ticket.level = Some(Level::L5);
    ticket.status = TicketStatus::Active;
    store.put_ticket(ticket);

    store.record_touch("INC1", "agent-a").expect("touch");

    for _ in 0..5 {
        let queue = engine.distribute("agent-a").expect("distribute");
        assert!(
            queue.iter().all(|t| t.incident_id != "INC1"),
            "INC1 must never return to agent-a"
        );
        let tickets = store.list_active().expect("list");
        assert!(!find(&tickets, "INC1").is_assigned());
    }
}

#[test]
fn queue_is_ordered_by_category_then_level() {
    let (engine, store) = default_engine();
    store.log_in("agent-a");

    for (id, category, level) in [
        ("T2", Category::K1, Level::L2),
        ("T3", Category::K2, Level::L1),
        ("T1", Category::K1, Level::L5),
    ] {
        let mut ticket = Ticket::new(id);
        ticket.category = Some(category);
        ticket.level = Some(level);
        ticket.status = TicketStatus::Active;
        store.put_ticket(ticket);
    }

    let queue = engine.distribute("agent-a").expect("distribute");
    let order: Vec<&str> = queue.iter().map(|t| t.incident_id.as_str()).collect();
    assert_eq!(order, vec!["T1", "T2", "T3"]);
}

#[test]
fn stale_assignments_are_reclaimed_and_redistributed() {
    let (engine, store) = default_engine();
    store.log_in("agent-a");
    store.log_in("agent-b");

    let stale_time = chrono::Utc::now() - chrono::Duration::minutes(25);
    let mut ticket = Ticket::new("INC1");
    ticket.category = Some(Category::K1);
    ticket.level = Some(Level::L4);
    ticket.status = TicketStatus::Active;
    ticket.assign("agent-b", stale_time);
    store.put_ticket(ticket);

    let queue = engine.distribute("agent-a").expect("distribute");
    assert_eq!(queue.len(), 1);
    assert_eq!(queue[0].assigned_to.as_deref(), Some("agent-a"));
}

#[test]
fn fresh_assignments_are_left_alone() {
    let (engine, store) = default_engine();
    store.log_in("agent-a");
    store.log_in("agent-b");

    let recent = chrono::Utc::now() - chrono::Duration::minutes(5);
    let mut ticket = Ticket::new("INC1");
    ticket.category = Some(Category::K1);
    ticket.level = Some(Level::L4);
    ticket.status = TicketStatus::Active;
    ticket.assign("agent-b", recent);
    store.put_ticket(ticket);

    let queue = engine.distribute("agent-a").expect("distribute");
    assert!(queue.is_empty());

    let tickets = store.list_active().expect("list");
    assert_eq!(find(&tickets, "INC1").assigned_to.as_deref(), Some("agent-b"));
}

#[test]
fn assignments_are_recorded_in_ticket_history() {
    let (engine, store) = default_engine();
    store.log_in("agent-a");

    let mut ticket = Ticket::new("INC1");
    ticket.category = Some(Category::K2);
    ticket.level = Some(Level::L1);
    ticket.status = TicketStatus::Open;
    store.put_ticket(ticket);

    let queue = engine.distribute("agent-a").expect("distribute");
    assert_eq!(queue.len(), 1);

    let touched = store.touched_by("INC1").expect("touched_by");
    assert!(touched.contains("agent-a"));
}

/// Store whose reads lag behind writes: `list_active` reports every
/// ticket unassigned even when the underlying store already holds a
/// claim. Models a concurrent scheduler landing its claim between our
/// snapshot and our write.
struct StaleReadStore {
    inner: Arc<InMemoryStore>,
}

impl TicketStore for StaleReadStore {
    fn list_active(&self) -> Result<Vec<Ticket>, StoreError> {
        let mut tickets = self.inner.list_active()?;
        for ticket in &mut tickets {
            ticket.clear_assignment();
        }
        Ok(tickets)
    }

    fn fetch(&self, ids: &[String]) -> Result<Vec<Ticket>, StoreError> {
        self.inner.fetch(ids)
    }

    fn bulk_apply(&self, ops: &[StoreOp]) -> Result<BulkSummary, StoreError> {
        self.inner.bulk_apply(ops)
    }

    fn backend_name(&self) -> &'static str {
        "stale-read memory"
    }
}

#[test]
fn lost_claim_leaves_no_history_and_no_queue_entry() {
    let store = Arc::new(InMemoryStore::new());
    store.log_in("agent-a");

    // agent-b claimed INC1 after our snapshot was taken; the stale read
    // still shows it unassigned, so this pass plans a guarded claim for
    // agent-a that must lose at the store.
    let mut ticket = Ticket::new("INC1");
    ticket.category = Some(Category::K1);
    ticket.level = Some(Level::L5);
    ticket.status = TicketStatus::Active;
    ticket.assign("agent-b", chrono::Utc::now());
    store.put_ticket(ticket);

    let engine = TicketEngine::new(
        Arc::new(StaleReadStore {
            inner: store.clone(),
        }),
        store.clone(),
        store.clone(),
        store.clone(),
        EngineConfig::default(),
    )
    .with_seeded_rng(7);

    let queue = engine.distribute("agent-a").expect("distribute");
    assert!(queue.is_empty(), "lost claim must not reach the queue");

    // agent-b keeps the ticket, and agent-a never worked it, so their
    // history must stay clean: a later pass may still hand it to them.
    let tickets = store.list_active().expect("list");
    assert_eq!(
        find(&tickets, "INC1").assigned_to.as_deref(),
        Some("agent-b")
    );
    let touched = store.touched_by("INC1").expect("touched_by");
    assert!(!touched.contains("agent-a"));
}

#[test]
fn full_lifecycle_reconcile_then_distribute() {
    let (engine, store) = default_engine();
    store.log_in("agent-a");

    engine
        .reconcile(&[
            CandidateTicket::new("INC1", Category::K1, ttr("03:00:00")),
            CandidateTicket::new("INC2", Category::K2, ttr("00:45:00")),
        ])
        .expect("reconcile");

    let queue = engine.distribute("agent-a").expect("distribute");
    assert_eq!(queue.len(), 2);
    // K1/L4 before K2/L1.
    assert_eq!(queue[0].incident_id, "INC1");
    assert_eq!(queue[1].incident_id, "INC2");

    // The agent completes INC2; the next reconciliation pass re-escalates
    // it, and the next distribution pass keeps it away from agent-a.
    let mut completion = CandidateTicket::new("INC2", Category::K2, ttr("00:45:00"));
    completion.status = Some(TicketStatus::Completed);
    engine.reconcile(&[completion]).expect("completion update");

    let queue = engine.distribute("agent-a").expect("distribute");
    assert!(queue.iter().all(|t| t.incident_id != "INC2"));

    let tickets = store.list_active().expect("list");
    let inc2 = find(&tickets, "INC2");
    assert_eq!(inc2.status, TicketStatus::Active);
    assert_eq!(inc2.level, Some(Level::L2));
    assert!(!inc2.is_assigned());
}
