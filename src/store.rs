//! Collaborator traits — pluggable persistence seams
//!
//! Abstracts the four external collaborators so backends can be swapped
//! without touching engine code:
//! - [`TicketStore`]: the active ticket store (batched reads, bulk writes)
//! - [`ClosedTicketLog`]: append-only terminal log
//! - [`AgentDirectory`]: the logged-in agent set
//! - [`TicketHistory`]: which agents ever worked which incident
//!
//! [`InMemoryStore`] implements all four for tests and minimal
//! deployments; the sled backend lives in [`crate::persistent`].
//!
//! There is no higher-level mutual exclusion anywhere in the engine:
//! concurrent callers race between read and write by design, and the
//! [`WriteGuard::IfUnassigned`] conditional write is what keeps two
//! callers from both claiming the same ticket. Backends must honor it.

use crate::types::{AgentId, ClosedEntry, Ticket};
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

/// Store-level errors. Guard misses are not errors — they surface as
/// [`BulkSummary::conflicts`].
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("storage backend error: {0}")]
    Backend(String),
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Condition attached to an update, checked atomically by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteGuard {
    /// Unconditional write.
    None,
    /// Apply only while the stored ticket is still unassigned. A miss
    /// means another caller claimed the ticket first.
    IfUnassigned,
}

/// One staged write, keyed by incident id.
#[derive(Debug, Clone)]
pub enum StoreOp {
    Insert(Ticket),
    /// Upsert: replaces the stored ticket, inserts when absent.
    Update { ticket: Ticket, guard: WriteGuard },
    Delete { incident_id: String },
}

/// Best-effort outcome of a bulk write. Partial application is expected —
/// there is no cross-document atomicity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkSummary {
    pub inserted: usize,
    pub modified: usize,
    pub deleted: usize,
    /// Incident ids of updates skipped because their guard no longer
    /// held. Callers use these to unwind any bookkeeping staged for the
    /// lost writes.
    pub conflicts: Vec<String>,
}

// ============================================================================
// Collaborator Traits
// ============================================================================

/// The active ticket store.
///
/// Implementations must be thread-safe (`Send + Sync`) for shared access
/// across concurrent requests.
pub trait TicketStore: Send + Sync {
    /// Every ticket in the active store, regardless of status.
    fn list_active(&self) -> Result<Vec<Ticket>, StoreError>;

    /// Fetch the tickets whose incident ids appear in `ids`, in one read.
    fn fetch(&self, ids: &[String]) -> Result<Vec<Ticket>, StoreError>;

    /// Apply a batch of writes best-effort, honoring per-op guards.
    fn bulk_apply(&self, ops: &[StoreOp]) -> Result<BulkSummary, StoreError>;

    /// Backend name for logging.
    fn backend_name(&self) -> &'static str;
}

/// Append-only log of closed tickets. Entries are terminal.
pub trait ClosedTicketLog: Send + Sync {
    fn append(&self, entry: &ClosedEntry) -> Result<(), StoreError>;

    /// Most recent entries, newest first.
    fn recent(&self, limit: usize) -> Result<Vec<ClosedEntry>, StoreError>;
}

/// The external agent directory; the engine only reads the logged-in set.
pub trait AgentDirectory: Send + Sync {
    fn list_logged_in(&self) -> Result<Vec<AgentId>, StoreError>;
}

/// Append-only incident → agents map, preventing repeat assignment of the
/// same incident to the same agent across its escalation lifetime.
pub trait TicketHistory: Send + Sync {
    fn record_touch(&self, incident_id: &str, agent_id: &str) -> Result<(), StoreError>;

    fn touched_by(&self, incident_id: &str) -> Result<HashSet<AgentId>, StoreError>;
}

// ============================================================================
// In-Memory Backend
// ============================================================================

/// In-memory implementation of all four collaborators.
///
/// Thread-safe via `RwLock`. Not durable — data lost on drop. Intended for
/// tests and minimal single-process deployments.
#[derive(Default)]
pub struct InMemoryStore {
    tickets: RwLock<HashMap<String, Ticket>>,
    closed: RwLock<Vec<ClosedEntry>>,
    logged_in: RwLock<HashSet<AgentId>>,
    history: RwLock<HashMap<String, HashSet<AgentId>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark an agent as logged in (test/deployment convenience; in the
    /// real system the directory is maintained by the auth layer).
    pub fn log_in(&self, agent: impl Into<AgentId>) {
        if let Ok(mut set) = self.logged_in.write() {
            set.insert(agent.into());
        }
    }

    pub fn log_out(&self, agent: &str) {
        if let Ok(mut set) = self.logged_in.write() {
            set.remove(agent);
        }
    }

    /// Seed a ticket directly, bypassing reconciliation (tests only).
    pub fn put_ticket(&self, ticket: Ticket) {
        if let Ok(mut map) = self.tickets.write() {
            map.insert(ticket.incident_id.clone(), ticket);
        }
    }

    fn lock_err() -> StoreError {
        StoreError::Backend("lock poisoned".to_string())
    }
}

impl TicketStore for InMemoryStore {
    fn list_active(&self) -> Result<Vec<Ticket>, StoreError> {
        let map = self.tickets.read().map_err(|_| Self::lock_err())?;
        Ok(map.values().cloned().collect())
    }

    fn fetch(&self, ids: &[String]) -> Result<Vec<Ticket>, StoreError> {
        let map = self.tickets.read().map_err(|_| Self::lock_err())?;
        Ok(ids.iter().filter_map(|id| map.get(id).cloned()).collect())
    }

    fn bulk_apply(&self, ops: &[StoreOp]) -> Result<BulkSummary, StoreError> {
        let mut map = self.tickets.write().map_err(|_| Self::lock_err())?;
        let mut summary = BulkSummary::default();

        for op in ops {
            match op {
                StoreOp::Insert(ticket) => {
                    map.insert(ticket.incident_id.clone(), ticket.clone());
                    summary.inserted += 1;
                }
                StoreOp::Update { ticket, guard } => match map.get(&ticket.incident_id) {
                    Some(stored) => {
                        if *guard == WriteGuard::IfUnassigned && stored.is_assigned() {
                            summary.conflicts.push(ticket.incident_id.clone());
                        } else {
                            map.insert(ticket.incident_id.clone(), ticket.clone());
                            summary.modified += 1;
                        }
                    }
                    None => {
                        // Upsert semantics: absent key becomes an insert.
                        map.insert(ticket.incident_id.clone(), ticket.clone());
                        summary.inserted += 1;
                    }
                },
                StoreOp::Delete { incident_id } => {
                    if map.remove(incident_id).is_some() {
                        summary.deleted += 1;
                    }
                }
            }
        }

        Ok(summary)
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

impl ClosedTicketLog for InMemoryStore {
    fn append(&self, entry: &ClosedEntry) -> Result<(), StoreError> {
        let mut log = self.closed.write().map_err(|_| Self::lock_err())?;
        log.push(entry.clone());
        Ok(())
    }

    fn recent(&self, limit: usize) -> Result<Vec<ClosedEntry>, StoreError> {
        let log = self.closed.read().map_err(|_| Self::lock_err())?;
        Ok(log.iter().rev().take(limit).cloned().collect())
    }
}

impl AgentDirectory for InMemoryStore {
    fn list_logged_in(&self) -> Result<Vec<AgentId>, StoreError> {
        let set = self.logged_in.read().map_err(|_| Self::lock_err())?;
        let mut agents: Vec<AgentId> = set.iter().cloned().collect();
        agents.sort();
        Ok(agents)
    }
}

impl TicketHistory for InMemoryStore {
    fn record_touch(&self, incident_id: &str, agent_id: &str) -> Result<(), StoreError> {
        let mut map = self.history.write().map_err(|_| Self::lock_err())?;
        map.entry(incident_id.to_string())
            .or_default()
            .insert(agent_id.to_string());
        Ok(())
    }

    fn touched_by(&self, incident_id: &str) -> Result<HashSet<AgentId>, StoreError> {
        let map = self.history.read().map_err(|_| Self::lock_err())?;
        Ok(map.get(incident_id).cloned().unwrap_or_default())
    }
}

// ============================================================================
// Tests
// ============================================================================
