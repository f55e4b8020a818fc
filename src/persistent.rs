//! Sled-backed persistence for tickets, closed log, agents, and history
//!
//! One sled database with four trees:
//! - `tickets`: incident id → JSON [`Ticket`]
//! - `closed_log`: big-endian millis + incident id → JSON [`ClosedEntry`]
//!   (keys sort chronologically)
//! - `agents`: logged-in agent ids (presence = logged in)
//! - `history`: incident id → JSON set of agent ids
//!
//! The [`WriteGuard::IfUnassigned`] discipline is implemented with sled's
//! `compare_and_swap`, so two concurrent claimers of the same ticket
//! resolve to exactly one winner at the storage layer.
//!
//! Note: writes do not flush individually. Sled provides durability via
//! background flushing; on crash at most the last few writes may be lost,
//! and idempotent resubmission of the reconciliation batch recovers them.

use crate::store::{
    AgentDirectory, BulkSummary, ClosedTicketLog, StoreError, StoreOp, TicketHistory, TicketStore,
    WriteGuard,
};
use crate::types::{AgentId, ClosedEntry, Ticket};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

impl From<sled::Error> for StoreError {
    fn from(err: sled::Error) -> Self {
        StoreError::Backend(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

/// Durable store backed by a local sled database.
#[derive(Clone)]
pub struct SledStore {
    db: Arc<sled::Db>,
    tickets: sled::Tree,
    closed: sled::Tree,
    agents: sled::Tree,
    history: sled::Tree,
}

impl SledStore {
    /// Open or create the store at the specified path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let db = sled::open(path)?;
        let tickets = db.open_tree("tickets")?;
        let closed = db.open_tree("closed_log")?;
        let agents = db.open_tree("agents")?;
        let history = db.open_tree("history")?;
        Ok(Self {
            db: Arc::new(db),
            tickets,
            closed,
            agents,
            history,
        })
    }

    /// Mark an agent as logged in. Maintained by the auth layer in the
    /// full system; exposed here so deployments without one can seed it.
    pub fn log_in(&self, agent: &str) -> Result<(), StoreError> {
        self.agents.insert(agent.as_bytes(), &[1u8])?;
        Ok(())
    }

    pub fn log_out(&self, agent: &str) -> Result<(), StoreError> {
        self.agents.remove(agent.as_bytes())?;
        Ok(())
    }

    /// Storage statistics for the health endpoint.
    pub fn stats(&self) -> StoreStats {
        StoreStats {
            ticket_count: self.tickets.len(),
            closed_count: self.closed.len(),
            size_bytes: self.db.size_on_disk().unwrap_or(0),
        }
    }

    /// Closed-log key: timestamp millis (big-endian, sorts chronologically)
    /// plus incident id to disambiguate same-millisecond closures.
    fn closed_key(entry: &ClosedEntry) -> Vec<u8> {
        let millis = entry.timestamp.timestamp_millis().max(0) as u64;
        let mut key = millis.to_be_bytes().to_vec();
        key.extend_from_slice(entry.incident_id.as_bytes());
        key
    }

    /// Guarded upsert via compare-and-swap. Returns false when the
    /// guard no longer held (another caller claimed the ticket).
    fn guarded_upsert(&self, ticket: &Ticket, guard: WriteGuard) -> Result<bool, StoreError> {
        let key = ticket.incident_id.as_bytes();
        let new_value = serde_json::to_vec(ticket)?;

        loop {
            let current = self.tickets.get(key)?;

            if guard == WriteGuard::IfUnassigned {
                if let Some(bytes) = &current {
                    let stored: Ticket = serde_json::from_slice(bytes)?;
                    if stored.is_assigned() {
                        return Ok(false);
                    }
                }
            }

            match self
                .tickets
                .compare_and_swap(key, current, Some(new_value.clone()))?
            {
                Ok(()) => return Ok(true),
                // Lost the race against a concurrent writer: re-read and
                // re-check the guard against the winner's value.
                Err(_) => continue,
            }
        }
    }
}

/// Storage statistics
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct StoreStats {
    pub ticket_count: usize,
    pub closed_count: usize,
    pub size_bytes: u64,
}

impl TicketStore for SledStore {
    fn list_active(&self) -> Result<Vec<Ticket>, StoreError> {
        let mut tickets = Vec::new();
        for item in self.tickets.iter() {
            let (_key, value) = item?;
            match serde_json::from_slice::<Ticket>(&value) {
                Ok(ticket) => tickets.push(ticket),
                Err(e) => warn!(error = %e, "Skipping corrupted ticket record"),
            }
        }
        Ok(tickets)
    }

    fn fetch(&self, ids: &[String]) -> Result<Vec<Ticket>, StoreError> {
        let mut tickets = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(value) = self.tickets.get(id.as_bytes())? {
                tickets.push(serde_json::from_slice(&value)?);
            }
        }
        Ok(tickets)
    }

    fn bulk_apply(&self, ops: &[StoreOp]) -> Result<BulkSummary, StoreError> {
        let mut summary = BulkSummary::default();

        for op in ops {
            match op {
                StoreOp::Insert(ticket) => {
                    let value = serde_json::to_vec(ticket)?;
                    self.tickets.insert(ticket.incident_id.as_bytes(), value)?;
                    summary.inserted += 1;
                }
                StoreOp::Update { ticket, guard } => {
                    let existed = self.tickets.contains_key(ticket.incident_id.as_bytes())?;
                    if self.guarded_upsert(ticket, *guard)? {
                        if existed {
                            summary.modified += 1;
                        } else {
                            summary.inserted += 1;
                        }
                    } else {
                        debug!(
                            incident_id = %ticket.incident_id,
                            "Claim skipped: ticket already assigned"
                        );
                        summary.conflicts.push(ticket.incident_id.clone());
                    }
                }
                StoreOp::Delete { incident_id } => {
                    if self.tickets.remove(incident_id.as_bytes())?.is_some() {
                        summary.deleted += 1;
                    }
                }
            }
        }

        Ok(summary)
    }

    fn backend_name(&self) -> &'static str {
        "sled"
    }
}

impl ClosedTicketLog for SledStore {
    fn append(&self, entry: &ClosedEntry) -> Result<(), StoreError> {
        let value = serde_json::to_vec(entry)?;
        self.closed.insert(Self::closed_key(entry), value)?;
        Ok(())
    }

    fn recent(&self, limit: usize) -> Result<Vec<ClosedEntry>, StoreError> {
        let mut entries = Vec::with_capacity(limit);
        for item in self.closed.iter().rev().take(limit) {
            let (_key, value) = item?;
            entries.push(serde_json::from_slice(&value)?);
        }
        Ok(entries)
    }
}

impl AgentDirectory for SledStore {
    fn list_logged_in(&self) -> Result<Vec<AgentId>, StoreError> {
        let mut agents = Vec::new();
        for item in self.agents.iter() {
            let (key, _value) = item?;
            agents.push(String::from_utf8_lossy(&key).into_owned());
        }
        Ok(agents)
    }
}

impl TicketHistory for SledStore {
    fn record_touch(&self, incident_id: &str, agent_id: &str) -> Result<(), StoreError> {
        let key = incident_id.as_bytes();

        loop {
            let current = self.history.get(key)?;
            let mut touched: HashSet<AgentId> = match &current {
                Some(bytes) => serde_json::from_slice(bytes)?,
                None => HashSet::new(),
            };

            if !touched.insert(agent_id.to_string()) {
                return Ok(());
            }

            let new_value = serde_json::to_vec(&touched)?;
            match self
                .history
                .compare_and_swap(key, current, Some(new_value))?
            {
                Ok(()) => return Ok(()),
                Err(_) => continue,
            }
        }
    }

    fn touched_by(&self, incident_id: &str) -> Result<HashSet<AgentId>, StoreError> {
        match self.history.get(incident_id.as_bytes())? {
            Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
            None => Ok(HashSet::new()),
        }
    }
}
