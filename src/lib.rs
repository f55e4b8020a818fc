//! Eskala: Incident Ticket Escalation & Distribution Engine
//!
//! Tracks incident tickets through a severity-tiered escalation lifecycle
//! and fairly distributes unresolved tickets among logged-in agents.
//!
//! ## Architecture
//!
//! - **Escalation rules** ([`escalation`]): pure (category, TTR) → level
//!   calculator plus the Open/Active/Completed state machine
//! - **Reconciliation** ([`reconcile`], [`engine`]): idempotent batch merge
//!   of externally-submitted tickets under a wall-clock budget
//! - **Distribution** ([`distribute`], [`engine`]): per-agent scheduling
//!   pass — re-escalation, stale-claim reclaim, random spread, targeted claim
//! - **Stores** ([`store`], [`persistent`]): collaborator traits with
//!   in-memory and sled backends; claims use conditional writes

pub mod api;
pub mod config;
pub mod distribute;
pub mod engine;
pub mod escalation;
pub mod persistent;
pub mod reconcile;
pub mod store;
pub mod types;

// Re-export the engine surface
pub use engine::{EngineError, TicketEngine};
pub use reconcile::ReconcileOutcome;

// Re-export commonly used types
pub use types::{
    AgentId, CandidateTicket, Category, ClosedAction, ClosedEntry, Level, Ticket, TicketStatus,
    Ttr,
};

// Re-export storage seams
pub use persistent::SledStore;
pub use store::{
    AgentDirectory, BulkSummary, ClosedTicketLog, InMemoryStore, StoreError, StoreOp,
    TicketHistory, TicketStore, WriteGuard,
};
