//! Shared data structures for the ticket escalation and distribution engine
//!
//! This module defines the core types of the ticket lifecycle:
//! - `Category`: externally-assigned severity tier (K1/K2/K3)
//! - `Level`: escalation level computed from elapsed resolution time (L1..L7)
//! - `Ttr`: elapsed time-to-resolve, carried as `"HH:MM:SS"` on the wire
//! - `Ticket`: one incident in the active store
//! - `CandidateTicket`: externally-submitted payload for reconciliation
//! - `ClosedEntry`: terminal record appended to the closed-ticket log

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Agent identifier, as supplied by the external agent directory.
pub type AgentId = String;

// ============================================================================
// Severity Category
// ============================================================================

/// Externally-assigned severity tier. Bounds the maximum escalation level.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Category {
    K1,
    K2,
    K3,
}

impl Category {
    /// Highest escalation level a ticket of this category may reach.
    pub fn max_level(&self) -> Level {
        match self {
            Category::K1 => Level::L7,
            Category::K2 => Level::L3,
            Category::K3 => Level::L2,
        }
    }

    /// Priority rank for distribution ordering (K1 sorts first).
    pub fn rank(&self) -> u8 {
        match self {
            Category::K1 => 1,
            Category::K2 => 2,
            Category::K3 => 3,
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Category::K1 => write!(f, "K1"),
            Category::K2 => write!(f, "K2"),
            Category::K3 => write!(f, "K3"),
        }
    }
}

// ============================================================================
// Escalation Level
// ============================================================================

/// Urgency tier computed from TTR, capped by the ticket's category.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Level {
    L1,
    L2,
    L3,
    L4,
    L5,
    L6,
    L7,
}

impl Level {
    /// Advance exactly one step, clamped at L7.
    pub fn next(&self) -> Level {
        match self {
            Level::L1 => Level::L2,
            Level::L2 => Level::L3,
            Level::L3 => Level::L4,
            Level::L4 => Level::L5,
            Level::L5 => Level::L6,
            Level::L6 | Level::L7 => Level::L7,
        }
    }

    /// Priority rank for distribution ordering (L7 sorts first).
    pub fn rank(&self) -> u8 {
        match self {
            Level::L7 => 1,
            Level::L6 => 2,
            Level::L5 => 3,
            Level::L4 => 4,
            Level::L3 => 5,
            Level::L2 => 6,
            Level::L1 => 7,
        }
    }
}

impl std::fmt::Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Level::L1 => write!(f, "L1"),
            Level::L2 => write!(f, "L2"),
            Level::L3 => write!(f, "L3"),
            Level::L4 => write!(f, "L4"),
            Level::L5 => write!(f, "L5"),
            Level::L6 => write!(f, "L6"),
            Level::L7 => write!(f, "L7"),
        }
    }
}

// ============================================================================
// Ticket Status
// ============================================================================

/// Lifecycle state of a ticket within the active store.
///
/// `Closed` is deliberately not a status: closing removes the ticket from
/// the active store entirely and appends a [`ClosedEntry`] to the
/// closed-ticket log. Nothing mutates a closed ticket afterwards.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, Hash)]
pub enum TicketStatus {
    #[default]
    Open,
    Active,
    Completed,
}

impl std::fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TicketStatus::Open => write!(f, "Open"),
            TicketStatus::Active => write!(f, "Active"),
            TicketStatus::Completed => write!(f, "Completed"),
        }
    }
}

// ============================================================================
// Time-To-Resolve
// ============================================================================

/// Elapsed resolution time, supplied by ingestion as `"HH:MM:SS"`.
///
/// Stored as whole seconds; exposes fractional minutes for threshold
/// comparison (seconds contribute 1/60 of a minute each, so `"01:30:01"`
/// is strictly greater than 90 minutes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Ttr {
    total_seconds: u64,
}

impl Ttr {
    /// Build from a whole number of seconds.
    pub fn from_seconds(total_seconds: u64) -> Self {
        Self { total_seconds }
    }

    pub fn total_seconds(&self) -> u64 {
        self.total_seconds
    }

    /// Fractional total minutes, used for strict threshold comparison.
    pub fn total_minutes(&self) -> f64 {
        self.total_seconds as f64 / 60.0
    }
}

/// Error parsing a `"HH:MM:SS"` duration string.
#[derive(Debug, thiserror::Error)]
#[error("invalid TTR '{input}': expected HH:MM:SS")]
pub struct TtrParseError {
    pub input: String,
}

impl FromStr for Ttr {
    type Err = TtrParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || TtrParseError {
            input: s.to_string(),
        };

        let mut parts = s.split(':');
        let hours: u64 = parts.next().and_then(|p| p.parse().ok()).ok_or_else(err)?;
        let minutes: u64 = parts.next().and_then(|p| p.parse().ok()).ok_or_else(err)?;
        let seconds: u64 = parts.next().and_then(|p| p.parse().ok()).ok_or_else(err)?;

        if parts.next().is_some() || minutes >= 60 || seconds >= 60 {
            return Err(err());
        }

        // minutes and seconds are < 60 here; only the hours term can
        // overflow on absurd-but-parseable input.
        let total = hours
            .checked_mul(3600)
            .and_then(|h| h.checked_add(minutes * 60 + seconds))
            .ok_or_else(err)?;
        Ok(Ttr::from_seconds(total))
    }
}

impl std::fmt::Display for Ttr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let hours = self.total_seconds / 3600;
        let minutes = (self.total_seconds % 3600) / 60;
        let seconds = self.total_seconds % 60;
        write!(f, "{:02}:{:02}:{:02}", hours, minutes, seconds)
    }
}

impl Serialize for Ttr {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Ttr {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// Ticket
// ============================================================================

/// One incident in the active store.
///
/// Invariants:
/// - `level`, when known, never exceeds `category.max_level()`
/// - `assigned_to` is `Some` exactly when `last_assigned_time` is `Some`
///   (maintained by [`Ticket::assign`] / [`Ticket::clear_assignment`])
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Ticket {
    /// Unique incident identifier, immutable.
    pub incident_id: String,
    /// Severity tier from the external classification table.
    #[serde(default)]
    pub category: Option<Category>,
    /// Elapsed resolution time, re-supplied on each reconciliation pass.
    #[serde(default)]
    pub ttr: Option<Ttr>,
    /// Escalation level; `None` means Unknown (missing category or TTR).
    #[serde(default)]
    pub level: Option<Level>,
    #[serde(default)]
    pub status: TicketStatus,
    /// Agent currently holding the ticket, if any.
    #[serde(default)]
    pub assigned_to: Option<AgentId>,
    /// When the current assignment was made; staleness is measured from here.
    #[serde(default)]
    pub last_assigned_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
}

impl Ticket {
    /// Create a new, unassigned Open ticket.
    pub fn new(incident_id: impl Into<String>) -> Self {
        Self {
            incident_id: incident_id.into(),
            category: None,
            ttr: None,
            level: None,
            status: TicketStatus::Open,
            assigned_to: None,
            last_assigned_time: None,
            last_updated: None,
        }
    }

    pub fn is_assigned(&self) -> bool {
        self.assigned_to.is_some()
    }

    /// Assign to an agent, stamping the assignment time.
    pub fn assign(&mut self, agent: impl Into<AgentId>, now: DateTime<Utc>) {
        self.assigned_to = Some(agent.into());
        self.last_assigned_time = Some(now);
    }

    /// Clear the assignment and its timestamp together.
    pub fn clear_assignment(&mut self) {
        self.assigned_to = None;
        self.last_assigned_time = None;
    }

    /// Priority sort key: (category rank, level rank), lower sorts first.
    ///
    /// A missing category or level ranks 0, so tickets lacking
    /// classification surface at the front of the queue rather than sink.
    pub fn priority_key(&self) -> (u8, u8) {
        (
            self.category.map_or(0, |c| c.rank()),
            self.level.map_or(0, |l| l.rank()),
        )
    }
}

// ============================================================================
// Candidate Ticket (reconciliation input)
// ============================================================================

/// Externally-submitted ticket payload, one element of a reconciliation batch.
///
/// `incident_id` and `ttr` are required by validation; the assignment and
/// status fields are optional and, when present, win over stored values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateTicket {
    pub incident_id: String,
    #[serde(default)]
    pub category: Option<Category>,
    #[serde(default)]
    pub ttr: Option<Ttr>,
    #[serde(default)]
    pub status: Option<TicketStatus>,
    #[serde(default)]
    pub assigned_to: Option<AgentId>,
    #[serde(default)]
    pub last_assigned_time: Option<DateTime<Utc>>,
}

impl CandidateTicket {
    /// Minimal candidate with the two required fields populated.
    pub fn new(incident_id: impl Into<String>, category: Category, ttr: Ttr) -> Self {
        Self {
            incident_id: incident_id.into(),
            category: Some(category),
            ttr: Some(ttr),
            status: None,
            assigned_to: None,
            last_assigned_time: None,
        }
    }
}

// ============================================================================
// Closed Ticket Log
// ============================================================================

/// Action recorded in the closed-ticket log.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ClosedAction {
    Closed,
}

/// Terminal record for a ticket removed from the active store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClosedEntry {
    pub incident_id: String,
    pub action: ClosedAction,
    pub timestamp: DateTime<Utc>,
}

impl ClosedEntry {
    pub fn closed(incident_id: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            incident_id: incident_id.into(),
            action: ClosedAction::Closed,
            timestamp,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
