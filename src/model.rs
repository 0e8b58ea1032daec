use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Immutable configuration for one campaign run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignConfig {
    pub message_text: String,
    pub batch_size: usize,
    #[serde(with = "humantime_serde")]
    pub duration_budget: Duration,
}

/// Coarse lifecycle of the (single) live campaign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lifecycle {
    Idle,
    Running,
    Paused,
    Stopping,
    Completed,
}

impl Lifecycle {
    /// A campaign in any of these states still owns the dispatch loop.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            Lifecycle::Running | Lifecycle::Paused | Lifecycle::Stopping
        )
    }
}

/// Per-item outcome kind for progress events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressKind {
    Sent,
    Fail,
}

/// One failed delivery: the canonical identifier plus a human-readable reason.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureEntry {
    pub identifier: String,
    pub reason: String,
}

/// Derived copy of the live campaign state, safe to hand to observers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub lifecycle: Lifecycle,
    #[serde(default)]
    pub started_at_utc: String,
    #[serde(with = "humantime_serde")]
    pub duration_budget: Duration,
    pub batch_size: usize,
    pub sent: u64,
    pub failed: u64,
    pub total: usize,
    /// Identifiers in the window currently being dispatched.
    pub current: Vec<String>,
}

impl StatusSnapshot {
    /// Snapshot for the time before any campaign has been started.
    pub fn idle() -> Self {
        Self {
            lifecycle: Lifecycle::Idle,
            started_at_utc: String::new(),
            duration_budget: Duration::ZERO,
            batch_size: 0,
            sent: 0,
            failed: 0,
            total: 0,
            current: Vec::new(),
        }
    }
}

/// Connection lifecycle notifications from the messaging provider,
/// passed through to observers unchanged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ConnectionEvent {
    /// Pairing is required; the payload is the pairing code/QR content.
    Pairing(String),
    Ready,
    Disconnected,
    AuthFailure(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CampaignEvent {
    Status(StatusSnapshot),
    Progress {
        kind: ProgressKind,
        identifier: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    Connection(ConnectionEvent),
    Done {
        /// File stem of the persisted run log, if the write succeeded.
        log: Option<String>,
    },
}

/// Durable end-of-run record, written once per run and never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub started_at_utc: String,
    pub finished_at_utc: String,
    pub message_text: String,
    pub batch_size: usize,
    #[serde(with = "humantime_serde")]
    pub duration_budget: Duration,
    pub lifecycle: Lifecycle,
    pub sent: u64,
    pub failed: u64,
    pub queue_size: usize,
    pub successes: Vec<String>,
    pub failures: Vec<FailureEntry>,
}

impl RunRecord {
    /// Identifiers that were never attempted (early stop or deadline).
    pub fn untried(&self) -> usize {
        self.queue_size.saturating_sub((self.sent + self.failed) as usize)
    }
}

/// Current time as an RFC3339 string, the format used in snapshots and logs.
pub fn now_utc_rfc3339() -> String {
    time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| "now".into())
}
