//! Shared status types for Keeper operations

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Condition type reporting whether the operation's job is in place
pub const CONDITION_READY: &str = "Ready";
/// Condition type set once the job has finished
pub const CONDITION_COMPLETED: &str = "Completed";
/// Condition type tracking pre-backup hook readiness
pub const CONDITION_PRE_BACKUP_READY: &str = "PreBackupReady";

/// Job was created
pub const REASON_STARTED: &str = "Started";
/// Job could not be created or updated
pub const REASON_CREATION_FAILED: &str = "CreationFailed";
/// Volume claims could not be listed
pub const REASON_RETRIEVAL_FAILED: &str = "RetrievalFailed";
/// Pre-backup hooks are still settling
pub const REASON_WAITING: &str = "Waiting";
/// Pre-backup hooks are settled
pub const REASON_READY: &str = "Ready";
/// Job or hook failed permanently
pub const REASON_FAILED: &str = "Failed";
/// Job finished successfully
pub const REASON_SUCCEEDED: &str = "Succeeded";

/// The kind of maintenance operation
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash)]
pub enum OperationKind {
    /// Repository integrity check
    Check,
    /// Volume backup
    Backup,
}

impl OperationKind {
    /// Lowercase identifier used in job names and labels
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Check => "check",
            Self::Backup => "backup",
        }
    }

    /// Parse the value of the job type label
    pub fn from_label(value: &str) -> Option<Self> {
        match value {
            "check" => Some(Self::Check),
            "backup" => Some(Self::Backup),
            _ => None,
        }
    }

    /// Deterministic job name for an operation of this kind
    pub fn job_name(&self, operation_name: &str) -> String {
        format!("{}-{}", self.as_str(), operation_name)
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle phase of an operation
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum OperationPhase {
    /// No job has been created yet
    #[default]
    NotStarted,
    /// Backup is deferred until its pre-backup hooks settle
    WaitingForPreBackup,
    /// Job exists and is running
    Started,
    /// Job finished successfully
    Succeeded,
    /// Job or pre-backup hook failed
    Failed,
}

impl OperationPhase {
    /// Whether the phase is final
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

impl std::fmt::Display for OperationPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotStarted => write!(f, "NotStarted"),
            Self::WaitingForPreBackup => write!(f, "WaitingForPreBackup"),
            Self::Started => write!(f, "Started"),
            Self::Succeeded => write!(f, "Succeeded"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

/// Condition status following Kubernetes conventions
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ConditionStatus {
    /// Condition is true
    True,
    /// Condition is false
    False,
    /// Condition status is unknown
    #[default]
    Unknown,
}

impl std::fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::True => write!(f, "True"),
            Self::False => write!(f, "False"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Kubernetes-style condition for status reporting
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct Condition {
    /// Type of condition (e.g., Ready, Completed)
    #[serde(rename = "type")]
    pub type_: String,

    /// Status of the condition (True, False, Unknown)
    pub status: ConditionStatus,

    /// Machine-readable reason for the condition
    pub reason: String,

    /// Human-readable message
    pub message: String,

    /// Last time the condition transitioned
    #[serde(rename = "lastTransitionTime")]
    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    /// Create a new condition with the current timestamp
    pub fn new(
        type_: impl Into<String>,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            type_: type_.into(),
            status,
            reason: reason.into(),
            message: message.into(),
            last_transition_time: Utc::now(),
        }
    }
}

/// Status shared by checks and backups
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OperationStatus {
    /// Current lifecycle phase
    #[serde(default)]
    pub phase: OperationPhase,

    /// Status conditions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// When the job was created
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    /// When the operation reached a terminal phase
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl OperationStatus {
    /// Create a status in the given phase with no conditions
    pub fn with_phase(phase: OperationPhase) -> Self {
        Self {
            phase,
            ..Default::default()
        }
    }

    /// Insert or replace the condition with the same type
    ///
    /// The transition time is kept when the status does not change.
    pub fn set_condition(&mut self, condition: Condition) {
        match self
            .conditions
            .iter_mut()
            .find(|c| c.type_ == condition.type_)
        {
            Some(existing) => {
                let transition = if existing.status == condition.status {
                    existing.last_transition_time
                } else {
                    condition.last_transition_time
                };
                *existing = Condition {
                    last_transition_time: transition,
                    ..condition
                };
            }
            None => self.conditions.push(condition),
        }
    }

    /// Look up a condition by type
    pub fn condition(&self, type_: &str) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.type_ == type_)
    }
}
