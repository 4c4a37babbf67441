//! Shared types, errors, statuses, and node paths for the stagemap pipeline model.
//!
//! This crate provides the foundational types used across all other stagemap crates:
//! - `StructureError` / `StagemapError` — error taxonomy
//! - `NodePath` — position of a node as child offsets from the root
//! - `ExecutionStatus` and `StatusGate` — status vocabulary and the host-supplied
//!   "is this the initial status" predicate
//! - `Variable` / `OverrideSet` — stage variable values

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Document-integrity violations. Only operations that need a fully
/// resolvable tree return these.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StructureError {
    #[error("Group at {path} has no children")]
    EmptyGroup { path: NodePath },

    #[error("Duplicate node id '{id}' at {first} and {second}")]
    DuplicateId {
        id: String,
        first: NodePath,
        second: NodePath,
    },

    #[error("Node '{id}' not found")]
    NotFound { id: String },
}

impl StructureError {
    pub fn not_found(id: impl Into<String>) -> Self {
        StructureError::NotFound { id: id.into() }
    }
}

/// Unified error type for all stagemap subsystems.
#[derive(Debug, thiserror::Error)]
pub enum StagemapError {
    #[error(transparent)]
    Structure(#[from] StructureError),

    #[error("Pipeline validation failed: {0}")]
    ValidationError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

/// A convenience alias for `Result<T, StagemapError>`.
pub type Result<T> = std::result::Result<T, StagemapError>;

// ---------------------------------------------------------------------------
// NodePath — child offsets from the root
// ---------------------------------------------------------------------------

/// Position of a node as a sequence of child offsets from the root.
///
/// Group children take offsets `0..n`. The nested step structure owned by
/// an item sits at offset `0` below that item. Lexicographic ordering of
/// paths equals pre-order traversal order.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodePath(Vec<usize>);

impl NodePath {
    pub fn root() -> Self {
        Self(Vec::new())
    }

    /// Path of the `offset`-th child below this path.
    pub fn child(&self, offset: usize) -> Self {
        let mut segments = self.0.clone();
        segments.push(offset);
        Self(segments)
    }

    pub fn depth(&self) -> usize {
        self.0.len()
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<usize>> for NodePath {
    fn from(segments: Vec<usize>) -> Self {
        Self(segments)
    }
}

impl fmt::Display for NodePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return write!(f, "root");
        }
        let parts: Vec<String> = self.0.iter().map(|s| s.to_string()).collect();
        write!(f, "{}", parts.join("."))
    }
}

// ---------------------------------------------------------------------------
// ExecutionStatus — status of a stage or step
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    #[default]
    NotStarted,
    Queued,
    Running,
    Paused,
    Waiting,
    Success,
    Failed,
    Aborted,
    Expired,
    Skipped,
    Suspended,
    ApprovalRejected,
    /// Any status owned by the host that this model does not distinguish.
    #[serde(other)]
    Unknown,
}

impl ExecutionStatus {
    pub const ALL: [ExecutionStatus; 13] = [
        ExecutionStatus::NotStarted,
        ExecutionStatus::Queued,
        ExecutionStatus::Running,
        ExecutionStatus::Paused,
        ExecutionStatus::Waiting,
        ExecutionStatus::Success,
        ExecutionStatus::Failed,
        ExecutionStatus::Aborted,
        ExecutionStatus::Expired,
        ExecutionStatus::Skipped,
        ExecutionStatus::Suspended,
        ExecutionStatus::ApprovalRejected,
        ExecutionStatus::Unknown,
    ];

    /// The serialized name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::NotStarted => "not_started",
            ExecutionStatus::Queued => "queued",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Paused => "paused",
            ExecutionStatus::Waiting => "waiting",
            ExecutionStatus::Success => "success",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Aborted => "aborted",
            ExecutionStatus::Expired => "expired",
            ExecutionStatus::Skipped => "skipped",
            ExecutionStatus::Suspended => "suspended",
            ExecutionStatus::ApprovalRejected => "approval_rejected",
            ExecutionStatus::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionStatus {
    type Err = StagemapError;

    /// Strict parse: unlike deserialization, unrecognized names are rejected.
    fn from_str(s: &str) -> Result<Self> {
        ExecutionStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| StagemapError::Other(format!("Unknown execution status '{s}'")))
    }
}

// ---------------------------------------------------------------------------
// StatusGate — host-supplied initial-status predicate
// ---------------------------------------------------------------------------

/// Decides whether a status is the *initial* one. Nodes in an initial
/// status cannot be selected.
pub trait StatusGate {
    fn is_initial(&self, status: ExecutionStatus) -> bool;

    fn is_selectable(&self, status: ExecutionStatus) -> bool {
        !self.is_initial(status)
    }
}

impl<F> StatusGate for F
where
    F: Fn(ExecutionStatus) -> bool,
{
    fn is_initial(&self, status: ExecutionStatus) -> bool {
        self(status)
    }
}

/// The default gate: only `NotStarted` is initial.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NotStartedGate;

impl StatusGate for NotStartedGate {
    fn is_initial(&self, status: ExecutionStatus) -> bool {
        status == ExecutionStatus::NotStarted
    }
}

/// Serializable gate configuration: the list of statuses the host treats
/// as initial.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusGateConfig {
    #[serde(default = "default_initial_statuses")]
    pub initial_statuses: Vec<ExecutionStatus>,
}

fn default_initial_statuses() -> Vec<ExecutionStatus> {
    vec![ExecutionStatus::NotStarted]
}

impl Default for StatusGateConfig {
    fn default() -> Self {
        Self {
            initial_statuses: default_initial_statuses(),
        }
    }
}

impl StatusGate for StatusGateConfig {
    fn is_initial(&self, status: ExecutionStatus) -> bool {
        self.initial_statuses.contains(&status)
    }
}

impl StatusGateConfig {
    /// Read a gate configuration from a JSON file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&data)?;
        Ok(config)
    }

    /// Serialize this configuration to JSON and write it to `path`.
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Variables and override sets
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variable {
    pub name: String,
    pub value: String,
}

impl Variable {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// A named, alternate collection of variable values a stage exposes for
/// other stages to adopt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverrideSet {
    pub identifier: String,
    #[serde(default)]
    pub variables: Vec<Variable>,
}

impl OverrideSet {
    pub fn new(identifier: impl Into<String>, variables: Vec<Variable>) -> Self {
        Self {
            identifier: identifier.into(),
            variables,
        }
    }
}
