//! Task events as seen by stream listeners.

use serde::Serialize;
use serde_json::Value;

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Running,
    Done,
    Error,
    Cancelled,
}

impl TaskStatus {
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Running)
    }
}

/// Point-in-time view of a task's counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskSnapshot {
    pub task_id: String,
    pub status: TaskStatus,
    pub total: u64,
    pub processed: u64,
    pub ok: u64,
    pub fail: u64,
}

/// One frame pushed to task listeners, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskEvent {
    Snapshot(TaskSnapshot),
    Progress(TaskSnapshot),
    Done {
        task_id: String,
        result: Value,
        #[serde(skip_serializing_if = "Option::is_none")]
        warning: Option<String>,
    },
    Error {
        task_id: String,
        error: String,
    },
    Cancelled {
        task_id: String,
    },
}

impl TaskEvent {
    /// Whether this event ends the stream.
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Done { .. } | Self::Error { .. } | Self::Cancelled { .. }
        )
    }
}
