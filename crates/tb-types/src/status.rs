//! Task status lifecycle.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Status of one task in the buffet.
///
/// `Running` is only ever set by a claim; the other three are the outcomes a
/// task may be completed with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Available,
    Running,
    Success,
    Failed,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 4] = [
        TaskStatus::Available,
        TaskStatus::Running,
        TaskStatus::Success,
        TaskStatus::Failed,
    ];

    /// Whether a task may be completed with this status.
    pub fn is_outcome(self) -> bool {
        match self {
            TaskStatus::Success | TaskStatus::Failed | TaskStatus::Available => true,
            TaskStatus::Running => false,
        }
    }

    /// Single-byte wire code used on the supervisor pipe.
    pub fn code(self) -> u8 {
        match self {
            TaskStatus::Available => 1,
            TaskStatus::Running => 2,
            TaskStatus::Success => 3,
            TaskStatus::Failed => 4,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(TaskStatus::Available),
            2 => Some(TaskStatus::Running),
            3 => Some(TaskStatus::Success),
            4 => Some(TaskStatus::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskStatus::Available => "available",
            TaskStatus::Running => "running",
            TaskStatus::Success => "success",
            TaskStatus::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_running_is_not_an_outcome() {
        let outcomes: Vec<_> = TaskStatus::ALL
            .into_iter()
            .filter(|s| s.is_outcome())
            .collect();
        assert_eq!(
            outcomes,
            vec![TaskStatus::Available, TaskStatus::Success, TaskStatus::Failed]
        );
    }

    #[test]
    fn wire_codes_are_stable() {
        for status in TaskStatus::ALL {
            assert_eq!(TaskStatus::from_code(status.code()), Some(status));
        }
        assert_eq!(TaskStatus::from_code(0), None);
        assert_eq!(TaskStatus::from_code(200), None);
    }

    #[test]
    fn serializes_lowercase() {
        let json = serde_json::to_string(&TaskStatus::Failed).unwrap();
        assert_eq!(json, "\"failed\"");
    }
}
