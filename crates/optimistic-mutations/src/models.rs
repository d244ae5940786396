//! Built-in dashboard record types.
//!
//! Each model keeps fields it does not know about in `extra`, so values the
//! server computes survive a confirm.

use crate::resource::Resource;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Todo,
    InProgress,
    Blocked,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Task {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: None,
            status: TaskStatus::default(),
            due_date: None,
            assignee: None,
            extra: Map::new(),
        }
    }
}

impl Resource for Task {
    const PATH: &'static str = "tasks";
    const ENTITY_TYPE: &'static str = "task";
}

/// An uploaded file and its metadata. Created with a multipart body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// URL of the stored file, assigned by the server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Document {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: None,
            category: None,
            file: None,
            extra: Map::new(),
        }
    }
}

impl Resource for Document {
    const PATH: &'static str = "documents";
    const ENTITY_TYPE: &'static str = "document";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Meeting {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agenda: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Meeting {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            scheduled_at: None,
            location: None,
            agenda: None,
            extra: Map::new(),
        }
    }
}

impl Resource for Meeting {
    const PATH: &'static str = "meetings";
    const ENTITY_TYPE: &'static str = "meeting";
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionStatus {
    #[default]
    Proposed,
    Approved,
    Rejected,
    Superseded,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
    #[serde(default)]
    pub status: DecisionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decided_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Decision {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            rationale: None,
            status: DecisionStatus::default(),
            decided_at: None,
            extra: Map::new(),
        }
    }
}

impl Resource for Decision {
    const PATH: &'static str = "decisions";
    const ENTITY_TYPE: &'static str = "decision";
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn task_defaults_and_unknown_fields() {
        let task: Task = serde_json::from_value(json!({
            "title": "Write report",
            "priority": "high"
        }))
        .unwrap();

        assert_eq!(task.status, TaskStatus::Todo);
        assert_eq!(task.extra["priority"], "high");

        let back = serde_json::to_value(&task).unwrap();
        assert_eq!(
            back,
            json!({ "title": "Write report", "status": "todo", "priority": "high" })
        );
    }

    #[test]
    fn meeting_parses_timestamps() {
        let meeting: Meeting = serde_json::from_value(json!({
            "title": "Standup",
            "scheduled_at": "2024-05-01T09:30:00Z",
            "location": null
        }))
        .unwrap();

        assert_eq!(
            meeting.scheduled_at.map(|at| at.to_rfc3339()),
            Some("2024-05-01T09:30:00+00:00".to_string())
        );
        assert_eq!(meeting.location, None);
    }

    #[test]
    fn decision_rejects_unknown_status() {
        let result = serde_json::from_value::<Decision>(json!({
            "title": "Adopt Rust",
            "status": "maybe"
        }));
        assert!(result.is_err());
    }

    #[test]
    fn document_paths() {
        assert_eq!(Document::collection_path(), "/documents/");
        assert_eq!(Meeting::PATH, "meetings");
        assert_eq!(Decision::ENTITY_TYPE, "decision");
    }
}
