use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};
use ts_rs::TS;

use super::record::{Payload, Record, ValidationError, require_non_blank};

/// Kanban column of a task.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, TS, EnumString, Display, Default,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TaskStatus {
    #[default]
    Todo,
    InProgress,
    InReview,
    Done,
    Cancelled,
}

impl TaskStatus {
    /// Statuses whose time-in-stage is tracked through `stage_started_at`.
    pub fn is_staged(&self) -> bool {
        matches!(self, TaskStatus::InProgress | TaskStatus::InReview)
    }
}

#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, TS, EnumString, Display, Default,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TaskPriority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
pub struct Task {
    pub id: String,
    pub project_id: String, // Foreign key to Project
    pub title: String,
    pub description: Option<String>,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub priority: TaskPriority,
    pub assignee: Option<String>,
    pub due_date: Option<NaiveDate>,
    pub sequence: Option<i32>,                   // Position within the board column
    pub stage_started_at: Option<DateTime<Utc>>, // When task entered current status stage
    pub updated_at: Option<DateTime<Utc>>,
    pub revision: Option<i64>,
}

impl Record for Task {
    const COLLECTION: &'static str = "tasks";
    type Create = CreateTask;
    type Update = UpdateTask;

    fn id(&self) -> &str {
        &self.id
    }
}

impl Task {
    pub fn is_overdue(&self, today: NaiveDate) -> bool {
        !matches!(self.status, TaskStatus::Done | TaskStatus::Cancelled)
            && self.due_date.is_some_and(|due| due < today)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct CreateTask {
    pub project_id: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<TaskPriority>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sequence: Option<i32>,
}

impl CreateTask {
    pub fn from_title_description(
        project_id: impl Into<String>,
        title: impl Into<String>,
        description: Option<String>,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            title: title.into(),
            description,
            status: Some(TaskStatus::Todo),
            priority: None,
            assignee: None,
            due_date: None,
            sequence: None,
        }
    }
}

impl Payload for CreateTask {
    fn validate(&self) -> Result<(), ValidationError> {
        require_non_blank("project_id", &self.project_id)?;
        require_non_blank("title", &self.title)?;
        validate_sequence(self.sequence)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, TS)]
pub struct UpdateTask {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<TaskPriority>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sequence: Option<i32>,
    /// `Some(None)` clears the stage timer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage_started_at: Option<Option<DateTime<Utc>>>,
}

impl UpdateTask {
    /// Move a card to another board column.
    ///
    /// Entering InProgress or InReview starts the stage timer, any other
    /// column clears it.
    pub fn move_to(status: TaskStatus, now: DateTime<Utc>) -> Self {
        let stage_started_at = status.is_staged().then_some(now);
        Self {
            status: Some(status),
            stage_started_at: Some(stage_started_at),
            ..Default::default()
        }
    }

    /// Move a card and place it at `sequence` in the target column.
    pub fn move_to_position(status: TaskStatus, sequence: i32, now: DateTime<Utc>) -> Self {
        Self {
            sequence: Some(sequence),
            ..Self::move_to(status, now)
        }
    }

    fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.status.is_none()
            && self.priority.is_none()
            && self.assignee.is_none()
            && self.sequence.is_none()
            && self.stage_started_at.is_none()
    }
}

impl Payload for UpdateTask {
    fn validate(&self) -> Result<(), ValidationError> {
        if self.is_empty() {
            return Err(ValidationError::EmptyUpdate);
        }
        if let Some(title) = &self.title {
            require_non_blank("title", title)?;
        }
        validate_sequence(self.sequence)
    }
}

fn validate_sequence(sequence: Option<i32>) -> Result<(), ValidationError> {
    match sequence {
        Some(seq) if seq < 0 => Err(ValidationError::InvalidField {
            field: "sequence",
            message: format!("must not be negative, got {seq}"),
        }),
        _ => Ok(()),
    }
}
