use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};
use ts_rs::TS;

use super::record::{Payload, Record, ValidationError, require_non_blank};

#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, TS, EnumString, Display, Default,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ProjectStatus {
    #[default]
    Planning,
    Active,
    OnHold,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
pub struct Project {
    pub id: String,
    pub name: String,
    pub client: Option<String>,
    #[serde(default)]
    pub status: ProjectStatus,
    pub budget_cents: Option<i64>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub updated_at: Option<DateTime<Utc>>,
    pub revision: Option<i64>,
}

impl Record for Project {
    const COLLECTION: &'static str = "projects";
    type Create = CreateProject;
    type Update = UpdateProject;

    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, TS)]
pub struct CreateProject {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<ProjectStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub budget_cents: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_date: Option<NaiveDate>,
}

impl Payload for CreateProject {
    fn validate(&self) -> Result<(), ValidationError> {
        require_non_blank("name", &self.name)?;
        validate_budget(self.budget_cents)?;
        validate_schedule(self.start_date, self.end_date)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, TS)]
pub struct UpdateProject {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<ProjectStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub budget_cents: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_date: Option<NaiveDate>,
}

impl Payload for UpdateProject {
    fn validate(&self) -> Result<(), ValidationError> {
        if self.name.is_none()
            && self.client.is_none()
            && self.status.is_none()
            && self.budget_cents.is_none()
            && self.start_date.is_none()
            && self.end_date.is_none()
        {
            return Err(ValidationError::EmptyUpdate);
        }
        if let Some(name) = &self.name {
            require_non_blank("name", name)?;
        }
        validate_budget(self.budget_cents)?;
        // Only checkable when both ends travel in the same update.
        validate_schedule(self.start_date, self.end_date)
    }
}

fn validate_budget(budget_cents: Option<i64>) -> Result<(), ValidationError> {
    match budget_cents {
        Some(cents) if cents < 0 => Err(ValidationError::InvalidField {
            field: "budget_cents",
            message: format!("must not be negative, got {cents}"),
        }),
        _ => Ok(()),
    }
}

fn validate_schedule(
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
) -> Result<(), ValidationError> {
    match (start, end) {
        (Some(start), Some(end)) if end < start => Err(ValidationError::InvalidField {
            field: "end_date",
            message: format!("{end} is before start date {start}"),
        }),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create(name: &str) -> CreateProject {
        CreateProject {
            name: name.to_string(),
            client: Some("Harbor Builders".to_string()),
            status: None,
            budget_cents: Some(12_500_000),
            start_date: NaiveDate::from_ymd_opt(2024, 2, 1),
            end_date: NaiveDate::from_ymd_opt(2024, 11, 30),
        }
    }

    #[test]
    fn test_create_project_valid() {
        assert!(create("Pier 9 retrofit").validate().is_ok());
    }

    #[test]
    fn test_create_project_rejects_inverted_schedule() {
        let mut payload = create("Pier 9 retrofit");
        payload.end_date = NaiveDate::from_ymd_opt(2024, 1, 1);
        assert!(matches!(
            payload.validate(),
            Err(ValidationError::InvalidField { field: "end_date", .. })
        ));
    }

    #[test]
    fn test_update_project_rejects_negative_budget() {
        let update = UpdateProject {
            budget_cents: Some(-1),
            ..Default::default()
        };
        assert!(matches!(
            update.validate(),
            Err(ValidationError::InvalidField { field: "budget_cents", .. })
        ));
    }

    #[test]
    fn test_project_status_round_trips_through_strum() {
        assert_eq!(ProjectStatus::OnHold.to_string(), "on_hold");
        assert_eq!("on_hold".parse::<ProjectStatus>().unwrap(), ProjectStatus::OnHold);
    }
}
