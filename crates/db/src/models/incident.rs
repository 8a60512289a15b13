use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};
use ts_rs::TS;

use super::record::{Payload, Record, ValidationError, require_non_blank};

/// OSHA-style classification of a safety incident.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, TS, EnumString, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum IncidentSeverity {
    NearMiss,
    FirstAid,
    Recordable,
    LostTime,
}

#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, TS, EnumString, Display, Default,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum IncidentStatus {
    #[default]
    Open,
    Investigating,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
pub struct Incident {
    pub id: String,
    pub project_id: String,
    pub title: String,
    pub severity: IncidentSeverity,
    #[serde(default)]
    pub status: IncidentStatus,
    pub occurred_on: NaiveDate,
    pub description: Option<String>,
    pub reported_by: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
    pub revision: Option<i64>,
}

impl Record for Incident {
    const COLLECTION: &'static str = "incidents";
    type Create = CreateIncident;
    type Update = UpdateIncident;

    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct CreateIncident {
    pub project_id: String,
    pub title: String,
    pub severity: IncidentSeverity,
    pub occurred_on: NaiveDate,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reported_by: Option<String>,
}

impl Payload for CreateIncident {
    fn validate(&self) -> Result<(), ValidationError> {
        require_non_blank("project_id", &self.project_id)?;
        require_non_blank("title", &self.title)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, TS)]
pub struct UpdateIncident {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub severity: Option<IncidentSeverity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<IncidentStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Payload for UpdateIncident {
    fn validate(&self) -> Result<(), ValidationError> {
        if self.title.is_none()
            && self.severity.is_none()
            && self.status.is_none()
            && self.description.is_none()
        {
            return Err(ValidationError::EmptyUpdate);
        }
        if let Some(title) = &self.title {
            require_non_blank("title", title)?;
        }
        Ok(())
    }
}
