use chrono::{DateTime, SecondsFormat, Utc};
use uuid::Uuid;

/// Fresh client-side id for an entity that does not exist remotely yet.
pub fn new_entity_id() -> String {
    Uuid::new_v4().to_string()
}

/// RFC 3339 timestamp with millisecond precision, as stored in the database.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}
