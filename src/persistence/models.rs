//! Persisted entities: status pages and their incidents.
//!
//! These are plain value objects produced by the scraper and handed to
//! [`crate::persistence::StoreClient`]. Field order matches the column order of
//! the corresponding [`crate::persistence::schema::TableDef`].

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{FromRow, Row};

/// A monitored status page, keyed by its URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusPage {
    /// Human-readable provider name.
    pub name: String,
    /// Page URL. Unique across the table.
    pub url: String,
    /// Whether the page's incident history has been fully indexed.
    pub is_indexed: bool,
    /// Last time the historical incident archive was scraped.
    pub last_historically_scraped: DateTime<Utc>,
    /// Last time the current status was scraped.
    pub last_currently_scraped: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for StatusPage {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            name: row.try_get("name")?,
            url: row.try_get("url")?,
            is_indexed: row.try_get("is_indexed")?,
            last_historically_scraped: row.try_get("last_historically_scraped")?,
            last_currently_scraped: row.try_get("last_currently_scraped")?,
        })
    }
}

/// Severity reported for an incident.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Impact {
    /// No user-visible impact.
    #[default]
    None,
    /// Degraded performance or partial outage.
    Minor,
    /// Significant outage.
    Major,
    /// Full outage.
    Critical,
    /// Planned maintenance.
    Maintenance,
}

impl Impact {
    /// Returns the lowercase text stored in the `impact` column.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Minor => "minor",
            Self::Major => "major",
            Self::Critical => "critical",
            Self::Maintenance => "maintenance",
        }
    }
}

impl fmt::Display for Impact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a stored impact string is not a known [`Impact`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown incident impact: {0:?}")]
pub struct UnknownImpact(pub String);

impl FromStr for Impact {
    type Err = UnknownImpact;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Self::None),
            "minor" => Ok(Self::Minor),
            "major" => Ok(Self::Major),
            "critical" => Ok(Self::Critical),
            "maintenance" => Ok(Self::Maintenance),
            other => Err(UnknownImpact(other.to_string())),
        }
    }
}

/// One timestamped update within an incident's timeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncidentEvent {
    /// Update heading (e.g. `"Investigating"`).
    pub title: String,
    /// Update body.
    pub description: String,
    /// When the update was posted.
    pub time: DateTime<Utc>,
}

/// A reported outage or degradation belonging to one status page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Incident {
    /// Incident headline.
    pub title: String,
    /// Names of the affected components.
    pub components: Vec<String>,
    /// Timeline of updates.
    pub events: Vec<IncidentEvent>,
    /// When the incident began.
    pub start_time: DateTime<Utc>,
    /// When the incident was resolved; `None` while ongoing.
    pub end_time: Option<DateTime<Utc>>,
    /// Optional long-form description.
    pub description: Option<String>,
    /// Stable link to the incident. Unique across the table.
    pub deep_link: String,
    /// Reported severity.
    pub impact: Impact,
    /// URL of the owning [`StatusPage`].
    pub status_page_url: String,
}

impl<'r> FromRow<'r, PgRow> for Incident {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let Json(components) = row.try_get::<Json<Vec<String>>, _>("components")?;
        let Json(events) = row.try_get::<Json<Vec<IncidentEvent>>, _>("events")?;
        let impact_text: String = row.try_get("impact")?;
        let impact = impact_text
            .parse::<Impact>()
            .map_err(|e| sqlx::Error::ColumnDecode {
                index: "impact".to_string(),
                source: Box::new(e),
            })?;

        Ok(Self {
            title: row.try_get("title")?,
            components,
            events,
            start_time: row.try_get("start_time")?,
            end_time: row.try_get("end_time")?,
            description: row.try_get("description")?,
            deep_link: row.try_get("deep_link")?,
            impact,
            status_page_url: row.try_get("status_page_url")?,
        })
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn impact_text_round_trips() {
        for impact in [
            Impact::None,
            Impact::Minor,
            Impact::Major,
            Impact::Critical,
            Impact::Maintenance,
        ] {
            assert_eq!(impact.as_str().parse::<Impact>(), Ok(impact));
        }
    }

    #[test]
    fn unknown_impact_is_rejected() {
        let result = "catastrophic".parse::<Impact>();
        assert_eq!(result, Err(UnknownImpact("catastrophic".to_string())));
    }

    #[test]
    fn impact_serializes_lowercase() {
        let json = serde_json::to_string(&Impact::Maintenance).ok();
        assert_eq!(json.as_deref(), Some("\"maintenance\""));
    }

    #[test]
    fn incident_event_json_shape() {
        let Some(time) = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).single() else {
            panic!("valid timestamp");
        };
        let event = IncidentEvent {
            title: "Resolved".to_string(),
            description: "Error rates are back to normal.".to_string(),
            time,
        };
        let Ok(value) = serde_json::to_value(&event) else {
            panic!("serialization failed");
        };
        assert_eq!(value["title"], "Resolved");
        assert_eq!(value["time"], "2024-03-01T12:30:00Z");
    }
}
