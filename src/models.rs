use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::SyncError;

/// Placeholders shown when an application's job row is gone.
pub const UNKNOWN_POSITION: &str = "Unknown Position";
pub const UNKNOWN_COMPANY: &str = "Unknown Company";
pub const NOT_AVAILABLE: &str = "N/A";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    #[serde(deserialize_with = "id_string")]
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub deadline: Option<String>,
    #[serde(default)]
    pub compensation: Option<String>,
    #[serde(default, alias = "targeted major")]
    pub targeted_major: Option<String>,
    #[serde(default, rename = "minimum_GPA", alias = "minimum GPA")]
    pub minimum_gpa: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub job_link: Option<String>,
    #[serde(default)]
    pub status: Option<String>, // "active", "closed"
    #[serde(default)]
    pub posted_date: Option<String>,
}

/// A job as submitted by a user adding an external posting.
#[derive(Debug, Clone, Default, Serialize)]
pub struct NewJob {
    pub title: String,
    pub company: String,
    pub location: String,
    pub deadline: Option<String>,
    pub compensation: String,
    pub targeted_major: String,
    #[serde(rename = "minimum_GPA")]
    pub minimum_gpa: String,
    pub description: String,
    pub job_link: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApplicationStatus {
    Saved,
    Applied,
    Interview,
    Offer,
    Rejected,
}

impl ApplicationStatus {
    pub const ALL: [ApplicationStatus; 5] = [
        ApplicationStatus::Saved,
        ApplicationStatus::Applied,
        ApplicationStatus::Interview,
        ApplicationStatus::Offer,
        ApplicationStatus::Rejected,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ApplicationStatus::Saved => "saved",
            ApplicationStatus::Applied => "applied",
            ApplicationStatus::Interview => "interview",
            ApplicationStatus::Offer => "offer",
            ApplicationStatus::Rejected => "rejected",
        }
    }
}

impl fmt::Display for ApplicationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for ApplicationStatus {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ApplicationStatus::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                SyncError::ValidationFailure(format!(
                    "unknown status '{}'. Expected one of: saved, applied, interview, offer, rejected",
                    s
                ))
            })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Application {
    #[serde(deserialize_with = "id_string")]
    pub id: String,
    #[serde(deserialize_with = "id_string")]
    pub user_id: String,
    #[serde(deserialize_with = "id_string")]
    pub job_id: String,
    pub status: ApplicationStatus,
    #[serde(default)]
    pub applied_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub interview_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub notes: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// An application row with its job joined under the `jobs` key.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TrackedApplication {
    #[serde(flatten)]
    pub application: Application,
    #[serde(rename = "jobs", default)]
    pub job: Option<Job>,
}

impl TrackedApplication {
    pub fn title(&self) -> &str {
        self.job.as_ref().map(|j| j.title.as_str()).unwrap_or(UNKNOWN_POSITION)
    }

    pub fn company(&self) -> &str {
        self.job
            .as_ref()
            .and_then(|j| j.company.as_deref())
            .unwrap_or(UNKNOWN_COMPANY)
    }

    pub fn location(&self) -> &str {
        self.job
            .as_ref()
            .and_then(|j| j.location.as_deref())
            .unwrap_or(NOT_AVAILABLE)
    }

    pub fn deadline(&self) -> &str {
        self.job
            .as_ref()
            .and_then(|j| j.deadline.as_deref())
            .unwrap_or(NOT_AVAILABLE)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    #[serde(deserialize_with = "id_string")]
    pub id: String,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(deserialize_with = "id_string")]
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub major: Option<String>,
    #[serde(default)]
    pub gpa: Option<f64>,
    #[serde(default)]
    pub graduation_year: Option<i64>,
}

/// Timestamps are written in one fixed RFC 3339 shape so that string
/// ordering in the store matches time ordering.
pub fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn now_timestamp() -> String {
    timestamp(Utc::now())
}

/// Accepts ids as strings or numbers; hosted tables use integer keys.
pub fn id_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Text(String),
        Int(i64),
    }

    Ok(match RawId::deserialize(deserializer)? {
        RawId::Text(s) => s,
        RawId::Int(n) => n.to_string(),
    })
}
