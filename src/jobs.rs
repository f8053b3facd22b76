use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{Result, SyncError};
use crate::models::{now_timestamp, Application, ApplicationStatus, Job, NewJob};
use crate::store::{object, Filter, Query, RemoteStore, Row, JOBS};
use crate::tracker::ApplicationTracker;

const IMPORT_BATCH: usize = 500;

/// Raw input for a custom job, straight from the form or the command line.
#[derive(Debug, Clone, Default)]
pub struct JobForm {
    pub title: String,
    pub company: String,
    pub location: String,
    pub deadline: String,
    pub compensation: String,
    pub targeted_major: String,
    pub minimum_gpa: String,
    pub description: String,
    pub job_link: String,
}

fn or_default(value: &str, default: &str) -> String {
    let value = value.trim();
    if value.is_empty() {
        default.to_string()
    } else {
        value.to_string()
    }
}

fn optional(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

impl JobForm {
    /// Checks the form and fills in defaults. `profile_major` is the
    /// fallback for an empty targeted major.
    pub fn validate(&self, profile_major: Option<&str>) -> Result<NewJob> {
        if self.title.trim().is_empty() {
            return Err(SyncError::ValidationFailure("title is required".to_string()));
        }
        if self.company.trim().is_empty() {
            return Err(SyncError::ValidationFailure("company is required".to_string()));
        }

        let minimum_gpa = or_default(&self.minimum_gpa, "0.0");
        match minimum_gpa.parse::<f64>() {
            Ok(gpa) if (0.0..=5.0).contains(&gpa) => {}
            _ => {
                return Err(SyncError::ValidationFailure(format!(
                    "minimum GPA must be a number between 0 and 5, got '{}'",
                    minimum_gpa
                )));
            }
        }

        let deadline = optional(&self.deadline);
        if let Some(d) = &deadline {
            NaiveDate::parse_from_str(d, "%Y-%m-%d").map_err(|_| {
                SyncError::ValidationFailure(format!("deadline '{}' is not YYYY-MM-DD", d))
            })?;
        }

        let job_link = optional(&self.job_link);
        if let Some(link) = &job_link {
            if !(link.starts_with("http://") || link.starts_with("https://")) {
                return Err(SyncError::ValidationFailure(format!(
                    "job link '{}' must start with http:// or https://",
                    link
                )));
            }
        }

        let major_fallback = profile_major
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .unwrap_or("Any");

        Ok(NewJob {
            title: self.title.trim().to_string(),
            company: self.company.trim().to_string(),
            location: self.location.trim().to_string(),
            deadline,
            compensation: or_default(&self.compensation, "Not specified"),
            targeted_major: or_default(&self.targeted_major, major_fallback),
            minimum_gpa,
            description: or_default(&self.description, "No description provided"),
            job_link,
        })
    }
}

/// Scraped numbers (GPA, compensation) arrive as either text or numbers.
fn loose_string<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s),
        Some(other) => Some(other.to_string()),
    })
}

/// One record of a scraped listing file. Unknown keys are ignored; every
/// record serializes to the same column set so a batch stays uniform.
#[derive(Debug, Deserialize, Serialize)]
struct ImportedJob {
    #[serde(default, deserialize_with = "loose_string")]
    title: Option<String>,
    #[serde(default, deserialize_with = "loose_string")]
    company: Option<String>,
    #[serde(default, deserialize_with = "loose_string")]
    location: Option<String>,
    #[serde(default, deserialize_with = "loose_string")]
    deadline: Option<String>,
    #[serde(default, deserialize_with = "loose_string")]
    compensation: Option<String>,
    #[serde(default, alias = "targeted major", deserialize_with = "loose_string")]
    targeted_major: Option<String>,
    #[serde(
        default,
        rename = "minimum_GPA",
        alias = "minimum GPA",
        alias = "minimum_gpa",
        deserialize_with = "loose_string"
    )]
    minimum_gpa: Option<String>,
    #[serde(default, deserialize_with = "loose_string")]
    description: Option<String>,
    #[serde(default, alias = "link", alias = "url", deserialize_with = "loose_string")]
    job_link: Option<String>,
    #[serde(default, alias = "scraped_at", deserialize_with = "loose_string")]
    posted_date: Option<String>,
}

pub struct JobCatalog {
    store: Arc<dyn RemoteStore>,
}

impl JobCatalog {
    pub fn new(store: Arc<dyn RemoteStore>) -> Self {
        Self { store }
    }

    fn decode(row: Row) -> Result<Job> {
        serde_json::from_value(Value::Object(row)).map_err(|e| SyncError::BackendUnavailable {
            code: "PARSE".to_string(),
            message: e.to_string(),
        })
    }

    /// Active listings, newest posting first.
    pub async fn list_active(&self) -> Result<Vec<Job>> {
        let rows = self
            .store
            .select(
                Query::from(JOBS)
                    .eq("status", "active")
                    .order_by("posted_date", false),
            )
            .await?;
        rows.into_iter().map(Self::decode).collect()
    }

    pub async fn get_job(&self, id: &str) -> Result<Option<Job>> {
        match self.store.select_one(Query::from(JOBS).eq("id", id)).await {
            Ok(row) => Ok(Some(Self::decode(row)?)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Jobs in the order of `ids`; ids with no job are skipped.
    pub async fn jobs_by_ids<S: AsRef<str>>(&self, ids: &[S]) -> Result<Vec<Job>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = self
            .store
            .select(Query::from(JOBS).filter(Filter::in_list(
                "id",
                ids.iter().map(|id| id.as_ref().to_string()),
            )))
            .await?;

        let mut by_id: HashMap<String, Job> = rows
            .into_iter()
            .map(Self::decode)
            .map(|job| job.map(|job| (job.id.clone(), job)))
            .collect::<Result<_>>()?;
        Ok(ids
            .iter()
            .filter_map(|id| by_id.remove(id.as_ref()))
            .collect())
    }

    /// Creates a job the user found elsewhere and tracks it in one go. Any
    /// status is allowed here since it records an existing application.
    /// If tracking fails the job row stays behind.
    pub async fn add_custom_job(
        &self,
        tracker: &ApplicationTracker,
        user_id: &str,
        form: &JobForm,
        profile_major: Option<&str>,
        status: ApplicationStatus,
    ) -> Result<(Job, Application)> {
        let new_job = form.validate(profile_major)?;
        let row = serde_json::to_value(&new_job)
            .map(object)
            .map_err(|e| SyncError::ValidationFailure(e.to_string()))?;

        let job = Self::decode(self.store.insert_one(JOBS, row).await.map_err(|e| {
            log::warn!("failed to create custom job '{}': {}", new_job.title, e);
            SyncError::from(e)
        })?)?;

        match tracker.insert(user_id, &job.id, status).await {
            Ok(application) => Ok((job, application)),
            Err(e) => {
                log::warn!("custom job {} was created but could not be tracked: {}", job.id, e);
                Err(e)
            }
        }
    }

    /// Bulk-inserts scraped listings given as a JSON array. Records without
    /// a title are skipped. Returns how many jobs were written.
    pub async fn import(&self, records: Vec<Value>) -> Result<usize> {
        let mut rows = Vec::with_capacity(records.len());
        for (i, record) in records.into_iter().enumerate() {
            let job: ImportedJob = match serde_json::from_value(record) {
                Ok(job) => job,
                Err(e) => {
                    log::warn!("skipping record {}: {}", i, e);
                    continue;
                }
            };
            if job.title.as_deref().is_none_or(|t| t.trim().is_empty()) {
                log::warn!("skipping record {}: no title", i);
                continue;
            }
            let mut row = serde_json::to_value(&job)
                .map(object)
                .map_err(|e| SyncError::ValidationFailure(e.to_string()))?;
            if job.posted_date.is_none() {
                row.insert("posted_date".to_string(), Value::String(now_timestamp()));
            }
            row.insert("status".to_string(), Value::String("active".to_string()));
            rows.push(row);
        }

        let mut written = 0;
        for batch in rows.chunks(IMPORT_BATCH) {
            written += self.store.insert(JOBS, batch.to_vec()).await?.len();
            log::debug!("imported {} job(s) so far", written);
        }
        log::info!("imported {} job(s)", written);
        Ok(written)
    }
}
