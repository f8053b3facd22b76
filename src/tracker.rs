use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::error::{Result, SyncError};
use crate::models::{now_timestamp, timestamp, Application, ApplicationStatus, TrackedApplication};
use crate::store::{object, Filter, Query, RemoteStore, Row, APPLICATIONS, JOBS};

/// Per-(user, job) application lifecycle. A missing row is the untracked
/// state; every status write goes through `set_status`.
pub struct ApplicationTracker {
    store: Arc<dyn RemoteStore>,
}

fn decode<T: serde::de::DeserializeOwned>(row: Row) -> Result<T> {
    serde_json::from_value(Value::Object(row)).map_err(|e| SyncError::BackendUnavailable {
        code: "PARSE".to_string(),
        message: e.to_string(),
    })
}

/// Blank notes are stored as null.
pub fn normalize_notes(text: &str) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

impl ApplicationTracker {
    pub fn new(store: Arc<dyn RemoteStore>) -> Self {
        Self { store }
    }

    /// The user's application for a job; no row is `None`, not an error.
    pub async fn status_for(&self, user_id: &str, job_id: &str) -> Result<Option<Application>> {
        let query = Query::from(APPLICATIONS)
            .eq("user_id", user_id)
            .eq("job_id", job_id);
        match self.store.select_one(query).await {
            Ok(row) => Ok(Some(decode(row)?)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Starts tracking a listed job as saved or applied.
    pub async fn track(
        &self,
        user_id: &str,
        job_id: &str,
        initial: ApplicationStatus,
    ) -> Result<Application> {
        if !matches!(initial, ApplicationStatus::Saved | ApplicationStatus::Applied) {
            return Err(SyncError::ValidationFailure(format!(
                "a job can only start as saved or applied, not {}",
                initial
            )));
        }
        self.insert(user_id, job_id, initial).await
    }

    /// Inserts the row after a precondition lookup. The lookup is not
    /// race-free; the store's unique index is the backstop where present.
    pub(crate) async fn insert(
        &self,
        user_id: &str,
        job_id: &str,
        status: ApplicationStatus,
    ) -> Result<Application> {
        if self.status_for(user_id, job_id).await?.is_some() {
            return Err(SyncError::AlreadyTracked {
                job_id: job_id.to_string(),
            });
        }

        let now = now_timestamp();
        let applied_date = (status == ApplicationStatus::Applied).then(|| now.clone());
        let row = object(json!({
            "user_id": user_id,
            "job_id": job_id,
            "status": status.as_str(),
            "applied_date": applied_date,
            "updated_at": now,
        }));

        match self.store.insert_one(APPLICATIONS, row).await {
            Ok(row) => {
                log::info!("user {} now tracking job {} as {}", user_id, job_id, status);
                decode(row)
            }
            Err(e) if e.is_unique_violation() => Err(SyncError::AlreadyTracked {
                job_id: job_id.to_string(),
            }),
            Err(e) => {
                log::warn!("failed to track job {}: {}", job_id, e);
                Err(e.into())
            }
        }
    }

    async fn patch(&self, application_id: &str, mut patch: Row) -> Result<DateTime<Utc>> {
        let now = Utc::now();
        patch.insert("updated_at".to_string(), Value::String(timestamp(now)));
        self.store
            .update(APPLICATIONS, patch, &[Filter::eq("id", application_id)])
            .await
            .map_err(|e| {
                log::warn!("failed to update application {}: {}", application_id, e);
                SyncError::from(e)
            })?;
        Ok(now)
    }

    /// Any tracked status may follow any other. `applied_date` is only ever
    /// set at creation. Returns the new `updated_at`.
    pub async fn set_status(
        &self,
        application_id: &str,
        status: ApplicationStatus,
    ) -> Result<DateTime<Utc>> {
        self.patch(application_id, object(json!({ "status": status.as_str() })))
            .await
    }

    pub async fn set_notes(&self, application_id: &str, text: &str) -> Result<DateTime<Utc>> {
        let notes = normalize_notes(text);
        self.patch(application_id, object(json!({ "notes": notes })))
            .await
    }

    pub async fn set_interview_date(
        &self,
        application_id: &str,
        at: Option<DateTime<Utc>>,
    ) -> Result<DateTime<Utc>> {
        let at = at.map(timestamp);
        self.patch(application_id, object(json!({ "interview_date": at })))
            .await
    }

    pub async fn delete(&self, application_id: &str) -> Result<()> {
        self.store
            .delete(APPLICATIONS, &[Filter::eq("id", application_id)])
            .await
            .map_err(|e| {
                log::warn!("failed to delete application {}: {}", application_id, e);
                SyncError::from(e)
            })
    }

    /// Most recently touched first. Rows whose job is gone come back with
    /// `job: None`; rows that cannot be decoded at all are skipped.
    pub async fn list_for_user(&self, user_id: &str) -> Result<Vec<TrackedApplication>> {
        let rows = self
            .store
            .select(
                Query::from(APPLICATIONS)
                    .eq("user_id", user_id)
                    .order_by("updated_at", false)
                    .embed(JOBS, "job_id"),
            )
            .await?;

        let mut tracked: Vec<TrackedApplication> = rows
            .into_iter()
            .filter_map(|row| match decode::<TrackedApplication>(row) {
                Ok(app) => Some(app),
                Err(e) => {
                    log::warn!("skipping unreadable application row: {}", e);
                    None
                }
            })
            .collect();
        tracked.sort_by(|a, b| b.application.updated_at.cmp(&a.application.updated_at));
        Ok(tracked)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub total: usize,
    counts: [usize; 5],
}

impl PipelineStats {
    pub fn count(&self, status: ApplicationStatus) -> usize {
        self.counts[status as usize]
    }
}

pub fn pipeline_stats(apps: &[TrackedApplication]) -> PipelineStats {
    let mut stats = PipelineStats {
        total: apps.len(),
        ..Default::default()
    };
    for app in apps {
        stats.counts[app.application.status as usize] += 1;
    }
    stats
}

pub fn filter_by_status(
    apps: &[TrackedApplication],
    status: Option<ApplicationStatus>,
) -> Vec<&TrackedApplication> {
    apps.iter()
        .filter(|app| status.is_none_or(|s| app.application.status == s))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SqliteStore;
    use crate::models::UNKNOWN_POSITION;
    use crate::store::testing::FlakyStore;

    async fn seed_job(store: &dyn RemoteStore, title: &str) -> String {
        let row = store
            .insert_one(JOBS, object(json!({ "title": title, "company": "Acme" })))
            .await
            .unwrap();
        row["id"].as_str().unwrap().to_string()
    }

    fn tracker_with_flaky() -> (Arc<FlakyStore>, ApplicationTracker) {
        let flaky = Arc::new(FlakyStore::new(Arc::new(SqliteStore::open_in_memory())));
        let tracker = ApplicationTracker::new(flaky.clone());
        (flaky, tracker)
    }

    #[tokio::test]
    async fn test_track_applied_sets_applied_date_then_rejects_duplicate() {
        let (store, tracker) = tracker_with_flaky();
        let job = seed_job(store.as_ref(), "Backend Co-op").await;

        let app = tracker.track("u1", &job, ApplicationStatus::Applied).await.unwrap();
        assert_eq!(app.user_id, "u1");
        assert_eq!(app.job_id, job);
        assert_eq!(app.status, ApplicationStatus::Applied);
        assert!(app.applied_date.is_some());

        let err = tracker.track("u1", &job, ApplicationStatus::Saved).await.unwrap_err();
        assert!(matches!(err, SyncError::AlreadyTracked { .. }));
    }

    #[tokio::test]
    async fn test_track_saved_has_no_applied_date() {
        let (store, tracker) = tracker_with_flaky();
        let job = seed_job(store.as_ref(), "QA Co-op").await;
        let app = tracker.track("u1", &job, ApplicationStatus::Saved).await.unwrap();
        assert!(app.applied_date.is_none());
    }

    #[tokio::test]
    async fn test_track_rejects_later_pipeline_states() {
        let (_, tracker) = tracker_with_flaky();
        let err = tracker.track("u1", "j1", ApplicationStatus::Offer).await.unwrap_err();
        assert!(matches!(err, SyncError::ValidationFailure(_)));
    }

    #[tokio::test]
    async fn test_set_status_is_permissive_and_never_backfills_applied_date() {
        let (store, tracker) = tracker_with_flaky();
        let job = seed_job(store.as_ref(), "Firmware Co-op").await;
        let app = tracker.track("u1", &job, ApplicationStatus::Saved).await.unwrap();

        tracker.set_status(&app.id, ApplicationStatus::Rejected).await.unwrap();
        tracker.set_status(&app.id, ApplicationStatus::Offer).await.unwrap();
        tracker.set_status(&app.id, ApplicationStatus::Applied).await.unwrap();

        let stored = tracker.status_for("u1", &job).await.unwrap().unwrap();
        assert_eq!(stored.status, ApplicationStatus::Applied);
        assert!(stored.applied_date.is_none());
    }

    #[tokio::test]
    async fn test_set_status_twice_is_idempotent() {
        let (store, tracker) = tracker_with_flaky();
        let job = seed_job(store.as_ref(), "ML Co-op").await;
        let app = tracker.track("u1", &job, ApplicationStatus::Applied).await.unwrap();

        let first = tracker.set_status(&app.id, ApplicationStatus::Interview).await.unwrap();
        let second = tracker.set_status(&app.id, ApplicationStatus::Interview).await.unwrap();
        assert!(second >= first);

        let listed = tracker.list_for_user("u1").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].application.status, ApplicationStatus::Interview);
        assert_eq!(
            timestamp(listed[0].application.updated_at),
            timestamp(second)
        );
    }

    #[tokio::test]
    async fn test_notes_are_trimmed_and_blank_is_null() {
        let (store, tracker) = tracker_with_flaky();
        let job = seed_job(store.as_ref(), "Design Co-op").await;
        let app = tracker.track("u1", &job, ApplicationStatus::Saved).await.unwrap();

        tracker.set_notes(&app.id, "  ask about housing  ").await.unwrap();
        let stored = tracker.status_for("u1", &job).await.unwrap().unwrap();
        assert_eq!(stored.notes.as_deref(), Some("ask about housing"));

        tracker.set_notes(&app.id, "   ").await.unwrap();
        let stored = tracker.status_for("u1", &job).await.unwrap().unwrap();
        assert_eq!(stored.notes, None);
    }

    #[tokio::test]
    async fn test_interview_date_round_trips() {
        let (store, tracker) = tracker_with_flaky();
        let job = seed_job(store.as_ref(), "Ops Co-op").await;
        let app = tracker.track("u1", &job, ApplicationStatus::Applied).await.unwrap();
        let at: DateTime<Utc> = "2025-03-04T15:30:00Z".parse().unwrap();

        tracker.set_interview_date(&app.id, Some(at)).await.unwrap();
        let stored = tracker.status_for("u1", &job).await.unwrap().unwrap();
        assert_eq!(stored.interview_date, Some(at));

        tracker.set_interview_date(&app.id, None).await.unwrap();
        let stored = tracker.status_for("u1", &job).await.unwrap().unwrap();
        assert_eq!(stored.interview_date, None);
    }

    #[tokio::test]
    async fn test_list_orders_by_recent_update_and_tolerates_missing_job() {
        let (store, tracker) = tracker_with_flaky();
        let kept = seed_job(store.as_ref(), "Kept").await;
        let removed = seed_job(store.as_ref(), "Removed").await;

        let a = tracker.track("u1", &kept, ApplicationStatus::Saved).await.unwrap();
        tracker.track("u1", &removed, ApplicationStatus::Saved).await.unwrap();
        store.delete(JOBS, &[Filter::eq("id", removed.clone())]).await.unwrap();
        tracker.set_status(&a.id, ApplicationStatus::Applied).await.unwrap();

        let listed = tracker.list_for_user("u1").await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].title(), "Kept");
        assert_eq!(listed[1].title(), UNKNOWN_POSITION);
        assert_eq!(listed[1].application.job_id, removed);
    }

    #[tokio::test]
    async fn test_status_for_untracked_is_none() {
        let (_, tracker) = tracker_with_flaky();
        assert!(tracker.status_for("u1", "j1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_write_failures_surface_as_backend_unavailable() {
        let (store, tracker) = tracker_with_flaky();
        let job = seed_job(store.as_ref(), "Infra Co-op").await;
        let app = tracker.track("u1", &job, ApplicationStatus::Saved).await.unwrap();

        store.fail_writes(true);
        let err = tracker.set_status(&app.id, ApplicationStatus::Offer).await.unwrap_err();
        assert!(matches!(err, SyncError::BackendUnavailable { .. }));
        assert!(tracker.delete(&app.id).await.is_err());

        store.fail_writes(false);
        let stored = tracker.status_for("u1", &job).await.unwrap().unwrap();
        assert_eq!(stored.status, ApplicationStatus::Saved);
    }

    #[test]
    fn test_pipeline_stats_and_filter() {
        let make = |id: &str, status: &str| -> TrackedApplication {
            serde_json::from_value(json!({
                "id": id, "user_id": "u1", "job_id": id, "status": status,
                "updated_at": "2025-01-01T00:00:00Z"
            }))
            .unwrap()
        };
        let apps = vec![
            make("1", "applied"),
            make("2", "applied"),
            make("3", "interview"),
            make("4", "offer"),
        ];
        let stats = pipeline_stats(&apps);
        assert_eq!(stats.total, 4);
        assert_eq!(stats.count(ApplicationStatus::Applied), 2);
        assert_eq!(stats.count(ApplicationStatus::Rejected), 0);

        assert_eq!(filter_by_status(&apps, Some(ApplicationStatus::Applied)).len(), 2);
        assert_eq!(filter_by_status(&apps, None).len(), 4);
    }
}
