//! In-memory application list the views render from.
//!
//! Status changes are shown before the backend confirms them and rolled back
//! if it refuses. Removals, notes and interview dates only land once the
//! backend has accepted them.

use chrono::{DateTime, Utc};

use crate::error::{Result, SyncError};
use crate::models::{Application, ApplicationStatus, Job, TrackedApplication};
use crate::optimistic::Optimistic;
use crate::tracker::{
    filter_by_status, normalize_notes, pipeline_stats, ApplicationTracker, PipelineStats,
};

#[derive(Default)]
pub struct ApplicationBoard {
    items: Vec<TrackedApplication>,
    gate: Optimistic,
}

fn key(application_id: &str) -> String {
    format!("application:{}", application_id)
}

impl ApplicationBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, application_id: &str) -> Option<&TrackedApplication> {
        self.items.iter().find(|a| a.application.id == application_id)
    }

    pub fn find_by_job(&self, job_id: &str) -> Option<&TrackedApplication> {
        self.items.iter().find(|a| a.application.job_id == job_id)
    }

    pub fn stats(&self) -> PipelineStats {
        pipeline_stats(&self.items)
    }

    pub fn filtered(&self, status: Option<ApplicationStatus>) -> Vec<&TrackedApplication> {
        filter_by_status(&self.items, status)
    }

    /// Replaces the list with the backend's. On failure the previous list is
    /// kept as is.
    pub async fn reload(&mut self, tracker: &ApplicationTracker, user_id: &str) -> Result<()> {
        match tracker.list_for_user(user_id).await {
            Ok(items) => {
                self.items = items;
                Ok(())
            }
            Err(e) => {
                log::warn!("keeping {} cached application(s): {}", self.items.len(), e);
                Err(e)
            }
        }
    }

    fn position(&self, application_id: &str) -> Result<usize> {
        self.items
            .iter()
            .position(|a| a.application.id == application_id)
            .ok_or_else(|| SyncError::NotFound(format!("application {}", application_id)))
    }

    fn resort(&mut self) {
        self.items
            .sort_by(|a, b| b.application.updated_at.cmp(&a.application.updated_at));
    }

    fn touch(&mut self, application_id: &str, at: DateTime<Utc>) {
        if let Some(item) = self
            .items
            .iter_mut()
            .find(|a| a.application.id == application_id)
        {
            item.application.updated_at = at;
        }
        self.resort();
    }

    pub async fn change_status(
        &mut self,
        tracker: &ApplicationTracker,
        application_id: &str,
        status: ApplicationStatus,
    ) -> Result<()> {
        let idx = self.position(application_id)?;
        let previous = self.items[idx].application.status;
        let stamp = self
            .gate
            .apply(
                &key(application_id),
                &mut self.items,
                |items: &mut Vec<TrackedApplication>| items[idx].application.status = status,
                || tracker.set_status(application_id, status),
                |items: &mut Vec<TrackedApplication>| items[idx].application.status = previous,
            )
            .await?;
        self.touch(application_id, stamp);
        Ok(())
    }

    pub async fn remove(&mut self, tracker: &ApplicationTracker, application_id: &str) -> Result<()> {
        self.position(application_id)?;
        self.gate
            .confirm(
                &key(application_id),
                &mut self.items,
                || tracker.delete(application_id),
                |items: &mut Vec<TrackedApplication>, _: &()| {
                    items.retain(|a| a.application.id != application_id)
                },
            )
            .await
    }

    pub async fn edit_notes(
        &mut self,
        tracker: &ApplicationTracker,
        application_id: &str,
        text: &str,
    ) -> Result<()> {
        let idx = self.position(application_id)?;
        let stamp = self
            .gate
            .confirm(
                &key(application_id),
                &mut self.items,
                || tracker.set_notes(application_id, text),
                |items: &mut Vec<TrackedApplication>, _: &DateTime<Utc>| {
                    items[idx].application.notes = normalize_notes(text)
                },
            )
            .await?;
        self.touch(application_id, stamp);
        Ok(())
    }

    pub async fn set_interview(
        &mut self,
        tracker: &ApplicationTracker,
        application_id: &str,
        at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let idx = self.position(application_id)?;
        let stamp = self
            .gate
            .confirm(
                &key(application_id),
                &mut self.items,
                || tracker.set_interview_date(application_id, at),
                |items: &mut Vec<TrackedApplication>, _: &DateTime<Utc>| {
                    items[idx].application.interview_date = at
                },
            )
            .await?;
        self.touch(application_id, stamp);
        Ok(())
    }

    /// Tracks `job` and puts it at the top of the list.
    pub async fn track(
        &mut self,
        tracker: &ApplicationTracker,
        user_id: &str,
        job: Job,
        initial: ApplicationStatus,
    ) -> Result<()> {
        self.gate
            .confirm(
                &format!("track:{}", job.id),
                &mut self.items,
                || tracker.track(user_id, &job.id, initial),
                |items: &mut Vec<TrackedApplication>, application: &Application| {
                    items.insert(
                        0,
                        TrackedApplication {
                            application: application.clone(),
                            job: Some(job.clone()),
                        },
                    )
                },
            )
            .await?;
        Ok(())
    }
}
