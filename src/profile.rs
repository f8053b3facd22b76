use serde_json::{json, Value};
use std::sync::Arc;

use crate::error::{Result, SyncError};
use crate::models::{now_timestamp, User, UserProfile};
use crate::store::{object, Query, RemoteStore, USERS};

/// Profile form fields as typed by the user.
#[derive(Debug, Clone, Default)]
pub struct ProfileForm {
    pub full_name: String,
    pub major: String,
    pub gpa: String,
    pub graduation_year: String,
}

fn blank_to_none(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

impl ProfileForm {
    pub fn from_profile(profile: &UserProfile) -> Self {
        Self {
            full_name: profile.full_name.clone().unwrap_or_default(),
            major: profile.major.clone().unwrap_or_default(),
            gpa: profile.gpa.map(|g| g.to_string()).unwrap_or_default(),
            graduation_year: profile
                .graduation_year
                .map(|y| y.to_string())
                .unwrap_or_default(),
        }
    }

    fn parse_gpa(&self) -> Result<Option<f64>> {
        let Some(raw) = blank_to_none(&self.gpa) else {
            return Ok(None);
        };
        match raw.parse::<f64>() {
            Ok(gpa) if (0.0..=5.0).contains(&gpa) => Ok(Some(gpa)),
            _ => Err(SyncError::ValidationFailure(format!(
                "GPA must be a number between 0 and 5, got '{}'",
                raw
            ))),
        }
    }

    fn parse_year(&self) -> Result<Option<i64>> {
        let Some(raw) = blank_to_none(&self.graduation_year) else {
            return Ok(None);
        };
        match raw.parse::<i64>() {
            Ok(year) if (1900..=2200).contains(&year) => Ok(Some(year)),
            _ => Err(SyncError::ValidationFailure(format!(
                "graduation year must be a year like 2027, got '{}'",
                raw
            ))),
        }
    }
}

pub struct ProfileService {
    store: Arc<dyn RemoteStore>,
}

impl ProfileService {
    pub fn new(store: Arc<dyn RemoteStore>) -> Self {
        Self { store }
    }

    pub async fn get(&self, user_id: &str) -> Result<Option<UserProfile>> {
        match self.store.select_one(Query::from(USERS).eq("id", user_id)).await {
            Ok(row) => serde_json::from_value(Value::Object(row))
                .map(Some)
                .map_err(|e| SyncError::BackendUnavailable {
                    code: "PARSE".to_string(),
                    message: e.to_string(),
                }),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// The user's major, used as the default for custom jobs. Read failures
    /// fall back to no major.
    pub async fn major(&self, user_id: &str) -> Option<String> {
        match self.get(user_id).await {
            Ok(profile) => profile.and_then(|p| p.major),
            Err(e) => {
                log::debug!("no profile major for {}: {}", user_id, e);
                None
            }
        }
    }

    /// Validates everything before touching the store, then upserts on `id`.
    pub async fn save(&self, user: &User, form: &ProfileForm) -> Result<UserProfile> {
        let gpa = form.parse_gpa()?;
        let graduation_year = form.parse_year()?;
        let profile = UserProfile {
            id: user.id.clone(),
            email: user.email.clone(),
            full_name: blank_to_none(&form.full_name),
            major: blank_to_none(&form.major),
            gpa,
            graduation_year,
        };

        let row = object(json!({
            "id": profile.id,
            "email": profile.email,
            "full_name": profile.full_name,
            "major": profile.major,
            "gpa": profile.gpa,
            "graduation_year": profile.graduation_year,
            "updated_at": now_timestamp(),
        }));
        self.store.upsert(USERS, vec![row], "id").await.map_err(|e| {
            log::warn!("failed to save profile for {}: {}", user.email, e);
            SyncError::from(e)
        })?;
        log::info!("saved profile for {}", user.email);
        Ok(profile)
    }
}
