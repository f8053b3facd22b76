//! Favorite reconciliation: one repository interface, a local and a remote
//! backend chosen by actor, optimistic toggling, and the one-time merge of
//! anonymous favorites into a user's remote set.

use async_trait::async_trait;
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::cache::LocalCache;
use crate::error::Result;
use crate::optimistic::Optimistic;
use crate::session::Actor;
use crate::store::{object, Filter, Query, RemoteStore, FAVORITES};

const LOCAL_KEY: &str = "favorites";
const MIGRATED_KEY_PREFIX: &str = "favorites_migrated:";

pub type FavoriteSet = BTreeSet<String>;

#[async_trait]
pub trait FavoriteRepository: Send + Sync {
    async fn list(&self) -> Result<FavoriteSet>;
    async fn add(&self, job_id: &str) -> Result<()>;
    async fn remove(&self, job_id: &str) -> Result<()>;
}

/// Anonymous favorites, a JSON array of job ids in the local cache.
pub struct LocalFavorites {
    cache: Arc<dyn LocalCache>,
}

impl LocalFavorites {
    pub fn new(cache: Arc<dyn LocalCache>) -> Self {
        Self { cache }
    }

    fn read(&self) -> FavoriteSet {
        let Some(raw) = self.cache.get(LOCAL_KEY) else {
            return FavoriteSet::new();
        };
        // Older caches stored numeric ids.
        match serde_json::from_str::<Vec<serde_json::Value>>(&raw) {
            Ok(values) => values
                .into_iter()
                .filter_map(|v| match v {
                    serde_json::Value::String(s) => Some(s),
                    serde_json::Value::Number(n) => Some(n.to_string()),
                    _ => None,
                })
                .collect(),
            Err(e) => {
                log::warn!("discarding unreadable local favorites: {}", e);
                FavoriteSet::new()
            }
        }
    }

    fn write(&self, favorites: &FavoriteSet) {
        let ids: Vec<&String> = favorites.iter().collect();
        match serde_json::to_string(&ids) {
            Ok(raw) => self.cache.set(LOCAL_KEY, raw),
            Err(e) => log::warn!("failed to encode local favorites: {}", e),
        }
    }

    fn clear(&self) {
        self.write(&FavoriteSet::new());
    }
}

#[async_trait]
impl FavoriteRepository for LocalFavorites {
    async fn list(&self) -> Result<FavoriteSet> {
        Ok(self.read())
    }

    async fn add(&self, job_id: &str) -> Result<()> {
        let mut favorites = self.read();
        if favorites.insert(job_id.to_string()) {
            self.write(&favorites);
        }
        Ok(())
    }

    async fn remove(&self, job_id: &str) -> Result<()> {
        let mut favorites = self.read();
        if favorites.remove(job_id) {
            self.write(&favorites);
        }
        Ok(())
    }
}

/// A signed-in user's favorites, the `(user_id, job_id)` relation.
pub struct RemoteFavorites {
    store: Arc<dyn RemoteStore>,
    user_id: String,
}

impl RemoteFavorites {
    pub fn new(store: Arc<dyn RemoteStore>, user_id: &str) -> Self {
        Self {
            store,
            user_id: user_id.to_string(),
        }
    }

    async fn add_many(&self, job_ids: &FavoriteSet) -> Result<()> {
        if job_ids.is_empty() {
            return Ok(());
        }
        let rows = job_ids
            .iter()
            .map(|job_id| object(json!({ "user_id": self.user_id, "job_id": job_id })))
            .collect();
        self.store.upsert(FAVORITES, rows, "user_id,job_id").await?;
        Ok(())
    }
}

#[async_trait]
impl FavoriteRepository for RemoteFavorites {
    async fn list(&self) -> Result<FavoriteSet> {
        let rows = self
            .store
            .select(Query::from(FAVORITES).eq("user_id", self.user_id.clone()))
            .await?;
        Ok(rows
            .into_iter()
            .filter_map(|row| match row.get("job_id") {
                Some(serde_json::Value::String(s)) => Some(s.clone()),
                Some(serde_json::Value::Number(n)) => Some(n.to_string()),
                _ => None,
            })
            .collect())
    }

    async fn add(&self, job_id: &str) -> Result<()> {
        // Upsert keeps a repeated add from tripping the pair's uniqueness.
        self.add_many(&FavoriteSet::from([job_id.to_string()])).await
    }

    async fn remove(&self, job_id: &str) -> Result<()> {
        self.store
            .delete(
                FAVORITES,
                &[
                    Filter::eq("user_id", self.user_id.clone()),
                    Filter::eq("job_id", job_id),
                ],
            )
            .await?;
        Ok(())
    }
}

pub struct FavoriteService {
    store: Arc<dyn RemoteStore>,
    cache: Arc<dyn LocalCache>,
    gate: Optimistic,
}

impl FavoriteService {
    pub fn new(store: Arc<dyn RemoteStore>, cache: Arc<dyn LocalCache>) -> Self {
        Self {
            store,
            cache,
            gate: Optimistic::new(),
        }
    }

    pub fn repository(&self, actor: &Actor) -> Box<dyn FavoriteRepository> {
        match actor {
            Actor::Anonymous => Box::new(LocalFavorites::new(self.cache.clone())),
            Actor::User(user_id) => Box::new(RemoteFavorites::new(self.store.clone(), user_id)),
        }
    }

    pub async fn get_favorites(&self, actor: &Actor) -> Result<FavoriteSet> {
        self.repository(actor).list().await
    }

    /// `currently_favorite` is the caller's pre-toggle view; it is not re-read.
    pub async fn toggle_favorite(
        &self,
        actor: &Actor,
        job_id: &str,
        currently_favorite: bool,
    ) -> Result<()> {
        let repo = self.repository(actor);
        let result = if currently_favorite {
            repo.remove(job_id).await
        } else {
            repo.add(job_id).await
        };
        if let Err(e) = &result {
            log::warn!("favorite toggle for job {} failed: {}", job_id, e);
        }
        result
    }

    /// Flips `job_id` in the caller's set, then persists; the flip is undone
    /// if persisting fails. Returns whether the job is now a favorite.
    pub async fn toggle_optimistic(
        &self,
        actor: &Actor,
        favorites: &mut FavoriteSet,
        job_id: &str,
    ) -> Result<bool> {
        let was_favorite = favorites.contains(job_id);
        let flip = |set: &mut FavoriteSet| {
            if was_favorite {
                set.remove(job_id);
            } else {
                set.insert(job_id.to_string());
            }
        };
        let unflip = |set: &mut FavoriteSet| {
            if was_favorite {
                set.insert(job_id.to_string());
            } else {
                set.remove(job_id);
            }
        };
        self.gate
            .apply(
                &format!("favorite:{}", job_id),
                favorites,
                flip,
                || self.toggle_favorite(actor, job_id, was_favorite),
                unflip,
            )
            .await?;
        Ok(!was_favorite)
    }

    pub fn is_migrated(&self, user_id: &str) -> bool {
        self.cache
            .get(&format!("{}{}", MIGRATED_KEY_PREFIX, user_id))
            .is_some()
    }

    /// Merges anonymous favorites into `user_id`'s remote set, once per user.
    /// Returns how many ids were merged; zero when already done.
    pub async fn migrate_local_to_remote(&self, user_id: &str) -> Result<usize> {
        if self.is_migrated(user_id) {
            return Ok(0);
        }
        let local = LocalFavorites::new(self.cache.clone());
        let pending = local.read();

        RemoteFavorites::new(self.store.clone(), user_id)
            .add_many(&pending)
            .await?;

        local.clear();
        self.cache.set(
            &format!("{}{}", MIGRATED_KEY_PREFIX, user_id),
            crate::models::now_timestamp(),
        );
        log::info!("merged {} local favorite(s) into user {}", pending.len(), user_id);
        Ok(pending.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::db::SqliteStore;
    use crate::error::SyncError;
    use crate::store::testing::FlakyStore;

    struct Fixture {
        flaky: Arc<FlakyStore>,
        cache: Arc<MemoryCache>,
        service: FavoriteService,
    }

    fn fixture() -> Fixture {
        let flaky = Arc::new(FlakyStore::new(Arc::new(SqliteStore::open_in_memory())));
        let cache = Arc::new(MemoryCache::default());
        let service = FavoriteService::new(flaky.clone(), cache.clone());
        Fixture { flaky, cache, service }
    }

    fn user(id: &str) -> Actor {
        Actor::User(id.to_string())
    }

    #[tokio::test]
    async fn test_anonymous_toggle_uses_local_cache_only() {
        let f = fixture();
        f.service
            .toggle_favorite(&Actor::Anonymous, "42", false)
            .await
            .unwrap();

        assert_eq!(f.cache.get("favorites").as_deref(), Some("[\"42\"]"));
        let favorites = f.service.get_favorites(&Actor::Anonymous).await.unwrap();
        assert_eq!(favorites, FavoriteSet::from(["42".to_string()]));
        assert_eq!(f.flaky.call_count(), 0);
    }

    #[tokio::test]
    async fn test_anonymous_toggle_cannot_fail_when_backend_is_down() {
        let f = fixture();
        f.flaky.fail_writes(true);
        f.flaky.fail_selects(true);
        f.service
            .toggle_favorite(&Actor::Anonymous, "7", false)
            .await
            .unwrap();
        assert!(f.service.get_favorites(&Actor::Anonymous).await.unwrap().contains("7"));
    }

    #[tokio::test]
    async fn test_toggle_round_trip_leaves_set_unchanged() {
        let f = fixture();
        let actor = user("u1");
        f.service.toggle_favorite(&actor, "j1", false).await.unwrap();
        let before = f.service.get_favorites(&actor).await.unwrap();

        f.service.toggle_favorite(&actor, "j2", false).await.unwrap();
        f.service.toggle_favorite(&actor, "j2", true).await.unwrap();

        assert_eq!(f.service.get_favorites(&actor).await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_remote_favorites_are_per_user() {
        let f = fixture();
        f.service.toggle_favorite(&user("u1"), "j1", false).await.unwrap();
        f.service.toggle_favorite(&user("u2"), "j2", false).await.unwrap();

        let u1 = f.service.get_favorites(&user("u1")).await.unwrap();
        assert_eq!(u1, FavoriteSet::from(["j1".to_string()]));
        assert!(f.service.get_favorites(&Actor::Anonymous).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_repeated_add_keeps_one_row() {
        let f = fixture();
        let actor = user("u1");
        f.service.toggle_favorite(&actor, "j1", false).await.unwrap();
        f.service.toggle_favorite(&actor, "j1", false).await.unwrap();
        assert_eq!(f.service.get_favorites(&actor).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_remote_read_failure_is_backend_unavailable() {
        let f = fixture();
        f.flaky.fail_selects(true);
        let err = f.service.get_favorites(&user("u1")).await.unwrap_err();
        assert!(matches!(err, SyncError::BackendUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_optimistic_toggle_reverts_on_failure() {
        let f = fixture();
        let actor = user("u1");
        let mut shown = FavoriteSet::from(["j1".to_string()]);

        assert!(f.service.toggle_optimistic(&actor, &mut shown, "j2").await.unwrap());
        assert!(shown.contains("j2"));

        f.flaky.fail_writes(true);
        assert!(f.service.toggle_optimistic(&actor, &mut shown, "j1").await.is_err());
        assert!(shown.contains("j1"), "failed removal must be rolled back");
        assert!(f.service.toggle_optimistic(&actor, &mut shown, "j3").await.is_err());
        assert!(!shown.contains("j3"), "failed add must be rolled back");
    }

    #[tokio::test]
    async fn test_job_outside_listing_can_be_favorited() {
        let f = fixture();
        let actor = user("u1");
        f.service.toggle_favorite(&actor, "not-loaded", false).await.unwrap();
        assert!(f.service.get_favorites(&actor).await.unwrap().contains("not-loaded"));
    }

    #[tokio::test]
    async fn test_migration_merges_once_and_clears_local() {
        let f = fixture();
        f.service.toggle_favorite(&Actor::Anonymous, "j1", false).await.unwrap();
        f.service.toggle_favorite(&Actor::Anonymous, "j2", false).await.unwrap();
        f.service.toggle_favorite(&user("u1"), "j2", false).await.unwrap();

        assert_eq!(f.service.migrate_local_to_remote("u1").await.unwrap(), 2);
        let remote = f.service.get_favorites(&user("u1")).await.unwrap();
        assert_eq!(remote, FavoriteSet::from(["j1".to_string(), "j2".to_string()]));
        assert!(f.service.get_favorites(&Actor::Anonymous).await.unwrap().is_empty());
        assert!(f.service.is_migrated("u1"));

        f.service.toggle_favorite(&Actor::Anonymous, "j3", false).await.unwrap();
        assert_eq!(f.service.migrate_local_to_remote("u1").await.unwrap(), 0);
        assert!(f.service.get_favorites(&Actor::Anonymous).await.unwrap().contains("j3"));
    }

    #[tokio::test]
    async fn test_failed_migration_is_retried_later() {
        let f = fixture();
        f.service.toggle_favorite(&Actor::Anonymous, "j1", false).await.unwrap();

        f.flaky.fail_writes(true);
        assert!(f.service.migrate_local_to_remote("u1").await.is_err());
        assert!(!f.service.is_migrated("u1"));
        assert!(f.service.get_favorites(&Actor::Anonymous).await.unwrap().contains("j1"));

        f.flaky.fail_writes(false);
        assert_eq!(f.service.migrate_local_to_remote("u1").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_numeric_ids_from_older_cache_are_read() {
        let f = fixture();
        f.cache.set("favorites", "[12, \"13\"]".to_string());
        let favorites = f.service.get_favorites(&Actor::Anonymous).await.unwrap();
        assert_eq!(favorites, FavoriteSet::from(["12".to_string(), "13".to_string()]));
    }
}
