//! Builds the services for the configured backend and owns the sign-in flow.

use anyhow::{anyhow, Result};
use std::sync::Arc;

use crate::cache::{FileCache, LocalCache};
use crate::config::{BackendKind, Config};
use crate::db::SqliteStore;
use crate::favorites::FavoriteService;
use crate::jobs::JobCatalog;
use crate::models::User;
use crate::profile::ProfileService;
use crate::rest::PostgrestStore;
use crate::session::{load_session, AuthProvider, LocalAuth, SessionContext, SupabaseAuth};
use crate::store::RemoteStore;
use crate::tracker::ApplicationTracker;

enum Backend {
    Sqlite(Arc<SqliteStore>),
    Supabase(Arc<PostgrestStore>),
}

pub struct App {
    pub config: Config,
    backend: Backend,
    cache: Arc<dyn LocalCache>,
    auth: Box<dyn AuthProvider>,
    pub session: SessionContext,
    pub favorites: FavoriteService,
    pub tracker: ApplicationTracker,
    pub catalog: JobCatalog,
    pub profiles: ProfileService,
}

/// Outcome of a sign-in. `migrated` is `None` when merging local favorites
/// failed; it is retried on the next sign-in.
pub struct SignIn {
    pub user: User,
    pub migrated: Option<usize>,
}

impl App {
    pub fn build(config: Config) -> Result<Self> {
        let cache: Arc<dyn LocalCache> = Arc::new(FileCache::open(&FileCache::default_path()));

        let (backend, store, auth): (Backend, Arc<dyn RemoteStore>, Box<dyn AuthProvider>) =
            match config.backend.kind {
                BackendKind::Sqlite => {
                    let sqlite = Arc::new(SqliteStore::open(&config.database_path())?);
                    let auth = Box::new(LocalAuth::new(sqlite.clone(), cache.clone()));
                    (Backend::Sqlite(sqlite.clone()), sqlite, auth)
                }
                BackendKind::Supabase => {
                    let url = config
                        .backend
                        .supabase_url
                        .as_deref()
                        .ok_or_else(|| anyhow!("backend.supabase_url is not set"))?;
                    let key = config
                        .backend
                        .supabase_anon_key
                        .as_deref()
                        .ok_or_else(|| anyhow!("backend.supabase_anon_key is not set"))?;
                    let rest = Arc::new(PostgrestStore::new(url, key));
                    rest.set_access_token(
                        load_session(cache.as_ref()).and_then(|s| s.access_token),
                    );
                    let auth = Box::new(SupabaseAuth::new(url, key, cache.clone()));
                    (Backend::Supabase(rest.clone()), rest, auth)
                }
            };

        let session = SessionContext::new();
        session.bind(auth.as_ref());
        log::debug!("session restored: {:?}", session.state());

        Ok(Self {
            favorites: FavoriteService::new(store.clone(), cache.clone()),
            tracker: ApplicationTracker::new(store.clone()),
            catalog: JobCatalog::new(store.clone()),
            profiles: ProfileService::new(store),
            config,
            backend,
            cache,
            auth,
            session,
        })
    }

    /// Creates the local schema. Returns a line describing where data lives.
    pub fn init(&self) -> Result<String> {
        match &self.backend {
            Backend::Sqlite(db) => {
                db.init()?;
                Ok(format!("Database initialized at {}", db.path().display()))
            }
            Backend::Supabase(_) => Ok(format!(
                "Using hosted backend at {}",
                self.config.backend.supabase_url.as_deref().unwrap_or_default()
            )),
        }
    }

    pub fn ensure_ready(&self) -> Result<()> {
        match &self.backend {
            Backend::Sqlite(db) => db.ensure_initialized(),
            Backend::Supabase(_) => Ok(()),
        }
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<SignIn> {
        let user = self.auth.sign_in(email, password).await?;
        if let Backend::Supabase(rest) = &self.backend {
            rest.set_access_token(load_session(self.cache.as_ref()).and_then(|s| s.access_token));
        }
        self.session.activate(Some(user.clone()));

        let migrated = match self.favorites.migrate_local_to_remote(&user.id).await {
            Ok(count) => Some(count),
            Err(e) => {
                log::warn!("could not merge local favorites for {}: {}", user.email, e);
                None
            }
        };
        Ok(SignIn { user, migrated })
    }

    pub async fn sign_out(&self) -> Result<()> {
        self.auth.sign_out().await?;
        if let Backend::Supabase(rest) = &self.backend {
            rest.set_access_token(None);
        }
        self.session.activate(None);
        Ok(())
    }
}

impl Drop for App {
    fn drop(&mut self) {
        self.session.dispose();
    }
}
