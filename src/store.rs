//! Collection-level access to the remote relational store.
//!
//! Both backends (`SqliteStore`, `PostgrestStore`) speak the same small
//! vocabulary: named collections, equality / null / `IN` filters, a single
//! ordering column, and an optional embedded relation that comes back as a
//! nested object keyed by the related collection's name.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::fmt;

pub type Row = Map<String, Value>;

pub const JOBS: &str = "jobs";
pub const FAVORITES: &str = "favorites";
pub const APPLICATIONS: &str = "applications";
pub const USERS: &str = "users";

/// PostgREST's code for "no rows" on a single-row read.
pub const NO_ROWS: &str = "PGRST116";
/// Postgres unique violation.
pub const UNIQUE_VIOLATION: &str = "23505";

#[derive(Debug, Clone, PartialEq)]
pub struct StoreError {
    pub code: String,
    pub message: String,
}

impl StoreError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn no_rows(collection: &str) -> Self {
        Self::new(NO_ROWS, format!("no rows returned from {}", collection))
    }

    pub fn is_not_found(&self) -> bool {
        self.code == NO_ROWS
    }

    pub fn is_unique_violation(&self) -> bool {
        self.code == UNIQUE_VIOLATION
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for StoreError {}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// `column = value`; a JSON null means `column IS NULL`.
    Eq(String, Value),
    In(String, Vec<Value>),
}

impl Filter {
    pub fn eq(column: &str, value: impl Into<Value>) -> Self {
        Filter::Eq(column.to_string(), value.into())
    }

    pub fn in_list<I, V>(column: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Filter::In(column.to_string(), values.into_iter().map(Into::into).collect())
    }

    pub fn column(&self) -> &str {
        match self {
            Filter::Eq(column, _) | Filter::In(column, _) => column,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    pub column: String,
    pub ascending: bool,
}

/// A to-one relation pulled in alongside each row.
#[derive(Debug, Clone, PartialEq)]
pub struct Embed {
    pub collection: String,
    pub foreign_key: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub collection: String,
    pub filters: Vec<Filter>,
    pub order: Option<Order>,
    pub embed: Option<Embed>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn from(collection: &str) -> Self {
        Self {
            collection: collection.to_string(),
            filters: Vec::new(),
            order: None,
            embed: None,
            limit: None,
        }
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn eq(self, column: &str, value: impl Into<Value>) -> Self {
        self.filter(Filter::eq(column, value))
    }

    pub fn order_by(mut self, column: &str, ascending: bool) -> Self {
        self.order = Some(Order {
            column: column.to_string(),
            ascending,
        });
        self
    }

    pub fn embed(mut self, collection: &str, foreign_key: &str) -> Self {
        self.embed = Some(Embed {
            collection: collection.to_string(),
            foreign_key: foreign_key.to_string(),
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn select(&self, query: Query) -> StoreResult<Vec<Row>>;

    /// Inserts rows and returns them as stored (ids and defaults filled in).
    async fn insert(&self, collection: &str, rows: Vec<Row>) -> StoreResult<Vec<Row>>;

    async fn update(&self, collection: &str, patch: Row, filters: &[Filter]) -> StoreResult<()>;

    async fn delete(&self, collection: &str, filters: &[Filter]) -> StoreResult<()>;

    /// `conflict_key` is a comma-separated column list, e.g. `"user_id,job_id"`.
    async fn upsert(&self, collection: &str, rows: Vec<Row>, conflict_key: &str) -> StoreResult<()>;

    /// First matching row, or a `NO_ROWS` error.
    async fn select_one(&self, query: Query) -> StoreResult<Row> {
        let collection = query.collection.clone();
        self.select(query.limit(1))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::no_rows(&collection))
    }

    async fn insert_one(&self, collection: &str, row: Row) -> StoreResult<Row> {
        self.insert(collection, vec![row])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::no_rows(collection))
    }
}

/// Turns a `json!({...})` object into a row. Non-objects yield an empty row.
pub fn object(value: Value) -> Row {
    match value {
        Value::Object(map) => map,
        _ => Row::new(),
    }
}

#[cfg(test)]
pub mod testing {
    //! Store wrapper that fails selected operations on demand.

    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    pub struct FlakyStore {
        inner: Arc<dyn RemoteStore>,
        fail_selects: AtomicBool,
        fail_writes: AtomicBool,
        fail_inserts_into: std::sync::Mutex<Option<String>>,
        calls: AtomicUsize,
    }

    impl FlakyStore {
        pub fn new(inner: Arc<dyn RemoteStore>) -> Self {
            Self {
                inner,
                fail_selects: AtomicBool::new(false),
                fail_writes: AtomicBool::new(false),
                fail_inserts_into: std::sync::Mutex::new(None),
                calls: AtomicUsize::new(0),
            }
        }

        pub fn fail_writes(&self, fail: bool) {
            self.fail_writes.store(fail, Ordering::SeqCst);
        }

        pub fn fail_selects(&self, fail: bool) {
            self.fail_selects.store(fail, Ordering::SeqCst);
        }

        pub fn fail_inserts_into(&self, collection: &str) {
            *self.fail_inserts_into.lock().unwrap() = Some(collection.to_string());
        }

        pub fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn check_write(&self) -> StoreResult<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(StoreError::new("503", "service unavailable"));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl RemoteStore for FlakyStore {
        async fn select(&self, query: Query) -> StoreResult<Vec<Row>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_selects.load(Ordering::SeqCst) {
                return Err(StoreError::new("503", "service unavailable"));
            }
            self.inner.select(query).await
        }

        async fn insert(&self, collection: &str, rows: Vec<Row>) -> StoreResult<Vec<Row>> {
            self.check_write()?;
            if self.fail_inserts_into.lock().unwrap().as_deref() == Some(collection) {
                return Err(StoreError::new("503", "service unavailable"));
            }
            self.inner.insert(collection, rows).await
        }

        async fn update(&self, collection: &str, patch: Row, filters: &[Filter]) -> StoreResult<()> {
            self.check_write()?;
            self.inner.update(collection, patch, filters).await
        }

        async fn delete(&self, collection: &str, filters: &[Filter]) -> StoreResult<()> {
            self.check_write()?;
            self.inner.delete(collection, filters).await
        }

        async fn upsert(&self, collection: &str, rows: Vec<Row>, conflict_key: &str) -> StoreResult<()> {
            self.check_write()?;
            self.inner.upsert(collection, rows, conflict_key).await
        }
    }
}
