use async_trait::async_trait;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection, ErrorCode};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use crate::store::{
    Filter, Query, RemoteStore, Row, StoreError, StoreResult, APPLICATIONS, FAVORITES, JOBS,
    NO_ROWS, UNIQUE_VIOLATION, USERS,
};

/// Random bytes per generated id; ids are their lowercase hex.
const ID_BYTES: usize = 6;

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS jobs (
        id TEXT PRIMARY KEY NOT NULL DEFAULT ({id}),
        title TEXT NOT NULL,
        company TEXT,
        location TEXT,
        deadline TEXT,
        compensation TEXT,
        targeted_major TEXT,
        minimum_GPA TEXT,
        description TEXT,
        job_link TEXT,
        status TEXT NOT NULL DEFAULT 'active',
        posted_date TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
    );

    CREATE TABLE IF NOT EXISTS users (
        id TEXT PRIMARY KEY NOT NULL DEFAULT ({id}),
        email TEXT NOT NULL UNIQUE,
        full_name TEXT,
        major TEXT,
        gpa REAL,
        graduation_year INTEGER,
        created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
        updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
    );

    CREATE TABLE IF NOT EXISTS favorites (
        id TEXT PRIMARY KEY NOT NULL DEFAULT ({id}),
        user_id TEXT NOT NULL,
        job_id TEXT NOT NULL,
        created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
        UNIQUE (user_id, job_id)
    );

    CREATE TABLE IF NOT EXISTS applications (
        id TEXT PRIMARY KEY NOT NULL DEFAULT ({id}),
        user_id TEXT NOT NULL,
        job_id TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'saved'
            CHECK (status IN ('saved', 'applied', 'interview', 'offer', 'rejected')),
        applied_date TEXT,
        interview_date TEXT,
        notes TEXT,
        created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
        updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
        UNIQUE (user_id, job_id)
    );

    CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status);
    CREATE INDEX IF NOT EXISTS idx_favorites_user ON favorites(user_id);
    CREATE INDEX IF NOT EXISTS idx_applications_user ON applications(user_id);
"#;

// Job references are plain columns: a dangling job_id is legal here.
fn columns(collection: &str) -> Option<&'static [&'static str]> {
    match collection {
        JOBS => Some(&[
            "id", "title", "company", "location", "deadline", "compensation", "targeted_major",
            "minimum_GPA", "description", "job_link", "status", "posted_date",
        ]),
        USERS => Some(&[
            "id", "email", "full_name", "major", "gpa", "graduation_year", "created_at",
            "updated_at",
        ]),
        FAVORITES => Some(&["id", "user_id", "job_id", "created_at"]),
        APPLICATIONS => Some(&[
            "id", "user_id", "job_id", "status", "applied_date", "interview_date", "notes",
            "created_at", "updated_at",
        ]),
        _ => None,
    }
}

/// Local stand-in for the hosted store, speaking the same collection API.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    path: PathBuf,
}

impl SqliteStore {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: path.to_path_buf(),
        })
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Self {
        let conn = Connection::open_in_memory().expect("in-memory sqlite");
        let store = Self {
            conn: Mutex::new(conn),
            path: PathBuf::from(":memory:"),
        };
        store.init().expect("schema");
        store
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    pub fn default_path() -> PathBuf {
        // Use XDG data directory or fallback
        if let Some(proj_dirs) = directories::ProjectDirs::from("", "", "coopscout") {
            proj_dirs.data_dir().join("coopscout.db")
        } else {
            PathBuf::from("coopscout.db")
        }
    }

    pub fn init(&self) -> StoreResult<()> {
        let id = format!("lower(hex(randomblob({})))", ID_BYTES);
        self.conn()?.execute_batch(&SCHEMA.replace("{id}", &id))?;
        Ok(())
    }

    pub fn ensure_initialized(&self) -> anyhow::Result<()> {
        let tables: i64 = self.conn()?.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='applications'",
            [],
            |row| row.get(0),
        )?;
        if tables == 0 {
            return Err(anyhow::anyhow!(
                "Database not initialized. Run 'coopscout init' first."
            ));
        }
        Ok(())
    }

    fn conn(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StoreError::new("SQLITE", "connection lock poisoned"))
    }
}

fn check_collection(collection: &str) -> StoreResult<&'static [&'static str]> {
    columns(collection).ok_or_else(|| {
        StoreError::new("42P01", format!("relation \"{}\" does not exist", collection))
    })
}

fn check_column(collection: &str, known: &[&str], column: &str) -> StoreResult<()> {
    if known.contains(&column) {
        Ok(())
    } else {
        Err(StoreError::new(
            "42703",
            format!("column \"{}\" of \"{}\" does not exist", column, collection),
        ))
    }
}

fn to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(*b as i64),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

fn row_to_json(row: &rusqlite::Row, names: &[String]) -> rusqlite::Result<Row> {
    let mut out = Row::new();
    for (idx, name) in names.iter().enumerate() {
        let value = match row.get_ref(idx)? {
            ValueRef::Null | ValueRef::Blob(_) => Value::Null,
            ValueRef::Integer(i) => Value::from(i),
            ValueRef::Real(f) => serde_json::Number::from_f64(f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        };
        out.insert(name.clone(), value);
    }
    Ok(out)
}

/// Appends a WHERE clause for `filters`, numbering placeholders after `params`.
fn where_clause(
    collection: &str,
    known: &[&str],
    filters: &[Filter],
    params: &mut Vec<SqlValue>,
) -> StoreResult<String> {
    let mut clauses = Vec::with_capacity(filters.len());
    for filter in filters {
        check_column(collection, known, filter.column())?;
        match filter {
            Filter::Eq(column, Value::Null) => clauses.push(format!("{} IS NULL", column)),
            Filter::Eq(column, value) => {
                params.push(to_sql(value));
                clauses.push(format!("{} = ?{}", column, params.len()));
            }
            Filter::In(_, values) if values.is_empty() => clauses.push("0".to_string()),
            Filter::In(column, values) => {
                let mut slots = Vec::with_capacity(values.len());
                for value in values {
                    params.push(to_sql(value));
                    slots.push(format!("?{}", params.len()));
                }
                clauses.push(format!("{} IN ({})", column, slots.join(", ")));
            }
        }
    }
    if clauses.is_empty() {
        Ok(String::new())
    } else {
        Ok(format!(" WHERE {}", clauses.join(" AND ")))
    }
}

fn query_rows(conn: &Connection, sql: &str, params: &[SqlValue]) -> StoreResult<Vec<Row>> {
    let mut stmt = conn.prepare(sql)?;
    let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let rows = stmt
        .query_map(params_from_iter(params.iter()), |row| row_to_json(row, &names))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn select_locked(conn: &Connection, query: &Query) -> StoreResult<Vec<Row>> {
    let known = check_collection(&query.collection)?;
    let mut params = Vec::new();
    let mut sql = format!("SELECT * FROM {}", query.collection);
    sql.push_str(&where_clause(&query.collection, known, &query.filters, &mut params)?);

    if let Some(order) = &query.order {
        check_column(&query.collection, known, &order.column)?;
        let direction = if order.ascending { "ASC" } else { "DESC" };
        sql.push_str(&format!(" ORDER BY {} {}", order.column, direction));
    }
    if let Some(limit) = query.limit {
        sql.push_str(&format!(" LIMIT {}", limit));
    }

    let mut rows = query_rows(conn, &sql, &params)?;

    if let Some(embed) = &query.embed {
        check_column(&query.collection, known, &embed.foreign_key)?;
        for row in rows.iter_mut() {
            let related = match row.get(&embed.foreign_key) {
                Some(Value::Null) | None => Value::Null,
                Some(key) => {
                    let lookup = Query::from(&embed.collection).eq("id", key.clone()).limit(1);
                    select_locked(conn, &lookup)?
                        .into_iter()
                        .next()
                        .map(Value::Object)
                        .unwrap_or(Value::Null)
                }
            };
            row.insert(embed.collection.clone(), related);
        }
    }

    Ok(rows)
}

fn require_filters(op: &str, filters: &[Filter]) -> StoreResult<()> {
    if filters.is_empty() {
        return Err(StoreError::new(
            "21000",
            format!("{} requires at least one filter", op),
        ));
    }
    Ok(())
}

#[async_trait]
impl RemoteStore for SqliteStore {
    async fn select(&self, query: Query) -> StoreResult<Vec<Row>> {
        let conn = self.conn()?;
        select_locked(&conn, &query)
    }

    async fn insert(&self, collection: &str, rows: Vec<Row>) -> StoreResult<Vec<Row>> {
        let known = check_collection(collection)?;
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut inserted = Vec::with_capacity(rows.len());

        for row in &rows {
            for column in row.keys() {
                check_column(collection, known, column)?;
            }
            let sql = if row.is_empty() {
                format!("INSERT INTO {} DEFAULT VALUES RETURNING *", collection)
            } else {
                let cols: Vec<&str> = row.keys().map(String::as_str).collect();
                let slots: Vec<String> = (1..=cols.len()).map(|i| format!("?{}", i)).collect();
                format!(
                    "INSERT INTO {} ({}) VALUES ({}) RETURNING *",
                    collection,
                    cols.join(", "),
                    slots.join(", ")
                )
            };
            let params: Vec<SqlValue> = row.values().map(to_sql).collect();
            inserted.extend(query_rows(&tx, &sql, &params)?);
        }

        tx.commit()?;
        Ok(inserted)
    }

    async fn update(&self, collection: &str, patch: Row, filters: &[Filter]) -> StoreResult<()> {
        let known = check_collection(collection)?;
        require_filters("UPDATE", filters)?;
        if patch.is_empty() {
            return Ok(());
        }

        let mut params = Vec::with_capacity(patch.len());
        let mut sets = Vec::with_capacity(patch.len());
        for (column, value) in &patch {
            check_column(collection, known, column)?;
            params.push(to_sql(value));
            sets.push(format!("{} = ?{}", column, params.len()));
        }
        let clause = where_clause(collection, known, filters, &mut params)?;
        let sql = format!("UPDATE {} SET {}{}", collection, sets.join(", "), clause);

        self.conn()?.execute(&sql, params_from_iter(params.iter()))?;
        Ok(())
    }

    async fn delete(&self, collection: &str, filters: &[Filter]) -> StoreResult<()> {
        let known = check_collection(collection)?;
        require_filters("DELETE", filters)?;

        let mut params = Vec::new();
        let clause = where_clause(collection, known, filters, &mut params)?;
        let sql = format!("DELETE FROM {}{}", collection, clause);

        self.conn()?.execute(&sql, params_from_iter(params.iter()))?;
        Ok(())
    }

    async fn upsert(&self, collection: &str, rows: Vec<Row>, conflict_key: &str) -> StoreResult<()> {
        let known = check_collection(collection)?;
        let conflict: Vec<&str> = conflict_key.split(',').map(str::trim).collect();
        for column in &conflict {
            check_column(collection, known, column)?;
        }

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        for row in &rows {
            for column in row.keys() {
                check_column(collection, known, column)?;
            }
            let cols: Vec<&str> = row.keys().map(String::as_str).collect();
            let slots: Vec<String> = (1..=cols.len()).map(|i| format!("?{}", i)).collect();
            let updates: Vec<String> = cols
                .iter()
                .filter(|c| !conflict.contains(c))
                .map(|c| format!("{} = excluded.{}", c, c))
                .collect();
            let action = if updates.is_empty() {
                "DO NOTHING".to_string()
            } else {
                format!("DO UPDATE SET {}", updates.join(", "))
            };
            let sql = format!(
                "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT ({}) {}",
                collection,
                cols.join(", "),
                slots.join(", "),
                conflict.join(", "),
                action
            );
            let params: Vec<SqlValue> = row.values().map(to_sql).collect();
            tx.execute(&sql, params_from_iter(params.iter()))?;
        }

        tx.commit()?;
        Ok(())
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::QueryReturnedNoRows => StoreError::new(NO_ROWS, err.to_string()),
            rusqlite::Error::SqliteFailure(e, _)
                if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                    || e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY =>
            {
                StoreError::new(UNIQUE_VIOLATION, err.to_string())
            }
            rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation => {
                StoreError::new("23514", err.to_string())
            }
            _ => StoreError::new("SQLITE", err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::object;
    use serde_json::json;

    async fn seed_job(store: &SqliteStore, title: &str, posted: &str) -> String {
        let row = store
            .insert_one(JOBS, object(json!({ "title": title, "posted_date": posted })))
            .await
            .unwrap();
        row["id"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_insert_returns_generated_id_and_defaults() {
        let store = SqliteStore::open_in_memory();
        let row = store
            .insert_one(JOBS, object(json!({ "title": "Data Co-op" })))
            .await
            .unwrap();
        assert_eq!(row["title"], "Data Co-op");
        assert_eq!(row["status"], "active");
        let id = row["id"].as_str().unwrap();
        assert_eq!(id.len(), ID_BYTES * 2);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[tokio::test]
    async fn test_select_filters_and_orders() {
        let store = SqliteStore::open_in_memory();
        seed_job(&store, "Older", "2025-01-01T00:00:00Z").await;
        seed_job(&store, "Newer", "2025-02-01T00:00:00Z").await;

        let rows = store
            .select(Query::from(JOBS).eq("status", "active").order_by("posted_date", false))
            .await
            .unwrap();
        let titles: Vec<&str> = rows.iter().map(|r| r["title"].as_str().unwrap()).collect();
        assert_eq!(titles, vec!["Newer", "Older"]);
    }

    #[tokio::test]
    async fn test_in_filter_with_empty_list_matches_nothing() {
        let store = SqliteStore::open_in_memory();
        seed_job(&store, "Any", "2025-01-01T00:00:00Z").await;
        let rows = store
            .select(Query::from(JOBS).filter(Filter::in_list::<_, Value>("id", vec![])))
            .await
            .unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn test_embed_attaches_related_row_or_null() {
        let store = SqliteStore::open_in_memory();
        let job_id = seed_job(&store, "Embedded", "2025-01-01T00:00:00Z").await;
        store
            .insert(
                APPLICATIONS,
                vec![
                    object(json!({ "user_id": "u1", "job_id": job_id, "status": "saved" })),
                    object(json!({ "user_id": "u1", "job_id": "missing", "status": "saved" })),
                ],
            )
            .await
            .unwrap();

        let rows = store
            .select(Query::from(APPLICATIONS).eq("user_id", "u1").embed(JOBS, "job_id"))
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        let found = rows.iter().find(|r| r["job_id"] == json!(job_id)).unwrap();
        assert_eq!(found["jobs"]["title"], "Embedded");
        let dangling = rows.iter().find(|r| r["job_id"] == "missing").unwrap();
        assert!(dangling["jobs"].is_null());
    }

    #[tokio::test]
    async fn test_duplicate_pair_is_unique_violation() {
        let store = SqliteStore::open_in_memory();
        let fav = object(json!({ "user_id": "u1", "job_id": "j1" }));
        store.insert_one(FAVORITES, fav.clone()).await.unwrap();
        let err = store.insert_one(FAVORITES, fav).await.unwrap_err();
        assert!(err.is_unique_violation());
    }

    #[tokio::test]
    async fn test_check_constraint_rejects_unknown_status() {
        let store = SqliteStore::open_in_memory();
        let err = store
            .insert_one(
                APPLICATIONS,
                object(json!({ "user_id": "u1", "job_id": "j1", "status": "ghosted" })),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code, "23514");
    }

    #[tokio::test]
    async fn test_upsert_merges_on_conflict_key() {
        let store = SqliteStore::open_in_memory();
        store
            .upsert(USERS, vec![object(json!({ "id": "u1", "email": "a@b.edu", "major": "CS" }))], "id")
            .await
            .unwrap();
        store
            .upsert(USERS, vec![object(json!({ "id": "u1", "email": "a@b.edu", "major": "EE" }))], "id")
            .await
            .unwrap();

        let rows = store.select(Query::from(USERS)).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["major"], "EE");
    }

    #[tokio::test]
    async fn test_upsert_with_only_key_columns_is_noop_on_conflict() {
        let store = SqliteStore::open_in_memory();
        let fav = object(json!({ "user_id": "u1", "job_id": "j1" }));
        store.upsert(FAVORITES, vec![fav.clone()], "user_id,job_id").await.unwrap();
        store.upsert(FAVORITES, vec![fav], "user_id,job_id").await.unwrap();
        let rows = store.select(Query::from(FAVORITES)).await.unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn test_update_and_delete_require_filters() {
        let store = SqliteStore::open_in_memory();
        let patch = object(json!({ "status": "closed" }));
        assert!(store.update(JOBS, patch, &[]).await.is_err());
        assert!(store.delete(JOBS, &[]).await.is_err());
    }

    #[tokio::test]
    async fn test_unknown_column_and_collection_rejected() {
        let store = SqliteStore::open_in_memory();
        let err = store
            .select(Query::from(JOBS).eq("title; DROP TABLE jobs", "x"))
            .await
            .unwrap_err();
        assert_eq!(err.code, "42703");
        let err = store.select(Query::from("resumes")).await.unwrap_err();
        assert_eq!(err.code, "42P01");
    }

    #[tokio::test]
    async fn test_select_one_reports_no_rows() {
        let store = SqliteStore::open_in_memory();
        let err = store
            .select_one(Query::from(JOBS).eq("id", "nope"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }
}
