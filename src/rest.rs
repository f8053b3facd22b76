use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::Value;
use std::sync::RwLock;

use crate::store::{Filter, Query, RemoteStore, Row, StoreError, StoreResult};

/// Hosted backend: PostgREST under `{url}/rest/v1`.
pub struct PostgrestStore {
    base_url: String,
    anon_key: String,
    access_token: RwLock<Option<String>>,
    client: Client,
}

#[derive(Debug, Deserialize)]
struct PostgrestError {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl PostgrestStore {
    pub fn new(url: &str, anon_key: &str) -> Self {
        Self {
            base_url: url.trim_end_matches('/').to_string(),
            anon_key: anon_key.to_string(),
            access_token: RwLock::new(None),
            client: Client::new(),
        }
    }

    /// Requests run as the signed-in user once a token is set; row-level
    /// security on the hosted side depends on it.
    pub fn set_access_token(&self, token: Option<String>) {
        if let Ok(mut slot) = self.access_token.write() {
            *slot = token;
        }
    }

    fn endpoint(&self, collection: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, collection)
    }

    fn request(&self, builder: RequestBuilder) -> RequestBuilder {
        let bearer = self
            .access_token
            .read()
            .ok()
            .and_then(|t| t.clone())
            .unwrap_or_else(|| self.anon_key.clone());
        builder
            .header("apikey", &self.anon_key)
            .header("Authorization", format!("Bearer {}", bearer))
    }

    async fn send(&self, builder: RequestBuilder) -> StoreResult<Response> {
        let response = self
            .request(builder)
            .send()
            .await
            .map_err(|e| StoreError::new("NETWORK", e.to_string()))?;

        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Err(error_from_body(status, body))
    }

    async fn rows(response: Response) -> StoreResult<Vec<Row>> {
        response
            .json::<Vec<Row>>()
            .await
            .map_err(|e| StoreError::new("PARSE", e.to_string()))
    }
}

/// PostgREST reports `{code, message, ...}`; fields it leaves out fall back to
/// the HTTP status and the raw body.
fn error_from_body(status: u16, body: String) -> StoreError {
    match serde_json::from_str::<PostgrestError>(&body) {
        Ok(PostgrestError { code, message }) => StoreError::new(
            code.unwrap_or_else(|| status.to_string()),
            message.unwrap_or(body),
        ),
        Err(_) => StoreError::new(status.to_string(), body),
    }
}

fn literal(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// PostgREST query parameters for a filter list.
pub fn filter_params(filters: &[Filter]) -> Vec<(String, String)> {
    filters
        .iter()
        .map(|filter| match filter {
            Filter::Eq(column, Value::Null) => (column.clone(), "is.null".to_string()),
            Filter::Eq(column, value) => (column.clone(), format!("eq.{}", literal(value))),
            Filter::In(column, values) => {
                let list: Vec<String> = values
                    .iter()
                    .map(|v| format!("\"{}\"", literal(v).replace('"', "\\\"")))
                    .collect();
                (column.clone(), format!("in.({})", list.join(",")))
            }
        })
        .collect()
}

pub fn query_params(query: &Query) -> Vec<(String, String)> {
    let select = match &query.embed {
        Some(embed) => format!("*,{}(*)", embed.collection),
        None => "*".to_string(),
    };
    let mut params = vec![("select".to_string(), select)];
    params.extend(filter_params(&query.filters));
    if let Some(order) = &query.order {
        let direction = if order.ascending { "asc" } else { "desc" };
        params.push(("order".to_string(), format!("{}.{}", order.column, direction)));
    }
    if let Some(limit) = query.limit {
        params.push(("limit".to_string(), limit.to_string()));
    }
    params
}

#[async_trait]
impl RemoteStore for PostgrestStore {
    async fn select(&self, query: Query) -> StoreResult<Vec<Row>> {
        let builder = self
            .client
            .get(self.endpoint(&query.collection))
            .query(&query_params(&query));
        let response = self.send(builder).await?;
        Self::rows(response).await
    }

    async fn insert(&self, collection: &str, rows: Vec<Row>) -> StoreResult<Vec<Row>> {
        let builder = self
            .client
            .post(self.endpoint(collection))
            .header("Prefer", "return=representation")
            .json(&rows);
        let response = self.send(builder).await?;
        Self::rows(response).await
    }

    async fn update(&self, collection: &str, patch: Row, filters: &[Filter]) -> StoreResult<()> {
        let builder = self
            .client
            .patch(self.endpoint(collection))
            .query(&filter_params(filters))
            .json(&patch);
        self.send(builder).await?;
        Ok(())
    }

    async fn delete(&self, collection: &str, filters: &[Filter]) -> StoreResult<()> {
        let builder = self
            .client
            .delete(self.endpoint(collection))
            .query(&filter_params(filters));
        self.send(builder).await?;
        Ok(())
    }

    async fn upsert(&self, collection: &str, rows: Vec<Row>, conflict_key: &str) -> StoreResult<()> {
        let builder = self
            .client
            .post(self.endpoint(collection))
            .query(&[("on_conflict", conflict_key)])
            .header("Prefer", "resolution=merge-duplicates")
            .json(&rows);
        self.send(builder).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{APPLICATIONS, JOBS};
    use serde_json::json;

    #[test]
    fn test_query_params_for_joined_listing() {
        let query = Query::from(APPLICATIONS)
            .eq("user_id", "u1")
            .order_by("updated_at", false)
            .embed(JOBS, "job_id");
        let params = query_params(&query);
        assert_eq!(
            params,
            vec![
                ("select".to_string(), "*,jobs(*)".to_string()),
                ("user_id".to_string(), "eq.u1".to_string()),
                ("order".to_string(), "updated_at.desc".to_string()),
            ]
        );
    }

    #[test]
    fn test_filter_params_null_and_in_list() {
        let params = filter_params(&[
            Filter::eq("notes", Value::Null),
            Filter::in_list("id", vec![json!("a"), json!(7)]),
        ]);
        assert_eq!(params[0], ("notes".to_string(), "is.null".to_string()));
        assert_eq!(params[1], ("id".to_string(), "in.(\"a\",\"7\")".to_string()));
    }

    #[test]
    fn test_error_body_keeps_postgrest_code() {
        let err = error_from_body(
            409,
            r#"{"code":"23505","details":null,"hint":null,"message":"duplicate key value violates unique constraint"}"#
                .to_string(),
        );
        assert!(err.is_unique_violation());
        assert_eq!(err.message, "duplicate key value violates unique constraint");

        let err = error_from_body(406, r#"{"code":"PGRST116","message":"0 rows"}"#.to_string());
        assert!(err.is_not_found());
    }

    #[test]
    fn test_error_body_falls_back_to_http_status() {
        let err = error_from_body(401, r#"{"message":"JWT expired"}"#.to_string());
        assert_eq!(err.code, "401");
        assert_eq!(err.message, "JWT expired");

        let err = error_from_body(500, r#"{"code":"XX000"}"#.to_string());
        assert_eq!(err.code, "XX000");
        assert_eq!(err.message, r#"{"code":"XX000"}"#);

        let err = error_from_body(502, "Bad Gateway".to_string());
        assert_eq!(err.code, "502");
        assert_eq!(err.message, "Bad Gateway");
    }

    #[test]
    fn test_trailing_slash_is_trimmed() {
        let store = PostgrestStore::new("https://example.supabase.co/", "anon");
        assert_eq!(store.endpoint(JOBS), "https://example.supabase.co/rest/v1/jobs");
    }
}
