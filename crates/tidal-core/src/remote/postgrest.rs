//! Supabase/PostgREST implementation of the remote store.

use async_trait::async_trait;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::Deserialize;

use super::{RemoteResult, RemoteStore};
use crate::config::RemoteConfig;
use crate::models::{Payload, ID_FIELD};
use crate::taxonomy::{ErrorCategory, RemoteError, NO_ROWS_CODE};
use crate::util::compact_text;

/// Client for `{base}/rest/v1/{table}` endpoints.
#[derive(Clone)]
pub struct PostgrestRemoteStore {
    base_url: String,
    anon_key: String,
    access_token: Option<String>,
    client: reqwest::Client,
}

impl std::fmt::Debug for PostgrestRemoteStore {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("PostgrestRemoteStore")
            .field("base_url", &self.base_url)
            .field("anon_key", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

impl PostgrestRemoteStore {
    /// Build a client from a configured remote.
    ///
    /// Per-call deadlines are enforced by the sync engine, so the client
    /// itself has none.
    pub fn new(config: &RemoteConfig) -> Result<Self, String> {
        let base_url = config.base_url()?;
        let anon_key = config
            .anon_key
            .clone()
            .ok_or_else(|| "remote.anon_key is required".to_string())?;
        let client = reqwest::Client::builder()
            .build()
            .map_err(|error| format!("failed to build HTTP client: {error}"))?;

        Ok(Self {
            base_url,
            anon_key,
            access_token: config.access_token.clone(),
            client,
        })
    }

    fn table_url(&self, table: &str) -> String {
        format!(
            "{}/rest/v1/{}",
            self.base_url,
            urlencoding::encode(table.trim())
        )
    }

    fn record_url(&self, table: &str, record_id: &str) -> String {
        format!(
            "{}?{ID_FIELD}=eq.{}",
            self.table_url(table),
            urlencoding::encode(record_id)
        )
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        let bearer = self.access_token.as_deref().unwrap_or(&self.anon_key);
        request
            .header("apikey", &self.anon_key)
            .header("Authorization", format!("Bearer {bearer}"))
            .header("Accept", "application/json")
    }

    async fn send_rows(&self, request: RequestBuilder) -> RemoteResult<Vec<Payload>> {
        let response = self
            .authorized(request)
            .header("Prefer", "return=representation")
            .send()
            .await?;
        let response = ensure_success(response).await?;
        Ok(response.json::<Vec<Payload>>().await?)
    }
}

#[async_trait]
impl RemoteStore for PostgrestRemoteStore {
    async fn insert(&self, table: &str, payload: &Payload) -> RemoteResult<Payload> {
        let rows = self
            .send_rows(self.client.post(self.table_url(table)).json(payload))
            .await?;
        Ok(rows.into_iter().next().unwrap_or_else(|| payload.clone()))
    }

    async fn update(
        &self,
        table: &str,
        record_id: &str,
        payload: &Payload,
    ) -> RemoteResult<Payload> {
        let rows = self
            .send_rows(
                self.client
                    .patch(self.record_url(table, record_id))
                    .json(payload),
            )
            .await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| no_rows(table, record_id))
    }

    async fn delete(&self, table: &str, record_id: &str) -> RemoteResult<()> {
        let rows = self
            .send_rows(self.client.delete(self.record_url(table, record_id)))
            .await?;
        if rows.is_empty() {
            return Err(no_rows(table, record_id));
        }
        Ok(())
    }

    async fn get_by_id(&self, table: &str, record_id: &str) -> RemoteResult<Option<Payload>> {
        let url = format!("{}&select=*", self.record_url(table, record_id));
        let response = self.authorized(self.client.get(url)).send().await?;
        let response = ensure_success(response).await?;
        let rows = response.json::<Vec<Payload>>().await?;
        Ok(rows.into_iter().next())
    }
}

#[derive(Debug, Deserialize)]
struct PostgrestErrorBody {
    code: Option<String>,
    message: Option<String>,
    details: Option<String>,
}

async fn ensure_success(response: Response) -> RemoteResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(parse_api_error(status, &body))
}

fn parse_api_error(status: StatusCode, body: &str) -> RemoteError {
    if let Ok(payload) = serde_json::from_str::<PostgrestErrorBody>(body) {
        let message = payload
            .message
            .or(payload.details)
            .map(|message| compact_text(&message))
            .filter(|message| !message.is_empty())
            .unwrap_or_else(|| format!("HTTP {}", status.as_u16()));
        let error = RemoteError::http(status.as_u16(), message);
        return match payload.code {
            Some(code) => error.with_code(code),
            None => error,
        };
    }

    let trimmed = compact_text(body);
    if trimmed.is_empty() {
        RemoteError::http(status.as_u16(), format!("HTTP {}", status.as_u16()))
    } else {
        RemoteError::http(status.as_u16(), trimmed)
    }
}

fn no_rows(table: &str, record_id: &str) -> RemoteError {
    RemoteError::categorized(
        ErrorCategory::NotFound,
        format!("{table}/{record_id} does not exist"),
    )
    .with_code(NO_ROWS_CODE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::taxonomy::categorize_error;

    #[test]
    fn parses_postgrest_error_body() {
        let error = parse_api_error(
            StatusCode::CONFLICT,
            r#"{"code":"23505","message":"duplicate key value violates unique constraint","details":null}"#,
        );
        assert_eq!(error.status, Some(409));
        assert_eq!(error.code.as_deref(), Some("23505"));
        assert_eq!(categorize_error(&error), ErrorCategory::Validation);
        assert!(error.classify().is_unique_violation());
    }

    #[test]
    fn falls_back_to_raw_body() {
        let error = parse_api_error(StatusCode::BAD_GATEWAY, "upstream down");
        assert_eq!(error.message, "upstream down");
        assert_eq!(categorize_error(&error), ErrorCategory::Server);

        let empty = parse_api_error(StatusCode::TOO_MANY_REQUESTS, "");
        assert_eq!(empty.message, "HTTP 429");
        assert_eq!(categorize_error(&empty), ErrorCategory::RateLimit);
    }

    #[test]
    fn builds_filtered_urls() {
        let store = PostgrestRemoteStore::new(&RemoteConfig::new(
            "https://project.supabase.co/",
            "anon",
        ))
        .unwrap();
        assert_eq!(
            store.record_url("recipes", "a b"),
            "https://project.supabase.co/rest/v1/recipes?id=eq.a%20b"
        );
    }

    #[test]
    fn requires_anon_key() {
        let config = RemoteConfig {
            url: Some("https://project.supabase.co".to_string()),
            ..RemoteConfig::default()
        };
        assert!(PostgrestRemoteStore::new(&config).is_err());
    }

    #[test]
    fn missing_rows_classify_as_not_found() {
        let error = no_rows("recipes", "r1").classify();
        assert!(error.is_not_found());
        assert!(!error.retryable);
    }
}
