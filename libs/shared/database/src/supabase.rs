use anyhow::{Result, anyhow};
use reqwest::{
    Client,
    header::{HeaderMap, HeaderValue, CONTENT_TYPE, AUTHORIZATION},
    Method,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error};

use shared_config::AppConfig;

/// Typed failure carried inside the `anyhow::Error` returned by
/// [`SupabaseClient::request`], so callers can classify it with `downcast_ref`.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SupabaseError {
    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Invalid header value: {0}")]
    InvalidHeader(String),
}

impl SupabaseError {
    pub fn is_auth(&self) -> bool {
        matches!(self, SupabaseError::Auth(_))
    }
}

#[derive(Clone)]
pub struct SupabaseClient {
    client: Client,
    base_url: String,
    anon_key: String,
}

impl SupabaseClient {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: config.supabase_url.trim_end_matches('/').to_string(),
            anon_key: config.supabase_anon_key.clone(),
        }
    }

    fn get_headers(&self, auth_token: Option<&str>) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();

        headers.insert(
            "apikey",
            HeaderValue::from_str(&self.anon_key)
                .map_err(|e| SupabaseError::InvalidHeader(e.to_string()))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        if let Some(token) = auth_token {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {}", token))
                    .map_err(|e| SupabaseError::InvalidHeader(e.to_string()))?,
            );
        }

        Ok(headers)
    }

    pub async fn request<T>(&self, method: Method, path: &str,
                            auth_token: Option<&str>, body: Option<Value>)
                            -> Result<T>
    where T: DeserializeOwned {
        self.request_with_headers(method, path, auth_token, body, None).await
    }

    pub async fn request_with_headers<T>(
        &self,
        method: Method,
        path: &str,
        auth_token: Option<&str>,
        body: Option<Value>,
        extra_headers: Option<HeaderMap>,
    ) -> Result<T>
    where T: DeserializeOwned {
        let url = format!("{}{}", self.base_url, path);
        debug!("Making {} request to {}", method, url);

        let mut headers = self.get_headers(auth_token)?;
        if let Some(extra) = extra_headers {
            headers.extend(extra);
        }

        let mut req = self.client.request(method, &url)
            .headers(headers);

        if let Some(body_data) = body {
            req = req.json(&body_data);
        }

        let response = req.send().await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await?;
            error!("API error ({}): {}", status, error_text);

            return Err(match status.as_u16() {
                401 | 403 => SupabaseError::Auth(error_text).into(),
                404 => SupabaseError::NotFound(error_text).into(),
                code => SupabaseError::Api { status: code, message: error_text }.into(),
            });
        }

        // PostgREST answers 204 with an empty body unless asked for a representation
        let bytes = response.bytes().await?;
        let data = if bytes.is_empty() {
            serde_json::from_value(Value::Null)?
        } else {
            serde_json::from_slice(&bytes)?
        };
        Ok(data)
    }

    /// Writes rows and returns the stored representation.
    pub async fn insert(&self, table: &str, auth_token: Option<&str>, body: Value) -> Result<Vec<Value>> {
        self.request_with_headers(
            Method::POST,
            &format!("/rest/v1/{}", table),
            auth_token,
            Some(body),
            Some(Self::representation_headers()),
        ).await
    }

    /// Insert that merges into the existing row when `on_conflict` matches,
    /// so replaying the same write is harmless.
    pub async fn upsert(&self, table: &str, on_conflict: &str, auth_token: Option<&str>, body: Value) -> Result<Vec<Value>> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "Prefer",
            HeaderValue::from_static("resolution=merge-duplicates,return=representation"),
        );
        self.request_with_headers(
            Method::POST,
            &format!("/rest/v1/{}?on_conflict={}", table, on_conflict),
            auth_token,
            Some(body),
            Some(headers),
        ).await
    }

    pub async fn update(&self, table: &str, filter: &str, auth_token: Option<&str>, body: Value) -> Result<Vec<Value>> {
        self.request_with_headers(
            Method::PATCH,
            &format!("/rest/v1/{}?{}", table, filter),
            auth_token,
            Some(body),
            Some(Self::representation_headers()),
        ).await
    }

    pub async fn select(&self, table: &str, query: &str, auth_token: Option<&str>) -> Result<Vec<Value>> {
        let path = if query.is_empty() {
            format!("/rest/v1/{}", table)
        } else {
            format!("/rest/v1/{}?{}", table, query)
        };
        self.request(Method::GET, &path, auth_token, None).await
    }

    /// Calls a server-side edge function.
    pub async fn invoke_function(&self, name: &str, auth_token: Option<&str>, body: Value) -> Result<Value> {
        let path = format!("/functions/v1/{}", name);
        self.request(Method::POST, &path, auth_token, Some(body)).await
    }

    /// Cheap reachability probe against the REST root.
    pub async fn health_check(&self, auth_token: Option<&str>) -> Result<()> {
        let url = format!("{}/rest/v1/", self.base_url);
        let response = self.client
            .get(&url)
            .headers(self.get_headers(auth_token)?)
            .send()
            .await?;

        if response.status().is_server_error() {
            return Err(anyhow!("Health check failed with status {}", response.status()));
        }
        Ok(())
    }

    pub fn get_base_url(&self) -> &str {
        &self.base_url
    }

    // Method to get public URL for a storage path
    pub fn get_public_url(&self, storage_path: &str) -> String {
        format!("{}{}", self.base_url, storage_path)
    }

    fn representation_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("Prefer", HeaderValue::from_static("return=representation"));
        headers
    }
}

/// Percent-encodes a value for use inside a PostgREST filter.
pub fn encode_filter_value(value: &str) -> String {
    let mut encoded = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                encoded.push(byte as char)
            }
            _ => encoded.push_str(&format!("%{:02X}", byte)),
        }
    }
    encoded
}
