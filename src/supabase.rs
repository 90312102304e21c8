use crate::config::{ConfigError, require};
use crate::http::build_client;
use crate::models::ProductRecord;
use crate::store::{ObjectStore, ProductTable, StoreError};
use async_trait::async_trait;
use reqwest::{Client, Response};
use tracing::debug;
use urlencoding::encode;

#[derive(Debug, Clone)]
pub struct SupabaseClient {
    base_url: String,
    service_key: String,
    http: Client,
}

impl SupabaseClient {
    pub fn new(base_url: impl Into<String>, service_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            service_key: service_key.into(),
            http: build_client(),
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        let base_url = require(&["SUPABASE_URL", "VITE_SUPABASE_URL"])?;
        let service_key = require(&[
            "SUPABASE_SERVICE_ROLE_KEY",
            "SUPABASE_SERVICE_KEY",
            "SUPABASE_KEY",
        ])?;
        Ok(Self::new(base_url, service_key))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn object_path(bucket: &str, key: &str) -> String {
        format!("{}/{}", encode(bucket), encode(key))
    }
}

async fn check_status(response: Response) -> Result<(), StoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    let body = response.text().await.unwrap_or_default();
    Err(StoreError::Status {
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl ObjectStore for SupabaseClient {
    async fn upload(
        &self,
        bucket: &str,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<(), StoreError> {
        let url = format!(
            "{}/storage/v1/object/{}",
            self.base_url,
            Self::object_path(bucket, key)
        );
        debug!(target = "vitrine.supabase", bucket, key, size = bytes.len(), "storage_upload");
        // Sent once: a repeat after an ambiguous failure would hit `x-upsert: false`.
        let response = self
            .http
            .post(&url)
            .header("apikey", &self.service_key)
            .bearer_auth(&self.service_key)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .header("x-upsert", "false")
            .body(bytes)
            .send()
            .await
            .map_err(|err| StoreError::Request(err.to_string()))?;
        check_status(response).await
    }

    fn public_url(&self, bucket: &str, key: &str) -> String {
        format!(
            "{}/storage/v1/object/public/{}",
            self.base_url,
            Self::object_path(bucket, key)
        )
    }
}

#[async_trait]
impl ProductTable for SupabaseClient {
    async fn insert(&self, table: &str, record: &ProductRecord) -> Result<(), StoreError> {
        let url = format!("{}/rest/v1/{}", self.base_url, encode(table));
        let rows = [record];
        // Not retried: the row may already be committed when the response is lost.
        let response = self
            .http
            .post(&url)
            .header("apikey", &self.service_key)
            .bearer_auth(&self.service_key)
            .header("Prefer", "return=minimal")
            .json(&rows)
            .send()
            .await
            .map_err(|err| StoreError::Request(err.to_string()))?;
        check_status(response).await
    }
}
