use crate::models::ProductRecord;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },
}

/// Object storage for product images.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn upload(
        &self,
        bucket: &str,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<(), StoreError>;

    /// Publicly readable, non-expiring URL for `key`.
    fn public_url(&self, bucket: &str, key: &str) -> String;
}

#[async_trait]
pub trait ProductTable: Send + Sync {
    async fn insert(&self, table: &str, record: &ProductRecord) -> Result<(), StoreError>;
}
