use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Seed counters written with every new product row.
pub const SEED_FAV: i64 = 300;
pub const SEED_VIEWS: i64 = 3000;
pub const SEED_SORT_ORDER: i64 = 0;

pub const DEFAULT_TAG: &str = "Uncategorized";

/// Photo supplied with a request, read fully into memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceImage {
    pub bytes: Vec<u8>,
    pub mime_type: String,
    /// Lowercased file extension of the source path, empty when it had none.
    pub extension: String,
}

#[derive(Debug, Clone)]
pub struct ProductRequest {
    pub image: Option<SourceImage>,
    pub text: String,
}

impl ProductRequest {
    pub fn has_image(&self) -> bool {
        self.image.is_some()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageQuality {
    Good,
    #[default]
    Bad,
}

impl ImageQuality {
    fn from_label(label: &str) -> Self {
        if label.trim().eq_ignore_ascii_case("good") {
            Self::Good
        } else {
            Self::Bad
        }
    }
}

fn quality_from_label<'de, D>(deserializer: D) -> Result<ImageQuality, D::Error>
where
    D: Deserializer<'de>,
{
    let label = Option::<String>::deserialize(deserializer)?;
    Ok(label
        .as_deref()
        .map(ImageQuality::from_label)
        .unwrap_or_default())
}

fn default_tag() -> String {
    DEFAULT_TAG.to_string()
}

fn tag_or_default<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let tag = Option::<String>::deserialize(deserializer)?;
    Ok(tag
        .map(|tag| tag.trim().to_string())
        .filter(|tag| !tag.is_empty())
        .unwrap_or_else(default_tag))
}

/// Marketing copy returned by the copy model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedCopy {
    pub title: String,
    pub description: String,
    #[serde(default = "default_tag", deserialize_with = "tag_or_default")]
    pub tag: String,
    #[serde(default, deserialize_with = "quality_from_label")]
    pub image_quality: ImageQuality,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageSource {
    Remixed,
    Imagined,
    Original,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalImage {
    pub bytes: Vec<u8>,
    pub extension: String,
    pub mime_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StorageObject {
    pub key: String,
    pub public_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProductRecord {
    pub title: String,
    pub description: String,
    pub images: Vec<String>,
    pub tag: String,
    pub fav: i64,
    pub views: i64,
    pub sort_order: i64,
}

impl ProductRecord {
    pub fn seeded(title: String, description: String, tag: String, image_url: String) -> Self {
        Self {
            title,
            description,
            images: vec![image_url],
            tag,
            fav: SEED_FAV,
            views: SEED_VIEWS,
            sort_order: SEED_SORT_ORDER,
        }
    }
}

#[derive(Debug, Serialize, Clone)]
pub struct StageReport {
    pub name: String,
    pub elapsed_ms: u128,
    pub timestamp: DateTime<Utc>,
    pub output: Value,
}

impl StageReport {
    pub fn new(name: &str, elapsed_ms: u128, output: Value) -> Self {
        Self {
            name: name.to_string(),
            elapsed_ms,
            timestamp: Utc::now(),
            output,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PublishResponse {
    pub request_id: String,
    pub title: String,
    pub image_url: String,
    pub image_source: ImageSource,
    pub message: String,
    pub stages: Vec<StageReport>,
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}
