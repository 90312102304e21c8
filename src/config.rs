use std::env;
use thiserror::Error;

pub const DEFAULT_BUCKET: &str = "product-images";
pub const DEFAULT_TABLE: &str = "products";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),
    #[error("invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },
}

/// Whether a supplied reference photo is always re-rendered or only when the
/// copy model judged it unfit for a storefront.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RegenerationPolicy {
    #[default]
    Always,
    QualityGated,
}

impl RegenerationPolicy {
    pub fn parse(input: &str) -> Option<Self> {
        match input.trim().to_lowercase().as_str() {
            "always" => Some(Self::Always),
            "quality_gated" | "quality-gated" | "gated" => Some(Self::QualityGated),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub bucket: String,
    pub table: String,
    pub regeneration: RegenerationPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            bucket: DEFAULT_BUCKET.to_string(),
            table: DEFAULT_TABLE.to_string(),
            regeneration: RegenerationPolicy::Always,
        }
    }
}

impl PipelineConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let regeneration = match optional("REGENERATION_POLICY") {
            Some(raw) => RegenerationPolicy::parse(&raw).ok_or(ConfigError::Invalid {
                key: "REGENERATION_POLICY",
                value: raw,
            })?,
            None => RegenerationPolicy::default(),
        };
        Ok(Self {
            bucket: optional("PRODUCT_BUCKET").unwrap_or_else(|| DEFAULT_BUCKET.to_string()),
            table: optional("PRODUCT_TABLE").unwrap_or_else(|| DEFAULT_TABLE.to_string()),
            regeneration,
        })
    }
}

/// First non-blank value among `keys`, or `Missing` naming the primary key.
pub fn require(keys: &[&'static str]) -> Result<String, ConfigError> {
    keys.iter()
        .find_map(|key| optional(key))
        .ok_or(ConfigError::Missing(keys.first().copied().unwrap_or("<unnamed>")))
}

pub fn optional(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

pub fn parse_env_u64(key: &str, default: u64) -> u64 {
    optional(key)
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(default)
}
