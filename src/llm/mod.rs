pub mod gemini;

use async_trait::async_trait;
use thiserror::Error;

pub use gemini::{GeminiClient, GeminiConfig};

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("http error: {0}")]
    Http(String),
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// Binary image payload sent to or received from a model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineImage {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

#[derive(Debug, Clone, Default)]
pub struct ImagineOutput {
    pub images: Vec<InlineImage>,
    /// Safety-filter reasons for samples the service withheld.
    pub filtered_reasons: Vec<String>,
}

/// Text + vision model producing free-form text for a prompt.
#[async_trait]
pub trait CopyModel: Send + Sync {
    async fn generate_text(
        &self,
        prompt: &str,
        image: Option<&InlineImage>,
    ) -> Result<String, LlmError>;
}

#[async_trait]
pub trait ImageModel: Send + Sync {
    /// Re-render `reference` guided by `prompt`. `Ok(None)` means the model
    /// answered without any inline image part.
    async fn remix(
        &self,
        prompt: &str,
        reference: &InlineImage,
    ) -> Result<Option<InlineImage>, LlmError>;

    /// Text-to-image generation of `count` samples.
    async fn imagine(&self, prompt: &str, count: u32) -> Result<ImagineOutput, LlmError>;
}
