use crate::config::{ConfigError, optional, require};
use crate::http::{build_client, send_with_retry};
use crate::llm::{CopyModel, ImageModel, ImagineOutput, InlineImage, LlmError};
use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use reqwest::Client;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_with::skip_serializing_none;
use tracing::debug;

pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_COPY_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_REMIX_MODEL: &str = "gemini-2.5-flash-image";
pub const DEFAULT_IMAGINE_MODEL: &str = "imagen-4.0-generate-001";

const ERROR_BODY_LIMIT: usize = 500;

#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_base: String,
    pub api_key: String,
    pub copy_model: String,
    pub remix_model: String,
    pub imagine_model: String,
}

impl GeminiConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            api_key: api_key.into(),
            copy_model: DEFAULT_COPY_MODEL.to_string(),
            remix_model: DEFAULT_REMIX_MODEL.to_string(),
            imagine_model: DEFAULT_IMAGINE_MODEL.to_string(),
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::new(require(&["GEMINI_API_KEY"])?);
        Ok(Self {
            api_base: optional("GEMINI_API_BASE")
                .map(|base| base.trim_end_matches('/').to_string())
                .unwrap_or(defaults.api_base),
            copy_model: optional("GEMINI_COPY_MODEL").unwrap_or(defaults.copy_model),
            remix_model: optional("GEMINI_REMIX_MODEL").unwrap_or(defaults.remix_model),
            imagine_model: optional("GEMINI_IMAGINE_MODEL").unwrap_or(defaults.imagine_model),
            api_key: defaults.api_key,
        })
    }
}

/// Gemini REST client backing both the copy and the image model seams.
pub struct GeminiClient {
    http: Client,
    config: GeminiConfig,
}

impl GeminiClient {
    pub fn new(config: GeminiConfig) -> Self {
        Self {
            http: build_client(),
            config,
        }
    }

    pub fn config(&self) -> &GeminiConfig {
        &self.config
    }

    async fn call<B, R>(&self, model: &str, method: &str, body: &B) -> Result<R, LlmError>
    where
        B: Serialize + Sync,
        R: DeserializeOwned,
    {
        let url = format!("{}/models/{model}:{method}", self.config.api_base);
        debug!(target = "vitrine.llm", model, method, "gemini_request");
        let response = send_with_retry("gemini", || {
            self.http
                .post(&url)
                .header("x-goog-api-key", &self.config.api_key)
                .json(body)
        })
        .await
        .map_err(|err| LlmError::Http(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Status {
                status: status.as_u16(),
                body: truncate(&body, ERROR_BODY_LIMIT),
            });
        }

        response
            .json()
            .await
            .map_err(|err| LlmError::InvalidResponse(err.to_string()))
    }
}

#[async_trait]
impl CopyModel for GeminiClient {
    async fn generate_text(
        &self,
        prompt: &str,
        image: Option<&InlineImage>,
    ) -> Result<String, LlmError> {
        let body = GenerateContentRequest::user(prompt, image, None);
        let payload: GenerateContentResponse =
            self.call(&self.config.copy_model, "generateContent", &body).await?;

        let text = payload
            .first_parts()
            .iter()
            .filter_map(|part| part.text.as_deref())
            .collect::<String>();
        if text.trim().is_empty() {
            return Err(LlmError::InvalidResponse(payload.empty_reason("missing text")));
        }
        Ok(text)
    }
}

#[async_trait]
impl ImageModel for GeminiClient {
    async fn remix(
        &self,
        prompt: &str,
        reference: &InlineImage,
    ) -> Result<Option<InlineImage>, LlmError> {
        let body = GenerateContentRequest::user(
            prompt,
            Some(reference),
            Some(GenerationConfig {
                response_modalities: vec!["IMAGE", "TEXT"],
            }),
        );
        let payload: GenerateContentResponse =
            self.call(&self.config.remix_model, "generateContent", &body).await?;

        let Some(inline) = payload
            .first_parts()
            .iter()
            .find_map(|part| part.inline_data.as_ref())
        else {
            return Ok(None);
        };
        let bytes = BASE64
            .decode(&inline.data)
            .map_err(|err| LlmError::InvalidResponse(format!("inline image: {err}")))?;
        Ok(Some(InlineImage {
            bytes,
            mime_type: inline
                .mime_type
                .clone()
                .unwrap_or_else(|| "image/png".to_string()),
        }))
    }

    async fn imagine(&self, prompt: &str, count: u32) -> Result<ImagineOutput, LlmError> {
        let body = PredictRequest {
            instances: vec![PredictInstance { prompt }],
            parameters: PredictParameters {
                sample_count: count,
                include_rai_reason: true,
            },
        };
        let payload: PredictResponse =
            self.call(&self.config.imagine_model, "predict", &body).await?;

        let mut output = ImagineOutput::default();
        for prediction in payload.predictions {
            if let Some(encoded) = prediction.bytes_base64_encoded {
                let bytes = BASE64
                    .decode(encoded)
                    .map_err(|err| LlmError::InvalidResponse(format!("imagen bytes: {err}")))?;
                output.images.push(InlineImage {
                    bytes,
                    mime_type: prediction
                        .mime_type
                        .unwrap_or_else(|| "image/png".to_string()),
                });
            } else if let Some(reason) = prediction.rai_filtered_reason {
                output.filtered_reasons.push(reason);
            }
        }
        Ok(output)
    }
}

fn truncate(value: &str, limit: usize) -> String {
    if value.chars().count() <= limit {
        return value.to_string();
    }
    let head: String = value.chars().take(limit).collect();
    format!("{head}...")
}

#[skip_serializing_none]
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: Vec<RequestContent<'a>>,
    generation_config: Option<GenerationConfig>,
}

impl<'a> GenerateContentRequest<'a> {
    fn user(
        prompt: &'a str,
        image: Option<&InlineImage>,
        generation_config: Option<GenerationConfig>,
    ) -> Self {
        let mut parts = vec![RequestPart::Text { text: prompt }];
        if let Some(image) = image {
            parts.push(RequestPart::InlineData {
                inline_data: RequestInlineData {
                    mime_type: image.mime_type.clone(),
                    data: BASE64.encode(&image.bytes),
                },
            });
        }
        Self {
            contents: vec![RequestContent {
                role: "user",
                parts,
            }],
            generation_config,
        }
    }
}

#[derive(Debug, Serialize)]
struct RequestContent<'a> {
    role: &'static str,
    parts: Vec<RequestPart<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum RequestPart<'a> {
    Text {
        text: &'a str,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: RequestInlineData,
    },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RequestInlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_modalities: Vec<&'static str>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

impl GenerateContentResponse {
    fn first_parts(&self) -> &[ResponsePart] {
        self.candidates
            .first()
            .and_then(|candidate| candidate.content.as_ref())
            .map(|content| content.parts.as_slice())
            .unwrap_or_default()
    }

    fn empty_reason(&self, fallback: &str) -> String {
        if let Some(reason) = self
            .prompt_feedback
            .as_ref()
            .and_then(|feedback| feedback.block_reason.as_deref())
        {
            return format!("prompt blocked: {reason}");
        }
        match self
            .candidates
            .first()
            .and_then(|candidate| candidate.finish_reason.as_deref())
        {
            Some(reason) => format!("{fallback} (finish reason {reason})"),
            None => fallback.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<ResponseContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    inline_data: Option<ResponseInlineData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponseInlineData {
    #[serde(default)]
    mime_type: Option<String>,
    data: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

#[derive(Debug, Serialize)]
struct PredictRequest<'a> {
    instances: Vec<PredictInstance<'a>>,
    parameters: PredictParameters,
}

#[derive(Debug, Serialize)]
struct PredictInstance<'a> {
    prompt: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PredictParameters {
    sample_count: u32,
    include_rai_reason: bool,
}

#[derive(Debug, Deserialize)]
struct PredictResponse {
    #[serde(default)]
    predictions: Vec<Prediction>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Prediction {
    #[serde(default)]
    bytes_base64_encoded: Option<String>,
    #[serde(default)]
    mime_type: Option<String>,
    #[serde(default)]
    rai_filtered_reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use serde_json::json;

    fn client_for(server: &mockito::ServerGuard) -> GeminiClient {
        let mut config = GeminiConfig::new("test-key");
        config.api_base = server.url();
        GeminiClient::new(config)
    }

    fn png() -> InlineImage {
        InlineImage {
            bytes: b"abc".to_vec(),
            mime_type: "image/png".into(),
        }
    }

    #[tokio::test]
    async fn generate_text_sends_image_and_joins_text_parts() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/models/gemini-2.5-flash:generateContent")
            .match_header("x-goog-api-key", "test-key")
            .match_body(Matcher::AllOf(vec![
                Matcher::Regex("describe it".into()),
                Matcher::Regex("\"data\":\"YWJj\"".into()),
                Matcher::Regex("\"mimeType\":\"image/png\"".into()),
            ]))
            .with_status(200)
            .with_body(
                json!({
                    "candidates": [{
                        "content": {"parts": [{"text": "{\"title\":"}, {"text": "\"Mug\"}"}]}
                    }]
                })
                .to_string(),
            )
            .create_async()
            .await;

        let text = client_for(&server)
            .generate_text("describe it", Some(&png()))
            .await
            .expect("text");
        assert_eq!(text, "{\"title\":\"Mug\"}");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn generate_text_reports_block_reason_when_empty() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/models/gemini-2.5-flash:generateContent")
            .with_status(200)
            .with_body(json!({"promptFeedback": {"blockReason": "SAFETY"}}).to_string())
            .create_async()
            .await;

        let err = client_for(&server)
            .generate_text("describe it", None)
            .await
            .expect_err("blocked");
        assert!(err.to_string().contains("SAFETY"));
    }

    #[tokio::test]
    async fn remix_requests_image_modality_and_decodes_first_inline_part() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/models/gemini-2.5-flash-image:generateContent")
            .match_body(Matcher::Regex("\"responseModalities\":\\[\"IMAGE\",\"TEXT\"\\]".into()))
            .with_status(200)
            .with_body(
                json!({
                    "candidates": [{
                        "content": {"parts": [
                            {"text": "here you go"},
                            {"inlineData": {"mimeType": "image/png", "data": "eHl6"}},
                            {"inlineData": {"mimeType": "image/png", "data": "cXFx"}}
                        ]}
                    }]
                })
                .to_string(),
            )
            .create_async()
            .await;

        let image = client_for(&server)
            .remix("polish it", &png())
            .await
            .expect("remix")
            .expect("inline image");
        assert_eq!(image.bytes, b"xyz");
        assert_eq!(image.mime_type, "image/png");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn remix_without_inline_part_yields_none() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/models/gemini-2.5-flash-image:generateContent")
            .with_status(200)
            .with_body(
                json!({"candidates": [{"content": {"parts": [{"text": "sorry"}]}}]}).to_string(),
            )
            .create_async()
            .await;

        let image = client_for(&server)
            .remix("polish it", &png())
            .await
            .expect("remix");
        assert!(image.is_none());
    }

    #[tokio::test]
    async fn imagine_collects_images_and_filter_reasons() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/models/imagen-4.0-generate-001:predict")
            .match_body(Matcher::PartialJson(json!({
                "instances": [{"prompt": "a mug"}],
                "parameters": {"sampleCount": 1, "includeRaiReason": true}
            })))
            .with_status(200)
            .with_body(
                json!({
                    "predictions": [
                        {"bytesBase64Encoded": "eHl6", "mimeType": "image/jpeg"},
                        {"raiFilteredReason": "blocked by safety filter"}
                    ]
                })
                .to_string(),
            )
            .create_async()
            .await;

        let output = client_for(&server).imagine("a mug", 1).await.expect("imagine");
        assert_eq!(output.images.len(), 1);
        assert_eq!(output.images[0].bytes, b"xyz");
        assert_eq!(output.images[0].mime_type, "image/jpeg");
        assert_eq!(output.filtered_reasons, vec!["blocked by safety filter"]);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn quota_errors_surface_status_and_body() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/models/imagen-4.0-generate-001:predict")
            .with_status(429)
            .with_body("RESOURCE_EXHAUSTED")
            .create_async()
            .await;

        let err = client_for(&server)
            .imagine("a mug", 1)
            .await
            .expect_err("quota");
        match err {
            LlmError::Status { status, body } => {
                assert_eq!(status, 429);
                assert!(body.contains("RESOURCE_EXHAUSTED"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
