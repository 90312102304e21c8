use crate::llm::{CopyModel, InlineImage};
use crate::models::{GeneratedCopy, ProductRequest};
use crate::pipeline::PipelineError;

pub(crate) const STAGE: &str = "generate_copy";

const COPY_INSTRUCTION: &str = r#"You are an experienced e-commerce merchandiser. Do two things:
1. Using the photo (if any) and the seller's note, write the product copy.
2. Judge whether the photo can be used as-is on a storefront (clean white background or professional studio shot -> good; casual phone snapshot or cluttered background -> bad). Without a photo answer bad.

Return strict JSON only. Do not wrap it in Markdown or code fences such as ```json.
{
  "title": "short, minimal product title",
  "description": "main features and use cases, at most 150 characters",
  "tag": "category tag",
  "image_quality": "good or bad"
}"#;

pub fn build_prompt(text: &str) -> String {
    format!("{COPY_INSTRUCTION}\n\nSeller's note: {text}")
}

pub async fn generate(
    model: &dyn CopyModel,
    request: &ProductRequest,
) -> Result<GeneratedCopy, PipelineError> {
    let prompt = build_prompt(&request.text);
    let image = request.image.as_ref().map(|source| InlineImage {
        bytes: source.bytes.clone(),
        mime_type: source.mime_type.clone(),
    });
    let raw = model
        .generate_text(&prompt, image.as_ref())
        .await
        .map_err(|err| PipelineError::generation(STAGE, err.to_string()))?;
    parse(&raw)
}

/// Parses the model's answer, tolerating a surrounding code fence only.
pub fn parse(raw: &str) -> Result<GeneratedCopy, PipelineError> {
    let body = strip_code_fence(raw);
    let copy: GeneratedCopy = serde_json::from_str(body).map_err(|err| {
        PipelineError::parse(STAGE, format!("model returned malformed JSON: {err}"), raw)
    })?;
    if copy.title.trim().is_empty() {
        return Err(PipelineError::parse(STAGE, "title is empty", raw));
    }
    if copy.description.trim().is_empty() {
        return Err(PipelineError::parse(STAGE, "description is empty", raw));
    }
    Ok(copy)
}

pub fn strip_code_fence(input: &str) -> &str {
    let trimmed = input.trim();
    let Some(body) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = match body.get(..4) {
        Some(tag) if tag.eq_ignore_ascii_case("json") => &body[4..],
        _ => body,
    };
    body.strip_suffix("```").unwrap_or(body).trim()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LlmError;
    use crate::models::{ImageQuality, SourceImage};
    use crate::pipeline::PipelineErrorKind;
    use async_trait::async_trait;
    use std::sync::Mutex;

    const MUG: &str = r#"{"title":"Blue Ceramic Mug","description":"Glazed stoneware mug.","tag":"Home","image_quality":"bad"}"#;

    #[test]
    fn fenced_and_bare_json_parse_identically() {
        let fenced = format!("```json\n{MUG}\n```");
        let plain_fence = format!("```\n{MUG}\n```");
        let bare = parse(MUG).expect("bare");
        assert_eq!(parse(&fenced).expect("fenced"), bare);
        assert_eq!(parse(&plain_fence).expect("plain fence"), bare);
        assert_eq!(bare.title, "Blue Ceramic Mug");
        assert_eq!(bare.image_quality, ImageQuality::Bad);
    }

    #[test]
    fn fence_stripping_handles_single_line_and_uppercase_tag() {
        assert_eq!(strip_code_fence("```JSON{\"a\":1}```"), "{\"a\":1}");
        assert_eq!(strip_code_fence("  {\"a\":1}  "), "{\"a\":1}");
    }

    #[test]
    fn non_json_is_a_parse_error_with_raw_text() {
        let raw = "Sure! Here is a lovely mug title: Blue Mug";
        let err = parse(raw).expect_err("not json");
        assert_eq!(err.kind(), PipelineErrorKind::Parse);
        assert_eq!(err.raw_output(), Some(raw));
    }

    #[test]
    fn blank_title_is_rejected() {
        let err = parse(r#"{"title":"  ","description":"x"}"#).expect_err("blank title");
        assert_eq!(err.kind(), PipelineErrorKind::Parse);
        assert!(err.detail().contains("title"));
    }

    #[test]
    fn prompt_embeds_seller_note_and_forbids_fences() {
        let prompt = build_prompt("blue ceramic mug");
        assert!(prompt.ends_with("Seller's note: blue ceramic mug"));
        assert!(prompt.contains("Do not wrap it in Markdown"));
        assert!(prompt.contains("150 characters"));
    }

    struct RecordingModel {
        reply: Result<String, ()>,
        saw_image: Mutex<Option<bool>>,
    }

    #[async_trait]
    impl CopyModel for RecordingModel {
        async fn generate_text(
            &self,
            _prompt: &str,
            image: Option<&InlineImage>,
        ) -> Result<String, LlmError> {
            *self.saw_image.lock().unwrap() = Some(image.is_some());
            self.reply
                .clone()
                .map_err(|_| LlmError::Http("connection reset".into()))
        }
    }

    #[tokio::test]
    async fn generate_attaches_photo_when_present() {
        let model = RecordingModel {
            reply: Ok(format!("```json\n{MUG}\n```")),
            saw_image: Mutex::new(None),
        };
        let request = ProductRequest {
            image: Some(SourceImage {
                bytes: vec![1, 2, 3],
                mime_type: "image/jpeg".into(),
                extension: "jpg".into(),
            }),
            text: "mug".into(),
        };
        let copy = generate(&model, &request).await.expect("copy");
        assert_eq!(copy.tag, "Home");
        assert_eq!(*model.saw_image.lock().unwrap(), Some(true));
    }

    #[tokio::test]
    async fn transport_failure_is_a_generation_error() {
        let model = RecordingModel {
            reply: Err(()),
            saw_image: Mutex::new(None),
        };
        let request = ProductRequest {
            image: None,
            text: "mug".into(),
        };
        let err = generate(&model, &request).await.expect_err("transport");
        assert_eq!(err.kind(), PipelineErrorKind::Generation);
        assert!(err.detail().contains("connection reset"));
    }
}
