use crate::config::RegenerationPolicy;
use crate::llm::{ImageModel, InlineImage, LlmError};
use crate::models::{FinalImage, GeneratedCopy, ImageQuality, ImageSource, ProductRequest, SourceImage};
use crate::pipeline::PipelineError;
use thiserror::Error;
use tracing::{info, warn};

pub(crate) const STAGE: &str = "synthesize_image";

pub const STYLE_DIRECTIVE: &str =
    "modern minimalist background, soft lighting, centered, clean and professional";

/// Extension used for generated images whose MIME type is not recognized.
pub const GENERATED_EXTENSION: &str = "jpeg";

#[derive(Debug, Error)]
enum RemixFailure {
    #[error(transparent)]
    Model(#[from] LlmError),
    #[error("model returned no inline image")]
    NoImage,
}

pub fn imagine_prompt(copy: &GeneratedCopy) -> String {
    format!(
        "Create a high-resolution e-commerce product photo. Title: {}. Description: {}. \
         Style: {STYLE_DIRECTIVE}. The product must match the description exactly.",
        copy.title, copy.description
    )
}

pub fn remix_prompt(copy: &GeneratedCopy) -> String {
    format!(
        "Using the attached product photo as the reference, regenerate it as a commercial-quality \
         e-commerce product photo. Title: {}. Description: {}. Style: {STYLE_DIRECTIVE}. \
         Preserve the product's color, material, angle and structure 100% unchanged.",
        copy.title, copy.description
    )
}

/// Produces the image to publish. A failed remix falls back to the reference
/// photo; a failed imagine has nothing to fall back to.
pub async fn synthesize(
    model: &dyn ImageModel,
    request: &ProductRequest,
    copy: &GeneratedCopy,
    policy: RegenerationPolicy,
) -> Result<(FinalImage, ImageSource), PipelineError> {
    match &request.image {
        Some(reference)
            if policy == RegenerationPolicy::QualityGated
                && copy.image_quality == ImageQuality::Good =>
        {
            info!(target = "vitrine.pipeline", "reference_photo_kept_quality_good");
            Ok((original(reference), ImageSource::Original))
        }
        Some(reference) => match remix(model, reference, copy).await {
            Ok(image) => Ok((image, ImageSource::Remixed)),
            Err(err) => {
                warn!(
                    target = "vitrine.pipeline",
                    error = %err,
                    "remix_failed_using_original_photo"
                );
                Ok((original(reference), ImageSource::Original))
            }
        },
        None => imagine(model, copy)
            .await
            .map(|image| (image, ImageSource::Imagined)),
    }
}

async fn remix(
    model: &dyn ImageModel,
    reference: &SourceImage,
    copy: &GeneratedCopy,
) -> Result<FinalImage, RemixFailure> {
    let reference = InlineImage {
        bytes: reference.bytes.clone(),
        mime_type: reference.mime_type.clone(),
    };
    let image = model
        .remix(&remix_prompt(copy), &reference)
        .await?
        .ok_or(RemixFailure::NoImage)?;
    Ok(generated(image))
}

async fn imagine(model: &dyn ImageModel, copy: &GeneratedCopy) -> Result<FinalImage, PipelineError> {
    let output = model
        .imagine(&imagine_prompt(copy), 1)
        .await
        .map_err(|err| PipelineError::image_generation(STAGE, format!("imagine request failed: {err}")))?;

    match output.images.into_iter().next() {
        Some(image) => Ok(generated(image)),
        None if output.filtered_reasons.is_empty() => Err(PipelineError::image_generation(
            STAGE,
            "no image returned; likely a safety filter or exhausted quota",
        )),
        None => Err(PipelineError::image_generation(
            STAGE,
            format!(
                "no image returned; filtered: {}",
                output.filtered_reasons.join("; ")
            ),
        )),
    }
}

fn generated(image: InlineImage) -> FinalImage {
    let extension = match image.mime_type.as_str() {
        "image/png" => "png",
        "image/webp" => "webp",
        "image/jpeg" | "image/jpg" => GENERATED_EXTENSION,
        other => {
            warn!(
                target = "vitrine.pipeline",
                mime_type = other,
                "unlisted_generated_mime_type"
            );
            GENERATED_EXTENSION
        }
    };
    FinalImage {
        bytes: image.bytes,
        extension: extension.to_string(),
        mime_type: image.mime_type,
    }
}

fn original(reference: &SourceImage) -> FinalImage {
    FinalImage {
        bytes: reference.bytes.clone(),
        extension: reference.extension.clone(),
        mime_type: reference.mime_type.clone(),
    }
}
