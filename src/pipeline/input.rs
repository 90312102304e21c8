use crate::models::{ProductRequest, SourceImage};
use crate::pipeline::PipelineError;
use std::path::Path;

/// Caption used when a photo arrives without any text.
pub const DEFAULT_PHOTO_INSTRUCTION: &str = "Please analyze this product from the photo";

pub(crate) const STAGE: &str = "normalize_input";

pub async fn normalize(image_path: Option<&Path>, text: &str) -> Result<ProductRequest, PipelineError> {
    let image = match image_path {
        Some(path) if is_regular_file(path).await => Some(read_image(path).await?),
        _ => None,
    };

    let text = match (text.trim().is_empty(), image.is_some()) {
        (false, _) => text.to_string(),
        (true, true) => DEFAULT_PHOTO_INSTRUCTION.to_string(),
        (true, false) => {
            return Err(PipelineError::input(STAGE, "neither a photo nor a description was provided"));
        }
    };

    Ok(ProductRequest { image, text })
}

async fn is_regular_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|meta| meta.is_file())
        .unwrap_or(false)
}

async fn read_image(path: &Path) -> Result<SourceImage, PipelineError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|err| PipelineError::input(STAGE, format!("unable to read {}: {err}", path.display())))?;
    if bytes.is_empty() {
        return Err(PipelineError::input(STAGE, format!("{} is empty", path.display())));
    }
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default();
    Ok(SourceImage {
        mime_type: mime_for_extension(&extension).to_string(),
        bytes,
        extension,
    })
}

/// Unknown extensions are assumed to be jpeg-compatible.
pub fn mime_for_extension(extension: &str) -> &'static str {
    match extension.to_lowercase().as_str() {
        "png" => "image/png",
        "webp" => "image/webp",
        _ => "image/jpeg",
    }
}
