pub mod copy;
pub mod imagery;
pub mod input;
pub mod publish;

use crate::config::{ConfigError, PipelineConfig};
use crate::llm::{CopyModel, GeminiClient, GeminiConfig, ImageModel};
use crate::models::{ImageSource, StageReport};
use crate::store::{ObjectStore, ProductTable};
use crate::supabase::SupabaseClient;
use serde_json::{Value, json};
use std::{future::Future, path::Path, sync::Arc, time::Instant};
use thiserror::Error;
use tracing::{info, warn};

/// The publish pipeline: normalize input, write copy, produce an image,
/// upload it and record the product. Stateless between runs.
#[derive(Clone)]
pub struct Pipeline {
    pub config: Arc<PipelineConfig>,
    copy_model: Arc<dyn CopyModel>,
    image_model: Arc<dyn ImageModel>,
    objects: Arc<dyn ObjectStore>,
    products: Arc<dyn ProductTable>,
}

#[derive(Debug, Clone)]
pub struct PublishOutcome {
    pub title: String,
    pub image_url: String,
    pub storage_key: String,
    pub image_source: ImageSource,
    pub stages: Vec<StageReport>,
}

impl Pipeline {
    pub fn new(
        config: PipelineConfig,
        copy_model: Arc<dyn CopyModel>,
        image_model: Arc<dyn ImageModel>,
        objects: Arc<dyn ObjectStore>,
        products: Arc<dyn ProductTable>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            copy_model,
            image_model,
            objects,
            products,
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        let config = PipelineConfig::from_env()?;
        let gemini = Arc::new(GeminiClient::new(GeminiConfig::from_env()?));
        let supabase = Arc::new(SupabaseClient::from_env()?);
        info!(
            target = "vitrine.pipeline",
            copy_model = %gemini.config().copy_model,
            remix_model = %gemini.config().remix_model,
            imagine_model = %gemini.config().imagine_model,
            supabase = %supabase.base_url(),
            bucket = %config.bucket,
            table = %config.table,
            regeneration = ?config.regeneration,
            "pipeline configured"
        );
        Ok(Self::new(
            config,
            gemini.clone(),
            gemini,
            supabase.clone(),
            supabase,
        ))
    }

    /// Runs the pipeline and returns the published product title.
    pub async fn process(&self, image_path: Option<&Path>, text: &str) -> Result<String, PipelineError> {
        self.run(image_path, text).await.map(|outcome| outcome.title)
    }

    pub async fn run(
        &self,
        image_path: Option<&Path>,
        text: &str,
    ) -> Result<PublishOutcome, PipelineError> {
        let mut stages = Vec::new();

        let request = self
            .capture_stage(input::STAGE, &mut stages, async {
                let request = input::normalize(image_path, text).await?;
                let output = json!({
                    "has_image": request.has_image(),
                    "mime_type": request.image.as_ref().map(|image| image.mime_type.clone()),
                    "text_chars": request.text.chars().count(),
                });
                Ok(StageOutcome::new(request, output))
            })
            .await?;

        let copy = self
            .capture_stage(copy::STAGE, &mut stages, async {
                let copy = copy::generate(self.copy_model.as_ref(), &request).await?;
                let output = json!({
                    "title": copy.title,
                    "tag": copy.tag,
                    "image_quality": copy.image_quality,
                });
                Ok(StageOutcome::new(copy, output))
            })
            .await?;

        let (image, image_source) = self
            .capture_stage(imagery::STAGE, &mut stages, async {
                let (image, source) = imagery::synthesize(
                    self.image_model.as_ref(),
                    &request,
                    &copy,
                    self.config.regeneration,
                )
                .await?;
                let output = json!({
                    "source": source,
                    "bytes": image.bytes.len(),
                    "mime_type": image.mime_type,
                });
                Ok(StageOutcome::new((image, source), output))
            })
            .await?;

        let object = self
            .capture_stage(publish::UPLOAD_STAGE, &mut stages, async {
                let object =
                    publish::upload(self.objects.as_ref(), &self.config.bucket, image).await?;
                let output = json!({ "key": object.key, "url": object.public_url });
                Ok(StageOutcome::new(object, output))
            })
            .await?;

        self.capture_stage(publish::INSERT_STAGE, &mut stages, async {
            let record =
                publish::insert(self.products.as_ref(), &self.config.table, &copy, &object).await?;
            let output = json!({ "table": self.config.table, "images": record.images });
            Ok(StageOutcome::new((), output))
        })
        .await?;

        info!(
            target = "vitrine.pipeline",
            title = %copy.title,
            key = %object.key,
            source = ?image_source,
            "product published"
        );

        Ok(PublishOutcome {
            title: copy.title,
            image_url: object.public_url,
            storage_key: object.key,
            image_source,
            stages,
        })
    }

    async fn capture_stage<T, Fut>(
        &self,
        name: &'static str,
        stages: &mut Vec<StageReport>,
        fut: Fut,
    ) -> Result<T, PipelineError>
    where
        Fut: Future<Output = Result<StageOutcome<T>, PipelineError>>,
    {
        let started = Instant::now();
        let outcome = match fut.await {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(
                    target = "vitrine.pipeline",
                    stage = name,
                    kind = err.kind().as_str(),
                    error = %err,
                    "stage_failed"
                );
                crate::metrics::stage_failed(name);
                return Err(err);
            }
        };
        let elapsed_ms = started.elapsed().as_millis();
        crate::metrics::stage_elapsed(name, elapsed_ms);
        stages.push(StageReport::new(name, elapsed_ms, outcome.output));
        Ok(outcome.value)
    }
}

#[derive(Debug, Error)]
#[error("stage `{stage}` failed: {message}")]
pub struct PipelineError {
    stage: &'static str,
    message: String,
    kind: PipelineErrorKind,
    raw: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineErrorKind {
    /// Neither a usable photo nor text.
    Input,
    /// Transport failure talking to the copy model.
    Generation,
    /// Copy model answered with something that is not the expected JSON.
    Parse,
    ImageGeneration,
    Upload,
    Database,
}

impl PipelineErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Input => "input_error",
            Self::Generation => "generation_error",
            Self::Parse => "parse_error",
            Self::ImageGeneration => "image_generation_error",
            Self::Upload => "upload_error",
            Self::Database => "database_error",
        }
    }
}

impl PipelineError {
    fn with_kind(stage: &'static str, kind: PipelineErrorKind, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            kind,
            raw: None,
        }
    }

    pub fn input(stage: &'static str, message: impl Into<String>) -> Self {
        Self::with_kind(stage, PipelineErrorKind::Input, message)
    }

    pub fn generation(stage: &'static str, message: impl Into<String>) -> Self {
        Self::with_kind(stage, PipelineErrorKind::Generation, message)
    }

    pub fn parse(stage: &'static str, message: impl Into<String>, raw: &str) -> Self {
        Self {
            raw: Some(raw.to_string()),
            ..Self::with_kind(stage, PipelineErrorKind::Parse, message)
        }
    }

    pub fn image_generation(stage: &'static str, message: impl Into<String>) -> Self {
        Self::with_kind(stage, PipelineErrorKind::ImageGeneration, message)
    }

    pub fn upload(stage: &'static str, message: impl Into<String>) -> Self {
        Self::with_kind(stage, PipelineErrorKind::Upload, message)
    }

    pub fn database(stage: &'static str, message: impl Into<String>) -> Self {
        Self::with_kind(stage, PipelineErrorKind::Database, message)
    }

    pub fn stage(&self) -> &'static str {
        self.stage
    }

    pub fn kind(&self) -> PipelineErrorKind {
        self.kind
    }

    pub fn detail(&self) -> &str {
        &self.message
    }

    /// Unparsed model output, for `Parse` errors.
    pub fn raw_output(&self) -> Option<&str> {
        self.raw.as_deref()
    }
}

#[derive(Debug)]
pub struct StageOutcome<T> {
    pub value: T,
    pub output: Value,
}

impl<T> StageOutcome<T> {
    fn new(value: T, output: Value) -> Self {
        Self { value, output }
    }
}
