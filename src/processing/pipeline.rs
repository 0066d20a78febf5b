//! Composable pre-upload pipeline.
//!
//! Stages run in order; each takes ownership of the image and returns the
//! next rendition. The first error aborts the whole run.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::compress::SizeCompressor;
use super::crop::CenterCrop;
use super::normalize::{CommandConverter, HeicConverter, HeicNormalizer};
use crate::config::GeneratorConfig;
use crate::error::AvatarResult;
use crate::selection::SelectedImage;

/// One transformation applied before upload.
#[async_trait]
pub trait ImageStage: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Transform the image.
    async fn apply(&self, image: SelectedImage) -> AvatarResult<SelectedImage>;
}

/// Ordered chain of [`ImageStage`]s.
#[derive(Clone, Default)]
pub struct ImagePipeline {
    stages: Vec<Arc<dyn ImageStage>>,
}

impl ImagePipeline {
    /// An empty pipeline; images pass through untouched.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stage(mut self, stage: impl ImageStage + 'static) -> Self {
        self.stages.push(Arc::new(stage));
        self
    }

    /// normalize -> crop -> compress, with the configured command converter.
    pub fn standard(config: &GeneratorConfig) -> Self {
        Self::with_converter(config, CommandConverter::from_config(&config.converter))
    }

    /// The standard chain with a caller-supplied HEIC converter.
    pub fn with_converter(config: &GeneratorConfig, converter: impl HeicConverter + 'static) -> Self {
        Self::new()
            .with_stage(HeicNormalizer::new(converter))
            .with_stage(CenterCrop)
            .with_stage(SizeCompressor::new(config.compression))
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub async fn run(&self, image: SelectedImage) -> AvatarResult<SelectedImage> {
        let mut current = image;
        for stage in &self.stages {
            let before = current.len();
            current = stage.apply(current).await?;
            debug!(
                stage = stage.name(),
                bytes_in = before,
                bytes_out = current.len(),
                mime = current.mime(),
                "stage done"
            );
        }
        Ok(current)
    }
}

impl std::fmt::Debug for ImagePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImagePipeline")
            .field("stages", &self.stage_names())
            .finish()
    }
}
