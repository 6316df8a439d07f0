//! Recognition engines.
//!
//! A [`RecognitionEngine`] turns one raster page into text plus a confidence
//! score. The pipeline is written once against this trait. We have a local
//! engine wrapping the `tesseract` CLI, and a cloud engine which asks a
//! vision-capable model behind an OpenAI-compatible API.
//!
//! The cloud backend can also take over the _whole_ pipeline, reading the
//! original document and returning a finished record. That variant implements
//! [`DocumentExtractor`] directly instead.

use std::{sync::Arc, time::Duration};

use clap::{Args, ValueEnum};

use crate::{
    pipeline::{DocumentExtractor, ExtractionPipeline, PipelineOpts},
    prelude::*,
    rasterize::RasterPage,
    rate_limit::RateLimit,
};

use self::{
    cloud::{CloudClient, CloudDocumentExtractor, CloudPageEngine, CloudPrompt},
    tesseract::TesseractEngine,
};

pub mod cloud;
pub mod tesseract;

/// What an engine found on a page.
#[derive(Clone, Debug, PartialEq)]
pub struct PageRecognition {
    /// The transcribed text.
    pub text: String,

    /// How sure the engine is about `text`, from 0 to 100.
    pub confidence: f64,
}

/// Interface to a recognition engine.
///
/// Implementations must be safe to call concurrently, because the pipeline
/// may recognize several pages of a document at once.
#[async_trait]
pub trait RecognitionEngine: Send + Sync + 'static {
    /// Recognize the text on a single page.
    async fn recognize(&self, page: RasterPage) -> Result<PageRecognition>;
}

/// The engines we support.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[clap(rename_all = "kebab-case")]
pub enum EngineKind {
    /// Rasterize locally and recognize each page with `tesseract`.
    #[default]
    Tesseract,

    /// Rasterize locally and recognize each page with a cloud model.
    Cloud,

    /// Send the entire document to a cloud model, which returns the finished
    /// record.
    CloudDocument,
}

/// Options for choosing and configuring an engine.
#[derive(Args, Clone, Debug)]
pub struct EngineOpts {
    /// The recognition engine to use.
    #[clap(long, value_enum, default_value_t = EngineKind::default())]
    pub engine: EngineKind,

    /// The Tesseract language pack(s) to use, such as `eng` or `eng+fra`.
    #[clap(long, default_value = "eng")]
    pub language: String,

    /// The model to use with cloud engines.
    #[clap(long, default_value = cloud::DEFAULT_MODEL)]
    pub model: String,

    /// A TOML file with custom prompts for cloud engines.
    #[clap(long = "prompt")]
    pub prompt_path: Option<PathBuf>,

    /// A rate limit for cloud requests, of the form "10/s" or "600/m".
    #[clap(long)]
    pub rate_limit: Option<RateLimit>,

    /// A timeout, in seconds, for each cloud request.
    #[clap(long)]
    pub timeout: Option<u64>,
}

impl Default for EngineOpts {
    fn default() -> Self {
        Self {
            engine: EngineKind::default(),
            language: "eng".to_owned(),
            model: cloud::DEFAULT_MODEL.to_owned(),
            prompt_path: None,
            rate_limit: None,
            timeout: None,
        }
    }
}

impl EngineOpts {
    /// The per-request timeout, if any.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout.map(Duration::from_secs)
    }
}

/// Build a [`DocumentExtractor`] for the requested engine.
#[instrument(level = "debug", skip_all, fields(engine = ?engine_opts.engine))]
pub async fn document_extractor_for(
    engine_opts: &EngineOpts,
    pipeline_opts: &PipelineOpts,
) -> Result<Arc<dyn DocumentExtractor>> {
    let page_engine: Arc<dyn RecognitionEngine> = match engine_opts.engine {
        EngineKind::Tesseract => {
            Arc::new(TesseractEngine::new(engine_opts.language.clone()))
        }
        EngineKind::Cloud => {
            let client = CloudClient::from_env(engine_opts)?;
            let prompt = CloudPrompt::load(engine_opts.prompt_path.as_deref()).await?;
            Arc::new(CloudPageEngine::new(client, prompt))
        }
        EngineKind::CloudDocument => {
            let client = CloudClient::from_env(engine_opts)?;
            let prompt = CloudPrompt::load(engine_opts.prompt_path.as_deref()).await?;
            return Ok(Arc::new(CloudDocumentExtractor::new(client, prompt)));
        }
    };
    Ok(Arc::new(ExtractionPipeline::new(
        page_engine,
        pipeline_opts.clone(),
    )))
}
