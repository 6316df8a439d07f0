//! The extraction pipeline: from document bytes to a finished
//! [`ExtractedData`] record.

use std::sync::Arc;

use clap::Args;
use schemars::JsonSchema;

use crate::{
    aggregate::{AggregatedText, aggregate_pages},
    async_utils::BoxedStream,
    engines::RecognitionEngine,
    entities::{Entities, extract_entities},
    errors::ExtractionError,
    prelude::*,
    rasterize::{RasterPage, RasterizeOpts, rasterize},
    recognize::{ProgressListener, recognize_pages},
    summary::{SummaryOpts, generate_summary},
};

/// Everything we extracted from a document.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedData {
    /// The full text of the document, pages separated by blank lines.
    pub raw_text: String,

    /// A short summary quoting the first few sentences.
    pub summary: String,

    /// Dates, names and case numbers found in `raw_text`.
    pub entities: Entities,

    /// Mean recognition confidence, from 0 to 100.
    pub confidence_score: u8,
}

impl ExtractedData {
    /// Mine aggregated text and build the final record.
    fn from_aggregated(aggregated: AggregatedText, summary_opts: &SummaryOpts) -> Self {
        let MinedText { summary, entities } = mine_text(&aggregated.raw_text, summary_opts);
        Self {
            raw_text: aggregated.raw_text,
            summary,
            entities,
            confidence_score: aggregated.confidence_score,
        }
    }
}

/// The summary and entities of already-transcribed text.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MinedText {
    /// The first few substantial sentences of the text.
    pub summary: String,

    /// Dates, names and case numbers found in the text.
    pub entities: Entities,
}

/// Summarize `text` and extract its entities. This never fails.
pub fn mine_text(text: &str, summary_opts: &SummaryOpts) -> MinedText {
    MinedText {
        summary: generate_summary(text, summary_opts),
        entities: extract_entities(text),
    }
}

/// Something which can turn a whole document into an [`ExtractedData`]
/// record.
///
/// Usually this is an [`ExtractionPipeline`] wrapping a page-level engine,
/// but a backend may also handle entire documents by itself.
#[async_trait]
pub trait DocumentExtractor: Send + Sync + 'static {
    /// Extract a document. `media_type` may be empty if unknown.
    async fn extract(
        &self,
        data: Vec<u8>,
        media_type: &str,
        progress: &dyn ProgressListener,
    ) -> Result<ExtractedData, ExtractionError>;
}

/// Options for the local pipeline.
#[derive(Args, Clone, Debug)]
pub struct PipelineOpts {
    #[command(flatten)]
    pub rasterize: RasterizeOpts,

    #[command(flatten)]
    pub summary: SummaryOpts,

    /// How many pages of each document to recognize at once. Results are
    /// always assembled in page order.
    #[clap(long, default_value_t = 1)]
    pub page_jobs: usize,
}

impl Default for PipelineOpts {
    fn default() -> Self {
        Self {
            rasterize: RasterizeOpts::default(),
            summary: SummaryOpts::default(),
            page_jobs: 1,
        }
    }
}

/// Rasterize, recognize, aggregate, then mine.
pub struct ExtractionPipeline {
    engine: Arc<dyn RecognitionEngine>,
    opts: PipelineOpts,
}

impl ExtractionPipeline {
    /// Create a new pipeline around a page-level engine.
    pub fn new(engine: Arc<dyn RecognitionEngine>, opts: PipelineOpts) -> Self {
        Self { engine, opts }
    }

    /// Run everything after rasterization.
    async fn extract_pages(
        &self,
        pages: BoxedStream<Result<RasterPage>>,
        total_pages: usize,
        progress: &dyn ProgressListener,
    ) -> Result<ExtractedData, ExtractionError> {
        let results = recognize_pages(
            pages,
            total_pages,
            self.engine.clone(),
            self.opts.page_jobs,
            progress,
        )
        .await?;
        let aggregated = aggregate_pages(results)?;
        Ok(ExtractedData::from_aggregated(
            aggregated,
            &self.opts.summary,
        ))
    }
}

#[async_trait]
impl DocumentExtractor for ExtractionPipeline {
    #[instrument(level = "debug", skip_all, fields(media_type = %media_type, len = data.len()))]
    async fn extract(
        &self,
        data: Vec<u8>,
        media_type: &str,
        progress: &dyn ProgressListener,
    ) -> Result<ExtractedData, ExtractionError> {
        let pages = rasterize(data, media_type, &self.opts.rasterize)
            .await
            .map_err(ExtractionError::rasterization)?;
        let total_pages = pages.page_count();
        debug!(total_pages, "Rasterized document");
        self.extract_pages(pages.into_stream(), total_pages, progress)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recognize::tests::{
        NoProgress, RecordingProgress, Script, ScriptedEngine, fake_pages,
    };

    fn pipeline(scripts: Vec<Script>) -> ExtractionPipeline {
        ExtractionPipeline::new(
            Arc::new(ScriptedEngine::new(scripts)),
            PipelineOpts::default(),
        )
    }

    #[tokio::test]
    async fn two_page_document() -> Result<()> {
        let pipeline = pipeline(vec![
            Script::ok("Hello world.", 70.0),
            Script::ok("Case No. 99-001.", 90.0),
        ]);
        let progress = RecordingProgress::default();
        let data = pipeline.extract_pages(fake_pages(2), 2, &progress).await?;
        assert_eq!(data.raw_text, "Hello world.\n\nCase No. 99-001.");
        assert_eq!(data.confidence_score, 80);
        assert!(
            data.entities
                .case_numbers
                .iter()
                .any(|c| c.contains("99-001")),
            "{:?}",
            data.entities.case_numbers
        );
        assert_eq!(data.summary, crate::summary::NO_READABLE_CONTENT);
        assert_eq!(progress.events.lock().unwrap().len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn single_image_document() -> Result<()> {
        let pipeline = pipeline(vec![Script::ok(
            "Dear Sir,\nJohn Smith appeared on January 5, 2024 in Case No. 12-345.",
            88.4,
        )]);
        let data = pipeline
            .extract(b"\x89PNG\r\n\x1a\n".to_vec(), "image/png", &NoProgress)
            .await?;
        assert_eq!(data.confidence_score, 88);
        assert_eq!(data.entities.names, vec!["John Smith", "Case No"]);
        assert_eq!(data.entities.dates, vec!["January 5, 2024"]);
        assert_eq!(data.entities.case_numbers, vec!["Case No. 12-345"]);
        assert_eq!(
            data.summary,
            "Dear Sir,\nJohn Smith appeared on January 5, 2024 in Case No."
        );
        Ok(())
    }

    #[tokio::test]
    async fn unsupported_media_type_is_a_rasterization_error() {
        let err = pipeline(vec![])
            .extract(b"plain text".to_vec(), "text/plain", &NoProgress)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "rasterization");
    }

    #[tokio::test]
    async fn blank_document_is_empty() {
        let err = pipeline(vec![Script::ok("   ", 95.0), Script::ok("\n", 95.0)])
            .extract_pages(fake_pages(2), 2, &NoProgress)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "empty_document");
    }

    #[test]
    fn extracted_data_uses_camel_case() -> Result<()> {
        let data = ExtractedData {
            raw_text: "text".to_owned(),
            summary: "summary".to_owned(),
            entities: Entities::default(),
            confidence_score: 42,
        };
        assert_eq!(
            serde_json::to_value(&data)?,
            json!({
                "rawText": "text",
                "summary": "summary",
                "entities": { "dates": [], "names": [], "caseNumbers": [] },
                "confidenceScore": 42,
            })
        );
        Ok(())
    }

    #[test]
    fn mining_empty_text_uses_fallback() {
        let mined = mine_text("", &SummaryOpts::default());
        assert_eq!(mined.summary, crate::summary::NO_READABLE_CONTENT);
        assert_eq!(mined.entities, Entities::default());
    }
}
