//! Drive a [`RecognitionEngine`] over the pages of a document.

use std::{pin::pin, sync::Arc};

use futures::StreamExt as _;

use crate::{
    async_utils::BoxedStream,
    engines::RecognitionEngine,
    errors::ExtractionError,
    prelude::*,
    rasterize::RasterPage,
};

/// The recognized text of one page.
#[derive(Clone, Debug, PartialEq)]
pub struct PageResult {
    /// The 1-based position of this page in the document.
    pub page_index: usize,
    /// The transcribed text.
    pub text: String,
    /// The engine's confidence, from 0 to 100.
    pub confidence: f64,
}

/// Receives progress notifications while pages are recognized.
///
/// This is purely informational. Nothing a listener does can affect the
/// result of a run.
pub trait ProgressListener: Send + Sync {
    /// Called once per page, in page order, after that page is recognized.
    fn page_recognized(&self, page_index: usize, fraction_complete: f64);
}

/// Recognize every page in `pages`, returning results in page order.
///
/// Up to `concurrency` pages are in flight at once, but results are always
/// collected in the order the pages arrive. The first failure ends the run,
/// and any pages still in flight are dropped.
#[instrument(level = "debug", skip_all, fields(total_pages = total_pages, concurrency = concurrency))]
pub async fn recognize_pages(
    pages: BoxedStream<Result<RasterPage>>,
    total_pages: usize,
    engine: Arc<dyn RecognitionEngine>,
    concurrency: usize,
    progress: &dyn ProgressListener,
) -> Result<Vec<PageResult>, ExtractionError> {
    let mut recognized = pin!(
        pages
            .map(|page| {
                let engine = engine.clone();
                async move {
                    let page = page.map_err(ExtractionError::rasterization)?;
                    recognize_page(engine.as_ref(), page).await
                }
            })
            .buffered(concurrency.max(1))
    );

    let mut results = Vec::with_capacity(total_pages);
    while let Some(result) = recognized.next().await {
        let result = result?;
        let fraction_complete = (results.len() + 1) as f64 / total_pages.max(1) as f64;
        progress.page_recognized(result.page_index, fraction_complete.min(1.0));
        results.push(result);
    }
    Ok(results)
}

/// Recognize a single page, attaching the page index to any failure.
#[instrument(level = "debug", skip_all, fields(page_index = page.page_index))]
async fn recognize_page(
    engine: &dyn RecognitionEngine,
    page: RasterPage,
) -> Result<PageResult, ExtractionError> {
    let page_index = page.page_index;
    let recognition = engine
        .recognize(page)
        .await
        .map_err(|source| ExtractionError::Recognition { page_index, source })?;
    debug!(
        confidence = recognition.confidence,
        chars = recognition.text.len(),
        "Recognized page"
    );
    Ok(PageResult {
        page_index,
        text: recognition.text,
        confidence: recognition.confidence,
    })
}
