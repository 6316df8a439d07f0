//! Errors returned by the extraction pipeline.
//!
//! Internally we use [`anyhow`] everywhere, but callers of the pipeline need
//! to know _which_ stage failed, so they can decide whether to retry with a
//! different engine or report the document as unreadable.

use thiserror::Error;

/// Why a document could not be turned into an [`ExtractedData`] record.
///
/// [`ExtractedData`]: crate::pipeline::ExtractedData
#[derive(Debug, Error)]
pub enum ExtractionError {
    /// The document could not be opened, or one of its pages could not be
    /// rendered.
    #[error("could not rasterize document")]
    Rasterization {
        #[source]
        source: anyhow::Error,
    },

    /// The recognition engine failed on a specific page. `page_index` is
    /// 1-based.
    #[error("could not recognize text on page {page_index}")]
    Recognition {
        page_index: usize,
        #[source]
        source: anyhow::Error,
    },

    /// Recognition succeeded, but there was no text in the document.
    #[error("no text could be extracted from the document")]
    EmptyDocument,
}

impl ExtractionError {
    /// Wrap a rasterization failure.
    pub fn rasterization(source: anyhow::Error) -> Self {
        ExtractionError::Rasterization { source }
    }

    /// A short, stable name for this kind of error, for output records.
    pub fn kind(&self) -> &'static str {
        match self {
            ExtractionError::Rasterization { .. } => "rasterization",
            ExtractionError::Recognition { .. } => "recognition",
            ExtractionError::EmptyDocument => "empty_document",
        }
    }
}

#[cfg(test)]
mod tests {
    use anyhow::anyhow;

    use super::*;

    #[test]
    fn recognition_error_names_page() {
        let err = ExtractionError::Recognition {
            page_index: 3,
            source: anyhow!("engine crashed"),
        };
        assert_eq!(err.kind(), "recognition");
        assert_eq!(err.to_string(), "could not recognize text on page 3");

        // The full chain should include the engine's error.
        let chain = format!("{:#}", anyhow::Error::new(err));
        assert!(chain.contains("engine crashed"), "chain: {chain}");
    }

    #[test]
    fn kinds_are_distinct() {
        let kinds = [
            ExtractionError::rasterization(anyhow!("bad pdf")).kind(),
            ExtractionError::Recognition {
                page_index: 1,
                source: anyhow!("x"),
            }
            .kind(),
            ExtractionError::EmptyDocument.kind(),
        ];
        assert_eq!(kinds, ["rasterization", "recognition", "empty_document"]);
    }
}
