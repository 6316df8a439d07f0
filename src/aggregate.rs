//! Merge per-page results into document-level text and confidence.

use crate::{errors::ExtractionError, prelude::*, recognize::PageResult};

/// Separator placed between the text of consecutive pages.
const PAGE_SEPARATOR: &str = "\n\n";

/// The combined text and confidence of a whole document.
#[derive(Clone, Debug, PartialEq)]
pub struct AggregatedText {
    /// Text of every page in page order, separated by blank lines and trimmed.
    pub raw_text: String,
    /// Mean page confidence, rounded to an integer in 0..=100.
    pub confidence_score: u8,
}

/// Combine page results into a single document.
///
/// Pages are sorted by index first, so the order in which they were collected
/// doesn't matter. Fails with [`ExtractionError::EmptyDocument`] if there are
/// no pages, or if every page is blank.
pub fn aggregate_pages(
    mut pages: Vec<PageResult>,
) -> Result<AggregatedText, ExtractionError> {
    if pages.is_empty() {
        return Err(ExtractionError::EmptyDocument);
    }
    pages.sort_by_key(|page| page.page_index);

    let raw_text = pages
        .iter()
        .map(|page| page.text.as_str())
        .collect::<Vec<_>>()
        .join(PAGE_SEPARATOR)
        .trim()
        .to_owned();
    if raw_text.is_empty() {
        return Err(ExtractionError::EmptyDocument);
    }

    let mean =
        pages.iter().map(|page| page.confidence).sum::<f64>() / pages.len() as f64;
    debug!(pages = pages.len(), mean_confidence = mean, "Aggregated pages");
    Ok(AggregatedText {
        raw_text,
        confidence_score: confidence_to_score(mean),
    })
}

/// Round a confidence to the nearest integer in 0..=100. Garbage becomes 0.
pub fn confidence_to_score(confidence: f64) -> u8 {
    if confidence.is_finite() {
        confidence.round().clamp(0.0, 100.0) as u8
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(page_index: usize, text: &str, confidence: f64) -> PageResult {
        PageResult {
            page_index,
            text: text.to_owned(),
            confidence,
        }
    }

    #[test]
    fn joins_pages_with_blank_lines() -> Result<()> {
        let aggregated = aggregate_pages(vec![
            page(1, "  Hello world.", 80.0),
            page(2, "Case No. 99-001.\n", 90.0),
        ])?;
        assert_eq!(aggregated.raw_text, "Hello world.\n\nCase No. 99-001.");
        assert_eq!(aggregated.confidence_score, 85);
        Ok(())
    }

    #[test]
    fn collection_order_does_not_matter() -> Result<()> {
        let aggregated = aggregate_pages(vec![
            page(3, "three", 60.0),
            page(1, "one", 70.0),
            page(2, "two", 80.0),
        ])?;
        assert_eq!(aggregated.raw_text, "one\n\ntwo\n\nthree");
        assert_eq!(aggregated.confidence_score, 70);
        Ok(())
    }

    #[test]
    fn blank_pages_keep_their_separators() -> Result<()> {
        let aggregated = aggregate_pages(vec![
            page(1, "one", 50.0),
            page(2, "", 0.0),
            page(3, "three", 51.0),
        ])?;
        assert_eq!(aggregated.raw_text, "one\n\n\n\nthree");
        assert_eq!(aggregated.confidence_score, 34);
        Ok(())
    }

    #[test]
    fn empty_input_is_an_empty_document() {
        assert!(matches!(
            aggregate_pages(vec![]),
            Err(ExtractionError::EmptyDocument)
        ));
    }

    #[test]
    fn whitespace_pages_are_an_empty_document() {
        let result = aggregate_pages(vec![page(1, "  \n", 90.0), page(2, "\t", 95.0)]);
        assert!(matches!(result, Err(ExtractionError::EmptyDocument)));
    }

    #[test]
    fn scores_are_rounded_and_clamped() {
        assert_eq!(confidence_to_score(84.5), 85);
        assert_eq!(confidence_to_score(84.49), 84);
        assert_eq!(confidence_to_score(-3.0), 0);
        assert_eq!(confidence_to_score(140.0), 100);
        assert_eq!(confidence_to_score(f64::NAN), 0);
    }
}
