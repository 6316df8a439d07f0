//! Short extractive summaries, built from the first few sentences of a
//! document.

use std::sync::LazyLock;

use clap::Args;
use regex::Regex;

/// What we say when there's nothing worth summarizing.
pub const NO_READABLE_CONTENT: &str = "No readable content extracted from the document.";

/// Fragments this short are usually headers, page numbers or OCR noise.
const MIN_SENTENCE_CHARS: usize = 20;

static SENTENCE_END_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[.!?]+").expect("failed to compile regex"));

/// Options controlling summaries.
#[derive(Args, Clone, Debug)]
pub struct SummaryOpts {
    /// Truncate summaries longer than this many characters.
    #[clap(long = "summary-max-chars", default_value_t = 200)]
    pub max_chars: usize,

    /// The number of sentences to include in each summary.
    #[clap(long = "summary-max-sentences", default_value_t = 3)]
    pub max_sentences: usize,
}

impl Default for SummaryOpts {
    fn default() -> Self {
        Self {
            max_chars: 200,
            max_sentences: 3,
        }
    }
}

/// Summarize `text` by quoting its first few substantial sentences.
pub fn generate_summary(text: &str, opts: &SummaryOpts) -> String {
    let sentences = SENTENCE_END_REGEX
        .split(text)
        .map(str::trim)
        .filter(|sentence| sentence.chars().count() > MIN_SENTENCE_CHARS)
        .take(opts.max_sentences)
        .collect::<Vec<_>>();
    if sentences.is_empty() {
        return NO_READABLE_CONTENT.to_owned();
    }

    let joined = sentences.join(". ");
    if joined.chars().count() > opts.max_chars {
        let mut truncated = joined.chars().take(opts.max_chars).collect::<String>();
        truncated.push_str("...");
        truncated
    } else {
        joined + "."
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summarize(text: &str) -> String {
        generate_summary(text, &SummaryOpts::default())
    }

    #[test]
    fn uses_first_three_long_sentences() {
        let text = "Short one. The plaintiff filed a motion to dismiss! \
                    Was the motion timely filed by counsel? Ok. \
                    The court granted the motion in part. \
                    A fourth long sentence which should not appear.";
        assert_eq!(
            summarize(text),
            "The plaintiff filed a motion to dismiss. \
             Was the motion timely filed by counsel. \
             The court granted the motion in part."
        );
    }

    #[test]
    fn uses_fewer_sentences_when_that_is_all_there_is() {
        assert_eq!(
            summarize("Hi. This sentence is long enough to count"),
            "This sentence is long enough to count."
        );
    }

    #[test]
    fn exactly_twenty_characters_is_too_short() {
        assert_eq!(summarize("abcdefghij klmnopqrs."), NO_READABLE_CONTENT);
        assert_eq!(summarize("abcdefghij klmnopqrst."), "abcdefghij klmnopqrst.");
    }

    #[test]
    fn falls_back_when_nothing_is_readable() {
        assert_eq!(summarize(""), NO_READABLE_CONTENT);
        assert_eq!(summarize("Page 1. Exhibit A! ??"), NO_READABLE_CONTENT);
    }

    #[test]
    fn long_summaries_are_truncated() {
        let sentence = "word ".repeat(60);
        let text = format!("{sentence}. {sentence}. {sentence}.");
        let summary = summarize(&text);
        assert!(summary.ends_with("..."));
        assert_eq!(summary.chars().count(), 200 + 3);
    }

    #[test]
    fn truncation_counts_characters_not_bytes() {
        let text = "é".repeat(300);
        let summary = summarize(&text);
        assert_eq!(summary, format!("{}...", "é".repeat(200)));
    }

    #[test]
    fn limits_are_configurable() {
        let opts = SummaryOpts {
            max_chars: 30,
            max_sentences: 1,
        };
        let text = "The first sentence is long enough. The second one is too.";
        assert_eq!(generate_summary(text, &opts), "The first sentence is long eno...");
    }
}
