//! Mine dates, names and case numbers from document text using fixed
//! families of regular expressions.
//!
//! This is deliberately dumb. There is no validation of any kind: `13/45/99`
//! is a date, and `Hearing Room` is a name. What we do guarantee is that the
//! same text always produces the same lists, in the same order, without
//! duplicates.

use std::{collections::HashSet, sync::LazyLock};

use regex::Regex;
use schemars::JsonSchema;

use crate::prelude::*;

/// The maximum number of names we report.
pub const MAX_NAMES: usize = 10;

/// First words which mark a salutation or closing, not a name.
const NAME_STOP_WORDS: &[&str] = &[
    "The",
    "This",
    "That",
    "Dear",
    "From",
    "Your",
    "Sincerely",
    "Yours",
    "Very",
    "Best",
    "Regards",
];

/// Compile a fixed list of patterns.
fn compile_all(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .map(|pattern| Regex::new(pattern).expect("failed to compile regex"))
        .collect()
}

// Digits and word boundaries are ASCII-only, so `١٢/٠٥/٢٠٢٤` is not a date
// and `é12/05/2024` contains one. Whitespace stays Unicode-aware.

static DATE_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile_all(&[
        // 1/5/2024, 01/05/24
        r"(?-u:\b)[0-9]{1,2}/[0-9]{1,2}/(?:[0-9]{4}|[0-9]{2})(?-u:\b)",
        // 1-5-2024, 01-05-24
        r"(?-u:\b)[0-9]{1,2}-[0-9]{1,2}-(?:[0-9]{4}|[0-9]{2})(?-u:\b)",
        // Jan 5, 2024; Sept. 5 2024
        r"(?i)(?-u:\b)(?:Jan|Feb|Mar|Apr|May|Jun|Jul|Aug|Sep|Oct|Nov|Dec)[a-z]*\.?\s+[0-9]{1,2},?\s+[0-9]{4}(?-u:\b)",
        // 5 Jan 2024
        r"(?i)(?-u:\b)[0-9]{1,2}\s+(?:Jan|Feb|Mar|Apr|May|Jun|Jul|Aug|Sep|Oct|Nov|Dec)[a-z]*\.?\s+[0-9]{4}(?-u:\b)",
        // January 5, 2024
        r"(?i)(?-u:\b)(?:January|February|March|April|May|June|July|August|September|October|November|December)\s+[0-9]{1,2},?\s+[0-9]{4}(?-u:\b)",
    ])
});

static NAME_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?-u:\b)[A-Z][a-z]+\s+[A-Z][a-z]+(?:\s+[A-Z][a-z]+)?(?-u:\b)")
        .expect("failed to compile regex")
});

static CASE_NUMBER_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile_all(&[
        r"(?i)(?-u:\b)Case\s*(?:No\.?|Number|#)?\s*[:\s]?\s*[A-Z0-9\-/]+(?-u:\b)",
        r"(?i)(?-u:\b)Docket\s*(?:No\.?|Number|#)?\s*[:\s]?\s*[A-Z0-9\-/]+(?-u:\b)",
        // Short-form civil, criminal and admiralty codes: CV-22-1234.
        r"(?i)(?-u:\b)(?:CV|CR|CIV|CRIM|ADM)\s*[-\s]?\s*[0-9]{2,4}[-\s]?[0-9]{1,5}(?-u:\b)",
        // 16 digits in groups of four.
        r"(?-u:\b)[0-9]{4}[-\s]?[0-9]{4}[-\s]?[0-9]{4}[-\s]?[0-9]{4}(?-u:\b)",
    ])
});

/// Entities found in a document.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Entities {
    /// Dates, exactly as written.
    #[serde(default)]
    pub dates: Vec<String>,

    /// Names of people and organizations. At most 10.
    #[serde(default)]
    pub names: Vec<String>,

    /// Case numbers, docket numbers and similar identifiers.
    #[serde(default)]
    pub case_numbers: Vec<String>,
}

impl Entities {
    /// Enforce our usual guarantees on entities from somewhere else: no
    /// blanks, no duplicates and no more than [`MAX_NAMES`] names.
    pub fn normalized(self) -> Self {
        fn clean(items: Vec<String>) -> Vec<String> {
            dedup_first_seen(
                items
                    .into_iter()
                    .map(|item| item.trim().to_owned())
                    .filter(|item| !item.is_empty()),
            )
        }
        let mut names = clean(self.names);
        names.truncate(MAX_NAMES);
        Self {
            dates: clean(self.dates),
            names,
            case_numbers: clean(self.case_numbers),
        }
    }
}

/// Extract all entities from `text`.
pub fn extract_entities(text: &str) -> Entities {
    Entities {
        dates: extract_dates(text),
        names: extract_names(text),
        case_numbers: extract_case_numbers(text),
    }
}

/// Find dates. Matches are grouped by pattern, then in text order.
pub fn extract_dates(text: &str) -> Vec<String> {
    dedup_first_seen(
        DATE_PATTERNS
            .iter()
            .flat_map(|pattern| pattern.find_iter(text))
            .map(|m| m.as_str()),
    )
}

/// Find names: two or three capitalized words which don't start with a stop
/// word.
pub fn extract_names(text: &str) -> Vec<String> {
    dedup_first_seen(NAME_PATTERN.find_iter(text).map(|m| m.as_str()))
        .into_iter()
        .filter(|name| {
            let first_word = name.split_whitespace().next().unwrap_or_default();
            !NAME_STOP_WORDS.contains(&first_word)
        })
        .take(MAX_NAMES)
        .collect()
}

/// Find case and docket numbers. Matches are grouped by pattern, then in text
/// order.
pub fn extract_case_numbers(text: &str) -> Vec<String> {
    dedup_first_seen(
        CASE_NUMBER_PATTERNS
            .iter()
            .flat_map(|pattern| pattern.find_iter(text))
            .map(|m| m.as_str().trim()),
    )
}

/// Remove exact duplicates, keeping the first occurrence of each item.
pub fn dedup_first_seen<I>(items: I) -> Vec<String>
where
    I: IntoIterator,
    I::Item: Into<String>,
{
    let mut seen = HashSet::new();
    let mut result = vec![];
    for item in items {
        let item = item.into();
        if seen.insert(item.clone()) {
            result.push(item);
        }
    }
    result
}
