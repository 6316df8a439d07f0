//! Local recognition using the `tesseract` CLI.

use tokio::{fs, process::Command};

use crate::{
    async_utils::check_for_command_failure, cpu_limit::with_cpu_semaphore, prelude::*,
    rasterize::RasterPage,
};

use super::{PageRecognition, RecognitionEngine};

/// The TSV `level` of individual words.
const WORD_LEVEL: &str = "5";

/// OCR engine wrapping the `tesseract` CLI tool.
pub struct TesseractEngine {
    /// Language pack(s) to pass to `-l`.
    language: String,
}

impl TesseractEngine {
    /// Create a new `tesseract` engine.
    pub fn new(language: String) -> Self {
        Self { language }
    }
}

#[async_trait]
impl RecognitionEngine for TesseractEngine {
    #[instrument(level = "debug", skip_all, fields(page_index = page.page_index))]
    async fn recognize(&self, page: RasterPage) -> Result<PageRecognition> {
        let extension = mime_guess::get_mime_extensions_str(&page.mime_type)
            .and_then(|exts| exts.first())
            .ok_or_else(|| {
                anyhow!("cannot determine extension for {}", page.mime_type)
            })?;

        let tmpdir = tempfile::TempDir::with_prefix("tesseract")?;
        let input_path = tmpdir.path().join(format!("input.{}", extension));
        let output_base = tmpdir.path().join("output");
        fs::write(&input_path, &page.data)
            .await
            .context("cannot write tesseract input file")?;
        drop(page);

        // Ask for both plain text and TSV in one pass. The TSV has per-word
        // confidences.
        let mut cmd = Command::new("tesseract");
        cmd.arg(&input_path)
            .arg(&output_base)
            .arg("-l")
            .arg(&self.language)
            .arg("txt")
            .arg("tsv");
        let output = with_cpu_semaphore(|| async move {
            cmd.output().await.context("cannot run tesseract")
        })
        .await?;
        check_for_command_failure("tesseract", &output, None)?;

        let text = fs::read_to_string(output_base.with_extension("txt"))
            .await
            .context("cannot read tesseract text output")?;
        let tsv = fs::read_to_string(output_base.with_extension("tsv"))
            .await
            .context("cannot read tesseract TSV output")?;
        let confidence = mean_word_confidence(&tsv)?;
        debug!(confidence, chars = text.len(), "Recognized page");

        Ok(PageRecognition {
            // Tesseract ends each page with a form feed.
            text: text.trim_end().to_owned(),
            confidence,
        })
    }
}

/// Average the confidence of every recognized word in Tesseract's TSV output.
///
/// Non-word rows and words with a confidence of -1 (no estimate) are skipped.
/// A page without any words has a confidence of 0.
fn mean_word_confidence(tsv: &str) -> Result<f64> {
    let mut lines = tsv.lines();
    let header = lines
        .next()
        .ok_or_else(|| anyhow!("tesseract TSV output is empty"))?
        .split('\t')
        .collect::<Vec<_>>();
    let column = |name: &str| {
        header
            .iter()
            .position(|&h| h == name)
            .ok_or_else(|| anyhow!("tesseract TSV output has no {:?} column", name))
    };
    let level_col = column("level")?;
    let conf_col = column("conf")?;

    let mut total = 0.0;
    let mut words = 0usize;
    for line in lines {
        let fields = line.split('\t').collect::<Vec<_>>();
        if fields.get(level_col) != Some(&WORD_LEVEL) {
            continue;
        }
        let Some(conf) = fields.get(conf_col) else {
            continue;
        };
        let conf = conf
            .trim()
            .parse::<f64>()
            .with_context(|| format!("invalid confidence in tesseract TSV: {:?}", conf))?;
        if conf >= 0.0 {
            total += conf;
            words += 1;
        }
    }

    if words == 0 {
        Ok(0.0)
    } else {
        Ok((total / words as f64).clamp(0.0, 100.0))
    }
}
