//! The `extract` subcommand.

use std::sync::Arc;

use clap::Args;
use futures::{StreamExt as _, stream};
use schemars::JsonSchema;
use tokio::{fs, io::AsyncWriteExt as _};

use crate::{
    async_utils::io::{create_writer, write_json_line},
    cmd::BatchOpts,
    engines::{EngineOpts, document_extractor_for},
    pipeline::{DocumentExtractor, ExtractedData, PipelineOpts},
    prelude::*,
    recognize::ProgressListener,
    ui::{ProgressConfig, Ui},
};

/// Extract command line arguments.
#[derive(Debug, Args)]
pub struct ExtractOpts {
    /// PDFs and images to extract.
    #[clap(value_name = "FILE", required = true)]
    pub input_paths: Vec<PathBuf>,

    /// Where to write JSONL output. Defaults to standard output.
    #[clap(short = 'o', long = "out")]
    pub output_path: Option<PathBuf>,

    #[command(flatten)]
    pub batch: BatchOpts,

    #[command(flatten)]
    pub engine: EngineOpts,

    #[command(flatten)]
    pub pipeline: PipelineOpts,
}

/// Did we manage to process a document?
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Ok,
    Failed,
}

/// One line of `extract` output.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DocumentOutput {
    /// The input path.
    pub path: PathBuf,

    /// Whether extraction succeeded.
    pub status: DocumentStatus,

    /// What kind of failure this was: `rasterization`, `recognition`,
    /// `empty_document`, or `input` if we couldn't read the file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,

    /// A human-readable description of the failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// The extracted data, if extraction succeeded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ExtractedData>,
}

impl DocumentOutput {
    fn ok(path: PathBuf, result: ExtractedData) -> Self {
        Self {
            path,
            status: DocumentStatus::Ok,
            error_kind: None,
            error: None,
            result: Some(result),
        }
    }

    fn failed(path: PathBuf, error_kind: &str, error: &anyhow::Error) -> Self {
        Self {
            path,
            status: DocumentStatus::Failed,
            error_kind: Some(error_kind.to_owned()),
            error: Some(format!("{:#}", error)),
            result: None,
        }
    }
}

/// Logs page progress for a single document.
struct PageProgressLog {
    path: String,
}

impl ProgressListener for PageProgressLog {
    fn page_recognized(&self, page_index: usize, fraction_complete: f64) {
        debug!(
            path = %self.path,
            page_index,
            percent = (fraction_complete * 100.0).round(),
            "Page recognized"
        );
    }
}

/// The `extract` subcommand.
#[instrument(level = "debug", skip_all)]
pub async fn cmd_extract(ui: Ui, opts: &ExtractOpts) -> Result<()> {
    let extractor = document_extractor_for(&opts.engine, &opts.pipeline).await?;

    let pb = ui.new_progress_bar(
        &ProgressConfig {
            emoji: "📄",
            msg: "Extracting documents",
            done_msg: "Extracted documents",
        },
        opts.input_paths.len() as u64,
    );

    let outputs = stream::iter(opts.input_paths.iter().cloned())
        .map(|path| extract_document(extractor.clone(), path))
        .buffered(opts.batch.job_count.max(1))
        .boxed();
    let mut outputs = pb.wrap_stream(outputs);

    let mut wtr = create_writer(opts.output_path.as_deref()).await?;
    let mut total_count = 0;
    let mut failure_count = 0;
    while let Some(output) = outputs.next().await {
        total_count += 1;
        if output.status == DocumentStatus::Failed {
            failure_count += 1;
        }
        write_json_line(&mut wtr, &output).await?;
    }
    wtr.flush().await.context("failed to flush output")?;
    pb.finish_using_style();

    opts.batch.check_failure_rate(failure_count, total_count)
}

/// Extract a single document. Failures are recorded in the output, not
/// returned.
#[instrument(level = "debug", skip_all, fields(path = %path.display()))]
async fn extract_document(
    extractor: Arc<dyn DocumentExtractor>,
    path: PathBuf,
) -> DocumentOutput {
    let data = match fs::read(&path)
        .await
        .with_context(|| format!("failed to read {:?}", path.display()))
    {
        Ok(data) => data,
        Err(err) => {
            error!(path = %path.display(), "{:#}", err);
            return DocumentOutput::failed(path, "input", &err);
        }
    };
    let media_type = mime_guess::from_path(&path)
        .first_raw()
        .unwrap_or_default();

    let progress = PageProgressLog {
        path: path.display().to_string(),
    };
    match extractor.extract(data, media_type, &progress).await {
        Ok(result) => {
            debug!(
                confidence_score = result.confidence_score,
                "Extracted document"
            );
            DocumentOutput::ok(path, result)
        }
        Err(err) => {
            let kind = err.kind();
            let err = anyhow::Error::new(err);
            error!(path = %path.display(), kind, "{:#}", err);
            DocumentOutput::failed(path, kind, &err)
        }
    }
}
