//! The `mine` subcommand.

use clap::Args;
use tokio::io::AsyncWriteExt as _;

use crate::{
    async_utils::io::{create_writer, read_text_or_stdin},
    pipeline::mine_text,
    prelude::*,
    summary::SummaryOpts,
};

/// Mine command line arguments.
#[derive(Debug, Args)]
pub struct MineOpts {
    /// A text file to mine. Defaults to standard input.
    #[clap(value_name = "TEXT_FILE")]
    pub input_path: Option<PathBuf>,

    /// Where to write the result. Defaults to standard output.
    #[clap(short = 'o', long = "out")]
    pub output_path: Option<PathBuf>,

    #[command(flatten)]
    pub summary: SummaryOpts,
}

/// The `mine` subcommand. Summarize already-transcribed text and extract its
/// entities.
#[instrument(level = "debug", skip_all)]
pub async fn cmd_mine(opts: &MineOpts) -> Result<()> {
    let text = read_text_or_stdin(opts.input_path.as_deref()).await?;
    let mined = mine_text(text.trim(), &opts.summary);
    debug!(
        dates = mined.entities.dates.len(),
        names = mined.entities.names.len(),
        case_numbers = mined.entities.case_numbers.len(),
        "Mined text"
    );

    let mut wtr = create_writer(opts.output_path.as_deref()).await?;
    let json = serde_json::to_string_pretty(&mined).context("failed to serialize result")?;
    wtr.write_all(json.as_bytes())
        .await
        .context("failed to write result")?;
    wtr.write_all(b"\n").await.context("failed to write result")?;
    wtr.flush().await.context("failed to flush result")?;
    Ok(())
}
