//! Command-line entry points.

use clap::Args;

use crate::prelude::*;

pub mod extract;
pub mod mine;
pub mod schema;

/// Common options for subcommands that process many documents.
#[derive(Debug, Clone, Args)]
pub struct BatchOpts {
    /// Max number of documents to process at a time.
    #[clap(short = 'j', long = "jobs", default_value = "4")]
    pub job_count: usize,

    /// What portion of documents should we allow to fail? Specified as a
    /// number between 0.0 and 1.0.
    #[clap(long, default_value = "0.0")]
    pub allowed_failure_rate: f32,
}

impl BatchOpts {
    /// Fail if too many documents could not be processed.
    pub fn check_failure_rate(&self, failure_count: usize, total_count: usize) -> Result<()> {
        if total_count == 0 {
            return Ok(());
        }
        let failure_rate = failure_count as f32 / total_count as f32;
        if failure_rate > self.allowed_failure_rate {
            Err(anyhow!(
                "{}/{} ({:.2}%) of documents failed, but only {:.2}% were allowed",
                failure_count,
                total_count,
                failure_rate * 100.0,
                self.allowed_failure_rate * 100.0
            ))
        } else {
            if failure_count > 0 {
                warn!(failure_count, "Some documents could not be processed");
            }
            Ok(())
        }
    }
}
