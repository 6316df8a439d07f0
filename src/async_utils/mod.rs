//! Asynchronous utilities for use with Tokio.
//!
//! Rasterizing and recognizing pages mostly means waiting on external
//! processes and HTTP requests, so everything above this module is written as
//! async streams. The small amount of glue that makes that pleasant lives here.

use std::{pin::Pin, process::Output};

use futures::Stream;

use crate::prelude::*;

pub mod io;

/// A type alias for a boxed stream. This is used to make it easier to work
/// streams that return complex types.
pub type BoxedStream<Item> = Pin<Box<dyn Stream<Item = Item> + Send>>;

/// Report any command failures, and include any error output.
///
/// Standard output and standard error are logged. If `is_error_line` is
/// provided, a command which exits successfully will still be treated as
/// failed if any line of standard error matches it. Poppler, in particular,
/// likes to report broken pages this way.
pub fn check_for_command_failure(
    command_name: &str,
    output: &Output,
    is_error_line: Option<fn(&str) -> bool>,
) -> Result<()> {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    trace!(
        command_name = command_name,
        output = %stdout,
        "Standard output from command"
    );

    if output.status.success() {
        if !stderr.trim().is_empty() {
            debug!(
                command_name = command_name,
                output = %stderr,
                "Standard error from command",
            );
        }
        if let Some(is_error_line) = is_error_line
            && stderr.lines().any(is_error_line)
        {
            return Err(anyhow!(
                "{} printed error output:\n{}",
                command_name,
                stderr,
            ));
        }
        Ok(())
    } else {
        error!(
            command_name = command_name,
            output = %stderr,
            "Standard error from failed command",
        );
        match output.status.code() {
            Some(exit_code) => Err(anyhow!(
                "{} failed with exit code {} and error output:\n{}",
                command_name,
                exit_code,
                stderr,
            )),
            None => Err(anyhow!(
                "{} was terminated with error output:\n{}",
                command_name,
                stderr,
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::process::Command;

    use super::*;

    fn has_error(line: &str) -> bool {
        line.contains("Error")
    }

    #[test]
    #[cfg(unix)]
    fn successful_command_passes() -> Result<()> {
        let output = Command::new("true").output()?;
        check_for_command_failure("true", &output, Some(has_error))?;
        Ok(())
    }

    #[test]
    #[cfg(unix)]
    fn failing_command_reports_exit_code() -> Result<()> {
        let output = Command::new("false").output()?;
        let err = check_for_command_failure("false", &output, None)
            .expect_err("command should fail");
        assert!(err.to_string().contains("exit code 1"), "{err}");
        Ok(())
    }

    #[test]
    #[cfg(unix)]
    fn error_lines_on_stderr_fail_command() -> Result<()> {
        let output = Command::new("sh")
            .arg("-c")
            .arg("echo 'Syntax Error: broken page' >&2")
            .output()?;
        assert!(check_for_command_failure("sh", &output, Some(has_error)).is_err());
        assert!(check_for_command_failure("sh", &output, None).is_ok());
        Ok(())
    }
}
