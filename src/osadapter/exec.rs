//! Synchronous external-process plumbing shared by every OS Adapter call.
//!
//! Grounded on the teacher's `run!` macro (`katsu::util`): build argv, run to
//! completion, turn a non-zero exit into a typed error carrying captured
//! stderr. Unlike the teacher, nothing here ever goes through a shell string —
//! every argument is passed as its own argv entry.

use std::process::{Command, Output, Stdio};
use std::time::{Duration, Instant};

use tracing::{debug, instrument};

use crate::error::{fmt_stderr, DimError};

/// Run `tool` with `args` to completion and return its captured stdout.
///
/// # Errors
/// `ToolMissing` if `tool` is not on `PATH`; `ToolFailed` if it exits non-zero.
#[instrument(skip(args), fields(tool))]
pub fn run_capture(tool: &str, args: &[&str]) -> Result<Vec<u8>, DimError> {
	let output = spawn_and_wait(tool, args)?;
	check_status(tool, &output)?;
	Ok(output.stdout)
}

/// Run `tool` with `args` to completion, discarding stdout, and check the exit status.
///
/// # Errors
/// `ToolMissing` if `tool` is not on `PATH`; `ToolFailed` if it exits non-zero.
pub fn run_status(tool: &str, args: &[&str]) -> Result<(), DimError> {
	let output = spawn_and_wait(tool, args)?;
	check_status(tool, &output)
}

/// Run `tool` with `args`, feeding `stdin` to it, and check the exit status.
///
/// Used for `sfdisk <dev> --no-reread` which reads the new table from stdin.
pub fn run_with_stdin(tool: &str, args: &[&str], stdin: &[u8]) -> Result<Vec<u8>, DimError> {
	which::which(tool).map_err(|_| DimError::ToolMissing { tool: tool.to_string() })?;

	let mut child = Command::new(tool)
		.args(args)
		.stdin(Stdio::piped())
		.stdout(Stdio::piped())
		.stderr(Stdio::piped())
		.spawn()
		.map_err(DimError::Io)?;

	{
		use std::io::Write;
		let mut pipe = child.stdin.take().expect("stdin was piped");
		pipe.write_all(stdin).map_err(DimError::Io)?;
	}

	let output = child.wait_with_output().map_err(DimError::Io)?;
	check_status(tool, &output)?;
	Ok(output.stdout)
}

fn spawn_and_wait(tool: &str, args: &[&str]) -> Result<Output, DimError> {
	which::which(tool).map_err(|_| DimError::ToolMissing { tool: tool.to_string() })?;

	debug!(tool, ?args, "running");
	Command::new(tool).args(args).output().map_err(DimError::Io)
}

fn check_status(tool: &str, output: &Output) -> Result<(), DimError> {
	if output.status.success() {
		return Ok(());
	}

	Err(DimError::ToolFailed {
		tool: tool.to_string(),
		exit: output.status.code().unwrap_or(-1),
		stderr: fmt_stderr(&output.stderr),
	})
}

/// Run `tool` with `args`, killing it if it hasn't finished within `timeout`.
///
/// Used by probes that must not hang the worker indefinitely (e.g. a `findmnt`
/// against a device that's gone away).
pub fn run_capture_timeout(tool: &str, args: &[&str], timeout: Duration) -> Result<Vec<u8>, DimError> {
	which::which(tool).map_err(|_| DimError::ToolMissing { tool: tool.to_string() })?;

	let mut child = Command::new(tool)
		.args(args)
		.stdout(Stdio::piped())
		.stderr(Stdio::piped())
		.spawn()
		.map_err(DimError::Io)?;

	let start = Instant::now();
	loop {
		if let Some(status) = child.try_wait().map_err(DimError::Io)? {
			let output = child.wait_with_output().map_err(DimError::Io)?;
			if status.success() {
				return Ok(output.stdout);
			}
			return Err(DimError::ToolFailed {
				tool: tool.to_string(),
				exit: status.code().unwrap_or(-1),
				stderr: fmt_stderr(&output.stderr),
			});
		}

		if start.elapsed() >= timeout {
			let _ = child.kill();
			let _ = child.wait();
			return Err(DimError::ToolFailed {
				tool: tool.to_string(),
				exit: -1,
				stderr: format!("timed out after {timeout:?}"),
			});
		}

		std::thread::sleep(Duration::from_millis(50));
	}
}
