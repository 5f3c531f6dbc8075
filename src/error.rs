//! Typed error surface for the disk-image engine.
//!
//! Every fallible operation in this crate returns [`DimError`] rather than
//! a dynamic error type: the clone engine and CLI both need to match on
//! *kind*, not just print a message (e.g. `Aborted` must never become a
//! `failed` signal, see [`crate::clone`]).

use crate::model::{Mode, Scope};

pub type Result<T> = std::result::Result<T, DimError>;

#[derive(Debug, thiserror::Error)]
pub enum DimError {
	/// An external utility (`lsblk`, `sfdisk`, `partclone.*`, ...) could not be found on `PATH`.
	#[error("required tool `{tool}` is not installed")]
	ToolMissing { tool: String },

	/// An external utility ran but returned a non-zero exit status.
	#[error("`{tool}` failed with exit code {exit}: {stderr}")]
	ToolFailed { tool: String, exit: i32, stderr: String },

	/// A partition could not be unmounted before opening a stream on it.
	#[error("device `{device}` is busy (failed to unmount)")]
	DeviceBusy { device: String },

	/// The requested scope/mode combination is not permitted by `has_scope`.
	#[error("scope {scope:?} is not supported in {mode:?} mode")]
	NotSupported { scope: Scope, mode: Mode },

	/// The container file's header, table of contents, or a region's checksum did not match.
	#[error("container is corrupt: {reason}")]
	Corrupt { reason: String },

	/// The clone job was cancelled cooperatively via `abort()`.
	#[error("aborted")]
	Aborted,

	/// An underlying read/write system call failed.
	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	/// An argument was out of range (unknown partition index, malformed serial URL, ...).
	#[error("invalid argument: {reason}")]
	Invalid { reason: String },
}

impl DimError {
	/// Exit code used by the CLI binary, stable across releases so scripts can match on it.
	#[must_use]
	pub const fn exit_code(&self) -> i32 {
		match self {
			Self::ToolMissing { .. } => 2,
			Self::ToolFailed { .. } => 3,
			Self::DeviceBusy { .. } => 4,
			Self::NotSupported { .. } => 5,
			Self::Corrupt { .. } => 6,
			Self::Aborted => 7,
			Self::Io(_) => 8,
			Self::Invalid { .. } => 9,
		}
	}

	#[must_use]
	pub const fn is_aborted(&self) -> bool {
		matches!(self, Self::Aborted)
	}
}

/// Small helper so call sites can write `fmt_stderr(&output)` instead of repeating
/// the lossy-utf8 dance every time a child process' stderr needs displaying.
#[must_use]
pub fn fmt_stderr(bytes: &[u8]) -> String {
	String::from_utf8_lossy(bytes).trim().to_string()
}
