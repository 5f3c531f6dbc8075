//! `sfdisk` wrapper: dump and apply partition-table blobs.
//!
//! Grounded on `Helper::getPartitionTable`/`setPartitionTable` in the original
//! (`sfdisk -d <disk>` / `sfdisk <disk> --no-reread`) and on
//! `examples/other_examples`'s `silitics-rugpi` `sfdisk.rs`, which uses the
//! same two invocations (dump with `-d`/`--dump`, apply piped on stdin with
//! `--no-reread`).

use std::path::Path;

use crate::error::DimError;
use crate::osadapter::exec;

/// Dump the partition table of `disk` as the text blob `sfdisk -d` prints.
///
/// # Errors
/// `ToolFailed` if `sfdisk` exits non-zero (e.g. the disk has no partition table).
pub fn dump(disk: &Path) -> Result<Vec<u8>, DimError> {
	exec::run_capture("sfdisk", &["-d", &disk.display().to_string()])
}

/// Apply a previously-dumped table blob to `disk`.
///
/// `--no-reread` matches the original: the caller is responsible for
/// triggering a partprobe afterwards (spec.md §4.3 end_scope behavior).
///
/// # Errors
/// `ToolFailed` if `sfdisk` rejects the blob.
pub fn apply(disk: &Path, blob: &[u8]) -> Result<(), DimError> {
	exec::run_with_stdin("sfdisk", &[&disk.display().to_string(), "--no-reread"], blob)?;
	Ok(())
}
