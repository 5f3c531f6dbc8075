//! Filesystem used/free probes.
//!
//! Grounded on `Helper::getPartitionSizeInfo` in the original, which shells
//! out to read block usage for a mounted (or mountable) partition. This crate
//! uses `df -B1 --output=used,avail <part>` and parses the single data line
//! with `regex`, the same "parse one line of tool output" pattern
//! `rsturla-bootc`'s `blockdev.rs` and `other_examples`'s `rsblkid`/`blkid`
//! crates use for `lsblk --pairs` and friends.

use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;

use crate::error::DimError;
use crate::osadapter::exec;

pub struct FsUsage {
	pub used: u64,
	pub free: u64,
	pub block_size: u64,
}

/// Probe used/free bytes and block size for a partition.
///
/// # Errors
/// `Invalid` if the filesystem is unrecognized by `df` or its output doesn't
/// parse (spec.md §4.1: "unknown fs -> error").
pub fn usage(partition: &Path) -> Result<FsUsage, DimError> {
	let dev = partition.display().to_string();
	let out = exec::run_capture("df", &["-B1", "--output=used,avail", &dev])?;
	let text = String::from_utf8_lossy(&out);

	static LINE: OnceLock<Regex> = OnceLock::new();
	let re = LINE.get_or_init(|| Regex::new(r"(?m)^\s*(\d+)\s+(\d+)\s*$").unwrap());

	let caps = text
		.lines()
		.find_map(|line| re.captures(line))
		.ok_or_else(|| DimError::Invalid { reason: format!("could not parse `df` output for {dev}") })?;

	let used: u64 = caps[1].parse().map_err(|_| DimError::Invalid { reason: format!("bad used size in df output for {dev}") })?;
	let free: u64 = caps[2].parse().map_err(|_| DimError::Invalid { reason: format!("bad free size in df output for {dev}") })?;

	Ok(FsUsage { used, free, block_size: block_size(partition).unwrap_or(4096) })
}

fn block_size(partition: &Path) -> Option<u64> {
	let dev = partition.to_str()?;
	let out = exec::run_capture("blockdev", &["--getbsz", dev]).ok()?;
	String::from_utf8_lossy(&out).trim().parse().ok()
}
