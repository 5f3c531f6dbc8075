//! `lsblk` wrapper: enumerate block devices as structured records.
//!
//! Grounded on `examples/original_source`'s `Helper::getBlockDevices` (calls
//! `lsblk` and parses the JSON array) and on `rsturla-bootc`'s
//! `blockdev::list_dev`/`worldcoin-orb-software` sibling crates, which use the
//! same `lsblk -J` shape deserialized with `serde`.

use std::path::Path;

use serde::Deserialize;

use crate::error::DimError;
use crate::osadapter::exec;

#[derive(Debug, Deserialize)]
struct LsblkOutput {
	blockdevices: Vec<Device>,
}

/// One row of `lsblk -J -b -O -p`, deserialized as close to verbatim as
/// `serde` allows. Consumed by [`crate::introspect`] to build a [`crate::model::DiskRef`].
#[derive(Debug, Clone, Deserialize)]
#[allow(dead_code)]
pub struct Device {
	pub name: String,
	pub kname: String,
	pub path: Option<String>,
	pub size: u64,
	#[serde(default)]
	pub ro: bool,
	#[serde(default)]
	pub rm: bool,
	#[serde(rename = "type")]
	pub devtype: String,
	pub tran: Option<String>,
	pub serial: Option<String>,
	pub model: Option<String>,
	pub pkname: Option<String>,
	pub partuuid: Option<String>,
	pub parttype: Option<String>,
	pub fstype: Option<String>,
	pub mountpoint: Option<String>,
	pub start: Option<u64>,
	#[serde(default)]
	pub children: Vec<Device>,
}

impl Device {
	#[must_use]
	pub fn path(&self) -> String {
		self.path.clone().unwrap_or_else(|| format!("/dev/{}", self.name))
	}
}

/// Enumerate block devices, optionally restricted to `filter` paths.
///
/// Returns an empty array when `lsblk` is absent, matching spec.md §4.1's
/// "empty array on tool absence" failure mode (the wizard treats "no devices"
/// and "lsblk missing" identically: nothing to clone from).
pub fn enumerate(filter: &[&Path]) -> Vec<Device> {
	let mut args = vec!["-J", "-b", "-O", "-p"];
	let paths: Vec<String> = filter.iter().map(|p| p.display().to_string()).collect();
	for p in &paths {
		args.push(p);
	}

	match exec::run_capture("lsblk", &args) {
		Ok(stdout) => serde_json::from_slice::<LsblkOutput>(&stdout)
			.map(|out| out.blockdevices)
			.unwrap_or_default(),
		Err(_) => Vec::new(),
	}
}

/// Enumerate a single device by path; `None` if it doesn't exist or `lsblk` is absent.
#[must_use]
pub fn get(path: &Path) -> Option<Device> {
	enumerate(&[path]).into_iter().next()
}

/// Partition-table kind token: `dos`/`gpt`/empty, via `blkid -p -s PTTYPE -d -i -o value <dev>`.
///
/// # Errors
/// Never returns `Err` for an absent or unrecognized table; `blkid` returning
/// non-zero (no partition table at all) is folded into an empty token, matching
/// `getPTName()` in the original, which only ever inspects stdout.
pub fn partition_table_kind(device: &Path) -> Result<String, DimError> {
	let args = ["-p", "-s", "PTTYPE", "-d", "-i", "-o", "value", device.to_str().unwrap_or_default()];
	match exec::run_capture("blkid", &args) {
		Ok(stdout) => Ok(String::from_utf8_lossy(&stdout).trim().to_string()),
		Err(DimError::ToolFailed { .. }) => Ok(String::new()),
		Err(e) => Err(e),
	}
}
