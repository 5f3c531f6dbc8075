//! `serial://<disk-serial>[/<partition-index>]` — a device reference that
//! survives reboots (spec.md §6), grounded on `Helper::parseSerialUrl` /
//! `findDiskBySerialIndexNumber` / `toSerialUrl` in the original.

use std::path::PathBuf;

use crate::error::DimError;
use crate::osadapter::lsblk;

const SCHEME: &str = "serial://";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialRef {
	pub serial: String,
	pub partition_index: Option<u32>,
}

/// Parse a `serial://...` URL. Does not touch the filesystem.
///
/// # Errors
/// `Invalid` if the string isn't a well-formed serial URL.
pub fn parse(url: &str) -> Result<SerialRef, DimError> {
	let rest = url
		.strip_prefix(SCHEME)
		.ok_or_else(|| DimError::Invalid { reason: format!("not a serial:// URL: {url}") })?;

	let (serial, index_part) = match rest.split_once('/') {
		Some((s, i)) => (s, Some(i)),
		None => (rest, None),
	};

	if serial.is_empty() {
		return Err(DimError::Invalid { reason: format!("empty serial in URL: {url}") });
	}

	let partition_index = index_part
		.map(|i| i.parse::<u32>().map_err(|_| DimError::Invalid { reason: format!("bad partition index in URL: {url}") }))
		.transpose()?;

	Ok(SerialRef { serial: serial.to_string(), partition_index })
}

/// Resolve a parsed serial reference to its current kernel path by scanning
/// block devices; the kernel node name for a given serial can change across
/// reboots (hotplug order, USB renumbering), which is the entire point of
/// this indirection.
///
/// # Errors
/// `Invalid` if no currently-attached device carries that serial, or the
/// referenced partition index doesn't exist under it.
pub fn resolve(reference: &SerialRef) -> Result<PathBuf, DimError> {
	let devices = lsblk::enumerate(&[]);
	let disk = devices
		.iter()
		.find(|d| d.serial.as_deref() == Some(reference.serial.as_str()))
		.ok_or_else(|| DimError::Invalid { reason: format!("no device with serial {}", reference.serial) })?;

	let Some(index) = reference.partition_index else {
		return Ok(PathBuf::from(disk.path()));
	};

	disk.children
		.iter()
		.find(|c| partition_number(&c.name) == Some(index))
		.map(|c| PathBuf::from(c.path()))
		.ok_or_else(|| DimError::Invalid { reason: format!("serial {} has no partition {index}", reference.serial) })
}

fn partition_number(name: &str) -> Option<u32> {
	name.trim_start_matches(|c: char| !c.is_ascii_digit()).parse().ok()
}

/// Render a device's current path back into a `serial://` URL, the inverse of
/// [`resolve`]. `None` if the device has no serial (e.g. a loop device).
#[must_use]
pub fn to_serial_url(serial: &str, partition_index: Option<u32>) -> Option<String> {
	if serial.is_empty() {
		return None;
	}
	Some(match partition_index {
		Some(i) => format!("{SCHEME}{serial}/{i}"),
		None => format!("{SCHEME}{serial}"),
	})
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_disk_only() {
		let r = parse("serial://ABC123").unwrap();
		assert_eq!(r.serial, "ABC123");
		assert_eq!(r.partition_index, None);
	}

	#[test]
	fn parses_disk_and_partition() {
		let r = parse("serial://ABC123/2").unwrap();
		assert_eq!(r.serial, "ABC123");
		assert_eq!(r.partition_index, Some(2));
	}

	#[test]
	fn rejects_non_serial_url() {
		assert!(parse("/dev/sda").is_err());
	}

	#[test]
	fn round_trips_through_to_serial_url() {
		assert_eq!(to_serial_url("ABC123", Some(2)).as_deref(), Some("serial://ABC123/2"));
	}
}
