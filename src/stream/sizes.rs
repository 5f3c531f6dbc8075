//! Readable/writable size accounting for a disk-shaped object, grounded on
//! `DDeviceDiskInfoPrivate::totalReadableDataSize()` /
//! `maxReadableDataSize()` / `totalWritableDataSize()` in the original.
//!
//! These three numbers are reported in [`crate::json_info::DiskInfo`] and
//! drive progress-bar totals in the clone engine; they are deliberately kept
//! separate from the scope-by-scope [`super::readable_size`] query used at
//! stream-open time.

use crate::model::{DiskKind, DiskRef, HEAD_SIZE};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiskSizes {
	/// Sum of every scope this object can actually produce bytes for today:
	/// head (if present) or the first partition's start gap, the partition
	/// table region, and each non-extended partition's used bytes. The
	/// pre-first-partition gap is included here even when `Head` itself
	/// isn't a legal scope in that band (512 bytes – 1 MiB): those bytes are
	/// still transferred, just via the `fpsb` custom blob outside the scope
	/// protocol (spec.md §6) rather than through a pumped `Head` scope.
	pub total_readable: u64,
	/// The largest contiguous end offset this object spans: for a `Disk`,
	/// one past the last partition's end; for a bare `Partition`, its own
	/// size (spec.md §4.3). Unlike `total_readable` this is not a sum of
	/// per-scope contributions — it is a geometry bound, independent of
	/// which scopes are actually readable today.
	pub max_readable: u64,
	/// Total bytes a restore onto this object's full extent would consume:
	/// the object's raw size.
	pub total_writable: u64,
}

#[must_use]
pub fn compute(disk: &DiskRef) -> DiskSizes {
	DiskSizes { total_readable: total_readable(disk), max_readable: max_readable(disk), total_writable: disk.total_size }
}

fn total_readable(disk: &DiskRef) -> u64 {
	let mut total = 0u64;

	if matches!(disk.kind, DiskKind::Disk) {
		if disk.has_partition_table() {
			total += disk.pt_kind.table_size();
			total += leading_gap_size(disk);
		}
	}

	for part in &disk.children {
		if !part.is_clonable() {
			continue;
		}
		total += part.used_bytes.unwrap_or(part.length);
	}

	total
}

/// Bytes contributed by the `Head` scope (or the bare pre-first-partition gap
/// when `Head` itself isn't a legal scope): 1 MiB if the gap is at least that
/// wide, else the gap itself (`fpsb`, spec.md §6).
fn leading_gap_size(disk: &DiskRef) -> u64 {
	let first_start = disk.children.iter().map(|p| p.start).min().unwrap_or(0);
	first_start.min(HEAD_SIZE)
}

/// spec.md §4.3, literal: "largest contiguous end offset; for a Disk = last
/// partition's end+1; for a Partition = its own size." Not re-resolved by
/// the computed `total_readable_size()` definition above — that definition
/// only covers `total_readable_size()`, so this stays a pure geometry bound.
fn max_readable(disk: &DiskRef) -> u64 {
	match disk.kind {
		DiskKind::Partition => disk.total_size,
		DiskKind::Disk => disk.children.iter().map(|p| p.end().saturating_add(1)).max().unwrap_or(disk.total_size),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::model::{FsKind, GuidType, PartitionRef, PartitionTableKind};

	fn disk_with_one_partition(start: u64, length: u64, used: Option<u64>) -> DiskRef {
		DiskRef {
			kind: DiskKind::Disk,
			path: "/dev/sda".into(),
			name: "sda".to_string(),
			model: String::new(),
			serial: String::new(),
			transport: String::new(),
			removable: false,
			readonly: false,
			total_size: start + length + 4096,
			pt_kind: PartitionTableKind::Gpt,
			children: vec![PartitionRef {
				disk_name: "sda".to_string(),
				number: 1,
				kernel_path: "/dev/sda1".into(),
				name: "sda1".to_string(),
				start,
				length,
				mbr_type: None,
				fs_kind: FsKind::Ext4,
				guid_type: GuidType::InvalidGuid,
				extended: false,
				readonly: false,
				mount_point: None,
				used_bytes: used,
			}],
		}
	}

	#[test]
	fn readable_uses_used_bytes_when_known() {
		let disk = disk_with_one_partition(HEAD_SIZE, 10 * HEAD_SIZE, Some(HEAD_SIZE));
		let sizes = compute(&disk);
		assert_eq!(sizes.total_readable, PartitionTableKind::Gpt.table_size() + HEAD_SIZE + HEAD_SIZE);
	}

	#[test]
	fn max_readable_is_last_partition_end_plus_one() {
		let disk = disk_with_one_partition(HEAD_SIZE, 10 * HEAD_SIZE, Some(HEAD_SIZE));
		let sizes = compute(&disk);
		assert_eq!(sizes.max_readable, HEAD_SIZE + 10 * HEAD_SIZE);
	}

	#[test]
	fn max_readable_of_a_bare_partition_is_its_own_size() {
		let mut disk = disk_with_one_partition(2048, 10 * HEAD_SIZE, Some(0));
		disk.kind = DiskKind::Partition;
		disk.total_size = 42 * HEAD_SIZE;
		let sizes = compute(&disk);
		assert_eq!(sizes.max_readable, 42 * HEAD_SIZE);
	}

	#[test]
	fn small_leading_gap_is_capped_to_actual_gap() {
		let disk = disk_with_one_partition(2048, 10 * HEAD_SIZE, Some(0));
		let sizes = compute(&disk);
		assert_eq!(sizes.total_readable, PartitionTableKind::Gpt.table_size() + 2048);
	}
}
