//! Builds an in-memory [`DiskRef`] model from [`osadapter::lsblk`] output.
//!
//! Grounded on `DDeviceDiskInfoPrivate::init()` in the original: dedup
//! children by `partuuid` (first occurrence wins), sort by start offset,
//! probe partition-table kind, and synthesize a single-child partition list
//! when the object itself is a partition or has no known table.

use std::collections::HashSet;
use std::path::Path;

use tracing::trace;

use crate::error::DimError;
use crate::model::{DiskKind, DiskRef, FsKind, GuidType, PartitionRef, PartitionTableKind};
use crate::osadapter::{fsprobe, lsblk, mount};

/// Build a [`DiskRef`] for `path` (a disk or a partition device node).
///
/// `disable_loop` rejects loop devices outright, mirroring
/// `Global::disableLoopDevice` in the original, which filters `type: "loop"`
/// entries out of `lsblk` results before building a disk model from them.
///
/// # Errors
/// `Invalid` if `lsblk` has no record of `path`, or it names a loop device
/// while `disable_loop` is set.
pub fn inspect(path: &Path, disable_loop: bool) -> Result<DiskRef, DimError> {
	let device = lsblk::get(path).ok_or_else(|| DimError::Invalid { reason: format!("no such block device: {}", path.display()) })?;
	if disable_loop && device.devtype == "loop" {
		return Err(DimError::Invalid { reason: format!("{} is a loop device and DIM_DISABLE_LOOP is set", path.display()) });
	}
	build(&device)
}

fn build(device: &lsblk::Device) -> Result<DiskRef, DimError> {
	let kind = if device.pkname.is_none() { DiskKind::Disk } else { DiskKind::Partition };

	let pt_probe_path = match kind {
		DiskKind::Disk => device.path(),
		DiskKind::Partition => device.pkname.clone().unwrap_or_else(|| device.path()),
	};
	let pt_kind = PartitionTableKind::from_blkid_token(&lsblk::partition_table_kind(Path::new(&pt_probe_path))?);

	let mut children = dedup_and_sort_children(&device.children);

	let have_table = matches!(kind, DiskKind::Disk) && pt_kind.is_known();

	if (!have_table && children.is_empty()) || matches!(kind, DiskKind::Partition) {
		children = vec![partition_from_device(device, u32_index(0, device))];
	}

	Ok(DiskRef {
		kind,
		path: Path::new(&device.path()).to_path_buf(),
		name: device.name.clone(),
		model: device.model.clone().unwrap_or_default(),
		serial: device.serial.clone().unwrap_or_default(),
		transport: device.tran.clone().unwrap_or_default(),
		removable: device.rm,
		readonly: device.ro || device.devtype == "rom",
		total_size: device.size,
		pt_kind: if matches!(kind, DiskKind::Disk) { pt_kind } else { PartitionTableKind::None },
		children,
	})
}

fn dedup_and_sort_children(raw: &[lsblk::Device]) -> Vec<PartitionRef> {
	let mut seen = HashSet::new();
	let mut out = Vec::new();

	for (idx, child) in raw.iter().enumerate() {
		if let Some(uuid) = &child.partuuid {
			if !uuid.is_empty() && !seen.insert(uuid.clone()) {
				trace!(uuid, "skipping duplicate partition by partuuid");
				continue;
			}
		}
		out.push(partition_from_device(child, u32_index(idx, child)));
	}

	out.sort_by_key(|p| p.start);
	out
}

fn u32_index(fallback_idx: usize, device: &lsblk::Device) -> u32 {
	// Prefer the trailing digits of the kernel name (`sda3` -> 3) over positional
	// index, since `children[]` order from lsblk isn't guaranteed to match
	// partition numbering once an extended partition is involved.
	device
		.name
		.trim_start_matches(|c: char| !c.is_ascii_digit())
		.parse()
		.unwrap_or_else(|_| u32::try_from(fallback_idx + 1).unwrap_or(0))
}

fn partition_from_device(device: &lsblk::Device, number: u32) -> PartitionRef {
	let fs_kind = FsKind::from_fstype(device.fstype.as_deref().unwrap_or_default());

	let guid_type = device
		.parttype
		.as_deref()
		.and_then(|t| uuid::Uuid::parse_str(t).ok())
		.map_or(GuidType::InvalidGuid, GuidType::Guid);

	let mbr_type = device
		.parttype
		.as_deref()
		.and_then(|t| u8::from_str_radix(t.trim_start_matches("0x"), 16).ok());

	let path = Path::new(&device.path());
	let used_bytes = fsprobe::usage(path).ok().map(|u| u.used);

	PartitionRef {
		disk_name: device.pkname.clone().unwrap_or_else(|| device.name.clone()),
		number,
		kernel_path: path.to_path_buf(),
		name: device.name.clone(),
		start: device.start.unwrap_or(0),
		length: device.size,
		mbr_type,
		fs_kind,
		guid_type,
		extended: matches!(mbr_type, Some(0x05 | 0x0f | 0x85)),
		readonly: device.ro,
		mount_point: device.mountpoint.clone().or_else(|| mount::mount_point(path)),
		used_bytes,
	}
}
