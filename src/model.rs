//! The uniform data model shared by every component: [`Scope`], [`DiskRef`],
//! [`PartitionRef`] and their supporting enums.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// One open data region on a disk-shaped object.
///
/// `Partition(0)` is only meaningful on the write side, where it means
/// "whatever the path resolves to at write time" (restore-to-partition-directly).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Scope {
	Head,
	PartitionTable,
	Partition(u32),
	JsonInfo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
	Read,
	Write,
}

/// 1 MiB: the conventional head region and the boundary above which `Head` is
/// a legal scope (spec.md §3, resolved against `ddevicediskinfo.cpp::hasScope`).
pub const HEAD_SIZE: u64 = 1024 * 1024;

/// Bytes `sfdisk -d` dumps for an MBR table: one 512-byte sector.
pub const MBR_TABLE_SIZE: u64 = 512;
/// Bytes `sfdisk -d` dumps for a GPT table: the two header copies plus the two
/// 128-entry partition array copies (`DDeviceDiskInfoPrivate::totalReadableDataSize`).
pub const GPT_TABLE_SIZE: u64 = 17408 + 16896;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PartitionTableKind {
	None,
	Mbr,
	Gpt,
	Unknown,
}

impl PartitionTableKind {
	/// Parse the token `blkid -p -s PTTYPE -d -i -o value <dev>` prints.
	#[must_use]
	pub fn from_blkid_token(token: &str) -> Self {
		match token.trim() {
			"dos" => Self::Mbr,
			"gpt" => Self::Gpt,
			"" => Self::Unknown,
			_ => Self::Unknown,
		}
	}

	#[must_use]
	pub const fn is_known(self) -> bool {
		matches!(self, Self::Mbr | Self::Gpt)
	}

	#[must_use]
	pub const fn table_size(self) -> u64 {
		match self {
			Self::Mbr => MBR_TABLE_SIZE,
			Self::Gpt => GPT_TABLE_SIZE,
			Self::None | Self::Unknown => 0,
		}
	}

	#[must_use]
	pub const fn name(self) -> &'static str {
		match self {
			Self::None => "",
			Self::Mbr => "dos",
			Self::Gpt => "gpt",
			Self::Unknown => "unknown",
		}
	}
}

/// Filesystem kind, detected independently from the partition type code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum FsKind {
	Ext2,
	Ext3,
	Ext4,
	Xfs,
	Btrfs,
	Fat16,
	Fat32,
	Ntfs,
	LinuxSwap,
	#[default]
	Invalid,
	Other(String),
}

impl FsKind {
	/// Parse the `FSTYPE` column `lsblk` / `blkid` report.
	#[must_use]
	pub fn from_fstype(token: &str) -> Self {
		match token.trim() {
			"ext2" => Self::Ext2,
			"ext3" => Self::Ext3,
			"ext4" => Self::Ext4,
			"xfs" => Self::Xfs,
			"btrfs" => Self::Btrfs,
			"vfat" | "fat16" => Self::Fat16,
			"fat32" => Self::Fat32,
			"ntfs" => Self::Ntfs,
			"swap" | "linux-swap" => Self::LinuxSwap,
			"" => Self::Invalid,
			other => Self::Other(other.to_string()),
		}
	}

	#[must_use]
	pub const fn is_invalid(&self) -> bool {
		matches!(self, Self::Invalid)
	}

	/// Name of the `partclone.<name>` binary that reads/restores this filesystem, or
	/// `None` when no dedicated partclone module exists and the generic raw-block
	/// fallback (`partclone.dd`) must be used.
	#[must_use]
	pub fn partclone_suffix(&self) -> &str {
		match self {
			Self::Ext2 => "extfs",
			Self::Ext3 => "extfs",
			Self::Ext4 => "extfs",
			Self::Xfs => "xfs",
			Self::Btrfs => "btrfs",
			Self::Fat16 | Self::Fat32 => "fat",
			Self::Ntfs => "ntfs",
			Self::LinuxSwap | Self::Invalid | Self::Other(_) => "dd",
		}
	}
}

/// GPT partition type GUID; `InvalidGuid` stands in for MBR partitions, which
/// have no GUID.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum GuidType {
	Guid(uuid::Uuid),
	#[default]
	InvalidGuid,
}

impl GuidType {
	#[must_use]
	pub const fn is_invalid(&self) -> bool {
		matches!(self, Self::InvalidGuid)
	}
}

/// One partition of a disk (or, for a standalone partition/synthetic single-child
/// disk, the sole entry in `DiskRef::children`).
#[derive(Debug, Clone)]
pub struct PartitionRef {
	/// Name of the owning disk (`DiskRef::name`), not a full path.
	pub disk_name: String,
	/// 1-based kernel partition index (`sda1` -> `1`). `0` is reserved for the
	/// write-side "direct path" pseudo-partition.
	pub number: u32,
	pub kernel_path: PathBuf,
	pub name: String,

	pub start: u64,
	pub length: u64,

	/// MBR numeric type code (0x00-0xff) or, on GPT, `None` (the GUID carries
	/// the type there instead).
	pub mbr_type: Option<u8>,
	pub fs_kind: FsKind,
	pub guid_type: GuidType,

	pub extended: bool,
	pub readonly: bool,
	pub mount_point: Option<String>,

	/// `None` when the filesystem is unrecognized and usage cannot be probed.
	pub used_bytes: Option<u64>,
}

impl PartitionRef {
	#[must_use]
	pub const fn end(&self) -> u64 {
		self.start + self.length - 1
	}

	#[must_use]
	pub fn is_mounted(&self) -> bool {
		self.mount_point.is_some()
	}

	/// "unknown type + invalid fs + invalid GUID" — the original's `DPartInfo`
	/// tri-unknown case that must never be opened for read or write (spec.md §3).
	#[must_use]
	pub fn is_fully_unknown(&self) -> bool {
		let unknown_type = matches!(self.mbr_type, None | Some(0));
		unknown_type && self.fs_kind.is_invalid() && self.guid_type.is_invalid()
	}

	/// Never clone extended partitions (spec.md §3 invariant).
	#[must_use]
	pub const fn is_clonable(&self) -> bool {
		!self.extended
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiskKind {
	Disk,
	Partition,
}

/// Identity of a disk-shaped object: either a whole disk or a single partition
/// treated uniformly via its synthesized one-element `children` list.
#[derive(Debug, Clone)]
pub struct DiskRef {
	pub kind: DiskKind,
	pub path: PathBuf,
	pub name: String,

	pub model: String,
	pub serial: String,
	pub transport: String,
	pub removable: bool,
	pub readonly: bool,

	pub total_size: u64,
	pub pt_kind: PartitionTableKind,

	/// Ordered by ascending start offset; strictly ascending, no overlaps
	/// (spec.md §8 invariant).
	pub children: Vec<PartitionRef>,
}

impl DiskRef {
	#[must_use]
	pub fn file_path(&self) -> &std::path::Path {
		&self.path
	}

	#[must_use]
	pub fn get_partition(&self, number: u32) -> Option<&PartitionRef> {
		self.children.iter().find(|p| p.number == number)
	}

	/// A disk has a partition table only when its kind is known; a bare
	/// `Partition` DiskRef never carries one (spec.md §3 invariant).
	#[must_use]
	pub const fn has_partition_table(&self) -> bool {
		matches!(self.kind, DiskKind::Disk) && self.pt_kind.is_known()
	}
}
