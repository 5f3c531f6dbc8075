//! The `JsonInfo` metadata document, grounded verbatim on
//! `DDiskInfo::toJson()` in the original: the same field set, with every
//! integer size encoded as a decimal string to preserve 64-bit range across
//! consumers that round-trip through a JSON number type (spec.md §6).

use serde::{Deserialize, Serialize};

use crate::model::DiskRef;
use crate::stream::sizes::DiskSizes;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionInfo {
	pub number: u32,
	pub name: String,
	#[serde(rename = "kname")]
	pub kernel_path: String,
	pub start: String,
	pub length: String,
	#[serde(rename = "type")]
	pub mbr_type: Option<u8>,
	#[serde(rename = "fsType")]
	pub fs_type: String,
	#[serde(rename = "guidType")]
	pub guid_type: Option<String>,
	pub extended: bool,
	pub readonly: bool,
	pub mounted: Option<String>,
	#[serde(rename = "usedSize")]
	pub used_size: Option<String>,
}

impl From<&crate::model::PartitionRef> for PartitionInfo {
	fn from(p: &crate::model::PartitionRef) -> Self {
		Self {
			number: p.number,
			name: p.name.clone(),
			kernel_path: p.kernel_path.display().to_string(),
			start: p.start.to_string(),
			length: p.length.to_string(),
			mbr_type: p.mbr_type,
			fs_type: format!("{:?}", p.fs_kind),
			guid_type: match &p.guid_type {
				crate::model::GuidType::Guid(g) => Some(g.to_string()),
				crate::model::GuidType::InvalidGuid => None,
			},
			extended: p.extended,
			readonly: p.readonly,
			mounted: p.mount_point.clone(),
			used_size: p.used_bytes.map(|u| u.to_string()),
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiskInfo {
	#[serde(rename = "totalReadableDataSize")]
	pub total_readable_size: String,
	#[serde(rename = "maxReadableDataSize")]
	pub max_readable_size: String,
	#[serde(rename = "totalWritableDataSize")]
	pub total_writable_size: String,
	#[serde(rename = "filePath")]
	pub file_path: String,
	pub model: String,
	pub name: String,
	pub kname: String,
	#[serde(rename = "totalSize")]
	pub total_size: String,
	#[serde(rename = "typeName")]
	pub type_name: String,
	#[serde(rename = "type")]
	pub kind: i32,
	#[serde(rename = "ptTypeName")]
	pub pt_type_name: String,
	#[serde(rename = "ptType")]
	pub pt_type: i32,
	pub readonly: bool,
	pub removeable: bool,
	pub transport: String,
	pub serial: String,
	#[serde(rename = "childrenPartList")]
	pub children: Vec<PartitionInfo>,
}

impl DiskInfo {
	#[must_use]
	pub fn build(disk: &DiskRef, sizes: &DiskSizes) -> Self {
		Self {
			total_readable_size: sizes.total_readable.to_string(),
			max_readable_size: sizes.max_readable.to_string(),
			total_writable_size: sizes.total_writable.to_string(),
			file_path: disk.path.display().to_string(),
			model: disk.model.clone(),
			name: disk.name.clone(),
			kname: disk.name.clone(),
			total_size: disk.total_size.to_string(),
			type_name: match disk.kind {
				crate::model::DiskKind::Disk => "disk".to_string(),
				crate::model::DiskKind::Partition => "part".to_string(),
			},
			kind: match disk.kind {
				crate::model::DiskKind::Disk => 0,
				crate::model::DiskKind::Partition => 1,
			},
			pt_type_name: disk.pt_kind.name().to_string(),
			pt_type: match disk.pt_kind {
				crate::model::PartitionTableKind::None => 0,
				crate::model::PartitionTableKind::Mbr => 1,
				crate::model::PartitionTableKind::Gpt => 2,
				crate::model::PartitionTableKind::Unknown => 3,
			},
			readonly: disk.readonly,
			removeable: disk.removable,
			transport: disk.transport.clone(),
			serial: disk.serial.clone(),
			children: disk.children.iter().map(PartitionInfo::from).collect(),
		}
	}

	/// # Errors
	/// Propagates `serde_json` serialization failure (should not happen for this type).
	pub fn to_bytes(&self) -> Result<Vec<u8>, crate::error::DimError> {
		serde_json::to_vec_pretty(self).map_err(|e| crate::error::DimError::Invalid { reason: e.to_string() })
	}

	/// # Errors
	/// `Corrupt` if `bytes` doesn't parse as a [`DiskInfo`] document.
	pub fn from_bytes(bytes: &[u8]) -> Result<Self, crate::error::DimError> {
		serde_json::from_slice(bytes).map_err(|e| crate::error::DimError::Corrupt { reason: format!("bad JsonInfo document: {e}") })
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::model::{DiskKind, DiskRef, PartitionTableKind};

	fn sample_disk() -> DiskRef {
		DiskRef {
			kind: DiskKind::Disk,
			path: "/dev/sda".into(),
			name: "sda".to_string(),
			model: "Fake Disk".to_string(),
			serial: "SN123".to_string(),
			transport: "sata".to_string(),
			removable: false,
			readonly: false,
			total_size: 1024 * 1024 * 1024,
			pt_kind: PartitionTableKind::Gpt,
			children: vec![],
		}
	}

	#[test]
	fn round_trips_through_json() {
		let disk = sample_disk();
		let sizes = DiskSizes { total_readable: 100, max_readable: 200, total_writable: 1024 * 1024 * 1024 };
		let info = DiskInfo::build(&disk, &sizes);
		let bytes = info.to_bytes().unwrap();

		let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
		assert_eq!(value["totalReadableDataSize"], "100");
		assert_eq!(value["serial"], "SN123");

		let back = DiskInfo::from_bytes(&bytes).unwrap();
		assert_eq!(back.serial, "SN123");
	}
}
