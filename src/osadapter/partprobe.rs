//! Force the kernel to re-read a disk's partition table.
//!
//! Grounded on `Helper::refreshSystemPartList` in the original (which shells
//! `partprobe`) and `rsturla-bootc`'s `osutils::block_devices::partx_update`,
//! which falls back to `partx --update` where `partprobe` is unavailable.

use std::path::Path;

use crate::error::DimError;
use crate::osadapter::exec;

/// Re-read the partition table of `disk`.
///
/// # Errors
/// Propagates whatever error both `partprobe` and the `partx` fallback hit.
pub fn reread(disk: &Path) -> Result<(), DimError> {
	let dev = disk.display().to_string();
	match exec::run_status("partprobe", &[&dev]) {
		Ok(()) => Ok(()),
		Err(DimError::ToolMissing { .. }) => exec::run_status("partx", &["--update", &dev]),
		Err(e) => Err(e),
	}
}
