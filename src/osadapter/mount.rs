//! Mount-state queries and mutation.
//!
//! Grounded on `Helper::isMounted`/`umountDevice`/`mountDevice` in the
//! original: `findmnt` to read state, `mount`/`umount` to change it, with a
//! bounded retry loop on unmount (spec.md §4.1).

use std::path::Path;
use std::thread;
use std::time::Duration;

use tracing::warn;

use crate::error::DimError;
use crate::osadapter::exec;

const UNMOUNT_RETRIES: u32 = 5;
const UNMOUNT_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Current mount point of `device`, or `None` if it isn't mounted.
#[must_use]
pub fn mount_point(device: &Path) -> Option<String> {
	let args = ["-n", "-o", "TARGET", device.to_str()?];
	let out = exec::run_capture("findmnt", &args).ok()?;
	let target = String::from_utf8_lossy(&out).trim().to_string();
	if target.is_empty() {
		None
	} else {
		Some(target)
	}
}

#[must_use]
pub fn is_mounted(device: &Path) -> bool {
	mount_point(device).is_some()
}

/// Unmount `device`, retrying a bounded number of times if busy.
///
/// # Errors
/// `DeviceBusy` if every attempt fails.
pub fn unmount(device: &Path) -> Result<(), DimError> {
	if !is_mounted(device) {
		return Ok(());
	}

	let dev = device.display().to_string();
	for attempt in 1..=UNMOUNT_RETRIES {
		match exec::run_status("umount", &[&dev]) {
			Ok(()) => return Ok(()),
			Err(_) if attempt < UNMOUNT_RETRIES => {
				warn!(device = %dev, attempt, "umount busy, retrying");
				thread::sleep(UNMOUNT_RETRY_DELAY);
			},
			Err(_) => return Err(DimError::DeviceBusy { device: dev }),
		}
	}

	Err(DimError::DeviceBusy { device: dev })
}

/// Mount `device` at `path`, optionally read-only.
///
/// # Errors
/// `ToolFailed` if `mount` exits non-zero.
pub fn mount(device: &Path, path: &Path, readonly: bool) -> Result<(), DimError> {
	let dev = device.display().to_string();
	let dest = path.display().to_string();
	if readonly {
		exec::run_status("mount", &["-o", "ro", &dev, &dest])
	} else {
		exec::run_status("mount", &[&dev, &dest])
	}
}
