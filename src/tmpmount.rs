//! Temporary mount directory lifecycle, grounded on
//! `Helper::temporaryMountDevice` in the original. Released on drop under all
//! exit paths (spec.md §5), using `tempfile::TempDir` rather than hand-rolled
//! `mktemp` shelling (matching the teacher's use of `tempfile` for its own
//! scratch directories).

use std::path::Path;

use tempfile::TempDir;
use tracing::{debug, warn};

use crate::error::DimError;
use crate::osadapter::mount;

/// A mount point created for the lifetime of this handle; unmounted and
/// removed on drop.
pub struct TemporaryMount {
	dir: TempDir,
	device: std::path::PathBuf,
	mounted: bool,
}

impl TemporaryMount {
	/// Create a temp directory and mount `device` onto it.
	///
	/// # Errors
	/// `Io` if the directory can't be created; propagates `mount`'s error otherwise.
	pub fn new(device: &Path, readonly: bool) -> Result<Self, DimError> {
		let dir = TempDir::with_prefix("dim-mount-").map_err(DimError::Io)?;
		mount::mount(device, dir.path(), readonly)?;
		debug!(device = %device.display(), path = %dir.path().display(), "temporary mount established");
		Ok(Self { dir, device: device.to_path_buf(), mounted: true })
	}

	#[must_use]
	pub fn path(&self) -> &Path {
		self.dir.path()
	}
}

impl Drop for TemporaryMount {
	fn drop(&mut self) {
		if !self.mounted {
			return;
		}
		self.mounted = false;
		if let Err(e) = mount::unmount(&self.device) {
			warn!(device = %self.device.display(), error = %e, "failed to release temporary mount");
		}
	}
}
