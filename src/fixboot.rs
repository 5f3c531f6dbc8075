//! `Fix_Boot`: the clone engine's best-effort post-processing hook, grounded
//! on `Helper::isDeepinSystem`/`resetPartUUID` in the original. A distro
//! fingerprint table decides whether the restored system is one this crate
//! knows how to touch; UUID regeneration goes through the OS Adapter's own
//! filesystem-specific tool.
//!
//! Only one fingerprint is seeded (a generic `/etc/os-release` presence
//! check) — the original's Deepin-specific detection doesn't carry over, per
//! the rule against importing source-vendor branding. The table exists to be
//! extended, not as a placeholder.

use std::path::Path;

use tracing::debug;

use crate::error::DimError;
use crate::model::{FsKind, PartitionRef};
use crate::osadapter::exec;
use crate::tmpmount::TemporaryMount;

pub struct DistroFingerprint {
	pub name: &'static str,
	pub probe: fn(&Path) -> bool,
	pub rewrite_loader: fn(&Path) -> Result<(), DimError>,
}

#[must_use]
pub fn fingerprints() -> Vec<DistroFingerprint> {
	vec![DistroFingerprint { name: "generic-os-release", probe: has_os_release, rewrite_loader: rewrite_generic_loader }]
}

fn has_os_release(root: &Path) -> bool {
	root.join("etc/os-release").is_file()
}

/// Regenerate the GRUB config inside `root` via `chroot`, grounded on
/// `grub_mkconfig` in the original build tool (`grub2-mkconfig -o
/// <target>/boot/grub2/grub.cfg`), generalized here since the restored root
/// isn't the live system: a no-op when the root carries no `grub2-mkconfig`.
fn rewrite_generic_loader(root: &Path) -> Result<(), DimError> {
	if !root.join("usr/sbin/grub2-mkconfig").is_file() && !root.join("sbin/grub2-mkconfig").is_file() {
		return Ok(());
	}
	let root_str = root.display().to_string();
	exec::run_status("chroot", &[&root_str, "grub2-mkconfig", "-o", "/boot/grub2/grub.cfg"])
}

pub struct FixBootOptions {
	pub regenerate_uuids: bool,
}

/// Run the best-effort post-restore hook against the just-written root
/// partition. Never fails the clone job: every error downgrades to a
/// `debug!` log line (spec.md §4.5: "downgrades status to a warning but does
/// not fail the job").
pub fn run(part: &PartitionRef, opts: &FixBootOptions) {
	if opts.regenerate_uuids {
		if let Err(e) = regenerate_uuid(part) {
			debug!(partition = %part.name, error = %e, "uuid regeneration skipped");
		}
	}

	match TemporaryMount::new(&part.kernel_path, true) {
		Ok(mount) => {
			let fp = fingerprints().into_iter().find(|fp| (fp.probe)(mount.path()));
			debug!(partition = %part.name, recognized = fp.is_some(), "distro fingerprint probe complete");
			if let Some(fp) = fp {
				if let Err(e) = (fp.rewrite_loader)(mount.path()) {
					debug!(partition = %part.name, distro = fp.name, error = %e, "loader rewrite skipped");
				}
			}
		},
		Err(e) => debug!(partition = %part.name, error = %e, "could not mount partition to probe distro fingerprint"),
	}
}

fn regenerate_uuid(part: &PartitionRef) -> Result<(), DimError> {
	let dev = part.kernel_path.display().to_string();
	match part.fs_kind {
		FsKind::Ext2 | FsKind::Ext3 | FsKind::Ext4 => exec::run_status("tune2fs", &["-U", "random", &dev]),
		FsKind::Xfs => exec::run_status("xfs_admin", &["-U", "generate", &dev]),
		FsKind::Btrfs => exec::run_status("btrfstune", &["-u", &dev]),
		FsKind::Fat16 | FsKind::Fat32 | FsKind::Ntfs | FsKind::LinuxSwap | FsKind::Invalid | FsKind::Other(_) => {
			Err(DimError::Invalid { reason: format!("no UUID tool for filesystem on {dev}") })
		},
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn os_release_probe_matches_a_real_root() {
		let dir = tempfile::tempdir().unwrap();
		std::fs::create_dir(dir.path().join("etc")).unwrap();
		std::fs::write(dir.path().join("etc/os-release"), "ID=test\n").unwrap();
		assert!(has_os_release(dir.path()));
	}

	#[test]
	fn os_release_probe_rejects_empty_root() {
		let dir = tempfile::tempdir().unwrap();
		assert!(!has_os_release(dir.path()));
	}
}
