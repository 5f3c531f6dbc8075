//! `DimError::exit_code()` must stay stable: scripts driving `dim-clone`
//! match on it, so each variant needs its own code and `Aborted` must never
//! collide with a real failure code.

use dim::error::DimError;
use dim::model::{Mode, Scope};

#[test]
fn every_variant_has_a_distinct_exit_code() {
	let errors = vec![
		DimError::ToolMissing { tool: "partclone.ext4".to_string() },
		DimError::ToolFailed { tool: "sfdisk".to_string(), exit: 1, stderr: String::new() },
		DimError::DeviceBusy { device: "/dev/sda1".to_string() },
		DimError::NotSupported { scope: Scope::JsonInfo, mode: Mode::Write },
		DimError::Corrupt { reason: "bad magic".to_string() },
		DimError::Aborted,
		DimError::Io(std::io::Error::other("boom")),
		DimError::Invalid { reason: "bad arg".to_string() },
	];

	let codes: Vec<i32> = errors.iter().map(DimError::exit_code).collect();
	let mut unique = codes.clone();
	unique.sort_unstable();
	unique.dedup();
	assert_eq!(codes.len(), unique.len(), "exit codes must be pairwise distinct");
}

#[test]
fn only_aborted_reports_is_aborted() {
	assert!(DimError::Aborted.is_aborted());
	assert!(!DimError::Corrupt { reason: String::new() }.is_aborted());
}
