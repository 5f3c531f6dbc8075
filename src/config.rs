//! Process-environment configuration, read once at startup.
//!
//! Grounded on the teacher's small `env`-driven knobs (`KATSU_SKIP_PHASES`,
//! `KATSU_DRACUT_ARGS`): typed values pulled straight from `std::env`, with a
//! documented default rather than a config file, since this crate has no
//! manifest to parse.

use std::path::PathBuf;

use tracing::warn;

/// Default buffer size for scope pumps and partclone's own `-z` argument: 1 MiB,
/// the size spec.md recommends for the clone engine's pump loop.
pub const DEFAULT_BUFFER_SIZE: u64 = 1024 * 1024;

#[derive(Debug, Clone)]
pub struct Config {
	pub buffer_size: u64,
	pub log_file: PathBuf,
	pub disable_loop: bool,
}

impl Config {
	#[must_use]
	pub fn from_env() -> Self {
		Self {
			buffer_size: env_u64("DIM_BUFFER_SIZE").unwrap_or(DEFAULT_BUFFER_SIZE),
			log_file: std::env::var_os("DIM_LOG_FILE").map_or_else(|| PathBuf::from("/dev/null"), PathBuf::from),
			disable_loop: env_bool("DIM_DISABLE_LOOP"),
		}
	}
}

fn env_u64(name: &str) -> Option<u64> {
	let raw = std::env::var(name).ok()?;
	match raw.parse() {
		Ok(v) => Some(v),
		Err(_) => {
			warn!(name, raw, "ignoring malformed environment override");
			None
		},
	}
}

fn env_bool(name: &str) -> bool {
	std::env::var(name).is_ok_and(|v| matches!(v.trim(), "1" | "true" | "yes"))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn defaults_without_environment() {
		// SAFETY: test runs single-threaded w.r.t. this variable and restores it.
		std::env::remove_var("DIM_BUFFER_SIZE");
		std::env::remove_var("DIM_LOG_FILE");
		std::env::remove_var("DIM_DISABLE_LOOP");
		let cfg = Config::from_env();
		assert_eq!(cfg.buffer_size, DEFAULT_BUFFER_SIZE);
		assert_eq!(cfg.log_file, PathBuf::from("/dev/null"));
		assert!(!cfg.disable_loop);
	}
}
