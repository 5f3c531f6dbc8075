//! Command-line surface, grounded on the teacher's `KatsuCli` derive: a
//! `clap::Parser` struct with a handful of `env`-bound options mirroring
//! [`crate::config::Config`].

use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(author, version, about = "Clone or restore a disk, partition, or .dim container")]
pub struct DimCli {
	/// Disk, partition, `serial://` URL, or `.dim` container to read from.
	pub source: String,

	/// Disk, partition, `serial://` URL, or `.dim` container to write to.
	pub destination: String,

	/// Bytes per pump/partclone buffer.
	#[arg(long, env = "DIM_BUFFER_SIZE")]
	pub buffer_size: Option<u64>,

	/// partclone log file; defaults to `/dev/null`.
	#[arg(long, env = "DIM_LOG_FILE")]
	pub log_file: Option<PathBuf>,

	/// Reject loop devices as source or destination.
	#[arg(long, env = "DIM_DISABLE_LOOP")]
	pub disable_loop: bool,

	/// Regenerate filesystem UUIDs on the restored root partition during Fix_Boot.
	#[arg(long)]
	pub regenerate_uuids: bool,
}
