//! Device realization of the Scoped Stream Engine: each scope is backed by a
//! child process (`dd`, `sfdisk`, a `partclone.*` family member) with a
//! piped stdin or stdout, grounded verbatim on
//! `DDeviceDiskInfoPrivate::openDataStream`/`closeDataStream`/`write` in the
//! original.

use std::io::Read;
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tracing::{debug, warn};

use crate::error::{fmt_stderr, DimError};
use crate::model::{DiskKind, DiskRef, Mode, Scope, HEAD_SIZE};
use crate::osadapter::{self, exec, mount};

use super::sizes;

/// Bytes between the disk's first sector and its first partition, when that
/// gap is too small to hold a `Head` scope (512 bytes – 1 MiB) but still
/// non-empty: `fpsb`, carried as a container custom blob rather than a pumped
/// scope (spec.md §6).
const FPSB_MIN: u64 = 512;

const SPIN_SLEEP: Duration = Duration::from_millis(50);
const SPIN_BOUND: Duration = Duration::from_secs(10);
const FIRST_WARN_THRESHOLD: Duration = Duration::from_secs(5);

/// Watches a write-mode child's stdin for a `write` call blocked (kernel pipe
/// full, reader not draining) longer than a threshold that grows each time it
/// fires. Never aborts the write — only logs, matching the original's
/// `QElapsedTimer` + doubling-timeout loop in `write()`.
struct WriteWatchdog {
	pending_since: Arc<Mutex<Option<Instant>>>,
	stop: Arc<AtomicBool>,
	thread: Option<JoinHandle<()>>,
}

impl WriteWatchdog {
	fn start(scope: Scope) -> Self {
		let pending_since = Arc::new(Mutex::new(None::<Instant>));
		let stop = Arc::new(AtomicBool::new(false));

		let pending_since_t = Arc::clone(&pending_since);
		let stop_t = Arc::clone(&stop);

		let thread = thread::Builder::new()
			.name("dim-write-watch".to_string())
			.spawn(move || {
				let mut threshold = FIRST_WARN_THRESHOLD;
				loop {
					thread::sleep(Duration::from_millis(250));
					if stop_t.load(Ordering::Relaxed) {
						return;
					}
					let Some(since) = *pending_since_t.lock().unwrap() else {
						threshold = FIRST_WARN_THRESHOLD;
						continue;
					};
					if since.elapsed() >= threshold {
						warn!(?scope, waited = ?since.elapsed(), "sink write still pending, continuing to wait");
						threshold += FIRST_WARN_THRESHOLD;
					}
				}
			})
			.ok();

		Self { pending_since, stop, thread }
	}

	fn begin_write(&self) {
		*self.pending_since.lock().unwrap() = Some(Instant::now());
	}

	fn end_write(&self) {
		*self.pending_since.lock().unwrap() = None;
	}

	fn stop(self) {
		self.stop.store(true, Ordering::Relaxed);
		if let Some(t) = self.thread {
			let _ = t.join();
		}
	}
}

struct BufferIo {
	data: Vec<u8>,
	pos: usize,
}

struct WriteBuf {
	scope: Scope,
	data: Vec<u8>,
}

struct ChildIo {
	scope: Scope,
	mode: Mode,
	child: Child,
	stdin: Option<ChildStdin>,
	stdout: Option<ChildStdout>,
	stderr_buf: Arc<Mutex<Vec<u8>>>,
	stderr_thread: Option<JoinHandle<()>>,
	watchdog: Option<WriteWatchdog>,
	/// Set when the caller is tearing this scope down deliberately (abort, or
	/// a stream that was never fully drained); a non-zero exit in that case is
	/// not reported as a scope failure (spec.md §4.3).
	closing: bool,
	eof: bool,
}

#[derive(Default)]
enum Open {
	#[default]
	Closed,
	Buffer(BufferIo),
	WriteBuffer(WriteBuf),
	Child(ChildIo),
}

/// A live block device (or the disk-shaped object it represents), open for
/// scoped stream I/O.
pub struct DeviceHandle {
	pub disk: DiskRef,
	buffer_size: u64,
	log_file: PathBuf,
	open: Open,
	last_error: Option<String>,
}

impl DeviceHandle {
	#[must_use]
	pub fn new(disk: DiskRef, buffer_size: u64, log_file: PathBuf) -> Self {
		Self { disk, buffer_size, log_file, open: Open::Closed, last_error: None }
	}

	/// Mark the currently open scope as being torn down deliberately (abort,
	/// or closing early without draining to EOF): its exit status will not be
	/// reported as a failure by the next `end_scope`.
	pub fn mark_closing(&mut self) {
		if let Open::Child(c) = &mut self.open {
			c.closing = true;
		}
	}

	#[must_use]
	pub fn has_scope(&self, scope: Scope, mode: Mode) -> bool {
		match mode {
			Mode::Read => match scope {
				Scope::Head => self.head_allowed(),
				Scope::PartitionTable => self.disk.has_partition_table(),
				Scope::JsonInfo => true,
				Scope::Partition(i) => self.disk.get_partition(i).is_some_and(|p| p.is_clonable() && !p.is_fully_unknown()),
			},
			Mode::Write => {
				if self.disk.readonly {
					return false;
				}
				match scope {
					Scope::JsonInfo => false,
					Scope::Partition(0) => true,
					Scope::Partition(i) => self.disk.get_partition(i).is_some_and(|p| p.is_clonable() && !p.is_fully_unknown() && !p.readonly),
					Scope::Head => self.head_allowed(),
					Scope::PartitionTable => self.disk.has_partition_table(),
				}
			},
		}
	}

	fn head_allowed(&self) -> bool {
		if !matches!(self.disk.kind, DiskKind::Disk) || !self.disk.has_partition_table() {
			return false;
		}
		match self.disk.children.iter().map(|p| p.start).min() {
			None => true,
			Some(first_start) => first_start >= HEAD_SIZE,
		}
	}

	/// `Head`/`PartitionTable`/`Partition(i)` scopes this disk can currently be
	/// read from, in canonical clone order. `JsonInfo` is excluded: it is
	/// generated on demand as a distinct "Save_Info" step, not pumped like the
	/// others.
	#[must_use]
	pub fn known_scopes(&self) -> Vec<Scope> {
		let mut scopes = Vec::new();
		if self.has_scope(Scope::Head, Mode::Read) {
			scopes.push(Scope::Head);
		}
		if self.has_scope(Scope::PartitionTable, Mode::Read) {
			scopes.push(Scope::PartitionTable);
		}
		let mut numbers: Vec<u32> = self.disk.children.iter().filter(|p| self.has_scope(Scope::Partition(p.number), Mode::Read)).map(|p| p.number).collect();
		numbers.sort_unstable();
		scopes.extend(numbers.into_iter().map(Scope::Partition));
		scopes
	}

	#[must_use]
	pub fn readable_size(&self, scope: Scope) -> Option<u64> {
		match scope {
			Scope::Head => {
				if self.head_allowed() {
					let first_start = self.disk.children.iter().map(|p| p.start).min().unwrap_or(u64::MAX);
					Some(first_start.min(HEAD_SIZE))
				} else {
					None
				}
			},
			Scope::PartitionTable => self.disk.has_partition_table().then(|| self.disk.pt_kind.table_size()),
			Scope::Partition(i) => self.disk.get_partition(i).map(|p| p.length),
			Scope::JsonInfo => None,
		}
	}

	#[must_use]
	pub fn total_readable_size(&self) -> u64 {
		sizes::compute(&self.disk).total_readable
	}

	#[must_use]
	pub fn max_readable_size(&self) -> u64 {
		sizes::compute(&self.disk).max_readable
	}

	#[must_use]
	pub const fn total_writable_size(&self) -> u64 {
		self.disk.total_size
	}

	/// Width of the `fpsb` gap, if this disk has one: a non-empty span before
	/// the first partition too small to carry a `Head` scope.
	#[must_use]
	pub fn fpsb_gap(&self) -> Option<u64> {
		if !matches!(self.disk.kind, DiskKind::Disk) || !self.disk.has_partition_table() {
			return None;
		}
		let first_start = self.disk.children.iter().map(|p| p.start).min()?;
		(first_start > FPSB_MIN && first_start < HEAD_SIZE).then_some(first_start)
	}

	/// Read the `fpsb` band straight off the device, bypassing the scope
	/// protocol entirely.
	///
	/// # Errors
	/// `ToolMissing`/`ToolFailed` if `dd` can't be run or fails.
	pub fn capture_fpsb(&self) -> Result<Option<Vec<u8>>, DimError> {
		let Some(gap) = self.fpsb_gap() else { return Ok(None) };
		let disk_path = self.disk.path.display().to_string();
		let count = gap.to_string();
		let bytes = exec::run_capture("dd", &[&format!("if={disk_path}"), "bs=1", &format!("count={count}"), "status=none"])?;
		Ok(Some(bytes))
	}

	/// Write a previously captured `fpsb` blob back to the device.
	///
	/// # Errors
	/// `ToolMissing`/`ToolFailed` if `dd` can't be run or fails.
	pub fn write_fpsb(&self, bytes: &[u8]) -> Result<(), DimError> {
		let disk_path = self.disk.path.display().to_string();
		exec::run_with_stdin("dd", &[&format!("of={disk_path}"), "bs=1", "status=none", "conv=notrunc"], bytes)?;
		Ok(())
	}

	fn partition_path(&self, index: u32) -> Result<PathBuf, DimError> {
		if index == 0 {
			return Ok(self.disk.path.clone());
		}
		self.disk.get_partition(index).map(|p| p.kernel_path.clone()).ok_or_else(|| DimError::Invalid { reason: format!("no partition {index}") })
	}

	/// # Errors
	/// `NotSupported` if `has_scope(scope, mode)` is false; `ToolMissing` if
	/// the required external tool isn't on `PATH`; `DeviceBusy` if a
	/// partition can't be unmounted first.
	pub fn begin_scope(&mut self, scope: Scope, mode: Mode) -> Result<(), DimError> {
		self.end_scope()?;
		if !self.has_scope(scope, mode) {
			return Err(DimError::NotSupported { scope, mode });
		}
		self.last_error = None;

		match scope {
			Scope::JsonInfo => {
				let sizes = sizes::compute(&self.disk);
				let info = crate::json_info::DiskInfo::build(&self.disk, &sizes);
				let data = info.to_bytes()?;
				self.open = Open::Buffer(BufferIo { data, pos: 0 });
			},
			Scope::Head => {
				let disk_path = self.disk.path.display().to_string();
				let args: Vec<String> = match mode {
					Mode::Read => vec![format!("if={disk_path}"), "bs=512".into(), "count=2048".into(), "status=none".into()],
					Mode::Write => vec![format!("of={disk_path}"), "bs=512".into(), "status=none".into(), "conv=fsync".into()],
				};
				self.open = Open::Child(self.spawn_child(scope, mode, "dd", &args)?);
			},
			Scope::PartitionTable => match mode {
				Mode::Read => {
					let data = osadapter::sfdisk::dump(&self.disk.path)?;
					self.open = Open::Buffer(BufferIo { data, pos: 0 });
				},
				Mode::Write => {
					self.open = Open::WriteBuffer(WriteBuf { scope, data: Vec::new() });
				},
			},
			Scope::Partition(i) => {
				let part_path = self.partition_path(i)?;
				mount::unmount(&part_path)?;

				let bufsize = self.buffer_size.to_string();
				let log = self.log_file.display().to_string();
				let part = part_path.display().to_string();

				let (tool, args): (String, Vec<String>) = match mode {
					Mode::Read => {
						let suffix = self.disk.get_partition(i).map_or("dd", |p| p.fs_kind.partclone_suffix());
						(format!("partclone.{suffix}"), vec!["-s".into(), part, "-o".into(), "-".into(), "-c".into(), "-z".into(), bufsize, "-L".into(), log])
					},
					Mode::Write => ("partclone.restore".to_string(), vec!["-s".into(), "-".into(), "-o".into(), part, "-z".into(), bufsize, "-L".into(), log]),
				};
				self.open = Open::Child(self.spawn_child(scope, mode, &tool, &args)?);
			},
		}
		Ok(())
	}

	fn spawn_child(&self, scope: Scope, mode: Mode, tool: &str, args: &[String]) -> Result<ChildIo, DimError> {
		which::which(tool).map_err(|_| DimError::ToolMissing { tool: tool.to_string() })?;
		debug!(tool, ?args, ?scope, ?mode, "spawning scope child process");

		let mut cmd = Command::new(tool);
		cmd.args(args);
		match mode {
			Mode::Read => {
				cmd.stdin(Stdio::null());
				cmd.stdout(Stdio::piped());
			},
			Mode::Write => {
				cmd.stdin(Stdio::piped());
				cmd.stdout(Stdio::null());
			},
		}
		cmd.stderr(Stdio::piped());

		let mut child = cmd.spawn().map_err(DimError::Io)?;
		let stderr = child.stderr.take().expect("stderr was piped");
		let stderr_buf = Arc::new(Mutex::new(Vec::new()));
		let buf_t = Arc::clone(&stderr_buf);
		let stderr_thread = thread::Builder::new()
			.name("dim-scope-stderr".to_string())
			.spawn(move || {
				let mut reader = stderr;
				let mut out = Vec::new();
				let _ = reader.read_to_end(&mut out);
				*buf_t.lock().unwrap() = out;
			})
			.ok();

		let stdin = child.stdin.take();
		let stdout = child.stdout.take();
		let watchdog = matches!(mode, Mode::Write).then(|| WriteWatchdog::start(scope));

		Ok(ChildIo { scope, mode, child, stdin, stdout, stderr_buf, stderr_thread, watchdog, closing: false, eof: false })
	}

	/// # Errors
	/// Propagates the child's failure (crash, non-zero exit) unless the scope
	/// was marked closing via [`Self::mark_closing`].
	pub fn end_scope(&mut self) -> Result<(), DimError> {
		match std::mem::take(&mut self.open) {
			Open::Closed | Open::Buffer(_) => Ok(()),
			Open::WriteBuffer(wb) => self.finish_partition_table_write(wb),
			Open::Child(c) => self.close_child(c),
		}
	}

	fn finish_partition_table_write(&mut self, wb: WriteBuf) -> Result<(), DimError> {
		let result = osadapter::sfdisk::apply(&self.disk.path, &wb.data);
		if let Err(e) = &result {
			self.last_error = Some(e.to_string());
			return result;
		}
		if let Err(e) = crate::osadapter::partprobe::reread(&self.disk.path) {
			warn!(error = %e, "failed to re-read partition table after write");
		} else if let Ok(refreshed) = crate::introspect::inspect(&self.disk.path, false) {
			self.disk = refreshed;
		}
		Ok(())
	}

	fn close_child(&mut self, mut c: ChildIo) -> Result<(), DimError> {
		match c.mode {
			Mode::Write => {
				if let Some(wd) = c.watchdog.take() {
					wd.stop();
				}
				drop(c.stdin.take());
			},
			Mode::Read => {
				drop(c.stdout.take());
				send_signal(c.child.id(), Signal::SIGTERM);
			},
		}

		let status = wait_bounded(&mut c.child);

		let stderr_bytes = if let Some(t) = c.stderr_thread.take() {
			let _ = t.join();
			std::mem::take(&mut *c.stderr_buf.lock().unwrap())
		} else {
			Vec::new()
		};

		if c.closing {
			return Ok(());
		}

		let result = match status {
			Some(status) if status.success() => Ok(()),
			Some(status) => {
				let reason = if is_crash(&status) { "process crashed".to_string() } else { fmt_stderr(&stderr_bytes) };
				Err(DimError::ToolFailed { tool: format!("{:?}", c.scope), exit: status.code().unwrap_or(-1), stderr: reason })
			},
			None => Err(DimError::ToolFailed { tool: format!("{:?}", c.scope), exit: -1, stderr: "process did not exit during teardown".to_string() }),
		};

		if let Err(e) = &result {
			self.last_error = Some(e.to_string());
		}
		result
	}

	/// # Errors
	/// `Invalid` if no scope is currently open for reading; otherwise `Io`.
	pub fn read(&mut self, buf: &mut [u8]) -> Result<usize, DimError> {
		match &mut self.open {
			Open::Buffer(b) => {
				let remaining = &b.data[b.pos..];
				let n = remaining.len().min(buf.len());
				buf[..n].copy_from_slice(&remaining[..n]);
				b.pos += n;
				Ok(n)
			},
			Open::Child(c) => {
				let stdout = c.stdout.as_mut().ok_or_else(|| DimError::Invalid { reason: "scope has no open read stream".to_string() })?;
				let n = stdout.read(buf).map_err(DimError::Io)?;
				if n == 0 {
					c.eof = true;
				}
				Ok(n)
			},
			Open::Closed => Err(DimError::Invalid { reason: "no scope open".to_string() }),
		}
	}

	/// # Errors
	/// `Invalid` if no scope is currently open for writing; otherwise `Io`.
	pub fn write(&mut self, buf: &[u8]) -> Result<usize, DimError> {
		match &mut self.open {
			Open::WriteBuffer(wb) => {
				wb.data.extend_from_slice(buf);
				Ok(buf.len())
			},
			Open::Child(c) => {
				let stdin = c.stdin.as_mut().ok_or_else(|| DimError::Invalid { reason: "scope has no open write stream".to_string() })?;
				if let Some(wd) = &c.watchdog {
					wd.begin_write();
				}
				let result = std::io::Write::write(stdin, buf).map_err(DimError::Io);
				if let Some(wd) = &c.watchdog {
					wd.end_write();
				}
				result
			},
			Open::Buffer(_) => Err(DimError::Invalid { reason: "scope is not writable".to_string() }),
			Open::Closed => Err(DimError::Invalid { reason: "no scope open".to_string() }),
		}
	}

	#[must_use]
	pub fn at_end(&self) -> bool {
		match &self.open {
			Open::Buffer(b) => b.pos >= b.data.len(),
			Open::WriteBuffer(_) => false,
			Open::Child(c) => c.eof,
			Open::Closed => true,
		}
	}

	#[must_use]
	pub fn error_string(&self) -> Option<String> {
		self.last_error.clone()
	}
}

fn is_crash(status: &ExitStatus) -> bool {
	#[cfg(unix)]
	{
		use std::os::unix::process::ExitStatusExt;
		status.signal().is_some()
	}
	#[cfg(not(unix))]
	{
		let _ = status;
		false
	}
}

fn wait_bounded(child: &mut Child) -> Option<ExitStatus> {
	let start = Instant::now();
	loop {
		if let Ok(Some(status)) = child.try_wait() {
			return Some(status);
		}
		if !process_exists(child.id()) {
			return child.try_wait().ok().flatten();
		}
		if start.elapsed() > SPIN_BOUND {
			send_signal(child.id(), Signal::SIGKILL);
			let _ = child.wait();
			return child.try_wait().ok().flatten();
		}
		thread::sleep(SPIN_SLEEP);
	}
}

/// Best-effort signal delivery during teardown: the process may already be
/// gone by the time this runs, which isn't an error worth surfacing.
fn send_signal(pid: u32, sig: Signal) {
	let _ = signal::kill(Pid::from_raw(pid as i32), sig);
}

#[cfg(target_os = "linux")]
fn process_exists(pid: u32) -> bool {
	std::path::Path::new(&format!("/proc/{pid}")).exists()
}

#[cfg(not(target_os = "linux"))]
const fn process_exists(_pid: u32) -> bool {
	true
}
