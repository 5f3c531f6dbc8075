//! Container-file realization of the Scoped Stream Engine: `read`/`write`
//! stream straight through to the container's own chunked region I/O
//! (spec.md §4.3's "File realization"), so a multi-gigabyte partition scope
//! never sits in memory as a whole.

use std::path::Path;

use crate::container::Container;
use crate::error::DimError;
use crate::json_info::DiskInfo;
use crate::model::{DiskRef, Mode, Scope};

use super::sizes::{self, DiskSizes};

enum Open {
	Closed,
	Read,
	Write,
}

/// A `.dim` container file open for scoped stream I/O: either accumulating a
/// new image (created fresh, not yet finalized) or serving an already
/// finalized one back out.
pub struct FileHandle {
	container: Container,
	/// Present while building a new container: the in-memory model used to
	/// compute progress totals and the eventual `JsonInfo` region, mirroring
	/// the device realization's own size accounting.
	source_disk: Option<DiskRef>,
	open: Open,
}

impl FileHandle {
	/// # Errors
	/// `Io` on filesystem failure creating the file.
	pub fn create(path: &Path, source_disk: DiskRef) -> Result<Self, DimError> {
		Ok(Self { container: Container::create(path)?, source_disk: Some(source_disk), open: Open::Closed })
	}

	/// # Errors
	/// `Corrupt` if the container isn't a valid, finalized `.dim` file.
	pub fn open_existing(path: &Path) -> Result<Self, DimError> {
		Ok(Self { container: Container::open(path)?, source_disk: None, open: Open::Closed })
	}

	#[must_use]
	pub fn path(&self) -> &Path {
		self.container.path()
	}

	#[must_use]
	pub fn has_scope(&self, scope: Scope, mode: Mode) -> bool {
		match mode {
			Mode::Read => self.container.has_scope(scope),
			Mode::Write => !self.container.is_finalized(),
		}
	}

	#[must_use]
	pub fn readable_size(&self, scope: Scope) -> Option<u64> {
		self.container.region_len(scope)
	}

	/// `Head`/`PartitionTable`/`Partition(i)` regions this container holds, in
	/// canonical clone order. `JsonInfo` is excluded, same as the device
	/// realization's [`super::device::DeviceHandle::known_scopes`].
	#[must_use]
	pub fn known_scopes(&self) -> Vec<Scope> {
		let mut scopes = Vec::new();
		if self.container.has_scope(Scope::Head) {
			scopes.push(Scope::Head);
		}
		if self.container.has_scope(Scope::PartitionTable) {
			scopes.push(Scope::PartitionTable);
		}
		scopes.extend(self.container.partition_indices().into_iter().map(Scope::Partition));
		scopes
	}

	fn computed_sizes(&self) -> DiskSizes {
		if let Some(disk) = &self.source_disk {
			return sizes::compute(disk);
		}
		self.embedded_sizes().unwrap_or(DiskSizes { total_readable: 0, max_readable: 0, total_writable: 0 })
	}

	fn embedded_sizes(&self) -> Option<DiskSizes> {
		let mut container = Container::open(self.container.path()).ok()?;
		let bytes = container.read_region(Scope::JsonInfo).ok()?;
		let info = DiskInfo::from_bytes(&bytes).ok()?;
		Some(DiskSizes {
			total_readable: info.total_readable_size.parse().ok()?,
			max_readable: info.max_readable_size.parse().ok()?,
			total_writable: info.total_writable_size.parse().ok()?,
		})
	}

	#[must_use]
	pub fn total_readable_size(&self) -> u64 {
		self.computed_sizes().total_readable
	}

	#[must_use]
	pub fn max_readable_size(&self) -> u64 {
		self.computed_sizes().max_readable
	}

	/// Containers grow to fit whatever is written to them; there is no fixed
	/// sink capacity the way a block device has one.
	#[must_use]
	pub fn total_writable_size(&self) -> u64 {
		if self.source_disk.is_some() { u64::MAX } else { self.computed_sizes().total_writable }
	}

	/// # Errors
	/// `NotSupported` if `has_scope` is false; propagates the container's read error otherwise.
	pub fn begin_scope(&mut self, scope: Scope, mode: Mode) -> Result<(), DimError> {
		self.end_scope()?;
		if !self.has_scope(scope, mode) {
			return Err(DimError::NotSupported { scope, mode });
		}

		self.open = match mode {
			Mode::Read => {
				self.container.begin_read(scope)?;
				Open::Read
			},
			Mode::Write => {
				self.container.begin_write(scope)?;
				Open::Write
			},
		};
		Ok(())
	}

	/// # Errors
	/// Propagates the container's flush/seal failure, if any.
	pub fn end_scope(&mut self) -> Result<(), DimError> {
		match std::mem::replace(&mut self.open, Open::Closed) {
			Open::Closed => Ok(()),
			Open::Read => {
				self.container.end_read();
				Ok(())
			},
			Open::Write => self.container.finish_write(),
		}
	}

	/// # Errors
	/// `Invalid` if no scope is open for reading.
	pub fn read(&mut self, buf: &mut [u8]) -> Result<usize, DimError> {
		match self.open {
			Open::Read => self.container.read_chunk(buf),
			Open::Write => Err(DimError::Invalid { reason: "scope is open for writing, not reading".to_string() }),
			Open::Closed => Err(DimError::Invalid { reason: "no scope open".to_string() }),
		}
	}

	/// # Errors
	/// `Invalid` if no scope is open for writing.
	pub fn write(&mut self, data: &[u8]) -> Result<usize, DimError> {
		match self.open {
			Open::Write => self.container.write_chunk(data),
			Open::Read => Err(DimError::Invalid { reason: "scope is open for reading, not writing".to_string() }),
			Open::Closed => Err(DimError::Invalid { reason: "no scope open".to_string() }),
		}
	}

	#[must_use]
	pub fn at_end(&self) -> bool {
		match self.open {
			Open::Read => self.container.read_remaining() == 0,
			Open::Write | Open::Closed => matches!(self.open, Open::Closed),
		}
	}

	/// Containers never fail mid-scope the way a child process can; failures
	/// surface immediately as `Err` from the call that caused them.
	#[must_use]
	pub const fn error_string(&self) -> Option<String> {
		None
	}

	/// Write the table of contents, sealing the container against further
	/// appends. Called once, after the last scope of a write session closes.
	///
	/// # Errors
	/// `Io` on filesystem failure.
	pub fn finalize(&mut self) -> Result<(), DimError> {
		self.container.finalize()
	}

	/// # Errors
	/// `Invalid` if the container is already finalized.
	pub fn append_custom_blob(&mut self, name: &str, data: &[u8]) -> Result<(), DimError> {
		self.container.append_custom(name, data)
	}

	/// # Errors
	/// `Corrupt` if a matching region exists but fails its checksum.
	pub fn read_custom_blob(&mut self, name: &str) -> Result<Option<Vec<u8>>, DimError> {
		self.container.read_custom(name)
	}
}
