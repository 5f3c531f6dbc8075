//! Disk and partition clone/restore engine: a scoped stream protocol uniform
//! over live block devices and `.dim` container files, driven by a worker
//! thread that reports progress over a channel.

pub mod clone;
pub mod config;
pub mod container;
pub mod error;
pub mod fixboot;
pub mod introspect;
pub mod json_info;
pub mod model;
pub mod osadapter;
pub mod serial_url;
pub mod sizefmt;
pub mod stream;
pub mod tmpmount;

pub use clone::{CloneJob, CloneOptions, ClonedEvent, Status};
pub use config::Config;
pub use error::{DimError, Result};
pub use model::{DiskRef, Mode, PartitionRef, Scope};
pub use stream::DiskHandle;
