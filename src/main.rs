use std::path::{Path, PathBuf};

use clap::Parser;
use color_eyre::eyre::eyre;
use dim::clone::{CloneJob, CloneOptions, ClonedEvent, Status};
use dim::config::Config;
use dim::error::DimError;
use dim::model::DiskRef;
use dim::stream::{DeviceHandle, DiskHandle, FileHandle};
use dim::{introspect, serial_url, sizefmt};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter, Registry};

mod cli;

use cli::DimCli;

fn main() -> color_eyre::Result<()> {
	if let Err(e) = dotenvy::dotenv() {
		if !e.not_found() {
			return Err(e.into());
		}
	}

	color_eyre::install()?;

	let filter = EnvFilter::try_from_env("DIM_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
	let fmtlyr = fmt::layer().pretty().with_filter(filter);
	let subscriber = Registry::default().with(tracing_error::ErrorLayer::default()).with(fmtlyr);
	tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

	sudo::escalate_if_needed().map_err(|e| eyre!("failed to escalate privileges: {e}"))?;

	let cli = DimCli::parse();
	let mut config = Config::from_env();
	if let Some(buffer_size) = cli.buffer_size {
		config.buffer_size = buffer_size;
	}
	if let Some(log_file) = &cli.log_file {
		config.log_file = log_file.clone();
	}
	if cli.disable_loop {
		config.disable_loop = true;
	}

	info!(source = %cli.source, destination = %cli.destination, "resolving endpoints");

	let (source, source_disk) = resolve_source(&cli.source, &config)?;
	let sink = resolve_sink(&cli.destination, &config, source_disk.as_ref())?;

	let job = CloneJob::start(source, sink, CloneOptions { buffer_size: config.buffer_size, regenerate_uuids: cli.regenerate_uuids });
	Ok(drain(job)?)
}

fn drain(mut job: CloneJob) -> Result<(), DimError> {
	let mut outcome: Result<(), DimError> = Ok(());

	for event in job.events() {
		match event {
			ClonedEvent::StatusChanged(status) => info!("{}", status_message(status)),
			ClonedEvent::Progress { bytes_copied, total, eta_seconds } => {
				let eta = eta_seconds.map_or_else(|| "unknown".to_string(), sizefmt::seconds_to_string);
				info!("{} / {} (eta {eta})", sizefmt::size_display(bytes_copied), sizefmt::size_display(total));
			},
			ClonedEvent::Failed(reason) => {
				outcome = Err(DimError::Invalid { reason });
			},
			ClonedEvent::Finished => {
				info!("clone finished");
			},
		}
	}

	job.join();
	outcome
}

fn status_message(status: Status) -> &'static str {
	match status {
		Status::Stopped => "stopped",
		Status::Started => "started",
		Status::CloneHead => "cloning head region",
		Status::ClonePartitionTable => "cloning partition table",
		Status::ClonePartition(_) => "cloning partition",
		Status::SaveInfo => "saving metadata",
		Status::FixBoot => "running fix_boot",
		Status::Failed => "failed",
	}
}

/// Resolve a CLI endpoint string to a read-side [`DiskHandle`]. Returns the
/// underlying [`DiskRef`] too, when the source is a live device, so a
/// container destination can borrow its size accounting.
fn resolve_source(raw: &str, config: &Config) -> Result<(DiskHandle, Option<DiskRef>), DimError> {
	if is_container_path(raw) {
		let handle = FileHandle::open_existing(Path::new(raw))?;
		return Ok((DiskHandle::File(handle), None));
	}

	let path = resolve_device_path(raw)?;
	let disk = introspect::inspect(&path, config.disable_loop)?;
	let handle = DeviceHandle::new(disk.clone(), config.buffer_size, config.log_file.clone());
	Ok((DiskHandle::Device(handle), Some(disk)))
}

fn resolve_sink(raw: &str, config: &Config, source_disk: Option<&DiskRef>) -> Result<DiskHandle, DimError> {
	if is_container_path(raw) {
		let disk = source_disk
			.cloned()
			.ok_or_else(|| DimError::Invalid { reason: "cannot create a container without a live source disk to describe it".to_string() })?;
		let handle = FileHandle::create(Path::new(raw), disk)?;
		return Ok(DiskHandle::File(handle));
	}

	let path = resolve_device_path(raw)?;
	let disk = introspect::inspect(&path, config.disable_loop)?;
	Ok(DiskHandle::Device(DeviceHandle::new(disk, config.buffer_size, config.log_file.clone())))
}

fn is_container_path(raw: &str) -> bool {
	Path::new(raw).extension().is_some_and(|ext| ext.eq_ignore_ascii_case("dim"))
}

fn resolve_device_path(raw: &str) -> Result<PathBuf, DimError> {
	if raw.starts_with("serial://") {
		let reference = serial_url::parse(raw)?;
		return serial_url::resolve(&reference);
	}
	let path = PathBuf::from(raw);
	if !path.exists() {
		warn!(path = %path.display(), "endpoint does not exist yet; proceeding anyway");
	}
	Ok(path)
}
