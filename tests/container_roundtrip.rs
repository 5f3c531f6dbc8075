//! End-to-end coverage of the container (file) realization of the Scoped
//! Stream Engine, without touching any real block device: everything here
//! goes through `FileHandle`, which never shells out.

use dim::json_info::DiskInfo;
use dim::model::{DiskKind, DiskRef, Mode, PartitionRef, PartitionTableKind, Scope};
use dim::stream::FileHandle;

fn fixture_disk() -> DiskRef {
	DiskRef {
		kind: DiskKind::Disk,
		path: "/dev/fake0".into(),
		name: "fake0".to_string(),
		model: "Fixture Disk".to_string(),
		serial: "FIXTURE-1".to_string(),
		transport: "sata".to_string(),
		removable: false,
		readonly: false,
		total_size: 10 * 1024 * 1024,
		pt_kind: PartitionTableKind::Gpt,
		children: vec![PartitionRef {
			disk_name: "fake0".to_string(),
			number: 1,
			kernel_path: "/dev/fake0p1".into(),
			name: "fake0p1".to_string(),
			start: 1024 * 1024,
			length: 8 * 1024 * 1024,
			mbr_type: None,
			fs_kind: dim::model::FsKind::Ext4,
			guid_type: dim::model::GuidType::InvalidGuid,
			extended: false,
			readonly: false,
			mount_point: None,
			used_bytes: Some(4 * 1024 * 1024),
		}],
	}
}

fn write_scope(handle: &mut FileHandle, scope: Scope, data: &[u8]) {
	handle.begin_scope(scope, Mode::Write).unwrap();
	let mut remaining = data;
	while !remaining.is_empty() {
		let n = handle.write(remaining).unwrap();
		remaining = &remaining[n..];
	}
	handle.end_scope().unwrap();
}

fn read_scope(handle: &mut FileHandle, scope: Scope) -> Vec<u8> {
	handle.begin_scope(scope, Mode::Read).unwrap();
	let mut out = Vec::new();
	let mut buf = [0u8; 64];
	loop {
		let n = handle.read(&mut buf).unwrap();
		if n == 0 {
			break;
		}
		out.extend_from_slice(&buf[..n]);
	}
	handle.end_scope().unwrap();
	out
}

#[test]
fn writes_all_scopes_then_reads_them_back_after_finalize() {
	let dir = tempfile::tempdir().unwrap();
	let path = dir.path().join("fixture.dim");
	let disk = fixture_disk();

	let sizes = dim::stream::sizes::compute(&disk);
	let info = DiskInfo::build(&disk, &sizes);
	let info_bytes = info.to_bytes().unwrap();

	{
		let mut writer = FileHandle::create(&path, disk.clone()).unwrap();
		write_scope(&mut writer, Scope::Head, b"head-region-bytes");
		write_scope(&mut writer, Scope::PartitionTable, b"partition-table-bytes");
		write_scope(&mut writer, Scope::Partition(1), &vec![0xABu8; 4096]);
		write_scope(&mut writer, Scope::JsonInfo, &info_bytes);
		writer.finalize().unwrap();
	}

	let mut reader = FileHandle::open_existing(&path).unwrap();
	assert!(reader.has_scope(Scope::Head, Mode::Read));
	assert!(reader.has_scope(Scope::Partition(1), Mode::Read));
	assert!(!reader.has_scope(Scope::Head, Mode::Write), "a finalized container refuses further writes");

	assert_eq!(read_scope(&mut reader, Scope::Head), b"head-region-bytes");
	assert_eq!(read_scope(&mut reader, Scope::Partition(1)), vec![0xABu8; 4096]);

	let round_tripped_info = DiskInfo::from_bytes(&read_scope(&mut reader, Scope::JsonInfo)).unwrap();
	assert_eq!(round_tripped_info.serial, "FIXTURE-1");
	assert_eq!(round_tripped_info.children.len(), 1);

	assert_eq!(reader.known_scopes(), vec![Scope::Head, Scope::PartitionTable, Scope::Partition(1)]);
}

#[test]
fn reading_an_absent_scope_is_an_error_not_a_panic() {
	let dir = tempfile::tempdir().unwrap();
	let path = dir.path().join("sparse.dim");
	let disk = fixture_disk();

	{
		let mut writer = FileHandle::create(&path, disk).unwrap();
		write_scope(&mut writer, Scope::Head, b"only-head");
		writer.finalize().unwrap();
	}

	let mut reader = FileHandle::open_existing(&path).unwrap();
	assert!(reader.begin_scope(Scope::Partition(1), Mode::Read).is_err());
}
