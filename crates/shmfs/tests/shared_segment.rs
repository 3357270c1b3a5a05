//! Tests against real SysV shared memory.
//!
//! Each test derives its key from a fresh temporary directory so runs never
//! collide, and tears its segment down before returning.

use shmfs::{FsConfig, FsService, NodeKind, Region, ShmFileSystem};

const SEGMENT_SIZE: usize = 1024 * 1024;

fn config(dir: &tempfile::TempDir) -> FsConfig {
    FsConfig::default()
        .with_key_path(dir.path())
        .with_segment_size(SEGMENT_SIZE)
        .with_init_wait_ms(1_000)
}

#[test]
fn two_attachments_see_each_other() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(&dir);

    let first = ShmFileSystem::init(&config).unwrap();
    let second = ShmFileSystem::init(&config).unwrap();
    assert_ne!(first.region().base(), second.region().base());
    assert_eq!(first.region().id(), second.region().id());

    first.mkdir("docs").unwrap();
    second.cd("docs").unwrap();
    second.create_file("readme", Some(b"shared")).unwrap();

    assert_eq!(first.pwd().unwrap(), "/docs");
    assert_eq!(first.read_file("readme").unwrap(), Some(b"shared".to_vec()));
    first.cd("/").unwrap();
    assert_eq!(first.ls().unwrap()[0].kind, NodeKind::Directory);

    drop(second);
    first.deinit().unwrap();
}

#[test]
fn tree_survives_detach_and_reattach() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(&dir);

    let fs = ShmFileSystem::init(&config).unwrap();
    fs.create_file("persisted", Some(b"still here")).unwrap();
    drop(fs);

    let fs = ShmFileSystem::init(&config).unwrap();
    assert_eq!(
        fs.read_file("persisted").unwrap(),
        Some(b"still here".to_vec())
    );
    fs.force_deinit().unwrap();
}

#[test]
fn deinit_removes_the_segment() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(&dir);

    let fs = ShmFileSystem::init(&config).unwrap();
    fs.mkdir("temporary").unwrap();
    fs.deinit().unwrap();

    let key = config.resolve_key().unwrap();
    assert!(shmfs::SharedSegment::attach_existing(key).is_err());

    let fs = ShmFileSystem::init(&config).unwrap();
    assert!(fs.ls().unwrap().is_empty());
    fs.force_deinit().unwrap();
}
