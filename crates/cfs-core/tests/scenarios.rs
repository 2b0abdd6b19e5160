use cfs_core::{
    AttachOptions, CfsError, ClusterIndex, FormatOptions, RecordIndex, RecordKind, Volume,
};
use std::path::PathBuf;

fn options(cluster_size: u32, capacity: u64) -> FormatOptions {
    FormatOptions {
        volume_name: "SCN".to_owned(),
        cluster_size,
        capacity,
    }
}

fn image_path(dir: &tempfile::TempDir) -> PathBuf {
    dir.path().join("volume.cfs")
}

#[test]
fn fresh_volume_matches_reference_geometry() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = image_path(&dir);
    let vol = Volume::format(&path, &options(4096, 4_096_000)).expect("format");
    let sb = vol.superblock().clone();
    assert_eq!(sb.reserved_clusters, 1000);
    assert_eq!(sb.free_clusters, 999);
    assert_eq!(sb.next_cluster_hint, ClusterIndex(1));
    assert_eq!(sb.next_record_hint, RecordIndex(1));
    assert_eq!(
        sb.volume_size,
        std::fs::metadata(&path).expect("meta").len()
    );
    vol.close().expect("close");

    let raw = std::fs::read(&path).expect("read image");
    assert_eq!(&raw[0..4], &0x5346_4843_u32.to_le_bytes());
    assert_eq!(&raw[60..64], &0x55AA_F5C3_u32.to_le_bytes());

    // Re-attaching reproduces the same superblock.
    let again = Volume::attach(&path).expect("attach");
    assert_eq!(again.superblock(), &sb);
    assert!(again.list_dir("/").expect("list").is_empty());
}

#[test]
fn format_never_overwrites_and_leaves_nothing_on_bad_options() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = image_path(&dir);
    std::fs::write(&path, b"precious").expect("seed");
    assert!(matches!(
        Volume::format(&path, &options(4096, 8192)),
        Err(CfsError::Format(_))
    ));
    assert_eq!(std::fs::read(&path).expect("read"), b"precious");

    let other = dir.path().join("bad.cfs");
    assert!(matches!(
        Volume::format(&other, &options(4097, 8192)),
        Err(CfsError::Format(_))
    ));
    assert!(!other.exists());
}

#[test]
fn attach_rejects_missing_and_foreign_files() {
    let dir = tempfile::tempdir().expect("tempdir");
    assert!(matches!(
        Volume::attach(dir.path().join("nope.cfs")),
        Err(CfsError::InvalidVolume(_))
    ));

    let foreign = dir.path().join("foreign.bin");
    std::fs::write(&foreign, vec![0xA5; 4096]).expect("seed");
    assert!(matches!(
        Volume::attach(&foreign),
        Err(CfsError::InvalidVolume(_))
    ));
}

#[test]
fn multi_cluster_content_round_trips() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = image_path(&dir);
    let mut vol = Volume::format(&path, &options(512, 64 * 512)).expect("format");
    vol.create_file("/big.bin").expect("create");

    let content: Vec<u8> = (0..5000_u32).map(|i| (i * 31 % 251) as u8).collect();
    vol.write_file("/big.bin", &content).expect("write");
    let stat = vol.stat("/big.bin", RecordKind::File).expect("stat");
    assert_eq!(stat.size, 5000);
    assert_eq!(stat.clusters, 5000_u32.div_ceil(512));
    assert_eq!(vol.read_file("/big.bin").expect("read"), content);
    vol.close().expect("close");

    let vol = Volume::attach(&path).expect("attach");
    assert_eq!(vol.read_file("/big.bin").expect("read"), content);
}

#[test]
fn delete_defragment_reattach_and_reuse() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = image_path(&dir);
    let mut vol = Volume::format(&path, &options(64, 64 * 40)).expect("format");

    let bodies: [Vec<u8>; 3] = [vec![1; 150], vec![2; 70], vec![3; 200]];
    for (i, body) in bodies.iter().enumerate() {
        let name = format!("/file{i}");
        vol.create_file(&name).expect("create");
        vol.write_file(&name, body).expect("write");
    }
    let free_before_delete = vol.free_clusters();
    vol.delete_file("/file0").expect("delete");
    assert_eq!(vol.free_clusters(), free_before_delete + 3);

    vol.defragment().expect("defragment");
    vol.close().expect("close");

    let mut vol = Volume::attach_with_options(&path, &AttachOptions { verify: true })
        .expect("attach");
    assert!(vol.superblock().was_defragmented());
    assert_eq!(vol.read_file("/file1").expect("read"), bodies[1]);
    assert_eq!(vol.read_file("/file2").expect("read"), bodies[2]);
    assert!(!vol.exists("/file0", RecordKind::File).expect("exists"));

    let reused = vol.create_file("/file3").expect("create after defrag");
    assert_eq!(reused, RecordIndex(3));
    vol.write_file("/file3", &[4; 100]).expect("write");
    assert_eq!(vol.read_file("/file3").expect("read"), vec![4; 100]);
    assert!(vol.verify().expect("verify").is_clean());
}

#[test]
fn root_record_is_always_protected() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut vol = Volume::format(image_path(&dir), &options(64, 64 * 8)).expect("format");
    for _ in 0..3 {
        assert!(matches!(
            vol.rename_dir("/", "X"),
            Err(CfsError::ProtectedRecord)
        ));
        assert!(matches!(
            vol.delete_dir("/"),
            Err(CfsError::ProtectedRecord)
        ));
        assert!(matches!(
            vol.delete_record(RecordIndex::ROOT),
            Err(CfsError::ProtectedRecord)
        ));
    }
    assert_eq!(
        vol.stat("/", RecordKind::Directory).expect("stat").name,
        "SCN"
    );
}

#[test]
fn deleting_twice_reports_not_found() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut vol = Volume::format(image_path(&dir), &options(64, 64 * 8)).expect("format");
    let index = vol.create_file("/once").expect("create");
    vol.delete_record(index).expect("first delete");
    assert!(matches!(
        vol.delete_record(index),
        Err(CfsError::NotFound(_))
    ));
    assert!(matches!(
        vol.delete_file("/once"),
        Err(CfsError::NotFound(_))
    ));
}

#[test]
fn deleted_clusters_are_zeroed_on_disk() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = image_path(&dir);
    let mut vol = Volume::format(&path, &options(64, 64 * 8)).expect("format");
    vol.create_file("/secret").expect("create");
    vol.write_file("/secret", &[0xEE; 128]).expect("write");
    vol.delete_file("/secret").expect("delete");
    let data_start = vol.layout().data_area_offset().0 as usize;
    vol.close().expect("close");

    let raw = std::fs::read(&path).expect("read image");
    assert!(!raw[data_start..].contains(&0xEE));
}

#[test]
fn directory_tree_survives_reattach() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = image_path(&dir);
    let mut vol = Volume::format(&path, &options(32, 32 * 64)).expect("format");
    vol.create_dir("/a").expect("mkdir");
    vol.create_dir("/a/b").expect("mkdir");
    for i in 0..10 {
        vol.create_file(&format!("/a/b/f{i}")).expect("create");
    }
    vol.move_dir("/a/b", "/").expect("move");
    vol.rename_dir("/b", "moved").expect("rename");
    vol.close().expect("close");

    let vol = Volume::attach(&path).expect("attach");
    let names: Vec<String> = vol
        .list_dir("/moved")
        .expect("list")
        .into_iter()
        .map(|e| e.name)
        .collect();
    assert_eq!(names.len(), 10);
    assert!(names.contains(&"f9".to_owned()));
    assert!(vol.list_dir("/a").expect("list").is_empty());
    assert!(vol.verify().expect("verify").is_clean());
}
