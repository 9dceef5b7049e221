use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use block_dev::{BlockStorage, MemoryBlockStorage};
use toyfat::{Error, Image, DEFAULT_SECTOR_SIZE};

fn memory_image(total: u32) -> Image {
    Image::format(
        Arc::new(MemoryBlockStorage::new(total)),
        total,
        DEFAULT_SECTOR_SIZE as u32,
    )
    .unwrap()
}

fn temp_image() -> PathBuf {
    std::env::temp_dir().join(format!("toyfat-{}.img", uuid::Uuid::new_v4()))
}

#[test]
fn single_file_scenario() {
    let mut image = memory_image(1024);
    let free = image.superblock().free_sectors;
    let data: Vec<u8> = (0..600).map(|i| (i % 256) as u8).collect();

    image.add_file("a.txt", &data, false).unwrap();
    assert_eq!(image.superblock().free_sectors, free - 2);

    let listed = image.list_dir("/").unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].name(), "a.txt");
    assert_eq!(listed[0].size, 600);
    assert_eq!(image.chain(listed[0].first_sector).count(), 2);

    assert_eq!(image.extract("a.txt").unwrap(), data);
    assert!(image.check().unwrap().is_clean());
}

#[test]
fn allocation_is_conserved() {
    let mut image = memory_image(256);
    let free = image.superblock().free_sectors;

    image.make_dir("usr").unwrap();
    image.make_dir("usr/bin").unwrap();
    for i in 0..20 {
        let name = format!("usr/bin/app{i}");
        image.add_file(&name, &vec![i as u8; i * 300], i % 2 == 0).unwrap();
    }
    for i in (0..20).step_by(3) {
        image.remove(&format!("usr/bin/app{i}")).unwrap();
    }
    image.add_file("usr/bin/app1", b"smaller", true).unwrap();

    let report = image.check().unwrap();
    assert!(report.is_clean(), "{report}");
    assert_eq!(report.free_counted, image.superblock().free_sectors);
    assert_eq!(report.used_sectors + report.free_counted, free);
    assert_eq!(report.directories, 2);
    assert_eq!(report.files, 13);

    for i in (0..20).step_by(3) {
        image.remove(&format!("usr/bin/app{i}")).unwrap_err();
    }
    for i in (0..20).filter(|i| i % 3 != 0) {
        image.remove(&format!("usr/bin/app{i}")).unwrap();
    }
    image.remove("usr/bin").unwrap();
    image.remove("usr").unwrap();

    assert_eq!(image.superblock().free_sectors, free);
    assert!(image.check().unwrap().is_clean());
}

#[test]
fn out_of_space_keeps_image_consistent() {
    let mut image = memory_image(32);
    let free = image.superblock().free_sectors;
    let bytes = image.superblock().sector_bytes();

    image.add_file("keep", &[1; 100], false).unwrap();
    assert!(matches!(
        image.add_file("big", &vec![2; free as usize * bytes], false),
        Err(Error::NoSpace)
    ));
    // 替换失败时原文件不变
    assert!(matches!(
        image.add_file("keep", &vec![3; free as usize * bytes], false),
        Err(Error::NoSpace)
    ));

    assert_eq!(image.superblock().free_sectors, free - 1);
    assert_eq!(image.extract("keep").unwrap(), [1; 100]);
    assert_eq!(image.resolve_path("big").unwrap(), None);
    assert!(image.check().unwrap().is_clean());
}

#[test]
fn deleted_slots_are_reused_before_growing() {
    let mut image = memory_image(64);
    let root = image.superblock().root_sector;
    let per = image.superblock().dir_entries_per_sector();

    for i in 0..per {
        image.add_file(&format!("f{i}"), b"", false).unwrap();
    }
    image.remove("f1").unwrap();
    image.add_file("new", b"", false).unwrap();
    assert_eq!(image.chain(root).count(), 1);
    let (index, _) = image.find_in_directory(root, "new").unwrap().unwrap();
    assert_eq!(index, 1);

    image.add_file("more", b"", false).unwrap();
    assert_eq!(image.chain(root).count(), 2);
    assert_eq!(image.list_dir("").unwrap().len(), per + 1);
    assert!(image.check().unwrap().is_clean());
}

#[test]
fn file_backed_round_trip() {
    let path = temp_image();
    let mut image = Image::create(&path, 128, 64).unwrap();
    assert_eq!(fs::metadata(&path).unwrap().len(), 128 * 64 * 4);

    image.make_dir("etc").unwrap();
    image.add_file("etc/motd", b"hello from the image", false).unwrap();
    let sb = *image.superblock();
    image.close().unwrap();

    let image = Image::open(&path).unwrap();
    assert_eq!(*image.superblock(), sb);
    assert_eq!(image.get_superblock().unwrap(), sb);
    assert_eq!(image.extract("/etc/motd").unwrap(), b"hello from the image");
    assert!(image.check().unwrap().is_clean());
    image.close().unwrap();

    fs::remove_file(&path).unwrap();
}

#[test]
fn bad_geometry_leaves_file_alone() {
    let path = temp_image();
    fs::write(&path, b"precious").unwrap();

    assert!(matches!(
        Image::create(&path, 64, 100),
        Err(Error::BadSectorSize(100))
    ));
    assert!(matches!(
        Image::create(&path, 2, 128),
        Err(Error::TooSmall { total: 2, .. })
    ));
    assert_eq!(fs::read(&path).unwrap(), b"precious");

    fs::remove_file(&path).unwrap();
}

#[test]
fn rejects_foreign_images() {
    let storage = Arc::new(MemoryBlockStorage::new(16));
    storage.write(0, &[0xDEAD_BEEF], 128).unwrap();
    assert!(matches!(Image::load(storage), Err(Error::BadMagic(0xDEAD_BEEF))));

    let path = temp_image();
    fs::write(&path, [0u8; 512]).unwrap();
    assert!(matches!(Image::open(&path), Err(Error::BadMagic(0))));
    fs::remove_file(&path).unwrap();

    assert!(matches!(Image::open(temp_image()), Err(Error::NotFound(_))));
}

#[test]
fn storage_smaller_than_image() {
    let storage = Arc::new(MemoryBlockStorage::new(16));
    assert!(matches!(
        Image::format(storage.clone(), 32, 128),
        Err(Error::StorageTooSmall { storage: 16, image: 32 })
    ));

    // 超级块声称的大小超过后端
    let words = Image::format(Arc::new(MemoryBlockStorage::new(32)), 32, 128)
        .unwrap()
        .get_superblock()
        .unwrap()
        .to_words();
    storage.write(0, &words, 128).unwrap();
    assert!(matches!(
        Image::load(storage),
        Err(Error::StorageTooSmall { .. })
    ));
}
