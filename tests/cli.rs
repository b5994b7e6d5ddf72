use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::fs;
use std::io::Write;
use std::os::unix::fs::symlink;
use std::process::Command;
use tempfile::tempdir;

fn mfutar() -> Command {
    Command::cargo_bin("mfutar").unwrap()
}

#[test]
fn create_list_extract_round_trip() -> Result<(), Box<dyn std::error::Error>> {
    let source_dir = tempdir()?;
    let file1_path = source_dir.path().join("file1.txt");
    let file2_path = source_dir.path().join("file2.log");
    let nested_dir = source_dir.path().join("nested");
    fs::create_dir(&nested_dir)?;
    let nested_file_path = nested_dir.join("nested_file.dat");

    let mut file1 = fs::File::create(&file1_path)?;
    writeln!(file1, "Hello, this is the first file.")?;
    let mut file2 = fs::File::create(&file2_path)?;
    writeln!(file2, "Some log data here.")?;
    let mut nested_file = fs::File::create(&nested_file_path)?;
    nested_file.write_all(&[0, 1, 2, 3, 4, 5])?;

    let archive_dir = tempdir()?;
    let archive_path = archive_dir.path().join("test_archive.tar");

    mfutar()
        .arg("create")
        .arg("--output")
        .arg(&archive_path)
        .arg(source_dir.path())
        .assert()
        .success();
    assert!(archive_path.exists());
    assert!(archive_path.with_extension("tar.idx").exists());

    mfutar()
        .arg("list")
        .arg(&archive_path)
        .assert()
        .success()
        .stdout(
            predicate::str::contains("file1.txt")
                .and(predicate::str::contains("file2.log"))
                .and(predicate::str::contains("nested_file.dat")),
        );

    let extract_dir = tempdir()?;
    mfutar()
        .arg("extract")
        .arg(&archive_path)
        .arg("-o")
        .arg(extract_dir.path())
        .assert()
        .success();

    assert_eq!(fs::read(extract_dir.path().join("file1.txt"))?, fs::read(&file1_path)?);
    assert_eq!(fs::read(extract_dir.path().join("file2.log"))?, fs::read(&file2_path)?);
    assert_eq!(
        fs::read(extract_dir.path().join("nested/nested_file.dat"))?,
        fs::read(&nested_file_path)?
    );

    Ok(())
}

#[test]
fn empty_directory_produces_trailer_only_archive() -> Result<(), Box<dyn std::error::Error>> {
    let source_dir = tempdir()?;
    let archive_dir = tempdir()?;
    let archive_path = archive_dir.path().join("empty.tar");

    mfutar()
        .arg("create")
        .arg("--output")
        .arg(&archive_path)
        .arg(source_dir.path())
        .assert()
        .success();

    let bytes = fs::read(&archive_path)?;
    assert!(bytes.len() >= 1024);
    assert!(bytes[bytes.len() - 1024..].iter().all(|&b| b == 0));

    Ok(())
}

#[test]
fn single_zero_byte_file_round_trips() -> Result<(), Box<dyn std::error::Error>> {
    let source_dir = tempdir()?;
    fs::File::create(source_dir.path().join("empty.bin"))?;

    let archive_dir = tempdir()?;
    let archive_path = archive_dir.path().join("zero.tar");
    mfutar()
        .arg("create")
        .arg("--output")
        .arg(&archive_path)
        .arg(source_dir.path())
        .assert()
        .success();

    let extract_dir = tempdir()?;
    mfutar()
        .arg("extract")
        .arg(&archive_path)
        .arg("-o")
        .arg(extract_dir.path())
        .assert()
        .success();

    let extracted = fs::metadata(extract_dir.path().join("empty.bin"))?;
    assert_eq!(extracted.len(), 0);

    Ok(())
}

#[test]
fn single_file_crossing_a_block_boundary_round_trips() -> Result<(), Box<dyn std::error::Error>> {
    let source_dir = tempdir()?;
    let content = vec![0x5Au8; 513];
    fs::write(source_dir.path().join("odd.bin"), &content)?;

    let archive_dir = tempdir()?;
    let archive_path = archive_dir.path().join("odd.tar");
    mfutar()
        .arg("create")
        .arg("--output")
        .arg(&archive_path)
        .arg(source_dir.path())
        .assert()
        .success();

    let extract_dir = tempdir()?;
    mfutar()
        .arg("extract")
        .arg(&archive_path)
        .arg("-o")
        .arg(extract_dir.path())
        .assert()
        .success();

    assert_eq!(fs::read(extract_dir.path().join("odd.bin"))?, content);
    Ok(())
}

#[test]
fn two_large_files_across_two_ranks_with_small_chunks() -> Result<(), Box<dyn std::error::Error>> {
    let source_dir = tempdir()?;
    let a = vec![0xAAu8; 1024 * 1024];
    let b = vec![0xBBu8; 1024 * 1024];
    fs::write(source_dir.path().join("a.bin"), &a)?;
    fs::write(source_dir.path().join("b.bin"), &b)?;

    let archive_dir = tempdir()?;
    let archive_path = archive_dir.path().join("two.tar");
    mfutar()
        .arg("create")
        .arg("--output")
        .arg(&archive_path)
        .arg("--ranks")
        .arg("2")
        .arg("--chunk-size")
        .arg((256 * 1024).to_string())
        .arg(source_dir.path())
        .assert()
        .success();

    let extract_dir = tempdir()?;
    mfutar()
        .arg("extract")
        .arg(&archive_path)
        .arg("-o")
        .arg(extract_dir.path())
        .arg("--ranks")
        .arg("2")
        .assert()
        .success();

    assert_eq!(fs::read(extract_dir.path().join("a.bin"))?, a);
    assert_eq!(fs::read(extract_dir.path().join("b.bin"))?, b);
    Ok(())
}

#[test]
fn symlink_round_trips_as_a_link_not_its_target() -> Result<(), Box<dyn std::error::Error>> {
    let source_dir = tempdir()?;
    fs::write(source_dir.path().join("real.txt"), b"target contents")?;
    symlink("real.txt", source_dir.path().join("link.txt"))?;

    let archive_dir = tempdir()?;
    let archive_path = archive_dir.path().join("links.tar");
    mfutar()
        .arg("create")
        .arg("--output")
        .arg(&archive_path)
        .arg(source_dir.path())
        .assert()
        .success();

    let extract_dir = tempdir()?;
    mfutar()
        .arg("extract")
        .arg(&archive_path)
        .arg("-o")
        .arg(extract_dir.path())
        .assert()
        .success();

    let link_meta = fs::symlink_metadata(extract_dir.path().join("link.txt"))?;
    assert!(link_meta.file_type().is_symlink());
    let target = fs::read_link(extract_dir.path().join("link.txt"))?;
    assert_eq!(target, std::path::PathBuf::from("real.txt"));

    Ok(())
}

#[test]
fn extraction_without_an_index_matches_indexed_extraction() -> Result<(), Box<dyn std::error::Error>> {
    let source_dir = tempdir()?;
    fs::write(source_dir.path().join("c.bin"), vec![9u8; 4096])?;

    let archive_dir = tempdir()?;
    let archive_path = archive_dir.path().join("no_index.tar");
    mfutar()
        .arg("create")
        .arg("--output")
        .arg(&archive_path)
        .arg("--no-index")
        .arg(source_dir.path())
        .assert()
        .success();
    assert!(!archive_path.with_extension("tar.idx").exists());

    let extract_dir = tempdir()?;
    mfutar()
        .arg("extract")
        .arg(&archive_path)
        .arg("-o")
        .arg(extract_dir.path())
        .assert()
        .success();

    assert_eq!(fs::read(extract_dir.path().join("c.bin"))?, vec![9u8; 4096]);
    Ok(())
}
