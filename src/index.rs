//! Index Store: reads and writes the `.idx` sidecar that maps archive
//! entry order to absolute header offsets, letting the extractor seek
//! directly to any entry instead of scanning the whole archive.
//!
//! On-disk format: an 8-byte magic (`MFUIDX01`), a 32-byte BLAKE3 digest
//! of the archive's first 4 KiB (SPEC_FULL.md §9, Open Question
//! resolution #3 -- lets the extractor detect an index that was written
//! for a different archive and fall back to scanning instead of reading
//! garbage offsets), followed by `N` big-endian `u64` offsets packed
//! with `byteorder`, one per entry in archive order.

use crate::error::{ArchiverError, Result};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;

const MAGIC: &[u8; 8] = b"MFUIDX01";
const DIGEST_LEN: usize = 32;
const DIGEST_SAMPLE_BYTES: usize = 4096;

/// Computes the BLAKE3 digest of the first `DIGEST_SAMPLE_BYTES` of
/// `archive_path` (or the whole file if shorter), used to bind an index
/// to the specific archive it was built from.
fn archive_fingerprint(archive_path: &Path) -> Result<[u8; DIGEST_LEN]> {
    let mut file = File::open(archive_path).map_err(|e| ArchiverError::io(e, archive_path.to_path_buf()))?;
    let mut sample = vec![0u8; DIGEST_SAMPLE_BYTES];
    let mut total = 0usize;
    loop {
        let n = file
            .read(&mut sample[total..])
            .map_err(|e| ArchiverError::io(e, archive_path.to_path_buf()))?;
        if n == 0 {
            break;
        }
        total += n;
        if total == sample.len() {
            break;
        }
    }
    sample.truncate(total);
    Ok(*blake3::hash(&sample).as_bytes())
}

/// Writes `offsets` (one absolute header offset per archive entry, in
/// archive order) to `index_path`, fingerprinted against `archive_path`.
pub fn write_entry_index(index_path: &Path, archive_path: &Path, offsets: &[u64]) -> Result<()> {
    let fingerprint = archive_fingerprint(archive_path)?;
    let file = File::create(index_path).map_err(|e| ArchiverError::io(e, index_path.to_path_buf()))?;
    let mut w = BufWriter::new(file);
    w.write_all(MAGIC).map_err(|e| ArchiverError::io(e, index_path.to_path_buf()))?;
    w.write_all(&fingerprint).map_err(|e| ArchiverError::io(e, index_path.to_path_buf()))?;
    for &off in offsets {
        w.write_u64::<BigEndian>(off)
            .map_err(|e| ArchiverError::io(e, index_path.to_path_buf()))?;
    }
    w.flush().map_err(|e| ArchiverError::io(e, index_path.to_path_buf()))?;
    Ok(())
}

/// Reads back `index_path`'s offsets, verifying it was built from
/// `archive_path`. Returns `Err(Missing)` -- never panics or returns
/// corrupt offsets -- when the file is absent, truncated, carries an
/// unrecognized magic, or its fingerprint no longer matches the archive;
/// callers are expected to fall back to a full scan in that case.
pub fn read_entry_index(index_path: &Path, archive_path: &Path) -> Result<Vec<u64>> {
    let file = File::open(index_path).map_err(|e| ArchiverError::missing(e.to_string()))?;
    let mut r = BufReader::new(file);

    let mut magic = [0u8; 8];
    r.read_exact(&mut magic)
        .map_err(|_| ArchiverError::missing("index file truncated before magic".to_string()))?;
    if &magic != MAGIC {
        return Err(ArchiverError::missing("index file has an unrecognized magic".to_string()));
    }

    let mut digest = [0u8; DIGEST_LEN];
    r.read_exact(&mut digest)
        .map_err(|_| ArchiverError::missing("index file truncated before digest".to_string()))?;
    let expected = archive_fingerprint(archive_path)?;
    if digest != expected {
        return Err(ArchiverError::missing(
            "index fingerprint does not match the archive".to_string(),
        ));
    }

    let mut offsets = Vec::new();
    loop {
        match r.read_u64::<BigEndian>() {
            Ok(v) => offsets.push(v),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(ArchiverError::missing(format!("index file corrupt: {}", e))),
        }
    }
    Ok(offsets)
}

/// Truncates or extends `file` so its length is exactly `len` bytes,
/// used before writers begin positioned I/O so every `pwrite` lands
/// inside an already-sized file (spec.md §4.4 "preallocate").
pub fn preallocate(file: &mut File, len: u64) -> Result<()> {
    file.set_len(len).map_err(ArchiverError::from)?;
    file.seek(SeekFrom::Start(0)).map_err(ArchiverError::from)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn roundtrip_preserves_offsets() {
        let dir = tempdir().unwrap();
        let archive_path = dir.path().join("a.tar");
        std::fs::write(&archive_path, vec![0xABu8; 8192]).unwrap();
        let index_path = dir.path().join("a.tar.idx");

        let offsets = vec![0u64, 512, 1536, 4096];
        write_entry_index(&index_path, &archive_path, &offsets).unwrap();
        let read_back = read_entry_index(&index_path, &archive_path).unwrap();
        assert_eq!(read_back, offsets);
    }

    #[test]
    fn mismatched_archive_falls_back_to_missing() {
        let dir = tempdir().unwrap();
        let archive_path = dir.path().join("a.tar");
        std::fs::write(&archive_path, vec![1u8; 8192]).unwrap();
        let index_path = dir.path().join("a.tar.idx");
        write_entry_index(&index_path, &archive_path, &[0, 512]).unwrap();

        std::fs::write(&archive_path, vec![2u8; 8192]).unwrap();
        let result = read_entry_index(&index_path, &archive_path);
        assert!(matches!(result, Err(ArchiverError::Missing(_))));
    }

    #[test]
    fn absent_index_is_missing_not_panic() {
        let dir = tempdir().unwrap();
        let archive_path = dir.path().join("a.tar");
        std::fs::write(&archive_path, vec![0u8; 100]).unwrap();
        let index_path = dir.path().join("nonexistent.idx");
        assert!(read_entry_index(&index_path, &archive_path).is_err());
    }
}
