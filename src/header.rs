//! Header Codec: encodes an [`Entry`] into a ustar base block plus, when
//! needed, a leading PAX extended-header record — and decodes that same
//! framing back out of a byte stream.
//!
//! This module is used as a one-shot header *serializer*: [`encode`] never
//! writes payload bytes or the archive trailer, so the layout planner can
//! probe-encode a header into a scratch buffer purely to measure it, and
//! the writer can re-encode the same entry later at its final offset.
//! `tar::Builder`'s `append_data` doesn't fit this: it always copies
//! exactly `header.size()` bytes from a reader into the stream, so this
//! codec builds directly on `tar::Header`'s fixed 512-byte ustar block
//! instead (see `tar-rs`'s `archive.rs`, which this module's decode side
//! mirrors for pax-extension framing).

use crate::error::{ArchiverError, Result};
use crate::flist::{Entry, EntryType, XAttr};
use std::io::Read;
use std::path::PathBuf;
use tar::{EntryType as TarEntryType, Header};

const BLOCK: usize = 512;

/// A decoded header plus the archive offset where its first block began,
/// and its ustar payload size (already pax-overridden if applicable).
#[derive(Debug, Clone)]
pub struct DecodedHeader {
    pub entry: Entry,
    /// Absolute byte offset where the payload (the data immediately
    /// following the header/extension blocks) begins.
    pub payload_offset: u64,
    /// Total size, in bytes, of every header/extension block consumed to
    /// produce this entry (ustar block + any preceding pax block(s)).
    pub header_size: u64,
}

/// Encodes `entry` into `buf`, returning the number of bytes written.
/// Returns `Err(Layout)` if `entry` would require more than `cap` bytes
/// (the caller's scratch buffer capacity).
pub fn encode(entry: &Entry, buf: &mut Vec<u8>, cap: usize) -> Result<usize> {
    buf.clear();

    let overflow = needs_pax(entry);
    if !overflow.is_empty() {
        encode_pax_block(&overflow, buf)?;
    }

    let mut header = Header::new_ustar();
    let name_bytes = entry.name.to_string_lossy();
    // `set_path` fails for names longer than ustar's 100+155 prefix/name
    // split; those are exactly the names the pax block above already
    // covers, so a short truncated fallback here is fine -- the real
    // name is recovered from the "path" pax record on decode.
    if header.set_path(entry.name.as_path()).is_err() {
        let _ = header.set_path(PathBuf::from(
            name_bytes.chars().rev().take(90).collect::<String>().chars().rev().collect::<String>(),
        ));
    }

    header.set_entry_type(to_tar_type(entry.kind));
    header.set_mode(entry.mode);
    header.set_uid(entry.uid as u64);
    header.set_gid(entry.gid as u64);
    header.set_mtime(entry.mtime_sec.max(0) as u64);
    header.set_size(if entry.kind == EntryType::Regular { entry.size } else { 0 });
    if !entry.uname.is_empty() {
        let _ = header.set_username(&entry.uname);
    }
    if !entry.gname.is_empty() {
        let _ = header.set_groupname(&entry.gname);
    }
    if let Some(target) = &entry.symlink_target {
        if header.set_link_name(target).is_err() {
            // overflow link name is carried in the pax block's "linkpath"
            // record; leave the ustar field truncated.
            let _ = header.set_link_name(PathBuf::from("@pax-linkpath-overflow@"));
        }
    }
    header.set_cksum();

    buf.extend_from_slice(header.as_bytes());

    if buf.len() > cap {
        return Err(ArchiverError::layout(format!(
            "encoded header for '{}' is {} bytes, exceeding the {}-byte scratch cap",
            entry.name.display(),
            buf.len(),
            cap
        )));
    }
    Ok(buf.len())
}

/// Decodes the next entry from `reader`, advancing it past the header (and
/// any pax extension block) but NOT past the payload. `base_offset` is the
/// stream position at the start of this call, used to compute
/// `payload_offset`. Returns `Ok(None)` at a proper end-of-archive (two
/// consecutive zero blocks).
pub fn decode_next<R: Read>(reader: &mut R, base_offset: u64) -> Result<Option<DecodedHeader>> {
    let mut block = [0u8; BLOCK];
    let mut cursor = base_offset;
    let mut pax_overrides: Option<PaxOverrides> = None;

    loop {
        read_block(reader, &mut block)?;
        cursor += BLOCK as u64;

        if block.iter().all(|&b| b == 0) {
            return Ok(None);
        }

        let header = Header::from_byte_slice(&block).clone();
        let entry_type = header.entry_type();

        if entry_type == TarEntryType::XHeader || entry_type == TarEntryType::XGlobalHeader {
            let size = header.entry_size().map_err(|e| ArchiverError::format(e.to_string()))?;
            let padded = crate::flist::entry::round_up_512(size) as usize;
            let mut payload = vec![0u8; padded];
            reader.read_exact(&mut payload).map_err(|e| ArchiverError::io(e, PathBuf::new()))?;
            cursor += padded as u64;
            if entry_type == TarEntryType::XHeader {
                pax_overrides = Some(parse_pax_records(&payload[..size as usize])?);
            }
            continue;
        }

        let mut name = header
            .path()
            .map_err(|e| ArchiverError::format(e.to_string()))?
            .to_path_buf();
        let mut size = header.entry_size().map_err(|e| ArchiverError::format(e.to_string()))?;
        let mut uid = header.uid().unwrap_or(0) as u32;
        let mut gid = header.gid().unwrap_or(0) as u32;
        let mut mtime = header.mtime().unwrap_or(0) as i64;
        let mut symlink_target = header
            .link_name()
            .ok()
            .flatten()
            .map(|p| p.to_path_buf());
        let uname = header.username().ok().flatten().unwrap_or("").to_string();
        let gname = header.groupname().ok().flatten().unwrap_or("").to_string();
        let mode = header.mode().unwrap_or(0o644);

        let mut atime = mtime;
        let mut xattrs = Vec::new();
        if let Some(ov) = pax_overrides.take() {
            if let Some(p) = ov.path {
                name = p;
            }
            if let Some(l) = ov.linkpath {
                symlink_target = Some(l);
            }
            if let Some(s) = ov.size {
                size = s;
            }
            if let Some(u) = ov.uid {
                uid = u;
            }
            if let Some(g) = ov.gid {
                gid = g;
            }
            if let Some(m) = ov.mtime {
                mtime = m;
            }
            if let Some(a) = ov.atime {
                atime = a;
            }
            xattrs = ov.xattrs;
        }

        let kind = match entry_type {
            TarEntryType::Regular | TarEntryType::Continuous => EntryType::Regular,
            TarEntryType::Directory => EntryType::Directory,
            TarEntryType::Symlink => EntryType::Symlink,
            _ => EntryType::Other,
        };

        let entry = Entry {
            name,
            kind,
            size: if kind == EntryType::Regular { size } else { 0 },
            uid,
            gid,
            uname,
            gname,
            mode,
            mtime_sec: mtime,
            mtime_nsec: 0,
            atime_sec: atime,
            atime_nsec: 0,
            ctime_sec: mtime,
            ctime_nsec: 0,
            symlink_target,
            xattrs,
        };

        return Ok(Some(DecodedHeader {
            entry,
            payload_offset: cursor,
            header_size: cursor - base_offset,
        }));
    }
}

fn read_block<R: Read>(reader: &mut R, block: &mut [u8; BLOCK]) -> Result<()> {
    reader.read_exact(block).map_err(|e| ArchiverError::io(e, PathBuf::new()))
}

fn to_tar_type(kind: EntryType) -> TarEntryType {
    match kind {
        EntryType::Regular => TarEntryType::Regular,
        EntryType::Directory => TarEntryType::Directory,
        EntryType::Symlink => TarEntryType::Symlink,
        EntryType::Other => TarEntryType::Regular,
    }
}

/// The set of pax records needed to represent fields the fixed ustar block
/// can't hold: names/link targets over 100+155 chars, a size too large for
/// the 12-octal-digit field, or a uid/gid/mtime that overflows 8 octal
/// digits. Also ferries xattrs under `SCHILY.xattr.<key>`, the convention
/// GNU tar and `tar-rs` both use.
struct PaxFields<'a> {
    path: Option<&'a str>,
    linkpath: Option<&'a str>,
    size: Option<u64>,
    uid: Option<u32>,
    gid: Option<u32>,
    mtime: Option<i64>,
    xattrs: &'a [XAttr],
}

fn needs_pax(entry: &Entry) -> Vec<(String, Vec<u8>)> {
    let mut records = Vec::new();
    let name = entry.name.to_string_lossy();
    if name.len() >= 100 {
        records.push(("path".to_string(), name.as_bytes().to_vec()));
    }
    if let Some(target) = &entry.symlink_target {
        let t = target.to_string_lossy();
        if t.len() >= 100 {
            records.push(("linkpath".to_string(), t.as_bytes().to_vec()));
        }
    }
    if entry.size >= 0o77777777777 {
        records.push(("size".to_string(), entry.size.to_string().into_bytes()));
    }
    if entry.uid > 0o7777777 {
        records.push(("uid".to_string(), entry.uid.to_string().into_bytes()));
    }
    if entry.gid > 0o7777777 {
        records.push(("gid".to_string(), entry.gid.to_string().into_bytes()));
    }
    if entry.mtime_sec < 0 || entry.mtime_sec as u64 > 0o7777777777 {
        records.push(("mtime".to_string(), entry.mtime_sec.to_string().into_bytes()));
    }
    // ustar has no atime field at all (unlike mtime, which has a ustar
    // fallback and only needs pax on overflow), so atime always rides in
    // the pax block or it's lost entirely.
    records.push(("atime".to_string(), entry.atime_sec.to_string().into_bytes()));
    for (key, value) in &entry.xattrs {
        records.push((format!("SCHILY.xattr.{}", key), value.clone()));
    }
    records
}

fn encode_pax_block(records: &[(String, Vec<u8>)], out: &mut Vec<u8>) -> Result<()> {
    let mut body = Vec::new();
    for (key, value) in records {
        append_pax_record(&mut body, key, value);
    }

    let mut header = Header::new_ustar();
    header.set_entry_type(TarEntryType::XHeader);
    let _ = header.set_path(format!("./PaxHeaders/pax-{}", body.len()));
    header.set_size(body.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();

    out.extend_from_slice(header.as_bytes());
    out.extend_from_slice(&body);
    let padded = crate::flist::entry::round_up_512(body.len() as u64) as usize;
    out.resize(out.len() + (padded - body.len()), 0);
    Ok(())
}

/// Appends one `"<len> key=value\n"` record, where `<len>` includes its
/// own decimal digits, the space, the key/value, and the trailing
/// newline, per the POSIX pax extended-header format.
fn append_pax_record(body: &mut Vec<u8>, key: &str, value: &[u8]) {
    let key_eq = format!("{}=", key);
    let mut len = key_eq.len() + value.len() + 1;
    let mut digits = len.to_string().len();
    loop {
        let candidate = digits + 1 + key_eq.len() + value.len() + 1;
        let candidate_digits = candidate.to_string().len();
        if candidate_digits == digits {
            len = candidate;
            break;
        }
        digits = candidate_digits;
    }
    body.extend_from_slice(len.to_string().as_bytes());
    body.push(b' ');
    body.extend_from_slice(key_eq.as_bytes());
    body.extend_from_slice(value);
    body.push(b'\n');
}

#[derive(Default)]
struct PaxOverrides {
    path: Option<PathBuf>,
    linkpath: Option<PathBuf>,
    size: Option<u64>,
    uid: Option<u32>,
    gid: Option<u32>,
    mtime: Option<i64>,
    atime: Option<i64>,
    xattrs: Vec<XAttr>,
}

fn parse_pax_records(body: &[u8]) -> Result<PaxOverrides> {
    let mut out = PaxOverrides::default();
    let mut pos = 0usize;
    while pos < body.len() {
        let space = body[pos..]
            .iter()
            .position(|&b| b == b' ')
            .ok_or_else(|| ArchiverError::format("malformed pax record: missing length field"))?;
        let len: usize = std::str::from_utf8(&body[pos..pos + space])
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| ArchiverError::format("malformed pax record: non-numeric length"))?;
        if pos + len > body.len() {
            return Err(ArchiverError::format("malformed pax record: length overruns body"));
        }
        let record = &body[pos..pos + len];
        let rest = &record[space + 1..record.len() - 1];
        if let Some(eq) = rest.iter().position(|&b| b == b'=') {
            let key = String::from_utf8_lossy(&rest[..eq]).into_owned();
            let value = &rest[eq + 1..];
            match key.as_str() {
                "path" => out.path = Some(PathBuf::from(String::from_utf8_lossy(value).into_owned())),
                "linkpath" => out.linkpath = Some(PathBuf::from(String::from_utf8_lossy(value).into_owned())),
                "size" => out.size = std::str::from_utf8(value).ok().and_then(|s| s.parse().ok()),
                "uid" => out.uid = std::str::from_utf8(value).ok().and_then(|s| s.parse().ok()),
                "gid" => out.gid = std::str::from_utf8(value).ok().and_then(|s| s.parse().ok()),
                "mtime" => {
                    out.mtime = std::str::from_utf8(value)
                        .ok()
                        .and_then(|s| s.split('.').next())
                        .and_then(|s| s.parse().ok())
                }
                "atime" => {
                    out.atime = std::str::from_utf8(value)
                        .ok()
                        .and_then(|s| s.split('.').next())
                        .and_then(|s| s.parse().ok())
                }
                _ if key.starts_with("SCHILY.xattr.") => {
                    let xattr_key = key["SCHILY.xattr.".len()..].to_string();
                    out.xattrs.push((xattr_key, value.to_vec()));
                }
                _ => {}
            }
        }
        pos += len;
    }
    Ok(out)
}
