//! Single-file index snapshots.
//!
//! Layout: a fixed 24-byte little-endian header followed by the bincode
//! encoding of the [`Index`].
//!
//! ```text
//! 0..4    magic "VIBX"
//! 4..6    format version
//! 6..8    flags (compression)
//! 8..16   payload length in bytes
//! 16..20  crc32 of the payload
//! 20..24  reserved, zero
//! ```
//!
//! Any disagreement between header and payload, including a short file, is
//! reported as `CorruptIndex`; a partially valid index is never returned.

use super::index::{Index, IndexParts, FORMAT_VERSION};
use super::{Result, VectorError};
use crc32fast::Hasher;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

const INDEX_MAGIC: [u8; 4] = *b"VIBX";
const HEADER_BYTES: usize = 24;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct FileHeader {
    version: u16,
    flags: u16,
    len: u64,
    crc32: u32,
}

impl FileHeader {
    fn encode(&self) -> [u8; HEADER_BYTES] {
        let mut buf = [0u8; HEADER_BYTES];
        buf[0..4].copy_from_slice(&INDEX_MAGIC);
        buf[4..6].copy_from_slice(&self.version.to_le_bytes());
        buf[6..8].copy_from_slice(&self.flags.to_le_bytes());
        buf[8..16].copy_from_slice(&self.len.to_le_bytes());
        buf[16..20].copy_from_slice(&self.crc32.to_le_bytes());
        buf
    }

    fn decode(buf: &[u8; HEADER_BYTES]) -> Result<Self> {
        if buf[0..4] != INDEX_MAGIC {
            return Err(corrupt("bad magic"));
        }
        let version = u16::from_le_bytes([buf[4], buf[5]]);
        if version != FORMAT_VERSION {
            return Err(corrupt(format!("unsupported format version {version}")));
        }
        let flags = u16::from_le_bytes([buf[6], buf[7]]);
        let mut len = [0u8; 8];
        len.copy_from_slice(&buf[8..16]);
        let crc32 = u32::from_le_bytes([buf[16], buf[17], buf[18], buf[19]]);
        Ok(Self {
            version,
            flags,
            len: u64::from_le_bytes(len),
            crc32,
        })
    }
}

/// Serializes `index` into `writer`; returns the bytes written.
pub fn write_to<W: Write>(index: &Index, mut writer: W) -> Result<u64> {
    let payload = bincode::serialize(index)
        .map_err(|err| VectorError::InvalidParameter(format!("serialize index: {err}")))?;
    let mut hasher = Hasher::new();
    hasher.update(&payload);
    let header = FileHeader {
        version: FORMAT_VERSION,
        flags: index.compression().flags(),
        len: payload.len() as u64,
        crc32: hasher.finalize(),
    };
    writer.write_all(&header.encode())?;
    writer.write_all(&payload)?;
    writer.flush()?;
    Ok((HEADER_BYTES + payload.len()) as u64)
}

/// Reads and fully validates an index from `reader`, which must hold exactly
/// one snapshot and nothing after it.
pub fn read_from<R: Read>(mut reader: R) -> Result<Index> {
    let mut header_buf = [0u8; HEADER_BYTES];
    read_exact_or_corrupt(&mut reader, &mut header_buf, "header")?;
    let header = FileHeader::decode(&header_buf)?;

    let len = usize::try_from(header.len).map_err(|_| corrupt("payload length overflows"))?;
    let mut payload = Vec::new();
    // `take` bounds the allocation by what is actually on disk.
    reader
        .by_ref()
        .take(header.len)
        .read_to_end(&mut payload)?;
    if payload.len() != len {
        return Err(corrupt(format!(
            "truncated payload: {} of {} bytes",
            payload.len(),
            len
        )));
    }
    let mut probe = [0u8; 1];
    if reader.read(&mut probe)? != 0 {
        return Err(corrupt("trailing bytes after payload"));
    }

    let mut hasher = Hasher::new();
    hasher.update(&payload);
    if hasher.finalize() != header.crc32 {
        return Err(corrupt("checksum mismatch"));
    }
    let parts: IndexParts = bincode::deserialize(&payload)
        .map_err(|err| corrupt(format!("payload decode: {err}")))?;
    if parts.meta.compression.flags() != header.flags {
        return Err(corrupt("header flags disagree with index metadata"));
    }
    Index::try_from(parts)
}

/// Writes `index` to `path` through a temporary sibling file that is synced
/// and renamed into place. On any failure the temporary file is removed.
pub fn save(index: &Index, path: impl AsRef<Path>) -> Result<u64> {
    let path = path.as_ref();
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir)?;
    }
    let tmp = tmp_path(path);
    let written = match write_synced(index, &tmp).and_then(|n| {
        fs::rename(&tmp, path)?;
        Ok(n)
    }) {
        Ok(n) => n,
        Err(err) => {
            let _ = fs::remove_file(&tmp);
            return Err(err);
        }
    };
    tracing::info!(
        path = %path.display(),
        bytes = written,
        vectors = index.len(),
        clusters = index.cluster_count(),
        "index saved"
    );
    Ok(written)
}

fn write_synced(index: &Index, tmp: &Path) -> Result<u64> {
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(tmp)?;
    let mut writer = BufWriter::new(file);
    let written = write_to(index, &mut writer)?;
    let file = writer
        .into_inner()
        .map_err(|err| VectorError::Io(err.into_error()))?;
    file.sync_data()?;
    Ok(written)
}

pub fn load(path: impl AsRef<Path>) -> Result<Index> {
    let path = path.as_ref();
    let file = File::open(path)?;
    let index = read_from(BufReader::new(file))?;
    tracing::info!(
        path = %path.display(),
        vectors = index.len(),
        clusters = index.cluster_count(),
        dim = index.dimension(),
        "index loaded"
    );
    Ok(index)
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

fn read_exact_or_corrupt<R: Read>(reader: &mut R, buf: &mut [u8], what: &str) -> Result<()> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => {
            Err(corrupt(format!("truncated {what}")))
        }
        Err(err) => Err(err.into()),
    }
}

fn corrupt(msg: impl Into<String>) -> VectorError {
    VectorError::CorruptIndex(msg.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::{Compression, ExternalId, IndexMeta, InvertedList, Metric, Payload};
    use std::io::Cursor;

    fn small_index() -> Index {
        Index::from_parts(
            IndexMeta {
                version: FORMAT_VERSION,
                dim: 2,
                metric: Metric::L2,
                clusters: 2,
                vector_count: 3,
                compression: Compression::None,
            },
            vec![vec![0.0, 0.0], vec![9.0, 9.0]],
            vec![
                InvertedList { rows: vec![0, 1] },
                InvertedList { rows: vec![2] },
            ],
            vec![ExternalId::from("a"), ExternalId::from("b"), ExternalId::Int(3)],
            Payload::Flat(vec![0.0, 0.1, 0.2, 0.0, 9.0, 9.5]),
        )
        .unwrap()
    }

    fn encode(index: &Index) -> Vec<u8> {
        let mut buf = Vec::new();
        write_to(index, &mut buf).unwrap();
        buf
    }

    /// Frames `index` with a valid header and checksum without validating it
    /// first, the way a buggy writer would.
    fn encode_unchecked(index: &Index) -> Vec<u8> {
        let payload = bincode::serialize(index).unwrap();
        let mut hasher = Hasher::new();
        hasher.update(&payload);
        let header = FileHeader {
            version: FORMAT_VERSION,
            flags: index.meta.compression.flags(),
            len: payload.len() as u64,
            crc32: hasher.finalize(),
        };
        let mut buf = header.encode().to_vec();
        buf.extend_from_slice(&payload);
        buf
    }

    #[test]
    fn round_trip_in_memory() {
        let index = small_index();
        let bytes = encode(&index);
        let back = read_from(Cursor::new(bytes)).unwrap();
        assert_eq!(back, index);
    }

    #[test]
    fn every_truncation_is_corrupt() {
        let bytes = encode(&small_index());
        for cut in 0..bytes.len() {
            let err = read_from(Cursor::new(&bytes[..cut])).unwrap_err();
            assert!(
                matches!(err, VectorError::CorruptIndex(_)),
                "cut={cut} err={err}"
            );
        }
    }

    #[test]
    fn flipped_payload_byte_fails_checksum() {
        let mut bytes = encode(&small_index());
        let last = bytes.len() - 1;
        bytes[last] ^= 0x40;
        let err = read_from(Cursor::new(bytes)).unwrap_err();
        assert!(err.to_string().contains("checksum"), "{err}");
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        let mut bytes = encode(&small_index());
        bytes.push(0);
        let err = read_from(Cursor::new(bytes)).unwrap_err();
        assert!(matches!(err, VectorError::CorruptIndex(_)));
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut bytes = encode(&small_index());
        bytes[0] = b'X';
        let err = read_from(Cursor::new(bytes)).unwrap_err();
        assert!(err.to_string().contains("magic"), "{err}");
    }

    #[test]
    fn inconsistent_metadata_is_rejected() {
        let mut index = small_index();
        index.meta.dim = 3;
        let err = read_from(Cursor::new(encode_unchecked(&index))).unwrap_err();
        assert!(err.to_string().contains("centroid 0"), "{err}");

        let mut index = small_index();
        index.lists[1].rows.push(7);
        let err = read_from(Cursor::new(encode_unchecked(&index))).unwrap_err();
        assert!(err.to_string().contains("row 7"), "{err}");
    }

    #[test]
    fn flags_must_match_metadata() {
        let index = small_index();
        let mut bytes = encode_unchecked(&index);
        bytes[6] = 1;
        let err = read_from(Cursor::new(bytes)).unwrap_err();
        assert!(err.to_string().contains("flags"), "{err}");
    }

    #[test]
    fn save_replaces_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("songs.vibx");
        let index = small_index();
        let written = save(&index, &path).unwrap();
        assert_eq!(written, fs::metadata(&path).unwrap().len());
        assert!(!tmp_path(&path).exists());
        assert_eq!(load(&path).unwrap(), index);
    }

    #[test]
    fn failed_rename_removes_tmp_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("taken");
        fs::create_dir(&path).unwrap();
        fs::write(path.join("keep"), b"x").unwrap();

        let err = save(&small_index(), &path).unwrap_err();
        assert!(matches!(err, VectorError::Io(_)), "{err}");
        assert!(!tmp_path(&path).exists());
        assert!(path.join("keep").exists());
    }
}
