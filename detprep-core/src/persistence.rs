//! Package file writes.
//!
//! Every descriptor and shard is written to a `.tmp` sibling first and renamed into
//! place, so a reader never observes a half-written `model.json`.

use serde::Serialize;
use std::io::{self, Write};
use std::path::Path;

/// Serialize `data` as pretty JSON and write it atomically.
pub fn write_json_atomic<T: Serialize>(path: &Path, data: &T) -> io::Result<()> {
    let json = serde_json::to_string_pretty(data).map_err(io::Error::other)?;
    write_atomic(path, json.as_bytes())
}

/// Write raw bytes atomically, creating parent directories.
pub fn write_atomic(path: &Path, data: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, data)?;
    std::fs::rename(&tmp, path)
}

/// Write `len` zero bytes atomically through a fixed-size buffer.
pub fn write_zeros_atomic(path: &Path, len: u64) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    let mut file = io::BufWriter::new(std::fs::File::create(&tmp)?);
    let chunk = [0u8; 8192];
    let mut remaining = len;
    while remaining > 0 {
        let n = remaining.min(chunk.len() as u64) as usize;
        file.write_all(&chunk[..n])?;
        remaining -= n as u64;
    }
    file.flush()?;
    drop(file);
    std::fs::rename(&tmp, path)
}

/// Remove `dir` if present and recreate it empty.
pub fn reset_dir(dir: &Path) -> io::Result<()> {
    match std::fs::remove_dir_all(dir) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    std::fs::create_dir_all(dir)
}

/// Total size of the regular files directly inside `dir`.
pub fn dir_file_size(dir: &Path) -> io::Result<u64> {
    let mut total = 0;
    for entry in std::fs::read_dir(dir)? {
        let meta = entry?.metadata()?;
        if meta.is_file() {
            total += meta.len();
        }
    }
    Ok(total)
}
