//! Local filesystem primitives backing [`crate::backend::LocalBackend`].

use std::fs;
use std::io::{BufReader, Read};
use std::path::Path;

use crate::backend::SmartRead;
use crate::fs::node::{extension_of, millis_since_epoch, RawEntry};

/// Files above this size are never returned inline (10 MiB).
pub const DEFAULT_MAX_READ_BYTES: u64 = 10 * 1024 * 1024;

/// Known binary file extensions.
const BINARY_EXTENSIONS: &[&str] = &[
    "pt", "pth", "h5", "hdf5", "pkl", "pickle", "onnx", "zip", "tar", "gz", "bz2", "xz", "so",
    "dylib", "exe", "bin", "img", "iso", "png", "jpg", "jpeg", "gif", "pdf", "wasm",
];

/// List the direct children of `dir`.
///
/// Entries that vanish or cannot be stat'ed between `read_dir` and
/// `symlink_metadata` are skipped; failing to open `dir` itself is an error.
pub fn list_directory(dir: &Path, include_hidden: bool, depth: usize) -> std::io::Result<Vec<RawEntry>> {
    let mut entries = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = match entry {
            Ok(e) => e,
            Err(_) => continue,
        };
        let name = entry.file_name().to_string_lossy().to_string();
        if !include_hidden && name.starts_with('.') {
            continue;
        }
        let path = entry.path();
        let metadata = match fs::symlink_metadata(&path) {
            Ok(m) => m,
            Err(_) => continue,
        };
        let is_directory = metadata.is_dir();
        entries.push(RawEntry {
            extension: if is_directory { None } else { extension_of(&path) },
            size: if is_directory { None } else { Some(metadata.len()) },
            last_modified: metadata.modified().map(millis_since_epoch).unwrap_or(0),
            path,
            name,
            depth,
            is_directory,
        });
    }
    Ok(entries)
}

/// Modification time of `path` in epoch milliseconds.
pub fn directory_mtime(path: &Path) -> std::io::Result<u64> {
    let modified = fs::metadata(path)?.modified()?;
    Ok(millis_since_epoch(modified))
}

/// Check if a file is binary by extension or null-byte scan.
pub fn is_binary_file(path: &Path) -> bool {
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        if BINARY_EXTENSIONS
            .iter()
            .any(|&b| b.eq_ignore_ascii_case(ext))
        {
            return true;
        }
    }

    // Fallback: scan first 8KB for null bytes
    let file = match fs::File::open(path) {
        Ok(f) => f,
        Err(_) => return false,
    };
    let mut reader = BufReader::new(file);
    let mut buf = [0u8; 8192];
    let n = match reader.read(&mut buf) {
        Ok(n) => n,
        Err(_) => return false,
    };
    buf[..n].contains(&0)
}

/// Read a file for display, refusing binary or oversized content.
pub fn read_smart(path: &Path, max_bytes: u64) -> std::io::Result<SmartRead> {
    let size = fs::metadata(path)?.len();
    let is_binary = is_binary_file(path);
    let is_too_large = size > max_bytes;

    if is_binary || is_too_large {
        let warning = if is_binary {
            format!("{} looks like a binary file", path.display())
        } else {
            format!("{} is {} bytes, above the {} byte limit", path.display(), size, max_bytes)
        };
        return Ok(SmartRead {
            content: None,
            size,
            is_binary,
            is_too_large,
            should_use_hex_mode: is_binary,
            warning: Some(warning),
        });
    }

    let bytes = fs::read(path)?;
    let (content, warning) = match String::from_utf8(bytes) {
        Ok(text) => (text, None),
        Err(e) => (
            String::from_utf8_lossy(e.as_bytes()).into_owned(),
            Some("invalid UTF-8 sequences were replaced".to_string()),
        ),
    };
    Ok(SmartRead {
        content: Some(content),
        size,
        is_binary: false,
        is_too_large: false,
        should_use_hex_mode: false,
        warning,
    })
}

/// Write `content` to `path`, replacing any existing file.
pub fn write_file(path: &Path, content: &str) -> std::io::Result<()> {
    fs::write(path, content)
}
