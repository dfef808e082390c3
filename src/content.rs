//! Content registry: interns file bytes once, keyed by a stable 128-bit
//! digest, so every other subsystem can borrow by hash instead of re-reading.

use crate::diagnostics::EngineError;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Stable 128-bit digest of file bytes (truncated blake3).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContentHash([u8; 16]);

impl ContentHash {
    pub fn of_bytes(bytes: &[u8]) -> Self {
        let digest = blake3::hash(bytes);
        let mut out = [0u8; 16];
        out.copy_from_slice(&digest.as_bytes()[..16]);
        Self(out)
    }

    pub fn to_hex(self) -> String {
        let mut s = String::with_capacity(32);
        for b in self.0 {
            s.push_str(&format!("{b:02x}"));
        }
        s
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", self.to_hex())
    }
}

/// Byte offsets of line starts, for O(log n) offset-to-line mapping.
#[derive(Debug, Clone, Default)]
pub struct LineIndex {
    starts: Vec<u32>,
}

impl LineIndex {
    pub fn build(bytes: &[u8]) -> Self {
        let mut starts = vec![0u32];
        let mut pos = 0;
        while let Some(rel) = find_byte(&bytes[pos..], b'\n') {
            pos += rel + 1;
            starts.push(pos as u32);
        }
        Self { starts }
    }

    /// 0-based line containing the given byte offset.
    pub fn line_of(&self, offset: u32) -> u32 {
        match self.starts.binary_search(&offset) {
            Ok(line) => line as u32,
            Err(next) => (next - 1) as u32,
        }
    }

    pub fn line_count(&self) -> u32 {
        self.starts.len() as u32
    }

    /// Byte range of a 0-based line, excluding the trailing newline.
    pub fn line_span(&self, line: u32, total_len: usize) -> (usize, usize) {
        let start = self.starts[line as usize] as usize;
        let end = self
            .starts
            .get(line as usize + 1)
            .map(|&s| s as usize - 1)
            .unwrap_or(total_len);
        (start, end)
    }
}

/// Immutable interned file: path, digest, bytes, and line table.
#[derive(Debug)]
pub struct FileContent {
    pub path: PathBuf,
    pub hash: ContentHash,
    pub bytes: Vec<u8>,
    pub lines: LineIndex,
}

/// Write-mostly at startup, read-only afterwards. Content is deduplicated
/// by digest, so two paths with identical bytes share one entry.
#[derive(Default)]
pub struct ContentRegistry {
    by_path: Mutex<HashMap<PathBuf, ContentHash>>,
    by_hash: Mutex<HashMap<ContentHash, Arc<FileContent>>>,
}

impl ContentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load and intern a file, normalizing the path first. Re-loading the
    /// same path returns the interned entry without touching the disk.
    pub fn load(&self, path: &Path) -> Result<Arc<FileContent>, EngineError> {
        let realpath = fs::canonicalize(path).map_err(|source| EngineError::Input {
            path: path.to_path_buf(),
            source,
        })?;

        if let Some(hash) = self.by_path.lock().get(&realpath) {
            if let Some(content) = self.by_hash.lock().get(hash) {
                return Ok(Arc::clone(content));
            }
        }

        let bytes = fs::read(&realpath).map_err(|source| EngineError::Input {
            path: realpath.clone(),
            source,
        })?;
        let hash = ContentHash::of_bytes(&bytes);
        let lines = LineIndex::build(&bytes);
        let content = Arc::new(FileContent {
            path: realpath.clone(),
            hash,
            bytes,
            lines,
        });

        self.by_path.lock().insert(realpath, hash);
        let mut by_hash = self.by_hash.lock();
        // First intern wins so borrowed Arcs stay stable.
        Ok(Arc::clone(by_hash.entry(hash).or_insert(content)))
    }

    pub fn get(&self, hash: ContentHash) -> Option<Arc<FileContent>> {
        self.by_hash.lock().get(&hash).cloned()
    }

    pub fn path_of(&self, hash: ContentHash) -> Option<PathBuf> {
        self.by_hash.lock().get(&hash).map(|c| c.path.clone())
    }
}

/// Chunked forward byte search. Scans 8 bytes per iteration in the common
/// case instead of one, which matters for the analyzer's hot loops.
pub fn find_byte(haystack: &[u8], needle: u8) -> Option<usize> {
    const CHUNK: usize = 8;
    let mut i = 0;
    let len = haystack.len();
    while i + CHUNK <= len {
        let chunk = &haystack[i..i + CHUNK];
        if chunk.iter().any(|&b| b == needle) {
            for (j, &b) in chunk.iter().enumerate() {
                if b == needle {
                    return Some(i + j);
                }
            }
        }
        i += CHUNK;
    }
    haystack[i..].iter().position(|&b| b == needle).map(|j| i + j)
}

/// First position of any of the needles, or None.
pub fn find_any_byte(haystack: &[u8], needles: &[u8]) -> Option<usize> {
    const CHUNK: usize = 8;
    let mut i = 0;
    let len = haystack.len();
    while i + CHUNK <= len {
        let chunk = &haystack[i..i + CHUNK];
        if chunk.iter().any(|&b| needles.contains(&b)) {
            for (j, &b) in chunk.iter().enumerate() {
                if needles.contains(&b) {
                    return Some(i + j);
                }
            }
        }
        i += CHUNK;
    }
    haystack[i..]
        .iter()
        .position(|&b| needles.contains(&b))
        .map(|j| i + j)
}
