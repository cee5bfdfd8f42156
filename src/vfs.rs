/*
    himd-rs
    https://github.com/himd-rs/himd

    Copyright 2026 The himd-rs contributors

    Permission is hereby granted, free of charge, to any person obtaining a
    copy of this software and associated documentation files (the “Software”),
    to deal in the Software without restriction, including without limitation
    the rights to use, copy, modify, merge, publish, distribute, sublicense,
    and/or sell copies of the Software, and to permit persons to whom the
    Software is furnished to do so, subject to the following conditions:

    The above copyright notice and this permission notice shall be included in
    all copies or substantial portions of the Software.

    THE SOFTWARE IS PROVIDED “AS IS”, WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
    IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
    FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
    AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
    LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
    FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
    DEALINGS IN THE SOFTWARE.

    --------------------------------------------------------------------------
*/

//! The filesystem seam between the library and the FAT volume.
//!
//! Hi-MD paths are case-insensitive; every implementation canonicalises
//! through a case-folding resolver so `HMDHIFI/atdata01.hma` and
//! `hmdhifi/ATDATA01.HMA` name the same file. Two implementations are
//! provided: [`HostFilesystem`] over a mounted directory and
//! [`RamFilesystem`], an in-memory volume used by fixtures and tests.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use crate::io::{Read, Seek, SeekFrom, Write};
use crate::HimdError;

/// Default reported capacity: a 1 GB Hi-MD disc.
const DEFAULT_CAPACITY: u64 = 1_000_000_000;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum OpenMode {
    Read,
    ReadWrite,
}

/// A contiguous byte span of a file, used for region freeing after deletion.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FileRegion {
    pub offset: u64,
    pub length: u64,
}

/// A seekable handle into one on-disc file.
pub trait FileHandle: Read + Write + Seek {
    fn length(&mut self) -> Result<u64, HimdError>;

    fn read_fully(&mut self) -> Result<Vec<u8>, HimdError> {
        self.seek(SeekFrom::Start(0))?;
        let mut buf = Vec::new();
        self.read_to_end(&mut buf)?;
        Ok(buf)
    }
}

pub trait DiscFilesystem {
    fn open(&mut self, path: &str, mode: OpenMode) -> Result<Box<dyn FileHandle>, HimdError>;
    fn list(&mut self, path: &str) -> Result<Vec<String>, HimdError>;
    fn rename(&mut self, from: &str, to: &str) -> Result<(), HimdError>;
    fn get_size(&mut self, path: &str) -> Result<u64, HimdError>;
    fn total_space(&mut self) -> Result<u64, HimdError>;

    /// Punch the given regions out of a file, compacting the remainder.
    fn free_file_regions(&mut self, _path: &str, _regions: &[FileRegion]) -> Result<(), HimdError> {
        Err(HimdError::UnsupportedOperation)
    }

    fn delete(&mut self, _path: &str) -> Result<(), HimdError> {
        Err(HimdError::UnsupportedOperation)
    }

    fn mkdir(&mut self, _path: &str) -> Result<(), HimdError> {
        Err(HimdError::UnsupportedOperation)
    }

    fn wipe_disc(&mut self) -> Result<(), HimdError> {
        Err(HimdError::UnsupportedOperation)
    }
}

/// Fold a path to its canonical form: no leading or trailing separators,
/// ASCII upper case. FAT has no case, so this is lossless for lookups.
pub(crate) fn canonical(path: &str) -> String {
    path.trim_matches('/').to_ascii_uppercase()
}

pub(crate) fn parent_and_name(path: &str) -> (String, String) {
    let canon = canonical(path);
    match canon.rsplit_once('/') {
        Some((parent, name)) => (parent.to_string(), name.to_string()),
        None => (String::new(), canon),
    }
}

// ---------------------------------------------------------------------------
// In-memory filesystem
// ---------------------------------------------------------------------------

struct RamNode {
    /// Display name, original case, as FAT would store it.
    name: String,
    data: Arc<Mutex<Vec<u8>>>,
}

#[derive(Default)]
struct RamInner {
    files: HashMap<String, RamNode>,
    /// Every `free_file_regions` call, for test inspection.
    freed_log: Vec<(String, Vec<FileRegion>)>,
}

/// An in-memory volume. Fixtures build discs on it and tests inspect the
/// results without touching the host filesystem. Clones share the same
/// backing store, so a test can keep a handle while the library owns
/// another.
#[derive(Clone)]
pub struct RamFilesystem {
    inner: Arc<Mutex<RamInner>>,
    capacity: u64,
}

impl Default for RamFilesystem {
    fn default() -> Self {
        RamFilesystem::new()
    }
}

impl RamFilesystem {
    pub fn new() -> Self {
        RamFilesystem {
            inner: Arc::new(Mutex::new(RamInner::default())),
            capacity: DEFAULT_CAPACITY,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RamInner> {
        self.inner.lock().expect("filesystem lock poisoned")
    }

    /// Create a file (or truncate an existing one) with the given contents.
    pub fn put(&self, path: &str, data: Vec<u8>) {
        let (_, name) = parent_and_name(path);
        self.lock().files.insert(
            canonical(path),
            RamNode {
                name,
                data: Arc::new(Mutex::new(data)),
            },
        );
    }

    pub fn contains(&self, path: &str) -> bool {
        self.lock().files.contains_key(&canonical(path))
    }

    /// Snapshot of a file's bytes, for assertions.
    pub fn snapshot(&self, path: &str) -> Option<Vec<u8>> {
        self.lock()
            .files
            .get(&canonical(path))
            .map(|n| n.data.lock().expect("file lock poisoned").clone())
    }

    pub fn freed_regions(&self) -> Vec<(String, Vec<FileRegion>)> {
        self.lock().freed_log.clone()
    }
}

impl DiscFilesystem for RamFilesystem {
    fn open(&mut self, path: &str, mode: OpenMode) -> Result<Box<dyn FileHandle>, HimdError> {
        let canon = canonical(path);
        let mut inner = self.lock();
        if !inner.files.contains_key(&canon) {
            if mode != OpenMode::ReadWrite {
                return Err(HimdError::IoError(format!("no such file: {}", path)));
            }
            let (_, name) = parent_and_name(path);
            inner.files.insert(
                canon.clone(),
                RamNode {
                    name,
                    data: Arc::new(Mutex::new(Vec::new())),
                },
            );
        }
        let node = inner.files.get(&canon).expect("file exists by now");
        Ok(Box::new(RamFile {
            data: Arc::clone(&node.data),
            pos: 0,
            writable: mode == OpenMode::ReadWrite,
        }))
    }

    fn list(&mut self, path: &str) -> Result<Vec<String>, HimdError> {
        let prefix = canonical(path);
        let inner = self.lock();
        let mut names = Vec::new();
        for (canon, node) in &inner.files {
            let rest = match prefix.is_empty() {
                true => canon.as_str(),
                false => match canon.strip_prefix(&format!("{}/", prefix)) {
                    Some(rest) => rest,
                    None => continue,
                },
            };
            if !rest.contains('/') {
                names.push(node.name.clone());
            }
        }
        names.sort();
        Ok(names)
    }

    fn rename(&mut self, from: &str, to: &str) -> Result<(), HimdError> {
        let mut inner = self.lock();
        let node = inner
            .files
            .remove(&canonical(from))
            .ok_or_else(|| HimdError::IoError(format!("no such file: {}", from)))?;
        let (_, name) = parent_and_name(to);
        inner.files.insert(
            canonical(to),
            RamNode {
                name,
                data: node.data,
            },
        );
        Ok(())
    }

    fn get_size(&mut self, path: &str) -> Result<u64, HimdError> {
        self.lock()
            .files
            .get(&canonical(path))
            .map(|n| n.data.lock().expect("file lock poisoned").len() as u64)
            .ok_or_else(|| HimdError::IoError(format!("no such file: {}", path)))
    }

    fn total_space(&mut self) -> Result<u64, HimdError> {
        Ok(self.capacity)
    }

    fn free_file_regions(&mut self, path: &str, regions: &[FileRegion]) -> Result<(), HimdError> {
        let mut inner = self.lock();
        let node = inner
            .files
            .get(&canonical(path))
            .ok_or_else(|| HimdError::IoError(format!("no such file: {}", path)))?;
        let mut data = node.data.lock().expect("file lock poisoned");
        let mut sorted: Vec<FileRegion> = regions.to_vec();
        sorted.sort_by_key(|r| r.offset);
        for region in sorted.iter().rev() {
            let start = (region.offset as usize).min(data.len());
            let end = ((region.offset + region.length) as usize).min(data.len());
            data.drain(start..end);
        }
        drop(data);
        inner.freed_log.push((canonical(path), regions.to_vec()));
        Ok(())
    }

    fn delete(&mut self, path: &str) -> Result<(), HimdError> {
        self.lock()
            .files
            .remove(&canonical(path))
            .map(|_| ())
            .ok_or_else(|| HimdError::IoError(format!("no such file: {}", path)))
    }

    fn mkdir(&mut self, _path: &str) -> Result<(), HimdError> {
        // Directories are implicit in the flat map.
        Ok(())
    }

    fn wipe_disc(&mut self) -> Result<(), HimdError> {
        let mut inner = self.lock();
        inner.files.clear();
        inner.freed_log.clear();
        Ok(())
    }
}

struct RamFile {
    data: Arc<Mutex<Vec<u8>>>,
    pos: u64,
    writable: bool,
}

impl Read for RamFile {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let data = self.data.lock().expect("file lock poisoned");
        let start = (self.pos as usize).min(data.len());
        let n = buf.len().min(data.len() - start);
        buf[..n].copy_from_slice(&data[start..start + n]);
        self.pos += n as u64;
        Ok(n)
    }
}

impl Write for RamFile {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if !self.writable {
            return Err(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "file handle was opened read-only",
            ));
        }
        let mut data = self.data.lock().expect("file lock poisoned");
        let start = self.pos as usize;
        if start > data.len() {
            data.resize(start, 0);
        }
        let overlap = buf.len().min(data.len().saturating_sub(start));
        data[start..start + overlap].copy_from_slice(&buf[..overlap]);
        data.extend_from_slice(&buf[overlap..]);
        self.pos += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl Seek for RamFile {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        let len = self.data.lock().expect("file lock poisoned").len() as i64;
        let target = match pos {
            SeekFrom::Start(p) => p as i64,
            SeekFrom::End(delta) => len + delta,
            SeekFrom::Current(delta) => self.pos as i64 + delta,
        };
        if target < 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "seek before start of file",
            ));
        }
        self.pos = target as u64;
        Ok(self.pos)
    }
}

impl FileHandle for RamFile {
    fn length(&mut self) -> Result<u64, HimdError> {
        Ok(self.data.lock().expect("file lock poisoned").len() as u64)
    }
}

// ---------------------------------------------------------------------------
// Host filesystem
// ---------------------------------------------------------------------------

/// A disc mounted somewhere on the host, rooted at a directory. Lookups fold
/// case segment by segment, so the library works against both upper-case FAT
/// mounts and lower-case loopbacks.
pub struct HostFilesystem {
    root: PathBuf,
    capacity: u64,
}

impl HostFilesystem {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        HostFilesystem {
            root: root.into(),
            capacity: DEFAULT_CAPACITY,
        }
    }

    pub fn with_capacity(root: impl Into<PathBuf>, capacity: u64) -> Self {
        HostFilesystem {
            root: root.into(),
            capacity,
        }
    }

    /// Resolve a disc path to a host path, matching each segment
    /// case-insensitively against the directory contents. Unmatched trailing
    /// segments resolve to themselves so new files can be created.
    fn resolve(&self, path: &str) -> Result<PathBuf, HimdError> {
        let mut current = self.root.clone();
        for segment in canonical(path).split('/').filter(|s| !s.is_empty()) {
            let mut matched = None;
            if current.is_dir() {
                for entry in std::fs::read_dir(&current)? {
                    let entry = entry?;
                    if entry.file_name().to_string_lossy().to_ascii_uppercase() == segment {
                        matched = Some(entry.file_name());
                        break;
                    }
                }
            }
            match matched {
                Some(name) => current.push(name),
                None => current.push(segment),
            }
        }
        Ok(current)
    }
}

impl DiscFilesystem for HostFilesystem {
    fn open(&mut self, path: &str, mode: OpenMode) -> Result<Box<dyn FileHandle>, HimdError> {
        let host_path = self.resolve(path)?;
        if host_path.is_dir() {
            return Err(HimdError::DirectoryAsFile);
        }
        let writable = mode == OpenMode::ReadWrite;
        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(writable)
            .create(writable)
            .open(&host_path)?;
        Ok(Box::new(HostFile { file, writable }))
    }

    fn list(&mut self, path: &str) -> Result<Vec<String>, HimdError> {
        let host_path = self.resolve(path)?;
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&host_path)? {
            names.push(entry?.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names)
    }

    fn rename(&mut self, from: &str, to: &str) -> Result<(), HimdError> {
        let from_path = self.resolve(from)?;
        let to_path = self.resolve(to)?;
        std::fs::rename(from_path, to_path)?;
        Ok(())
    }

    fn get_size(&mut self, path: &str) -> Result<u64, HimdError> {
        let host_path = self.resolve(path)?;
        Ok(std::fs::metadata(host_path)?.len())
    }

    fn total_space(&mut self) -> Result<u64, HimdError> {
        Ok(self.capacity)
    }

    fn free_file_regions(&mut self, path: &str, regions: &[FileRegion]) -> Result<(), HimdError> {
        // No hole punching on a plain host mount; rewrite the file compacted.
        let host_path = self.resolve(path)?;
        let mut data = std::fs::read(&host_path)?;
        let mut sorted: Vec<FileRegion> = regions.to_vec();
        sorted.sort_by_key(|r| r.offset);
        for region in sorted.iter().rev() {
            let start = (region.offset as usize).min(data.len());
            let end = ((region.offset + region.length) as usize).min(data.len());
            data.drain(start..end);
        }
        std::fs::write(&host_path, data)?;
        Ok(())
    }

    fn delete(&mut self, path: &str) -> Result<(), HimdError> {
        let host_path = self.resolve(path)?;
        std::fs::remove_file(host_path)?;
        Ok(())
    }

    fn mkdir(&mut self, path: &str) -> Result<(), HimdError> {
        let host_path = self.resolve(path)?;
        std::fs::create_dir_all(host_path)?;
        Ok(())
    }
}

struct HostFile {
    file: std::fs::File,
    writable: bool,
}

impl Read for HostFile {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.file.read(buf)
    }
}

impl Write for HostFile {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if !self.writable {
            return Err(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "file handle was opened read-only",
            ));
        }
        self.file.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.file.flush()
    }
}

impl Seek for HostFile {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        self.file.seek(pos)
    }
}

impl FileHandle for HostFile {
    fn length(&mut self) -> Result<u64, HimdError> {
        Ok(self.file.metadata()?.len())
    }
}
