/// Collection store - one framed binary file per named collection
///
/// Files are only ever appended to (buffer flush) or replaced wholesale
/// (update/delete rewrite, clear, import).

use crate::codec::{self, LEN_PREFIX_SIZE};
use crate::{Error, Record, Result};
use bytes::BytesMut;
use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, trace};
use uuid::Uuid;

pub struct CollectionStore {
    dir: PathBuf,
    extension: String,
}

impl CollectionStore {
    pub fn new(dir: impl AsRef<Path>, extension: impl Into<String>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            extension: extension.into(),
        }
    }

    /// Path of a collection's backing file
    pub fn path(&self, name: &str) -> Result<PathBuf> {
        validate_name(name)?;
        Ok(self.dir.join(format!("{}.{}", name, self.extension)))
    }

    pub fn exists(&self, name: &str) -> Result<bool> {
        Ok(self.path(name)?.is_file())
    }

    /// Create an empty collection file. False if it already exists.
    pub fn create(&self, name: &str) -> Result<bool> {
        let path = self.path(name)?;
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove a collection file. False if absent.
    pub fn remove(&self, name: &str) -> Result<bool> {
        let path = self.path(name)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Truncate a collection file to empty. False if absent.
    pub fn clear(&self, name: &str) -> Result<bool> {
        let path = self.path(name)?;
        if !path.is_file() {
            return Ok(false);
        }
        File::create(&path)?;
        Ok(true)
    }

    /// Sequentially decode every frame of a collection.
    ///
    /// A missing file reads as empty. Scanning stops at the first frame whose
    /// declared length exceeds the remaining bytes; malformed payloads are
    /// skipped.
    pub fn scan_all(&self, name: &str) -> Result<Vec<Record>> {
        self.scan_filtered(name, |_| true)
    }

    /// Same scan as `scan_all`, keeping only the requested identifiers
    pub fn scan_by_ids(&self, name: &str, ids: &HashSet<Uuid>) -> Result<Vec<Record>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        self.scan_filtered(name, |record| ids.contains(&record.id))
    }

    fn scan_filtered<F>(&self, name: &str, keep: F) -> Result<Vec<Record>>
    where
        F: Fn(&Record) -> bool,
    {
        let path = self.path(name)?;
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let file_size = file.metadata()?.len();
        let mut reader = BufReader::new(file);

        let mut records = Vec::new();
        let mut offset = 0u64;
        while offset < file_size {
            let mut len_bytes = [0u8; LEN_PREFIX_SIZE];
            match reader.read_exact(&mut len_bytes) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e.into()),
            }
            let len = u32::from_be_bytes(len_bytes) as u64;
            if offset + LEN_PREFIX_SIZE as u64 + len > file_size {
                trace!("Frame at offset {} overruns {} ({} bytes declared)", offset, path.display(), len);
                break;
            }

            let mut payload = vec![0u8; len as usize];
            match reader.read_exact(&mut payload) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e.into()),
            }

            match codec::decode(&payload) {
                Some(record) if keep(&record) => records.push(record),
                Some(_) => {}
                None => trace!("Skipping malformed frame at offset {} in {}", offset, path.display()),
            }
            offset += LEN_PREFIX_SIZE as u64 + len;
        }

        Ok(records)
    }

    /// Append already-encoded frames to a collection file in one write
    pub fn append(&self, name: &str, frames: &[u8]) -> Result<()> {
        let path = self.path(name)?;
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        file.write_all(frames)?;
        file.flush()?;
        Ok(())
    }

    /// Replace a collection's contents with the given records.
    ///
    /// The new contents are written to a sibling temp file and renamed over
    /// the original, so readers see either the old or the new file.
    pub fn rewrite(&self, name: &str, records: &[Record]) -> Result<()> {
        let mut buf = BytesMut::new();
        for record in records {
            buf.extend_from_slice(&codec::encode(record));
        }
        self.replace_bytes(name, &buf)?;
        debug!("Rewrote collection {} with {} records", name, records.len());
        Ok(())
    }

    /// Replace a collection's raw bytes (same temp-then-rename path as rewrite)
    pub fn replace_bytes(&self, name: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path(name)?;
        let tmp = path.with_extension(format!("{}.tmp", self.extension));
        {
            let mut file = File::create(&tmp)?;
            file.write_all(bytes)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// Raw bytes of a collection file, None if absent
    pub fn read_bytes(&self, name: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path(name)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Sorted names of all collections in the storage directory
    pub fn list(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }
            if path.extension().and_then(|e| e.to_str()) != Some(self.extension.as_str()) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                names.push(stem.to_string());
            }
        }
        names.sort();
        Ok(names)
    }
}

/// Collection names become file names, so they must be plain path segments
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::InvalidArgument("collection name cannot be empty".into()));
    }
    if name.contains(['/', '\\', '\0']) || name == "." || name == ".." {
        return Err(Error::InvalidArgument(format!("invalid collection name: {:?}", name)));
    }
    Ok(())
}
