//! WACZ container access.
//!
//! [`WaczArchive`] enumerates the members of a WACZ once at open, and
//! extracts members lazily into a private scratch directory that lives as
//! long as the archive is open. Scratch storage is released by
//! [`WaczArchive::close`] or, on any other exit path, when the archive is
//! dropped.

use std::collections::HashMap;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;
use tempfile::TempDir;
use tracing::{debug, warn};

use crate::error::ContainerError;
use crate::io::{HttpRangeReader, LocalFileReader, ReadAt};
use crate::zip::{ZipError, ZipExtractor, ZipFileEntry};

const SCRATCH_PREFIX: &str = "wacz_";
const DATAPACKAGE: &str = "datapackage.json";
const PAGES_SUFFIX: &str = "pages.jsonl";

/// What a member is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberRole {
    /// A WARC file holding capture records.
    ArchiveUnit,
    /// Anything else: indexes, pages, datapackage, ...
    Metadata,
}

impl MemberRole {
    fn classify(path: &str) -> Self {
        if path.ends_with(".warc") || path.ends_with(".warc.gz") {
            MemberRole::ArchiveUnit
        } else {
            MemberRole::Metadata
        }
    }
}

/// A file inside the container.
#[derive(Debug, Clone)]
pub struct ArchiveMember {
    entry: ZipFileEntry,
    role: MemberRole,
}

impl ArchiveMember {
    pub fn path(&self) -> &str {
        &self.entry.file_name
    }

    pub fn role(&self) -> MemberRole {
        self.role
    }

    pub fn size(&self) -> u64 {
        self.entry.uncompressed_size
    }
}

/// An open WACZ container.
pub struct WaczArchive<R: ReadAt> {
    source_name: String,
    extractor: ZipExtractor<R>,
    members: Vec<ArchiveMember>,
    scratch: Option<TempDir>,
    materialized: HashMap<String, PathBuf>,
}

impl WaczArchive<LocalFileReader> {
    /// Open a WACZ file on disk.
    pub async fn open(path: &Path) -> Result<Self, ContainerError> {
        let reader = match LocalFileReader::open(path) {
            Ok(reader) => reader,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(ContainerError::NotFound {
                    path: path.to_path_buf(),
                });
            }
            Err(e) => return Err(ContainerError::Io(e)),
        };
        Self::from_reader(Arc::new(reader), &path.display().to_string()).await
    }
}

impl WaczArchive<HttpRangeReader> {
    /// Open a WACZ served over HTTP(S) with Range support.
    pub async fn open_url(url: &str) -> Result<Self, ContainerError> {
        let reader = match HttpRangeReader::connect(url).await {
            Ok(reader) => reader,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(ContainerError::NotFound {
                    path: PathBuf::from(url),
                });
            }
            Err(e) => return Err(ContainerError::invalid(url, e)),
        };
        Self::from_reader(Arc::new(reader), url).await
    }
}

impl<R: ReadAt> WaczArchive<R> {
    /// Read the central directory of `reader` and acquire scratch storage.
    pub async fn from_reader(reader: Arc<R>, source_name: &str) -> Result<Self, ContainerError> {
        let extractor = ZipExtractor::new(reader);
        let entries = extractor
            .list_files()
            .await
            .map_err(|e| ContainerError::invalid(source_name, e))?;

        let members: Vec<ArchiveMember> = entries
            .into_iter()
            .filter(|entry| !entry.is_directory)
            .map(|entry| ArchiveMember {
                role: MemberRole::classify(&entry.file_name),
                entry,
            })
            .collect();

        let scratch = tempfile::Builder::new()
            .prefix(SCRATCH_PREFIX)
            .tempdir()?;

        debug!(
            source = source_name,
            members = members.len(),
            scratch = %scratch.path().display(),
            "Opened archive"
        );

        Ok(Self {
            source_name: source_name.to_string(),
            extractor,
            members,
            scratch: Some(scratch),
            materialized: HashMap::new(),
        })
    }

    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    /// The underlying byte source.
    pub fn reader(&self) -> &R {
        self.extractor.reader()
    }

    /// All non-directory members, in stored order.
    pub fn members(&self) -> &[ArchiveMember] {
        &self.members
    }

    /// Archive-unit members, in stored order.
    pub fn list_units(&self) -> impl Iterator<Item = &ArchiveMember> {
        self.members
            .iter()
            .filter(|m| m.role == MemberRole::ArchiveUnit)
    }

    pub fn find_member(&self, path: &str) -> Option<&ArchiveMember> {
        self.members.iter().find(|m| m.path() == path)
    }

    /// Scratch directory, while the archive is open.
    pub fn scratch_dir(&self) -> Option<&Path> {
        self.scratch.as_ref().map(TempDir::path)
    }

    pub fn is_open(&self) -> bool {
        self.scratch.is_some()
    }

    /// Extract `member` to scratch storage and return its path.
    ///
    /// Each member is extracted at most once; later calls return the cached
    /// path.
    pub async fn materialize(&mut self, member: &str) -> Result<PathBuf, ContainerError> {
        let scratch = self.scratch.as_ref().ok_or(ContainerError::Closed)?;
        if let Some(path) = self.materialized.get(member) {
            return Ok(path.clone());
        }

        let entry = self
            .find_member(member)
            .map(|m| m.entry.clone())
            .ok_or_else(|| ContainerError::MemberNotFound(member.to_string()))?;
        let target = scratch.path().join(safe_relative_path(member)?);

        let written = self
            .extractor
            .extract_to_file(&entry, &target)
            .await
            .map_err(|e| member_error(member, e))?;
        debug!(member, bytes = written, "Materialized member");

        self.materialized.insert(member.to_string(), target.clone());
        Ok(target)
    }

    /// Read a member fully into memory without touching scratch storage.
    pub async fn read_member(&self, member: &str) -> Result<Vec<u8>, ContainerError> {
        if !self.is_open() {
            return Err(ContainerError::Closed);
        }
        let entry = self
            .find_member(member)
            .ok_or_else(|| ContainerError::MemberNotFound(member.to_string()))?;
        self.extractor
            .extract_to_memory(&entry.entry)
            .await
            .map_err(|e| member_error(member, e))
    }

    /// The parsed `datapackage.json`, if the archive has one.
    pub async fn metadata(&self) -> Result<Option<Value>, ContainerError> {
        if self.find_member(DATAPACKAGE).is_none() {
            return Ok(None);
        }
        let bytes = self.read_member(DATAPACKAGE).await?;
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| ContainerError::extraction(DATAPACKAGE, e))
    }

    /// Page records from the first `pages.jsonl` member; empty if absent.
    pub async fn pages(&self) -> Result<Vec<Value>, ContainerError> {
        let Some(member) = self
            .members
            .iter()
            .find(|m| m.path().ends_with(PAGES_SUFFIX))
        else {
            return Ok(Vec::new());
        };

        let bytes = self.read_member(member.path()).await?;
        let text = String::from_utf8_lossy(&bytes);
        let mut pages = Vec::new();
        for (lineno, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(line) {
                Ok(page) => pages.push(page),
                Err(e) => warn!(member = member.path(), line = lineno + 1, error = %e, "Skipping malformed page record"),
            }
        }
        Ok(pages)
    }

    /// Delete scratch storage and forget materialized paths. Idempotent.
    pub fn close(&mut self) -> Result<(), ContainerError> {
        self.materialized.clear();
        if let Some(scratch) = self.scratch.take() {
            let path = scratch.path().to_path_buf();
            scratch.close()?;
            debug!(scratch = %path.display(), "Released scratch storage");
        }
        Ok(())
    }
}

fn member_error(member: &str, err: ZipError) -> ContainerError {
    match err {
        ZipError::Io(e) => ContainerError::Io(e),
        other => ContainerError::extraction(member, other),
    }
}

/// Member names are untrusted; only plain relative components may reach
/// the filesystem.
fn safe_relative_path(member: &str) -> Result<PathBuf, ContainerError> {
    let path = Path::new(member);
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            _ => return Err(ContainerError::UnsafeMemberPath(member.to_string())),
        }
    }
    if out.as_os_str().is_empty() {
        return Err(ContainerError::UnsafeMemberPath(member.to_string()));
    }
    Ok(out)
}
