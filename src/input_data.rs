//! Mapped input files and the identifiers we use to refer back to them.

use crate::Result;
use anyhow::Context as _;
use std::path::Path;

/// A read-only byte buffer with a display name. Created by the driver before parsing starts and
/// kept alive for the whole link.
pub struct MappedFile {
    pub name: String,

    /// Whether the user spelled out the path verbatim (as opposed to `-l` search). Affects the
    /// soname fallback for shared objects.
    pub given_fullpath: bool,

    data: MappedData,
}

enum MappedData {
    Mmap(memmap2::Mmap),
    Owned(Vec<u8>),
}

impl MappedFile {
    pub fn open(path: &Path, given_fullpath: bool) -> Result<Self> {
        let file = std::fs::File::open(path)
            .with_context(|| format!("Failed to open `{}`", path.display()))?;
        // Safety: the file must not be modified while we're running. We'd fail with SIGBUS if it
        // were truncated; that's acceptable for a linker input.
        let mmap = unsafe { memmap2::Mmap::map(&file) }
            .with_context(|| format!("Failed to mmap `{}`", path.display()))?;
        Ok(Self {
            name: path.display().to_string(),
            given_fullpath,
            data: MappedData::Mmap(mmap),
        })
    }

    pub fn from_bytes(name: &str, bytes: Vec<u8>) -> Self {
        Self {
            name: name.to_owned(),
            given_fullpath: false,
            data: MappedData::Owned(bytes),
        }
    }

    pub fn data(&self) -> &[u8] {
        match &self.data {
            MappedData::Mmap(mmap) => mmap,
            MappedData::Owned(bytes) => bytes,
        }
    }
}

/// One input as handed to us by the driver: the mapped bytes plus everything the driver knows
/// about where the file came from.
#[derive(Clone, Copy)]
pub struct FileInput<'data> {
    pub mapped: &'data MappedFile,

    /// Fixed at discovery time; smaller wins rank ties.
    pub priority: u32,

    /// Archive members start out unreachable and only join the link when one of their
    /// definitions is needed.
    pub in_archive: bool,

    /// The archive this member was extracted from, for display.
    pub archive_name: Option<&'data str>,

    /// References from this file force symbols hidden (`--exclude-libs`).
    pub exclude_libs: bool,
}

impl<'data> FileInput<'data> {
    pub fn new(mapped: &'data MappedFile, priority: u32) -> Self {
        Self {
            mapped,
            priority,
            in_archive: false,
            archive_name: None,
            exclude_libs: false,
        }
    }
}

impl std::fmt::Display for FileInput<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.archive_name {
            Some(archive) => write!(f, "{}({})", archive, self.mapped.name),
            None => std::fmt::Display::fmt(&self.mapped.name, f),
        }
    }
}

/// Index of a file in the link's file list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FileId(pub u32);

impl FileId {
    pub(crate) fn as_usize(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for FileId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "file-{}", self.0)
    }
}
