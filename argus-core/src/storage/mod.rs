//! Index file management
//!
//! Resolves index files from collection coordinates and build metadata,
//! and loads them back either through a buffered read or a memory map
//! (`enable_mmap`). This is the local realization of the file-manager
//! contract; remote object stores plug in behind the same trait.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use memmap2::Mmap;

use crate::FieldId;
use crate::error::Result;
use crate::index::{FlatIndex, VectorIndex};

/// Where an index's segment lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileManagerContext {
    pub collection_id: i64,
    pub partition_id: i64,
    pub segment_id: i64,
    pub field_id: FieldId,
}

/// Identity of one index build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IndexMeta {
    pub segment_id: i64,
    pub field_id: FieldId,
    pub build_id: i64,
    pub version: i64,
}

/// Resolves, stores, and loads index files.
pub trait FileManager: Send + Sync {
    /// Deterministic path for an index build.
    fn index_path(&self, ctx: &FileManagerContext, meta: &IndexMeta) -> PathBuf;

    /// Serialize an index to its resolved path.
    fn put_index(
        &self,
        ctx: &FileManagerContext,
        meta: &IndexMeta,
        index: &dyn VectorIndex,
    ) -> Result<PathBuf>;

    /// Load an index back from its resolved path.
    fn load_index(
        &self,
        ctx: &FileManagerContext,
        meta: &IndexMeta,
    ) -> Result<Box<dyn VectorIndex>>;

    /// Delete an index file; missing files are not an error.
    fn remove(&self, ctx: &FileManagerContext, meta: &IndexMeta) -> Result<()>;
}

/// File manager rooted at a local directory.
///
/// Layout: `<root>/<collection>/<partition>/<segment>/<field>/
/// <build>_<version>.aidx`.
pub struct LocalFileManager {
    root: PathBuf,
    enable_mmap: bool,
}

impl LocalFileManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            enable_mmap: false,
        }
    }

    pub fn with_mmap(mut self, enable_mmap: bool) -> Self {
        self.enable_mmap = enable_mmap;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl FileManager for LocalFileManager {
    fn index_path(&self, ctx: &FileManagerContext, meta: &IndexMeta) -> PathBuf {
        self.root
            .join(ctx.collection_id.to_string())
            .join(ctx.partition_id.to_string())
            .join(ctx.segment_id.to_string())
            .join(ctx.field_id.to_string())
            .join(format!("{}_{}.aidx", meta.build_id, meta.version))
    }

    fn put_index(
        &self,
        ctx: &FileManagerContext,
        meta: &IndexMeta,
        index: &dyn VectorIndex,
    ) -> Result<PathBuf> {
        let path = self.index_path(ctx, meta);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut writer = BufWriter::new(File::create(&path)?);
        index.serialize(&mut writer)?;
        log::debug!("[storage] wrote index {}", path.display());
        Ok(path)
    }

    fn load_index(
        &self,
        ctx: &FileManagerContext,
        meta: &IndexMeta,
    ) -> Result<Box<dyn VectorIndex>> {
        let path = self.index_path(ctx, meta);
        let file = File::open(&path)?;
        let index = if self.enable_mmap {
            // the map stays alive only for the decode; the flat index owns
            // its vectors afterwards
            let map = unsafe { Mmap::map(&file)? };
            FlatIndex::load(&mut &map[..])?
        } else {
            FlatIndex::load(&mut BufReader::new(file))?
        };
        Ok(Box::new(index))
    }

    fn remove(&self, ctx: &FileManagerContext, meta: &IndexMeta) -> Result<()> {
        let path = self.index_path(ctx, meta);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
