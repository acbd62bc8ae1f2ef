use log::info;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::IndexError;
use crate::scanner;

/// A single image picked from the index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageEntry {
    pub image: String,
    pub index: usize,
}

/// The in-memory list of eligible images under `root`.
///
/// Readers take a cheap snapshot of the current list; a rebuild scans the tree
/// without holding the lock and then swaps the whole list in one write.
#[derive(Clone)]
pub struct ImageIndex {
    root: Arc<PathBuf>,
    entries: Arc<RwLock<Arc<Vec<String>>>>,
}

impl ImageIndex {
    /// Validates `root` and returns an empty index for it. Call [`ImageIndex::rebuild`]
    /// before serving.
    pub fn open(root: impl AsRef<Path>) -> Result<Self, IndexError> {
        let root = root.as_ref();
        if !root.exists() {
            return Err(IndexError::MissingRoot(root.to_path_buf()));
        }
        if !root.is_dir() {
            return Err(IndexError::NotADirectory(root.to_path_buf()));
        }
        let root = root.canonicalize()?;

        Ok(Self {
            root: Arc::new(root),
            entries: Arc::new(RwLock::new(Arc::new(Vec::new()))),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Re-scans the whole tree and atomically replaces the served entries.
    pub async fn rebuild(&self) -> Result<usize, IndexError> {
        let root = self.root.clone();
        let report = tokio::task::spawn_blocking(move || scanner::build(&root)).await?;
        let count = report.entries.len();
        self.replace(report.entries).await;
        info!("Image list updated, containing {} images", count);
        Ok(count)
    }

    pub async fn replace(&self, entries: Vec<String>) {
        *self.entries.write().await = Arc::new(entries);
    }

    pub async fn snapshot(&self) -> Arc<Vec<String>> {
        self.entries.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn pick_random(&self) -> Result<ImageEntry, IndexError> {
        let entries = self.snapshot().await;
        if entries.is_empty() {
            return Err(IndexError::EmptyIndex);
        }
        let index = fastrand::usize(..entries.len());
        Ok(ImageEntry {
            image: entries[index].clone(),
            index,
        })
    }

    /// Returns `None` when `index` is outside the current list.
    pub async fn pick_by_index(&self, index: usize) -> Option<ImageEntry> {
        let entries = self.snapshot().await;
        entries.get(index).map(|image| ImageEntry {
            image: image.clone(),
            index,
        })
    }
}
