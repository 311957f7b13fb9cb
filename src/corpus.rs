//! Project file corpus loading for review jobs.
//!
//! A job names a project root on the local filesystem; the corpus is
//! every regular file under that root, read as UTF-8 text. Traversal
//! order is stable across runs so repeated reviews of the same tree
//! stream results in the same order.

use std::path::Path;
use std::path::PathBuf;

use thiserror::Error;
use walkdir::WalkDir;

/// Errors that can occur while loading a project corpus.
#[derive(Debug, Error)]
pub enum CorpusError {
    #[error("Project root not found: {}", .0.display())]
    RootNotFound(PathBuf),

    #[error("Project root is not a directory: {}", .0.display())]
    NotADirectory(PathBuf),

    #[error("Failed to walk project tree: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("Failed to read '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("File '{}' is not valid UTF-8 text", .0.display())]
    NonUtf8Content(PathBuf),
}

/// One file of a project under review.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    /// Path as reported back to the client, rooted at the job's path.
    pub path: String,
    /// Full file content.
    pub content: String,
}

/// Loads every regular file under `root` in a deterministic order.
///
/// Directories are traversed depth-first with each directory's entries
/// sorted by file name, so two loads of an unchanged tree yield the
/// same sequence. Returns an empty corpus for an empty directory.
pub async fn load_corpus(root: impl AsRef<Path>) -> Result<Vec<FileRecord>, CorpusError> {
    let root = root.as_ref();

    let metadata = match tokio::fs::metadata(root).await {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(CorpusError::RootNotFound(root.to_path_buf()));
        }
        Err(e) => {
            return Err(CorpusError::Io {
                path: root.to_path_buf(),
                source: e,
            });
        }
    };
    if !metadata.is_dir() {
        return Err(CorpusError::NotADirectory(root.to_path_buf()));
    }

    let mut paths = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry?;
        if entry.file_type().is_file() {
            paths.push(entry.into_path());
        }
    }

    let mut files = Vec::with_capacity(paths.len());
    for path in paths {
        let bytes = tokio::fs::read(&path).await.map_err(|e| CorpusError::Io {
            path: path.clone(),
            source: e,
        })?;
        let content =
            String::from_utf8(bytes).map_err(|_| CorpusError::NonUtf8Content(path.clone()))?;
        files.push(FileRecord {
            path: path.display().to_string(),
            content,
        });
    }

    Ok(files)
}
