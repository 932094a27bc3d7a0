
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;

use tracing::{debug, info};

use crate::{RepoQueryError, Result};

/// One file's worth of text, as produced by a [`DocumentSource`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub content: String,
    pub source_path: String,
}

/// Supplier of documents for the indexing pipeline.
pub trait DocumentSource {
    /// Produce every document this source knows about, in a deterministic order.
    fn list_documents(&self) -> Result<Vec<Document>>;
}

/// Reads every UTF-8 file under a repository root.
///
/// Traversal is iterative with an explicit work stack, depth-first with
/// directory entries visited in name order so the resulting document sequence
/// is deterministic across runs. Hidden entries (including `.git`) are
/// skipped, as are files that are not valid UTF-8.
#[derive(Debug, Clone)]
pub struct FileSystemSource {
    root: PathBuf,
}

impl FileSystemSource {
    #[inline]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl DocumentSource for FileSystemSource {
    #[inline]
    fn list_documents(&self) -> Result<Vec<Document>> {
        if !self.root.is_dir() {
            return Err(RepoQueryError::Config(format!(
                "Repository root is not a readable directory: {}",
                self.root.display()
            )));
        }

        let mut documents = Vec::new();
        let mut stack = vec![self.root.clone()];

        while let Some(dir) = stack.pop() {
            let mut entries = fs::read_dir(&dir)?.collect::<std::io::Result<Vec<_>>>()?;
            entries.sort_by_key(fs::DirEntry::file_name);

            let mut subdirs = Vec::new();
            for entry in entries {
                let name = entry.file_name();
                if name.to_string_lossy().starts_with('.') {
                    debug!("Skipping hidden entry: {}", entry.path().display());
                    continue;
                }

                let file_type = entry.file_type()?;
                let path = entry.path();
                if file_type.is_dir() {
                    subdirs.push(path);
                } else if file_type.is_file() {
                    match fs::read_to_string(&path) {
                        Ok(content) => documents.push(Document {
                            content,
                            source_path: self.relative_path(&path),
                        }),
                        Err(e) if e.kind() == ErrorKind::InvalidData => {
                            debug!("Skipping non-UTF-8 file: {}", path.display());
                        }
                        Err(e) => return Err(e.into()),
                    }
                }
                // Symlinks and other special entries are ignored.
            }

            // Reverse so the LIFO stack pops subdirectories in name order.
            for subdir in subdirs.into_iter().rev() {
                stack.push(subdir);
            }
        }

        info!(
            "Scanned {} documents under {}",
            documents.len(),
            self.root.display()
        );
        Ok(documents)
    }
}

impl FileSystemSource {
    fn relative_path(&self, path: &std::path::Path) -> String {
        path.strip_prefix(&self.root)
            .unwrap_or(path)
            .to_string_lossy()
            .into_owned()
    }
}
