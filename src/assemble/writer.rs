use std::future::Future;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::Result;

/// Writes rendered documents into the output directory.
///
/// The new bytes go to `<file>.tmp` first; the caller's commit runs next,
/// and only a successful commit renames the temp file over the document.
#[derive(Debug, Clone)]
pub struct DocumentWriter {
    dir: PathBuf,
}

/// What `write` did with the document file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Written,
    Unchanged,
}

impl DocumentWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, filename: &str) -> PathBuf {
        self.dir.join(filename)
    }

    fn tmp_path(path: &Path) -> PathBuf {
        let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        name.push(".tmp");
        path.with_file_name(name)
    }

    /// Stage `content`, run `commit`, then publish. When the file already
    /// holds exactly `content` only the commit runs.
    pub async fn write<F>(&self, filename: &str, content: &str, commit: F) -> Result<WriteOutcome>
    where
        F: Future<Output = Result<()>>,
    {
        let path = self.path_for(filename);
        if let Ok(current) = tokio::fs::read(&path).await {
            if current == content.as_bytes() {
                commit.await?;
                debug!(path = %path.display(), "document unchanged");
                return Ok(WriteOutcome::Unchanged);
            }
        }

        tokio::fs::create_dir_all(&self.dir).await?;
        let tmp = Self::tmp_path(&path);
        tokio::fs::write(&tmp, content.as_bytes()).await?;

        if let Err(e) = commit.await {
            if let Err(rm) = tokio::fs::remove_file(&tmp).await {
                warn!(path = %tmp.display(), error = %rm, "failed to remove temp document");
            }
            return Err(e);
        }

        tokio::fs::rename(&tmp, &path).await?;
        debug!(path = %path.display(), bytes = content.len(), "document written");
        Ok(WriteOutcome::Written)
    }
}
