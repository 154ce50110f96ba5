use std::path::Path;

use tokio::sync::Mutex;

use crate::{os::write_atomic, HostcoreResult};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

const DOCUMENT_MODE: u32 = 0o644;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Writes rendered documents. All writes go through one lock and each replaces its file
/// atomically, so readers never see a partial document.
#[derive(Debug, Default)]
pub struct ConfigWriter {
    lock: Mutex<()>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl ConfigWriter {
    /// Creates a writer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes `content` to `path` unless the file already holds exactly that. Returns true if the
    /// file changed.
    pub async fn write(&self, path: &Path, content: &str) -> HostcoreResult<bool> {
        let _guard = self.lock.lock().await;

        match tokio::fs::read_to_string(path).await {
            Ok(existing) if existing == content => {
                tracing::debug!(path = %path.display(), "document unchanged");
                return Ok(false);
            }
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        write_atomic(path, content.as_bytes(), DOCUMENT_MODE).await?;
        tracing::info!(path = %path.display(), bytes = content.len(), "wrote document");
        Ok(true)
    }

    /// Removes a document that is no longer needed. Returns true if it existed.
    pub async fn remove(&self, path: &Path) -> HostcoreResult<bool> {
        let _guard = self.lock.lock().await;

        match tokio::fs::remove_file(path).await {
            Ok(()) => {
                tracing::info!(path = %path.display(), "removed document");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
