//! Checkpoint persistence for the feed offset
//!
//! The offset file holds one decimal integer: the offset of the last event the
//! handler accepted. It is read once at startup and overwritten after every
//! handled event. Writes go to a temp file that is synced and renamed over the
//! target, so a crash leaves either the old or the new value, never a torn one.

use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Single-writer checkpoint store. Without a path it only tracks the offset
/// in memory.
#[derive(Debug)]
pub struct OffsetStore {
    path: Option<PathBuf>,
    current: u64,
}

impl OffsetStore {
    /// Read the persisted offset. A missing or empty file yields 0.
    pub async fn load(path: Option<PathBuf>) -> Result<Self> {
        let current = match &path {
            Some(path) => read_offset(path).await?,
            None => {
                info!("no offset file configured, checkpoint is kept in memory only");
                0
            }
        };
        Ok(Self { path, current })
    }

    pub fn in_memory() -> Self {
        Self {
            path: None,
            current: 0,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// The last saved offset, or the one loaded at startup.
    pub fn current(&self) -> u64 {
        self.current
    }

    /// Record `offset` as the new checkpoint.
    pub async fn save(&mut self, offset: u64) -> Result<()> {
        if let Some(path) = &self.path {
            write_atomic(path, offset).await?;
        }
        self.current = offset;
        Ok(())
    }
}

async fn read_offset(path: &Path) -> Result<u64> {
    let contents = match tokio::fs::read_to_string(path).await {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!(path = %path.display(), "offset file not found, starting from offset 0");
            return Ok(0);
        }
        Err(e) => {
            return Err(Error::Offset(format!(
                "reading {}: {e}",
                path.display()
            )));
        }
    };

    let trimmed = contents.trim();
    if trimmed.is_empty() {
        return Ok(0);
    }
    let offset = trimmed.parse::<u64>().map_err(|e| {
        Error::Offset(format!(
            "{} does not contain an offset ({trimmed:?}): {e}",
            path.display()
        ))
    })?;
    info!(path = %path.display(), offset, "loaded checkpoint");
    Ok(offset)
}

/// Write the offset atomically.
///
/// Writes to a temporary file in the same directory, syncs it, then renames
/// it over the target.
async fn write_atomic(path: &Path, offset: u64) -> Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let file_name = path
        .file_name()
        .ok_or_else(|| Error::Offset(format!("{} is not a file path", path.display())))?;
    let tmp_path = dir.join(format!(
        ".{}.tmp.{}",
        file_name.to_string_lossy(),
        std::process::id()
    ));

    let mut file = tokio::fs::File::create(&tmp_path)
        .await
        .map_err(|e| Error::Offset(format!("creating temp offset file: {e}")))?;
    file.write_all(offset.to_string().as_bytes())
        .await
        .map_err(|e| Error::Offset(format!("writing temp offset file: {e}")))?;
    file.sync_all()
        .await
        .map_err(|e| Error::Offset(format!("syncing temp offset file: {e}")))?;
    drop(file);

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::Offset(format!("renaming temp offset file: {e}")))?;

    debug!(path = %path.display(), offset, "checkpoint written");
    Ok(())
}
