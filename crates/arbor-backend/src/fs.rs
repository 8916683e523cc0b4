//! File system access through tokio

use std::io;
use std::path::{Path, PathBuf};

use crate::bridge::FileSystem;

/// Writes go to a sibling temp file first and are renamed into place, so a
/// failed write never leaves a truncated document behind.
#[derive(Debug, Default, Clone)]
pub struct TokioFileSystem;

impl TokioFileSystem {
    pub fn new() -> Self {
        Self
    }
}

fn temp_sibling(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".arbor-tmp");
    path.with_file_name(name)
}

#[async_trait::async_trait]
impl FileSystem for TokioFileSystem {
    async fn read_text(&self, path: &Path) -> io::Result<String> {
        tokio::fs::read_to_string(path).await
    }

    async fn write_text(&self, path: &Path, text: &str) -> io::Result<()> {
        let temp = temp_sibling(path);
        tokio::fs::write(&temp, text).await?;
        if let Err(e) = tokio::fs::rename(&temp, path).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(e);
        }
        Ok(())
    }
}
