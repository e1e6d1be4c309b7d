//! Local [`FileSystem`] backed by `tokio::fs`.

use std::io;
use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use super::FileSystem;

#[derive(Debug, Default, Clone, Copy)]
pub struct LocalFileSystem;

async fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .await
            .with_context(|| format!("failed to create directory {}", parent.display()))?;
    }
    Ok(())
}

#[async_trait]
impl FileSystem for LocalFileSystem {
    async fn read(&self, path: &Path) -> Result<String> {
        fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))
    }

    async fn write(&self, path: &Path, content: &str) -> Result<()> {
        ensure_parent(path).await?;
        fs::write(path, content)
            .await
            .with_context(|| format!("failed to write {}", path.display()))
    }

    async fn append(&self, path: &Path, content: &str) -> Result<()> {
        ensure_parent(path).await?;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .with_context(|| format!("failed to open {} for append", path.display()))?;
        file.write_all(content.as_bytes())
            .await
            .with_context(|| format!("failed to append to {}", path.display()))?;
        file.flush().await?;
        Ok(())
    }

    async fn delete(&self, path: &Path) -> Result<bool> {
        match fs::remove_file(path).await {
            Ok(()) => Ok(true),
            Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(error) => Err(error).with_context(|| format!("failed to delete {}", path.display())),
        }
    }

    async fn copy(&self, source: &Path, destination: &Path) -> Result<()> {
        ensure_parent(destination).await?;
        fs::copy(source, destination)
            .await
            .with_context(|| format!("failed to copy {} to {}", source.display(), destination.display()))?;
        Ok(())
    }

    async fn rename(&self, source: &Path, destination: &Path) -> Result<()> {
        ensure_parent(destination).await?;
        if fs::rename(source, destination).await.is_ok() {
            return Ok(());
        }
        // Cross-device moves cannot rename; fall back to copy + remove.
        self.copy(source, destination).await?;
        fs::remove_file(source)
            .await
            .with_context(|| format!("failed to remove {} after copy", source.display()))
    }

    async fn exists(&self, path: &Path) -> bool {
        fs::try_exists(path).await.unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn write_append_read() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/out.txt");
        let files = LocalFileSystem;
        files.write(&path, "a").await.unwrap();
        files.append(&path, "b").await.unwrap();
        assert_eq!(files.read(&path).await.unwrap(), "ab");
    }

    #[tokio::test]
    async fn delete_missing_file_is_not_an_error() {
        let dir = tempdir().unwrap();
        let files = LocalFileSystem;
        let path = dir.path().join("gone.txt");
        assert!(!files.delete(&path).await.unwrap());
        files.write(&path, "x").await.unwrap();
        assert!(files.delete(&path).await.unwrap());
        assert!(!files.exists(&path).await);
    }

    #[tokio::test]
    async fn copy_and_move() {
        let dir = tempdir().unwrap();
        let files = LocalFileSystem;
        let source = dir.path().join("source.txt");
        let copied = dir.path().join("copy/source.txt");
        let moved = dir.path().join("moved.txt");
        files.write(&source, "payload").await.unwrap();

        files.copy(&source, &copied).await.unwrap();
        assert_eq!(files.read(&copied).await.unwrap(), "payload");

        files.rename(&source, &moved).await.unwrap();
        assert!(!files.exists(&source).await);
        assert_eq!(files.read(&moved).await.unwrap(), "payload");
    }

    #[tokio::test]
    async fn read_missing_file_fails() {
        let dir = tempdir().unwrap();
        let error = LocalFileSystem.read(&dir.path().join("missing")).await.unwrap_err();
        assert!(error.to_string().contains("failed to read"));
    }
}
