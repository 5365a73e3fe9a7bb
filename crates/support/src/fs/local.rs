use std::path::Path;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use super::{FileSystem, FileSystemError, FileSystemResult};

#[derive(Default, Debug, Clone)]
pub struct LocalFileSystem;

#[async_trait]
impl FileSystem for LocalFileSystem {
    async fn create_dir_all(&self, path: impl AsRef<Path> + Send) -> FileSystemResult<()> {
        tokio::fs::create_dir_all(path).await.map_err(Into::into)
    }

    async fn read(&self, path: impl AsRef<Path> + Send) -> FileSystemResult<Vec<u8>> {
        tokio::fs::read(path).await.map_err(Into::into)
    }

    async fn read_to_string(&self, path: impl AsRef<Path> + Send) -> FileSystemResult<String> {
        tokio::fs::read_to_string(path).await.map_err(Into::into)
    }

    async fn write(
        &self,
        path: impl AsRef<Path> + Send,
        contents: impl AsRef<[u8]> + Send,
    ) -> FileSystemResult<()> {
        tokio::fs::write(path, contents).await.map_err(Into::into)
    }

    async fn append(
        &self,
        path: impl AsRef<Path> + Send,
        contents: impl AsRef<[u8]> + Send,
    ) -> FileSystemResult<()> {
        let contents = contents.as_ref();
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(Into::<FileSystemError>::into)?;

        file.write_all(contents)
            .await
            .map_err(Into::<FileSystemError>::into)?;

        file.flush().await.and(Ok(())).map_err(Into::into)
    }

    async fn open_append(
        &self,
        path: impl AsRef<Path> + Send,
    ) -> FileSystemResult<Option<std::fs::File>> {
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(Into::<FileSystemError>::into)?;

        Ok(Some(file.into_std().await))
    }

    async fn remove_file(&self, path: impl AsRef<Path> + Send) -> FileSystemResult<()> {
        tokio::fs::remove_file(path).await.map_err(Into::into)
    }

    async fn exists(&self, path: impl AsRef<Path> + Send) -> bool {
        tokio::fs::try_exists(path).await.unwrap_or(false)
    }
}
