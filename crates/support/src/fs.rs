use std::{ffi::OsString, path::Path};

use async_trait::async_trait;

pub mod in_memory;
pub mod local;

#[derive(Debug, thiserror::Error)]
pub enum FileSystemError {
    #[error("File {0:?} already exists")]
    FileAlreadyExists(OsString),
    #[error("Ancestor {0:?} doesn't exists")]
    AncestorDoesntExists(OsString),
    #[error("Ancestor {0:?} is not a directory")]
    AncestorNotDirectory(OsString),
    #[error("File {0:?} not found")]
    FileNotFound(OsString),
    #[error("File {0:?} is a directory")]
    FileIsDirectory(OsString),
    #[error("Invalid UTF-8 encoding for file {0:?}")]
    InvalidUtf8FileEncoding(OsString),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl FileSystemError {
    /// Whether the error means the path was not there at all.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::FileNotFound(_) => true,
            Self::Io(err) => err.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

pub type FileSystemResult<T> = Result<T, FileSystemError>;

#[async_trait]
pub trait FileSystem {
    async fn create_dir_all(&self, path: impl AsRef<Path> + Send) -> FileSystemResult<()>;

    async fn read(&self, path: impl AsRef<Path> + Send) -> FileSystemResult<Vec<u8>>;

    async fn read_to_string(&self, path: impl AsRef<Path> + Send) -> FileSystemResult<String>;

    async fn write(
        &self,
        path: impl AsRef<Path> + Send,
        content: impl AsRef<[u8]> + Send,
    ) -> FileSystemResult<()>;

    async fn append(
        &self,
        path: impl AsRef<Path> + Send,
        content: impl AsRef<[u8]> + Send,
    ) -> FileSystemResult<()>;

    /// OS file opened for appending, to hand to a child process as its output.
    /// `None` when the filesystem isn't backed by OS files.
    async fn open_append(
        &self,
        path: impl AsRef<Path> + Send,
    ) -> FileSystemResult<Option<std::fs::File>>;

    async fn remove_file(&self, path: impl AsRef<Path> + Send) -> FileSystemResult<()>;

    async fn exists(&self, path: impl AsRef<Path> + Send) -> bool;
}
