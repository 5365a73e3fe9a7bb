use std::{collections::HashMap, ffi::OsString, path::Path, sync::Arc};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{FileSystem, FileSystemError, FileSystemResult};

#[derive(Debug, Clone)]
pub enum InMemoryFile {
    File(Vec<u8>),
    Directory,
}

/// Filesystem kept in a map, the root directory always exists.
#[derive(Default, Debug, Clone)]
pub struct InMemoryFileSystem {
    pub files: Arc<RwLock<HashMap<OsString, InMemoryFile>>>,
}

impl InMemoryFileSystem {
    pub fn new(files: HashMap<OsString, InMemoryFile>) -> Self {
        Self {
            files: Arc::new(RwLock::new(files)),
        }
    }

    /// Snapshot of the paths of all the regular files.
    pub async fn file_paths(&self) -> Vec<OsString> {
        self.files
            .read()
            .await
            .iter()
            .filter(|(_, file)| matches!(file, InMemoryFile::File(_)))
            .map(|(path, _)| path.clone())
            .collect()
    }

    fn check_ancestors(
        files: &HashMap<OsString, InMemoryFile>,
        path: &Path,
    ) -> FileSystemResult<()> {
        for ancestor in path.ancestors().skip(1) {
            if ancestor.as_os_str().is_empty() || ancestor.parent().is_none() {
                continue;
            }

            match files.get(ancestor.as_os_str()) {
                Some(InMemoryFile::Directory) => continue,
                Some(InMemoryFile::File(_)) => {
                    return Err(FileSystemError::AncestorNotDirectory(
                        ancestor.as_os_str().to_owned(),
                    ))
                },
                None => {
                    return Err(FileSystemError::AncestorDoesntExists(
                        ancestor.as_os_str().to_owned(),
                    ))
                },
            }
        }

        Ok(())
    }
}

#[async_trait]
impl FileSystem for InMemoryFileSystem {
    async fn create_dir_all(&self, path: impl AsRef<Path> + Send) -> FileSystemResult<()> {
        let path = path.as_ref();
        let mut files = self.files.write().await;
        let ancestors = path
            .ancestors()
            .filter(|p| !p.as_os_str().is_empty() && p.parent().is_some())
            .collect::<Vec<&Path>>();

        for path in ancestors.into_iter().rev() {
            match files.get(path.as_os_str()) {
                Some(InMemoryFile::Directory) => continue,
                Some(InMemoryFile::File(_)) => {
                    return Err(FileSystemError::AncestorNotDirectory(
                        path.as_os_str().to_owned(),
                    ))
                },
                None => {
                    files.insert(path.as_os_str().to_owned(), InMemoryFile::Directory);
                },
            }
        }

        Ok(())
    }

    async fn read(&self, path: impl AsRef<Path> + Send) -> FileSystemResult<Vec<u8>> {
        let os_path = path.as_ref().as_os_str();

        match self.files.read().await.get(os_path) {
            Some(InMemoryFile::File(content)) => Ok(content.clone()),
            Some(InMemoryFile::Directory) => {
                Err(FileSystemError::FileIsDirectory(os_path.to_owned()))
            },
            None => Err(FileSystemError::FileNotFound(os_path.to_owned())),
        }
    }

    async fn read_to_string(&self, path: impl AsRef<Path> + Send) -> FileSystemResult<String> {
        let os_path = path.as_ref().as_os_str().to_owned();
        let content = self.read(path).await?;

        String::from_utf8(content).map_err(|_| FileSystemError::InvalidUtf8FileEncoding(os_path))
    }

    async fn write(
        &self,
        path: impl AsRef<Path> + Send,
        contents: impl AsRef<[u8]> + Send,
    ) -> FileSystemResult<()> {
        let path = path.as_ref();
        let os_path = path.as_os_str();
        let mut files = self.files.write().await;

        Self::check_ancestors(&files, path)?;

        if let Some(InMemoryFile::Directory) = files.get(os_path) {
            return Err(FileSystemError::FileIsDirectory(os_path.to_owned()));
        };

        files.insert(
            os_path.to_owned(),
            InMemoryFile::File(contents.as_ref().to_vec()),
        );

        Ok(())
    }

    async fn append(
        &self,
        path: impl AsRef<Path> + Send,
        contents: impl AsRef<[u8]> + Send,
    ) -> FileSystemResult<()> {
        let path = path.as_ref();
        let os_path = path.as_os_str();
        let mut files = self.files.write().await;

        Self::check_ancestors(&files, path)?;

        match files.get_mut(os_path) {
            Some(InMemoryFile::File(existing)) => existing.extend_from_slice(contents.as_ref()),
            Some(InMemoryFile::Directory) => {
                return Err(FileSystemError::FileIsDirectory(os_path.to_owned()))
            },
            None => {
                files.insert(
                    os_path.to_owned(),
                    InMemoryFile::File(contents.as_ref().to_vec()),
                );
            },
        }

        Ok(())
    }

    async fn open_append(
        &self,
        _path: impl AsRef<Path> + Send,
    ) -> FileSystemResult<Option<std::fs::File>> {
        Ok(None)
    }

    async fn remove_file(&self, path: impl AsRef<Path> + Send) -> FileSystemResult<()> {
        let os_path = path.as_ref().as_os_str();
        let mut files = self.files.write().await;

        match files.get(os_path) {
            Some(InMemoryFile::File(_)) => {
                files.remove(os_path);
                Ok(())
            },
            Some(InMemoryFile::Directory) => {
                Err(FileSystemError::FileIsDirectory(os_path.to_owned()))
            },
            None => Err(FileSystemError::FileNotFound(os_path.to_owned())),
        }
    }

    async fn exists(&self, path: impl AsRef<Path> + Send) -> bool {
        self.files
            .read()
            .await
            .contains_key(path.as_ref().as_os_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_should_fail_if_the_parent_directory_doesnt_exists() {
        let fs = InMemoryFileSystem::default();

        let err = fs
            .write("/tmp/network/chain-spec.json", "{}")
            .await
            .unwrap_err();

        assert!(matches!(err, FileSystemError::AncestorDoesntExists(_)));
        assert!(fs.file_paths().await.is_empty());
    }

    #[tokio::test]
    async fn create_dir_all_then_write_should_store_the_file() {
        let fs = InMemoryFileSystem::default();

        fs.create_dir_all("/tmp/network").await.unwrap();
        fs.write("/tmp/network/chain-spec.json", "{}").await.unwrap();

        assert_eq!(
            fs.read_to_string("/tmp/network/chain-spec.json")
                .await
                .unwrap(),
            "{}"
        );
        assert!(fs.exists("/tmp/network").await);
    }

    #[tokio::test]
    async fn append_should_extend_an_existing_file() {
        let fs = InMemoryFileSystem::default();
        fs.create_dir_all("/tmp").await.unwrap();

        fs.append("/tmp/one.log", "first\n").await.unwrap();
        fs.append("/tmp/one.log", "second\n").await.unwrap();

        assert_eq!(
            fs.read_to_string("/tmp/one.log").await.unwrap(),
            "first\nsecond\n"
        );
    }

    #[tokio::test]
    async fn open_append_should_have_no_os_file_to_give() {
        let fs = InMemoryFileSystem::default();
        fs.create_dir_all("/tmp").await.unwrap();

        assert!(fs.open_append("/tmp/one.log").await.unwrap().is_none());
        assert!(!fs.exists("/tmp/one.log").await);
    }

    #[tokio::test]
    async fn remove_file_should_fail_for_missing_files() {
        let fs = InMemoryFileSystem::default();

        let err = fs.remove_file("/tmp/missing.json").await.unwrap_err();

        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn remove_file_should_drop_the_entry() {
        let fs = InMemoryFileSystem::default();
        fs.create_dir_all("/tmp").await.unwrap();
        fs.write("/tmp/state.json", "{}").await.unwrap();

        fs.remove_file("/tmp/state.json").await.unwrap();

        assert!(!fs.exists("/tmp/state.json").await);
    }
}
