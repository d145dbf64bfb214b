// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Filesystem based storage. */

use {
    crate::{
        error::{Result, RpmRepositoryError},
        storage::{Storage, StorageWrite},
    },
    async_trait::async_trait,
    futures::AsyncRead,
    std::{
        borrow::Cow,
        path::{Path, PathBuf},
        pin::Pin,
    },
};

/// A [Storage] backed by a directory.
#[derive(Clone, Debug)]
pub struct FilesystemStorage {
    root_dir: PathBuf,
}

impl FilesystemStorage {
    /// Construct a new instance, bound to the root directory specified.
    ///
    /// No validation of the passed path is performed. The directory does not need to exist.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            root_dir: path.as_ref().to_path_buf(),
        }
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    fn resolve(&self, path: &str) -> PathBuf {
        path.split('/')
            .filter(|part| !part.is_empty())
            .fold(self.root_dir.clone(), |acc, part| acc.join(part))
    }

    fn create_parent(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| RpmRepositoryError::IoPath(format!("{}", parent.display()), e))?;
        }

        Ok(())
    }
}

#[async_trait]
impl Storage for FilesystemStorage {
    async fn exists(&self, path: &str) -> Result<bool> {
        Ok(self.resolve(path).is_file())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let base = self.resolve(prefix);

        if base.is_file() {
            return Ok(vec![prefix.trim_matches('/').to_string()]);
        } else if !base.is_dir() {
            return Ok(vec![]);
        }

        let mut keys = vec![];

        for entry in walkdir::WalkDir::new(&base) {
            let entry = entry.map_err(|e| {
                RpmRepositoryError::IoPath(format!("{}", base.display()), e.into())
            })?;

            if !entry.file_type().is_file() {
                continue;
            }

            let rel = entry.path().strip_prefix(&self.root_dir).map_err(|_| {
                RpmRepositoryError::IoPath(
                    format!("{}", entry.path().display()),
                    std::io::Error::new(std::io::ErrorKind::Other, "path outside of storage root"),
                )
            })?;

            keys.push(
                rel.components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/"),
            );
        }

        keys.sort();

        Ok(keys)
    }

    async fn get_path(&self, path: &str) -> Result<Pin<Box<dyn AsyncRead + Send>>> {
        let path = self.resolve(path);

        let f = std::fs::File::open(&path)
            .map_err(|e| RpmRepositoryError::IoPath(format!("{}", path.display()), e))?;

        Ok(Box::pin(futures::io::AllowStdIo::new(f)))
    }

    async fn write_path<'path, 'reader>(
        &self,
        path: Cow<'path, str>,
        reader: Pin<Box<dyn AsyncRead + Send + 'reader>>,
    ) -> Result<StorageWrite<'path>> {
        let dest_path = self.resolve(path.as_ref());
        Self::create_parent(&dest_path)?;

        let fh = std::fs::File::create(&dest_path)
            .map_err(|e| RpmRepositoryError::IoPath(format!("{}", dest_path.display()), e))?;

        let mut writer = futures::io::AllowStdIo::new(fh);

        let bytes_written = futures::io::copy(reader, &mut writer)
            .await
            .map_err(|e| RpmRepositoryError::IoPath(format!("{}", dest_path.display()), e))?;

        Ok(StorageWrite {
            path,
            bytes_written,
        })
    }

    async fn move_path(&self, source: &str, dest: &str) -> Result<()> {
        let source_path = self.resolve(source);
        let dest_path = self.resolve(dest);
        Self::create_parent(&dest_path)?;

        std::fs::rename(&source_path, &dest_path)
            .map_err(|e| RpmRepositoryError::IoPath(format!("{}", source_path.display()), e))
    }

    async fn delete_path(&self, path: &str) -> Result<()> {
        let path = self.resolve(path);

        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(RpmRepositoryError::IoPath(format!("{}", path.display()), e)),
        }
    }
}
