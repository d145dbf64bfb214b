// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Key/value storage holding repositories.

Keys are `/` separated paths relative to the root of a [Storage]. Listing is
recursive: `list("a")` returns every key under `a/`.
*/

pub mod filesystem;
pub mod lock;
pub mod memory;

use {
    crate::error::{Result, RpmRepositoryError},
    async_trait::async_trait,
    futures::{AsyncRead, AsyncReadExt},
    std::{borrow::Cow, pin::Pin},
};

/// Describes the result of a write operation.
#[derive(Clone, Debug)]
pub struct StorageWrite<'a> {
    /// The path that was written.
    pub path: Cow<'a, str>,
    /// The number of bytes written.
    pub bytes_written: u64,
}

/// Join two key fragments with a `/`, ignoring empty fragments.
pub fn join_key(prefix: &str, key: &str) -> String {
    let prefix = prefix.trim_matches('/');
    let key = key.trim_start_matches('/');

    match (prefix.is_empty(), key.is_empty()) {
        (true, _) => key.to_string(),
        (false, true) => prefix.to_string(),
        (false, false) => format!("{}/{}", prefix, key),
    }
}

/// Whether `key` lives under the directory-like `prefix`.
pub fn key_has_prefix(key: &str, prefix: &str) -> bool {
    let prefix = prefix.trim_matches('/');

    prefix.is_empty()
        || key == prefix
        || (key.starts_with(prefix) && key.as_bytes().get(prefix.len()) == Some(&b'/'))
}

#[async_trait]
pub trait Storage: Send + Sync {
    /// Whether a key exists.
    async fn exists(&self, path: &str) -> Result<bool>;

    /// List all keys under a prefix, recursively, in sorted order.
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;

    /// Get the content of a key as an async reader.
    async fn get_path(&self, path: &str) -> Result<Pin<Box<dyn AsyncRead + Send>>>;

    /// Write data to a given key, replacing existing content.
    ///
    /// The data to write is provided by an [AsyncRead] reader.
    async fn write_path<'path, 'reader>(
        &self,
        path: Cow<'path, str>,
        reader: Pin<Box<dyn AsyncRead + Send + 'reader>>,
    ) -> Result<StorageWrite<'path>>;

    /// Move content from one key to another, replacing the destination.
    async fn move_path(&self, source: &str, dest: &str) -> Result<()>;

    /// Delete a key. Deleting a missing key is not an error.
    async fn delete_path(&self, path: &str) -> Result<()>;

    /// Read the full content of a key into memory.
    async fn read_all(&self, path: &str) -> Result<Vec<u8>> {
        let mut reader = self.get_path(path).await?;

        let mut data = vec![];
        reader
            .read_to_end(&mut data)
            .await
            .map_err(|e| RpmRepositoryError::IoPath(path.to_string(), e))?;

        Ok(data)
    }

    /// Write an in-memory buffer to a key.
    async fn write_bytes(&self, path: &str, data: Vec<u8>) -> Result<u64> {
        let write = self
            .write_path(
                Cow::Owned(path.to_string()),
                Box::pin(futures::io::Cursor::new(data)),
            )
            .await?;

        Ok(write.bytes_written)
    }

    /// Delete every key under a prefix.
    async fn delete_prefix(&self, prefix: &str) -> Result<()> {
        for key in self.list(prefix).await? {
            self.delete_path(&key).await?;
        }

        Ok(())
    }
}

/// A view of another [Storage] rooted at a key prefix.
pub struct SubStorage<'a> {
    inner: &'a dyn Storage,
    prefix: String,
}

impl<'a> SubStorage<'a> {
    pub fn new(inner: &'a dyn Storage, prefix: &str) -> Self {
        Self {
            inner,
            prefix: prefix.trim_matches('/').to_string(),
        }
    }

    fn map_path(&self, path: &str) -> String {
        join_key(&self.prefix, path)
    }

    fn unmap_path(&self, key: &str) -> String {
        if self.prefix.is_empty() {
            key.to_string()
        } else {
            key[self.prefix.len()..].trim_start_matches('/').to_string()
        }
    }
}

#[async_trait]
impl<'a> Storage for SubStorage<'a> {
    async fn exists(&self, path: &str) -> Result<bool> {
        self.inner.exists(&self.map_path(path)).await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .inner
            .list(&self.map_path(prefix))
            .await?
            .into_iter()
            .map(|key| self.unmap_path(&key))
            .collect())
    }

    async fn get_path(&self, path: &str) -> Result<Pin<Box<dyn AsyncRead + Send>>> {
        self.inner.get_path(&self.map_path(path)).await
    }

    async fn write_path<'path, 'reader>(
        &self,
        path: Cow<'path, str>,
        reader: Pin<Box<dyn AsyncRead + Send + 'reader>>,
    ) -> Result<StorageWrite<'path>> {
        let write = self
            .inner
            .write_path(Cow::Owned(self.map_path(&path)), reader)
            .await?;

        Ok(StorageWrite {
            path,
            bytes_written: write.bytes_written,
        })
    }

    async fn move_path(&self, source: &str, dest: &str) -> Result<()> {
        self.inner
            .move_path(&self.map_path(source), &self.map_path(dest))
            .await
    }

    async fn delete_path(&self, path: &str) -> Result<()> {
        self.inner.delete_path(&self.map_path(path)).await
    }
}
