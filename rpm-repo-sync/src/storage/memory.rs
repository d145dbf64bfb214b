// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Storage held in process memory. */

use {
    crate::{
        error::{Result, RpmRepositoryError},
        storage::{key_has_prefix, Storage, StorageWrite},
    },
    async_trait::async_trait,
    futures::{AsyncRead, AsyncReadExt},
    std::{
        borrow::Cow,
        collections::BTreeMap,
        pin::Pin,
        sync::{Arc, Mutex},
    },
};

/// A [Storage] keeping all content in a map.
///
/// Clones share the same content.
#[derive(Clone, Debug, Default)]
pub struct InMemoryStorage {
    data: Arc<Mutex<BTreeMap<String, Arc<Vec<u8>>>>>,
}

impl InMemoryStorage {
    fn with_data<T>(&self, f: impl FnOnce(&mut BTreeMap<String, Arc<Vec<u8>>>) -> T) -> T {
        let mut guard = match self.data.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        f(&mut guard)
    }

    fn missing(path: &str) -> RpmRepositoryError {
        RpmRepositoryError::IoPath(
            path.to_string(),
            std::io::Error::new(std::io::ErrorKind::NotFound, "no such key"),
        )
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn exists(&self, path: &str) -> Result<bool> {
        Ok(self.with_data(|data| data.contains_key(path)))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self.with_data(|data| {
            data.keys()
                .filter(|key| key_has_prefix(key, prefix))
                .cloned()
                .collect()
        }))
    }

    async fn get_path(&self, path: &str) -> Result<Pin<Box<dyn AsyncRead + Send>>> {
        let content = self
            .with_data(|data| data.get(path).cloned())
            .ok_or_else(|| Self::missing(path))?;

        Ok(Box::pin(futures::io::Cursor::new(content.to_vec())))
    }

    async fn write_path<'path, 'reader>(
        &self,
        path: Cow<'path, str>,
        mut reader: Pin<Box<dyn AsyncRead + Send + 'reader>>,
    ) -> Result<StorageWrite<'path>> {
        let mut content = vec![];
        reader
            .read_to_end(&mut content)
            .await
            .map_err(|e| RpmRepositoryError::IoPath(path.to_string(), e))?;

        let bytes_written = content.len() as u64;
        self.with_data(|data| data.insert(path.to_string(), Arc::new(content)));

        Ok(StorageWrite {
            path,
            bytes_written,
        })
    }

    async fn move_path(&self, source: &str, dest: &str) -> Result<()> {
        self.with_data(|data| {
            let content = data.remove(source).ok_or_else(|| Self::missing(source))?;
            data.insert(dest.to_string(), content);

            Ok(())
        })
    }

    async fn delete_path(&self, path: &str) -> Result<()> {
        self.with_data(|data| data.remove(path));

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn basic_operations() -> Result<()> {
        let storage = InMemoryStorage::default();

        storage.write_bytes("b/two", b"2".to_vec()).await?;
        storage.write_bytes("a/one", b"1".to_vec()).await?;
        storage.write_bytes("ab", b"3".to_vec()).await?;

        assert_eq!(storage.list("").await?, vec!["a/one", "ab", "b/two"]);
        assert_eq!(storage.list("a").await?, vec!["a/one"]);

        storage.move_path("a/one", "c/one").await?;
        assert!(!storage.exists("a/one").await?);
        assert_eq!(storage.read_all("c/one").await?, b"1");

        assert!(storage.move_path("missing", "x").await.is_err());
        assert!(storage.get_path("missing").await.is_err());

        storage.delete_path("c/one").await?;
        storage.delete_path("c/one").await?;
        assert!(!storage.exists("c/one").await?);

        Ok(())
    }
}
