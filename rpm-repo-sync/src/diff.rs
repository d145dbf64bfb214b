// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Reconciliation of the package index with stored package objects.

The *logical* package set is what `primary.xml` lists. The *physical* set is
the `.rpm` objects present in storage. Both are keyed by content checksum.
*/

use {
    crate::{
        error::{Result, RpmRepositoryError},
        io::{digest_reader, ChecksumType},
        metadata::{checksums::package_checksums, XmlPackage},
        repodata::{is_package_key, locate_metadata, read_metadata, read_repomd},
        storage::Storage,
    },
    futures::StreamExt,
    log::{debug, info},
    std::collections::{BTreeMap, BTreeSet},
};

/// Difference between the logical and the physical package sets.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PackagesDiff {
    /// Keys of stored packages missing from the index.
    pub to_add: Vec<String>,
    /// Checksums of indexed packages without a stored object.
    pub to_delete: BTreeSet<String>,
    /// Location to checksum of every indexed package.
    pub indexed: BTreeMap<String, String>,
}

impl PackagesDiff {
    /// Whether storage and index agree.
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_delete.is_empty()
    }
}

/// Computes a [PackagesDiff] for a repository.
pub struct DiffEngine<'a> {
    storage: &'a dyn Storage,
    checksum: ChecksumType,
    threads: usize,
}

impl<'a> DiffEngine<'a> {
    pub fn new(storage: &'a dyn Storage, checksum: ChecksumType, threads: usize) -> Self {
        Self {
            storage,
            checksum,
            threads: threads.max(1),
        }
    }

    /// Resolve the location to checksum map of the current index.
    ///
    /// A repository without `primary.xml` has an empty index.
    pub async fn logical(&self) -> Result<BTreeMap<String, String>> {
        let repomd = read_repomd(self.storage).await?;

        match locate_metadata(self.storage, repomd.as_ref(), XmlPackage::Primary).await? {
            Some(location) => {
                debug!("reading index from {}", location.path);
                let data = read_metadata(self.storage, &location).await?;

                package_checksums(data.as_slice())
            }
            None => Ok(BTreeMap::new()),
        }
    }

    /// Resolve the checksum to key map of stored packages.
    ///
    /// When several keys hold identical content, the first key in sorted
    /// order represents it.
    pub async fn physical(&self) -> Result<BTreeMap<String, String>> {
        let keys = self
            .storage
            .list("")
            .await?
            .into_iter()
            .filter(|key| is_package_key(key))
            .collect::<Vec<_>>();

        let mut fs = futures::stream::iter(keys.into_iter().map(|key| self.hash_key(key)))
            .buffer_unordered(self.threads);

        let mut hashed = vec![];
        while let Some(res) = fs.next().await {
            hashed.push(res?);
        }

        hashed.sort();

        let mut physical = BTreeMap::new();
        for (key, checksum) in hashed {
            physical.entry(checksum).or_insert(key);
        }

        Ok(physical)
    }

    async fn hash_key(&self, key: String) -> Result<(String, String)> {
        let reader = self.storage.get_path(&key).await?;
        let (digest, _) = digest_reader(reader, self.checksum)
            .await
            .map_err(|e| RpmRepositoryError::IoPath(key.clone(), e))?;

        Ok((key, digest.digest_hex()))
    }

    /// Compute the difference between index and storage.
    pub async fn diff(&self) -> Result<PackagesDiff> {
        let indexed = self.logical().await?;
        let physical = self.physical().await?;

        let logical = indexed.values().cloned().collect::<BTreeSet<_>>();

        let to_add = physical
            .iter()
            .filter(|(checksum, _)| !logical.contains(*checksum))
            .map(|(_, key)| key.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect::<Vec<_>>();

        let to_delete = logical
            .into_iter()
            .filter(|checksum| !physical.contains_key(checksum))
            .collect::<BTreeSet<_>>();

        info!(
            "index lists {} packages; {} stored packages unindexed; {} indexed packages missing",
            indexed.len(),
            to_add.len(),
            to_delete.len()
        );

        Ok(PackagesDiff {
            to_add,
            to_delete,
            indexed,
        })
    }
}

#[cfg(test)]
mod test {
    use {
        super::*,
        crate::{io::gzip_bytes, storage::memory::InMemoryStorage, testutil},
        indoc::formatdoc,
    };

    fn primary_xml(entries: &[(&str, &str)]) -> String {
        let packages = entries
            .iter()
            .map(|(location, checksum)| {
                formatdoc! {r#"
                    <package type="rpm">
                      <checksum type="sha256" pkgid="YES">{}</checksum>
                      <location href="{}"/>
                    </package>
                "#, checksum, location}
            })
            .collect::<String>();

        format!(
            "<metadata xmlns=\"http://linux.duke.edu/metadata/common\" packages=\"{}\">\n{}</metadata>\n",
            entries.len(),
            packages
        )
    }

    #[tokio::test]
    async fn empty_repository() -> Result<()> {
        let storage = InMemoryStorage::default();
        let abc = testutil::build(testutil::package("abc", "1.0", "1"));

        storage.write_bytes("abc-1.0-1.rpm", abc).await?;
        storage.write_bytes(".add/new.rpm", vec![1]).await?;
        storage.write_bytes("notes.txt", vec![2]).await?;

        let diff = DiffEngine::new(&storage, ChecksumType::Sha256, 2)
            .diff()
            .await?;

        assert_eq!(diff.to_add, vec!["abc-1.0-1.rpm".to_string()]);
        assert!(diff.to_delete.is_empty());
        assert!(diff.indexed.is_empty());

        Ok(())
    }

    #[tokio::test]
    async fn logical_versus_physical() -> Result<()> {
        let storage = InMemoryStorage::default();

        let kept = b"kept package".to_vec();
        let added = b"added package".to_vec();
        let kept_hex = ChecksumType::Sha256.digest_bytes(&kept).digest_hex();

        storage.write_bytes("kept.rpm", kept.clone()).await?;
        storage.write_bytes("x86_64/copy-of-kept.rpm", kept).await?;
        storage.write_bytes("b-added.rpm", added.clone()).await?;
        storage.write_bytes("a-added.rpm", added).await?;

        let xml = primary_xml(&[("kept.rpm", &kept_hex), ("gone.rpm", "deadbeef")]);
        let gz = gzip_bytes(xml.as_bytes())
            .await
            .map_err(|e| RpmRepositoryError::IoPath("gzip".into(), e))?;
        storage.write_bytes("repodata/primary.xml.gz", gz).await?;

        let diff = DiffEngine::new(&storage, ChecksumType::Sha256, 4)
            .diff()
            .await?;

        assert_eq!(diff.to_add, vec!["a-added.rpm".to_string()]);
        assert_eq!(diff.to_delete, BTreeSet::from(["deadbeef".to_string()]));
        assert_eq!(diff.indexed.get("kept.rpm"), Some(&kept_hex));
        assert!(!diff.is_empty());

        Ok(())
    }
}
