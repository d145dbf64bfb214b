// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Metadata build steps operating on a scratch area of a [Storage].

A build runs [MetadataAdd], [MetadataRemove], [Archiver] and
[RepomdBuilder] in that order against the same scratch prefix, with
[MetadataRebuild] in between when a listing drifted from `primary.xml`.
Each step reads what the previous one left behind:

* `<scratch>/<kind>.xml` after adding and removing packages.
* `<scratch>/<kind>.xml.gz` plus a `<scratch>/<kind>.xml.<digest>` sidecar
  holding the open checksum and size after archiving.
* `<scratch>/repomd.xml` once the index is built.
*/

use {
    crate::{
        error::{Result, RpmRepositoryError},
        io::{read_compressed, ChecksumType, Compression, ContentDigest, DigestingReader},
        metadata::{
            events::PackageElements,
            maid::{remove_items, InfoDetail, RemoveResult},
            merge::{merge_items, rebuild_item, MergeResult},
            repomd::{Checksum, Location, RepoMd, RepoMdData},
            MetadataItem, XmlPackage,
        },
        naming::NamingPolicy,
        package::{PackageMeta, PackageReader},
        repodata::{locate_metadata, read_metadata},
        storage::{join_key, Storage},
    },
    futures::{io::BufReader, AsyncReadExt, StreamExt, TryStreamExt},
    log::{debug, info, warn},
    std::{
        collections::{BTreeMap, BTreeSet},
        str::FromStr,
    },
};

fn scratch_key(scratch: &str, kind: XmlPackage) -> String {
    join_key(scratch, &format!("{}.xml", kind.name()))
}

fn archive_key(scratch: &str, kind: XmlPackage) -> String {
    join_key(scratch, &format!("{}.xml.gz", kind.name()))
}

fn sidecar_key(scratch: &str, kind: XmlPackage, checksum: ChecksumType) -> String {
    join_key(scratch, &format!("{}.xml.{}", kind.name(), checksum.name()))
}

/// Write one in-memory document per kind into the scratch area.
async fn write_documents(
    storage: &dyn Storage,
    scratch: &str,
    documents: BTreeMap<XmlPackage, Vec<u8>>,
) -> Result<()> {
    for (kind, data) in documents {
        let key = scratch_key(scratch, kind);
        let size = storage.write_bytes(&key, data).await?;
        debug!("wrote {} ({} bytes)", key, size);
    }

    Ok(())
}

/// Merges packages into the published listings.
pub struct MetadataAdd<'a> {
    storage: &'a dyn Storage,
    scratch: String,
    kinds: Vec<XmlPackage>,
}

impl<'a> MetadataAdd<'a> {
    pub fn new(storage: &'a dyn Storage, scratch: &str, kinds: Vec<XmlPackage>) -> Self {
        Self {
            storage,
            scratch: scratch.to_string(),
            kinds,
        }
    }

    /// Merge packages into the listings advertised by `repomd`.
    ///
    /// Results land in `<scratch>/<kind>.xml`.
    pub async fn run(
        &self,
        repomd: Option<&RepoMd>,
        packages: &[PackageMeta],
    ) -> Result<MergeResult> {
        let mut inputs = BTreeMap::new();

        for kind in &self.kinds {
            if let Some(location) = locate_metadata(self.storage, repomd, *kind).await? {
                debug!("merging into {}", location.path);
                inputs.insert(*kind, read_metadata(self.storage, &location).await?);
            }
        }

        let mut outputs = self
            .kinds
            .iter()
            .map(|kind| (*kind, vec![]))
            .collect::<BTreeMap<_, Vec<u8>>>();

        let items = outputs
            .iter_mut()
            .map(|(kind, output)| {
                let input = inputs
                    .get(kind)
                    .map(|data| Box::new(data.as_slice()) as Box<dyn std::io::Read + '_>);

                MetadataItem::new(*kind, input, Box::new(output))
            })
            .collect::<Vec<_>>();

        let result = merge_items(items, packages)?;

        write_documents(self.storage, &self.scratch, outputs).await?;

        info!(
            "merged {} packages; {} records replaced; {} packages listed",
            packages.len(),
            result.replaced.len(),
            result.count
        );

        Ok(result)
    }
}

/// Removes packages from the listings in the scratch area.
pub struct MetadataRemove<'a> {
    storage: &'a dyn Storage,
    scratch: String,
    kinds: Vec<XmlPackage>,
}

impl<'a> MetadataRemove<'a> {
    pub fn new(storage: &'a dyn Storage, scratch: &str, kinds: Vec<XmlPackage>) -> Self {
        Self {
            storage,
            scratch: scratch.to_string(),
            kinds,
        }
    }

    /// Remove packages with the given checksums from `<scratch>/<kind>.xml`.
    pub async fn run(
        &self,
        checksums: &BTreeSet<String>,
        detail: InfoDetail,
    ) -> Result<RemoveResult> {
        let mut inputs = BTreeMap::new();

        for kind in &self.kinds {
            let key = scratch_key(&self.scratch, *kind);

            if self.storage.exists(&key).await? {
                inputs.insert(*kind, self.storage.read_all(&key).await?);
            }
        }

        let mut outputs = inputs
            .keys()
            .map(|kind| (*kind, vec![]))
            .collect::<BTreeMap<_, Vec<u8>>>();

        let items = outputs
            .iter_mut()
            .map(|(kind, output)| {
                let input = inputs
                    .get(kind)
                    .map(|data| Box::new(data.as_slice()) as Box<dyn std::io::Read + '_>);

                MetadataItem::new(*kind, input, Box::new(output))
            })
            .collect::<Vec<_>>();

        let result = remove_items(items, checksums, detail)?;

        write_documents(self.storage, &self.scratch, outputs).await?;

        info!(
            "removed {} checksums; {} packages listed",
            checksums.len(),
            result.count
        );

        Ok(result)
    }
}

/// A package record of `primary.xml`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct IndexedPackage {
    pub location: String,
    pub checksum: ContentDigest,
}

/// Rewrites listings of the scratch area from every package of `primary.xml`.
///
/// This repairs secondary listings that no longer describe the packages of
/// `primary.xml`, e.g. `filelists.xml` enabled on an existing repository or a
/// lost `other.xml`. Every package is decoded again, so this is much slower
/// than merging.
pub struct MetadataRebuild<'a> {
    storage: &'a dyn Storage,
    scratch: String,
    threads: usize,
}

impl<'a> MetadataRebuild<'a> {
    pub fn new(storage: &'a dyn Storage, scratch: &str, threads: usize) -> Self {
        Self {
            storage,
            scratch: scratch.to_string(),
            threads: threads.max(1),
        }
    }

    /// Packages listed by `<scratch>/primary.xml`, in document order.
    pub async fn indexed(&self) -> Result<Vec<IndexedPackage>> {
        let key = scratch_key(&self.scratch, XmlPackage::Primary);
        let data = self.storage.read_all(&key).await?;

        PackageElements::new(data.as_slice())
            .map(|element| {
                let element = element?;
                let malformed =
                    || RpmRepositoryError::MalformedMetadata(format!("incomplete record in {}", key));

                let location = element
                    .child_attribute("location", "href")
                    .ok_or_else(malformed)?
                    .to_string();
                let checksum = ChecksumType::from_str(
                    element
                        .child_attribute("checksum", "type")
                        .ok_or_else(malformed)?,
                )?;
                let checksum = ContentDigest::from_hex_digest(
                    checksum,
                    &element
                        .package_id(XmlPackage::Primary)
                        .ok_or_else(malformed)?,
                )?;

                Ok(IndexedPackage { location, checksum })
            })
            .collect()
    }

    /// Rewrite `<scratch>/<kind>.xml` of `kinds` to list every package of `primary.xml`.
    ///
    /// Packages in `known` are used as is. Others are read from storage at their
    /// location and must still have their indexed checksum.
    pub async fn run(&self, kinds: &BTreeSet<XmlPackage>, known: &[PackageMeta]) -> Result<usize> {
        let indexed = self.indexed().await?;

        let known = known
            .iter()
            .map(|package| (package.checksum().clone(), package))
            .collect::<BTreeMap<_, _>>();

        let packages = futures::stream::iter(indexed.into_iter().map(|record| {
            let cached = known.get(&record.checksum).map(|package| (*package).clone());

            async move {
                if let Some(package) = cached {
                    return Ok(package);
                }

                let package = PackageReader::new(self.storage, record.checksum.checksum_type())
                    .read(&record.location, &record.location)
                    .await?;

                if package.checksum() != &record.checksum {
                    warn!(
                        "{} changed since it was indexed as {}",
                        record.location,
                        record.checksum.digest_hex()
                    );

                    return Err(RpmRepositoryError::InvalidPackage(
                        record.location,
                        "content does not match its primary.xml checksum".to_string(),
                    ));
                }

                Ok(package)
            }
        }))
        .buffered(self.threads)
        .try_collect::<Vec<_>>()
        .await?;

        let mut outputs = kinds
            .iter()
            .map(|kind| (*kind, vec![]))
            .collect::<BTreeMap<_, Vec<u8>>>();

        for (kind, output) in outputs.iter_mut() {
            rebuild_item(MetadataItem::new(*kind, None, Box::new(output)), &packages)?;
        }

        write_documents(self.storage, &self.scratch, outputs).await?;

        info!(
            "rebuilt {} from {} packages",
            kinds
                .iter()
                .map(|kind| kind.name())
                .collect::<Vec<_>>()
                .join(", "),
            packages.len()
        );

        Ok(packages.len())
    }
}

/// Open checksum and size of an archived document.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct OpenContent {
    pub digest: ContentDigest,
    pub size: u64,
}

impl OpenContent {
    fn to_sidecar(&self) -> Vec<u8> {
        format!("{} {}", self.digest.digest_hex(), self.size).into_bytes()
    }

    fn from_sidecar(checksum: ChecksumType, key: &str, data: &[u8]) -> Result<Self> {
        let malformed = || RpmRepositoryError::MalformedMetadata(format!("bad sidecar {}", key));

        let s = String::from_utf8_lossy(data);
        let (hex, size) = s.trim().split_once(' ').ok_or_else(malformed)?;

        Ok(Self {
            digest: ContentDigest::from_hex_digest(checksum, hex)?,
            size: size.parse::<u64>().map_err(|_| malformed())?,
        })
    }
}

/// Compresses the documents of the scratch area.
pub struct Archiver<'a> {
    storage: &'a dyn Storage,
    scratch: String,
    checksum: ChecksumType,
}

impl<'a> Archiver<'a> {
    pub fn new(storage: &'a dyn Storage, scratch: &str, checksum: ChecksumType) -> Self {
        Self {
            storage,
            scratch: scratch.to_string(),
            checksum,
        }
    }

    /// Archive `<scratch>/<kind>.xml`, if present.
    ///
    /// Returns the open checksum and size of the document.
    pub async fn archive(&self, kind: XmlPackage) -> Result<Option<OpenContent>> {
        let plain = scratch_key(&self.scratch, kind);

        if !self.storage.exists(&plain).await? {
            return Ok(None);
        }

        let mut reader = DigestingReader::new(self.storage.get_path(&plain).await?, self.checksum);

        let mut compressed = vec![];
        read_compressed(BufReader::new(&mut reader), Compression::Gzip)
            .read_to_end(&mut compressed)
            .await
            .map_err(|e| RpmRepositoryError::IoPath(plain.clone(), e))?;

        let (_, digest, size) = reader.finish();
        let open = OpenContent { digest, size };

        self.storage
            .write_bytes(
                &sidecar_key(&self.scratch, kind, self.checksum),
                open.to_sidecar(),
            )
            .await?;
        self.storage
            .write_bytes(&archive_key(&self.scratch, kind), compressed)
            .await?;
        self.storage.delete_path(&plain).await?;

        debug!("archived {} ({} bytes open)", plain, size);

        Ok(Some(open))
    }

    /// Archive every document among `kinds`.
    pub async fn run(&self, kinds: &[XmlPackage]) -> Result<()> {
        for kind in kinds {
            self.archive(*kind).await?;
        }

        Ok(())
    }
}

/// A built `repomd.xml` and where its data files go.
#[derive(Clone, Debug)]
pub struct BuiltRepomd {
    pub repomd: RepoMd,
    /// Scratch key of the serialized `repomd.xml`.
    pub path: String,
    /// Scratch key and final repository location of each data file.
    pub files: Vec<(String, String)>,
}

/// Assembles `repomd.xml` from the archived documents of the scratch area.
pub struct RepomdBuilder<'a> {
    storage: &'a dyn Storage,
    scratch: String,
    checksum: ChecksumType,
    naming: NamingPolicy,
}

impl<'a> RepomdBuilder<'a> {
    pub fn new(
        storage: &'a dyn Storage,
        scratch: &str,
        checksum: ChecksumType,
        naming: NamingPolicy,
    ) -> Self {
        Self {
            storage,
            scratch: scratch.to_string(),
            checksum,
            naming,
        }
    }

    /// Build and write `<scratch>/repomd.xml`.
    ///
    /// `primary` and `other` must have been archived. A missing `filelists`
    /// is left out of the index.
    pub async fn build(&self, kinds: &[XmlPackage]) -> Result<BuiltRepomd> {
        let timestamp = chrono::Utc::now().timestamp().max(0) as u64;

        let mut data = vec![];
        let mut files = vec![];

        for kind in kinds {
            let key = archive_key(&self.scratch, *kind);

            if !self.storage.exists(&key).await? {
                if *kind == XmlPackage::Filelists {
                    debug!("no filelists to index");
                    continue;
                }

                return Err(RpmRepositoryError::MetadataFileNotFound(kind.name()));
            }

            let compressed = self.storage.read_all(&key).await?;
            let digest = self.checksum.digest_bytes(&compressed);

            let name_hex = match self.naming.checksum_type() {
                Some(checksum) if checksum == self.checksum => digest.digest_hex(),
                Some(checksum) => checksum.digest_bytes(&compressed).digest_hex(),
                None => digest.digest_hex(),
            };
            let location = self.naming.full_name(*kind, &name_hex);

            let sidecar = sidecar_key(&self.scratch, *kind, self.checksum);
            let open = OpenContent::from_sidecar(
                self.checksum,
                &sidecar,
                &self.storage.read_all(&sidecar).await?,
            )?;

            data.push(RepoMdData {
                data_type: kind.name().to_string(),
                checksum: Checksum::from(&digest),
                location: Location {
                    href: location.clone(),
                },
                size: Some(compressed.len() as u64),
                timestamp: Some(timestamp),
                open_checksum: Some(Checksum::from(&open.digest)),
                open_size: Some(open.size),
                header_checksum: None,
                header_size: None,
            });
            files.push((key, location));
        }

        let repomd = RepoMd {
            revision: timestamp.to_string(),
            data,
        };

        let path = join_key(&self.scratch, "repomd.xml");
        self.storage.write_bytes(&path, repomd.to_xml()?).await?;

        info!("built repomd.xml revision {}", repomd.revision);

        Ok(BuiltRepomd {
            repomd,
            path,
            files,
        })
    }
}
