// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Keeping a repository's index in sync with its packages.

[Rpm] drives a *batch update* of a repository living under a prefix of a
[Storage]:

1. A lease is taken on the repository's `repodata`.
2. The index is compared with the stored packages (see [crate::diff]).
3. Packages staged under `.add/` and stored packages missing from the index
   are read. Packages named by markers under `.remove/` and indexed packages
   whose object vanished are scheduled for removal.
4. New listings and `repomd.xml` are built in a scratch area
   (see [crate::update]). A listing that no longer describes the packages
   of `primary.xml`, such as a newly enabled `filelists.xml`, is rebuilt
   from every indexed package.
5. Staged packages are moved to their final location. Then the new metadata
   files are moved into `repodata/`, `repomd.xml` last, and files the new
   `repomd.xml` no longer references are deleted. Finally removed packages
   and their markers are deleted.

Nothing under `repodata/` changes before step 5, so a failed batch can be
retried.
*/

use {
    crate::{
        config::RepoConfig,
        diff::DiffEngine,
        error::{Result, RpmRepositoryError},
        metadata::maid::InfoDetail,
        package::{PackageInfo, PackageMeta, PackageReader},
        repodata::{
            read_repomd, validate_location, ADD_PREFIX, REMOVE_PREFIX, REPODATA, REPOMD,
            SCRATCH_PREFIX,
        },
        storage::{
            join_key,
            lock::{StorageLock, DEFAULT_LOCK_TTL},
            Storage, SubStorage,
        },
        update::{Archiver, MetadataAdd, MetadataRebuild, MetadataRemove, RepomdBuilder},
    },
    futures::StreamExt,
    log::{debug, info, warn},
    std::collections::{BTreeMap, BTreeSet},
};

/// Represents a batch update event.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PublishEvent {
    /// The repository lease was acquired.
    LockAcquired(String),

    /// Number of stored packages to index and indexed packages to drop.
    Diffed(usize, usize),

    /// A package could not be decoded and was skipped.
    InvalidPackage(String, String),

    /// A package was added to the index.
    PackageAdded(PackageInfo),

    /// A package was removed from the index.
    PackageRemoved(PackageInfo),

    /// Metadata for the given number of packages was built.
    MetadataBuilt(usize),

    /// A storage key was moved.
    PathMoved(String, String),

    /// A storage key was deleted.
    PathDeleted(String),

    /// A new `repomd.xml` with the given revision is live.
    RepomdPublished(String),
}

impl std::fmt::Display for PublishEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LockAcquired(prefix) => {
                write!(f, "acquired lock on repository {}", prefix)
            }
            Self::Diffed(to_add, to_delete) => {
                write!(
                    f,
                    "{} stored packages to index; {} indexed packages missing",
                    to_add, to_delete
                )
            }
            Self::InvalidPackage(location, message) => {
                write!(f, "skipping invalid package {}: {}", location, message)
            }
            Self::PackageAdded(info) => write!(f, "added {}", info),
            Self::PackageRemoved(info) => write!(f, "removed {}", info),
            Self::MetadataBuilt(count) => {
                write!(f, "built metadata listing {} packages", count)
            }
            Self::PathMoved(source, dest) => write!(f, "moved {} to {}", source, dest),
            Self::PathDeleted(path) => write!(f, "deleted {}", path),
            Self::RepomdPublished(revision) => {
                write!(f, "published repomd.xml revision {}", revision)
            }
        }
    }
}

/// Callback receiving [PublishEvent]s.
pub type ProgressCallback = Option<Box<dyn Fn(PublishEvent) + Sync>>;

fn emit(progress_cb: &ProgressCallback, event: PublishEvent) {
    if let Some(cb) = progress_cb {
        cb(event);
    }
}

/// Outcome of a batch update.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct UpdateReport {
    /// Packages added to the index.
    pub added: Vec<PackageInfo>,
    /// Packages removed from the index. Only populated with [InfoDetail::Full].
    pub removed: Vec<PackageInfo>,
    /// Number of packages in the index.
    pub count: usize,
    /// Revision of the published `repomd.xml`.
    pub revision: String,
}

/// Resolve the repository prefix a storage key belongs to.
///
/// Keys under a staging area belong to the repository holding the staging
/// area. Other keys belong to the repository at their parent prefix.
pub fn repository_prefix(key: &str) -> String {
    let parts = key.trim_matches('/').split('/').collect::<Vec<_>>();

    let end = parts
        .iter()
        .position(|part| *part == ADD_PREFIX || *part == REMOVE_PREFIX)
        .unwrap_or_else(|| parts.len().saturating_sub(1));

    parts[..end].join("/")
}

struct PackageJob {
    key: String,
    location: String,
    staged: bool,
}

/// Staged and derived work of one batch.
#[derive(Default)]
struct BatchInput {
    /// Packages to add, ordered by location.
    packages: Vec<PackageMeta>,
    /// Locations of packages to move out of `.add/`.
    staged: BTreeSet<String>,
    /// Locations named by `.remove/` markers.
    markers: BTreeSet<String>,
    /// Checksums to drop from the index.
    removals: BTreeSet<String>,
}

/// Maintains RPM repositories stored in a [Storage].
pub struct Rpm {
    storage: Box<dyn Storage>,
    config: RepoConfig,
    detail: InfoDetail,
    threads: usize,
}

impl Rpm {
    /// Construct an instance operating on `storage`.
    ///
    /// `threads` bounds how many packages are read concurrently.
    pub fn new(storage: Box<dyn Storage>, config: RepoConfig, threads: usize) -> Self {
        Self {
            storage,
            config,
            detail: InfoDetail::None,
            threads: threads.max(1),
        }
    }

    /// Set how much detail about removed packages is reported.
    pub fn with_info_detail(mut self, detail: InfoDetail) -> Self {
        self.detail = detail;
        self
    }

    pub fn storage(&self) -> &dyn Storage {
        self.storage.as_ref()
    }

    pub fn config(&self) -> &RepoConfig {
        &self.config
    }

    /// Stage package content for addition to the repository at `prefix`.
    ///
    /// Returns the staged key.
    pub async fn stage_package(
        &self,
        prefix: &str,
        location: &str,
        data: Vec<u8>,
    ) -> Result<String> {
        let location = validate_location(location)?;
        let key = join_key(prefix, &join_key(ADD_PREFIX, location));

        self.storage.write_bytes(&key, data).await?;
        debug!("staged {}", key);

        Ok(key)
    }

    /// Stage the removal of the package at `location` of the repository at `prefix`.
    ///
    /// Returns the marker key.
    pub async fn stage_removal(&self, prefix: &str, location: &str) -> Result<String> {
        let location = validate_location(location)?;
        let key = join_key(prefix, &join_key(REMOVE_PREFIX, location));

        self.storage.write_bytes(&key, vec![]).await?;
        debug!("staged removal {}", key);

        Ok(key)
    }

    /// Run a batch update of the repository containing `key`.
    pub async fn update(&self, key: &str, progress_cb: &ProgressCallback) -> Result<UpdateReport> {
        self.batch_update(&repository_prefix(key), progress_cb).await
    }

    /// Run a batch update of the repository at `prefix`.
    pub async fn batch_update(
        &self,
        prefix: &str,
        progress_cb: &ProgressCallback,
    ) -> Result<UpdateReport> {
        let storage = SubStorage::new(self.storage.as_ref(), prefix);

        let mut lock = StorageLock::new(&storage, REPODATA, DEFAULT_LOCK_TTL);
        lock.acquire().await?;
        emit(progress_cb, PublishEvent::LockAcquired(prefix.to_string()));

        let scratch = join_key(SCRATCH_PREFIX, &uuid::Uuid::new_v4().to_string());

        let res = self.run_batch(&storage, &scratch, progress_cb).await;

        let cleanup = storage.delete_prefix(&scratch).await;
        let release = lock.release().await;

        let report = res?;
        cleanup?;
        release?;

        info!(
            "repository {} lists {} packages at revision {}",
            prefix, report.count, report.revision
        );

        Ok(report)
    }

    /// Discover staged packages and removal markers.
    async fn staging(
        &self,
        storage: &dyn Storage,
    ) -> Result<(Vec<PackageJob>, BTreeSet<String>)> {
        let mut jobs = vec![];

        for key in storage.list(ADD_PREFIX).await? {
            let location = key[ADD_PREFIX.len()..].trim_start_matches('/');

            match validate_location(location) {
                Ok(location) => jobs.push(PackageJob {
                    location: location.to_string(),
                    key,
                    staged: true,
                }),
                Err(_) => {
                    warn!("deleting staged object with unusable location: {}", key);
                    storage.delete_path(&key).await?;
                }
            }
        }

        let markers = storage
            .list(REMOVE_PREFIX)
            .await?
            .into_iter()
            .map(|key| key[REMOVE_PREFIX.len()..].trim_start_matches('/').to_string())
            .collect::<BTreeSet<_>>();

        Ok((jobs, markers))
    }

    /// Read the packages to add, resolving what to remove.
    async fn collect(
        &self,
        storage: &dyn Storage,
        progress_cb: &ProgressCallback,
    ) -> Result<BatchInput> {
        let diff = DiffEngine::new(storage, self.config.digest(), self.threads)
            .diff()
            .await?;
        emit(
            progress_cb,
            PublishEvent::Diffed(diff.to_add.len(), diff.to_delete.len()),
        );

        let (mut jobs, markers) = self.staging(storage).await?;

        let staged_locations = jobs
            .iter()
            .map(|job| job.location.clone())
            .collect::<BTreeSet<_>>();
        jobs.extend(
            diff.to_add
                .iter()
                .filter(|key| !staged_locations.contains(*key) && !markers.contains(*key))
                .map(|key| PackageJob {
                    key: key.clone(),
                    location: key.clone(),
                    staged: false,
                }),
        );

        let reader = PackageReader::new(storage, self.config.digest());

        let mut fs = futures::stream::iter(jobs.iter().map(|job| {
            let reader = &reader;
            async move { (job, reader.read(&job.key, &job.location).await) }
        }))
        .buffer_unordered(self.threads);

        let mut input = BatchInput::default();

        while let Some((job, res)) = fs.next().await {
            match res {
                Ok(package) => {
                    if job.staged {
                        input.staged.insert(job.location.clone());
                    }
                    input.packages.push(package);
                }
                Err(RpmRepositoryError::InvalidPackage(location, message)) => {
                    warn!("skipping invalid package {}: {}", location, message);
                    emit(
                        progress_cb,
                        PublishEvent::InvalidPackage(location, message),
                    );

                    if job.staged {
                        self.delete_path(storage, &job.key, progress_cb).await?;
                    }
                }
                Err(e) => return Err(e),
            }
        }

        input
            .packages
            .sort_by(|a, b| a.location().cmp(b.location()));

        input.removals = diff.to_delete;

        for location in &markers {
            if input.staged.contains(location) {
                debug!("{} is staged for addition; ignoring removal", location);
                continue;
            }

            match diff.indexed.get(location) {
                Some(checksum) => {
                    input.removals.insert(checksum.clone());
                }
                None => debug!("{} is not indexed", location),
            }
        }

        // Every checksum may be listed once. Content that stays indexed under
        // another location isn't added again.
        let kept = diff
            .indexed
            .iter()
            .filter(|(_, checksum)| !input.removals.contains(*checksum))
            .map(|(location, checksum)| (checksum.as_str(), location.as_str()))
            .collect::<BTreeMap<_, _>>();

        let mut added = BTreeSet::new();
        let mut duplicates = BTreeSet::new();
        input.packages.retain(|package| {
            let checksum = package.checksum().digest_hex();

            if let Some(location) = kept
                .get(checksum.as_str())
                .filter(|location| **location != package.location())
            {
                warn!(
                    "ignoring {}: same content is indexed as {}",
                    package.location(),
                    location
                );
            } else if !added.insert(checksum) {
                warn!("ignoring {}: duplicate content", package.location());
            } else {
                return true;
            }

            duplicates.insert(package.location().to_string());
            false
        });

        for job in jobs
            .iter()
            .filter(|job| job.staged && duplicates.contains(&job.location))
        {
            input.staged.remove(&job.location);
            self.delete_path(storage, &job.key, progress_cb).await?;
        }

        for checksum in &added {
            input.removals.remove(checksum);
        }

        input.markers = markers;

        Ok(input)
    }

    async fn move_path(
        &self,
        storage: &dyn Storage,
        source: &str,
        dest: &str,
        progress_cb: &ProgressCallback,
    ) -> Result<()> {
        storage.move_path(source, dest).await?;
        emit(
            progress_cb,
            PublishEvent::PathMoved(source.to_string(), dest.to_string()),
        );

        Ok(())
    }

    async fn delete_path(
        &self,
        storage: &dyn Storage,
        path: &str,
        progress_cb: &ProgressCallback,
    ) -> Result<()> {
        storage.delete_path(path).await?;
        emit(progress_cb, PublishEvent::PathDeleted(path.to_string()));

        Ok(())
    }

    async fn run_batch(
        &self,
        storage: &dyn Storage,
        scratch: &str,
        progress_cb: &ProgressCallback,
    ) -> Result<UpdateReport> {
        let input = self.collect(storage, progress_cb).await?;
        let kinds = self.config.kinds();

        let repomd = read_repomd(storage).await?;

        let merged = MetadataAdd::new(storage, scratch, kinds.clone())
            .run(repomd.as_ref(), &input.packages)
            .await?;
        let removed = MetadataRemove::new(storage, scratch, kinds.clone())
            .run(&input.removals, self.detail)
            .await?;

        let drifted = merged
            .drifted
            .union(&removed.drifted)
            .copied()
            .collect::<BTreeSet<_>>();
        if !drifted.is_empty() {
            MetadataRebuild::new(storage, scratch, self.threads)
                .run(&drifted, &input.packages)
                .await?;
        }

        emit(progress_cb, PublishEvent::MetadataBuilt(removed.count));

        Archiver::new(storage, scratch, self.config.digest())
            .run(&kinds)
            .await?;
        let built = RepomdBuilder::new(
            storage,
            scratch,
            self.config.digest(),
            self.config.naming(),
        )
        .build(&kinds)
        .await?;

        for location in &input.staged {
            let source = join_key(ADD_PREFIX, location);
            self.move_path(storage, &source, location, progress_cb).await?;
        }

        let mut live = BTreeSet::new();
        for (source, dest) in &built.files {
            self.move_path(storage, source, dest, progress_cb).await?;
            live.insert(dest.clone());
        }

        self.move_path(storage, &built.path, REPOMD, progress_cb).await?;
        live.insert(REPOMD.to_string());
        emit(
            progress_cb,
            PublishEvent::RepomdPublished(built.repomd.revision.clone()),
        );

        for key in storage.list(REPODATA).await? {
            if !live.contains(&key) {
                self.delete_path(storage, &key, progress_cb).await?;
            }
        }

        for location in &input.markers {
            if !input.staged.contains(location) {
                self.delete_path(storage, location, progress_cb).await?;
            }
            self.delete_path(storage, &join_key(REMOVE_PREFIX, location), progress_cb)
                .await?;
        }

        let added = input
            .packages
            .iter()
            .map(|package| package.info())
            .collect::<Vec<_>>();

        for info in &added {
            emit(progress_cb, PublishEvent::PackageAdded(info.clone()));
        }
        for info in &removed.info {
            emit(progress_cb, PublishEvent::PackageRemoved(info.clone()));
        }

        Ok(UpdateReport {
            added,
            removed: removed.info,
            count: removed.count,
            revision: built.repomd.revision,
        })
    }
}

#[cfg(test)]
mod test {
    use {
        super::*,
        crate::{
            io::{gunzip_bytes, ChecksumType},
            metadata::{
                events::PackageElements, primary::document::Primary, repomd::RepoMd, XmlPackage,
            },
            naming::NamingPolicy,
            storage::{lock::LOCKS_PREFIX, memory::InMemoryStorage},
            testutil,
        },
        std::sync::{Arc, Mutex},
    };

    fn rpm_with_filelists(storage: &InMemoryStorage, naming: NamingPolicy, filelists: bool) -> Rpm {
        let config = RepoConfig::new("test", ChecksumType::Sha256, naming, filelists);

        Rpm::new(Box::new(storage.clone()), config, 4).with_info_detail(InfoDetail::Full)
    }

    fn rpm(storage: &InMemoryStorage, naming: NamingPolicy) -> Rpm {
        rpm_with_filelists(storage, naming, true)
    }

    async fn repomd(storage: &dyn Storage) -> Result<RepoMd> {
        read_repomd(storage)
            .await?
            .ok_or(RpmRepositoryError::MetadataFileNotFound("repomd"))
    }

    async fn listing(storage: &dyn Storage, kind: XmlPackage) -> Result<Vec<u8>> {
        let repomd = repomd(storage).await?;
        let entry = repomd
            .entry(kind.name())
            .ok_or(RpmRepositoryError::MetadataFileNotFound(kind.name()))?;

        let data = storage.read_all(&entry.location.href).await?;

        gunzip_bytes(&data)
            .await
            .map_err(|e| RpmRepositoryError::IoPath(entry.location.href.clone(), e))
    }

    /// Package ids of every listing, which must agree.
    async fn package_ids(storage: &dyn Storage) -> Result<Vec<String>> {
        let primary = listing(storage, XmlPackage::Primary).await?;
        let primary = Primary::from_reader(primary.as_slice())?;
        assert_eq!(primary.count, primary.packages.len());

        let ids = primary
            .packages
            .iter()
            .map(|p| p.checksum.value.clone())
            .collect::<Vec<_>>();

        for kind in [XmlPackage::Other, XmlPackage::Filelists] {
            let data = listing(storage, kind).await?;
            let count = format!("packages=\"{}\"", ids.len());
            assert!(String::from_utf8_lossy(&data).contains(&count), "{}", kind);

            let other = PackageElements::new(data.as_slice())
                .map(|p| p.map(|p| p.attribute("pkgid").unwrap_or_default().to_string()))
                .collect::<Result<Vec<_>>>()?;
            assert_eq!(other, ids, "{}", kind);
        }

        Ok(ids)
    }

    fn abc() -> Vec<u8> {
        testutil::build(testutil::file(
            testutil::package("abc", "0.1", "1"),
            "/usr/bin/abc",
        ))
    }

    fn time() -> Vec<u8> {
        testutil::build(
            testutil::file(testutil::package("time", "1.7", "45"), "/usr/bin/time")
                .add_changelog_entry("Dev <dev@example.com>", "- Rebuild", testutil::BUILD_TIME),
        )
    }

    fn zip() -> Vec<u8> {
        testutil::build(testutil::file(
            testutil::package("zip", "3.0", "1"),
            "/usr/bin/zip",
        ))
    }

    async fn primary_locations(storage: &dyn Storage) -> Result<Vec<String>> {
        let primary = listing(storage, XmlPackage::Primary).await?;

        Ok(Primary::from_reader(primary.as_slice())?
            .packages
            .into_iter()
            .map(|p| p.location.href)
            .collect())
    }

    #[tokio::test]
    async fn add_to_empty_repository() -> Result<()> {
        let storage = InMemoryStorage::default();
        let rpm = rpm(&storage, NamingPolicy::HashPrefixed(ChecksumType::Sha256));

        rpm.stage_package("", "abc-0.1-1.x86_64.rpm", abc()).await?;
        rpm.stage_package("", "time-1.7-45.x86_64.rpm", time())
            .await?;

        let report = rpm.batch_update("", &None).await?;

        assert_eq!(report.count, 2);
        assert_eq!(
            report.added.iter().map(|i| i.name.as_str()).collect::<Vec<_>>(),
            vec!["abc", "time"]
        );
        assert!(report.removed.is_empty());

        let repomd = repomd(&storage).await?;
        assert_eq!(repomd.revision, report.revision);
        assert_eq!(repomd.data.len(), 3);

        for entry in &repomd.data {
            assert_eq!(
                entry.location.href,
                format!("repodata/{}-{}.xml.gz", entry.checksum.value, entry.data_type)
            );
            let data = storage.read_all(&entry.location.href).await?;
            assert_eq!(
                ChecksumType::Sha256.digest_bytes(&data).digest_hex(),
                entry.checksum.value
            );
        }

        assert_eq!(package_ids(&storage).await?.len(), 2);

        assert!(storage.exists("abc-0.1-1.x86_64.rpm").await?);
        assert!(storage.exists("time-1.7-45.x86_64.rpm").await?);
        assert!(storage.list(ADD_PREFIX).await?.is_empty());
        assert!(storage.list(SCRATCH_PREFIX).await?.is_empty());
        assert!(storage.list(LOCKS_PREFIX).await?.is_empty());
        assert_eq!(storage.list(REPODATA).await?.len(), 4);

        Ok(())
    }

    #[tokio::test]
    async fn remove_package() -> Result<()> {
        let storage = InMemoryStorage::default();
        let rpm = rpm(&storage, NamingPolicy::HashPrefixed(ChecksumType::Sha256));

        rpm.stage_package("", "abc-0.1-1.x86_64.rpm", abc()).await?;
        rpm.stage_package("", "time-1.7-45.x86_64.rpm", time())
            .await?;
        rpm.batch_update("", &None).await?;

        let time_hex = ChecksumType::Sha256.digest_bytes(&time()).digest_hex();

        rpm.stage_removal("", "abc-0.1-1.x86_64.rpm").await?;

        let events = Arc::new(Mutex::new(Vec::<PublishEvent>::new()));
        let cb_events = events.clone();
        let cb: ProgressCallback = Some(Box::new(move |event: PublishEvent| {
            cb_events.lock().unwrap().push(event);
        }));

        let report = rpm.batch_update("", &cb).await?;

        assert_eq!(report.count, 1);
        assert!(report.added.is_empty());
        assert_eq!(
            report.removed,
            vec![PackageInfo {
                name: "abc".into(),
                arch: "x86_64".into(),
                version: "0.1".into(),
            }]
        );
        assert_eq!(package_ids(&storage).await?, vec![time_hex]);

        assert!(!storage.exists("abc-0.1-1.x86_64.rpm").await?);
        assert!(storage.list(REMOVE_PREFIX).await?.is_empty());
        assert_eq!(storage.list(REPODATA).await?.len(), 4);

        let events = events.lock().unwrap();
        assert!(events.contains(&PublishEvent::PackageRemoved(report.removed[0].clone())));
        assert!(events.contains(&PublishEvent::PathDeleted("abc-0.1-1.x86_64.rpm".into())));

        Ok(())
    }

    #[tokio::test]
    async fn unknown_removal_and_idempotence() -> Result<()> {
        let storage = InMemoryStorage::default();
        let rpm = rpm(&storage, NamingPolicy::Plain);

        rpm.stage_package("", "abc-0.1-1.x86_64.rpm", abc()).await?;
        rpm.batch_update("", &None).await?;

        let before = storage.list(REPODATA).await?;
        let primary = storage.read_all("repodata/primary.xml.gz").await?;
        let other = storage.read_all("repodata/other.xml.gz").await?;

        rpm.stage_removal("", "missing-1.0-1.x86_64.rpm").await?;
        let report = rpm.batch_update("", &None).await?;
        assert_eq!(report.count, 1);
        assert!(report.removed.is_empty());

        let report = rpm.batch_update("", &None).await?;
        assert_eq!(report.count, 1);
        assert!(report.added.is_empty());

        assert_eq!(storage.list(REPODATA).await?, before);
        assert_eq!(storage.read_all("repodata/primary.xml.gz").await?, primary);
        assert_eq!(storage.read_all("repodata/other.xml.gz").await?, other);
        assert!(storage.exists("abc-0.1-1.x86_64.rpm").await?);

        Ok(())
    }

    #[tokio::test]
    async fn reconcile_with_storage() -> Result<()> {
        let storage = InMemoryStorage::default();
        let rpm = rpm(&storage, NamingPolicy::HashPrefixed(ChecksumType::Sha1));

        rpm.stage_package("", "abc-0.1-1.x86_64.rpm", abc()).await?;
        rpm.batch_update("", &None).await?;

        storage.delete_path("abc-0.1-1.x86_64.rpm").await?;
        storage
            .write_bytes("x86_64/time-1.7-45.x86_64.rpm", time())
            .await?;
        storage
            .write_bytes("x86_64/copy-of-time.rpm", time())
            .await?;

        let report = rpm.batch_update("", &None).await?;

        assert_eq!(report.count, 1);
        assert_eq!(report.removed.len(), 1);
        assert_eq!(report.removed[0].name, "abc");

        let primary = listing(&storage, XmlPackage::Primary).await?;
        let primary = Primary::from_reader(primary.as_slice())?;
        assert_eq!(primary.packages.len(), 1);
        assert_eq!(primary.packages[0].location.href, "x86_64/copy-of-time.rpm");
        package_ids(&storage).await?;

        let repomd = repomd(&storage).await?;
        for entry in &repomd.data {
            let data = storage.read_all(&entry.location.href).await?;
            let name_hex = ChecksumType::Sha1.digest_bytes(&data).digest_hex();
            assert_eq!(
                entry.location.href,
                format!("repodata/{}-{}.xml.gz", name_hex, entry.data_type)
            );
            assert_eq!(entry.checksum.name, "sha256");
        }

        Ok(())
    }

    #[tokio::test]
    async fn filelists_enabled_later() -> Result<()> {
        let storage = InMemoryStorage::default();
        let naming = NamingPolicy::HashPrefixed(ChecksumType::Sha256);

        let without = rpm_with_filelists(&storage, naming, false);
        without
            .stage_package("", "abc-0.1-1.x86_64.rpm", abc())
            .await?;
        without.batch_update("", &None).await?;
        assert!(repomd(&storage).await?.entry("filelists").is_none());

        let with = rpm_with_filelists(&storage, naming, true);
        with.stage_package("", "time-1.7-45.x86_64.rpm", time())
            .await?;
        let report = with.batch_update("", &None).await?;

        assert_eq!(report.count, 2);
        assert_eq!(package_ids(&storage).await?.len(), 2);

        let filelists = String::from_utf8_lossy(&listing(&storage, XmlPackage::Filelists).await?)
            .to_string();
        assert!(filelists.contains("/usr/bin/abc"));
        assert!(filelists.contains("/usr/bin/time"));

        Ok(())
    }

    #[tokio::test]
    async fn lost_listing_is_rebuilt() -> Result<()> {
        let storage = InMemoryStorage::default();
        let rpm = rpm(&storage, NamingPolicy::HashPrefixed(ChecksumType::Sha256));

        rpm.stage_package("", "abc-0.1-1.x86_64.rpm", abc()).await?;
        rpm.stage_package("", "time-1.7-45.x86_64.rpm", time())
            .await?;
        rpm.batch_update("", &None).await?;

        let other = repomd(&storage)
            .await?
            .entry("other")
            .map(|entry| entry.location.href.clone())
            .ok_or(RpmRepositoryError::MetadataFileNotFound("other"))?;
        storage.delete_path(&other).await?;

        rpm.stage_removal("", "abc-0.1-1.x86_64.rpm").await?;
        let report = rpm.batch_update("", &None).await?;

        assert_eq!(report.count, 1);
        assert_eq!(
            package_ids(&storage).await?,
            vec![ChecksumType::Sha256.digest_bytes(&time()).digest_hex()]
        );
        assert!(String::from_utf8_lossy(&listing(&storage, XmlPackage::Other).await?)
            .contains("- Rebuild"));

        Ok(())
    }

    #[tokio::test]
    async fn retry_after_interrupted_swap() -> Result<()> {
        let storage = InMemoryStorage::default();
        let rpm = rpm(&storage, NamingPolicy::Plain);

        rpm.stage_package("", "abc-0.1-1.x86_64.rpm", abc()).await?;
        rpm.batch_update("", &None).await?;
        let previous = storage.read_all(REPOMD).await?;

        rpm.stage_package("", "time-1.7-45.x86_64.rpm", time())
            .await?;
        rpm.batch_update("", &None).await?;

        // Data files of the second batch are in place, its repomd.xml is not.
        storage.write_bytes(REPOMD, previous).await?;

        rpm.stage_package("", "zip-3.0-1.x86_64.rpm", zip()).await?;
        let report = rpm.batch_update("", &None).await?;

        assert_eq!(report.count, 3);
        assert_eq!(package_ids(&storage).await?.len(), 3);
        assert_eq!(
            primary_locations(&storage).await?,
            vec![
                "abc-0.1-1.x86_64.rpm",
                "time-1.7-45.x86_64.rpm",
                "zip-3.0-1.x86_64.rpm"
            ]
        );

        Ok(())
    }

    #[tokio::test]
    async fn duplicate_content_across_batches() -> Result<()> {
        let storage = InMemoryStorage::default();
        let rpm = rpm(&storage, NamingPolicy::HashPrefixed(ChecksumType::Sha256));

        rpm.stage_package("", "a.rpm", abc()).await?;
        rpm.batch_update("", &None).await?;

        rpm.stage_package("", "b.rpm", abc()).await?;
        let report = rpm.batch_update("", &None).await?;

        assert_eq!(report.count, 1);
        assert!(report.added.is_empty());
        assert_eq!(package_ids(&storage).await?.len(), 1);
        assert_eq!(primary_locations(&storage).await?, vec!["a.rpm"]);
        assert!(!storage.exists(".add/b.rpm").await?);
        assert!(!storage.exists("b.rpm").await?);

        // Moving content to a new location replaces the old record.
        rpm.stage_removal("", "a.rpm").await?;
        rpm.stage_package("", "b.rpm", abc()).await?;
        let report = rpm.batch_update("", &None).await?;

        assert_eq!(report.count, 1);
        assert_eq!(package_ids(&storage).await?.len(), 1);
        assert_eq!(primary_locations(&storage).await?, vec!["b.rpm"]);
        assert!(!storage.exists("a.rpm").await?);
        assert!(storage.exists("b.rpm").await?);

        Ok(())
    }

    #[tokio::test]
    async fn invalid_staged_package() -> Result<()> {
        let storage = InMemoryStorage::default();
        let rpm = rpm(&storage, NamingPolicy::Plain);

        rpm.stage_package("repo", "abc-0.1-1.x86_64.rpm", abc())
            .await?;
        rpm.stage_package("repo", "broken.rpm", b"garbage".to_vec())
            .await?;

        let report = rpm.update("repo/.add/broken.rpm", &None).await?;

        assert_eq!(report.count, 1);
        assert!(!storage.exists("repo/.add/broken.rpm").await?);
        assert!(!storage.exists("repo/broken.rpm").await?);
        assert!(storage.exists("repo/abc-0.1-1.x86_64.rpm").await?);
        assert!(storage.exists("repo/repodata/repomd.xml").await?);

        Ok(())
    }

    #[tokio::test]
    async fn lock_held() -> Result<()> {
        let storage = InMemoryStorage::default();
        let rpm = rpm(&storage, NamingPolicy::Plain);

        rpm.stage_package("", "abc-0.1-1.x86_64.rpm", abc()).await?;

        let mut lock = StorageLock::new(&storage, REPODATA, DEFAULT_LOCK_TTL);
        lock.acquire().await?;

        assert!(matches!(
            rpm.batch_update("", &None).await,
            Err(RpmRepositoryError::LockHeld(_))
        ));
        assert!(storage.list(REPODATA).await?.is_empty());
        assert!(storage.exists(".add/abc-0.1-1.x86_64.rpm").await?);

        lock.release().await?;

        Ok(())
    }

    #[tokio::test]
    async fn staging_validates_locations() -> Result<()> {
        let storage = InMemoryStorage::default();
        let rpm = rpm(&storage, NamingPolicy::Plain);

        assert!(rpm.stage_package("", "../escape.rpm", abc()).await.is_err());
        assert!(rpm.stage_removal("", "repodata/x.rpm").await.is_err());
        assert_eq!(
            rpm.stage_removal("repo", "/x86_64/abc.rpm").await?,
            "repo/.remove/x86_64/abc.rpm"
        );

        Ok(())
    }

    #[test]
    fn repository_prefixes() {
        assert_eq!(repository_prefix("repo/.add/abc.rpm"), "repo");
        assert_eq!(repository_prefix("a/b/.remove/x86_64/abc.rpm"), "a/b");
        assert_eq!(repository_prefix("repo/abc.rpm"), "repo");
        assert_eq!(repository_prefix(".add/abc.rpm"), "");
        assert_eq!(repository_prefix("abc.rpm"), "");
    }
}
