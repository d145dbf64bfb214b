// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Packages as they appear in repository metadata.

Package headers are decoded by the [rpm] crate. [PackageMeta] keeps the
subset of the header that the metadata files need, already shaped the way
`primary.xml`, `filelists.xml` and `other.xml` express it.
*/

use {
    crate::{
        error::{Result, RpmRepositoryError},
        io::{BlockingReader, ChecksumType, ContentDigest, DigestingReader},
        storage::Storage,
    },
    std::collections::BTreeSet,
};

const RPMSENSE_LESS: u32 = 1 << 1;
const RPMSENSE_GREATER: u32 = 1 << 2;
const RPMSENSE_EQUAL: u32 = 1 << 3;
const RPMSENSE_SENSEMASK: u32 = 0x0f;
const RPMSENSE_PREREQ: u32 = 1 << 6;
const RPMSENSE_SCRIPT_PRE: u32 = 1 << 9;
const RPMSENSE_SCRIPT_POST: u32 = 1 << 10;

/// Epoch, version and release of a package.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Evr {
    pub epoch: u64,
    pub version: String,
    pub release: String,
}

/// Identifies a package for event reporting.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub struct PackageInfo {
    pub name: String,
    pub arch: String,
    pub version: String,
}

impl std::fmt::Display for PackageInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}.{}", self.name, self.version, self.arch)
    }
}

/// Byte range of the main header within the package file.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct HeaderRange {
    pub start: u64,
    pub end: u64,
}

/// A relationship to another package (provides, requires, ...).
#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub struct Dependency {
    pub name: String,
    pub flags: Option<&'static str>,
    pub epoch: Option<String>,
    pub version: Option<String>,
    pub release: Option<String>,
    pub pre: bool,
}

impl Dependency {
    fn new(name: String, flags: u32, version: &str) -> Self {
        let sense = match flags & RPMSENSE_SENSEMASK {
            x if x == RPMSENSE_EQUAL => Some("EQ"),
            x if x == RPMSENSE_GREATER => Some("GT"),
            x if x == RPMSENSE_LESS => Some("LT"),
            x if x == RPMSENSE_GREATER | RPMSENSE_EQUAL => Some("GE"),
            x if x == RPMSENSE_LESS | RPMSENSE_EQUAL => Some("LE"),
            _ => None,
        };

        let (epoch, version, release) = if version.is_empty() {
            (None, None, None)
        } else {
            let (epoch, rest) = match version.split_once(':') {
                Some((epoch, rest))
                    if !epoch.is_empty() && epoch.chars().all(|c| c.is_ascii_digit()) =>
                {
                    (epoch, rest)
                }
                _ => ("0", version),
            };

            let (ver, rel) = match rest.split_once('-') {
                Some((ver, rel)) => (ver, Some(rel.to_string())),
                None => (rest, None),
            };

            (Some(epoch.to_string()), Some(ver.to_string()), rel)
        };

        Self {
            name,
            flags: sense,
            epoch,
            version,
            release,
            pre: flags & (RPMSENSE_PREREQ | RPMSENSE_SCRIPT_PRE | RPMSENSE_SCRIPT_POST) != 0,
        }
    }
}

impl From<rpm::Dependency> for Dependency {
    fn from(dep: rpm::Dependency) -> Self {
        Self::new(dep.name, dep.flags.bits(), &dep.version)
    }
}

/// Type of an entry in a package's file list.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FileKind {
    File,
    Dir,
    Ghost,
}

impl FileKind {
    fn classify(mode: &rpm::FileMode, flags: rpm::FileFlags) -> Self {
        if flags.contains(rpm::FileFlags::GHOST) {
            Self::Ghost
        } else if matches!(mode, rpm::FileMode::Dir { .. }) {
            Self::Dir
        } else {
            Self::File
        }
    }

    /// Value of the `type` attribute, if any.
    pub fn attribute(&self) -> Option<&'static str> {
        match self {
            Self::File => None,
            Self::Dir => Some("dir"),
            Self::Ghost => Some("ghost"),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FileEntry {
    pub path: String,
    pub kind: FileKind,
}

impl From<rpm::FileEntry> for FileEntry {
    fn from(entry: rpm::FileEntry) -> Self {
        Self {
            kind: FileKind::classify(&entry.mode, entry.flags),
            path: entry.path.to_string_lossy().into_owned(),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ChangelogEntry {
    pub author: String,
    pub date: u64,
    pub text: String,
}

/// Whether a file belongs in the abbreviated file list of `primary.xml`.
fn is_primary_file(path: &str) -> bool {
    const EXCLUDED: [&str; 5] = ["/var/", "/boot", "/lib/", "/lib64", "/run/"];

    if EXCLUDED.iter().any(|prefix| path.starts_with(prefix)) {
        return false;
    }

    !path.starts_with("/usr/") || path.contains("/bin/") || path.contains("/sbin/")
}

fn invalid_package(location: &str, e: impl ToString) -> RpmRepositoryError {
    RpmRepositoryError::InvalidPackage(location.to_string(), e.to_string())
}

fn dependencies(deps: std::result::Result<Vec<rpm::Dependency>, rpm::Error>) -> Vec<Dependency> {
    let mut seen = BTreeSet::new();

    deps.unwrap_or_default()
        .into_iter()
        .map(Dependency::from)
        .filter(|dep| seen.insert(dep.clone()))
        .collect()
}

/// One RPM package as it will appear in the index.
#[derive(Clone, Debug, PartialEq)]
pub struct PackageMeta {
    name: String,
    arch: String,
    evr: Evr,
    summary: String,
    description: String,
    packager: String,
    url: String,
    license: String,
    vendor: String,
    group: String,
    build_host: String,
    source_rpm: String,
    build_time: u64,
    installed_size: u64,
    archive_size: u64,
    header_range: HeaderRange,
    provides: Vec<Dependency>,
    requires: Vec<Dependency>,
    conflicts: Vec<Dependency>,
    obsoletes: Vec<Dependency>,
    recommends: Vec<Dependency>,
    suggests: Vec<Dependency>,
    supplements: Vec<Dependency>,
    enhances: Vec<Dependency>,
    files: Vec<FileEntry>,
    changelog: Vec<ChangelogEntry>,
    size: u64,
    checksum: ContentDigest,
    location: String,
}

impl PackageMeta {
    /// Construct an instance from a parsed package header.
    ///
    /// `size` and `checksum` describe the whole package file, which the header
    /// alone doesn't cover.
    pub fn from_metadata(
        metadata: &rpm::PackageMetadata,
        size: u64,
        checksum: ContentDigest,
        location: String,
    ) -> Result<Self> {
        let required = |value: std::result::Result<&str, rpm::Error>| {
            value
                .map(|s| s.to_string())
                .map_err(|e| invalid_package(&location, e))
        };
        let optional = |value: std::result::Result<&str, rpm::Error>| {
            value.unwrap_or_default().to_string()
        };

        let name = required(metadata.get_name())?;
        let arch = required(metadata.get_arch())?;
        let evr = Evr {
            epoch: metadata.get_epoch().map(u64::from).unwrap_or(0),
            version: required(metadata.get_version())?,
            release: required(metadata.get_release())?,
        };

        let offsets = metadata.get_package_segment_offsets();

        let files = metadata
            .get_file_entries()
            .unwrap_or_default()
            .into_iter()
            .map(FileEntry::from)
            .collect::<Vec<_>>();

        let provides = dependencies(metadata.get_provides());

        // Requirements, minus `rpmlib()` features and anything the package
        // satisfies itself.
        let provided = provides
            .iter()
            .map(|dep| dep.name.as_str())
            .collect::<BTreeSet<_>>();
        let paths = files
            .iter()
            .map(|file| file.path.as_str())
            .collect::<BTreeSet<_>>();
        let requires = dependencies(metadata.get_requires())
            .into_iter()
            .filter(|dep| {
                !dep.name.starts_with("rpmlib(")
                    && !provided.contains(dep.name.as_str())
                    && !paths.contains(dep.name.as_str())
            })
            .collect();

        let changelog = metadata
            .get_changelog_entries()
            .unwrap_or_default()
            .into_iter()
            .map(|entry| ChangelogEntry {
                author: entry.name,
                date: entry.timestamp,
                text: entry.description,
            })
            .collect();

        Ok(Self {
            summary: optional(metadata.get_summary()),
            description: optional(metadata.get_description()),
            packager: optional(metadata.get_packager()),
            url: optional(metadata.get_url()),
            license: optional(metadata.get_license()),
            vendor: optional(metadata.get_vendor()),
            group: optional(metadata.get_group()),
            build_host: optional(metadata.get_build_host()),
            source_rpm: optional(metadata.get_source_rpm()),
            build_time: metadata.get_build_time().unwrap_or(0),
            installed_size: metadata.get_installed_size().unwrap_or(0),
            archive_size: metadata
                .signature
                .get_entry_data_as_u32(rpm::IndexSignatureTag::RPMSIGTAG_PAYLOADSIZE)
                .map(u64::from)
                .unwrap_or(0),
            header_range: HeaderRange {
                start: offsets.header,
                end: offsets.payload,
            },
            conflicts: dependencies(metadata.get_conflicts()),
            obsoletes: dependencies(metadata.get_obsoletes()),
            recommends: dependencies(metadata.get_recommends()),
            suggests: dependencies(metadata.get_suggests()),
            supplements: dependencies(metadata.get_supplements()),
            enhances: dependencies(metadata.get_enhances()),
            name,
            arch,
            evr,
            requires,
            provides,
            files,
            changelog,
            size,
            checksum,
            location,
        })
    }

    /// Decode a package from its file content.
    pub fn from_bytes(data: &[u8], checksum: ChecksumType, location: &str) -> Result<Self> {
        let mut reader = data;
        let metadata = rpm::PackageMetadata::parse(&mut reader)
            .map_err(|e| invalid_package(location, e))?;

        Self::from_metadata(
            &metadata,
            data.len() as u64,
            checksum.digest_bytes(data),
            location.to_string(),
        )
    }

    /// Size in bytes of the package file.
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn checksum(&self) -> &ContentDigest {
        &self.checksum
    }

    /// Repository relative path of the package file.
    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn arch(&self) -> &str {
        &self.arch
    }

    pub fn evr(&self) -> &Evr {
        &self.evr
    }

    pub fn summary(&self) -> &str {
        &self.summary
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn packager(&self) -> &str {
        &self.packager
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn license(&self) -> &str {
        &self.license
    }

    pub fn vendor(&self) -> &str {
        &self.vendor
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn build_host(&self) -> &str {
        &self.build_host
    }

    pub fn source_rpm(&self) -> &str {
        &self.source_rpm
    }

    /// Build time in seconds since the UNIX epoch.
    pub fn build_time(&self) -> u64 {
        self.build_time
    }

    /// Total size of the installed files.
    pub fn installed_size(&self) -> u64 {
        self.installed_size
    }

    /// Uncompressed size of the payload archive.
    pub fn archive_size(&self) -> u64 {
        self.archive_size
    }

    pub fn header_range(&self) -> HeaderRange {
        self.header_range
    }

    pub fn info(&self) -> PackageInfo {
        PackageInfo {
            name: self.name.clone(),
            arch: self.arch.clone(),
            version: self.evr.version.clone(),
        }
    }

    pub fn provides(&self) -> &[Dependency] {
        &self.provides
    }

    /// Requirements not satisfied by the package itself.
    pub fn requires(&self) -> &[Dependency] {
        &self.requires
    }

    pub fn conflicts(&self) -> &[Dependency] {
        &self.conflicts
    }

    pub fn obsoletes(&self) -> &[Dependency] {
        &self.obsoletes
    }

    pub fn recommends(&self) -> &[Dependency] {
        &self.recommends
    }

    pub fn suggests(&self) -> &[Dependency] {
        &self.suggests
    }

    pub fn supplements(&self) -> &[Dependency] {
        &self.supplements
    }

    pub fn enhances(&self) -> &[Dependency] {
        &self.enhances
    }

    /// All files of the package.
    pub fn files(&self) -> &[FileEntry] {
        &self.files
    }

    /// Files advertised in `primary.xml`.
    pub fn primary_files(&self) -> impl Iterator<Item = &FileEntry> {
        self.files
            .iter()
            .filter(|file| is_primary_file(&file.path))
    }

    pub fn changelog(&self) -> &[ChangelogEntry] {
        &self.changelog
    }
}

/// Reads packages from storage into [PackageMeta].
pub struct PackageReader<'a> {
    storage: &'a dyn Storage,
    checksum: ChecksumType,
}

impl<'a> PackageReader<'a> {
    pub fn new(storage: &'a dyn Storage, checksum: ChecksumType) -> Self {
        Self { storage, checksum }
    }

    /// Read the package at `key`, recording it at repository relative `location`.
    ///
    /// The file is streamed once: the header is decoded as it goes by and the
    /// remainder is only digested.
    ///
    /// A file that doesn't decode as an RPM yields [RpmRepositoryError::InvalidPackage].
    pub async fn read(&self, key: &str, location: &str) -> Result<PackageMeta> {
        let reader = self.storage.get_path(key).await?;
        let checksum = self.checksum;
        let key = key.to_string();
        let location = location.to_string();

        tokio::task::spawn_blocking(move || {
            let mut reader = std::io::BufReader::new(BlockingReader::new(DigestingReader::new(
                reader, checksum,
            )));

            let metadata = rpm::PackageMetadata::parse(&mut reader)
                .map_err(|e| invalid_package(&location, e))?;

            std::io::copy(&mut reader, &mut std::io::sink())
                .map_err(|e| RpmRepositoryError::IoPath(key, e))?;

            let (_, digest, size) = reader.into_inner().into_inner().finish();

            PackageMeta::from_metadata(&metadata, size, digest, location)
        })
        .await?
    }
}

#[cfg(test)]
mod test {
    use {
        super::*,
        crate::{storage::memory::InMemoryStorage, testutil},
    };

    #[test]
    fn dependency_versions() {
        let dep = Dependency::new("foo".into(), RPMSENSE_GREATER | RPMSENSE_EQUAL, "1:2.3-4");
        assert_eq!(dep.flags, Some("GE"));
        assert_eq!(dep.epoch.as_deref(), Some("1"));
        assert_eq!(dep.version.as_deref(), Some("2.3"));
        assert_eq!(dep.release.as_deref(), Some("4"));
        assert!(!dep.pre);

        let dep = Dependency::new("bar".into(), RPMSENSE_PREREQ, "");
        assert_eq!(dep.flags, None);
        assert_eq!(dep.version, None);
        assert!(dep.pre);

        let dep = Dependency::new("baz".into(), RPMSENSE_LESS, "7");
        assert_eq!(dep.flags, Some("LT"));
        assert_eq!(dep.epoch.as_deref(), Some("0"));
        assert_eq!(dep.version.as_deref(), Some("7"));
        assert_eq!(dep.release, None);
    }

    #[test]
    fn file_kinds() {
        let regular = rpm::FileMode::Regular { permissions: 0o644 };
        let dir = rpm::FileMode::Dir { permissions: 0o755 };

        assert_eq!(
            FileKind::classify(&regular, rpm::FileFlags::empty()),
            FileKind::File
        );
        assert_eq!(
            FileKind::classify(&dir, rpm::FileFlags::empty()),
            FileKind::Dir
        );
        assert_eq!(
            FileKind::classify(&regular, rpm::FileFlags::GHOST),
            FileKind::Ghost
        );
        assert_eq!(FileKind::Dir.attribute(), Some("dir"));
        assert_eq!(FileKind::File.attribute(), None);
    }

    #[test]
    fn requires_filtering() -> Result<()> {
        let data = testutil::build(
            testutil::file(testutil::package("abc", "1.0", "1"), "/usr/bin/abc")
                .provides(rpm::Dependency::any("libabc.so.1"))
                .requires(rpm::Dependency::less_eq(
                    "rpmlib(CompressedFileNames)",
                    "3.0.4-1",
                ))
                .requires(rpm::Dependency::any("libabc.so.1"))
                .requires(rpm::Dependency::any("/usr/bin/abc"))
                .requires(rpm::Dependency::greater_eq("glibc", "2.28"))
                .requires(rpm::Dependency::greater_eq("glibc", "2.28")),
        );

        let meta = PackageMeta::from_bytes(&data, ChecksumType::Sha256, "abc-1.0-1.rpm")?;

        let requires = meta
            .requires()
            .iter()
            .map(|dep| dep.name.as_str())
            .collect::<Vec<_>>();
        assert_eq!(requires, vec!["glibc"]);
        assert_eq!(meta.requires()[0].flags, Some("GE"));
        assert_eq!(meta.requires()[0].version.as_deref(), Some("2.28"));

        assert!(meta.provides().iter().any(|dep| dep.name == "abc"));
        assert!(meta.provides().iter().any(|dep| dep.name == "libabc.so.1"));

        Ok(())
    }

    #[test]
    fn header_fields() -> Result<()> {
        let data = testutil::build(testutil::package("abc", "1.0", "2").epoch(3));

        let meta = PackageMeta::from_bytes(&data, ChecksumType::Sha256, "abc.rpm")?;

        assert_eq!(meta.name(), "abc");
        assert_eq!(meta.arch(), "x86_64");
        assert_eq!(
            meta.evr(),
            &Evr {
                epoch: 3,
                version: "1.0".into(),
                release: "2".into(),
            }
        );
        assert_eq!(meta.license(), "MIT");
        assert_eq!(meta.vendor(), "Example");
        assert_eq!(meta.build_time(), testutil::BUILD_TIME as u64);
        assert_eq!(meta.size(), data.len() as u64);
        assert_eq!(meta.checksum(), &ChecksumType::Sha256.digest_bytes(&data));
        assert_eq!(meta.info().to_string(), "abc-1.0.x86_64");

        let range = meta.header_range();
        assert!(range.start > 96);
        assert!(range.end > range.start);
        assert!(range.end < data.len() as u64);

        Ok(())
    }

    #[test]
    fn file_lists() -> Result<()> {
        let builder = testutil::package("abc", "1.0", "1");
        let builder = testutil::file(builder, "/usr/bin/abc");
        let builder = testutil::file(builder, "/usr/share/doc/abc/README");
        let builder = testutil::file(builder, "/etc/abc.conf");
        let builder = testutil::file(builder, "/var/lib/abc/state");
        let data = testutil::build(builder);

        let meta = PackageMeta::from_bytes(&data, ChecksumType::Sha256, "abc.rpm")?;

        let mut files = meta
            .files()
            .iter()
            .map(|f| f.path.as_str())
            .collect::<Vec<_>>();
        files.sort_unstable();
        assert_eq!(
            files,
            vec![
                "/etc/abc.conf",
                "/usr/bin/abc",
                "/usr/share/doc/abc/README",
                "/var/lib/abc/state"
            ]
        );
        assert!(meta.files().iter().all(|f| f.kind == FileKind::File));

        let mut primary = meta
            .primary_files()
            .map(|f| f.path.as_str())
            .collect::<Vec<_>>();
        primary.sort_unstable();
        assert_eq!(primary, vec!["/etc/abc.conf", "/usr/bin/abc"]);

        Ok(())
    }

    #[test]
    fn undecodable_package() {
        let res = PackageMeta::from_bytes(b"not an rpm", ChecksumType::Sha256, "bad.rpm");

        assert!(matches!(
            res,
            Err(RpmRepositoryError::InvalidPackage(location, _)) if location == "bad.rpm"
        ));
    }

    #[tokio::test]
    async fn reader_streams_whole_file() -> Result<()> {
        let storage = InMemoryStorage::default();

        let data = testutil::build(testutil::file(
            testutil::package("abc", "1.0", "1"),
            "/usr/bin/abc",
        ));
        storage.write_bytes(".add/abc.rpm", data.clone()).await?;
        storage
            .write_bytes(".add/bad.rpm", b"not an rpm".to_vec())
            .await?;

        let reader = PackageReader::new(&storage, ChecksumType::Sha1);

        let meta = reader.read(".add/abc.rpm", "abc.rpm").await?;
        assert_eq!(meta.location(), "abc.rpm");
        assert_eq!(meta.size(), data.len() as u64);
        assert_eq!(meta.checksum(), &ChecksumType::Sha1.digest_bytes(&data));
        assert_eq!(meta, PackageMeta::from_bytes(&data, ChecksumType::Sha1, "abc.rpm")?);

        assert!(matches!(
            reader.read(".add/bad.rpm", "bad.rpm").await,
            Err(RpmRepositoryError::InvalidPackage(location, _)) if location == "bad.rpm"
        ));

        Ok(())
    }
}
