// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! `primary.xml` file format. */

use {
    crate::{
        error::Result,
        metadata::{write_text_element, xml_attr},
        package::{Dependency, FileEntry, PackageMeta},
    },
    std::io::Write,
    xml::writer::{EventWriter, XmlEvent},
};

/// Typed model of `primary.xml`, used to check the documents this crate writes.
#[cfg(test)]
pub(crate) mod document {
    use {
        crate::{
            error::{Result, RpmRepositoryError},
            io::ContentDigest,
            metadata::repomd::Location,
        },
        serde::{Deserialize, Serialize},
        std::io::Read,
    };

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct Primary {
        /// The number of packages expressed by this document.
        #[serde(rename = "packages")]
        pub count: usize,

        /// `<package>` elements in this document.
        #[serde(default, rename = "package")]
        pub packages: Vec<Package>,
    }

    impl Primary {
        /// Construct an instance by parsing XML from a reader.
        pub fn from_reader(reader: impl Read) -> Result<Self> {
            Ok(serde_xml_rs::from_reader(reader)?)
        }

        /// Construct an instance by parsing XML from a string.
        pub fn from_xml(s: &str) -> Result<Self> {
            Ok(serde_xml_rs::from_str(s)?)
        }
    }

    /// A package as advertised in a `primary.xml` file.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct Package {
        /// The type/flavor of a package.
        ///
        /// e.g. `rpm`.
        #[serde(rename = "type")]
        pub package_type: String,

        /// The name of the package.
        pub name: String,

        /// The machine architecture the package is targeting.
        pub arch: String,

        /// The package version.
        pub version: PackageVersion,

        /// Content digest of package file.
        pub checksum: Checksum,

        /// A text summary of the package.
        pub summary: String,

        /// A longer text description of the package.
        pub description: String,

        /// Name of entity that produced the package.
        pub packager: Option<String>,

        /// URL where additional package info can be obtained.
        pub url: Option<String>,

        /// Time the package was created.
        pub time: PackageTime,

        /// Describes sizes affiliated with the package.
        pub size: PackageSize,

        /// Where the package can be obtained from.
        pub location: Location,

        /// Additional metadata about the package.
        pub format: Option<PackageFormat>,
    }

    /// Describes a package version.
    #[derive(Clone, Debug, Deserialize, Serialize)]
    pub struct PackageVersion {
        /// When the version came into existence.
        pub epoch: u64,

        /// Version string.
        #[serde(rename = "ver")]
        pub version: String,

        /// Release string.
        #[serde(rename = "rel")]
        pub release: String,
    }

    /// Describes the content checksum of a package.
    #[derive(Clone, Debug, Deserialize, Serialize)]
    pub struct Checksum {
        /// Digest type.
        #[serde(rename = "type")]
        pub name: String,

        /// Hex encoded digest value.
        #[serde(rename = "$value")]
        pub value: String,

        #[serde(rename = "pkgid")]
        pub pkg_id: Option<String>,
    }

    impl TryFrom<Checksum> for ContentDigest {
        type Error = RpmRepositoryError;

        fn try_from(v: Checksum) -> std::result::Result<Self, Self::Error> {
            match v.name.as_str() {
                "sha1" => ContentDigest::sha1_hex(&v.value),
                "sha256" => ContentDigest::sha256_hex(&v.value),
                name => Err(RpmRepositoryError::UnsupportedDigest(name.to_string())),
            }
        }
    }

    /// Times associated with a package.
    #[derive(Clone, Debug, Deserialize, Serialize)]
    pub struct PackageTime {
        pub file: u64,
        pub build: u64,
    }

    /// Sizes associated with a package.
    #[derive(Clone, Debug, Deserialize, Serialize)]
    pub struct PackageSize {
        pub package: u64,

        /// Total size in bytes when installed.
        pub installed: u64,

        /// Size in bytes of package archive.
        pub archive: u64,
    }

    /// Additional metadata about a package.
    #[derive(Clone, Debug, Deserialize, Serialize)]
    pub struct PackageFormat {
        /// The package's license.
        pub license: Option<String>,

        /// Vendor of package.
        pub vendor: Option<String>,
        pub group: Option<String>,

        /// Hostname of machine that built the package.
        #[serde(rename = "buildhost")]
        pub build_host: Option<String>,

        /// Name of RPM from which this package is derived.
        #[serde(rename = "sourcerpm")]
        pub source_rpm: Option<String>,

        /// File segment containing the header.
        #[serde(rename = "header-range")]
        pub header_range: Option<HeaderRange>,

        /// Packages that this package provides.
        pub provides: Option<Entries>,

        /// Packages that this package requires.
        pub requires: Option<Entries>,

        /// Packages that this package obsoletes.
        pub obsoletes: Option<Entries>,

        /// Packages that conflict with this one.
        pub conflicts: Option<Entries>,

        /// Packages that are recommended when this one is installed.
        pub recommends: Option<Entries>,

        /// Packages that are suggested when this one is installed.
        pub suggests: Option<Entries>,

        /// Packages that this package supplements.
        pub supplements: Option<Entries>,

        /// Packages that this package enhances.
        pub enhances: Option<Entries>,

        /// Files provided by this package.
        #[serde(default, rename = "file")]
        pub files: Vec<FileEntry>,
    }

    /// Describes the location of a header in a package.
    #[derive(Clone, Debug, Deserialize, Serialize)]
    pub struct HeaderRange {
        /// Start offset in bytes.
        pub start: u64,

        /// End offset in bytes.
        pub end: u64,
    }

    /// A collection of [PackageEntry].
    #[derive(Clone, Debug, Deserialize, Serialize)]
    pub struct Entries {
        #[serde(rename = "entry")]
        pub entries: Vec<PackageEntry>,
    }

    /// Describes a package relationship.
    #[derive(Clone, Debug, Deserialize, Serialize)]
    pub struct PackageEntry {
        /// Name of package.
        pub name: String,

        /// Version comparison flags.
        pub flags: Option<String>,

        /// Epoch value.
        pub epoch: Option<u64>,

        /// Version of package.
        #[serde(rename = "ver")]
        pub version: Option<String>,

        /// Release of package.
        #[serde(rename = "rel")]
        pub release: Option<String>,

        /// Whether this is a pre-release.
        pub pre: Option<usize>,
    }

    #[derive(Clone, Debug, Deserialize, Serialize)]
    pub struct FileEntry {
        /// Type of file.
        ///
        /// Missing value seems to imply regular file.
        #[serde(rename = "type")]
        pub file_type: Option<String>,

        #[serde(rename = "$value")]
        pub value: String,
    }
}

fn write_entries<W: Write>(
    writer: &mut EventWriter<W>,
    element: &str,
    entries: &[Dependency],
    with_pre: bool,
) -> Result<()> {
    if entries.is_empty() {
        return Ok(());
    }

    writer.write(XmlEvent::start_element(element))?;

    for entry in entries {
        let name = xml_attr(&entry.name);

        let e = XmlEvent::start_element("rpm:entry").attr("name", &name);
        let e = match entry.flags {
            Some(flags) => e.attr("flags", flags),
            None => e,
        };
        let e = match &entry.epoch {
            Some(epoch) => e.attr("epoch", epoch),
            None => e,
        };
        let e = match &entry.version {
            Some(version) => e.attr("ver", version),
            None => e,
        };
        let e = match &entry.release {
            Some(release) => e.attr("rel", release),
            None => e,
        };
        let e = if with_pre && entry.pre {
            e.attr("pre", "1")
        } else {
            e
        };

        writer.write(e)?;
        writer.write(XmlEvent::end_element())?;
    }

    writer.write(XmlEvent::end_element())?;

    Ok(())
}

/// Emit the `primary.xml` `<package>` element for a package.
pub fn write_package<W: Write>(writer: &mut EventWriter<W>, package: &PackageMeta) -> Result<()> {
    let evr = package.evr();
    let epoch = evr.epoch.to_string();
    let version = xml_attr(&evr.version);
    let release = xml_attr(&evr.release);
    let checksum = package.checksum();
    let checksum_hex = checksum.digest_hex();
    let build_time = package.build_time().to_string();
    let package_size = package.size().to_string();
    let installed_size = package.installed_size().to_string();
    let archive_size = package.archive_size().to_string();
    let location = xml_attr(package.location());
    let range = package.header_range();
    let range_start = range.start.to_string();
    let range_end = range.end.to_string();

    writer.write(XmlEvent::start_element("package").attr("type", "rpm"))?;

    write_text_element(writer, "name", package.name())?;
    write_text_element(writer, "arch", package.arch())?;

    writer.write(
        XmlEvent::start_element("version")
            .attr("epoch", &epoch)
            .attr("ver", &version)
            .attr("rel", &release),
    )?;
    writer.write(XmlEvent::end_element())?;

    writer.write(
        XmlEvent::start_element("checksum")
            .attr("type", checksum.checksum_type().name())
            .attr("pkgid", "YES"),
    )?;
    writer.write(XmlEvent::characters(&checksum_hex))?;
    writer.write(XmlEvent::end_element())?;

    write_text_element(writer, "summary", package.summary())?;
    write_text_element(writer, "description", package.description())?;
    write_text_element(writer, "packager", package.packager())?;
    write_text_element(writer, "url", package.url())?;

    writer.write(
        XmlEvent::start_element("time")
            .attr("file", &build_time)
            .attr("build", &build_time),
    )?;
    writer.write(XmlEvent::end_element())?;

    writer.write(
        XmlEvent::start_element("size")
            .attr("package", &package_size)
            .attr("installed", &installed_size)
            .attr("archive", &archive_size),
    )?;
    writer.write(XmlEvent::end_element())?;

    writer.write(XmlEvent::start_element("location").attr("href", &location))?;
    writer.write(XmlEvent::end_element())?;

    writer.write(XmlEvent::start_element("format"))?;

    write_text_element(writer, "rpm:license", package.license())?;
    write_text_element(writer, "rpm:vendor", package.vendor())?;
    write_text_element(writer, "rpm:group", package.group())?;
    write_text_element(writer, "rpm:buildhost", package.build_host())?;
    write_text_element(writer, "rpm:sourcerpm", package.source_rpm())?;

    writer.write(
        XmlEvent::start_element("rpm:header-range")
            .attr("start", &range_start)
            .attr("end", &range_end),
    )?;
    writer.write(XmlEvent::end_element())?;

    write_entries(writer, "rpm:provides", package.provides(), false)?;
    write_entries(writer, "rpm:requires", package.requires(), true)?;
    write_entries(writer, "rpm:obsoletes", package.obsoletes(), false)?;
    write_entries(writer, "rpm:conflicts", package.conflicts(), false)?;
    write_entries(writer, "rpm:recommends", package.recommends(), false)?;
    write_entries(writer, "rpm:suggests", package.suggests(), false)?;
    write_entries(writer, "rpm:supplements", package.supplements(), false)?;
    write_entries(writer, "rpm:enhances", package.enhances(), false)?;

    for file in package.primary_files() {
        write_file(writer, &file)?;
    }

    writer.write(XmlEvent::end_element())?;
    writer.write(XmlEvent::end_element())?;

    Ok(())
}

/// Emit a `<file>` element.
pub(crate) fn write_file<W: Write>(
    writer: &mut EventWriter<W>,
    file: &FileEntry,
) -> Result<()> {
    let e = XmlEvent::start_element("file");
    let e = match file.kind.attribute() {
        Some(kind) => e.attr("type", kind),
        None => e,
    };

    writer.write(e)?;

    let path = crate::metadata::xml_text(&file.path);
    if !path.trim().is_empty() {
        writer.write(XmlEvent::characters(&path))?;
    }

    writer.write(XmlEvent::end_element())?;

    Ok(())
}

#[cfg(test)]
mod test {
    use {
        super::{document::Primary, *},
        crate::{io::ChecksumType, metadata::XmlPackage, testutil},
    };

    #[test]
    fn write_and_parse() -> Result<()> {
        let data = testutil::build(
            testutil::file(testutil::package("abc", "1.0", "0").epoch(1), "/usr/bin/abc")
                .requires(rpm::Dependency::greater_eq("glibc", "2.28")),
        );
        let meta = PackageMeta::from_bytes(&data, ChecksumType::Sha256, "abc-1.0-0.rpm")?;

        let mut writer = XmlPackage::Primary.begin_document()?;
        write_package(&mut writer, &meta)?;
        let mut out = vec![];
        XmlPackage::Primary.finish_document(writer, 1, &mut out)?;

        let xml = String::from_utf8_lossy(&out).to_string();
        assert!(xml.contains("<rpm:license>MIT</rpm:license>"));
        assert!(xml.contains("<file>/usr/bin/abc</file>"));

        let primary = Primary::from_xml(&xml)?;
        assert_eq!(primary.count, 1);
        assert_eq!(primary.packages.len(), 1);

        let package = &primary.packages[0];
        assert_eq!(package.name, "abc");
        assert_eq!(package.arch, "x86_64");
        assert_eq!(package.version.epoch, 1);
        assert_eq!(package.version.version, "1.0");
        assert_eq!(package.checksum.value, meta.checksum().digest_hex());
        assert_eq!(package.location.href, "abc-1.0-0.rpm");
        assert_eq!(package.size.package, data.len() as u64);
        assert_eq!(package.time.build, testutil::BUILD_TIME as u64);

        let requires = package
            .format
            .as_ref()
            .and_then(|format| format.requires.as_ref())
            .map(|requires| requires.entries.clone())
            .unwrap_or_default();
        assert_eq!(requires.len(), 1);
        assert_eq!(requires[0].name, "glibc");
        assert_eq!(requires[0].flags.as_deref(), Some("GE"));
        assert_eq!(requires[0].version.as_deref(), Some("2.28"));

        Ok(())
    }
}
