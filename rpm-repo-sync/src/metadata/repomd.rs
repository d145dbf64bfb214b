// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! `repomd.xml` file format. */

use {
    crate::{
        error::{Result, RpmRepositoryError},
        io::ContentDigest,
        metadata::RPM_NS,
    },
    serde::{Deserialize, Serialize},
    std::io::{Read, Write},
    xml::{
        common::XmlVersion,
        writer::{EmitterConfig, EventWriter, XmlEvent},
    },
};

/// Namespace of `repomd.xml` elements.
pub const REPO_NS: &str = "http://linux.duke.edu/metadata/repo";

/// A `repomd.xml` file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoMd {
    /// Revision of the repository.
    ///
    /// Often an integer-like value.
    pub revision: String,
    /// Describes additional primary data files constituting this repository.
    pub data: Vec<RepoMdData>,
}

impl RepoMd {
    /// Construct an instance by parsing XML from a reader.
    pub fn from_reader(reader: impl Read) -> Result<Self> {
        Ok(serde_xml_rs::from_reader(reader)?)
    }

    /// Construct an instance by parsing XML from a string.
    pub fn from_xml(s: &str) -> Result<Self> {
        Ok(serde_xml_rs::from_str(s)?)
    }

    /// Find the `<data>` entry of a given type.
    pub fn entry(&self, data_type: &str) -> Option<&RepoMdData> {
        self.data.iter().find(|entry| entry.data_type == data_type)
    }

    /// Serialize to XML.
    pub fn to_xml(&self) -> Result<Vec<u8>> {
        let mut writer = EmitterConfig::new()
            .perform_indent(true)
            .create_writer(Vec::new());

        writer.write(XmlEvent::StartDocument {
            version: XmlVersion::Version10,
            encoding: Some("UTF-8"),
            standalone: None,
        })?;

        writer.write(
            XmlEvent::start_element("repomd")
                .default_ns(REPO_NS)
                .ns("rpm", RPM_NS),
        )?;

        write_value(&mut writer, "revision", &self.revision)?;

        for entry in &self.data {
            entry.write(&mut writer)?;
        }

        writer.write(XmlEvent::end_element())?;

        let mut data = writer.into_inner();
        data.push(b'\n');

        Ok(data)
    }
}

fn write_value<W: Write>(writer: &mut EventWriter<W>, name: &str, value: &str) -> Result<()> {
    writer.write(XmlEvent::start_element(name))?;
    writer.write(XmlEvent::characters(value))?;
    writer.write(XmlEvent::end_element())?;

    Ok(())
}

/// A `<data>` element in a `repomd.xml` file.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct RepoMdData {
    /// The type of data.
    #[serde(rename = "type")]
    pub data_type: String,
    /// Content checksum of this file.
    pub checksum: Checksum,
    /// Where the file is located.
    pub location: Location,
    /// Size in bytes of the file as stored in the repository.
    pub size: Option<u64>,
    /// Time file was created/modified.
    pub timestamp: Option<u64>,
    /// Content checksum of the decoded (often decompressed) file.
    #[serde(rename = "open-checksum")]
    pub open_checksum: Option<Checksum>,
    /// Size in bytes of the decoded (often decompressed) file.
    #[serde(rename = "open-size")]
    pub open_size: Option<u64>,
    /// Content checksum of header data.
    #[serde(rename = "header-checksum")]
    pub header_checksum: Option<Checksum>,
    /// Size in bytes of the header.
    #[serde(rename = "header-size")]
    pub header_size: Option<u64>,
}

impl RepoMdData {
    fn write<W: Write>(&self, writer: &mut EventWriter<W>) -> Result<()> {
        writer.write(XmlEvent::start_element("data").attr("type", &self.data_type))?;

        self.checksum.write(writer, "checksum")?;
        if let Some(checksum) = &self.open_checksum {
            checksum.write(writer, "open-checksum")?;
        }
        if let Some(checksum) = &self.header_checksum {
            checksum.write(writer, "header-checksum")?;
        }

        writer.write(XmlEvent::start_element("location").attr("href", &self.location.href))?;
        writer.write(XmlEvent::end_element())?;

        for (name, value) in [
            ("timestamp", self.timestamp),
            ("size", self.size),
            ("open-size", self.open_size),
            ("header-size", self.header_size),
        ] {
            if let Some(value) = value {
                write_value(writer, name, &value.to_string())?;
            }
        }

        writer.write(XmlEvent::end_element())?;

        Ok(())
    }
}

/// The content checksum of a `<data>` element.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Checksum {
    /// The name of the content digest.
    #[serde(rename = "type")]
    pub name: String,
    /// The hex encoded content digest.
    #[serde(rename = "$value")]
    pub value: String,
}

impl Checksum {
    fn write<W: Write>(&self, writer: &mut EventWriter<W>, element: &str) -> Result<()> {
        writer.write(XmlEvent::start_element(element).attr("type", &self.name))?;
        writer.write(XmlEvent::characters(&self.value))?;
        writer.write(XmlEvent::end_element())?;

        Ok(())
    }
}

impl From<&ContentDigest> for Checksum {
    fn from(digest: &ContentDigest) -> Self {
        Self {
            name: digest.checksum_type().name().to_string(),
            value: digest.digest_hex(),
        }
    }
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

/// The location of a `<data>` element.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Location {
    pub href: String,
}
