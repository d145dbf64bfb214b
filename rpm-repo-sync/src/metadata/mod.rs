// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! RPM repository metadata XML definitions.

RPM repositories define metadata via a series of XML files. `primary.xml`,
`other.xml` and `filelists.xml` each list every package of the repository
at a different level of detail. `repomd.xml` describes where those files live.

The package listings are processed as streams of XML events, one `<package>`
element at a time, so existing records pass through a merge or a removal
unchanged.
*/

pub mod checksums;
pub mod events;
pub mod filelists;
pub mod maid;
pub mod merge;
pub mod other;
pub mod primary;
pub mod repomd;

use {
    crate::{
        error::{Result, RpmRepositoryError},
        package::PackageMeta,
    },
    std::io::{Read, Write},
    xml::{
        common::XmlVersion,
        writer::{EmitterConfig, EventWriter, XmlEvent},
    },
};

/// Namespace of `primary.xml` elements.
pub const COMMON_NS: &str = "http://linux.duke.edu/metadata/common";

/// Namespace of `rpm:` prefixed elements.
pub const RPM_NS: &str = "http://linux.duke.edu/metadata/rpm";

/// Namespace of `other.xml` elements.
pub const OTHER_NS: &str = "http://linux.duke.edu/metadata/other";

/// Namespace of `filelists.xml` elements.
pub const FILELISTS_NS: &str = "http://linux.duke.edu/metadata/filelists";

/// Name of the root attribute holding the package count.
pub const COUNT_ATTRIBUTE: &str = "packages";

/// Count written before the real count is known.
const COUNT_PLACEHOLDER: &str = "packages=\"-1\"";

/// Kinds of package listing metadata.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum XmlPackage {
    Primary,
    Other,
    Filelists,
}

impl XmlPackage {
    /// All kinds, in processing order.
    pub fn all() -> [Self; 3] {
        [Self::Primary, Self::Other, Self::Filelists]
    }

    /// Lowercase name, used for `<data type>` and file names.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Other => "other",
            Self::Filelists => "filelists",
        }
    }

    /// Name of the root element.
    pub fn root_tag(&self) -> &'static str {
        match self {
            Self::Primary => "metadata",
            Self::Other => "otherdata",
            Self::Filelists => "filelists",
        }
    }

    /// Default namespace of the document.
    pub fn namespace(&self) -> &'static str {
        match self {
            Self::Primary => COMMON_NS,
            Self::Other => OTHER_NS,
            Self::Filelists => FILELISTS_NS,
        }
    }

    /// Emit the `<package>` element describing a package.
    pub fn write_package<W: Write>(
        &self,
        writer: &mut EventWriter<W>,
        package: &PackageMeta,
    ) -> Result<()> {
        match self {
            Self::Primary => primary::write_package(writer, package),
            Self::Other => other::write_package(writer, package),
            Self::Filelists => filelists::write_package(writer, package),
        }
    }

    /// Create a writer and emit the document prologue with a placeholder count.
    pub(crate) fn begin_document(&self) -> Result<EventWriter<Vec<u8>>> {
        let mut writer = EmitterConfig::new()
            .perform_indent(true)
            .create_writer(Vec::new());

        writer.write(XmlEvent::StartDocument {
            version: XmlVersion::Version10,
            encoding: Some("UTF-8"),
            standalone: None,
        })?;

        let root = XmlEvent::start_element(self.root_tag()).default_ns(self.namespace());
        let root = if *self == Self::Primary {
            root.ns("rpm", RPM_NS)
        } else {
            root
        };

        writer.write(root.attr(COUNT_ATTRIBUTE, "-1"))?;

        Ok(writer)
    }

    /// Close the document and patch the final count into the root element.
    pub(crate) fn finish_document(
        &self,
        mut writer: EventWriter<Vec<u8>>,
        count: usize,
        output: &mut dyn Write,
    ) -> Result<()> {
        writer.write(XmlEvent::end_element())?;

        let body = writer.into_inner();
        let patched = patch_count(&body, count)?;

        output
            .write_all(&patched)
            .and_then(|_| output.write_all(b"\n"))
            .map_err(|e| RpmRepositoryError::IoPath(format!("{}.xml", self.name()), e))
    }
}

impl std::fmt::Display for XmlPackage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Rewrite the placeholder count attribute of a document's root element.
fn patch_count(body: &[u8], count: usize) -> Result<Vec<u8>> {
    let placeholder = COUNT_PLACEHOLDER.as_bytes();

    let pos = body
        .windows(placeholder.len())
        .position(|window| window == placeholder)
        .ok_or_else(|| {
            RpmRepositoryError::MalformedMetadata("count placeholder missing".to_string())
        })?;

    let mut patched = Vec::with_capacity(body.len() + 8);
    patched.extend_from_slice(&body[0..pos]);
    patched.extend_from_slice(format!("{}=\"{}\"", COUNT_ATTRIBUTE, count).as_bytes());
    patched.extend_from_slice(&body[pos + placeholder.len()..]);

    Ok(patched)
}

/// Normalize free text for inclusion in a document.
///
/// Line endings are normalized the way XML parsers report them and characters
/// XML 1.0 cannot represent are dropped, so text survives a read and re-write
/// unchanged.
pub(crate) fn xml_text(s: &str) -> String {
    s.replace("\r\n", "\n")
        .replace('\r', "\n")
        .chars()
        .filter(|c| {
            matches!(*c, '\t' | '\n') || (*c >= ' ' && *c != '\u{fffe}' && *c != '\u{ffff}')
        })
        .collect()
}

/// Normalize text for use as an attribute value.
///
/// Parsers replace line breaks and tabs in attribute values with spaces.
pub(crate) fn xml_attr(s: &str) -> String {
    xml_text(s).replace(['\n', '\t'], " ")
}

/// Write an element containing only text.
///
/// Empty or whitespace only text produces an empty element.
pub(crate) fn write_text_element<W: Write>(
    writer: &mut EventWriter<W>,
    name: &str,
    text: &str,
) -> Result<()> {
    writer.write(XmlEvent::start_element(name))?;

    let text = xml_text(text);
    if !text.trim().is_empty() {
        writer.write(XmlEvent::characters(&text))?;
    }

    writer.write(XmlEvent::end_element())?;

    Ok(())
}

/// Existing and resulting document of one metadata kind.
pub struct MetadataItem<'a> {
    pub kind: XmlPackage,
    /// Current uncompressed document, if any.
    pub input: Option<Box<dyn Read + 'a>>,
    /// Destination of the resulting document.
    pub output: Box<dyn Write + 'a>,
}

impl<'a> MetadataItem<'a> {
    pub fn new(
        kind: XmlPackage,
        input: Option<Box<dyn Read + 'a>>,
        output: Box<dyn Write + 'a>,
    ) -> Self {
        Self {
            kind,
            input,
            output,
        }
    }
}
