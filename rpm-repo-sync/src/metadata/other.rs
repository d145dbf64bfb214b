// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! `other.xml` file format.

`other.xml` carries the changelog of every package.
*/

use {
    crate::{
        error::Result,
        metadata::{xml_attr, xml_text},
        package::PackageMeta,
    },
    std::io::Write,
    xml::writer::{EventWriter, XmlEvent},
};

/// Emit the `<package>` and `<version>` start of a per package record.
///
/// Shared with `filelists.xml`, which uses the same record header.
pub(crate) fn write_package_start<W: Write>(
    writer: &mut EventWriter<W>,
    package: &PackageMeta,
) -> Result<()> {
    let pkgid = package.checksum().digest_hex();
    let name = xml_attr(package.name());
    let arch = xml_attr(package.arch());
    let evr = package.evr();
    let epoch = evr.epoch.to_string();
    let version = xml_attr(&evr.version);
    let release = xml_attr(&evr.release);

    writer.write(
        XmlEvent::start_element("package")
            .attr("pkgid", &pkgid)
            .attr("name", &name)
            .attr("arch", &arch),
    )?;

    writer.write(
        XmlEvent::start_element("version")
            .attr("epoch", &epoch)
            .attr("ver", &version)
            .attr("rel", &release),
    )?;
    writer.write(XmlEvent::end_element())?;

    Ok(())
}

/// Emit the `other.xml` `<package>` element for a package.
pub fn write_package<W: Write>(writer: &mut EventWriter<W>, package: &PackageMeta) -> Result<()> {
    write_package_start(writer, package)?;

    for entry in package.changelog() {
        let author = xml_attr(&entry.author);
        let date = entry.date.to_string();

        writer.write(
            XmlEvent::start_element("changelog")
                .attr("author", &author)
                .attr("date", &date),
        )?;

        let text = xml_text(&entry.text);
        if !text.trim().is_empty() {
            writer.write(XmlEvent::characters(&text))?;
        }

        writer.write(XmlEvent::end_element())?;
    }

    writer.write(XmlEvent::end_element())?;

    Ok(())
}
