// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! `filelists.xml` file format. */

use {
    crate::{
        error::Result,
        metadata::{other::write_package_start, primary::write_file},
        package::PackageMeta,
    },
    std::io::Write,
    xml::writer::{EventWriter, XmlEvent},
};

/// Emit the `filelists.xml` `<package>` element for a package.
///
/// Unlike `primary.xml`, every file of the package is listed.
pub fn write_package<W: Write>(writer: &mut EventWriter<W>, package: &PackageMeta) -> Result<()> {
    write_package_start(writer, package)?;

    for file in package.files() {
        write_file(writer, file)?;
    }

    writer.write(XmlEvent::end_element())?;

    Ok(())
}
