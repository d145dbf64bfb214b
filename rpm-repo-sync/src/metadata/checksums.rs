// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Extraction of package checksums from `primary.xml`. */

use {
    crate::{error::Result, metadata::events::PackageElements},
    log::warn,
    std::{collections::BTreeMap, io::Read},
};

/// Map each package location in a `primary.xml` document to its checksum.
///
/// Only one `<package>` element is held in memory at a time. Records lacking
/// a location or a checksum are skipped.
pub fn package_checksums(input: impl Read) -> Result<BTreeMap<String, String>> {
    let mut checksums = BTreeMap::new();

    for element in PackageElements::new(input) {
        let element = element?;

        match (
            element.child_attribute("location", "href"),
            element.child_text("checksum"),
        ) {
            (Some(location), Some(checksum)) if !checksum.trim().is_empty() => {
                checksums.insert(location.to_string(), checksum.trim().to_string());
            }
            _ => {
                warn!("skipping primary record without location or checksum");
            }
        }
    }

    Ok(checksums)
}

#[cfg(test)]
mod test {
    use {super::*, indoc::indoc};

    #[test]
    fn extract() -> Result<()> {
        let xml = indoc! {r#"
            <?xml version="1.0" encoding="UTF-8"?>
            <metadata xmlns="http://linux.duke.edu/metadata/common" xmlns:rpm="http://linux.duke.edu/metadata/rpm" packages="3">
              <package type="rpm">
                <name>abc</name>
                <checksum type="sha256" pkgid="YES">aaaa</checksum>
                <location href="abc-1.0-1.rpm"/>
                <format>
                  <rpm:provides>
                    <rpm:entry name="abc"/>
                  </rpm:provides>
                  <file>/usr/bin/abc</file>
                </format>
              </package>
              <package type="rpm">
                <name>time</name>
                <checksum type="sha256" pkgid="YES">
                  bbbb
                </checksum>
                <location href="x86_64/time-1.0-1.rpm"/>
              </package>
              <package type="rpm">
                <name>broken</name>
                <location href="broken.rpm"/>
              </package>
            </metadata>
        "#};

        let checksums = package_checksums(xml.as_bytes())?;

        assert_eq!(
            checksums,
            BTreeMap::from([
                ("abc-1.0-1.rpm".to_string(), "aaaa".to_string()),
                ("x86_64/time-1.0-1.rpm".to_string(), "bbbb".to_string()),
            ])
        );

        Ok(())
    }

    #[test]
    fn malformed() {
        assert!(package_checksums("<metadata><package>".as_bytes()).is_err());
    }
}
