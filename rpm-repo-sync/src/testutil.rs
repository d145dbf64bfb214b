// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! RPM files for tests.

/// Build time of every test package, so equal inputs produce equal bytes.
pub const BUILD_TIME: u32 = 1_600_000_000;

/// Start a package with the fields every test package shares.
pub fn package(name: &str, version: &str, release: &str) -> rpm::PackageBuilder {
    rpm::PackageBuilder::new(
        name,
        version,
        "MIT",
        "x86_64",
        &format!("The {} package", name),
    )
    .release(release)
    .vendor("Example")
    .packager("Packager <pkg@example.com>")
    .url("https://example.com")
    .source_date(BUILD_TIME)
}

/// Add a regular file whose content names its path.
pub fn file(builder: rpm::PackageBuilder, path: &str) -> rpm::PackageBuilder {
    builder
        .with_file_contents(
            format!("contents of {}\n", path),
            rpm::FileOptions::new(path),
        )
        .expect("file should be added")
}

/// Produce the bytes of the RPM file.
pub fn build(builder: rpm::PackageBuilder) -> Vec<u8> {
    let package = builder.build().expect("package should build");

    let mut data = vec![];
    package.write(&mut data).expect("package should serialize");

    data
}
