// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Naming of published metadata files. */

use {
    crate::{
        error::RpmRepositoryError,
        io::ChecksumType,
        metadata::XmlPackage,
        repodata::REPODATA,
    },
    std::str::FromStr,
};

/// Maps a metadata kind and its content digest to a repository relative path.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum NamingPolicy {
    /// Fixed names: `repodata/<kind>.xml.gz`.
    Plain,

    /// Digest prefixed names: `repodata/<digest>-<kind>.xml.gz`.
    ///
    /// The digest is of the compressed file, computed with the held algorithm.
    HashPrefixed(ChecksumType),
}

impl Default for NamingPolicy {
    fn default() -> Self {
        Self::Plain
    }
}

impl NamingPolicy {
    /// Base name of the uncompressed metadata file for a kind.
    pub fn name(&self, kind: XmlPackage) -> String {
        format!("{}.xml", kind.name())
    }

    /// Repository relative path of the published metadata file for a kind.
    pub fn full_name(&self, kind: XmlPackage, digest_hex: &str) -> String {
        match self {
            Self::Plain => format!("{}/{}.gz", REPODATA, self.name(kind)),
            Self::HashPrefixed(_) => {
                format!("{}/{}-{}.gz", REPODATA, digest_hex, self.name(kind))
            }
        }
    }

    /// The digest algorithm whose output is embedded in file names.
    pub fn checksum_type(&self) -> Option<ChecksumType> {
        match self {
            Self::Plain => None,
            Self::HashPrefixed(checksum) => Some(*checksum),
        }
    }
}

impl std::fmt::Display for NamingPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Plain => f.write_str("plain"),
            Self::HashPrefixed(checksum) => f.write_str(checksum.name()),
        }
    }
}

impl FromStr for NamingPolicy {
    type Err = RpmRepositoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "plain" => Ok(Self::Plain),
            "hash-prefixed" => Ok(Self::HashPrefixed(ChecksumType::Sha256)),
            value => ChecksumType::from_str(value)
                .map(Self::HashPrefixed)
                .map_err(|_| RpmRepositoryError::UnsupportedNamingPolicy(s.to_string())),
        }
    }
}
