// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use thiserror::Error;

/// Error type for this crate.
#[derive(Debug, Error)]
pub enum RpmRepositoryError {
    #[error("XML error: {0:?}")]
    Xml(#[from] serde_xml_rs::Error),

    #[error("XML read error: {0:?}")]
    XmlRead(#[from] xml::reader::Error),

    #[error("XML write error: {0:?}")]
    XmlWrite(#[from] xml::writer::Error),

    #[error("blocking task failed: {0:?}")]
    Join(#[from] tokio::task::JoinError),

    #[error("YAML error: {0:?}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("repository I/O error on path {0}: {1:?}")]
    IoPath(String, std::io::Error),

    #[error("invalid hex in content digest: {0}; {1:?}")]
    ContentDigestBadHex(String, hex::FromHexError),

    #[error("unsupported content digest: {0}")]
    UnsupportedDigest(String),

    #[error("unsupported naming policy: {0}")]
    UnsupportedNamingPolicy(String),

    #[error("invalid repository configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid package {0}: {1}")]
    InvalidPackage(String, String),

    #[error("invalid package location: {0}")]
    InvalidLocation(String),

    #[error("repository metadata entry not found: {0}")]
    MetadataFileNotFound(&'static str),

    #[error("required metadata item missing: {0}")]
    MissingMetadataItem(&'static str),

    #[error("malformed metadata: {0}")]
    MalformedMetadata(String),

    #[error("lock on {0} is held by another process")]
    LockHeld(String),
}

/// Result type for this crate.
pub type Result<T> = std::result::Result<T, RpmRepositoryError>;
