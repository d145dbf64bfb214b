// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Repository layout and access to published metadata. */

use {
    crate::{
        error::{Result, RpmRepositoryError},
        io::{read_decompressed, Compression, ContentDigest, ContentValidatingReader},
        metadata::{repomd::RepoMd, XmlPackage},
        storage::{key_has_prefix, Storage},
    },
    futures::{io::BufReader, AsyncRead, AsyncReadExt},
    log::warn,
    std::pin::Pin,
};

/// Directory holding published metadata.
pub const REPODATA: &str = "repodata";

/// Key of the index of metadata files.
pub const REPOMD: &str = "repodata/repomd.xml";

/// Staging prefix for packages to add.
pub const ADD_PREFIX: &str = ".add";

/// Staging prefix for markers of packages to remove.
pub const REMOVE_PREFIX: &str = ".remove";

/// Prefix holding per run working directories.
pub const SCRATCH_PREFIX: &str = ".scratch";

/// Whether a key names a published package.
///
/// Packages live outside `repodata/` and outside any dot-prefixed top level
/// directory such as the staging areas, scratch space and locks.
pub fn is_package_key(key: &str) -> bool {
    let first = key.split('/').next().unwrap_or_default();

    key.ends_with(".rpm") && !first.starts_with('.') && !key_has_prefix(key, REPODATA)
}

/// Reject locations that would escape the repository or land in reserved areas.
pub fn validate_location(location: &str) -> Result<&str> {
    let trimmed = location.trim_start_matches('/');

    let valid = !trimmed.is_empty()
        && trimmed.ends_with(".rpm")
        && trimmed
            .split('/')
            .all(|part| !part.is_empty() && part != "." && part != "..")
        && is_package_key(trimmed);

    if valid {
        Ok(trimmed)
    } else {
        Err(RpmRepositoryError::InvalidLocation(location.to_string()))
    }
}

/// A published metadata file.
#[derive(Clone, Debug)]
pub struct MetadataLocation {
    /// Repository relative path.
    pub path: String,
    /// Size and digest advertised by `repomd.xml`, if known.
    pub expected: Option<(u64, ContentDigest)>,
}

/// Read and parse `repodata/repomd.xml`, if present and well formed.
pub async fn read_repomd(storage: &dyn Storage) -> Result<Option<RepoMd>> {
    if !storage.exists(REPOMD).await? {
        return Ok(None);
    }

    let data = storage.read_all(REPOMD).await?;

    match RepoMd::from_reader(std::io::Cursor::new(data)) {
        Ok(repomd) => Ok(Some(repomd)),
        Err(e) => {
            warn!("ignoring unparseable {}: {}", REPOMD, e);
            Ok(None)
        }
    }
}

/// Locate the current metadata file of a kind.
///
/// `repomd.xml` is consulted first. Without a usable entry, the first file in
/// `repodata/` named like the kind is used.
pub async fn locate_metadata(
    storage: &dyn Storage,
    repomd: Option<&RepoMd>,
    kind: XmlPackage,
) -> Result<Option<MetadataLocation>> {
    if let Some(entry) = repomd
        .into_iter()
        .flat_map(|repomd| repomd.data.iter())
        .find(|entry| entry.data_type == kind.name())
    {
        if storage.exists(&entry.location.href).await? {
            let expected = match (entry.size, ContentDigest::try_from(entry.checksum.clone())) {
                (Some(size), Ok(digest)) => Some((size, digest)),
                _ => None,
            };

            return Ok(Some(MetadataLocation {
                path: entry.location.href.clone(),
                expected,
            }));
        }

        warn!(
            "{} advertises missing file {}",
            REPOMD, entry.location.href
        );
    }

    let suffix = format!("{}.xml.gz", kind.name());

    Ok(storage
        .list(REPODATA)
        .await?
        .into_iter()
        .find(|key| {
            let name = key.rsplit('/').next().unwrap_or_default();
            name == suffix || name.ends_with(&format!("-{}", suffix))
        })
        .map(|path| MetadataLocation {
            path,
            expected: None,
        }))
}

async fn read_content(
    storage: &dyn Storage,
    path: &str,
    expected: Option<&(u64, ContentDigest)>,
) -> Result<Vec<u8>> {
    let reader = storage.get_path(path).await?;

    let reader: Pin<Box<dyn AsyncRead + Send>> = match expected {
        Some((size, digest)) => Box::pin(ContentValidatingReader::new(
            reader,
            *size,
            digest.clone(),
        )),
        None => reader,
    };

    let mut reader = read_decompressed(BufReader::new(reader), Compression::from_path(path));

    let mut data = vec![];
    reader
        .read_to_end(&mut data)
        .await
        .map_err(|e| RpmRepositoryError::IoPath(path.to_string(), e))?;

    Ok(data)
}

/// Read a metadata file, verifying its advertised digest and decompressing it.
///
/// Under plain naming, an interrupted update can leave `repomd.xml`
/// describing the previous content of a file that was already replaced. A
/// file failing verification is therefore read again without it; only a file
/// that doesn't decompress at all is an error.
pub async fn read_metadata(storage: &dyn Storage, location: &MetadataLocation) -> Result<Vec<u8>> {
    match read_content(storage, &location.path, location.expected.as_ref()).await {
        Err(RpmRepositoryError::IoPath(path, e)) if location.expected.is_some() => {
            warn!(
                "{} does not match {}: {}; reading it unverified",
                path, REPOMD, e
            );

            read_content(storage, &location.path, None).await
        }
        res => res,
    }
}
