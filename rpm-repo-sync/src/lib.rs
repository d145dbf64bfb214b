// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! RPM repository metadata maintenance.

This crate keeps the metadata of RPM package repositories consistent with the
`.rpm` files actually present in storage.

An RPM repository is a tree of `.rpm` files plus a `repodata` directory.
`repodata/repomd.xml` (represented by [metadata::repomd::RepoMd]) describes
the other metadata files: `primary.xml.gz`, `other.xml.gz` and optionally
`filelists.xml.gz`, each listing every package of the repository. Files and
data structures in the `repodata` directory are defined in the [metadata]
module tree.

Repositories live in a [storage::Storage], an async key/value store with
filesystem and in-memory implementations. New packages are *staged* under
`.add/` and removals are requested with markers under `.remove/`.
[publish::Rpm] then performs a *batch update*: under a lease stored next to
the repository, it reconciles the index with storage ([diff]), merges new
packages into and removes old packages from the listings ([update]), and
swaps the new metadata into place with `repomd.xml` written last.

Package headers are decoded with the `rpm` crate and turned into index
records by [package]. Package files are streamed through the digest, never
buffered whole.
*/

pub mod config;
pub mod diff;
pub mod error;
pub mod io;
pub mod metadata;
pub mod naming;
pub mod package;
pub mod publish;
pub mod repodata;
pub mod storage;
pub mod update;

#[cfg(test)]
mod testutil;

pub use crate::{
    config::RepoConfig,
    error::{Result, RpmRepositoryError},
    io::{ChecksumType, ContentDigest},
    metadata::maid::InfoDetail,
    naming::NamingPolicy,
    package::PackageInfo,
    publish::{PublishEvent, Rpm, UpdateReport},
};
