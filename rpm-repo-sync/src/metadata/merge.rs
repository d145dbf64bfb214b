// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Merging new packages into existing package listings.

`primary.xml` is processed first. Existing records whose location or
checksum equals that of a new package are dropped and their checksums
remembered. Records with those checksums are then dropped from the other
listings. New packages are appended to every listing in the same order, so
the listings stay consistent with each other.

A secondary listing that doesn't describe the same packages as `primary.xml`
afterwards is reported as drifted. Such a listing can only be repaired by
writing it afresh from every package with [rebuild_item()].
*/

use {
    crate::{
        error::{Result, RpmRepositoryError},
        metadata::{events::PackageElements, MetadataItem, XmlPackage},
        package::PackageMeta,
    },
    log::{debug, warn},
    std::collections::BTreeSet,
};

/// Outcome of [merge_items()].
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct MergeResult {
    /// Number of packages in the resulting listings.
    pub count: usize,
    /// Checksums of existing records that were replaced.
    pub replaced: BTreeSet<String>,
    /// Secondary listings not describing the packages of `primary.xml`.
    pub drifted: BTreeSet<XmlPackage>,
}

fn take_item<'a>(
    items: &mut Vec<MetadataItem<'a>>,
    kind: XmlPackage,
) -> Option<MetadataItem<'a>> {
    let index = items.iter().position(|item| item.kind == kind)?;

    Some(items.remove(index))
}

/// Write a listing of `kind` for `packages` alone.
fn write_listing(
    kind: XmlPackage,
    packages: &[PackageMeta],
    output: &mut dyn std::io::Write,
) -> Result<()> {
    let mut writer = kind.begin_document()?;

    for package in packages {
        kind.write_package(&mut writer, package)?;
    }

    kind.finish_document(writer, packages.len(), output)
}

fn merge_primary(
    item: MetadataItem<'_>,
    packages: &[PackageMeta],
) -> Result<(MergeResult, BTreeSet<String>)> {
    let MetadataItem {
        kind,
        input,
        mut output,
    } = item;

    let locations = packages
        .iter()
        .map(|package| package.location())
        .collect::<BTreeSet<_>>();
    let checksums = packages
        .iter()
        .map(|package| package.checksum().digest_hex())
        .collect::<BTreeSet<_>>();

    let mut writer = kind.begin_document()?;
    let mut result = MergeResult::default();
    let mut ids = BTreeSet::new();

    if let Some(input) = input {
        for element in PackageElements::new(input) {
            let element = element?;
            let id = element.package_id(kind);

            let replaced = element
                .child_attribute("location", "href")
                .map(|href| locations.contains(href))
                .unwrap_or(false)
                || id.as_ref().map(|id| checksums.contains(id)).unwrap_or(false);

            if replaced {
                if let Some(id) = id {
                    debug!("replacing {} record {}", kind, id);
                    result.replaced.insert(id);
                }
            } else {
                element.write_to(&mut writer)?;
                ids.extend(id);
                result.count += 1;
            }
        }
    }

    for package in packages {
        kind.write_package(&mut writer, package)?;
        ids.insert(package.checksum().digest_hex());
        result.count += 1;
    }

    kind.finish_document(writer, result.count, &mut output)?;

    Ok((result, ids))
}

/// Merge into a secondary listing, returning whether it still matches primary.
fn merge_secondary(
    item: MetadataItem<'_>,
    packages: &[PackageMeta],
    primary: &MergeResult,
    primary_ids: &BTreeSet<String>,
) -> Result<bool> {
    let MetadataItem {
        kind,
        input,
        mut output,
    } = item;

    let mut writer = kind.begin_document()?;
    let mut count = 0;
    let mut ids = BTreeSet::new();

    if let Some(input) = input {
        for element in PackageElements::new(input) {
            let element = element?;
            let id = element.package_id(kind);

            if id
                .as_ref()
                .map(|id| primary.replaced.contains(id))
                .unwrap_or(false)
            {
                continue;
            }

            element.write_to(&mut writer)?;
            ids.extend(id);
            count += 1;
        }
    }

    for package in packages {
        kind.write_package(&mut writer, package)?;
        ids.insert(package.checksum().digest_hex());
        count += 1;
    }

    let consistent = count == primary.count && &ids == primary_ids;
    if !consistent {
        warn!(
            "{} lists {} packages but primary lists {}; it needs a rebuild",
            kind, count, primary.count
        );
    }

    kind.finish_document(writer, count, &mut output)?;

    Ok(consistent)
}

/// Merge packages into the listings described by `items`.
///
/// `primary` and `other` items are required. A `filelists` item is optional.
/// Items without input start from an empty listing.
pub fn merge_items(
    mut items: Vec<MetadataItem<'_>>,
    packages: &[PackageMeta],
) -> Result<MergeResult> {
    let primary = take_item(&mut items, XmlPackage::Primary)
        .ok_or(RpmRepositoryError::MissingMetadataItem("primary"))?;
    if !items.iter().any(|item| item.kind == XmlPackage::Other) {
        return Err(RpmRepositoryError::MissingMetadataItem("other"));
    }

    let (mut result, primary_ids) = merge_primary(primary, packages)?;

    for item in items {
        let kind = item.kind;

        if !merge_secondary(item, packages, &result, &primary_ids)? {
            result.drifted.insert(kind);
        }
    }

    Ok(result)
}

/// Replace the listing of an item with one describing exactly `packages`.
///
/// The input of the item, if any, is ignored.
pub fn rebuild_item(item: MetadataItem<'_>, packages: &[PackageMeta]) -> Result<usize> {
    let MetadataItem {
        kind, mut output, ..
    } = item;

    debug!("rebuilding {} from {} packages", kind, packages.len());
    write_listing(kind, packages, &mut output)?;

    Ok(packages.len())
}
