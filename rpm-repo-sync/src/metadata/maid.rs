// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Removing packages from existing package listings. */

use {
    crate::{
        error::Result,
        metadata::{events::PackageElement, events::PackageElements, MetadataItem, XmlPackage},
        package::PackageInfo,
    },
    log::{debug, warn},
    std::collections::BTreeSet,
};

/// How much detail to gather about removed packages.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum InfoDetail {
    None,
    Full,
}

impl Default for InfoDetail {
    fn default() -> Self {
        Self::None
    }
}

/// Outcome of [remove_items()].
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RemoveResult {
    /// Number of packages left in the listings.
    pub count: usize,
    /// Removed packages, when [InfoDetail::Full] was requested.
    pub info: Vec<PackageInfo>,
    /// Secondary listings not describing the packages of `primary.xml`.
    pub drifted: BTreeSet<XmlPackage>,
}

fn package_info(element: &PackageElement) -> PackageInfo {
    PackageInfo {
        name: element.child_text("name").unwrap_or_default(),
        arch: element.child_text("arch").unwrap_or_default(),
        version: element
            .child_attribute("version", "ver")
            .unwrap_or_default()
            .to_string(),
    }
}

/// Remove packages having any of the given checksums.
///
/// Items without input are left untouched. Checksums not present in a
/// listing are ignored. Each listing records the number of packages it
/// actually holds; secondary listings that disagree with `primary.xml` are
/// reported in [RemoveResult::drifted].
pub fn remove_items(
    mut items: Vec<MetadataItem<'_>>,
    checksums: &BTreeSet<String>,
    detail: InfoDetail,
) -> Result<RemoveResult> {
    items.sort_by_key(|item| item.kind);

    let mut result = RemoveResult::default();
    let mut primary = None;

    for item in items {
        let MetadataItem {
            kind,
            input,
            mut output,
        } = item;

        let input = match input {
            Some(input) => input,
            None => {
                debug!("no {} listing to remove packages from", kind);
                continue;
            }
        };

        let mut writer = kind.begin_document()?;
        let mut ids = BTreeSet::new();
        let mut count = 0;

        for element in PackageElements::new(input) {
            let element = element?;
            let id = element.package_id(kind);

            let remove = id
                .as_ref()
                .map(|id| checksums.contains(id))
                .unwrap_or(false);

            if !remove {
                element.write_to(&mut writer)?;
                ids.extend(id);
                count += 1;
            } else if kind == XmlPackage::Primary && detail == InfoDetail::Full {
                result.info.push(package_info(&element));
            }
        }

        kind.finish_document(writer, count, &mut output)?;

        if kind == XmlPackage::Primary {
            result.count = count;
            primary = Some((count, ids));
        } else if let Some((primary_count, primary_ids)) = &primary {
            if *primary_count != count || *primary_ids != ids {
                warn!(
                    "{} lists {} packages but primary lists {}; it needs a rebuild",
                    kind, count, primary_count
                );
                result.drifted.insert(kind);
            }
        } else {
            result.count = count;
        }
    }

    Ok(result)
}
