// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Repository configuration.

A repository is configured with a YAML document like:

```yaml
digest: sha256
naming-policy: sha256
filelists: true
update:
  on: upload
```

`update.on` may also be a mapping `{cron: "<expression>"}` to request
scheduled batch updates instead of updates on each upload. The schedule
itself is run by the caller, e.g. a cron job invoking `rrt update`; staging
a change then leaves publishing to the next scheduled run
(see [RepoConfig::update_on_stage()]).
*/

use {
    crate::{
        error::{Result, RpmRepositoryError},
        io::ChecksumType,
        metadata::XmlPackage,
        naming::NamingPolicy,
    },
    serde::Deserialize,
    std::str::FromStr,
};

/// When batch updates are triggered.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum UpdateMode {
    /// After every upload or removal.
    Upload,
    /// On a cron schedule.
    Cron,
}

/// Immutable configuration of one repository.
#[derive(Clone, Debug)]
pub struct RepoConfig {
    name: String,
    digest: ChecksumType,
    naming: NamingPolicy,
    filelists: bool,
    mode: UpdateMode,
    cron: Option<String>,
}

impl Default for RepoConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            digest: ChecksumType::Sha256,
            naming: NamingPolicy::Plain,
            filelists: false,
            mode: UpdateMode::Upload,
            cron: None,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "kebab-case")]
struct YamlConfig {
    digest: Option<String>,
    naming_policy: Option<String>,
    filelists: Option<bool>,
    update: Option<YamlUpdate>,
}

#[derive(Deserialize)]
struct YamlUpdate {
    on: YamlUpdateOn,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum YamlUpdateOn {
    Event(String),
    Schedule { cron: String },
}

impl RepoConfig {
    /// Construct an instance from explicit settings.
    pub fn new(
        name: impl ToString,
        digest: ChecksumType,
        naming: NamingPolicy,
        filelists: bool,
    ) -> Self {
        Self {
            name: name.to_string(),
            digest,
            naming,
            filelists,
            ..Default::default()
        }
    }

    /// Parse YAML configuration for a named repository.
    ///
    /// Unspecified keys default to a `sha256` digest, `sha256` hash prefixed naming,
    /// filelists enabled and updates on upload.
    pub fn from_yaml(name: impl ToString, yaml: &str) -> Result<Self> {
        let raw: YamlConfig = serde_yaml::from_str(yaml)?;

        let digest = match raw.digest {
            Some(value) => ChecksumType::from_str(&value)?,
            None => ChecksumType::Sha256,
        };

        let naming = match raw.naming_policy {
            Some(value) => NamingPolicy::from_str(&value)?,
            None => NamingPolicy::HashPrefixed(ChecksumType::Sha256),
        };

        let (mode, cron) = match raw.update.map(|update| update.on) {
            None => (UpdateMode::Upload, None),
            Some(YamlUpdateOn::Event(event)) if event == "upload" => (UpdateMode::Upload, None),
            Some(YamlUpdateOn::Event(event)) => {
                return Err(RpmRepositoryError::InvalidConfig(format!(
                    "unknown update trigger: {}",
                    event
                )));
            }
            Some(YamlUpdateOn::Schedule { cron }) if cron.trim().is_empty() => {
                return Err(RpmRepositoryError::InvalidConfig(
                    "empty cron expression".to_string(),
                ));
            }
            Some(YamlUpdateOn::Schedule { cron }) => (UpdateMode::Cron, Some(cron)),
        };

        Ok(Self {
            name: name.to_string(),
            digest,
            naming,
            filelists: raw.filelists.unwrap_or(true),
            mode,
            cron,
        })
    }

    /// Name of the repository.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Digest algorithm for package and metadata checksums.
    pub fn digest(&self) -> ChecksumType {
        self.digest
    }

    pub fn naming(&self) -> NamingPolicy {
        self.naming
    }

    /// Whether `filelists.xml` is maintained.
    pub fn filelists(&self) -> bool {
        self.filelists
    }

    pub fn mode(&self) -> UpdateMode {
        self.mode
    }

    /// Cron expression for scheduled updates.
    pub fn cron(&self) -> Option<&str> {
        self.cron.as_deref()
    }

    /// Whether staging a package or removal should run a batch update right away.
    pub fn update_on_stage(&self) -> bool {
        self.mode == UpdateMode::Upload
    }

    /// Metadata kinds maintained for this repository.
    pub fn kinds(&self) -> Vec<XmlPackage> {
        XmlPackage::all()
            .into_iter()
            .filter(|kind| self.filelists || *kind != XmlPackage::Filelists)
            .collect()
    }

    pub fn set_digest(&mut self, digest: ChecksumType) {
        self.digest = digest;
    }

    pub fn set_naming(&mut self, naming: NamingPolicy) {
        self.naming = naming;
    }

    pub fn set_filelists(&mut self, filelists: bool) {
        self.filelists = filelists;
    }
}
