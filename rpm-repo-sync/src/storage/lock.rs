// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Advisory leases stored in a [Storage].

Each acquisition attempt writes a *proposal* to `.locks/<target>/<uuid>`
holding the RFC 3339 time the lease expires. An attempt succeeds when no
other unexpired proposal exists for the target. Proposals left behind by
crashed holders are reclaimed once they expire. An empty proposal never
expires.
*/

use {
    crate::{
        error::{Result, RpmRepositoryError},
        storage::{join_key, Storage},
    },
    chrono::{DateTime, Utc},
    log::{debug, warn},
    std::time::Duration,
};

/// Prefix holding all lock proposals.
pub const LOCKS_PREFIX: &str = ".locks";

/// Lease duration used when none is specified.
pub const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(3600);

/// A lease on a named target within a [Storage].
pub struct StorageLock<'a> {
    storage: &'a dyn Storage,
    target: String,
    uuid: String,
    ttl: Duration,
    acquired: bool,
}

impl<'a> StorageLock<'a> {
    pub fn new(storage: &'a dyn Storage, target: &str, ttl: Duration) -> Self {
        Self {
            storage,
            target: target.trim_matches('/').to_string(),
            uuid: uuid::Uuid::new_v4().to_string(),
            ttl,
            acquired: false,
        }
    }

    fn proposals_prefix(&self) -> String {
        join_key(LOCKS_PREFIX, &self.target)
    }

    fn proposal_key(&self) -> String {
        join_key(&self.proposals_prefix(), &self.uuid)
    }

    fn expiration(&self) -> DateTime<Utc> {
        Utc::now() + chrono::Duration::seconds(self.ttl.as_secs() as i64)
    }

    async fn write_proposal(&self) -> Result<()> {
        self.storage
            .write_bytes(
                &self.proposal_key(),
                self.expiration().to_rfc3339().into_bytes(),
            )
            .await?;

        Ok(())
    }

    /// Whether this instance currently holds the lease.
    pub fn is_acquired(&self) -> bool {
        self.acquired
    }

    /// Attempt to acquire the lease.
    ///
    /// Fails with [RpmRepositoryError::LockHeld] if another unexpired proposal exists.
    pub async fn acquire(&mut self) -> Result<()> {
        self.write_proposal().await?;

        let own = self.proposal_key();
        let now = Utc::now();

        for key in self.storage.list(&self.proposals_prefix()).await? {
            if key == own {
                continue;
            }

            let content = self.storage.read_all(&key).await?;
            let content = String::from_utf8_lossy(&content);
            let content = content.trim();

            let active = if content.is_empty() {
                true
            } else {
                match DateTime::parse_from_rfc3339(content) {
                    Ok(expires) => expires.with_timezone(&Utc) > now,
                    Err(e) => {
                        warn!("lock proposal {} has unparseable expiration: {}", key, e);
                        true
                    }
                }
            };

            if active {
                self.storage.delete_path(&own).await?;
                return Err(RpmRepositoryError::LockHeld(self.target.clone()));
            }

            warn!("reclaiming expired lock proposal {}", key);
            self.storage.delete_path(&key).await?;
        }

        debug!("acquired lock {}", own);
        self.acquired = true;

        Ok(())
    }

    /// Extend the lease by another TTL from now.
    pub async fn renew(&self) -> Result<()> {
        if !self.acquired {
            return Err(RpmRepositoryError::LockHeld(self.target.clone()));
        }

        self.write_proposal().await
    }

    /// Give up the lease.
    pub async fn release(&mut self) -> Result<()> {
        if self.acquired {
            self.storage.delete_path(&self.proposal_key()).await?;
            self.acquired = false;
            debug!("released lock {}", self.proposal_key());
        }

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use {super::*, crate::storage::memory::InMemoryStorage};

    #[tokio::test]
    async fn exclusive() -> Result<()> {
        let storage = InMemoryStorage::default();

        let mut first = StorageLock::new(&storage, "repo", DEFAULT_LOCK_TTL);
        let mut second = StorageLock::new(&storage, "repo", DEFAULT_LOCK_TTL);
        let mut other = StorageLock::new(&storage, "other", DEFAULT_LOCK_TTL);

        first.acquire().await?;
        assert!(matches!(
            second.acquire().await,
            Err(RpmRepositoryError::LockHeld(_))
        ));
        assert!(!second.is_acquired());
        other.acquire().await?;

        first.renew().await?;
        first.release().await?;
        second.acquire().await?;
        second.release().await?;
        other.release().await?;

        assert!(storage.list(LOCKS_PREFIX).await?.is_empty());

        Ok(())
    }

    #[tokio::test]
    async fn reclaims_expired() -> Result<()> {
        let storage = InMemoryStorage::default();

        let expired = (Utc::now() - chrono::Duration::hours(2)).to_rfc3339();
        storage
            .write_bytes(".locks/repo/stale", expired.into_bytes())
            .await?;

        let mut lock = StorageLock::new(&storage, "repo", DEFAULT_LOCK_TTL);
        lock.acquire().await?;

        assert!(!storage.exists(".locks/repo/stale").await?);
        lock.release().await?;

        Ok(())
    }

    #[tokio::test]
    async fn empty_proposal_never_expires() -> Result<()> {
        let storage = InMemoryStorage::default();
        storage.write_bytes(".locks/repo/forever", vec![]).await?;

        let mut lock = StorageLock::new(&storage, "repo", DEFAULT_LOCK_TTL);
        assert!(lock.acquire().await.is_err());
        assert_eq!(storage.list(".locks/repo").await?, vec![".locks/repo/forever"]);

        Ok(())
    }
}
