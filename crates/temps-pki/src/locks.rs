//! In-process critical sections keyed by CA and by certificate identity.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// A set of async mutexes created on demand, one per key.
#[derive(Debug)]
pub struct KeyedLocks<K> {
    inner: Mutex<HashMap<K, Arc<Mutex<()>>>>,
}

impl<K: Eq + Hash + Clone> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }
}

impl<K: Eq + Hash + Clone> KeyedLocks<K> {
    pub async fn lock(&self, key: K) -> OwnedMutexGuard<()> {
        let entry = {
            let mut map = self.inner.lock().await;
            // drop entries nobody holds or waits on
            map.retain(|_, lock| Arc::strong_count(lock) > 1);
            map.entry(key).or_default().clone()
        };
        entry.lock_owned().await
    }

    #[cfg(test)]
    async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }
}

/// Identity of an active certificate as used by the renewal check.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdentityKey {
    pub cn: String,
    pub profile_name: String,
}

impl IdentityKey {
    pub fn new(cn: &str, profile_name: &str) -> Self {
        Self {
            cn: cn.to_string(),
            profile_name: profile_name.to_string(),
        }
    }
}

/// Lock order: identity first, then CA.
#[derive(Debug, Default)]
pub struct PkiLocks {
    identities: KeyedLocks<IdentityKey>,
    cas: KeyedLocks<i32>,
}

impl PkiLocks {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn identity(&self, cn: &str, profile_name: &str) -> OwnedMutexGuard<()> {
        self.identities.lock(IdentityKey::new(cn, profile_name)).await
    }

    pub async fn ca(&self, ca_id: i32) -> OwnedMutexGuard<()> {
        self.cas.lock(ca_id).await
    }
}
