use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tracing::debug;

use crate::credential::Credential;
use crate::error::GssAuthError;
use crate::mechanism::Service;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CredKey {
    uid: u32,
    principal: Option<String>,
    service: Service,
}

#[derive(Debug)]
struct Entry {
    cred: Arc<Credential>,
    inserted_at: Instant,
}

/// Per-[`crate::auth::Auth`] hash table of [`Credential`]s, with
/// lookup-or-create semantics and caller-driven age-based eviction.
#[derive(Debug)]
pub struct CredentialCache {
    entries: Mutex<HashMap<CredKey, Entry>>,
}

impl Default for CredentialCache {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialCache {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Look up a credential for (uid, principal, service), creating one in
    /// state NEW if absent.
    pub fn lookup_or_create(
        &self,
        uid: u32,
        principal: Option<&str>,
        service: Service,
    ) -> Result<Arc<Credential>, GssAuthError> {
        let key = CredKey {
            uid,
            principal: principal.map(str::to_string),
            service,
        };
        let mut entries = self.entries.lock()?;
        if let Some(entry) = entries.get(&key) {
            return Ok(entry.cred.clone());
        }
        let cred = Arc::new(Credential::new(uid, principal.map(str::to_string), service));
        entries.insert(
            key,
            Entry {
                cred: cred.clone(),
                inserted_at: Instant::now(),
            },
        );
        debug!(uid, "inserted new credential into cache");
        Ok(cred)
    }

    /// Remove every entry older than `max_age` with no other outstanding
    /// references, invoking `on_evict` before dropping each.
    pub fn evict_older_than(
        &self,
        max_age: std::time::Duration,
        mut on_evict: impl FnMut(&Arc<Credential>),
    ) -> Result<usize, GssAuthError> {
        let mut entries = self.entries.lock()?;
        let mut evicted = 0;
        entries.retain(|_, entry| {
            let expired = entry.inserted_at.elapsed() >= max_age;
            let sole_owner = Arc::strong_count(&entry.cred) == 1;
            if expired && sole_owner {
                on_evict(&entry.cred);
                evicted += 1;
                false
            } else {
                true
            }
        });
        Ok(evicted)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_or_create_returns_same_credential_for_same_key() {
        let cache = CredentialCache::new();
        let a = cache.lookup_or_create(1000, Some("alice"), Service::Integrity).unwrap();
        let b = cache.lookup_or_create(1000, Some("alice"), Service::Integrity).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn distinct_principals_get_distinct_credentials() {
        let cache = CredentialCache::new();
        let a = cache.lookup_or_create(1000, Some("alice"), Service::Integrity).unwrap();
        let b = cache.lookup_or_create(1000, Some("bob"), Service::Integrity).unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn eviction_skips_entries_with_outstanding_references() {
        let cache = CredentialCache::new();
        let held = cache.lookup_or_create(1, None, Service::None).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let evicted = cache
            .evict_older_than(std::time::Duration::from_millis(1), |_| {})
            .unwrap();
        assert_eq!(evicted, 0, "sole strong reference is still held by `held`");
        drop(held);
        let evicted = cache
            .evict_older_than(std::time::Duration::from_millis(1), |_| {})
            .unwrap();
        assert_eq!(evicted, 1);
        assert!(cache.is_empty());
    }
}
