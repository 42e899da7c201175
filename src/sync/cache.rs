use log::{debug, warn};
use std::collections::{BTreeMap, HashSet};

use crate::domain::email::{AccountId, EmailId, EmailSummary};
use crate::store::CacheStore;

/// Storage key the account → emails mirror lives under.
pub const CACHE_KEY: &str = "byAccount";

pub type ByAccount = BTreeMap<AccountId, Vec<EmailSummary>>;

/// Emails grouped by account, newest first, mirrored to a [`CacheStore`]
/// after every mutation.
pub struct LocalCache {
    by_account: ByAccount,
    store: Box<dyn CacheStore>,
}

impl LocalCache {
    pub fn new(store: Box<dyn CacheStore>) -> Self {
        Self {
            by_account: ByAccount::new(),
            store,
        }
    }

    /// Builds the cache from whatever the store holds. Missing or corrupt data
    /// yields an empty cache.
    pub fn rehydrate(store: Box<dyn CacheStore>) -> Self {
        let by_account = match store.get(CACHE_KEY) {
            Ok(Some(raw)) => match serde_json::from_str::<ByAccount>(&raw) {
                Ok(mut map) => {
                    for list in map.values_mut() {
                        dedup_in_place(list);
                    }
                    map
                }
                Err(e) => {
                    warn!("discarding corrupt email cache: {e}");
                    ByAccount::new()
                }
            },
            Ok(None) => ByAccount::new(),
            Err(e) => {
                warn!("could not read email cache: {e}");
                ByAccount::new()
            }
        };
        debug!(
            "rehydrated {} emails across {} accounts",
            by_account.values().map(Vec::len).sum::<usize>(),
            by_account.len()
        );
        Self { by_account, store }
    }

    /// Inserts at the front of the account's list. An email whose id is
    /// already cached is left untouched; returns whether it was inserted.
    pub fn upsert(&mut self, email: EmailSummary) -> bool {
        if self.contains(&email.id) {
            debug!("dropping duplicate delivery of {}", email.id);
            return false;
        }
        self.by_account
            .entry(email.account_id.clone())
            .or_default()
            .insert(0, email);
        self.flush();
        true
    }

    /// Removes the ids from every account; returns how many entries went away.
    pub fn remove_many(&mut self, ids: &HashSet<EmailId>) -> usize {
        if ids.is_empty() {
            return 0;
        }
        let mut removed = 0;
        for list in self.by_account.values_mut() {
            let before = list.len();
            list.retain(|e| !ids.contains(&e.id));
            removed += before - list.len();
        }
        if removed > 0 {
            self.flush();
        }
        removed
    }

    /// Rewrites the category of a cached email. Returns the previous category,
    /// or `None` when the id is not cached.
    pub fn update_category(&mut self, id: &str, new_category: &str) -> Option<String> {
        let email = self
            .by_account
            .values_mut()
            .flat_map(|list| list.iter_mut())
            .find(|e| e.id == id)?;
        let previous = std::mem::replace(&mut email.category, new_category.to_string());
        self.flush();
        Some(previous)
    }

    pub fn ensure_account_present(&mut self, account_id: &str) {
        if self.by_account.contains_key(account_id) {
            return;
        }
        self.by_account.insert(account_id.to_string(), Vec::new());
        self.flush();
    }

    /// Drops an account's list and returns the ids it held.
    pub fn remove_account(&mut self, account_id: &str) -> Vec<EmailId> {
        let Some(list) = self.by_account.remove(account_id) else {
            return Vec::new();
        };
        self.flush();
        list.into_iter().map(|e| e.id).collect()
    }

    /// Empties the cache and deletes the persisted mirror.
    pub fn clear(&mut self) {
        self.by_account.clear();
        if let Err(e) = self.store.remove(CACHE_KEY) {
            warn!("could not clear persisted email cache: {e}");
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    pub fn get(&self, id: &str) -> Option<&EmailSummary> {
        self.by_account
            .values()
            .flat_map(|list| list.iter())
            .find(|e| e.id == id)
    }

    pub fn emails_for(&self, account_id: &str) -> &[EmailSummary] {
        self.by_account
            .get(account_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn ids_for(&self, account_id: &str) -> Vec<EmailId> {
        self.emails_for(account_id)
            .iter()
            .map(|e| e.id.clone())
            .collect()
    }

    pub fn accounts(&self) -> impl Iterator<Item = &AccountId> {
        self.by_account.keys()
    }

    pub fn by_account(&self) -> &ByAccount {
        &self.by_account
    }

    pub fn len(&self) -> usize {
        self.by_account.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn flush(&self) {
        let raw = match serde_json::to_string(&self.by_account) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("could not serialize email cache: {e}");
                return;
            }
        };
        if let Err(e) = self.store.set(CACHE_KEY, &raw) {
            warn!("could not persist email cache: {e}");
        }
    }
}

fn dedup_in_place(list: &mut Vec<EmailSummary>) {
    let mut seen = HashSet::new();
    list.retain(|e| seen.insert(e.id.clone()));
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use chrono::{TimeZone, Utc};
    use std::rc::Rc;

    pub(crate) fn email(account: &str, id: &str, category: &str) -> EmailSummary {
        EmailSummary {
            id: id.to_string(),
            account_id: account.to_string(),
            subject: format!("subject {id}"),
            body_html: String::new(),
            summary: None,
            received_at: Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).single(),
            category: category.to_string(),
        }
    }

    fn ids(list: &[&str]) -> HashSet<EmailId> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn duplicate_upsert_keeps_first_write() {
        let mut cache = LocalCache::new(Box::new(MemoryStore::new()));
        let first = email("u1", "e1", "Work");
        let mut second = email("u1", "e1", "Promotions");
        second.subject = "changed".into();

        assert!(cache.upsert(first.clone()));
        assert!(!cache.upsert(second));

        assert_eq!(cache.emails_for("u1"), &[first]);
    }

    #[test]
    fn same_id_under_other_account_is_also_suppressed() {
        let mut cache = LocalCache::new(Box::new(MemoryStore::new()));
        cache.upsert(email("u1", "e1", "Work"));
        assert!(!cache.upsert(email("u2", "e1", "Work")));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn newest_first() {
        let mut cache = LocalCache::new(Box::new(MemoryStore::new()));
        cache.upsert(email("u1", "e1", "none"));
        cache.upsert(email("u1", "e2", "none"));
        assert_eq!(cache.ids_for("u1"), vec!["e2", "e1"]);
    }

    #[test]
    fn remove_many_spans_accounts() {
        let mut cache = LocalCache::new(Box::new(MemoryStore::new()));
        cache.upsert(email("u1", "a", "none"));
        cache.upsert(email("u2", "b", "none"));
        cache.upsert(email("u2", "c", "none"));

        assert_eq!(cache.remove_many(&ids(&["a", "b", "zz"])), 2);
        assert!(!cache.contains("a"));
        assert!(!cache.contains("b"));
        assert!(cache.contains("c"));
        // account keys stay so empty accounts still render
        assert!(cache.emails_for("u1").is_empty());
        assert_eq!(cache.accounts().count(), 2);
    }

    #[test]
    fn update_category_is_noop_for_unknown_id() {
        let mut cache = LocalCache::new(Box::new(MemoryStore::new()));
        cache.upsert(email("u1", "e1", "none"));
        assert_eq!(cache.update_category("nope", "Work"), None);
        assert_eq!(
            cache.update_category("e1", "Work").as_deref(),
            Some("none")
        );
        assert_eq!(cache.get("e1").unwrap().category, "Work");
    }

    #[test]
    fn ensure_account_present_creates_empty_list() {
        let mut cache = LocalCache::new(Box::new(MemoryStore::new()));
        cache.ensure_account_present("u9");
        assert_eq!(cache.accounts().collect::<Vec<_>>(), vec!["u9"]);
        assert!(cache.is_empty());
    }

    #[test]
    fn mutations_are_written_through_and_rehydrated() {
        let store = Rc::new(MemoryStore::new());
        {
            let mut cache = LocalCache::new(Box::new(store.clone()));
            cache.upsert(email("u1", "e1", "Work"));
            cache.upsert(email("u1", "e2", "none"));
            cache.remove_many(&ids(&["e2"]));
        }

        let cache = LocalCache::rehydrate(Box::new(store));
        assert_eq!(cache.ids_for("u1"), vec!["e1"]);
        assert_eq!(cache.get("e1").unwrap().category, "Work");
    }

    #[test]
    fn corrupt_mirror_rehydrates_empty() {
        let store = MemoryStore::new();
        store.set(CACHE_KEY, "{not json").unwrap();
        let cache = LocalCache::rehydrate(Box::new(store));
        assert!(cache.is_empty());
    }

    #[test]
    fn clear_removes_persisted_mirror() {
        let store = Rc::new(MemoryStore::new());
        let mut cache = LocalCache::new(Box::new(store.clone()));
        cache.upsert(email("u1", "e1", "none"));
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(store.get(CACHE_KEY).unwrap(), None);
    }
}
