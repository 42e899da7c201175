use std::collections::{BTreeMap, BTreeSet};

use crate::domain::email::{AccountId, EmailId, category_key};

/// account → category → unread ids. Empty leaves and empty accounts are
/// pruned, so a key exists only while it has something unread.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct UnreadTracker {
    index: BTreeMap<AccountId, BTreeMap<String, BTreeSet<EmailId>>>,
}

impl UnreadTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// `category` is the raw email category; `"none"` maps to the
    /// `"Uncategorized"` key.
    pub fn mark_unread(&mut self, account_id: &str, category: &str, id: &str) {
        self.index
            .entry(account_id.to_string())
            .or_default()
            .entry(category_key(category).to_string())
            .or_default()
            .insert(id.to_string());
    }

    /// Idempotent; returns how many ids were actually unread.
    pub fn mark_read<I, S>(&mut self, account_id: &str, category: &str, email_ids: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let key = category_key(category);
        let Some(categories) = self.index.get_mut(account_id) else {
            return 0;
        };
        let Some(leaf) = categories.get_mut(key) else {
            return 0;
        };

        let mut removed = 0;
        for id in email_ids {
            if leaf.remove(id.as_ref()) {
                removed += 1;
            }
        }

        if leaf.is_empty() {
            categories.remove(key);
        }
        if categories.is_empty() {
            self.index.remove(account_id);
        }
        removed
    }

    /// Drops the ids wherever they appear.
    pub fn remove_ids<'a, I>(&mut self, ids: I)
    where
        I: IntoIterator<Item = &'a EmailId>,
    {
        let ids: BTreeSet<&EmailId> = ids.into_iter().collect();
        if ids.is_empty() {
            return;
        }
        self.index.retain(|_, categories| {
            categories.retain(|_, leaf| {
                leaf.retain(|id| !ids.contains(id));
                !leaf.is_empty()
            });
            !categories.is_empty()
        });
    }

    /// Moves an unread id to another category after recategorization.
    pub fn move_category(&mut self, account_id: &str, id: &str, from: &str, to: &str) {
        if category_key(from) == category_key(to) {
            return;
        }
        if self.mark_read(account_id, from, [id]) > 0 {
            self.mark_unread(account_id, to, id);
        }
    }

    pub fn remove_account(&mut self, account_id: &str) {
        self.index.remove(account_id);
    }

    pub fn clear(&mut self) {
        self.index.clear();
    }

    pub fn count_for(&self, account_id: &str, category: &str) -> usize {
        self.index
            .get(account_id)
            .and_then(|c| c.get(category_key(category)))
            .map_or(0, BTreeSet::len)
    }

    pub fn count_for_account(&self, account_id: &str) -> usize {
        self.index
            .get(account_id)
            .map_or(0, |c| c.values().map(BTreeSet::len).sum())
    }

    pub fn has_account(&self, account_id: &str) -> bool {
        self.index.contains_key(account_id)
    }

    pub fn has_category(&self, account_id: &str, category: &str) -> bool {
        self.index
            .get(account_id)
            .is_some_and(|c| c.contains_key(category_key(category)))
    }

    /// Every unread id, for invariant checks.
    pub fn ids(&self) -> impl Iterator<Item = &EmailId> {
        self.index
            .values()
            .flat_map(|c| c.values())
            .flat_map(|leaf| leaf.iter())
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}
