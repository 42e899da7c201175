use std::collections::HashSet;

use crate::domain::email::EmailId;

/// Ids the user has ticked, across every account and category.
#[derive(Debug, Default, Clone)]
pub struct SelectionTracker {
    selected: HashSet<EmailId>,
}

impl SelectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flips one id; returns whether it is selected afterwards.
    pub fn toggle(&mut self, id: &str) -> bool {
        if self.selected.remove(id) {
            false
        } else {
            self.selected.insert(id.to_string());
            true
        }
    }

    /// Adds or removes exactly the given ids.
    pub fn set_many<I, S>(&mut self, email_ids: I, select: bool)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for id in email_ids {
            let id = id.as_ref();
            if select {
                self.selected.insert(id.to_string());
            } else {
                self.selected.remove(id);
            }
        }
    }

    pub fn remove_many<'a, I>(&mut self, ids: I)
    where
        I: IntoIterator<Item = &'a EmailId>,
    {
        for id in ids {
            self.selected.remove(id);
        }
    }

    pub fn clear(&mut self) {
        self.selected.clear();
    }

    pub fn contains(&self, id: &str) -> bool {
        self.selected.contains(id)
    }

    /// Stable copy of the current selection, taken when a bulk action is
    /// submitted.
    pub fn snapshot(&self) -> Vec<EmailId> {
        let mut ids: Vec<_> = self.selected.iter().cloned().collect();
        ids.sort();
        ids
    }

    pub fn iter(&self) -> impl Iterator<Item = &EmailId> {
        self.selected.iter()
    }

    pub fn len(&self) -> usize {
        self.selected.len()
    }

    pub fn is_empty(&self) -> bool {
        self.selected.is_empty()
    }
}
