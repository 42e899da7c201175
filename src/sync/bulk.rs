use log::debug;
use std::collections::HashSet;
use std::fmt;
use thiserror::Error;

use crate::api::{ApiError, DeleteResponse, UnsubscribeFailure, UnsubscribeResponse};
use crate::domain::email::EmailId;
use crate::sync::cache::LocalCache;
use crate::sync::selection::SelectionTracker;
use crate::sync::unread::UnreadTracker;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BulkAction {
    Delete,
    Unsubscribe,
}

impl fmt::Display for BulkAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BulkAction::Delete => f.write_str("delete"),
            BulkAction::Unsubscribe => f.write_str("unsubscribe"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BulkState {
    #[default]
    Idle,
    Submitting,
    Reconciling,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Select at least one email.")]
    EmptySelection,
    #[error("A bulk action is already running.")]
    AlreadyRunning,
}

#[derive(Debug)]
pub enum BulkResponse {
    Delete(DeleteResponse),
    Unsubscribe(UnsubscribeResponse),
}

/// How one bulk invocation ended.
#[derive(Debug)]
pub enum BulkOutcome {
    /// Precondition failed; nothing was sent.
    Rejected(ValidationError),
    /// The whole batch failed; selection is untouched.
    Failed(ApiError),
    Deleted {
        removed: Vec<EmailId>,
        failures: usize,
    },
    Unsubscribed {
        succeeded: Vec<EmailId>,
        failures: Vec<UnsubscribeFailure>,
    },
}

/// The trackers a reconciliation writes to, borrowed together.
pub struct Tracked<'a> {
    pub cache: &'a mut LocalCache,
    pub selection: &'a mut SelectionTracker,
    pub unread: &'a mut UnreadTracker,
    pub unsubscribed: &'a mut HashSet<EmailId>,
}

/// Result of reconciling a processed batch: the outcome plus the messages to
/// show, in order.
#[derive(Debug)]
pub struct Reconciliation {
    pub outcome: BulkOutcome,
    pub messages: Vec<String>,
}

/// Drives `Idle → Submitting → Reconciling → Idle` for one batch at a time.
#[derive(Debug, Default)]
pub struct BulkCoordinator {
    state: BulkState,
    keep_failed_selection: bool,
    submitted: Vec<EmailId>,
}

impl BulkCoordinator {
    /// With `keep_failed_selection`, ids that failed stay selected after a
    /// mixed-result batch; otherwise the selection is always cleared.
    pub fn new(keep_failed_selection: bool) -> Self {
        Self {
            keep_failed_selection,
            ..Self::default()
        }
    }

    pub fn state(&self) -> BulkState {
        self.state
    }

    /// Checks preconditions and snapshots the selection. The returned ids
    /// are what gets sent and what reconciliation works against.
    pub fn begin(&mut self, selection: &SelectionTracker) -> Result<Vec<EmailId>, ValidationError> {
        if self.state != BulkState::Idle {
            return Err(ValidationError::AlreadyRunning);
        }
        if selection.is_empty() {
            return Err(ValidationError::EmptySelection);
        }
        self.submitted = selection.snapshot();
        self.state = BulkState::Submitting;
        debug!("bulk batch of {} submitted", self.submitted.len());
        Ok(self.submitted.clone())
    }

    /// The request failed as a whole; back to idle without touching state.
    pub fn abort(&mut self) {
        self.submitted.clear();
        self.state = BulkState::Idle;
    }

    pub fn reconcile(&mut self, response: BulkResponse, tracked: Tracked<'_>) -> Reconciliation {
        let Tracked {
            cache,
            selection,
            unread,
            unsubscribed,
        } = tracked;
        self.state = BulkState::Reconciling;
        let submitted: HashSet<EmailId> = std::mem::take(&mut self.submitted).into_iter().collect();
        let mut messages = Vec::new();

        let (outcome, failed_ids) = match response {
            BulkResponse::Unsubscribe(resp) => {
                // one message per failure, unlike delete
                for f in &resp.failures {
                    messages.push(format!("\"{}\": {}", f.display_name(), f.error));
                }
                // the emails stay cached; the marker only annotates them
                let succeeded: Vec<EmailId> = resp
                    .success_ids
                    .into_iter()
                    .filter(|id| submitted.contains(id) && cache.contains(id))
                    .collect();
                if !succeeded.is_empty() {
                    messages.push(format!("Unsubscribed from {} emails.", succeeded.len()));
                }
                unsubscribed.extend(succeeded.iter().cloned());
                let failed_ids: Vec<EmailId> = resp.failures.iter().map(|f| f.id.clone()).collect();
                (
                    BulkOutcome::Unsubscribed {
                        succeeded,
                        failures: resp.failures,
                    },
                    failed_ids,
                )
            }
            BulkResponse::Delete(resp) => {
                let failed_ids = resp.failed_ids();
                let failures = resp.failures.len();
                // ids the batch never named are not ours to drop
                let removed: Vec<EmailId> = resp
                    .successes
                    .into_iter()
                    .filter(|id| submitted.contains(id))
                    .collect();
                let gone: HashSet<EmailId> = removed.iter().cloned().collect();
                cache.remove_many(&gone);
                unread.remove_ids(&removed);
                for id in &removed {
                    unsubscribed.remove(id);
                }
                if !removed.is_empty() {
                    messages.push(format!("Deleted {} emails.", removed.len()));
                }
                if failures > 0 {
                    messages.push(format!("{failures} failures while deleting."));
                }
                (BulkOutcome::Deleted { removed, failures }, failed_ids)
            }
        };

        selection.clear();
        if self.keep_failed_selection {
            let keep = failed_ids
                .iter()
                .filter(|id| submitted.contains(*id) && cache.contains(id));
            selection.set_many(keep, true);
        }

        self.state = BulkState::Idle;
        Reconciliation { outcome, messages }
    }
}
