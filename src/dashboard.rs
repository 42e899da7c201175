use log::{debug, error, info, warn};
use std::collections::HashSet;
use std::time::{Duration, Instant};

use crate::api::{ApiError, FetchedAccount, SorterApi};
use crate::auth::guard;
use crate::domain::account::{Account, AuthState};
use crate::domain::category::{Category, CategoryDraft, CategoryId};
use crate::domain::email::{AccountId, EmailDetail, EmailId, EmailSummary, category_key};
use crate::live::{ChannelState, LiveChannel, ReconnectPolicy};
use crate::notify::toast::DEFAULT_TOAST_TTL;
use crate::notify::{ToastKind, ToastQueue};
use crate::store::CacheStore;
use crate::sync::bulk::{BulkResponse, Reconciliation, Tracked};
use crate::sync::{
    BulkAction, BulkCoordinator, BulkOutcome, BulkState, LocalCache, SelectionTracker,
    UnreadTracker,
};

pub const SESSION_EXPIRED: &str = "Your session has expired. Please log in again.";
pub const EMAIL_LOAD_FAILED: &str = "Error loading email.";

#[derive(Debug, Clone)]
pub struct DashboardOptions {
    pub toast_ttl: Duration,
    pub reconnect: ReconnectPolicy,
    pub keep_failed_selection: bool,
}

impl Default for DashboardOptions {
    fn default() -> Self {
        Self {
            toast_ttl: DEFAULT_TOAST_TTL,
            reconnect: ReconnectPolicy::default(),
            keep_failed_selection: false,
        }
    }
}

/// The email shown in the detail view.
#[derive(Debug, Clone, PartialEq)]
pub struct OpenedEmail {
    pub id: EmailId,
    pub account_id: Option<AccountId>,
    pub detail: Option<EmailDetail>,
}

/// All client state of one session, owned in one place. Every mutation goes
/// through a method here so the cache and the trackers change together, and
/// every backend call is passed through the session guard.
pub struct Dashboard {
    api: Box<dyn SorterApi>,
    cache: LocalCache,
    selection: SelectionTracker,
    unread: UnreadTracker,
    unsubscribed: HashSet<EmailId>,
    categories: Vec<Category>,
    accounts: Vec<Account>,
    auth: AuthState,
    opened: Option<OpenedEmail>,
    toasts: ToastQueue,
    bulk: BulkCoordinator,
    live: LiveChannel,
}

impl Dashboard {
    /// Rehydrates the cache from `store` before anything else runs, so the
    /// live channel only ever appends to what was already delivered.
    pub fn new(api: Box<dyn SorterApi>, store: Box<dyn CacheStore>, opts: DashboardOptions) -> Self {
        Self {
            api,
            cache: LocalCache::rehydrate(store),
            selection: SelectionTracker::new(),
            unread: UnreadTracker::new(),
            unsubscribed: HashSet::new(),
            categories: Vec::new(),
            accounts: Vec::new(),
            auth: AuthState::Loading,
            opened: None,
            toasts: ToastQueue::new(opts.toast_ttl),
            bulk: BulkCoordinator::new(opts.keep_failed_selection),
            live: LiveChannel::new(opts.reconnect),
        }
    }

    // ---- session guard ----

    fn guarded<T>(&mut self, result: Result<T, ApiError>) -> Result<T, ApiError> {
        let mut on_unauthorized = || self.handle_unauthorized();
        guard::intercept(result, Some(&mut on_unauthorized as &mut dyn FnMut()))
    }

    /// Reaction to a 401/403: wipe everything, stop the live channel, tell
    /// the user once.
    pub fn handle_unauthorized(&mut self) {
        self.reset_app_state();
        self.auth = AuthState::Unauthenticated;
        self.live.shutdown();
        self.toast(ToastKind::Error, SESSION_EXPIRED);
    }

    /// Clears accounts, emails, trackers, categories and the detail view, and
    /// deletes the persisted cache.
    pub fn reset_app_state(&mut self) {
        debug!("resetting client state");
        self.accounts.clear();
        self.cache.clear();
        self.selection.clear();
        self.unread.clear();
        self.unsubscribed.clear();
        self.categories.clear();
        self.opened = None;
    }

    /// Forgets one account and every email it owned.
    pub fn reset_account_state(&mut self, account_id: &str) {
        self.accounts.retain(|a| a.id != account_id);
        let ids = self.cache.remove_account(account_id);
        self.selection.remove_many(&ids);
        for id in &ids {
            self.unsubscribed.remove(id);
        }
        self.unread.remove_account(account_id);
        self.unread.remove_ids(&ids);

        let closes = self.opened.as_ref().is_some_and(|o| {
            o.account_id.as_deref() == Some(account_id) || ids.contains(&o.id)
        });
        if closes {
            self.opened = None;
        }
        debug!("purged {} emails of account {account_id}", ids.len());
    }

    // ---- accounts ----

    /// Fetches the connected accounts. An empty list, or a failed request,
    /// means there is no usable session and the state is reset.
    pub fn refresh_accounts(&mut self) -> Result<usize, ApiError> {
        self.auth = AuthState::Loading;
        let result = self.api.list_accounts();
        match self.guarded(result) {
            Ok(accounts) if !accounts.is_empty() => {
                for account in &accounts {
                    self.cache.ensure_account_present(&account.id);
                }
                info!("{} accounts connected", accounts.len());
                self.accounts = accounts;
                self.auth = AuthState::Authenticated;
                self.live.resume();
                Ok(self.accounts.len())
            }
            Ok(_) => {
                info!("no connected accounts");
                self.end_session();
                Ok(0)
            }
            Err(e) => {
                warn!("could not load accounts: {e}");
                self.end_session();
                Err(e)
            }
        }
    }

    pub fn disconnect_account(&mut self, account_id: &str) -> Result<(), ApiError> {
        let result = self.api.disconnect_account(account_id);
        if let Err(e) = self.guarded(result) {
            self.report(&e);
            return Err(e);
        }
        let label = self.account_label(account_id);
        self.reset_account_state(account_id);
        self.toast(ToastKind::Info, format!("Disconnected {label}."));
        if self.accounts.is_empty() {
            self.end_session();
        }
        Ok(())
    }

    /// Disconnects every account one by one. Returns `(succeeded, failed)`.
    pub fn disconnect_all(&mut self) -> (usize, usize) {
        let ids: Vec<AccountId> = self.accounts.iter().map(|a| a.id.clone()).collect();
        let (mut ok, mut failed) = (0, 0);
        for id in ids {
            let result = self.api.disconnect_account(&id);
            match self.guarded(result) {
                Ok(()) => {
                    self.reset_account_state(&id);
                    ok += 1;
                }
                Err(e) if e.is_unauthorized() => return (ok, failed + 1),
                Err(e) => {
                    warn!("failed to disconnect {id}: {e}");
                    failed += 1;
                }
            }
        }

        if ok == 0 && failed > 0 {
            self.toast(
                ToastKind::Error,
                "Failed to disconnect accounts. Please try again.",
            );
            return (ok, failed);
        }
        let mut text = format!("Successfully disconnected {ok} {}.", plural(ok, "account"));
        if failed > 0 {
            text.push_str(&format!(
                " Failed to disconnect {failed} {}.",
                plural(failed, "account")
            ));
        }
        self.toast(ToastKind::Info, text);
        if failed == 0 {
            self.end_session();
        }
        (ok, failed)
    }

    fn end_session(&mut self) {
        self.reset_app_state();
        self.auth = AuthState::Unauthenticated;
        self.live.shutdown();
    }

    fn account_label(&self, account_id: &str) -> String {
        self.accounts
            .iter()
            .find(|a| a.id == account_id)
            .map_or(account_id, Account::label)
            .to_string()
    }

    // ---- categories ----

    pub fn load_categories(&mut self) -> Result<usize, ApiError> {
        let result = self.api.list_categories();
        match self.guarded(result) {
            Ok(categories) => {
                self.categories = categories;
                Ok(self.categories.len())
            }
            Err(e) => {
                self.categories.clear();
                Err(e)
            }
        }
    }

    pub fn create_category(&mut self, draft: &CategoryDraft) -> Result<Category, ApiError> {
        let result = self.api.create_category(draft);
        match self.guarded(result) {
            Ok(category) => {
                self.categories.push(category.clone());
                Ok(category)
            }
            Err(e) => {
                if !e.is_unauthorized() {
                    self.toast(ToastKind::Error, format!("Could not add category. {e}"));
                }
                Err(e)
            }
        }
    }

    pub fn update_category(
        &mut self,
        id: CategoryId,
        draft: &CategoryDraft,
    ) -> Result<Category, ApiError> {
        let result = self.api.update_category(id, draft);
        let updated = self.guarded(result).inspect_err(|e| self.report(e))?;
        match self.categories.iter_mut().find(|c| c.id == id) {
            Some(slot) => *slot = updated.clone(),
            None => self.categories.push(updated.clone()),
        }
        Ok(updated)
    }

    pub fn delete_category(&mut self, id: CategoryId) -> Result<(), ApiError> {
        let result = self.api.delete_category(id);
        self.guarded(result).inspect_err(|e| self.report(e))?;
        self.categories.retain(|c| c.id != id);
        Ok(())
    }

    // ---- initial fetch ----

    /// Pulls the newest `limit` emails of every account into the cache.
    /// Cached ids keep their first-seen version and nothing is marked
    /// unread. Returns how many emails were new.
    pub fn initial_fetch(&mut self, limit: u32) -> Result<usize, ApiError> {
        let result = self.api.fetch_emails(limit);
        let fetched = self.guarded(result).inspect_err(|e| self.report(e))?;

        let mut emails = Vec::new();
        for account in fetched.accounts {
            let Some(account_id) = self.fetched_account_id(&account) else {
                warn!("skipping fetched emails without an account");
                continue;
            };
            self.cache.ensure_account_present(&account_id);
            emails.extend(account.into_summaries(&account_id));
        }

        // oldest first, so each list ends up newest-first
        emails.sort_by_key(|e| e.received_at);
        let total = emails.len();
        let added = emails
            .into_iter()
            .map(|e| self.cache.upsert(e))
            .filter(|added| *added)
            .count();
        info!("fetched {total} emails, {added} new");
        Ok(added)
    }

    /// The backend groups fetched emails by address; map that back to the
    /// account uid when the account list knows it.
    fn fetched_account_id(&self, account: &FetchedAccount) -> Option<AccountId> {
        if let Some(uid) = account.uid.as_deref().filter(|u| !u.is_empty()) {
            return Some(uid.to_string());
        }
        if account.email.is_empty() {
            return None;
        }
        let known = self
            .accounts
            .iter()
            .find(|a| a.display_label.as_deref() == Some(account.email.as_str()));
        Some(known.map_or_else(|| account.email.clone(), |a| a.id.clone()))
    }

    // ---- live channel ----

    /// Folds one push message into the cache and the unread index. Returns
    /// whether it added a new email.
    pub fn handle_push(&mut self, raw: &str) -> bool {
        let email: EmailSummary = match serde_json::from_str(raw) {
            Ok(email) => email,
            Err(e) => {
                warn!("discarding malformed push message: {e}");
                return false;
            }
        };
        if email.account_id.trim().is_empty() {
            debug!("discarding push for {} without an account", email.id);
            return false;
        }

        let (account, id) = (email.account_id.clone(), email.id.clone());
        let category = email.category.clone();
        if !self.cache.upsert(email) {
            return false;
        }
        self.unread.mark_unread(&account, &category, &id);

        let label = self.account_label(&account);
        self.toast(
            ToastKind::Arrival,
            format!("New email for {label} in {}.", category_key(&category)),
        );
        true
    }

    /// Starts a connection if the channel is idle and the session may have
    /// accounts; returns the generation to tag the new socket with.
    pub fn channel_connect(&mut self) -> Option<u64> {
        self.live.begin_connect(self.auth)
    }

    pub fn channel_opened(&mut self, generation: u64) {
        self.live.on_open(generation);
    }

    /// Returns when the reconnect attempt is due, if one was scheduled.
    pub fn channel_closed(&mut self, generation: u64, code: u16, now: Instant) -> Option<Instant> {
        self.live.on_close(generation, code, self.auth, now)
    }

    pub fn channel_message(&mut self, generation: u64, text: &str) -> bool {
        if !self.live.is_current(generation) {
            debug!("dropping message from stale generation {generation}");
            return false;
        }
        self.handle_push(text)
    }

    pub fn channel_retry_due(&mut self, now: Instant) -> bool {
        self.live.retry_due(now)
    }

    /// Teardown: returns whether a socket is open and must be closed.
    pub fn channel_shutdown(&mut self) -> bool {
        self.live.shutdown()
    }

    pub fn channel_state(&self) -> ChannelState {
        self.live.state()
    }

    pub fn channel_is_open(&self) -> bool {
        self.live.is_open()
    }

    /// Earliest timer the event loop has to wake up for.
    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.live.next_deadline(), self.toasts.next_expiry()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    // ---- unread ----

    /// The user looked at `category` of `account`: everything cached there is
    /// read now. Returns how many ids were unread.
    pub fn open_category(&mut self, account_id: &str, category: &str) -> usize {
        let key = category_key(category);
        let ids: Vec<EmailId> = self
            .cache
            .emails_for(account_id)
            .iter()
            .filter(|e| e.category_key() == key)
            .map(|e| e.id.clone())
            .collect();
        self.mark_read(account_id, category, &ids)
    }

    pub fn mark_read<S: AsRef<str>>(&mut self, account_id: &str, category: &str, ids: &[S]) -> usize {
        self.unread.mark_read(account_id, category, ids)
    }

    pub fn unread_count(&self, account_id: &str, category: &str) -> usize {
        self.unread.count_for(account_id, category)
    }

    pub fn unread_count_for_account(&self, account_id: &str) -> usize {
        self.unread.count_for_account(account_id)
    }

    // ---- selection ----

    /// Only cached emails can be selected; returns whether `id` is selected
    /// afterwards.
    pub fn toggle_selection(&mut self, id: &str) -> bool {
        if !self.cache.contains(id) {
            debug!("ignoring selection of unknown email {id}");
            return false;
        }
        self.selection.toggle(id)
    }

    pub fn select_all_for_account(&mut self, account_id: &str, select: bool) {
        let ids = self.cache.ids_for(account_id);
        self.selection.set_many(&ids, select);
    }

    pub fn clear_selection(&mut self) {
        self.selection.clear();
    }

    // ---- bulk actions ----

    /// Runs `action` on a snapshot of the selection and reconciles the result.
    pub fn apply_bulk(&mut self, action: BulkAction) -> BulkOutcome {
        let ids = match self.bulk.begin(&self.selection) {
            Ok(ids) => ids,
            Err(e) => {
                self.toast(ToastKind::Info, e.to_string());
                return BulkOutcome::Rejected(e);
            }
        };
        info!("{action} of {} emails", ids.len());

        let result = match action {
            BulkAction::Delete => self.api.delete_emails(&ids).map(BulkResponse::Delete),
            BulkAction::Unsubscribe => self
                .api
                .unsubscribe_emails(&ids)
                .map(BulkResponse::Unsubscribe),
        };
        let response = match self.guarded(result) {
            Ok(response) => response,
            Err(e) => {
                error!("{action} failed: {e}");
                self.bulk.abort();
                self.report(&e);
                return BulkOutcome::Failed(e);
            }
        };

        let Reconciliation { outcome, messages } = self.bulk.reconcile(
            response,
            Tracked {
                cache: &mut self.cache,
                selection: &mut self.selection,
                unread: &mut self.unread,
                unsubscribed: &mut self.unsubscribed,
            },
        );
        for text in messages {
            self.toast(ToastKind::Info, text);
        }
        if self
            .opened
            .as_ref()
            .is_some_and(|o| !self.cache.contains(&o.id))
        {
            self.opened = None;
        }
        outcome
    }

    pub fn bulk_state(&self) -> BulkState {
        self.bulk.state()
    }

    pub fn is_unsubscribed(&self, id: &str) -> bool {
        self.unsubscribed.contains(id)
    }

    // ---- detail view ----

    pub fn open_email(&mut self, id: &str) -> Option<&EmailDetail> {
        self.opened = Some(OpenedEmail {
            id: id.to_string(),
            account_id: self.cache.get(id).map(|e| e.account_id.clone()),
            detail: None,
        });
        let result = self.api.email_detail(id);
        match self.guarded(result) {
            Ok(detail) => {
                let opened = self.opened.as_mut()?;
                if opened.account_id.is_none() && !detail.account.is_empty() {
                    opened.account_id = Some(detail.account.clone());
                }
                opened.detail = Some(detail);
                opened.detail.as_ref()
            }
            Err(e) => {
                warn!("could not load email {id}: {e}");
                if !e.is_unauthorized() {
                    self.opened = None;
                    self.toast(ToastKind::Error, EMAIL_LOAD_FAILED);
                }
                None
            }
        }
    }

    pub fn close_email(&mut self) {
        self.opened = None;
    }

    /// Asks the backend to classify the email again. The cached category is
    /// rewritten in place and an unread marker follows it to the new key.
    pub fn recategorize(&mut self, id: &str) -> Result<String, ApiError> {
        let result = self.api.recategorize(id);
        let response = self.guarded(result).inspect_err(|e| self.report(e))?;
        let category = response.category;

        if let Some(previous) = self.cache.update_category(id, &category)
            && let Some(account) = self.cache.get(id).map(|e| e.account_id.clone())
        {
            self.unread.move_category(&account, id, &previous, &category);
        }
        if let Some(opened) = self.opened.as_mut().filter(|o| o.id == id) {
            opened.detail = Some(response.email);
        }
        Ok(category)
    }

    // ---- toasts ----

    fn toast(&mut self, kind: ToastKind, text: impl Into<String>) {
        self.toasts.push(kind, text, Instant::now());
    }

    /// Total failures are shown verbatim; authorization failures were
    /// already announced by the guard.
    fn report(&mut self, e: &ApiError) {
        if !e.is_unauthorized() {
            self.toast(ToastKind::Error, e.to_string());
        }
    }

    pub fn toasts(&self) -> &ToastQueue {
        &self.toasts
    }

    pub fn toasts_mut(&mut self) -> &mut ToastQueue {
        &mut self.toasts
    }

    // ---- read access ----

    pub fn auth(&self) -> AuthState {
        self.auth
    }

    pub fn accounts(&self) -> &[Account] {
        &self.accounts
    }

    pub fn categories(&self) -> &[Category] {
        &self.categories
    }

    pub fn cache(&self) -> &LocalCache {
        &self.cache
    }

    pub fn selection(&self) -> &SelectionTracker {
        &self.selection
    }

    pub fn unread(&self) -> &UnreadTracker {
        &self.unread
    }

    pub fn opened(&self) -> Option<&OpenedEmail> {
        self.opened.as_ref()
    }

    /// Tracked ids that no longer have an email in the cache. Always empty
    /// unless a purge was missed somewhere.
    pub fn dangling_ids(&self) -> Vec<EmailId> {
        let mut ids: Vec<EmailId> = self
            .selection
            .iter()
            .chain(self.unread.ids())
            .chain(self.unsubscribed.iter())
            .filter(|id| !self.cache.contains(id))
            .cloned()
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }
}

fn plural(n: usize, word: &str) -> String {
    if n == 1 {
        word.to_string()
    } else {
        format!("{word}s")
    }
}
