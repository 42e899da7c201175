use std::collections::VecDeque;
use std::time::{Duration, Instant};

pub const DEFAULT_TOAST_TTL: Duration = Duration::from_secs(4);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToastKind {
    Info,
    /// A live-channel arrival; desktop notifications are raised for these.
    Arrival,
    Error,
}

#[derive(Debug, Clone)]
pub struct Toast {
    pub id: u64,
    pub kind: ToastKind,
    pub text: String,
    pub expires_at: Instant,
}

/// Transient user-visible messages. Each one removes itself once its TTL has
/// elapsed; callers pass the clock in so expiry is deterministic.
#[derive(Debug)]
pub struct ToastQueue {
    ttl: Duration,
    next_id: u64,
    toasts: VecDeque<Toast>,
    /// Id of the first toast not yet handed to [`ToastQueue::drain_new`].
    unseen_from: u64,
}

impl ToastQueue {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            next_id: 0,
            toasts: VecDeque::new(),
            unseen_from: 0,
        }
    }

    pub fn push(&mut self, kind: ToastKind, text: impl Into<String>, now: Instant) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.toasts.push_back(Toast {
            id,
            kind,
            text: text.into(),
            expires_at: now + self.ttl,
        });
        id
    }

    pub fn info(&mut self, text: impl Into<String>, now: Instant) -> u64 {
        self.push(ToastKind::Info, text, now)
    }

    pub fn error(&mut self, text: impl Into<String>, now: Instant) -> u64 {
        self.push(ToastKind::Error, text, now)
    }

    pub fn dismiss(&mut self, id: u64) {
        self.toasts.retain(|t| t.id != id);
    }

    /// Drops every toast whose TTL has run out; returns how many went away.
    pub fn expire(&mut self, now: Instant) -> usize {
        let before = self.toasts.len();
        self.toasts.retain(|t| t.expires_at > now);
        before - self.toasts.len()
    }

    /// Toasts pushed since the previous call, oldest first.
    pub fn drain_new(&mut self) -> Vec<Toast> {
        let from = self.unseen_from;
        self.unseen_from = self.next_id;
        self.toasts.iter().filter(|t| t.id >= from).cloned().collect()
    }

    /// Earliest expiry, for sizing the event loop's wait.
    pub fn next_expiry(&self) -> Option<Instant> {
        self.toasts.iter().map(|t| t.expires_at).min()
    }

    pub fn texts(&self) -> Vec<&str> {
        self.toasts.iter().map(|t| t.text.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.toasts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.toasts.is_empty()
    }
}

impl Default for ToastQueue {
    fn default() -> Self {
        Self::new(DEFAULT_TOAST_TTL)
    }
}
