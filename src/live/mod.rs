pub mod socket;

use log::{debug, info};
use std::time::{Duration, Instant};

use crate::domain::account::AuthState;

pub use socket::{ChannelEvent, LiveSocket};

/// Explicit client-side close.
pub const CLOSE_NORMAL: u16 = 1000;
/// Reported when the connection drops without a close frame.
pub const CLOSE_ABNORMAL: u16 = 1006;
pub const CLOSE_POLICY_VIOLATION: u16 = 1008;
/// HTTP 401/403 lifted into the application close-code range.
pub const CLOSE_UNAUTHORIZED: u16 = 4401;
pub const CLOSE_FORBIDDEN: u16 = 4403;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseKind {
    Normal,
    Unauthorized,
    /// Anything else: network loss, server restart, ...
    Transient,
}

impl CloseKind {
    pub fn from_code(code: u16) -> Self {
        match code {
            CLOSE_NORMAL => CloseKind::Normal,
            CLOSE_POLICY_VIOLATION | CLOSE_UNAUTHORIZED | CLOSE_FORBIDDEN => {
                CloseKind::Unauthorized
            }
            _ => CloseKind::Transient,
        }
    }
}

/// Delay before the single reconnect attempt that follows a transient close.
/// Fixed by default; with `max_delay` set it doubles per consecutive failure
/// up to that cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub max_delay: Option<Duration>,
}

impl ReconnectPolicy {
    pub fn fixed(delay: Duration) -> Self {
        Self {
            base_delay: delay,
            max_delay: None,
        }
    }

    pub fn capped_exponential(base: Duration, max: Duration) -> Self {
        Self {
            base_delay: base,
            max_delay: Some(max.max(base)),
        }
    }

    /// `attempt` counts consecutive failed connections, starting at 1.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let Some(max) = self.max_delay else {
            return self.base_delay;
        };
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(factor).min(max)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::fixed(Duration::from_secs(3))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Disconnected,
    Connecting { generation: u64 },
    Connected { generation: u64 },
    RetryScheduled { at: Instant },
    /// Closed normally or for lack of authorization; no retries until
    /// [`LiveChannel::resume`].
    Stopped,
}

/// Connection lifecycle of the push channel. Owns no socket; the event loop
/// asks it what to do and reports back what happened. Every connection gets a
/// generation number so events from a superseded socket are ignored.
#[derive(Debug)]
pub struct LiveChannel {
    state: ChannelState,
    policy: ReconnectPolicy,
    failures: u32,
    generation: u64,
}

impl LiveChannel {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            state: ChannelState::Disconnected,
            policy,
            failures: 0,
            generation: 0,
        }
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        matches!(
            self.state,
            ChannelState::Connecting { .. } | ChannelState::Connected { .. }
        )
    }

    /// Starts a connection attempt if none is open or pending and the session
    /// may have accounts. Returns the generation the new socket must tag its
    /// events with.
    pub fn begin_connect(&mut self, auth: AuthState) -> Option<u64> {
        if !auth.may_have_accounts() {
            return None;
        }
        match self.state {
            ChannelState::Disconnected => {}
            _ => return None,
        }
        self.generation += 1;
        self.state = ChannelState::Connecting {
            generation: self.generation,
        };
        debug!("live channel connecting (generation {})", self.generation);
        Some(self.generation)
    }

    pub fn is_current(&self, generation: u64) -> bool {
        match self.state {
            ChannelState::Connecting { generation: g } | ChannelState::Connected { generation: g } => {
                g == generation
            }
            _ => false,
        }
    }

    pub fn on_open(&mut self, generation: u64) {
        if !self.is_current(generation) {
            return;
        }
        info!("live channel connected");
        self.failures = 0;
        self.state = ChannelState::Connected { generation };
    }

    /// Handles a close (or failed connect) of the current socket. Returns the
    /// instant of the reconnect attempt if one was scheduled.
    pub fn on_close(
        &mut self,
        generation: u64,
        code: u16,
        auth: AuthState,
        now: Instant,
    ) -> Option<Instant> {
        if !self.is_current(generation) {
            debug!("ignoring close {code} from stale generation {generation}");
            return None;
        }
        match CloseKind::from_code(code) {
            CloseKind::Normal | CloseKind::Unauthorized => {
                info!("live channel closed ({code}); not reconnecting");
                self.state = ChannelState::Stopped;
                None
            }
            CloseKind::Transient if !auth.may_have_accounts() => {
                info!("live channel closed ({code}); session has no accounts");
                self.state = ChannelState::Disconnected;
                None
            }
            CloseKind::Transient => {
                self.failures = self.failures.saturating_add(1);
                let at = now + self.policy.delay_for(self.failures);
                info!(
                    "live channel closed ({code}); retrying in {:?}",
                    at - now
                );
                self.state = ChannelState::RetryScheduled { at };
                Some(at)
            }
        }
    }

    /// Whether the scheduled retry has come due; moves back to
    /// `Disconnected` so the next [`LiveChannel::begin_connect`] proceeds.
    pub fn retry_due(&mut self, now: Instant) -> bool {
        match self.state {
            ChannelState::RetryScheduled { at } if now >= at => {
                self.state = ChannelState::Disconnected;
                true
            }
            _ => false,
        }
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        match self.state {
            ChannelState::RetryScheduled { at } => Some(at),
            _ => None,
        }
    }

    /// Teardown: forgets the open socket and cancels any pending retry.
    /// Returns whether a socket was open and must be closed by the caller.
    pub fn shutdown(&mut self) -> bool {
        let was_open = self.is_open();
        self.state = ChannelState::Stopped;
        was_open
    }

    /// Leaves `Stopped` after a fresh login.
    pub fn resume(&mut self) {
        if self.state == ChannelState::Stopped {
            self.failures = 0;
            self.state = ChannelState::Disconnected;
        }
    }
}
