pub mod notifier;

use anyhow::{Result, anyhow};
use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::{Duration, Instant};
use url::Url;

use crate::daemon::notifier::Notifier;
use crate::dashboard::Dashboard;
use crate::domain::account::AuthState;
use crate::live::{CLOSE_ABNORMAL, ChannelEvent, ChannelState, LiveSocket};
use crate::notify::ToastKind;

/// Upper bound on one wait, so Ctrl-C is noticed promptly.
const TICK: Duration = Duration::from_millis(500);

pub struct WatchConfig {
    pub ws_url: Url,
    /// Sent with the websocket handshake; carries the session.
    pub cookie_header: Option<String>,
    pub desktop_notifications: bool,
}

/// The `watch` event loop. The dashboard is only touched from this thread;
/// socket readers forward frames over a channel, tagged with the generation
/// of the connection they belong to.
pub fn run_daemon(dashboard: &mut Dashboard, cfg: WatchConfig) -> Result<()> {
    let running = Arc::new(AtomicBool::new(true));
    let r2 = running.clone();
    ctrlc::set_handler(move || {
        r2.store(false, Ordering::SeqCst);
    })?;

    let notifier = Notifier::new(cfg.desktop_notifications);
    let (tx, rx) = mpsc::channel::<ChannelEvent>();
    let mut socket: Option<LiveSocket> = None;

    let outcome = loop {
        if !running.load(Ordering::SeqCst) {
            break Ok(());
        }

        if let Some(generation) = dashboard.channel_connect() {
            match LiveSocket::spawn(
                &cfg.ws_url,
                cfg.cookie_header.as_deref(),
                generation,
                tx.clone(),
            ) {
                Ok(s) => {
                    if let Some(old) = socket.replace(s) {
                        old.close();
                    }
                }
                Err(e) => {
                    warn!("could not start live channel: {e}");
                    dashboard.channel_closed(generation, CLOSE_ABNORMAL, Instant::now());
                }
            }
        }

        let now = Instant::now();
        let wait = dashboard
            .next_deadline()
            .map_or(TICK, |d| d.saturating_duration_since(now).min(TICK));
        match rx.recv_timeout(wait) {
            Ok(event) => dispatch(dashboard, event),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break Err(anyhow!("event channel closed")),
        }

        let now = Instant::now();
        if dashboard.channel_retry_due(now) {
            debug!("reconnect attempt due");
        }
        if !dashboard.channel_is_open()
            && let Some(s) = socket.take()
        {
            s.close();
        }

        for toast in dashboard.toasts_mut().drain_new() {
            match toast.kind {
                ToastKind::Error => eprintln!("! {}", toast.text),
                _ => eprintln!("{}", toast.text),
            }
            notifier.notify_toast(&toast)?;
        }
        dashboard.toasts_mut().expire(now);

        if dashboard.auth() == AuthState::Unauthenticated {
            break Err(anyhow!("Not logged in; run `mail_sorter login` and try again"));
        }
        if dashboard.channel_state() == ChannelState::Stopped {
            break Err(anyhow!("Live channel was closed by the server"));
        }
    };

    dashboard.channel_shutdown();
    if let Some(s) = socket {
        s.close_and_wait();
    }
    info!("watch stopped");
    outcome
}

fn dispatch(dashboard: &mut Dashboard, event: ChannelEvent) {
    match event {
        ChannelEvent::Opened { generation } => dashboard.channel_opened(generation),
        ChannelEvent::Message { generation, text } => {
            dashboard.channel_message(generation, &text);
        }
        ChannelEvent::Closed { generation, code } => {
            dashboard.channel_closed(generation, code, Instant::now());
        }
    }
}
