use anyhow::Result;
use log::warn;
use notify_rust::{Hint, Notification};

use crate::notify::{Toast, ToastKind};

const APP_NAME: &str = "mail_sorter";

/// Desktop notifications for live arrivals. Best effort: a missing
/// notification daemon is logged and otherwise ignored.
pub struct Notifier {
    enabled: bool,
}

impl Notifier {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    pub fn notify_toast(&self, toast: &Toast) -> Result<()> {
        if !self.enabled || toast.kind != ToastKind::Arrival {
            return Ok(());
        }

        let mut n = Notification::new();
        n.appname(APP_NAME)
            .summary("New email")
            .body(&toast.text)
            .icon("mail-unread")
            .hint(Hint::Category("email.arrived".to_string()));

        if let Err(e) = n.show() {
            warn!("Notification error: {e}");
        }
        Ok(())
    }
}
