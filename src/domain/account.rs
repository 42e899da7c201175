use serde::{Deserialize, Serialize};

use crate::domain::email::AccountId;

/// A connected Gmail account as reported by `GET /auth/accounts`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    #[serde(rename = "uid")]
    pub id: AccountId,
    #[serde(rename = "email")]
    pub display_label: Option<String>,
}

impl Account {
    pub fn label(&self) -> &str {
        self.display_label.as_deref().unwrap_or(&self.id)
    }
}

/// What the client currently knows about the backend session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthState {
    /// Accounts have not been fetched yet.
    #[default]
    Loading,
    /// At least one account is connected.
    Authenticated,
    /// The backend reported no accounts or rejected the session.
    Unauthenticated,
}

impl AuthState {
    pub fn may_have_accounts(self) -> bool {
        !matches!(self, AuthState::Unauthenticated)
    }
}
