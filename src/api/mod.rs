pub mod http;
pub mod types;

use thiserror::Error;

use crate::domain::account::Account;
use crate::domain::category::{Category, CategoryDraft, CategoryId};
use crate::domain::email::{EmailDetail, EmailId};

pub use http::HttpBackend;
pub use types::{
    DeleteResponse, FetchResponse, FetchedAccount, FetchedCategory, FetchedEmail,
    RecategorizeResponse, UnsubscribeFailure, UnsubscribeResponse,
};

#[derive(Error, Debug)]
pub enum ApiError {
    /// 401/403 from the backend; the session is gone.
    #[error("Unauthorized ({0})")]
    Unauthorized(u16),

    #[error("Error {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Request failed: {0}")]
    Transport(String),

    #[error("Unexpected response: {0}")]
    Decode(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl ApiError {
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ApiError::Unauthorized(_))
    }
}

/// The backend contract the dashboard depends on. Every call is a single
/// request; authorization failures come back as [`ApiError::Unauthorized`].
pub trait SorterApi {
    fn list_categories(&self) -> Result<Vec<Category>, ApiError>;
    fn create_category(&self, draft: &CategoryDraft) -> Result<Category, ApiError>;
    fn update_category(&self, id: CategoryId, draft: &CategoryDraft)
    -> Result<Category, ApiError>;
    fn delete_category(&self, id: CategoryId) -> Result<(), ApiError>;

    /// Connected accounts. A response that is not a JSON array decodes as an
    /// empty list, which callers treat as "not authenticated".
    fn list_accounts(&self) -> Result<Vec<Account>, ApiError>;
    fn disconnect_account(&self, uid: &str) -> Result<(), ApiError>;
    fn has_refresh_token(&self) -> Result<bool, ApiError>;

    /// Asks the backend for the newest `limit` emails of every connected
    /// account.
    fn fetch_emails(&self, limit: u32) -> Result<FetchResponse, ApiError>;
    fn email_detail(&self, id: &str) -> Result<EmailDetail, ApiError>;
    fn recategorize(&self, id: &str) -> Result<RecategorizeResponse, ApiError>;

    /// Accepts 2xx including 207 multi-status.
    fn delete_emails(&self, ids: &[EmailId]) -> Result<DeleteResponse, ApiError>;
    /// Accepts 2xx including 207 multi-status.
    fn unsubscribe_emails(&self, ids: &[EmailId]) -> Result<UnsubscribeResponse, ApiError>;
}
