pub mod bulk;
pub mod cache;
pub mod selection;
pub mod unread;

pub use bulk::{BulkAction, BulkCoordinator, BulkOutcome, BulkState, ValidationError};
pub use cache::LocalCache;
pub use selection::SelectionTracker;
pub use unread::UnreadTracker;
