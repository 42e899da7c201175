pub mod api;
pub mod auth;
pub mod config;
pub mod daemon;
pub mod dashboard;
pub mod domain;
pub mod live;
pub mod notify;
pub mod store;
pub mod sync;

pub use dashboard::{Dashboard, DashboardOptions};
