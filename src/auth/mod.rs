pub mod cookies;
pub mod guard;
pub mod login;
pub mod session_store;
