pub mod toast;

pub use toast::{Toast, ToastKind, ToastQueue};
