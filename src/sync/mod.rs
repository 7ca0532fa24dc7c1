pub mod retry;
pub mod service;

pub use retry::RetryPolicy;
pub use service::{Edit, SyncService};
