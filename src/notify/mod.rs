//! Notification delivery
//!
//! ```text
//! AlertCandidate ─▶ Notification ─▶ TopicLimiter ─▶ NotificationTransport
//!                   (priority.rs)   (rate_limit.rs)  (transport.rs, retried by dispatcher.rs)
//! ```

pub mod dispatcher;
pub mod priority;
pub mod rate_limit;
pub mod transport;

pub use dispatcher::{DispatchResult, Dispatcher};
pub use priority::{Notification, Priority};
pub use rate_limit::TopicLimiter;
pub use transport::{NotificationTransport, NtfyTransport};
