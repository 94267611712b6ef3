//! Alert fan-out - durable publish/subscribe for operator alerts
//!
//! Operators publish short text alerts to a named channel. Every running
//! instance consumes the channel, keeps a bounded recent-history cache, and
//! hands each alert to registered observers. Delivery is at-least-once.

pub mod alert;
pub mod bus;
pub mod cache;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod publisher;
pub mod registry;
pub mod service;
pub mod subscriber;
pub mod utils;

#[cfg(test)]
pub(crate) mod test_utils;

pub use alert::Alert;
pub use bus::{AlertHandler, FnHandler};
pub use config::Config;
pub use error::{AlertError, Result};
pub use lifecycle::LifecycleState;
pub use service::AlertService;
