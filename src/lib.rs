/// aria library
///
/// A text-command assistant: queries are routed to plugins through a staged
/// resolution pipeline, and plugins remember what people do with fuzzy,
/// file-backed history trackers.

pub mod config;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod plugin;
pub mod plugins;
pub mod query;
pub mod resolver;
pub mod tracker;

// Re-exports for convenience
pub use config::{AriaConfig, ConfigStore};
pub use dispatch::Dispatcher;
pub use error::{AriaError, Result};
pub use plugin::{Plugin, Registry};
pub use query::Query;
pub use resolver::Resolver;
pub use tracker::{Tracker, TrackerManager};
