//! Configuration distribution with live-refresh fanout.
//!
//! A server resolves versioned configuration documents from a git (or local)
//! repository and caches them per `(application, profile, label)`. SCM push
//! webhooks become refresh events on an event bus, and every subscribed
//! [`agent::ClientRefreshAgent`] re-pulls its configuration and swaps its
//! snapshot atomically.

// Core
pub mod model;
pub mod store;
pub mod cache;
pub mod server;

// Change propagation
pub mod notifier;
pub mod bus;
pub mod agent;

// Surfaces
pub mod http;
pub mod admin;
pub mod net;

// Cross-cutting concerns
pub mod config;
pub mod lifecycle;
pub mod observability;
pub mod resilience;

pub use agent::{ClientRefreshAgent, ConfigResolver, HttpConfigClient};
pub use bus::{EventBus, EventPublisher};
pub use config::RelayConfig;
pub use lifecycle::{App, Shutdown};
pub use model::{ConfigDocument, ConfigKey, KeyPattern, RefreshEvent};
pub use server::ConfigServer;
