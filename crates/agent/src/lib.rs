//! Outbound HTTP instrumentation agent.
//!
//! [`Agent`] wraps a [`Transport`] and, for every request:
//! - refuses hosts listed in the remotely configured blocklist
//!   ([`Error::BlockedDomain`], no network call),
//! - forwards everything else and records a [`ReportLog`],
//! - ships that record to the collector on a detached task.
//!
//! The remote config is cached by [`ConfigStore`] and refreshed in the
//! background; records are posted by [`LogShipper`]. Both endpoints need a
//! secret key; without one the agent still forwards requests but applies no
//! policy and ships nothing.
//!
//! Feature flags:
//! - `metrics` — counters/histograms via `bearer-metrics` (default)

pub mod agent;
pub mod api;
pub mod config_store;
pub mod content_type;
pub mod error;
mod report;
pub mod settings;
pub mod shipper;
pub mod transport;
pub mod types;

pub use {
    agent::{Agent, AgentBuilder},
    config_store::ConfigStore,
    content_type::is_parseable,
    error::{Error, Result},
    settings::AgentSettings,
    shipper::{LogShipper, ShipperStats},
    transport::{RequestTimeout, ReqwestTransport, Transport},
    types::*,
};
