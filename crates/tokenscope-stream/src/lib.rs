//! Resilient client for the token analysis event stream.
//!
//! [`connection::connect`] owns the socket and its reconnect policy;
//! [`dashboard::Dashboard`] is the single consumer that folds the stream into
//! a [`tokenscope_core::TokenBoard`] and publishes snapshots.

pub mod config;
pub mod connection;
pub mod dashboard;
pub mod lifecycle;
pub mod logging;

pub use connection::{connect, ConnectionConfig, ConnectionEvent, ConnectionHandle};
pub use dashboard::{Dashboard, DashboardSnapshot};
pub use lifecycle::{ConnectionMachine, ReconnectPolicy};
