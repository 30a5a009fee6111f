//! # adaptation-nats
//!
//! Shared NATS infrastructure for the adaptation proxy:
//! - [`NatsConfig`] resolved from environment variables
//! - [`connect`] with a bounded connect timeout, reconnect backoff and event logging
//! - [`ConnectionWatch`], a cloneable signal that resolves when the connection is lost
//! - W3C trace context propagation into NATS headers
//!
//! ```rust,no_run
//! use adaptation_nats::{NatsConfig, connect};
//! use adaptation_std::SystemEnv;
//! use std::time::Duration;
//!
//! # async fn run() -> Result<(), adaptation_nats::ConnectError> {
//! let config = NatsConfig::from_env(&SystemEnv);
//! let (client, watch) = connect(&config, Duration::from_secs(10)).await?;
//! tokio::spawn(async move {
//!     watch.lost().await;
//!     tracing::warn!("connection gone");
//! });
//! # drop(client);
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod connect;
pub mod trace;

pub use auth::{NatsAuth, NatsConfig};
pub use connect::{ConnectError, ConnectionStatus, ConnectionWatch, connect};
pub use trace::{headers_with_trace_context, inject_trace_context};
