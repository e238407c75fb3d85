//! # mailgw-audit
//!
//! Audit-log harvester for mail-security gateway appliances.
//!
//! The appliance exposes its audit journal behind a session-oriented
//! management API: login, a two-phase time handshake, then a paginated
//! journal query. This crate drives that protocol on a fixed interval
//! against one or more appliances, deduplicates entries across cycles,
//! and streams every newly observed entry to the consumer until shut
//! down. Dedup memory lives only for the process lifetime; a restart
//! rebuilds it and the one-day retention window suppresses the replay.
//!
//! ## Quick Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use tokio_stream::StreamExt;
//! use mailgw_audit::{Opts, Service};
//!
//! # async fn example() -> Result<(), mailgw_audit::Error> {
//! let (service, mut stream) = Service::new(Opts {
//!     urls: vec!["https://gw01/mail/en-US/cgi-bin/klwi".to_string()],
//!     user: "admin".to_string(),
//!     password: "secret".to_string(),
//!     timeout: Duration::from_secs(5),
//!     poll_interval: Duration::from_secs(60),
//! })?;
//!
//! let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
//! tokio::spawn(service.run(shutdown_rx));
//!
//! while let Some(record) = stream.next().await {
//!     println!("{}", record.event_name);
//! }
//! # drop(shutdown_tx);
//! # Ok(())
//! # }
//! ```

pub mod dedup;
pub mod error;
pub mod record;
pub mod service;
pub mod session;
pub mod transport;

// Re-export the main types at the crate root for convenience.
pub use error::Error;
pub use record::Record;
pub use service::{Opts, Service};
pub use session::Pacing;
