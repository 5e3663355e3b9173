//! Tick-driven, non-blocking PostgreSQL client driver for embedding hosts.
//!
//! `pgloop` drives database connections without threads and without an async
//! runtime: the embedding host calls [`tick`] on its scheduling interval and
//! every live connection advances one cooperative step. All I/O is gated on
//! zero-timeout socket readiness probes; the only blocking path is the
//! explicitly-opt-in [`Connection::wait`].
//!
//! # Role In The Architecture
//!
//! - `pgloop-core` holds the host-boundary data model (values, parameters,
//!   results, errors)
//! - this crate holds the state machines: connection establishment, command
//!   execution, connection reset, and the notification drain
//! - the wire protocol lives behind the [`WireClient`] trait; the `libpq`
//!   cargo feature provides the native backend over `pq-sys`
//!
//! # Execution model
//!
//! Three state machines share one socket per connection and are advanced in
//! a fixed order each tick: pending connects first (completed handshakes
//! become live connections), then per connection the notification drain, the
//! query driver, and the reset driver. At most one command and at most one
//! reset are in flight per connection; installing a second command fails
//! with [`Error::Busy`](pgloop_core::Error::Busy) rather than queuing.
//!
//! # Example
//!
//! ```rust,ignore
//! use pgloop::{PgConfig, connect_config};
//!
//! connect_config(
//!     &PgConfig::new("localhost", "app", "orders"),
//!     Box::new(|outcome| {
//!         let conn = outcome.expect("connect failed");
//!         conn.query("SELECT now()", Some(Box::new(|result| {
//!             println!("{:?}", result.map(|t| t.len()));
//!         })))
//!         .expect("no command in flight");
//!     }),
//! )?;
//!
//! loop {
//!     pgloop::tick();
//!     // host scheduling interval
//! }
//! ```

pub mod client;
pub mod command;
pub mod config;
pub mod connection;
#[cfg(feature = "libpq")]
pub mod libpq;
mod notifications;
mod query;
mod registry;
pub mod socket;

pub use client::{
    FlushOutcome, Notice, NoticeHook, Notification, PollingPhase, TransactionStatus, WireClient,
    WireResult,
};
pub use command::{Command, QueryCallback};
pub use config::{PgConfig, SslMode};
pub use connection::{
    ConnectCallback, Connection, NoticeCallback, NotifyCallback, ResetCallback, connect_with,
};
#[cfg(feature = "libpq")]
pub use connection::{connect, connect_config};
#[cfg(feature = "libpq")]
pub use libpq::LibpqClient;
pub use registry::tick;
pub use socket::SocketStatus;

// Re-export the data model so hosts depend on one crate.
pub use pgloop_core::{
    Error, ErrorFields, FieldInfo, Format, FromValue, HandshakeError, ParamValues, QueryError,
    QueryErrorKind, Result, ResultStatus, ResultTable, Row, SetupError, TypeError, Value,
};
