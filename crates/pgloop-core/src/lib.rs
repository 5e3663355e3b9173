//! Core types for the pgloop driver.
//!
//! This crate holds the data model that crosses the host boundary:
//!
//! - [`Error`] taxonomy for setup, handshake, and query failures
//! - [`Value`] for parameters and result cells, with [`FromValue`] access
//! - [`ParamValues`] wire parameter encoding
//! - [`ResultTable`] / [`Row`] marshalled command results
//! - [`ErrorFields`] structured server diagnostics
//!
//! The driver itself (tick loop, connection state machines, wire-client
//! boundary) lives in the `pgloop` crate.

pub mod error;
pub mod params;
pub mod result;
pub mod value;

pub use error::{
    Error, ErrorFields, HandshakeError, QueryError, QueryErrorKind, Result, SetupError, TypeError,
};
pub use params::{Format, ParamValues};
pub use result::{FieldInfo, Fields, ResultStatus, ResultTable, Row};
pub use value::{FromValue, Value};
