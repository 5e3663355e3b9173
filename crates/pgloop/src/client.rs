//! The wire-client boundary.
//!
//! [`WireClient`] is the seam between this driver and the client library
//! that owns the wire protocol. It mirrors libpq's asynchronous API:
//! non-blocking connect/reset handshakes advanced by poll calls, per-command
//! send primitives, explicit flush/consume steps, and result retrieval that
//! must only be attempted when the library reports it will not block.
//!
//! The `libpq` cargo feature provides the native implementation; tests drive
//! the state machines through a scripted double.

use std::os::unix::io::RawFd;

use pgloop_core::{ErrorFields, ParamValues, ResultStatus, ResultTable};

/// Phase of a non-blocking connect or reset handshake.
///
/// `Writing` and `Reading` name the socket readiness the next poll call
/// needs; `Ok` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PollingPhase {
    /// The handshake wants to write
    #[default]
    Writing,
    /// The handshake wants to read
    Reading,
    /// The handshake completed
    Ok,
    /// The handshake failed; ask the library for the reason
    Failed,
}

impl PollingPhase {
    /// Is this phase terminal?
    pub const fn is_terminal(self) -> bool {
        matches!(self, PollingPhase::Ok | PollingPhase::Failed)
    }
}

/// Outcome of one flush attempt on the outbound buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Everything queued has reached the socket
    Sent,
    /// Data remains; retry when the socket is writable
    Pending,
    /// The flush failed
    Failed,
}

/// Server transaction status as the client library reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransactionStatus {
    /// Idle, not in a transaction block
    #[default]
    Idle,
    /// A command is currently executing
    Active,
    /// Idle inside a valid transaction block
    InTransaction,
    /// Idle inside a failed transaction block
    InError,
    /// The connection is bad
    Unknown,
}

/// One result handed over by the client library.
///
/// The library owns result marshalling: by the time the driver sees a
/// `WireResult` the rows are already host values. Error-status results carry
/// the message and structured diagnostics instead of meaningful rows.
#[derive(Debug, Clone)]
pub struct WireResult {
    pub status: ResultStatus,
    pub table: ResultTable,
    pub error_message: String,
    pub error_fields: ErrorFields,
}

impl WireResult {
    /// A successful result carrying rows.
    pub fn tuples(table: ResultTable) -> Self {
        Self {
            status: ResultStatus::TuplesOk,
            table,
            error_message: String::new(),
            error_fields: ErrorFields::default(),
        }
    }

    /// A successful result without rows.
    pub fn command_ok(tag: impl Into<String>) -> Self {
        Self {
            status: ResultStatus::CommandOk,
            table: ResultTable {
                command_tag: tag.into(),
                ..ResultTable::default()
            },
            error_message: String::new(),
            error_fields: ErrorFields::default(),
        }
    }

    /// An error-status result with message and diagnostics.
    pub fn error(status: ResultStatus, message: impl Into<String>, fields: ErrorFields) -> Self {
        Self {
            status,
            table: ResultTable::default(),
            error_message: message.into(),
            error_fields: fields,
        }
    }
}

/// An asynchronous server push message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// Channel the notification was sent on
    pub channel: String,
    /// Payload string (possibly empty)
    pub payload: String,
    /// PID of the originating backend
    pub backend_pid: i32,
}

/// A server notice or warning, delivered outside the result stream.
#[derive(Debug, Clone, Default)]
pub struct Notice {
    pub message: String,
    pub fields: ErrorFields,
}

/// Hook the driver installs to receive notices from the client library.
pub type NoticeHook = Box<dyn FnMut(Notice)>;

/// The client library surface the driver is written against.
///
/// Boolean returns mirror the library's success/failure statuses; on
/// `false` the driver asks [`error_message`](WireClient::error_message) for
/// the reason. None of these calls may block: the driver gates every call
/// that could on the socket readiness probe.
pub trait WireClient {
    /// Is the connection handle in a usable state?
    fn status_ok(&self) -> bool;

    /// Switch the connection to non-blocking mode.
    fn set_nonblocking(&mut self) -> bool;

    /// The connection's socket descriptor, if it currently has one.
    fn socket(&self) -> Option<RawFd>;

    /// Advance the connect handshake one step.
    fn connect_poll(&mut self) -> PollingPhase;

    /// Begin a connection reset.
    fn reset_start(&mut self) -> bool;

    /// Advance the reset handshake one step.
    fn reset_poll(&mut self) -> PollingPhase;

    /// Queue a simple text command.
    fn send_query(&mut self, command: &str) -> bool;

    /// Queue a parameterized command.
    fn send_query_params(&mut self, command: &str, params: &ParamValues) -> bool;

    /// Queue creation of a named prepared statement.
    fn send_prepare(&mut self, name: &str, command: &str) -> bool;

    /// Queue execution of a named prepared statement.
    fn send_query_prepared(&mut self, name: &str, params: &ParamValues) -> bool;

    /// Queue a description request for a prepared statement.
    fn send_describe_prepared(&mut self, name: &str) -> bool;

    /// Queue a description request for a portal.
    fn send_describe_portal(&mut self, name: &str) -> bool;

    /// Push queued outbound data toward the socket.
    fn flush(&mut self) -> FlushOutcome;

    /// Read whatever the socket has buffered.
    fn consume_input(&mut self) -> bool;

    /// Would result retrieval block right now?
    fn is_busy(&mut self) -> bool;

    /// Take the next buffered result; `None` means the current command is
    /// complete.
    fn take_result(&mut self) -> Option<WireResult>;

    /// Take the next queued notification, if any.
    fn take_notification(&mut self) -> Option<Notification>;

    /// The library's current error message.
    fn error_message(&self) -> String;

    /// Install the notice receiver hook.
    fn set_notice_hook(&mut self, hook: NoticeHook);

    // Connection metadata.

    /// Database name of the connection.
    fn db(&self) -> String;

    /// User name of the connection.
    fn user(&self) -> String;

    /// Server host of the connection.
    fn host(&self) -> String;

    /// Server port of the connection.
    fn port(&self) -> String;

    /// Backend process PID.
    fn backend_pid(&self) -> i32;

    /// Server version number, e.g. `170002`.
    fn server_version(&self) -> i32;

    /// Current transaction status.
    fn transaction_status(&self) -> TransactionStatus;

    /// A server parameter reported at startup, e.g. `server_encoding`.
    fn parameter_status(&self, name: &str) -> Option<String>;
}
