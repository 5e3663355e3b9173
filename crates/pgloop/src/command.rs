//! The command model.
//!
//! [`Command`] is the closed set of things a connection can execute; the
//! query driver dispatches on the variant to pick the client library's send
//! primitive, so adding a command kind is a compile-checked change.

use std::cell::{Cell, RefCell};

use pgloop_core::{ParamValues, Result, ResultTable};

/// Completion callback for a command, invoked once per server result.
pub type QueryCallback = Box<dyn FnMut(Result<ResultTable>)>;

/// One executable command.
#[derive(Debug, Clone)]
pub enum Command {
    /// Plain text command
    Simple { command: String },
    /// Text command with bound parameters
    Parameterized {
        command: String,
        params: ParamValues,
    },
    /// Create a named prepared statement
    CreatePrepared { name: String, command: String },
    /// Execute a named prepared statement
    Prepared { name: String, params: ParamValues },
    /// Describe a named prepared statement
    DescribePrepared { name: String },
    /// Describe a portal
    DescribePortal { name: String },
}

impl Command {
    /// Short label for logging.
    pub(crate) const fn kind(&self) -> &'static str {
        match self {
            Command::Simple { .. } => "query",
            Command::Parameterized { .. } => "query_params",
            Command::CreatePrepared { .. } => "prepare",
            Command::Prepared { .. } => "query_prepared",
            Command::DescribePrepared { .. } => "describe_prepared",
            Command::DescribePortal { .. } => "describe_portal",
        }
    }
}

/// One pending command on a connection.
///
/// Held behind `Rc`: the pointer identity, not the field values, is what
/// "the same query" means. A completion callback may install a new query
/// with identical fields and the driver must treat it as different work.
pub(crate) struct Query {
    pub command: Command,
    /// Taken out of the slot while being invoked, so a callback can safely
    /// re-enter the connection API.
    pub callback: RefCell<Option<QueryCallback>>,
    /// Has the command been handed to the client library?
    pub sent: Cell<bool>,
    /// Has the outbound buffer been fully flushed?
    pub flushed: Cell<bool>,
}

impl Query {
    pub fn new(command: Command, callback: Option<QueryCallback>) -> Self {
        Self {
            command,
            callback: RefCell::new(callback),
            sent: Cell::new(false),
            flushed: Cell::new(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    #[test]
    fn identity_is_pointer_identity() {
        let a = Rc::new(Query::new(
            Command::Simple {
                command: "SELECT 1".to_string(),
            },
            None,
        ));
        let b = Rc::new(Query::new(
            Command::Simple {
                command: "SELECT 1".to_string(),
            },
            None,
        ));
        assert!(Rc::ptr_eq(&a, &Rc::clone(&a)));
        assert!(!Rc::ptr_eq(&a, &b));
    }

    #[test]
    fn new_queries_start_unsent() {
        let q = Query::new(
            Command::DescribePortal {
                name: "p0".to_string(),
            },
            None,
        );
        assert!(!q.sent.get());
        assert!(!q.flushed.get());
        assert_eq!(q.command.kind(), "describe_portal");
    }
}
