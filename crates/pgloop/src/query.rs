//! The query execution driver.
//!
//! Per-command lifecycle: idle → sent → draining → idle. Each pass re-probes
//! socket readiness before touching the client library, consumes buffered
//! input when readable, re-flushes while the outbound buffer is unflushed,
//! and drains results only when the library reports it will not block.
//!
//! Failure policy: a failed send and an error-status result terminate or
//! mark the command respectively; a failed `consume_input` does not, because
//! input already buffered may hold complete results, so the read is simply
//! retried on the next pass. Handshake drivers treat socket failure as
//! terminal, and the notification drain gives up for the tick; see the
//! module docs there.

use std::rc::Rc;

use pgloop_core::{Error, QueryError, QueryErrorKind};

use crate::client::{FlushOutcome, WireClient, WireResult};
use crate::command::{Command, Query};
use crate::connection::ConnInner;
use crate::socket;

/// One send primitive per command kind; the exhaustive match keeps the
/// dispatch table in step with the [`Command`] variants.
fn send_command(client: &mut dyn WireClient, command: &Command) -> bool {
    match command {
        Command::Simple { command } => client.send_query(command),
        Command::Parameterized { command, params } => client.send_query_params(command, params),
        Command::CreatePrepared { name, command } => client.send_prepare(name, command),
        Command::Prepared { name, params } => client.send_query_prepared(name, params),
        Command::DescribePrepared { name } => client.send_describe_prepared(name),
        Command::DescribePortal { name } => client.send_describe_portal(name),
    }
}

/// Pop the current query and report a send failure through its callback.
fn fail_query(inner: &Rc<ConnInner>) {
    let Some(query) = inner.query.borrow_mut().take() else {
        return;
    };
    let message = inner.client.borrow().error_message();
    tracing::debug!(kind = query.command.kind(), error = %message, "failed to send command");
    let callback = query.callback.borrow_mut().take();
    if let Some(mut callback) = callback {
        callback(Err(Error::Query(QueryError {
            kind: QueryErrorKind::Send,
            message,
            fields: None,
        })));
    }
}

/// Hand one result to the query's callback.
///
/// The callback is taken out of its slot for the duration of the call so it
/// can re-enter the connection API, then put back for the next result.
fn deliver(query: &Rc<Query>, result: WireResult) {
    let callback = query.callback.borrow_mut().take();
    let Some(mut callback) = callback else { return };
    if result.status.is_error() {
        callback(Err(Error::Query(QueryError {
            kind: QueryErrorKind::Result,
            message: result.error_message,
            fields: Some(result.error_fields),
        })));
    } else {
        callback(Ok(result.table));
    }
    *query.callback.borrow_mut() = Some(callback);
}

/// Re-probe readiness and move bytes for a sent command.
fn poll_query(inner: &Rc<ConnInner>, query: &Rc<Query>) {
    let status = {
        let client = inner.client.borrow();
        socket::check(client.socket())
    };
    if status.read_ready && !inner.client.borrow_mut().consume_input() {
        // Tolerated: buffered results may already be complete, and the next
        // pass retries the read. Only send and result-status failures end a
        // query.
        let message = inner.client.borrow().error_message();
        tracing::debug!(error = %message, "consume failed during active query");
    }
    if status.write_ready && !query.flushed.get() {
        let outcome = inner.client.borrow_mut().flush();
        query.flushed.set(matches!(outcome, FlushOutcome::Sent));
    }
}

/// Advance this connection's command, if one is installed.
///
/// No-op while a reset is recycling the connection. Re-entered after every
/// command completion so a command installed by a completion callback starts
/// sending within the same pass.
pub(crate) fn process_query(inner: &Rc<ConnInner>) {
    'commands: loop {
        if inner.reset.borrow().is_some() {
            return;
        }
        let query = match &*inner.query.borrow() {
            Some(query) => Rc::clone(query),
            None => return,
        };

        if !query.sent.get() {
            let sent = {
                let mut client = inner.client.borrow_mut();
                send_command(&mut **client, &query.command)
            };
            if !sent {
                fail_query(inner);
                // The failure callback may have installed the next command.
                continue 'commands;
            }
            query.sent.set(true);
            let outcome = inner.client.borrow_mut().flush();
            query.flushed.set(matches!(outcome, FlushOutcome::Sent));
        }

        poll_query(inner, &query);

        // Only drain when retrieval cannot block.
        if inner.client.borrow_mut().is_busy() {
            return;
        }

        let mut result = inner.client.borrow_mut().take_result();
        loop {
            let Some(current) = result else {
                // Nothing left for this command; a queued successor starts
                // this same pass.
                *inner.query.borrow_mut() = None;
                continue 'commands;
            };

            if inner.client.borrow_mut().is_busy() {
                // More results are coming but not yet buffered; deliver this
                // one and pick the rest up next tick.
                deliver(&query, current);
                return;
            }

            let next = inner.client.borrow_mut().take_result();
            if next.is_none() {
                // Final result: free the slot first, so the callback may
                // install a new command.
                *inner.query.borrow_mut() = None;
                deliver(&query, current);
                continue 'commands;
            }

            // Intermediate result: the command is still draining, so the
            // query stays installed.
            deliver(&query, current);
            result = next;
        }
    }
}
