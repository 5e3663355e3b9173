//! The tick entry point and connection registry.
//!
//! Live connections register themselves here so [`tick`] can enumerate them
//! without the host tracking anything. The registry is thread-local: the
//! driver is single-threaded by design, and `tick` advances the connections
//! created on the calling thread.
//!
//! Lifecycle is explicit: a connection is registered when its handshake
//! succeeds and unregistered by `Drop` of its last handle, before the
//! underlying client handle is released, so a tick can never touch a freed
//! connection.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use crate::connection::{self, ConnInner, PendingConnection};
use crate::{notifications, query};

thread_local! {
    static LIVE: RefCell<Vec<Weak<ConnInner>>> = const { RefCell::new(Vec::new()) };
    static PENDING: RefCell<Vec<PendingConnection>> = const { RefCell::new(Vec::new()) };
}

pub(crate) fn register(inner: &Rc<ConnInner>) {
    LIVE.with(|live| live.borrow_mut().push(Rc::downgrade(inner)));
}

pub(crate) fn unregister(inner: *const ConnInner) {
    LIVE.with(|live| {
        live.borrow_mut()
            .retain(|weak| !std::ptr::eq(weak.as_ptr(), inner));
    });
}

/// Visit every live connection.
///
/// Iterates over a snapshot so callbacks invoked from `f` may connect, drop,
/// or otherwise mutate the registry mid-pass; connections created during the
/// pass are picked up on the next one.
pub(crate) fn for_each(mut f: impl FnMut(Rc<ConnInner>)) {
    let connections: Vec<Rc<ConnInner>> = LIVE.with(|live| {
        let mut live = live.borrow_mut();
        live.retain(|weak| weak.strong_count() > 0);
        live.iter().filter_map(Weak::upgrade).collect()
    });
    for conn in connections {
        f(conn);
    }
}

pub(crate) fn enqueue_pending(event: PendingConnection) {
    PENDING.with(|pending| pending.borrow_mut().push(event));
}

/// Take the pending list for processing, leaving it empty so callbacks may
/// enqueue new connection attempts while it is being walked.
pub(crate) fn take_pending() -> Vec<PendingConnection> {
    PENDING.with(|pending| pending.borrow_mut().drain(..).collect())
}

/// Put still-unfinished handshakes back, ahead of any attempt enqueued while
/// they were being processed.
pub(crate) fn requeue_pending(still_pending: Vec<PendingConnection>) {
    PENDING.with(|pending| {
        let mut slot = pending.borrow_mut();
        let enqueued_meanwhile: Vec<PendingConnection> = slot.drain(..).collect();
        *slot = still_pending;
        slot.extend(enqueued_meanwhile);
    });
}

/// Advance every connection on this thread by one cooperative step.
///
/// Intended to be invoked on a fixed external cadence. Ordering is fixed:
/// pending handshakes first (completed ones become live connections), then
/// for each live connection the notification drain, the query driver, and
/// the reset driver, once each. A connection with nothing to do returns
/// without side effects.
pub fn tick() {
    connection::process_pending_connections();
    for_each(|inner| {
        notifications::process_notifications(&inner);
        query::process_query(&inner);
        connection::process_reset(&inner);
    });
}
