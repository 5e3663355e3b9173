//! The notification drain.
//!
//! Runs once per tick, only when a notify callback is registered and no
//! command is in flight; a drain during an active command would race the
//! command's result stream on the same socket buffer. Notifications are best
//! effort: a failed read ends the drain for this tick and the next tick
//! retries.

use std::rc::Rc;

use crate::connection::ConnInner;
use crate::socket;

pub(crate) fn process_notifications(inner: &Rc<ConnInner>) {
    if inner.on_notify.borrow().is_none() {
        return;
    }
    if inner.query.borrow().is_some() {
        return;
    }

    let status = {
        let client = inner.client.borrow();
        socket::check(client.socket())
    };
    if status.read_ready && !inner.client.borrow_mut().consume_input() {
        tracing::trace!("consume failed during notification drain");
        return;
    }

    loop {
        let Some(notification) = inner.client.borrow_mut().take_notification() else {
            break;
        };
        tracing::trace!(channel = %notification.channel, "notification received");
        let callback = inner.on_notify.borrow_mut().take();
        let Some(mut callback) = callback else { break };
        callback(&notification);
        // The callback may have replaced itself through
        // `set_notify_callback`; only restore it into an empty slot.
        let mut slot = inner.on_notify.borrow_mut();
        if slot.is_none() {
            *slot = Some(callback);
        }
    }
}
