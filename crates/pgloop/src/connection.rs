//! Connections and the handshake drivers.
//!
//! [`connect_with`] queues a non-blocking connect handshake; each [`tick`]
//! advances it until it terminally succeeds (the callback receives a live
//! [`Connection`]) or fails (the callback receives the library's error).
//! [`Connection::reset`] re-runs the same handshake logic against an
//! established connection to recover it in place; concurrent reset requests
//! coalesce into one shared operation.
//!
//! [`tick`]: crate::tick

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use pgloop_core::{Error, Result};

use crate::client::{Notice, Notification, PollingPhase, TransactionStatus, WireClient};
use crate::command::{Command, Query, QueryCallback};
use crate::registry;
use crate::socket;

/// Completion callback for a connect attempt.
pub type ConnectCallback = Box<dyn FnOnce(Result<Connection>)>;
/// Completion callback for a reset.
pub type ResetCallback = Box<dyn FnOnce(Result<()>)>;
/// Callback for asynchronous server notifications.
pub type NotifyCallback = Box<dyn FnMut(&Notification)>;
/// Callback for server notices and warnings.
pub type NoticeCallback = Box<dyn FnMut(&Notice)>;

/// An in-flight reset, shared by every callback registered against it.
///
/// Identity (`Rc::ptr_eq`) is load-bearing: [`Connection::wait`] exits only
/// when this exact operation is no longer installed, even if a callback
/// starts a new, field-identical reset.
pub(crate) struct ResetOp {
    pub callbacks: RefCell<Vec<ResetCallback>>,
    pub phase: Cell<PollingPhase>,
}

impl Default for ResetOp {
    fn default() -> Self {
        Self {
            callbacks: RefCell::new(Vec::new()),
            phase: Cell::new(PollingPhase::Writing),
        }
    }
}

/// Shared state of one live connection.
///
/// Every field sits in its own cell so a completion callback can re-enter
/// the public API (install the next command, start a reset) without
/// conflicting borrows.
pub(crate) struct ConnInner {
    pub client: RefCell<Box<dyn WireClient>>,
    pub query: RefCell<Option<Rc<Query>>>,
    pub reset: RefCell<Option<Rc<ResetOp>>>,
    pub on_notify: RefCell<Option<NotifyCallback>>,
    pub on_notice: RefCell<Option<NoticeCallback>>,
}

impl Drop for ConnInner {
    fn drop(&mut self) {
        // Leave the registry before the client handle (and its socket) goes
        // away, so the next tick cannot observe a dangling connection.
        registry::unregister(std::ptr::from_ref(self));
        tracing::debug!("connection closed");
    }
}

/// A live connection handle.
///
/// Cheap to clone; the last handle dropping destroys the connection and is
/// the only way to abandon in-flight work. All methods must be called from
/// the thread that drives [`tick`](crate::tick).
#[derive(Clone)]
pub struct Connection {
    inner: Rc<ConnInner>,
}

/// A connect handshake that has not reached a terminal phase yet.
pub(crate) struct PendingConnection {
    pub client: Box<dyn WireClient>,
    pub callback: ConnectCallback,
    pub phase: PollingPhase,
}

/// Queue a non-blocking connect over an already-constructed wire client.
///
/// Fails fast (synchronously, without invoking the callback) when the
/// client reports a bad status or cannot be switched to non-blocking mode.
/// Otherwise the handshake is advanced by subsequent [`tick`](crate::tick)
/// calls and the callback fires exactly once on the terminal phase.
pub fn connect_with(mut client: Box<dyn WireClient>, callback: ConnectCallback) -> Result<()> {
    if !client.status_ok() {
        return Err(Error::setup(client.error_message()));
    }
    if !client.set_nonblocking() {
        return Err(Error::setup(client.error_message()));
    }
    tracing::debug!("connection attempt queued");
    registry::enqueue_pending(PendingConnection {
        client,
        callback,
        phase: PollingPhase::Writing,
    });
    Ok(())
}

/// Open a connection through the native libpq backend.
#[cfg(feature = "libpq")]
pub fn connect(conninfo: &str, callback: ConnectCallback) -> Result<()> {
    let client = crate::libpq::LibpqClient::start(conninfo)?;
    connect_with(Box::new(client), callback)
}

/// Open a connection from a [`PgConfig`](crate::PgConfig).
#[cfg(feature = "libpq")]
pub fn connect_config(config: &crate::PgConfig, callback: ConnectCallback) -> Result<()> {
    connect(&config.to_conninfo(), callback)
}

/// May the handshake's poll primitive be called without blocking?
///
/// Probe failure counts as ready: the poll call is how the library reports
/// the precise failure reason.
pub(crate) fn handshake_ready(client: &dyn WireClient, phase: PollingPhase) -> bool {
    match phase {
        PollingPhase::Reading | PollingPhase::Writing => {
            let status = socket::check(client.socket());
            status.failed
                || (phase == PollingPhase::Reading && status.read_ready)
                || (phase == PollingPhase::Writing && status.write_ready)
        }
        PollingPhase::Ok | PollingPhase::Failed => true,
    }
}

/// Advance all pending connect handshakes one step each.
pub(crate) fn process_pending_connections() {
    let pending = registry::take_pending();
    if pending.is_empty() {
        return;
    }
    let mut still_pending = Vec::with_capacity(pending.len());
    for event in pending {
        if let Some(event) = poll_pending_connection(event) {
            still_pending.push(event);
        }
    }
    registry::requeue_pending(still_pending);
}

/// Returns the event back when it still needs polling, `None` once it
/// reached a terminal phase and its callback ran.
fn poll_pending_connection(mut event: PendingConnection) -> Option<PendingConnection> {
    if !handshake_ready(&*event.client, event.phase) {
        return Some(event);
    }

    event.phase = event.client.connect_poll();
    match event.phase {
        PollingPhase::Ok => {
            let connection = Connection::promote(event.client);
            (event.callback)(Ok(connection));
            None
        }
        PollingPhase::Failed => {
            let message = event.client.error_message();
            tracing::debug!(error = %message, "connection handshake failed");
            (event.callback)(Err(Error::handshake(message)));
            None
        }
        PollingPhase::Reading | PollingPhase::Writing => Some(event),
    }
}

/// Advance this connection's reset, if one is active.
pub(crate) fn process_reset(inner: &Rc<ConnInner>) {
    let op = match &*inner.reset.borrow() {
        Some(op) => Rc::clone(op),
        None => return,
    };
    let ready = {
        let client = inner.client.borrow();
        handshake_ready(&**client, op.phase.get())
    };
    if !ready {
        return;
    }

    let phase = inner.client.borrow_mut().reset_poll();
    op.phase.set(phase);
    match phase {
        PollingPhase::Ok => {
            // Clear before invoking: a callback may legally start the next
            // reset.
            *inner.reset.borrow_mut() = None;
            tracing::debug!("reset complete");
            let callbacks: Vec<ResetCallback> = op.callbacks.borrow_mut().drain(..).collect();
            for callback in callbacks {
                callback(Ok(()));
            }
        }
        PollingPhase::Failed => {
            let message = inner.client.borrow().error_message();
            *inner.reset.borrow_mut() = None;
            tracing::debug!(error = %message, "reset failed");
            let callbacks: Vec<ResetCallback> = op.callbacks.borrow_mut().drain(..).collect();
            for callback in callbacks {
                callback(Err(Error::handshake(message.clone())));
            }
        }
        PollingPhase::Reading | PollingPhase::Writing => {}
    }
}

impl Connection {
    /// Promote a completed handshake into a live, registered connection.
    pub(crate) fn promote(client: Box<dyn WireClient>) -> Connection {
        let inner = Rc::new(ConnInner {
            client: RefCell::new(client),
            query: RefCell::new(None),
            reset: RefCell::new(None),
            on_notify: RefCell::new(None),
            on_notice: RefCell::new(None),
        });

        // The notice receiver outlives individual calls into the client, so
        // it holds a weak reference back to the connection.
        let weak = Rc::downgrade(&inner);
        inner
            .client
            .borrow_mut()
            .set_notice_hook(Box::new(move |notice| {
                let Some(inner) = weak.upgrade() else { return };
                let callback = inner.on_notice.borrow_mut().take();
                if let Some(mut callback) = callback {
                    callback(&notice);
                    let mut slot = inner.on_notice.borrow_mut();
                    if slot.is_none() {
                        *slot = Some(callback);
                    }
                }
            }));

        registry::register(&inner);
        tracing::debug!("connection established");
        Connection { inner }
    }

    fn install(&self, command: Command, callback: Option<QueryCallback>) -> Result<()> {
        let mut slot = self.inner.query.borrow_mut();
        if slot.is_some() {
            return Err(Error::Busy);
        }
        tracing::trace!(kind = command.kind(), "command installed");
        *slot = Some(Rc::new(Query::new(command, callback)));
        Ok(())
    }

    /// Execute a plain text command.
    ///
    /// The callback is invoked once per server result; a multi-statement
    /// command yields one invocation per statement. Fails with
    /// [`Error::Busy`] while another command is installed.
    pub fn query(&self, command: impl Into<String>, callback: Option<QueryCallback>) -> Result<()> {
        self.install(
            Command::Simple {
                command: command.into(),
            },
            callback,
        )
    }

    /// Execute a text command with bound parameters.
    pub fn query_params(
        &self,
        command: impl Into<String>,
        params: pgloop_core::ParamValues,
        callback: Option<QueryCallback>,
    ) -> Result<()> {
        self.install(
            Command::Parameterized {
                command: command.into(),
                params,
            },
            callback,
        )
    }

    /// Create a named prepared statement.
    pub fn prepare(
        &self,
        name: impl Into<String>,
        command: impl Into<String>,
        callback: Option<QueryCallback>,
    ) -> Result<()> {
        self.install(
            Command::CreatePrepared {
                name: name.into(),
                command: command.into(),
            },
            callback,
        )
    }

    /// Execute a named prepared statement.
    pub fn query_prepared(
        &self,
        name: impl Into<String>,
        params: pgloop_core::ParamValues,
        callback: Option<QueryCallback>,
    ) -> Result<()> {
        self.install(
            Command::Prepared {
                name: name.into(),
                params,
            },
            callback,
        )
    }

    /// Ask the server to describe a prepared statement.
    pub fn describe_prepared(
        &self,
        name: impl Into<String>,
        callback: Option<QueryCallback>,
    ) -> Result<()> {
        self.install(Command::DescribePrepared { name: name.into() }, callback)
    }

    /// Ask the server to describe a portal.
    pub fn describe_portal(
        &self,
        name: impl Into<String>,
        callback: Option<QueryCallback>,
    ) -> Result<()> {
        self.install(Command::DescribePortal { name: name.into() }, callback)
    }

    /// Recover the connection in place.
    ///
    /// Starts a reset handshake, or, when one is already running, only
    /// appends the callback to it. Failing to *start* the reset is a
    /// synchronous setup error; handshake failure is reported through the
    /// callbacks. While a reset is active no command is sent or advanced.
    pub fn reset(&self, callback: Option<ResetCallback>) -> Result<()> {
        let op = {
            let mut slot = self.inner.reset.borrow_mut();
            match &*slot {
                Some(op) => Rc::clone(op),
                None => {
                    if !self.inner.client.borrow_mut().reset_start() {
                        return Err(Error::setup(self.inner.client.borrow().error_message()));
                    }
                    tracing::debug!("reset started");
                    let op = Rc::new(ResetOp::default());
                    *slot = Some(Rc::clone(&op));
                    op
                }
            }
        };
        if let Some(callback) = callback {
            op.callbacks.borrow_mut().push(callback);
        }
        Ok(())
    }

    /// Install or clear the notification callback.
    ///
    /// Notifications are drained once per tick, and only while no command is
    /// in flight.
    pub fn set_notify_callback(&self, callback: Option<NotifyCallback>) {
        *self.inner.on_notify.borrow_mut() = callback;
    }

    /// Install or clear the notice callback.
    pub fn set_notice_callback(&self, callback: Option<NoticeCallback>) {
        *self.inner.on_notice.borrow_mut() = callback;
    }

    /// Synchronously drain the current reset or query to completion.
    ///
    /// Spins a blocking socket wait followed by one driver step until the
    /// operation that was installed on entry is no longer the connection's
    /// current operation, compared by identity, so work installed by
    /// completion callbacks (even field-identical work) does not extend the
    /// wait.
    /// Returns whether there was anything to wait on. Must not be called
    /// from inside a completion callback.
    pub fn wait(&self) -> bool {
        let reset = self.inner.reset.borrow().as_ref().map(Rc::clone);
        if let Some(op) = reset {
            while self
                .inner
                .reset
                .borrow()
                .as_ref()
                .is_some_and(|current| Rc::ptr_eq(current, &op))
            {
                let (read, write) = match op.phase.get() {
                    PollingPhase::Reading => (true, false),
                    PollingPhase::Writing => (false, true),
                    PollingPhase::Ok | PollingPhase::Failed => break,
                };
                {
                    let client = self.inner.client.borrow();
                    socket::wait(client.socket(), read, write, None);
                }
                process_reset(&self.inner);
            }
            return true;
        }

        let query = self.inner.query.borrow().as_ref().map(Rc::clone);
        if let Some(query) = query {
            if !query.sent.get() {
                crate::query::process_query(&self.inner);
            }
            while self
                .inner
                .query
                .borrow()
                .as_ref()
                .is_some_and(|current| Rc::ptr_eq(current, &query))
            {
                {
                    let client = self.inner.client.borrow();
                    socket::wait(client.socket(), true, !query.flushed.get(), None);
                }
                crate::query::process_query(&self.inner);
            }
            return true;
        }

        false
    }

    /// Is a command installed on this connection?
    pub fn querying(&self) -> bool {
        self.inner.query.borrow().is_some()
    }

    /// Is a reset in flight on this connection?
    pub fn resetting(&self) -> bool {
        self.inner.reset.borrow().is_some()
    }

    /// Would result retrieval block right now, according to the library?
    pub fn is_busy(&self) -> bool {
        self.inner.client.borrow_mut().is_busy()
    }

    /// Database name of the connection.
    pub fn db(&self) -> String {
        self.inner.client.borrow().db()
    }

    /// User name of the connection.
    pub fn user(&self) -> String {
        self.inner.client.borrow().user()
    }

    /// Server host of the connection.
    pub fn host(&self) -> String {
        self.inner.client.borrow().host()
    }

    /// Server port of the connection.
    pub fn port(&self) -> String {
        self.inner.client.borrow().port()
    }

    /// Backend process PID.
    pub fn backend_pid(&self) -> i32 {
        self.inner.client.borrow().backend_pid()
    }

    /// Server version number.
    pub fn server_version(&self) -> i32 {
        self.inner.client.borrow().server_version()
    }

    /// Current transaction status.
    pub fn transaction_status(&self) -> TransactionStatus {
        self.inner.client.borrow().transaction_status()
    }

    /// A server parameter reported at startup.
    pub fn parameter_status(&self, name: &str) -> Option<String> {
        self.inner.client.borrow().parameter_status(name)
    }

    /// The client library's current error message.
    pub fn error_message(&self) -> String {
        self.inner.client.borrow().error_message()
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("querying", &self.querying())
            .field("resetting", &self.resetting())
            .finish_non_exhaustive()
    }
}
