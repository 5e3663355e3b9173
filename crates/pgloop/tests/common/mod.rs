//! A scripted `WireClient` for driving the tick loop in tests.
//!
//! Every library call pops the next scripted response (with a benign
//! default when the script runs out) and records what the driver did, so
//! tests can assert both behavior and call ordering. The fake's socket is a
//! real descriptor so the driver's readiness probes behave normally:
//! `/dev/null` for an always-ready socket, an idle socketpair end for a
//! never-readable one.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fs::File;
use std::os::unix::io::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::rc::Rc;

use pgloop::{
    Connection, FlushOutcome, Notice, NoticeHook, Notification, ParamValues, PollingPhase,
    TransactionStatus, WireClient, WireResult, connect_with,
};

/// A send primitive invocation the driver performed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sent {
    Query(String),
    QueryParams(String, usize),
    Prepare(String, String),
    QueryPrepared(String, usize),
    DescribePrepared(String),
    DescribePortal(String),
}

/// Scripted responses plus a record of everything the driver called.
pub struct Script {
    // Scripted responses.
    pub status_ok: bool,
    pub nonblocking_ok: bool,
    pub connect_phases: VecDeque<PollingPhase>,
    pub reset_start_ok: bool,
    pub reset_phases: VecDeque<PollingPhase>,
    pub send_results: VecDeque<bool>,
    pub flush_outcomes: VecDeque<FlushOutcome>,
    pub consume_ok: bool,
    pub busy: VecDeque<bool>,
    /// `take_result` responses; `None` marks a command boundary. An empty
    /// queue also answers `None`.
    pub results: VecDeque<Option<WireResult>>,
    pub notifications: VecDeque<Notification>,
    /// Notices fired through the notice receiver on the next consume.
    pub notices: VecDeque<Notice>,
    pub error_message: String,
    pub parameters: Vec<(String, String)>,

    // Call record.
    pub sent: Vec<Sent>,
    pub connect_poll_calls: usize,
    pub reset_start_calls: usize,
    pub reset_poll_calls: usize,
    pub flush_calls: usize,
    pub consume_calls: usize,

    pub notice_hook: Option<NoticeHook>,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            status_ok: true,
            nonblocking_ok: true,
            connect_phases: VecDeque::new(),
            reset_start_ok: true,
            reset_phases: VecDeque::new(),
            send_results: VecDeque::new(),
            flush_outcomes: VecDeque::new(),
            consume_ok: true,
            busy: VecDeque::new(),
            results: VecDeque::new(),
            notifications: VecDeque::new(),
            notices: VecDeque::new(),
            error_message: "scripted failure".to_string(),
            parameters: vec![("server_encoding".to_string(), "UTF8".to_string())],
            sent: Vec::new(),
            connect_poll_calls: 0,
            reset_start_calls: 0,
            reset_poll_calls: 0,
            flush_calls: 0,
            consume_calls: 0,
            notice_hook: None,
        }
    }
}

enum FakeSocket {
    /// `/dev/null`: poll reports it readable and writable at all times.
    Ready(File),
    /// An idle stream socket: writable, never readable.
    Idle(UnixStream, UnixStream),
    Missing,
}

impl FakeSocket {
    fn fd(&self) -> Option<RawFd> {
        match self {
            FakeSocket::Ready(file) => Some(file.as_raw_fd()),
            FakeSocket::Idle(local, _peer) => Some(local.as_raw_fd()),
            FakeSocket::Missing => None,
        }
    }
}

pub struct ScriptedClient {
    state: Rc<RefCell<Script>>,
    socket: FakeSocket,
}

impl ScriptedClient {
    /// A client whose socket is always ready in both directions.
    pub fn new() -> (Self, Rc<RefCell<Script>>) {
        let state = Rc::new(RefCell::new(Script::default()));
        let client = Self {
            state: Rc::clone(&state),
            socket: FakeSocket::Ready(File::open("/dev/null").expect("open /dev/null")),
        };
        (client, state)
    }

    /// A client whose socket never becomes readable.
    pub fn with_idle_socket() -> (Self, Rc<RefCell<Script>>) {
        let state = Rc::new(RefCell::new(Script::default()));
        let (local, peer) = UnixStream::pair().expect("socketpair");
        let client = Self {
            state: Rc::clone(&state),
            socket: FakeSocket::Idle(local, peer),
        };
        (client, state)
    }

    /// A client that reports no socket descriptor at all.
    pub fn without_socket() -> (Self, Rc<RefCell<Script>>) {
        let state = Rc::new(RefCell::new(Script::default()));
        let client = Self {
            state: Rc::clone(&state),
            socket: FakeSocket::Missing,
        };
        (client, state)
    }
}

impl WireClient for ScriptedClient {
    fn status_ok(&self) -> bool {
        self.state.borrow().status_ok
    }

    fn set_nonblocking(&mut self) -> bool {
        self.state.borrow().nonblocking_ok
    }

    fn socket(&self) -> Option<RawFd> {
        self.socket.fd()
    }

    fn connect_poll(&mut self) -> PollingPhase {
        let mut state = self.state.borrow_mut();
        state.connect_poll_calls += 1;
        state.connect_phases.pop_front().unwrap_or(PollingPhase::Ok)
    }

    fn reset_start(&mut self) -> bool {
        let mut state = self.state.borrow_mut();
        state.reset_start_calls += 1;
        state.reset_start_ok
    }

    fn reset_poll(&mut self) -> PollingPhase {
        let mut state = self.state.borrow_mut();
        state.reset_poll_calls += 1;
        state.reset_phases.pop_front().unwrap_or(PollingPhase::Ok)
    }

    fn send_query(&mut self, command: &str) -> bool {
        let mut state = self.state.borrow_mut();
        state.sent.push(Sent::Query(command.to_string()));
        state.send_results.pop_front().unwrap_or(true)
    }

    fn send_query_params(&mut self, command: &str, params: &ParamValues) -> bool {
        let mut state = self.state.borrow_mut();
        state
            .sent
            .push(Sent::QueryParams(command.to_string(), params.len()));
        state.send_results.pop_front().unwrap_or(true)
    }

    fn send_prepare(&mut self, name: &str, command: &str) -> bool {
        let mut state = self.state.borrow_mut();
        state
            .sent
            .push(Sent::Prepare(name.to_string(), command.to_string()));
        state.send_results.pop_front().unwrap_or(true)
    }

    fn send_query_prepared(&mut self, name: &str, params: &ParamValues) -> bool {
        let mut state = self.state.borrow_mut();
        state
            .sent
            .push(Sent::QueryPrepared(name.to_string(), params.len()));
        state.send_results.pop_front().unwrap_or(true)
    }

    fn send_describe_prepared(&mut self, name: &str) -> bool {
        let mut state = self.state.borrow_mut();
        state.sent.push(Sent::DescribePrepared(name.to_string()));
        state.send_results.pop_front().unwrap_or(true)
    }

    fn send_describe_portal(&mut self, name: &str) -> bool {
        let mut state = self.state.borrow_mut();
        state.sent.push(Sent::DescribePortal(name.to_string()));
        state.send_results.pop_front().unwrap_or(true)
    }

    fn flush(&mut self) -> FlushOutcome {
        let mut state = self.state.borrow_mut();
        state.flush_calls += 1;
        state.flush_outcomes.pop_front().unwrap_or(FlushOutcome::Sent)
    }

    fn consume_input(&mut self) -> bool {
        let mut state = self.state.borrow_mut();
        state.consume_calls += 1;
        if !state.consume_ok {
            return false;
        }
        // The library surfaces notices from inside its read path; mirror
        // that by firing queued notices through the receiver here.
        let notices: Vec<Notice> = state.notices.drain(..).collect();
        let mut hook = state.notice_hook.take();
        drop(state);
        if let Some(hook) = hook.as_mut() {
            for notice in notices {
                hook(notice);
            }
        }
        let mut state = self.state.borrow_mut();
        if state.notice_hook.is_none() {
            state.notice_hook = hook;
        }
        true
    }

    fn is_busy(&mut self) -> bool {
        self.state.borrow_mut().busy.pop_front().unwrap_or(false)
    }

    fn take_result(&mut self) -> Option<WireResult> {
        self.state.borrow_mut().results.pop_front().flatten()
    }

    fn take_notification(&mut self) -> Option<Notification> {
        self.state.borrow_mut().notifications.pop_front()
    }

    fn error_message(&self) -> String {
        self.state.borrow().error_message.clone()
    }

    fn set_notice_hook(&mut self, hook: NoticeHook) {
        self.state.borrow_mut().notice_hook = Some(hook);
    }

    fn db(&self) -> String {
        "testdb".to_string()
    }

    fn user(&self) -> String {
        "tester".to_string()
    }

    fn host(&self) -> String {
        "localhost".to_string()
    }

    fn port(&self) -> String {
        "5432".to_string()
    }

    fn backend_pid(&self) -> i32 {
        4242
    }

    fn server_version(&self) -> i32 {
        170_000
    }

    fn transaction_status(&self) -> TransactionStatus {
        TransactionStatus::Idle
    }

    fn parameter_status(&self, name: &str) -> Option<String> {
        self.state
            .borrow()
            .parameters
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.clone())
    }
}

/// Queue a connect for `client` and tick until it completes.
pub fn establish(client: ScriptedClient) -> Connection {
    let slot: Rc<RefCell<Option<Connection>>> = Rc::new(RefCell::new(None));
    let sink = Rc::clone(&slot);
    connect_with(
        Box::new(client),
        Box::new(move |outcome| {
            *sink.borrow_mut() = Some(outcome.expect("handshake should succeed"));
        }),
    )
    .expect("connect should queue");
    for _ in 0..8 {
        pgloop::tick();
        if slot.borrow().is_some() {
            break;
        }
    }
    let conn = slot.borrow_mut().take().expect("connection established");
    conn
}

/// A `TuplesOk` result with one text column and the given cell values.
pub fn rows_result(column: &str, cells: &[&str]) -> WireResult {
    use pgloop::{FieldInfo, Format, ResultTable, Value};
    WireResult::tuples(ResultTable::new(
        format!("SELECT {}", cells.len()),
        vec![FieldInfo {
            name: column.to_string(),
            type_oid: 25,
            format: Format::Text,
        }],
        cells
            .iter()
            .map(|cell| vec![Value::Text((*cell).to_string())])
            .collect(),
    ))
}

/// A `FatalError` result with the given message and SQLSTATE.
pub fn error_result(message: &str, sqlstate: &str) -> WireResult {
    use pgloop::{ErrorFields, ResultStatus};
    WireResult::error(
        ResultStatus::FatalError,
        message,
        ErrorFields {
            severity: Some("ERROR".to_string()),
            sqlstate: Some(sqlstate.to_string()),
            message_primary: Some(message.to_string()),
            ..Default::default()
        },
    )
}
