//! Native backend over libpq's asynchronous API.
//!
//! [`LibpqClient`] implements [`WireClient`] by delegating every primitive
//! to the corresponding `PQ*` entry point and marshalling `PGresult` handles
//! into [`WireResult`]s at the boundary. Enabled by the `libpq` cargo
//! feature; requires a system libpq at link time.

#![allow(unsafe_code)]

use std::ffi::{CStr, CString, c_char, c_int, c_void};
use std::os::unix::io::RawFd;

use pgloop_core::{Error, ErrorFields, Format, ParamValues, Result, ResultStatus, ResultTable};
use pq_sys as pq;

use crate::client::{
    FlushOutcome, Notice, NoticeHook, Notification, PollingPhase, TransactionStatus, WireClient,
    WireResult,
};

// Field codes for PQresultErrorField, from postgres_ext.h.
const PG_DIAG_SEVERITY_NONLOCALIZED: c_int = 'V' as c_int;
const PG_DIAG_SQLSTATE: c_int = 'C' as c_int;
const PG_DIAG_MESSAGE_PRIMARY: c_int = 'M' as c_int;
const PG_DIAG_MESSAGE_DETAIL: c_int = 'D' as c_int;
const PG_DIAG_MESSAGE_HINT: c_int = 'H' as c_int;
const PG_DIAG_STATEMENT_POSITION: c_int = 'P' as c_int;
const PG_DIAG_CONTEXT: c_int = 'W' as c_int;
const PG_DIAG_SCHEMA_NAME: c_int = 's' as c_int;
const PG_DIAG_TABLE_NAME: c_int = 't' as c_int;
const PG_DIAG_COLUMN_NAME: c_int = 'c' as c_int;
const PG_DIAG_DATATYPE_NAME: c_int = 'd' as c_int;
const PG_DIAG_CONSTRAINT_NAME: c_int = 'n' as c_int;
const PG_DIAG_SOURCE_FILE: c_int = 'F' as c_int;
const PG_DIAG_SOURCE_LINE: c_int = 'L' as c_int;
const PG_DIAG_SOURCE_FUNCTION: c_int = 'R' as c_int;

/// The native libpq connection handle.
pub struct LibpqClient {
    conn: *mut pq::PGconn,
    /// Heap cell handed to `PQsetNoticeReceiver` as its payload.
    notice_hook: Option<*mut NoticeHook>,
}

impl LibpqClient {
    /// Begin a non-blocking connect (`PQconnectStart`).
    ///
    /// Allocation failure is a setup error; the handshake itself has not
    /// started yet and no callback is involved.
    pub fn start(conninfo: &str) -> Result<Self> {
        let conninfo = CString::new(conninfo)
            .map_err(|_| Error::setup("conninfo string contains a NUL byte"))?;
        let conn = unsafe { pq::PQconnectStart(conninfo.as_ptr()) };
        if conn.is_null() {
            return Err(Error::setup("failed to allocate connection"));
        }
        Ok(Self {
            conn,
            notice_hook: None,
        })
    }

    fn clear_notice_hook(&mut self) {
        if let Some(hook) = self.notice_hook.take() {
            unsafe {
                pq::PQsetNoticeReceiver(self.conn, None, std::ptr::null_mut());
                drop(Box::from_raw(hook));
            }
        }
    }
}

impl Drop for LibpqClient {
    fn drop(&mut self) {
        self.clear_notice_hook();
        unsafe { pq::PQfinish(self.conn) };
    }
}

unsafe extern "C" fn notice_receiver(arg: *mut c_void, result: *const pq::PGresult) {
    if arg.is_null() || result.is_null() {
        return;
    }
    let hook = unsafe { &mut *arg.cast::<NoticeHook>() };
    let message = unsafe { copy_cstr(pq::PQresultErrorMessage(result)) };
    let fields = unsafe { marshal_error_fields(result) };
    hook(Notice { message, fields });
}

/// Copy a library-owned C string; null pointers become an empty string.
unsafe fn copy_cstr(ptr: *const c_char) -> String {
    if ptr.is_null() {
        return String::new();
    }
    unsafe { CStr::from_ptr(ptr) }
        .to_string_lossy()
        .into_owned()
}

unsafe fn error_field(result: *const pq::PGresult, code: c_int) -> Option<String> {
    let ptr = unsafe { pq::PQresultErrorField(result, code) };
    if ptr.is_null() {
        None
    } else {
        Some(unsafe { copy_cstr(ptr) })
    }
}

unsafe fn marshal_error_fields(result: *const pq::PGresult) -> ErrorFields {
    unsafe {
        ErrorFields {
            severity: error_field(result, PG_DIAG_SEVERITY_NONLOCALIZED),
            sqlstate: error_field(result, PG_DIAG_SQLSTATE),
            message_primary: error_field(result, PG_DIAG_MESSAGE_PRIMARY),
            message_detail: error_field(result, PG_DIAG_MESSAGE_DETAIL),
            message_hint: error_field(result, PG_DIAG_MESSAGE_HINT),
            statement_position: error_field(result, PG_DIAG_STATEMENT_POSITION),
            context: error_field(result, PG_DIAG_CONTEXT),
            schema_name: error_field(result, PG_DIAG_SCHEMA_NAME),
            table_name: error_field(result, PG_DIAG_TABLE_NAME),
            column_name: error_field(result, PG_DIAG_COLUMN_NAME),
            datatype_name: error_field(result, PG_DIAG_DATATYPE_NAME),
            constraint_name: error_field(result, PG_DIAG_CONSTRAINT_NAME),
            source_file: error_field(result, PG_DIAG_SOURCE_FILE),
            source_line: error_field(result, PG_DIAG_SOURCE_LINE),
            source_function: error_field(result, PG_DIAG_SOURCE_FUNCTION),
        }
    }
}

fn map_status(status: pq::ExecStatusType) -> ResultStatus {
    use pq::ExecStatusType as E;
    match status {
        E::PGRES_EMPTY_QUERY => ResultStatus::EmptyQuery,
        E::PGRES_COMMAND_OK => ResultStatus::CommandOk,
        E::PGRES_TUPLES_OK => ResultStatus::TuplesOk,
        E::PGRES_COPY_OUT => ResultStatus::CopyOut,
        E::PGRES_COPY_IN => ResultStatus::CopyIn,
        E::PGRES_COPY_BOTH => ResultStatus::CopyBoth,
        E::PGRES_SINGLE_TUPLE => ResultStatus::SingleTuple,
        E::PGRES_BAD_RESPONSE => ResultStatus::BadResponse,
        E::PGRES_NONFATAL_ERROR => ResultStatus::NonfatalError,
        E::PGRES_FATAL_ERROR => ResultStatus::FatalError,
        _ => ResultStatus::BadResponse,
    }
}

fn map_polling(status: pq::PostgresPollingStatusType) -> PollingPhase {
    use pq::PostgresPollingStatusType as P;
    match status {
        P::PGRES_POLLING_READING => PollingPhase::Reading,
        P::PGRES_POLLING_WRITING => PollingPhase::Writing,
        P::PGRES_POLLING_OK => PollingPhase::Ok,
        _ => PollingPhase::Failed,
    }
}

/// Marshal one owned `PGresult` into a [`WireResult`], clearing the handle.
unsafe fn marshal_result(result: *mut pq::PGresult) -> WireResult {
    unsafe {
        let status = map_status(pq::PQresultStatus(result));
        let wire = if status.is_error() {
            WireResult::error(
                status,
                copy_cstr(pq::PQresultErrorMessage(result)),
                marshal_error_fields(result),
            )
        } else {
            let n_fields = pq::PQnfields(result);
            let mut infos = Vec::with_capacity(n_fields.max(0) as usize);
            for col in 0..n_fields {
                infos.push(pgloop_core::FieldInfo {
                    name: copy_cstr(pq::PQfname(result, col)),
                    type_oid: pq::PQftype(result, col),
                    format: if pq::PQfformat(result, col) == 0 {
                        Format::Text
                    } else {
                        Format::Binary
                    },
                });
            }

            let n_tuples = pq::PQntuples(result);
            let mut rows = Vec::with_capacity(n_tuples.max(0) as usize);
            for row in 0..n_tuples {
                let mut values = Vec::with_capacity(infos.len());
                for col in 0..n_fields {
                    if pq::PQgetisnull(result, row, col) != 0 {
                        values.push(pgloop_core::Value::Null);
                        continue;
                    }
                    let ptr = pq::PQgetvalue(result, row, col);
                    let len = pq::PQgetlength(result, row, col).max(0) as usize;
                    let bytes = std::slice::from_raw_parts(ptr.cast::<u8>(), len);
                    let value = match infos[col as usize].format {
                        Format::Text => {
                            pgloop_core::Value::Text(String::from_utf8_lossy(bytes).into_owned())
                        }
                        Format::Binary => pgloop_core::Value::Bytes(bytes.to_vec()),
                    };
                    values.push(value);
                }
                rows.push(values);
            }

            let mut table = ResultTable::new(copy_cstr(pq::PQcmdStatus(result)), infos, rows);
            table.rows_affected = copy_cstr(pq::PQcmdTuples(result)).parse().ok();
            let oid = pq::PQoidValue(result);
            table.oid = (oid != 0).then_some(oid);

            WireResult {
                status,
                table,
                error_message: String::new(),
                error_fields: ErrorFields::default(),
            }
        };
        pq::PQclear(result);
        wire
    }
}

/// Borrowed views of the parameter arrays in the layout the `PQsend*`
/// primitives expect; the buffers stay owned by the `ParamValues`.
struct RawParams {
    values: Vec<*const c_char>,
    lengths: Vec<c_int>,
    formats: Vec<c_int>,
}

impl RawParams {
    fn new(params: &ParamValues) -> Self {
        let mut values = Vec::with_capacity(params.len());
        let mut lengths = Vec::with_capacity(params.len());
        let mut formats = Vec::with_capacity(params.len());
        for (buffer, length, format) in params.iter() {
            values.push(buffer.map_or(std::ptr::null(), |b| b.as_ptr().cast::<c_char>()));
            lengths.push(length);
            formats.push(format.code());
        }
        Self {
            values,
            lengths,
            formats,
        }
    }

    fn len(&self) -> c_int {
        self.values.len() as c_int
    }
}

fn to_cstring(text: &str) -> Option<CString> {
    CString::new(text).ok()
}

impl WireClient for LibpqClient {
    fn status_ok(&self) -> bool {
        unsafe { pq::PQstatus(self.conn) != pq::ConnStatusType::CONNECTION_BAD }
    }

    fn set_nonblocking(&mut self) -> bool {
        unsafe { pq::PQsetnonblocking(self.conn, 1) == 0 }
    }

    fn socket(&self) -> Option<RawFd> {
        let fd = unsafe { pq::PQsocket(self.conn) };
        (fd >= 0).then_some(fd)
    }

    fn connect_poll(&mut self) -> PollingPhase {
        map_polling(unsafe { pq::PQconnectPoll(self.conn) })
    }

    fn reset_start(&mut self) -> bool {
        unsafe { pq::PQresetStart(self.conn) != 0 }
    }

    fn reset_poll(&mut self) -> PollingPhase {
        map_polling(unsafe { pq::PQresetPoll(self.conn) })
    }

    fn send_query(&mut self, command: &str) -> bool {
        let Some(command) = to_cstring(command) else {
            return false;
        };
        unsafe { pq::PQsendQuery(self.conn, command.as_ptr()) == 1 }
    }

    fn send_query_params(&mut self, command: &str, params: &ParamValues) -> bool {
        let Some(command) = to_cstring(command) else {
            return false;
        };
        let raw = RawParams::new(params);
        unsafe {
            pq::PQsendQueryParams(
                self.conn,
                command.as_ptr(),
                raw.len(),
                std::ptr::null(),
                raw.values.as_ptr(),
                raw.lengths.as_ptr(),
                raw.formats.as_ptr(),
                0,
            ) == 1
        }
    }

    fn send_prepare(&mut self, name: &str, command: &str) -> bool {
        let (Some(name), Some(command)) = (to_cstring(name), to_cstring(command)) else {
            return false;
        };
        unsafe {
            pq::PQsendPrepare(self.conn, name.as_ptr(), command.as_ptr(), 0, std::ptr::null()) == 1
        }
    }

    fn send_query_prepared(&mut self, name: &str, params: &ParamValues) -> bool {
        let Some(name) = to_cstring(name) else {
            return false;
        };
        let raw = RawParams::new(params);
        unsafe {
            pq::PQsendQueryPrepared(
                self.conn,
                name.as_ptr(),
                raw.len(),
                raw.values.as_ptr(),
                raw.lengths.as_ptr(),
                raw.formats.as_ptr(),
                0,
            ) == 1
        }
    }

    fn send_describe_prepared(&mut self, name: &str) -> bool {
        let Some(name) = to_cstring(name) else {
            return false;
        };
        unsafe { pq::PQsendDescribePrepared(self.conn, name.as_ptr()) == 1 }
    }

    fn send_describe_portal(&mut self, name: &str) -> bool {
        let Some(name) = to_cstring(name) else {
            return false;
        };
        unsafe { pq::PQsendDescribePortal(self.conn, name.as_ptr()) == 1 }
    }

    fn flush(&mut self) -> FlushOutcome {
        match unsafe { pq::PQflush(self.conn) } {
            0 => FlushOutcome::Sent,
            1 => FlushOutcome::Pending,
            _ => FlushOutcome::Failed,
        }
    }

    fn consume_input(&mut self) -> bool {
        unsafe { pq::PQconsumeInput(self.conn) == 1 }
    }

    fn is_busy(&mut self) -> bool {
        unsafe { pq::PQisBusy(self.conn) == 1 }
    }

    fn take_result(&mut self) -> Option<WireResult> {
        let result = unsafe { pq::PQgetResult(self.conn) };
        if result.is_null() {
            None
        } else {
            Some(unsafe { marshal_result(result) })
        }
    }

    fn take_notification(&mut self) -> Option<Notification> {
        let notify = unsafe { pq::PQnotifies(self.conn) };
        if notify.is_null() {
            return None;
        }
        let notification = unsafe {
            Notification {
                channel: copy_cstr((*notify).relname),
                payload: copy_cstr((*notify).extra),
                backend_pid: (*notify).be_pid,
            }
        };
        unsafe { pq::PQfreemem(notify.cast::<c_void>()) };
        Some(notification)
    }

    fn error_message(&self) -> String {
        unsafe { copy_cstr(pq::PQerrorMessage(self.conn)) }
    }

    fn set_notice_hook(&mut self, hook: NoticeHook) {
        self.clear_notice_hook();
        let hook = Box::into_raw(Box::new(hook));
        self.notice_hook = Some(hook);
        unsafe {
            pq::PQsetNoticeReceiver(self.conn, Some(notice_receiver), hook.cast::<c_void>());
        }
    }

    fn db(&self) -> String {
        unsafe { copy_cstr(pq::PQdb(self.conn)) }
    }

    fn user(&self) -> String {
        unsafe { copy_cstr(pq::PQuser(self.conn)) }
    }

    fn host(&self) -> String {
        unsafe { copy_cstr(pq::PQhost(self.conn)) }
    }

    fn port(&self) -> String {
        unsafe { copy_cstr(pq::PQport(self.conn)) }
    }

    fn backend_pid(&self) -> i32 {
        unsafe { pq::PQbackendPID(self.conn) }
    }

    fn server_version(&self) -> i32 {
        unsafe { pq::PQserverVersion(self.conn) }
    }

    fn transaction_status(&self) -> TransactionStatus {
        use pq::PGTransactionStatusType as T;
        match unsafe { pq::PQtransactionStatus(self.conn) } {
            T::PQTRANS_IDLE => TransactionStatus::Idle,
            T::PQTRANS_ACTIVE => TransactionStatus::Active,
            T::PQTRANS_INTRANS => TransactionStatus::InTransaction,
            T::PQTRANS_INERROR => TransactionStatus::InError,
            _ => TransactionStatus::Unknown,
        }
    }

    fn parameter_status(&self, name: &str) -> Option<String> {
        let name = to_cstring(name)?;
        let value = unsafe { pq::PQparameterStatus(self.conn, name.as_ptr()) };
        if value.is_null() {
            None
        } else {
            Some(unsafe { copy_cstr(value) })
        }
    }
}
