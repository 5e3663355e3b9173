//! Connection configuration.
//!
//! [`PgConfig`] is a builder over the parameters the client library's
//! connect entry point understands; [`PgConfig::to_conninfo`] renders them
//! as a conninfo string, so `connect` accepts either a raw URL/conninfo or a
//! config.

use std::collections::BTreeMap;
use std::time::Duration;

/// SSL mode, forwarded to the client library as the `sslmode` parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SslMode {
    /// Do not use SSL
    Disable,
    /// Try SSL, fall back to plain
    #[default]
    Prefer,
    /// Require SSL
    Require,
    /// Require SSL and verify the server certificate
    VerifyCa,
    /// Require SSL and verify the certificate matches the hostname
    VerifyFull,
}

impl SslMode {
    /// The `sslmode` parameter value.
    pub const fn as_param(self) -> &'static str {
        match self {
            SslMode::Disable => "disable",
            SslMode::Prefer => "prefer",
            SslMode::Require => "require",
            SslMode::VerifyCa => "verify-ca",
            SslMode::VerifyFull => "verify-full",
        }
    }
}

/// Connection parameters.
#[derive(Debug, Clone)]
pub struct PgConfig {
    /// Hostname or IP address
    pub host: String,
    /// Port number (default: 5432)
    pub port: u16,
    /// Username for authentication
    pub user: String,
    /// Password (optional for trust auth)
    pub password: Option<String>,
    /// Database name
    pub database: String,
    /// Application name (visible in `pg_stat_activity`)
    pub application_name: Option<String>,
    /// Connect timeout, rendered as `connect_timeout` whole seconds
    pub connect_timeout: Option<Duration>,
    /// SSL mode
    pub ssl_mode: SslMode,
    /// Additional conninfo parameters, rendered in key order
    pub options: BTreeMap<String, String>,
}

impl Default for PgConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            user: String::new(),
            password: None,
            database: String::new(),
            application_name: None,
            connect_timeout: None,
            ssl_mode: SslMode::default(),
            options: BTreeMap::new(),
        }
    }
}

impl PgConfig {
    /// Create a configuration for the given host, user, and database.
    pub fn new(
        host: impl Into<String>,
        user: impl Into<String>,
        database: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            user: user.into(),
            database: database.into(),
            ..Default::default()
        }
    }

    /// Set the port.
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the password.
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Set the application name.
    pub fn application_name(mut self, name: impl Into<String>) -> Self {
        self.application_name = Some(name.into());
        self
    }

    /// Set the connect timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Set the SSL mode.
    pub fn ssl_mode(mut self, mode: SslMode) -> Self {
        self.ssl_mode = mode;
        self
    }

    /// Set an additional conninfo parameter.
    pub fn option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// Render as a conninfo string for the client library.
    pub fn to_conninfo(&self) -> String {
        let mut pairs: Vec<(&str, String)> = vec![
            ("host", self.host.clone()),
            ("port", self.port.to_string()),
        ];
        if !self.user.is_empty() {
            pairs.push(("user", self.user.clone()));
        }
        if let Some(password) = &self.password {
            pairs.push(("password", password.clone()));
        }
        if !self.database.is_empty() {
            pairs.push(("dbname", self.database.clone()));
        }
        if let Some(name) = &self.application_name {
            pairs.push(("application_name", name.clone()));
        }
        if let Some(timeout) = self.connect_timeout {
            pairs.push(("connect_timeout", timeout.as_secs().max(1).to_string()));
        }
        pairs.push(("sslmode", self.ssl_mode.as_param().to_string()));
        for (key, value) in &self.options {
            pairs.push((key.as_str(), value.clone()));
        }

        pairs
            .iter()
            .map(|(key, value)| format!("{}={}", key, quote_conninfo(value)))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Quote a conninfo value: empty values and values containing whitespace,
/// quotes, or backslashes are wrapped in single quotes with escapes.
fn quote_conninfo(value: &str) -> String {
    let needs_quoting =
        value.is_empty() || value.chars().any(|c| c.is_whitespace() || c == '\'' || c == '\\');
    if !needs_quoting {
        return value.to_string();
    }

    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('\'');
    for c in value.chars() {
        if c == '\'' || c == '\\' {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('\'');
    quoted
}
