//! Server notice routing.
//!
//! PostgreSQL sends notices (`RAISE NOTICE`, deprecation warnings, ...)
//! asynchronously on a connection. Each notice is routed to a log level
//! by its severity tag; tags this crate does not know are logged as errors
//! so nothing is dropped.

use std::fmt;

use tracing::Level;

/// Severity tag of a server notice.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NoticeSeverity {
    /// `DEBUG` (any of `DEBUG1`..`DEBUG5` is reported as `DEBUG`).
    Debug,
    /// `LOG`
    Log,
    /// `INFO`
    Info,
    /// `NOTICE`
    Notice,
    /// `WARNING`
    Warning,
    /// `EXCEPTION`
    Exception,
    /// Any other tag, kept verbatim.
    Other(String),
}

impl NoticeSeverity {
    /// Parse a severity tag. Never fails: unknown tags become [`Self::Other`].
    #[must_use]
    pub fn parse(tag: &str) -> Self {
        match tag {
            "DEBUG" => Self::Debug,
            "LOG" => Self::Log,
            "INFO" => Self::Info,
            "NOTICE" => Self::Notice,
            "WARNING" => Self::Warning,
            "EXCEPTION" => Self::Exception,
            other => Self::Other(other.to_string()),
        }
    }

    /// The log level a notice of this severity is emitted at.
    #[must_use]
    pub fn level(&self) -> Level {
        match self {
            Self::Debug => Level::DEBUG,
            Self::Log | Self::Info | Self::Notice => Level::INFO,
            Self::Warning => Level::WARN,
            Self::Exception | Self::Other(_) => Level::ERROR,
        }
    }

    /// The tag as sent by the server.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Debug => "DEBUG",
            Self::Log => "LOG",
            Self::Info => "INFO",
            Self::Notice => "NOTICE",
            Self::Warning => "WARNING",
            Self::Exception => "EXCEPTION",
            Self::Other(tag) => tag,
        }
    }
}

impl From<&str> for NoticeSeverity {
    fn from(tag: &str) -> Self {
        Self::parse(tag)
    }
}

impl fmt::Display for NoticeSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A notice received from the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    /// Severity tag.
    pub severity: NoticeSeverity,
    /// Primary message.
    pub message: String,
}

impl Notice {
    /// Create a notice from a raw severity tag and message.
    #[must_use]
    pub fn new(severity: &str, message: impl Into<String>) -> Self {
        Self {
            severity: NoticeSeverity::parse(severity),
            message: message.into(),
        }
    }

    /// The log level this notice is emitted at.
    #[must_use]
    pub fn level(&self) -> Level {
        self.severity.level()
    }
}
