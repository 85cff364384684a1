use std::fmt;

/// Stable error codes for aggregation and alerting.
///
/// These codes are part of the external contract: dashboards key on them, so
/// they must not change across versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    Unknown,
    Timeout,
    ServiceNotFound,
    Codec,
    Transport,
    Cancelled,
    InvalidArgument,
    Internal,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::Unknown => "UNKNOWN",
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::ServiceNotFound => "SERVICE_NOT_FOUND",
            ErrorCode::Codec => "CODEC",
            ErrorCode::Transport => "TRANSPORT",
            ErrorCode::Cancelled => "CANCELLED",
            ErrorCode::InvalidArgument => "INVALID_ARGUMENT",
            ErrorCode::Internal => "INTERNAL",
        }
    }

    /// Parses a code tag, e.g. `"TIMEOUT"`. Unknown tags yield `None`.
    pub fn parse(tag: &str) -> Option<ErrorCode> {
        Some(match tag {
            "UNKNOWN" => ErrorCode::Unknown,
            "TIMEOUT" => ErrorCode::Timeout,
            "SERVICE_NOT_FOUND" => ErrorCode::ServiceNotFound,
            "CODEC" => ErrorCode::Codec,
            "TRANSPORT" => ErrorCode::Transport,
            "CANCELLED" => ErrorCode::Cancelled,
            "INVALID_ARGUMENT" => ErrorCode::InvalidArgument,
            "INTERNAL" => ErrorCode::Internal,
            _ => return None,
        })
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unified error wrapper.
///
/// Renders as `"[CODE] op: message: cause"` with the op and cause segments
/// omitted when absent.
#[derive(Debug)]
pub struct Error {
    code: ErrorCode,
    op: Option<String>,
    msg: String,
    cause: Option<Box<dyn std::error::Error + Send + Sync>>,
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn new(code: ErrorCode, msg: impl Into<String>) -> Self {
        Error {
            code,
            op: None,
            msg: msg.into(),
            cause: None,
        }
    }

    pub fn with_op(code: ErrorCode, op: impl Into<String>, msg: impl Into<String>) -> Self {
        Error {
            code,
            op: Some(op.into()),
            msg: msg.into(),
            cause: None,
        }
    }

    /// Wraps an underlying error, keeping its message visible in the chain.
    pub fn wrap(
        code: ErrorCode,
        op: impl Into<String>,
        cause: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        let cause = cause.into();
        Error {
            code,
            op: Some(op.into()),
            msg: cause.to_string(),
            cause: Some(cause),
        }
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn op(&self) -> Option<&str> {
        self.op.as_deref()
    }

    pub fn message(&self) -> &str {
        &self.msg
    }

    /// Reconstructs an error from a rendered string that crossed the wire.
    ///
    /// A leading `"[CODE] "` tag restores the original code; anything else
    /// comes back as `UNKNOWN`.
    pub fn from_wire(s: &str) -> Error {
        if let Some(rest) = s.strip_prefix('[') {
            if let Some(end) = rest.find(']') {
                if let Some(code) = ErrorCode::parse(&rest[..end]) {
                    let msg = rest[end + 1..].trim_start_matches(' ');
                    let msg = msg.strip_prefix(": ").unwrap_or(msg);
                    return Error::new(code, msg);
                }
            }
        }
        Error::new(ErrorCode::Unknown, s)
    }

    /// The stable code of any error, `UNKNOWN` for foreign error types.
    pub fn code_of(err: &(dyn std::error::Error + 'static)) -> ErrorCode {
        err.downcast_ref::<Error>()
            .map(|e| e.code)
            .unwrap_or(ErrorCode::Unknown)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.code)?;
        if let Some(op) = &self.op {
            write!(f, " {op}")?;
        }
        if !self.msg.is_empty() {
            write!(f, ": {}", self.msg)?;
        }
        // The wrapped cause already contributed its text to `msg`; only
        // render a trailing segment when the two differ.
        if let Some(cause) = &self.cause {
            let cause = cause.to_string();
            if cause != self.msg {
                write!(f, ": {cause}")?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_deref()
            .map(|c| c as &(dyn std::error::Error + 'static))
    }
}
