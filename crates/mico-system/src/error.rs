use std::borrow::Cow;

use mico::config::ImageError;
use mico::easylink::ExtraDataError;

/// All possible error kinds.
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// An invalid argument.
    Param,
    /// An operation invoked before the component it needs was initialized.
    NotInitialized,
    /// A fixed-capacity table is full.
    ResourceExhausted,
    /// A bounded wait expired.
    Timeout,
    /// A socket was closed or reset.
    Connection,
    /// A flash read, write or erase failed.
    Flash,
    /// An unrecoverable fault.
    Fatal,
    /// Data cannot be encoded or decoded.
    Serialization,
    /// The configuration server failed.
    Server,
    /// The `mDNS` advertisement failed.
    Advertisement,
}

impl ErrorKind {
    pub(crate) const fn description(self) -> &'static str {
        match self {
            Self::Param => "Invalid Parameter",
            Self::NotInitialized => "Not Initialized",
            Self::ResourceExhausted => "Resource Exhausted",
            Self::Timeout => "Timeout",
            Self::Connection => "Connection",
            Self::Flash => "Flash",
            Self::Fatal => "Fatal",
            Self::Serialization => "Serialization",
            Self::Server => "Configuration Server",
            Self::Advertisement => "Advertisement",
        }
    }
}

impl std::fmt::Debug for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.description().fmt(f)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.description().fmt(f)
    }
}

/// A system error.
#[derive(PartialEq)]
pub struct Error {
    kind: ErrorKind,
    info: Cow<'static, str>,
}

impl std::fmt::Debug for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.format(f)
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.format(f)
    }
}

impl std::error::Error for Error {}

impl Error {
    /// Creates an [`Error`] from an [`ErrorKind`] and a description.
    pub fn new(kind: ErrorKind, info: impl Into<Cow<'static, str>>) -> Self {
        Self {
            kind,
            info: info.into(),
        }
    }

    /// Returns the [`ErrorKind`].
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the error description.
    #[must_use]
    pub fn info(&self) -> &str {
        &self.info
    }

    fn format(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.info)
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::new(ErrorKind::Connection, e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::new(ErrorKind::Serialization, e.to_string())
    }
}

impl From<mdns_sd::Error> for Error {
    fn from(e: mdns_sd::Error) -> Self {
        Self::new(ErrorKind::Advertisement, e.to_string())
    }
}

impl From<ImageError> for Error {
    fn from(e: ImageError) -> Self {
        Self::new(ErrorKind::Serialization, e.to_string())
    }
}

impl From<ExtraDataError> for Error {
    fn from(e: ExtraDataError) -> Self {
        Self::new(ErrorKind::Param, e.to_string())
    }
}

/// A specialized [`Result`] type for [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use mico::easylink::ExtraDataError;

    use super::{Error, ErrorKind};

    #[test]
    fn error_format() {
        let error = Error::new(ErrorKind::ResourceExhausted, "subscriber table full");
        assert_eq!(error.kind(), ErrorKind::ResourceExhausted);
        assert_eq!(error.to_string(), "Resource Exhausted: subscriber table full");

        let error = Error::from(ExtraDataError::MissingDelimiter);
        assert_eq!(error.kind(), ErrorKind::Param);
        assert_eq!(error.info(), "extra data delimiter not found");
    }
}
