//! `irispg` error types.
use std::{fmt, io, str::Utf8Error};

use crate::{
    catalog::CatalogError,
    copy::CsvError,
    executor::{BackendError, ResourceError, TimeoutError},
    protocol::ProtocolError,
    session::AuthError,
    sql::TranslationError,
};

/// A specialized [`Result`] type for `irispg` operation.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// All possible error from the `irispg` library.
///
/// Every error maps to a PostgreSQL SQLSTATE via [`Error::sqlstate`]; the
/// session boundary turns it into an `ErrorResponse` frame.
pub struct Error {
    context: String,
    kind: ErrorKind,
}

/// All possible error kind from the `irispg` library.
pub enum ErrorKind {
    /// Frame length/type/state violation. The connection is closed after
    /// the error is reported.
    Protocol(ProtocolError),
    /// Bad credentials, missing user, or handshake timeout.
    Auth(AuthError),
    /// SQL rewrite produced output the backend would reject; the query
    /// never reaches the backend.
    Translation(TranslationError),
    /// The backend reported an error with an SQLCODE.
    Backend(BackendError),
    /// A statement or COPY step exceeded its deadline.
    Timeout(TimeoutError),
    /// Pool exhausted or memory bound exceeded.
    Resource(ResourceError),
    /// Malformed CSV input during COPY.
    Format(CsvError),
    /// Unresolved regclass, unknown OID, or inconsistent introspection.
    Catalog(CatalogError),
    /// Query canceled through a cancel-request connection.
    Canceled(Canceled),
    Io(io::Error),
    Utf8(Utf8Error),
}

crate::common::unit_error! {
    /// Query canceled on user request.
    pub struct Canceled("canceling statement due to user request");
}

impl Error {
    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    /// Attach context shown ahead of the message.
    pub fn context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }

    /// The five character SQLSTATE reported in `ErrorResponse`.
    pub fn sqlstate(&self) -> &str {
        match &self.kind {
            ErrorKind::Protocol(_) => "08P01",
            ErrorKind::Auth(_) => "28000",
            ErrorKind::Translation(_) => "42601",
            ErrorKind::Backend(e) => e.sqlstate(),
            ErrorKind::Timeout(_) => "57014",
            ErrorKind::Resource(_) => "53300",
            ErrorKind::Format(_) => "22P04",
            ErrorKind::Catalog(_) => "XX000",
            ErrorKind::Canceled(_) => "57014",
            ErrorKind::Io(_) => "08006",
            ErrorKind::Utf8(_) => "08P01",
        }
    }

    /// Whether the connection must be closed after reporting this error.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::Protocol(_) | ErrorKind::Auth(_) | ErrorKind::Io(_) | ErrorKind::Utf8(_)
        )
    }
}

macro_rules! from {
    (<$ty:ty>$pat:pat => $body:expr) => {
        impl From<$ty> for Error {
            fn from($pat: $ty) -> Self {
                Self { context: String::new(), kind: $body }
            }
        }
    };
}

from!(<ErrorKind>e => e);
from!(<ProtocolError>e => ErrorKind::Protocol(e));
from!(<AuthError>e => ErrorKind::Auth(e));
from!(<TranslationError>e => ErrorKind::Translation(e));
from!(<BackendError>e => ErrorKind::Backend(e));
from!(<TimeoutError>e => ErrorKind::Timeout(e));
from!(<ResourceError>e => ErrorKind::Resource(e));
from!(<CsvError>e => ErrorKind::Format(e));
from!(<CatalogError>e => ErrorKind::Catalog(e));
from!(<Canceled>e => ErrorKind::Canceled(e));
from!(<io::Error>e => ErrorKind::Io(e));
from!(<Utf8Error>e => ErrorKind::Utf8(e));

impl std::error::Error for Error { }

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.context.is_empty() {
            write!(f, "{}: ", self.context)?;
        }
        fmt::Display::fmt(&self.kind, f)
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}

impl std::error::Error for ErrorKind { }

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Protocol(e) => e.fmt(f),
            Self::Auth(e) => e.fmt(f),
            Self::Translation(e) => e.fmt(f),
            Self::Backend(e) => e.fmt(f),
            Self::Timeout(e) => e.fmt(f),
            Self::Resource(e) => e.fmt(f),
            Self::Format(e) => e.fmt(f),
            Self::Catalog(e) => e.fmt(f),
            Self::Canceled(e) => e.fmt(f),
            Self::Io(e) => e.fmt(f),
            Self::Utf8(e) => e.fmt(f),
        }
    }
}

impl fmt::Debug for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}
