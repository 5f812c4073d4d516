//
use std::fmt;
use std::io;

use crate::api::ApiProblem;

/// acme-issuer result.
pub type Result<T> = ::std::result::Result<T, Error>;

/// acme-issuer errors.
#[derive(Debug)]
pub enum Error {
    /// The directory could not be fetched or parsed.
    Directory(String),
    /// No usable nonce, or the account key failed to sign.
    Signing(String),
    /// Account registration failed for some other reason than the
    /// account already existing.
    Registration(String),
    /// The ACME API reported a challenge as invalid, or no registered
    /// solver could take on the domain.
    Challenge {
        /// The domain being authorized.
        domain: String,
        /// Authority status/problem, or the local reason.
        reason: String,
    },
    /// A polling budget was exhausted.
    Timeout(String),
    /// One or more domains failed during [`Client::authorize`].
    ///
    /// [`Client::authorize`]: struct.Client.html#method.authorize
    Authorization(Vec<DomainError>),
    /// The ACME API refused to issue the certificate.
    Issuance(String),
    /// An API call failed with a problem document.
    Api(ApiProblem),
    /// The request never got a response.
    Transport(String),
    /// The caller cancelled the operation, or its deadline passed.
    Cancelled,
    /// JSON serialization/deserialization error.
    Json(serde_json::Error),
    /// std::io error.
    Io(io::Error),
    /// Some other error. Notice that `Error` is
    /// `From<String>` and `From<&str>` and it becomes `Other`.
    Other(String),
}

impl Error {
    /// Errors worth another attempt when polling.
    pub(crate) fn is_transient(&self) -> bool {
        match self {
            Error::Transport(_) | Error::Io(_) => true,
            Error::Api(problem) => problem.status.map(|s| s >= 500).unwrap_or(false),
            _ => false,
        }
    }
}

impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Directory(s) => write!(f, "directory: {}", s),
            Error::Signing(s) => write!(f, "signing: {}", s),
            Error::Registration(s) => write!(f, "registration: {}", s),
            Error::Challenge { domain, reason } => write!(f, "[{}] challenge: {}", domain, reason),
            Error::Timeout(s) => write!(f, "timed out waiting for {}", s),
            Error::Authorization(errs) => {
                write!(f, "authorization failed for {} domain(s)", errs.len())?;
                for e in errs {
                    write!(f, "; {}", e)?;
                }
                Ok(())
            }
            Error::Issuance(s) => write!(f, "issuance: {}", s),
            Error::Api(p) => write!(f, "{}", p),
            Error::Transport(s) => write!(f, "transport: {}", s),
            Error::Cancelled => write!(f, "cancelled"),
            Error::Json(e) => write!(f, "{}", e),
            Error::Io(e) => write!(f, "{}", e),
            Error::Other(s) => write!(f, "{}", s),
        }
    }
}

/// A failure for one domain of a multi domain authorization.
#[derive(Debug)]
pub struct DomainError {
    /// The domain that failed.
    pub domain: String,
    /// Why it failed.
    pub error: Error,
}

impl fmt::Display for DomainError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.error {
            // already carries the domain
            Error::Challenge { .. } => write!(f, "{}", self.error),
            e => write!(f, "[{}] {}", self.domain, e),
        }
    }
}

impl From<ApiProblem> for Error {
    fn from(p: ApiProblem) -> Self {
        Error::Api(p)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Json(e)
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<openssl::error::ErrorStack> for Error {
    fn from(e: openssl::error::ErrorStack) -> Self {
        Error::Other(format!("openssl: {}", e))
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Other(s)
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Other(s.to_string())
    }
}
