//! Error types for replkit

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// One sibling that could not be brought up to date during fan-out.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplicationFailure {
    pub sibling: String,
    pub reason: String,
}

impl std::fmt::Display for ReplicationFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.sibling, self.reason)
    }
}

/// Broad classification of an [`Error`], stable across context wrapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Parameter,
    InvalidOperation,
    Routing,
    MismatchedOperation,
    PropertyStore,
    Catalog,
    Replication,
    Hierarchy,
    Child,
    Config,
    Other,
}

#[derive(Error, Debug)]
pub enum Error {
    // === Request Errors ===
    #[error("Parameter error: {0}")]
    Parameter(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    // === Routing Errors ===
    #[error("No viable child: every candidate voted zero for {0}")]
    NoViableChild(String),

    #[error("Vote probe failed on child {child}: {reason}")]
    ChildProbe { child: String, reason: String },

    // === Tracking Errors ===
    #[error("Existing operation \"{existing}\" on {object} does not match current operation \"{incoming}\"")]
    MismatchedOperation {
        object: String,
        existing: String,
        incoming: String,
    },

    #[error("Property store error: {0}")]
    PropertyStore(String),

    // === Catalog / Replication Errors ===
    #[error("Catalog error: {0}")]
    Catalog(String),

    #[error("Replication of {object} failed on {} sibling(s): {}", .failures.len(), join_failures(.failures))]
    Replication {
        object: String,
        failures: Vec<ReplicationFailure>,
    },

    // === Hierarchy Errors ===
    #[error("Hierarchy cycle: {node} already present in {hierarchy}")]
    HierarchyCycle { node: String, hierarchy: String },

    #[error("Hierarchy error: {0}")]
    Hierarchy(String),

    // === Child Errors ===
    #[error("Child not found: {0}")]
    ChildNotFound(String),

    #[error("Child {child} failed: {reason}")]
    Child { child: String, reason: String },

    // === Config Errors ===
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // === Generic ===
    #[error("{op}: {source}")]
    Operation {
        op: String,
        #[source]
        source: Box<Error>,
    },

    #[error("{0}")]
    Other(String),
}

fn join_failures(failures: &[ReplicationFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

impl Error {
    /// Wrap this error with the identity of the operation that failed.
    /// The wrapped error keeps its kind.
    pub fn context(self, op: impl Into<String>) -> Self {
        Error::Operation {
            op: op.into(),
            source: Box::new(self),
        }
    }

    /// Innermost error, looking through any operation context.
    pub fn root(&self) -> &Error {
        match self {
            Error::Operation { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self.root() {
            Error::Parameter(_) => ErrorKind::Parameter,
            Error::InvalidOperation(_) => ErrorKind::InvalidOperation,
            Error::NoViableChild(_) | Error::ChildProbe { .. } => ErrorKind::Routing,
            Error::MismatchedOperation { .. } => ErrorKind::MismatchedOperation,
            Error::PropertyStore(_) => ErrorKind::PropertyStore,
            Error::Catalog(_) => ErrorKind::Catalog,
            Error::Replication { .. } => ErrorKind::Replication,
            Error::HierarchyCycle { .. } | Error::Hierarchy(_) => ErrorKind::Hierarchy,
            Error::ChildNotFound(_) | Error::Child { .. } => ErrorKind::Child,
            Error::InvalidConfig(_) => ErrorKind::Config,
            Error::Operation { .. } | Error::Other(_) => ErrorKind::Other,
        }
    }

    /// Did routing fail (no viable child, or a probe failed)?
    pub fn is_routing(&self) -> bool {
        self.kind() == ErrorKind::Routing
    }

    /// Siblings that failed, if this is an aggregate fan-out failure.
    pub fn replication_failures(&self) -> Option<&[ReplicationFailure]> {
        match self.root() {
            Error::Replication { failures, .. } => Some(failures),
            _ => None,
        }
    }
}

/// Attach operation context to a `Result` in one call.
pub trait ResultExt<T> {
    fn context(self, op: impl Into<String>) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, op: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.context(op))
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Other(s.to_string())
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Other(s)
    }
}

impl From<config::ConfigError> for Error {
    fn from(e: config::ConfigError) -> Self {
        Error::InvalidConfig(e.to_string())
    }
}
