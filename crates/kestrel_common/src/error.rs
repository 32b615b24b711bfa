use thiserror::Error;

/// Convenience alias for `Result<T, KestrelError>`.
pub type KestrelResult<T> = Result<T, KestrelError>;

/// Error classification used by the front-end to decide how to report a
/// failed statement.
///
/// - `Configuration`: rule or token problem, raised before any backend I/O
/// - `Backend`: a data source rejected one of the physical statements
/// - `Timeout`: the completion barrier was not satisfied in time
/// - `InternalBug`: should never happen; carries a code for post-mortem
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    Backend,
    Timeout,
    InternalBug,
}

/// Top-level error type that all crate-specific errors convert into.
#[derive(Error, Debug)]
pub enum KestrelError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Routing error: {0}")]
    Routing(#[from] RoutingError),

    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    /// A per-unit failure reported by a backend data source.
    #[error("Backend error on data source '{data_source}': {message}")]
    Backend { data_source: String, message: String },

    /// The statement's completion barrier was not satisfied in time.
    #[error("Statement timed out after {timeout_ms}ms ({pending_units} unit(s) still pending)")]
    Timeout { timeout_ms: u64, pending_units: usize },

    /// Connection could not be acquired from the pool collaborator.
    #[error("Connection pool error on data source '{data_source}': {reason}")]
    Pool { data_source: String, reason: String },

    #[error("Internal error: {0}")]
    Internal(String),

    /// Internal bug: should never occur in production.
    #[error("InternalBug [{error_code}]: {message} | context: {debug_context}")]
    InternalBug {
        error_code: &'static str,
        message: String,
        debug_context: String,
    },
}

/// Rule, token and configuration-file errors. All of these are raised before
/// any backend I/O happens.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Unknown token kind: {0}")]
    UnknownToken(String),

    #[error("Malformed token list: {0}")]
    MalformedTokens(String),

    #[error("Token at position {begin} overlaps the previous token ending at {previous_stop}")]
    OverlappingToken { begin: usize, previous_stop: usize },

    #[error("Token at position {begin} lies outside the SQL text of length {sql_len}")]
    TokenOutOfRange { begin: usize, sql_len: usize },

    #[error("No sharding rule for logical table '{0}' and no default data source")]
    MissingTableRule(String),

    #[error("Cannot resolve logical table for index '{0}'")]
    UnknownIndex(String),

    #[error("Binding table inconsistency: {0}")]
    BindingTableInconsistent(String),

    #[error("Invalid data node '{0}': expected '<data_source>.<table>'")]
    InvalidDataNode(String),

    #[error("Unknown data source '{0}'")]
    UnknownDataSource(String),

    #[error("Statement context missing for {0}")]
    MissingContext(&'static str),

    #[error("Invalid rule: {0}")]
    InvalidRule(String),

    #[error("Failed to read config file {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("Failed to parse config: {0}")]
    Parse(String),
}

/// Errors raised while computing routing units.
#[derive(Error, Debug)]
pub enum RoutingError {
    #[error("Sharding value type not supported by algorithm '{algorithm}': {value}")]
    UnsupportedValue { algorithm: &'static str, value: String },

    #[error("Sharding algorithm '{algorithm}' returned no target among {available} candidates")]
    NoTarget { algorithm: &'static str, available: usize },

    #[error("Parameter ${0} referenced by the statement was not provided")]
    ParamMissing(usize),

    #[error("Key generation failed: {0}")]
    KeyGeneration(String),
}

/// Errors raised by the coordinator or the merge engine.
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("Gather aborted: {buffered} rows exceed max_rows_buffered limit of {limit}")]
    TooManyRows { buffered: usize, limit: usize },

    #[error("Unit {index} produced a {got} response where a {expected} response was expected")]
    UnexpectedResponse {
        index: usize,
        expected: &'static str,
        got: &'static str,
    },

    #[error("Column index out of bounds: {0}")]
    ColumnOutOfBounds(usize),

    #[error("Unit task failed: {0}")]
    TaskFailed(String),
}

impl KestrelError {
    /// Classify this error for reporting.
    pub fn kind(&self) -> ErrorKind {
        match self {
            KestrelError::Config(_) | KestrelError::Routing(_) => ErrorKind::Configuration,
            KestrelError::Backend { .. } | KestrelError::Pool { .. } => ErrorKind::Backend,
            KestrelError::Execution(ExecutionError::TooManyRows { .. }) => ErrorKind::Backend,
            KestrelError::Timeout { .. } => ErrorKind::Timeout,
            KestrelError::Execution(_)
            | KestrelError::Internal(_)
            | KestrelError::InternalBug { .. } => ErrorKind::InternalBug,
        }
    }

    pub fn is_config_error(&self) -> bool {
        matches!(self.kind(), ErrorKind::Configuration)
    }

    pub fn is_backend_error(&self) -> bool {
        matches!(self.kind(), ErrorKind::Backend)
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self.kind(), ErrorKind::Timeout)
    }

    pub fn is_internal_bug(&self) -> bool {
        matches!(self.kind(), ErrorKind::InternalBug)
    }

    /// Construct a backend error for a data source.
    pub fn backend(data_source: impl Into<String>, message: impl Into<String>) -> Self {
        KestrelError::Backend {
            data_source: data_source.into(),
            message: message.into(),
        }
    }

    /// Construct an internal bug error with a stable code and context.
    pub fn internal_bug(
        error_code: &'static str,
        message: impl Into<String>,
        debug_context: impl Into<String>,
    ) -> Self {
        KestrelError::InternalBug {
            error_code,
            message: message.into(),
            debug_context: debug_context.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_errors_classified_as_configuration() {
        let err: KestrelError = ConfigError::UnknownToken("Foo".into()).into();
        assert!(err.is_config_error());
        assert!(err.to_string().contains("Unknown token kind: Foo"));

        let err: KestrelError = RoutingError::ParamMissing(3).into();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn test_timeout_distinct_from_backend() {
        let timeout = KestrelError::Timeout {
            timeout_ms: 50,
            pending_units: 2,
        };
        let backend = KestrelError::backend("ds_0", "table missing");
        assert!(timeout.is_timeout());
        assert!(!timeout.is_backend_error());
        assert!(backend.is_backend_error());
        assert!(!backend.is_timeout());
        assert!(backend.to_string().contains("ds_0"));
    }

    #[test]
    fn test_internal_bug_carries_code() {
        let err = KestrelError::internal_bug("E-MERGE-001", "heap empty", "units=3");
        assert!(err.is_internal_bug());
        assert!(err.to_string().contains("E-MERGE-001"));
    }
}
