use thiserror::Error;

/// Unified error type for the workshare primitives
#[derive(Debug, Error)]
pub enum WorkshareError {
    /// Bad construction parameters (zero step, zero workers, bad config file values)
    #[error("Invalid configuration: {message}")]
    InvalidConfiguration {
        message: String,
        field: Option<String>,
    },

    /// An operation was attempted in a state that does not allow it
    #[error("Invalid state for {operation}: {message}")]
    InvalidState { operation: String, message: String },

    /// A one-shot value has already been taken
    #[error("{resource} has already been consumed")]
    AlreadyConsumed { resource: String },

    /// A task function returned an error or panicked
    #[error("Worker {worker_id} failed: {message}")]
    WorkerFailure {
        worker_id: u64,
        message: String,
        panicked: bool,
    },

    /// The underlying mutex was poisoned
    #[error("Failed to acquire lock: {lock}")]
    LockAcquisitionFailure { lock: String },

    #[error("IO operation failed: {operation}")]
    Io {
        operation: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization failed: {format}")]
    Serialization {
        format: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl WorkshareError {
    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::InvalidConfiguration {
            message: message.into(),
            field: None,
        }
    }

    /// Create a configuration error naming the offending field
    pub fn configuration_field<S: Into<String>, F: Into<String>>(message: S, field: F) -> Self {
        Self::InvalidConfiguration {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    pub fn invalid_state<S: Into<String>, M: Into<String>>(operation: S, message: M) -> Self {
        Self::InvalidState {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn already_consumed<S: Into<String>>(resource: S) -> Self {
        Self::AlreadyConsumed {
            resource: resource.into(),
        }
    }

    /// Create a failure for a task that returned an error
    pub fn worker_failure<M: Into<String>>(worker_id: u64, message: M) -> Self {
        Self::WorkerFailure {
            worker_id,
            message: message.into(),
            panicked: false,
        }
    }

    /// Create a failure for a task that panicked
    pub fn worker_panic<M: Into<String>>(worker_id: u64, message: M) -> Self {
        Self::WorkerFailure {
            worker_id,
            message: message.into(),
            panicked: true,
        }
    }

    pub fn lock_poisoned<S: Into<String>>(lock: S) -> Self {
        Self::LockAcquisitionFailure { lock: lock.into() }
    }

    /// Create an IO error
    pub fn io<S: Into<String>>(operation: S, source: std::io::Error) -> Self {
        Self::Io {
            operation: operation.into(),
            source,
        }
    }

    /// Create a serialization error
    pub fn serialization<S: Into<String>, E: std::error::Error + Send + Sync + 'static>(
        format: S,
        source: E,
    ) -> Self {
        Self::Serialization {
            format: format.into(),
            source: Box::new(source),
        }
    }

    /// Worker id attached to a failure, if any
    pub fn worker_id(&self) -> Option<u64> {
        match self {
            Self::WorkerFailure { worker_id, .. } => Some(*worker_id),
            _ => None,
        }
    }

    /// Check if error is recoverable
    ///
    /// Lock poisoning is fatal; misuse of a handle or bad configuration will
    /// fail the same way on retry.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Io { .. } => true,
            Self::WorkerFailure { panicked, .. } => !panicked,
            Self::InvalidConfiguration { .. }
            | Self::InvalidState { .. }
            | Self::AlreadyConsumed { .. }
            | Self::LockAcquisitionFailure { .. }
            | Self::Serialization { .. } => false,
        }
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            Self::InvalidConfiguration { .. } => "configuration",
            Self::InvalidState { .. } => "state",
            Self::AlreadyConsumed { .. } => "consumed",
            Self::WorkerFailure { .. } => "worker",
            Self::LockAcquisitionFailure { .. } => "lock",
            Self::Io { .. } => "io",
            Self::Serialization { .. } => "serialization",
        }
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, WorkshareError>;

impl From<std::io::Error> for WorkshareError {
    fn from(err: std::io::Error) -> Self {
        Self::io("io_operation", err)
    }
}

impl From<serde_json::Error> for WorkshareError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization("json", err)
    }
}

impl From<serde_yaml::Error> for WorkshareError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::serialization("yaml", err)
    }
}

/// Macro for creating errors with context
#[macro_export]
macro_rules! workshare_error {
    (configuration, $message:expr) => {
        $crate::WorkshareError::configuration($message)
    };
    (configuration, $message:expr, $field:expr) => {
        $crate::WorkshareError::configuration_field($message, $field)
    };
    (state, $operation:expr, $message:expr) => {
        $crate::WorkshareError::invalid_state($operation, $message)
    };
    (consumed, $resource:expr) => {
        $crate::WorkshareError::already_consumed($resource)
    };
    (worker, $worker_id:expr, $message:expr) => {
        $crate::WorkshareError::worker_failure($worker_id, $message)
    };
    (lock, $lock:expr) => {
        $crate::WorkshareError::lock_poisoned($lock)
    };
}
