//! Error handling for the pool mining client
//!
//! One error type shared by the codec, sessions, scheduler and pool controller,
//! with enough classification for the restart policy to decide what to do.

use thiserror::Error;

/// Result type alias for pool mining operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the pool mining client
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP request errors (endpoint resolution)
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON configuration parsing errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML configuration parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// The pool endpoint could not be resolved
    #[error("Endpoint resolution failed: {message}")]
    Resolution { message: String },

    /// Malformed or unexpected response from the pool
    #[error("Protocol error: {message}")]
    Protocol { message: String },

    /// Peer closed the connection
    #[error("Connection closed by {peer}")]
    ConnectionClosed { peer: String },

    /// Timeout errors
    #[error("Operation timed out: {operation}")]
    Timeout { operation: String },

    /// The pool rejected the username
    #[error("Invalid username: {username}")]
    InvalidUsername { username: String },

    /// Work function errors
    #[error("Worker error: {worker_type}: {message}")]
    Worker { worker_type: String, message: String },

    /// Task submitted to a stopped scheduler
    #[error("Scheduler {name} is stopped")]
    SchedulerStopped { name: String },

    /// A scheduled task panicked
    #[error("Task {task_id} panicked: {message}")]
    TaskPanicked { task_id: u64, message: String },

    /// Cancellation errors for async operations
    #[error("Operation was cancelled: {operation}")]
    Cancelled { operation: String },

    /// Invalid state errors
    #[error("Invalid state: {message}")]
    InvalidState { message: String },
}

impl Error {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a resolution error
    pub fn resolution(message: impl Into<String>) -> Self {
        Self::Resolution {
            message: message.into(),
        }
    }

    /// Create a protocol error
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Create a connection closed error
    pub fn connection_closed(peer: impl Into<String>) -> Self {
        Self::ConnectionClosed { peer: peer.into() }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>) -> Self {
        Self::Timeout {
            operation: operation.into(),
        }
    }

    /// Create an invalid username error
    pub fn invalid_username(username: impl Into<String>) -> Self {
        Self::InvalidUsername {
            username: username.into(),
        }
    }

    /// Create a worker error
    pub fn worker(worker_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Worker {
            worker_type: worker_type.into(),
            message: message.into(),
        }
    }

    /// Create a scheduler stopped error
    pub fn scheduler_stopped(name: impl Into<String>) -> Self {
        Self::SchedulerStopped { name: name.into() }
    }

    /// Create a cancellation error
    pub fn cancelled(operation: impl Into<String>) -> Self {
        Self::Cancelled {
            operation: operation.into(),
        }
    }

    /// Create an invalid state error
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Fatal errors end the whole process; retrying cannot change the outcome.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::InvalidUsername { .. } | Error::Config { .. })
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Error::Io(_) => true,
            Error::Resolution { .. } => true,
            Error::Protocol { .. } => true,
            Error::ConnectionClosed { .. } => true,
            Error::Timeout { .. } => true,
            _ => false,
        }
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            Error::Http(_) => "http",
            Error::Json(_) => "json",
            Error::Yaml(_) => "yaml",
            Error::Io(_) => "io",
            Error::Config { .. } => "config",
            Error::Resolution { .. } => "resolution",
            Error::Protocol { .. } => "protocol",
            Error::ConnectionClosed { .. } => "connection_closed",
            Error::Timeout { .. } => "timeout",
            Error::InvalidUsername { .. } => "invalid_username",
            Error::Worker { .. } => "worker",
            Error::SchedulerStopped { .. } => "scheduler_stopped",
            Error::TaskPanicked { .. } => "task_panicked",
            Error::Cancelled { .. } => "cancelled",
            Error::InvalidState { .. } => "invalid_state",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(Error::invalid_username("alice").is_fatal());
        assert!(Error::config("bad").is_fatal());
        assert!(!Error::resolution("empty host").is_fatal());
        assert!(!Error::connection_closed("pool").is_fatal());
    }

    #[test]
    fn test_retryable_classification() {
        let io = Error::from(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset"));
        assert!(io.is_retryable());
        assert!(Error::timeout("read").is_retryable());
        assert!(Error::resolution("empty host").is_retryable());
        assert!(!Error::invalid_username("alice").is_retryable());
        assert!(!Error::scheduler_stopped("Pool").is_retryable());
    }

    #[test]
    fn test_error_display() {
        let err = Error::invalid_username("alice");
        assert_eq!(err.to_string(), "Invalid username: alice");
        assert_eq!(err.category(), "invalid_username");

        let err = Error::TaskPanicked {
            task_id: 7,
            message: "boom".to_string(),
        };
        assert_eq!(err.to_string(), "Task 7 panicked: boom");
    }
}
