//! Error types for the anycast IP controller
//!
//! Every error maps onto one of four classes (see [`ErrorClass`]) which decide
//! how the engine treats a failed reconcile task.

use thiserror::Error;

/// Result type alias for controller operations
pub type Result<T> = std::result::Result<T, Error>;

/// How a failure should be handled by the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Node or address vanished; usually a terminal success
    NotFound,
    /// Transient external failure or "not yet in desired state"
    Retryable,
    /// Address legitimately owned by a different instance
    Conflict,
    /// Unusable configuration; aborts startup
    Fatal,
}

/// Core error type for the controller
#[derive(Error, Debug)]
pub enum Error {
    /// A node or address does not exist (any more)
    #[error("Not found: {0}")]
    NotFound(String),

    /// The address has not reached the state this step waits for
    #[error("Pending: {0}")]
    Pending(String),

    /// The address is bound to an instance other than the requesting node's
    #[error("Address {address_id} is bound to another instance ({instance_id})")]
    Conflict {
        /// Address identifier
        address_id: String,
        /// Instance currently holding the address
        instance_id: String,
    },

    /// Allocation referenced tags that do not exist in the tag namespace yet
    #[error("Tag does not exist: {0}")]
    MissingTag(String),

    /// A record that should be created already exists
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Rate limiting errors
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// Authentication errors
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// HTTP transport errors
    #[error("HTTP error: {0}")]
    Http(String),

    /// Provider-specific error
    #[error("Provider error ({provider}): {message}")]
    Provider {
        /// Provider name
        provider: String,
        /// Error message
        message: String,
    },

    /// Node store errors
    #[error("Node store error: {0}")]
    NodeStore(String),

    /// Cluster record store errors
    #[error("Record store error: {0}")]
    RecordStore(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a "not found" error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a "not yet in desired state" error
    pub fn pending(msg: impl Into<String>) -> Self {
        Self::Pending(msg.into())
    }

    /// Create a conflict error
    pub fn conflict(address_id: impl Into<String>, instance_id: impl Into<String>) -> Self {
        Self::Conflict {
            address_id: address_id.into(),
            instance_id: instance_id.into(),
        }
    }

    /// Create a missing tag error
    pub fn missing_tag(msg: impl Into<String>) -> Self {
        Self::MissingTag(msg.into())
    }

    /// Create an "already exists" error
    pub fn already_exists(msg: impl Into<String>) -> Self {
        Self::AlreadyExists(msg.into())
    }

    /// Create a rate limit error
    pub fn rate_limited(msg: impl Into<String>) -> Self {
        Self::RateLimited(msg.into())
    }

    /// Create an authentication error
    pub fn auth(msg: impl Into<String>) -> Self {
        Self::Authentication(msg.into())
    }

    /// Create an HTTP error
    pub fn http(msg: impl Into<String>) -> Self {
        Self::Http(msg.into())
    }

    /// Create a provider-specific error
    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Create a node store error
    pub fn node_store(msg: impl Into<String>) -> Self {
        Self::NodeStore(msg.into())
    }

    /// Create a record store error
    pub fn record_store(msg: impl Into<String>) -> Self {
        Self::RecordStore(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Classify this error
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::NotFound(_) => ErrorClass::NotFound,
            Self::Conflict { .. } => ErrorClass::Conflict,
            Self::Config(_) | Self::InvalidInput(_) => ErrorClass::Fatal,
            _ => ErrorClass::Retryable,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.class() == ErrorClass::NotFound
    }

    pub fn is_conflict(&self) -> bool {
        self.class() == ErrorClass::Conflict
    }

    pub fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::Retryable
    }
}

/// Helper for converting anyhow::Error to our Error type
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}
