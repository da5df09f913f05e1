use thiserror::Error;

/// Main error type for the agent runtime
#[derive(Error, Debug)]
pub enum RunereumError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    // Registry / state machine errors
    #[error("Agent not found: {0}")]
    AgentNotFound(String),

    #[error("Illegal transition: from {from} to {to}")]
    IllegalTransition { from: String, to: String },

    #[error("Agent already terminated: {0}")]
    AlreadyTerminated(String),

    #[error("Capability disabled: {capability} is not enabled for agent {agent_id}")]
    CapabilityDisabled {
        agent_id: String,
        capability: String,
    },

    // Collaborator errors
    #[error("Data unavailable: {0}")]
    DataUnavailable(String),

    // Chain errors
    #[error("Submission error: {0}")]
    Submission(String),

    #[error("Confirmation timeout: {0}")]
    ConfirmationTimeout(String),

    #[error("Duplicate transaction: {0}")]
    DuplicateTransaction(String),

    // Delivery errors
    /// `last_sequence` is the last event of `agent_id` delivered before the
    /// drop. For a global subscription it says nothing about other agents.
    #[error("Subscriber overflow: subscriber {subscriber_id} dropped after {agent_id} sequence {last_sequence}")]
    SubscriberOverflow {
        subscriber_id: String,
        agent_id: String,
        last_sequence: u64,
    },

    // Fatal for the affected agent only
    #[error("Invariant violation for agent {agent_id}: {reason}")]
    InvariantViolation { agent_id: String, reason: String },

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl RunereumError {
    /// Errors that only skip the current cycle; the next trigger retries.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            RunereumError::DataUnavailable(_)
                | RunereumError::Submission(_)
                | RunereumError::ConfirmationTimeout(_)
                | RunereumError::DuplicateTransaction(_)
        )
    }

    /// Stable short code used in event payloads.
    pub fn code(&self) -> &'static str {
        match self {
            RunereumError::Config(_) => "config",
            RunereumError::InvalidConfiguration(_) => "invalid_configuration",
            RunereumError::AgentNotFound(_) => "agent_not_found",
            RunereumError::IllegalTransition { .. } => "illegal_transition",
            RunereumError::AlreadyTerminated(_) => "already_terminated",
            RunereumError::CapabilityDisabled { .. } => "capability_disabled",
            RunereumError::DataUnavailable(_) => "data_unavailable",
            RunereumError::Submission(_) => "submission_error",
            RunereumError::ConfirmationTimeout(_) => "confirmation_timeout",
            RunereumError::DuplicateTransaction(_) => "duplicate_transaction",
            RunereumError::SubscriberOverflow { .. } => "subscriber_overflow",
            RunereumError::InvariantViolation { .. } => "invariant_violation",
            RunereumError::Json(_) => "json",
            RunereumError::Toml(_) => "toml",
            RunereumError::Io(_) => "io",
            RunereumError::Internal(_) => "internal",
            RunereumError::Cancelled => "cancelled",
            RunereumError::Other(_) => "other",
        }
    }
}

/// Result type alias for RunereumError
pub type Result<T> = std::result::Result<T, RunereumError>;

/// Specific error types for chain submission and confirmation
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ChainError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Nonce error: {0}")]
    Nonce(String),

    #[error("Transaction rejected: {0}")]
    Rejected(String),

    #[error("Timeout after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    #[error("Max retries exceeded: {attempts}")]
    MaxRetriesExceeded { attempts: u32 },
}

impl ChainError {
    /// Network and nonce failures are retried; rejections are final.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ChainError::Network(_) | ChainError::Nonce(_) | ChainError::Timeout { .. }
        )
    }
}

impl From<ChainError> for RunereumError {
    fn from(err: ChainError) -> Self {
        match err {
            ChainError::Timeout { .. } => RunereumError::ConfirmationTimeout(err.to_string()),
            other => RunereumError::Submission(other.to_string()),
        }
    }
}
