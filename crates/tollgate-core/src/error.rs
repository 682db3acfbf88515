use thiserror::Error;

#[derive(Debug, Error)]
pub enum TollgateError {
    // Graph errors
    #[error("Graph configuration error: {0}")]
    GraphConfig(String),

    #[error("Routing error: node '{node}' produced label '{label}' with no route")]
    Routing { node: String, label: String },

    #[error("Graph exceeded step limit ({0}), aborting run")]
    StepLimitExceeded(usize),

    // Stage errors
    #[error("Step execution failed: {actor}: {message}")]
    StepExecution { actor: String, message: String },

    // Audit errors
    #[error("Audit error: {0}")]
    Audit(String),

    // Lookup errors
    #[error("Lookup not registered: {0}")]
    LookupNotRegistered(String),

    #[error("Lookup failed: {lookup}: {message}")]
    Lookup { lookup: String, message: String },

    #[error("Lookup timeout after {timeout_secs}s: {lookup}")]
    LookupTimeout { lookup: String, timeout_secs: u64 },

    #[error("Lookup budget exhausted after {0} calls")]
    LookupBudgetExhausted(usize),

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl TollgateError {
    /// Shorthand for a failed step, used by executors.
    pub fn step(actor: impl Into<String>, message: impl Into<String>) -> Self {
        Self::StepExecution {
            actor: actor.into(),
            message: message.into(),
        }
    }

    /// Whether this error means the graph itself is malformed or misrouted,
    /// as opposed to a business or collaborator failure.
    pub fn is_definition_error(&self) -> bool {
        matches!(
            self,
            Self::GraphConfig(_) | Self::Routing { .. } | Self::StepLimitExceeded(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, TollgateError>;
