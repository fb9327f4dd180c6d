//! Errors shared by the agent and tool registries.

/// Errors in registry operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("Name already registered: {0}")]
    DuplicateName(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid schema for tool {tool}: {message}")]
    InvalidSchema { tool: String, message: String },
}
