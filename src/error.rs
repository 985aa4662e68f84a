/// Error types for aria
///
/// This module defines all possible errors that can occur in the assistant.
/// Uses thiserror for ergonomic error handling.

use thiserror::Error;

/// Main error type for aria operations
#[derive(Error, Debug)]
pub enum AriaError {
    /// I/O errors (file operations, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Config file could not be parsed
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// No plugin matched at any resolution stage
    #[error("No plugin matched query: {0}")]
    ResolutionNotFound(String),

    /// The leading token names a known but disabled plugin
    #[error("Plugin is disabled: {0}")]
    PluginDisabled(String),

    /// An invocation or confidence check failed inside a plugin
    #[error("Capability check failed for plugin '{plugin}' on query '{query}': {detail}")]
    CapabilityCheck {
        plugin: String,
        query: String,
        detail: String,
    },

    /// A plugin's execute or handle failed
    #[error("Plugin '{plugin}' failed while executing query '{query}': {detail}")]
    PluginExecution {
        plugin: String,
        query: String,
        detail: String,
    },

    /// Tracker backing file could not be read or written
    #[error("Tracker '{tracker}' persistence failed: {detail}")]
    TrackerPersistence { tracker: String, detail: String },

    /// A declared plugin requirement is absent or at another version
    #[error("Requirement not satisfied: expected {required} @{expected}, found {found}")]
    RequirementMismatch {
        required: String,
        expected: String,
        found: String,
    },

    /// Item data does not fit the tracker schema
    #[error("Schema error: {0}")]
    Schema(String),

    /// Malformed query or meta-command
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// Plugin id not present in the registry
    #[error("Unknown plugin: {0}")]
    UnknownPlugin(String),

    /// Plugin id registered twice
    #[error("Plugin already registered: {0}")]
    DuplicatePlugin(String),

    /// Plugin can't serve as a template for a new command
    #[error("Template error: {0}")]
    Template(String),
}

/// Result type alias for aria operations
pub type Result<T> = std::result::Result<T, AriaError>;

impl From<toml::de::Error> for AriaError {
    fn from(e: toml::de::Error) -> Self {
        AriaError::Config(e.to_string())
    }
}

impl From<toml::ser::Error> for AriaError {
    fn from(e: toml::ser::Error) -> Self {
        AriaError::Config(e.to_string())
    }
}

/// Convert AriaError to a user-friendly error message
impl AriaError {
    pub fn user_message(&self) -> String {
        match self {
            AriaError::Io(e) => {
                format!("File system error. Check permissions. Details: {}", e)
            }
            AriaError::Config(msg) => {
                format!("Configuration issue: {}", msg)
            }
            AriaError::Serialization(e) => {
                format!("Data format error: {}", e)
            }
            AriaError::ResolutionNotFound(_) => "Command not found.".to_string(),
            AriaError::PluginDisabled(id) => {
                format!("'{}' is disabled. Run 'enable plugin {}' to use it.", id, id)
            }
            AriaError::CapabilityCheck { plugin, detail, .. } => {
                format!("Plugin '{}' could not check the query: {}", plugin, detail)
            }
            AriaError::PluginExecution { plugin, detail, .. } => {
                format!("Plugin '{}' failed: {}", plugin, detail)
            }
            AriaError::TrackerPersistence { tracker, .. } => {
                format!("History for '{}' was reset because its file was unusable", tracker)
            }
            AriaError::RequirementMismatch {
                required,
                expected,
                found,
            } => format!(
                "Warning: requirement not satisfied. Expected {} @{}, found {} instead. Proceed with caution.",
                required, expected, found
            ),
            AriaError::Schema(msg) => format!("Bad tracker data: {}", msg),
            AriaError::InvalidQuery(msg) => format!("Invalid query: {}", msg),
            AriaError::UnknownPlugin(id) => format!("No plugin named '{}'", id),
            AriaError::DuplicatePlugin(id) => format!("Plugin '{}' already exists", id),
            AriaError::Template(msg) => format!("Unable to create command: {}", msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_user_messages() {
        let err = AriaError::ResolutionNotFound("zzzz".to_string());
        assert_eq!(err.user_message(), "Command not found.");

        let err = AriaError::PluginDisabled("jump".to_string());
        assert!(err.user_message().contains("enable plugin jump"));
    }

    #[test]
    fn test_not_found_and_disabled_wording_differs() {
        let not_found = AriaError::ResolutionNotFound("jump".to_string()).user_message();
        let disabled = AriaError::PluginDisabled("jump".to_string()).user_message();
        assert_ne!(not_found, disabled);
    }

    #[test]
    fn test_error_display() {
        let err = AriaError::PluginExecution {
            plugin: "echo".to_string(),
            query: "echo hi".to_string(),
            detail: "boom".to_string(),
        };
        let display = format!("{}", err);
        assert!(display.contains("echo"));
        assert!(display.contains("boom"));
    }

    #[test]
    fn test_toml_error_converts_to_config() {
        let parsed: std::result::Result<toml::Value, _> = toml::from_str("not = [valid");
        let err: AriaError = parsed.unwrap_err().into();
        assert!(matches!(err, AriaError::Config(_)));
    }
}
