//! Error types for mcp-tester.
//!
//! Errors carry enough context to tell a configuration mistake apart from a
//! live failure, and most of them come with a recovery suggestion.

use thiserror::Error;

/// Result type alias using the core [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for mcp-tester.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Saved server not found
    #[error("Server not found: {0}")]
    NotFound(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// MCP session error
    #[error("MCP error: {0}")]
    Mcp(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML serialization error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::ser::Error),
}

impl Error {
    /// Get a recovery suggestion for this error.
    pub fn recovery_suggestion(&self) -> Option<&'static str> {
        match self {
            Error::Config(_) => {
                Some("Check your config file at ~/.config/mcp-tester/config.toml")
            }
            Error::NotFound(_) => Some("Use 'mcp-tester servers list' to see saved servers"),
            Error::Validation(_) => Some("Run 'mcp-tester doctor' for a full configuration report"),
            Error::Json(_) => Some("Import files must look like {\"mcpServers\": {\"name\": {...}}}"),
            _ => None,
        }
    }
}

/// Format an error with its recovery suggestion.
pub fn format_error_with_suggestion(error: &Error) -> String {
    let mut output = error.to_string();
    if let Some(suggestion) = error.recovery_suggestion() {
        output.push_str(&format!("\n  Suggestion: {}", suggestion));
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_has_suggestion() {
        let err = Error::NotFound("filesystem".to_string());
        assert_eq!(err.to_string(), "Server not found: filesystem");
        assert!(err.recovery_suggestion().is_some());
    }

    #[test]
    fn test_format_with_suggestion() {
        let err = Error::Config("bad timeout".to_string());
        let formatted = format_error_with_suggestion(&err);
        assert!(formatted.starts_with("Configuration error: bad timeout"));
        assert!(formatted.contains("Suggestion:"));
    }

    #[test]
    fn test_mcp_error_has_no_suggestion() {
        let err = Error::Mcp("request timed out".to_string());
        assert!(err.recovery_suggestion().is_none());
        assert_eq!(format_error_with_suggestion(&err), "MCP error: request timed out");
    }
}
