//! Error types for the Sonar client

use thiserror::Error;

/// Errors that can occur when calling the Sonar API
#[derive(Debug, Error)]
pub enum SonarError {
    /// API returned a non-success status code
    #[error("Sonar API error (status {status}): {body}")]
    Api {
        /// HTTP status code
        status: u16,
        /// Raw response body text
        body: String,
    },

    /// HTTP request failed before a status code was available
    #[error("Network error: {0}")]
    Network(String),

    /// Response had no choices or empty message content
    #[error("Sonar API returned an empty response")]
    EmptyResponse,

    /// Response was pure action narration on every attempt
    #[error("Sonar API returned incomplete responses after {attempts} attempts")]
    IncompleteResponse {
        /// Total attempts made, including the initial request
        attempts: u32,
    },

    /// No valid JSON object could be recovered from the response text
    #[error("Could not extract valid JSON from Sonar response: {snippet}")]
    Extraction {
        /// Bounded prefix of the raw response text
        snippet: String,
    },

    /// Extracted text failed to parse as JSON
    #[error("Malformed JSON in Sonar response: {0}")]
    MalformedJson(#[source] serde_json::Error),

    /// Parsed JSON does not conform to the target schema
    #[error("Schema validation failed: {message}")]
    SchemaValidation {
        /// Deserialization diagnostics
        message: String,
        /// The parsed value that failed validation
        value: serde_json::Value,
    },

    /// Invalid or missing configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl SonarError {
    pub fn network(msg: impl Into<String>) -> Self {
        SonarError::Network(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        SonarError::Config(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        SonarError::Internal(msg.into())
    }
}

/// Result type alias for Sonar operations
pub type SonarResult<T> = Result<T, SonarError>;
