//! # Error Handling
//!
//! Errors for the avatar submission pipeline. Every failure is scoped to the
//! current submission attempt: nothing here is fatal to the process and
//! nothing is retried automatically.
//!
//! ## Taxonomy
//!
//! | Kind | Variants | Typical source |
//! |------|----------|----------------|
//! | validation | `Validation`, `Config` | no image selected, bad seed, bad URL |
//! | transport | `Transport`, `Api`, `Timeout` | `POST /run`, `GET /status/{id}` |
//! | decode | `Decode` | completed job without a usable image payload |
//! | preprocessing | `Conversion`, `Processing`, `Io`, `External` | HEIC conversion, crop |
//! | outcome | `Generation` | a poll task recorded a failure |
//!
//! Each error carries an [`ErrorContext`] and maps to a single human-readable
//! message through [`AvatarError::user_message`].
//!
//! ## Usage
//!
//! ```rust
//! use avatar_forge::error::{AvatarError, HasRecoverySuggestion};
//!
//! let error = AvatarError::validation("image", "Please select an image file.")
//!     .with_recovery_suggestion("Pick a JPEG, PNG or HEIC photo first");
//!
//! assert_eq!(error.category(), "validation");
//! assert_eq!(error.user_message(), "Please select an image file.");
//! assert!(error.recovery_suggestion().is_some());
//! ```

use std::{error::Error as StdError, fmt, time::SystemTime};

/// Operation name used for `POST /run` and everything before it.
pub const OP_SUBMIT: &str = "submit";
/// Operation name used for `GET /status/{id}`.
pub const OP_STATUS: &str = "status";

/// Message shown when the submission phase fails.
pub const MSG_SUBMIT_FAILED: &str = "Error processing the image. Please try again.";
/// Message shown when polling fails.
pub const MSG_STATUS_FAILED: &str = "Error fetching status. Please try again.";
/// Message shown when a completed job has no usable image.
pub const MSG_DECODE_FAILED: &str = "The generated image could not be decoded. Please try again.";

/// Metadata about when and where an error occurred
#[derive(Debug, Clone)]
pub struct ErrorContext {
    /// When the error occurred
    pub timestamp: SystemTime,
    /// The operation being performed when the error occurred
    pub operation: Option<String>,
    /// Additional context about the error
    pub context: Option<String>,
    /// Suggested recovery action
    pub recovery_suggestion: Option<String>,
    /// Additional metadata as key-value pairs
    pub metadata: std::collections::HashMap<String, String>,
}

impl Default for ErrorContext {
    fn default() -> Self {
        Self {
            timestamp: SystemTime::now(),
            operation: None,
            context: None,
            recovery_suggestion: None,
            metadata: std::collections::HashMap::new(),
        }
    }
}

impl ErrorContext {
    /// Create a new error context
    pub fn new() -> Self {
        Self::default()
    }
}

/// Base error type for the avatar pipeline
#[derive(Debug)]
pub enum AvatarError {
    /// Configuration validation errors
    Config {
        field: String,
        value: String,
        reason: String,
        context: ErrorContext,
    },
    /// User input validation errors
    Validation {
        field: String,
        reason: String,
        context: ErrorContext,
    },
    /// HEIC/HEIF conversion through the external converter failed
    Conversion {
        tool: String,
        reason: String,
        context: ErrorContext,
    },
    /// Crop/decode/encode failures that abort the attempt
    Processing {
        operation: String,
        reason: String,
        context: ErrorContext,
    },
    /// I/O errors
    Io {
        operation: String,
        path: Option<String>,
        source: std::io::Error,
        context: ErrorContext,
    },
    /// Request could not be sent or the response body could not be read
    Transport {
        operation: String,
        url: Option<String>,
        source: Option<Box<dyn StdError + Send + Sync>>,
        context: ErrorContext,
    },
    /// The API answered with a non-success HTTP status
    Api {
        operation: String,
        status: u16,
        body: String,
        context: ErrorContext,
    },
    /// A completed job did not carry a usable image
    Decode {
        what: String,
        reason: String,
        context: ErrorContext,
    },
    /// Polling gave up after the configured number of ticks
    Timeout {
        operation: String,
        duration_ms: u64,
        context: ErrorContext,
    },
    /// External library errors
    External {
        library: String,
        source: Box<dyn StdError + Send + Sync>,
        context: ErrorContext,
    },
    /// A background poll ended the job; carries its already-chosen message
    Generation {
        message: String,
        detail: String,
        context: ErrorContext,
    },
}

impl AvatarError {
    /// Create a configuration error
    pub fn config(
        field: impl Into<String>,
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::Config {
            field: field.into(),
            value: value.into(),
            reason: reason.into(),
            context: ErrorContext::new(),
        }
    }

    /// Create a validation error
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
            context: ErrorContext::new(),
        }
    }

    /// The "nothing selected" validation error
    pub fn no_image_selected() -> Self {
        Self::validation("image", "Please select an image file.")
            .with_operation(OP_SUBMIT)
            .with_recovery_suggestion("Select a JPEG, PNG or HEIC photo before generating")
    }

    /// Create a conversion error
    pub fn conversion(tool: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Conversion {
            tool: tool.into(),
            reason: reason.into(),
            context: ErrorContext::new(),
        }
    }

    /// Create a processing error
    pub fn processing(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Processing {
            operation: operation.into(),
            reason: reason.into(),
            context: ErrorContext::new(),
        }
    }

    /// Create an I/O error
    pub fn io(operation: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            operation: operation.into(),
            path: None,
            source,
            context: ErrorContext::new(),
        }
    }

    /// Create an I/O error tied to a path
    pub fn io_at(
        operation: impl Into<String>,
        path: impl AsRef<std::path::Path>,
        source: std::io::Error,
    ) -> Self {
        Self::Io {
            operation: operation.into(),
            path: Some(path.as_ref().display().to_string()),
            source,
            context: ErrorContext::new(),
        }
    }

    /// Create a transport error
    pub fn transport(
        operation: impl Into<String>,
        url: Option<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self::Transport {
            operation: operation.into(),
            url,
            source: Some(Box::new(source)),
            context: ErrorContext::new(),
        }
    }

    /// Create an HTTP status error
    pub fn api(operation: impl Into<String>, status: u16, body: impl Into<String>) -> Self {
        Self::Api {
            operation: operation.into(),
            status,
            body: body.into(),
            context: ErrorContext::new(),
        }
    }

    /// Create a decode error
    pub fn decode(what: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Decode {
            what: what.into(),
            reason: reason.into(),
            context: ErrorContext::new(),
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, duration_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration_ms,
            context: ErrorContext::new(),
        }
    }

    /// Create an external library error
    pub fn external(
        library: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self::External {
            library: library.into(),
            source: Box::new(source),
            context: ErrorContext::new(),
        }
    }

    /// Create a generation outcome error from a recorded failure
    pub fn generation(message: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Generation {
            message: message.into(),
            detail: detail.into(),
            context: ErrorContext::new(),
        }
    }

    /// Add context to the error
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context_mut().context = Some(context.into());
        self
    }

    /// Add operation context
    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.context_mut().operation = Some(operation.into());
        self
    }

    /// Add recovery suggestion
    pub fn with_recovery_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.context_mut().recovery_suggestion = Some(suggestion.into());
        self
    }

    /// Add metadata
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context_mut().metadata.insert(key.into(), value.into());
        self
    }

    /// Get the error context
    pub fn context(&self) -> &ErrorContext {
        match self {
            Self::Config { context, .. } => context,
            Self::Validation { context, .. } => context,
            Self::Conversion { context, .. } => context,
            Self::Processing { context, .. } => context,
            Self::Io { context, .. } => context,
            Self::Transport { context, .. } => context,
            Self::Api { context, .. } => context,
            Self::Decode { context, .. } => context,
            Self::Timeout { context, .. } => context,
            Self::External { context, .. } => context,
            Self::Generation { context, .. } => context,
        }
    }

    fn context_mut(&mut self) -> &mut ErrorContext {
        match self {
            Self::Config { context, .. } => context,
            Self::Validation { context, .. } => context,
            Self::Conversion { context, .. } => context,
            Self::Processing { context, .. } => context,
            Self::Io { context, .. } => context,
            Self::Transport { context, .. } => context,
            Self::Api { context, .. } => context,
            Self::Decode { context, .. } => context,
            Self::Timeout { context, .. } => context,
            Self::External { context, .. } => context,
            Self::Generation { context, .. } => context,
        }
    }

    /// Get the error category as a string
    pub fn category(&self) -> &'static str {
        match self {
            Self::Config { .. } => "config",
            Self::Validation { .. } => "validation",
            Self::Conversion { .. } => "conversion",
            Self::Processing { .. } => "processing",
            Self::Io { .. } => "io",
            Self::Transport { .. } => "transport",
            Self::Api { .. } => "api",
            Self::Decode { .. } => "decode",
            Self::Timeout { .. } => "timeout",
            Self::External { .. } => "external",
            Self::Generation { .. } => "generation",
        }
    }

    /// The one message shown to the user for this failure.
    pub fn user_message(&self) -> String {
        match self {
            Self::Validation { reason, .. } => reason.clone(),
            Self::Generation { message, .. } => message.clone(),
            Self::Config { reason, .. } => reason.clone(),
            Self::Decode { .. } => MSG_DECODE_FAILED.to_string(),
            _ if self.is_status_phase() => MSG_STATUS_FAILED.to_string(),
            _ => MSG_SUBMIT_FAILED.to_string(),
        }
    }

    /// True if the error happened while polling `GET /status/{id}`.
    fn is_status_phase(&self) -> bool {
        let op = match self {
            Self::Transport { operation, .. }
            | Self::Api { operation, .. }
            | Self::Timeout { operation, .. } => Some(operation.as_str()),
            _ => self.context().operation.as_deref(),
        };
        op == Some(OP_STATUS)
    }
}

impl fmt::Display for AvatarError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AvatarError::Config {
                field,
                value,
                reason,
                ..
            } => {
                write!(
                    f,
                    "Configuration error in '{}': {} (value: {})",
                    field, reason, value
                )
            }
            AvatarError::Validation { field, reason, .. } => {
                write!(f, "Validation failed for '{}': {}", field, reason)
            }
            AvatarError::Conversion { tool, reason, .. } => {
                write!(f, "HEIC conversion with '{}' failed: {}", tool, reason)
            }
            AvatarError::Processing {
                operation, reason, ..
            } => {
                write!(f, "Processing failed during {}: {}", operation, reason)
            }
            AvatarError::Io {
                operation,
                path,
                source,
                ..
            } => {
                if let Some(path) = path {
                    write!(
                        f,
                        "I/O error during {} on '{}': {}",
                        operation, path, source
                    )
                } else {
                    write!(f, "I/O error during {}: {}", operation, source)
                }
            }
            AvatarError::Transport {
                operation, url, ..
            } => {
                if let Some(url) = url {
                    write!(f, "Network error during {} on {}", operation, url)
                } else {
                    write!(f, "Network error during {}", operation)
                }
            }
            AvatarError::Api {
                operation,
                status,
                body,
                ..
            } => {
                write!(f, "API returned HTTP {} during {}: {}", status, operation, body)
            }
            AvatarError::Decode { what, reason, .. } => {
                write!(f, "Could not decode {}: {}", what, reason)
            }
            AvatarError::Timeout {
                operation,
                duration_ms,
                ..
            } => {
                write!(f, "Timeout during {} after {}ms", operation, duration_ms)
            }
            AvatarError::External {
                library, source, ..
            } => {
                write!(f, "External library error in {}: {}", library, source)
            }
            AvatarError::Generation { detail, .. } => {
                write!(f, "Generation failed: {}", detail)
            }
        }
    }
}

impl StdError for AvatarError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::External { source, .. } => Some(source.as_ref()),
            Self::Transport {
                source: Some(source),
                ..
            } => Some(source.as_ref()),
            _ => None,
        }
    }
}

/// Result type alias using our custom error type
pub type AvatarResult<T> = Result<T, AvatarError>;

/// Trait for errors that provide recovery suggestions
pub trait HasRecoverySuggestion {
    /// Get recovery suggestion for this error
    fn recovery_suggestion(&self) -> Option<&str>;
}

impl HasRecoverySuggestion for AvatarError {
    fn recovery_suggestion(&self) -> Option<&str> {
        self.context().recovery_suggestion.as_deref()
    }
}

/// Error conversion implementations
impl From<serde_json::Error> for AvatarError {
    fn from(error: serde_json::Error) -> Self {
        Self::external("serde_json", error)
    }
}

impl From<image::ImageError> for AvatarError {
    fn from(error: image::ImageError) -> Self {
        Self::processing("image codec", error.to_string())
    }
}

impl From<avatar_scale::cpu::ScaleError> for AvatarError {
    fn from(error: avatar_scale::cpu::ScaleError) -> Self {
        Self::processing("scale", error.to_string())
    }
}

impl From<base64::DecodeError> for AvatarError {
    fn from(error: base64::DecodeError) -> Self {
        Self::decode("base64 image payload", error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let error = AvatarError::config("base_url", "", "must not be empty");
        assert_eq!(error.category(), "config");
        assert_eq!(error.user_message(), "must not be empty");
        assert!(error.to_string().contains("'base_url'"));
    }

    #[test]
    fn test_error_with_context() {
        let error = AvatarError::processing("center_crop", "zero-sized image")
            .with_context("cropping upload")
            .with_recovery_suggestion("pick a different photo")
            .with_metadata("width", "0");

        assert_eq!(error.category(), "processing");
        assert_eq!(error.recovery_suggestion(), Some("pick a different photo"));
        assert_eq!(error.context().metadata.get("width").map(String::as_str), Some("0"));
        assert_eq!(error.context().context.as_deref(), Some("cropping upload"));
    }

    #[test]
    fn test_user_messages() {
        assert_eq!(
            AvatarError::no_image_selected().user_message(),
            "Please select an image file."
        );
        assert_eq!(
            AvatarError::api(OP_SUBMIT, 500, "boom").user_message(),
            MSG_SUBMIT_FAILED
        );
        assert_eq!(
            AvatarError::api(OP_STATUS, 502, "bad gateway").user_message(),
            MSG_STATUS_FAILED
        );
        assert_eq!(
            AvatarError::timeout(OP_STATUS, 25_000).user_message(),
            MSG_STATUS_FAILED
        );
        assert_eq!(
            AvatarError::decode("output", "missing image").user_message(),
            MSG_DECODE_FAILED
        );
        assert_eq!(
            AvatarError::conversion("heif-convert", "exit 1").user_message(),
            MSG_SUBMIT_FAILED
        );
        let recorded = AvatarError::generation(MSG_STATUS_FAILED, "HTTP 502 during status");
        assert_eq!(recorded.user_message(), MSG_STATUS_FAILED);
        assert_eq!(recorded.category(), "generation");
    }

    #[test]
    fn test_status_phase_detection() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        let transport = AvatarError::transport(OP_STATUS, None, io);
        assert!(transport.is_status_phase());
        assert!(transport.source().is_some());

        let tagged = AvatarError::processing("result", "bad bytes").with_operation(OP_STATUS);
        assert!(tagged.is_status_phase());
        assert_eq!(tagged.user_message(), MSG_STATUS_FAILED);

        let submit = AvatarError::transport(OP_SUBMIT, None, std::io::Error::other("refused"));
        assert!(!submit.is_status_phase());
        assert!(!AvatarError::decode("output", "not base64").is_status_phase());
    }
}
