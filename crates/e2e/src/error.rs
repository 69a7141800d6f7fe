//! Error types for scenario execution

use thiserror::Error;

#[derive(Error, Debug)]
pub enum E2eError {
    #[error("Element not found: {descriptor} (0 matches after {elapsed_ms} ms)")]
    ElementNotFound { descriptor: String, elapsed_ms: u64 },

    #[error(
        "Timed out after {elapsed_ms} ms waiting for {descriptor} to become {expected} \
         (last observed {last_count} match(es), {detail})"
    )]
    VerificationTimeout {
        descriptor: String,
        expected: &'static str,
        last_count: usize,
        elapsed_ms: u64,
        detail: String,
    },

    #[error(
        "Ambiguous locator: {descriptor} matched {count} elements; \
         scope it to a region or pick explicitly"
    )]
    AmbiguousMatch { descriptor: String, count: usize },

    #[error("Navigation to {url} failed: {reason}")]
    NavigationFailure { url: String, reason: String },

    #[error("Upload into {descriptor} failed: {reason}")]
    UploadFailure { descriptor: String, reason: String },

    #[error("Capture '{label}' requested after the session was torn down")]
    CaptureAfterTeardown { label: String },

    #[error("Scenario exceeded its {budget_ms} ms budget {}", during(.step_index))]
    ExecutionTimeout { budget_ms: u64, step_index: Option<usize> },

    #[error("Scenario aborted {}", during(.step_index))]
    Aborted { step_index: Option<usize> },

    #[error("Unknown element reference: {0}")]
    UnknownRef(String),

    #[error("Unknown region: {0}")]
    UnknownRegion(String),

    #[error("Driver error: {0}")]
    Driver(String),

    #[error("Playwright not found. Install with: npm i -D playwright && npx playwright install")]
    PlaywrightNotFound,

    #[error("Scenario parse error: {0}")]
    SpecParse(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}

impl E2eError {
    /// Whether a condition poll should swallow this failure and try again.
    ///
    /// "Not found yet" and transient driver query errors are retried until
    /// the poll's own deadline; everything else ends the step immediately.
    pub fn is_retryable(&self) -> bool {
        matches!(self, E2eError::ElementNotFound { .. } | E2eError::Driver(_))
    }

    /// Short machine-readable kind used in reports.
    pub fn kind(&self) -> &'static str {
        match self {
            E2eError::ElementNotFound { .. } => "element_not_found",
            E2eError::VerificationTimeout { .. } => "verification_timeout",
            E2eError::AmbiguousMatch { .. } => "ambiguous_match",
            E2eError::NavigationFailure { .. } => "navigation_failure",
            E2eError::UploadFailure { .. } => "upload_failure",
            E2eError::CaptureAfterTeardown { .. } => "capture_after_teardown",
            E2eError::ExecutionTimeout { .. } => "execution_timeout",
            E2eError::Aborted { .. } => "aborted",
            E2eError::UnknownRef(_) => "unknown_ref",
            E2eError::UnknownRegion(_) => "unknown_region",
            E2eError::Driver(_) => "driver",
            E2eError::PlaywrightNotFound => "playwright_not_found",
            E2eError::SpecParse(_) => "spec_parse",
            E2eError::Config(_) => "config",
            E2eError::Io(_) => "io",
            E2eError::Json(_) => "json",
            E2eError::Yaml(_) => "yaml",
            E2eError::Http(_) => "http",
            E2eError::Image(_) => "image",
        }
    }
}

pub type E2eResult<T> = Result<T, E2eError>;

fn during(step_index: &Option<usize>) -> String {
    match step_index {
        Some(index) => format!("during step {}", index),
        None => "while acquiring a session".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_kinds() {
        let not_found = E2eError::ElementNotFound {
            descriptor: "text \"Shelf\"".into(),
            elapsed_ms: 0,
        };
        assert!(not_found.is_retryable());

        let ambiguous = E2eError::AmbiguousMatch {
            descriptor: "text \"Shelf\"".into(),
            count: 2,
        };
        assert!(!ambiguous.is_retryable());
        assert_eq!(ambiguous.kind(), "ambiguous_match");
    }

    #[test]
    fn test_timeout_message_carries_context() {
        let err = E2eError::VerificationTimeout {
            descriptor: "role heading \"AI Magic\"".into(),
            expected: "visible",
            last_count: 1,
            elapsed_ms: 30000,
            detail: "found but never visible".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("30000 ms"));
        assert!(msg.contains("last observed 1 match(es), found but never visible"));
    }

    #[test]
    fn test_interrupt_messages_name_where_they_landed() {
        let timeout = E2eError::ExecutionTimeout {
            budget_ms: 1000,
            step_index: Some(3),
        };
        assert_eq!(timeout.to_string(), "Scenario exceeded its 1000 ms budget during step 3");

        let aborted = E2eError::Aborted { step_index: None };
        assert_eq!(aborted.to_string(), "Scenario aborted while acquiring a session");
    }
}
