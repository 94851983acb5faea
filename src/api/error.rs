use thiserror::Error;

/// Errors from talking to the budget API.
///
/// Callers branch on the variant: a `Network` failure on a write means the
/// record goes to the pending queue, a `Validation` failure goes back to the
/// user.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
  #[error("Network error: {0}")]
  Network(String),

  #[error("Validation failed: {}", .0.join(", "))]
  Validation(Vec<String>),

  #[error("Server returned {status}: {body}")]
  Status { status: u16, body: String },

  #[error("Invalid response: {0}")]
  InvalidResponse(String),

  #[error("Invalid request: {0}")]
  InvalidRequest(String),
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

impl ApiError {
  /// Truncate a response body to avoid logging excessive data
  fn truncate_body(body: &str) -> String {
    if body.len() <= MAX_ERROR_BODY_LENGTH {
      return body.to_string();
    }
    let mut end = MAX_ERROR_BODY_LENGTH;
    while !body.is_char_boundary(end) {
      end -= 1;
    }
    format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
  }

  pub fn from_status(status: u16, body: &[u8]) -> Self {
    ApiError::Status {
      status,
      body: Self::truncate_body(&String::from_utf8_lossy(body)),
    }
  }

  /// True when no response was received at all.
  pub fn is_network(&self) -> bool {
    matches!(self, ApiError::Network(_))
  }

  /// Whether a failed write should be kept for a later sync instead of being
  /// reported back as a rejected input.
  pub fn is_retryable(&self) -> bool {
    match self {
      ApiError::Network(_) => true,
      ApiError::Status { status, .. } => matches!(status, 408 | 429 | 500..=599),
      _ => false,
    }
  }
}

impl From<reqwest::Error> for ApiError {
  fn from(e: reqwest::Error) -> Self {
    if e.is_builder() {
      ApiError::InvalidRequest(e.to_string())
    } else {
      ApiError::Network(e.to_string())
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_retryable_statuses() {
    assert!(ApiError::Network("refused".into()).is_retryable());
    assert!(ApiError::from_status(503, b"down").is_retryable());
    assert!(ApiError::from_status(429, b"").is_retryable());
    assert!(!ApiError::from_status(400, b"bad").is_retryable());
    assert!(!ApiError::Validation(vec!["name".into()]).is_retryable());
  }

  #[test]
  fn test_long_body_is_truncated() {
    let body = "x".repeat(2000);
    match ApiError::from_status(500, body.as_bytes()) {
      ApiError::Status { body, .. } => {
        assert!(body.starts_with(&"x".repeat(MAX_ERROR_BODY_LENGTH)));
        assert!(body.ends_with("(truncated, 2000 total bytes)"));
      }
      other => panic!("unexpected error: {:?}", other),
    }
  }

  #[test]
  fn test_validation_message_lists_errors() {
    let err = ApiError::Validation(vec!["name is required".into(), "value is required".into()]);
    assert_eq!(
      err.to_string(),
      "Validation failed: name is required, value is required"
    );
  }
}
