//! Errors raised inside the recognition pipeline.
//!
//! None of these cross the library boundary as-is: the engine renders every
//! failure into an [`OcrResult::Error`](super::OcrResult).

use thiserror::Error;

/// Errors from providers, detectors and the pipeline stages.
#[derive(Debug, Error)]
pub enum OcrError {
    /// Connection failure, timeout, or an unreadable response body.
    #[error("HTTP request failed: {0}")]
    Transport(String),

    /// The vendor answered with a non-2xx status.
    #[error("{provider} API error (status {status}): {body}{}", hint_suffix(.hint))]
    Http {
        provider: String,
        status: u16,
        body: String,
        hint: Option<&'static str>,
    },

    /// The vendor envelope could not be read (not JSON, error object, empty body).
    #[error("Failed to parse {provider} response: {message}")]
    Parse { provider: String, message: String },

    /// Local detector missing or could not be started.
    #[error("Detector not available: {0}")]
    DetectionUnavailable(String),

    /// Local detector ran but reported a failure or timed out.
    #[error("Detection failed: {0}")]
    DetectionFailed(String),

    /// One cropped-box remote call failed.
    #[error("Recognition failed for box {index}: {reason}")]
    PartialRecognition { index: usize, reason: String },

    /// Missing credentials, model, or an unsupported provider.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The encoded image exceeds a vendor limit before sending.
    #[error("Image too large for {provider}: {size} bytes of base64 exceeds {limit}")]
    PayloadTooLarge {
        provider: String,
        size: usize,
        limit: usize,
    },

    #[error("Image error: {0}")]
    Image(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Recognition cancelled")]
    Cancelled,
}

fn hint_suffix(hint: &Option<&'static str>) -> String {
    hint.map(|h| format!(" ({})", h)).unwrap_or_default()
}

impl OcrError {
    /// Whether the dispatcher should try the same request again.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            OcrError::Configuration(_) | OcrError::PayloadTooLarge { .. } | OcrError::Cancelled
        )
    }

    /// Heuristic explanation for well-known vendor status codes.
    pub fn status_hint(status: u16) -> Option<&'static str> {
        match status {
            413 => Some("payload too large: the image likely exceeds the vendor's size limit"),
            400 => Some("malformed request or unsupported image resolution"),
            401 | 403 => Some("credential rejected"),
            429 => Some("rate limited"),
            _ => None,
        }
    }
}

impl From<image::ImageError> for OcrError {
    fn from(e: image::ImageError) -> Self {
        OcrError::Image(e.to_string())
    }
}
