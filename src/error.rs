//! Request failure taxonomy.
//!
//! Every failure a slicing or pricing request can hit maps onto one
//! [ApiError] variant, which fixes both the HTTP status and the wire
//! `errorCode`. Client-caused rejections (4xx) are never written to the
//! rolling error log; everything else collapses into
//! `INTERNAL_PROCESSING_ERROR` with a generic public message.

use http::StatusCode;

use crate::{Technology, Volume};

/// Failure of a slicing or pricing request, carrying the wire error code
/// and HTTP status it maps to.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Layer height was not a positive finite number.
    #[error("layer height must be a positive number")]
    InvalidLayerHeight,

    /// Layer height is not in the allowed set for the route's technology.
    #[error("layer height {requested} is not supported for {technology}")]
    InvalidLayerHeightForTechnology {
        /// Technology fixed by the request path.
        technology: Technology,
        /// The rejected value, as submitted.
        requested: f64,
    },

    /// The measured model does not fit the technology's build volume.
    #[error("model measures {measured} mm but the {technology} build volume is {limit} mm")]
    ModelExceedsBuildVolume {
        /// Technology fixed by the request path.
        technology: Technology,
        /// Model extent reported by the slicer.
        measured: Volume,
        /// The machine's build volume.
        limit: Volume,
    },

    /// A converter rejected the source data (empty scene, open polygon,
    /// unreadable image, failed CAD meshing).
    #[error("source geometry is invalid: {detail}")]
    InvalidSourceGeometry {
        /// Converter diagnostic, safe to surface to the client.
        detail: String,
    },

    /// The upload or a form field failed validation.
    #[error("{0}")]
    Validation(String),

    /// No supported file extension in the upload (or inside the archive).
    #[error("unsupported file type: {0}")]
    UnsupportedFileType(String),

    /// Per-IP fixed window exhausted.
    #[error("rate limit exceeded, retry in {retry_after_seconds}s")]
    RateLimitExceeded {
        /// Whole seconds until the window resets.
        retry_after_seconds: u64,
    },

    /// The slice queue is at capacity.
    #[error("slice queue is full")]
    QueueFull,

    /// The request waited longer than the queue wait budget.
    #[error("timed out waiting for a slicing worker")]
    QueueTimeout,

    /// Anything else: profile file missing, slicer crash, unrecoverable
    /// parse failure, I/O trouble. The client sees a generic message.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    /// HTTP status this failure maps to.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidLayerHeight
            | Self::InvalidLayerHeightForTechnology { .. }
            | Self::ModelExceedsBuildVolume { .. }
            | Self::InvalidSourceGeometry { .. }
            | Self::Validation(_)
            | Self::UnsupportedFileType(_) => StatusCode::BAD_REQUEST,
            Self::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::QueueFull | Self::QueueTimeout => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Wire `errorCode` for the response envelope.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidLayerHeight => "INVALID_LAYER_HEIGHT",
            Self::InvalidLayerHeightForTechnology { .. } => "INVALID_LAYER_HEIGHT_FOR_TECHNOLOGY",
            Self::ModelExceedsBuildVolume { .. } => "MODEL_EXCEEDS_BUILD_VOLUME",
            Self::InvalidSourceGeometry { .. } => "INVALID_SOURCE_GEOMETRY",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::UnsupportedFileType(_) => "UNSUPPORTED_FILE_TYPE",
            Self::RateLimitExceeded { .. } => "RATE_LIMIT_EXCEEDED",
            Self::QueueFull => "QUEUE_FULL",
            Self::QueueTimeout => "QUEUE_TIMEOUT",
            Self::Internal(_) => "INTERNAL_PROCESSING_ERROR",
        }
    }

    /// Message shown to the client. Internal failures never leak details.
    pub fn public_message(&self) -> String {
        match self {
            Self::Internal(_) => {
                "an internal error occurred while processing the request".to_string()
            }
            other => other.to_string(),
        }
    }

    /// `Retry-After` value for 429 responses.
    pub fn retry_after_seconds(&self) -> Option<u64> {
        match self {
            Self::RateLimitExceeded { retry_after_seconds } => Some(*retry_after_seconds),
            _ => None,
        }
    }

    /// True for failures caused by the client; these skip the error log.
    pub fn is_client_error(&self) -> bool {
        self.status().is_client_error()
    }
}

/// Decides whether a failed converter invocation indicates bad source
/// geometry (a client error) rather than an internal fault. Kept behind a
/// trait so a per-converter exit-code contract can replace the string
/// heuristic without touching the pipeline.
pub trait ErrorClassifier: Send + Sync {
    /// `command` is the converter identifier (the executable stem),
    /// `output` its merged stdout/stderr. When uncertain, return false so
    /// the failure classifies as internal.
    fn is_source_geometry_error(&self, command: &str, output: &str) -> bool;
}

/// The closed set of diagnostics the converter programs emit for bad
/// source data.
const GEOMETRY_ERROR_HINTS: &[&str] = &[
    "no closed 2d geometry",
    "open paths",
    "invalid polygon",
    "scene is empty",
    "no 2d geometry found",
    "could not create any geometry",
    "failed to load",
    "html",
    "not a cad file",
    "error converting mesh",
];

/// Converter names whose failures may be blamed on the source file. The
/// slicer and the orientation optimizer are never in this set.
const CONVERTER_COMMANDS: &[&str] = &["img2stl", "vector2stl", "mesh2stl", "cad2stl"];

/// Classifier that pattern-matches converter diagnostics against
/// [GEOMETRY_ERROR_HINTS].
#[derive(Debug, Default, Clone, Copy)]
pub struct HintClassifier;

impl ErrorClassifier for HintClassifier {
    fn is_source_geometry_error(&self, command: &str, output: &str) -> bool {
        if !CONVERTER_COMMANDS.contains(&command) {
            return false;
        }
        let haystack = output.to_lowercase();
        GEOMETRY_ERROR_HINTS.iter().any(|hint| haystack.contains(hint))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_and_codes() {
        let err = ApiError::QueueFull;
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(err.error_code(), "QUEUE_FULL");
        assert!(!err.is_client_error());

        let err = ApiError::InvalidLayerHeight;
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert!(err.is_client_error());

        let err = ApiError::RateLimitExceeded {
            retry_after_seconds: 42,
        };
        assert_eq!(err.retry_after_seconds(), Some(42));
    }

    #[test]
    fn internal_errors_stay_generic() {
        let err = ApiError::Internal(anyhow::anyhow!("stack trace with /etc/secrets"));
        assert_eq!(err.error_code(), "INTERNAL_PROCESSING_ERROR");
        assert!(!err.public_message().contains("secrets"));
    }

    #[test]
    fn classifier_requires_converter_and_hint() {
        let classifier = HintClassifier;
        assert!(classifier
            .is_source_geometry_error("vector2stl", "CRITICAL ERROR: No closed 2D geometry found."));
        assert!(classifier.is_source_geometry_error("mesh2stl", "Scene is empty!"));
        // Slicer failures are never blamed on geometry.
        assert!(!classifier.is_source_geometry_error("prusa-slicer", "scene is empty"));
        // An unknown diagnostic classifies as internal.
        assert!(!classifier.is_source_geometry_error("cad2stl", "segmentation fault"));
    }
}
