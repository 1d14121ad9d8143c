use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Errors that can occur while attempting a single delivery (template fetch,
/// render, or provider send). `DeliveryEngine::deliver` decides retry and
/// breaker behavior based on which variant it sees.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    /// Transport-level failure against a remote peer: network error, 5xx,
    /// timeout. Retried by the engine and counted against the peer's breaker.
    #[error("transient failure: {0}")]
    Transient(String),

    /// The peer's breaker was open; the engine does not sleep or retry.
    #[error("circuit '{name}' is open, retry in {retry_after_secs}s")]
    BreakerOpen {
        name: String,
        retry_after_secs: u64,
    },

    /// Template fetch returned a well-formed-but-unusable response
    /// (`success=false`, missing `data`) or the template body failed to
    /// render. Terminal: not retried, not counted against the breaker.
    #[error("render error: {0}")]
    Render(String),

    /// Job or configuration is invalid in a way no retry will fix.
    #[error("validation error: {0}")]
    Validation(String),

    /// A push platform has no provider credentials configured.
    #[error("provider not configured: {0}")]
    NotConfigured(String),
}

impl DeliveryError {
    /// Whether this error should be counted as a circuit-breaker failure.
    /// Validation/render/not-configured errors are not transport failures
    /// and must not trip a breaker meant to guard an unrelated remote peer.
    pub fn counts_against_breaker(&self) -> bool {
        matches!(self, DeliveryError::Transient(_))
    }

    /// Whether a retry could plausibly succeed. Render/validation/missing-config
    /// errors are a property of the job or deployment, not the remote peer, so
    /// retrying them just re-fails identically after a wasted backoff sleep.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DeliveryError::Render(_) | DeliveryError::Validation(_) | DeliveryError::NotConfigured(_)
        )
    }
}

impl crate::circuit_breaker::BreakerFailure for DeliveryError {
    fn counts_as_failure(&self) -> bool {
        self.counts_against_breaker()
    }
}

pub type DeliveryResult<T> = Result<T, DeliveryError>;

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Serialize)]
struct ErrorBody {
    code: String,
    message: String,
}

/// Error type returned by the admin HTTP surface
/// (`GET /status/{notification_id}`, `GET /circuits`, `GET /health`).
#[derive(Debug, thiserror::Error)]
pub enum AdminError {
    #[error("notification not found: {0}")]
    NotFound(String),

    #[error("status store unavailable: {0}")]
    StoreUnavailable(String),
}

impl IntoResponse for AdminError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            AdminError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            AdminError::StoreUnavailable(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, "STORE_UNAVAILABLE")
            }
        };

        let body = ErrorResponse {
            error: ErrorBody {
                code: code.to_string(),
                message: self.to_string(),
            },
        };

        (status, Json(body)).into_response()
    }
}
