//! Error taxonomy shared by both services (spec.md §7).
//!
//! Both services wrap this in a service-local error enum that adds infra failures
//! (`sqlx::Error`, `reqwest::Error`, ...) and converts to this taxonomy only at the
//! HTTP boundary, the way the teacher's `InternalRpcError` carries a JSON-RPC error
//! code alongside a human message (`common/src/rpc/error.rs`) — here the "code" is
//! simply the HTTP status, since this is a REST surface rather than JSON-RPC.

use serde::Serialize;
use thiserror::Error;

pub type GatewayResult<T> = Result<T, GatewayError>;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("malformed request: {0}")]
    ClientMalformed(String),

    #[error("Content-Length is required when X-PAYMENT is present")]
    ContentLengthRequired,

    #[error("payload too large: {size} bytes exceeds the {max} byte limit")]
    PayloadTooLarge { size: u64, max: u64 },

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("insufficient balance: need {need} credits, spendable {spendable}")]
    InsufficientBalance { need: u128, spendable: u128 },

    #[error("payment required")]
    PaymentRequired,

    #[error("payment verification failed: {0}")]
    PaymentVerificationFailed(String),

    #[error("payment settlement failed: {0}")]
    PaymentSettlementFailed(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("internal error")]
    Internal(#[source] anyhow::Error),
}

impl GatewayError {
    pub fn internal(err: impl Into<anyhow::Error>) -> Self {
        GatewayError::Internal(err.into())
    }

    /// The HTTP status code named in spec.md §7 for this variant.
    pub fn status_code(&self) -> u16 {
        match self {
            GatewayError::ClientMalformed(_) => 400,
            GatewayError::ContentLengthRequired => 400,
            GatewayError::PayloadTooLarge { .. } => 413,
            GatewayError::Unauthorized(_) => 401,
            GatewayError::InsufficientBalance { .. } => 402,
            GatewayError::PaymentRequired => 402,
            GatewayError::PaymentVerificationFailed(_) => 422,
            GatewayError::PaymentSettlementFailed(_) => 422,
            GatewayError::NotFound(_) => 404,
            GatewayError::Conflict(_) => 409,
            GatewayError::UpstreamUnavailable(_) => 503,
            GatewayError::Internal(_) => 500,
        }
    }

    /// Whether this failure should be logged with full detail and a correlation id
    /// (an `Internal` failure never exposes its source to the client, per §7).
    pub fn is_internal(&self) -> bool {
        matches!(self, GatewayError::Internal(_))
    }
}

/// Wire shape of an error response body. `Internal` errors never populate `message`
/// with anything beyond a generic line plus the correlation id.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl GatewayError {
    pub fn to_body(&self, correlation_id: Option<String>) -> ErrorBody {
        let (error, message) = match self {
            GatewayError::Internal(_) => ("internal".to_string(), "an internal error occurred".to_string()),
            other => (variant_name(other), other.to_string()),
        };
        ErrorBody { error, message, correlation_id }
    }
}

fn variant_name(err: &GatewayError) -> String {
    match err {
        GatewayError::ClientMalformed(_) => "client_malformed",
        GatewayError::ContentLengthRequired => "content_length_required",
        GatewayError::PayloadTooLarge { .. } => "payload_too_large",
        GatewayError::Unauthorized(_) => "unauthorized",
        GatewayError::InsufficientBalance { .. } => "insufficient_balance",
        GatewayError::PaymentRequired => "payment_required",
        GatewayError::PaymentVerificationFailed(_) => "payment_verification_failed",
        GatewayError::PaymentSettlementFailed(_) => "payment_settlement_failed",
        GatewayError::NotFound(_) => "not_found",
        GatewayError::Conflict(_) => "conflict",
        GatewayError::UpstreamUnavailable(_) => "upstream_unavailable",
        GatewayError::Internal(_) => "internal",
    }
    .to_string()
}

#[cfg(feature = "rpc-server")]
mod actix_impl {
    use super::*;
    use actix_web::{http::StatusCode, HttpResponse, ResponseError};

    impl ResponseError for GatewayError {
        fn status_code(&self) -> StatusCode {
            StatusCode::from_u16(GatewayError::status_code(self)).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
        }

        fn error_response(&self) -> HttpResponse {
            if self.is_internal() {
                log::error!("internal error: {:#}", self);
            }
            HttpResponse::build(self.status_code()).json(self.to_body(None))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_match_spec() {
        assert_eq!(GatewayError::ContentLengthRequired.status_code(), 400);
        assert_eq!(GatewayError::PayloadTooLarge { size: 1, max: 0 }.status_code(), 413);
        assert_eq!(GatewayError::PaymentVerificationFailed("x".into()).status_code(), 422);
        assert_eq!(GatewayError::UpstreamUnavailable("x".into()).status_code(), 503);
    }

    #[test]
    fn internal_errors_never_leak_detail() {
        let err = GatewayError::internal(anyhow::anyhow!("leaked secret db connection string"));
        let body = err.to_body(Some("corr-1".into()));
        assert_eq!(body.message, "an internal error occurred");
    }
}
