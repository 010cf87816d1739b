//! Request level errors and how they render as HTTP responses.
use rocket::{
    http::{Header, Status},
    response::{self, Responder},
    serde::json::Json,
    Request,
};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, warn};

use crate::{signer::SignerError, store::ShareKey};

/// Failures surfaced synchronously to a request.
///
/// Anything that goes wrong inside a detached protocol run is only logged.
#[derive(Debug, Error)]
pub enum Error {
    #[error("secret share expired for key {0}")]
    ShareUnavailable(ShareKey),
    #[error(transparent)]
    ExternalSigner(#[from] SignerError),
    #[error("too many protocol runs in flight, retry later")]
    Saturated,
    #[error("server is shutting down")]
    ShuttingDown,
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

/// Hint sent with errors a client may retry.
const RETRY_AFTER_SECS: u32 = 1;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

impl Error {
    pub fn status(&self) -> Status {
        match self {
            Error::ShareUnavailable(_) | Error::InvalidRequest(_) => Status::BadRequest,
            Error::ExternalSigner(_) => Status::BadGateway,
            Error::Saturated | Error::ShuttingDown => Status::ServiceUnavailable,
        }
    }

    /// Whether retrying the same request later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Saturated | Error::ExternalSigner(_))
    }
}

impl<'r> Responder<'r, 'static> for Error {
    fn respond_to(self, request: &'r Request<'_>) -> response::Result<'static> {
        let status = self.status();
        if status.class().is_server_error() {
            error!(uri = %request.uri(), status = status.code, error = %self, "request failed");
        } else {
            warn!(uri = %request.uri(), status = status.code, error = %self, "request rejected");
        }

        let mut response = response::Response::build_from(
            Json(ErrorBody {
                error: self.to_string(),
            })
            .respond_to(request)?,
        );
        response.status(status);
        if self.is_retryable() {
            response.header(Header::new("Retry-After", RETRY_AFTER_SECS.to_string()));
        }
        response.ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{scheme::Scheme, store::share_key};

    #[test]
    fn statuses_follow_error_kind() {
        let unavailable = Error::ShareUnavailable(share_key("u1", Scheme::Ecdsa));
        assert_eq!(unavailable.status(), Status::BadRequest);
        assert_eq!(
            unavailable.to_string(),
            "secret share expired for key UID:u1-SIGALG:ecdsa"
        );
        assert!(!unavailable.is_retryable());

        let signer = Error::from(SignerError::Unreachable("down".into()));
        assert_eq!(signer.status(), Status::BadGateway);
        assert!(Error::Saturated.is_retryable());
        assert_eq!(Error::ShuttingDown.status(), Status::ServiceUnavailable);
    }
}
