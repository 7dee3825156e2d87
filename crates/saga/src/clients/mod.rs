//! Typed clients for the peer services a saga calls into.
//!
//! Every call returns a [`RemoteResponse`] instead of an error: an unreachable
//! peer is an ordinary outcome that the orchestrator turns into a step failure.

pub mod account;
pub mod http;
pub mod transaction;

use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use account::{
    AccountServiceClient, BalanceOperation, BalanceOperationRequest, BalanceResponse,
    InMemoryAccountService,
};
pub use http::{HttpAccountClient, HttpTransactionClient};
pub use transaction::{
    CancelTransactionRequest, CreateTransactionRequest, InMemoryTransactionService,
    TransactionResponse, TransactionServiceClient, TransactionStatus,
};

pub const TRANSACTION_SERVICE: &str = "transaction-service";
pub const ACCOUNT_SERVICE: &str = "account-service";

/// Outcome of a call to a peer service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "data", rename_all = "snake_case")]
pub enum RemoteResponse<T> {
    /// The peer handled the request.
    Success(T),

    /// The peer rejected the request.
    Failure { message: String },

    /// The peer could not be reached.
    Unavailable { service: String },
}

impl<T> RemoteResponse<T> {
    pub fn failure(message: impl Into<String>) -> Self {
        RemoteResponse::Failure {
            message: message.into(),
        }
    }

    /// Builds the fallback response for an unreachable peer.
    pub fn unavailable(service: impl Into<String>) -> Self {
        let service = service.into();
        metrics::counter!("remote_service_unavailable_total", "service" => service.clone())
            .increment(1);
        tracing::error!(%service, "remote service unavailable");
        RemoteResponse::Unavailable { service }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, RemoteResponse::Success(_))
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> RemoteResponse<U> {
        match self {
            RemoteResponse::Success(value) => RemoteResponse::Success(f(value)),
            RemoteResponse::Failure { message } => RemoteResponse::Failure { message },
            RemoteResponse::Unavailable { service } => RemoteResponse::Unavailable { service },
        }
    }

    /// Converts into a `Result` whose error is a human-readable reason.
    pub fn into_result(self) -> Result<T, String> {
        match self {
            RemoteResponse::Success(value) => Ok(value),
            RemoteResponse::Failure { message } => Err(message),
            RemoteResponse::Unavailable { service } => {
                Err(format!("{service} is currently unavailable"))
            }
        }
    }
}

/// Where the peer services live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceEndpoints {
    pub transaction_service_url: String,
    pub account_service_url: String,
    pub request_timeout: Duration,
}

impl Default for ServiceEndpoints {
    fn default() -> Self {
        Self {
            transaction_service_url: "http://localhost:8082".to_string(),
            account_service_url: "http://localhost:8081".to_string(),
            request_timeout: Duration::from_secs(10),
        }
    }
}

impl ServiceEndpoints {
    /// Loads endpoints from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            transaction_service_url: std::env::var("TRANSACTION_SERVICE_URL")
                .unwrap_or(defaults.transaction_service_url),
            account_service_url: std::env::var("ACCOUNT_SERVICE_URL")
                .unwrap_or(defaults.account_service_url),
            request_timeout: std::env::var("REMOTE_REQUEST_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.request_timeout),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_into_result() {
        assert_eq!(RemoteResponse::Success(5).into_result(), Ok(5));
        assert_eq!(
            RemoteResponse::<()>::failure("declined").into_result(),
            Err("declined".to_string())
        );
        assert_eq!(
            RemoteResponse::<()>::unavailable(ACCOUNT_SERVICE).into_result(),
            Err("account-service is currently unavailable".to_string())
        );
    }

    #[test]
    fn test_map_preserves_failure() {
        let response: RemoteResponse<i32> = RemoteResponse::failure("nope");
        assert_eq!(response.map(|v| v * 2), RemoteResponse::failure("nope"));
        assert_eq!(RemoteResponse::Success(2).map(|v| v * 2), RemoteResponse::Success(4));
    }

    #[test]
    fn test_serialized_shape() {
        let json = serde_json::to_value(RemoteResponse::<()>::Unavailable {
            service: TRANSACTION_SERVICE.to_string(),
        })
        .unwrap();
        assert_eq!(json["outcome"], "unavailable");
        assert_eq!(json["data"]["service"], "transaction-service");
    }
}
