//! HTTP implementations of the remote service clients.
//!
//! Connection failures, timeouts and gateway-style status codes become
//! [`RemoteResponse::Unavailable`]; any other non-success reply becomes
//! [`RemoteResponse::Failure`].

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Deserialize, de::DeserializeOwned};

use super::{
    ACCOUNT_SERVICE, AccountServiceClient, BalanceOperation, BalanceOperationRequest,
    BalanceResponse, CancelTransactionRequest, CreateTransactionRequest, RemoteResponse,
    ServiceEndpoints, TRANSACTION_SERVICE, TransactionResponse, TransactionServiceClient,
};

const CORRELATION_HEADER: &str = "X-Correlation-ID";

/// Response envelope used by the transaction service.
#[derive(Debug, Deserialize)]
struct ApiEnvelope<T> {
    success: bool,
    message: Option<String>,
    data: Option<T>,
}

async fn call<T: DeserializeOwned>(service: &str, request: RequestBuilder) -> RemoteResponse<T> {
    let response = match request.send().await {
        Ok(response) => response,
        Err(e) if e.is_connect() || e.is_timeout() => {
            tracing::warn!(%service, error = %e, "remote call could not reach service");
            return RemoteResponse::unavailable(service);
        }
        Err(e) => return RemoteResponse::failure(format!("{service} request failed: {e}")),
    };

    let status = response.status();
    if matches!(
        status,
        StatusCode::SERVICE_UNAVAILABLE | StatusCode::BAD_GATEWAY | StatusCode::GATEWAY_TIMEOUT
    ) {
        return RemoteResponse::unavailable(service);
    }

    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ApiEnvelope<serde_json::Value>>(&body)
            .ok()
            .and_then(|envelope| envelope.message)
            .unwrap_or(body);
        return RemoteResponse::failure(format!("{service} returned {status}: {message}"));
    }

    match response.json::<T>().await {
        Ok(value) => RemoteResponse::Success(value),
        Err(e) => RemoteResponse::failure(format!("Invalid response from {service}: {e}")),
    }
}

fn open_envelope<T>(response: RemoteResponse<ApiEnvelope<T>>) -> RemoteResponse<Option<T>> {
    match response {
        RemoteResponse::Success(envelope) if envelope.success => {
            RemoteResponse::Success(envelope.data)
        }
        RemoteResponse::Success(envelope) => RemoteResponse::failure(
            envelope
                .message
                .unwrap_or_else(|| "Request rejected".to_string()),
        ),
        RemoteResponse::Failure { message } => RemoteResponse::Failure { message },
        RemoteResponse::Unavailable { service } => RemoteResponse::Unavailable { service },
    }
}

fn require_data<T>(response: RemoteResponse<Option<T>>) -> RemoteResponse<T> {
    match response {
        RemoteResponse::Success(Some(data)) => RemoteResponse::Success(data),
        RemoteResponse::Success(None) => {
            RemoteResponse::failure(format!("{TRANSACTION_SERVICE} returned no data"))
        }
        RemoteResponse::Failure { message } => RemoteResponse::Failure { message },
        RemoteResponse::Unavailable { service } => RemoteResponse::Unavailable { service },
    }
}

fn build_client(endpoints: &ServiceEndpoints) -> reqwest::Result<Client> {
    Client::builder()
        .timeout(endpoints.request_timeout)
        .build()
}

/// Transaction service client over HTTP.
#[derive(Debug, Clone)]
pub struct HttpTransactionClient {
    client: Client,
    base_url: String,
}

impl HttpTransactionClient {
    pub fn new(endpoints: &ServiceEndpoints) -> reqwest::Result<Self> {
        Ok(Self {
            client: build_client(endpoints)?,
            base_url: format!(
                "{}/transaction/api/v1/transactions",
                endpoints.transaction_service_url.trim_end_matches('/')
            ),
        })
    }

    async fn enveloped<T: DeserializeOwned>(&self, request: RequestBuilder) -> RemoteResponse<T> {
        require_data(open_envelope(
            call::<ApiEnvelope<T>>(TRANSACTION_SERVICE, request).await,
        ))
    }
}

#[async_trait]
impl TransactionServiceClient for HttpTransactionClient {
    async fn create_transaction(
        &self,
        request: CreateTransactionRequest,
    ) -> RemoteResponse<TransactionResponse> {
        let mut builder = self.client.post(&self.base_url).json(&request);
        if let Some(correlation_id) = &request.correlation_id {
            builder = builder.header(CORRELATION_HEADER, correlation_id);
        }
        self.enveloped(builder).await
    }

    async fn process_transaction(
        &self,
        transaction_id: &str,
        correlation_id: Option<&str>,
    ) -> RemoteResponse<TransactionResponse> {
        let mut builder = self
            .client
            .post(format!("{}/{transaction_id}/process", self.base_url));
        if let Some(correlation_id) = correlation_id {
            builder = builder.header(CORRELATION_HEADER, correlation_id);
        }
        self.enveloped(builder).await
    }

    async fn cancel_transaction(
        &self,
        transaction_id: &str,
        request: CancelTransactionRequest,
    ) -> RemoteResponse<()> {
        let mut builder = self
            .client
            .post(format!("{}/{transaction_id}/cancel", self.base_url))
            .json(&request);
        if let Some(correlation_id) = &request.correlation_id {
            builder = builder.header(CORRELATION_HEADER, correlation_id);
        }
        open_envelope(call::<ApiEnvelope<serde_json::Value>>(TRANSACTION_SERVICE, builder).await)
            .map(|_| ())
    }

    async fn get_transaction(&self, transaction_id: &str) -> RemoteResponse<TransactionResponse> {
        self.enveloped(
            self.client
                .get(format!("{}/{transaction_id}", self.base_url)),
        )
        .await
    }

    async fn get_transaction_by_correlation_id(
        &self,
        correlation_id: &str,
    ) -> RemoteResponse<TransactionResponse> {
        self.enveloped(
            self.client
                .get(format!("{}/correlation/{correlation_id}", self.base_url))
                .header(CORRELATION_HEADER, correlation_id),
        )
        .await
    }
}

/// Account service client over HTTP.
#[derive(Debug, Clone)]
pub struct HttpAccountClient {
    client: Client,
    base_url: String,
}

impl HttpAccountClient {
    pub fn new(endpoints: &ServiceEndpoints) -> reqwest::Result<Self> {
        Ok(Self {
            client: build_client(endpoints)?,
            base_url: format!(
                "{}/api/accounts",
                endpoints.account_service_url.trim_end_matches('/')
            ),
        })
    }

    fn balance_operation(
        &self,
        account_id: &str,
        operation: &str,
        request: &BalanceOperationRequest,
    ) -> RequestBuilder {
        let mut builder = self
            .client
            .post(format!("{}/{account_id}/{operation}", self.base_url))
            .json(request);
        if let Some(reference_id) = &request.reference_id {
            builder = builder.header(CORRELATION_HEADER, reference_id);
        }
        builder
    }
}

#[async_trait]
impl AccountServiceClient for HttpAccountClient {
    async fn deposit(
        &self,
        account_id: &str,
        request: BalanceOperationRequest,
    ) -> RemoteResponse<BalanceOperation> {
        call(
            ACCOUNT_SERVICE,
            self.balance_operation(account_id, "deposit", &request),
        )
        .await
    }

    async fn withdraw(
        &self,
        account_id: &str,
        request: BalanceOperationRequest,
    ) -> RemoteResponse<BalanceOperation> {
        call(
            ACCOUNT_SERVICE,
            self.balance_operation(account_id, "withdraw", &request),
        )
        .await
    }

    async fn get_balance(&self, account_id: &str) -> RemoteResponse<BalanceResponse> {
        call(
            ACCOUNT_SERVICE,
            self.client
                .get(format!("{}/{account_id}/balance", self.base_url)),
        )
        .await
    }
}
