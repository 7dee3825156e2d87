//! Transaction service contract and in-memory implementation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{RemoteResponse, TRANSACTION_SERVICE};

/// Request to create a transaction. Amounts are in minor currency units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTransactionRequest {
    pub source_account_id: Option<String>,
    pub destination_account_id: Option<String>,
    pub amount: i64,
    pub currency: String,
    #[serde(rename = "type")]
    pub transaction_type: String,
    pub correlation_id: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelTransactionRequest {
    pub reason: String,
    pub correlation_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Pending,
    Processing,
    Completed,
    Cancelled,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionResponse {
    pub id: String,
    pub source_account_id: Option<String>,
    pub destination_account_id: Option<String>,
    pub amount: i64,
    pub currency: String,
    #[serde(rename = "type")]
    pub transaction_type: String,
    pub status: TransactionStatus,
    pub correlation_id: Option<String>,
    pub description: Option<String>,
}

/// Operations offered by the transaction service.
#[async_trait]
pub trait TransactionServiceClient: Send + Sync {
    async fn create_transaction(
        &self,
        request: CreateTransactionRequest,
    ) -> RemoteResponse<TransactionResponse>;

    async fn process_transaction(
        &self,
        transaction_id: &str,
        correlation_id: Option<&str>,
    ) -> RemoteResponse<TransactionResponse>;

    async fn cancel_transaction(
        &self,
        transaction_id: &str,
        request: CancelTransactionRequest,
    ) -> RemoteResponse<()>;

    async fn get_transaction(&self, transaction_id: &str) -> RemoteResponse<TransactionResponse>;

    async fn get_transaction_by_correlation_id(
        &self,
        correlation_id: &str,
    ) -> RemoteResponse<TransactionResponse>;
}

#[derive(Debug, Default)]
struct InMemoryTransactionState {
    transactions: HashMap<String, TransactionResponse>,
    next_id: u32,
    fail_on_create: bool,
    fail_on_process: bool,
    fail_on_cancel: bool,
    unavailable: bool,
}

/// In-memory transaction service for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryTransactionService {
    state: Arc<Mutex<InMemoryTransactionState>>,
}

impl InMemoryTransactionService {
    /// Creates a new in-memory transaction service.
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, InMemoryTransactionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Configures the service to reject transaction creation.
    pub fn set_fail_on_create(&self, fail: bool) {
        self.state().fail_on_create = fail;
    }

    pub fn set_fail_on_process(&self, fail: bool) {
        self.state().fail_on_process = fail;
    }

    pub fn set_fail_on_cancel(&self, fail: bool) {
        self.state().fail_on_cancel = fail;
    }

    /// Simulates the service being unreachable.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state().unavailable = unavailable;
    }

    pub fn transaction_count(&self) -> usize {
        self.state().transactions.len()
    }

    pub fn transaction_status(&self, transaction_id: &str) -> Option<TransactionStatus> {
        self.state()
            .transactions
            .get(transaction_id)
            .map(|tx| tx.status)
    }
}

#[async_trait]
impl TransactionServiceClient for InMemoryTransactionService {
    async fn create_transaction(
        &self,
        request: CreateTransactionRequest,
    ) -> RemoteResponse<TransactionResponse> {
        let mut state = self.state();

        if state.unavailable {
            return RemoteResponse::unavailable(TRANSACTION_SERVICE);
        }
        if state.fail_on_create {
            return RemoteResponse::failure("Transaction rejected");
        }
        if request.amount <= 0 {
            return RemoteResponse::failure("Amount must be positive");
        }

        state.next_id += 1;
        let transaction = TransactionResponse {
            id: format!("TX-{:04}", state.next_id),
            source_account_id: request.source_account_id,
            destination_account_id: request.destination_account_id,
            amount: request.amount,
            currency: request.currency,
            transaction_type: request.transaction_type,
            status: TransactionStatus::Pending,
            correlation_id: request.correlation_id,
            description: request.description,
        };
        state
            .transactions
            .insert(transaction.id.clone(), transaction.clone());

        RemoteResponse::Success(transaction)
    }

    async fn process_transaction(
        &self,
        transaction_id: &str,
        _correlation_id: Option<&str>,
    ) -> RemoteResponse<TransactionResponse> {
        let mut state = self.state();

        if state.unavailable {
            return RemoteResponse::unavailable(TRANSACTION_SERVICE);
        }
        if state.fail_on_process {
            return RemoteResponse::failure("Transaction processing failed");
        }

        match state.transactions.get_mut(transaction_id) {
            Some(tx) if tx.status == TransactionStatus::Pending => {
                tx.status = TransactionStatus::Completed;
                RemoteResponse::Success(tx.clone())
            }
            Some(tx) => RemoteResponse::failure(format!(
                "Transaction {transaction_id} cannot be processed in status {:?}",
                tx.status
            )),
            None => RemoteResponse::failure(format!("Transaction not found: {transaction_id}")),
        }
    }

    async fn cancel_transaction(
        &self,
        transaction_id: &str,
        _request: CancelTransactionRequest,
    ) -> RemoteResponse<()> {
        let mut state = self.state();

        if state.unavailable {
            return RemoteResponse::unavailable(TRANSACTION_SERVICE);
        }
        if state.fail_on_cancel {
            return RemoteResponse::failure("Transaction cancellation failed");
        }

        match state.transactions.get_mut(transaction_id) {
            Some(tx) => {
                tx.status = TransactionStatus::Cancelled;
                RemoteResponse::Success(())
            }
            None => RemoteResponse::failure(format!("Transaction not found: {transaction_id}")),
        }
    }

    async fn get_transaction(&self, transaction_id: &str) -> RemoteResponse<TransactionResponse> {
        let state = self.state();

        if state.unavailable {
            return RemoteResponse::unavailable(TRANSACTION_SERVICE);
        }

        match state.transactions.get(transaction_id) {
            Some(tx) => RemoteResponse::Success(tx.clone()),
            None => RemoteResponse::failure(format!("Transaction not found: {transaction_id}")),
        }
    }

    async fn get_transaction_by_correlation_id(
        &self,
        correlation_id: &str,
    ) -> RemoteResponse<TransactionResponse> {
        let state = self.state();

        if state.unavailable {
            return RemoteResponse::unavailable(TRANSACTION_SERVICE);
        }

        match state
            .transactions
            .values()
            .find(|tx| tx.correlation_id.as_deref() == Some(correlation_id))
        {
            Some(tx) => RemoteResponse::Success(tx.clone()),
            None => RemoteResponse::failure(format!(
                "No transaction for correlation ID: {correlation_id}"
            )),
        }
    }
}
