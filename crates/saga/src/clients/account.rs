//! Account service contract and in-memory implementation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{ACCOUNT_SERVICE, RemoteResponse};

/// Request to move money in or out of an account. Amounts are in minor units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceOperationRequest {
    pub amount: i64,
    pub description: Option<String>,
    /// Correlation ID of the saga performing the operation.
    pub reference_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceOperation {
    pub account_id: String,
    pub operation_type: String,
    pub operation_amount: i64,
    pub previous_balance: i64,
    pub current_balance: i64,
    pub success: bool,
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceResponse {
    pub account_id: String,
    pub balance: i64,
    pub currency: String,
    pub available_balance: i64,
}

/// Operations offered by the account service.
#[async_trait]
pub trait AccountServiceClient: Send + Sync {
    async fn deposit(
        &self,
        account_id: &str,
        request: BalanceOperationRequest,
    ) -> RemoteResponse<BalanceOperation>;

    async fn withdraw(
        &self,
        account_id: &str,
        request: BalanceOperationRequest,
    ) -> RemoteResponse<BalanceOperation>;

    async fn get_balance(&self, account_id: &str) -> RemoteResponse<BalanceResponse>;
}

#[derive(Debug, Default)]
struct InMemoryAccountState {
    balances: HashMap<String, i64>,
    fail_on_deposit: bool,
    fail_on_withdraw: bool,
    unavailable: bool,
}

/// In-memory account service for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryAccountService {
    state: Arc<Mutex<InMemoryAccountState>>,
}

impl InMemoryAccountService {
    /// Creates a new in-memory account service with no accounts.
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, InMemoryAccountState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Opens an account with the given balance.
    pub fn open_account(&self, account_id: impl Into<String>, balance: i64) {
        self.state().balances.insert(account_id.into(), balance);
    }

    pub fn balance(&self, account_id: &str) -> Option<i64> {
        self.state().balances.get(account_id).copied()
    }

    pub fn set_fail_on_deposit(&self, fail: bool) {
        self.state().fail_on_deposit = fail;
    }

    pub fn set_fail_on_withdraw(&self, fail: bool) {
        self.state().fail_on_withdraw = fail;
    }

    /// Simulates the service being unreachable.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state().unavailable = unavailable;
    }

    fn apply(
        &self,
        account_id: &str,
        operation_type: &str,
        delta: i64,
        fail: impl Fn(&InMemoryAccountState) -> bool,
    ) -> RemoteResponse<BalanceOperation> {
        let mut state = self.state();

        if state.unavailable {
            return RemoteResponse::unavailable(ACCOUNT_SERVICE);
        }
        if fail(&*state) {
            return RemoteResponse::failure(format!("{operation_type} rejected for {account_id}"));
        }

        let Some(balance) = state.balances.get_mut(account_id) else {
            return RemoteResponse::failure(format!("Account not found: {account_id}"));
        };
        if *balance + delta < 0 {
            return RemoteResponse::failure(format!("Insufficient funds in account {account_id}"));
        }

        let previous_balance = *balance;
        *balance += delta;

        RemoteResponse::Success(BalanceOperation {
            account_id: account_id.to_string(),
            operation_type: operation_type.to_string(),
            operation_amount: delta.abs(),
            previous_balance,
            current_balance: *balance,
            success: true,
            message: None,
        })
    }
}

#[async_trait]
impl AccountServiceClient for InMemoryAccountService {
    async fn deposit(
        &self,
        account_id: &str,
        request: BalanceOperationRequest,
    ) -> RemoteResponse<BalanceOperation> {
        if request.amount <= 0 {
            return RemoteResponse::failure("Amount must be positive");
        }
        self.apply(account_id, "DEPOSIT", request.amount, |s| s.fail_on_deposit)
    }

    async fn withdraw(
        &self,
        account_id: &str,
        request: BalanceOperationRequest,
    ) -> RemoteResponse<BalanceOperation> {
        if request.amount <= 0 {
            return RemoteResponse::failure("Amount must be positive");
        }
        self.apply(account_id, "WITHDRAWAL", -request.amount, |s| {
            s.fail_on_withdraw
        })
    }

    async fn get_balance(&self, account_id: &str) -> RemoteResponse<BalanceResponse> {
        let state = self.state();

        if state.unavailable {
            return RemoteResponse::unavailable(ACCOUNT_SERVICE);
        }

        match state.balances.get(account_id) {
            Some(balance) => RemoteResponse::Success(BalanceResponse {
                account_id: account_id.to_string(),
                balance: *balance,
                currency: "USD".to_string(),
                available_balance: *balance,
            }),
            None => RemoteResponse::failure(format!("Account not found: {account_id}")),
        }
    }
}
