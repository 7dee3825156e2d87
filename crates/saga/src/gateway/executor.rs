//! Maps saga steps onto calls to the remote services.

use std::collections::HashMap;
use std::sync::Arc;

use common::{SagaId, StepId};
use domain::{Saga, SagaStep, StepType};
use serde::{Deserialize, Serialize};

use super::StepCallback;
use crate::clients::{
    AccountServiceClient, BalanceOperation, BalanceOperationRequest, CancelTransactionRequest,
    CreateTransactionRequest, RemoteResponse, TransactionServiceClient,
};

/// Context keys read by the step executor.
pub mod context_keys {
    pub const SOURCE_ACCOUNT_ID: &str = "sourceAccountId";
    pub const DESTINATION_ACCOUNT_ID: &str = "destinationAccountId";
    pub const ACCOUNT_ID: &str = "accountId";
    pub const AMOUNT: &str = "amount";
    pub const CURRENCY: &str = "currency";
    pub const DESCRIPTION: &str = "description";
    pub const PROCESS_INSTANCE_ID: &str = "processInstanceId";
}

const DEFAULT_CURRENCY: &str = "USD";
const CANCEL_TRANSACTION: &str = "cancel_transaction";
const CREDIT_SOURCE: &str = "credit_source";

/// What a debit step needs to undo itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DebitCompensation {
    pub account_id: String,
    pub amount: i64,
}

/// Owned snapshot of everything needed to execute one step off the saga.
#[derive(Debug, Clone)]
pub(crate) struct StepRequest {
    pub saga_id: SagaId,
    pub step_id: StepId,
    pub step_name: String,
    pub step_type: StepType,
    pub saga_type: String,
    pub correlation_id: Option<String>,
    pub context: HashMap<String, String>,
    /// Id of the transaction created by an earlier step, if any.
    pub transaction_id: Option<String>,
}

impl StepRequest {
    pub fn new(saga: &Saga, step: &SagaStep, context: &HashMap<String, String>) -> Self {
        let mut merged = saga.context().clone();
        merged.extend(context.iter().map(|(k, v)| (k.clone(), v.clone())));
        merged.extend(
            step.parameters()
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );

        let transaction_id = saga
            .steps()
            .iter()
            .find(|s| s.step_type() == StepType::CreateTransaction)
            .and_then(|s| s.output())
            .map(str::to_string);

        Self {
            saga_id: saga.id(),
            step_id: step.id(),
            step_name: step.name().to_string(),
            step_type: step.step_type(),
            saga_type: saga.saga_type().to_string(),
            correlation_id: saga.correlation_id().map(str::to_string),
            context: merged,
            transaction_id,
        }
    }

    fn value(&self, key: &str) -> Result<&str, String> {
        self.context
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| format!("Missing context value '{key}'"))
    }

    fn amount(&self) -> Result<i64, String> {
        let raw = self.value(context_keys::AMOUNT)?;
        raw.trim()
            .parse()
            .map_err(|_| format!("Invalid amount '{raw}'"))
    }

    fn optional(&self, key: &str) -> Option<String> {
        self.context.get(key).cloned()
    }
}

/// Result of a successful forward step.
struct StepOutput {
    output: Option<String>,
    compensation_data: Option<String>,
}

/// Executes forward and compensation actions against the remote services.
#[derive(Clone)]
pub struct StepExecutor {
    transactions: Arc<dyn TransactionServiceClient>,
    accounts: Arc<dyn AccountServiceClient>,
}

impl StepExecutor {
    pub fn new(
        transactions: Arc<dyn TransactionServiceClient>,
        accounts: Arc<dyn AccountServiceClient>,
    ) -> Self {
        Self {
            transactions,
            accounts,
        }
    }

    /// Runs a step and turns the outcome into a callback.
    pub(crate) async fn execute(&self, request: StepRequest) -> StepCallback {
        let saga_id = request.saga_id;
        let step_id = request.step_id;

        match self.run(&request).await {
            Ok(done) => StepCallback::Completed {
                saga_id,
                step_id,
                output: done.output,
                compensation_data: done.compensation_data,
            },
            Err(error) => {
                tracing::warn!(
                    %saga_id,
                    step = %request.step_name,
                    %error,
                    "step execution failed"
                );
                StepCallback::Failed {
                    saga_id,
                    step_id,
                    error,
                }
            }
        }
    }

    async fn run(&self, request: &StepRequest) -> Result<StepOutput, String> {
        match request.step_type {
            StepType::CreateTransaction => {
                let create = CreateTransactionRequest {
                    source_account_id: request.optional(context_keys::SOURCE_ACCOUNT_ID),
                    destination_account_id: request
                        .optional(context_keys::DESTINATION_ACCOUNT_ID),
                    amount: request.amount()?,
                    currency: request
                        .optional(context_keys::CURRENCY)
                        .unwrap_or_else(|| DEFAULT_CURRENCY.to_string()),
                    transaction_type: request.saga_type.clone(),
                    correlation_id: request.correlation_id.clone(),
                    description: request.optional(context_keys::DESCRIPTION),
                };
                let tx = self
                    .transactions
                    .create_transaction(create)
                    .await
                    .into_result()?;
                Ok(StepOutput {
                    output: Some(tx.id.clone()),
                    compensation_data: Some(tx.id),
                })
            }
            StepType::ProcessTransaction => {
                let transaction_id = request
                    .transaction_id
                    .as_deref()
                    .ok_or_else(|| "No transaction to process".to_string())?;
                let tx = self
                    .transactions
                    .process_transaction(transaction_id, request.correlation_id.as_deref())
                    .await
                    .into_result()?;
                Ok(StepOutput {
                    output: Some(tx.id),
                    compensation_data: None,
                })
            }
            StepType::DebitAccount => {
                let account_id = request.value(context_keys::SOURCE_ACCOUNT_ID)?.to_string();
                let amount = request.amount()?;
                let operation = self
                    .accounts
                    .withdraw(&account_id, self.balance_request(request, amount))
                    .await;
                let operation = accepted(operation)?;
                let undo = DebitCompensation { account_id, amount };
                Ok(StepOutput {
                    output: Some(operation.current_balance.to_string()),
                    compensation_data: serde_json::to_string(&undo).ok(),
                })
            }
            StepType::CreditAccount => {
                let account_id = request.value(context_keys::DESTINATION_ACCOUNT_ID)?;
                let amount = request.amount()?;
                let operation = self
                    .accounts
                    .deposit(account_id, self.balance_request(request, amount))
                    .await;
                let operation = accepted(operation)?;
                Ok(StepOutput {
                    output: Some(operation.current_balance.to_string()),
                    compensation_data: None,
                })
            }
            StepType::Notify => {
                let recipient = request
                    .optional(context_keys::ACCOUNT_ID)
                    .unwrap_or_else(|| request.saga_id.to_string());
                tracing::info!(saga_id = %request.saga_id, %recipient, "notification sent");
                Ok(StepOutput {
                    output: Some(format!("notified {recipient}")),
                    compensation_data: None,
                })
            }
        }
    }

    fn balance_request(&self, request: &StepRequest, amount: i64) -> BalanceOperationRequest {
        BalanceOperationRequest {
            amount,
            description: Some(format!("Saga {} step {}", request.saga_id, request.step_name)),
            reference_id: request.correlation_id.clone(),
        }
    }

    /// Runs the step's compensation action.
    pub async fn compensate(&self, saga: &Saga, step: &SagaStep) -> RemoteResponse<()> {
        let Some(action) = step.compensation_action() else {
            return RemoteResponse::failure(format!(
                "Step '{}' has no compensation action",
                step.name()
            ));
        };
        let Some(data) = step.compensation_data() else {
            return RemoteResponse::failure(format!(
                "Step '{}' has no compensation data",
                step.name()
            ));
        };

        match action {
            CANCEL_TRANSACTION => {
                let request = CancelTransactionRequest {
                    reason: format!("Saga {} compensation", saga.id()),
                    correlation_id: saga.correlation_id().map(str::to_string),
                };
                self.transactions.cancel_transaction(data, request).await
            }
            CREDIT_SOURCE => {
                let undo: DebitCompensation = match serde_json::from_str(data) {
                    Ok(undo) => undo,
                    Err(e) => {
                        return RemoteResponse::failure(format!(
                            "Invalid compensation data for step '{}': {e}",
                            step.name()
                        ));
                    }
                };
                let request = BalanceOperationRequest {
                    amount: undo.amount,
                    description: Some(format!("Saga {} compensation", saga.id())),
                    reference_id: saga.correlation_id().map(str::to_string),
                };
                match self.accounts.deposit(&undo.account_id, request).await {
                    RemoteResponse::Success(op) if !op.success => RemoteResponse::failure(
                        op.message
                            .unwrap_or_else(|| "Compensating deposit rejected".to_string()),
                    ),
                    other => other.map(|_| ()),
                }
            }
            other => RemoteResponse::failure(format!("Unsupported compensation action '{other}'")),
        }
    }
}

fn accepted(response: RemoteResponse<BalanceOperation>) -> Result<BalanceOperation, String> {
    let operation = response.into_result()?;
    if !operation.success {
        return Err(operation
            .message
            .unwrap_or_else(|| "Balance operation rejected".to_string()));
    }
    Ok(operation)
}
