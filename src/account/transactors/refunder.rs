use serde_json::json;
use thiserror::Error;

use crate::{
    account::{Account, Operation, OperationKind, OperationStatus},
    model::{Envelope, OperationId},
};

/// Precondition failures: nothing is registered and the account is left
/// untouched.
#[derive(Debug, Error, PartialEq, Clone)]
pub enum RefunderError {
    #[error("operation does not exist")]
    UnknownOperation(OperationId),

    #[error("unrefundable operation")]
    Unrefundable(OperationId),
}

pub(crate) trait Refunder {
    fn refund(
        &self,
        account: &mut Account,
        operation_to_refund_id: OperationId,
        envelope: &Envelope,
    ) -> Result<Operation, RefunderError>;
}

pub(crate) struct SimpleRefunder;

impl Refunder for SimpleRefunder {
    /// Only a done card transaction is refundable. A refund credits the
    /// original amount back, flips the target to `Refunded` and registers a
    /// refund operation pointing at it.
    fn refund(
        &self,
        account: &mut Account,
        operation_to_refund_id: OperationId,
        envelope: &Envelope,
    ) -> Result<Operation, RefunderError> {
        let target = account
            .operation(operation_to_refund_id)
            .ok_or(RefunderError::UnknownOperation(operation_to_refund_id))?;
        if target.kind != OperationKind::CardTransaction
            || target.status != OperationStatus::Done
        {
            return Err(RefunderError::Unrefundable(operation_to_refund_id));
        }
        let (amount, currency) = match (target.amount(), target.currency()) {
            (Some(amount), Some(currency)) => (amount, currency.to_string()),
            _ => return Err(RefunderError::Unrefundable(operation_to_refund_id)),
        };

        account.credit(&currency, amount);
        if let Some(target) = account.operations.get_mut(&operation_to_refund_id) {
            target.status = OperationStatus::Refunded;
        }

        let mut data = envelope.meta.clone();
        data.insert(
            "operation_to_refund_id".to_string(),
            json!(operation_to_refund_id),
        );
        data.insert("amount".to_string(), json!(amount));
        data.insert("currency".to_string(), json!(currency));
        Ok(account.register(
            envelope.timestamp(),
            OperationKind::Refund,
            OperationStatus::Done,
            data,
        ))
    }
}
