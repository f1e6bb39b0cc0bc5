//! Transfer handlers.

use axum::{
    extract::{Json, State},
    http::StatusCode,
};
use serde::Deserialize;
use validator::Validate;

use crate::models::{Currency, TransferTxParams, TransferTxResult};
use crate::startup::AppState;
use service_core::error::AppError;

/// Request body for executing a transfer.
#[derive(Debug, Deserialize, Validate)]
pub struct TransferRequest {
    pub from_account_id: i64,
    pub to_account_id: i64,
    #[validate(range(min = 1, message = "Amount must be at least 1"))]
    pub amount: i64,
    pub currency: String,
}

/// Transfer money between two accounts of the same currency.
///
/// POST /transfers
pub async fn create_transfer(
    State(state): State<AppState>,
    Json(req): Json<TransferRequest>,
) -> Result<(StatusCode, Json<TransferTxResult>), AppError> {
    req.validate()?;

    let currency = Currency::from_str(&req.currency).ok_or_else(|| {
        AppError::BadRequest(anyhow::anyhow!("Unsupported currency: {}", req.currency))
    })?;

    check_account_currency(&state, req.from_account_id, currency).await?;
    check_account_currency(&state, req.to_account_id, currency).await?;

    let result = state
        .db
        .transfer_tx(TransferTxParams {
            from_account_id: req.from_account_id,
            to_account_id: req.to_account_id,
            amount: req.amount,
        })
        .await?;

    tracing::info!(
        transfer_id = result.transfer.id,
        from_account_id = req.from_account_id,
        to_account_id = req.to_account_id,
        amount = req.amount,
        "Transfer completed via API"
    );

    Ok((StatusCode::CREATED, Json(result)))
}

/// Verify the account exists and is denominated in the requested currency.
async fn check_account_currency(
    state: &AppState,
    account_id: i64,
    currency: Currency,
) -> Result<(), AppError> {
    let account = state.db.get_account(account_id).await?;

    if account.currency != currency.as_str() {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "Account {} currency mismatch: {} vs {}",
            account_id,
            account.currency,
            currency
        )));
    }

    Ok(())
}
