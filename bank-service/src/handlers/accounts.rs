//! Account handlers.

use axum::{
    extract::{Json, Path, Query, State},
    http::StatusCode,
};
use serde::Deserialize;
use validator::Validate;

use crate::models::{Account, CreateAccount, Currency};
use crate::startup::AppState;
use service_core::error::AppError;

/// Request body for creating an account.
#[derive(Debug, Deserialize, Validate)]
pub struct CreateAccountRequest {
    #[validate(length(min = 1, message = "Owner must not be empty"))]
    pub owner: String,
    pub currency: String,
}

/// Query parameters for listing accounts.
#[derive(Debug, Deserialize, Validate)]
pub struct ListAccountsQuery {
    #[validate(range(min = 1, message = "page_id must be at least 1"))]
    pub page_id: i64,
    #[validate(range(min = 5, max = 10, message = "page_size must be between 5 and 10"))]
    pub page_size: i64,
}

/// Create a new account with a zero balance.
///
/// POST /accounts
pub async fn create_account(
    State(state): State<AppState>,
    Json(req): Json<CreateAccountRequest>,
) -> Result<(StatusCode, Json<Account>), AppError> {
    req.validate()?;

    let currency = Currency::from_str(&req.currency).ok_or_else(|| {
        AppError::BadRequest(anyhow::anyhow!("Unsupported currency: {}", req.currency))
    })?;

    let account = state
        .db
        .create_account(&CreateAccount {
            owner: req.owner,
            balance: 0,
            currency,
        })
        .await?;

    tracing::info!(account_id = account.id, "Account created via API");

    Ok((StatusCode::CREATED, Json(account)))
}

/// Fetch a single account.
///
/// GET /accounts/:id
pub async fn get_account(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Account>, AppError> {
    let account = state.db.get_account(id).await?;
    Ok(Json(account))
}

/// List accounts page by page.
///
/// GET /accounts?page_id=1&page_size=5
pub async fn list_accounts(
    State(state): State<AppState>,
    Query(query): Query<ListAccountsQuery>,
) -> Result<Json<Vec<Account>>, AppError> {
    query.validate()?;

    let limit = query.page_size;
    let offset = page_offset(query.page_id, query.page_size)?;

    let accounts = state.db.list_accounts(limit, offset).await?;
    Ok(Json(accounts))
}

/// Translate 1-based page parameters into a SQL offset.
///
/// The range validator has no upper bound on `page_id`, so the arithmetic
/// is checked: a page too large to address is a bad request, not a panic.
fn page_offset(page_id: i64, page_size: i64) -> Result<i64, AppError> {
    page_id
        .checked_sub(1)
        .and_then(|page| page.checked_mul(page_size))
        .ok_or_else(|| {
            AppError::BadRequest(anyhow::anyhow!("page_id {} is out of range", page_id))
        })
}
