//! Ledger entry model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Single ledger line recording money moving in or out of an account.
///
/// The amount is signed: negative for money leaving the account (debit),
/// positive for money arriving (credit). Every committed transfer writes
/// exactly one entry per side.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Entry {
    pub id: i64,
    pub account_id: i64,
    pub amount: i64,
    pub created_at: DateTime<Utc>,
}

impl Entry {
    /// Money left the account.
    pub fn is_debit(&self) -> bool {
        self.amount < 0
    }

    /// Money arrived at the account.
    pub fn is_credit(&self) -> bool {
        self.amount > 0
    }
}
