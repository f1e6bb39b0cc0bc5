//! Account model for the transfer ledger.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Currencies accounts can be denominated in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Usd,
    Eur,
    Cad,
}

impl Currency {
    /// Get string representation for database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Usd => "USD",
            Self::Eur => "EUR",
            Self::Cad => "CAD",
        }
    }

    /// Parse a currency code.
    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "USD" => Some(Self::Usd),
            "EUR" => Some(Self::Eur),
            "CAD" => Some(Self::Cad),
            _ => None,
        }
    }
}

impl std::fmt::Display for Currency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Bank account holding a balance in a single currency.
///
/// Balances are stored in the smallest currency unit, so they stay exact
/// integer arithmetic all the way through.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Account {
    pub id: i64,
    pub owner: String,
    pub balance: i64,
    pub currency: String,
    pub created_at: DateTime<Utc>,
}

impl Account {
    /// Get parsed currency.
    pub fn parsed_currency(&self) -> Option<Currency> {
        Currency::from_str(&self.currency)
    }
}

/// Input for creating a new account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAccount {
    pub owner: String,
    pub balance: i64,
    pub currency: Currency,
}
