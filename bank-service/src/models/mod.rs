//! Domain models for bank-service.

mod account;
mod entry;
mod transfer;

pub use account::{Account, CreateAccount, Currency};
pub use entry::Entry;
pub use transfer::{Transfer, TransferTxParams, TransferTxResult};
