//! Token ledger domain (append-only transaction log, derived balances).
//!
//! Pure domain logic only: no IO, no async, no persistence concerns. The
//! datastore adapters in `clipcredit-infra` call into [`TokenAccount`] to plan
//! each transaction so every backend computes `balance_after` the same way.

pub mod account;
pub mod transaction;

pub use account::{LedgerEntry, LedgerError, TokenAccount};
pub use transaction::{TokenTransaction, TransactionType};
