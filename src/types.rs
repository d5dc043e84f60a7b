//! Core types and identifiers for the ledger engine

use serde::{Deserialize, Serialize};
use std::fmt;

/// Account types following standard accounting practice, plus the
/// synthetic types the repair engine needs (ROOT, TRADING).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccountType {
    /// Bank and checking accounts; also the default type for
    /// auto-created repair buckets
    Bank,
    /// Cash on hand
    Cash,
    /// Credit card accounts
    Credit,
    /// Other assets
    Asset,
    /// Debts owed
    Liability,
    /// Stock holdings (commodity is typically not a currency)
    Stock,
    /// Mutual fund holdings
    Mutual,
    /// Money earned
    Income,
    /// Costs incurred
    Expense,
    /// Owner's interest
    Equity,
    /// Accounts receivable
    Receivable,
    /// Accounts payable
    Payable,
    /// Auxiliary accounts preserving per-commodity conservation in
    /// multi-currency transactions
    Trading,
    /// The synthetic root of the account tree; one per book
    Root,
}

impl AccountType {
    /// Whether splits in accounts of this type are synthetic balancing
    /// legs rather than user data
    pub fn is_trading(&self) -> bool {
        matches!(self, AccountType::Trading)
    }
}

/// Handle to an account in a [`Book`](crate::ledger::Book)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccountId(pub(crate) usize);

/// Handle to a transaction in a [`Book`](crate::ledger::Book)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TxnId(pub(crate) usize);

/// Handle to a split in a [`Book`](crate::ledger::Book)
///
/// Split ids are never reused; a destroyed split leaves a dead handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SplitId(pub(crate) usize);

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "account:{}", self.0)
    }
}

impl fmt::Display for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "transaction:{}", self.0)
    }
}

impl fmt::Display for SplitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "split:{}", self.0)
    }
}

/// Errors that can occur in the ledger engine
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("account not found: {0}")]
    AccountNotFound(AccountId),
    #[error("transaction not found: {0}")]
    TransactionNotFound(TxnId),
    #[error("split not found: {0}")]
    SplitNotFound(SplitId),
    #[error("edit bracket error: {0}")]
    EditBracket(String),
    #[error("validation error: {0}")]
    Validation(String),
}

/// Result type for ledger operations
pub type LedgerResult<T> = Result<T, LedgerError>;
