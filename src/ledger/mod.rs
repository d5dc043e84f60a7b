//! Ledger module containing the book, the account tree and transactions

pub mod account;
pub mod core;
pub mod transaction;

pub use account::*;
pub use self::core::*;
pub use transaction::*;
