//! # Ledger Scrub
//!
//! The consistency engine of a double-entry ledger: algorithms that take
//! possibly-malformed transaction data and deterministically repair it
//! into self-consistent, zero-sum, double-entry form.
//!
//! ## Features
//!
//! - **Orphan scrubbing**: splits without an account are reattached to an
//!   auto-vivified `"Orphan-<CCY>"` bucket
//! - **Split scrubbing**: invalid numbers become exact zero, stale amounts
//!   are overwritten from the authoritative value
//! - **Currency resolution**: a weighted majority vote across the splits'
//!   account commodities establishes the transaction currency, with a
//!   fallback for books migrated from single-currency storage
//! - **Imbalance balancing**: a single `"Imbalance-<CCY>"` split, or with
//!   trading accounts enabled a `Trading/<namespace>/<mnemonic>` hierarchy
//!   preserving per-commodity conservation
//! - **Batch drivers**: recursive account-tree walkers with progress
//!   reporting and cooperative cancellation
//!
//! ## Quick Start
//!
//! ```rust
//! use bigdecimal::BigDecimal;
//! use ledger_scrub::{scrub_transaction_imbalance, AccountType, Book, Commodity, ScrubContext};
//! use std::str::FromStr;
//!
//! let usd = Commodity::currency("USD", 100);
//! let mut book = Book::with_default_currency(usd.clone());
//! let checking = book
//!     .add_account("Checking", AccountType::Bank, Some(usd.clone()), None)
//!     .unwrap();
//!
//! // A lone $50 split cannot balance on its own.
//! let txn = book.add_transaction("Paycheck", Some(usd));
//! book.add_split(
//!     txn,
//!     Some(checking),
//!     Some(BigDecimal::from_str("50.00").unwrap()),
//!     Some(BigDecimal::from_str("50.00").unwrap()),
//! )
//! .unwrap();
//!
//! let ctx = ScrubContext::new();
//! scrub_transaction_imbalance(&mut book, &ctx, txn, None, None);
//!
//! assert!(book.is_balanced(txn));
//! assert!(book.find_account_by_name("Imbalance-USD").is_some());
//! ```

pub mod commodity;
pub mod ledger;
pub mod scrub;
pub mod traits;
pub mod types;
pub mod utils;

// Re-export commonly used types
pub use commodity::*;
pub use ledger::*;
pub use scrub::*;
pub use traits::*;
pub use types::*;
