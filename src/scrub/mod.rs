//! Scrubbing: repair possibly-malformed ledger data into clean
//! double-entry form
//!
//! The repairs compose into a pipeline, each one idempotent: orphans are
//! reattached, split numbers validated, the transaction currency resolved,
//! and finally the imbalance eliminated. Tree drivers apply the pipeline
//! to an account and all its descendants with progress reporting and
//! cooperative cancellation.

pub mod accounts;
pub mod context;
pub mod currency;
pub mod imbalance;
pub mod orphans;
pub mod splits;

pub use context::{CancelToken, ScrubContext};
pub use currency::{
    delete_account_legacy_data, scrub_account_commodity, scrub_transaction_currency,
    scrub_transaction_posted_date, scrub_tree_commodities,
};
pub use imbalance::{scrub_account_imbalance, scrub_transaction_imbalance, scrub_tree_imbalance};
pub use orphans::{scrub_account_orphans, scrub_transaction_orphans, scrub_tree_orphans};
pub use splits::{
    scrub_account_splits, scrub_split, scrub_transaction_splits, scrub_tree_splits,
};
