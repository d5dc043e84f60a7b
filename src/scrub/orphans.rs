//! Orphan Scrubber: reattach splits that lost their account
//!
//! Every split must belong to exactly one account. A split whose account
//! reference is absent is assigned to an auto-vivified `"Orphan-<CCY>"`
//! bucket under the book root, denominated in the transaction currency.

use tracing::{debug, info, warn};

use crate::ledger::Book;
use crate::scrub::accounts::get_or_make_account;
use crate::scrub::context::{percent_complete, ScrubContext};
use crate::traits::ProgressReporter;
use crate::types::{AccountId, AccountType, TxnId};
use crate::utils::orphan_account_name;

/// Reattach the orphans of one transaction when the root is already known.
/// Requires the transaction to carry a currency, since the currency names
/// the orphan bucket.
pub(crate) fn scrub_transaction_orphans_fast(
    book: &mut Book,
    ctx: &ScrubContext,
    txn: TxnId,
    root: AccountId,
) {
    let Some(t) = book.transaction(txn) else {
        return;
    };
    let Some(currency) = t.currency.clone() else {
        warn!(transaction = %t.guid, "transaction has no currency to name its orphan bucket");
        return;
    };
    let split_ids = t.splits.clone();

    for sid in split_ids {
        if ctx.is_cancelled() {
            break;
        }
        let Some(split) = book.split(sid) else {
            continue;
        };
        if split.account.is_some() {
            continue;
        }

        debug!(split = %split.guid, "found an orphan");

        let name = orphan_account_name(&currency);
        let orphan = match get_or_make_account(
            book,
            root,
            Some(&currency),
            &name,
            AccountType::Bank,
            false,
            true,
        ) {
            Ok(aid) => aid,
            Err(err) => {
                warn!(error = %err, "cannot get orphan account");
                continue;
            }
        };

        if let Err(err) = book.edit_transaction(txn, |b| b.set_split_account(sid, orphan)) {
            warn!(error = %err, "cannot reassign orphan split");
        }
    }
}

/// Ensure every split of `txn` belongs to an account. A transaction with
/// zero splits is a no-op; a transaction none of whose splits belong to
/// any account is logged as free-floating and repaired from the book root.
pub fn scrub_transaction_orphans(book: &mut Book, ctx: &ScrubContext, txn: TxnId) {
    let Some(t) = book.transaction(txn) else {
        return;
    };
    if t.splits.is_empty() {
        return;
    }
    let free_floating = !t
        .splits
        .iter()
        .any(|sid| book.split(*sid).is_some_and(|s| s.account.is_some()));
    if free_floating {
        info!(transaction = %t.guid, "free floating transaction");
    }
    let root = book.root_account();
    scrub_transaction_orphans_fast(book, ctx, txn, root);
}

/// Reattach orphans in every transaction touching `account`, reporting
/// progress every 10 splits and a final `(None, -1)` sentinel.
pub fn scrub_account_orphans(
    book: &mut Book,
    ctx: &ScrubContext,
    account: AccountId,
    progress: &mut dyn ProgressReporter,
) {
    let Some(acc) = book.account(account) else {
        return;
    };
    let _guard = ctx.enter();

    let name = acc.name.clone();
    info!(account = %name, "looking for orphans");
    let splits = acc.splits.clone();
    let total = splits.len();
    let root = book.root_account();

    for (current, sid) in splits.iter().enumerate() {
        if current % 10 == 0 {
            let message = format!("Looking for orphans in account {name}: {current} of {total}");
            progress.report(Some(&message), percent_complete(current, total));
            if ctx.is_cancelled() {
                break;
            }
        }
        let Some(txn) = book.split(*sid).map(|s| s.txn) else {
            continue;
        };
        scrub_transaction_orphans_fast(book, ctx, txn, root);
    }
    progress.report(None, -1);
}

/// Reattach orphans across `account` and all its descendants
pub fn scrub_tree_orphans(
    book: &mut Book,
    ctx: &ScrubContext,
    account: AccountId,
    progress: &mut dyn ProgressReporter,
) {
    if book.account(account).is_none() {
        return;
    }
    if ctx.is_cancelled() {
        progress.report(None, -1);
        return;
    }
    let _guard = ctx.enter();

    scrub_account_orphans(book, ctx, account, progress);
    for child in book.descendants(account) {
        if ctx.is_cancelled() {
            break;
        }
        scrub_account_orphans(book, ctx, child, progress);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commodity::Commodity;
    use crate::traits::NullProgress;
    use bigdecimal::BigDecimal;
    use std::str::FromStr;

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    fn usd() -> Commodity {
        Commodity::currency("USD", 100)
    }

    #[test]
    fn test_orphan_reassigned_to_bucket() {
        let mut book = Book::with_default_currency(usd());
        let txn = book.add_transaction("Imported", Some(usd()));
        let sid = book
            .add_split(txn, None, Some(dec("10")), Some(dec("10")))
            .unwrap();

        let ctx = ScrubContext::new();
        scrub_transaction_orphans(&mut book, &ctx, txn);

        let bucket = book.find_account_by_name("Orphan-USD").expect("bucket created");
        assert_eq!(book.split_required(sid).unwrap().account, Some(bucket));
        assert!(book.account_required(bucket).unwrap().splits.contains(&sid));
    }

    #[test]
    fn test_no_currency_leaves_orphan_alone() {
        let mut book = Book::with_default_currency(usd());
        let txn = book.add_transaction("Imported", None);
        let sid = book
            .add_split(txn, None, Some(dec("10")), Some(dec("10")))
            .unwrap();

        let ctx = ScrubContext::new();
        scrub_transaction_orphans(&mut book, &ctx, txn);

        assert_eq!(book.split_required(sid).unwrap().account, None);
        assert!(book.find_account_by_name("Orphan-USD").is_none());
    }

    #[test]
    fn test_zero_split_transaction_is_noop() {
        let mut book = Book::with_default_currency(usd());
        let txn = book.add_transaction("Empty", Some(usd()));
        let accounts_before = book.accounts().count();

        let ctx = ScrubContext::new();
        scrub_transaction_orphans(&mut book, &ctx, txn);

        assert_eq!(book.accounts().count(), accounts_before);
    }

    #[test]
    fn test_account_driver_covers_sibling_orphans() {
        let mut book = Book::with_default_currency(usd());
        let checking = book
            .add_account("Checking", AccountType::Bank, Some(usd()), None)
            .unwrap();
        let txn = book.add_transaction("Half entered", Some(usd()));
        book.add_split(txn, Some(checking), Some(dec("25")), Some(dec("25")))
            .unwrap();
        let orphaned = book
            .add_split(txn, None, Some(dec("-25")), Some(dec("-25")))
            .unwrap();

        let ctx = ScrubContext::new();
        scrub_account_orphans(&mut book, &ctx, checking, &mut NullProgress);

        let bucket = book.find_account_by_name("Orphan-USD").expect("bucket created");
        assert_eq!(book.split_required(orphaned).unwrap().account, Some(bucket));
    }
}
