//! Split Scrubber: repair invalid numbers and stale amount/value pairs
//!
//! A split whose account is denominated in the transaction currency must
//! have `amount == value`; the value is authoritative. Splits in a foreign
//! commodity legitimately carry differing units and are left alone.

use std::cmp::min;

use tracing::{info, warn};

use crate::ledger::Book;
use crate::scrub::context::{percent_complete, ScrubContext};
use crate::scrub::currency::scrub_account_commodity;
use crate::scrub::orphans::scrub_transaction_orphans;
use crate::traits::ProgressReporter;
use crate::types::{AccountId, SplitId, TxnId};
use crate::utils::same_at_fraction;
use bigdecimal::{BigDecimal, Zero};

/// Repair one split: reattach it if orphaned, zero out invalid numbers,
/// resolve the account commodity, and force `amount == value` (value wins)
/// when the account is denominated in the transaction currency.
///
/// Silently no-ops on a dead split id or a split whose transaction cannot
/// be found.
pub fn scrub_split(book: &mut Book, ctx: &ScrubContext, split: SplitId) {
    let Some(s) = book.split(split) else {
        return;
    };
    let txn = s.txn;
    if book.transaction(txn).is_none() {
        return;
    }

    let mut account = s.account;
    if account.is_none() {
        scrub_transaction_orphans(book, ctx, txn);
        account = book.split(split).and_then(|s| s.account);
    }
    // Import pipelines can hand us free-floating bogus transactions;
    // leave those for a later pass.
    let Some(account) = account else {
        info!("free floating transaction");
        return;
    };

    let needs_zero_repair = book
        .split(split)
        .is_some_and(|s| s.amount.is_none() || s.value.is_none());
    if needs_zero_repair {
        let repaired = book.edit_transaction(txn, |b| {
            let s = b.split_mut(split)?;
            if s.value.is_none() {
                s.value = Some(BigDecimal::zero());
            }
            if s.amount.is_none() {
                s.amount = Some(BigDecimal::zero());
            }
            Ok(())
        });
        if let Err(err) = repaired {
            warn!(error = %err, "cannot zero out invalid split numbers");
            return;
        }
    }

    let mut acc_commodity = book.account(account).and_then(|a| a.commodity.clone());
    if acc_commodity.is_none() {
        scrub_account_commodity(book, account);
        acc_commodity = book.account(account).and_then(|a| a.commodity.clone());
    }
    let Some(acc_commodity) = acc_commodity else {
        return;
    };
    let Some(currency) = book.transaction(txn).and_then(|t| t.currency.clone()) else {
        return;
    };
    if !acc_commodity.equivalent(&currency) {
        return;
    }

    let Some(s) = book.split(split) else {
        return;
    };
    let amount = s.amount_or_zero();
    let value = s.value_or_zero();
    let scu = min(acc_commodity.fraction(), currency.fraction());
    if same_at_fraction(&amount, &value, scu) {
        return;
    }

    info!(
        split = %s.guid,
        old_amount = %amount,
        new_amount = %value,
        currency = %currency,
        "adjusted split with mismatched values"
    );
    if let Err(err) = book.edit_transaction(txn, |b| b.set_split_amount(split, value)) {
        warn!(error = %err, "cannot overwrite stale split amount");
    }
}

/// Repair every split of one transaction
pub fn scrub_transaction_splits(book: &mut Book, ctx: &ScrubContext, txn: TxnId) {
    let Some(t) = book.transaction(txn) else {
        return;
    };
    for sid in t.splits.clone() {
        if ctx.is_cancelled() {
            break;
        }
        scrub_split(book, ctx, sid);
    }
}

/// Repair every split of `account`, reporting progress every 10 splits and
/// a final `(None, -1)` sentinel
pub fn scrub_account_splits(
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
    let splits = acc.splits.clone();
    let total = splits.len();

    for (current, sid) in splits.iter().enumerate() {
        if current % 10 == 0 {
            let message = format!("Checking splits in account {name}: {current} of {total}");
            progress.report(Some(&message), percent_complete(current, total));
        }
        if ctx.is_cancelled() {
            break;
        }
        scrub_split(book, ctx, *sid);
    }
    progress.report(None, -1);
}

/// Repair splits across `account` and all its descendants
pub fn scrub_tree_splits(
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

    scrub_account_splits(book, ctx, account, progress);
    for child in book.descendants(account) {
        if ctx.is_cancelled() {
            break;
        }
        scrub_account_splits(book, ctx, child, progress);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commodity::Commodity;
    use crate::types::AccountType;
    use std::str::FromStr;

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    fn usd() -> Commodity {
        Commodity::currency("USD", 100)
    }

    fn eur() -> Commodity {
        Commodity::currency("EUR", 100)
    }

    #[test]
    fn test_invalid_numbers_become_zero() {
        let mut book = Book::with_default_currency(usd());
        let checking = book
            .add_account("Checking", AccountType::Bank, Some(usd()), None)
            .unwrap();
        let txn = book.add_transaction("Corrupt import", Some(usd()));
        let sid = book.add_split(txn, Some(checking), None, None).unwrap();

        let ctx = ScrubContext::new();
        scrub_split(&mut book, &ctx, sid);

        let split = book.split_required(sid).unwrap();
        assert_eq!(split.amount, Some(BigDecimal::zero()));
        assert_eq!(split.value, Some(BigDecimal::zero()));
    }

    #[test]
    fn test_value_overwrites_stale_amount() {
        let mut book = Book::with_default_currency(usd());
        let checking = book
            .add_account("Checking", AccountType::Bank, Some(usd()), None)
            .unwrap();
        let txn = book.add_transaction("Stale amount", Some(usd()));
        let sid = book
            .add_split(txn, Some(checking), Some(dec("49.00")), Some(dec("50.00")))
            .unwrap();

        let ctx = ScrubContext::new();
        scrub_split(&mut book, &ctx, sid);

        let split = book.split_required(sid).unwrap();
        assert_eq!(split.amount, Some(dec("50.00")));
        assert_eq!(split.value, Some(dec("50.00")));
    }

    #[test]
    fn test_foreign_commodity_split_untouched() {
        let mut book = Book::with_default_currency(usd());
        let giro = book
            .add_account("Girokonto", AccountType::Bank, Some(eur()), None)
            .unwrap();
        let txn = book.add_transaction("Wire", Some(usd()));
        let sid = book
            .add_split(txn, Some(giro), Some(dec("90.00")), Some(dec("100.00")))
            .unwrap();

        let ctx = ScrubContext::new();
        scrub_split(&mut book, &ctx, sid);

        let split = book.split_required(sid).unwrap();
        assert_eq!(split.amount, Some(dec("90.00")));
        assert_eq!(split.value, Some(dec("100.00")));
    }

    #[test]
    fn test_subunit_difference_is_tolerated() {
        let mut book = Book::with_default_currency(usd());
        let checking = book
            .add_account("Checking", AccountType::Bank, Some(usd()), None)
            .unwrap();
        let txn = book.add_transaction("Rounding dust", Some(usd()));
        let sid = book
            .add_split(txn, Some(checking), Some(dec("50.001")), Some(dec("50.004")))
            .unwrap();

        let ctx = ScrubContext::new();
        scrub_split(&mut book, &ctx, sid);

        // Equal at cent precision, so the amount stays
        let split = book.split_required(sid).unwrap();
        assert_eq!(split.amount, Some(dec("50.001")));
    }

    #[test]
    fn test_orphan_repaired_before_comparison() {
        let mut book = Book::with_default_currency(usd());
        let txn = book.add_transaction("Orphaned", Some(usd()));
        let sid = book
            .add_split(txn, None, Some(dec("10.00")), Some(dec("20.00")))
            .unwrap();

        let ctx = ScrubContext::new();
        scrub_split(&mut book, &ctx, sid);

        let split = book.split_required(sid).unwrap();
        assert!(split.account.is_some());
        assert_eq!(split.amount, Some(dec("20.00")));
    }
}
