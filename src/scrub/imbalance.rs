//! Imbalance Balancer: drive a transaction to the zero-sum invariant
//!
//! Repairs run in a fixed order: splits (which reattaches orphans), the
//! transaction currency, then balancing. Stale trading splits from an
//! earlier balancing pass are always deleted first so the new computation
//! starts from a clean slate. Without trading accounts a single balancing
//! split in `"Imbalance-<CCY>"` absorbs the residual value; with them,
//! one trading split per foreign commodity restores per-commodity
//! conservation, and a final pass reverses the value of splits that carry
//! value with no amount (realized gain or loss).

use bigdecimal::{BigDecimal, Zero};
use tracing::{error, info, warn};

use crate::commodity::{equivalent_opt, Commodity};
use crate::ledger::Book;
use crate::scrub::accounts::get_or_make_account;
use crate::scrub::context::{percent_complete, ScrubContext};
use crate::scrub::currency::scrub_transaction_currency;
use crate::scrub::splits::{scrub_split, scrub_transaction_splits};
use crate::traits::ProgressReporter;
use crate::types::{AccountId, AccountType, SplitId, TxnId};
use crate::utils::{imbalance_account_name, sub_rounded, TRADING_ACCOUNT_NAME};

/// Balance one transaction.
///
/// `root` overrides the account the repair buckets hang off (the book root
/// when absent); `fallback_account` receives the balancing split directly
/// when its commodity matches the transaction currency, saving the
/// `"Imbalance-<CCY>"` bucket.
///
/// A transaction whose currency cannot be resolved cannot name its repair
/// buckets; the anomaly is logged and the transaction left untouched. A
/// residual imbalance after every pass is logged, never raised.
pub fn scrub_transaction_imbalance(
    book: &mut Book,
    ctx: &ScrubContext,
    txn: TxnId,
    root: Option<AccountId>,
    fallback_account: Option<AccountId>,
) {
    if book.transaction(txn).is_none() {
        return;
    }

    // Orphans must be reattached and trading splits cleared even if the
    // transaction turns out to be balanced.
    scrub_transaction_splits(book, ctx, txn);
    scrub_transaction_currency(book, ctx, txn);

    let currency_ok = book
        .transaction(txn)
        .and_then(|t| t.currency.as_ref())
        .is_some_and(|c| c.is_currency());
    if !currency_ok {
        let guid = book.transaction(txn).map(|t| t.guid);
        warn!(transaction = ?guid, "cannot balance a transaction without a currency");
        return;
    }

    clear_trading_splits(book, txn);

    if book.is_balanced(txn) {
        return;
    }

    if !book.use_trading_accounts() {
        balance_no_trading(book, ctx, txn, root, fallback_account);
        return;
    }

    let imbalance = book.imbalance_value(txn);
    if !imbalance.is_zero() {
        info!("value unbalanced transaction");
        add_balance_split(book, ctx, txn, &imbalance, root, fallback_account);
    }

    balance_trading(book, ctx, txn);
    if book.imbalance_value(txn).is_zero() {
        return;
    }

    // Still unbalanced: splits with zero amount but nonzero value, the
    // realized gain/loss case.
    balance_trading_more_splits(book, ctx, txn);
    if !book.imbalance_value(txn).is_zero() {
        let guid = book.transaction(txn).map(|t| t.guid);
        error!(transaction = ?guid, "balancing currencies left an unbalanced value");
    }
}

/// Delete synthetic splits in trading accounts left over from an earlier
/// balancing pass
fn clear_trading_splits(book: &mut Book, txn: TxnId) {
    let Some(t) = book.transaction(txn) else {
        return;
    };
    let trading: Vec<SplitId> = t
        .splits
        .iter()
        .copied()
        .filter(|sid| {
            book.split(*sid)
                .and_then(|s| s.account)
                .and_then(|aid| book.account(aid))
                .is_some_and(|acc| acc.acct_type.is_trading())
        })
        .collect();
    if trading.is_empty() {
        return;
    }

    let result = book.edit_transaction(txn, |b| {
        for sid in &trading {
            b.destroy_split(*sid)?;
        }
        Ok(())
    });
    if let Err(err) = result {
        warn!(error = %err, "cannot clear stale trading splits");
    }
}

/// Make the value sum to zero with a single balancing split
fn balance_no_trading(
    book: &mut Book,
    ctx: &ScrubContext,
    txn: TxnId,
    root: Option<AccountId>,
    fallback_account: Option<AccountId>,
) {
    let imbalance = book.imbalance_value(txn);
    if imbalance.is_zero() {
        return;
    }
    info!("value unbalanced transaction");
    add_balance_split(book, ctx, txn, &imbalance, root, fallback_account);
}

/// Absorb `imbalance` into the balancing split, rounding half-up at the
/// currency fraction
fn add_balance_split(
    book: &mut Book,
    ctx: &ScrubContext,
    txn: TxnId,
    imbalance: &BigDecimal,
    root: Option<AccountId>,
    fallback_account: Option<AccountId>,
) {
    let Some(currency) = book.transaction(txn).and_then(|t| t.currency.clone()) else {
        return;
    };
    let Some(balance_split) = get_balance_split(book, txn, root, fallback_account, &currency)
    else {
        return;
    };
    let account = book.split(balance_split).and_then(|s| s.account);

    let result = book.edit_transaction(txn, |b| {
        let old_value = b.split_required(balance_split)?.value_or_zero();
        // Round at the commodity's own fraction, not at whatever
        // denominator the old value happened to carry.
        let new_value = sub_rounded(&old_value, imbalance, currency.fraction());
        b.set_split_value(balance_split, new_value.clone())?;

        if let Some(aid) = account {
            let commodity = b.account_required(aid)?.commodity.clone();
            if equivalent_opt(commodity.as_ref(), Some(&currency)) {
                b.set_split_amount(balance_split, new_value)?;
            }
        }
        Ok(())
    });
    if let Err(err) = result {
        warn!(error = %err, "cannot adjust balancing split");
        return;
    }
    scrub_split(book, ctx, balance_split);
}

/// The split absorbing pure value imbalance: in the caller's fallback
/// account when its commodity matches the currency, else in the
/// auto-vivified `"Imbalance-<CCY>"` bucket under the root.
fn get_balance_split(
    book: &mut Book,
    txn: TxnId,
    root: Option<AccountId>,
    fallback_account: Option<AccountId>,
    currency: &Commodity,
) -> Option<SplitId> {
    let matching_fallback = fallback_account.filter(|aid| {
        book.account(*aid)
            .is_some_and(|acc| equivalent_opt(acc.commodity.as_ref(), Some(currency)))
    });
    let account = match matching_fallback {
        Some(aid) => aid,
        None => {
            let root = root.unwrap_or_else(|| book.root_account());
            let name = imbalance_account_name(currency);
            match get_or_make_account(
                book,
                root,
                Some(currency),
                &name,
                AccountType::Bank,
                false,
                true,
            ) {
                Ok(aid) => aid,
                Err(err) => {
                    error!(error = %err, "cannot get balancing account");
                    return None;
                }
            }
        }
    };

    find_or_add_split(book, txn, account)
}

/// The trading split for `commodity`, creating the three-level
/// `Trading/<namespace>/<mnemonic>` hierarchy on demand
fn get_trading_split(book: &mut Book, txn: TxnId, commodity: &Commodity) -> Option<SplitId> {
    let root = book.root_account();

    let trading = match get_or_make_account(
        book,
        root,
        None,
        TRADING_ACCOUNT_NAME,
        AccountType::Trading,
        true,
        false,
    ) {
        Ok(aid) => aid,
        Err(err) => {
            error!(error = %err, "cannot get trading account");
            return None;
        }
    };

    let namespace = match get_or_make_account(
        book,
        trading,
        None,
        &commodity.namespace,
        AccountType::Trading,
        true,
        true,
    ) {
        Ok(aid) => aid,
        Err(err) => {
            error!(error = %err, "cannot get namespace account");
            return None;
        }
    };

    let account = match get_or_make_account(
        book,
        namespace,
        Some(commodity),
        &commodity.mnemonic,
        AccountType::Trading,
        false,
        false,
    ) {
        Ok(aid) => aid,
        Err(err) => {
            error!(error = %err, "cannot get commodity account");
            return None;
        }
    };

    find_or_add_split(book, txn, account)
}

/// Put the split into the account before any value is set on it
fn find_or_add_split(book: &mut Book, txn: TxnId, account: AccountId) -> Option<SplitId> {
    if let Some(sid) = book.find_split_by_account(txn, account) {
        return Some(sid);
    }
    match book.add_split(
        txn,
        Some(account),
        Some(BigDecimal::zero()),
        Some(BigDecimal::zero()),
    ) {
        Ok(sid) => Some(sid),
        Err(err) => {
            error!(error = %err, "cannot create balancing split");
            None
        }
    }
}

/// One trading split per imbalanced commodity nets both the commodity's
/// amount and its value to zero
fn balance_trading(book: &mut Book, ctx: &ScrubContext, txn: TxnId) {
    let imbalance_list = book.imbalance_list(txn);
    if imbalance_list.is_empty() {
        return;
    }
    info!("currency unbalanced transaction");

    let Some(txn_currency) = book.transaction(txn).and_then(|t| t.currency.clone()) else {
        return;
    };

    for imbalance in imbalance_list {
        let commodity = imbalance.commodity.clone();
        let Some(balance_split) = get_trading_split(book, txn, &commodity) else {
            return;
        };

        let result = book.edit_transaction(txn, |b| {
            let old_amount = b.split_required(balance_split)?.amount_or_zero();
            let new_amount = sub_rounded(&old_amount, &imbalance.value, commodity.fraction());
            b.set_split_amount(balance_split, new_amount.clone())?;

            if commodity.equivalent(&txn_currency) {
                // The imbalance commodity is the transaction currency:
                // the split's value must equal its amount.
                b.set_split_value(balance_split, new_amount)?;
            } else {
                let value_imbalance = b.commodity_imbalance(txn, &commodity);
                let old_value = b.split_required(balance_split)?.value_or_zero();
                let new_value =
                    sub_rounded(&old_value, &value_imbalance, txn_currency.fraction());
                b.set_split_value(balance_split, new_value)?;
            }
            Ok(())
        });
        if let Err(err) = result {
            warn!(error = %err, "cannot adjust trading split");
            return;
        }
        scrub_split(book, ctx, balance_split);
    }
}

/// Reverse the value of each zero-amount, nonzero-value split into its
/// commodity's trading split so the total value nets to zero without
/// touching any amount. Rarely needed.
fn balance_trading_more_splits(book: &mut Book, ctx: &ScrubContext, txn: TxnId) {
    let Some(txn_currency) = book.transaction(txn).and_then(|t| t.currency.clone()) else {
        return;
    };
    // Work on a copy of the split list so the splits added below are not
    // revisited.
    let split_ids = match book.transaction(txn) {
        Some(t) => t.splits.clone(),
        None => return,
    };

    for sid in split_ids {
        if !book.still_has_split(txn, sid) {
            continue;
        }
        let Some(split) = book.split(sid) else {
            continue;
        };
        let value = split.value_or_zero();
        let amount = split.amount_or_zero();
        if value.is_zero() || !amount.is_zero() {
            continue;
        }

        let commodity = split
            .account
            .and_then(|aid| book.account(aid))
            .and_then(|acc| acc.commodity.clone());
        let Some(commodity) = commodity else {
            error!(split = %split.guid, "split has no commodity");
            continue;
        };

        let Some(balance_split) = get_trading_split(book, txn, &commodity) else {
            return;
        };
        let result = book.edit_transaction(txn, |b| {
            let old_value = b.split_required(balance_split)?.value_or_zero();
            let new_value = sub_rounded(&old_value, &value, txn_currency.fraction());
            // The amount stays: it is zero in the split being reversed.
            b.set_split_value(balance_split, new_value)?;
            Ok(())
        });
        if let Err(err) = result {
            warn!(error = %err, "cannot adjust trading split value");
            return;
        }
        scrub_split(book, ctx, balance_split);
    }
}

/// Balance every transaction touching `account`, reporting progress every
/// 10 splits and a final `(None, -1)` sentinel
pub fn scrub_account_imbalance(
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
    info!(account = %name, "looking for imbalances");
    let splits = acc.splits.clone();
    let total = splits.len();
    let root = book.root_account();

    for (current, sid) in splits.iter().enumerate() {
        if ctx.is_cancelled() {
            break;
        }
        if current % 10 == 0 {
            let message =
                format!("Looking for imbalances in account {name}: {current} of {total}");
            progress.report(Some(&message), percent_complete(current, total));
        }
        let Some(txn) = book.split(*sid).map(|s| s.txn) else {
            continue;
        };
        scrub_transaction_imbalance(book, ctx, txn, Some(root), None);
    }
    progress.report(None, -1);
}

/// Balance every transaction across `account` and all its descendants
pub fn scrub_tree_imbalance(
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

    scrub_account_imbalance(book, ctx, account, progress);
    for child in book.descendants(account) {
        if ctx.is_cancelled() {
            break;
        }
        scrub_account_imbalance(book, ctx, child, progress);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commodity::Commodity;
    use std::str::FromStr;

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    fn usd() -> Commodity {
        Commodity::currency("USD", 100)
    }

    #[test]
    fn test_balanced_transaction_untouched() {
        let mut book = Book::with_default_currency(usd());
        let checking = book
            .add_account("Checking", AccountType::Bank, Some(usd()), None)
            .unwrap();
        let groceries = book
            .add_account("Groceries", AccountType::Expense, Some(usd()), None)
            .unwrap();
        let txn = book.add_transaction("Weekly shop", Some(usd()));
        book.add_split(txn, Some(checking), Some(dec("100.00")), Some(dec("100.00")))
            .unwrap();
        book.add_split(txn, Some(groceries), Some(dec("-100.00")), Some(dec("-100.00")))
            .unwrap();

        let ctx = ScrubContext::new();
        scrub_transaction_imbalance(&mut book, &ctx, txn, None, None);

        assert_eq!(book.transaction_required(txn).unwrap().splits.len(), 2);
        assert!(book.find_account_by_name("Imbalance-USD").is_none());
    }

    #[test]
    fn test_balancing_split_rounds_at_currency_fraction() {
        let mut book = Book::with_default_currency(usd());
        let checking = book
            .add_account("Checking", AccountType::Bank, Some(usd()), None)
            .unwrap();
        let txn = book.add_transaction("Sub-cent residue", Some(usd()));
        book.add_split(txn, Some(checking), Some(dec("49.995")), Some(dec("49.995")))
            .unwrap();

        let ctx = ScrubContext::new();
        scrub_transaction_imbalance(&mut book, &ctx, txn, None, None);

        let bucket = book.find_account_by_name("Imbalance-USD").unwrap();
        let sid = book.find_split_by_account(txn, bucket).unwrap();
        // Half-up at cents: -49.995 rounds to -50.00
        assert_eq!(book.split_required(sid).unwrap().value, Some(dec("-50.00")));
    }

    #[test]
    fn test_fallback_account_receives_balancing_split() {
        let mut book = Book::with_default_currency(usd());
        let checking = book
            .add_account("Checking", AccountType::Bank, Some(usd()), None)
            .unwrap();
        let equity = book
            .add_account("Opening Balances", AccountType::Equity, Some(usd()), None)
            .unwrap();
        let txn = book.add_transaction("Opening balance", Some(usd()));
        book.add_split(txn, Some(checking), Some(dec("500.00")), Some(dec("500.00")))
            .unwrap();

        let ctx = ScrubContext::new();
        scrub_transaction_imbalance(&mut book, &ctx, txn, None, Some(equity));

        assert!(book.find_account_by_name("Imbalance-USD").is_none());
        let sid = book.find_split_by_account(txn, equity).unwrap();
        assert_eq!(book.split_required(sid).unwrap().value, Some(dec("-500.00")));
        assert!(book.is_balanced(txn));
    }

    #[test]
    fn test_stale_trading_splits_cleared() {
        let mut book = Book::with_default_currency(usd());
        book.set_use_trading_accounts(true);
        let checking = book
            .add_account("Checking", AccountType::Bank, Some(usd()), None)
            .unwrap();
        let stale_trading = book
            .add_account("USD", AccountType::Trading, Some(usd()), None)
            .unwrap();
        let txn = book.add_transaction("Previously balanced", Some(usd()));
        book.add_split(txn, Some(checking), Some(dec("10.00")), Some(dec("10.00")))
            .unwrap();
        let stale = book
            .add_split(txn, Some(stale_trading), Some(dec("-7.00")), Some(dec("-7.00")))
            .unwrap();

        let ctx = ScrubContext::new();
        scrub_transaction_imbalance(&mut book, &ctx, txn, None, None);

        assert!(book.split(stale).is_none());
        assert!(book.is_balanced(txn));
    }
}
