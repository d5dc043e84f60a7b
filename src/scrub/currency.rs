//! Currency Resolver: establish a transaction's reference currency
//!
//! The resolver votes across the splits' account commodities: a currency
//! used directly by a split counts for more than one reached through an
//! ancestor account, and trading splits do not vote at all. Books migrated
//! from single-currency-field storage fall back to the deprecated
//! per-account currency/security fields.

use tracing::{error, info, warn};

use crate::commodity::{equivalent_opt, Commodity};
use crate::ledger::Book;
use crate::scrub::context::ScrubContext;
use crate::scrub::orphans::scrub_transaction_orphans;
use crate::types::{AccountId, AccountType, TxnId};

/// Weight of a split whose account commodity is itself a currency
const DIRECT_CURRENCY_WEIGHT: u32 = 3;
/// Weight of a split that only reaches a currency through an ancestor
const ANCESTOR_CURRENCY_WEIGHT: u32 = 1;

/// Establish the transaction's currency, voting across its splits.
/// Idempotent: a transaction that already carries a valid currency is left
/// untouched. After the currency is set, splits denominated in it whose
/// amount still disagrees with their value are repaired (value wins).
pub fn scrub_transaction_currency(book: &mut Book, ctx: &ScrubContext, txn: TxnId) {
    if book.transaction(txn).is_none() {
        return;
    }
    // Orphans first: a split without an account cannot vote.
    scrub_transaction_orphans(book, ctx, txn);

    if let Some(currency) = book.transaction(txn).and_then(|t| t.currency.as_ref()) {
        if currency.is_currency() {
            return;
        }
    }

    let Some(currency) = find_common_currency(book, txn) else {
        fall_back_to_first_account(book, txn);
        return;
    };

    if let Err(err) = book.edit_transaction(txn, |b| {
        b.set_transaction_currency(txn, currency.clone())
    }) {
        warn!(error = %err, "cannot set transaction currency");
        return;
    }

    // Splits still carrying the old per-security/currency pair have a
    // stale amount once their account commodity equals the new currency.
    let split_ids = match book.transaction(txn) {
        Some(t) => t.splits.clone(),
        None => return,
    };
    for sid in split_ids {
        let Some(split) = book.split(sid) else {
            continue;
        };
        let amount = split.amount.clone();
        let Some(value) = split.value.clone() else {
            continue;
        };
        if amount.as_ref() == Some(&value) {
            continue;
        }
        let acc_commodity = split
            .account
            .and_then(|aid| book.account(aid))
            .and_then(|acc| acc.commodity.clone());
        if !equivalent_opt(acc_commodity.as_ref(), Some(&currency)) {
            continue;
        }
        let guid = split.guid;
        info!(split = %guid, "adjusted split with mismatched values");
        if let Err(err) = book.edit_transaction(txn, |b| b.set_split_amount(sid, value)) {
            warn!(error = %err, "cannot repair stale split amount");
        }
    }
}

/// No vote succeeded: log the anomaly, and take the first account's
/// commodity as a last resort. Splits may exist without any account at
/// all; then there is nothing to guess from.
fn fall_back_to_first_account(book: &mut Book, txn: TxnId) {
    let Some(t) = book.transaction(txn) else {
        return;
    };
    if t.splits.is_empty() {
        warn!(
            transaction = %t.guid,
            description = %t.description,
            "transaction has no splits in it"
        );
        return;
    }
    warn!(
        transaction = %t.guid,
        description = %t.description,
        "no common transaction currency found"
    );
    for sid in t.splits.clone() {
        let Some(split) = book.split(sid) else {
            continue;
        };
        match split.account {
            None => warn!(split = %split.guid, "split is not in any account"),
            Some(aid) => {
                let commodity = book.account(aid).and_then(|acc| acc.commodity.clone());
                let account_name = book
                    .account(aid)
                    .map(|acc| acc.name.clone())
                    .unwrap_or_default();
                warn!(
                    split = %split.guid,
                    account = %account_name,
                    "setting currency from split account commodity"
                );
                if let Some(commodity) = commodity {
                    if let Err(err) = book
                        .edit_transaction(txn, |b| b.set_transaction_currency(txn, commodity))
                    {
                        warn!(error = %err, "cannot set fallback currency");
                    }
                }
                return;
            }
        }
    }
}

/// Weighted majority vote over the splits' account commodities. The
/// highest total weight wins; on a tie the first-encountered commodity
/// wins, which split insertion order makes reproducible.
fn find_common_currency(book: &Book, txn: TxnId) -> Option<Commodity> {
    let t = book.transaction(txn)?;
    if t.splits.is_empty() {
        return None;
    }

    let mut candidates: Vec<(Commodity, u32)> = Vec::new();
    for sid in &t.splits {
        let Some(split) = book.split(*sid) else {
            continue;
        };
        let Some(aid) = split.account else {
            continue;
        };
        let Some(account) = book.account(aid) else {
            continue;
        };
        if account.acct_type.is_trading() {
            continue;
        }
        let (commodity, weight) = match &account.commodity {
            Some(c) if c.is_currency() => (c.clone(), DIRECT_CURRENCY_WEIGHT),
            _ => match book.currency_or_parent(aid) {
                Some(c) => (c, ANCESTOR_CURRENCY_WEIGHT),
                None => continue,
            },
        };
        match candidates
            .iter_mut()
            .find(|(c, _)| c.equivalent(&commodity))
        {
            Some((_, count)) => *count += weight,
            None => candidates.push((commodity, weight)),
        }
    }

    let mut best: Option<&(Commodity, u32)> = None;
    for candidate in &candidates {
        if best.map_or(true, |b| candidate.1 > b.1) {
            best = Some(candidate);
        }
    }
    best.map(|(commodity, _)| commodity.clone())
        .or_else(|| find_old_common_currency(book, txn))
}

/// Legacy fallback: intersect the deprecated per-account currency field
/// with the account commodity across all splits, the way books migrated
/// from single-currency-field storage stored it. Only a true currency is
/// accepted.
fn find_old_common_currency(book: &Book, txn: TxnId) -> Option<Commodity> {
    let t = book.transaction(txn)?;
    let first = book.split(*t.splits.first()?)?;
    let account = book.account(first.account?)?;

    let ra = account.legacy_currency.clone();
    let rb = account.commodity.clone();
    let found = narrow_common_currency(book, &t.splits, ra, rb)?;
    found.is_currency().then_some(found)
}

/// Narrow two candidate commodities split by split, dropping each
/// candidate the first time a split matches neither of its fields
fn narrow_common_currency(
    book: &Book,
    splits: &[crate::types::SplitId],
    mut ra: Option<Commodity>,
    mut rb: Option<Commodity>,
) -> Option<Commodity> {
    for sid in splits {
        let split = book.split(*sid)?;
        let account = book.account(split.account?)?;
        let sa = account.legacy_currency.as_ref();
        let sb = account.commodity.as_ref();

        if ra.is_some() && rb.is_some() {
            let aa = !equivalent_opt(ra.as_ref(), sa);
            let ab = !equivalent_opt(ra.as_ref(), sb);
            let ba = !equivalent_opt(rb.as_ref(), sa);
            let bb = !equivalent_opt(rb.as_ref(), sb);

            if !aa && bb {
                rb = None;
            } else if !ab && ba {
                rb = None;
            } else if !ba && ab {
                ra = None;
            } else if !bb && aa {
                ra = None;
            } else if aa && bb && ab && ba {
                ra = None;
                rb = None;
            }

            if ra.is_none() {
                ra = rb.take();
            }
        } else if ra.is_some() {
            let aa = !equivalent_opt(ra.as_ref(), sa);
            let ab = !equivalent_opt(ra.as_ref(), sb);
            if aa && ab {
                ra = None;
            }
        } else if rb.is_some() {
            let aa = !equivalent_opt(rb.as_ref(), sa);
            let ab = !equivalent_opt(rb.as_ref(), sb);
            ra = if aa && ab { None } else { rb.clone() };
        }

        if ra.is_none() && rb.is_none() {
            return None;
        }
    }
    ra
}

/// Repair an unset account commodity from the deprecated currency field.
/// Root accounts are exempt; an account with neither source is logged.
pub fn scrub_account_commodity(book: &mut Book, account: AccountId) {
    let Some(acc) = book.account(account) else {
        return;
    };
    if acc.acct_type == AccountType::Root {
        return;
    }
    if acc.commodity.is_some() {
        return;
    }
    match acc.legacy_currency.clone() {
        Some(commodity) => {
            let result = book.edit_account(account, |b| {
                b.account_mut(account)?.commodity = Some(commodity);
                Ok(())
            });
            if let Err(err) = result {
                warn!(error = %err, "cannot repair account commodity");
            }
        }
        None => error!(account = %acc.name, "account does not have a commodity"),
    }
}

/// Delete the deprecated currency/security fields once the commodity
/// scrubber no longer needs them
pub fn delete_account_legacy_data(book: &mut Book, account: AccountId) {
    let has_legacy = book
        .account(account)
        .is_some_and(|acc| acc.legacy_currency.is_some() || acc.legacy_security.is_some());
    if !has_legacy {
        return;
    }
    let result = book.edit_account(account, |b| {
        let acc = b.account_mut(account)?;
        acc.legacy_currency = None;
        acc.legacy_security = None;
        Ok(())
    });
    if let Err(err) = result {
        warn!(error = %err, "cannot delete legacy account data");
    }
}

/// Batch driver: resolve the currency of every transaction reachable from
/// `account`'s subtree, repair every account commodity, then delete the
/// deprecated fields.
pub fn scrub_tree_commodities(book: &mut Book, ctx: &ScrubContext, account: AccountId) {
    if book.account(account).is_none() {
        return;
    }
    let _guard = ctx.enter();

    let mut accounts = vec![account];
    accounts.extend(book.descendants(account));

    let mut seen = std::collections::HashSet::new();
    let mut txns = Vec::new();
    for aid in &accounts {
        let Some(acc) = book.account(*aid) else {
            continue;
        };
        for sid in &acc.splits {
            if let Some(txn) = book.split(*sid).map(|s| s.txn) {
                if seen.insert(txn) {
                    txns.push(txn);
                }
            }
        }
    }
    for txn in txns {
        if ctx.is_cancelled() {
            return;
        }
        scrub_transaction_currency(book, ctx, txn);
    }
    for aid in accounts {
        if ctx.is_cancelled() {
            return;
        }
        scrub_account_commodity(book, aid);
        delete_account_legacy_data(book, aid);
    }
}

/// Restore a missing posting date from the entry timestamp
pub fn scrub_transaction_posted_date(book: &mut Book, txn: TxnId) {
    let Some(t) = book.transaction(txn) else {
        return;
    };
    if t.posted_date.is_some() {
        return;
    }
    let restored = t.created_at.date();
    let result = book.edit_transaction(txn, |b| {
        b.transaction_mut(txn)?.posted_date = Some(restored);
        Ok(())
    });
    if let Err(err) = result {
        warn!(error = %err, "cannot restore posting date");
    }
}
