//! Auto-vivification of repair bucket accounts
//!
//! Orphan-, Imbalance- and Trading accounts are found by type, commodity
//! and name under a base account, and constructed on demand so repeated
//! repairs reuse the same bucket instead of piling up duplicates.

use crate::commodity::{equivalent_opt, Commodity};
use crate::ledger::Book;
use crate::types::{AccountId, AccountType, LedgerResult};

/// Find an account of `acct_type` under `base`, creating it when absent.
///
/// With `check_name` the lookup also matches on `name`; without it, any
/// account of the right type (and commodity, when given) qualifies. When
/// several accounts qualify, an account in the book default currency is
/// preferred (only when no commodity was asked for), then an exact name
/// match, then the first hit in tree order.
pub(crate) fn get_or_make_account(
    book: &mut Book,
    base: AccountId,
    currency: Option<&Commodity>,
    name: &str,
    acct_type: AccountType,
    placeholder: bool,
    check_name: bool,
) -> LedgerResult<AccountId> {
    let matches = book.lookup_by_type_and_commodity(
        base,
        check_name.then_some(name),
        acct_type,
        currency,
    );

    if matches.is_empty() {
        return construct_account(book, base, currency, name, acct_type, placeholder);
    }

    if matches.len() > 1 {
        if currency.is_none() {
            if let Some(default) = book.default_currency() {
                if let Some(aid) = matches.iter().copied().find(|aid| {
                    book.account(*aid)
                        .is_some_and(|acc| equivalent_opt(acc.commodity.as_ref(), Some(&default)))
                }) {
                    return Ok(aid);
                }
            }
        }
        if let Some(aid) = matches
            .iter()
            .copied()
            .find(|aid| book.account(*aid).is_some_and(|acc| acc.name == name))
        {
            return Ok(aid);
        }
    }

    Ok(matches[0])
}

/// Build the bucket account under `base`. Falls back to the book default
/// currency when no commodity was requested; older books may define
/// neither, leaving the commodity for a later scrub.
fn construct_account(
    book: &mut Book,
    base: AccountId,
    currency: Option<&Commodity>,
    name: &str,
    acct_type: AccountType,
    placeholder: bool,
) -> LedgerResult<AccountId> {
    let commodity = currency.cloned().or_else(|| book.default_currency());
    let id = book.add_account(name, acct_type, commodity, Some(base))?;
    if placeholder {
        book.edit_account(id, |b| {
            b.account_mut(id)?.placeholder = true;
            Ok(())
        })?;
    }
    Ok(id)
}
