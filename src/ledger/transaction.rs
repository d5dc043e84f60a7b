//! Transactions, splits and imbalance computations
//!
//! Summation across splits is exact: denominators widen as needed and no
//! rounding happens until a balancing adjustment is finally applied.

use bigdecimal::{BigDecimal, Zero};
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::commodity::{equivalent_opt, monetary_list_add, Commodity, Monetary};
use crate::ledger::Book;
use crate::types::{AccountId, SplitId, TxnId};

/// A double-entry transaction owning an ordered set of splits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// Stable identifier, used in anomaly logs
    pub guid: Uuid,
    pub description: String,
    /// The currency split values are denominated in. Absent until the
    /// currency resolver has run.
    pub currency: Option<Commodity>,
    pub posted_date: Option<NaiveDate>,
    /// Split ids in insertion order. Iteration order is stable within one
    /// scrub pass; the currency resolver's tie-break depends on it.
    pub splits: Vec<SplitId>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl Transaction {
    pub(crate) fn new(description: &str, currency: Option<Commodity>) -> Self {
        let now = chrono::Utc::now().naive_utc();
        Self {
            guid: Uuid::new_v4(),
            description: description.to_string(),
            currency,
            posted_date: None,
            splits: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// One leg of a transaction, posted to at most one account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Split {
    pub guid: Uuid,
    /// The owning transaction
    pub txn: TxnId,
    /// `None` marks an orphan awaiting repair
    pub account: Option<AccountId>,
    pub memo: String,
    /// Quantity in the account's commodity; `None` models an invalid
    /// number and is repaired to exact zero
    pub amount: Option<BigDecimal>,
    /// Quantity in the transaction's currency; `None` models an invalid
    /// number and is repaired to exact zero
    pub value: Option<BigDecimal>,
}

impl Split {
    pub(crate) fn new(
        txn: TxnId,
        account: Option<AccountId>,
        amount: Option<BigDecimal>,
        value: Option<BigDecimal>,
    ) -> Self {
        Self {
            guid: Uuid::new_v4(),
            txn,
            account,
            memo: String::new(),
            amount,
            value,
        }
    }

    /// The split's amount, treating an invalid number as zero
    pub fn amount_or_zero(&self) -> BigDecimal {
        self.amount.clone().unwrap_or_else(BigDecimal::zero)
    }

    /// The split's value, treating an invalid number as zero
    pub fn value_or_zero(&self) -> BigDecimal {
        self.value.clone().unwrap_or_else(BigDecimal::zero)
    }
}

impl Book {
    /// The first split of `txn` posted to `account`
    pub fn find_split_by_account(&self, txn: TxnId, account: AccountId) -> Option<SplitId> {
        let t = self.transaction(txn)?;
        t.splits
            .iter()
            .copied()
            .find(|sid| self.split(*sid).is_some_and(|s| s.account == Some(account)))
    }

    /// Whether `split` still belongs to `txn` and has not been destroyed
    pub fn still_has_split(&self, txn: TxnId, split: SplitId) -> bool {
        self.split(split).is_some_and(|s| s.txn == txn)
            && self
                .transaction(txn)
                .is_some_and(|t| t.splits.contains(&split))
    }

    /// Signed sum of all split values in the transaction currency. Exact:
    /// no rounding is applied.
    pub fn imbalance_value(&self, txn: TxnId) -> BigDecimal {
        let Some(t) = self.transaction(txn) else {
            return BigDecimal::zero();
        };
        let mut imbalance = BigDecimal::zero();
        for sid in &t.splits {
            if let Some(split) = self.split(*sid) {
                imbalance += split.value_or_zero();
            }
        }
        imbalance
    }

    /// Net value imbalance carried by splits whose account is denominated
    /// in `commodity`
    pub fn commodity_imbalance(&self, txn: TxnId, commodity: &Commodity) -> BigDecimal {
        let Some(t) = self.transaction(txn) else {
            return BigDecimal::zero();
        };
        let mut imbalance = BigDecimal::zero();
        for sid in &t.splits {
            let Some(split) = self.split(*sid) else {
                continue;
            };
            let split_commodity = split
                .account
                .and_then(|aid| self.account(aid))
                .and_then(|acc| acc.commodity.as_ref());
            if split_commodity.is_some_and(|c| c.equivalent(commodity)) {
                imbalance += split.value_or_zero();
            }
        }
        imbalance
    }

    /// Per-commodity imbalance of `txn`, empty when balanced.
    ///
    /// Without trading accounts the value sum alone decides balance and
    /// this list stays empty. With trading accounts, the first split that
    /// leaves the transaction currency (or disagrees with its own value)
    /// switches to per-commodity accounting: amounts are grouped by the
    /// account's commodity, with the value accumulated so far seeding the
    /// transaction-currency entry. Zero entries are dropped.
    pub fn imbalance_list(&self, txn: TxnId) -> Vec<Monetary> {
        let Some(t) = self.transaction(txn) else {
            return Vec::new();
        };
        let trading = self.use_trading_accounts();
        let mut list: Vec<Monetary> = Vec::new();
        let mut use_list = false;
        let mut value_sum = BigDecimal::zero();
        for sid in &t.splits {
            let Some(split) = self.split(*sid) else {
                continue;
            };
            let amount = split.amount_or_zero();
            let value = split.value_or_zero();
            let commodity = split
                .account
                .and_then(|aid| self.account(aid))
                .and_then(|acc| acc.commodity.clone());
            if trading {
                let in_txn_currency = equivalent_opt(commodity.as_ref(), t.currency.as_ref());
                if use_list || !in_txn_currency || amount != value {
                    if !use_list {
                        if let Some(currency) = &t.currency {
                            monetary_list_add(&mut list, currency, &value_sum);
                        }
                        use_list = true;
                    }
                    match &commodity {
                        Some(c) => monetary_list_add(&mut list, c, &amount),
                        None => tracing::debug!(
                            split = %split.guid,
                            "split has no commodity to group its imbalance under"
                        ),
                    }
                }
            }
            value_sum += value;
        }
        list.retain(|m| !m.value.is_zero());
        list
    }

    /// Whether the transaction needs no balancing: the value sum is zero
    /// and, when trading accounts are in use, every commodity nets to zero
    pub fn is_balanced(&self, txn: TxnId) -> bool {
        if self.transaction(txn).is_none() {
            return false;
        }
        if self.use_trading_accounts() && !self.imbalance_list(txn).is_empty() {
            return false;
        }
        self.imbalance_value(txn).is_zero()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
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
    fn test_imbalance_value_sums_exactly() {
        let mut book = Book::with_default_currency(usd());
        let checking = book
            .add_account("Checking", AccountType::Bank, Some(usd()), None)
            .unwrap();
        let groceries = book
            .add_account("Groceries", AccountType::Expense, Some(usd()), None)
            .unwrap();
        let txn = book.add_transaction("Weekly shop", Some(usd()));
        book.add_split(txn, Some(checking), Some(dec("-100.00")), Some(dec("-100.00")))
            .unwrap();
        book.add_split(txn, Some(groceries), Some(dec("99.99")), Some(dec("99.99")))
            .unwrap();

        assert_eq!(book.imbalance_value(txn), dec("-0.01"));
        assert!(!book.is_balanced(txn));
    }

    #[test]
    fn test_imbalance_list_empty_without_trading() {
        let mut book = Book::with_default_currency(usd());
        let checking = book
            .add_account("Checking", AccountType::Bank, Some(usd()), None)
            .unwrap();
        let txn = book.add_transaction("Lonely split", Some(usd()));
        book.add_split(txn, Some(checking), Some(dec("50")), Some(dec("50")))
            .unwrap();

        assert!(book.imbalance_list(txn).is_empty());
        assert!(!book.is_balanced(txn));
    }

    #[test]
    fn test_imbalance_list_groups_by_commodity() {
        let mut book = Book::with_default_currency(usd());
        book.set_use_trading_accounts(true);
        let checking = book
            .add_account("Checking", AccountType::Bank, Some(usd()), None)
            .unwrap();
        let giro = book
            .add_account("Girokonto", AccountType::Bank, Some(eur()), None)
            .unwrap();
        let txn = book.add_transaction("Wire transfer", Some(usd()));
        book.add_split(txn, Some(checking), Some(dec("-100.00")), Some(dec("-100.00")))
            .unwrap();
        book.add_split(txn, Some(giro), Some(dec("90.00")), Some(dec("100.00")))
            .unwrap();

        let list = book.imbalance_list(txn);
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].commodity, usd());
        assert_eq!(list[0].value, dec("-100.00"));
        assert_eq!(list[1].commodity, eur());
        assert_eq!(list[1].value, dec("90.00"));
        assert!(!book.is_balanced(txn));
    }

    #[test]
    fn test_commodity_imbalance() {
        let mut book = Book::with_default_currency(usd());
        let giro = book
            .add_account("Girokonto", AccountType::Bank, Some(eur()), None)
            .unwrap();
        let checking = book
            .add_account("Checking", AccountType::Bank, Some(usd()), None)
            .unwrap();
        let txn = book.add_transaction("Wire transfer", Some(usd()));
        book.add_split(txn, Some(giro), Some(dec("90.00")), Some(dec("100.00")))
            .unwrap();
        book.add_split(txn, Some(checking), Some(dec("-100.00")), Some(dec("-100.00")))
            .unwrap();

        assert_eq!(book.commodity_imbalance(txn, &eur()), dec("100.00"));
        assert_eq!(book.commodity_imbalance(txn, &usd()), dec("-100.00"));
    }

    #[test]
    fn test_find_split_by_account() {
        let mut book = Book::with_default_currency(usd());
        let checking = book
            .add_account("Checking", AccountType::Bank, Some(usd()), None)
            .unwrap();
        let savings = book
            .add_account("Savings", AccountType::Bank, Some(usd()), None)
            .unwrap();
        let txn = book.add_transaction("Transfer", Some(usd()));
        let sid = book
            .add_split(txn, Some(checking), Some(dec("10")), Some(dec("10")))
            .unwrap();

        assert_eq!(book.find_split_by_account(txn, checking), Some(sid));
        assert_eq!(book.find_split_by_account(txn, savings), None);
        assert!(book.still_has_split(txn, sid));
    }
}
