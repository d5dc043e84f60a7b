//! The book: arena-style owner of accounts, transactions and splits
//!
//! Entities reference each other by index-based ids instead of pointers, so
//! destroying a split mid-walk can never dangle. Every mutation happens
//! inside a begin/commit-edit bracket on the owning book; the closure form
//! [`Book::edit_transaction`] rolls the entity back to its last committed
//! state on the error path.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::commodity::{Commodity, CommodityTable};
use crate::ledger::{Account, Split, Transaction};
use crate::types::*;
use crate::utils::validate_account_name;

/// Name given to the synthetic root account of every book
pub const ROOT_ACCOUNT_NAME: &str = "Root Account";

/// Central store for one ledger: the account tree, the transactions and
/// their splits, and the commodities the book has seen.
#[derive(Debug, Serialize, Deserialize)]
pub struct Book {
    accounts: Vec<Account>,
    transactions: Vec<Transaction>,
    /// Tombstoned arena: a destroyed split leaves a `None` behind and its
    /// id is never reused.
    splits: Vec<Option<Split>>,
    root: AccountId,
    use_trading_accounts: bool,
    commodities: CommodityTable,
    #[serde(skip)]
    txn_edits: HashMap<usize, TxnEditState>,
    #[serde(skip)]
    account_edits: HashMap<usize, AccountEditState>,
}

#[derive(Debug, Default)]
struct TxnEditState {
    depth: usize,
    snapshot: Option<TxnSnapshot>,
}

/// State captured at the outermost `begin_edit`, enough to restore the
/// transaction, its splits and the split lists of the accounts they
/// belonged to.
#[derive(Debug)]
struct TxnSnapshot {
    transaction: Transaction,
    splits: Vec<(SplitId, Split)>,
    account_lists: Vec<(AccountId, Vec<SplitId>)>,
    split_watermark: usize,
}

#[derive(Debug, Default)]
struct AccountEditState {
    depth: usize,
    snapshot: Option<Account>,
}

impl Book {
    /// Create a book with an empty root account
    pub fn new() -> Self {
        let root = Account::new(ROOT_ACCOUNT_NAME, AccountType::Root, None, None);
        Self {
            accounts: vec![root],
            transactions: Vec::new(),
            splits: Vec::new(),
            root: AccountId(0),
            use_trading_accounts: false,
            commodities: CommodityTable::new(),
            txn_edits: HashMap::new(),
            account_edits: HashMap::new(),
        }
    }

    /// Create a book whose root account carries the book default currency
    pub fn with_default_currency(currency: Commodity) -> Self {
        let mut book = Self::new();
        book.commodities.intern(&currency);
        book.accounts[0].commodity = Some(currency);
        book
    }

    /// The synthetic root of the account tree
    pub fn root_account(&self) -> AccountId {
        self.root
    }

    /// Whether multi-currency transactions are balanced through trading
    /// accounts instead of a single balancing split
    pub fn use_trading_accounts(&self) -> bool {
        self.use_trading_accounts
    }

    pub fn set_use_trading_accounts(&mut self, use_trading: bool) {
        self.use_trading_accounts = use_trading;
    }

    /// The commodities this book has seen
    pub fn commodities(&self) -> &CommodityTable {
        &self.commodities
    }

    // Lookups

    pub fn account(&self, id: AccountId) -> Option<&Account> {
        self.accounts.get(id.0)
    }

    pub fn account_required(&self, id: AccountId) -> LedgerResult<&Account> {
        self.accounts.get(id.0).ok_or(LedgerError::AccountNotFound(id))
    }

    pub(crate) fn account_mut(&mut self, id: AccountId) -> LedgerResult<&mut Account> {
        self.accounts
            .get_mut(id.0)
            .ok_or(LedgerError::AccountNotFound(id))
    }

    pub fn transaction(&self, id: TxnId) -> Option<&Transaction> {
        self.transactions.get(id.0)
    }

    pub fn transaction_required(&self, id: TxnId) -> LedgerResult<&Transaction> {
        self.transactions
            .get(id.0)
            .ok_or(LedgerError::TransactionNotFound(id))
    }

    pub(crate) fn transaction_mut(&mut self, id: TxnId) -> LedgerResult<&mut Transaction> {
        self.transactions
            .get_mut(id.0)
            .ok_or(LedgerError::TransactionNotFound(id))
    }

    /// Look up a split; `None` for an unknown or destroyed id
    pub fn split(&self, id: SplitId) -> Option<&Split> {
        self.splits.get(id.0).and_then(|slot| slot.as_ref())
    }

    pub fn split_required(&self, id: SplitId) -> LedgerResult<&Split> {
        self.split(id).ok_or(LedgerError::SplitNotFound(id))
    }

    pub(crate) fn split_mut(&mut self, id: SplitId) -> LedgerResult<&mut Split> {
        self.splits
            .get_mut(id.0)
            .and_then(|slot| slot.as_mut())
            .ok_or(LedgerError::SplitNotFound(id))
    }

    /// Iterate all live accounts
    pub fn accounts(&self) -> impl Iterator<Item = (AccountId, &Account)> {
        self.accounts
            .iter()
            .enumerate()
            .map(|(idx, acc)| (AccountId(idx), acc))
    }

    /// Iterate all transactions
    pub fn transactions(&self) -> impl Iterator<Item = (TxnId, &Transaction)> {
        self.transactions
            .iter()
            .enumerate()
            .map(|(idx, txn)| (TxnId(idx), txn))
    }

    /// First account with the given name, searching the whole tree
    pub fn find_account_by_name(&self, name: &str) -> Option<AccountId> {
        self.accounts()
            .find(|(_, acc)| acc.name == name)
            .map(|(id, _)| id)
    }

    // Entity creation

    /// Create an account under `parent` (the root when absent)
    pub fn add_account(
        &mut self,
        name: &str,
        acct_type: AccountType,
        commodity: Option<Commodity>,
        parent: Option<AccountId>,
    ) -> LedgerResult<AccountId> {
        validate_account_name(name)?;
        let parent_id = parent.unwrap_or(self.root);
        self.account_required(parent_id)?;
        if let Some(c) = &commodity {
            self.commodities.intern(c);
        }
        let id = AccountId(self.accounts.len());
        self.accounts
            .push(Account::new(name, acct_type, commodity, Some(parent_id)));
        self.accounts[parent_id.0].children.push(id);
        Ok(id)
    }

    /// Create an account migrated from single-currency-field storage: no
    /// commodity yet, only the deprecated currency/security fields the
    /// commodity scrubber later resolves from.
    pub fn add_legacy_account(
        &mut self,
        name: &str,
        acct_type: AccountType,
        legacy_currency: Option<Commodity>,
        legacy_security: Option<Commodity>,
        parent: Option<AccountId>,
    ) -> LedgerResult<AccountId> {
        let id = self.add_account(name, acct_type, None, parent)?;
        if let Some(c) = &legacy_currency {
            self.commodities.intern(c);
        }
        if let Some(c) = &legacy_security {
            self.commodities.intern(c);
        }
        let account = &mut self.accounts[id.0];
        account.legacy_currency = legacy_currency;
        account.legacy_security = legacy_security;
        Ok(id)
    }

    /// Create a transaction with no splits yet
    pub fn add_transaction(&mut self, description: &str, currency: Option<Commodity>) -> TxnId {
        if let Some(c) = &currency {
            self.commodities.intern(c);
        }
        let id = TxnId(self.transactions.len());
        self.transactions.push(Transaction::new(description, currency));
        id
    }

    /// Create a split in `txn`, posted to `account` when present. An absent
    /// account models an orphan; an absent amount or value models an
    /// invalid number awaiting repair.
    pub fn add_split(
        &mut self,
        txn: TxnId,
        account: Option<AccountId>,
        amount: Option<bigdecimal::BigDecimal>,
        value: Option<bigdecimal::BigDecimal>,
    ) -> LedgerResult<SplitId> {
        self.transaction_required(txn)?;
        if let Some(aid) = account {
            self.account_required(aid)?;
        }
        self.edit_transaction(txn, |book| {
            let id = SplitId(book.splits.len());
            book.splits.push(Some(Split::new(txn, account, amount, value)));
            book.transactions[txn.0].splits.push(id);
            if let Some(aid) = account {
                book.accounts[aid.0].splits.push(id);
            }
            Ok(id)
        })
    }

    // Edit brackets

    /// Run `f` inside a begin/commit-edit bracket on `txn`. A successful
    /// return commits; an error rolls the transaction, its splits and the
    /// affected account split-lists back to their state at the outermost
    /// `begin`. Brackets nest; only the outermost commit or rollback takes
    /// effect.
    pub fn edit_transaction<T>(
        &mut self,
        txn: TxnId,
        f: impl FnOnce(&mut Book) -> LedgerResult<T>,
    ) -> LedgerResult<T> {
        self.begin_edit_transaction(txn)?;
        match f(self) {
            Ok(value) => {
                self.commit_edit_transaction(txn)?;
                Ok(value)
            }
            Err(err) => {
                self.rollback_edit_transaction(txn);
                Err(err)
            }
        }
    }

    /// Run `f` inside a begin/commit-edit bracket on `account`, rolling the
    /// account back on error.
    pub fn edit_account<T>(
        &mut self,
        account: AccountId,
        f: impl FnOnce(&mut Book) -> LedgerResult<T>,
    ) -> LedgerResult<T> {
        self.begin_edit_account(account)?;
        match f(self) {
            Ok(value) => {
                self.commit_edit_account(account)?;
                Ok(value)
            }
            Err(err) => {
                self.rollback_edit_account(account);
                Err(err)
            }
        }
    }

    fn begin_edit_transaction(&mut self, id: TxnId) -> LedgerResult<()> {
        let txn = self.transaction_required(id)?.clone();
        let depth = self.txn_edits.get(&id.0).map_or(0, |state| state.depth);
        if depth == 0 {
            let splits: Vec<(SplitId, Split)> = txn
                .splits
                .iter()
                .filter_map(|sid| self.split(*sid).map(|s| (*sid, s.clone())))
                .collect();
            let mut touched: Vec<AccountId> =
                splits.iter().filter_map(|(_, s)| s.account).collect();
            touched.sort_by_key(|aid| aid.0);
            touched.dedup();
            let account_lists = touched
                .into_iter()
                .map(|aid| (aid, self.accounts[aid.0].splits.clone()))
                .collect();
            self.txn_edits.insert(
                id.0,
                TxnEditState {
                    depth: 1,
                    snapshot: Some(TxnSnapshot {
                        transaction: txn,
                        splits,
                        account_lists,
                        split_watermark: self.splits.len(),
                    }),
                },
            );
        } else if let Some(state) = self.txn_edits.get_mut(&id.0) {
            state.depth += 1;
        }
        Ok(())
    }

    fn commit_edit_transaction(&mut self, id: TxnId) -> LedgerResult<()> {
        let state = self.txn_edits.get_mut(&id.0).ok_or_else(|| {
            LedgerError::EditBracket(format!("commit without begin for {id}"))
        })?;
        state.depth -= 1;
        if state.depth == 0 {
            self.txn_edits.remove(&id.0);
            let now = chrono::Utc::now().naive_utc();
            if let Some(txn) = self.transactions.get_mut(id.0) {
                txn.updated_at = now;
            }
        }
        Ok(())
    }

    fn rollback_edit_transaction(&mut self, id: TxnId) {
        let Some(state) = self.txn_edits.get_mut(&id.0) else {
            tracing::error!(transaction = %id, "rollback without begin");
            return;
        };
        state.depth -= 1;
        if state.depth > 0 {
            return;
        }
        let Some(snapshot) = self.txn_edits.remove(&id.0).and_then(|s| s.snapshot) else {
            return;
        };
        tracing::warn!(transaction = %id, "rolling back edit");
        // Detach snapshotted splits that were reassigned during the bracket
        // from whichever account list they sit in now.
        for (sid, old) in &snapshot.splits {
            let current = self.split(*sid).and_then(|s| s.account);
            if current != old.account {
                if let Some(aid) = current {
                    if let Some(acc) = self.accounts.get_mut(aid.0) {
                        acc.splits.retain(|s| s != sid);
                    }
                }
            }
        }
        // Splits created inside the bracket die with it.
        for idx in snapshot.split_watermark..self.splits.len() {
            if let Some(split) = self.splits[idx].take() {
                if let Some(aid) = split.account {
                    if let Some(acc) = self.accounts.get_mut(aid.0) {
                        acc.splits.retain(|s| s.0 != idx);
                    }
                }
            }
        }
        for (sid, split) in snapshot.splits {
            self.splits[sid.0] = Some(split);
        }
        for (aid, list) in snapshot.account_lists {
            if let Some(acc) = self.accounts.get_mut(aid.0) {
                acc.splits = list;
            }
        }
        self.transactions[id.0] = snapshot.transaction;
    }

    fn begin_edit_account(&mut self, id: AccountId) -> LedgerResult<()> {
        let account = self.account_required(id)?.clone();
        let state = self.account_edits.entry(id.0).or_default();
        state.depth += 1;
        if state.depth == 1 {
            state.snapshot = Some(account);
        }
        Ok(())
    }

    fn commit_edit_account(&mut self, id: AccountId) -> LedgerResult<()> {
        let state = self.account_edits.get_mut(&id.0).ok_or_else(|| {
            LedgerError::EditBracket(format!("commit without begin for {id}"))
        })?;
        state.depth -= 1;
        if state.depth == 0 {
            self.account_edits.remove(&id.0);
            let now = chrono::Utc::now().naive_utc();
            if let Some(acc) = self.accounts.get_mut(id.0) {
                acc.updated_at = now;
            }
        }
        Ok(())
    }

    fn rollback_edit_account(&mut self, id: AccountId) {
        let Some(state) = self.account_edits.get_mut(&id.0) else {
            tracing::error!(account = %id, "rollback without begin");
            return;
        };
        state.depth -= 1;
        if state.depth > 0 {
            return;
        }
        if let Some(snapshot) = self.account_edits.remove(&id.0).and_then(|s| s.snapshot) {
            tracing::warn!(account = %id, "rolling back edit");
            self.accounts[id.0] = snapshot;
        }
    }

    // Split membership mutations; callers bracket these with
    // `edit_transaction`.

    /// Point `split` at `account`, keeping the old and new account split
    /// lists in agreement with the back-reference.
    pub(crate) fn set_split_account(
        &mut self,
        split: SplitId,
        account: AccountId,
    ) -> LedgerResult<()> {
        self.account_required(account)?;
        let old = self.split_required(split)?.account;
        if old == Some(account) {
            return Ok(());
        }
        if let Some(oid) = old {
            self.accounts[oid.0].splits.retain(|s| *s != split);
        }
        self.split_mut(split)?.account = Some(account);
        self.accounts[account.0].splits.push(split);
        Ok(())
    }

    pub(crate) fn set_split_amount(
        &mut self,
        split: SplitId,
        amount: bigdecimal::BigDecimal,
    ) -> LedgerResult<()> {
        self.split_mut(split)?.amount = Some(amount);
        Ok(())
    }

    pub(crate) fn set_split_value(
        &mut self,
        split: SplitId,
        value: bigdecimal::BigDecimal,
    ) -> LedgerResult<()> {
        self.split_mut(split)?.value = Some(value);
        Ok(())
    }

    pub(crate) fn set_transaction_currency(
        &mut self,
        txn: TxnId,
        currency: Commodity,
    ) -> LedgerResult<()> {
        self.commodities.intern(&currency);
        self.transaction_mut(txn)?.currency = Some(currency);
        Ok(())
    }

    /// Tombstone `split`, removing it from its transaction and account
    pub(crate) fn destroy_split(&mut self, split: SplitId) -> LedgerResult<()> {
        let s = self.split_required(split)?;
        let txn = s.txn;
        let account = s.account;
        if let Some(aid) = account {
            self.accounts[aid.0].splits.retain(|x| *x != split);
        }
        self.transactions[txn.0].splits.retain(|x| *x != split);
        self.splits[split.0] = None;
        Ok(())
    }
}

impl Default for Book {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bigdecimal::BigDecimal;
    use std::str::FromStr;

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    fn usd() -> Commodity {
        Commodity::currency("USD", 100)
    }

    #[test]
    fn test_new_book_has_root() {
        let book = Book::new();
        let root = book.account_required(book.root_account()).unwrap();
        assert_eq!(root.acct_type, AccountType::Root);
        assert!(root.parent.is_none());
    }

    #[test]
    fn test_add_split_links_both_sides() {
        let mut book = Book::with_default_currency(usd());
        let checking = book
            .add_account("Checking", AccountType::Bank, Some(usd()), None)
            .unwrap();
        let txn = book.add_transaction("Groceries", Some(usd()));
        let sid = book
            .add_split(txn, Some(checking), Some(dec("10")), Some(dec("10")))
            .unwrap();

        assert_eq!(book.split_required(sid).unwrap().account, Some(checking));
        assert!(book.account_required(checking).unwrap().splits.contains(&sid));
        assert!(book.transaction_required(txn).unwrap().splits.contains(&sid));
    }

    #[test]
    fn test_destroy_split_tombstones() {
        let mut book = Book::with_default_currency(usd());
        let checking = book
            .add_account("Checking", AccountType::Bank, Some(usd()), None)
            .unwrap();
        let txn = book.add_transaction("Groceries", Some(usd()));
        let sid = book
            .add_split(txn, Some(checking), Some(dec("10")), Some(dec("10")))
            .unwrap();

        book.edit_transaction(txn, |b| b.destroy_split(sid)).unwrap();

        assert!(book.split(sid).is_none());
        assert!(book.transaction_required(txn).unwrap().splits.is_empty());
        assert!(book.account_required(checking).unwrap().splits.is_empty());
    }

    #[test]
    fn test_edit_rollback_restores_split_state() {
        let mut book = Book::with_default_currency(usd());
        let checking = book
            .add_account("Checking", AccountType::Bank, Some(usd()), None)
            .unwrap();
        let txn = book.add_transaction("Groceries", Some(usd()));
        let sid = book
            .add_split(txn, Some(checking), Some(dec("10")), Some(dec("10")))
            .unwrap();

        let result: LedgerResult<()> = book.edit_transaction(txn, |b| {
            b.set_split_value(sid, dec("99"))?;
            b.add_split(txn, Some(checking), Some(dec("1")), Some(dec("1")))?;
            Err(LedgerError::Validation("forced failure".to_string()))
        });
        assert!(result.is_err());

        let split = book.split_required(sid).unwrap();
        assert_eq!(split.value, Some(dec("10")));
        assert_eq!(book.transaction_required(txn).unwrap().splits.len(), 1);
        assert_eq!(book.account_required(checking).unwrap().splits.len(), 1);
    }

    #[test]
    fn test_edit_rollback_restores_reassignment() {
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

        let result: LedgerResult<()> = book.edit_transaction(txn, |b| {
            b.set_split_account(sid, savings)?;
            Err(LedgerError::Validation("forced failure".to_string()))
        });
        assert!(result.is_err());

        assert_eq!(book.split_required(sid).unwrap().account, Some(checking));
        assert!(book.account_required(checking).unwrap().splits.contains(&sid));
        assert!(book.account_required(savings).unwrap().splits.is_empty());
    }

    #[test]
    fn test_nested_brackets_commit_once() {
        let mut book = Book::with_default_currency(usd());
        let checking = book
            .add_account("Checking", AccountType::Bank, Some(usd()), None)
            .unwrap();
        let txn = book.add_transaction("Nested", Some(usd()));

        book.edit_transaction(txn, |b| {
            // add_split opens its own nested bracket
            b.add_split(txn, Some(checking), Some(dec("5")), Some(dec("5")))?;
            Ok(())
        })
        .unwrap();
        assert_eq!(book.transaction_required(txn).unwrap().splits.len(), 1);
    }
}
