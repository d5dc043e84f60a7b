//! Account tree nodes and tree-wide lookups

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::commodity::Commodity;
use crate::ledger::Book;
use crate::types::{AccountId, AccountType, SplitId};

/// A node in the account tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    /// Stable identifier, used in anomaly logs
    pub guid: Uuid,
    /// Display name; never contains the account-path separator
    pub name: String,
    pub acct_type: AccountType,
    /// What quantities in this account are denominated in. Absent on
    /// freshly migrated data until the commodity scrubber resolves it.
    pub commodity: Option<Commodity>,
    /// Placeholder accounts group children and hold no user splits
    pub placeholder: bool,
    /// `None` only for the root account
    pub parent: Option<AccountId>,
    pub children: Vec<AccountId>,
    /// Splits posted to this account, in insertion order
    pub splits: Vec<SplitId>,
    /// Deprecated currency field from the old single-currency storage
    /// model; consumed by the commodity scrubber, then deleted.
    pub legacy_currency: Option<Commodity>,
    /// Deprecated security field, kept alongside `legacy_currency`
    pub legacy_security: Option<Commodity>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl Account {
    pub(crate) fn new(
        name: &str,
        acct_type: AccountType,
        commodity: Option<Commodity>,
        parent: Option<AccountId>,
    ) -> Self {
        let now = chrono::Utc::now().naive_utc();
        Self {
            guid: Uuid::new_v4(),
            name: name.to_string(),
            acct_type,
            commodity,
            placeholder: false,
            parent,
            children: Vec::new(),
            splits: Vec::new(),
            legacy_currency: None,
            legacy_security: None,
            created_at: now,
            updated_at: now,
        }
    }
}

impl Book {
    /// All descendants of `account` in pre-order, not including the
    /// account itself
    pub fn descendants(&self, account: AccountId) -> Vec<AccountId> {
        let mut out = Vec::new();
        self.collect_descendants(account, &mut out);
        out
    }

    fn collect_descendants(&self, account: AccountId, out: &mut Vec<AccountId>) {
        let Some(acc) = self.account(account) else {
            return;
        };
        for child in &acc.children {
            out.push(*child);
            self.collect_descendants(*child, out);
        }
    }

    /// The nearest currency commodity on the account's ancestor chain,
    /// starting with the account itself
    pub fn currency_or_parent(&self, account: AccountId) -> Option<Commodity> {
        let mut current = Some(account);
        while let Some(aid) = current {
            let acc = self.account(aid)?;
            if let Some(commodity) = &acc.commodity {
                if commodity.is_currency() {
                    return Some(commodity.clone());
                }
            }
            current = acc.parent;
        }
        None
    }

    /// Descendants of `base` matching an account type, and optionally a
    /// commodity and a name
    pub fn lookup_by_type_and_commodity(
        &self,
        base: AccountId,
        name: Option<&str>,
        acct_type: AccountType,
        commodity: Option<&Commodity>,
    ) -> Vec<AccountId> {
        self.descendants(base)
            .into_iter()
            .filter(|aid| {
                let Some(acc) = self.account(*aid) else {
                    return false;
                };
                acc.acct_type == acct_type
                    && commodity.map_or(true, |c| {
                        acc.commodity.as_ref().is_some_and(|ac| ac.equivalent(c))
                    })
                    && name.map_or(true, |n| acc.name == n)
            })
            .collect()
    }

    /// The book default currency: the root account's commodity, else the
    /// commodity of the first top-level income account that has one.
    /// Older books may define neither.
    pub fn default_currency(&self) -> Option<Commodity> {
        let root = self.account(self.root_account())?;
        if let Some(commodity) = &root.commodity {
            return Some(commodity.clone());
        }
        root.children
            .iter()
            .filter_map(|cid| self.account(*cid))
            .filter(|acc| acc.acct_type == AccountType::Income)
            .find_map(|acc| acc.commodity.clone())
    }
}
