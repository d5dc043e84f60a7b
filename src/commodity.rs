//! Commodity definitions and the book-level commodity table

use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Namespace shared by all true currencies
pub const CURRENCY_NAMESPACE: &str = "CURRENCY";

/// A commodity: a currency, stock, fund or anything else a ledger
/// quantity can be denominated in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Commodity {
    /// Grouping namespace, e.g. `"CURRENCY"` or an exchange name
    pub namespace: String,
    /// Symbol within the namespace, e.g. `"USD"` or `"AAPL"`
    pub mnemonic: String,
    /// Display name
    pub fullname: Option<String>,
    /// Smallest-unit denominator: the finest representable quantity is
    /// `1 / fraction` (100 for cent-denominated currencies)
    pub fraction: i64,
}

impl Commodity {
    /// Create a commodity in an arbitrary namespace
    pub fn new(namespace: &str, mnemonic: &str, fraction: i64) -> Self {
        Self {
            namespace: namespace.to_string(),
            mnemonic: mnemonic.to_string(),
            fullname: None,
            fraction,
        }
    }

    /// Create a currency commodity
    pub fn currency(mnemonic: &str, fraction: i64) -> Self {
        Self::new(CURRENCY_NAMESPACE, mnemonic, fraction)
    }

    /// Whether this commodity is a true currency
    pub fn is_currency(&self) -> bool {
        self.namespace == CURRENCY_NAMESPACE
    }

    /// Smallest-unit denominator
    pub fn fraction(&self) -> i64 {
        self.fraction
    }

    /// Two commodities are equivalent when namespace and mnemonic agree;
    /// fullname and fraction are display concerns.
    pub fn equivalent(&self, other: &Commodity) -> bool {
        self.namespace == other.namespace && self.mnemonic == other.mnemonic
    }
}

impl fmt::Display for Commodity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.mnemonic)
    }
}

/// Equivalence over optional commodities; two absent commodities are
/// considered equivalent, mixed presence is not.
pub fn equivalent_opt(a: Option<&Commodity>, b: Option<&Commodity>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => a.equivalent(b),
        _ => false,
    }
}

/// A signed quantity denominated in one commodity. Transient: used for
/// imbalance reports, never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct Monetary {
    pub commodity: Commodity,
    pub value: BigDecimal,
}

impl Monetary {
    pub fn new(commodity: Commodity, value: BigDecimal) -> Self {
        Self { commodity, value }
    }
}

/// Add `value` to the entry for `commodity`, appending a new entry when the
/// commodity has not been seen. Encounter order is preserved.
pub fn monetary_list_add(list: &mut Vec<Monetary>, commodity: &Commodity, value: &BigDecimal) {
    match list.iter_mut().find(|m| m.commodity.equivalent(commodity)) {
        Some(entry) => entry.value += value,
        None => list.push(Monetary::new(commodity.clone(), value.clone())),
    }
}

/// Registry of the commodities a book has seen, keyed by
/// `namespace:mnemonic`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommodityTable {
    commodities: HashMap<String, Commodity>,
}

fn table_key(namespace: &str, mnemonic: &str) -> String {
    format!("{namespace}:{mnemonic}")
}

impl CommodityTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a commodity. First registration wins; re-registering an
    /// equivalent commodity is a no-op.
    pub fn intern(&mut self, commodity: &Commodity) {
        self.commodities
            .entry(table_key(&commodity.namespace, &commodity.mnemonic))
            .or_insert_with(|| commodity.clone());
    }

    /// Look up a commodity by namespace and mnemonic
    pub fn lookup(&self, namespace: &str, mnemonic: &str) -> Option<&Commodity> {
        self.commodities.get(&table_key(namespace, mnemonic))
    }

    pub fn len(&self) -> usize {
        self.commodities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commodities.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_currency_predicate() {
        let usd = Commodity::currency("USD", 100);
        let aapl = Commodity::new("NASDAQ", "AAPL", 1);
        assert!(usd.is_currency());
        assert!(!aapl.is_currency());
    }

    #[test]
    fn test_equivalence_ignores_fraction() {
        let a = Commodity::currency("USD", 100);
        let mut b = Commodity::currency("USD", 1000);
        b.fullname = Some("US Dollar".to_string());
        assert!(a.equivalent(&b));
        assert!(!a.equivalent(&Commodity::currency("EUR", 100)));
    }

    #[test]
    fn test_table_intern_and_lookup() {
        let mut table = CommodityTable::new();
        table.intern(&Commodity::currency("EUR", 100));
        table.intern(&Commodity::currency("EUR", 100));
        assert_eq!(table.len(), 1);
        assert!(table.lookup(CURRENCY_NAMESPACE, "EUR").is_some());
        assert!(table.lookup(CURRENCY_NAMESPACE, "JPY").is_none());
    }
}
