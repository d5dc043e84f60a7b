//! Validation utilities and fixed repair-account names

use crate::commodity::Commodity;
use crate::types::{LedgerError, LedgerResult};

/// Separator used when rendering account paths. Account names must never
/// contain it.
pub const ACCOUNT_PATH_SEPARATOR: char = ':';

/// Name of the placeholder account at the top of the trading hierarchy
pub const TRADING_ACCOUNT_NAME: &str = "Trading";

/// Validate that an account name is usable
pub fn validate_account_name(name: &str) -> LedgerResult<()> {
    if name.trim().is_empty() {
        return Err(LedgerError::Validation(
            "account name cannot be empty".to_string(),
        ));
    }

    if name.contains(ACCOUNT_PATH_SEPARATOR) {
        return Err(LedgerError::Validation(format!(
            "account name '{}' contains the path separator '{}'",
            name, ACCOUNT_PATH_SEPARATOR
        )));
    }

    Ok(())
}

/// Name of the bucket account receiving orphaned splits of a currency
pub fn orphan_account_name(currency: &Commodity) -> String {
    format!("Orphan-{}", currency.mnemonic)
}

/// Name of the bucket account receiving balancing splits of a currency
pub fn imbalance_account_name(currency: &Commodity) -> String {
    format!("Imbalance-{}", currency.mnemonic)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_names() {
        let usd = Commodity::currency("USD", 100);
        assert_eq!(orphan_account_name(&usd), "Orphan-USD");
        assert_eq!(imbalance_account_name(&usd), "Imbalance-USD");
    }

    #[test]
    fn test_separator_rejected() {
        assert!(validate_account_name("Assets:Cash").is_err());
        assert!(validate_account_name("  ").is_err());
        assert!(validate_account_name("Imbalance-USD").is_ok());
    }
}
