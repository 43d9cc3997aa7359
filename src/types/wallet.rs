//! Wallet aggregate
//!
//! A wallet holds a single-currency balance for one owner. Its balance is a
//! cache of the running sum of its ledger entries; the entries remain the
//! source of truth. Mutation happens only through the engine's unit of work,
//! which is why [`Wallet::apply_delta`] is crate-private.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::entry::Direction;
use super::error::LedgerError;
use super::money::{Currency, Money};

/// Wallet identifier
///
/// Ordered lexicographically; multi-wallet operations lock wallets in this
/// order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WalletId(String);

impl WalletId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WalletId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of the wallet owner, assigned by onboarding
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OwnerId(String);

impl OwnerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Wallet lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WalletStatus {
    /// Accepts every operation
    Active,
    /// Temporarily frozen; rejects new operations until reactivated
    Suspended,
    /// Terminal; history is kept but no operation is accepted
    Closed,
}

impl WalletStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WalletStatus::Active => "active",
            WalletStatus::Suspended => "suspended",
            WalletStatus::Closed => "closed",
        }
    }

    /// Whether a wallet may move from `self` to `next`
    pub fn can_transition_to(&self, next: WalletStatus) -> bool {
        matches!(
            (self, next),
            (WalletStatus::Active, WalletStatus::Suspended)
                | (WalletStatus::Suspended, WalletStatus::Active)
                | (WalletStatus::Active, WalletStatus::Closed)
                | (WalletStatus::Suspended, WalletStatus::Closed)
        )
    }
}

impl fmt::Display for WalletStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WalletStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "active" => Ok(WalletStatus::Active),
            "suspended" => Ok(WalletStatus::Suspended),
            "closed" => Ok(WalletStatus::Closed),
            other => Err(format!("unknown wallet status '{}'", other)),
        }
    }
}

/// Wallet state
#[derive(Debug, Clone, PartialEq)]
pub struct Wallet {
    pub wallet_id: WalletId,

    pub owner_id: OwnerId,

    pub currency: Currency,

    pub status: WalletStatus,

    /// Running sum of all credits minus debits
    pub balance: Money,

    /// Spendable part of the balance
    ///
    /// Never negative and never above `balance`. Equal to `balance` until a
    /// hold mechanism reduces it.
    pub available: Money,

    /// Incremented on every mutation (balance or status)
    pub version: u64,

    pub created_at: DateTime<Utc>,
}

impl Wallet {
    /// A new, active wallet with zero balance
    pub fn open(
        wallet_id: WalletId,
        owner_id: OwnerId,
        currency: Currency,
        created_at: DateTime<Utc>,
    ) -> Self {
        Wallet {
            wallet_id,
            owner_id,
            currency,
            status: WalletStatus::Active,
            balance: Money::zero(currency),
            available: Money::zero(currency),
            version: 0,
            created_at,
        }
    }

    /// Fail with `WalletInactive` unless the wallet is active
    pub fn assert_active(&self) -> Result<(), LedgerError> {
        if self.status != WalletStatus::Active {
            return Err(LedgerError::wallet_inactive(&self.wallet_id, self.status));
        }
        Ok(())
    }

    /// Fail with `CurrencyMismatch` unless `amount` is in the wallet currency
    pub fn assert_currency(&self, amount: &Money) -> Result<(), LedgerError> {
        if amount.currency() != self.currency {
            return Err(LedgerError::currency_mismatch(self.currency, amount.currency()));
        }
        Ok(())
    }

    /// Fail with `InsufficientFunds` when the available balance is below `amount`
    pub fn check_sufficient_funds(&self, amount: &Money) -> Result<(), LedgerError> {
        if self.available.compare(amount)?.is_lt() {
            return Err(LedgerError::insufficient_funds(
                &self.wallet_id,
                self.available,
                *amount,
            ));
        }
        Ok(())
    }

    /// Apply a credit or debit of `amount` and bump the version
    ///
    /// Both balances move together. A debit that would take the available
    /// balance below zero is rejected and leaves the wallet untouched.
    pub(crate) fn apply_delta(
        &mut self,
        amount: Money,
        direction: Direction,
    ) -> Result<(), LedgerError> {
        self.assert_currency(&amount)?;

        let (balance, available) = match direction {
            Direction::Credit => (self.balance.add(amount)?, self.available.add(amount)?),
            Direction::Debit => {
                self.check_sufficient_funds(&amount)?;
                (
                    self.balance.subtract(amount)?,
                    self.available.subtract(amount)?,
                )
            }
        };

        self.balance = balance;
        self.available = available;
        self.version += 1;
        Ok(())
    }

    /// Move to `next` status and bump the version
    pub(crate) fn transition(&mut self, next: WalletStatus) -> Result<(), LedgerError> {
        if !self.status.can_transition_to(next) {
            return Err(LedgerError::InvalidStatusTransition {
                wallet: self.wallet_id.clone(),
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.version += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ErrorKind;
    use rstest::rstest;

    fn wallet() -> Wallet {
        Wallet::open(
            WalletId::new("w-1"),
            OwnerId::new("alice"),
            Currency::USD,
            Utc::now(),
        )
    }

    fn usd(minor: i64) -> Money {
        Money::from_minor(minor, Currency::USD)
    }

    #[test]
    fn test_open_creates_empty_active_wallet() {
        let wallet = wallet();

        assert_eq!(wallet.status, WalletStatus::Active);
        assert!(wallet.balance.is_zero());
        assert!(wallet.available.is_zero());
        assert_eq!(wallet.version, 0);
    }

    #[test]
    fn test_credit_then_debit() {
        let mut wallet = wallet();

        wallet.apply_delta(usd(10000), Direction::Credit).unwrap();
        wallet.apply_delta(usd(3000), Direction::Debit).unwrap();

        assert_eq!(wallet.balance, usd(7000));
        assert_eq!(wallet.available, usd(7000));
        assert_eq!(wallet.version, 2);
    }

    #[test]
    fn test_debit_beyond_available_leaves_wallet_untouched() {
        let mut wallet = wallet();
        wallet.apply_delta(usd(500), Direction::Credit).unwrap();

        let error = wallet.apply_delta(usd(501), Direction::Debit).unwrap_err();

        assert_eq!(error.kind(), ErrorKind::InsufficientFunds);
        assert_eq!(wallet.balance, usd(500));
        assert_eq!(wallet.version, 1);
    }

    #[test]
    fn test_delta_in_other_currency_is_rejected() {
        let mut wallet = wallet();

        let error = wallet
            .apply_delta(Money::from_minor(100, Currency::EUR), Direction::Credit)
            .unwrap_err();

        assert_eq!(error, LedgerError::currency_mismatch(Currency::USD, Currency::EUR));
        assert_eq!(wallet.version, 0);
    }

    #[test]
    fn test_check_sufficient_funds_uses_available_balance() {
        let mut wallet = wallet();
        wallet.balance = usd(1000);
        wallet.available = usd(400);

        assert!(wallet.check_sufficient_funds(&usd(400)).is_ok());
        assert_eq!(
            wallet.check_sufficient_funds(&usd(401)).unwrap_err().kind(),
            ErrorKind::InsufficientFunds
        );
    }

    #[rstest]
    #[case(WalletStatus::Active, WalletStatus::Suspended, true)]
    #[case(WalletStatus::Suspended, WalletStatus::Active, true)]
    #[case(WalletStatus::Active, WalletStatus::Closed, true)]
    #[case(WalletStatus::Suspended, WalletStatus::Closed, true)]
    #[case(WalletStatus::Closed, WalletStatus::Active, false)]
    #[case(WalletStatus::Closed, WalletStatus::Suspended, false)]
    #[case(WalletStatus::Active, WalletStatus::Active, false)]
    fn test_status_transitions(
        #[case] from: WalletStatus,
        #[case] to: WalletStatus,
        #[case] allowed: bool,
    ) {
        let mut wallet = wallet();
        wallet.status = from;

        assert_eq!(wallet.transition(to).is_ok(), allowed);
    }

    #[rstest]
    #[case(WalletStatus::Suspended)]
    #[case(WalletStatus::Closed)]
    fn test_assert_active_rejects_inactive(#[case] status: WalletStatus) {
        let mut wallet = wallet();
        wallet.status = status;

        assert_eq!(
            wallet.assert_active().unwrap_err(),
            LedgerError::wallet_inactive(&WalletId::new("w-1"), status)
        );
    }

    #[test]
    fn test_wallet_ids_order_lexicographically() {
        let mut ids = vec![WalletId::new("w-2"), WalletId::new("w-10"), WalletId::new("w-1")];
        ids.sort();
        assert_eq!(ids, vec![WalletId::new("w-1"), WalletId::new("w-10"), WalletId::new("w-2")]);
    }
}
