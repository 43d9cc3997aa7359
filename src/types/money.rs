//! Fixed-point money for the wallet ledger
//!
//! Amounts are held as signed integer minor units (cents, fils, yen) tagged
//! with an ISO-4217 currency. Parsing goes through `rust_decimal` so that no
//! binary floating point is involved anywhere, and every arithmetic operation
//! is checked: mixing currencies yields `CurrencyMismatch`, overflowing `i64`
//! yields `ArithmeticOverflow`.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::error::LedgerError;

/// ISO 4217 currency code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Currency {
    /// US Dollar
    USD,
    /// Euro
    EUR,
    /// British Pound
    GBP,
    /// Swiss Franc
    CHF,
    /// UAE Dirham
    AED,
    /// Indian Rupee
    INR,
    /// Japanese Yen (no minor unit)
    JPY,
    /// Kuwaiti Dinar (three decimal places)
    KWD,
}

impl Currency {
    /// ISO 4217 code
    pub fn code(&self) -> &'static str {
        match self {
            Currency::USD => "USD",
            Currency::EUR => "EUR",
            Currency::GBP => "GBP",
            Currency::CHF => "CHF",
            Currency::AED => "AED",
            Currency::INR => "INR",
            Currency::JPY => "JPY",
            Currency::KWD => "KWD",
        }
    }

    /// Number of decimal places in the minor unit
    pub fn exponent(&self) -> u32 {
        match self {
            Currency::JPY => 0,
            Currency::KWD => 3,
            _ => 2,
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Currency {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "USD" => Ok(Currency::USD),
            "EUR" => Ok(Currency::EUR),
            "GBP" => Ok(Currency::GBP),
            "CHF" => Ok(Currency::CHF),
            "AED" => Ok(Currency::AED),
            "INR" => Ok(Currency::INR),
            "JPY" => Ok(Currency::JPY),
            "KWD" => Ok(Currency::KWD),
            _ => Err(LedgerError::invalid_amount(s, "unknown currency code")),
        }
    }
}

/// A signed amount of minor units in one currency
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Money {
    minor: i64,
    currency: Currency,
}

impl Money {
    /// Money from a raw minor-unit count
    pub const fn from_minor(minor: i64, currency: Currency) -> Self {
        Money { minor, currency }
    }

    /// Zero in the given currency
    pub const fn zero(currency: Currency) -> Self {
        Money { minor: 0, currency }
    }

    /// Convert an exact decimal into minor units
    ///
    /// Fails with `InvalidAmount` when the value carries more significant
    /// decimal places than the currency allows or does not fit in `i64`
    /// minor units.
    pub fn from_decimal(value: Decimal, currency: Currency) -> Result<Self, LedgerError> {
        let exponent = currency.exponent();
        let mut scaled = value.normalize();
        if scaled.scale() > exponent {
            return Err(LedgerError::invalid_amount(
                value,
                &format!("{} allows at most {} decimal places", currency, exponent),
            ));
        }
        scaled.rescale(exponent);

        let minor = i64::try_from(scaled.mantissa())
            .map_err(|_| LedgerError::invalid_amount(value, "out of range"))?;

        Ok(Money { minor, currency })
    }

    /// Parse a decimal string (`"12.50"`) in the given currency
    pub fn parse(amount: &str, currency: Currency) -> Result<Self, LedgerError> {
        let trimmed = amount.trim();
        let value = Decimal::from_str(trimmed)
            .map_err(|_| LedgerError::invalid_amount(trimmed, "not a finite decimal number"))?;
        Self::from_decimal(value, currency)
    }

    /// Parse a decimal string that must be strictly positive
    pub fn parse_positive(amount: &str, currency: Currency) -> Result<Self, LedgerError> {
        let money = Self::parse(amount, currency)?;
        money.ensure_positive()?;
        Ok(money)
    }

    /// Fail with `InvalidAmount` unless the amount is greater than zero
    pub fn ensure_positive(&self) -> Result<(), LedgerError> {
        if self.minor <= 0 {
            return Err(LedgerError::invalid_amount(self, "must be greater than zero"));
        }
        Ok(())
    }

    /// Amount in minor units
    pub fn minor(&self) -> i64 {
        self.minor
    }

    /// Currency tag
    pub fn currency(&self) -> Currency {
        self.currency
    }

    /// Exact decimal value in major units
    pub fn to_decimal(&self) -> Decimal {
        Decimal::new(self.minor, self.currency.exponent())
    }

    pub fn is_zero(&self) -> bool {
        self.minor == 0
    }

    pub fn is_negative(&self) -> bool {
        self.minor < 0
    }

    fn same_currency(&self, other: &Money) -> Result<(), LedgerError> {
        if self.currency != other.currency {
            return Err(LedgerError::currency_mismatch(self.currency, other.currency));
        }
        Ok(())
    }

    /// Checked addition; currencies must match
    pub fn add(&self, other: Money) -> Result<Money, LedgerError> {
        self.same_currency(&other)?;
        let minor = self
            .minor
            .checked_add(other.minor)
            .ok_or_else(|| LedgerError::arithmetic_overflow("add"))?;
        Ok(Money::from_minor(minor, self.currency))
    }

    /// Checked subtraction; currencies must match
    pub fn subtract(&self, other: Money) -> Result<Money, LedgerError> {
        self.same_currency(&other)?;
        let minor = self
            .minor
            .checked_sub(other.minor)
            .ok_or_else(|| LedgerError::arithmetic_overflow("subtract"))?;
        Ok(Money::from_minor(minor, self.currency))
    }

    /// Ordering between two amounts of the same currency
    pub fn compare(&self, other: &Money) -> Result<Ordering, LedgerError> {
        self.same_currency(other)?;
        Ok(self.minor.cmp(&other.minor))
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.to_decimal(), self.currency)
    }
}

/// Parses `"<decimal> <CODE>"`, e.g. `"92.50 EUR"`
impl FromStr for Money {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split_whitespace();
        match (parts.next(), parts.next(), parts.next()) {
            (Some(amount), Some(code), None) => Money::parse(amount, code.parse()?),
            _ => Err(LedgerError::invalid_amount(s, "expected '<amount> <currency>'")),
        }
    }
}
