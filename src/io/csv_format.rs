//! CSV format handling for replay commands and wallet output
//!
//! This module centralizes all CSV format concerns, providing:
//! - CsvRecord structure for deserialization
//! - Conversion from CSV records to ledger commands
//! - Wallet output serialization
//!
//! All functions are pure (no I/O) for easy testing.
//!
//! # Input columns
//!
//! `type,reference,wallet,target,amount,currency,converted,rate,note`
//!
//! | type         | used columns                                                   |
//! |--------------|----------------------------------------------------------------|
//! | `open`       | wallet, target (owner), currency                               |
//! | `suspend`, `activate`, `close` | wallet                                       |
//! | `deposit`    | reference, wallet, amount, currency, note (source)             |
//! | `withdrawal` | reference, wallet, amount, currency, note (destination)        |
//! | `transfer`   | reference, wallet (from), target (to), amount, currency, converted, rate, note |
//! | `payment`    | as transfer, note is `payer>payee[>memo]`                      |
//! | `reverse`    | reference, target (reference to reverse), note (reason)        |

use std::io::Write;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::Deserialize;

use crate::types::{
    Currency, DepositRequest, IdempotencyKey, LedgerCommand, LedgerError, Money, OwnerId,
    PaymentRequest, ReplayRecord, ReverseRequest, TransactionRef, TransferRequest, Wallet,
    WalletId, WalletStatus, WithdrawRequest,
};

/// CSV record structure for deserialization
///
/// Every column except `type` is optional because each command type uses a
/// different subset.
#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
pub struct CsvRecord {
    #[serde(rename = "type")]
    pub command: String,
    pub reference: Option<String>,
    pub wallet: Option<String>,
    pub target: Option<String>,
    pub amount: Option<String>,
    pub currency: Option<String>,
    pub converted: Option<String>,
    pub rate: Option<String>,
    pub note: Option<String>,
}

/// Fields of one row, with blank cells treated as missing
struct Row {
    line: u64,
    record: CsvRecord,
}

impl Row {
    fn optional(field: &Option<String>) -> Option<&str> {
        field.as_deref().map(str::trim).filter(|value| !value.is_empty())
    }

    fn required<'a>(&self, field: &'a Option<String>, name: &str) -> Result<&'a str, LedgerError> {
        Self::optional(field).ok_or_else(|| {
            LedgerError::parse_error(
                self.line,
                format!("'{}' row is missing '{}'", self.record.command.trim(), name),
            )
        })
    }

    fn note(&self) -> String {
        Self::optional(&self.record.note).unwrap_or_default().to_string()
    }

    fn wallet(&self) -> Result<WalletId, LedgerError> {
        self.required(&self.record.wallet, "wallet").map(WalletId::new)
    }

    fn target_wallet(&self) -> Result<WalletId, LedgerError> {
        self.required(&self.record.target, "target").map(WalletId::new)
    }

    fn reference(&self) -> Result<IdempotencyKey, LedgerError> {
        self.required(&self.record.reference, "reference")
            .map(IdempotencyKey::new)
    }

    fn currency(&self) -> Result<Currency, LedgerError> {
        self.required(&self.record.currency, "currency")?
            .parse::<Currency>()
            .map_err(|e: LedgerError| LedgerError::parse_error(self.line, e))
    }

    /// Amount in the row currency; sign and zero are left to the engine
    fn amount(&self) -> Result<Money, LedgerError> {
        let amount = self.required(&self.record.amount, "amount")?;
        Money::parse(amount, self.currency()?).map_err(|e| LedgerError::parse_error(self.line, e))
    }

    fn transfer(&self) -> Result<TransferRequest, LedgerError> {
        let mut transfer =
            TransferRequest::new(self.wallet()?, self.target_wallet()?, self.amount()?, self.reference()?);

        if let Some(converted) = Self::optional(&self.record.converted) {
            let target_amount = Money::from_str(converted)
                .map_err(|e| LedgerError::parse_error(self.line, e))?;
            let rate = self.required(&self.record.rate, "rate")?;
            let rate = Decimal::from_str(rate).map_err(|_| {
                LedgerError::parse_error(self.line, format!("Invalid rate '{}'", rate))
            })?;
            transfer = transfer.with_conversion(target_amount, rate);
        }
        Ok(transfer)
    }
}

/// Convert a CsvRecord read at `line` to a ledger command
///
/// # Returns
///
/// * `Ok(ReplayRecord)` - the command, tagged with its line
/// * `Err(LedgerError::ParseError)` - unknown type, missing column or
///   unparseable value
pub fn convert_csv_record(record: CsvRecord, line: u64) -> Result<ReplayRecord, LedgerError> {
    let row = Row { line, record };

    let command = match row.record.command.trim().to_lowercase().as_str() {
        "open" => LedgerCommand::OpenWallet {
            wallet_id: row.wallet()?,
            owner_id: OwnerId::new(row.required(&row.record.target, "target")?),
            currency: row.currency()?,
        },
        "suspend" => status_change(&row, WalletStatus::Suspended)?,
        "activate" => status_change(&row, WalletStatus::Active)?,
        "close" => status_change(&row, WalletStatus::Closed)?,
        "deposit" => LedgerCommand::Execute(
            DepositRequest::new(row.wallet()?, row.amount()?, row.reference()?)
                .with_source(row.note())
                .into(),
        ),
        "withdrawal" => LedgerCommand::Execute(
            WithdrawRequest::new(row.wallet()?, row.amount()?, row.reference()?)
                .with_destination(row.note())
                .into(),
        ),
        "transfer" => {
            LedgerCommand::Execute(row.transfer()?.with_description(row.note()).into())
        }
        "payment" => {
            let note = row.required(&row.record.note, "note")?;
            let mut parts = note.splitn(3, '>').map(str::trim);
            let (payer, payee) = match (parts.next(), parts.next()) {
                (Some(payer), Some(payee)) if !payer.is_empty() && !payee.is_empty() => {
                    (payer, payee)
                }
                _ => {
                    return Err(LedgerError::parse_error(
                        line,
                        format!("Payment note '{}' must be 'payer>payee'", note),
                    ))
                }
            };
            let memo = parts.next().unwrap_or_default();
            LedgerCommand::Execute(
                PaymentRequest::new(row.transfer()?, payer, payee)
                    .with_memo(memo)
                    .into(),
            )
        }
        "reverse" => {
            let target = row.required(&row.record.target, "target")?;
            LedgerCommand::Execute(
                ReverseRequest::new(
                    TransactionRef::Reference(IdempotencyKey::new(target)),
                    row.reference()?,
                )
                .with_reason(row.note())
                .into(),
            )
        }
        other => {
            return Err(LedgerError::parse_error(
                line,
                format!("Invalid command type: '{}'", other),
            ))
        }
    };

    Ok(ReplayRecord { line, command })
}

fn status_change(row: &Row, status: WalletStatus) -> Result<LedgerCommand, LedgerError> {
    Ok(LedgerCommand::ChangeStatus {
        wallet_id: row.wallet()?,
        status,
    })
}

/// Write wallet states to CSV format
///
/// Writes wallets with columns: wallet, owner, currency, status, balance,
/// available, version. Wallets are sorted by id for deterministic output and
/// amounts are written with the currency's number of decimal places.
///
/// # Arguments
///
/// * `wallets` - Slice of wallet states to write
/// * `output` - Mutable reference to a writer for outputting CSV
pub fn write_wallets_csv(wallets: &[Wallet], output: &mut dyn Write) -> Result<(), LedgerError> {
    use csv::Writer;

    let mut writer = Writer::from_writer(output);

    writer.write_record([
        "wallet",
        "owner",
        "currency",
        "status",
        "balance",
        "available",
        "version",
    ])?;

    let mut sorted_wallets: Vec<&Wallet> = wallets.iter().collect();
    sorted_wallets.sort_by(|a, b| a.wallet_id.cmp(&b.wallet_id));

    for wallet in sorted_wallets {
        writer.write_record(&[
            wallet.wallet_id.to_string(),
            wallet.owner_id.to_string(),
            wallet.currency.to_string(),
            wallet.status.to_string(),
            wallet.balance.to_decimal().to_string(),
            wallet.available.to_decimal().to_string(),
            wallet.version.to_string(),
        ])?;
    }

    writer.flush()?;
    Ok(())
}
