//! Typed operation requests
//!
//! Every call into the engine is one of a closed set of requests. Each
//! request validates its own shape (positive amounts, no self-transfers, a
//! sane conversion quote) before any lock is taken, and can be fingerprinted
//! so that an idempotency key reused for a different request is detected.

use rust_decimal::Decimal;
use sha2::{Digest, Sha256};

use super::error::LedgerError;
use super::money::{Currency, Money};
use super::transaction::{
    IdempotencyKey, OperationOutcome, PaymentParties, TransactionId, TransactionKind,
};
use super::wallet::{OwnerId, Wallet, WalletId, WalletStatus};

/// Credit a wallet from an external source
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DepositRequest {
    pub wallet_id: WalletId,
    pub amount: Money,
    /// Where the funds came from (card, bank, ...)
    pub source: String,
    pub idempotency_key: IdempotencyKey,
}

impl DepositRequest {
    pub fn new(wallet_id: WalletId, amount: Money, idempotency_key: IdempotencyKey) -> Self {
        Self {
            wallet_id,
            amount,
            source: String::new(),
            idempotency_key,
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }
}

/// Debit a wallet towards an external destination
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WithdrawRequest {
    pub wallet_id: WalletId,
    pub amount: Money,
    pub destination: String,
    pub idempotency_key: IdempotencyKey,
}

impl WithdrawRequest {
    pub fn new(wallet_id: WalletId, amount: Money, idempotency_key: IdempotencyKey) -> Self {
        Self {
            wallet_id,
            amount,
            destination: String::new(),
            idempotency_key,
        }
    }

    pub fn with_destination(mut self, destination: impl Into<String>) -> Self {
        self.destination = destination.into();
        self
    }
}

/// Caller-resolved currency conversion
///
/// The ledger never computes the target amount itself; it records the quote
/// it was given.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Conversion {
    /// Amount credited to the destination wallet, in its currency
    pub target_amount: Money,
    /// Rate the caller applied (target units per source unit)
    pub rate: Decimal,
}

impl Conversion {
    fn validate(&self, source: &Money) -> Result<(), LedgerError> {
        self.target_amount.ensure_positive()?;
        if self.rate <= Decimal::ZERO {
            return Err(LedgerError::invalid_transfer(
                "exchange rate must be greater than zero",
            ));
        }
        if self.target_amount.currency() == source.currency() {
            return Err(LedgerError::invalid_transfer(
                "conversion requires two different currencies",
            ));
        }
        Ok(())
    }
}

/// Move money between two wallets
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransferRequest {
    pub from: WalletId,
    pub to: WalletId,
    /// Amount debited from `from`, in its currency
    pub amount: Money,
    pub conversion: Option<Conversion>,
    pub description: String,
    pub idempotency_key: IdempotencyKey,
}

impl TransferRequest {
    pub fn new(
        from: WalletId,
        to: WalletId,
        amount: Money,
        idempotency_key: IdempotencyKey,
    ) -> Self {
        Self {
            from,
            to,
            amount,
            conversion: None,
            description: String::new(),
            idempotency_key,
        }
    }

    pub fn with_conversion(mut self, target_amount: Money, rate: Decimal) -> Self {
        self.conversion = Some(Conversion {
            target_amount,
            rate,
        });
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    fn validate(&self) -> Result<(), LedgerError> {
        self.amount.ensure_positive()?;
        if self.from == self.to {
            return Err(LedgerError::invalid_transfer(
                "source and destination wallet are the same",
            ));
        }
        if let Some(conversion) = &self.conversion {
            conversion.validate(&self.amount)?;
        }
        Ok(())
    }
}

/// Transfer between two parties resolved to wallets by the caller
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PaymentRequest {
    pub transfer: TransferRequest,
    pub parties: PaymentParties,
    pub memo: String,
}

impl PaymentRequest {
    pub fn new(transfer: TransferRequest, payer: impl Into<String>, payee: impl Into<String>) -> Self {
        Self {
            transfer,
            parties: PaymentParties {
                payer: payer.into(),
                payee: payee.into(),
            },
            memo: String::new(),
        }
    }

    pub fn with_memo(mut self, memo: impl Into<String>) -> Self {
        self.memo = memo.into();
        self
    }
}

/// How a reversal names the transaction it compensates
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TransactionRef {
    Id(TransactionId),
    /// Idempotency key of the original request
    Reference(IdempotencyKey),
}

/// Compensate a completed transaction with equal and opposite entries
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReverseRequest {
    pub target: TransactionRef,
    pub reason: String,
    pub idempotency_key: IdempotencyKey,
}

impl ReverseRequest {
    pub fn new(target: TransactionRef, idempotency_key: IdempotencyKey) -> Self {
        Self {
            target,
            reason: String::new(),
            idempotency_key,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }
}

/// Balance-mutating request accepted by the engine
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum OperationRequest {
    Deposit(DepositRequest),
    Withdraw(WithdrawRequest),
    Transfer(TransferRequest),
    Payment(PaymentRequest),
    Reverse(ReverseRequest),
}

impl OperationRequest {
    pub fn idempotency_key(&self) -> &IdempotencyKey {
        match self {
            OperationRequest::Deposit(r) => &r.idempotency_key,
            OperationRequest::Withdraw(r) => &r.idempotency_key,
            OperationRequest::Transfer(r) => &r.idempotency_key,
            OperationRequest::Payment(r) => &r.transfer.idempotency_key,
            OperationRequest::Reverse(r) => &r.idempotency_key,
        }
    }

    pub fn kind(&self) -> TransactionKind {
        match self {
            OperationRequest::Deposit(_) => TransactionKind::Deposit,
            OperationRequest::Withdraw(_) => TransactionKind::Withdrawal,
            OperationRequest::Transfer(_) => TransactionKind::Transfer,
            OperationRequest::Payment(_) => TransactionKind::Payment,
            OperationRequest::Reverse(_) => TransactionKind::Reversal,
        }
    }

    /// Wallets named directly by the request
    ///
    /// Empty for reversals, whose wallets come from the original transaction.
    pub fn wallets(&self) -> Vec<WalletId> {
        match self {
            OperationRequest::Deposit(r) => vec![r.wallet_id.clone()],
            OperationRequest::Withdraw(r) => vec![r.wallet_id.clone()],
            OperationRequest::Transfer(r) => vec![r.from.clone(), r.to.clone()],
            OperationRequest::Payment(r) => vec![r.transfer.from.clone(), r.transfer.to.clone()],
            OperationRequest::Reverse(_) => Vec::new(),
        }
    }

    /// Shape checks that need no wallet state
    pub fn validate(&self) -> Result<(), LedgerError> {
        match self {
            OperationRequest::Deposit(r) => r.amount.ensure_positive(),
            OperationRequest::Withdraw(r) => r.amount.ensure_positive(),
            OperationRequest::Transfer(r) => r.validate(),
            OperationRequest::Payment(r) => r.transfer.validate(),
            OperationRequest::Reverse(_) => Ok(()),
        }
    }

    /// Stable hash of the whole request
    ///
    /// SHA-256 over [`OperationRequest::canonical_bytes`], truncated to the
    /// first eight bytes. The value is persisted with the transaction, so it
    /// must not change between builds or toolchains.
    pub fn fingerprint(&self) -> u64 {
        let digest = Sha256::digest(self.canonical_bytes());
        let mut head = [0u8; 8];
        head.copy_from_slice(&digest[..8]);
        u64::from_be_bytes(head)
    }

    /// Deterministic byte encoding of the request
    ///
    /// Fixed field order, length-prefixed strings, big-endian integers and
    /// normalized decimals. Each variant starts with its own tag byte.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut out = CanonicalWriter::default();
        match self {
            OperationRequest::Deposit(r) => {
                out.tag(1);
                out.string(r.wallet_id.as_str());
                out.money(&r.amount);
                out.string(&r.source);
                out.string(r.idempotency_key.as_str());
            }
            OperationRequest::Withdraw(r) => {
                out.tag(2);
                out.string(r.wallet_id.as_str());
                out.money(&r.amount);
                out.string(&r.destination);
                out.string(r.idempotency_key.as_str());
            }
            OperationRequest::Transfer(r) => {
                out.tag(3);
                out.transfer(r);
            }
            OperationRequest::Payment(r) => {
                out.tag(4);
                out.transfer(&r.transfer);
                out.string(&r.parties.payer);
                out.string(&r.parties.payee);
                out.string(&r.memo);
            }
            OperationRequest::Reverse(r) => {
                out.tag(5);
                match &r.target {
                    TransactionRef::Id(id) => {
                        out.tag(1);
                        out.string(&id.to_string());
                    }
                    TransactionRef::Reference(key) => {
                        out.tag(2);
                        out.string(key.as_str());
                    }
                }
                out.string(&r.reason);
                out.string(r.idempotency_key.as_str());
            }
        }
        out.buffer
    }
}

#[derive(Default)]
struct CanonicalWriter {
    buffer: Vec<u8>,
}

impl CanonicalWriter {
    fn tag(&mut self, tag: u8) {
        self.buffer.push(tag);
    }

    fn string(&mut self, s: &str) {
        self.buffer.extend_from_slice(&(s.len() as u32).to_be_bytes());
        self.buffer.extend_from_slice(s.as_bytes());
    }

    fn money(&mut self, money: &Money) {
        self.buffer.extend_from_slice(money.currency().code().as_bytes());
        self.buffer.extend_from_slice(&money.minor().to_be_bytes());
    }

    fn transfer(&mut self, r: &TransferRequest) {
        self.string(r.from.as_str());
        self.string(r.to.as_str());
        self.money(&r.amount);
        match &r.conversion {
            Some(conversion) => {
                self.tag(1);
                self.money(&conversion.target_amount);
                self.string(&conversion.rate.normalize().to_string());
            }
            None => self.tag(0),
        }
        self.string(&r.description);
        self.string(r.idempotency_key.as_str());
    }
}

impl From<DepositRequest> for OperationRequest {
    fn from(request: DepositRequest) -> Self {
        OperationRequest::Deposit(request)
    }
}

impl From<WithdrawRequest> for OperationRequest {
    fn from(request: WithdrawRequest) -> Self {
        OperationRequest::Withdraw(request)
    }
}

impl From<TransferRequest> for OperationRequest {
    fn from(request: TransferRequest) -> Self {
        OperationRequest::Transfer(request)
    }
}

impl From<PaymentRequest> for OperationRequest {
    fn from(request: PaymentRequest) -> Self {
        OperationRequest::Payment(request)
    }
}

impl From<ReverseRequest> for OperationRequest {
    fn from(request: ReverseRequest) -> Self {
        OperationRequest::Reverse(request)
    }
}

/// Anything the engine can process, including wallet lifecycle changes
#[derive(Debug, Clone, PartialEq)]
pub enum LedgerCommand {
    OpenWallet {
        wallet_id: WalletId,
        owner_id: OwnerId,
        currency: Currency,
    },
    ChangeStatus {
        wallet_id: WalletId,
        status: WalletStatus,
    },
    Execute(OperationRequest),
}

/// One command of a replay file, tagged with its source line
#[derive(Debug, Clone, PartialEq)]
pub struct ReplayRecord {
    /// 1-based line number in the input, header included
    pub line: u64,
    pub command: LedgerCommand,
}

/// Result of [`LedgerCommand`] processing
#[derive(Debug, Clone, PartialEq)]
pub enum CommandOutcome {
    Wallet(Wallet),
    Operation(OperationOutcome),
}
