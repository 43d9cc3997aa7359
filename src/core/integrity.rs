//! Balance verification against the entry log

use tracing::error;

use crate::types::{EntryId, LedgerEntry, LedgerError, Money, Wallet, WalletId};

/// Outcome of replaying one wallet's entries
#[derive(Debug, Clone, PartialEq)]
pub struct IntegrityReport {
    pub wallet_id: WalletId,
    /// Balance cached on the wallet
    pub stored_balance: Money,
    /// Balance recomputed by the entry store
    pub folded_balance: Money,
    pub entry_count: usize,
    /// First entry whose recorded resulting balance disagrees with the replay
    pub first_mismatch: Option<EntryId>,
    /// `0 <= available <= balance`
    pub available_in_range: bool,
}

impl IntegrityReport {
    /// Replay `entries` (oldest first) and compare with `wallet`
    pub(crate) fn audit(
        wallet: &Wallet,
        entries: &[LedgerEntry],
        folded_balance: Money,
    ) -> Result<Self, LedgerError> {
        let mut running = Money::zero(wallet.currency);
        let mut first_mismatch = None;
        for entry in entries {
            running = running.add(entry.signed_amount())?;
            if first_mismatch.is_none() && entry.balance_after != running {
                first_mismatch = Some(entry.entry_id);
            }
        }

        let available_in_range = !wallet.available.is_negative()
            && wallet.available.compare(&wallet.balance)?.is_le();

        let report = IntegrityReport {
            wallet_id: wallet.wallet_id.clone(),
            stored_balance: wallet.balance,
            folded_balance,
            entry_count: entries.len(),
            first_mismatch,
            available_in_range,
        };

        if !report.is_consistent() {
            error!(
                wallet = %report.wallet_id,
                stored = %report.stored_balance,
                folded = %report.folded_balance,
                first_mismatch = ?report.first_mismatch,
                available_in_range = report.available_in_range,
                "Wallet balance disagrees with its ledger entries"
            );
        }
        Ok(report)
    }

    pub fn is_consistent(&self) -> bool {
        self.stored_balance == self.folded_balance
            && self.first_mismatch.is_none()
            && self.available_in_range
    }
}
