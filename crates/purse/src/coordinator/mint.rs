//! Mint flow: Lightning in, proofs out
//!
//! `mint` creates the quote and a pending ledger entry, then hands the
//! quote to a poller. `complete_mint` redeems a paid quote exactly once;
//! the pending entry's atomic status transition is what makes concurrent
//! poller and explicit completions safe.

use purse_common::database::PendingUpdate;
use purse_common::ledger::{
    CompletionMethod, EntryKind, EntryMetadata, EntryStatus, LedgerEntry, TransactionId,
};
use purse_common::protocol::{MintRequest, QuoteState};
use purse_common::proofs::ProofsMethods;
use purse_common::{Amount, Error, UserKey};
use tracing::instrument;

use super::Coordinator;
use crate::poller::{PollerContext, PollerKey};
use crate::retry::with_retry;
use crate::types::{CompletedMint, MintPending, PendingReceipts};
use crate::validation::validate_user_key;

impl Coordinator {
    /// Start a mint: request a quote, record a pending entry and register
    /// a poller that watches the quote for payment
    #[instrument(skip(self))]
    pub async fn mint(&self, user_key: &str, amount: Amount) -> Result<MintPending, Error> {
        let user_key = validate_user_key(user_key)?;
        let admission = self.gate().admit_mint(&user_key, amount).await?;

        self.monitor().record_mint_attempt();

        let result = self.mint_inner(&user_key, amount, admission.wallet.id).await;

        match &result {
            Ok(pending) => {
                self.monitor().record_mint_success();
                tracing::info!(
                    "Mint started for {}: quote {} transaction {}",
                    user_key,
                    pending.quote_id,
                    pending.transaction_id
                );
            }
            Err(err) => {
                self.monitor().record_mint_failure();
                tracing::warn!("Mint for {} failed: {}", user_key, err);
            }
        }

        result
    }

    async fn mint_inner(
        &self,
        user_key: &UserKey,
        amount: Amount,
        wallet_id: purse_common::wallet::WalletId,
    ) -> Result<MintPending, Error> {
        let handle = self.open_handle().await?;

        let quote = handle.post_mint_quote(amount).await?;
        let transaction_id = TransactionId::new();

        let entry = LedgerEntry::pending(
            user_key.clone(),
            wallet_id,
            self.config().mint_url.clone(),
            transaction_id,
            EntryKind::Minted,
            EntryMetadata::pending_mint(
                quote.quote.clone(),
                amount,
                quote.request.clone(),
                quote.expiry,
            ),
        );
        let entry_id = entry.id;
        self.localstore().store_entry(entry).await?;

        self.pollers()
            .register(
                self.clone(),
                PollerContext {
                    key: PollerKey {
                        user_key: user_key.clone(),
                        quote_id: quote.quote.clone(),
                        transaction_id,
                    },
                    entry_id,
                    mint_url: self.config().mint_url.clone(),
                    amount,
                },
            )
            .await?;

        Ok(MintPending {
            quote_id: quote.quote,
            invoice: quote.request,
            transaction_id,
            expiry: quote.expiry,
        })
    }

    /// Redeem a paid mint quote into the pending ledger entry
    ///
    /// Idempotent: when the entry is already unspent the call reports
    /// `already_completed` without touching the mint.
    #[instrument(skip(self, quote_id))]
    pub async fn complete_mint(
        &self,
        user_key: &str,
        quote_id: &str,
        amount: Amount,
        transaction_id: &str,
    ) -> Result<CompletedMint, Error> {
        let user_key = validate_user_key(user_key)?;
        let transaction_id = Self::parse_transaction_id(transaction_id)?;

        self.complete_mint_with_method(
            &user_key,
            quote_id,
            amount,
            transaction_id,
            CompletionMethod::Explicit,
        )
        .await
    }

    pub(crate) async fn complete_mint_with_method(
        &self,
        user_key: &UserKey,
        quote_id: &str,
        amount: Amount,
        transaction_id: TransactionId,
        method: CompletionMethod,
    ) -> Result<CompletedMint, Error> {
        self.monitor().record_completion_attempt();

        let result = self
            .complete_mint_inner(user_key, quote_id, amount, transaction_id, method)
            .await;

        match &result {
            Ok(_) => self.monitor().record_completion_success(),
            Err(_) => self.monitor().record_completion_failure(),
        }

        result
    }

    async fn complete_mint_inner(
        &self,
        user_key: &UserKey,
        quote_id: &str,
        amount: Amount,
        transaction_id: TransactionId,
        method: CompletionMethod,
    ) -> Result<CompletedMint, Error> {
        let entries = self
            .localstore()
            .find_by_transaction_id(&transaction_id)
            .await?;
        let entry = entries
            .into_iter()
            .find(|e| &e.user_key == user_key && e.kind == EntryKind::Minted)
            .ok_or(Error::QuoteUnknown)?;

        match entry.status {
            // a concurrent completion already filled the entry
            EntryStatus::Unspent => {
                return Ok(CompletedMint {
                    transaction_id,
                    entry_id: entry.id,
                    total_amount: entry.total_amount,
                    proofs: entry.proofs,
                    already_completed: true,
                });
            }
            EntryStatus::Pending => {}
            other => {
                return Err(Error::Custom(format!(
                    "Transaction {transaction_id} is {other}, not completable"
                )));
            }
        }

        let handle = self.open_handle().await?;

        let status = with_retry(|| handle.get_mint_quote_status(quote_id)).await?;
        if status.state != QuoteState::Paid {
            return Err(Error::QuoteNotPaid {
                state: status.state,
            });
        }

        let minted = match handle
            .post_mint(MintRequest {
                quote: quote_id.to_string(),
                amount,
            })
            .await
        {
            Ok(response) => response,
            Err(err) => {
                // distinguish a quote that moved away from PAID underneath us
                if let Ok(recheck) = handle.get_mint_quote_status(quote_id).await {
                    if recheck.state != QuoteState::Paid {
                        self.localstore()
                            .update_pending(
                                &entry.id,
                                PendingUpdate::Fail {
                                    reason: format!(
                                        "Quote state changed during completion: {}",
                                        recheck.state
                                    ),
                                },
                            )
                            .await?;
                        return Err(Error::QuoteStateChanged {
                            state: recheck.state,
                        });
                    }
                }

                self.localstore()
                    .update_pending(
                        &entry.id,
                        PendingUpdate::Fail {
                            reason: format!("Mint redemption failed: {err}"),
                        },
                    )
                    .await?;
                return Err(err);
            }
        };

        let minted_amount = minted.proofs.total_amount();
        if minted_amount != amount {
            tracing::warn!(
                "Mint issued {} for quote {} but {} was requested",
                minted_amount,
                quote_id,
                amount
            );
        }

        // a failure here is recoverable: the quote is redeemed, the caller
        // may retry and hit the idempotent path once the write goes through
        let updated = self
            .localstore()
            .update_pending(
                &entry.id,
                PendingUpdate::Complete {
                    proofs: minted.proofs,
                    method,
                    minted_amount,
                },
            )
            .await?;

        tracing::info!(
            "Completed mint quote {} for {}: {} in {} proofs",
            quote_id,
            user_key,
            updated.total_amount,
            updated.proofs.len()
        );

        Ok(CompletedMint {
            transaction_id,
            entry_id: updated.id,
            total_amount: updated.total_amount,
            proofs: updated.proofs,
            already_completed: false,
        })
    }

    /// Check the user's outstanding pending mints against the oracle and
    /// complete any whose quote has been paid
    #[instrument(skip(self))]
    pub async fn check_pending_receipts(&self, user_key: &str) -> Result<PendingReceipts, Error> {
        let user_key = validate_user_key(user_key)?;
        self.gate().admit_spend(&user_key).await?;

        let lookback = purse_common::util::unix_time()
            .saturating_sub(self.config().pending_lookback_secs);
        let pending = self
            .localstore()
            .find_pending_mints(
                &user_key,
                purse_common::database::PendingWindow::NewerThan(lookback),
            )
            .await?;

        let mut report = PendingReceipts {
            checked: 0,
            completed: 0,
            receipts: Vec::new(),
        };

        if pending.is_empty() {
            return Ok(report);
        }

        let handle = self.open_handle().await?;

        for entry in pending {
            let Some(quote_id) = entry.metadata.quote_id.clone() else {
                tracing::warn!("Pending entry {} has no quote id", entry.id);
                continue;
            };
            let amount = entry.metadata.mint_amount.unwrap_or(Amount::ZERO);

            report.checked += 1;

            let status = match with_retry(|| handle.get_mint_quote_status(&quote_id)).await {
                Ok(status) => status,
                Err(err) => {
                    tracing::warn!("Receipt check for quote {} failed: {}", quote_id, err);
                    continue;
                }
            };

            if status.state != QuoteState::Paid {
                continue;
            }

            match self
                .complete_mint_with_method(
                    &user_key,
                    &quote_id,
                    amount,
                    entry.transaction_id,
                    CompletionMethod::ReceiptCheck,
                )
                .await
            {
                Ok(completed) => {
                    report.completed += 1;
                    report.receipts.push(completed);
                }
                Err(err) => {
                    tracing::warn!("Receipt completion for quote {} failed: {}", quote_id, err);
                }
            }
        }

        Ok(report)
    }
}
