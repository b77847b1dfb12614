//! Melt flow: proofs in, Lightning out
//!
//! The only path that runs pre-flight reconciliation: the proofs about to
//! be melted are checked against the oracle first, and high severity
//! divergence refuses the melt outright. The oracle is done before the
//! atomic ledger commit opens, so no suspension happens inside it.

use std::str::FromStr;

use purse_common::ledger::{EntryId, EntryMetadata, TransactionId};
use purse_common::protocol::{MeltQuoteRequest, MeltRequest, QuoteState, SwapRequest};
use purse_common::{Bolt11Invoice, Error, Proofs, ProofsMethods};
use tracing::instrument;

use super::Coordinator;
use crate::reconcile;
use crate::types::MeltResult;
use crate::validation::{validate_amount, validate_user_key};

impl Coordinator {
    /// Pay a Lightning invoice with ecash
    #[instrument(skip(self, invoice))]
    pub async fn melt(&self, user_key: &str, invoice: &str) -> Result<MeltResult, Error> {
        let user_key = validate_user_key(user_key)?;
        let _parsed = Bolt11Invoice::from_str(invoice)?;
        self.gate().admit_spend(&user_key).await?;

        let handle = self.open_handle().await?;

        let quote = handle
            .post_melt_quote(MeltQuoteRequest {
                request: invoice.to_string(),
                unit: "sat".to_string(),
            })
            .await?;
        validate_amount(quote.amount, self.config())?;

        let need = quote
            .amount
            .checked_add(quote.fee_reserve)
            .ok_or_else(|| Error::Custom("Melt amount overflow".to_string()))?;

        let selection = self
            .localstore()
            .select_for_spend(&user_key, &self.config().mint_url, need)
            .await?;
        let source_ids: Vec<EntryId> = selection.entries.iter().map(|e| e.id).collect();

        // refuse before any proof leaves the wallet when the oracle and the
        // ledger disagree on what we are about to spend
        reconcile::preflight(&handle, self.localstore(), &selection.entries).await?;

        let inputs: Proofs = selection
            .entries
            .iter()
            .flat_map(|e| e.proofs.clone())
            .collect();

        let swap = handle
            .post_swap(SwapRequest {
                inputs,
                amount: need,
                include_fees: true,
                pubkey: None,
            })
            .await?;

        let transaction_id = TransactionId::new();

        // the swap consumed the source proofs; whatever happens to the
        // payment, the ledger must record them spent from here on
        let melt_response = handle
            .post_melt(MeltRequest {
                quote: quote.quote.clone(),
                inputs: swap.send.clone(),
            })
            .await;

        match melt_response {
            Ok(response) if response.state == QuoteState::Paid => {
                let mut metadata = EntryMetadata::from_source("melt");
                metadata.quote_id = Some(quote.quote.clone());
                metadata.invoice = Some(invoice.to_string());
                metadata.fee_reserve = Some(quote.fee_reserve);
                metadata.payment_result = Some(response.state.to_string());
                metadata.preimage = response.preimage.clone();

                let change_amount = response.change.total_amount();

                if let Err(err) = self
                    .localstore()
                    .execute_atomic_melt(
                        &source_ids,
                        swap.keep,
                        response.change,
                        transaction_id,
                        metadata,
                    )
                    .await
                {
                    let critical = Error::DbFailureAfterMintSuccess {
                        quote_id: quote.quote.clone(),
                        transaction_id,
                        payment_result: response.state.to_string(),
                        detail: err.to_string(),
                    };
                    tracing::error!("{}", critical);
                    return Err(critical);
                }

                tracing::info!(
                    "Melted {} for {}: paid {}, reserve {}, change {}",
                    need,
                    user_key,
                    quote.amount,
                    quote.fee_reserve,
                    change_amount
                );

                Ok(MeltResult {
                    transaction_id,
                    payment_result: response.state,
                    paid_amount: quote.amount,
                    fees_paid: quote.fee_reserve,
                    change_amount,
                    preimage: response.preimage,
                })
            }
            Ok(response) if response.state == QuoteState::Pending => {
                // payment in flight: the send proofs stay with the mint,
                // only the swap change comes back to the wallet
                let mut metadata = EntryMetadata::from_source("melt");
                metadata.quote_id = Some(quote.quote.clone());
                metadata.invoice = Some(invoice.to_string());
                metadata.fee_reserve = Some(quote.fee_reserve);
                metadata.payment_result = Some(response.state.to_string());

                self.localstore()
                    .execute_atomic_melt(
                        &source_ids,
                        swap.keep,
                        Vec::new(),
                        transaction_id,
                        metadata,
                    )
                    .await?;

                Ok(MeltResult {
                    transaction_id,
                    payment_result: response.state,
                    paid_amount: quote.amount,
                    fees_paid: quote.fee_reserve,
                    change_amount: purse_common::Amount::ZERO,
                    preimage: None,
                })
            }
            Ok(response) => {
                // payment refused: reclaim the send proofs alongside the
                // swap change, the sources are still gone
                self.reclaim_after_failed_payment(
                    &source_ids,
                    swap.keep,
                    swap.send,
                    transaction_id,
                    &quote.quote,
                    invoice,
                    response.state.to_string(),
                )
                .await?;

                Err(Error::PaymentFailed {
                    state: response.state,
                })
            }
            Err(err) => {
                // outcome unknown: reclaim optimistically and let the next
                // pre-flight correct the ledger if the payment went through
                tracing::error!(
                    "Melt of quote {} errored after swap, reclaiming proofs: {}",
                    quote.quote,
                    err
                );
                self.reclaim_after_failed_payment(
                    &source_ids,
                    swap.keep,
                    swap.send,
                    transaction_id,
                    &quote.quote,
                    invoice,
                    format!("error: {err}"),
                )
                .await?;

                Err(err)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn reclaim_after_failed_payment(
        &self,
        source_ids: &[EntryId],
        keep: Proofs,
        send: Proofs,
        transaction_id: TransactionId,
        quote_id: &str,
        invoice: &str,
        payment_result: String,
    ) -> Result<(), Error> {
        let mut reclaimed = keep;
        reclaimed.extend(send);

        let mut metadata = EntryMetadata::from_source("melt");
        metadata.quote_id = Some(quote_id.to_string());
        metadata.invoice = Some(invoice.to_string());
        metadata.payment_result = Some(payment_result);

        self.localstore()
            .execute_atomic_melt(source_ids, reclaimed, Vec::new(), transaction_id, metadata)
            .await?;

        Ok(())
    }
}
