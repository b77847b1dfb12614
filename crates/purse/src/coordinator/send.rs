//! Send flow: proofs out as an encoded token

use purse_common::ledger::{EntryId, EntryKind, EntryMetadata, EntryStatus, LedgerEntry, TransactionId};
use purse_common::protocol::SwapRequest;
use purse_common::{Amount, Error, Proofs, ProofsMethods, Token};
use tracing::instrument;

use super::Coordinator;
use crate::types::SendResult;
use crate::validation::{validate_amount, validate_user_key};

impl Coordinator {
    /// Send ecash: select proofs, swap them at the mint for an exact split
    /// and commit the spend atomically
    #[instrument(skip(self, recipient_pubkey))]
    pub async fn send(
        &self,
        user_key: &str,
        amount: Amount,
        recipient_pubkey: Option<String>,
    ) -> Result<SendResult, Error> {
        let user_key = validate_user_key(user_key)?;
        validate_amount(amount, self.config())?;
        let wallet = self.gate().admit_spend(&user_key).await?;

        let selection = self
            .localstore()
            .select_for_spend(&user_key, &self.config().mint_url, amount)
            .await?;
        let source_ids: Vec<EntryId> = selection.entries.iter().map(|e| e.id).collect();
        let inputs: Proofs = selection
            .entries
            .iter()
            .flat_map(|e| e.proofs.clone())
            .collect();

        let handle = self.open_handle().await?;

        let swap = handle
            .post_swap(SwapRequest {
                inputs,
                amount,
                include_fees: false,
                pubkey: recipient_pubkey.clone(),
            })
            .await?;

        let transaction_id = TransactionId::new();

        let mut sent_metadata = EntryMetadata::from_source("send");
        sent_metadata.recipient = recipient_pubkey.clone();

        let sent_entry = LedgerEntry::with_proofs(
            user_key.clone(),
            wallet.id,
            self.config().mint_url.clone(),
            transaction_id,
            EntryKind::Sent,
            EntryStatus::Spent,
            swap.send.clone(),
            sent_metadata,
        );

        let change_amount = swap.keep.total_amount();
        let change_entry = (!swap.keep.is_empty()).then(|| {
            LedgerEntry::with_proofs(
                user_key.clone(),
                wallet.id,
                self.config().mint_url.clone(),
                transaction_id,
                EntryKind::Change,
                EntryStatus::Unspent,
                swap.keep,
                EntryMetadata::from_source("send"),
            )
        });

        self.localstore()
            .execute_atomic_send(&source_ids, sent_entry, change_entry)
            .await?;

        let token = Token::new(
            self.config().mint_url.clone(),
            swap.send,
            recipient_pubkey,
            None,
        )?;

        tracing::info!(
            "Sent {} for {}: transaction {}, change {}",
            amount,
            user_key,
            transaction_id,
            change_amount
        );

        Ok(SendResult {
            encoded_token: token.to_string(),
            transaction_id,
            change_amount,
        })
    }
}
