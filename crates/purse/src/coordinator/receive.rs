//! Receive flow: claim an encoded token into the wallet

use std::str::FromStr;

use bitcoin::hashes::{sha256, Hash};
use bitcoin::secp256k1::{Keypair, Message, Secp256k1, SecretKey};
use purse_common::ledger::{EntryKind, EntryMetadata, EntryStatus, LedgerEntry, TransactionId};
use purse_common::protocol::SwapRequest;
use purse_common::wallet::WalletOrigin;
use purse_common::{Error, Proofs, ProofsMethods, Token};
use tracing::instrument;

use super::Coordinator;
use crate::types::ReceiveResult;
use crate::validation::validate_user_key;

impl Coordinator {
    /// Receive ecash: decode the token, swap its proofs at the mint and
    /// store the fresh proofs under the user's wallet
    ///
    /// Locked tokens are unlocked with the supplied p2pk private key, or
    /// with the wallet's own key when the token is locked to it.
    #[instrument(skip(self, encoded_token, p2pk_privkey))]
    pub async fn receive(
        &self,
        user_key: &str,
        encoded_token: &str,
        p2pk_privkey: Option<String>,
    ) -> Result<ReceiveResult, Error> {
        let user_key = validate_user_key(user_key)?;
        let token = Token::from_str(encoded_token)?;

        if token.mint != self.config().mint_url {
            return Err(Error::MintMismatch);
        }

        // receiving is the one path that materializes a wallet on demand
        let wallet = self.ensure_wallet(&user_key, WalletOrigin::OnDemand).await?;

        let mut inputs = token.proofs;
        if token.pubkey.is_some() {
            let privkey = match p2pk_privkey {
                Some(privkey) => privkey,
                None => {
                    let bytes = self.decrypt_wallet_privkey(&wallet)?;
                    bytes.iter().map(|b| format!("{b:02x}")).collect()
                }
            };
            sign_inputs(&mut inputs, &privkey)?;
        }

        let amount = inputs.total_amount();
        let handle = self.open_handle().await?;

        let swap = handle
            .post_swap(SwapRequest {
                inputs,
                amount,
                include_fees: false,
                pubkey: None,
            })
            .await?;

        let mut received: Proofs = swap.send;
        received.extend(swap.keep);

        let transaction_id = TransactionId::new();
        let entry = LedgerEntry::with_proofs(
            user_key.clone(),
            wallet.id,
            self.config().mint_url.clone(),
            transaction_id,
            EntryKind::Received,
            EntryStatus::Unspent,
            received,
            EntryMetadata::from_source("receive"),
        );
        let total_amount = entry.total_amount;

        self.localstore().store_entry(entry).await?;

        tracing::info!(
            "Received {} for {}: transaction {}",
            total_amount,
            user_key,
            transaction_id
        );

        Ok(ReceiveResult {
            transaction_id,
            total_amount,
        })
    }

    fn decrypt_wallet_privkey(
        &self,
        wallet: &purse_common::wallet::WalletRecord,
    ) -> Result<Vec<u8>, Error> {
        Ok(self.cipher().decrypt(&wallet.p2pk_privkey_enc)?)
    }
}

/// Attach a p2pk unlock witness to every proof
fn sign_inputs(proofs: &mut Proofs, privkey_hex: &str) -> Result<(), Error> {
    let secret_key = SecretKey::from_str(privkey_hex)
        .map_err(|e| Error::Custom(format!("Invalid p2pk private key: {e}")))?;
    let secp = Secp256k1::new();
    let keypair = Keypair::from_secret_key(&secp, &secret_key);

    for proof in proofs {
        let digest = sha256::Hash::hash(proof.secret.as_bytes());
        let message = Message::from_digest(digest.to_byte_array());
        let signature = secp.sign_schnorr(&message, &keypair);
        proof.witness = Some(signature.to_string());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use purse_common::proofs::Proof;
    use purse_common::Amount;

    use super::*;

    #[test]
    fn test_sign_inputs_attaches_witness() {
        let mut proofs = vec![Proof {
            amount: Amount::from(8),
            secret: "secret".to_string(),
            c: "02aa".to_string(),
            keyset_id: "00ad268c4d1f5826".to_string(),
            witness: None,
        }];

        sign_inputs(
            &mut proofs,
            "7e7e9c42a91bfef19fa929e5fda1b72e0ebc1a4c1141673e2794234d86addf4e",
        )
        .unwrap();

        assert!(proofs[0].witness.is_some());
    }

    #[test]
    fn test_sign_inputs_rejects_bad_key() {
        let mut proofs = Vec::new();
        assert!(sign_inputs(&mut proofs, "zz").is_err());
    }
}
