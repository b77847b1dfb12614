#![allow(dead_code)]

//! Shared harness for coordinator tests

use std::str::FromStr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use bitcoin::hashes::{sha256, Hash};
use bitcoin::secp256k1::{Secp256k1, SecretKey};
use lightning_invoice::{Currency, InvoiceBuilder, PaymentSecret};
use purse::database::LedgerMemoryDatabase;
use purse::test_utils::{FakeConnectorFactory, FakeMintConnector, FAKE_MINT_URL};
use purse::types::CompletedMint;
use purse::{Config, Coordinator, LocalStore, MintUrl};
use purse_common::secrets::InsecureCipher;

pub const USER: &str = "7e7e9c42a91bfef19fa929e5fda1b72e0ebc1a4c1141673e2794234d86addf4e";
pub const OTHER_USER: &str = "82341f882b6eabcd2ba7f1ef90aad961cf074af15b9ef44a09f9d2a8fbfbe6a2";

pub fn setup() -> (Coordinator, Arc<FakeMintConnector>, LedgerMemoryDatabase) {
    setup_with_config(Config::for_mint(
        MintUrl::from_str(FAKE_MINT_URL).expect("static url"),
    ))
}

pub fn setup_with_config(
    config: Config,
) -> (Coordinator, Arc<FakeMintConnector>, LedgerMemoryDatabase) {
    let db = LedgerMemoryDatabase::default();
    let store: LocalStore = Arc::new(db.clone());
    let fake = Arc::new(FakeMintConnector::new());
    let coordinator = Coordinator::new(
        config,
        store,
        Arc::new(FakeConnectorFactory::new(fake.clone())),
        Arc::new(InsecureCipher),
    );

    (coordinator, fake, db)
}

/// Mint `amount` for `user` and complete it explicitly, returning the
/// completion
pub async fn fund_wallet(
    coordinator: &Coordinator,
    fake: &FakeMintConnector,
    user: &str,
    amount: u64,
) -> CompletedMint {
    coordinator.create_wallet(user).await.expect("wallet");
    let pending = coordinator
        .mint(user, purse::Amount::from(amount))
        .await
        .expect("mint");
    fake.mark_paid(&pending.quote_id).await;

    coordinator
        .complete_mint(
            user,
            &pending.quote_id,
            purse::Amount::from(amount),
            &pending.transaction_id.to_string(),
        )
        .await
        .expect("complete")
}

/// Properly signed bolt11 invoice for tests
pub fn test_invoice(amount_msat: u64) -> String {
    let private_key = SecretKey::from_slice(&[41; 32]).expect("static key");
    let payment_hash = sha256::Hash::hash(&amount_msat.to_be_bytes());
    let payment_secret = PaymentSecret([42; 32]);

    let invoice = InvoiceBuilder::new(Currency::Bitcoin)
        .description("purse test".into())
        .payment_hash(payment_hash)
        .payment_secret(payment_secret)
        .duration_since_epoch(
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .expect("epoch"),
        )
        .min_final_cltv_expiry_delta(144)
        .amount_milli_satoshis(amount_msat)
        .build_signed(|hash| Secp256k1::new().sign_ecdsa_recoverable(hash, &private_key))
        .expect("signed invoice");

    invoice.to_string()
}
