//! Send and receive flows over the proof ledger

mod common;

use std::str::FromStr;

use common::{fund_wallet, setup, OTHER_USER, USER};
use purse::{Amount, Token};
use purse_common::database::HistoryFilter;
use purse_common::ledger::{EntryKind, EntryStatus};
use purse_common::ProofsMethods;

#[tokio::test]
async fn test_send_with_change() {
    let (coordinator, fake, _db) = setup();
    fund_wallet(&coordinator, &fake, USER, 150).await;

    let result = coordinator.send(USER, Amount::from(40), None).await.unwrap();
    assert_eq!(result.change_amount, Amount::from(110));

    let token = Token::from_str(&result.encoded_token).unwrap();
    assert_eq!(token.total_amount(), Amount::from(40));
    assert_eq!(token.mint, coordinator.config().mint_url);

    // original entry spent, sent recorded, change unspent
    let history = coordinator
        .get_history(USER, HistoryFilter::default())
        .await
        .unwrap();

    let minted = history
        .entries
        .iter()
        .find(|e| e.kind == EntryKind::Minted)
        .unwrap();
    assert_eq!(minted.status, EntryStatus::Spent);
    assert!(minted.spent_at.is_some());

    let sent = history
        .entries
        .iter()
        .find(|e| e.kind == EntryKind::Sent)
        .unwrap();
    assert_eq!(sent.status, EntryStatus::Spent);
    assert_eq!(sent.total_amount, Amount::from(40));
    assert_eq!(sent.transaction_id, result.transaction_id);

    let change = history
        .entries
        .iter()
        .find(|e| e.kind == EntryKind::Change)
        .unwrap();
    assert_eq!(change.status, EntryStatus::Unspent);
    assert_eq!(change.total_amount, Amount::from(110));
    assert_eq!(change.transaction_id, result.transaction_id);

    assert_eq!(
        coordinator.get_balance(USER).await.unwrap().total,
        Amount::from(110)
    );
}

#[tokio::test]
async fn test_send_insufficient_funds() {
    let (coordinator, fake, _db) = setup();
    fund_wallet(&coordinator, &fake, USER, 30).await;

    let result = coordinator.send(USER, Amount::from(40), None).await;
    assert!(matches!(
        result,
        Err(purse::Error::Database(
            purse_common::database::Error::InsufficientFunds { .. }
        ))
    ));

    // nothing moved
    assert_eq!(
        coordinator.get_balance(USER).await.unwrap().total,
        Amount::from(30)
    );
}

#[tokio::test]
async fn test_receive_credits_recipient() {
    let (coordinator, fake, _db) = setup();
    fund_wallet(&coordinator, &fake, USER, 100).await;

    let sent = coordinator.send(USER, Amount::from(40), None).await.unwrap();

    // the recipient has no wallet yet; receive materializes one
    let received = coordinator
        .receive(OTHER_USER, &sent.encoded_token, None)
        .await
        .unwrap();
    assert_eq!(received.total_amount, Amount::from(40));

    let balance = coordinator.get_balance(OTHER_USER).await.unwrap();
    assert_eq!(balance.total, Amount::from(40));

    let history = coordinator
        .get_history(OTHER_USER, HistoryFilter::default())
        .await
        .unwrap();
    assert_eq!(history.entries.len(), 1);
    assert_eq!(history.entries[0].kind, EntryKind::Received);
    assert_eq!(history.entries[0].metadata.source, "receive");
}

#[tokio::test]
async fn test_receive_same_token_twice_rejected() {
    let (coordinator, fake, _db) = setup();
    fund_wallet(&coordinator, &fake, USER, 100).await;

    let sent = coordinator.send(USER, Amount::from(40), None).await.unwrap();

    coordinator
        .receive(OTHER_USER, &sent.encoded_token, None)
        .await
        .unwrap();

    // the mint refuses the second swap of the same proofs
    let result = coordinator.receive(OTHER_USER, &sent.encoded_token, None).await;
    assert!(matches!(result, Err(purse::Error::Mint(_))));

    assert_eq!(
        coordinator.get_balance(OTHER_USER).await.unwrap().total,
        Amount::from(40)
    );
}

#[tokio::test]
async fn test_receive_rejects_foreign_mint_token() {
    let (coordinator, _fake, _db) = setup();

    let token = Token::new(
        purse::MintUrl::from_str("https://other-mint.test").unwrap(),
        vec![purse::Proof {
            amount: Amount::from(8),
            secret: "foreign".to_string(),
            c: "02aa".to_string(),
            keyset_id: "00aaaaaaaaaaaaaa".to_string(),
            witness: None,
        }],
        None,
        None,
    )
    .unwrap();

    let result = coordinator.receive(USER, &token.to_string(), None).await;
    assert!(matches!(result, Err(purse::Error::MintMismatch)));
}

#[tokio::test]
async fn test_locked_send_receive_round_trip() {
    let (coordinator, fake, _db) = setup();
    fund_wallet(&coordinator, &fake, USER, 64).await;

    let recipient = coordinator.create_wallet(OTHER_USER).await.unwrap();
    let sent = coordinator
        .send(USER, Amount::from(16), Some(recipient.p2pk_pubkey.clone()))
        .await
        .unwrap();

    let token = Token::from_str(&sent.encoded_token).unwrap();
    assert_eq!(token.pubkey.as_deref(), Some(recipient.p2pk_pubkey.as_str()));

    // the recipient's stored key unlocks the token
    let received = coordinator
        .receive(OTHER_USER, &sent.encoded_token, None)
        .await
        .unwrap();
    assert_eq!(received.total_amount, Amount::from(16));
}

#[tokio::test]
async fn test_no_duplicate_unspent_secrets_across_flows() {
    let (coordinator, fake, db) = setup();
    fund_wallet(&coordinator, &fake, USER, 100).await;

    coordinator.send(USER, Amount::from(30), None).await.unwrap();
    coordinator.send(USER, Amount::from(20), None).await.unwrap();

    let user = USER.parse().unwrap();
    let mint_url = coordinator.config().mint_url.clone();

    use purse_common::database::LedgerDatabase;
    let unspent = db.find_unspent(&user, &mint_url).await.unwrap();

    let secrets: Vec<String> = unspent.iter().flat_map(|e| e.proofs.secrets()).collect();
    let unique: std::collections::HashSet<&String> = secrets.iter().collect();
    assert_eq!(secrets.len(), unique.len());

    // balance law: total equals the sum over unspent entries
    let balance = coordinator.get_balance(USER).await.unwrap();
    let sum: Amount = unspent.iter().map(|e| e.total_amount).sum();
    assert_eq!(balance.total, sum);
    assert_eq!(balance.total, Amount::from(50));
}
