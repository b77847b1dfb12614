//! Memory ledger store

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use purse_common::database::{
    Error, HistoryFilter, HistoryPage, LedgerDatabase, MeltCommit, Pagination, PendingUpdate,
    PendingWindow, SpendSelection,
};
use purse_common::ledger::{
    Balance, EntryId, EntryKind, EntryMetadata, EntryStatus, LedgerEntry, TransactionId,
};
use purse_common::proofs::ProofsMethods;
use purse_common::util::unix_time;
use purse_common::wallet::{WalletKey, WalletRecord};
use purse_common::{Amount, MintUrl, Proofs, UserKey};
use tokio::sync::RwLock;

/// In-memory ledger database
///
/// Entries are kept in insertion order; every mutating method takes the
/// write lock for its full extent, which is what makes the multi-row
/// units atomic here.
#[derive(Debug, Default, Clone)]
pub struct LedgerMemoryDatabase {
    inner: Arc<RwLock<Inner>>,
}

#[derive(Debug, Default)]
struct Inner {
    wallets: HashMap<WalletKey, WalletRecord>,
    entries: Vec<LedgerEntry>,
}

impl Inner {
    fn position(&self, entry_id: &EntryId) -> Option<usize> {
        self.entries.iter().position(|e| &e.id == entry_id)
    }

    /// Secret held by another unspent entry of the same user
    fn unspent_secret_conflict(&self, candidate: &LedgerEntry) -> Option<String> {
        for entry in &self.entries {
            if entry.id == candidate.id
                || entry.status != EntryStatus::Unspent
                || entry.user_key != candidate.user_key
            {
                continue;
            }
            for proof in &candidate.proofs {
                if entry.proofs.iter().any(|p| p.secret == proof.secret) {
                    return Some(proof.secret.clone());
                }
            }
        }
        None
    }

    fn check_insertable(&self, entry: &LedgerEntry) -> Result<(), Error> {
        entry.validate().map_err(Error::InvariantViolation)?;

        if self.position(&entry.id).is_some() {
            return Err(Error::DuplicateEntry(entry.id));
        }

        if entry.status == EntryStatus::Unspent {
            if let Some(secret) = self.unspent_secret_conflict(entry) {
                return Err(Error::InvariantViolation(format!(
                    "proof secret `{secret}` already held by an unspent entry"
                )));
            }
        }

        Ok(())
    }

    /// Check that every source exists and is unspent; returns positions
    fn check_spendable(&self, entry_ids: &[EntryId]) -> Result<Vec<usize>, Error> {
        let mut positions = Vec::with_capacity(entry_ids.len());
        for entry_id in entry_ids {
            let pos = self
                .position(entry_id)
                .ok_or(Error::EntryNotFound(*entry_id))?;
            let entry = &self.entries[pos];
            if entry.status != EntryStatus::Unspent {
                return Err(Error::InvalidStateTransition {
                    from: entry.status,
                    to: EntryStatus::Spent,
                });
            }
            positions.push(pos);
        }
        Ok(positions)
    }

    fn spend_positions(&mut self, positions: &[usize]) {
        let now = unix_time();
        for &pos in positions {
            let entry = &mut self.entries[pos];
            entry.status = EntryStatus::Spent;
            entry.spent_at = Some(now);
        }
    }
}

#[async_trait]
impl LedgerDatabase for LedgerMemoryDatabase {
    type Err = Error;

    async fn create_wallet(&self, wallet: WalletRecord) -> Result<(), Self::Err> {
        let mut inner = self.inner.write().await;
        let key = wallet.key();
        if inner.wallets.contains_key(&key) {
            return Err(Error::WalletAlreadyExists);
        }
        inner.wallets.insert(key, wallet);
        Ok(())
    }

    async fn find_wallet(
        &self,
        user_key: &UserKey,
        mint_url: &MintUrl,
    ) -> Result<Option<WalletRecord>, Self::Err> {
        let inner = self.inner.read().await;
        Ok(inner
            .wallets
            .get(&WalletKey::new(user_key.clone(), mint_url.clone()))
            .cloned())
    }

    async fn store_entry(&self, entry: LedgerEntry) -> Result<(), Self::Err> {
        let mut inner = self.inner.write().await;
        inner.check_insertable(&entry)?;
        inner.entries.push(entry);
        Ok(())
    }

    async fn find_entry(&self, entry_id: &EntryId) -> Result<Option<LedgerEntry>, Self::Err> {
        let inner = self.inner.read().await;
        Ok(inner.position(entry_id).map(|pos| inner.entries[pos].clone()))
    }

    async fn find_entries(
        &self,
        user_key: &UserKey,
        mint_url: &MintUrl,
    ) -> Result<Vec<LedgerEntry>, Self::Err> {
        let inner = self.inner.read().await;
        Ok(inner
            .entries
            .iter()
            .filter(|e| &e.user_key == user_key && &e.mint_url == mint_url)
            .cloned()
            .collect())
    }

    async fn find_unspent(
        &self,
        user_key: &UserKey,
        mint_url: &MintUrl,
    ) -> Result<Vec<LedgerEntry>, Self::Err> {
        let inner = self.inner.read().await;
        Ok(inner
            .entries
            .iter()
            .filter(|e| {
                e.status == EntryStatus::Unspent
                    && &e.user_key == user_key
                    && &e.mint_url == mint_url
            })
            .cloned()
            .collect())
    }

    async fn find_by_transaction_id(
        &self,
        transaction_id: &TransactionId,
    ) -> Result<Vec<LedgerEntry>, Self::Err> {
        let inner = self.inner.read().await;
        Ok(inner
            .entries
            .iter()
            .filter(|e| &e.transaction_id == transaction_id)
            .cloned()
            .collect())
    }

    async fn find_pending_mints(
        &self,
        user_key: &UserKey,
        window: PendingWindow,
    ) -> Result<Vec<LedgerEntry>, Self::Err> {
        let inner = self.inner.read().await;
        Ok(inner
            .entries
            .iter()
            .filter(|e| {
                e.status == EntryStatus::Pending
                    && e.kind == EntryKind::Minted
                    && &e.user_key == user_key
                    && match window {
                        PendingWindow::OlderThan(cutoff) => e.created_at < cutoff,
                        PendingWindow::NewerThan(cutoff) => e.created_at >= cutoff,
                    }
            })
            .cloned()
            .collect())
    }

    async fn find_pending_older_than(&self, cutoff: u64) -> Result<Vec<LedgerEntry>, Self::Err> {
        let inner = self.inner.read().await;
        Ok(inner
            .entries
            .iter()
            .filter(|e| {
                e.status == EntryStatus::Pending
                    && e.kind == EntryKind::Minted
                    && e.created_at < cutoff
            })
            .cloned()
            .collect())
    }

    async fn count_pending_mints(
        &self,
        user_key: &UserKey,
        newer_than: u64,
    ) -> Result<usize, Self::Err> {
        Ok(self
            .find_pending_mints(user_key, PendingWindow::NewerThan(newer_than))
            .await?
            .len())
    }

    async fn update_pending(
        &self,
        entry_id: &EntryId,
        update: PendingUpdate,
    ) -> Result<LedgerEntry, Self::Err> {
        let mut inner = self.inner.write().await;
        let pos = inner
            .position(entry_id)
            .ok_or(Error::EntryNotFound(*entry_id))?;

        let target = match update {
            PendingUpdate::Complete { .. } => EntryStatus::Unspent,
            PendingUpdate::Fail { .. } => EntryStatus::Failed,
        };

        let current = inner.entries[pos].status;
        if !current.can_transition_to(target) {
            return Err(Error::InvalidStateTransition {
                from: current,
                to: target,
            });
        }

        let mut updated = inner.entries[pos].clone();
        let now = unix_time();

        match update {
            PendingUpdate::Complete {
                proofs,
                method,
                minted_amount,
            } => {
                updated.status = EntryStatus::Unspent;
                updated.total_amount = proofs.total_amount();
                updated.metadata.completed_at = Some(now);
                updated.metadata.completion_method = Some(method);
                updated.metadata.minted_amount = Some(minted_amount);
                updated.metadata.proof_count = Some(proofs.len());
                updated.proofs = proofs;
            }
            PendingUpdate::Fail { reason } => {
                updated.status = EntryStatus::Failed;
                updated.metadata.failure_reason = Some(reason);
                updated.metadata.failed_at = Some(now);
            }
        }

        updated.validate().map_err(Error::InvariantViolation)?;

        if updated.status == EntryStatus::Unspent {
            if let Some(secret) = inner.unspent_secret_conflict(&updated) {
                return Err(Error::InvariantViolation(format!(
                    "proof secret `{secret}` already held by an unspent entry"
                )));
            }
        }

        inner.entries[pos] = updated.clone();
        Ok(updated)
    }

    async fn mark_spent(&self, entry_ids: &[EntryId]) -> Result<usize, Self::Err> {
        let mut inner = self.inner.write().await;
        let now = unix_time();
        let mut count = 0;

        for entry_id in entry_ids {
            if let Some(pos) = inner.position(entry_id) {
                let entry = &mut inner.entries[pos];
                if entry.status == EntryStatus::Unspent {
                    entry.status = EntryStatus::Spent;
                    entry.spent_at = Some(now);
                    count += 1;
                }
            }
        }

        Ok(count)
    }

    async fn select_for_spend(
        &self,
        user_key: &UserKey,
        mint_url: &MintUrl,
        amount: Amount,
    ) -> Result<SpendSelection, Self::Err> {
        let inner = self.inner.read().await;

        let unspent: Vec<&LedgerEntry> = inner
            .entries
            .iter()
            .filter(|e| {
                e.status == EntryStatus::Unspent
                    && &e.user_key == user_key
                    && &e.mint_url == mint_url
            })
            .collect();

        let available: Amount = unspent.iter().map(|e| e.total_amount).sum();
        if available < amount {
            return Err(Error::InsufficientFunds {
                available,
                required: amount,
            });
        }

        let mut entries = Vec::new();
        let mut total_selected = Amount::ZERO;
        for entry in unspent {
            if total_selected >= amount {
                break;
            }
            total_selected += entry.total_amount;
            entries.push(entry.clone());
        }

        Ok(SpendSelection {
            entries,
            total_selected,
            change_amount: total_selected - amount,
        })
    }

    async fn execute_atomic_send(
        &self,
        source_entry_ids: &[EntryId],
        sent_entry: LedgerEntry,
        change_entry: Option<LedgerEntry>,
    ) -> Result<(), Self::Err> {
        let mut inner = self.inner.write().await;

        let positions = inner.check_spendable(source_entry_ids)?;
        inner.check_insertable(&sent_entry)?;
        if let Some(change) = &change_entry {
            inner.check_insertable(change)?;
        }

        inner.spend_positions(&positions);
        inner.entries.push(sent_entry);
        if let Some(change) = change_entry {
            inner.entries.push(change);
        }

        Ok(())
    }

    async fn execute_atomic_melt(
        &self,
        source_entry_ids: &[EntryId],
        keep_proofs: Proofs,
        melt_change_proofs: Proofs,
        transaction_id: TransactionId,
        common_metadata: EntryMetadata,
    ) -> Result<MeltCommit, Self::Err> {
        let mut inner = self.inner.write().await;

        let positions = inner.check_spendable(source_entry_ids)?;
        let template = &inner.entries[positions[0]];
        let (user_key, wallet_id, mint_url) = (
            template.user_key.clone(),
            template.wallet_id,
            template.mint_url.clone(),
        );

        let change_entry = (!keep_proofs.is_empty()).then(|| {
            LedgerEntry::with_proofs(
                user_key.clone(),
                wallet_id,
                mint_url.clone(),
                transaction_id,
                EntryKind::Change,
                EntryStatus::Unspent,
                keep_proofs,
                common_metadata.clone(),
            )
        });

        let melt_change_entry = (!melt_change_proofs.is_empty()).then(|| {
            LedgerEntry::with_proofs(
                user_key,
                wallet_id,
                mint_url,
                transaction_id,
                EntryKind::MeltChange,
                EntryStatus::Unspent,
                melt_change_proofs,
                common_metadata,
            )
        });

        if let Some(entry) = &change_entry {
            inner.check_insertable(entry)?;
        }
        if let Some(entry) = &melt_change_entry {
            inner.check_insertable(entry)?;
        }

        inner.spend_positions(&positions);
        if let Some(entry) = &change_entry {
            inner.entries.push(entry.clone());
        }
        if let Some(entry) = &melt_change_entry {
            inner.entries.push(entry.clone());
        }

        Ok(MeltCommit {
            spent: positions.len(),
            change_entry,
            melt_change_entry,
        })
    }

    async fn get_history(
        &self,
        user_key: &UserKey,
        filter: HistoryFilter,
    ) -> Result<HistoryPage, Self::Err> {
        let inner = self.inner.read().await;

        let mut invalid_filtered = 0;
        let mut matching: Vec<LedgerEntry> = Vec::new();

        for entry in inner.entries.iter().filter(|e| &e.user_key == user_key) {
            if let Some(kind) = filter.kind {
                if entry.kind != kind {
                    continue;
                }
            }
            if let Some(mint_url) = &filter.mint_url {
                if &entry.mint_url != mint_url {
                    continue;
                }
            }

            if entry.validate().is_err() {
                invalid_filtered += 1;
                continue;
            }

            matching.push(entry.clone());
        }

        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let total = matching.len();
        let entries: Vec<LedgerEntry> = matching
            .into_iter()
            .skip(filter.skip)
            .take(filter.limit)
            .collect();
        let has_more = filter.skip + entries.len() < total;

        Ok(HistoryPage {
            entries,
            pagination: Pagination {
                total,
                invalid_filtered,
                has_more,
            },
        })
    }

    async fn get_balance(
        &self,
        user_key: &UserKey,
        mint_url: &MintUrl,
    ) -> Result<Balance, Self::Err> {
        let inner = self.inner.read().await;
        let mut balance = Balance::default();

        for entry in inner
            .entries
            .iter()
            .filter(|e| &e.user_key == user_key && &e.mint_url == mint_url)
        {
            match entry.status {
                EntryStatus::Unspent => balance.unspent += entry.total_amount,
                EntryStatus::Spent => balance.spent += entry.total_amount,
                EntryStatus::Pending => {
                    balance.pending += entry.metadata.mint_amount.unwrap_or(Amount::ZERO)
                }
                EntryStatus::Failed => {}
            }
        }

        balance.total = balance.unspent;
        Ok(balance)
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use purse_common::ledger::CompletionMethod;
    use purse_common::proofs::Proof;
    use purse_common::wallet::{WalletId, WalletOrigin};

    use super::*;

    fn user() -> UserKey {
        UserKey::from_str("7e7e9c42a91bfef19fa929e5fda1b72e0ebc1a4c1141673e2794234d86addf4e")
            .unwrap()
    }

    fn mint_url() -> MintUrl {
        MintUrl::from_str("https://mint.example.com").unwrap()
    }

    fn proof(amount: u64, secret: &str) -> Proof {
        Proof {
            amount: Amount::from(amount),
            secret: secret.to_string(),
            c: "02aa".to_string(),
            keyset_id: "00ad268c4d1f5826".to_string(),
            witness: None,
        }
    }

    fn unspent_entry(amount: u64, secret: &str) -> LedgerEntry {
        LedgerEntry::with_proofs(
            user(),
            WalletId::new(),
            mint_url(),
            TransactionId::new(),
            EntryKind::Minted,
            EntryStatus::Unspent,
            vec![proof(amount, secret)],
            EntryMetadata::from_source("mint"),
        )
    }

    #[tokio::test]
    async fn test_wallet_uniqueness() {
        let db = LedgerMemoryDatabase::default();
        let wallet = WalletRecord::new(
            user(),
            mint_url(),
            "02pub".to_string(),
            "enc".to_string(),
            WalletOrigin::Explicit,
        );

        db.create_wallet(wallet.clone()).await.unwrap();
        assert!(matches!(
            db.create_wallet(wallet).await,
            Err(Error::WalletAlreadyExists)
        ));
    }

    #[tokio::test]
    async fn test_duplicate_unspent_secret_rejected() {
        let db = LedgerMemoryDatabase::default();
        db.store_entry(unspent_entry(8, "dup")).await.unwrap();

        assert!(matches!(
            db.store_entry(unspent_entry(4, "dup")).await,
            Err(Error::InvariantViolation(_))
        ));
    }

    #[tokio::test]
    async fn test_mark_spent_idempotent() {
        let db = LedgerMemoryDatabase::default();
        let entry = unspent_entry(8, "a");
        let id = entry.id;
        db.store_entry(entry).await.unwrap();

        assert_eq!(db.mark_spent(&[id]).await.unwrap(), 1);
        assert_eq!(db.mark_spent(&[id]).await.unwrap(), 0);

        let entry = db.find_entry(&id).await.unwrap().unwrap();
        assert_eq!(entry.status, EntryStatus::Spent);
        assert!(entry.spent_at.is_some());
    }

    #[tokio::test]
    async fn test_update_pending_complete() {
        let db = LedgerMemoryDatabase::default();
        let pending = LedgerEntry::pending(
            user(),
            WalletId::new(),
            mint_url(),
            TransactionId::new(),
            EntryKind::Minted,
            EntryMetadata::pending_mint(
                "q1".to_string(),
                Amount::from(100),
                "lnbc1".to_string(),
                None,
            ),
        );
        let id = pending.id;
        db.store_entry(pending).await.unwrap();

        let updated = db
            .update_pending(
                &id,
                PendingUpdate::Complete {
                    proofs: vec![proof(64, "a"), proof(36, "b")],
                    method: CompletionMethod::Poller,
                    minted_amount: Amount::from(100),
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.status, EntryStatus::Unspent);
        assert_eq!(updated.total_amount, Amount::from(100));
        assert_eq!(updated.metadata.proof_count, Some(2));

        // second resolution is an illegal transition
        assert!(matches!(
            db.update_pending(
                &id,
                PendingUpdate::Fail {
                    reason: "late".to_string()
                }
            )
            .await,
            Err(Error::InvalidStateTransition { .. })
        ));
    }

    #[tokio::test]
    async fn test_select_for_spend_greedy_in_order() {
        let db = LedgerMemoryDatabase::default();
        db.store_entry(unspent_entry(50, "a")).await.unwrap();
        db.store_entry(unspent_entry(30, "b")).await.unwrap();
        db.store_entry(unspent_entry(20, "c")).await.unwrap();

        let selection = db
            .select_for_spend(&user(), &mint_url(), Amount::from(60))
            .await
            .unwrap();

        assert_eq!(selection.entries.len(), 2);
        assert_eq!(selection.total_selected, Amount::from(80));
        assert_eq!(selection.change_amount, Amount::from(20));
    }

    #[tokio::test]
    async fn test_select_for_spend_insufficient() {
        let db = LedgerMemoryDatabase::default();
        db.store_entry(unspent_entry(50, "a")).await.unwrap();

        assert!(matches!(
            db.select_for_spend(&user(), &mint_url(), Amount::from(60)).await,
            Err(Error::InsufficientFunds { available, required })
                if available == Amount::from(50) && required == Amount::from(60)
        ));
    }

    #[tokio::test]
    async fn test_atomic_melt_creates_change_entries() {
        let db = LedgerMemoryDatabase::default();
        let source = unspent_entry(1010, "src");
        let source_id = source.id;
        db.store_entry(source).await.unwrap();

        let commit = db
            .execute_atomic_melt(
                &[source_id],
                vec![],
                vec![proof(8, "change")],
                TransactionId::new(),
                EntryMetadata::from_source("melt"),
            )
            .await
            .unwrap();

        assert_eq!(commit.spent, 1);
        assert!(commit.change_entry.is_none());
        let melt_change = commit.melt_change_entry.unwrap();
        assert_eq!(melt_change.kind, EntryKind::MeltChange);
        assert_eq!(melt_change.total_amount, Amount::from(8));

        let balance = db.get_balance(&user(), &mint_url()).await.unwrap();
        assert_eq!(balance.total, Amount::from(8));
        assert_eq!(balance.spent, Amount::from(1010));
    }

    #[tokio::test]
    async fn test_atomic_melt_rejects_spent_source_untouched() {
        let db = LedgerMemoryDatabase::default();
        let source = unspent_entry(100, "src");
        let source_id = source.id;
        db.store_entry(source).await.unwrap();
        db.mark_spent(&[source_id]).await.unwrap();

        let result = db
            .execute_atomic_melt(
                &[source_id],
                vec![],
                vec![proof(8, "change")],
                TransactionId::new(),
                EntryMetadata::from_source("melt"),
            )
            .await;

        assert!(matches!(result, Err(Error::InvalidStateTransition { .. })));

        // no orphan change entry was created
        let balance = db.get_balance(&user(), &mint_url()).await.unwrap();
        assert_eq!(balance.total, Amount::ZERO);
    }

    #[tokio::test]
    async fn test_history_filters_corrupted_rows() {
        let db = LedgerMemoryDatabase::default();
        db.store_entry(unspent_entry(8, "good")).await.unwrap();

        // corrupt an entry in place to simulate a bad row
        {
            let mut inner = db.inner.write().await;
            let mut bad = unspent_entry(4, "bad");
            bad.metadata.source = String::new();
            inner.entries.push(bad);
        }

        let page = db.get_history(&user(), HistoryFilter::default()).await.unwrap();
        assert_eq!(page.entries.len(), 1);
        assert_eq!(page.pagination.invalid_filtered, 1);
        assert!(!page.pagination.has_more);
    }

    #[tokio::test]
    async fn test_balance_components() {
        let db = LedgerMemoryDatabase::default();
        db.store_entry(unspent_entry(100, "a")).await.unwrap();

        let pending = LedgerEntry::pending(
            user(),
            WalletId::new(),
            mint_url(),
            TransactionId::new(),
            EntryKind::Minted,
            EntryMetadata::pending_mint(
                "q1".to_string(),
                Amount::from(21),
                "lnbc1".to_string(),
                None,
            ),
        );
        db.store_entry(pending).await.unwrap();

        let balance = db.get_balance(&user(), &mint_url()).await.unwrap();
        assert_eq!(balance.total, Amount::from(100));
        assert_eq!(balance.unspent, Amount::from(100));
        assert_eq!(balance.pending, Amount::from(21));
        assert_eq!(balance.spent, Amount::ZERO);
    }
}
