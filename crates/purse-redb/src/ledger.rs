//! Redb ledger store
//!
//! Durable implementation of the ledger contract. Every multi-row unit is
//! a single redb write transaction, so a failed send or melt commit leaves
//! no partial state behind. Secondary index tables keep spend selection
//! and transaction lookups off the full table scan.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use purse_common::database::{
    Error as DatabaseError, HistoryFilter, HistoryPage, LedgerDatabase, MeltCommit, Pagination,
    PendingUpdate, PendingWindow, SpendSelection,
};
use purse_common::ledger::{
    Balance, EntryId, EntryKind, EntryMetadata, EntryStatus, LedgerEntry, TransactionId,
};
use purse_common::proofs::ProofsMethods;
use purse_common::util::unix_time;
use purse_common::wallet::WalletRecord;
use purse_common::{Amount, MintUrl, Proofs, UserKey};
use redb::{
    Database, MultimapTableDefinition, ReadableMultimapTable, ReadableTable, TableDefinition,
    WriteTransaction,
};
use tokio::sync::Mutex;
use tracing::instrument;

use crate::error::Error;

const CONFIG_TABLE: TableDefinition<&str, &str> = TableDefinition::new("config");
// <user_key|mint_url, wallet json>
const WALLETS_TABLE: TableDefinition<&str, &str> = TableDefinition::new("wallets");
// <seq, entry json>; seq is monotonic, so key order is insertion order
const ENTRIES_TABLE: TableDefinition<u64, &str> = TableDefinition::new("ledger_entries");
// <entry uuid, seq>
const ENTRY_IDS_TABLE: TableDefinition<&str, u64> = TableDefinition::new("entry_ids");
// <transaction uuid, seq>
const ENTRIES_BY_TXID_TABLE: MultimapTableDefinition<&str, u64> =
    MultimapTableDefinition::new("entries_by_txid");
// <user_key|status, seq>
const ENTRIES_BY_USER_STATUS_TABLE: MultimapTableDefinition<&str, u64> =
    MultimapTableDefinition::new("entries_by_user_status");

const DATABASE_VERSION: u32 = 0;

/// Ledger Redb Database
#[derive(Debug, Clone)]
pub struct LedgerRedbDatabase {
    db: Arc<Mutex<Database>>,
}

impl LedgerRedbDatabase {
    /// Create new [`LedgerRedbDatabase`]
    pub fn new(path: &Path) -> Result<Self, Error> {
        let db = Database::create(path)?;

        let db_version: Option<u32>;
        {
            let read_txn = db.begin_read()?;
            db_version = match read_txn.open_table(CONFIG_TABLE) {
                Ok(table) => table
                    .get("db_version")?
                    .map(|v| v.value().parse::<u32>())
                    .transpose()
                    .map_err(|_| Error::UnknownDatabaseVersion)?,
                Err(_) => None,
            };
        }

        match db_version {
            Some(version) if version == DATABASE_VERSION => {}
            Some(version) => {
                tracing::warn!(
                    "Ledger database version {} does not match {}",
                    version,
                    DATABASE_VERSION
                );
                return Err(Error::UnknownDatabaseVersion);
            }
            None => {
                let write_txn = db.begin_write()?;
                {
                    let mut table = write_txn.open_table(CONFIG_TABLE)?;
                    // Open all tables to init a new db
                    let _ = write_txn.open_table(WALLETS_TABLE)?;
                    let _ = write_txn.open_table(ENTRIES_TABLE)?;
                    let _ = write_txn.open_table(ENTRY_IDS_TABLE)?;
                    let _ = write_txn.open_multimap_table(ENTRIES_BY_TXID_TABLE)?;
                    let _ = write_txn.open_multimap_table(ENTRIES_BY_USER_STATUS_TABLE)?;
                    table.insert("db_version", DATABASE_VERSION.to_string().as_str())?;
                }
                write_txn.commit()?;
            }
        }

        Ok(Self {
            db: Arc::new(Mutex::new(db)),
        })
    }
}

fn wallet_key(user_key: &UserKey, mint_url: &MintUrl) -> String {
    format!("{user_key}|{mint_url}")
}

fn status_key(user_key: &UserKey, status: EntryStatus) -> String {
    format!("{user_key}|{status}")
}

fn insert_entry(write_txn: &WriteTransaction, entry: &LedgerEntry) -> Result<u64, Error> {
    let json = serde_json::to_string(entry)?;

    let seq = {
        let mut entries = write_txn.open_table(ENTRIES_TABLE)?;
        let seq = entries.last()?.map(|(k, _)| k.value() + 1).unwrap_or(0);
        entries.insert(seq, json.as_str())?;
        seq
    };

    write_txn
        .open_table(ENTRY_IDS_TABLE)?
        .insert(entry.id.to_string().as_str(), seq)?;
    write_txn
        .open_multimap_table(ENTRIES_BY_TXID_TABLE)?
        .insert(entry.transaction_id.to_string().as_str(), seq)?;
    write_txn
        .open_multimap_table(ENTRIES_BY_USER_STATUS_TABLE)?
        .insert(status_key(&entry.user_key, entry.status).as_str(), seq)?;

    Ok(seq)
}

fn overwrite_entry(
    write_txn: &WriteTransaction,
    seq: u64,
    old: &LedgerEntry,
    new: &LedgerEntry,
) -> Result<(), Error> {
    let json = serde_json::to_string(new)?;
    write_txn
        .open_table(ENTRIES_TABLE)?
        .insert(seq, json.as_str())?;

    if old.status != new.status {
        let mut index = write_txn.open_multimap_table(ENTRIES_BY_USER_STATUS_TABLE)?;
        index.remove(status_key(&old.user_key, old.status).as_str(), seq)?;
        index.insert(status_key(&new.user_key, new.status).as_str(), seq)?;
    }

    Ok(())
}

fn seq_of(write_txn: &WriteTransaction, entry_id: &EntryId) -> Result<Option<u64>, Error> {
    let ids = write_txn.open_table(ENTRY_IDS_TABLE)?;
    let result = ids.get(entry_id.to_string().as_str())?.map(|v| v.value());
    Ok(result)
}

fn entry_at(write_txn: &WriteTransaction, seq: u64) -> Result<Option<LedgerEntry>, Error> {
    let entries = write_txn.open_table(ENTRIES_TABLE)?;
    let result = match entries.get(seq)? {
        Some(value) => Some(serde_json::from_str(value.value())?),
        None => None,
    };
    Ok(result)
}

/// Unspent entries of the user inside a write transaction, insertion order
fn unspent_in_txn(
    write_txn: &WriteTransaction,
    user_key: &UserKey,
) -> Result<Vec<(u64, LedgerEntry)>, Error> {
    let mut seqs = Vec::new();
    {
        let index = write_txn.open_multimap_table(ENTRIES_BY_USER_STATUS_TABLE)?;
        for value in index.get(status_key(user_key, EntryStatus::Unspent).as_str())? {
            seqs.push(value?.value());
        }
    }

    let mut found = Vec::with_capacity(seqs.len());
    for seq in seqs {
        if let Some(entry) = entry_at(write_txn, seq)? {
            found.push((seq, entry));
        }
    }
    Ok(found)
}

fn check_insertable(write_txn: &WriteTransaction, entry: &LedgerEntry) -> Result<(), DatabaseError> {
    entry
        .validate()
        .map_err(DatabaseError::InvariantViolation)?;

    if seq_of(write_txn, &entry.id).map_err(Error::from)?.is_some() {
        return Err(DatabaseError::DuplicateEntry(entry.id));
    }

    if entry.status == EntryStatus::Unspent {
        for (_, other) in unspent_in_txn(write_txn, &entry.user_key).map_err(Error::from)? {
            if other.id == entry.id {
                continue;
            }
            for proof in &entry.proofs {
                if other.proofs.iter().any(|p| p.secret == proof.secret) {
                    return Err(DatabaseError::InvariantViolation(format!(
                        "proof secret `{}` already held by an unspent entry",
                        proof.secret
                    )));
                }
            }
        }
    }

    Ok(())
}

/// Check every source exists and is unspent; returns `(seq, entry)` pairs
fn check_spendable(
    write_txn: &WriteTransaction,
    entry_ids: &[EntryId],
) -> Result<Vec<(u64, LedgerEntry)>, DatabaseError> {
    let mut sources = Vec::with_capacity(entry_ids.len());
    for entry_id in entry_ids {
        let seq = seq_of(write_txn, entry_id)
            .map_err(Error::from)?
            .ok_or(DatabaseError::EntryNotFound(*entry_id))?;
        let entry = entry_at(write_txn, seq)
            .map_err(Error::from)?
            .ok_or(DatabaseError::EntryNotFound(*entry_id))?;
        if entry.status != EntryStatus::Unspent {
            return Err(DatabaseError::InvalidStateTransition {
                from: entry.status,
                to: EntryStatus::Spent,
            });
        }
        sources.push((seq, entry));
    }
    Ok(sources)
}

fn spend_sources(
    write_txn: &WriteTransaction,
    sources: &[(u64, LedgerEntry)],
) -> Result<usize, Error> {
    let now = unix_time();
    for (seq, entry) in sources {
        let mut spent = entry.clone();
        spent.status = EntryStatus::Spent;
        spent.spent_at = Some(now);
        overwrite_entry(write_txn, *seq, entry, &spent)?;
    }
    Ok(sources.len())
}

#[async_trait]
impl LedgerDatabase for LedgerRedbDatabase {
    type Err = DatabaseError;

    #[instrument(skip(self, wallet))]
    async fn create_wallet(&self, wallet: WalletRecord) -> Result<(), Self::Err> {
        let db = self.db.lock().await;
        let write_txn = db.begin_write().map_err(Error::from)?;
        {
            let mut table = write_txn.open_table(WALLETS_TABLE).map_err(Error::from)?;
            let key = wallet_key(&wallet.user_key, &wallet.mint_url);

            if table.get(key.as_str()).map_err(Error::from)?.is_some() {
                return Err(DatabaseError::WalletAlreadyExists);
            }

            table
                .insert(
                    key.as_str(),
                    serde_json::to_string(&wallet).map_err(Error::from)?.as_str(),
                )
                .map_err(Error::from)?;
        }
        write_txn.commit().map_err(Error::from)?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn find_wallet(
        &self,
        user_key: &UserKey,
        mint_url: &MintUrl,
    ) -> Result<Option<WalletRecord>, Self::Err> {
        let db = self.db.lock().await;
        let read_txn = db.begin_read().map_err(Error::from)?;
        let table = read_txn.open_table(WALLETS_TABLE).map_err(Error::from)?;

        match table
            .get(wallet_key(user_key, mint_url).as_str())
            .map_err(Error::from)?
        {
            Some(wallet) => Ok(Some(
                serde_json::from_str(wallet.value()).map_err(Error::from)?,
            )),
            None => Ok(None),
        }
    }

    #[instrument(skip(self, entry))]
    async fn store_entry(&self, entry: LedgerEntry) -> Result<(), Self::Err> {
        let db = self.db.lock().await;
        let write_txn = db.begin_write().map_err(Error::from)?;

        check_insertable(&write_txn, &entry)?;
        insert_entry(&write_txn, &entry).map_err(Error::from)?;

        write_txn.commit().map_err(Error::from)?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn find_entry(&self, entry_id: &EntryId) -> Result<Option<LedgerEntry>, Self::Err> {
        let db = self.db.lock().await;
        let read_txn = db.begin_read().map_err(Error::from)?;

        let seq = {
            let ids = read_txn.open_table(ENTRY_IDS_TABLE).map_err(Error::from)?;
            ids.get(entry_id.to_string().as_str())
                .map_err(Error::from)?
                .map(|v| v.value())
        };
        let Some(seq) = seq else {
            return Ok(None);
        };

        let entries = read_txn.open_table(ENTRIES_TABLE).map_err(Error::from)?;
        match entries.get(seq).map_err(Error::from)? {
            Some(value) => Ok(Some(
                serde_json::from_str(value.value()).map_err(Error::from)?,
            )),
            None => Ok(None),
        }
    }

    #[instrument(skip(self))]
    async fn find_entries(
        &self,
        user_key: &UserKey,
        mint_url: &MintUrl,
    ) -> Result<Vec<LedgerEntry>, Self::Err> {
        let db = self.db.lock().await;
        let read_txn = db.begin_read().map_err(Error::from)?;
        let entries = read_txn.open_table(ENTRIES_TABLE).map_err(Error::from)?;

        let mut found = Vec::new();
        for row in entries.iter().map_err(Error::from)? {
            let (_, value) = row.map_err(Error::from)?;
            let entry: LedgerEntry =
                serde_json::from_str(value.value()).map_err(Error::from)?;
            if &entry.user_key == user_key && &entry.mint_url == mint_url {
                found.push(entry);
            }
        }

        Ok(found)
    }

    #[instrument(skip(self))]
    async fn find_unspent(
        &self,
        user_key: &UserKey,
        mint_url: &MintUrl,
    ) -> Result<Vec<LedgerEntry>, Self::Err> {
        let db = self.db.lock().await;
        let read_txn = db.begin_read().map_err(Error::from)?;

        let mut seqs = Vec::new();
        {
            let index = read_txn
                .open_multimap_table(ENTRIES_BY_USER_STATUS_TABLE)
                .map_err(Error::from)?;
            for value in index
                .get(status_key(user_key, EntryStatus::Unspent).as_str())
                .map_err(Error::from)?
            {
                seqs.push(value.map_err(Error::from)?.value());
            }
        }

        let entries = read_txn.open_table(ENTRIES_TABLE).map_err(Error::from)?;
        let mut found = Vec::with_capacity(seqs.len());
        for seq in seqs {
            if let Some(value) = entries.get(seq).map_err(Error::from)? {
                let entry: LedgerEntry =
                    serde_json::from_str(value.value()).map_err(Error::from)?;
                if &entry.mint_url == mint_url {
                    found.push(entry);
                }
            }
        }

        Ok(found)
    }

    #[instrument(skip(self))]
    async fn find_by_transaction_id(
        &self,
        transaction_id: &TransactionId,
    ) -> Result<Vec<LedgerEntry>, Self::Err> {
        let db = self.db.lock().await;
        let read_txn = db.begin_read().map_err(Error::from)?;

        let mut seqs = Vec::new();
        {
            let index = read_txn
                .open_multimap_table(ENTRIES_BY_TXID_TABLE)
                .map_err(Error::from)?;
            for value in index
                .get(transaction_id.to_string().as_str())
                .map_err(Error::from)?
            {
                seqs.push(value.map_err(Error::from)?.value());
            }
        }

        let entries = read_txn.open_table(ENTRIES_TABLE).map_err(Error::from)?;
        let mut found = Vec::with_capacity(seqs.len());
        for seq in seqs {
            if let Some(value) = entries.get(seq).map_err(Error::from)? {
                found.push(serde_json::from_str(value.value()).map_err(Error::from)?);
            }
        }

        Ok(found)
    }

    #[instrument(skip(self))]
    async fn find_pending_mints(
        &self,
        user_key: &UserKey,
        window: PendingWindow,
    ) -> Result<Vec<LedgerEntry>, Self::Err> {
        let db = self.db.lock().await;
        let read_txn = db.begin_read().map_err(Error::from)?;

        let mut seqs = Vec::new();
        {
            let index = read_txn
                .open_multimap_table(ENTRIES_BY_USER_STATUS_TABLE)
                .map_err(Error::from)?;
            for value in index
                .get(status_key(user_key, EntryStatus::Pending).as_str())
                .map_err(Error::from)?
            {
                seqs.push(value.map_err(Error::from)?.value());
            }
        }

        let entries = read_txn.open_table(ENTRIES_TABLE).map_err(Error::from)?;
        let mut found = Vec::new();
        for seq in seqs {
            if let Some(value) = entries.get(seq).map_err(Error::from)? {
                let entry: LedgerEntry =
                    serde_json::from_str(value.value()).map_err(Error::from)?;
                let in_window = match window {
                    PendingWindow::OlderThan(cutoff) => entry.created_at < cutoff,
                    PendingWindow::NewerThan(cutoff) => entry.created_at >= cutoff,
                };
                if entry.kind == EntryKind::Minted && in_window {
                    found.push(entry);
                }
            }
        }

        Ok(found)
    }

    #[instrument(skip(self))]
    async fn find_pending_older_than(&self, cutoff: u64) -> Result<Vec<LedgerEntry>, Self::Err> {
        let db = self.db.lock().await;
        let read_txn = db.begin_read().map_err(Error::from)?;
        let entries = read_txn.open_table(ENTRIES_TABLE).map_err(Error::from)?;

        let mut found = Vec::new();
        for row in entries.iter().map_err(Error::from)? {
            let (_, value) = row.map_err(Error::from)?;
            let entry: LedgerEntry =
                serde_json::from_str(value.value()).map_err(Error::from)?;
            if entry.status == EntryStatus::Pending
                && entry.kind == EntryKind::Minted
                && entry.created_at < cutoff
            {
                found.push(entry);
            }
        }

        Ok(found)
    }

    #[instrument(skip(self))]
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

    #[instrument(skip(self, update))]
    async fn update_pending(
        &self,
        entry_id: &EntryId,
        update: PendingUpdate,
    ) -> Result<LedgerEntry, Self::Err> {
        let db = self.db.lock().await;
        let write_txn = db.begin_write().map_err(Error::from)?;

        let seq = seq_of(&write_txn, entry_id)
            .map_err(Error::from)?
            .ok_or(DatabaseError::EntryNotFound(*entry_id))?;
        let current = entry_at(&write_txn, seq)
            .map_err(Error::from)?
            .ok_or(DatabaseError::EntryNotFound(*entry_id))?;

        let target = match update {
            PendingUpdate::Complete { .. } => EntryStatus::Unspent,
            PendingUpdate::Fail { .. } => EntryStatus::Failed,
        };

        if !current.status.can_transition_to(target) {
            return Err(DatabaseError::InvalidStateTransition {
                from: current.status,
                to: target,
            });
        }

        let mut updated = current.clone();
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

        updated
            .validate()
            .map_err(DatabaseError::InvariantViolation)?;

        if updated.status == EntryStatus::Unspent {
            for (_, other) in unspent_in_txn(&write_txn, &updated.user_key).map_err(Error::from)? {
                if other.id == updated.id {
                    continue;
                }
                for proof in &updated.proofs {
                    if other.proofs.iter().any(|p| p.secret == proof.secret) {
                        return Err(DatabaseError::InvariantViolation(format!(
                            "proof secret `{}` already held by an unspent entry",
                            proof.secret
                        )));
                    }
                }
            }
        }

        overwrite_entry(&write_txn, seq, &current, &updated).map_err(Error::from)?;
        write_txn.commit().map_err(Error::from)?;

        Ok(updated)
    }

    #[instrument(skip(self))]
    async fn mark_spent(&self, entry_ids: &[EntryId]) -> Result<usize, Self::Err> {
        let db = self.db.lock().await;
        let write_txn = db.begin_write().map_err(Error::from)?;

        let mut count = 0;
        for entry_id in entry_ids {
            let Some(seq) = seq_of(&write_txn, entry_id).map_err(Error::from)? else {
                continue;
            };
            let Some(entry) = entry_at(&write_txn, seq).map_err(Error::from)? else {
                continue;
            };
            if entry.status != EntryStatus::Unspent {
                continue;
            }

            let mut spent = entry.clone();
            spent.status = EntryStatus::Spent;
            spent.spent_at = Some(unix_time());
            overwrite_entry(&write_txn, seq, &entry, &spent).map_err(Error::from)?;
            count += 1;
        }

        write_txn.commit().map_err(Error::from)?;
        Ok(count)
    }

    #[instrument(skip(self))]
    async fn select_for_spend(
        &self,
        user_key: &UserKey,
        mint_url: &MintUrl,
        amount: Amount,
    ) -> Result<SpendSelection, Self::Err> {
        let unspent = self.find_unspent(user_key, mint_url).await?;

        let available: Amount = unspent.iter().map(|e| e.total_amount).sum();
        if available < amount {
            return Err(DatabaseError::InsufficientFunds {
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
            entries.push(entry);
        }

        Ok(SpendSelection {
            entries,
            total_selected,
            change_amount: total_selected - amount,
        })
    }

    #[instrument(skip(self, sent_entry, change_entry))]
    async fn execute_atomic_send(
        &self,
        source_entry_ids: &[EntryId],
        sent_entry: LedgerEntry,
        change_entry: Option<LedgerEntry>,
    ) -> Result<(), Self::Err> {
        let db = self.db.lock().await;
        let write_txn = db.begin_write().map_err(Error::from)?;

        let sources = check_spendable(&write_txn, source_entry_ids)?;
        check_insertable(&write_txn, &sent_entry)?;
        if let Some(change) = &change_entry {
            check_insertable(&write_txn, change)?;
        }

        spend_sources(&write_txn, &sources).map_err(Error::from)?;
        insert_entry(&write_txn, &sent_entry).map_err(Error::from)?;
        if let Some(change) = &change_entry {
            insert_entry(&write_txn, change).map_err(Error::from)?;
        }

        write_txn.commit().map_err(Error::from)?;
        Ok(())
    }

    #[instrument(skip(self, keep_proofs, melt_change_proofs, common_metadata))]
    async fn execute_atomic_melt(
        &self,
        source_entry_ids: &[EntryId],
        keep_proofs: Proofs,
        melt_change_proofs: Proofs,
        transaction_id: TransactionId,
        common_metadata: EntryMetadata,
    ) -> Result<MeltCommit, Self::Err> {
        let db = self.db.lock().await;
        let write_txn = db.begin_write().map_err(Error::from)?;

        let sources = check_spendable(&write_txn, source_entry_ids)?;
        let (_, template) = sources
            .first()
            .ok_or_else(|| DatabaseError::InvariantViolation("no source entries".to_string()))?;

        let change_entry = (!keep_proofs.is_empty()).then(|| {
            LedgerEntry::with_proofs(
                template.user_key.clone(),
                template.wallet_id,
                template.mint_url.clone(),
                transaction_id,
                EntryKind::Change,
                EntryStatus::Unspent,
                keep_proofs,
                common_metadata.clone(),
            )
        });

        let melt_change_entry = (!melt_change_proofs.is_empty()).then(|| {
            LedgerEntry::with_proofs(
                template.user_key.clone(),
                template.wallet_id,
                template.mint_url.clone(),
                transaction_id,
                EntryKind::MeltChange,
                EntryStatus::Unspent,
                melt_change_proofs,
                common_metadata,
            )
        });

        if let Some(entry) = &change_entry {
            check_insertable(&write_txn, entry)?;
        }
        if let Some(entry) = &melt_change_entry {
            check_insertable(&write_txn, entry)?;
        }

        let spent = spend_sources(&write_txn, &sources).map_err(Error::from)?;
        if let Some(entry) = &change_entry {
            insert_entry(&write_txn, entry).map_err(Error::from)?;
        }
        if let Some(entry) = &melt_change_entry {
            insert_entry(&write_txn, entry).map_err(Error::from)?;
        }

        write_txn.commit().map_err(Error::from)?;

        Ok(MeltCommit {
            spent,
            change_entry,
            melt_change_entry,
        })
    }

    #[instrument(skip(self))]
    async fn get_history(
        &self,
        user_key: &UserKey,
        filter: HistoryFilter,
    ) -> Result<HistoryPage, Self::Err> {
        let db = self.db.lock().await;
        let read_txn = db.begin_read().map_err(Error::from)?;
        let entries = read_txn.open_table(ENTRIES_TABLE).map_err(Error::from)?;

        let mut invalid_filtered = 0;
        let mut matching: Vec<LedgerEntry> = Vec::new();

        for row in entries.iter().map_err(Error::from)? {
            let (_, value) = row.map_err(Error::from)?;
            let entry: LedgerEntry = match serde_json::from_str(value.value()) {
                Ok(entry) => entry,
                Err(_) => {
                    invalid_filtered += 1;
                    continue;
                }
            };

            if &entry.user_key != user_key {
                continue;
            }
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

            matching.push(entry);
        }

        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let total = matching.len();
        let page: Vec<LedgerEntry> = matching
            .into_iter()
            .skip(filter.skip)
            .take(filter.limit)
            .collect();
        let has_more = filter.skip + page.len() < total;

        Ok(HistoryPage {
            entries: page,
            pagination: Pagination {
                total,
                invalid_filtered,
                has_more,
            },
        })
    }

    #[instrument(skip(self))]
    async fn get_balance(
        &self,
        user_key: &UserKey,
        mint_url: &MintUrl,
    ) -> Result<Balance, Self::Err> {
        let entries = self.find_entries(user_key, mint_url).await?;

        let mut balance = Balance::default();
        for entry in entries {
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
    use tempfile::TempDir;

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

    fn open_db(dir: &TempDir) -> LedgerRedbDatabase {
        LedgerRedbDatabase::new(&dir.path().join("ledger.redb")).unwrap()
    }

    #[tokio::test]
    async fn test_wallet_round_trip() {
        let dir = TempDir::new().unwrap();
        let db = open_db(&dir);

        let wallet = WalletRecord::new(
            user(),
            mint_url(),
            "02pub".to_string(),
            "enc".to_string(),
            WalletOrigin::Explicit,
        );
        db.create_wallet(wallet.clone()).await.unwrap();

        let found = db.find_wallet(&user(), &mint_url()).await.unwrap().unwrap();
        assert_eq!(found, wallet);

        assert!(matches!(
            db.create_wallet(wallet).await,
            Err(DatabaseError::WalletAlreadyExists)
        ));
    }

    #[tokio::test]
    async fn test_entries_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let entry = unspent_entry(64, "persisted");
        let id = entry.id;

        {
            let db = open_db(&dir);
            db.store_entry(entry).await.unwrap();
        }

        let db = open_db(&dir);
        let found = db.find_entry(&id).await.unwrap().unwrap();
        assert_eq!(found.total_amount, Amount::from(64));
        assert_eq!(
            db.get_balance(&user(), &mint_url()).await.unwrap().total,
            Amount::from(64)
        );
    }

    #[tokio::test]
    async fn test_selection_follows_insertion_order() {
        let dir = TempDir::new().unwrap();
        let db = open_db(&dir);

        db.store_entry(unspent_entry(50, "a")).await.unwrap();
        db.store_entry(unspent_entry(30, "b")).await.unwrap();
        db.store_entry(unspent_entry(20, "c")).await.unwrap();

        let selection = db
            .select_for_spend(&user(), &mint_url(), Amount::from(60))
            .await
            .unwrap();
        assert_eq!(selection.entries.len(), 2);
        assert_eq!(selection.entries[0].proofs[0].secret, "a");
        assert_eq!(selection.total_selected, Amount::from(80));
        assert_eq!(selection.change_amount, Amount::from(20));
    }

    #[tokio::test]
    async fn test_update_pending_and_transition_rules() {
        let dir = TempDir::new().unwrap();
        let db = open_db(&dir);

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
                    proofs: vec![proof(64, "x"), proof(36, "y")],
                    method: CompletionMethod::Explicit,
                    minted_amount: Amount::from(100),
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.status, EntryStatus::Unspent);
        assert_eq!(updated.total_amount, Amount::from(100));

        assert!(matches!(
            db.update_pending(
                &id,
                PendingUpdate::Fail {
                    reason: "late".to_string()
                }
            )
            .await,
            Err(DatabaseError::InvalidStateTransition { .. })
        ));

        // index moved with the status
        let unspent = db.find_unspent(&user(), &mint_url()).await.unwrap();
        assert_eq!(unspent.len(), 1);
        let pending = db
            .find_pending_mints(&user(), PendingWindow::OlderThan(u64::MAX))
            .await
            .unwrap();
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn test_atomic_melt_rolls_back_on_bad_source() {
        let dir = TempDir::new().unwrap();
        let db = open_db(&dir);

        let good = unspent_entry(100, "good");
        let good_id = good.id;
        db.store_entry(good).await.unwrap();

        let spent = unspent_entry(50, "gone");
        let spent_id = spent.id;
        db.store_entry(spent).await.unwrap();
        db.mark_spent(&[spent_id]).await.unwrap();

        let result = db
            .execute_atomic_melt(
                &[good_id, spent_id],
                vec![],
                vec![proof(8, "change")],
                TransactionId::new(),
                EntryMetadata::from_source("melt"),
            )
            .await;
        assert!(matches!(
            result,
            Err(DatabaseError::InvalidStateTransition { .. })
        ));

        // the good source is untouched and no change entry exists
        let good = db.find_entry(&good_id).await.unwrap().unwrap();
        assert_eq!(good.status, EntryStatus::Unspent);
        assert_eq!(
            db.get_balance(&user(), &mint_url()).await.unwrap().total,
            Amount::from(100)
        );
    }

    #[tokio::test]
    async fn test_atomic_melt_commits_change() {
        let dir = TempDir::new().unwrap();
        let db = open_db(&dir);

        let source = unspent_entry(1010, "src");
        let source_id = source.id;
        db.store_entry(source).await.unwrap();

        let tx = TransactionId::new();
        let commit = db
            .execute_atomic_melt(
                &[source_id],
                vec![],
                vec![proof(8, "reserve-back")],
                tx,
                EntryMetadata::from_source("melt"),
            )
            .await
            .unwrap();

        assert_eq!(commit.spent, 1);
        let melt_change = commit.melt_change_entry.unwrap();
        assert_eq!(melt_change.kind, EntryKind::MeltChange);

        let linked = db.find_by_transaction_id(&tx).await.unwrap();
        assert_eq!(linked.len(), 1);
        assert_eq!(linked[0].id, melt_change.id);

        let balance = db.get_balance(&user(), &mint_url()).await.unwrap();
        assert_eq!(balance.total, Amount::from(8));
        assert_eq!(balance.spent, Amount::from(1010));
    }

    #[tokio::test]
    async fn test_duplicate_secret_rejected() {
        let dir = TempDir::new().unwrap();
        let db = open_db(&dir);

        db.store_entry(unspent_entry(8, "dup")).await.unwrap();
        assert!(matches!(
            db.store_entry(unspent_entry(4, "dup")).await,
            Err(DatabaseError::InvariantViolation(_))
        ));
    }

    #[tokio::test]
    async fn test_mark_spent_idempotent() {
        let dir = TempDir::new().unwrap();
        let db = open_db(&dir);

        let entry = unspent_entry(8, "a");
        let id = entry.id;
        db.store_entry(entry).await.unwrap();

        assert_eq!(db.mark_spent(&[id]).await.unwrap(), 1);
        assert_eq!(db.mark_spent(&[id]).await.unwrap(), 0);
    }
}
