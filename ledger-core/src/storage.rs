//! Storage layer using RocksDB
//!
//! # Column Families
//!
//! - `accounts` - Account records (key: account_id)
//! - `actions` - Append-only action log (key: action_id, big-endian)
//! - `indices` - Secondary indices for pair, status and supersede lookups
//!
//! Every logical mutation is committed as one [`WriteSet`], which becomes a
//! single RocksDB `WriteBatch`. A crash can never leave an account update
//! without its action record, or an action without its indices.

use crate::{
    error::{Error, Result},
    types::{Account, AccountId, Action, ActionId, ActionStatus},
    Config,
};
use rocksdb::{
    ColumnFamily, ColumnFamilyDescriptor, Direction, IteratorMode, Options, WriteBatch, DB,
};
use std::sync::Arc;

/// Column family names
const CF_ACCOUNTS: &str = "accounts";
const CF_ACTIONS: &str = "actions";
const CF_INDICES: &str = "indices";

/// Index key tags
const IDX_PAIR: u8 = b'p';
const IDX_STATUS: u8 = b's';
const IDX_SUPERSEDED: u8 = b'x';

/// Storage wrapper for RocksDB
pub struct Storage {
    db: Arc<DB>,
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage").field("path", &self.db.path()).finish()
    }
}

/// A set of writes committed atomically
#[derive(Debug, Default, Clone)]
pub struct WriteSet {
    accounts: Vec<Account>,
    inserted: Vec<Action>,
    status_changes: Vec<(Action, ActionStatus)>,
    superseded: Vec<(ActionId, ActionId)>,
}

impl WriteSet {
    /// Empty write set
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite an account record
    pub fn put_account(&mut self, account: Account) -> &mut Self {
        self.accounts.push(account);
        self
    }

    /// Append a new action with its indices
    pub fn insert_action(&mut self, action: Action) -> &mut Self {
        self.inserted.push(action);
        self
    }

    /// Rewrite an existing action whose status moved away from `previous`
    pub fn update_action_status(&mut self, action: Action, previous: ActionStatus) -> &mut Self {
        self.status_changes.push((action, previous));
        self
    }

    /// Mark `target` as superseded by the record `by`
    pub fn supersede(&mut self, target: ActionId, by: ActionId) -> &mut Self {
        self.superseded.push((target, by));
        self
    }

    /// Nothing to write
    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
            && self.inserted.is_empty()
            && self.status_changes.is_empty()
            && self.superseded.is_empty()
    }
}

impl Storage {
    /// Open or create database
    pub fn open(config: &Config) -> Result<Self> {
        let path = &config.data_dir;

        // Create directory if not exists
        std::fs::create_dir_all(path)?;

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_write_buffer_size(config.rocksdb.write_buffer_size_mb * 1024 * 1024);
        db_opts.set_max_write_buffer_number(config.rocksdb.max_write_buffer_number);
        db_opts.set_max_background_jobs(config.rocksdb.max_background_jobs);

        if config.rocksdb.enable_statistics {
            db_opts.enable_statistics();
        }

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CF_ACCOUNTS, Self::cf_options_accounts()),
            ColumnFamilyDescriptor::new(CF_ACTIONS, Self::cf_options_actions()),
            ColumnFamilyDescriptor::new(CF_INDICES, Self::cf_options_indices()),
        ];

        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        tracing::info!(path = ?path, "Opened ledger store");

        Ok(Self { db: Arc::new(db) })
    }

    // Column family options

    fn cf_options_accounts() -> Options {
        let mut opts = Options::default();
        // Accounts are read on every match, use LZ4 for speed
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts
    }

    fn cf_options_actions() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
        opts.set_bottommost_compression_type(rocksdb::DBCompressionType::Zstd);
        opts
    }

    fn cf_options_indices() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        let mut block_opts = rocksdb::BlockBasedOptions::default();
        block_opts.set_bloom_filter(10.0, false);
        opts.set_block_based_table_factory(&block_opts);
        opts
    }

    fn cf_handle(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::Storage(format!("Column family {} not found", name)))
    }

    // Account operations

    /// Point lookup
    pub fn get_account(&self, id: AccountId) -> Result<Option<Account>> {
        let cf = self.cf_handle(CF_ACCOUNTS)?;
        match self.db.get_cf(cf, id.to_key())? {
            Some(value) => Ok(Some(bincode::deserialize(&value)?)),
            None => Ok(None),
        }
    }

    /// Point lookup that fails on a missing account
    pub fn account(&self, id: AccountId) -> Result<Account> {
        self.get_account(id)?.ok_or(Error::AccountNotFound(id))
    }

    /// All accounts, in key order
    pub fn accounts(&self) -> Result<Vec<Account>> {
        let cf = self.cf_handle(CF_ACCOUNTS)?;
        let mut accounts = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_, value) = item?;
            accounts.push(bincode::deserialize(&value)?);
        }
        Ok(accounts)
    }

    // Action operations

    /// Get action by ID
    pub fn get_action(&self, id: ActionId) -> Result<Action> {
        let cf = self.cf_handle(CF_ACTIONS)?;
        let value = self
            .db
            .get_cf(cf, id.to_key())?
            .ok_or(Error::ActionNotFound(id))?;
        Ok(bincode::deserialize(&value)?)
    }

    /// Full action log, oldest first
    pub fn actions(&self) -> Result<Vec<Action>> {
        let cf = self.cf_handle(CF_ACTIONS)?;
        let mut actions = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_, value) = item?;
            actions.push(bincode::deserialize(&value)?);
        }
        Ok(actions)
    }

    /// Highest action id written so far
    pub fn last_action_id(&self) -> Result<Option<ActionId>> {
        let cf = self.cf_handle(CF_ACTIONS)?;
        if let Some(item) = self.db.iterator_cf(cf, IteratorMode::End).next() {
            let (key, _) = item?;
            return Ok(ActionId::from_key(&key));
        }
        Ok(None)
    }

    /// Actions currently in `status`, oldest first
    pub fn actions_with_status(&self, status: ActionStatus) -> Result<Vec<Action>> {
        let prefix = [IDX_STATUS, status as u8];
        self.scan_index_ids(&prefix)?
            .into_iter()
            .map(|id| self.get_action(id))
            .collect()
    }

    /// Pending actions that no skip record has superseded
    pub fn open_actions(&self) -> Result<Vec<Action>> {
        let mut open = Vec::new();
        for action in self.actions_with_status(ActionStatus::Pending)? {
            if self.superseded_by(action.id)?.is_none() {
                open.push(action);
            }
        }
        Ok(open)
    }

    /// Skip record that superseded `id`, if any
    pub fn superseded_by(&self, id: ActionId) -> Result<Option<ActionId>> {
        let cf = self.cf_handle(CF_INDICES)?;
        let value = self.db.get_cf(cf, Self::index_key_superseded(id))?;
        Ok(value.and_then(|v| ActionId::from_key(&v)))
    }

    /// Most recently created action from `follower` towards `followee`
    pub fn latest_action_between(
        &self,
        follower: AccountId,
        followee: AccountId,
    ) -> Result<Option<Action>> {
        let cf = self.cf_handle(CF_INDICES)?;
        let prefix = Self::index_key_pair_prefix(follower, followee);
        let mut upper = prefix.clone();
        upper.extend_from_slice(&[0xFF; 8]);

        let mut iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(upper.as_slice(), Direction::Reverse));

        match iter.next() {
            Some(item) => {
                let (key, _) = item?;
                if !key.starts_with(&prefix) {
                    return Ok(None);
                }
                match ActionId::from_key(&key[prefix.len()..]) {
                    Some(id) => Ok(Some(self.get_action(id)?)),
                    None => Err(Error::Storage(format!("Malformed pair index key {:?}", key))),
                }
            }
            None => Ok(None),
        }
    }

    // Batch operations (atomic)

    /// Commit a write set atomically
    pub fn commit(&self, writes: &WriteSet) -> Result<()> {
        if writes.is_empty() {
            return Ok(());
        }

        let cf_accounts = self.cf_handle(CF_ACCOUNTS)?;
        let cf_actions = self.cf_handle(CF_ACTIONS)?;
        let cf_indices = self.cf_handle(CF_INDICES)?;

        let mut batch = WriteBatch::default();

        for account in &writes.accounts {
            batch.put_cf(cf_accounts, account.id.to_key(), bincode::serialize(account)?);
        }

        for action in &writes.inserted {
            batch.put_cf(cf_actions, action.id.to_key(), bincode::serialize(action)?);
            batch.put_cf(
                cf_indices,
                Self::index_key_pair(action.follower_id, action.followee_id, action.id),
                b"",
            );
            batch.put_cf(cf_indices, Self::index_key_status(action.status, action.id), b"");
        }

        for (action, previous) in &writes.status_changes {
            batch.put_cf(cf_actions, action.id.to_key(), bincode::serialize(action)?);
            batch.delete_cf(cf_indices, Self::index_key_status(*previous, action.id));
            batch.put_cf(cf_indices, Self::index_key_status(action.status, action.id), b"");
        }

        for (target, by) in &writes.superseded {
            batch.put_cf(cf_indices, Self::index_key_superseded(*target), by.to_key());
        }

        self.db.write(batch)?;
        Ok(())
    }

    // Index key helpers

    fn scan_index_ids(&self, prefix: &[u8]) -> Result<Vec<ActionId>> {
        let cf = self.cf_handle(CF_INDICES)?;
        let mut ids = Vec::new();
        for item in self
            .db
            .iterator_cf(cf, IteratorMode::From(prefix, Direction::Forward))
        {
            let (key, _) = item?;
            if !key.starts_with(prefix) {
                break;
            }
            if let Some(id) = ActionId::from_key(&key[prefix.len()..]) {
                ids.push(id);
            }
        }
        Ok(ids)
    }

    fn index_key_pair_prefix(follower: AccountId, followee: AccountId) -> Vec<u8> {
        let mut key = Vec::with_capacity(25);
        key.push(IDX_PAIR);
        key.extend_from_slice(&follower.to_key());
        key.extend_from_slice(&followee.to_key());
        key
    }

    fn index_key_pair(follower: AccountId, followee: AccountId, action: ActionId) -> Vec<u8> {
        let mut key = Self::index_key_pair_prefix(follower, followee);
        key.extend_from_slice(&action.to_key());
        key
    }

    fn index_key_status(status: ActionStatus, action: ActionId) -> Vec<u8> {
        let mut key = vec![IDX_STATUS, status as u8];
        key.extend_from_slice(&action.to_key());
        key
    }

    fn index_key_superseded(action: ActionId) -> Vec<u8> {
        let mut key = vec![IDX_SUPERSEDED];
        key.extend_from_slice(&action.to_key());
        key
    }
}
