use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use sled::IVec;

use super::errors::EconomyError;
use super::locks::{OwnerId, RowKey, RowLockTable};
use super::store::{Store, StoreCapabilities, StoreTx};
use super::types::{
    ActionKind, Inventory, Platform, Trap, User, UserId, INVENTORY_SCHEMA_VERSION,
    TRAP_SCHEMA_VERSION, USER_SCHEMA_VERSION,
};

const TREE_ECONOMY: &str = "economy";
const DEFAULT_LOCK_WAIT: Duration = Duration::from_secs(5);

/// Helper builder so tests can easily create throwaway stores with custom paths.
pub struct SledStoreBuilder {
    path: PathBuf,
    row_locks: bool,
    lock_wait: Duration,
}

impl SledStoreBuilder {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            row_locks: true,
            lock_wait: DEFAULT_LOCK_WAIT,
        }
    }

    /// How long a locking read waits for a contended row before failing the transaction.
    pub fn lock_wait(mut self, wait: Duration) -> Self {
        self.lock_wait = wait;
        self
    }

    /// Open a store whose transactions never block each other. Engines refuse it;
    /// only useful for exercising that refusal and for read-only tooling.
    pub fn without_row_locks(mut self) -> Self {
        self.row_locks = false;
        self
    }

    pub fn open(self) -> Result<SledStore, EconomyError> {
        SledStore::open_with_options(self.path, self.row_locks, self.lock_wait)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CooldownRecord {
    last_used: DateTime<Utc>,
}

/// Row counts reported by `chatecon status`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub users: usize,
    pub inventories: usize,
    pub cooldowns: usize,
    pub traps: usize,
}

/// Sled-backed persistence for users, inventories, cooldown stamps and traps.
pub struct SledStore {
    _db: sled::Db,
    tree: sled::Tree,
    locks: Option<Arc<RowLockTable>>,
    next_owner: AtomicU64,
}

impl SledStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, EconomyError> {
        Self::open_with_options(path, true, DEFAULT_LOCK_WAIT)
    }

    fn open_with_options<P: AsRef<Path>>(
        path: P,
        row_locks: bool,
        lock_wait: Duration,
    ) -> Result<Self, EconomyError> {
        let path_ref = path.as_ref();
        std::fs::create_dir_all(path_ref)?;
        let db = sled::open(path_ref)?;
        let tree = db.open_tree(TREE_ECONOMY)?;
        if !row_locks {
            warn!(
                "economy store at {} opened without row locks; writers will not be serialized",
                path_ref.display()
            );
        }
        Ok(Self {
            _db: db,
            tree,
            locks: row_locks.then(|| Arc::new(RowLockTable::new(lock_wait))),
            next_owner: AtomicU64::new(1),
        })
    }

    pub fn stats(&self) -> Result<StoreStats, EconomyError> {
        let count = |prefix: &[u8]| self.tree.scan_prefix(prefix).count();
        Ok(StoreStats {
            users: count(b"user:"),
            inventories: count(b"inv:"),
            cooldowns: count(b"cd:"),
            traps: count(b"trap:"),
        })
    }

    /// Every stored user, in key order.
    pub fn list_users(&self) -> Result<Vec<User>, EconomyError> {
        let mut users = Vec::new();
        for entry in self.tree.scan_prefix(b"user:") {
            let (_, value) = entry?;
            users.push(decode_user(&value)?);
        }
        Ok(users)
    }

    fn read(&self, key: &[u8]) -> Result<Option<IVec>, EconomyError> {
        Ok(self.tree.get(key)?)
    }

    fn user_by_index(&self, key: &[u8]) -> Result<Option<User>, EconomyError> {
        let Some(raw) = self.read(key)? else {
            return Ok(None);
        };
        let id: UserId = bincode::deserialize(&raw)?;
        self.get_user(id)
    }

    fn user_by_name(&self, key: &[u8]) -> Result<Option<User>, EconomyError> {
        let Some(raw) = self.read(key)? else {
            return Ok(None);
        };
        let ids: Vec<UserId> = bincode::deserialize(&raw)?;
        match ids.last() {
            Some(id) => self.get_user(*id),
            None => Ok(None),
        }
    }
}

impl Store for SledStore {
    fn capabilities(&self) -> StoreCapabilities {
        StoreCapabilities {
            serializes_writers: self.locks.is_some(),
        }
    }

    fn begin(&self) -> Result<Box<dyn StoreTx>, EconomyError> {
        let owner = self.next_owner.fetch_add(1, Ordering::Relaxed);
        Ok(Box::new(SledTx {
            tree: self.tree.clone(),
            locks: self.locks.clone(),
            owner,
            held: Vec::new(),
            staged: BTreeMap::new(),
        }))
    }

    fn get_inventory(&self, user: UserId) -> Result<Inventory, EconomyError> {
        match self.read(&inventory_key(user))? {
            Some(bytes) => decode_inventory(&bytes),
            None => Ok(Inventory::default()),
        }
    }

    fn last_used(
        &self,
        user: UserId,
        action: ActionKind,
    ) -> Result<Option<DateTime<Utc>>, EconomyError> {
        self.read(&cooldown_key(user, action))?
            .map(|bytes| decode_cooldown(&bytes))
            .transpose()
    }

    fn get_user(&self, id: UserId) -> Result<Option<User>, EconomyError> {
        self.read(&user_key(id))?
            .map(|bytes| decode_user(&bytes))
            .transpose()
    }

    fn find_user_by_platform_id(
        &self,
        platform: Platform,
        platform_id: &str,
    ) -> Result<Option<User>, EconomyError> {
        self.user_by_index(&platform_index_key(platform, platform_id))
    }

    fn find_user_by_username(
        &self,
        platform: Platform,
        username: &str,
    ) -> Result<Option<User>, EconomyError> {
        self.user_by_name(&username_index_key(platform, username))
    }

    fn active_trap(&self, target: UserId) -> Result<Option<Trap>, EconomyError> {
        let trap = self
            .read(&trap_key(target))?
            .map(|bytes| decode_trap(&bytes))
            .transpose()?;
        Ok(trap.filter(Trap::is_active))
    }
}

/// Writes are staged in memory and land in one sled batch on commit.
/// Reads inside the transaction see staged writes first.
struct SledTx {
    tree: sled::Tree,
    locks: Option<Arc<RowLockTable>>,
    owner: OwnerId,
    held: Vec<RowKey>,
    staged: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
}

impl SledTx {
    fn lock(&mut self, key: RowKey) -> Result<(), EconomyError> {
        if let Some(locks) = &self.locks {
            if locks.acquire(key, self.owner)? {
                self.held.push(key);
            }
        }
        Ok(())
    }

    fn read(&self, key: &[u8]) -> Result<Option<Vec<u8>>, EconomyError> {
        if let Some(staged) = self.staged.get(key) {
            return Ok(staged.clone());
        }
        Ok(self.tree.get(key)?.map(|v| v.to_vec()))
    }

    fn stage_put(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.staged.insert(key, Some(value));
    }

    fn stage_remove(&mut self, key: Vec<u8>) {
        self.staged.insert(key, None);
    }

    fn release(&mut self) {
        if let Some(locks) = &self.locks {
            locks.release_all(&self.held, self.owner);
        }
        self.held.clear();
    }

    /// Drop `user`'s index entries, leaving any entry another user now owns.
    fn unindex_user(&mut self, user: &User) -> Result<(), EconomyError> {
        for (platform, platform_id) in &user.platform_ids {
            let key = platform_index_key(*platform, platform_id);
            if let Some(raw) = self.read(&key)? {
                let owner: UserId = bincode::deserialize(&raw)?;
                if owner == user.id {
                    self.stage_remove(key);
                }
            }
            self.unindex_username(*platform, &user.username, user.id)?;
        }
        Ok(())
    }

    fn name_index(&mut self, platform: Platform, username: &str) -> Result<Vec<UserId>, EconomyError> {
        self.lock(RowKey::username(platform, username))?;
        match self.read(&username_index_key(platform, username))? {
            Some(raw) => Ok(bincode::deserialize(&raw)?),
            None => Ok(Vec::new()),
        }
    }

    /// Display names are not unique. Every holder stays listed and the most
    /// recently written profile answers lookups.
    fn index_username(
        &mut self,
        platform: Platform,
        username: &str,
        id: UserId,
    ) -> Result<(), EconomyError> {
        let mut ids = self.name_index(platform, username)?;
        ids.retain(|other| *other != id);
        ids.push(id);
        self.stage_put(username_index_key(platform, username), bincode::serialize(&ids)?);
        Ok(())
    }

    fn unindex_username(
        &mut self,
        platform: Platform,
        username: &str,
        id: UserId,
    ) -> Result<(), EconomyError> {
        let mut ids = self.name_index(platform, username)?;
        ids.retain(|other| *other != id);
        let key = username_index_key(platform, username);
        if ids.is_empty() {
            self.stage_remove(key);
        } else {
            self.stage_put(key, bincode::serialize(&ids)?);
        }
        Ok(())
    }
}

impl StoreTx for SledTx {
    fn get_inventory(&mut self, user: UserId) -> Result<Inventory, EconomyError> {
        self.lock(RowKey::Inventory(user))?;
        match self.read(&inventory_key(user))? {
            Some(bytes) => decode_inventory(&bytes),
            None => Ok(Inventory::default()),
        }
    }

    fn update_inventory(&mut self, user: UserId, inventory: &Inventory) -> Result<(), EconomyError> {
        self.lock(RowKey::Inventory(user))?;
        let mut record = inventory.clone();
        record.schema_version = INVENTORY_SCHEMA_VERSION;
        let bytes = bincode::serialize(&record)?;
        self.stage_put(inventory_key(user), bytes);
        Ok(())
    }

    fn delete_inventory(&mut self, user: UserId) -> Result<(), EconomyError> {
        self.lock(RowKey::Inventory(user))?;
        self.stage_remove(inventory_key(user));
        Ok(())
    }

    fn last_used_for_update(
        &mut self,
        user: UserId,
        action: ActionKind,
    ) -> Result<Option<DateTime<Utc>>, EconomyError> {
        self.lock(RowKey::Cooldown(user, action))?;
        self.read(&cooldown_key(user, action))?
            .map(|bytes| decode_cooldown(&bytes))
            .transpose()
    }

    fn set_last_used(
        &mut self,
        user: UserId,
        action: ActionKind,
        at: DateTime<Utc>,
    ) -> Result<(), EconomyError> {
        self.lock(RowKey::Cooldown(user, action))?;
        let bytes = bincode::serialize(&CooldownRecord { last_used: at })?;
        self.stage_put(cooldown_key(user, action), bytes);
        Ok(())
    }

    fn active_trap_for_update(&mut self, target: UserId) -> Result<Option<Trap>, EconomyError> {
        self.lock(RowKey::Trap(target))?;
        let trap = self
            .read(&trap_key(target))?
            .map(|bytes| decode_trap(&bytes))
            .transpose()?;
        Ok(trap.filter(Trap::is_active))
    }

    fn put_trap(&mut self, trap: &Trap) -> Result<(), EconomyError> {
        self.lock(RowKey::Trap(trap.target))?;
        let mut record = trap.clone();
        record.schema_version = TRAP_SCHEMA_VERSION;
        let bytes = bincode::serialize(&record)?;
        self.stage_put(trap_key(trap.target), bytes);
        Ok(())
    }

    fn get_user_for_update(&mut self, id: UserId) -> Result<Option<User>, EconomyError> {
        self.lock(RowKey::User(id))?;
        self.read(&user_key(id))?
            .map(|bytes| decode_user(&bytes))
            .transpose()
    }

    fn find_user_by_platform_id_for_update(
        &mut self,
        platform: Platform,
        platform_id: &str,
    ) -> Result<Option<User>, EconomyError> {
        self.lock(RowKey::identity(platform, platform_id))?;
        let Some(raw) = self.read(&platform_index_key(platform, platform_id))? else {
            return Ok(None);
        };
        let id: UserId = bincode::deserialize(&raw)?;
        self.get_user_for_update(id)
    }

    fn put_user(&mut self, user: &User) -> Result<(), EconomyError> {
        self.lock(RowKey::User(user.id))?;
        if let Some(previous) = self
            .read(&user_key(user.id))?
            .map(|bytes| decode_user(&bytes))
            .transpose()?
        {
            self.unindex_user(&previous)?;
        }
        let mut record = user.clone();
        record.schema_version = USER_SCHEMA_VERSION;
        let id_bytes = bincode::serialize(&record.id)?;
        for (platform, platform_id) in &record.platform_ids {
            self.stage_put(platform_index_key(*platform, platform_id), id_bytes.clone());
            self.index_username(*platform, &record.username, record.id)?;
        }
        let bytes = bincode::serialize(&record)?;
        self.stage_put(user_key(record.id), bytes);
        Ok(())
    }

    fn delete_user(&mut self, id: UserId) -> Result<(), EconomyError> {
        self.lock(RowKey::User(id))?;
        if let Some(previous) = self
            .read(&user_key(id))?
            .map(|bytes| decode_user(&bytes))
            .transpose()?
        {
            self.unindex_user(&previous)?;
        }
        self.stage_remove(user_key(id));
        Ok(())
    }

    fn commit(mut self: Box<Self>) -> Result<(), EconomyError> {
        let staged = std::mem::take(&mut self.staged);
        let writes = staged.len();
        let mut batch = sled::Batch::default();
        for (key, value) in staged {
            match value {
                Some(bytes) => batch.insert(key, bytes),
                None => batch.remove(key),
            }
        }
        let applied = self
            .tree
            .apply_batch(batch)
            .and_then(|_| self.tree.flush().map(|_| ()));
        self.release();
        applied?;
        debug!("tx {} committed {} writes", self.owner, writes);
        Ok(())
    }

    fn rollback(mut self: Box<Self>) -> Result<(), EconomyError> {
        self.staged.clear();
        self.release();
        Ok(())
    }
}

impl Drop for SledTx {
    fn drop(&mut self) {
        self.release();
    }
}

fn inventory_key(user: UserId) -> Vec<u8> {
    format!("inv:{}", user).into_bytes()
}

fn cooldown_key(user: UserId, action: ActionKind) -> Vec<u8> {
    format!("cd:{}:{}", user, action.as_str()).into_bytes()
}

fn trap_key(target: UserId) -> Vec<u8> {
    format!("trap:{}", target).into_bytes()
}

fn user_key(id: UserId) -> Vec<u8> {
    format!("user:{}", id).into_bytes()
}

fn platform_index_key(platform: Platform, platform_id: &str) -> Vec<u8> {
    format!("pidx:{}:{}", platform.as_str(), platform_id).into_bytes()
}

fn username_index_key(platform: Platform, username: &str) -> Vec<u8> {
    format!(
        "uname:{}:{}",
        platform.as_str(),
        username.trim().to_lowercase()
    )
    .into_bytes()
}

fn decode_inventory(bytes: &[u8]) -> Result<Inventory, EconomyError> {
    let record: Inventory = bincode::deserialize(bytes)?;
    if record.schema_version != INVENTORY_SCHEMA_VERSION {
        return Err(EconomyError::SchemaMismatch {
            entity: "inventory",
            expected: INVENTORY_SCHEMA_VERSION,
            found: record.schema_version,
        });
    }
    Ok(record)
}

fn decode_user(bytes: &[u8]) -> Result<User, EconomyError> {
    let record: User = bincode::deserialize(bytes)?;
    if record.schema_version != USER_SCHEMA_VERSION {
        return Err(EconomyError::SchemaMismatch {
            entity: "user",
            expected: USER_SCHEMA_VERSION,
            found: record.schema_version,
        });
    }
    Ok(record)
}

fn decode_trap(bytes: &[u8]) -> Result<Trap, EconomyError> {
    let record: Trap = bincode::deserialize(bytes)?;
    if record.schema_version != TRAP_SCHEMA_VERSION {
        return Err(EconomyError::SchemaMismatch {
            entity: "trap",
            expected: TRAP_SCHEMA_VERSION,
            found: record.schema_version,
        });
    }
    Ok(record)
}

fn decode_cooldown(bytes: &[u8]) -> Result<DateTime<Utc>, EconomyError> {
    let record: CooldownRecord = bincode::deserialize(bytes)?;
    Ok(record.last_used)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::economy::types::{QualityTier, Slot};
    use tempfile::TempDir;

    #[test]
    fn committed_writes_are_visible() {
        let dir = TempDir::new().expect("tempdir");
        let store = SledStoreBuilder::new(dir.path()).open().expect("store");
        let user = UserId::new();

        let mut tx = store.begin().expect("begin");
        let mut inv = tx.get_inventory(user).expect("inv");
        inv.slots.push(Slot::new(4, 10, QualityTier::Rare));
        tx.update_inventory(user, &inv).expect("update");
        assert!(store.get_inventory(user).unwrap().is_empty(), "staged writes stay private");
        tx.commit().expect("commit");

        let fetched = store.get_inventory(user).expect("get");
        assert_eq!(fetched.quantity_of(4, QualityTier::Rare), 10);
        assert_eq!(fetched.schema_version, INVENTORY_SCHEMA_VERSION);
    }

    #[test]
    fn rollback_discards_writes_and_frees_rows() {
        let dir = TempDir::new().expect("tempdir");
        let store = SledStoreBuilder::new(dir.path())
            .lock_wait(Duration::from_millis(50))
            .open()
            .expect("store");
        let user = UserId::new();

        let mut tx = store.begin().expect("begin");
        tx.set_last_used(user, ActionKind::Search, Utc::now())
            .expect("stamp");
        tx.rollback().expect("rollback");
        assert_eq!(store.last_used(user, ActionKind::Search).unwrap(), None);

        let mut tx = store.begin().expect("second begin");
        assert_eq!(tx.last_used_for_update(user, ActionKind::Search).unwrap(), None);
        tx.commit().expect("commit");
    }

    #[test]
    fn locked_row_blocks_second_transaction() {
        let dir = TempDir::new().expect("tempdir");
        let store = SledStoreBuilder::new(dir.path())
            .lock_wait(Duration::from_millis(30))
            .open()
            .expect("store");
        let user = UserId::new();

        let mut first = store.begin().expect("begin");
        first.get_inventory(user).expect("lock");
        let mut second = store.begin().expect("begin");
        let err = second.get_inventory(user).unwrap_err();
        assert!(err.is_transaction_failure());
        drop(first);
        second.get_inventory(user).expect("free after drop");
    }

    #[test]
    fn user_indexes_follow_renames() {
        let dir = TempDir::new().expect("tempdir");
        let store = SledStoreBuilder::new(dir.path()).open().expect("store");
        let mut user = User::new("Alice", Platform::Twitch, "tw-1");

        let mut tx = store.begin().unwrap();
        tx.put_user(&user).unwrap();
        tx.commit().unwrap();
        assert!(store
            .find_user_by_username(Platform::Twitch, "alice")
            .unwrap()
            .is_some());

        user.username = "alice_renamed".into();
        let mut tx = store.begin().unwrap();
        tx.put_user(&user).unwrap();
        tx.commit().unwrap();

        assert!(store
            .find_user_by_username(Platform::Twitch, "alice")
            .unwrap()
            .is_none());
        let found = store
            .find_user_by_platform_id(Platform::Twitch, "tw-1")
            .unwrap()
            .expect("indexed by platform id");
        assert_eq!(found.username, "alice_renamed");
        assert_eq!(store.stats().unwrap().users, 1);
    }

    #[test]
    fn shared_display_names_keep_every_holder() {
        let dir = TempDir::new().expect("tempdir");
        let store = SledStoreBuilder::new(dir.path()).open().expect("store");
        let first = User::new("sam", Platform::Twitch, "tw-1");
        let mut second = User::new("Sam", Platform::Twitch, "tw-2");

        for user in [&first, &second] {
            let mut tx = store.begin().unwrap();
            tx.put_user(user).unwrap();
            tx.commit().unwrap();
        }
        let newest = store.find_user_by_username(Platform::Twitch, "sam").unwrap();
        assert_eq!(newest.map(|u| u.id), Some(second.id));

        // Renaming the newest holder hands the name back to the other one.
        second.username = "sammy".into();
        let mut tx = store.begin().unwrap();
        tx.put_user(&second).unwrap();
        tx.commit().unwrap();
        let found = store.find_user_by_username(Platform::Twitch, "SAM").unwrap();
        assert_eq!(found.map(|u| u.id), Some(first.id));

        let mut tx = store.begin().unwrap();
        tx.delete_user(first.id).unwrap();
        tx.commit().unwrap();
        assert!(store
            .find_user_by_username(Platform::Twitch, "sam")
            .unwrap()
            .is_none());
        let renamed = store.find_user_by_username(Platform::Twitch, "sammy").unwrap();
        assert_eq!(renamed.map(|u| u.id), Some(second.id));
    }

    #[test]
    fn unlocked_store_reports_capability() {
        let dir = TempDir::new().expect("tempdir");
        let store = SledStoreBuilder::new(dir.path())
            .without_row_locks()
            .open()
            .expect("store");
        assert!(!store.capabilities().serializes_writers);
    }
}
