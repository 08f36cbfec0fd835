//! Raft log storage in the node's data directory.
//!
//! Implements `raft::Storage` on top of sled so the log, the hard state and
//! the latest snapshot survive restarts.
//!
//! ```text
//! quorate-raft.db
//! ├── raft_entries/     index (big endian) -> Entry
//! └── raft_state/
//!     ├── hard_state    -> HardState (term, vote, commit)
//!     ├── conf_state    -> ConfState (voters)
//!     ├── snapshot      -> Snapshot (throttle map + metadata)
//!     ├── snapshot_meta -> snapshot index ++ snapshot term
//!     └── first_index   -> u64
//! ```

use crate::common::{Error, Result};
use protobuf::Message as _;
use raft::eraftpb::{ConfState, Entry, HardState, Snapshot};
use raft::{Error as RaftCoreError, RaftState, Storage, StorageError as RaftStorageError};
use std::path::Path;

/// File name of the raft database inside the data directory
pub const RAFT_DB_FILE: &str = "quorate-raft.db";

const TREE_ENTRIES: &str = "raft_entries";
const TREE_STATE: &str = "raft_state";

const KEY_HARD_STATE: &[u8] = b"hard_state";
const KEY_CONF_STATE: &[u8] = b"conf_state";
const KEY_SNAPSHOT: &[u8] = b"snapshot";
const KEY_SNAPSHOT_META: &[u8] = b"snapshot_meta";
const KEY_FIRST_INDEX: &[u8] = b"first_index";

/// Durable raft storage backed by sled
pub struct RaftStorage {
    db: sled::Db,
    entries: sled::Tree,
    state: sled::Tree,
}

impl RaftStorage {
    /// Open or create the raft database under `data_dir`
    pub fn open(data_dir: impl AsRef<Path>) -> Result<Self> {
        let data_dir = data_dir.as_ref();
        std::fs::create_dir_all(data_dir)?;
        let db = sled::open(data_dir.join(RAFT_DB_FILE))?;
        let entries = db.open_tree(TREE_ENTRIES)?;
        let state = db.open_tree(TREE_STATE)?;

        if state.get(KEY_FIRST_INDEX)?.is_none() {
            state.insert(KEY_FIRST_INDEX, 1u64.to_be_bytes().to_vec())?;
        }

        Ok(Self { db, entries, state })
    }

    pub fn first_index_impl(&self) -> Result<u64> {
        match self.state.get(KEY_FIRST_INDEX)? {
            Some(bytes) => decode_u64(&bytes),
            None => Ok(1),
        }
    }

    pub fn last_index_impl(&self) -> Result<u64> {
        match self.entries.last()? {
            Some((key, _)) => decode_u64(&key),
            None => Ok(self.first_index_impl()?.saturating_sub(1)),
        }
    }

    /// Append entries, dropping any existing suffix they conflict with
    pub fn append(&self, entries: &[Entry]) -> Result<()> {
        let Some(first_new) = entries.first().map(|e| e.index) else {
            return Ok(());
        };
        let last = self.last_index_impl()?;

        let mut batch = sled::Batch::default();
        for idx in first_new..=last {
            batch.remove(idx.to_be_bytes().to_vec());
        }
        for entry in entries {
            batch.insert(entry.index.to_be_bytes().to_vec(), entry.write_to_bytes()?);
        }
        self.entries.apply_batch(batch)?;
        Ok(())
    }

    pub fn hard_state(&self) -> Result<HardState> {
        match self.state.get(KEY_HARD_STATE)? {
            Some(bytes) => Ok(HardState::parse_from_bytes(&bytes)?),
            None => Ok(HardState::default()),
        }
    }

    pub fn set_hard_state(&self, hs: &HardState) -> Result<()> {
        self.state.insert(KEY_HARD_STATE, hs.write_to_bytes()?)?;
        Ok(())
    }

    /// Persist a commit index advanced outside of a full hard-state update
    pub fn set_commit(&self, commit: u64) -> Result<()> {
        let mut hs = self.hard_state()?;
        hs.commit = commit;
        self.set_hard_state(&hs)
    }

    pub fn conf_state(&self) -> Result<ConfState> {
        match self.state.get(KEY_CONF_STATE)? {
            Some(bytes) => Ok(ConfState::parse_from_bytes(&bytes)?),
            None => Ok(ConfState::default()),
        }
    }

    pub fn set_conf_state(&self, cs: &ConfState) -> Result<()> {
        self.state.insert(KEY_CONF_STATE, cs.write_to_bytes()?)?;
        Ok(())
    }

    /// Latest stored snapshot (empty when none was taken yet)
    pub fn latest_snapshot(&self) -> Result<Snapshot> {
        match self.state.get(KEY_SNAPSHOT)? {
            Some(bytes) => Ok(Snapshot::parse_from_bytes(&bytes)?),
            None => Ok(Snapshot::default()),
        }
    }

    fn snapshot_meta(&self) -> Result<(u64, u64)> {
        match self.state.get(KEY_SNAPSHOT_META)? {
            Some(bytes) if bytes.len() == 16 => {
                Ok((decode_u64(&bytes[..8])?, decode_u64(&bytes[8..])?))
            }
            Some(_) => Err(Error::Serialization("invalid snapshot metadata".into())),
            None => Ok((0, 0)),
        }
    }

    fn store_snapshot(&self, snapshot: &Snapshot) -> Result<()> {
        let meta = snapshot.get_metadata();
        let mut packed = Vec::with_capacity(16);
        packed.extend_from_slice(&meta.index.to_be_bytes());
        packed.extend_from_slice(&meta.term.to_be_bytes());

        self.state.insert(KEY_SNAPSHOT, snapshot.write_to_bytes()?)?;
        self.state.insert(KEY_SNAPSHOT_META, packed)?;
        Ok(())
    }

    /// Install a snapshot received from the leader, discarding the local log
    pub fn apply_snapshot(&self, snapshot: &Snapshot) -> Result<()> {
        let meta = snapshot.get_metadata();

        self.entries.clear()?;
        self.state
            .insert(KEY_FIRST_INDEX, (meta.index + 1).to_be_bytes().to_vec())?;
        self.store_snapshot(snapshot)?;
        self.set_conf_state(meta.get_conf_state())?;

        let mut hs = self.hard_state()?;
        hs.commit = hs.commit.max(meta.index);
        hs.term = hs.term.max(meta.term);
        self.set_hard_state(&hs)?;
        Ok(())
    }

    /// Record a snapshot of the state machine taken at applied `index`
    pub fn create_snapshot(&self, index: u64, data: Vec<u8>) -> Result<Snapshot> {
        let term = self.term(index).map_err(|e| Error::Raft(e.to_string()))?;

        let mut snapshot = Snapshot::default();
        snapshot.data = data.into();
        let meta = snapshot.mut_metadata();
        meta.index = index;
        meta.term = term;
        meta.set_conf_state(self.conf_state()?);

        self.store_snapshot(&snapshot)?;
        Ok(snapshot)
    }

    /// Drop every entry before `compact_index`
    pub fn compact(&self, compact_index: u64) -> Result<()> {
        let first = self.first_index_impl()?;
        if compact_index <= first {
            return Ok(());
        }
        let last = self.last_index_impl()?;
        if compact_index > last + 1 {
            return Err(Error::Raft(format!(
                "compact index {} is beyond last index {}",
                compact_index, last
            )));
        }

        let mut batch = sled::Batch::default();
        for idx in first..compact_index {
            batch.remove(idx.to_be_bytes().to_vec());
        }
        self.entries.apply_batch(batch)?;
        self.state
            .insert(KEY_FIRST_INDEX, compact_index.to_be_bytes().to_vec())?;
        Ok(())
    }

    /// Flush all data to disk
    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }

    fn get_entry(&self, index: u64) -> Result<Option<Entry>> {
        match self.entries.get(index.to_be_bytes())? {
            Some(bytes) => Ok(Some(Entry::parse_from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }
}

impl Storage for RaftStorage {
    fn initial_state(&self) -> raft::Result<RaftState> {
        Ok(RaftState {
            hard_state: self.hard_state().map_err(to_raft_error)?,
            conf_state: self.conf_state().map_err(to_raft_error)?,
        })
    }

    fn entries(
        &self,
        low: u64,
        high: u64,
        max_size: impl Into<Option<u64>>,
        _context: raft::GetEntriesContext,
    ) -> raft::Result<Vec<Entry>> {
        let first = self.first_index_impl().map_err(to_raft_error)?;
        let last = self.last_index_impl().map_err(to_raft_error)?;

        if low < first {
            return Err(RaftCoreError::Store(RaftStorageError::Compacted));
        }
        if high > last + 1 {
            return Err(RaftCoreError::Store(RaftStorageError::Unavailable));
        }

        let max_size = max_size.into().unwrap_or(u64::MAX);
        let mut entries = Vec::new();
        let mut size: u64 = 0;

        for idx in low..high {
            let entry = self
                .get_entry(idx)
                .map_err(to_raft_error)?
                .ok_or(RaftCoreError::Store(RaftStorageError::Unavailable))?;
            let entry_size = u64::from(entry.compute_size());

            // Always hand back at least one entry
            if !entries.is_empty() && size + entry_size > max_size {
                break;
            }
            size += entry_size;
            entries.push(entry);
        }

        Ok(entries)
    }

    fn term(&self, idx: u64) -> raft::Result<u64> {
        let (snap_index, snap_term) = self.snapshot_meta().map_err(to_raft_error)?;
        if idx == snap_index {
            return Ok(snap_term);
        }

        let first = self.first_index_impl().map_err(to_raft_error)?;
        if idx < first {
            return Err(RaftCoreError::Store(RaftStorageError::Compacted));
        }

        match self.get_entry(idx).map_err(to_raft_error)? {
            Some(entry) => Ok(entry.term),
            None => Err(RaftCoreError::Store(RaftStorageError::Unavailable)),
        }
    }

    fn first_index(&self) -> raft::Result<u64> {
        self.first_index_impl().map_err(to_raft_error)
    }

    fn last_index(&self) -> raft::Result<u64> {
        self.last_index_impl().map_err(to_raft_error)
    }

    fn snapshot(&self, _request_index: u64, _to: u64) -> raft::Result<Snapshot> {
        self.latest_snapshot().map_err(to_raft_error)
    }
}

fn decode_u64(bytes: &[u8]) -> Result<u64> {
    let arr: [u8; 8] = bytes
        .try_into()
        .map_err(|_| Error::Serialization("expected 8-byte integer".into()))?;
    Ok(u64::from_be_bytes(arr))
}

fn to_raft_error(e: Error) -> RaftCoreError {
    RaftCoreError::Store(RaftStorageError::Other(Box::new(e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_storage() -> (RaftStorage, TempDir) {
        let dir = TempDir::new().unwrap();
        let storage = RaftStorage::open(dir.path()).unwrap();
        (storage, dir)
    }

    fn entry(index: u64, term: u64) -> Entry {
        let mut entry = Entry::default();
        entry.index = index;
        entry.term = term;
        entry.data = format!("data-{}", index).into_bytes().into();
        entry
    }

    #[test]
    fn test_empty_log() {
        let (storage, _dir) = create_test_storage();

        let state = storage.initial_state().unwrap();
        assert_eq!(state.hard_state, HardState::default());
        assert_eq!(storage.first_index().unwrap(), 1);
        assert_eq!(storage.last_index().unwrap(), 0);
        assert_eq!(storage.term(0).unwrap(), 0);
    }

    #[test]
    fn test_append_truncates_conflicts() {
        let (storage, _dir) = create_test_storage();
        storage
            .append(&(1..=5).map(|i| entry(i, 1)).collect::<Vec<_>>())
            .unwrap();

        // A new leader rewrites the tail from index 3
        storage.append(&[entry(3, 2)]).unwrap();
        assert_eq!(storage.last_index().unwrap(), 3);
        assert_eq!(storage.term(3).unwrap(), 2);

        let got = storage
            .entries(1, 4, None, raft::GetEntriesContext::empty(false))
            .unwrap();
        assert_eq!(got.len(), 3);
        assert!(storage
            .entries(1, 6, None, raft::GetEntriesContext::empty(false))
            .is_err());
    }

    #[test]
    fn test_hard_state_and_commit() {
        let (storage, _dir) = create_test_storage();

        let mut hs = HardState::default();
        hs.term = 5;
        hs.vote = 2;
        hs.commit = 10;
        storage.set_hard_state(&hs).unwrap();
        storage.set_commit(12).unwrap();

        let state = storage.initial_state().unwrap();
        assert_eq!(state.hard_state.term, 5);
        assert_eq!(state.hard_state.vote, 2);
        assert_eq!(state.hard_state.commit, 12);
    }

    #[test]
    fn test_snapshot_then_compact() {
        let (storage, _dir) = create_test_storage();
        let mut cs = ConfState::default();
        cs.voters = vec![1, 2, 3];
        storage.set_conf_state(&cs).unwrap();
        storage
            .append(&(1..=10).map(|i| entry(i, 1)).collect::<Vec<_>>())
            .unwrap();

        let snapshot = storage.create_snapshot(6, b"map".to_vec()).unwrap();
        assert_eq!(snapshot.get_metadata().index, 6);
        assert_eq!(snapshot.get_metadata().get_conf_state().voters, vec![1, 2, 3]);
        storage.compact(7).unwrap();

        assert_eq!(storage.first_index().unwrap(), 7);
        assert_eq!(storage.term(6).unwrap(), 1);
        assert!(matches!(
            storage.term(5),
            Err(RaftCoreError::Store(RaftStorageError::Compacted))
        ));
        assert_eq!(storage.snapshot(0, 0).unwrap().get_data(), b"map");
    }

    #[test]
    fn test_apply_snapshot_resets_log() {
        let (storage, _dir) = create_test_storage();
        storage
            .append(&(1..=3).map(|i| entry(i, 1)).collect::<Vec<_>>())
            .unwrap();

        let mut snapshot = Snapshot::default();
        snapshot.data = b"remote".to_vec().into();
        snapshot.mut_metadata().index = 20;
        snapshot.mut_metadata().term = 4;
        storage.apply_snapshot(&snapshot).unwrap();

        assert_eq!(storage.first_index().unwrap(), 21);
        assert_eq!(storage.last_index().unwrap(), 20);
        assert_eq!(storage.term(20).unwrap(), 4);
        assert_eq!(storage.hard_state().unwrap().commit, 20);
    }

    #[test]
    fn test_reopen_keeps_log() {
        let dir = TempDir::new().unwrap();
        {
            let storage = RaftStorage::open(dir.path()).unwrap();
            storage.append(&[entry(1, 1), entry(2, 1)]).unwrap();
            storage.flush().unwrap();
        }
        let storage = RaftStorage::open(dir.path()).unwrap();
        assert_eq!(storage.last_index().unwrap(), 2);
    }
}
