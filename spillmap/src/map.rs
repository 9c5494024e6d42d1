//! The disk-spilling hash map.
//!
//! Keys hash to one of a power-of-two number of buckets; each bucket chains
//! its live entries and owns an append-only log file. Two global LRU lists
//! partition every key and value handle by residency, and a two-phase
//! rebalance after each `get`/`insert` converges the resident set to the
//! configured memory budget, loading before evicting so one pass never does
//! both to the same entry.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use rustc_hash::FxHashMap;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::bucket::{Bucket, DiskAddress, Pair};
use crate::codec;
use crate::error::{Error, Result};
use crate::handle::{Handle, HandleId, ListKind, NodeRef};
use crate::list::{self, LinkedList, NodeId, TrackedList};

pub const DEFAULT_MEMORY_THRESHOLD: usize = 64 * 1024;
pub const DEFAULT_BUCKET_COUNT: usize = 4;

/// Configuration for opening a [`SpillMap`].
#[derive(Debug, Clone)]
pub struct Options {
    path: PathBuf,
    buckets: usize,
    memory_threshold: usize,
}

impl Options {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            buckets: DEFAULT_BUCKET_COUNT,
            memory_threshold: DEFAULT_MEMORY_THRESHOLD,
        }
    }

    /// Number of hash buckets, rounded up to the next power of two, minimum 1.
    pub fn buckets(mut self, count: usize) -> Self {
        self.buckets = count;
        self
    }

    /// Soft byte budget for resident keys and values. `0` keeps the map near
    /// fully on disk: every mutation spills immediately.
    pub fn memory_threshold(mut self, bytes: usize) -> Self {
        self.memory_threshold = bytes;
        self
    }

    /// Opens the map, destroying whatever is at the configured path.
    pub fn open<K, V>(self) -> Result<SpillMap<K, V>>
    where
        K: Serialize + DeserializeOwned + PartialEq + Clone,
        V: Serialize + DeserializeOwned + Clone,
    {
        SpillMap::with_options(self)
    }
}

/// A memory-bounded hash map that spills cold entries to per-bucket log
/// files and reloads them on access.
pub struct SpillMap<K, V> {
    dir: PathBuf,
    memory_threshold: usize,
    mask: u64,
    buckets: Vec<Bucket>,
    in_memory: TrackedList<Handle<K, V>>,
    on_disk: LinkedList<Handle<K, V>>,
    index: FxHashMap<HandleId, NodeRef>,
    next_handle: u64,
}

impl<K, V> SpillMap<K, V> {
    /// Directory holding the bucket log files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    pub fn memory_threshold(&self) -> usize {
        self.memory_threshold
    }

    /// Current estimate of resident key/value bytes.
    pub fn memory_usage(&self) -> usize {
        self.in_memory.usage()
    }

    /// Number of key/value pairs in the map.
    pub fn len(&self) -> usize {
        let handles = self.index.len();
        assert!(
            handles % 2 == 0,
            "reverse index holds {handles} handles, expected an even count"
        );
        handles / 2
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Looks a handle up through the reverse index.
    fn handle(&self, id: HandleId) -> Result<&Handle<K, V>> {
        let node_ref = self
            .index
            .get(&id)
            .ok_or_else(|| Error::corrupt("handle missing from reverse index"))?;
        let handle = match node_ref.list() {
            ListKind::InMemory => self.in_memory.get(node_ref.node()),
            ListKind::OnDisk => self.on_disk.get(node_ref.node()),
        };
        handle.ok_or_else(|| Error::corrupt("reverse index points at a vacated node"))
    }

    /// Moves a handle's node to the MRU end of whichever list holds it.
    fn promote(&mut self, id: HandleId) -> Result<()> {
        let node_ref = self
            .index
            .get(&id)
            .ok_or_else(|| Error::corrupt("handle missing from reverse index"))?;
        let moved = match node_ref.list() {
            ListKind::InMemory => self.in_memory.move_to_back(node_ref.node()),
            ListKind::OnDisk => self.on_disk.move_to_back(node_ref.node()),
        };
        if moved {
            Ok(())
        } else {
            Err(Error::corrupt("reverse index points at a vacated node"))
        }
    }

    /// Removes a handle from its list and the reverse index.
    fn drop_handle(&mut self, id: HandleId) -> Result<Handle<K, V>> {
        let node_ref = self
            .index
            .remove(&id)
            .ok_or_else(|| Error::corrupt("handle missing from reverse index"))?;
        let handle = match node_ref.list() {
            ListKind::InMemory => self.in_memory.remove(node_ref.node()),
            ListKind::OnDisk => self.on_disk.remove(node_ref.node()),
        };
        handle.ok_or_else(|| Error::corrupt("reverse index points at a vacated node"))
    }

    fn next_id(&mut self) -> HandleId {
        let id = HandleId(self.next_handle);
        self.next_handle += 1;
        id
    }
}

impl<K, V> SpillMap<K, V>
where
    K: Serialize + DeserializeOwned + PartialEq + Clone,
    V: Serialize + DeserializeOwned + Clone,
{
    /// Opens a map with default options under `path`.
    pub fn new_in(path: impl AsRef<Path>) -> Result<Self> {
        Options::new(path).open()
    }

    fn with_options(options: Options) -> Result<Self> {
        let Options {
            path,
            buckets,
            memory_threshold,
        } = options;

        match fs::remove_dir_all(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        fs::create_dir_all(&path)?;

        let bucket_count = buckets.max(1).next_power_of_two();
        let buckets = (0..bucket_count)
            .map(|i| Bucket::create(path.join(format!("bucket_{i}.log"))))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            dir: path,
            memory_threshold,
            mask: (bucket_count - 1) as u64,
            buckets,
            in_memory: TrackedList::new(),
            on_disk: LinkedList::new(),
            index: FxHashMap::default(),
            next_handle: 0,
        })
    }

    fn route(&self, key: &K) -> Result<usize> {
        let bytes = codec::encode(key)?;
        Ok((codec::stable_hash(&bytes) & self.mask) as usize)
    }

    /// Scans a bucket's chain for `key`, comparing resolved key values.
    fn find_entry(&self, bucket_idx: usize, key: &K) -> Result<Option<(NodeId, Pair)>> {
        let bucket = &self.buckets[bucket_idx];
        for (node, pair) in bucket.chain.iter() {
            let key_handle = self.handle(pair.key)?;
            if key_handle.resolve_key(bucket)? == *key {
                return Ok(Some((node, *pair)));
            }
        }
        Ok(None)
    }

    /// Returns the value stored under `key`, promoting the entry to the MRU
    /// position of its chain and of each handle's current list.
    pub fn get(&mut self, key: &K) -> Result<V> {
        let bucket_idx = self.route(key)?;
        let Some((chain_node, pair)) = self.find_entry(bucket_idx, key)? else {
            return Err(Error::KeyNotFound);
        };
        let value = {
            let bucket = &self.buckets[bucket_idx];
            self.handle(pair.value)?.resolve_value(bucket)?
        };

        self.buckets[bucket_idx].chain.move_to_back(chain_node);
        self.promote(pair.key)?;
        self.promote(pair.value)?;
        self.rebalance()?;
        Ok(value)
    }

    /// Inserts or replaces the value under `key`.
    pub fn insert(&mut self, key: K, value: V) -> Result<()> {
        let bucket_idx = self.route(&key)?;
        match self.find_entry(bucket_idx, &key)? {
            Some((chain_node, pair)) => {
                // A fresh resident handle supersedes the old value handle,
                // whose record (if any) stays behind as dead bytes.
                self.drop_handle(pair.value)?;
                let value_id = self.next_id();
                let handle = Handle::resident_value(value_id, bucket_idx, value)?;
                let node = self.in_memory.push_back(handle);
                self.index
                    .insert(value_id, NodeRef::pack(ListKind::InMemory, node));

                let entry = self.buckets[bucket_idx]
                    .chain
                    .get_mut(chain_node)
                    .ok_or_else(|| Error::corrupt("chain entry vanished during insert"))?;
                entry.value = value_id;

                self.promote(pair.key)?;
            }
            None => {
                let key_id = self.next_id();
                let value_id = self.next_id();
                let key_handle = Handle::resident_key(key_id, bucket_idx, key)?;
                let value_handle = Handle::resident_value(value_id, bucket_idx, value)?;

                let key_node = self.in_memory.push_back(key_handle);
                let value_node = self.in_memory.push_back(value_handle);
                self.index
                    .insert(key_id, NodeRef::pack(ListKind::InMemory, key_node));
                self.index
                    .insert(value_id, NodeRef::pack(ListKind::InMemory, value_node));

                self.buckets[bucket_idx].chain.push_back(Pair {
                    key: key_id,
                    value: value_id,
                });
            }
        }
        self.rebalance()
    }

    /// Removes the entry under `key`. Frees memory budget but never disk
    /// bytes; those wait for [`SpillMap::compact`].
    pub fn remove(&mut self, key: &K) -> Result<()> {
        let bucket_idx = self.route(key)?;
        let Some((chain_node, pair)) = self.find_entry(bucket_idx, key)? else {
            return Err(Error::KeyNotFound);
        };
        self.buckets[bucket_idx]
            .chain
            .remove(chain_node)
            .ok_or_else(|| Error::corrupt("chain entry vanished during remove"))?;
        self.drop_handle(pair.key)?;
        self.drop_handle(pair.value)?;
        Ok(())
    }

    /// Whether `key` is present. Never promotes or rebalances.
    pub fn contains_key(&self, key: &K) -> Result<bool> {
        let bucket_idx = self.route(key)?;
        Ok(self.find_entry(bucket_idx, key)?.is_some())
    }

    /// Iterates all keys, buckets in index order, chain order within each.
    pub fn keys(&self) -> Keys<'_, K, V> {
        Keys {
            walk: Walk::new(self),
        }
    }

    /// Iterates all `(key, value)` pairs in the same order as [`SpillMap::keys`].
    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter {
            walk: Walk::new(self),
        }
    }

    /// Truncates every bucket file and resets all in-memory state.
    pub fn clear(&mut self) -> Result<()> {
        for bucket in &mut self.buckets {
            bucket.clear()?;
        }
        self.in_memory.clear();
        self.on_disk.clear();
        self.index.clear();
        Ok(())
    }

    /// Rewrites every bucket file to hold only the records of live spilled
    /// handles, in ascending address order, and re-addresses those handles.
    /// Buckets with nothing live end up as empty files.
    pub fn compact(&mut self) -> Result<()> {
        let mut live: Vec<Vec<(HandleId, DiskAddress)>> = vec![Vec::new(); self.buckets.len()];
        for (_, handle) in self.on_disk.iter() {
            let addr = handle
                .disk_addr()
                .ok_or_else(|| Error::corrupt("resident handle in the disk list"))?;
            live[handle.bucket()].push((handle.id(), addr));
        }

        for (bucket_idx, mut records) in live.into_iter().enumerate() {
            records.sort_by_key(|(_, addr)| *addr);
            let addrs: Vec<DiskAddress> = records.iter().map(|(_, addr)| *addr).collect();
            let new_addrs = self.buckets[bucket_idx].rewrite(&addrs)?;
            for ((id, _), new_addr) in records.into_iter().zip(new_addrs) {
                self.readdress(id, new_addr)?;
            }
        }
        Ok(())
    }

    fn readdress(&mut self, id: HandleId, addr: DiskAddress) -> Result<()> {
        let node_ref = self
            .index
            .get(&id)
            .ok_or_else(|| Error::corrupt("handle missing from reverse index"))?;
        if node_ref.list() != ListKind::OnDisk {
            return Err(Error::corrupt("compacted handle left the disk list"));
        }
        let handle = self
            .on_disk
            .get_mut(node_ref.node())
            .ok_or_else(|| Error::corrupt("reverse index points at a vacated node"))?;
        handle.set_disk_addr(addr)
    }

    /// Two phases, load before evict: first fill spare budget from the disk
    /// list's LRU end, then spill from the memory list's LRU end until the
    /// estimate fits the threshold again.
    fn rebalance(&mut self) -> Result<()> {
        // Strictly below: at exactly the threshold there is no spare budget,
        // and loading here would only evict again in the second phase.
        while self.in_memory.usage() < self.memory_threshold {
            let Some(mut handle) = self.on_disk.pop_front() else {
                break;
            };
            handle.load(&self.buckets[handle.bucket()])?;
            let id = handle.id();
            let node = self.in_memory.push_back(handle);
            self.index.insert(id, NodeRef::pack(ListKind::InMemory, node));
        }

        while self.in_memory.usage() > self.memory_threshold {
            let Some(mut handle) = self.in_memory.pop_front() else {
                return Err(Error::corrupt(
                    "tracked usage nonzero with an empty in-memory list",
                ));
            };
            handle.spill(&mut self.buckets[handle.bucket()])?;
            let id = handle.id();
            let node = self.on_disk.push_back(handle);
            self.index.insert(id, NodeRef::pack(ListKind::OnDisk, node));
        }
        Ok(())
    }
}

/// Shared bucket-by-bucket, chain-order walk behind both iterators.
struct Walk<'a, K, V> {
    map: &'a SpillMap<K, V>,
    bucket_idx: usize,
    chain: Option<list::Iter<'a, Pair>>,
}

impl<'a, K, V> Walk<'a, K, V> {
    fn new(map: &'a SpillMap<K, V>) -> Self {
        Self {
            map,
            bucket_idx: 0,
            chain: None,
        }
    }

    fn next_entry(&mut self) -> Option<(&'a Bucket, Pair)> {
        loop {
            match self.chain.as_mut() {
                Some(chain) => match chain.next() {
                    Some((_, pair)) => {
                        return Some((&self.map.buckets[self.bucket_idx], *pair));
                    }
                    None => {
                        self.chain = None;
                        self.bucket_idx += 1;
                    }
                },
                None => {
                    let bucket = self.map.buckets.get(self.bucket_idx)?;
                    self.chain = Some(bucket.chain.iter());
                }
            }
        }
    }
}

/// Lazy key iterator; spilled keys are read through from disk.
pub struct Keys<'a, K, V> {
    walk: Walk<'a, K, V>,
}

impl<'a, K, V> Iterator for Keys<'a, K, V>
where
    K: Serialize + DeserializeOwned + PartialEq + Clone,
    V: Serialize + DeserializeOwned + Clone,
{
    type Item = Result<K>;

    fn next(&mut self) -> Option<Self::Item> {
        let (bucket, pair) = self.walk.next_entry()?;
        let key = match self.walk.map.handle(pair.key) {
            Ok(handle) => handle.resolve_key(bucket),
            Err(e) => Err(e),
        };
        Some(key)
    }
}

/// Lazy pair iterator; spilled keys and values are read through from disk.
pub struct Iter<'a, K, V> {
    walk: Walk<'a, K, V>,
}

impl<'a, K, V> Iterator for Iter<'a, K, V>
where
    K: Serialize + DeserializeOwned + PartialEq + Clone,
    V: Serialize + DeserializeOwned + Clone,
{
    type Item = Result<(K, V)>;

    fn next(&mut self) -> Option<Self::Item> {
        let (bucket, pair) = self.walk.next_entry()?;
        let key = match self.walk.map.handle(pair.key) {
            Ok(handle) => handle.resolve_key(bucket),
            Err(e) => Err(e),
        };
        let key = match key {
            Ok(key) => key,
            Err(e) => return Some(Err(e)),
        };
        let value = match self.walk.map.handle(pair.value) {
            Ok(handle) => handle.resolve_value(bucket),
            Err(e) => Err(e),
        };
        let value = match value {
            Ok(value) => value,
            Err(e) => return Some(Err(e)),
        };
        Some(Ok((key, value)))
    }
}
