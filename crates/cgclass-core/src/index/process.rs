//! Process index keyed by pid
//!
//! A fixed number of buckets, each holding a doubly linked chain of arena
//! slots. Slots carry their own `prev`/`next` links and bucket number, so a
//! caller holding a [`ProcHandle`] can detach a record in O(1) without
//! rehashing its pid.
//!
//! # Capacity
//! The bucket count is fixed at construction and never grows. With the
//! default of 1024 buckets, lookups stay short while the number of live
//! processes is in the low thousands; far beyond that, chains grow linearly
//! and lookup cost grows with them. [`ProcessIndex::stats`] reports the
//! longest chain so the ceiling can be observed.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, trace};

use crate::error::{RegistryError, Result};
use crate::types::Process;

/// Default number of buckets in the process index
pub const DEFAULT_PROCESS_BUCKETS: usize = 1024;

static NEXT_INDEX_ID: AtomicU64 = AtomicU64::new(1);

/// Stable reference to a record stored in the process index
///
/// The generation is bumped every time a slot is vacated, so a handle to a
/// detached record never resolves to whatever reuses its slot. Handles
/// also carry the id of the index that issued them and are rejected by any
/// other index, including one created after a teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProcHandle {
    index: u64,
    slot: usize,
    generation: u32,
}

#[derive(Debug, Clone, Copy, Default)]
struct Chain {
    head: Option<usize>,
    tail: Option<usize>,
}

#[derive(Debug)]
struct Entry {
    /// Key the record was hashed under
    pid: u32,
    bucket: usize,
    prev: Option<usize>,
    next: Option<usize>,
    process: Process,
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    entry: Option<Entry>,
}

/// Occupancy figures for the process index
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProcessIndexStats {
    pub buckets: usize,
    pub processes: usize,
    pub occupied_buckets: usize,
    pub longest_chain: usize,
}

impl ProcessIndexStats {
    /// Average chain length over occupied buckets
    pub fn average_chain(&self) -> f64 {
        if self.occupied_buckets == 0 {
            return 0.0;
        }
        self.processes as f64 / self.occupied_buckets as f64
    }
}

/// Pid -> process table with fixed bucket count
///
/// No duplicate check is performed on insert: pids are unique while a
/// process is alive, and the caller is trusted to remove a record before a
/// recycled pid is inserted again. If a duplicate does get in, both records
/// stay in the chain and lookups return the one inserted first.
#[derive(Debug)]
pub struct ProcessIndex {
    id: u64,
    buckets: Vec<Chain>,
    slots: Vec<Slot>,
    /// Vacated slots, reused LIFO
    free: Vec<usize>,
    len: usize,
}

impl ProcessIndex {
    pub fn new() -> Result<Self> {
        Self::with_buckets(DEFAULT_PROCESS_BUCKETS)
    }

    /// Create an index with `bucket_count` buckets
    ///
    /// `bucket_count` must be a non-zero power of two so the bucket can be
    /// computed with a mask.
    pub fn with_buckets(bucket_count: usize) -> Result<Self> {
        if !bucket_count.is_power_of_two() {
            return Err(RegistryError::InvalidBucketCount(bucket_count));
        }

        let mut buckets = Vec::new();
        buckets
            .try_reserve_exact(bucket_count)
            .map_err(|source| RegistryError::Allocation {
                index: "process",
                source,
            })?;
        buckets.resize(bucket_count, Chain::default());

        Ok(Self {
            id: NEXT_INDEX_ID.fetch_add(1, Ordering::Relaxed),
            buckets,
            slots: Vec::new(),
            free: Vec::new(),
            len: 0,
        })
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Bucket a pid hashes to: `(pid - 1) & (bucket_count - 1)`
    pub fn bucket_of(&self, pid: u32) -> usize {
        (pid.wrapping_sub(1) as usize) & (self.buckets.len() - 1)
    }

    /// Append a process to the tail of its bucket chain
    pub fn insert(&mut self, process: Process) -> ProcHandle {
        let pid = process.pid;
        let bucket = self.bucket_of(pid);
        let tail = self.buckets[bucket].tail;

        let entry = Entry {
            pid,
            bucket,
            prev: tail,
            next: None,
            process,
        };

        let slot = match self.free.pop() {
            Some(slot) => {
                self.slots[slot].entry = Some(entry);
                slot
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    entry: Some(entry),
                });
                self.slots.len() - 1
            }
        };

        match tail {
            Some(tail) => self.entry_mut(tail).next = Some(slot),
            None => self.buckets[bucket].head = Some(slot),
        }
        self.buckets[bucket].tail = Some(slot);
        self.len += 1;

        trace!("Hashed process {} into bucket {}", pid, bucket);

        ProcHandle {
            index: self.id,
            slot,
            generation: self.slots[slot].generation,
        }
    }

    /// Detach the process with `pid` and hand it back to the caller
    pub fn remove(&mut self, pid: u32) -> Option<Process> {
        let slot = self.find(pid)?;
        Some(self.detach(slot))
    }

    /// Detach a process the caller already holds a handle for
    ///
    /// The bucket is taken from the record itself rather than recomputed.
    /// Returns `None` if the handle is stale.
    pub fn unhash(&mut self, handle: ProcHandle) -> Option<Process> {
        self.resolve(handle)?;
        Some(self.detach(handle.slot))
    }

    pub fn lookup(&self, pid: u32) -> Option<&Process> {
        let slot = self.find(pid)?;
        self.slots[slot].entry.as_ref().map(|e| &e.process)
    }

    /// Mutable access to a stored process
    ///
    /// The record stays filed under the pid it was inserted with; changing
    /// `Process::pid` through this reference does not rehash it.
    pub fn lookup_mut(&mut self, pid: u32) -> Option<&mut Process> {
        let slot = self.find(pid)?;
        self.slots[slot].entry.as_mut().map(|e| &mut e.process)
    }

    /// Handle of the process with `pid`, for a later `unhash` or `get`
    pub fn handle(&self, pid: u32) -> Option<ProcHandle> {
        let slot = self.find(pid)?;
        Some(ProcHandle {
            index: self.id,
            slot,
            generation: self.slots[slot].generation,
        })
    }

    pub fn get(&self, handle: ProcHandle) -> Option<&Process> {
        self.resolve(handle).map(|e| &e.process)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Iterate over stored processes in unspecified order
    pub fn iter(&self) -> impl Iterator<Item = &Process> {
        self.slots
            .iter()
            .filter_map(|slot| slot.entry.as_ref().map(|e| &e.process))
    }

    /// Pids in a bucket, head to tail
    pub fn chain(&self, bucket: usize) -> Vec<u32> {
        let mut pids = Vec::new();
        let mut cursor = self.buckets.get(bucket).and_then(|c| c.head);

        while let Some(slot) = cursor {
            let entry = self.entry(slot);
            pids.push(entry.pid);
            cursor = entry.next;
        }

        pids
    }

    pub fn stats(&self) -> ProcessIndexStats {
        let mut stats = ProcessIndexStats {
            buckets: self.buckets.len(),
            processes: self.len,
            ..ProcessIndexStats::default()
        };

        for chain in &self.buckets {
            let mut length = 0;
            let mut cursor = chain.head;
            while let Some(slot) = cursor {
                length += 1;
                cursor = self.entry(slot).next;
            }

            if length > 0 {
                stats.occupied_buckets += 1;
                stats.longest_chain = stats.longest_chain.max(length);
            }
        }

        stats
    }

    fn find(&self, pid: u32) -> Option<usize> {
        let mut cursor = self.buckets[self.bucket_of(pid)].head;

        while let Some(slot) = cursor {
            let entry = self.entry(slot);
            if entry.pid == pid {
                return Some(slot);
            }
            cursor = entry.next;
        }

        None
    }

    fn resolve(&self, handle: ProcHandle) -> Option<&Entry> {
        if handle.index != self.id {
            return None;
        }
        let slot = self.slots.get(handle.slot)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.entry.as_ref()
    }

    /// Unlink an occupied slot from its chain and vacate it
    fn detach(&mut self, slot: usize) -> Process {
        let (bucket, prev, next) = {
            let entry = self.entry(slot);
            (entry.bucket, entry.prev, entry.next)
        };

        match prev {
            Some(prev) => self.entry_mut(prev).next = next,
            None => self.buckets[bucket].head = next,
        }
        match next {
            Some(next) => self.entry_mut(next).prev = prev,
            None => self.buckets[bucket].tail = prev,
        }

        let vacated = &mut self.slots[slot];
        vacated.generation = vacated.generation.wrapping_add(1);
        let entry = vacated.entry.take();
        self.free.push(slot);
        self.len -= 1;

        match entry {
            Some(entry) => {
                debug!("Unhashed process {} from bucket {}", entry.pid, bucket);
                entry.process
            }
            None => unreachable!("detached slot {} was vacant", slot),
        }
    }

    // Chain links only ever point at occupied slots.
    fn entry(&self, slot: usize) -> &Entry {
        match self.slots[slot].entry.as_ref() {
            Some(entry) => entry,
            None => unreachable!("chain link to vacant slot {}", slot),
        }
    }

    fn entry_mut(&mut self, slot: usize) -> &mut Entry {
        match self.slots[slot].entry.as_mut() {
            Some(entry) => entry,
            None => unreachable!("chain link to vacant slot {}", slot),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn proc(pid: u32) -> Process {
        Process::new(pid, format!("/usr/bin/p{}", pid))
    }

    #[test]
    fn test_invalid_bucket_counts() {
        assert!(matches!(
            ProcessIndex::with_buckets(0),
            Err(RegistryError::InvalidBucketCount(0))
        ));
        assert!(matches!(
            ProcessIndex::with_buckets(1000),
            Err(RegistryError::InvalidBucketCount(1000))
        ));
        assert!(ProcessIndex::with_buckets(1).is_ok());
    }

    #[test]
    fn test_default_bucket_count() {
        let index = ProcessIndex::new().unwrap();
        assert_eq!(index.bucket_count(), DEFAULT_PROCESS_BUCKETS);
        assert!(index.is_empty());
    }

    #[test]
    fn test_bucket_mask() {
        let index = ProcessIndex::with_buckets(1024).unwrap();

        assert_eq!(index.bucket_of(1), 0);
        assert_eq!(index.bucket_of(1025), 0);
        assert_eq!(index.bucket_of(2049), 0);
        assert_eq!(index.bucket_of(2), 1);
        assert_eq!(index.bucket_of(1024), 1023);
        // pid 0 wraps to the last bucket
        assert_eq!(index.bucket_of(0), 1023);
    }

    #[test]
    fn test_colliding_pids() {
        let mut index = ProcessIndex::with_buckets(1024).unwrap();
        index.insert(proc(1));
        index.insert(proc(1025));

        assert_eq!(index.chain(0), vec![1, 1025]);
        assert_eq!(index.lookup(1).unwrap().pid, 1);
        assert_eq!(index.lookup(1025).unwrap().pid, 1025);

        assert_eq!(index.remove(1).unwrap().pid, 1);
        assert!(index.lookup(1).is_none());
        assert_eq!(index.lookup(1025).unwrap().binary, "/usr/bin/p1025");
    }

    #[test]
    fn test_remove_middle_of_chain() {
        let mut index = ProcessIndex::with_buckets(1024).unwrap();
        for pid in [1, 1025, 2049] {
            index.insert(proc(pid));
        }

        assert_eq!(index.remove(1025).unwrap().pid, 1025);

        assert_eq!(index.chain(0), vec![1, 2049]);
        assert!(index.lookup(1).is_some());
        assert!(index.lookup(2049).is_some());
        assert!(index.lookup(1025).is_none());
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn test_remove_head_and_tail() {
        let mut index = ProcessIndex::with_buckets(4).unwrap();
        for pid in [1, 5, 9, 13] {
            index.insert(proc(pid));
        }

        index.remove(1).unwrap();
        index.remove(13).unwrap();
        assert_eq!(index.chain(0), vec![5, 9]);

        // Tail must still be valid for appends
        index.insert(proc(17));
        assert_eq!(index.chain(0), vec![5, 9, 17]);

        index.remove(5).unwrap();
        index.remove(9).unwrap();
        index.remove(17).unwrap();
        assert!(index.chain(0).is_empty());
        assert!(index.is_empty());

        index.insert(proc(21));
        assert_eq!(index.chain(0), vec![21]);
    }

    #[test]
    fn test_remove_missing() {
        let mut index = ProcessIndex::with_buckets(16).unwrap();
        assert!(index.remove(42).is_none());

        index.insert(proc(7));
        assert!(index.remove(42).is_none());
        assert!(index.remove(7).is_some());
        assert!(index.remove(7).is_none());
    }

    #[test]
    fn test_unhash_by_handle() {
        let mut index = ProcessIndex::with_buckets(1024).unwrap();
        index.insert(proc(1));
        let handle = index.insert(proc(1025));
        index.insert(proc(2049));

        assert_eq!(index.get(handle).unwrap().pid, 1025);

        let unhashed = index.unhash(handle).unwrap();
        assert_eq!(unhashed.pid, 1025);
        assert_eq!(index.chain(0), vec![1, 2049]);

        // Stale handle
        assert!(index.unhash(handle).is_none());
        assert!(index.get(handle).is_none());
    }

    #[test]
    fn test_stale_handle_after_slot_reuse() {
        let mut index = ProcessIndex::with_buckets(16).unwrap();
        let old = index.insert(proc(3));
        index.remove(3).unwrap();

        let new = index.insert(proc(4));

        assert_ne!(old, new);
        assert!(index.get(old).is_none());
        assert!(index.unhash(old).is_none());
        assert_eq!(index.get(new).unwrap().pid, 4);
    }

    #[test]
    fn test_handle_from_other_index() {
        let mut first = ProcessIndex::with_buckets(16).unwrap();
        let mut second = ProcessIndex::with_buckets(16).unwrap();
        let foreign = first.insert(proc(10));
        second.insert(proc(20));

        assert!(second.get(foreign).is_none());
        assert!(second.unhash(foreign).is_none());
        assert_eq!(second.len(), 1);
        assert_eq!(first.get(foreign).unwrap().pid, 10);
    }

    #[test]
    fn test_handle_lookup() {
        let mut index = ProcessIndex::with_buckets(16).unwrap();
        let inserted = index.insert(proc(10));

        assert_eq!(index.handle(10), Some(inserted));
        assert_eq!(index.handle(11), None);
    }

    #[test]
    fn test_duplicate_pid_first_match_wins() {
        let mut index = ProcessIndex::with_buckets(16).unwrap();
        index.insert(Process::new(5, "/usr/bin/first"));
        index.insert(Process::new(5, "/usr/bin/second"));

        assert_eq!(index.len(), 2);
        assert_eq!(index.lookup(5).unwrap().binary, "/usr/bin/first");

        assert_eq!(index.remove(5).unwrap().binary, "/usr/bin/first");
        assert_eq!(index.lookup(5).unwrap().binary, "/usr/bin/second");
    }

    #[test]
    fn test_lookup_mut_keeps_key() {
        let mut index = ProcessIndex::with_buckets(16).unwrap();
        index.insert(proc(8));

        let process = index.lookup_mut(8).unwrap();
        process.group = Some("desktop".to_string());
        process.pid = 9;

        assert_eq!(index.lookup(8).unwrap().group.as_deref(), Some("desktop"));
        assert!(index.lookup(9).is_none());
    }

    #[test]
    fn test_stats() {
        let mut index = ProcessIndex::with_buckets(8).unwrap();
        for pid in [1, 9, 17, 2, 3] {
            index.insert(proc(pid));
        }

        let stats = index.stats();
        assert_eq!(stats.buckets, 8);
        assert_eq!(stats.processes, 5);
        assert_eq!(stats.occupied_buckets, 3);
        assert_eq!(stats.longest_chain, 3);
        assert!((stats.average_chain() - 5.0 / 3.0).abs() < f64::EPSILON);

        assert_eq!(ProcessIndexStats::default().average_chain(), 0.0);
    }

    #[test]
    fn test_churn() {
        let mut index = ProcessIndex::with_buckets(64).unwrap();

        for pid in 1..=1000 {
            index.insert(proc(pid));
        }
        for pid in (1..=1000).filter(|p| p % 2 == 0) {
            assert_eq!(index.remove(pid).unwrap().pid, pid);
        }
        for pid in 1001..=1500 {
            index.insert(proc(pid));
        }

        assert_eq!(index.len(), 1000);
        for pid in 1..=1500 {
            let expected = pid > 1000 || pid % 2 == 1;
            assert_eq!(index.lookup(pid).is_some(), expected, "pid {}", pid);
        }
        assert_eq!(index.iter().count(), 1000);
        // Vacated slots are reused
        assert_eq!(index.slots.len(), 1000);
    }
}
