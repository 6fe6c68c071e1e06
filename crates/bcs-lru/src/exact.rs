//! Strict LRU over an index arena.

use crate::{Admission, Eviction, EvictionPolicy};
use bcs_error::{BcsError, Result};
use bcs_index::ResidentSampler;
use bcs_types::CacheKey;
use rand::Rng;
use std::mem;
use tracing::{debug, trace};

/// Slot of a block in an [`ExactLru`] arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LruHandle(u32);

impl LruHandle {
    #[must_use]
    pub fn slot(self) -> u32 {
        self.0
    }
}

#[derive(Debug, Clone, Copy)]
struct LruNode {
    key: CacheKey,
    /// Towards the most recently used end.
    newer: Option<u32>,
    /// Towards the least recently used end.
    older: Option<u32>,
}

/// Doubly linked recency list. The head is the most recently used block, the
/// tail is the next victim.
///
/// Nodes live in a `Vec` arena addressed by [`LruHandle`]; an evicted node's
/// slot is reused for the block that displaced it, so the arena never grows
/// past `max_elements`.
#[derive(Debug, Clone)]
pub struct ExactLru {
    nodes: Vec<Option<LruNode>>,
    free: Vec<u32>,
    head: Option<u32>,
    tail: Option<u32>,
    len: usize,
    max_elements: usize,
}

impl ExactLru {
    pub fn new(max_elements: usize) -> Result<Self> {
        if max_elements == 0 {
            return Err(BcsError::InvalidConfig(
                "lru capacity must be at least one block".to_owned(),
            ));
        }
        if u32::try_from(max_elements).is_err() {
            return Err(BcsError::InvalidConfig(format!(
                "lru capacity {max_elements} exceeds {} blocks",
                u32::MAX
            )));
        }
        let mut nodes = Vec::new();
        nodes
            .try_reserve_exact(max_elements)
            .map_err(|err| BcsError::AllocationFailure {
                what: "lru node arena",
                detail: err.to_string(),
            })?;
        debug!(max_elements, "exact_lru: initialized");
        Ok(Self {
            nodes,
            free: Vec::new(),
            head: None,
            tail: None,
            len: 0,
            max_elements,
        })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[must_use]
    pub fn max_elements(&self) -> usize {
        self.max_elements
    }

    /// Most recently used key.
    #[must_use]
    pub fn head_key(&self) -> Option<CacheKey> {
        self.head.and_then(|idx| self.node(idx)).map(|node| node.key)
    }

    /// Least recently used key, i.e. the next victim.
    #[must_use]
    pub fn tail_key(&self) -> Option<CacheKey> {
        self.tail.and_then(|idx| self.node(idx)).map(|node| node.key)
    }

    /// Keys from most to least recently used.
    pub fn iter_mru(&self) -> impl Iterator<Item = CacheKey> + '_ {
        let mut cursor = self.head;
        std::iter::from_fn(move || {
            let node = self.node(cursor?)?;
            cursor = node.older;
            Some(node.key)
        })
    }

    /// Make `key` the most recent block. Returns its handle and the key that
    /// was evicted to make room, if any.
    pub fn insert_key(&mut self, key: CacheKey) -> Result<(LruHandle, Option<CacheKey>)> {
        if self.len >= self.max_elements {
            let Some(tail) = self.tail else {
                return Err(BcsError::InvalidHandle {
                    handle: u32::MAX,
                    detail: format!("lru is full ({} blocks) but has no tail", self.len),
                });
            };
            self.unlink(tail);
            let victim = match self.nodes.get_mut(tail as usize) {
                Some(Some(node)) => mem::replace(&mut node.key, key),
                _ => {
                    return Err(BcsError::InvalidHandle {
                        handle: tail,
                        detail: "tail slot is empty".to_owned(),
                    });
                }
            };
            self.push_head(tail);
            trace!(block = key.0, victim = victim.0, slot = tail, "exact_lru: evicted tail");
            return Ok((LruHandle(tail), Some(victim)));
        }

        let node = LruNode {
            key,
            newer: None,
            older: None,
        };
        let slot = if let Some(slot) = self.free.pop() {
            self.nodes[slot as usize] = Some(node);
            slot
        } else {
            // len < max_elements <= u32::MAX, so the arena index fits.
            let slot = u32::try_from(self.nodes.len()).map_err(|_| BcsError::AllocationFailure {
                what: "lru node arena",
                detail: "slot index exceeds u32".to_owned(),
            })?;
            self.nodes.push(Some(node));
            slot
        };
        self.push_head(slot);
        self.len += 1;
        Ok((LruHandle(slot), None))
    }

    /// Move the block behind `handle` to the head. `key` must be the block the
    /// handle was issued for.
    pub fn touch(&mut self, key: CacheKey, handle: LruHandle) -> Result<()> {
        let slot = self.validate(key, handle)?;
        if self.head == Some(slot) {
            return Ok(());
        }
        self.unlink(slot);
        self.push_head(slot);
        Ok(())
    }

    /// Drop the block behind `handle` from the list.
    pub fn remove(&mut self, key: CacheKey, handle: LruHandle) -> Result<()> {
        let slot = self.validate(key, handle)?;
        self.unlink(slot);
        self.nodes[slot as usize] = None;
        self.free.push(slot);
        self.len -= 1;
        Ok(())
    }

    fn node(&self, idx: u32) -> Option<&LruNode> {
        self.nodes.get(idx as usize).and_then(Option::as_ref)
    }

    fn node_mut(&mut self, idx: u32) -> Option<&mut LruNode> {
        self.nodes.get_mut(idx as usize).and_then(Option::as_mut)
    }

    fn validate(&self, key: CacheKey, handle: LruHandle) -> Result<u32> {
        match self.nodes.get(handle.0 as usize) {
            None => Err(BcsError::InvalidHandle {
                handle: handle.0,
                detail: format!("slot out of range (arena holds {})", self.nodes.len()),
            }),
            Some(None) => Err(BcsError::InvalidHandle {
                handle: handle.0,
                detail: "slot is not linked".to_owned(),
            }),
            Some(Some(node)) if node.key != key => Err(BcsError::InvalidHandle {
                handle: handle.0,
                detail: format!("slot holds block {}, not block {}", node.key, key),
            }),
            Some(Some(_)) => Ok(handle.0),
        }
    }

    /// Detach a linked node, patching its neighbours and the list ends.
    fn unlink(&mut self, idx: u32) {
        let Some(node) = self.node(idx).copied() else {
            return;
        };
        match node.newer {
            Some(newer) => {
                if let Some(n) = self.node_mut(newer) {
                    n.older = node.older;
                }
            }
            None => self.head = node.older,
        }
        match node.older {
            Some(older) => {
                if let Some(n) = self.node_mut(older) {
                    n.newer = node.newer;
                }
            }
            None => self.tail = node.newer,
        }
        if let Some(n) = self.node_mut(idx) {
            n.newer = None;
            n.older = None;
        }
    }

    fn push_head(&mut self, idx: u32) {
        let old_head = self.head;
        if let Some(n) = self.node_mut(idx) {
            n.newer = None;
            n.older = old_head;
        }
        if let Some(h) = old_head.and_then(|h| self.node_mut(h)) {
            h.newer = Some(idx);
        }
        self.head = Some(idx);
        if self.tail.is_none() {
            self.tail = Some(idx);
        }
    }
}

impl EvictionPolicy for ExactLru {
    type Entry = LruHandle;

    fn name(&self) -> &'static str {
        "exact"
    }

    fn capacity(&self) -> usize {
        self.max_elements
    }

    fn resident(&self) -> usize {
        self.len
    }

    fn insert<S, R>(
        &mut self,
        key: CacheKey,
        _residents: &S,
        _rng: &mut R,
    ) -> Result<Admission<LruHandle>>
    where
        S: ResidentSampler<LruHandle> + ?Sized,
        R: Rng,
    {
        let (entry, victim) = self.insert_key(key)?;
        let eviction = victim.map_or(Eviction::NotNeeded, Eviction::Evicted);
        Ok(Admission { entry, eviction })
    }

    fn bump(&mut self, key: CacheKey, entry: &mut LruHandle) -> Result<()> {
        self.touch(key, *entry)
    }

    fn discard(&mut self, key: CacheKey, entry: LruHandle) -> Result<()> {
        self.remove(key, entry)
    }

    fn metadata_bytes(&self) -> usize {
        mem::size_of::<Self>()
            + self.nodes.capacity() * mem::size_of::<Option<LruNode>>()
            + self.free.capacity() * mem::size_of::<u32>()
    }
}
