//! Bounded cache of compiled scripts with FIFO eviction.
//!
//! Entries are evicted strictly in insertion order. Lookups never change an
//! entry's position and overwriting an existing entry keeps its original
//! position, so a frequently used script is still evicted once enough newer
//! scripts arrive.
//!
//! # Examples
//!
//! ```
//! use script_executor_core::ScriptId;
//! use script_executor_sandbox::cache::ScriptCache;
//!
//! let cache = ScriptCache::new(2);
//! let (a, b, c) = (ScriptId::from_bits(0, 1), ScriptId::from_bits(0, 2), ScriptId::from_bits(0, 3));
//!
//! cache.put(a, "a");
//! cache.put(b, "b");
//! assert_eq!(cache.get(&a), Some("a")); // no promotion
//!
//! cache.put(c, "c");
//! assert!(!cache.contains(&a));
//! assert_eq!(cache.ids(), vec![b, c]);
//! ```

use script_executor_core::ScriptId;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

struct Entries<S> {
    scripts: HashMap<ScriptId, S>,
    order: VecDeque<ScriptId>,
}

/// FIFO cache mapping script ids to compiled scripts.
///
/// # Thread Safety
///
/// All methods take `&self`; a `Mutex` guards the entries and is never held
/// across an `.await`.
pub struct ScriptCache<S> {
    entries: Mutex<Entries<S>>,
    capacity: usize,
}

impl<S> std::fmt::Debug for ScriptCache<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let len = self
            .entries
            .lock()
            .map_or_else(|poisoned| poisoned.into_inner().scripts.len(), |e| e.scripts.len());
        f.debug_struct("ScriptCache")
            .field("len", &len)
            .field("capacity", &self.capacity)
            .finish()
    }
}

impl<S: Clone> ScriptCache<S> {
    /// Creates an empty cache holding at most `capacity` scripts.
    ///
    /// A capacity of zero is raised to one.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: Mutex::new(Entries {
                scripts: HashMap::with_capacity(capacity.min(1024)),
                order: VecDeque::with_capacity(capacity.min(1024)),
            }),
            capacity,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Entries<S>> {
        // No mutation below can panic halfway.
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns a clone of the cached script, without reordering.
    #[must_use]
    pub fn get(&self, id: &ScriptId) -> Option<S> {
        self.lock().scripts.get(id).cloned()
    }

    /// Inserts or replaces a script and returns the ids evicted to make
    /// room.
    ///
    /// Replacing keeps the entry's position. Inserting a new id first
    /// evicts the oldest entries until there is room.
    pub fn put(&self, id: ScriptId, script: S) -> Vec<ScriptId> {
        let mut entries = self.lock();
        let mut evicted = Vec::new();

        if !entries.scripts.contains_key(&id) {
            while entries.order.len() >= self.capacity {
                tracing::info!(
                    "Active scripts count [{}] exceeds maximum limit [{}]",
                    entries.order.len() + 1,
                    self.capacity
                );
                let Some(oldest) = entries.order.pop_front() else {
                    break;
                };
                tracing::info!("Removing active script with id [{oldest}]");
                entries.scripts.remove(&oldest);
                evicted.push(oldest);
            }
            entries.order.push_back(id);
        }
        entries.scripts.insert(id, script);
        tracing::info!("Script cache size is [{}]", entries.scripts.len());

        evicted
    }

    /// Removes a script. Returns `false` if it was not cached.
    pub fn remove(&self, id: &ScriptId) -> bool {
        let mut entries = self.lock();
        if entries.scripts.remove(id).is_none() {
            return false;
        }
        if let Some(index) = entries.order.iter().position(|cached| cached == id) {
            entries.order.remove(index);
        }
        true
    }

    /// Returns `true` if the script is cached.
    #[must_use]
    pub fn contains(&self, id: &ScriptId) -> bool {
        self.lock().scripts.contains_key(id)
    }

    /// Returns cached ids, oldest first.
    #[must_use]
    pub fn ids(&self) -> Vec<ScriptId> {
        self.lock().order.iter().copied().collect()
    }

    /// Returns the number of cached scripts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().scripts.len()
    }

    /// Returns `true` if nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the maximum number of cached scripts.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drops every cached script.
    pub fn clear(&self) {
        let mut entries = self.lock();
        entries.scripts.clear();
        entries.order.clear();
    }
}
