//! Named, weakly-referenced lookup indexes.
//!
//! An [`Index<K, T>`] maps application keys to the nodes that hold their
//! values — but only weakly. The node's real lifetime is governed entirely
//! by the [`LifespanManager`]; an index that still maps a key to a node
//! whose bag has been swept simply fails to upgrade the weak reference on
//! the next lookup, which is treated exactly like a cache miss.

use std::collections::HashMap;
use std::hash::{BuildHasher, Hash, RandomState};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::{CacheError, LoaderResult};
use crate::manager::LifespanManager;
use crate::node::Node;

/// How long an index's reader-writer lock will be waited on before giving
/// up with [`CacheError::LockTimeout`]. A bounded acquisition for index
/// locks, never an unbounded wait.
pub(crate) const LOCK_TIMEOUT: Duration = Duration::from_secs(30);

/// A lazy-loading callback used to populate a missing key.
pub type Loader<K, T> = Arc<dyn Fn(&K) -> LoaderResult<T> + Send + Sync>;

/// A key-extraction callback: given a value, returns the key an index
/// should file it under.
pub type KeyFn<K, T> = Arc<dyn Fn(&T) -> K + Send + Sync>;

/// A named lookup path into the cache, keyed by `K`.
pub struct Index<K, T, S = RandomState> {
    name: String,
    map: RwLock<HashMap<K, Weak<Node<T>>, S>>,
    get_key: KeyFn<K, T>,
    loader: Option<Loader<K, T>>,
    manager: Arc<LifespanManager<T>>,
}

impl<K, T, S> std::fmt::Debug for Index<K, T, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Index").field("name", &self.name).finish_non_exhaustive()
    }
}

impl<K, T> Index<K, T, RandomState>
where
    K: Eq + Hash + Clone,
{
    pub(crate) fn new(
        name: impl Into<String>,
        get_key: KeyFn<K, T>,
        loader: Option<Loader<K, T>>,
        manager: Arc<LifespanManager<T>>,
    ) -> Self {
        Self {
            name: name.into(),
            map: RwLock::new(HashMap::new()),
            get_key,
            loader,
            manager,
        }
    }
}

impl<K, T, S> Index<K, T, S>
where
    K: Eq + Hash + Clone,
    S: BuildHasher,
{
    /// This index's name, as passed to `Cache::add_index`.
    pub fn name(&self) -> &str {
        &self.name
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<K, Weak<Node<T>>, S>>, CacheError> {
        self.map
            .try_read_for(LOCK_TIMEOUT)
            .ok_or(CacheError::LockTimeout {
                waited: LOCK_TIMEOUT,
            })
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<K, Weak<Node<T>>, S>>, CacheError> {
        self.map
            .try_write_for(LOCK_TIMEOUT)
            .ok_or(CacheError::LockTimeout {
                waited: LOCK_TIMEOUT,
            })
    }

    /// Looks up the live node for `key`, if any weak reference for it
    /// still upgrades.
    pub(crate) fn get_node(&self, key: &K) -> Result<Option<Arc<Node<T>>>, CacheError> {
        let map = self.read()?;
        Ok(map.get(key).and_then(Weak::upgrade))
    }

    /// Files `node` under whatever key `get_key` extracts from its current
    /// value. Returns `true` if this key already had a (possibly dead)
    /// entry — used by the Cache façade to decide whether an insertion is
    /// genuinely new.
    pub(crate) fn add_item(&self, node: &Arc<Node<T>>) -> Result<bool, CacheError> {
        let Some(key) = node.with_value(|v| (self.get_key)(v)) else {
            return Ok(false);
        };
        let mut map = self.write()?;
        let existed = map.contains_key(&key);
        map.insert(key, Arc::downgrade(node));
        Ok(existed)
    }

    /// Looks up the node currently filed under the key `value` extracts
    /// to, without mutating anything.
    pub(crate) fn find_existing(&self, value: &T) -> Result<Option<Arc<Node<T>>>, CacheError> {
        let key = (self.get_key)(value);
        self.get_node(&key)
    }

    /// Removes `key`, detaching its node from the Lifespan Manager if the
    /// weak reference was still live.
    pub fn remove(&self, key: &K) -> Result<(), CacheError> {
        let mut map = self.write()?;
        if let Some(weak) = map.remove(key) {
            if let Some(node) = weak.upgrade() {
                node.remove(&self.manager);
            }
        }
        Ok(())
    }

    /// Drops every entry, live or dead.
    pub fn clear(&self) -> Result<(), CacheError> {
        let mut map = self.write()?;
        map.clear();
        Ok(())
    }

    /// Rebuilds the map from scratch by walking every node the Lifespan
    /// Manager still considers live, discarding dead weak references
    /// accumulated since the last rebuild. The whole clear+enumerate+
    /// reinsert span runs inside `LifespanManager::with_live_nodes`'s
    /// closure, so this index's writer lock is acquired and released while
    /// the manager's coarse mutex is still held — both locks overlap for
    /// the entire operation, with the manager mutex as the outer lock.
    pub fn rebuild(&self) -> Result<usize, CacheError>
    where
        S: Default,
    {
        self.manager.with_live_nodes(|walk| {
            let mut fresh = HashMap::<K, Weak<Node<T>>, S>::default();
            walk(&mut |node| {
                if let Some(key) = node.with_value(|v| (self.get_key)(v)) {
                    fresh.insert(key, Arc::downgrade(node));
                }
            });
            let len = fresh.len();
            let mut map = self.write()?;
            *map = fresh;
            Ok(len)
        })
    }

    /// Looks up `key`, touching its node on a hit. On a miss, invokes
    /// `loader_override` (or this index's own default loader, if any) and
    /// returns whatever it produces without inserting it anywhere — the
    /// Cache façade is responsible for inserting a freshly loaded value
    /// into every index via `on_loaded`.
    pub(crate) fn get_item(
        &self,
        key: &K,
        loader_override: Option<&Loader<K, T>>,
        on_loaded: impl FnOnce(T) -> Result<(), CacheError>,
    ) -> Result<Option<T>, CacheError>
    where
        T: Clone,
    {
        if let Some(node) = self.get_node(key)? {
            node.touch(&self.manager)?;
            if let Some(value) = node.value() {
                return Ok(Some(value));
            }
        }
        let loader = loader_override.or(self.loader.as_ref());
        let Some(loader) = loader else {
            return Ok(None);
        };
        match loader(key)? {
            Some(value) => {
                on_loaded(value.clone())?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }
}
