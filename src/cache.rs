//! The public cache façade.
//!
//! [`Cache<T>`] owns one [`LifespanManager<T>`] and a registry of named
//! [`Index`]es, each of which may key `T` differently. Because the key
//! type varies per index, the registry stores each index behind a small
//! vtable of closures (so the façade can drive `add`/`clear`/`rebuild`
//! across all of them without knowing their key types) alongside an
//! `Arc<dyn Any>` that lets [`Cache::index`] recover the concrete,
//! strongly-typed `Arc<Index<K, T>>` a caller asked for.

use std::any::Any;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::config::CacheConfig;
use crate::error::CacheError;
use crate::index::{Index, KeyFn, Loader};
use crate::manager::LifespanManager;
use crate::node::Node;

type FindExisting<T> = Arc<dyn Fn(&T) -> Result<Option<Arc<Node<T>>>, CacheError> + Send + Sync>;
type InsertNode<T> = Arc<dyn Fn(&Arc<Node<T>>) -> Result<bool, CacheError> + Send + Sync>;
type ClearIndex = Arc<dyn Fn() -> Result<(), CacheError> + Send + Sync>;
type RebuildIndex = Arc<dyn Fn() -> Result<usize, CacheError> + Send + Sync>;

struct ErasedIndex<T> {
    any: Arc<dyn Any + Send + Sync>,
    insert_node: InsertNode<T>,
    clear: ClearIndex,
    rebuild: RebuildIndex,
    find_existing: FindExisting<T>,
}

struct CacheInner<T> {
    manager: Arc<LifespanManager<T>>,
    indexes: RwLock<HashMap<String, ErasedIndex<T>>>,
}

/// A generic, in-process object cache with lazy-loading named indexes and
/// age/capacity-bounded residency.
///
/// Cloning a `Cache` is cheap — it shares the same underlying manager and
/// index registry, the way `Arc`-wrapped handles in this corpus's
/// concurrent caches do.
pub struct Cache<T> {
    inner: Arc<CacheInner<T>>,
}

impl<T> Clone for Cache<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> std::fmt::Debug for Cache<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("len", &self.inner.manager.cur_count())
            .finish_non_exhaustive()
    }
}

impl<T> Cache<T>
where
    T: Send + Sync + 'static,
{
    /// Builds a new, empty cache from `config`.
    pub fn new(config: CacheConfig) -> Self {
        let manager = Arc::new(LifespanManager::new(&config));
        let inner = Arc::new(CacheInner {
            manager,
            indexes: RwLock::new(HashMap::new()),
        });
        let hook_target = Arc::downgrade(&inner);
        inner.manager.set_rebuild_hook(Arc::new(move || {
            if let Some(inner) = hook_target.upgrade() {
                inner.rebuild_all();
            }
        }));
        Self { inner }
    }

    /// Registers a new named index keyed by `K`, extracting keys from
    /// values via `get_key` and, optionally, lazily loading misses via
    /// `loader`.
    pub fn add_index<K>(
        &self,
        name: impl Into<String>,
        get_key: impl Fn(&T) -> K + Send + Sync + 'static,
        loader: Option<Loader<K, T>>,
    ) -> Arc<Index<K, T>>
    where
        K: Eq + Hash + Clone + Send + Sync + 'static,
    {
        let get_key: KeyFn<K, T> = Arc::new(get_key);
        let index = Arc::new(Index::new(
            name.into(),
            get_key,
            loader,
            Arc::clone(&self.inner.manager),
        ));
        let for_insert = Arc::clone(&index);
        let for_clear = Arc::clone(&index);
        let for_rebuild = Arc::clone(&index);
        let for_find = Arc::clone(&index);
        let erased = ErasedIndex {
            any: Arc::clone(&index) as Arc<dyn Any + Send + Sync>,
            insert_node: Arc::new(move |node| for_insert.add_item(node)),
            clear: Arc::new(move || for_clear.clear()),
            rebuild: Arc::new(move || for_rebuild.rebuild()),
            find_existing: Arc::new(move |value| for_find.find_existing(value)),
        };
        if let Err(err) = index.rebuild() {
            log::warn!("initial rebuild of new index failed: {err}");
        }
        let name = index.name().to_string();
        self.inner.indexes.write().insert(name, erased);
        index
    }

    /// Recovers the strongly-typed index registered under `name`, if one
    /// was registered with key type `K`.
    pub fn index<K>(&self, name: &str) -> Option<Arc<Index<K, T>>>
    where
        K: Eq + Hash + Clone + Send + Sync + 'static,
    {
        let indexes = self.inner.indexes.read();
        let erased = indexes.get(name)?;
        Arc::clone(&erased.any).downcast::<Index<K, T>>().ok()
    }

    /// Looks up `key` in the named index, lazily loading it on a miss via
    /// `loader_override` (falling back to the index's own default loader).
    /// A freshly loaded value is inserted into every registered index, not
    /// just the one it was looked up through.
    pub fn get<K>(
        &self,
        name: &str,
        key: &K,
        loader_override: Option<&Loader<K, T>>,
    ) -> Result<Option<T>, CacheError>
    where
        K: Eq + Hash + Clone + Send + Sync + 'static,
        T: Clone + PartialEq,
    {
        let Some(index) = self.index::<K>(name) else {
            return Ok(None);
        };
        index.get_item(key, loader_override, |value| self.add(value))
    }

    /// Inserts `value`. Every registered index is consulted first; if one
    /// already maps this value's key to an equal, live node, that node is
    /// touched and reused instead of constructing a duplicate. Otherwise a
    /// fresh node is constructed and inserted into every index.
    pub fn add(&self, value: T) -> Result<(), CacheError>
    where
        T: PartialEq,
    {
        let indexes = self.inner.indexes.read();
        for erased in indexes.values() {
            if let Some(node) = (erased.find_existing)(&value)? {
                if node.with_value(|existing| *existing == value).unwrap_or(false) {
                    node.touch(&self.inner.manager)?;
                    return Ok(());
                }
            }
        }
        let node = self.inner.manager.add(value)?;
        let mut any_duplicate = false;
        for erased in indexes.values() {
            if (erased.insert_node)(&node)? {
                any_duplicate = true;
            }
        }
        if !any_duplicate {
            self.inner.manager.record_total_increment();
        }
        Ok(())
    }

    /// Clears every index, then the Lifespan Manager itself.
    pub fn clear(&self) -> Result<(), CacheError> {
        let indexes = self.inner.indexes.read();
        for erased in indexes.values() {
            (erased.clear)()?;
        }
        drop(indexes);
        self.inner.manager.clear();
        Ok(())
    }

    /// Number of live, bag-attached nodes. Approximate under concurrent
    /// mutation under concurrent touches and sweeps.
    pub fn len(&self) -> usize {
        self.inner.manager.cur_count()
    }

    /// Whether the cache currently holds no live nodes.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> CacheInner<T>
where
    T: Send + Sync + 'static,
{
    fn rebuild_all(&self) {
        let indexes = self.indexes.read();
        for erased in indexes.values() {
            if let Err(err) = (erased.rebuild)() {
                log::warn!("index rebuild failed: {err}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::num::NonZeroUsize;
    use std::time::Duration;

    #[derive(Clone, Debug, PartialEq)]
    struct User {
        id: u32,
        name: String,
    }

    fn test_cache() -> Cache<User> {
        Cache::new(CacheConfig {
            capacity: NonZeroUsize::new(100).unwrap(),
            min_age: Duration::from_millis(0),
            max_age: Duration::from_secs(60),
            validity: None,
        })
    }

    #[test]
    fn add_then_get_round_trips() {
        let cache = test_cache();
        cache.add_index::<u32>("by_id", |u| u.id, None);
        cache
            .add(User {
                id: 1,
                name: "alice".into(),
            })
            .unwrap();
        let found = cache.get::<u32>("by_id", &1, None).unwrap();
        assert_eq!(
            found,
            Some(User {
                id: 1,
                name: "alice".into()
            })
        );
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn duplicate_add_reuses_existing_node() {
        let cache = test_cache();
        cache.add_index::<u32>("by_id", |u| u.id, None);
        let user = User {
            id: 1,
            name: "alice".into(),
        };
        cache.add(user.clone()).unwrap();
        cache.add(user).unwrap();
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn get_loads_on_miss_and_populates_every_index() {
        let cache = test_cache();
        cache.add_index::<u32>("by_id", |u| u.id, None);
        cache.add_index::<String>("by_name", |u| u.name.clone(), None);
        let loader: Loader<u32, User> = Arc::new(|id: &u32| {
            Ok(Some(User {
                id: *id,
                name: "loaded".into(),
            }))
        });
        let result = cache.get::<u32>("by_id", &9, Some(&loader)).unwrap();
        assert!(result.is_some());
        let via_name = cache
            .get::<String>("by_name", &"loaded".to_string(), None)
            .unwrap();
        assert!(via_name.is_some());
    }

    #[test]
    fn clear_empties_the_cache() {
        let cache = test_cache();
        cache.add_index::<u32>("by_id", |u| u.id, None);
        cache
            .add(User {
                id: 1,
                name: "alice".into(),
            })
            .unwrap();
        cache.clear().unwrap();
        assert_eq!(cache.len(), 0);
        assert_eq!(cache.get::<u32>("by_id", &1, None).unwrap(), None);
    }
}
