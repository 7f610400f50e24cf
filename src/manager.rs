//! The Lifespan Manager.
//!
//! This is the component that actually approximates LRU. Instead of
//! maintaining one global ordering of every item (expensive to keep
//! consistent under concurrent access), it divides time into fixed-width
//! slices and buckets nodes into [`AgeBag`]s by which slice they were last
//! touched in. Eviction sweeps entire bags — the oldest generation still
//! resident — rather than individual items, trading exact recency
//! ordering for O(1), lock-cheap touches.
//!
//! ```text
//! oldest                                         current
//!   │                                                │
//!   ▼                                                ▼
//! ┌─────┐  ┌─────┐  ┌─────┐   ...   ┌─────┐  ┌─────┐
//! │ Bag │→ │ Bag │→ │ Bag │         │ Bag │→ │ Bag │   (ring, generation % R)
//! └─────┘  └─────┘  └─────┘         └─────┘  └─────┘
//!  sweep first, then advance oldest   accepts new touches
//! ```
//!
//! Two independent concerns share this module: advancing the generation
//! window (`clean_up`) and telling the index layer to rebuild when it has
//! accumulated too many dead weak references (`check_index_valid`). Both
//! run under the same coarse mutex — see the crate-level docs for the
//! full lock-ordering discussion.

use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::bag::OrderedBagRing;
use crate::config::CacheConfig;
use crate::error::CacheError;
use crate::node::Node;

/// A callback the Cache façade installs so `check_index_valid` can ask
/// every registered index to rebuild without the manager needing to know
/// about index internals or key types.
type RebuildHook = Arc<dyn Fn() + Send + Sync>;

pub(crate) struct LifespanManager<T> {
    ring: OrderedBagRing<T>,
    current: AtomicI64,
    oldest: AtomicI64,
    /// Touches recorded against the current bag since it was opened; once
    /// this passes `bag_item_limit` (or enough wall-clock time has elapsed)
    /// `check_valid` stops deferring maintenance and runs `clean_up`, which
    /// rotates to a fresh bag unconditionally.
    current_size: AtomicUsize,
    /// Live, bag-attached node count.
    cur_count: AtomicUsize,
    /// Every node ever constructed via [`LifespanManager::add`], reset to
    /// `cur_count` whenever the index layer rebuilds.
    total_count: AtomicUsize,
    next_valid_check: Mutex<Instant>,
    min_age: Duration,
    max_age: Duration,
    time_slice: Duration,
    bag_item_limit: usize,
    capacity: usize,
    /// The coarse lock. Anything that restructures the ring (attach,
    /// sweep, clear) is taken under this mutex; an `Index`'s own
    /// reader-writer lock is only ever acquired *after* this one, never
    /// before.
    mutex: Mutex<()>,
    validity: Option<Arc<dyn Fn() -> bool + Send + Sync>>,
    rebuild_hook: OnceLock<RebuildHook>,
    epoch: Instant,
}

impl<T> LifespanManager<T> {
    pub(crate) fn new(config: &CacheConfig) -> Self {
        let max_age = config.clamped_max_age();
        let time_slice = (max_age / 240).max(Duration::from_millis(1));
        let bag_item_limit = (config.capacity.get() / 20).max(1);
        let manager = Self {
            ring: OrderedBagRing::new(),
            current: AtomicI64::new(0),
            oldest: AtomicI64::new(0),
            current_size: AtomicUsize::new(0),
            cur_count: AtomicUsize::new(0),
            total_count: AtomicUsize::new(0),
            next_valid_check: Mutex::new(Instant::now()),
            min_age: config.min_age,
            max_age,
            time_slice,
            bag_item_limit,
            capacity: config.capacity.get(),
            mutex: Mutex::new(()),
            validity: config.validity.clone(),
            rebuild_hook: OnceLock::new(),
            epoch: Instant::now(),
        };
        manager.ring.get(0).expect("generation 0 is always valid").open(0);
        manager
    }

    pub(crate) fn set_rebuild_hook(&self, hook: RebuildHook) {
        let _ = self.rebuild_hook.set(hook);
    }

    fn now_millis(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    pub(crate) fn current_generation(&self) -> i64 {
        self.current.load(Ordering::Acquire)
    }

    pub(crate) fn cur_count(&self) -> usize {
        self.cur_count.load(Ordering::Acquire)
    }

    /// Constructs a new node for `value` and attaches it to the current
    /// bag. Does not touch `total_count` — the Cache façade decides
    /// whether this is a genuinely new insertion after consulting every
    /// index.
    pub(crate) fn add(&self, value: T) -> Result<Arc<Node<T>>, CacheError> {
        let node = Node::new(value);
        self.touch_node(&node)?;
        Ok(node)
    }

    pub(crate) fn record_total_increment(&self) {
        self.total_count.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn record_detach(&self) {
        self.cur_count.fetch_sub(1, Ordering::AcqRel);
    }

    /// Attaches `node` to the current bag if it is unmanaged, then
    /// unconditionally records the current generation on it. Mirrors a
    /// double-checked attach: the fast path (already in the current
    /// generation) takes no lock at all.
    pub(crate) fn touch_node(&self, node: &Arc<Node<T>>) -> Result<(), CacheError> {
        let generation = self.current.load(Ordering::Acquire);
        if node.generation() != Some(generation) {
            let _guard = self.mutex.lock();
            let generation = self.current.load(Ordering::Acquire);
            if node.generation().is_none() {
                if let Ok(bag) = self.ring.get(generation) {
                    bag.attach(node);
                    self.cur_count.fetch_add(1, Ordering::AcqRel);
                }
            }
            // A node already attached to an older generation is left
            // ghost-chained in that bag's list; only its logical
            // generation marker moves forward here. The sweep in
            // `clean_up` will migrate it into the then-current bag the
            // next time it passes through.
            node.set_generation(generation);
        }
        self.current_size.fetch_add(1, Ordering::AcqRel);
        self.check_valid()
    }

    /// Generation past which a cache is considered to have run long enough
    /// that continuing to track per-generation state is no longer worth
    /// the risk of ever reaching the ring's wraparound point; forcing a
    /// full clear resets the generation counter back to zero instead.
    const MAX_SANE_GENERATION: i64 = 1_000_000;

    /// Non-blocking maintenance check. Never blocks the calling thread on
    /// another thread's sweep — if the mutex is already held, the caller
    /// simply proceeds without running maintenance this time.
    pub(crate) fn check_valid(&self) -> Result<(), CacheError> {
        let now = Instant::now();
        let over_item_limit = self.current_size.load(Ordering::Acquire) > self.bag_item_limit;
        if !over_item_limit {
            let next_check = self.next_valid_check.lock();
            if now < *next_check {
                return Ok(());
            }
        }
        let Some(_guard) = self.mutex.try_lock() else {
            return Ok(());
        };
        let mut next_check = self.next_valid_check.lock();
        if now < *next_check && !over_item_limit {
            return Ok(());
        }
        *next_check = now + self.time_slice;
        drop(next_check);

        let predicate_failed = self.validity.as_ref().is_some_and(|v| !v());
        if predicate_failed {
            log::warn!("validity predicate failed, clearing cache");
            self.clear_locked();
            return Ok(());
        }
        if self.current.load(Ordering::Acquire) > Self::MAX_SANE_GENERATION {
            log::warn!(
                "generation counter exceeded {}, clearing cache",
                Self::MAX_SANE_GENERATION
            );
            self.clear_locked();
            return Ok(());
        }
        self.clean_up(self.now_millis())
    }

    /// Sweeps the oldest generation(s) whose bags have aged past
    /// `max_age` (or are evictable under capacity/ring pressure), advances
    /// `oldest`, then unconditionally closes the current bag and opens the
    /// next generation, and finally checks whether the index layer has
    /// drifted too far out of date. Caller must hold `self.mutex`.
    fn clean_up(&self, now_millis: u64) -> Result<(), CacheError> {
        let current = self.current.load(Ordering::Acquire);
        let oldest = self.oldest.load(Ordering::Acquire);
        let mut gen = oldest;
        while gen < current {
            // The ring is a fixed-size circular buffer addressed by
            // generation modulo its length: if `oldest` ever fell more than
            // `RING_SIZE - 5` generations behind `current`, the next bag
            // opened would alias a still-live bag's physical slot. This
            // condition is unconditional — it must win out over min-age
            // protection, which only bounds *why* we evict, not whether the
            // ring is allowed to overflow.
            let ring_pressure = current - gen > crate::bag::RING_SIZE as i64 - 5;
            let aged_out = self.bag_started_before(gen, now_millis, self.max_age);
            let capacity_pressure = self.cur_count.load(Ordering::Acquire) > self.capacity
                && self.bag_stopped_before(gen, now_millis, self.min_age);
            if !(ring_pressure || aged_out || capacity_pressure) {
                break;
            }
            let Ok(bag) = self.ring.get(gen) else { break };
            let mut node = bag.take_chain();
            while let Some(n) = node {
                node = n.next().take();
                match n.generation() {
                    // stale: never re-touched since this bag closed — evict.
                    Some(g) if g == gen => {
                        n.clear_generation();
                        self.cur_count.fetch_sub(1, Ordering::AcqRel);
                    }
                    // migrated: logically moved to a newer generation
                    // while still ghost-chained here — reattach so it
                    // isn't lost.
                    Some(g) => {
                        if let Ok(live_bag) = self.ring.get(g) {
                            live_bag.attach(&n);
                        }
                    }
                    // tombstoned: removed since last swept — nothing to do.
                    None => {}
                }
            }
            gen += 1;
        }
        if gen > oldest {
            self.oldest.store(gen, Ordering::Release);
        }

        // spec.md §4.3: "When the loop terminates, open a new current bag
        // with generation current + 1" — unconditional, once per clean_up
        // call; the cadence is governed entirely by check_valid's own
        // try-lock/time-slice gate above, not by a second condition here.
        if let Ok(bag) = self.ring.get(current) {
            bag.close(now_millis);
        }
        let next = current.checked_add(1).ok_or(CacheError::BagNumberOverflow)?;
        let next_bag = self.ring.get(next)?;
        next_bag.open(now_millis);
        self.current.store(next, Ordering::Release);
        self.current_size.store(0, Ordering::Release);

        self.check_index_valid();
        Ok(())
    }

    fn bag_started_before(&self, generation: i64, now_millis: u64, age: Duration) -> bool {
        match self.ring.get(generation) {
            Ok(bag) => {
                let started = bag.start_millis();
                now_millis.saturating_sub(started) >= age.as_millis() as u64
            }
            Err(_) => false,
        }
    }

    /// Whether this bag was closed (its `stopTime`) at least `age` ago. An
    /// open bag (`stop_millis == u64::MAX`) is never eligible — its
    /// youngest item may have been touched moments ago.
    fn bag_stopped_before(&self, generation: i64, now_millis: u64, age: Duration) -> bool {
        match self.ring.get(generation) {
            Ok(bag) => {
                let stopped = bag.stop_millis();
                stopped != u64::MAX && now_millis.saturating_sub(stopped) >= age.as_millis() as u64
            }
            Err(_) => false,
        }
    }

    /// If the index layer has accumulated more dead weak references than
    /// `capacity` allows for, asks every index to rebuild and resets
    /// `total_count`. Caller must hold `self.mutex`.
    fn check_index_valid(&self) {
        let total = self.total_count.load(Ordering::Acquire);
        let live = self.cur_count.load(Ordering::Acquire);
        if total.saturating_sub(live) > self.capacity {
            log::debug!(
                "index drift ({total} total, {live} live) exceeded capacity {}, rebuilding",
                self.capacity
            );
            if let Some(hook) = self.rebuild_hook.get() {
                hook();
            }
            self.total_count.store(live, Ordering::Release);
        }
    }

    /// Detaches every node from every bag and resets all counters. Does
    /// not touch the index layer — a dangling weak reference simply fails
    /// to upgrade on the next lookup, which is indistinguishable from a
    /// normal sweep-induced eviction from the index's point of view.
    pub(crate) fn clear(&self) {
        let _guard = self.mutex.lock();
        self.clear_locked();
    }

    fn clear_locked(&self) {
        self.ring.empty();
        self.current.store(0, Ordering::Release);
        self.oldest.store(0, Ordering::Release);
        self.current_size.store(0, Ordering::Release);
        self.cur_count.store(0, Ordering::Release);
        self.total_count.store(0, Ordering::Release);
        let now = self.now_millis();
        if let Ok(bag) = self.ring.get(0) {
            bag.open(now);
        }
    }

    /// Walks every live node from `current` back to `oldest`, invoking
    /// `f` once per node whose generation marker matches the bag it is
    /// physically chained in (skipping ghost-chained/migrated entries,
    /// which will be visited through their real bag instead). Holds
    /// `self.mutex` for the entire call to `body`, passing it a `walk`
    /// callback that enumerates the live nodes under that same lock. Used
    /// by [`Index::rebuild`](crate::index::Index::rebuild), which nests its
    /// own writer-lock acquisition and map swap inside `body` — so the
    /// manager mutex and the index writer lock are held concurrently for
    /// the full clear+enumerate+reinsert span (spec.md §4.4), not merely
    /// acquired in order. The manager mutex is always the outer lock here,
    /// matching spec.md §5's order.
    pub(crate) fn with_live_nodes<R>(
        &self,
        body: impl FnOnce(&mut dyn FnMut(&mut dyn FnMut(&Arc<Node<T>>))) -> R,
    ) -> R {
        let _guard = self.mutex.lock();
        let mut walk = |f: &mut dyn FnMut(&Arc<Node<T>>)| {
            let current = self.current.load(Ordering::Acquire);
            let oldest = self.oldest.load(Ordering::Acquire);
            let mut gen = oldest;
            while gen <= current {
                if let Ok(bag) = self.ring.get(gen) {
                    let mut cur = bag.peek_chain();
                    while let Some(node) = cur {
                        if node.generation() == Some(gen) {
                            f(&node);
                        }
                        cur = node.next().clone();
                    }
                }
                gen += 1;
            }
        };
        body(&mut walk)
    }
}
